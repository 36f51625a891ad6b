//! Shared plumbing for the Sieve CLI tools.

use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr, honoring `RUST_LOG`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print accumulated diagnostics, as text or JSON.
pub fn print_diagnostics(ehandler: &sieve_engine::ErrorHandler, json: bool) {
    if json {
        match serde_json::to_string_pretty(ehandler.diagnostics()) {
            Ok(out) => eprintln!("{out}"),
            Err(err) => eprintln!("failed to render diagnostics: {err}"),
        }
    } else {
        eprint!("{}", ehandler.format_all());
    }
}
