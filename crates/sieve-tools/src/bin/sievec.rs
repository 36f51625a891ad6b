//! Compile a Sieve script to its binary form.
//!
//! Usage: `sievec <script.sieve> [-o OUT] [--dump | --hexdump]`

use clap::Parser;
use sieve_engine::{CompileFlags, EngineConfig, ErrorHandler, Instance};
use std::path::PathBuf;
use std::process;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sievec")]
#[command(about = "Compile a Sieve script into a binary")]
struct Args {
    /// Path to the Sieve script
    script: PathBuf,

    /// Output path for the binary (default: script path with .svbin)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Disassemble the compiled binary to stdout instead of saving it
    #[arg(long)]
    dump: bool,

    /// Hexdump the compiled binary to stdout instead of saving it
    #[arg(long)]
    hexdump: bool,

    /// Restrict the enabled extension set (space-separated names)
    #[arg(long)]
    extensions: Option<String>,

    /// Compile without the envelope extension
    #[arg(long)]
    no_envelope: bool,

    /// Mark the binary as carrying debug info
    #[arg(long)]
    debug: bool,

    /// Report diagnostics as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    sieve_tools::init_logging();
    let args = Args::parse();

    let mut instance = Instance::new(EngineConfig::default());
    if let Some(extensions) = args.extensions.as_deref() {
        instance.set_extensions(Some(extensions));
    }

    let flags = CompileFlags {
        no_envelope: args.no_envelope,
        debug: args.debug,
        ..CompileFlags::default()
    };
    let mut ehandler = ErrorHandler::default();
    let mut binary = match instance.compile_file(&args.script, &mut ehandler, flags) {
        Ok(binary) => binary,
        Err(err) => {
            sieve_tools::print_diagnostics(&ehandler, args.json);
            eprintln!("{}: compile failed: {err}", args.script.display());
            process::exit(1);
        }
    };
    sieve_tools::print_diagnostics(&ehandler, args.json);

    let stdout = std::io::stdout();
    if args.dump {
        if let Err(err) = instance.dump(&binary, &mut stdout.lock()) {
            eprintln!("dump failed: {err}");
            process::exit(1);
        }
        return;
    }
    if args.hexdump {
        if let Err(err) = instance.hexdump(&binary, &mut stdout.lock()) {
            eprintln!("hexdump failed: {err}");
            process::exit(1);
        }
        return;
    }

    let output = args
        .output
        .unwrap_or_else(|| args.script.with_extension("svbin"));
    if let Err(err) = binary.save(Some(&output), true) {
        eprintln!("{}: save failed: {err}", output.display());
        process::exit(1);
    }
    info!(path = %output.display(), "binary written");
}
