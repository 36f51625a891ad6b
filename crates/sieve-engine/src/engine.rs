//! The engine instance: configuration and the public compile/execute API.
//!
//! An [`Instance`] owns one extension registry. Registration happens while
//! the instance is being configured; the first compile or execute freezes
//! the registry, after which only `set_extensions` (a pure enable-bit
//! update) is allowed. One instance may serve many concurrent executions;
//! each execution gets its own result set and runtime environment.

use crate::binary::dump::{self, DumpError};
use crate::binary::{SieveBinary, SourceMeta};
use crate::codegen::Generator;
use crate::error::{ErrorHandler, ExitStatus, SieveError};
use crate::extensions;
use crate::foundation::limits::DEFAULT_MAX_CPU_TIME;
use crate::interp::Runtime;
use crate::message::{MessageData, ScriptEnv};
use crate::multiscript::Multiscript;
use crate::parser;
use crate::registry::ExtensionRegistry;
use crate::result::ResultSet;
use crate::script::Script;
use crate::validate::Validator;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, UNIX_EPOCH};

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Verbose pipeline logging.
    pub debug: bool,
    /// CPU-time budget per execution; `None` disables the cap.
    pub max_cpu_time: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_cpu_time: Some(DEFAULT_MAX_CPU_TIME),
        }
    }
}

/// Compilation flags.
///
/// `no_global_vars` and `no_runlog` are accepted for interface
/// compatibility with hosts that configure the full engine; the features
/// they gate live outside this core.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileFlags {
    /// Make the `envelope` extension unavailable to `require`.
    pub no_envelope: bool,
    pub no_global_vars: bool,
    pub no_runlog: bool,
    /// Mark the produced binary as carrying debug info.
    pub debug: bool,
}

/// Execution flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteFlags {
    /// Evaluate only; never commit actions.
    pub no_delivery: bool,
    /// Log each committed action.
    pub log_result: bool,
    /// Leave the implicit keep to a later commit (multiscript chains).
    pub defer_keep: bool,
}

/// One Sieve engine instance.
pub struct Instance {
    config: EngineConfig,
    registry: ExtensionRegistry,
}

impl Instance {
    /// Initialize an instance with the built-in extensions registered: the
    /// pre-loaded pseudo-extensions plus `fileinto`, `reject` and
    /// `envelope`.
    pub fn new(config: EngineConfig) -> Self {
        let mut registry = ExtensionRegistry::new();
        for &ext in extensions::preloaded() {
            if let Err(err) = registry.require(ext) {
                tracing::error!(extension = ext.name(), %err, "failed to pre-load extension");
            }
        }
        for &ext in extensions::core_extensions() {
            if let Err(err) = registry.register(ext, true) {
                tracing::error!(extension = ext.name(), %err, "failed to register extension");
            }
        }
        tracing::debug!(
            extensions = %registry.list_string(),
            debug = config.debug,
            "sieve engine initialized"
        );
        Self { config, registry }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    /// Mutable registry access for host extension registration; fails once
    /// the instance has compiled or executed anything.
    pub fn registry_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.registry
    }

    /// Restrict the enabled extension set; `None` enables everything.
    pub fn set_extensions(&mut self, list: Option<&str>) {
        self.registry.set_string(list);
    }

    /// Space-separated names of the enabled extensions.
    pub fn extensions_string(&self) -> String {
        self.registry.list_string()
    }

    pub fn capability(&self, name: &str) -> Option<String> {
        self.registry.capability(name)
    }

    /// Compile a script through the full pipeline: parse, validate,
    /// generate. Diagnostics accumulate in `ehandler`; the error kind
    /// distinguishes an invalid script (`NotValid`) from engine trouble.
    pub fn compile(
        &self,
        script: &Script,
        ehandler: &mut ErrorHandler,
        flags: CompileFlags,
    ) -> Result<SieveBinary, SieveError> {
        self.registry.freeze();
        tracing::debug!(script = %script.location(), "compiling");

        let Some(mut ast) = parser::parse(script, ehandler) else {
            return Err(SieveError::NotValid);
        };
        let validator = Validator::new(script.name(), &self.registry, ehandler, flags);
        let required = validator.run(&mut ast)?;
        let generator = Generator::new(script.name(), ehandler, flags);
        let mut binary = generator.run(&ast, &required)?;

        if let Some(path) = script.path() {
            if let Ok(meta) = std::fs::metadata(path) {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                binary.set_source(SourceMeta {
                    path: path.to_path_buf(),
                    mtime,
                    size: meta.len(),
                });
            }
        }
        tracing::debug!(script = %script.location(), "compiled");
        Ok(binary)
    }

    pub fn compile_file(
        &self,
        path: impl AsRef<Path>,
        ehandler: &mut ErrorHandler,
        flags: CompileFlags,
    ) -> Result<SieveBinary, SieveError> {
        let script = Script::from_file(path)?;
        self.compile(&script, ehandler, flags)
    }

    /// Open a script: reuse its cached binary when current and executable,
    /// recompile (and re-save, best effort) otherwise.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        ehandler: &mut ErrorHandler,
        flags: CompileFlags,
    ) -> Result<SieveBinary, SieveError> {
        let path = path.as_ref();
        self.registry.freeze();
        let bin_path = binary_path_for(path);
        if bin_path.exists() {
            match SieveBinary::load(&bin_path) {
                Ok(binary) if binary.up_to_date(false) && binary.link(&self.registry).is_ok() => {
                    tracing::debug!(path = %bin_path.display(), "using cached binary");
                    return Ok(binary);
                }
                Ok(_) => {
                    tracing::debug!(path = %bin_path.display(), "cached binary is stale");
                }
                Err(err) => {
                    tracing::warn!(path = %bin_path.display(), %err, "cached binary unreadable");
                }
            }
        }
        let mut binary = self.compile_file(path, ehandler, flags)?;
        if let Err(err) = binary.save(Some(&bin_path), true) {
            tracing::warn!(path = %bin_path.display(), %err, "could not cache binary");
        }
        Ok(binary)
    }

    /// Execute a binary against a message and commit the resulting actions.
    pub fn execute(
        &self,
        binary: &SieveBinary,
        message: &dyn MessageData,
        env: &mut dyn ScriptEnv,
        ehandler: &mut ErrorHandler,
        flags: ExecuteFlags,
    ) -> Result<ExitStatus, SieveError> {
        self.execute_with_cancel(binary, message, env, ehandler, flags, None)
    }

    /// Like [`execute`](Self::execute) with an external cancellation token,
    /// sampled at every opcode boundary.
    pub fn execute_with_cancel(
        &self,
        binary: &SieveBinary,
        message: &dyn MessageData,
        env: &mut dyn ScriptEnv,
        ehandler: &mut ErrorHandler,
        flags: ExecuteFlags,
        cancel: Option<&AtomicBool>,
    ) -> Result<ExitStatus, SieveError> {
        let mut result = ResultSet::new();
        let status = self.run_binary(binary, message, env, &mut result, ehandler, cancel)?;
        Ok(self.commit(status, &mut result, env, ehandler, flags))
    }

    /// Evaluate a binary without committing anything; returns the
    /// interpreter status and the pending result set.
    pub fn evaluate(
        &self,
        binary: &SieveBinary,
        message: &dyn MessageData,
        env: &mut dyn ScriptEnv,
        ehandler: &mut ErrorHandler,
    ) -> Result<(ExitStatus, ResultSet), SieveError> {
        let mut result = ResultSet::new();
        let status = self.run_binary(binary, message, env, &mut result, ehandler, None)?;
        Ok((status, result))
    }

    /// Dry run: evaluate the binary and print the pending result set
    /// instead of committing it.
    pub fn test(
        &self,
        binary: &SieveBinary,
        message: &dyn MessageData,
        env: &mut dyn ScriptEnv,
        ehandler: &mut ErrorHandler,
        out: &mut dyn Write,
    ) -> Result<ExitStatus, SieveError> {
        let (status, result) = self.evaluate(binary, message, env, ehandler)?;
        result.print(out).map_err(|e| SieveError::from_io(&e))?;
        Ok(status)
    }

    /// Interpret one binary into a (possibly shared) result set.
    pub(crate) fn run_binary(
        &self,
        binary: &SieveBinary,
        message: &dyn MessageData,
        env: &mut dyn ScriptEnv,
        result: &mut ResultSet,
        ehandler: &mut ErrorHandler,
        cancel: Option<&AtomicBool>,
    ) -> Result<ExitStatus, SieveError> {
        self.registry.freeze();
        let exts = binary.link(&self.registry)?;
        let mut runtime = Runtime::new(
            binary,
            &exts,
            message,
            env,
            result,
            ehandler,
            self.config.max_cpu_time,
            cancel,
        );
        Ok(runtime.run())
    }

    /// Commit policy around the interpreter status.
    pub(crate) fn commit(
        &self,
        status: ExitStatus,
        result: &mut ResultSet,
        env: &mut dyn ScriptEnv,
        ehandler: &mut ErrorHandler,
        flags: ExecuteFlags,
    ) -> ExitStatus {
        match status {
            ExitStatus::Ok => {
                if flags.no_delivery {
                    ExitStatus::Ok
                } else {
                    result.execute(env, ehandler, flags.defer_keep, flags.log_result)
                }
            }
            ExitStatus::Failure => {
                // Evaluation failed mid-script: pending actions are void,
                // but the message must not be lost.
                result.discard_pending();
                if flags.no_delivery {
                    return ExitStatus::Failure;
                }
                match result.execute(env, ehandler, flags.defer_keep, flags.log_result) {
                    ExitStatus::KeepFailed => ExitStatus::KeepFailed,
                    _ => ExitStatus::Failure,
                }
            }
            // Nothing is ever committed for these.
            other => other,
        }
    }

    /// Start a multiscript chain sharing one result set.
    pub fn multiscript(&self) -> Multiscript<'_> {
        Multiscript::new(self)
    }

    pub fn dump(&self, binary: &SieveBinary, out: &mut dyn Write) -> Result<(), DumpError> {
        dump::dump(binary, &self.registry, out)
    }

    pub fn hexdump(&self, binary: &SieveBinary, out: &mut dyn Write) -> std::io::Result<()> {
        dump::hexdump(binary, out)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        for entry in self.registry.iter() {
            if entry.loaded {
                entry.ext.unload();
            }
        }
        tracing::debug!("sieve engine deinitialized");
    }
}

/// Cached-binary path for a script: same stem, `.svbin` extension.
fn binary_path_for(script_path: &Path) -> PathBuf {
    script_path.with_extension("svbin")
}
