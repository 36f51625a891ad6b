//! Multiscript execution: an ordered chain of compiled scripts evaluated
//! against one message, sharing one result set that is committed once at
//! the end.
//!
//! Downstream scripts can observe upstream keep-equivalence through
//! [`Multiscript::keep_equivalence`]; a failing script ends the chain and
//! the commit policy matches single-script execution.

use crate::binary::SieveBinary;
use crate::engine::{ExecuteFlags, Instance};
use crate::error::{ErrorHandler, ExitStatus};
use crate::message::{MessageData, ScriptEnv};
use crate::result::{Action, ResultSet};
use std::io::Write;

pub struct Multiscript<'i> {
    instance: &'i Instance,
    result: ResultSet,
    status: ExitStatus,
    active: bool,
    scripts_run: usize,
}

impl<'i> Multiscript<'i> {
    pub(crate) fn new(instance: &'i Instance) -> Self {
        Self {
            instance,
            result: ResultSet::new(),
            status: ExitStatus::Ok,
            active: true,
            scripts_run: 0,
        }
    }

    /// Evaluate the next script in the chain. Returns `true` while the
    /// chain may continue.
    pub fn run(
        &mut self,
        binary: &SieveBinary,
        message: &dyn MessageData,
        env: &mut dyn ScriptEnv,
        ehandler: &mut ErrorHandler,
    ) -> bool {
        if !self.active {
            return false;
        }
        let status = match self.instance.run_binary(
            binary,
            message,
            env,
            &mut self.result,
            ehandler,
            None,
        ) {
            Ok(status) => status,
            Err(_) => ExitStatus::BinCorrupt,
        };
        self.scripts_run += 1;
        tracing::debug!(
            script = %binary.script_name(),
            position = self.scripts_run,
            ?status,
            "multiscript step"
        );
        match status {
            ExitStatus::Ok => true,
            other => {
                self.status = other;
                self.active = false;
                false
            }
        }
    }

    /// Whether the accumulated result would store the message somewhere.
    pub fn keep_equivalence(&self) -> bool {
        self.result.is_keep_equivalent()
    }

    pub fn will_discard(&self) -> bool {
        self.result.will_discard()
    }

    /// Force a discard into the shared result (host policy hook).
    pub fn run_discard(&mut self) {
        let _ = self.result.record(Action::Discard, None, "multiscript");
    }

    /// Abort the chain with a temporary failure.
    pub fn tempfail(&mut self) {
        self.status = ExitStatus::TempFailure;
        self.active = false;
    }

    /// Commit the shared result set and finish the chain.
    pub fn finish(mut self, env: &mut dyn ScriptEnv, ehandler: &mut ErrorHandler) -> ExitStatus {
        self.instance.commit(
            self.status,
            &mut self.result,
            env,
            ehandler,
            ExecuteFlags::default(),
        )
    }

    /// Finish a dry-run chain: print the pending result instead of
    /// committing it.
    pub fn finish_test(self, out: &mut dyn Write) -> std::io::Result<ExitStatus> {
        self.result.print(out)?;
        Ok(self.status)
    }
}
