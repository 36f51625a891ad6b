//! Bytecode interpretation.
//!
//! The dispatch loop reads one opcode byte at a time and hands control to
//! the opcode's `execute` hook, which consumes its inline operands and
//! advances (or replaces) the program counter. Core opcodes live in a fixed
//! table; extension opcodes resolve through the binary's dependency table
//! plus a sub-code byte.
//!
//! The loop is cooperative and single-threaded: the CPU budget and the
//! optional cancellation token are sampled once per opcode, and a single
//! opcode is indivisible. Runtime errors never propagate out of the loop;
//! they map onto the execution's [`ExitStatus`].

use crate::binary::{opcode, SieveBinary, CUSTOM_START};
use crate::commands::{actions, control, tests};
use crate::error::{ErrorHandler, ExitStatus, Location, RuntimeError};
use crate::extension::{Extension, ExtensionId, OpcodeDef, Outcome};
use crate::foundation::Span;
use crate::message::{MessageData, ScriptEnv};
use crate::operand;
use crate::result::{Action, ResultSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Look up a core opcode by its code byte.
pub(crate) fn core_opcode(code: u8) -> Option<&'static dyn OpcodeDef> {
    Some(match code {
        opcode::JMP => &control::JMP_OP,
        opcode::JMP_IF_TRUE => &control::JMP_IF_TRUE_OP,
        opcode::JMP_IF_FALSE => &control::JMP_IF_FALSE_OP,
        opcode::STOP => &control::STOP_OP,
        opcode::KEEP => &actions::KEEP_OP,
        opcode::DISCARD => &actions::DISCARD_OP,
        opcode::REDIRECT => &actions::REDIRECT_OP,
        opcode::HEADER => &tests::HEADER_OP,
        opcode::ADDRESS => &tests::ADDRESS_OP,
        opcode::EXISTS => &tests::EXISTS_OP,
        opcode::SIZE_OVER => &tests::SIZE_OVER_OP,
        opcode::SIZE_UNDER => &tests::SIZE_UNDER_OP,
        _ => return None,
    })
}

/// Per-execution runtime environment handed to opcode hooks.
///
/// Lives exactly as long as one `run()` call.
pub struct Runtime<'a> {
    binary: &'a SieveBinary,
    exts: &'a [(ExtensionId, &'static dyn Extension)],
    message: &'a dyn MessageData,
    env: &'a mut dyn ScriptEnv,
    result: &'a mut ResultSet,
    ehandler: &'a mut ErrorHandler,
    /// Result register written by test opcodes and read by branches.
    pub(crate) test_result: bool,
    /// Extension owning the opcode currently executing.
    current_ext: Option<ExtensionId>,
    deadline: Option<Instant>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Runtime<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        binary: &'a SieveBinary,
        exts: &'a [(ExtensionId, &'static dyn Extension)],
        message: &'a dyn MessageData,
        env: &'a mut dyn ScriptEnv,
        result: &'a mut ResultSet,
        ehandler: &'a mut ErrorHandler,
        cpu_limit: Option<Duration>,
        cancel: Option<&'a AtomicBool>,
    ) -> Self {
        Self {
            binary,
            exts,
            message,
            env,
            result,
            ehandler,
            test_result: false,
            current_ext: None,
            deadline: cpu_limit.map(|limit| Instant::now() + limit),
            cancel,
        }
    }

    pub fn binary(&self) -> &'a SieveBinary {
        self.binary
    }

    pub fn message(&self) -> &dyn MessageData {
        self.message
    }

    pub fn env(&mut self) -> &mut dyn ScriptEnv {
        &mut *self.env
    }

    pub fn set_test_result(&mut self, value: bool) {
        self.test_result = value;
    }

    pub fn test_result(&self) -> bool {
        self.test_result
    }

    /// Record a pending action, attributed to the executing extension.
    pub fn record(&mut self, action: Action) -> Result<(), RuntimeError> {
        self.result
            .record(action, self.current_ext, &self.binary.script_name)
    }

    // Operand readers over the binary's code stream. The returned string
    // slices borrow from the binary, not from the runtime.

    pub fn read_number(&self, address: &mut usize) -> Result<u64, RuntimeError> {
        operand::read_number(self.binary, address)
    }

    pub fn read_string(&self, address: &mut usize) -> Result<&'a str, RuntimeError> {
        operand::read_string(self.binary, address)
    }

    pub fn read_string_list(&self, address: &mut usize) -> Result<Vec<&'a str>, RuntimeError> {
        operand::read_string_list(self.binary, address)
    }

    pub fn read_match_spec(
        &self,
        address: &mut usize,
    ) -> Result<crate::matching::MatchSpec, RuntimeError> {
        operand::read_match_spec(self.binary, address)
    }

    /// Resolve a relative jump: read the 4-byte offset at `address` and
    /// return the bounds-checked target.
    pub fn read_jump_target(&self, address: &mut usize) -> Result<usize, RuntimeError> {
        let offset = operand::read_i32(self.binary.code(), address)?;
        let target = *address as i64 + offset as i64;
        if target < 0 || target > self.binary.code().len() as i64 {
            return Err(RuntimeError::Corrupt(format!(
                "jump target {target} out of range"
            )));
        }
        Ok(target as usize)
    }

    fn check_budget(&self) -> Result<(), RuntimeError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(RuntimeError::TempFailure(
                    "CPU time limit exceeded".into(),
                ));
            }
        }
        if let Some(cancel) = self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(RuntimeError::TempFailure("execution cancelled".into()));
            }
        }
        Ok(())
    }

    /// Run the program to completion.
    pub(crate) fn run(&mut self) -> ExitStatus {
        for i in 0..self.exts.len() {
            let (id, ext) = self.exts[i];
            if !ext.interpreter_load(self, id) {
                tracing::warn!(extension = ext.name(), "interpreter load hook failed");
                return ExitStatus::BinCorrupt;
            }
        }

        let binary = self.binary;
        let code = binary.code();
        let program_end = code.len();
        let mut pc = 0usize;
        tracing::debug!(script = %binary.script_name, len = program_end, "interpreting");

        loop {
            if let Err(err) = self.check_budget() {
                self.result.discard_pending();
                return self.fail(err);
            }
            if pc == program_end {
                return ExitStatus::Ok;
            }
            if pc > program_end {
                return self.fail(RuntimeError::Corrupt(format!(
                    "program counter {pc} past end"
                )));
            }

            let op = code[pc];
            pc += 1;
            let def: &'static dyn OpcodeDef = if op < CUSTOM_START {
                self.current_ext = None;
                match core_opcode(op) {
                    Some(def) => def,
                    None => {
                        return self.fail(RuntimeError::Corrupt(format!(
                            "unknown opcode {op:#04x} at {:#x}",
                            pc - 1
                        )))
                    }
                }
            } else {
                let ext_index = (op - CUSTOM_START) as usize;
                let Some(&(id, ext)) = self.exts.get(ext_index) else {
                    return self.fail(RuntimeError::Corrupt(format!(
                        "opcode {op:#04x} names extension slot {ext_index} with no extension"
                    )));
                };
                let Some(&subcode) = code.get(pc) else {
                    return self.fail(RuntimeError::Corrupt("truncated extension opcode".into()));
                };
                pc += 1;
                let Some(&def) = ext.opcodes().get(subcode as usize) else {
                    return self.fail(RuntimeError::Corrupt(format!(
                        "extension '{}' has no opcode {subcode}",
                        ext.name()
                    )));
                };
                self.current_ext = Some(id);
                def
            };

            match def.execute(self, &mut pc) {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Stop) => return ExitStatus::Ok,
                Err(err) => {
                    if matches!(err, RuntimeError::TempFailure(_)) {
                        self.result.discard_pending();
                    }
                    return self.fail(err);
                }
            }
        }
    }

    /// Report a runtime error and map it to an exit status.
    fn fail(&mut self, err: RuntimeError) -> ExitStatus {
        let location = Location::new(self.binary.script_name.clone(), Span::zero());
        match err {
            RuntimeError::Corrupt(message) => {
                self.ehandler
                    .critical(Some(location), format!("corrupt binary: {message}"));
                ExitStatus::BinCorrupt
            }
            RuntimeError::Failure(message) => {
                self.ehandler.error(Some(location), message);
                ExitStatus::Failure
            }
            RuntimeError::TempFailure(message) => {
                self.ehandler.error(Some(location), message);
                ExitStatus::TempFailure
            }
        }
    }
}
