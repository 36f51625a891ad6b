//! Control structure: `require`, `if`/`elsif`/`else`, `stop`, and the jump
//! opcodes the conditionals compile into.
//!
//! Logical structure is resolved entirely at generation time: tests emit a
//! conditional jump after their test opcode, `if` chains backpatch their
//! exits, and there are no runtime boolean operators.

use crate::ast::{ArgKind, Node, NodeKind};
use crate::binary::dump::{DumpError, Dumper};
use crate::binary::opcode;
use crate::codegen::{Generator, JumpList};
use crate::command::{BlockPolicy, CommandDef};
use crate::error::{RuntimeError, SieveError};
use crate::extension::{OpcodeDef, Outcome};
use crate::interp::Runtime;
use crate::validate::Validator;

// === require =============================================================

/// Marker context left by the validator's require pass; a `require` node
/// without it sat somewhere the pass does not reach (inside a block).
pub(crate) struct RequireSeen;

/// `require <capabilities: string-list>`
///
/// Extension loading happens in the validator's dedicated require pass;
/// here only placement and argument shape are enforced. Generates no code.
pub(crate) struct CmdRequire;
pub(crate) static REQUIRE: CmdRequire = CmdRequire;

impl CommandDef for CmdRequire {
    fn identifier(&self) -> &'static str {
        "require"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }
    fn is_require(&self) -> bool {
        true
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        if node.context_ref::<RequireSeen>().is_none() {
            validator.error(
                node.span,
                "the require command is only allowed at the top level of a script",
            );
            return false;
        }
        validator.validate_positional(node, 0, "capabilities", ArgKind::StringList)
    }

    fn generate(
        &self,
        _generator: &mut Generator<'_>,
        _block: &[Node],
        index: usize,
    ) -> Result<usize, SieveError> {
        Ok(index + 1)
    }
}

// === if / elsif / else ===================================================

pub(crate) struct CmdIf;
pub(crate) static IF: CmdIf = CmdIf;

impl CommandDef for CmdIf {
    fn identifier(&self) -> &'static str {
        "if"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }
    fn subtests(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }
    fn block(&self) -> BlockPolicy {
        BlockPolicy::Required
    }

    /// Generates the whole `if`/`elsif`/`else` chain and consumes the
    /// sibling nodes that belong to it.
    fn generate(
        &self,
        generator: &mut Generator<'_>,
        block: &[Node],
        index: usize,
    ) -> Result<usize, SieveError> {
        let mut conditional_end = index + 1;
        while conditional_end < block.len() && block[conditional_end].identifier == "elsif" {
            conditional_end += 1;
        }
        let has_else =
            conditional_end < block.len() && block[conditional_end].identifier == "else";
        let chain_end = if has_else {
            conditional_end + 1
        } else {
            conditional_end
        };

        let mut exit = JumpList::new();
        for i in index..conditional_end {
            let branch = &block[i];
            let test = branch.tests.first().ok_or(SieveError::Internal)?;
            let mut next_branch = JumpList::new();
            generator.generate_test(test, &mut next_branch, false)?;
            generator.generate_block(&branch.block)?;
            if i + 1 < chain_end {
                generator.emit_jump(&mut exit);
            }
            generator.resolve(next_branch);
        }
        if has_else {
            generator.generate_block(&block[conditional_end].block)?;
        }
        generator.resolve(exit);
        Ok(chain_end)
    }
}

/// Shared descriptor for `elsif` and `else`; both must directly follow an
/// `if` or `elsif` and are emitted by the chain head.
pub(crate) struct CmdElse {
    identifier: &'static str,
    takes_test: bool,
}

pub(crate) static ELSIF: CmdElse = CmdElse {
    identifier: "elsif",
    takes_test: true,
};
pub(crate) static ELSE: CmdElse = CmdElse {
    identifier: "else",
    takes_test: false,
};

impl CommandDef for CmdElse {
    fn identifier(&self) -> &'static str {
        self.identifier
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }
    fn subtests(&self) -> (usize, Option<usize>) {
        if self.takes_test {
            (1, Some(1))
        } else {
            (0, Some(0))
        }
    }
    fn block(&self) -> BlockPolicy {
        BlockPolicy::Required
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        match validator.previous_command() {
            Some("if") | Some("elsif") => true,
            _ => {
                validator.error(
                    node.span,
                    format!(
                        "'{}' must directly follow an 'if' or 'elsif' command",
                        self.identifier
                    ),
                );
                false
            }
        }
    }

    fn generate(
        &self,
        _generator: &mut Generator<'_>,
        _block: &[Node],
        _index: usize,
    ) -> Result<usize, SieveError> {
        // Always consumed by the chain head; reaching this is a bug.
        Err(SieveError::Internal)
    }
}

// === stop ================================================================

pub(crate) struct CmdStop;
pub(crate) static STOP: CmdStop = CmdStop;

impl CommandDef for CmdStop {
    fn identifier(&self) -> &'static str {
        "stop"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }

    fn emit(&self, generator: &mut Generator<'_>, _node: &Node) -> Result<(), SieveError> {
        generator.emit_opcode(opcode::STOP);
        Ok(())
    }
}

// === control opcodes =====================================================

#[derive(Clone, Copy)]
enum JumpMode {
    Always,
    IfTrue,
    IfFalse,
}

pub(crate) struct JumpOp {
    mnemonic: &'static str,
    mode: JumpMode,
}

pub(crate) static JMP_OP: JumpOp = JumpOp {
    mnemonic: "JMP",
    mode: JumpMode::Always,
};
pub(crate) static JMP_IF_TRUE_OP: JumpOp = JumpOp {
    mnemonic: "JMP_IF_TRUE",
    mode: JumpMode::IfTrue,
};
pub(crate) static JMP_IF_FALSE_OP: JumpOp = JumpOp {
    mnemonic: "JMP_IF_FALSE",
    mode: JumpMode::IfFalse,
};

impl OpcodeDef for JumpOp {
    fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError> {
        dumper.dump_jump(address)
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        let target = runtime.read_jump_target(address)?;
        let taken = match self.mode {
            JumpMode::Always => true,
            JumpMode::IfTrue => runtime.test_result(),
            JumpMode::IfFalse => !runtime.test_result(),
        };
        if taken {
            *address = target;
        }
        Ok(Outcome::Continue)
    }
}

pub(crate) struct StopOp;
pub(crate) static STOP_OP: StopOp = StopOp;

impl OpcodeDef for StopOp {
    fn mnemonic(&self) -> &'static str {
        "STOP"
    }

    fn dump(&self, _dumper: &mut Dumper<'_>, _address: &mut usize) -> Result<(), DumpError> {
        Ok(())
    }

    fn execute(
        &self,
        _runtime: &mut Runtime<'_>,
        _address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        Ok(Outcome::Stop)
    }
}
