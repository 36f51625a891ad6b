//! Core action commands: `keep`, `discard`, `redirect`.
//!
//! Action opcodes record into the result set and never touch the
//! environment; commit happens after the interpreter returns.

use super::positional_string;
use crate::ast::{ArgKind, Node, NodeKind};
use crate::binary::dump::{DumpError, Dumper};
use crate::binary::opcode;
use crate::codegen::Generator;
use crate::command::CommandDef;
use crate::error::{RuntimeError, SieveError};
use crate::extension::{OpcodeDef, Outcome};
use crate::interp::Runtime;
use crate::result::Action;
use crate::validate::Validator;

pub(crate) struct CmdKeep;
pub(crate) static KEEP: CmdKeep = CmdKeep;

impl CommandDef for CmdKeep {
    fn identifier(&self) -> &'static str {
        "keep"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }

    fn emit(&self, generator: &mut Generator<'_>, _node: &Node) -> Result<(), SieveError> {
        generator.emit_opcode(opcode::KEEP);
        Ok(())
    }
}

pub(crate) struct CmdDiscard;
pub(crate) static DISCARD: CmdDiscard = CmdDiscard;

impl CommandDef for CmdDiscard {
    fn identifier(&self) -> &'static str {
        "discard"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }

    fn emit(&self, generator: &mut Generator<'_>, _node: &Node) -> Result<(), SieveError> {
        generator.emit_opcode(opcode::DISCARD);
        Ok(())
    }
}

/// `redirect <address: string>`
pub(crate) struct CmdRedirect;
pub(crate) static REDIRECT: CmdRedirect = CmdRedirect;

impl CommandDef for CmdRedirect {
    fn identifier(&self) -> &'static str {
        "redirect"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        if !validator.validate_positional(node, 0, "address", ArgKind::String) {
            return false;
        }
        // A syntactically empty target would silently drop mail.
        if positional_string(node, 0).map_or(false, |s| s.trim().is_empty()) {
            validator.error(node.span, "redirect address must not be empty");
            return false;
        }
        true
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        generator.emit_opcode(opcode::REDIRECT);
        generator.emit_string(positional_string(node, 0)?);
        Ok(())
    }
}

// === opcodes =============================================================

pub(crate) struct KeepOp;
pub(crate) static KEEP_OP: KeepOp = KeepOp;

impl OpcodeDef for KeepOp {
    fn mnemonic(&self) -> &'static str {
        "KEEP"
    }

    fn dump(&self, _dumper: &mut Dumper<'_>, _address: &mut usize) -> Result<(), DumpError> {
        Ok(())
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        _address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        runtime.record(Action::Keep { mailbox: None })?;
        Ok(Outcome::Continue)
    }
}

pub(crate) struct DiscardOp;
pub(crate) static DISCARD_OP: DiscardOp = DiscardOp;

impl OpcodeDef for DiscardOp {
    fn mnemonic(&self) -> &'static str {
        "DISCARD"
    }

    fn dump(&self, _dumper: &mut Dumper<'_>, _address: &mut usize) -> Result<(), DumpError> {
        Ok(())
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        _address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        runtime.record(Action::Discard)?;
        Ok(Outcome::Continue)
    }
}

pub(crate) struct RedirectOp;
pub(crate) static REDIRECT_OP: RedirectOp = RedirectOp;

impl OpcodeDef for RedirectOp {
    fn mnemonic(&self) -> &'static str {
        "REDIRECT"
    }

    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError> {
        dumper.dump_string(address)
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        let target = runtime.read_string(address)?;
        runtime.record(Action::Redirect {
            address: target.to_string(),
        })?;
        Ok(Outcome::Continue)
    }
}
