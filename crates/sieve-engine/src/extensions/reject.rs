//! The `reject` extension (RFC 5429).

use crate::ast::{ArgKind, Node, NodeKind};
use crate::binary::dump::{DumpError, Dumper};
use crate::codegen::Generator;
use crate::command::CommandDef;
use crate::commands::positional_string;
use crate::error::{RuntimeError, SieveError};
use crate::extension::{Extension, ExtensionId, OpcodeDef, Outcome};
use crate::interp::Runtime;
use crate::result::Action;
use crate::validate::Validator;

#[derive(Debug)]
pub(crate) struct RejectExt;
pub(crate) static REJECT: RejectExt = RejectExt;

impl Extension for RejectExt {
    fn name(&self) -> &'static str {
        "reject"
    }

    fn validator_load(&self, validator: &mut Validator<'_>, id: ExtensionId) -> bool {
        validator.register_command(&CMD_REJECT, Some(id));
        true
    }

    fn opcodes(&self) -> &'static [&'static dyn OpcodeDef] {
        static OPCODES: &[&dyn OpcodeDef] = &[&REJECT_OP];
        OPCODES
    }
}

const OP_REJECT: u8 = 0;

/// `reject <reason: string>`
struct CmdReject;
static CMD_REJECT: CmdReject = CmdReject;

impl CommandDef for CmdReject {
    fn identifier(&self) -> &'static str {
        "reject"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        validator.validate_positional(node, 0, "reason", ArgKind::String)
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        let ext_id = node.ext_id.ok_or(SieveError::Internal)?;
        generator.emit_extension_opcode(ext_id, OP_REJECT)?;
        generator.emit_string(positional_string(node, 0)?);
        Ok(())
    }
}

struct RejectOp;
static REJECT_OP: RejectOp = RejectOp;

impl OpcodeDef for RejectOp {
    fn mnemonic(&self) -> &'static str {
        "REJECT"
    }

    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError> {
        dumper.dump_string(address)
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        let reason = runtime.read_string(address)?;
        runtime.record(Action::Reject {
            reason: reason.to_string(),
        })?;
        Ok(Outcome::Continue)
    }
}
