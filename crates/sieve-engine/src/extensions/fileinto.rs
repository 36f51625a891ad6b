//! The `fileinto` extension (RFC 5228 §4.1).

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
pub(crate) struct FileintoExt;
pub(crate) static FILEINTO: FileintoExt = FileintoExt;

impl Extension for FileintoExt {
    fn name(&self) -> &'static str {
        "fileinto"
    }

    fn validator_load(&self, validator: &mut Validator<'_>, id: ExtensionId) -> bool {
        validator.register_command(&CMD_FILEINTO, Some(id));
        true
    }

    fn opcodes(&self) -> &'static [&'static dyn OpcodeDef] {
        static OPCODES: &[&dyn OpcodeDef] = &[&FILEINTO_OP];
        OPCODES
    }
}

const OP_FILEINTO: u8 = 0;

/// `fileinto <mailbox: string>`
struct CmdFileinto;
static CMD_FILEINTO: CmdFileinto = CmdFileinto;

impl CommandDef for CmdFileinto {
    fn identifier(&self) -> &'static str {
        "fileinto"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        if !validator.validate_positional(node, 0, "mailbox", ArgKind::String) {
            return false;
        }
        if positional_string(node, 0).map_or(false, |s| s.is_empty()) {
            validator.error(node.span, "fileinto mailbox must not be empty");
            return false;
        }
        true
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        let ext_id = node.ext_id.ok_or(SieveError::Internal)?;
        generator.emit_extension_opcode(ext_id, OP_FILEINTO)?;
        generator.emit_string(positional_string(node, 0)?);
        Ok(())
    }
}

struct FileintoOp;
static FILEINTO_OP: FileintoOp = FileintoOp;

impl OpcodeDef for FileintoOp {
    fn mnemonic(&self) -> &'static str {
        "FILEINTO"
    }

    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError> {
        dumper.dump_string(address)
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        let mailbox = runtime.read_string(address)?;
        runtime.record(Action::FileInto {
            mailbox: mailbox.to_string(),
        })?;
        Ok(Outcome::Continue)
    }
}
