//! The `envelope` extension (RFC 5228 §5.4).
//!
//! Matches against SMTP envelope values rather than message headers.
//! Unavailable when the host compiles with the no-envelope flag.

use crate::ast::{ArgKind, ArgValue, Node, NodeKind};
use crate::binary::dump::{DumpError, Dumper};
use crate::codegen::Generator;
use crate::command::{CommandDef, CommandRegistration};
use crate::commands::positional_string_list;
use crate::error::{RuntimeError, SieveError};
use crate::extension::{Extension, ExtensionId, OpcodeDef, Outcome};
use crate::extensions::address_parts::ADDRESS_PART_TAGS;
use crate::extensions::comparators::COMPARATOR_TAG;
use crate::extensions::match_types::MATCH_TYPE_TAGS;
use crate::interp::Runtime;
use crate::matching::{parse_addresses, MatchSpec};
use crate::message::EnvelopeField;
use crate::validate::Validator;

#[derive(Debug)]
pub(crate) struct EnvelopeExt;
pub(crate) static ENVELOPE: EnvelopeExt = EnvelopeExt;

impl Extension for EnvelopeExt {
    fn name(&self) -> &'static str {
        "envelope"
    }

    fn validator_load(&self, validator: &mut Validator<'_>, id: ExtensionId) -> bool {
        validator.register_command(&TST_ENVELOPE, Some(id));
        true
    }

    fn opcodes(&self) -> &'static [&'static dyn OpcodeDef] {
        static OPCODES: &[&dyn OpcodeDef] = &[&ENVELOPE_OP];
        OPCODES
    }
}

const OP_ENVELOPE: u8 = 0;

/// `envelope [COMPARATOR] [ADDRESS-PART] [MATCH-TYPE] <envelope-part:
/// string-list> <key-list: string-list>`
struct TstEnvelope;
static TST_ENVELOPE: TstEnvelope = TstEnvelope;

impl CommandDef for TstEnvelope {
    fn identifier(&self) -> &'static str {
        "envelope"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Test
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (2, Some(2))
    }

    fn registered(&self, registration: &mut CommandRegistration) {
        registration.register_tag(&COMPARATOR_TAG);
        registration.register_tag(&MATCH_TYPE_TAGS);
        registration.register_tag(&ADDRESS_PART_TAGS);
    }

    fn pre_validate(&self, _validator: &mut Validator<'_>, node: &mut Node) -> bool {
        node.set_context(MatchSpec::default());
        true
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        if !validator.validate_positional(node, 0, "envelope part", ArgKind::StringList)
            || !validator.validate_positional(node, 1, "key list", ArgKind::StringList)
        {
            return false;
        }
        // Unknown envelope parts are a script error, not a runtime surprise.
        let mut ok = true;
        if let Some(ArgValue::StringList(parts)) = node.positional(0).map(|a| a.value.clone()) {
            for part in parts {
                if EnvelopeField::by_name(&part).is_none() {
                    validator.error(node.span, format!("unknown envelope part '{part}'"));
                    ok = false;
                }
            }
        }
        ok
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        let ext_id = node.ext_id.ok_or(SieveError::Internal)?;
        generator.emit_extension_opcode(ext_id, OP_ENVELOPE)?;
        let spec = node.context_ref::<MatchSpec>().ok_or(SieveError::Internal)?;
        generator.emit_match_spec(spec);
        generator.emit_string_list(positional_string_list(node, 0)?);
        generator.emit_string_list(positional_string_list(node, 1)?);
        Ok(())
    }
}

struct EnvelopeOp;
static ENVELOPE_OP: EnvelopeOp = EnvelopeOp;

impl OpcodeDef for EnvelopeOp {
    fn mnemonic(&self) -> &'static str {
        "ENVELOPE"
    }

    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError> {
        dumper.dump_match_spec(address)?;
        dumper.dump_string_list(address)?;
        dumper.dump_string_list(address)
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        let spec = runtime.read_match_spec(address)?;
        let parts = runtime.read_string_list(address)?;
        let keys = runtime.read_string_list(address)?;
        let mut matched = false;
        'outer: for part in &parts {
            let field = EnvelopeField::by_name(part).ok_or_else(|| {
                RuntimeError::Corrupt(format!("unknown envelope part '{part}'"))
            })?;
            for value in runtime.message().envelope(field) {
                for parsed in parse_addresses(&value) {
                    let part_value = parsed.part(spec.address_part);
                    for key in &keys {
                        if spec.matches(&part_value, key) {
                            matched = true;
                            break 'outer;
                        }
                    }
                }
            }
        }
        runtime.set_test_result(matched);
        Ok(Outcome::Continue)
    }
}
