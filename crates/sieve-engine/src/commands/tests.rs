//! Core test battery: `size`, `header`, `address`, `exists`, plus the
//! logical tests `true`, `false`, `allof`, `anyof`, `not`.
//!
//! Logical tests emit no opcodes of their own; they expand into
//! short-circuited branches at generation time. The value-matching tests
//! resolve their `(address-part, match-type, comparator)` triple during
//! validation and persist it as optional operands.

use super::{positional_number, positional_string_list};
use crate::ast::{ArgKind, Node, NodeKind};
use crate::binary::dump::{DumpError, Dumper};
use crate::binary::opcode;
use crate::codegen::{Generator, JumpList};
use crate::command::{CommandDef, CommandRegistration};
use crate::error::{RuntimeError, SieveError};
use crate::extension::{OpcodeDef, Outcome};
use crate::extensions::address_parts::ADDRESS_PART_TAGS;
use crate::extensions::comparators::COMPARATOR_TAG;
use crate::extensions::match_types::MATCH_TYPE_TAGS;
use crate::interp::Runtime;
use crate::matching::{parse_addresses, MatchSpec};
use crate::validate::Validator;

// === size ================================================================

struct SizeContext {
    over: Option<bool>,
}

/// `:over` / `:under` keyword tags of the size test.
struct SizeTag {
    identifier: &'static str,
    over: bool,
}

static OVER_TAG: SizeTag = SizeTag {
    identifier: "over",
    over: true,
};
static UNDER_TAG: SizeTag = SizeTag {
    identifier: "under",
    over: false,
};

impl crate::command::TagDef for SizeTag {
    fn identifier(&self) -> &'static str {
        self.identifier
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node, index: usize) -> bool {
        let span = node.arguments[index].span;
        let Some(ctx) = node.context_mut::<SizeContext>() else {
            validator.error(span, "size tag outside a size test");
            return false;
        };
        if ctx.over.is_some() {
            validator.error(
                span,
                "exactly one of the ':over' or ':under' tags must be specified \
                 for the size test, but more were found",
            );
            return false;
        }
        ctx.over = Some(self.over);
        node.arguments.remove(index);
        true
    }
}

/// `size <":over" / ":under"> <limit: number>`
pub(crate) struct TstSize;
pub(crate) static SIZE: TstSize = TstSize;

impl CommandDef for TstSize {
    fn identifier(&self) -> &'static str {
        "size"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Test
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn registered(&self, registration: &mut CommandRegistration) {
        registration.register_tag(&OVER_TAG);
        registration.register_tag(&UNDER_TAG);
    }

    fn pre_validate(&self, _validator: &mut Validator<'_>, node: &mut Node) -> bool {
        node.set_context(SizeContext { over: None });
        true
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        if node.context_ref::<SizeContext>().map_or(true, |c| c.over.is_none()) {
            validator.error(
                node.span,
                "the size test requires either the :under or the :over tag to be specified",
            );
            return false;
        }
        validator.validate_positional(node, 0, "limit", ArgKind::Number)
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        let over = node
            .context_ref::<SizeContext>()
            .and_then(|c| c.over)
            .ok_or(SieveError::Internal)?;
        generator.emit_opcode(if over {
            opcode::SIZE_OVER
        } else {
            opcode::SIZE_UNDER
        });
        generator.emit_number(positional_number(node, 0)?);
        Ok(())
    }
}

pub(crate) struct SizeOp {
    mnemonic: &'static str,
    over: bool,
}

pub(crate) static SIZE_OVER_OP: SizeOp = SizeOp {
    mnemonic: "SIZE_OVER",
    over: true,
};
pub(crate) static SIZE_UNDER_OP: SizeOp = SizeOp {
    mnemonic: "SIZE_UNDER",
    over: false,
};

impl OpcodeDef for SizeOp {
    fn mnemonic(&self) -> &'static str {
        self.mnemonic
    }

    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError> {
        dumper.dump_number(address)
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        let limit = runtime.read_number(address)?;
        let size = runtime.message().physical_size();
        runtime.set_test_result(if self.over { size > limit } else { size < limit });
        Ok(Outcome::Continue)
    }
}

// === header / address ====================================================

/// `header [COMPARATOR] [MATCH-TYPE] <header-names> <key-list>`
pub(crate) struct TstHeader;
pub(crate) static HEADER: TstHeader = TstHeader;

impl CommandDef for TstHeader {
    fn identifier(&self) -> &'static str {
        "header"
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
    }

    fn pre_validate(&self, _validator: &mut Validator<'_>, node: &mut Node) -> bool {
        node.set_context(MatchSpec::default());
        true
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        validator.validate_positional(node, 0, "header names", ArgKind::StringList)
            && validator.validate_positional(node, 1, "key list", ArgKind::StringList)
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        generator.emit_opcode(opcode::HEADER);
        let spec = node.context_ref::<MatchSpec>().ok_or(SieveError::Internal)?;
        generator.emit_match_spec(spec);
        generator.emit_string_list(positional_string_list(node, 0)?);
        generator.emit_string_list(positional_string_list(node, 1)?);
        Ok(())
    }
}

/// `address [COMPARATOR] [ADDRESS-PART] [MATCH-TYPE] <header-list> <key-list>`
pub(crate) struct TstAddress;
pub(crate) static ADDRESS: TstAddress = TstAddress;

impl CommandDef for TstAddress {
    fn identifier(&self) -> &'static str {
        "address"
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
        validator.validate_positional(node, 0, "header list", ArgKind::StringList)
            && validator.validate_positional(node, 1, "key list", ArgKind::StringList)
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        generator.emit_opcode(opcode::ADDRESS);
        let spec = node.context_ref::<MatchSpec>().ok_or(SieveError::Internal)?;
        generator.emit_match_spec(spec);
        generator.emit_string_list(positional_string_list(node, 0)?);
        generator.emit_string_list(positional_string_list(node, 1)?);
        Ok(())
    }
}

pub(crate) struct HeaderOp;
pub(crate) static HEADER_OP: HeaderOp = HeaderOp;

impl OpcodeDef for HeaderOp {
    fn mnemonic(&self) -> &'static str {
        "HEADER"
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
        let names = runtime.read_string_list(address)?;
        let keys = runtime.read_string_list(address)?;
        let mut matched = false;
        'outer: for name in &names {
            for value in runtime.message().header(name, true) {
                for key in &keys {
                    if spec.matches(&value, key) {
                        matched = true;
                        break 'outer;
                    }
                }
            }
        }
        runtime.set_test_result(matched);
        Ok(Outcome::Continue)
    }
}

pub(crate) struct AddressOp;
pub(crate) static ADDRESS_OP: AddressOp = AddressOp;

impl OpcodeDef for AddressOp {
    fn mnemonic(&self) -> &'static str {
        "ADDRESS"
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
        let names = runtime.read_string_list(address)?;
        let keys = runtime.read_string_list(address)?;
        let mut matched = false;
        'outer: for name in &names {
            for value in runtime.message().header(name, true) {
                for parsed in parse_addresses(&value) {
                    let part = parsed.part(spec.address_part);
                    for key in &keys {
                        if spec.matches(&part, key) {
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

// === exists ==============================================================

/// `exists <header-names: string-list>` — true iff every named header is
/// present.
pub(crate) struct TstExists;
pub(crate) static EXISTS: TstExists = TstExists;

impl CommandDef for TstExists {
    fn identifier(&self) -> &'static str {
        "exists"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Test
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node) -> bool {
        if !validator.validate_positional(node, 0, "header names", ArgKind::StringList) {
            return false;
        }
        if positional_string_list(node, 0).map_or(false, |l| l.is_empty()) {
            validator.warning(node.span, "exists with an empty header list always matches");
        }
        true
    }

    fn emit(&self, generator: &mut Generator<'_>, node: &Node) -> Result<(), SieveError> {
        generator.emit_opcode(opcode::EXISTS);
        generator.emit_string_list(positional_string_list(node, 0)?);
        Ok(())
    }
}

pub(crate) struct ExistsOp;
pub(crate) static EXISTS_OP: ExistsOp = ExistsOp;

impl OpcodeDef for ExistsOp {
    fn mnemonic(&self) -> &'static str {
        "EXISTS"
    }

    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError> {
        dumper.dump_string_list(address)
    }

    fn execute(
        &self,
        runtime: &mut Runtime<'_>,
        address: &mut usize,
    ) -> Result<Outcome, RuntimeError> {
        let names = runtime.read_string_list(address)?;
        let all_present = names
            .iter()
            .all(|name| !runtime.message().header(name, false).is_empty());
        runtime.set_test_result(all_present);
        Ok(Outcome::Continue)
    }
}

// === logical tests =======================================================

/// `true` / `false` — compile to an unconditional jump or to nothing.
pub(crate) struct TstConst {
    identifier: &'static str,
    value: bool,
}

pub(crate) static TRUE: TstConst = TstConst {
    identifier: "true",
    value: true,
};
pub(crate) static FALSE: TstConst = TstConst {
    identifier: "false",
    value: false,
};

impl CommandDef for TstConst {
    fn identifier(&self) -> &'static str {
        self.identifier
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Test
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }

    fn generate_test(
        &self,
        generator: &mut Generator<'_>,
        _node: &Node,
        exit: &mut JumpList,
        jump_if: bool,
    ) -> Result<(), SieveError> {
        if self.value == jump_if {
            generator.emit_jump(exit);
        }
        Ok(())
    }
}

/// `not <test>` — inverts the branch sense of its sub-test.
pub(crate) struct TstNot;
pub(crate) static NOT: TstNot = TstNot;

impl CommandDef for TstNot {
    fn identifier(&self) -> &'static str {
        "not"
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Test
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }
    fn subtests(&self) -> (usize, Option<usize>) {
        (1, Some(1))
    }

    fn generate_test(
        &self,
        generator: &mut Generator<'_>,
        node: &Node,
        exit: &mut JumpList,
        jump_if: bool,
    ) -> Result<(), SieveError> {
        let inner = node.tests.first().ok_or(SieveError::Internal)?;
        generator.generate_test(inner, exit, !jump_if)
    }
}

/// `allof (…)` / `anyof (…)` — short-circuiting conjunction/disjunction.
pub(crate) struct TstLogical {
    identifier: &'static str,
    any: bool,
}

pub(crate) static ALLOF: TstLogical = TstLogical {
    identifier: "allof",
    any: false,
};
pub(crate) static ANYOF: TstLogical = TstLogical {
    identifier: "anyof",
    any: true,
};

impl CommandDef for TstLogical {
    fn identifier(&self) -> &'static str {
        self.identifier
    }
    fn kind(&self) -> NodeKind {
        NodeKind::Test
    }
    fn positional_args(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }
    fn subtests(&self) -> (usize, Option<usize>) {
        (1, None)
    }

    fn generate_test(
        &self,
        generator: &mut Generator<'_>,
        node: &Node,
        exit: &mut JumpList,
        jump_if: bool,
    ) -> Result<(), SieveError> {
        // `anyof` short-circuits on the first true sub-test, `allof` on the
        // first false one.
        let decisive = self.any;
        if jump_if == decisive {
            for test in &node.tests {
                generator.generate_test(test, exit, decisive)?;
            }
        } else {
            let mut fallthrough = JumpList::new();
            for test in &node.tests {
                generator.generate_test(test, &mut fallthrough, decisive)?;
            }
            generator.emit_jump(exit);
            generator.resolve(fallthrough);
        }
        Ok(())
    }
}
