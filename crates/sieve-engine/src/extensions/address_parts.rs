//! The `@address-parts` pseudo-extension: the `:all`/`:localpart`/`:domain`
//! tag family.

use crate::ast::{ArgValue, Node};
use crate::command::TagDef;
use crate::extension::Extension;
use crate::matching::{AddressPart, MatchSpec};
use crate::validate::Validator;

#[derive(Debug)]
pub(crate) struct AddressPartsExt;
pub(crate) static ADDRESS_PARTS: AddressPartsExt = AddressPartsExt;

impl Extension for AddressPartsExt {
    fn name(&self) -> &'static str {
        "@address-parts"
    }
}

pub(crate) struct AddressPartTags;
pub(crate) static ADDRESS_PART_TAGS: AddressPartTags = AddressPartTags;

impl TagDef for AddressPartTags {
    fn identifier(&self) -> &'static str {
        "address-part"
    }

    fn instance_of(&self, name: &str) -> bool {
        AddressPart::by_name(name).is_some()
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node, index: usize) -> bool {
        let span = node.arguments[index].span;
        let name = match &node.arguments[index].value {
            ArgValue::Tag(name) => name.clone(),
            _ => return false,
        };
        let Some(part) = AddressPart::by_name(&name) else {
            validator.error(span, format!("':{name}' is not an address part"));
            return false;
        };
        let Some(spec) = node.context_mut::<MatchSpec>() else {
            validator.error(span, format!(":{name} is not allowed here"));
            return false;
        };
        spec.address_part = part;
        node.arguments.remove(index);
        true
    }
}
