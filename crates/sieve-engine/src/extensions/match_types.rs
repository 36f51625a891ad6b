//! The `@match-types` pseudo-extension.
//!
//! `:is`, `:contains` and `:matches` are one polymorphic tag family; the
//! membership predicate decides by name and the hook reads the actual tag
//! back out of the argument.

use crate::ast::{ArgValue, Node};
use crate::command::TagDef;
use crate::extension::Extension;
use crate::matching::{MatchSpec, MatchType};
use crate::validate::Validator;

#[derive(Debug)]
pub(crate) struct MatchTypesExt;
pub(crate) static MATCH_TYPES: MatchTypesExt = MatchTypesExt;

impl Extension for MatchTypesExt {
    fn name(&self) -> &'static str {
        "@match-types"
    }
}

/// The `:is`/`:contains`/`:matches` family.
pub(crate) struct MatchTypeTags;
pub(crate) static MATCH_TYPE_TAGS: MatchTypeTags = MatchTypeTags;

impl TagDef for MatchTypeTags {
    fn identifier(&self) -> &'static str {
        "match-type"
    }

    fn instance_of(&self, name: &str) -> bool {
        MatchType::by_name(name).is_some()
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node, index: usize) -> bool {
        let span = node.arguments[index].span;
        let name = match &node.arguments[index].value {
            ArgValue::Tag(name) => name.clone(),
            _ => return false,
        };
        let Some(match_type) = MatchType::by_name(&name) else {
            // Membership was checked during resolution; this is a bug.
            validator.error(span, format!("':{name}' is not a match type"));
            return false;
        };
        let Some(spec) = node.context_mut::<MatchSpec>() else {
            validator.error(span, format!(":{name} is not allowed here"));
            return false;
        };
        spec.match_type = match_type;
        node.arguments.remove(index);
        true
    }
}
