//! The `@comparators` pseudo-extension.
//!
//! Owns the `:comparator` tag and enumerates the built-in comparators;
//! there are no per-comparator extension objects. The available set is
//! published as the `comparator` capability string.

use crate::ast::{ArgValue, Node};
use crate::command::TagDef;
use crate::error::SieveError;
use crate::extension::{Extension, ExtensionId};
use crate::matching::{Comparator, MatchSpec};
use crate::registry::{CapabilityDef, ExtensionRegistry};
use crate::validate::Validator;

#[derive(Debug)]
pub(crate) struct ComparatorsExt;
pub(crate) static COMPARATORS: ComparatorsExt = ComparatorsExt;

fn comparator_capability() -> String {
    Comparator::names().join(" ")
}

impl Extension for ComparatorsExt {
    fn name(&self) -> &'static str {
        "@comparators"
    }

    fn load(&self, registry: &mut ExtensionRegistry, id: ExtensionId) -> Result<(), SieveError> {
        registry.register_capability(CapabilityDef {
            name: "comparator",
            owner: id,
            get_string: comparator_capability,
        });
        Ok(())
    }
}

/// `:comparator <name: string>` — consumes the tag and the following name
/// argument.
pub(crate) struct ComparatorTag;
pub(crate) static COMPARATOR_TAG: ComparatorTag = ComparatorTag;

impl TagDef for ComparatorTag {
    fn identifier(&self) -> &'static str {
        "comparator"
    }

    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node, index: usize) -> bool {
        let span = node.arguments[index].span;
        let name = match node.arguments.get(index + 1).map(|a| &a.value) {
            Some(ArgValue::String(name)) => name.clone(),
            _ => {
                validator.error(
                    span,
                    "the :comparator tag requires a comparator name as its argument",
                );
                return false;
            }
        };
        let Some(comparator) = Comparator::by_name(&name) else {
            validator.error(span, format!("unknown comparator '{name}'"));
            return false;
        };
        let Some(spec) = node.context_mut::<MatchSpec>() else {
            validator.error(span, ":comparator is not allowed here");
            return false;
        };
        spec.comparator = comparator;
        // Drop the name first so the tag index stays valid.
        node.arguments.remove(index + 1);
        node.arguments.remove(index);
        true
    }
}
