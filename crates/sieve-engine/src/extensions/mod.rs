//! Built-in extensions.
//!
//! Three pseudo-extensions (`@comparators`, `@match-types`,
//! `@address-parts`) are pre-loaded into every instance and own the shared
//! tag families. The real extensions (`fileinto`, `reject`, `envelope`)
//! become available to scripts through `require` and demonstrate the full
//! plug-in surface: command, opcode and binary dependency.

pub(crate) mod address_parts;
pub(crate) mod comparators;
pub(crate) mod envelope;
pub(crate) mod fileinto;
pub(crate) mod match_types;
pub(crate) mod reject;

use crate::extension::Extension;

/// Pseudo-extensions pre-loaded and required in every registry.
pub(crate) fn preloaded() -> &'static [&'static dyn Extension] {
    static PRELOADED: &[&dyn Extension] = &[
        &comparators::COMPARATORS,
        &match_types::MATCH_TYPES,
        &address_parts::ADDRESS_PARTS,
    ];
    PRELOADED
}

/// Loadable core extensions.
pub(crate) fn core_extensions() -> &'static [&'static dyn Extension] {
    static CORE_EXTENSIONS: &[&dyn Extension] =
        &[&fileinto::FILEINTO, &reject::REJECT, &envelope::ENVELOPE];
    CORE_EXTENSIONS
}
