//! Core language commands and tests.
//!
//! Everything RFC 5228 defines without a `require` lives here: control
//! structure (`if`/`elsif`/`else`, `stop`, `require`), the core actions
//! (`keep`, `discard`, `redirect`) and the core test battery. Extension
//! commands follow the same descriptor pattern from their own modules.

pub(crate) mod actions;
pub(crate) mod control;
pub(crate) mod tests;

use crate::ast::{ArgValue, Node};
use crate::command::CommandDef;
use crate::error::SieveError;

/// All core commands, registered into every validator.
pub(crate) fn core_commands() -> &'static [&'static dyn CommandDef] {
    static COMMANDS: &[&dyn CommandDef] = &[
        &control::REQUIRE,
        &control::IF,
        &control::ELSIF,
        &control::ELSE,
        &control::STOP,
        &actions::KEEP,
        &actions::DISCARD,
        &actions::REDIRECT,
        &tests::SIZE,
        &tests::HEADER,
        &tests::ADDRESS,
        &tests::EXISTS,
        &tests::TRUE,
        &tests::FALSE,
        &tests::ALLOF,
        &tests::ANYOF,
        &tests::NOT,
    ];
    COMMANDS
}

// Accessors for validated positional arguments. By generation time the
// validator has enforced kinds, so a mismatch here is an engine bug.

pub(crate) fn positional_number(node: &Node, index: usize) -> Result<u64, SieveError> {
    match node.positional(index).map(|a| &a.value) {
        Some(&ArgValue::Number(n)) => Ok(n),
        _ => Err(SieveError::Internal),
    }
}

pub(crate) fn positional_string(node: &Node, index: usize) -> Result<&str, SieveError> {
    match node.positional(index).map(|a| &a.value) {
        Some(ArgValue::String(s)) => Ok(s),
        _ => Err(SieveError::Internal),
    }
}

pub(crate) fn positional_string_list(node: &Node, index: usize) -> Result<&[String], SieveError> {
    match node.positional(index).map(|a| &a.value) {
        Some(ArgValue::StringList(items)) => Ok(items),
        _ => Err(SieveError::Internal),
    }
}
