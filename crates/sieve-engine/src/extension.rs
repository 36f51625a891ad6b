//! The extension plug-in surface.
//!
//! Extensions are `static` singletons implementing [`Extension`]. They hook
//! into every pipeline stage: registration (`load`), validation
//! (`validator_load` registers commands and tags), generation, binary
//! loading and interpretation. Extension opcodes are dispatched through a
//! two-level scheme: the opcode byte selects the extension via the binary's
//! dependency table, a sub-code byte selects the opcode within
//! [`opcodes`](Extension::opcodes).

use crate::binary::dump::{DumpError, Dumper};
use crate::binary::SieveBinary;
use crate::codegen::Generator;
use crate::error::{RuntimeError, SieveError};
use crate::interp::Runtime;
use crate::registry::ExtensionRegistry;
use crate::validate::Validator;

/// Dense registry-assigned extension identifier.
///
/// Identifiers are stable within one registry lifetime; persisted binaries
/// remap them through their dependency table on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtensionId(u32);

impl ExtensionId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ext#{}", self.0)
    }
}

/// A Sieve extension.
///
/// Names beginning with `'@'` mark internal pseudo-extensions (the
/// comparator, match-type and address-part machinery); they are excluded
/// from the capability string reported to clients.
pub trait Extension: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Version recorded in binary dependency tables.
    fn version(&self) -> u16 {
        1
    }

    /// Called when the extension is first loaded into a registry; the place
    /// to register capabilities.
    fn load(&self, _registry: &mut ExtensionRegistry, _id: ExtensionId) -> Result<(), SieveError> {
        Ok(())
    }

    fn unload(&self) {}

    /// Called when a script `require`s this extension; registers the
    /// extension's commands and tests with the validator.
    fn validator_load(&self, _validator: &mut Validator<'_>, _id: ExtensionId) -> bool {
        true
    }

    /// Called when the generator links this extension into a binary.
    fn generator_load(&self, _generator: &mut Generator<'_>, _id: ExtensionId) -> bool {
        true
    }

    /// Called when a persisted binary naming this extension is loaded;
    /// may inspect the extension's scratch block.
    fn binary_load(&self, _binary: &SieveBinary, _id: ExtensionId) -> bool {
        true
    }

    /// Called before interpretation of a binary depending on this extension.
    fn interpreter_load(&self, _runtime: &mut Runtime<'_>, _id: ExtensionId) -> bool {
        true
    }

    /// Opcodes owned by this extension, indexed by sub-code byte.
    fn opcodes(&self) -> &'static [&'static dyn OpcodeDef] {
        &[]
    }
}

/// Continuation decision returned by opcode execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Stop,
}

/// One instruction: a mnemonic for dumps plus the execute behavior.
///
/// Opcodes read their operands inline from the code stream at `address` and
/// advance it past everything they consume; jumps replace it. There is no
/// operand stack.
pub trait OpcodeDef: Send + Sync {
    fn mnemonic(&self) -> &'static str;

    /// Disassemble the operands at `address` into the dumper.
    fn dump(&self, dumper: &mut Dumper<'_>, address: &mut usize) -> Result<(), DumpError>;

    /// Execute at `address` (already past the opcode byte).
    fn execute(&self, runtime: &mut Runtime<'_>, address: &mut usize)
        -> Result<Outcome, RuntimeError>;
}
