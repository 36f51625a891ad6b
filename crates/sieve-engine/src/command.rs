//! Static command and tag descriptors.
//!
//! Every Sieve command or test is described by a `static` implementing
//! [`CommandDef`]; the validator resolves identifiers to these descriptors
//! and drives their hooks. Tagged arguments resolve against [`TagDef`]s
//! registered per command by the `registered` hook.

use crate::ast::{Node, NodeKind};
use crate::codegen::{Generator, JumpList};
use crate::error::SieveError;
use crate::extension::ExtensionId;
use crate::validate::Validator;

/// Whether a command takes a `{ … }` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    Forbidden,
    Required,
}

/// Static descriptor of one command or test.
///
/// All hooks default to no-ops so simple commands only implement what they
/// need. Code generation has three entry points:
///
/// - [`generate`](CommandDef::generate) — command position. Receives the
///   surrounding block and the node's index so chained constructs
///   (`if`/`elsif`/`else`) can consume following siblings; returns the index
///   of the next node to generate.
/// - [`generate_test`](CommandDef::generate_test) — test position. Emits
///   code that jumps to `exit` iff the test evaluates to `jump_if`; logical
///   tests override this to expand into short-circuited branches.
/// - [`emit`](CommandDef::emit) — shared opcode/operand emission used by the
///   two defaults.
pub trait CommandDef: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn kind(&self) -> NodeKind;

    /// Inclusive range of accepted positional (non-tag) arguments.
    fn positional_args(&self) -> (usize, Option<usize>);

    /// Inclusive range of accepted sub-tests.
    fn subtests(&self) -> (usize, Option<usize>) {
        (0, Some(0))
    }

    fn block(&self) -> BlockPolicy {
        BlockPolicy::Forbidden
    }

    /// `require`-like commands must precede all other top-level commands.
    fn is_require(&self) -> bool {
        false
    }

    /// Called once when the command is registered with a validator; the
    /// place to attach tag descriptors.
    fn registered(&self, _registration: &mut CommandRegistration) {}

    /// Runs before tag resolution; typically installs the node context.
    fn pre_validate(&self, _validator: &mut Validator<'_>, _node: &mut Node) -> bool {
        true
    }

    /// Runs after tag resolution and argument-count checks.
    fn validate(&self, _validator: &mut Validator<'_>, _node: &mut Node) -> bool {
        true
    }

    fn generate(
        &self,
        generator: &mut Generator<'_>,
        block: &[Node],
        index: usize,
    ) -> Result<usize, SieveError> {
        self.emit(generator, &block[index])?;
        Ok(index + 1)
    }

    fn generate_test(
        &self,
        generator: &mut Generator<'_>,
        node: &Node,
        exit: &mut JumpList,
        jump_if: bool,
    ) -> Result<(), SieveError> {
        self.emit(generator, node)?;
        generator.emit_branch(jump_if, exit);
        Ok(())
    }

    fn emit(&self, _generator: &mut Generator<'_>, _node: &Node) -> Result<(), SieveError> {
        // Reaching the default means a descriptor forgot to override one of
        // the generation hooks.
        Err(SieveError::Internal)
    }
}

/// Static descriptor of one tagged argument (or a family of them).
///
/// A tag may be a single keyword (`:over`) or a polymorphic family whose
/// [`instance_of`](TagDef::instance_of) predicate decides membership by
/// name (`:all`/`:localpart`/`:domain` are one family object). Resolution
/// tries exact identifier matches first, then each registered tag's
/// membership predicate in registration order.
pub trait TagDef: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn instance_of(&self, name: &str) -> bool {
        name == self.identifier()
    }

    /// Validate the tag at `node.arguments[index]`.
    ///
    /// The hook may detach the tag argument, consume following arguments
    /// and mutate the node context. If it removes arguments the validator
    /// re-checks the same index; otherwise it advances.
    fn validate(&self, validator: &mut Validator<'_>, node: &mut Node, index: usize) -> bool;
}

/// A command bound into a validator, together with its tag registry.
#[derive(Clone)]
pub struct CommandRegistration {
    pub def: &'static dyn CommandDef,
    pub owner: Option<ExtensionId>,
    pub tags: Vec<&'static dyn TagDef>,
}

impl CommandRegistration {
    pub fn new(def: &'static dyn CommandDef, owner: Option<ExtensionId>) -> Self {
        let mut registration = Self {
            def,
            owner,
            tags: Vec::new(),
        };
        def.registered(&mut registration);
        registration
    }

    pub fn register_tag(&mut self, tag: &'static dyn TagDef) {
        self.tags.push(tag);
    }

    /// Resolve a tag name: exact identifier first, then family membership
    /// in registration order.
    pub fn resolve_tag(&self, name: &str) -> Option<&'static dyn TagDef> {
        self.tags
            .iter()
            .find(|t| t.identifier() == name)
            .or_else(|| self.tags.iter().find(|t| t.instance_of(name)))
            .copied()
    }
}
