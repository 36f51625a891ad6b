//! Semantic validation.
//!
//! The validator resolves every command and test against the descriptors
//! registered for this compilation, drives the per-construct hooks, and
//! type-checks arguments. All problems go through the error handler; the
//! walk keeps going so one pass reports as much as possible.
//!
//! `require` commands are processed first, in source order, before any
//! other validation: each listed extension is activated *for this
//! compilation only* (its `validator_load` hook registers its commands),
//! so later commands from that extension resolve normally. The instance
//! registry itself is never written.
//!
//! Per-node hook order: lookup → `pre_validate` → tag resolution and
//! validation → argument-count checks → `validate`. Tag hooks may consume
//! following arguments (`:comparator "i;octet"`), which is why counting
//! happens after the tag pass.

use crate::ast::{ArgKind, ArgValue, Ast, Node, NodeKind};
use crate::command::{BlockPolicy, CommandDef, CommandRegistration};
use crate::commands::core_commands;
use crate::engine::CompileFlags;
use crate::error::{ErrorHandler, Location, SieveError};
use crate::extension::{Extension, ExtensionId};
use crate::foundation::Span;
use crate::registry::ExtensionRegistry;
use indexmap::IndexMap;

pub struct Validator<'a> {
    script_name: String,
    registry: &'a ExtensionRegistry,
    ehandler: &'a mut ErrorHandler,
    flags: CompileFlags,
    commands: IndexMap<&'static str, CommandRegistration>,
    /// Extensions activated by `require`, in require order.
    required: Vec<(ExtensionId, &'static dyn Extension)>,
    /// Identifier of the sibling command validated just before the current
    /// one; read by hooks like `elsif`'s adjacency check.
    prev_command: Option<String>,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(
        script_name: &str,
        registry: &'a ExtensionRegistry,
        ehandler: &'a mut ErrorHandler,
        flags: CompileFlags,
    ) -> Self {
        let mut validator = Self {
            script_name: script_name.to_string(),
            registry,
            ehandler,
            flags,
            commands: IndexMap::new(),
            required: Vec::new(),
            prev_command: None,
        };
        for &def in core_commands() {
            validator.register_command(def, None);
        }
        validator
    }

    pub fn flags(&self) -> CompileFlags {
        self.flags
    }

    /// Bind a command or test descriptor for this compilation.
    pub fn register_command(&mut self, def: &'static dyn CommandDef, owner: Option<ExtensionId>) {
        let registration = CommandRegistration::new(def, owner);
        if self
            .commands
            .insert(def.identifier(), registration)
            .is_some()
        {
            tracing::warn!(command = def.identifier(), "command registered twice");
        }
    }

    pub fn previous_command(&self) -> Option<&str> {
        self.prev_command.as_deref()
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.ehandler.error(
            Some(Location::new(self.script_name.clone(), span)),
            message,
        );
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>) {
        self.ehandler.warning(
            Some(Location::new(self.script_name.clone(), span)),
            message,
        );
    }

    /// Validate the whole AST. Returns the activated extensions (in require
    /// order) on success.
    pub(crate) fn run(
        mut self,
        ast: &mut Ast,
    ) -> Result<Vec<(ExtensionId, &'static dyn Extension)>, SieveError> {
        let errors_before = self.ehandler.error_count();

        // Require pass: strictly before everything else. Nodes the pass
        // saw are marked so the walk can flag block-nested requires.
        let mut seen_other = false;
        for node in &mut ast.commands {
            let is_require = self
                .commands
                .get(node.identifier.as_str())
                .is_some_and(|r| r.def.is_require());
            if is_require {
                node.set_context(crate::commands::control::RequireSeen);
                if seen_other {
                    self.error(
                        node.span,
                        "require commands can only appear at the top of the script",
                    );
                    continue;
                }
                self.process_require(node);
            } else {
                seen_other = true;
            }
        }

        self.validate_block(&mut ast.commands);

        if self.ehandler.error_count() > errors_before {
            return Err(SieveError::NotValid);
        }
        Ok(self.required)
    }

    fn process_require(&mut self, node: &mut Node) {
        let names: Vec<String> = match node.arguments.first().map(|a| &a.value) {
            Some(ArgValue::String(name)) => vec![name.clone()],
            Some(ArgValue::StringList(names)) => names.clone(),
            _ => {
                self.error(
                    node.span,
                    "the require command expects a list of extension names",
                );
                return;
            }
        };
        for name in names {
            self.require_extension(&name, node.span);
        }
    }

    /// Activate an extension for this compilation.
    pub fn require_extension(&mut self, name: &str, span: Span) -> bool {
        if self.flags.no_envelope && name == "envelope" {
            self.error(span, "the envelope extension is not available here");
            return false;
        }
        let entry = match self.registry.get_by_name(name) {
            Some(entry) if !name.starts_with('@') => entry,
            _ => {
                self.error(span, format!("unknown extension '{name}'"));
                return false;
            }
        };
        let (id, ext) = (entry.id, entry.ext);
        if self.required.iter().any(|(required, _)| *required == id) {
            return true;
        }
        self.required.push((id, ext));
        if !ext.validator_load(self, id) {
            self.error(span, format!("failed to activate extension '{name}'"));
            return false;
        }
        true
    }

    fn validate_block(&mut self, nodes: &mut [Node]) {
        let mut prev: Option<String> = None;
        for node in nodes.iter_mut() {
            self.prev_command = prev;
            self.validate_node(node, NodeKind::Command);
            prev = Some(node.identifier.clone());
        }
        self.prev_command = None;
    }

    fn validate_node(&mut self, node: &mut Node, expected: NodeKind) -> bool {
        let word = match expected {
            NodeKind::Command => "command",
            NodeKind::Test => "test",
        };
        let Some(registration) = self.commands.get(node.identifier.as_str()) else {
            self.error(node.span, format!("unknown {word} '{}'", node.identifier));
            return false;
        };
        let registration = registration.clone();
        if registration.def.kind() != expected {
            self.error(
                node.span,
                format!("'{}' is not a {word}", node.identifier),
            );
            return false;
        }
        node.command = Some(registration.def);
        node.ext_id = registration.owner;

        let mut ok = registration.def.pre_validate(self, node);
        ok &= self.validate_tags(&registration, node);
        ok &= self.check_shape(&registration, node);
        if ok {
            ok = registration.def.validate(self, node);
        }

        // Recurse regardless so nested problems surface in the same pass.
        for test in &mut node.tests {
            ok &= self.validate_node(test, NodeKind::Test);
        }
        if node.has_block {
            self.validate_block(&mut node.block);
        }
        ok
    }

    fn validate_tags(&mut self, registration: &CommandRegistration, node: &mut Node) -> bool {
        let mut ok = true;
        let mut index = 0;
        while index < node.arguments.len() {
            let name = match &node.arguments[index].value {
                ArgValue::Tag(name) => name.clone(),
                _ => {
                    index += 1;
                    continue;
                }
            };
            let span = node.arguments[index].span;
            match registration.resolve_tag(&name) {
                None => {
                    self.error(
                        span,
                        format!(
                            "unknown tagged argument ':{name}' for the '{}' {}",
                            node.identifier,
                            match node.kind {
                                NodeKind::Command => "command",
                                NodeKind::Test => "test",
                            }
                        ),
                    );
                    ok = false;
                    index += 1;
                }
                Some(tag) => {
                    let arguments_before = node.arguments.len();
                    if !tag.validate(self, node, index) {
                        ok = false;
                    }
                    if node.arguments.len() == arguments_before {
                        index += 1;
                    }
                }
            }
        }
        ok
    }

    /// Argument-count, sub-test-count and block checks, after the tag pass.
    fn check_shape(&mut self, registration: &CommandRegistration, node: &mut Node) -> bool {
        let mut ok = true;
        let count = node.positional_count();
        let (min, max) = registration.def.positional_args();
        if count < min || max.is_some_and(|max| count > max) {
            self.error(
                node.span,
                format!(
                    "the '{}' {} takes {} positional argument(s), but {count} were found",
                    node.identifier,
                    word_for(node.kind),
                    arity_text(min, max),
                ),
            );
            ok = false;
        }

        let test_count = node.tests.len();
        let (tmin, tmax) = registration.def.subtests();
        if test_count < tmin || tmax.is_some_and(|max| test_count > max) {
            self.error(
                node.span,
                format!(
                    "the '{}' {} takes {} test(s), but {test_count} were found",
                    node.identifier,
                    word_for(node.kind),
                    arity_text(tmin, tmax),
                ),
            );
            ok = false;
        }

        match registration.def.block() {
            BlockPolicy::Required if !node.has_block => {
                self.error(
                    node.span,
                    format!("the '{}' command requires a block", node.identifier),
                );
                ok = false;
            }
            BlockPolicy::Forbidden if node.has_block => {
                self.error(
                    node.span,
                    format!(
                        "the '{}' {} does not take a block",
                        node.identifier,
                        word_for(node.kind)
                    ),
                );
                ok = false;
            }
            _ => {}
        }
        ok
    }

    /// Enforce the kind of one positional argument. A single string is
    /// lifted in place where a string list is expected.
    pub fn validate_positional(
        &mut self,
        node: &mut Node,
        index: usize,
        name: &str,
        expected: ArgKind,
    ) -> bool {
        let identifier = node.identifier.clone();
        let kind_word = word_for(node.kind);
        let node_span = node.span;
        let Some(argument) = node.positional_mut(index) else {
            self.error(
                node_span,
                format!("the '{identifier}' {kind_word} is missing its {name} argument"),
            );
            return false;
        };
        let found = match (&argument.value, expected) {
            (ArgValue::Number(_), ArgKind::Number)
            | (ArgValue::String(_), ArgKind::String)
            | (ArgValue::StringList(_), ArgKind::StringList) => return true,
            (ArgValue::String(value), ArgKind::StringList) => {
                // A string list of length one is interchangeable with a
                // string; lift so later stages see one shape.
                argument.value = ArgValue::StringList(vec![value.clone()]);
                return true;
            }
            (ArgValue::Number(_), _) => "a number",
            (ArgValue::String(_), _) => "a string",
            (ArgValue::StringList(_), _) => "a string list",
            (ArgValue::Tag(_), _) => "a tag",
        };
        let span = argument.span;
        self.error(
            span,
            format!(
                "the {name} argument of the '{identifier}' {kind_word} must be {}, \
                 but {found} was found",
                article_for(expected),
            ),
        );
        false
    }
}

fn word_for(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Command => "command",
        NodeKind::Test => "test",
    }
}

fn arity_text(min: usize, max: Option<usize>) -> String {
    match max {
        Some(max) if min == max => format!("{min}"),
        Some(max) => format!("{min} to {max}"),
        None => format!("at least {min}"),
    }
}

fn article_for(kind: ArgKind) -> String {
    format!("a {}", kind.describe())
}
