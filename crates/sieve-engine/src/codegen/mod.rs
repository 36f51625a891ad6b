//! Code generation: validated AST → binary container.
//!
//! A single linear pass over the AST. Commands emit an opcode byte plus
//! inline operands; strings go through a deduplicating table; forward
//! jumps are recorded in [`JumpList`]s and backpatched once their target
//! address is known. Extension opcodes encode as
//! `CUSTOM_START + ext_index` followed by the extension's sub-code byte,
//! where `ext_index` is the extension's position in the binary's
//! dependency table.

use crate::ast::{Ast, Node};
use crate::binary::{
    opcode, ExtensionDep, SieveBinary, CUSTOM_START, FLAG_DEBUG_INFO,
};
use crate::engine::CompileFlags;
use crate::error::{ErrorHandler, Location, SieveError};
use crate::extension::{Extension, ExtensionId};
use crate::foundation::Span;
use crate::matching::{MatchSpec, MatchType};
use crate::operand::{class, opt_tag, write_varint};
use std::collections::HashMap;

/// Unresolved forward-jump sites that share one target.
#[derive(Debug, Default)]
pub struct JumpList {
    sites: Vec<usize>,
}

impl JumpList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

pub struct Generator<'a> {
    ehandler: &'a mut ErrorHandler,
    script_name: String,
    flags: CompileFlags,
    code: Vec<u8>,
    strings: Vec<u8>,
    string_offsets: HashMap<String, u32>,
    /// Extensions linked into this binary, in dependency-table order.
    linked: Vec<(ExtensionId, &'static dyn Extension)>,
}

impl<'a> Generator<'a> {
    pub(crate) fn new(
        script_name: &str,
        ehandler: &'a mut ErrorHandler,
        flags: CompileFlags,
    ) -> Self {
        Self {
            ehandler,
            script_name: script_name.to_string(),
            flags,
            code: Vec::new(),
            strings: Vec::new(),
            string_offsets: HashMap::new(),
            linked: Vec::new(),
        }
    }

    pub fn flags(&self) -> CompileFlags {
        self.flags
    }

    /// Generate the whole program.
    pub(crate) fn run(
        mut self,
        ast: &Ast,
        required: &[(ExtensionId, &'static dyn Extension)],
    ) -> Result<SieveBinary, SieveError> {
        let errors_before = self.ehandler.error_count();
        for &(id, ext) in required {
            self.link_extension(id, ext);
            if !ext.generator_load(&mut self, id) {
                self.error(
                    Span::zero(),
                    format!("extension '{}' failed to initialize code generation", ext.name()),
                );
            }
        }
        self.generate_block(&ast.commands)?;
        if self.ehandler.error_count() > errors_before {
            return Err(SieveError::NotValid);
        }

        let deps = self
            .linked
            .iter()
            .map(|(_, ext)| ExtensionDep {
                name: ext.name().to_string(),
                version: ext.version(),
            })
            .collect();
        let mut flags = 0u32;
        if self.flags.debug {
            flags |= FLAG_DEBUG_INFO;
        }
        tracing::debug!(
            script = %self.script_name,
            code_len = self.code.len(),
            strings_len = self.strings.len(),
            extensions = self.linked.len(),
            "code generation finished"
        );
        Ok(SieveBinary::assemble(
            self.script_name,
            flags,
            self.code,
            self.strings,
            deps,
        ))
    }

    /// Add an extension to the dependency table; idempotent.
    pub fn link_extension(&mut self, id: ExtensionId, ext: &'static dyn Extension) -> usize {
        if let Some(index) = self.linked.iter().position(|(linked, _)| *linked == id) {
            return index;
        }
        self.linked.push((id, ext));
        self.linked.len() - 1
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>) {
        self.ehandler.error(
            Some(Location::new(self.script_name.clone(), span)),
            message,
        );
    }

    // === emission ========================================================

    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn emit_opcode(&mut self, code: u8) {
        self.code.push(code);
    }

    /// Emit an extension opcode: `CUSTOM_START + ext_index`, then the
    /// sub-code byte.
    pub fn emit_extension_opcode(
        &mut self,
        id: ExtensionId,
        subcode: u8,
    ) -> Result<(), SieveError> {
        let Some(index) = self.linked.iter().position(|(linked, _)| *linked == id) else {
            // The validator links every required extension before
            // generation; an unlinked id is an engine bug.
            return Err(SieveError::Internal);
        };
        let Some(op) = CUSTOM_START.checked_add(index as u8) else {
            return Err(SieveError::Internal);
        };
        self.code.push(op);
        self.code.push(subcode);
        Ok(())
    }

    pub fn emit_number(&mut self, value: u64) {
        self.code.push(class::NUMBER);
        write_varint(&mut self.code, value);
    }

    fn string_ref(&mut self, value: &str) -> u32 {
        if let Some(&offset) = self.string_offsets.get(value) {
            return offset;
        }
        let offset = self.strings.len() as u32;
        write_varint(&mut self.strings, value.len() as u64);
        self.strings.extend_from_slice(value.as_bytes());
        self.string_offsets.insert(value.to_string(), offset);
        offset
    }

    pub fn emit_string(&mut self, value: &str) {
        let offset = self.string_ref(value);
        self.code.push(class::STRING);
        write_varint(&mut self.code, offset as u64);
    }

    pub fn emit_string_list(&mut self, items: &[String]) {
        let offsets: Vec<u32> = items.iter().map(|item| self.string_ref(item)).collect();
        self.code.push(class::STRING_LIST);
        write_varint(&mut self.code, offsets.len() as u64);
        for offset in offsets {
            write_varint(&mut self.code, offset as u64);
        }
    }

    /// Emit the optional match-specification region; omitted entirely when
    /// every component is at its default.
    pub fn emit_match_spec(&mut self, spec: &MatchSpec) {
        let defaults = MatchSpec::default();
        if *spec == defaults {
            return;
        }
        self.code.push(class::OPTIONAL);
        if spec.comparator != defaults.comparator {
            let offset = self.string_ref(spec.comparator.name());
            self.code.push(opt_tag::COMPARATOR);
            write_varint(&mut self.code, offset as u64);
        }
        if spec.match_type != MatchType::Is {
            self.code.push(opt_tag::MATCH_TYPE);
            self.code.push(spec.match_type.code());
        }
        if spec.address_part != defaults.address_part {
            self.code.push(opt_tag::ADDRESS_PART);
            self.code.push(spec.address_part.code());
        }
        self.code.push(opt_tag::END);
    }

    /// Emit a conditional branch on the test-result register toward a
    /// not-yet-resolved target.
    pub fn emit_branch(&mut self, jump_if: bool, exit: &mut JumpList) {
        self.emit_opcode(if jump_if {
            opcode::JMP_IF_TRUE
        } else {
            opcode::JMP_IF_FALSE
        });
        self.push_jump_site(exit);
    }

    /// Emit an unconditional jump toward a not-yet-resolved target.
    pub fn emit_jump(&mut self, exit: &mut JumpList) {
        self.emit_opcode(opcode::JMP);
        self.push_jump_site(exit);
    }

    fn push_jump_site(&mut self, exit: &mut JumpList) {
        exit.sites.push(self.code.len());
        self.code.extend_from_slice(&[0; 4]);
    }

    /// Backpatch every site in the list to jump to the current address.
    /// Offsets are relative to the end of the 4-byte offset field.
    pub fn resolve(&mut self, exit: JumpList) {
        let target = self.code.len() as i64;
        for site in exit.sites {
            let offset = (target - (site as i64 + 4)) as i32;
            self.code[site..site + 4].copy_from_slice(&offset.to_le_bytes());
        }
    }

    // === tree walk =======================================================

    /// Generate a block of commands. Descriptors may consume several
    /// siblings at once (`if`/`elsif`/`else` chains).
    pub fn generate_block(&mut self, nodes: &[Node]) -> Result<(), SieveError> {
        let mut index = 0;
        while index < nodes.len() {
            let def = nodes[index].command.ok_or(SieveError::Internal)?;
            let next = def.generate(self, nodes, index)?;
            debug_assert!(next > index, "command generation must make progress");
            index = next;
        }
        Ok(())
    }

    /// Generate a test: code that jumps to `exit` iff the test evaluates to
    /// `jump_if`, falling through otherwise.
    pub fn generate_test(
        &mut self,
        node: &Node,
        exit: &mut JumpList,
        jump_if: bool,
    ) -> Result<(), SieveError> {
        let def = node.command.ok_or(SieveError::Internal)?;
        def.generate_test(self, node, exit, jump_if)
    }
}
