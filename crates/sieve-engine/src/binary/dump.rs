//! Human-readable binary disassembly and hexdump.

use super::{SieveBinary, CUSTOM_START};
use crate::error::RuntimeError;
use crate::interp::core_opcode;
use crate::operand;
use crate::registry::ExtensionRegistry;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Corrupt(String),
}

impl From<RuntimeError> for DumpError {
    fn from(err: RuntimeError) -> Self {
        DumpError::Corrupt(err.to_string())
    }
}

/// Sink handed to opcode `dump` hooks; pairs the binary with the output
/// stream and knows how to render each operand class.
pub struct Dumper<'a> {
    binary: &'a SieveBinary,
    out: &'a mut dyn Write,
}

impl<'a> Dumper<'a> {
    pub fn new(binary: &'a SieveBinary, out: &'a mut dyn Write) -> Self {
        Self { binary, out }
    }

    pub fn binary(&self) -> &SieveBinary {
        self.binary
    }

    pub fn line(&mut self, text: &str) -> Result<(), DumpError> {
        writeln!(self.out, "{text}")?;
        Ok(())
    }

    fn opcode_line(&mut self, address: usize, mnemonic: &str) -> Result<(), DumpError> {
        writeln!(self.out, "{address:08x}: {mnemonic}")?;
        Ok(())
    }

    pub fn dump_number(&mut self, address: &mut usize) -> Result<(), DumpError> {
        let value = operand::read_number(self.binary, address)?;
        writeln!(self.out, "          number: {value}")?;
        Ok(())
    }

    pub fn dump_string(&mut self, address: &mut usize) -> Result<(), DumpError> {
        let value = operand::read_string(self.binary, address)?;
        writeln!(self.out, "          string: \"{value}\"")?;
        Ok(())
    }

    pub fn dump_string_list(&mut self, address: &mut usize) -> Result<(), DumpError> {
        let values = operand::read_string_list(self.binary, address)?;
        writeln!(self.out, "          strings: {values:?}")?;
        Ok(())
    }

    pub fn dump_match_spec(&mut self, address: &mut usize) -> Result<(), DumpError> {
        let spec = operand::read_match_spec(self.binary, address)?;
        writeln!(
            self.out,
            "          match: :{} :{} {}",
            spec.address_part.name(),
            spec.match_type.name(),
            spec.comparator.name()
        )?;
        Ok(())
    }

    /// Render a relative jump offset and its resolved target address.
    pub fn dump_jump(&mut self, address: &mut usize) -> Result<(), DumpError> {
        let offset = operand::read_i32(self.binary.code(), address)?;
        let target = *address as i64 + offset as i64;
        writeln!(self.out, "          offset: {offset:+} -> {target:08x}")?;
        Ok(())
    }
}

/// Disassemble a binary: header, dependencies, code and string table.
pub fn dump(
    binary: &SieveBinary,
    registry: &ExtensionRegistry,
    out: &mut dyn Write,
) -> Result<(), DumpError> {
    writeln!(out, "Sieve binary '{}'", binary.script_name())?;
    writeln!(
        out,
        "format {} / compiler {:#06x} / flags {:#010x}",
        binary.format_version(),
        binary.compiler_version(),
        binary.flags()
    )?;
    writeln!(out)?;

    writeln!(out, "Extensions:")?;
    if binary.deps().is_empty() {
        writeln!(out, "  (none)")?;
    }
    for (index, dep) in binary.deps().iter().enumerate() {
        writeln!(out, "  {index}: {} (version {})", dep.name, dep.version)?;
    }
    writeln!(out)?;

    let ext_table: Vec<_> = binary
        .deps()
        .iter()
        .map(|dep| registry.find(&dep.name).map(|entry| entry.ext))
        .collect();

    writeln!(out, "Code:")?;
    let code = binary.code();
    let mut dumper = Dumper::new(binary, out);
    let mut address = 0usize;
    while address < code.len() {
        let op_address = address;
        let op = code[address];
        address += 1;
        if op < CUSTOM_START {
            let def = core_opcode(op).ok_or_else(|| {
                DumpError::Corrupt(format!("unknown core opcode {op:#04x} at {op_address:#x}"))
            })?;
            dumper.opcode_line(op_address, def.mnemonic())?;
            def.dump(&mut dumper, &mut address)?;
        } else {
            let ext_index = (op - CUSTOM_START) as usize;
            let subcode = operand::read_u8(code, &mut address)?;
            let ext = ext_table.get(ext_index).copied().flatten().ok_or_else(|| {
                DumpError::Corrupt(format!(
                    "opcode {op:#04x} names extension slot {ext_index} with no extension"
                ))
            })?;
            let def = ext.opcodes().get(subcode as usize).ok_or_else(|| {
                DumpError::Corrupt(format!(
                    "extension '{}' has no opcode {subcode}",
                    ext.name()
                ))
            })?;
            dumper.opcode_line(op_address, def.mnemonic())?;
            def.dump(&mut dumper, &mut address)?;
        }
    }
    writeln!(dumper.out)?;

    writeln!(dumper.out, "Strings:")?;
    let strings = binary.strings();
    let mut offset = 0usize;
    while offset < strings.len() {
        let entry_offset = offset;
        let value = binary.string_at(entry_offset as u32)?;
        writeln!(dumper.out, "  {entry_offset:06x}: \"{value}\"")?;
        offset += varint_len(value.len() as u64) + value.len();
    }
    Ok(())
}

fn varint_len(value: u64) -> usize {
    let mut len = 1;
    let mut value = value >> 7;
    while value != 0 {
        len += 1;
        value >>= 7;
    }
    len
}

/// Raw hexdump of every block.
pub fn hexdump(binary: &SieveBinary, out: &mut dyn Write) -> std::io::Result<()> {
    for (index, block) in binary.blocks().iter().enumerate() {
        writeln!(
            out,
            "block {index} (kind {}, {} bytes):",
            block.kind,
            block.data.len()
        )?;
        for (row, chunk) in block.data.chunks(16).enumerate() {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if (0x20..0x7f).contains(&b) {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            writeln!(out, "  {:06x}  {:<47}  |{}|", row * 16, hex.join(" "), ascii)?;
        }
    }
    Ok(())
}
