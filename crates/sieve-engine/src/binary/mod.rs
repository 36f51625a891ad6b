//! The compiled-script binary container.
//!
//! A binary is a block-structured, versioned artifact. Block 0 holds the
//! bytecode, block 1 the deduplicated string table, block 2 the extension
//! dependency list; further blocks are per-extension scratch addressed
//! through the dependency table. The container is independently
//! persistable ([`io`]) and disassemblable ([`dump`]).

pub mod dump;
mod io;

use crate::error::{RuntimeError, SieveError};
use crate::extension::{Extension, ExtensionId};
use crate::operand;
use crate::registry::ExtensionRegistry;
use std::path::PathBuf;

pub const BINARY_MAGIC: [u8; 8] = *b"PHSIEVE\0";
pub const FORMAT_VERSION: u16 = 1;
/// Compiler version recorded in binaries: crate major in the high byte,
/// minor in the low byte.
pub const COMPILER_VERSION: u16 = 0x0005;

/// Extension opcodes start here; lower codes are core opcodes.
pub const CUSTOM_START: u8 = 0x20;

/// Core opcode bytes. Codes are part of the persisted format and never
/// reordered.
pub mod opcode {
    pub const JMP: u8 = 0x00;
    pub const JMP_IF_TRUE: u8 = 0x01;
    pub const JMP_IF_FALSE: u8 = 0x02;
    pub const STOP: u8 = 0x03;
    pub const KEEP: u8 = 0x04;
    pub const DISCARD: u8 = 0x05;
    pub const REDIRECT: u8 = 0x06;
    pub const HEADER: u8 = 0x07;
    pub const ADDRESS: u8 = 0x08;
    pub const EXISTS: u8 = 0x09;
    pub const SIZE_OVER: u8 = 0x0a;
    pub const SIZE_UNDER: u8 = 0x0b;
}

/// Block kinds in the on-disk table.
pub mod block_kind {
    pub const CODE: u16 = 1;
    pub const STRINGS: u16 = 2;
    pub const EXT_DEPS: u16 = 3;
    pub const EXT_DATA: u16 = 4;
}

/// Header flag bits.
pub const FLAG_DEBUG_INFO: u32 = 1 << 0;
pub const FLAG_SOURCE_INFO: u32 = 1 << 1;

/// One container block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: u16,
    pub data: Vec<u8>,
}

/// An entry of the extension dependency list (block 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDep {
    pub name: String,
    pub version: u16,
}

/// Recorded provenance of the compiled source, for up-to-date checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMeta {
    pub path: PathBuf,
    /// Source modification time, seconds since the Unix epoch.
    pub mtime: u64,
    pub size: u64,
}

/// A compiled Sieve script.
#[derive(Debug)]
pub struct SieveBinary {
    pub(crate) format_version: u16,
    pub(crate) compiler_version: u16,
    pub(crate) flags: u32,
    pub(crate) blocks: Vec<Block>,
    pub(crate) deps: Vec<ExtensionDep>,
    pub(crate) script_name: String,
    pub(crate) source: Option<SourceMeta>,
    pub(crate) path: Option<PathBuf>,
}

impl SieveBinary {
    /// Assemble a fresh binary from generator output.
    pub(crate) fn assemble(
        script_name: String,
        flags: u32,
        code: Vec<u8>,
        strings: Vec<u8>,
        deps: Vec<ExtensionDep>,
    ) -> Self {
        let dep_block = encode_deps(&deps);
        Self {
            format_version: FORMAT_VERSION,
            compiler_version: COMPILER_VERSION,
            flags,
            blocks: vec![
                Block {
                    kind: block_kind::CODE,
                    data: code,
                },
                Block {
                    kind: block_kind::STRINGS,
                    data: strings,
                },
                Block {
                    kind: block_kind::EXT_DEPS,
                    data: dep_block,
                },
            ],
            deps,
            script_name,
            source: None,
            path: None,
        }
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn format_version(&self) -> u16 {
        self.format_version
    }

    pub fn compiler_version(&self) -> u16 {
        self.compiler_version
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    pub fn source(&self) -> Option<&SourceMeta> {
        self.source.as_ref()
    }

    pub(crate) fn set_source(&mut self, meta: SourceMeta) {
        self.flags |= FLAG_SOURCE_INFO;
        self.source = Some(meta);
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn block_by_kind(&self, kind: u16) -> &[u8] {
        self.blocks
            .iter()
            .find(|b| b.kind == kind)
            .map(|b| b.data.as_slice())
            .unwrap_or(&[])
    }

    /// The main bytecode stream.
    pub fn code(&self) -> &[u8] {
        self.block_by_kind(block_kind::CODE)
    }

    pub fn strings(&self) -> &[u8] {
        self.block_by_kind(block_kind::STRINGS)
    }

    pub fn deps(&self) -> &[ExtensionDep] {
        &self.deps
    }

    /// Resolve a string-table offset to its value.
    pub fn string_at(&self, offset: u32) -> Result<&str, RuntimeError> {
        let strings = self.strings();
        let mut address = offset as usize;
        if address > strings.len() {
            return Err(RuntimeError::Corrupt(format!(
                "string offset {offset} beyond table"
            )));
        }
        let len = operand::read_varint(strings, &mut address)? as usize;
        let end = address
            .checked_add(len)
            .filter(|&end| end <= strings.len())
            .ok_or_else(|| RuntimeError::Corrupt("truncated string table entry".into()))?;
        std::str::from_utf8(&strings[address..end])
            .map_err(|_| RuntimeError::Corrupt("string table entry is not UTF-8".into()))
    }

    /// Scratch block of the extension at `ext_index` in the dependency
    /// table, if it stored one.
    pub fn extension_block(&self, ext_index: usize) -> Option<&[u8]> {
        self.blocks
            .iter()
            .filter(|b| b.kind == block_kind::EXT_DATA)
            .find_map(|b| {
                let mut address = 0;
                let index = operand::read_varint(&b.data, &mut address).ok()?;
                (index as usize == ext_index).then(|| &b.data[address..])
            })
    }

    /// Attach a per-extension scratch block.
    pub fn add_extension_block(&mut self, ext_index: usize, data: &[u8]) {
        let mut block = Vec::with_capacity(data.len() + 2);
        operand::write_varint(&mut block, ext_index as u64);
        block.extend_from_slice(data);
        self.blocks.push(Block {
            kind: block_kind::EXT_DATA,
            data: block,
        });
    }

    /// Executability check: resolve every dependency against the registry.
    ///
    /// Fails with `NotValid` when a dependency is unknown, disabled, or
    /// newer than the loaded extension, or when an extension rejects the
    /// binary from its `binary_load` hook. On success the returned table
    /// maps dependency indexes to runtime extensions, in table order.
    pub fn link(
        &self,
        registry: &ExtensionRegistry,
    ) -> Result<Vec<(ExtensionId, &'static dyn Extension)>, SieveError> {
        let mut table = Vec::with_capacity(self.deps.len());
        for dep in &self.deps {
            let Some(entry) = registry.get_by_name(&dep.name) else {
                tracing::warn!(
                    script = %self.script_name,
                    extension = %dep.name,
                    "binary depends on an unavailable extension"
                );
                return Err(SieveError::NotValid);
            };
            if dep.version > entry.ext.version() {
                tracing::warn!(
                    extension = %dep.name,
                    binary_version = dep.version,
                    loaded_version = entry.ext.version(),
                    "binary requires a newer extension version"
                );
                return Err(SieveError::NotValid);
            }
            if !entry.ext.binary_load(self, entry.id) {
                return Err(SieveError::NotValid);
            }
            table.push((entry.id, entry.ext));
        }
        Ok(table)
    }
}

fn encode_deps(deps: &[ExtensionDep]) -> Vec<u8> {
    let mut out = Vec::new();
    operand::write_varint(&mut out, deps.len() as u64);
    for dep in deps {
        operand::write_varint(&mut out, dep.name.len() as u64);
        out.extend_from_slice(dep.name.as_bytes());
        out.extend_from_slice(&dep.version.to_le_bytes());
    }
    out
}

pub(crate) fn decode_deps(data: &[u8]) -> Result<Vec<ExtensionDep>, SieveError> {
    let corrupt = |_| SieveError::NotValid;
    let mut address = 0;
    let count = operand::read_varint(data, &mut address).map_err(corrupt)?;
    if count > data.len() as u64 {
        return Err(SieveError::NotValid);
    }
    let mut deps = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = operand::read_varint(data, &mut address).map_err(corrupt)? as usize;
        let end = address
            .checked_add(len)
            .filter(|&end| end <= data.len())
            .ok_or(SieveError::NotValid)?;
        let name = std::str::from_utf8(&data[address..end])
            .map_err(|_| SieveError::NotValid)?
            .to_string();
        address = end;
        let version_end = address + 2;
        let bytes = data.get(address..version_end).ok_or(SieveError::NotValid)?;
        address = version_end;
        deps.push(ExtensionDep {
            name,
            version: u16::from_le_bytes([bytes[0], bytes[1]]),
        });
    }
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_table(entries: &[&str]) -> (Vec<u8>, Vec<u32>) {
        let mut table = Vec::new();
        let mut offsets = Vec::new();
        for entry in entries {
            offsets.push(table.len() as u32);
            operand::write_varint(&mut table, entry.len() as u64);
            table.extend_from_slice(entry.as_bytes());
        }
        (table, offsets)
    }

    #[test]
    fn string_table_lookup() {
        let (table, offsets) = string_table(&["Junk", "Subject"]);
        let binary = SieveBinary::assemble("t".into(), 0, vec![], table, vec![]);
        assert_eq!(binary.string_at(offsets[0]).unwrap(), "Junk");
        assert_eq!(binary.string_at(offsets[1]).unwrap(), "Subject");
        assert!(binary.string_at(999).is_err());
    }

    #[test]
    fn deps_roundtrip() {
        let deps = vec![
            ExtensionDep {
                name: "fileinto".into(),
                version: 1,
            },
            ExtensionDep {
                name: "envelope".into(),
                version: 2,
            },
        ];
        let encoded = encode_deps(&deps);
        assert_eq!(decode_deps(&encoded).unwrap(), deps);
    }

    #[test]
    fn deps_truncated_is_invalid() {
        let deps = vec![ExtensionDep {
            name: "fileinto".into(),
            version: 1,
        }];
        let encoded = encode_deps(&deps);
        assert_eq!(
            decode_deps(&encoded[..encoded.len() - 1]).unwrap_err(),
            SieveError::NotValid
        );
    }

    #[test]
    fn extension_blocks_are_addressed_by_index() {
        let mut binary = SieveBinary::assemble("t".into(), 0, vec![], vec![], vec![]);
        binary.add_extension_block(1, b"payload");
        assert_eq!(binary.extension_block(1), Some(&b"payload"[..]));
        assert_eq!(binary.extension_block(0), None);
    }
}
