//! Binary persistence.
//!
//! On-disk layout (all integers little-endian):
//!
//! ```text
//! magic        8 bytes  "PHSIEVE\0"
//! format_ver   u16
//! compiler_ver u16
//! flags        u32
//! block_count  u32
//! block table  block_count × { offset u64, length u64, kind u16 }
//! block data   …
//! source meta  (present iff FLAG_SOURCE_INFO)
//!              varint path_len, path bytes, mtime u64, size u64
//! ```
//!
//! Files are written atomically: serialized to a sibling temporary path and
//! renamed into place, mode `0600`.

use super::{
    block_kind, decode_deps, Block, SieveBinary, SourceMeta, BINARY_MAGIC, COMPILER_VERSION,
    FLAG_SOURCE_INFO, FORMAT_VERSION,
};
use crate::error::SieveError;
use crate::operand;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const HEADER_SIZE: usize = 8 + 2 + 2 + 4 + 4;
const TABLE_ENTRY_SIZE: usize = 8 + 8 + 2;

impl SieveBinary {
    /// Serialize to bytes in the on-disk layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let table_size = self.blocks.len() * TABLE_ENTRY_SIZE;
        let mut out = Vec::with_capacity(
            HEADER_SIZE + table_size + self.blocks.iter().map(|b| b.data.len()).sum::<usize>(),
        );
        out.extend_from_slice(&BINARY_MAGIC);
        out.extend_from_slice(&self.format_version.to_le_bytes());
        out.extend_from_slice(&self.compiler_version.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());

        let mut offset = (HEADER_SIZE + table_size) as u64;
        for block in &self.blocks {
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(block.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&block.kind.to_le_bytes());
            offset += block.data.len() as u64;
        }
        for block in &self.blocks {
            out.extend_from_slice(&block.data);
        }
        if let Some(meta) = &self.source {
            let path = meta.path.to_string_lossy();
            operand::write_varint(&mut out, path.len() as u64);
            out.extend_from_slice(path.as_bytes());
            out.extend_from_slice(&meta.mtime.to_le_bytes());
            out.extend_from_slice(&meta.size.to_le_bytes());
        }
        out
    }

    /// Parse a binary from bytes.
    ///
    /// Returns `NotValid` for anything that is not a well-formed container
    /// of a supported format version.
    pub fn from_bytes(data: &[u8], default_name: &str) -> Result<Self, SieveError> {
        if data.len() < HEADER_SIZE || data[..8] != BINARY_MAGIC {
            return Err(SieveError::NotValid);
        }
        let read_u16 = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);
        let read_u32 =
            |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let format_version = read_u16(8);
        let compiler_version = read_u16(10);
        let flags = read_u32(12);
        let block_count = read_u32(16) as usize;
        if format_version > FORMAT_VERSION {
            tracing::warn!(format_version, "binary has an unsupported format version");
            return Err(SieveError::NotValid);
        }

        let table_end = HEADER_SIZE + block_count * TABLE_ENTRY_SIZE;
        if table_end > data.len() {
            return Err(SieveError::NotValid);
        }
        let mut blocks = Vec::with_capacity(block_count);
        let mut data_end = table_end;
        for i in 0..block_count {
            let entry = HEADER_SIZE + i * TABLE_ENTRY_SIZE;
            let offset = u64::from_le_bytes(
                data[entry..entry + 8]
                    .try_into()
                    .map_err(|_| SieveError::Internal)?,
            ) as usize;
            let length = u64::from_le_bytes(
                data[entry + 8..entry + 16]
                    .try_into()
                    .map_err(|_| SieveError::Internal)?,
            ) as usize;
            let kind = read_u16(entry + 16);
            let end = offset.checked_add(length).ok_or(SieveError::NotValid)?;
            if end > data.len() {
                return Err(SieveError::NotValid);
            }
            data_end = data_end.max(end);
            blocks.push(Block {
                kind,
                data: data[offset..end].to_vec(),
            });
        }

        let deps = match blocks.iter().find(|b| b.kind == block_kind::EXT_DEPS) {
            Some(block) => decode_deps(&block.data)?,
            None => return Err(SieveError::NotValid),
        };

        let source = if flags & FLAG_SOURCE_INFO != 0 {
            let mut address = data_end;
            let corrupt = |_| SieveError::NotValid;
            let path_len = operand::read_varint(data, &mut address).map_err(corrupt)? as usize;
            let end = address
                .checked_add(path_len)
                .filter(|&end| end + 16 <= data.len())
                .ok_or(SieveError::NotValid)?;
            let path = std::str::from_utf8(&data[address..end])
                .map_err(|_| SieveError::NotValid)?;
            let mtime = u64::from_le_bytes(
                data[end..end + 8]
                    .try_into()
                    .map_err(|_| SieveError::Internal)?,
            );
            let size = u64::from_le_bytes(
                data[end + 8..end + 16]
                    .try_into()
                    .map_err(|_| SieveError::Internal)?,
            );
            Some(SourceMeta {
                path: PathBuf::from(path),
                mtime,
                size,
            })
        } else {
            None
        };

        let script_name = source
            .as_ref()
            .and_then(|m| m.path.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| default_name.to_string());

        Ok(Self {
            format_version,
            compiler_version,
            flags,
            blocks,
            deps,
            script_name,
            source,
            path: None,
        })
    }

    /// Persist to `path`, or to the binary's recorded path when `None`.
    ///
    /// With `update` unset an existing file is left untouched. The write is
    /// atomic (temporary sibling + rename).
    pub fn save(&mut self, path: Option<&Path>, update: bool) -> Result<(), SieveError> {
        let target: PathBuf = match path.or(self.path.as_deref()) {
            Some(p) => p.to_path_buf(),
            None => {
                tracing::warn!(script = %self.script_name, "no path to save binary to");
                return Err(SieveError::NotPossible);
            }
        };
        if !update && target.exists() {
            tracing::debug!(path = %target.display(), "binary exists, not updating");
            self.path = Some(target);
            return Ok(());
        }

        let tmp = target.with_extension("svbin.tmp");
        let result = write_file(&tmp, &self.to_bytes())
            .and_then(|_| std::fs::rename(&tmp, &target));
        if let Err(err) = result {
            let _ = std::fs::remove_file(&tmp);
            tracing::warn!(path = %target.display(), %err, "failed to save binary");
            return Err(SieveError::from_io(&err));
        }
        tracing::debug!(path = %target.display(), "binary saved");
        self.path = Some(target);
        Ok(())
    }

    /// Load a persisted binary.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SieveError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| SieveError::from_io(&e))?;
        let default_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "binary".to_string());
        let mut binary = Self::from_bytes(&data, &default_name)?;
        binary.path = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), script = %binary.script_name, "binary loaded");
        Ok(binary)
    }

    /// Whether the binary is still current with respect to its recorded
    /// source and version requirements.
    ///
    /// Stale when: the source was modified after compilation, its size
    /// changed, the format version is older than this engine writes, or
    /// (when `require_same_compiler`) a different compiler produced it.
    pub fn up_to_date(&self, require_same_compiler: bool) -> bool {
        if self.format_version < FORMAT_VERSION {
            return false;
        }
        if require_same_compiler && self.compiler_version != COMPILER_VERSION {
            return false;
        }
        let Some(meta) = &self.source else {
            return true;
        };
        let Ok(fs_meta) = std::fs::metadata(&meta.path) else {
            // Source no longer readable; the binary is all we have.
            return true;
        };
        if fs_meta.len() != meta.size {
            return false;
        }
        let mtime = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        mtime <= meta.mtime
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
