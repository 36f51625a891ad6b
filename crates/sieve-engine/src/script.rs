//! Script sources.
//!
//! A [`Script`] is immutable source text with a stable name. One script
//! yields exactly one AST per compilation; the name is what diagnostics and
//! logs refer to.

use crate::error::SieveError;
use crate::foundation::limits::MAX_SCRIPT_SIZE;
use std::path::{Path, PathBuf};

/// Immutable Sieve source text plus its name and optional filesystem origin.
#[derive(Debug, Clone)]
pub struct Script {
    name: String,
    path: Option<PathBuf>,
    source: String,
}

impl Script {
    /// Wrap in-memory source text under the given script name.
    pub fn from_source(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            source: source.into(),
        }
    }

    /// Read a script from disk. The script name is the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SieveError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| SieveError::from_io(&e))?;
        if meta.len() > MAX_SCRIPT_SIZE {
            tracing::warn!(path = %path.display(), size = meta.len(), "script too large");
            return Err(SieveError::NotPossible);
        }
        let source = std::fs::read_to_string(path).map_err(|e| SieveError::from_io(&e))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Human-readable origin for log messages.
    pub fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => format!("<{}>", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_source_has_no_path() {
        let script = Script::from_source("greeting", "keep;");
        assert_eq!(script.name(), "greeting");
        assert_eq!(script.source(), "keep;");
        assert!(script.path().is_none());
        assert_eq!(script.location(), "<greeting>");
    }

    #[test]
    fn from_file_missing_is_not_found() {
        let err = Script::from_file("/nonexistent/definitely-missing.sieve");
        assert_eq!(err.unwrap_err(), SieveError::NotFound);
    }
}
