//! The extension registry.
//!
//! One registry per engine instance. Extensions register during instance
//! configuration; the first compile or execute freezes the registry and
//! later `register` calls fail with `NotPossible`. `set_string` stays
//! allowed (it only flips enable bits) so hosts can narrow the extension
//! set between executions.
//!
//! Identifiers are dense, assigned in registration order, and never
//! reassigned. Registering the same name twice rebinds the definition to
//! the existing identifier.

use crate::error::SieveError;
use crate::extension::{Extension, ExtensionId};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Registration state of one extension.
pub struct Registration {
    pub ext: &'static dyn Extension,
    pub id: ExtensionId,
    /// Required extensions survive every `set_string` call.
    pub required: bool,
    /// Whether the `load` hook has run.
    pub loaded: bool,
    /// Disabled extensions stay registered but name lookups fail.
    pub enabled: bool,
}

/// A named capability string exposed by an extension.
///
/// Capabilities disappear together with their owning extension: when the
/// owner is disabled, lookups return `None`.
pub struct CapabilityDef {
    pub name: &'static str,
    pub owner: ExtensionId,
    pub get_string: fn() -> String,
}

#[derive(Default)]
pub struct ExtensionRegistry {
    entries: Vec<Registration>,
    by_name: IndexMap<&'static str, usize>,
    capabilities: IndexMap<&'static str, CapabilityDef>,
    frozen: AtomicBool,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension, optionally loading it immediately.
    ///
    /// Idempotent with respect to identifiers: a name that is already
    /// registered keeps its id.
    pub fn register(
        &mut self,
        ext: &'static dyn Extension,
        load: bool,
    ) -> Result<ExtensionId, SieveError> {
        if self.frozen.load(Ordering::Acquire) {
            tracing::warn!(name = ext.name(), "extension registered after freeze");
            return Err(SieveError::NotPossible);
        }
        let index = match self.by_name.get(ext.name()) {
            Some(&index) => {
                self.entries[index].ext = ext;
                index
            }
            None => {
                let index = self.entries.len();
                self.entries.push(Registration {
                    ext,
                    id: ExtensionId::new(index),
                    required: false,
                    loaded: false,
                    enabled: false,
                });
                self.by_name.insert(ext.name(), index);
                index
            }
        };
        let id = self.entries[index].id;
        if load && !self.entries[index].loaded {
            ext.load(self, id)?;
            let entry = &mut self.entries[index];
            entry.loaded = true;
            entry.enabled = true;
            tracing::debug!(name = ext.name(), %id, "extension loaded");
        }
        Ok(id)
    }

    /// Register, load, and mark required. Required extensions cannot be
    /// disabled by `set_string`.
    pub fn require(&mut self, ext: &'static dyn Extension) -> Result<ExtensionId, SieveError> {
        let id = self.register(ext, true)?;
        self.entries[id.index()].required = true;
        Ok(id)
    }

    pub fn get_by_id(&self, id: ExtensionId) -> Option<&Registration> {
        self.entries.get(id.index())
    }

    /// Look up an enabled, loaded extension by name.
    ///
    /// Disabled extensions are invisible here even though they stay
    /// registered.
    pub fn get_by_name(&self, name: &str) -> Option<&Registration> {
        let &index = self.by_name.get(name)?;
        let entry = &self.entries[index];
        (entry.enabled && entry.loaded).then_some(entry)
    }

    /// Restrict the enabled set to the listed names plus all required
    /// extensions. `None` enables every loaded extension.
    pub fn set_string(&mut self, list: Option<&str>) {
        let listed: Option<Vec<&str>> = list.map(|s| s.split_ascii_whitespace().collect());
        for entry in &mut self.entries {
            entry.enabled = entry.loaded
                && (entry.required
                    || match &listed {
                        None => true,
                        Some(names) => names.contains(&entry.ext.name()),
                    });
        }
        tracing::debug!(extensions = %self.list_string(), "extension set updated");
    }

    /// Space-separated names of enabled extensions, hiding internal
    /// pseudo-extensions (names starting with `'@'`).
    pub fn list_string(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            if !entry.enabled || entry.ext.name().starts_with('@') {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(entry.ext.name());
        }
        out
    }

    pub fn register_capability(&mut self, capability: CapabilityDef) {
        self.capabilities.insert(capability.name, capability);
    }

    /// Capability string by name; `None` when unknown or when the owning
    /// extension is disabled.
    pub fn capability(&self, name: &str) -> Option<String> {
        let cap = self.capabilities.get(name)?;
        let owner = self.get_by_id(cap.owner)?;
        owner.enabled.then(|| (cap.get_string)())
    }

    /// Look up a registration by name regardless of enabled state. Used by
    /// diagnostics and dumps; command resolution goes through
    /// [`get_by_name`](Self::get_by_name).
    pub fn find(&self, name: &str) -> Option<&Registration> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }

    /// One-way switch flipped by the first compile or execute.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TestExt(&'static str);
    impl Extension for TestExt {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    static EXT_A: TestExt = TestExt("alpha");
    static EXT_B: TestExt = TestExt("beta");
    static EXT_AT: TestExt = TestExt("@internal");

    #[test]
    fn ids_are_dense_and_stable() {
        let mut reg = ExtensionRegistry::new();
        let a = reg.register(&EXT_A, true).unwrap();
        let b = reg.register(&EXT_B, true).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        // Re-registration keeps the id.
        assert_eq!(reg.register(&EXT_A, true).unwrap(), a);
    }

    #[test]
    fn set_string_disables_and_keeps_required() {
        let mut reg = ExtensionRegistry::new();
        reg.register(&EXT_A, true).unwrap();
        reg.require(&EXT_B).unwrap();
        reg.set_string(Some(""));
        assert!(reg.get_by_name("alpha").is_none());
        assert!(reg.get_by_name("beta").is_some());
        reg.set_string(None);
        assert!(reg.get_by_name("alpha").is_some());
    }

    #[test]
    fn list_string_hides_pseudo_extensions() {
        let mut reg = ExtensionRegistry::new();
        reg.require(&EXT_AT).unwrap();
        reg.register(&EXT_A, true).unwrap();
        assert_eq!(reg.list_string(), "alpha");
    }

    #[test]
    fn frozen_registry_rejects_registration() {
        let mut reg = ExtensionRegistry::new();
        reg.register(&EXT_A, true).unwrap();
        reg.freeze();
        assert_eq!(reg.register(&EXT_B, true), Err(SieveError::NotPossible));
        // set_string is still allowed after the freeze.
        reg.set_string(Some("alpha"));
        assert!(reg.get_by_name("alpha").is_some());
    }

    #[test]
    fn capability_follows_owner_enablement() {
        fn caps() -> String {
            "x y z".into()
        }
        let mut reg = ExtensionRegistry::new();
        let id = reg.register(&EXT_A, true).unwrap();
        reg.register_capability(CapabilityDef {
            name: "letters",
            owner: id,
            get_string: caps,
        });
        assert_eq!(reg.capability("letters").as_deref(), Some("x y z"));
        reg.set_string(Some(""));
        assert_eq!(reg.capability("letters"), None);
        assert_eq!(reg.capability("unknown"), None);
    }
}
