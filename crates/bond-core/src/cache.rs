//! Resource cache
//!
//! Maps entity names to their link relations. Populated at startup (see
//! `bond-http`'s preload) and kept current by the translator as VMs are
//! deployed and undeployed. The write-back worker reads `metadata` links
//! from it and polling plugins receive its entity names.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::event::VirtualMachine;

/// Link relation of a VM's metadata document
pub const METADATA_REL: &str = "metadata";

/// Thread-safe entity name → link relation → href map
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl ResourceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a VM with all its links
    pub fn insert_vm(&self, vm: &VirtualMachine) {
        let links: HashMap<String, String> = vm
            .links
            .iter()
            .map(|(rel, href)| (rel.clone(), href.clone()))
            .collect();
        self.insert(&vm.name, links);
    }

    /// Insert or replace an entity entry
    pub fn insert(&self, name: &str, links: HashMap<String, String>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(name.to_string(), links);
    }

    /// Refresh one relation of a VM from its current links
    ///
    /// A VM that is not cached yet is inserted. Returns whether the VM
    /// actually carried the relation.
    pub fn refresh_link(&self, vm: &VirtualMachine, rel: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(vm.name.clone()).or_default();
        match vm.link(rel) {
            Some(href) => {
                entry.insert(rel.to_string(), href.to_string());
                true
            }
            None => {
                entry.remove(rel);
                false
            }
        }
    }

    /// Drop an entity
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(name).is_some()
    }

    /// Href of `rel` for entity `name`
    pub fn link(&self, name: &str, rel: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).and_then(|links| links.get(rel)).cloned()
    }

    /// Whether `name` is cached
    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(name)
    }

    /// Names of all cached entities, sorted
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of cached entities
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(name: &str) -> VirtualMachine {
        VirtualMachine::new(name, "ON")
            .with_link("edit", format!("http://m/api/vms/{}", name))
            .with_link(METADATA_REL, format!("http://m/api/vms/{}/metadata", name))
    }

    #[test]
    fn test_insert_and_lookup() {
        let cache = ResourceCache::new();
        cache.insert_vm(&vm("alpha"));

        assert_eq!(
            cache.link("alpha", METADATA_REL).as_deref(),
            Some("http://m/api/vms/alpha/metadata")
        );
        assert_eq!(cache.link("alpha", "nope"), None);
        assert_eq!(cache.link("beta", METADATA_REL), None);
        assert_eq!(cache.names(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_refresh_link_replaces_single_relation() {
        let cache = ResourceCache::new();
        cache.insert_vm(&vm("alpha"));

        let moved = VirtualMachine::new("alpha", "ON")
            .with_link(METADATA_REL, "http://m/api/moved/metadata");
        assert!(cache.refresh_link(&moved, METADATA_REL));

        assert_eq!(
            cache.link("alpha", METADATA_REL).as_deref(),
            Some("http://m/api/moved/metadata")
        );
        assert_eq!(
            cache.link("alpha", "edit").as_deref(),
            Some("http://m/api/vms/alpha")
        );
    }

    #[test]
    fn test_remove() {
        let cache = ResourceCache::new();
        cache.insert_vm(&vm("alpha"));
        cache.insert_vm(&vm("beta"));

        assert!(cache.remove("alpha"));
        assert!(!cache.remove("alpha"));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("beta"));
    }
}
