//! # Backend Registry
//!
//! The set of currently known backends, keyed by id. Exactly one snapshot is
//! current at any instant. The discovery loop builds a complete replacement
//! every cycle and publishes it with a single pointer swap, so readers (the
//! listing and proxy endpoints, the differ of the next cycle) always observe
//! either the old snapshot or the new one in full.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::descriptor::BackendDescriptor;

/// Lookup of a service id that the current snapshot does not contain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service '{0}'")]
pub struct UnknownServiceError(pub String);

/// # Registry Snapshot
///
/// An immutable `id → descriptor` map. Ordered by id so listings and event
/// fan-out are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    backends: BTreeMap<String, BackendDescriptor>,
}

impl RegistrySnapshot {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up one backend by id.
    pub fn get(&self, id: &str) -> Option<&BackendDescriptor> {
        self.backends.get(id)
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    /// Ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Descriptors in id order.
    pub fn descriptors(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.backends.values()
    }

    /// Number of backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// `true` when no backend is known.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl FromIterator<BackendDescriptor> for RegistrySnapshot {
    /// Later descriptors win when two share an id.
    fn from_iter<I: IntoIterator<Item = BackendDescriptor>>(iter: I) -> Self {
        let backends = iter.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self { backends }
    }
}

/// # Registry
///
/// Shared handle to the current snapshot. Clones share the same underlying
/// pointer; only the discovery loop calls [`Registry::replace`].
#[derive(Debug, Clone)]
pub struct Registry {
    current: Arc<ArcSwap<RegistrySnapshot>>,
}

impl Registry {
    /// A registry whose current snapshot is empty.
    pub fn new() -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(RegistrySnapshot::new())),
        }
    }

    /// The current snapshot. The returned `Arc` stays valid and unchanged
    /// even if a new snapshot is published meanwhile.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Publishes `next` as the current snapshot and returns the one it
    /// replaced.
    pub fn replace(&self, next: RegistrySnapshot) -> Arc<RegistrySnapshot> {
        self.current.swap(Arc::new(next))
    }

    /// Looks up one backend in the current snapshot.
    pub fn lookup(&self, id: &str) -> Result<BackendDescriptor, UnknownServiceError> {
        self.current
            .load()
            .get(id)
            .cloned()
            .ok_or_else(|| UnknownServiceError(id.to_string()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discovery::descriptor::BackendInfo;
    use serde_json::json;
    use url::Url;

    pub(crate) fn descriptor(id: &str, name: &str) -> BackendDescriptor {
        let info = BackendInfo::from_value(json!({ "id": id })).unwrap();
        let base = Url::parse(&format!("http://{}/", name)).unwrap();
        BackendDescriptor::new(name, base, info)
    }

    #[test]
    fn new_registry_is_empty() {
        let registry = Registry::new();
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn replace_swaps_whole_snapshot_and_returns_previous() {
        let registry = Registry::new();
        let first: RegistrySnapshot = vec![descriptor("a1", "a:80")].into_iter().collect();
        let second: RegistrySnapshot = vec![descriptor("b1", "b:80")].into_iter().collect();

        let old = registry.replace(first);
        assert!(old.is_empty());

        let held = registry.snapshot();
        let old = registry.replace(second);

        assert!(old.contains("a1"));
        // A reader holding the earlier snapshot still sees it in full.
        assert!(held.contains("a1"));
        assert!(!held.contains("b1"));
        assert_eq!(registry.snapshot().ids().collect::<Vec<_>>(), vec!["b1"]);
    }

    #[test]
    fn lookup_unknown_service_fails() {
        let registry = Registry::new();
        registry.replace(vec![descriptor("a1", "a:80")].into_iter().collect());

        assert_eq!(registry.lookup("a1").unwrap().name, "a:80");
        assert_eq!(
            registry.lookup("zz").unwrap_err(),
            UnknownServiceError("zz".to_string())
        );
    }

    #[test]
    fn clones_share_the_current_snapshot() {
        let registry = Registry::new();
        let reader = registry.clone();
        registry.replace(vec![descriptor("a1", "a:80")].into_iter().collect());
        assert_eq!(reader.snapshot().len(), 1);
    }

    #[test]
    fn duplicate_ids_keep_the_last_descriptor() {
        let snapshot: RegistrySnapshot = vec![descriptor("a1", "first:80"), descriptor("a1", "second:80")]
            .into_iter()
            .collect();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("a1").unwrap().name, "second:80");
    }
}
