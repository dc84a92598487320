//! Backend registry: merges the two probe reports into one snapshot.
//!
//! The registry keeps the *latest* list reported by each probe and rebuilds
//! the snapshot from both every time either one reports.  Because only the
//! latest report of each probe is used, the result does not depend on which
//! probe happened to report first.
//!
//! # Ordering
//!
//! ```text
//! snapshot = [usb_0, usb_1, …, usb_n, net_0, …, net_m]
//! ```
//!
//! USB backends come first, network backends second, each in the order the
//! probe reported them.  There is no further sorting.
//!
//! # Change detection
//!
//! Probes poll.  Most poll rounds report exactly what the previous round did,
//! and re-emitting an identical list would re-run reconciliation for nothing.
//! [`BackendRegistry`] therefore reports a new snapshot only when the
//! *membership* (the set of `(kind, id)` pairs) changes.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use super::backend::{Backend, BackendKind};

/// An ordered, immutable list of the backends that exist right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RegistrySnapshot {
    backends: Vec<Backend>,
}

impl RegistrySnapshot {
    /// All backends in registry order.
    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Backend> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// The first backend, which is the reconciliation fallback.
    pub fn first(&self) -> Option<&Backend> {
        self.backends.first()
    }

    /// Finds the first backend whose id equals `id`.
    pub fn find(&self, id: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Returns `true` if a backend with `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Finds the backend of `kind` whose id equals `id`.
    pub fn find_endpoint(&self, kind: BackendKind, id: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.kind == kind && b.id == id)
    }

    /// Returns `true` if the endpoint `backend` denotes is present.
    pub fn contains_endpoint(&self, backend: &Backend) -> bool {
        self.backends.iter().any(|b| b.same_endpoint(backend))
    }

    /// The set of `(kind, id)` pairs in this snapshot.
    pub fn membership(&self) -> BTreeSet<(BackendKind, &str)> {
        self.backends
            .iter()
            .map(|b| (b.kind, b.id.as_str()))
            .collect()
    }

    /// Returns `true` when both snapshots contain the same endpoints.
    pub fn same_membership(&self, other: &RegistrySnapshot) -> bool {
        self.membership() == other.membership()
    }
}

impl<'a> IntoIterator for &'a RegistrySnapshot {
    type Item = &'a Backend;
    type IntoIter = std::slice::Iter<'a, Backend>;

    fn into_iter(self) -> Self::IntoIter {
        self.backends.iter()
    }
}

/// Merges a USB report and a network report into a snapshot.
///
/// Pure function.  USB entries come first, network entries second.  A USB and
/// a network entry are never merged with each other, even when they describe
/// the same physical device.  If one report lists the same id twice, the later
/// entry replaces the earlier one at the earlier entry's position.
pub fn merge(usb: &[Backend], network: &[Backend]) -> RegistrySnapshot {
    let mut backends: Vec<Backend> = Vec::with_capacity(usb.len() + network.len());
    for backend in usb.iter().chain(network.iter()) {
        match backends.iter_mut().find(|b| b.same_endpoint(backend)) {
            Some(existing) => {
                debug!("probe reported {} backend {:?} twice; keeping the later entry", backend.kind, backend.id);
                *existing = backend.clone();
            }
            None => backends.push(backend.clone()),
        }
    }
    RegistrySnapshot { backends }
}

/// The registry: latest report per probe plus the current snapshot.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    usb: Vec<Backend>,
    network: Vec<Backend>,
    snapshot: RegistrySnapshot,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> &RegistrySnapshot {
        &self.snapshot
    }

    /// Records a fresh USB report.
    ///
    /// Returns the new snapshot when membership changed, `None` otherwise.
    pub fn replace_usb(&mut self, usb: Vec<Backend>) -> Option<RegistrySnapshot> {
        self.usb = usb;
        self.rebuild()
    }

    /// Records a fresh network report.
    ///
    /// Returns the new snapshot when membership changed, `None` otherwise.
    pub fn replace_network(&mut self, network: Vec<Backend>) -> Option<RegistrySnapshot> {
        self.network = network;
        self.rebuild()
    }

    fn rebuild(&mut self) -> Option<RegistrySnapshot> {
        let next = merge(&self.usb, &self.network);
        let changed = !next.same_membership(&self.snapshot);
        // Labels may change without a membership change; keep them current
        // even though nothing is emitted.
        self.snapshot = next;
        changed.then(|| self.snapshot.clone())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(id: &str) -> Backend {
        Backend::usb(id, None)
    }

    fn net(id: &str) -> Backend {
        Backend::network(id, None)
    }

    fn ids(snapshot: &RegistrySnapshot) -> Vec<&str> {
        snapshot.iter().map(|b| b.id.as_str()).collect()
    }

    // ── merge ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_merge_puts_usb_before_network() {
        // Arrange
        let usb_list = vec![usb("A"), usb("B")];
        let net_list = vec![net("ws://localhost:15555")];

        // Act
        let snapshot = merge(&usb_list, &net_list);

        // Assert
        assert_eq!(ids(&snapshot), vec!["A", "B", "ws://localhost:15555"]);
    }

    #[test]
    fn test_merge_keeps_probe_order_without_sorting() {
        let snapshot = merge(&[usb("Z"), usb("A")], &[]);
        assert_eq!(ids(&snapshot), vec!["Z", "A"]);
    }

    #[test]
    fn test_merge_never_dedups_across_kinds() {
        // Arrange: same id reported by both probes
        let snapshot = merge(&[usb("dev")], &[net("dev")]);

        // Assert
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_merge_later_duplicate_wins_within_kind() {
        // Arrange
        let first = Backend::usb("A", Some("old".to_string()));
        let second = Backend::usb("A", Some("new".to_string()));

        // Act
        let snapshot = merge(&[first, usb("B"), second], &[]);

        // Assert
        assert_eq!(ids(&snapshot), vec!["A", "B"]);
        assert_eq!(snapshot.backends()[0].display_name.as_deref(), Some("new"));
    }

    #[test]
    fn test_merge_of_empty_lists_is_empty() {
        assert!(merge(&[], &[]).is_empty());
    }

    // ── snapshot queries ──────────────────────────────────────────────────────

    #[test]
    fn test_find_and_contains_use_id() {
        let snapshot = merge(&[usb("A")], &[net("ws://x")]);
        assert!(snapshot.contains("ws://x"));
        assert_eq!(snapshot.find("A").map(|b| b.kind), Some(BackendKind::Usb));
        assert!(!snapshot.contains("missing"));
    }

    #[test]
    fn test_endpoint_lookups_distinguish_kinds() {
        let snapshot = merge(&[usb("X")], &[]);
        assert!(snapshot.find_endpoint(BackendKind::Network, "X").is_none());
        assert!(snapshot.contains_endpoint(&usb("X")));
        assert!(!snapshot.contains_endpoint(&net("X")));
    }

    #[test]
    fn test_same_membership_ignores_labels_and_order() {
        let a = merge(&[usb("A"), Backend::usb("B", Some("x".into()))], &[]);
        let b = merge(&[usb("B"), usb("A")], &[]);
        assert!(a.same_membership(&b));
    }

    // ── BackendRegistry ───────────────────────────────────────────────────────

    #[test]
    fn test_registry_emits_on_first_non_empty_report() {
        // Arrange
        let mut registry = BackendRegistry::new();

        // Act
        let emitted = registry.replace_usb(vec![usb("A")]);

        // Assert
        assert_eq!(emitted.map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_registry_does_not_emit_for_identical_report() {
        let mut registry = BackendRegistry::new();
        registry.replace_network(vec![net("ws://x")]);

        let emitted = registry.replace_network(vec![net("ws://x")]);

        assert!(emitted.is_none(), "poll tick with same membership must not emit");
    }

    #[test]
    fn test_registry_empty_report_on_empty_registry_does_not_emit() {
        let mut registry = BackendRegistry::new();
        assert!(registry.replace_network(Vec::new()).is_none());
    }

    #[test]
    fn test_registry_keeps_label_updates_without_emitting() {
        // Arrange
        let mut registry = BackendRegistry::new();
        registry.replace_usb(vec![usb("A")]);

        // Act
        let emitted = registry.replace_usb(vec![Backend::usb("A", Some("Pixel".into()))]);

        // Assert
        assert!(emitted.is_none());
        assert_eq!(
            registry.snapshot().find("A").and_then(|b| b.display_name.clone()),
            Some("Pixel".to_string())
        );
    }

    #[test]
    fn test_registry_emits_on_removal() {
        let mut registry = BackendRegistry::new();
        registry.replace_usb(vec![usb("A"), usb("B")]);

        let emitted = registry.replace_usb(vec![usb("B")]).expect("membership changed");

        assert_eq!(ids(&emitted), vec!["B"]);
    }

    #[test]
    fn test_registry_id_set_is_union_of_latest_reports() {
        // Arrange: interleave reports from both probes, including stale ones
        let mut registry = BackendRegistry::new();
        registry.replace_usb(vec![usb("A")]);
        registry.replace_network(vec![net("ws://x")]);
        registry.replace_usb(vec![usb("B"), usb("C")]);
        registry.replace_network(Vec::new());
        registry.replace_network(vec![net("ws://x")]);

        // Act
        let membership: Vec<(BackendKind, String)> = registry
            .snapshot()
            .membership()
            .into_iter()
            .map(|(k, id)| (k, id.to_string()))
            .collect();

        // Assert
        assert_eq!(
            membership,
            vec![
                (BackendKind::Usb, "B".to_string()),
                (BackendKind::Usb, "C".to_string()),
                (BackendKind::Network, "ws://x".to_string()),
            ]
        );
    }

    #[test]
    fn test_registry_result_independent_of_report_order() {
        // Arrange
        let mut usb_first = BackendRegistry::new();
        usb_first.replace_usb(vec![usb("A")]);
        usb_first.replace_network(vec![net("ws://x")]);

        let mut net_first = BackendRegistry::new();
        net_first.replace_network(vec![net("ws://x")]);
        net_first.replace_usb(vec![usb("A")]);

        // Assert
        assert_eq!(usb_first.snapshot(), net_first.snapshot());
    }
}
