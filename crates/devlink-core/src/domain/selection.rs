//! Selection reconciliation.
//!
//! The selection is the backend the user intends to connect to.  It is
//! independent of connection state: a user can have backend `A` selected while
//! nothing is connected, or while connected to `A`.
//!
//! Whenever the registry snapshot changes, the previous selection is mapped
//! onto the new snapshot:
//!
//! 1. If the previously selected endpoint (same kind and id) is still
//!    present, keep it, using the snapshot's own `Backend` value (the label
//!    may have been refreshed).
//! 2. Otherwise select the first backend of the snapshot.
//! 3. If the snapshot is empty, select nothing.
//!
//! A manual pick from the UI bypasses this function.  It is written straight
//! into the selection and is only reconciled on the *next* snapshot change.

use super::backend::Backend;
use super::registry::RegistrySnapshot;

/// Maps `previous` onto `snapshot`.
pub fn reconcile(previous: Option<&Backend>, snapshot: &RegistrySnapshot) -> Option<Backend> {
    previous
        .and_then(|prev| snapshot.find_endpoint(prev.kind, &prev.id))
        .or_else(|| snapshot.first())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::merge;

    #[test]
    fn test_reconcile_keeps_previous_id_when_present() {
        // Arrange
        let previous = Backend::usb("B", None);
        let snapshot = merge(&[Backend::usb("A", None), Backend::usb("B", Some("Pixel".into()))], &[]);

        // Act
        let selected = reconcile(Some(&previous), &snapshot);

        // Assert: same id, but the refreshed value from the snapshot
        let selected = selected.expect("selection kept");
        assert_eq!(selected.id, "B");
        assert_eq!(selected.display_name.as_deref(), Some("Pixel"));
    }

    #[test]
    fn test_reconcile_falls_back_to_first_entry() {
        let previous = Backend::usb("gone", None);
        let snapshot = merge(&[Backend::usb("A", None)], &[Backend::network("ws://x", None)]);

        let selected = reconcile(Some(&previous), &snapshot);

        assert_eq!(selected.map(|b| b.id), Some("A".to_string()));
    }

    #[test]
    fn test_reconcile_empty_snapshot_clears_selection() {
        let previous = Backend::usb("A", None);
        assert_eq!(reconcile(Some(&previous), &RegistrySnapshot::default()), None);
    }

    #[test]
    fn test_reconcile_without_previous_selects_first() {
        let snapshot = merge(&[], &[Backend::network("ws://x", None)]);
        assert_eq!(reconcile(None, &snapshot).map(|b| b.id), Some("ws://x".to_string()));
    }

    #[test]
    fn test_reconcile_matches_kind_as_well_as_id() {
        // Arrange: a USB entry listed first shares the network selection's id
        let previous = Backend::network("X", None);
        let snapshot = merge(&[Backend::usb("X", None)], &[Backend::network("X", None)]);

        // Act
        let selected = reconcile(Some(&previous), &snapshot);

        // Assert
        assert_eq!(selected, Some(Backend::network("X", None)));
    }

    #[test]
    fn test_reconcile_without_previous_on_empty_snapshot_is_none() {
        assert_eq!(reconcile(None, &RegistrySnapshot::default()), None);
    }
}
