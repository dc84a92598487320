//! Process-wide credential store.
//!
//! Devices authorize a host by its key material.  The store generates that
//! material once per process from the OS random source and keeps it in memory
//! for the whole run; every connect attempt presents the same key, so a device
//! that accepted this host once keeps accepting it until the process exits.
//!
//! # Lifetime
//!
//! [`CredentialStore::process_wide`] returns the singleton used by the binary.
//! Nothing ever tears it down.  Tests inject a fresh store with
//! [`CredentialStore::generate`] so they never share key material.
//!
//! The key is wiped from memory when a store is dropped (only test stores are
//! ever dropped in practice).

use std::sync::{Arc, OnceLock};

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Length of the generated key in bytes.
pub const KEY_LEN: usize = 32;

static PROCESS_STORE: OnceLock<Arc<CredentialStore>> = OnceLock::new();

/// Locally generated authorization key material.
pub struct CredentialStore {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl CredentialStore {
    /// Generates a new store with fresh random key material.
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key[..]);
        Self { key }
    }

    /// The store shared by every connection attempt in this process.
    pub fn process_wide() -> Arc<CredentialStore> {
        Arc::clone(PROCESS_STORE.get_or_init(|| Arc::new(CredentialStore::generate())))
    }

    /// Hex-encoded SHA-256 of the key.  Safe to log and to show to users when
    /// they confirm the authorization prompt on the device.
    pub fn fingerprint(&self) -> String {
        hex(&Sha256::digest(&self.key[..]))
    }

    /// Signs a device-issued challenge token: SHA-256 over key then token.
    pub fn sign_token(&self, token: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.key[..]);
        hasher.update(token);
        let mut signature = [0u8; 32];
        signature.copy_from_slice(&hasher.finalize());
        signature
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_stores_differ() {
        let a = CredentialStore::generate();
        let b = CredentialStore::generate();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_64_hex_chars() {
        let fp = CredentialStore::generate().fingerprint();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_process_wide_store_is_created_once() {
        // Act
        let first = CredentialStore::process_wide();
        let second = CredentialStore::process_wide();

        // Assert
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_sign_token_is_deterministic_per_key() {
        // Arrange
        let store = CredentialStore::generate();
        let other = CredentialStore::generate();

        // Act / Assert
        assert_eq!(store.sign_token(b"challenge"), store.sign_token(b"challenge"));
        assert_ne!(store.sign_token(b"challenge"), store.sign_token(b"other"));
        assert_ne!(store.sign_token(b"challenge"), other.sign_token(b"challenge"));
    }

    #[test]
    fn test_debug_does_not_print_key_bytes() {
        let store = CredentialStore::generate();
        let printed = format!("{store:?}");
        assert!(printed.contains(&store.fingerprint()));
        assert!(!printed.contains("key"));
    }
}
