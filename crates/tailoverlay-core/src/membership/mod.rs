//! Identities admitted to a workspace.
//!
//! The host is a member from the moment the store is created. Membership
//! only grows: there is deliberately no removal operation, so an identity
//! stays admitted for the lifetime of the workspace.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::identity::{Identity, IdentityKey};

/// The set of admitted identities, keyed by identity key.
#[derive(Debug, Clone)]
pub struct MembershipStore {
    host_key: IdentityKey,
    members: HashMap<IdentityKey, Identity>,
}

impl MembershipStore {
    /// Create a store seeded with the host identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] if the host identity has no
    /// usable key.
    pub fn new(host: Identity) -> Result<Self> {
        let host_key = host.key().ok_or(Error::IdentityUnavailable)?;
        let mut members = HashMap::new();
        members.insert(host_key.clone(), host);
        Ok(Self { host_key, members })
    }

    /// Whether the key belongs to an admitted identity.
    #[must_use]
    pub fn is_member(&self, key: &IdentityKey) -> bool {
        self.members.contains_key(key)
    }

    /// Whether the key is the host's.
    #[must_use]
    pub fn is_host(&self, key: &IdentityKey) -> bool {
        &self.host_key == key
    }

    /// Admit an identity. Returns `true` if it was not a member before.
    ///
    /// Re-admitting an existing member keeps the first recorded identity.
    pub fn admit(&mut self, identity: Identity) -> bool {
        let Some(key) = identity.key() else {
            return false;
        };
        if self.members.contains_key(&key) {
            return false;
        }
        self.members.insert(key, identity);
        true
    }

    /// Look up the recorded identity for a key.
    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<&Identity> {
        self.members.get(key)
    }

    /// Number of members, host included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// All members, sorted by key.
    #[must_use]
    pub fn members(&self) -> Vec<Identity> {
        let mut entries: Vec<_> = self.members.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, id)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Identity {
        Identity::new("host-a", Some("alice@example.com".into()), "host-a")
    }

    #[test]
    fn test_host_is_member_from_start() {
        let store = MembershipStore::new(host()).unwrap();
        let key = host().key().unwrap();
        assert!(store.is_member(&key));
        assert!(store.is_host(&key));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_host_without_key_rejected() {
        let result = MembershipStore::new(Identity::new("", None, ""));
        assert!(matches!(result, Err(Error::IdentityUnavailable)));
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut store = MembershipStore::new(host()).unwrap();
        let guest = Identity::device("dev-b");

        assert!(store.admit(guest.clone()));
        assert!(!store.admit(guest.clone()));
        assert!(!store.admit(Identity::device("DEV-B")));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&guest.key().unwrap()), Some(&guest));
    }

    #[test]
    fn test_readmitting_host_keeps_single_entry() {
        let mut store = MembershipStore::new(host()).unwrap();
        assert!(!store.admit(host()));
        assert_eq!(store.members(), vec![host()]);
    }
}
