//! Device allow-list policy.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// How identities that are not yet members get in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Allow-listed devices get in directly, everyone else asks the host
    #[default]
    Approval,
    /// Only allow-listed devices get in; nobody can ask
    AllowList,
}

/// Allow-list consulted before the approval workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Access mode
    pub mode: AccessMode,
    /// Emails, device names or hostnames admitted without asking
    pub allowed_devices: Vec<String>,
}

impl AccessPolicy {
    /// Policy that admits the listed devices and refuses everyone else.
    #[must_use]
    pub fn allow_list<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: AccessMode::AllowList,
            allowed_devices: devices.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the identity is on the allow-list.
    #[must_use]
    pub fn is_allowed(&self, identity: &Identity) -> bool {
        self.allowed_devices
            .iter()
            .any(|entry| identity.matches_allow_entry(entry))
    }

    /// Whether identities off the list may ask the host to join.
    #[must_use]
    pub fn accepts_requests(&self) -> bool {
        self.mode == AccessMode::Approval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accepts_requests_and_allows_nobody() {
        let policy = AccessPolicy::default();
        assert!(policy.accepts_requests());
        assert!(!policy.is_allowed(&Identity::device("dev-b")));
    }

    #[test]
    fn test_allow_list() {
        let policy = AccessPolicy::allow_list(["dev-b", "carol@example.com"]);
        assert!(!policy.accepts_requests());
        assert!(policy.is_allowed(&Identity::device("DEV-B")));
        assert!(policy.is_allowed(&Identity::new(
            "laptop",
            Some("Carol@example.com".into()),
            "laptop"
        )));
        assert!(!policy.is_allowed(&Identity::device("dev-c")));
    }
}
