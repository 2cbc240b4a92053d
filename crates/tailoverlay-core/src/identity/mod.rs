//! Peer identities and identity resolution.
//!
//! The workspace never trusts identity claims sent by a client. Every caller
//! is identified by asking an [`IdentityResolver`] about its network address;
//! on a tailnet that is the Tailscale daemon, which knows which machine and
//! user sit behind each overlay address.
//!
//! Two identities are the same actor when their [`IdentityKey`]s match. The
//! key prefers the user email, then the device name, then the hostname, all
//! lower-cased.

mod tailscale;

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use tailscale::TailscaleResolver;

/// Who is behind a peer address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Device name on the overlay network
    pub device_name: String,
    /// Login of the user owning the device, if known
    pub user_email: Option<String>,
    /// Operating system hostname
    pub hostname: String,
}

impl Identity {
    /// Create an identity.
    #[must_use]
    pub fn new(
        device_name: impl Into<String>,
        user_email: Option<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            user_email,
            hostname: hostname.into(),
        }
    }

    /// Identity of a device known only by its name.
    #[must_use]
    pub fn device(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), None, name)
    }

    /// Normalized key used for membership and request deduplication.
    ///
    /// Returns `None` when every field is blank.
    #[must_use]
    pub fn key(&self) -> Option<IdentityKey> {
        [
            self.user_email.as_deref(),
            Some(self.device_name.as_str()),
            Some(self.hostname.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(|s| IdentityKey(s.to_lowercase()))
    }

    /// Check this identity against a device allow-list entry.
    ///
    /// Entries match the email, device name, or hostname, ignoring case.
    #[must_use]
    pub fn matches_allow_entry(&self, entry: &str) -> bool {
        let entry = entry.trim();
        if entry.is_empty() {
            return false;
        }
        self.user_email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(entry))
            || self.device_name.eq_ignore_ascii_case(entry)
            || self.hostname.eq_ignore_ascii_case(entry)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_email {
            Some(email) => write!(f, "{} ({})", self.device_name, email),
            None => write!(f, "{}", self.device_name),
        }
    }
}

/// Normalized identity discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps a peer address to the identity behind it.
///
/// Implementations must not fail loudly: anything that prevents a confident
/// answer (daemon not running, timeout, unknown peer) is reported as `None`.
/// Resolution may be slow and is never called while session locks are held.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve the identity behind `addr`.
    async fn resolve(&self, addr: IpAddr) -> Option<Identity>;
}

/// Resolver backed by a fixed address table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<IpAddr, Identity>,
}

impl StaticResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address mapping.
    #[must_use]
    pub fn with(mut self, addr: IpAddr, identity: Identity) -> Self {
        self.table.insert(addr, identity);
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, addr: IpAddr) -> Option<Identity> {
        self.table.get(&addr).cloned()
    }
}
