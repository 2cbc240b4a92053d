//! Identity resolution through the local Tailscale daemon.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::{Identity, IdentityResolver};

/// How long a single `tailscale` invocation may take.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolver that asks `tailscale whois` who owns a peer address.
#[derive(Debug, Clone)]
pub struct TailscaleResolver {
    binary: String,
    timeout: Duration,
}

/// Summary of the local daemon state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TailscaleStatus {
    /// Whether `tailscale status` could be run at all
    pub running: bool,
    /// Whether the backend reports itself logged in and running
    pub logged_in: bool,
    /// This device's name on the tailnet
    pub device_name: Option<String>,
    /// MagicDNS suffix of the tailnet
    pub tailnet_name: Option<String>,
    /// Preferred (IPv4) overlay address of this device
    pub self_ip: Option<IpAddr>,
    /// Login of the user owning this device
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WhoIs {
    node: Option<WhoIsNode>,
    user_profile: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WhoIsNode {
    #[serde(default)]
    name: String,
    #[serde(default)]
    computed_name: String,
    hostinfo: Option<HostInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostInfo {
    #[serde(default)]
    hostname: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserProfile {
    #[serde(default)]
    login_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusJson {
    #[serde(default)]
    backend_state: String,
    #[serde(rename = "Self")]
    self_node: Option<SelfNode>,
    #[serde(default)]
    user: HashMap<String, UserProfile>,
    #[serde(rename = "MagicDNSSuffix", default)]
    magic_dns_suffix: String,
}

#[derive(Debug, Deserialize)]
struct SelfNode {
    #[serde(rename = "HostName", default)]
    host_name: String,
    #[serde(rename = "UserID", default)]
    user_id: u64,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Vec<IpAddr>,
}

impl TailscaleResolver {
    /// Create a resolver using `tailscale` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            binary: "tailscale".to_string(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// Use a specific `tailscale` binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Query the local daemon state.
    ///
    /// A daemon that cannot be reached yields a default (not running) status.
    pub async fn status(&self) -> TailscaleStatus {
        let Some(stdout) = self.run(&["status", "--json"]).await else {
            return TailscaleStatus::default();
        };
        match serde_json::from_slice::<StatusJson>(&stdout) {
            Ok(status) => status_from_json(&status),
            Err(e) => {
                tracing::warn!("Failed to parse tailscale status: {}", e);
                TailscaleStatus::default()
            }
        }
    }

    /// Identity of this machine, used as the workspace host identity.
    ///
    /// Falls back to the OS hostname when the daemon is unavailable.
    pub async fn local_identity(&self) -> Identity {
        let status = self.status().await;
        let hostname = local_hostname();
        Identity {
            device_name: status.device_name.unwrap_or_else(|| hostname.clone()),
            user_email: status.user_email,
            hostname,
        }
    }

    async fn run(&self, args: &[&str]) -> Option<Vec<u8>> {
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => Some(output.stdout),
            Ok(Ok(output)) => {
                tracing::debug!(
                    "tailscale {} exited with {}",
                    args.join(" "),
                    output.status
                );
                None
            }
            Ok(Err(e)) => {
                tracing::debug!("Failed to run tailscale: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("tailscale {} timed out", args.join(" "));
                None
            }
        }
    }
}

impl Default for TailscaleResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityResolver for TailscaleResolver {
    async fn resolve(&self, addr: IpAddr) -> Option<Identity> {
        let ip = whois_target(addr);
        let stdout = self.run(&["whois", "--json", &ip]).await?;
        match serde_json::from_slice::<WhoIs>(&stdout) {
            Ok(whois) => identity_from_whois(whois),
            Err(e) => {
                tracing::warn!("Failed to parse tailscale whois for {}: {}", addr, e);
                None
            }
        }
    }
}

/// IPv4-mapped IPv6 peers, as seen on a dual-stack listener, are looked up
/// by their IPv4 address.
fn whois_target(addr: IpAddr) -> String {
    addr.to_canonical().to_string()
}

fn identity_from_whois(whois: WhoIs) -> Option<Identity> {
    let node = whois.node?;
    let os_hostname = node.hostinfo.map(|h| h.hostname).unwrap_or_default();

    let device_name = [
        node.computed_name.as_str(),
        node.name.split('.').next().unwrap_or_default(),
        os_hostname.as_str(),
    ]
    .into_iter()
    .find(|s| !s.is_empty())?
    .to_string();

    let user_email = whois
        .user_profile
        .map(|p| p.login_name)
        .filter(|login| !login.is_empty());

    let hostname = if os_hostname.is_empty() {
        device_name.clone()
    } else {
        os_hostname
    };

    let identity = Identity {
        device_name,
        user_email,
        hostname,
    };
    identity.key().map(|_| identity)
}

fn status_from_json(status: &StatusJson) -> TailscaleStatus {
    let self_node = status.self_node.as_ref();
    let ips = self_node.map(|s| s.tailscale_ips.as_slice()).unwrap_or_default();

    TailscaleStatus {
        running: true,
        logged_in: status.backend_state == "Running",
        device_name: self_node
            .map(|s| s.host_name.clone())
            .filter(|name| !name.is_empty()),
        tailnet_name: Some(status.magic_dns_suffix.clone()).filter(|s| !s.is_empty()),
        self_ip: ips.iter().find(|ip| ip.is_ipv4()).or_else(|| ips.first()).copied(),
        user_email: self_node
            .and_then(|s| status.user.get(&s.user_id.to_string()))
            .map(|u| u.login_name.clone())
            .filter(|login| !login.is_empty()),
    }
}

fn local_hostname() -> String {
    hostname::get().map_or_else(
        |_| "TailOverlay Host".to_string(),
        |h| h.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whois_target_unmaps_ipv4() {
        let mapped: IpAddr = "::ffff:100.64.0.2".parse().unwrap();
        assert_eq!(whois_target(mapped), "100.64.0.2");

        let v6: IpAddr = "fd7a:115c:a1e0::1".parse().unwrap();
        assert_eq!(whois_target(v6), "fd7a:115c:a1e0::1");
    }

    #[test]
    fn test_identity_from_whois() {
        let json = r#"{
            "Node": {
                "Name": "dev-b.tail1234.ts.net.",
                "ComputedName": "dev-b",
                "Hostinfo": { "Hostname": "bobs-macbook" }
            },
            "UserProfile": { "LoginName": "bob@example.com", "DisplayName": "Bob" }
        }"#;
        let whois: WhoIs = serde_json::from_str(json).unwrap();
        let identity = identity_from_whois(whois).unwrap();

        assert_eq!(identity.device_name, "dev-b");
        assert_eq!(identity.user_email.as_deref(), Some("bob@example.com"));
        assert_eq!(identity.hostname, "bobs-macbook");
    }

    #[test]
    fn test_identity_from_whois_without_user() {
        let json = r#"{ "Node": { "Name": "dev-b.tail1234.ts.net." } }"#;
        let whois: WhoIs = serde_json::from_str(json).unwrap();
        let identity = identity_from_whois(whois).unwrap();

        assert_eq!(identity, Identity::device("dev-b"));
    }

    #[test]
    fn test_identity_from_whois_without_node() {
        let whois: WhoIs = serde_json::from_str("{}").unwrap();
        assert!(identity_from_whois(whois).is_none());
    }

    #[test]
    fn test_status_from_json() {
        let json = r#"{
            "BackendState": "Running",
            "MagicDNSSuffix": "tail1234.ts.net",
            "Self": {
                "HostName": "host-a",
                "UserID": 42,
                "TailscaleIPs": ["fd7a:115c:a1e0::1", "100.101.102.103"]
            },
            "User": { "42": { "LoginName": "alice@example.com" } }
        }"#;
        let parsed: StatusJson = serde_json::from_str(json).unwrap();
        let status = status_from_json(&parsed);

        assert!(status.running);
        assert!(status.logged_in);
        assert_eq!(status.device_name.as_deref(), Some("host-a"));
        assert_eq!(status.tailnet_name.as_deref(), Some("tail1234.ts.net"));
        assert_eq!(status.self_ip, Some("100.101.102.103".parse().unwrap()));
        assert_eq!(status.user_email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unknown() {
        let resolver = TailscaleResolver::new().with_binary("tailoverlay-no-such-binary");
        assert!(resolver.resolve("100.64.0.2".parse().unwrap()).await.is_none());
        assert_eq!(resolver.status().await, TailscaleStatus::default());

        let identity = resolver.local_identity().await;
        assert!(!identity.hostname.is_empty());
        assert_eq!(identity.device_name, identity.hostname);
    }
}
