//! CLI command definitions and handlers.

use std::net::IpAddr;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

pub mod config;
pub mod control;
pub mod host;
pub mod join;

/// Load configuration with graceful fallback to defaults.
///
/// Environment overrides are applied on top of the file. A file that can't
/// be read or parsed is reported and replaced by defaults.
pub fn load_config() -> tailoverlay_core::config::Config {
    let mut config = tailoverlay_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration file: {}", e);
        tailoverlay_core::config::Config::default()
    });
    config.apply_env();
    config
}

/// Error body returned by the workspace API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: String,
}

/// Turn a non-success API response into an error carrying its code.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match response.json::<ErrorBody>().await {
        Ok(ErrorBody {
            code: Some(code),
            message,
        }) => bail!("{} ({})", message, code),
        Ok(ErrorBody { message, .. }) => bail!("{}", message),
        Err(_) => bail!("Request failed with status {}", status),
    }
}

/// TailOverlay - Share a workspace across your tailnet
#[derive(Parser)]
#[command(name = "tailoverlay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Host a workspace on this device
    Host(HostArgs),

    /// Ask to join a workspace hosted on another device
    Join(JoinArgs),

    /// List join requests waiting for approval
    Requests(RequestsArgs),

    /// Approve a join request
    Approve(DecisionArgs),

    /// Deny a join request
    Deny(DecisionArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the host command
#[derive(Parser)]
pub struct HostArgs {
    /// Use this six digit code instead of a random one
    #[arg(short, long)]
    pub code: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// Admit these devices without approval (comma-separated)
    #[arg(long)]
    pub allow: Option<String>,

    /// Custom device name for the host identity
    #[arg(long)]
    pub name: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the join command
#[derive(Parser)]
pub struct JoinArgs {
    /// Host name or address of the hosting device
    pub host: String,

    /// Workspace code
    pub code: String,

    /// Port the host listens on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds between status polls
    #[arg(long, default_value = "2")]
    pub interval: u64,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the requests command
#[derive(Parser)]
pub struct RequestsArgs {
    /// Port of the local host
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the approve and deny commands
#[derive(Parser)]
pub struct DecisionArgs {
    /// Join request identifier
    pub request_id: Uuid,

    /// Port of the local host
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_host_flags() {
        let cli = Cli::try_parse_from([
            "tailoverlay",
            "host",
            "--code",
            "482913",
            "--port",
            "5000",
            "--bind",
            "127.0.0.1",
        ])
        .unwrap();

        let Command::Host(args) = cli.command else {
            panic!("expected host command");
        };
        assert_eq!(args.code.as_deref(), Some("482913"));
        assert_eq!(args.port, Some(5000));
        assert_eq!(args.bind, Some(IpAddr::from([127, 0, 0, 1])));
    }

    #[test]
    fn test_parse_decision_requires_uuid() {
        assert!(Cli::try_parse_from(["tailoverlay", "approve", "not-an-id"]).is_err());

        let id = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["tailoverlay", "deny", &id]).unwrap();
        assert!(matches!(cli.command, Command::Deny(args) if args.request_id.to_string() == id));
    }

    #[test]
    fn test_parse_join() {
        let cli = Cli::try_parse_from(["tailoverlay", "join", "laptop", "482913"]).unwrap();
        let Command::Join(args) = cli.command else {
            panic!("expected join command");
        };
        assert_eq!(args.host, "laptop");
        assert_eq!(args.code, "482913");
        assert_eq!(args.interval, 2);
    }
}
