//! Host command implementation.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use tailoverlay_core::code::WorkspaceCode;
use tailoverlay_core::config::Config;
use tailoverlay_core::events::{Event, PresenceStatus};
use tailoverlay_core::identity::TailscaleResolver;
use tailoverlay_core::session::{AccessMode, WorkspaceSession};
use tailoverlay_core::web::WorkspaceHost;
use tailoverlay_core::Error;

use super::HostArgs;
use crate::ui::{format_size, CodeBox};

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Run the host command.
pub async fn run(args: HostArgs) -> Result<()> {
    let mut config = super::load_config();
    apply_args(&mut config, &args);

    if host_running(config.network.port).await {
        return Err(Error::AlreadyRunning.into());
    }

    let code = match args.code.as_deref() {
        Some(code) => WorkspaceCode::parse(code).context("Workspace codes are six digits")?,
        None => WorkspaceCode::generate(),
    };

    let resolver = Arc::new(TailscaleResolver::new());
    let mut host_identity = resolver.local_identity().await;
    if let Some(name) = &config.general.device_name {
        host_identity.device_name.clone_from(name);
    }

    let options = config.session_options()?;
    let storage_dir = options.storage_dir.clone();
    let session = WorkspaceSession::new(code, host_identity, resolver, options)?;
    let host = WorkspaceHost::start(Arc::new(session), config.host_options()).await?;

    if !args.quiet {
        let session = host.session();
        println!();
        println!("TailOverlay v{}", tailoverlay_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  Host:     {}", session.workspace().host_identity);
        println!("  Files:    {}", storage_dir.display());
        println!("  Uploads:  up to {}", format_size(config.session.max_upload_size as u64));
        if config.access.mode == AccessMode::AllowList {
            println!("  Allowed:  {}", config.access.allowed_devices.join(", "));
        }
        println!();
        CodeBox::new(session.workspace().code.as_str())
            .with_address(host.local_addr())
            .display();
        println!();
        println!("  Waiting for devices to join. Press Ctrl+C to stop.");
        println!();
    }

    let result = follow_activity(&host, args.quiet).await;

    host.stop().await;
    if !args.quiet {
        println!();
        println!("Workspace closed.");
    }
    result
}

fn apply_args(config: &mut Config, args: &HostArgs) {
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(bind) = args.bind {
        config.network.bind_address = bind;
    }
    if let Some(name) = &args.name {
        config.general.device_name = Some(name.clone());
    }
    if let Some(allow) = &args.allow {
        config.apply_allowed_devices(allow);
        config.access.mode = AccessMode::AllowList;
    }
}

/// Print join requests and presence changes until Ctrl+C.
async fn follow_activity(host: &WorkspaceHost, quiet: bool) -> Result<()> {
    let session = host.session();
    let local = session
        .authorize_subscriber(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .await?;
    let mut stream = session.subscribe(&local).await;
    let own_id = stream.id();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                break;
            }
            frame = stream.recv() => {
                let Some(frame) = frame else { break };
                if quiet {
                    continue;
                }
                match serde_json::from_str::<Event>(&frame) {
                    Ok(Event::JoinRequest(request)) => {
                        println!("  Join request from {}", request.identity);
                        println!("    tailoverlay approve {}", request.id);
                        println!("    tailoverlay deny {}", request.id);
                    }
                    Ok(Event::Presence(presence)) if &presence.identity != local.identity() => {
                        let change = match presence.status {
                            PresenceStatus::Joined => "connected",
                            PresenceStatus::Left => "disconnected",
                        };
                        println!("  {} {}", presence.identity, change);
                    }
                    Ok(Event::PostNew(post)) => {
                        println!(
                            "  {} shared {} ({})",
                            post.sender_identity,
                            post.filename,
                            format_size(post.size)
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("Unreadable event: {}", e),
                }
            }
        }
    }

    session.unsubscribe(own_id).await;
    Ok(())
}

/// Whether a workspace host already answers on the loopback port.
async fn host_running(port: u16) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() else {
        return false;
    };
    let url = format!("http://{}/api/health", SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
    matches!(client.get(url).send().await, Ok(response) if response.status().is_success())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> HostArgs {
        use clap::Parser;
        let mut argv = vec!["host"];
        argv.extend_from_slice(extra);
        HostArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Config::default();
        apply_args(
            &mut config,
            &args(&["--port", "5000", "--bind", "127.0.0.1", "--name", "desk"]),
        );

        assert_eq!(config.network.port, 5000);
        assert_eq!(config.network.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.general.device_name.as_deref(), Some("desk"));
        assert_eq!(config.access.mode, AccessMode::Approval);
    }

    #[test]
    fn test_allow_switches_to_allow_list() {
        let mut config = Config::default();
        apply_args(&mut config, &args(&["--allow", "laptop, phone"]));

        assert_eq!(config.access.mode, AccessMode::AllowList);
        assert_eq!(config.access.allowed_devices, vec!["laptop", "phone"]);
    }

    #[tokio::test]
    async fn test_probe_without_host() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!host_running(port).await);
    }
}
