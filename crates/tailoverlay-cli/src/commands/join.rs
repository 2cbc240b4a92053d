//! Join command implementation.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;

use tailoverlay_core::session::{JoinReply, Snapshot};

use super::{check_response, JoinArgs};
use crate::ui::format_size;

/// Run the join command.
pub async fn run(args: JoinArgs) -> Result<()> {
    let port = args.port.unwrap_or_else(|| super::load_config().network.port);
    let base = base_url(&args.host, port);
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/join-request", base))
        .json(&json!({ "code": args.code.trim() }))
        .send()
        .await
        .with_context(|| format!("Could not reach {}", base))?;
    let mut reply: JoinReply = check_response(response).await?.json().await?;

    if let JoinReply::Pending { request_id } = &reply {
        if !args.json {
            println!("Waiting for the host to approve request {}...", request_id);
        }
        let status_url = format!("{}/api/join-status/{}", base, request_id);
        let interval = Duration::from_secs(args.interval.max(1));

        while matches!(reply, JoinReply::Pending { .. }) {
            tokio::time::sleep(interval).await;
            let response = client
                .get(&status_url)
                .send()
                .await
                .with_context(|| format!("Lost contact with {}", base))?;
            reply = check_response(response).await?.json().await?;
        }
    }

    match reply {
        JoinReply::Approved(snapshot) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                display_snapshot(&snapshot, &base);
            }
            Ok(())
        }
        JoinReply::Denied => bail!("The host denied the join request"),
        JoinReply::Pending { .. } => bail!("The join request is still pending"),
    }
}

fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.trim_end_matches('/').to_string();
    }
    if host.contains(':') && !host.starts_with('[') {
        // Bare IPv6 literal
        return format!("http://[{}]:{}", host, port);
    }
    format!("http://{}:{}", host, port)
}

fn display_snapshot(snapshot: &Snapshot, base: &str) {
    println!();
    println!("Joined the workspace of {}", snapshot.workspace.host_identity);
    println!("{}", "-".repeat(37));

    println!();
    println!("Shared ({}):", snapshot.posts.len());
    for post in &snapshot.posts {
        println!(
            "  {:24}  {:>9}  {}  {}{}",
            post.filename,
            format_size(post.size),
            post.sender_identity.device_name,
            base,
            post.download_url
        );
    }

    println!();
    println!("Chat ({}):", snapshot.messages.len());
    for message in &snapshot.messages {
        println!(
            "  [{}] {}: {}",
            message.created_at.format("%H:%M"),
            message.sender_identity.device_name,
            message.text
        );
    }
    println!();
}
