//! Commands that steer the workspace hosted on this device.
//!
//! Approving and denying are host-only operations; the API accepts them
//! only over loopback, so these commands always talk to `127.0.0.1`.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use tailoverlay_core::join::JoinRequest;

use super::{check_response, DecisionArgs, RequestsArgs};

#[derive(Debug, Deserialize)]
struct RequestsBody {
    requests: Vec<JoinRequest>,
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    status: String,
    request: JoinRequest,
}

fn local_url(port: Option<u16>, path: &str) -> String {
    let port = port.unwrap_or_else(|| super::load_config().network.port);
    format!("http://{}{}", SocketAddr::from((Ipv4Addr::LOCALHOST, port)), path)
}

/// Run the requests command.
pub async fn requests(args: RequestsArgs) -> Result<()> {
    let url = local_url(args.port, "/api/join-requests");
    let response = reqwest::get(&url)
        .await
        .context("No workspace is hosted on this device")?;
    let body: RequestsBody = check_response(response).await?.json().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&body.requests)?);
        return Ok(());
    }

    if body.requests.is_empty() {
        println!("No pending join requests.");
        return Ok(());
    }

    println!("Pending join requests:");
    println!("{}", "─".repeat(72));
    println!("  {:36}  {:20}  {:8}", "Request", "Device", "Waiting");
    println!("{}", "─".repeat(72));
    for request in &body.requests {
        println!(
            "  {:36}  {:20}  {:8}",
            request.id,
            request.identity.device_name,
            format_waiting(request)
        );
    }
    println!();
    println!("Approve with: tailoverlay approve <request>");

    Ok(())
}

/// Run the approve command.
pub async fn approve(args: DecisionArgs) -> Result<()> {
    decide(args, "/api/join-approve").await
}

/// Run the deny command.
pub async fn deny(args: DecisionArgs) -> Result<()> {
    decide(args, "/api/join-deny").await
}

async fn decide(args: DecisionArgs, path: &str) -> Result<()> {
    let body = send_decision(&local_url(args.port, path), args.request_id).await?;
    println!("{} {}", capitalize(&body.status), body.request.identity);
    Ok(())
}

async fn send_decision(url: &str, request_id: Uuid) -> Result<DecisionBody> {
    let response = reqwest::Client::new()
        .post(url)
        .json(&json!({ "requestId": request_id }))
        .send()
        .await
        .context("No workspace is hosted on this device")?;
    Ok(check_response(response).await?.json().await?)
}

fn format_waiting(request: &JoinRequest) -> String {
    let secs = (Utc::now() - request.requested_at).num_seconds().max(0);
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_url_uses_loopback() {
        assert_eq!(
            local_url(Some(4173), "/api/join-requests"),
            "http://127.0.0.1:4173/api/join-requests"
        );
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("approved"), "Approved");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_decision_body_shape() {
        let body: DecisionBody = serde_json::from_value(json!({
            "status": "denied",
            "request": {
                "id": Uuid::nil(),
                "identity": {"deviceName": "dev-b", "userEmail": null, "hostname": "dev-b"},
                "identityKey": "dev-b",
                "requestedAt": "2026-01-01T00:00:00Z"
            }
        }))
        .unwrap();

        assert_eq!(body.status, "denied");
        assert_eq!(body.request.identity.device_name, "dev-b");
    }
}
