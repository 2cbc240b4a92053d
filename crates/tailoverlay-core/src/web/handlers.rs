//! HTTP endpoint handlers for the workspace API.
//!
//! Every handler resolves the caller from the connection's peer address.
//! Identity fields sent by clients are ignored.

#![allow(clippy::missing_errors_doc)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use axum_extra::extract::Multipart;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::content::{ChatMessage, Post, PostKind, Upload};
use crate::error::Error;
use crate::identity::Identity;
use crate::join::{JoinRequest, JoinStatus};
use crate::session::{JoinReply, Snapshot, Workspace, WorkspaceSession};

use super::error::{ApiError, ApiResult};

/// State shared by all handlers.
pub type SharedState = Arc<WorkspaceSession>;

// ============================================================================
// Response types
// ============================================================================

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "ok"
    status: &'static str,
    /// Library version
    version: &'static str,
}

/// Workspace details for the host.
#[derive(Debug, Serialize)]
pub struct WorkspaceResponse {
    /// The workspace, code included
    workspace: Workspace,
    /// Admitted identities
    members: Vec<Identity>,
}

/// Pending join requests.
#[derive(Debug, Serialize)]
pub struct JoinRequestsResponse {
    /// Requests, oldest first
    requests: Vec<JoinRequest>,
}

/// Outcome of an approve or deny call.
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    /// Resulting status of the request
    status: JoinStatus,
    /// The decided request
    request: JoinRequest,
}

/// Post history.
#[derive(Debug, Serialize)]
pub struct FeedResponse {
    /// Posts, newest first
    posts: Vec<Post>,
}

/// Chat history.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    /// Messages, oldest first
    messages: Vec<ChatMessage>,
}

/// A created post.
#[derive(Debug, Serialize)]
pub struct PostResponse {
    /// The post
    post: Post,
}

/// A created chat message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// The message
    message: ChatMessage,
}

// ============================================================================
// Request types
// ============================================================================

/// Join body.
#[derive(Debug, Deserialize)]
pub struct JoinBody {
    /// Workspace code
    #[serde(default)]
    code: String,
}

/// Approve or deny body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBody {
    /// Request to decide
    request_id: Uuid,
}

/// Chat body.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// Message text
    #[serde(default)]
    text: String,
}

// ============================================================================
// Workspace handlers
// ============================================================================

/// GET /api/health - Liveness probe. Needs no membership and never reveals the code.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::VERSION,
    })
}

/// GET /api/workspace - Workspace details, host only.
pub async fn workspace(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<WorkspaceResponse>> {
    if !WorkspaceSession::is_local(peer.ip()) {
        return Err(Error::Forbidden.into());
    }
    Ok(Json(WorkspaceResponse {
        workspace: session.workspace().clone(),
        members: session.members().await,
    }))
}

// ============================================================================
// Join handlers
// ============================================================================

/// POST /api/join - Join by code, for members and allow-listed devices.
pub async fn join(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<JoinBody>,
) -> ApiResult<Json<Snapshot>> {
    Ok(Json(session.legacy_join(peer.ip(), &body.code).await?))
}

/// POST /api/join-request - Ask the host to join.
///
/// Answers 200 with the snapshot when the caller is admitted and 202 while
/// the request waits for the host.
pub async fn request_join(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<JoinBody>,
) -> ApiResult<(StatusCode, Json<JoinReply>)> {
    let reply = session.request_join(peer.ip(), &body.code).await?;
    Ok((reply_status(&reply), Json(reply)))
}

/// GET /api/join-status/{id} - Poll a join request.
pub async fn join_status(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> ApiResult<Json<JoinReply>> {
    let id = Uuid::parse_str(&id).map_err(|_| Error::RequestNotFound)?;
    Ok(Json(session.check_status(peer.ip(), id).await?))
}

/// GET /api/join-requests - Pending requests, host only.
pub async fn join_requests(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<JoinRequestsResponse>> {
    let requests = session.pending_requests(peer.ip()).await?;
    Ok(Json(JoinRequestsResponse { requests }))
}

/// POST /api/join-approve - Admit a requester, host only.
pub async fn approve(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Json<DecisionResponse>> {
    let request = session.approve(peer.ip(), body.request_id).await?;
    Ok(Json(DecisionResponse {
        status: JoinStatus::Approved,
        request,
    }))
}

/// POST /api/join-deny - Turn a requester away, host only.
pub async fn deny(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<Json<DecisionResponse>> {
    let request = session.deny(peer.ip(), body.request_id).await?;
    Ok(Json(DecisionResponse {
        status: JoinStatus::Denied,
        request,
    }))
}

fn reply_status(reply: &JoinReply) -> StatusCode {
    match reply {
        JoinReply::Pending { .. } => StatusCode::ACCEPTED,
        JoinReply::Approved(_) | JoinReply::Denied => StatusCode::OK,
    }
}

// ============================================================================
// Content handlers
// ============================================================================

/// GET /api/feed - Shared posts, newest first.
pub async fn feed(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<FeedResponse>> {
    let posts = session.feed(peer.ip()).await?;
    Ok(Json(FeedResponse { posts }))
}

/// GET /api/messages - Chat history, oldest first.
pub async fn messages(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> ApiResult<Json<MessagesResponse>> {
    let messages = session.messages(peer.ip()).await?;
    Ok(Json(MessagesResponse { messages }))
}

/// POST /api/chat - Post a chat message.
pub async fn chat(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<MessageResponse>> {
    let message = session.post_chat(peer.ip(), &body.text).await?;
    Ok(Json(MessageResponse { message }))
}

/// POST /api/upload - Share a file.
///
/// Multipart fields: `file` (required), `type` (`screenshot` or `file`),
/// `caption`. Membership is checked before the body is read.
pub async fn upload(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> ApiResult<Json<PostResponse>> {
    let caller = session.require_member(peer.ip()).await?;

    let mut upload = Upload::default();
    let mut has_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                upload.filename = field.file_name().unwrap_or("upload").to_string();
                upload.mime_type = field.content_type().map(String::from);
                upload.bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file data: {e}")))?
                    .to_vec();
                has_file = true;
            }
            "type" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read type field: {e}"))
                })?;
                upload.kind = PostKind::from_form_value(&value);
            }
            "caption" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read caption field: {e}"))
                })?;
                upload.caption = Some(value);
            }
            other => tracing::debug!("Ignoring upload field '{}'", other),
        }
    }

    if !has_file {
        return Err(Error::NoContent.into());
    }

    let post = session.upload_as(&caller, upload).await?;
    Ok(Json(PostResponse { post }))
}

/// GET /api/download/{id} - Fetch the content of a post.
pub async fn download(
    State(session): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let post_id = Uuid::parse_str(&id).map_err(|_| Error::ContentNotFound(id.clone()))?;
    let download = session.download(peer.ip(), post_id).await?;

    let body = Body::from_stream(ReaderStream::new(download.file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.post.mime_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&download.post.filename),
        )
        .header(header::CONTENT_LENGTH, download.post.size)
        .body(body)
        .map_err(|e| ApiError::internal(format!("Failed to build response: {e}")))
}

fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_escapes() {
        assert_eq!(
            content_disposition("report.pdf"),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(
            content_disposition("a\"b\\c\u{e9}.txt"),
            "attachment; filename=\"a_b_c_.txt\""
        );
    }

    #[test]
    fn test_reply_status() {
        assert_eq!(
            reply_status(&JoinReply::Pending {
                request_id: Uuid::nil()
            }),
            StatusCode::ACCEPTED
        );
        assert_eq!(reply_status(&JoinReply::Denied), StatusCode::OK);
    }
}
