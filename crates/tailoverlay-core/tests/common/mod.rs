//! Common test utilities for `TailOverlay` integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use tailoverlay_core::clock::ManualClock;
use tailoverlay_core::code::WorkspaceCode;
use tailoverlay_core::identity::{Identity, StaticResolver};
use tailoverlay_core::session::{AccessPolicy, SessionOptions, WorkspaceSession};

/// Code every test workspace is started with.
pub const CODE: &str = "482913";

/// Upload limit used by test routers.
pub const MAX_UPLOAD: usize = 1024 * 1024;

/// The host machine itself.
pub const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// A tailnet peer resolving to `dev-b`.
pub const GUEST: IpAddr = IpAddr::V4(Ipv4Addr::new(100, 64, 0, 2));

/// A tailnet peer resolving to `dev-c`.
pub const OTHER: IpAddr = IpAddr::V4(Ipv4Addr::new(100, 64, 0, 3));

/// A peer the resolver knows nothing about.
pub const STRANGER: IpAddr = IpAddr::V4(Ipv4Addr::new(100, 64, 0, 99));

pub fn host_identity() -> Identity {
    Identity::new("host-a", Some("alice@example.com".into()), "host-a")
}

pub fn guest_identity() -> Identity {
    Identity::new("dev-b", None, "dev-b")
}

/// A session with a controllable clock and a throwaway upload directory.
pub struct TestWorkspace {
    pub session: Arc<WorkspaceSession>,
    pub clock: Arc<ManualClock>,
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_access(AccessPolicy::default())
    }

    pub fn with_access(access: AccessPolicy) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::default());
        let resolver = StaticResolver::new()
            .with(GUEST, guest_identity())
            .with(OTHER, Identity::device("dev-c"));

        let session = WorkspaceSession::new(
            WorkspaceCode::parse(CODE).unwrap(),
            host_identity(),
            Arc::new(resolver),
            SessionOptions {
                access,
                storage_dir: dir.path().to_path_buf(),
                clock: clock.clone(),
                ..SessionOptions::default()
            },
        )
        .expect("Failed to create session");

        Self {
            session: Arc::new(session),
            clock,
            dir,
        }
    }

    pub fn router(&self) -> Router {
        tailoverlay_core::web::router(Arc::clone(&self.session), MAX_UPLOAD)
    }

    /// Send one request through the router as if it came from `peer`.
    pub async fn call(&self, peer: IpAddr, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        send(self.router(), peer, request).await
    }

    /// Send one request and decode the JSON response.
    pub async fn call_json(
        &self,
        peer: IpAddr,
        request: Request<Body>,
    ) -> (StatusCode, serde_json::Value) {
        let (status, body) = self.call(peer, request).await;
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).expect("Response is not JSON")
        };
        (status, json)
    }

    /// Take `peer` from nothing to member through the approval workflow.
    pub async fn admit(&self, peer: IpAddr) {
        let reply = self.session.request_join(peer, CODE).await.unwrap();
        if let tailoverlay_core::session::JoinReply::Pending { request_id } = reply {
            self.session.approve(LOCAL, request_id).await.unwrap();
        }
    }
}

pub async fn send(
    router: Router,
    peer: IpAddr,
    mut request: Request<Body>,
) -> (StatusCode, Vec<u8>) {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::new(peer, 50_000)));
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "tailoverlay-test-boundary";

/// Build a multipart upload request.
///
/// `file` is `(filename, content type, bytes)`; `None` leaves the file part out.
pub fn upload_request(file: Option<(&str, &str, &[u8])>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/api/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap()
}
