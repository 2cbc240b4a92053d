//! HTTP and WebSocket surface of a hosted workspace.
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Access | Description |
//! |--------|----------|--------|-------------|
//! | GET | /api/health | anyone | Liveness |
//! | GET | /api/workspace | host | Workspace details and members |
//! | POST | /api/join | code | Join without approval (allow-list) |
//! | POST | /api/join-request | code | Ask the host to join |
//! | GET | /api/join-status/{id} | requester | Poll a join request |
//! | GET | /api/join-requests | host | Pending requests |
//! | POST | /api/join-approve | host | Approve a request |
//! | POST | /api/join-deny | host | Deny a request |
//! | GET | /api/feed | member | Posts, newest first |
//! | GET | /api/messages | member | Chat, oldest first |
//! | POST | /api/upload | member | Share a file (multipart) |
//! | GET | /api/download/{id} | member | Fetch a post's content |
//! | POST | /api/chat | member | Post a chat message |
//! | WS | /ws | member | Live events |
//!
//! "host" means the request comes from the host machine's loopback
//! interface.

pub mod error;
pub mod handlers;
pub mod live;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit},
    http::Request,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::error::{Error, Result};
use crate::session::WorkspaceSession;

pub use error::{ApiError, ApiResult};

/// Room for multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// How long `stop` waits for in-flight requests before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the router serving a session.
///
/// The router reads the peer address from [`ConnectInfo`], so it must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(session: Arc<WorkspaceSession>, max_upload_size: usize) -> Router {
    let body_limit = max_upload_size.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/workspace", get(handlers::workspace))
        .route("/api/join", post(handlers::join))
        .route("/api/join-request", post(handlers::request_join))
        .route("/api/join-status/{id}", get(handlers::join_status))
        .route("/api/join-requests", get(handlers::join_requests))
        .route("/api/join-approve", post(handlers::approve))
        .route("/api/join-deny", post(handlers::deny))
        .route("/api/feed", get(handlers::feed))
        .route("/api/messages", get(handlers::messages))
        .route("/api/upload", post(handlers::upload))
        .route("/api/download/{id}", get(handlers::download))
        .route("/api/chat", post(handlers::chat))
        .route("/ws", get(live::upgrade))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<axum::body::Body>| {
                let peer = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| *addr);
                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    path = %request.uri().path(),
                    peer = ?peer,
                )
            }),
        )
        .with_state(session)
}

/// Runtime options of a workspace host.
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Address to listen on; port 0 picks a free port
    pub bind: SocketAddr,
    /// Interval of the background expiry sweep
    pub sweep_interval: Duration,
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, crate::DEFAULT_PORT)),
            sweep_interval: Duration::from_secs(crate::DEFAULT_SWEEP_INTERVAL_SECS),
            max_upload_size: crate::DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

struct HostTasks {
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// A running workspace host: the listener, the router and the sweep task.
pub struct WorkspaceHost {
    session: Arc<WorkspaceSession>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Mutex<Option<HostTasks>>,
}

impl WorkspaceHost {
    /// Bind the listener and start serving the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindFailed`] if the address cannot be bound.
    pub async fn start(session: Arc<WorkspaceSession>, options: HostOptions) -> Result<Self> {
        let listener = TcpListener::bind(options.bind)
            .await
            .map_err(|source| Error::BindFailed {
                addr: options.bind,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = router(Arc::clone(&session), options.max_upload_size);
        let shutdown = CancellationToken::new();

        let server = {
            let token = shutdown.clone();
            tokio::spawn(async move {
                let result = axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
                if let Err(e) = result {
                    tracing::error!("Workspace server error: {}", e);
                }
            })
        };

        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&session),
            options.sweep_interval,
            shutdown.clone(),
        ));

        tracing::info!("Workspace host listening on {}", local_addr);

        Ok(Self {
            session,
            local_addr,
            shutdown,
            tasks: Mutex::new(Some(HostTasks { server, sweeper })),
        })
    }

    /// Address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The hosted session.
    #[must_use]
    pub fn session(&self) -> &Arc<WorkspaceSession> {
        &self.session
    }

    /// Whether the host is still serving.
    pub async fn is_running(&self) -> bool {
        self.tasks.lock().await.is_some()
    }

    /// Stop serving: end the sweep, close live streams, release the port.
    ///
    /// Upgrades that complete while the server drains get an already
    /// closed stream.
    ///
    /// Calling it again after the host has stopped does nothing.
    pub async fn stop(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };

        self.shutdown.cancel();
        let closed = self.session.close_subscribers().await;

        let HostTasks {
            mut server,
            sweeper,
        } = tasks;
        let _ = sweeper.await;

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await.is_err() {
            tracing::warn!("Workspace server did not drain in time, aborting");
            server.abort();
            let _ = server.await;
        }

        tracing::info!(
            "Workspace host on {} stopped ({} live streams closed)",
            self.local_addr,
            closed
        );
    }
}

impl Drop for WorkspaceHost {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn sweep_loop(session: Arc<WorkspaceSession>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                session.sweep().await;
            }
        }
    }
}
