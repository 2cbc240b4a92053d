//! # TailOverlay Core Library
//!
//! `tailoverlay-core` implements the workspace session coordinator behind
//! TailOverlay: one device hosts a short-lived workspace identified by a
//! six digit code, other devices on the same private overlay network ask to
//! join, and admitted members exchange files, screenshots and chat messages
//! in real time.
//!
//! ## Modules
//!
//! - [`code`] - Workspace code generation and validation
//! - [`config`] - Configuration management
//! - [`content`] - Posts, chat messages and uploaded file storage
//! - [`events`] - Live event envelopes and subscriber fan-out
//! - [`identity`] - Peer identities and identity resolution
//! - [`join`] - Join request approval workflow
//! - [`membership`] - Admitted identities of a workspace
//! - [`session`] - The workspace session object tying everything together
//! - [`web`] - HTTP and WebSocket surface, host lifecycle
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tailoverlay_core::code::WorkspaceCode;
//! use tailoverlay_core::identity::TailscaleResolver;
//! use tailoverlay_core::session::{SessionOptions, WorkspaceSession};
//! use tailoverlay_core::web::{HostOptions, WorkspaceHost};
//!
//! let resolver = Arc::new(TailscaleResolver::new());
//! let host_identity = resolver.local_identity().await;
//! let session = WorkspaceSession::new(
//!     WorkspaceCode::generate(),
//!     host_identity,
//!     resolver,
//!     SessionOptions::default(),
//! )?;
//! let host = WorkspaceHost::start(Arc::new(session), HostOptions::default()).await?;
//! println!("Listening on {}", host.local_addr());
//! host.stop().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod clock;
pub mod code;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod identity;
pub mod join;
pub mod membership;
pub mod session;
pub mod web;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Well-known port of the host service
pub const DEFAULT_PORT: u16 = 4173;

/// How long a join request may stay pending before it expires (10 minutes)
pub const DEFAULT_PENDING_TTL_SECS: u64 = 10 * 60;

/// How long an approved/denied outcome is kept for polling (5 minutes)
pub const DEFAULT_COMPLETED_TTL_SECS: u64 = 5 * 60;

/// Interval of the background join request sweep
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Events buffered per live subscriber before it is considered too slow
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Maximum accepted upload size (50 MiB)
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Environment variable holding a comma-separated device allow-list
pub const ALLOWED_DEVICES_ENV: &str = "TAILOVERLAY_ALLOWED_DEVICES";
