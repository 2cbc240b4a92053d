//! The workspace session.
//!
//! A [`WorkspaceSession`] owns everything that lives for the duration of one
//! hosted workspace: the code, the membership store, the join workflow, the
//! post and chat history and the live subscribers. It is constructed with
//! its collaborators (identity resolver, clock, storage location) injected,
//! so several sessions can coexist in one process.
//!
//! Every operation that acts on behalf of a peer takes the peer's network
//! address and resolves the identity itself. Client-supplied identity claims
//! are never consulted.
//!
//! ## Locking
//!
//! Each store sits behind its own lock, always taken in the order
//! membership, joins, history, subscribers. Identity resolution and file
//! I/O happen before any lock is taken. Events are published while the
//! lock of the store that produced them is still held, which keeps the
//! live stream in the same order as the history; publishing never waits
//! on a subscriber.

mod access;

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::code::WorkspaceCode;
use crate::content::{ChatMessage, FileStore, History, Post, Upload};
use crate::error::{Error, Result};
use crate::events::{Broadcaster, Event, Presence, PresenceStatus, Subscription};
use crate::identity::{Identity, IdentityKey, IdentityResolver};
use crate::join::{JoinRequest, JoinStatus, JoinTimeouts, JoinWorkflow, Submission, SweepReport};
use crate::membership::MembershipStore;

pub use access::{AccessMode, AccessPolicy};

/// The hosted workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Code joining devices must present
    pub code: WorkspaceCode,
    /// When the workspace was started
    pub created_at: DateTime<Utc>,
    /// Identity of the hosting device
    pub host_identity: Identity,
}

/// Workspace state handed to a member on admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// The workspace
    pub workspace: Workspace,
    /// Shared posts, newest first
    pub posts: Vec<Post>,
    /// Chat messages, oldest first
    pub messages: Vec<ChatMessage>,
}

/// Answer to a join request or status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinReply {
    /// The caller is a member
    Approved(Box<Snapshot>),
    /// The host has not decided yet
    Pending {
        /// Identifier to poll with
        #[serde(rename = "requestId")]
        request_id: Uuid,
    },
    /// The host turned the caller away
    Denied,
}

/// A peer whose identity has been resolved by the session.
///
/// Only the session creates callers, so holding one proves the identity was
/// resolved from the peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    identity: Identity,
    key: IdentityKey,
    local: bool,
}

impl Caller {
    /// Resolved identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Normalized identity key.
    #[must_use]
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Whether the caller is the host process's own machine.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local
    }
}

/// A stored post ready to be read back.
#[derive(Debug)]
pub struct Download {
    /// The post
    pub post: Post,
    /// Open handle on the stored content
    pub file: tokio::fs::File,
}

/// Collaborators and limits of a session.
#[derive(Clone)]
pub struct SessionOptions {
    /// Join request expiry windows
    pub timeouts: JoinTimeouts,
    /// Allow-list policy
    pub access: AccessPolicy,
    /// Events buffered per live subscriber
    pub subscriber_buffer: usize,
    /// Directory uploads are stored under
    pub storage_dir: PathBuf,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeouts: JoinTimeouts::default(),
            access: AccessPolicy::default(),
            subscriber_buffer: crate::DEFAULT_SUBSCRIBER_BUFFER,
            storage_dir: std::env::temp_dir().join("tailoverlay-workspace"),
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("timeouts", &self.timeouts)
            .field("access", &self.access)
            .field("subscriber_buffer", &self.subscriber_buffer)
            .field("storage_dir", &self.storage_dir)
            .finish_non_exhaustive()
    }
}

/// One hosted workspace and all of its state.
pub struct WorkspaceSession {
    workspace: Workspace,
    resolver: Arc<dyn IdentityResolver>,
    clock: Arc<dyn Clock>,
    access: AccessPolicy,
    files: FileStore,
    membership: Mutex<MembershipStore>,
    joins: Mutex<JoinWorkflow>,
    history: Mutex<History>,
    broadcaster: Broadcaster,
}

impl WorkspaceSession {
    /// Create a workspace hosted by `host_identity`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] if the host identity is blank.
    pub fn new(
        code: WorkspaceCode,
        host_identity: Identity,
        resolver: Arc<dyn IdentityResolver>,
        options: SessionOptions,
    ) -> Result<Self> {
        let membership = MembershipStore::new(host_identity.clone())?;
        let workspace = Workspace {
            code,
            created_at: options.clock.now(),
            host_identity,
        };

        tracing::info!("Workspace created by {}", workspace.host_identity);

        Ok(Self {
            workspace,
            resolver,
            clock: options.clock,
            access: options.access,
            files: FileStore::new(options.storage_dir),
            membership: Mutex::new(membership),
            joins: Mutex::new(JoinWorkflow::new(options.timeouts)),
            history: Mutex::new(History::new()),
            broadcaster: Broadcaster::new(options.subscriber_buffer),
        })
    }

    /// The workspace this session hosts.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Storage used for uploads.
    #[must_use]
    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Whether `addr` is the host machine itself.
    #[must_use]
    pub fn is_local(addr: IpAddr) -> bool {
        addr.to_canonical().is_loopback()
    }

    /// Resolve the identity behind a peer address.
    ///
    /// Loopback peers are always the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] if the resolver cannot say who
    /// the peer is.
    pub async fn identify(&self, addr: IpAddr) -> Result<Caller> {
        let local = Self::is_local(addr);
        let identity = if local {
            self.workspace.host_identity.clone()
        } else {
            self.resolver.resolve(addr).await.ok_or_else(|| {
                tracing::warn!("Could not resolve identity of {}", addr);
                Error::IdentityUnavailable
            })?
        };
        let key = identity.key().ok_or(Error::IdentityUnavailable)?;
        Ok(Caller {
            identity,
            key,
            local,
        })
    }

    /// Resolve a peer and require it to be a member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] or [`Error::NotAMember`].
    pub async fn require_member(&self, addr: IpAddr) -> Result<Caller> {
        let caller = self.identify(addr).await?;
        if self.membership.lock().await.is_member(&caller.key) {
            Ok(caller)
        } else {
            tracing::debug!("Rejected non-member {}", caller.identity);
            Err(Error::NotAMember)
        }
    }

    /// Whether the identity key is admitted.
    pub async fn is_member(&self, key: &IdentityKey) -> bool {
        self.membership.lock().await.is_member(key)
    }

    /// All members, host included.
    pub async fn members(&self) -> Vec<Identity> {
        self.membership.lock().await.members()
    }

    /// Ask to join the workspace.
    ///
    /// Members get the current snapshot straight away, as do allow-listed
    /// devices, which are admitted on the spot. Anyone else gets a pending
    /// request the host must decide on; asking again while it is pending
    /// returns the same request.
    ///
    /// # Errors
    ///
    /// - [`Error::IdentityUnavailable`] if the caller cannot be identified
    /// - [`Error::InvalidCode`] if the code does not match
    /// - [`Error::NotAMember`] if only allow-listed devices may join
    pub async fn request_join(&self, addr: IpAddr, code: &str) -> Result<JoinReply> {
        let caller = self.identify(addr).await?;
        self.check_code(&caller, code)?;
        let now = self.clock.now();

        let mut membership = self.membership.lock().await;
        if membership.is_member(&caller.key) {
            drop(membership);
            return Ok(JoinReply::Approved(Box::new(self.snapshot().await)));
        }
        if self.access.is_allowed(&caller.identity) {
            membership.admit(caller.identity.clone());
            drop(membership);
            tracing::info!("Admitted allow-listed device {}", caller.identity);
            return Ok(JoinReply::Approved(Box::new(self.snapshot().await)));
        }
        if !self.access.accepts_requests() {
            tracing::debug!("Refused {}: not on the allow-list", caller.identity);
            return Err(Error::NotAMember);
        }

        let mut joins = self.joins.lock().await;
        drop(membership);
        let submission = joins.submit(caller.identity, caller.key, now);
        if let Submission::Created(request) = &submission {
            tracing::info!("Join request {} from {}", request.id, request.identity);
            self.broadcaster
                .publish(&Event::JoinRequest(request.clone()))
                .await;
        }
        Ok(JoinReply::Pending {
            request_id: submission.request().id,
        })
    }

    /// Poll a join request. Only the requester may poll it.
    ///
    /// An approve or deny outcome is reported once; afterwards the request
    /// is unknown.
    ///
    /// # Errors
    ///
    /// - [`Error::IdentityUnavailable`] if the caller cannot be identified
    /// - [`Error::RequestNotAuthorizedForCaller`] if the request is someone else's
    /// - [`Error::RequestNotFound`] if it is unknown, expired or collected
    pub async fn check_status(&self, addr: IpAddr, request_id: Uuid) -> Result<JoinReply> {
        let caller = self.identify(addr).await?;
        let now = self.clock.now();

        let status = self
            .joins
            .lock()
            .await
            .status(request_id, &caller.key, now)?;

        Ok(match status {
            JoinStatus::Pending => JoinReply::Pending { request_id },
            JoinStatus::Approved => JoinReply::Approved(Box::new(self.snapshot().await)),
            JoinStatus::Denied => JoinReply::Denied,
        })
    }

    /// Approve a pending request and admit its identity.
    ///
    /// # Errors
    ///
    /// - [`Error::Forbidden`] unless called from the host machine
    /// - [`Error::RequestNotFound`] if the request is not pending
    pub async fn approve(&self, addr: IpAddr, request_id: Uuid) -> Result<JoinRequest> {
        Self::ensure_local(addr)?;
        let now = self.clock.now();

        let mut membership = self.membership.lock().await;
        let request = self.joins.lock().await.approve(request_id, now)?;
        membership.admit(request.identity.clone());

        tracing::info!("Approved join request {} from {}", request.id, request.identity);
        Ok(request)
    }

    /// Deny a pending request. Membership is left untouched.
    ///
    /// # Errors
    ///
    /// - [`Error::Forbidden`] unless called from the host machine
    /// - [`Error::RequestNotFound`] if the request is not pending
    pub async fn deny(&self, addr: IpAddr, request_id: Uuid) -> Result<JoinRequest> {
        Self::ensure_local(addr)?;
        let now = self.clock.now();

        let request = self.joins.lock().await.deny(request_id, now)?;

        tracing::info!("Denied join request {} from {}", request.id, request.identity);
        Ok(request)
    }

    /// Requests awaiting the host's decision, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Forbidden`] unless called from the host machine.
    pub async fn pending_requests(&self, addr: IpAddr) -> Result<Vec<JoinRequest>> {
        Self::ensure_local(addr)?;
        let mut joins = self.joins.lock().await;
        joins.sweep(self.clock.now());
        Ok(joins.pending_requests())
    }

    /// Join by code alone, without the approval workflow.
    ///
    /// Succeeds for existing members and allow-listed devices; allow-listed
    /// devices are admitted.
    ///
    /// # Errors
    ///
    /// - [`Error::IdentityUnavailable`] if the caller cannot be identified
    /// - [`Error::InvalidCode`] if the code does not match
    /// - [`Error::NotAMember`] for everyone else
    pub async fn legacy_join(&self, addr: IpAddr, code: &str) -> Result<Snapshot> {
        let caller = self.identify(addr).await?;
        self.check_code(&caller, code)?;

        {
            let mut membership = self.membership.lock().await;
            if !membership.is_member(&caller.key) {
                if !self.access.is_allowed(&caller.identity) {
                    return Err(Error::NotAMember);
                }
                membership.admit(caller.identity.clone());
                tracing::info!("Admitted allow-listed device {}", caller.identity);
            }
        }

        Ok(self.snapshot().await)
    }

    /// Post a chat message on behalf of the peer at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if the peer is not a member or the text is blank.
    pub async fn post_chat(&self, addr: IpAddr, text: &str) -> Result<ChatMessage> {
        let caller = self.require_member(addr).await?;
        self.post_chat_as(&caller, text).await
    }

    /// Post a chat message as an already verified member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the text is blank.
    pub async fn post_chat_as(&self, caller: &Caller, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidMessage("chat text is empty".into()));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            text: text.to_string(),
            created_at: self.clock.now(),
            sender_identity: caller.identity.clone(),
        };

        let mut history = self.history.lock().await;
        history.push_message(message.clone());
        self.broadcaster.publish(&Event::Chat(message.clone())).await;
        drop(history);

        tracing::debug!("Chat message from {}", caller.identity);
        Ok(message)
    }

    /// Share a file on behalf of the peer at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if the peer is not a member, the upload is empty or the file
    /// cannot be stored. Nothing is recorded on failure.
    pub async fn upload(&self, addr: IpAddr, upload: Upload) -> Result<Post> {
        let caller = self.require_member(addr).await?;
        self.upload_as(&caller, upload).await
    }

    /// Share a file as an already verified member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoContent`] for an empty upload, or an I/O error if
    /// the file cannot be stored.
    pub async fn upload_as(&self, caller: &Caller, upload: Upload) -> Result<Post> {
        if upload.bytes.is_empty() {
            return Err(Error::NoContent);
        }

        let stored = self.files.store(&upload.filename, &upload.bytes).await?;
        let id = Uuid::new_v4();
        let post = Post {
            id,
            kind: upload.kind,
            filename: upload.filename.clone(),
            mime_type: upload.resolved_mime_type(),
            size: stored.size,
            caption: upload.caption.filter(|c| !c.trim().is_empty()),
            created_at: self.clock.now(),
            sender_identity: caller.identity.clone(),
            download_url: format!("/api/download/{id}"),
        };

        let mut history = self.history.lock().await;
        history.push_post(post.clone(), stored.path);
        self.broadcaster.publish(&Event::PostNew(post.clone())).await;
        drop(history);

        tracing::info!(
            "{} shared {} ({} bytes)",
            caller.identity,
            post.filename,
            post.size
        );
        Ok(post)
    }

    /// Shared posts, newest first.
    ///
    /// # Errors
    ///
    /// Fails if the peer is not a member.
    pub async fn feed(&self, addr: IpAddr) -> Result<Vec<Post>> {
        self.require_member(addr).await?;
        Ok(self.history.lock().await.posts())
    }

    /// Chat messages, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if the peer is not a member.
    pub async fn messages(&self, addr: IpAddr) -> Result<Vec<ChatMessage>> {
        self.require_member(addr).await?;
        Ok(self.history.lock().await.messages())
    }

    /// Open the content of a post.
    ///
    /// # Errors
    ///
    /// Fails if the peer is not a member, or with [`Error::ContentNotFound`]
    /// if there is no such post or its file is gone.
    pub async fn download(&self, addr: IpAddr, post_id: Uuid) -> Result<Download> {
        self.require_member(addr).await?;

        let (post, path) = {
            let history = self.history.lock().await;
            let (post, path) = history
                .post(post_id)
                .ok_or_else(|| Error::ContentNotFound(post_id.to_string()))?;
            (post.clone(), path.clone())
        };

        let file = self.files.open(&path).await?;
        Ok(Download { post, file })
    }

    /// Check that the peer at `addr` may open a live stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityUnavailable`] or [`Error::NotAMember`].
    pub async fn authorize_subscriber(&self, addr: IpAddr) -> Result<Caller> {
        self.require_member(addr).await
    }

    /// Open a live stream for a verified member and announce it.
    pub async fn subscribe(&self, caller: &Caller) -> Subscription {
        let subscription = self.broadcaster.subscribe(caller.identity.clone()).await;
        self.broadcaster
            .publish(&Event::Presence(Presence {
                status: PresenceStatus::Joined,
                identity: caller.identity.clone(),
            }))
            .await;
        tracing::debug!("{} connected to the live stream", caller.identity);
        subscription
    }

    /// Close a live stream and announce the departure.
    pub async fn unsubscribe(&self, subscription_id: Uuid) {
        if let Some(identity) = self.broadcaster.unsubscribe(subscription_id).await {
            tracing::debug!("{} left the live stream", identity);
            self.broadcaster
                .publish(&Event::Presence(Presence {
                    status: PresenceStatus::Left,
                    identity,
                }))
                .await;
        }
    }

    /// Number of open live streams.
    pub async fn subscriber_count(&self) -> usize {
        self.broadcaster.len().await
    }

    /// Drop expired join requests and stale outcomes.
    pub async fn sweep(&self) -> SweepReport {
        let report = self.joins.lock().await.sweep(self.clock.now());
        if report.expired > 0 || report.purged > 0 {
            tracing::debug!(
                "Sweep expired {} requests and purged {} outcomes",
                report.expired,
                report.purged
            );
        }
        report
    }

    /// Close every live stream. Returns how many were open.
    ///
    /// Streams opened afterwards end immediately.
    pub async fn close_subscribers(&self) -> usize {
        self.broadcaster.close_all().await
    }

    /// Current workspace, posts and messages.
    pub async fn snapshot(&self) -> Snapshot {
        let history = self.history.lock().await;
        Snapshot {
            workspace: self.workspace.clone(),
            posts: history.posts(),
            messages: history.messages(),
        }
    }

    fn check_code(&self, caller: &Caller, code: &str) -> Result<()> {
        if self.workspace.code.matches(code) {
            Ok(())
        } else {
            tracing::debug!("Wrong workspace code from {}", caller.identity);
            Err(Error::InvalidCode)
        }
    }

    fn ensure_local(addr: IpAddr) -> Result<()> {
        if Self::is_local(addr) {
            Ok(())
        } else {
            tracing::warn!("Refused host-only operation from {}", addr);
            Err(Error::Forbidden)
        }
    }
}
