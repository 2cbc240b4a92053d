//! Join request approval workflow.
//!
//! Every join attempt from an identity that is not yet a member becomes a
//! [`JoinRequest`] which the host either approves or denies.
//!
//! ## Lifecycle
//!
//! | State | Leaves by | Next |
//! |-------|-----------|------|
//! | pending | host approves | approved |
//! | pending | host denies | denied |
//! | pending | pending TTL elapses | gone (expired) |
//! | approved / denied | requester polls once | gone |
//! | approved / denied | completed TTL elapses | gone |
//!
//! At most one request is pending per identity key; asking again while a
//! request is pending hands back the same request. Expiry is applied lazily
//! at the start of every operation as well as by a periodic sweep, so stale
//! state is never served.
//!
//! The workflow is plain data. The session wraps it in a lock and passes
//! the current time in.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identity::{Identity, IdentityKey};

/// A join attempt awaiting the host's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Request identifier handed to the requester for polling
    pub id: Uuid,
    /// Identity of the requester
    pub identity: Identity,
    /// Normalized key of the requester
    pub identity_key: IdentityKey,
    /// When the request was created
    pub requested_at: DateTime<Utc>,
}

/// Final outcome of a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The host admitted the requester
    Approved,
    /// The host turned the requester away
    Denied,
}

/// What a requester observes when polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    /// Still waiting for the host
    Pending,
    /// Admitted
    Approved,
    /// Turned away
    Denied,
}

impl From<Decision> for JoinStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => Self::Approved,
            Decision::Denied => Self::Denied,
        }
    }
}

/// Result of submitting a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A new pending request was created
    Created(JoinRequest),
    /// A request for this identity was already pending
    Existing(JoinRequest),
}

impl Submission {
    /// The pending request, new or existing.
    #[must_use]
    pub fn request(&self) -> &JoinRequest {
        match self {
            Self::Created(r) | Self::Existing(r) => r,
        }
    }
}

/// Expiry windows for join requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTimeouts {
    /// How long a request may stay pending
    pub pending_ttl: Duration,
    /// How long a decision stays available for polling
    pub completed_ttl: Duration,
}

impl Default for JoinTimeouts {
    #[allow(clippy::cast_possible_wrap)]
    fn default() -> Self {
        Self {
            pending_ttl: Duration::seconds(crate::DEFAULT_PENDING_TTL_SECS as i64),
            completed_ttl: Duration::seconds(crate::DEFAULT_COMPLETED_TTL_SECS as i64),
        }
    }
}

/// Counts of what a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending requests that expired
    pub expired: usize,
    /// Decided requests that were purged
    pub purged: usize,
}

#[derive(Debug, Clone)]
struct CompletedRequest {
    request: JoinRequest,
    decision: Decision,
    decided_at: DateTime<Utc>,
}

/// Pending and recently decided join requests.
#[derive(Debug, Default)]
pub struct JoinWorkflow {
    timeouts: JoinTimeouts,
    pending: HashMap<Uuid, JoinRequest>,
    pending_by_key: HashMap<IdentityKey, Uuid>,
    completed: HashMap<Uuid, CompletedRequest>,
}

impl JoinWorkflow {
    /// Create an empty workflow with the given expiry windows.
    #[must_use]
    pub fn new(timeouts: JoinTimeouts) -> Self {
        Self {
            timeouts,
            ..Self::default()
        }
    }

    /// Record a join attempt, reusing the pending request of the same
    /// identity if there is one.
    pub fn submit(
        &mut self,
        identity: Identity,
        key: IdentityKey,
        now: DateTime<Utc>,
    ) -> Submission {
        self.sweep(now);

        if let Some(existing) = self
            .pending_by_key
            .get(&key)
            .and_then(|id| self.pending.get(id))
        {
            return Submission::Existing(existing.clone());
        }

        let request = JoinRequest {
            id: Uuid::new_v4(),
            identity,
            identity_key: key.clone(),
            requested_at: now,
        };
        self.pending_by_key.insert(key, request.id);
        self.pending.insert(request.id, request.clone());
        Submission::Created(request)
    }

    /// Poll a request on behalf of `caller`.
    ///
    /// A decided request is handed out once and then forgotten.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestNotAuthorizedForCaller`] if the request belongs to
    ///   someone else, whatever its state
    /// - [`Error::RequestNotFound`] if it is unknown, expired or already
    ///   collected
    pub fn status(
        &mut self,
        id: Uuid,
        caller: &IdentityKey,
        now: DateTime<Utc>,
    ) -> Result<JoinStatus> {
        self.sweep(now);

        if let Some(request) = self.pending.get(&id) {
            ensure_owner(&request.identity_key, caller)?;
            return Ok(JoinStatus::Pending);
        }

        let completed = self.completed.get(&id).ok_or(Error::RequestNotFound)?;
        ensure_owner(&completed.request.identity_key, caller)?;
        let decision = completed.decision;
        self.completed.remove(&id);
        Ok(decision.into())
    }

    /// Approve a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestNotFound`] if the request is not pending.
    pub fn approve(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<JoinRequest> {
        self.decide(id, Decision::Approved, now)
    }

    /// Deny a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestNotFound`] if the request is not pending.
    pub fn deny(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<JoinRequest> {
        self.decide(id, Decision::Denied, now)
    }

    fn decide(&mut self, id: Uuid, decision: Decision, now: DateTime<Utc>) -> Result<JoinRequest> {
        self.sweep(now);

        let request = self.pending.remove(&id).ok_or(Error::RequestNotFound)?;
        self.pending_by_key.remove(&request.identity_key);
        self.completed.insert(
            id,
            CompletedRequest {
                request: request.clone(),
                decision,
                decided_at: now,
            },
        );
        Ok(request)
    }

    /// Drop expired pending requests and stale decisions.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let pending_ttl = self.timeouts.pending_ttl;
        let completed_ttl = self.timeouts.completed_ttl;

        let expired: Vec<Uuid> = self
            .pending
            .values()
            .filter(|r| now - r.requested_at >= pending_ttl)
            .map(|r| r.id)
            .collect();
        for id in &expired {
            if let Some(request) = self.pending.remove(id) {
                self.pending_by_key.remove(&request.identity_key);
                tracing::info!("Join request from {} expired", request.identity);
            }
        }

        let before = self.completed.len();
        self.completed.retain(|_, c| now - c.decided_at < completed_ttl);

        SweepReport {
            expired: expired.len(),
            purged: before - self.completed.len(),
        }
    }

    /// Pending requests, oldest first.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<JoinRequest> {
        let mut requests: Vec<_> = self.pending.values().cloned().collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }

    /// Whether a request for this key is pending.
    #[must_use]
    pub fn is_pending(&self, key: &IdentityKey) -> bool {
        self.pending_by_key.contains_key(key)
    }
}

fn ensure_owner(owner: &IdentityKey, caller: &IdentityKey) -> Result<()> {
    if owner == caller {
        Ok(())
    } else {
        Err(Error::RequestNotAuthorizedForCaller)
    }
}
