//! Live event envelopes and fan-out to connected subscribers.
//!
//! Every live connection owns a bounded outbound queue. Publishing
//! serializes the envelope once and pushes it into each queue without
//! waiting, so a slow or dead subscriber never holds up the caller or the
//! other subscribers. A subscriber whose queue is full is disconnected
//! rather than silently skipped, which keeps every delivered stream a
//! gap-free prefix of the published order.
//!
//! ## Envelopes
//!
//! | `type` | `data` |
//! |--------|--------|
//! | `chat` | [`ChatMessage`] |
//! | `post:new` | [`Post`] |
//! | `presence` | [`Presence`] |
//! | `join:request` | [`JoinRequest`] |

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::content::{ChatMessage, Post};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::join::JoinRequest;

/// An event delivered to every live subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A chat message was posted
    #[serde(rename = "chat")]
    Chat(ChatMessage),
    /// A file or screenshot was shared
    #[serde(rename = "post:new")]
    PostNew(Post),
    /// A member connected to or left the live stream
    #[serde(rename = "presence")]
    Presence(Presence),
    /// Someone asked to join and awaits the host's decision
    #[serde(rename = "join:request")]
    JoinRequest(JoinRequest),
}

impl Event {
    /// The envelope `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::PostNew(_) => "post:new",
            Self::Presence(_) => "presence",
            Self::JoinRequest(_) => "join:request",
        }
    }
}

/// Presence change of a live subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Joined or left
    pub status: PresenceStatus,
    /// Who joined or left
    pub identity: Identity,
}

/// Direction of a presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Connected to the live stream
    Joined,
    /// Disconnected from the live stream
    Left,
}

/// A message sent by a client over its live connection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Post a chat message
    Chat {
        /// Message body
        text: String,
    },
}

impl ClientMessage {
    /// Decode and validate a client frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] for unknown types, missing fields or
    /// blank chat text.
    pub fn decode(frame: &str) -> Result<Self> {
        let message: Self =
            serde_json::from_str(frame).map_err(|e| Error::InvalidMessage(e.to_string()))?;
        match &message {
            Self::Chat { text } if text.trim().is_empty() => {
                Err(Error::InvalidMessage("chat text is empty".into()))
            }
            Self::Chat { .. } => Ok(message),
        }
    }
}

/// Receiving half of a live subscription.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    identity: Identity,
    rx: mpsc::Receiver<Arc<str>>,
}

impl Subscription {
    /// Subscriber identifier, used to unsubscribe.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Identity the subscription was admitted as.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Wait for the next serialized envelope.
    ///
    /// Returns `None` once the subscriber has been closed.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Wait for the next envelope and decode it.
    pub async fn next_event(&mut self) -> Option<Event> {
        let frame = self.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Split into identifier and queue.
    #[must_use]
    pub fn into_parts(self) -> (Uuid, mpsc::Receiver<Arc<str>>) {
        (self.id, self.rx)
    }
}

/// A registered subscriber. `tx` is `None` once the broadcaster has cut
/// the stream; the entry stays until `unsubscribe` so the departure can
/// still be announced.
#[derive(Debug)]
struct Subscriber {
    identity: Identity,
    tx: Option<mpsc::Sender<Arc<str>>>,
}

#[derive(Debug, Default)]
struct Subscribers {
    entries: HashMap<Uuid, Subscriber>,
    closed: bool,
}

impl Subscribers {
    fn live(&self) -> usize {
        self.entries.values().filter(|s| s.tx.is_some()).count()
    }
}

/// Set of live subscribers.
#[derive(Debug)]
pub struct Broadcaster {
    buffer: usize,
    subscribers: Mutex<Subscribers>,
}

impl Broadcaster {
    /// Create a broadcaster whose subscribers buffer up to `buffer` events.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Register a new subscriber.
    ///
    /// After [`close_all`](Self::close_all) the returned stream is already
    /// ended.
    pub async fn subscribe(&self, identity: Identity) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        let mut subscribers = self.subscribers.lock().await;
        let tx = (!subscribers.closed).then_some(tx);
        subscribers.entries.insert(
            id,
            Subscriber {
                identity: identity.clone(),
                tx,
            },
        );
        Subscription { id, identity, rx }
    }

    /// Remove a subscriber. Returns its identity if it was still registered,
    /// including when its stream had already been cut.
    pub async fn unsubscribe(&self, id: Uuid) -> Option<Identity> {
        self.subscribers
            .lock()
            .await
            .entries
            .remove(&id)
            .map(|s| s.identity)
    }

    /// Deliver an event to every subscriber. Returns how many accepted it.
    ///
    /// Never waits on a subscriber. Subscribers that are gone or too far
    /// behind have their stream cut.
    pub async fn publish(&self, event: &Event) -> usize {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!("Failed to serialize {} event: {}", event.kind(), e);
                return 0;
            }
        };

        let mut subscribers = self.subscribers.lock().await;
        let mut delivered = 0;
        for (id, subscriber) in &mut subscribers.entries {
            let Some(tx) = &subscriber.tx else { continue };
            match tx.try_send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Disconnecting slow subscriber {} ({})",
                        id,
                        subscriber.identity
                    );
                    subscriber.tx = None;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => subscriber.tx = None,
            }
        }

        tracing::debug!("Published {} event to {} subscribers", event.kind(), delivered);
        delivered
    }

    /// Cut every stream and refuse new ones. Returns how many were live.
    pub async fn close_all(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.closed = true;
        let count = subscribers.live();
        for subscriber in subscribers.entries.values_mut() {
            subscriber.tx = None;
        }
        count
    }

    /// Number of live subscribers.
    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.live()
    }

    /// Whether nobody is subscribed.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SUBSCRIBER_BUFFER)
    }
}
