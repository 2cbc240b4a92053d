//! Posts, chat messages and the session history.
//!
//! Posts (shared files and screenshots) are kept newest first, chat messages
//! oldest first. Both logs are append-only for the lifetime of a workspace;
//! nothing is ever edited or removed.

mod storage;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::Identity;

pub use storage::{FileStore, StoredFile};

/// What kind of content a post carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    /// A screen capture
    Screenshot,
    /// Any other file
    #[default]
    File,
}

impl PostKind {
    /// Interpret the `type` field of an upload form.
    ///
    /// Anything other than `screenshot` is a plain file.
    #[must_use]
    pub fn from_form_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("screenshot") {
            Self::Screenshot
        } else {
            Self::File
        }
    }
}

/// A shared file or screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Post identifier
    pub id: Uuid,
    /// Screenshot or file
    #[serde(rename = "type")]
    pub kind: PostKind,
    /// Original file name
    pub filename: String,
    /// MIME type of the content
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    /// Optional caption from the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// When the post was created
    pub created_at: DateTime<Utc>,
    /// Resolved identity of the uploader
    pub sender_identity: Identity,
    /// Where members can fetch the content
    pub download_url: String,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message identifier
    pub id: Uuid,
    /// Message body
    pub text: String,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// Resolved identity of the sender
    pub sender_identity: Identity,
}

/// An upload as received from a member, before it becomes a [`Post`].
#[derive(Debug, Clone, Default)]
pub struct Upload {
    /// File name supplied by the client
    pub filename: String,
    /// MIME type supplied by the client, if any
    pub mime_type: Option<String>,
    /// Screenshot or file
    pub kind: PostKind,
    /// Optional caption
    pub caption: Option<String>,
    /// File content
    pub bytes: Vec<u8>,
}

impl Upload {
    /// MIME type to record: the client's, else a guess from the file name.
    #[must_use]
    pub fn resolved_mime_type(&self) -> String {
        self.mime_type
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map_or_else(
                || {
                    mime_guess::from_path(&self.filename)
                        .first_or_octet_stream()
                        .essence_str()
                        .to_string()
                },
                String::from,
            )
    }
}

/// The post and chat logs of one workspace.
#[derive(Debug, Default)]
pub struct History {
    posts: VecDeque<Post>,
    messages: Vec<ChatMessage>,
    files: HashMap<Uuid, PathBuf>,
}

impl History {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a post in front of all existing ones.
    pub fn push_post(&mut self, post: Post, stored_at: PathBuf) {
        self.files.insert(post.id, stored_at);
        self.posts.push_front(post);
    }

    /// Append a chat message.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// All posts, newest first.
    #[must_use]
    pub fn posts(&self) -> Vec<Post> {
        self.posts.iter().cloned().collect()
    }

    /// All chat messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    /// Find a post and where its content is stored.
    #[must_use]
    pub fn post(&self, id: Uuid) -> Option<(&Post, &PathBuf)> {
        let path = self.files.get(&id)?;
        let post = self.posts.iter().find(|p| p.id == id)?;
        Some((post, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(name: &str) -> Post {
        let id = Uuid::new_v4();
        Post {
            id,
            kind: PostKind::File,
            filename: name.to_string(),
            mime_type: "text/plain".to_string(),
            size: 1,
            caption: None,
            created_at: Utc::now(),
            sender_identity: Identity::device("dev-b"),
            download_url: format!("/api/download/{id}"),
        }
    }

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            text: text.to_string(),
            created_at: Utc::now(),
            sender_identity: Identity::device("dev-b"),
        }
    }

    #[test]
    fn test_posts_newest_first_messages_oldest_first() {
        let mut history = History::new();
        history.push_post(post("a.txt"), PathBuf::from("a"));
        history.push_post(post("b.txt"), PathBuf::from("b"));
        history.push_message(message("one"));
        history.push_message(message("two"));

        let names: Vec<_> = history.posts().into_iter().map(|p| p.filename).collect();
        assert_eq!(names, ["b.txt", "a.txt"]);

        let texts: Vec<_> = history.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["one", "two"]);
    }

    #[test]
    fn test_post_lookup() {
        let mut history = History::new();
        let p = post("a.txt");
        let id = p.id;
        history.push_post(p, PathBuf::from("/tmp/a"));

        let (found, path) = history.post(id).unwrap();
        assert_eq!(found.filename, "a.txt");
        assert_eq!(path, &PathBuf::from("/tmp/a"));
        assert!(history.post(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_post_kind_from_form() {
        assert_eq!(PostKind::from_form_value("screenshot"), PostKind::Screenshot);
        assert_eq!(PostKind::from_form_value("Screenshot "), PostKind::Screenshot);
        assert_eq!(PostKind::from_form_value("file"), PostKind::File);
        assert_eq!(PostKind::from_form_value("anything"), PostKind::File);
    }

    #[test]
    fn test_resolved_mime_type() {
        let upload = Upload {
            filename: "shot.png".into(),
            ..Default::default()
        };
        assert_eq!(upload.resolved_mime_type(), "image/png");

        let upload = Upload {
            filename: "shot.png".into(),
            mime_type: Some("image/webp".into()),
            ..Default::default()
        };
        assert_eq!(upload.resolved_mime_type(), "image/webp");

        let upload = Upload {
            filename: "blob".into(),
            ..Default::default()
        };
        assert_eq!(upload.resolved_mime_type(), "application/octet-stream");
    }

    #[test]
    fn test_post_serialization() {
        let mut p = post("a.txt");
        p.caption = Some("look".into());
        let json = serde_json::to_value(&p).unwrap();

        assert_eq!(json["type"], "file");
        assert_eq!(json["mimeType"], "text/plain");
        assert_eq!(json["caption"], "look");
        assert_eq!(json["senderIdentity"]["deviceName"], "dev-b");
        assert!(json["downloadUrl"].as_str().unwrap().starts_with("/api/download/"));
    }
}
