//! Task documents as seen by the sync engine.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::markdown::{self, TaskHeader};
use crate::path;
use crate::store::{FileContent, VersionToken};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Priority must be between 1 and 5, got {0}")]
pub struct InvalidPriority(pub i64);

/// Task priority, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(u8);

impl Priority {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Result<Self, InvalidPriority> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(InvalidPriority(value))
        }
    }

    /// Clamp a value read from a file into range.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<i64> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.0 as i64
    }
}

/// Stable handle of a document within a working set.
///
/// Derived from the version token (and path) the document had when it entered
/// the working set. It does not change when the document is later updated or
/// moved, so per-document operation queues keep their key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn derive(token: &VersionToken, path: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(token.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(path.as_bytes());
        let hex = hex::encode(hasher.finalize());
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Derived from the path, see `path::is_archived`
    pub archived: bool,
    pub tags: Vec<String>,
}

/// Metadata changes applied by an update. `None` fields are kept as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
}

impl MetadataUpdate {
    pub fn set_priority(mut self, value: i64) -> Result<Self, InvalidPriority> {
        self.priority = Some(Priority::new(value)?);
        Ok(self)
    }

    pub fn set_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }
}

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub body: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    /// Defaults to the time of the create call
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: Priority::default(),
            tags: Vec::new(),
            created_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// File content for this draft, created at `at`.
    pub fn render(&self, at: DateTime<Utc>) -> String {
        let header = TaskHeader {
            title: self.title.clone(),
            priority: self.priority.into(),
            created_at: Some(at),
            tags: self.tags.clone(),
        };
        markdown::serialize(&header, &self.body)
    }
}

/// A task document in the working set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub body: String,
    pub metadata: TaskMetadata,
    pub path: String,
    pub version_token: VersionToken,
}

impl Document {
    /// Build a document from file bytes read at `path`, with a fresh id.
    pub fn load(path: &str, file: &FileContent) -> Self {
        let id = DocId::derive(&file.version_token, path);
        Self::from_content(id, path, &file.content, file.version_token.clone())
    }

    /// Build a document from file bytes, keeping an existing id.
    ///
    /// Files without a valid header get their title from the file name, the
    /// default priority and a creation date taken from the file name prefix.
    pub fn from_content(id: DocId, path: &str, content: &str, version_token: VersionToken) -> Self {
        let parsed = markdown::parse(content);
        let fallback_created = path::date_prefix(path)
            .map(|date| date.and_time(NaiveTime::MIN).and_utc())
            .unwrap_or(DateTime::UNIX_EPOCH);

        let (title, priority, created_at, tags) = match parsed.header {
            Some(header) => (
                header.title,
                Priority::clamped(header.priority),
                header.created_at.unwrap_or(fallback_created),
                header.tags,
            ),
            None => (
                title_from_path(path),
                Priority::default(),
                fallback_created,
                Vec::new(),
            ),
        };

        Self {
            id,
            title,
            body: parsed.body,
            metadata: TaskMetadata {
                priority,
                created_at,
                archived: path::is_archived(path),
                tags,
            },
            path: path.to_string(),
            version_token,
        }
    }

    /// Serialize back to file content.
    pub fn render(&self) -> String {
        let header = TaskHeader {
            title: self.title.clone(),
            priority: self.metadata.priority.into(),
            created_at: Some(self.metadata.created_at),
            tags: self.metadata.tags.clone(),
        };
        markdown::serialize(&header, &self.body)
    }

    /// Same document after its bytes were stored at `path` with `version_token`.
    pub fn relocated(&self, path: &str, version_token: VersionToken) -> Self {
        let mut document = self.clone();
        document.metadata.archived = path::is_archived(path);
        document.path = path.to_string();
        document.version_token = version_token;
        document
    }

    pub fn is_archived(&self) -> bool {
        self.metadata.archived
    }

    /// Same logical task: identical title and body.
    pub fn same_task(&self, title: &str, body: &str) -> bool {
        self.title == title && self.body == body
    }
}

/// "2025-01-01-launch-plan.md" -> "launch plan"
fn title_from_path(path: &str) -> String {
    let stem = path::file_stem(path);
    let stem = match path::date_prefix(path) {
        Some(_) => stem.get(11..).unwrap_or(""),
        None => stem,
    };
    stem.replace(['-', '_'], " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(content: &str) -> FileContent {
        FileContent {
            content: content.to_string(),
            version_token: crate::store::ContentHash::from_content(content).into_token(),
        }
    }

    #[test]
    fn test_priority_bounds() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(6).is_err());
        assert_eq!(Priority::new(5).unwrap().get(), 5);
        assert_eq!(Priority::clamped(9).get(), 5);
        assert_eq!(Priority::clamped(-3).get(), 1);
    }

    #[test]
    fn test_load_document_with_header() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap();
        let content = TaskDraft::new("Launch", "Ship it.")
            .with_priority(Priority::new(2).unwrap())
            .with_tags(vec!["release".into()])
            .render(at);

        let doc = Document::load("todos/2025-01-01-launch.md", &file(&content));
        assert_eq!(doc.title, "Launch");
        assert_eq!(doc.body, "Ship it.");
        assert_eq!(doc.metadata.priority.get(), 2);
        assert_eq!(doc.metadata.created_at, at);
        assert_eq!(doc.metadata.tags, vec!["release"]);
        assert!(!doc.is_archived());
        assert_eq!(doc.render(), content);
    }

    #[test]
    fn test_archived_follows_path() {
        let content = TaskDraft::new("Launch", "").render(Utc::now());
        let doc = Document::load("todos/archive/2025-01-01-launch.md", &file(&content));
        assert!(doc.is_archived());

        let restored = doc.relocated("todos/2025-01-01-launch.md", doc.version_token.clone());
        assert!(!restored.is_archived());
        assert_eq!(restored.id, doc.id);
    }

    #[test]
    fn test_load_document_without_header() {
        let doc = Document::load("todos/2025-03-04-plan-the-party.md", &file("Just text"));
        assert_eq!(doc.title, "plan the party");
        assert_eq!(doc.body, "Just text");
        assert_eq!(doc.metadata.priority, Priority::default());
        assert_eq!(
            doc.metadata.created_at,
            Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_out_of_range_priority_is_clamped() {
        let content = "---\ntitle: Loud\npriority: 11\n---\n\nbody";
        let doc = Document::load("todos/loud.md", &file(content));
        assert_eq!(doc.metadata.priority.get(), 5);
    }

    #[test]
    fn test_doc_id_depends_on_token_and_path() {
        let token = VersionToken::new("abc");
        assert_eq!(DocId::derive(&token, "a.md"), DocId::derive(&token, "a.md"));
        assert_ne!(DocId::derive(&token, "a.md"), DocId::derive(&token, "b.md"));
        assert_eq!(DocId::derive(&token, "a.md").as_str().len(), 16);
    }
}
