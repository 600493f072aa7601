//! Task file parsing and serialization.
//!
//! Handles the conversion between raw task files and structured data
//! (YAML frontmatter header + body text).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frontmatter fields of a task file.
///
/// `archived` is deliberately absent: it follows from the file's folder, so
/// archiving and restoring a task never changes its bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHeader {
    pub title: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_priority() -> i64 {
    3
}

/// Parsed task file
#[derive(Debug, Clone)]
pub struct ParsedTask {
    /// Header (None if missing or not valid YAML for a task)
    pub header: Option<TaskHeader>,
    /// Body (everything after the header's blank separator line)
    pub body: String,
}

/// Parse a task file into header and body.
///
/// The header must be delimited by `---` at the start of the file:
/// ```markdown
/// ---
/// title: Launch
/// priority: 2
/// ---
///
/// Ship it.
/// ```
pub fn parse(content: &str) -> ParsedTask {
    let Some(rest) = content.strip_prefix("---") else {
        return ParsedTask {
            header: None,
            body: content.to_string(),
        };
    };

    match rest.find("\n---") {
        Some(pos) => {
            let yaml = rest[..pos].trim();
            let after = &rest[pos + 4..];
            // End of the closing delimiter line, then the blank separator line
            let after = after.strip_prefix('\n').unwrap_or(after);
            let body = after.strip_prefix('\n').unwrap_or(after).to_string();

            match serde_yaml::from_str::<TaskHeader>(yaml) {
                Ok(header) => ParsedTask {
                    header: Some(header),
                    body,
                },
                // Invalid YAML, treat the whole file as body
                Err(_) => ParsedTask {
                    header: None,
                    body: content.to_string(),
                },
            }
        }
        None => ParsedTask {
            header: None,
            body: content.to_string(),
        },
    }
}

/// Serialize header and body back to a task file.
pub fn serialize(header: &TaskHeader, body: &str) -> String {
    let yaml = serde_yaml::to_string(header).unwrap_or_default();
    format!("---\n{}---\n\n{}", yaml, body)
}
