//! Title to path resolution.
//!
//! Task files are named `<folder>/<YYYY-MM-DD>-<slug>.md`. When that name is
//! taken by another document, `-2`, `-3`, ... are appended until a free name is
//! found. Archived tasks live in `<folder>/archive/` under the same file name.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use crate::config::{ARCHIVE_DIR, MAX_SLUG_LEN};
use crate::store::{RemoteStore, StoreError};

pub const TASK_EXTENSION: &str = ".md";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("Title produces an empty slug")]
    EmptySlug,

    #[error("No free path for '{slug}' in {folder} after {attempts} attempts")]
    Exhausted {
        folder: String,
        slug: String,
        attempts: u32,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Normalize a title into a file-name-safe slug.
///
/// Lowercases, drops everything but ASCII letters, digits, whitespace and
/// hyphens, turns whitespace runs into single hyphens, collapses repeated
/// hyphens, trims hyphens at both ends and truncates to `MAX_SLUG_LEN`.
/// Titles without any usable character produce an empty string.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        let c = match c {
            'a'..='z' | '0'..='9' | '-' => c,
            c if c.is_whitespace() => '-',
            _ => continue,
        };
        // Skips leading hyphens and collapses runs
        if c == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(c);
    }
    // ASCII only at this point, so byte truncation is char truncation
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

/// `YYYY-MM-DD` stamp used as the file name prefix.
pub fn date_stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// The n-th candidate path (1-based) for a slug.
pub fn candidate_path(folder: &str, date_stamp: &str, slug: &str, n: u32) -> String {
    let stem = if n <= 1 {
        format!("{}-{}", date_stamp, slug)
    } else {
        format!("{}-{}-{}", date_stamp, slug, n)
    };
    if folder.is_empty() {
        format!("{}{}", stem, TASK_EXTENSION)
    } else {
        format!("{}/{}{}", folder, stem, TASK_EXTENSION)
    }
}

/// Find a path for `slug` that does not collide with another live document.
///
/// A name counts as taken when it exists in `folder` or in its archive
/// counterpart, so archiving or restoring a task never lands on another one.
/// `own_path` is the current path of the document being resolved (for renames);
/// hitting it is not a collision. Listings can lag behind writes, so names that
/// are missing from the listing are confirmed with a read before being handed out.
pub async fn resolve_path<S: RemoteStore + ?Sized>(
    store: &S,
    folder: &str,
    date_stamp: &str,
    slug: &str,
    own_path: Option<&str>,
    max_attempts: u32,
) -> Result<String, PathError> {
    if slug.is_empty() {
        return Err(PathError::EmptySlug);
    }

    let listed = list_files(store, folder).await?;
    let first = candidate_path(folder, date_stamp, slug, 1);
    let twin_folder = parent_folder(&counterpart(&first)).to_string();
    let listed_twins = list_files(store, &twin_folder).await?;

    for n in 1..=max_attempts {
        let candidate = candidate_path(folder, date_stamp, slug, n);
        if own_path == Some(candidate.as_str()) {
            return Ok(candidate);
        }
        if is_taken(store, &listed, &candidate).await? {
            continue;
        }
        let twin = counterpart(&candidate);
        if own_path != Some(twin.as_str()) && is_taken(store, &listed_twins, &twin).await? {
            continue;
        }
        return Ok(candidate);
    }

    Err(PathError::Exhausted {
        folder: folder.to_string(),
        slug: slug.to_string(),
        attempts: max_attempts,
    })
}

/// File paths listed in `folder`. A folder that doesn't exist yet has none.
async fn list_files<S: RemoteStore + ?Sized>(
    store: &S,
    folder: &str,
) -> Result<HashSet<String>, PathError> {
    match store.list_directory(folder).await {
        Ok(entries) => Ok(entries
            .into_iter()
            .filter(|e| e.is_file())
            .map(|e| e.path)
            .collect()),
        Err(e) if e.is_not_found() => Ok(HashSet::new()),
        Err(e) => Err(e.into()),
    }
}

async fn is_taken<S: RemoteStore + ?Sized>(
    store: &S,
    listed: &HashSet<String>,
    path: &str,
) -> Result<bool, PathError> {
    if listed.contains(path) {
        debug!(path, "Candidate path taken (listed)");
        return Ok(true);
    }
    match store.read_file(path).await {
        Err(e) if e.is_not_found() => Ok(false),
        Ok(_) => {
            debug!(path, "Candidate path taken (not yet listed)");
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

/// Parent folder of a path ("" for top-level files).
pub fn parent_folder(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// File name without the task extension.
pub fn file_stem(path: &str) -> &str {
    let name = file_name(path);
    name.strip_suffix(TASK_EXTENSION).unwrap_or(name)
}

/// Date stamp at the start of a task file name, if any.
pub fn date_prefix(path: &str) -> Option<NaiveDate> {
    let stem = file_stem(path);
    let prefix = stem.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Whether a path lies under an archive folder.
pub fn is_archived(path: &str) -> bool {
    parent_folder(path).split('/').any(|segment| segment == ARCHIVE_DIR)
}

/// Path of the file once archived. Archived paths are returned unchanged.
pub fn archive_path(path: &str) -> String {
    if is_archived(path) {
        return path.to_string();
    }
    match parent_folder(path) {
        "" => format!("{}/{}", ARCHIVE_DIR, file_name(path)),
        parent => format!("{}/{}/{}", parent, ARCHIVE_DIR, file_name(path)),
    }
}

/// The same file name on the other side of the archive.
pub fn counterpart(path: &str) -> String {
    if is_archived(path) {
        unarchive_path(path)
    } else {
        archive_path(path)
    }
}

/// Path of the file once restored from the archive. Active paths are returned unchanged.
pub fn unarchive_path(path: &str) -> String {
    if !is_archived(path) {
        return path.to_string();
    }
    let mut segments: Vec<&str> = path.split('/').collect();
    let name_index = segments.len() - 1;
    if let Some(index) = segments[..name_index]
        .iter()
        .rposition(|segment| *segment == ARCHIVE_DIR)
    {
        segments.remove(index);
    }
    segments.join("/")
}
