//! In-memory session state: which image is which, and what the user decided.
//!
//! The `SessionLedger` maps each image to the latest decision and tags. It is
//! written only from the control thread (by the tag pipeline and the
//! decision-recording path) and read wholesale by the commit step.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Stable identity of an image within a session.
///
/// Paths are unique inside a working folder, so the path doubles as the
/// identity used to correlate in-flight AI requests with the image they were
/// issued for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(PathBuf);

impl ImageId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// File name for status lines and the commit log.
    pub fn file_name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.display().to_string())
    }
}

/// The user's verdict on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Delete,
    /// AI tags arrived before the user decided anything.
    Unset,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Keep => "KEEP",
            Decision::Delete => "DELETE",
            Decision::Unset => "UNSET",
        }
    }
}

/// Latest decision and tags for one image.
///
/// Born on the first AI completion or the first keep/delete; overwritten on
/// later decisions; never removed until the session resets.
#[derive(Debug, Clone)]
pub struct TagRecord {
    pub action: Decision,
    /// Merged tag text (manual first, AI appended) as written on decision.
    pub tags: String,
    /// AI tags in insertion order, duplicates suppressed.
    pub ai_tags: Vec<String>,
}

impl TagRecord {
    fn empty() -> Self {
        Self {
            action: Decision::Unset,
            tags: String::new(),
            ai_tags: Vec::new(),
        }
    }
}

/// Mapping from image identity to its `TagRecord`.
#[derive(Debug, Default)]
pub struct SessionLedger {
    records: HashMap<ImageId, TagRecord>,
}

impl SessionLedger {
    pub fn get(&self, id: &ImageId) -> Option<&TagRecord> {
        self.records.get(id)
    }

    /// Replace the AI tags for an image, creating an undecided record if
    /// none exists yet. Prior AI tags for the image are replaced, not
    /// appended to.
    pub fn set_ai_tags(&mut self, id: &ImageId, tags: Vec<String>) {
        let record = self
            .records
            .entry(id.clone())
            .or_insert_with(TagRecord::empty);
        record.ai_tags = tags;
    }

    /// Overwrite the record for an image with a keep/delete decision.
    pub fn record_decision(
        &mut self,
        id: &ImageId,
        action: Decision,
        tags: String,
        ai_tags: Vec<String>,
    ) {
        self.records.insert(
            id.clone(),
            TagRecord {
                action,
                tags,
                ai_tags,
            },
        );
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ImageId, &TagRecord)> {
        self.records.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Drop every record. Used on folder re-selection and after commit.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Split comma-separated text into tags: trimmed, empties dropped, order
/// preserved, exact duplicates suppressed.
pub fn parse_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for piece in text.split(',') {
        let tag = piece.trim();
        if tag.is_empty() {
            continue;
        }
        if tags.iter().any(|t| t == tag) {
            continue;
        }
        tags.push(tag.to_string());
    }
    tags
}

/// Merge manual tag text with AI tags: manual first, AI joined by `", "`,
/// the separator inserted only when both sides are non-empty.
pub fn merge_tag_text(manual: &str, ai_tags: &[String]) -> String {
    let manual = manual.trim();
    if ai_tags.is_empty() {
        return manual.to_string();
    }
    let joined = ai_tags.join(", ");
    if manual.is_empty() {
        joined
    } else {
        format!("{manual}, {joined}")
    }
}

/// Append raw text to an existing manual tag field (dictation fallback).
pub fn append_tag_text(existing: &str, addition: &str) -> String {
    let existing = existing.trim();
    if existing.is_empty() {
        addition.to_string()
    } else {
        format!("{existing}, {addition}")
    }
}
