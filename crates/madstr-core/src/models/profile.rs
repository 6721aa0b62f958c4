use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::constants::AUTHOR_LABEL_PREFIX_LEN;

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parsed content of a kind:0 metadata event. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileDocument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

impl ProfileDocument {
    /// Parse a kind:0 `content` string.
    ///
    /// Empty content and malformed JSON both yield `None`; callers treat that
    /// the same as "no profile".
    pub fn parse(content: &str) -> Option<Self> {
        if content.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<ProfileDocument>(content) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to parse profile content");
                None
            }
        }
    }
}

/// Best known identity of one author.
///
/// `is_loading` is transient: the persistent cache has no column for it and
/// every record read back from the cache has it cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRecord {
    pub author_id: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub fetched_at: u64,
    pub is_loading: bool,
}

impl ProfileRecord {
    /// Resolved record with no known profile fields
    pub fn unknown(author_id: &str) -> Self {
        Self {
            author_id: author_id.to_string(),
            ..Default::default()
        }
    }

    /// Placeholder published while a network fetch is pending
    pub fn loading(author_id: &str) -> Self {
        Self {
            author_id: author_id.to_string(),
            is_loading: true,
            ..Default::default()
        }
    }

    pub fn from_document(author_id: &str, doc: ProfileDocument, fetched_at: u64) -> Self {
        let mut record = Self::unknown(author_id);
        record.merge(doc, fetched_at);
        record
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Merge a freshly parsed document into this record.
    ///
    /// `name` and `picture` only replace the existing value when the incoming
    /// document defines a non-empty one. `display_name` is overwritten as-is.
    pub fn merge(&mut self, doc: ProfileDocument, fetched_at: u64) {
        if let Some(name) = doc.name.filter(|n| !n.is_empty()) {
            self.name = Some(name);
        }
        if let Some(picture) = doc.picture.filter(|p| !p.is_empty()) {
            self.picture_url = Some(picture);
        }
        self.display_name = doc.display_name;
        self.fetched_at = fetched_at;
        self.is_loading = false;
    }

    /// Copy with `is_loading` cleared, the only shape that may be persisted
    pub fn settled(&self) -> Self {
        Self {
            is_loading: false,
            ..self.clone()
        }
    }
}

/// Label shown next to a reply: name, then display name, then a shortened id.
pub fn display_label(profile: Option<&ProfileRecord>, author_id: &str) -> String {
    if let Some(profile) = profile {
        if let Some(name) = profile.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        if let Some(name) = profile.display_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
    }
    let prefix: String = author_id.chars().take(AUTHOR_LABEL_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

/// Two-character avatar fallback derived from the label
pub fn author_initials(label: &str) -> String {
    label.chars().take(2).collect::<String>().to_uppercase()
}
