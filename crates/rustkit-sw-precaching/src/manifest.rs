//! Precache manifest entries as injected by build tooling.

use serde::{Deserialize, Serialize};
use std::path::Path;

use rustkit_sw::{Result, SwError};

/// One precache entry: a bare URL or a URL with revision and integrity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrecacheEntry {
    Url(String),
    Entry {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integrity: Option<String>,
    },
}

impl PrecacheEntry {
    /// An entry whose cache key embeds `revision`.
    pub fn revisioned(url: impl Into<String>, revision: impl Into<String>) -> Self {
        PrecacheEntry::Entry {
            url: url.into(),
            revision: Some(revision.into()),
            integrity: None,
        }
    }

    pub fn with_integrity(self, integrity: impl Into<String>) -> Self {
        match self {
            PrecacheEntry::Url(url) => PrecacheEntry::Entry {
                url,
                revision: None,
                integrity: Some(integrity.into()),
            },
            PrecacheEntry::Entry { url, revision, .. } => PrecacheEntry::Entry {
                url,
                revision,
                integrity: Some(integrity.into()),
            },
        }
    }

    pub fn url(&self) -> &str {
        match self {
            PrecacheEntry::Url(url) | PrecacheEntry::Entry { url, .. } => url,
        }
    }

    /// Revision, if present and non-empty.
    pub fn revision(&self) -> Option<&str> {
        match self {
            PrecacheEntry::Entry {
                revision: Some(revision),
                ..
            } if !revision.is_empty() => Some(revision),
            _ => None,
        }
    }

    pub fn integrity(&self) -> Option<&str> {
        match self {
            PrecacheEntry::Entry {
                integrity: Some(integrity),
                ..
            } if !integrity.is_empty() => Some(integrity),
            _ => None,
        }
    }
}

impl From<&str> for PrecacheEntry {
    fn from(url: &str) -> Self {
        PrecacheEntry::Url(url.to_string())
    }
}

impl From<String> for PrecacheEntry {
    fn from(url: String) -> Self {
        PrecacheEntry::Url(url)
    }
}

/// The full list of entries for one worker version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrecacheManifest {
    pub entries: Vec<PrecacheEntry>,
}

impl PrecacheManifest {
    /// Parse a JSON array of entries.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SwError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for PrecacheManifest {
    type Item = PrecacheEntry;
    type IntoIter = std::vec::IntoIter<PrecacheEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_from_json() {
        let manifest = PrecacheManifest::from_json_str(
            r#"[
                "/offline.html",
                {"url": "/app.js", "revision": "abc123"},
                {"url": "/lib.js", "revision": null, "integrity": "sha256-xyz"}
            ]"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest.entries[0], PrecacheEntry::from("/offline.html"));
        assert_eq!(manifest.entries[1], PrecacheEntry::revisioned("/app.js", "abc123"));
        assert_eq!(manifest.entries[2].revision(), None);
        assert_eq!(manifest.entries[2].integrity(), Some("sha256-xyz"));
    }

    #[test]
    fn test_empty_revision_counts_as_missing() {
        let entry = PrecacheEntry::revisioned("/a", "");
        assert_eq!(entry.revision(), None);
    }

    #[test]
    fn test_invalid_manifest_is_config_error() {
        let err = PrecacheManifest::from_json_str(r#"{"url": "/a"}"#).unwrap_err();
        assert!(matches!(err, SwError::Config(_)));
    }
}
