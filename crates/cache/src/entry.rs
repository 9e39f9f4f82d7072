//! Cache keys and packed entries

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Error, Result};

/// Opaque fingerprint of a task's inputs.
///
/// Produced by an external collaborator; equal inputs yield an equal
/// key. The string form doubles as the entry's file name in the local
/// store, so construction validates that it is usable as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a key from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is empty, names a relative
    /// directory (`.`/`..`), or contains characters unusable in a file
    /// name.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let s = key.into();
        if s.is_empty() {
            return Err(Error::configuration("Cache key must not be empty"));
        }
        if s == "." || s == ".." {
            return Err(Error::configuration(format!(
                "Cache key '{s}' is not a valid entry name"
            )));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::configuration(format!(
                "Cache key '{s}' contains characters unusable in an entry name"
            )));
        }
        Ok(Self(s))
    }

    /// Derive a key by hashing raw fingerprint material.
    #[must_use]
    pub fn from_fingerprint(material: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(material)))
    }

    /// The key's string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A packed cache entry: the deterministic archive bytes produced by
/// [`pack`](crate::pack::pack) and consumed by
/// [`unpack`](crate::pack::unpack) and the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedEntry(Vec<u8>);

impl PackedEntry {
    /// Wrap raw entry bytes (e.g. read back from a store backend).
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The entry bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the entry, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Size of the entry in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the entry holds no bytes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One archived file, as recorded in the entry manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Archived path of the file (`{slot}/{rel_path}`)
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// SHA256 hash of the file contents
    pub sha256: String,
}

/// Integrity manifest stored as the first archive member.
///
/// Lists every file in the entry; directories carry no content and are
/// not listed. Unpacking verifies each restored file against its
/// recorded hash.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryManifest {
    /// Files in archive order
    pub files: Vec<ManifestFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // CacheKey tests
    // ==========================================================================

    #[test]
    fn key_accepts_fingerprint_strings() {
        assert!(CacheKey::new("0123abcd").is_ok());
        assert!(CacheKey::new("build-task_v2.1").is_ok());
    }

    #[test]
    fn key_rejects_strings_unusable_as_file_names() {
        assert!(CacheKey::new("").is_err());
        assert!(CacheKey::new(".").is_err());
        assert!(CacheKey::new("..").is_err());
        assert!(CacheKey::new("a/b").is_err());
        assert!(CacheKey::new("a\\b").is_err());
        assert!(CacheKey::new("a b").is_err());
    }

    #[test]
    fn key_from_fingerprint_is_hex_sha256() {
        let key = CacheKey::from_fingerprint(b"hello world");
        assert_eq!(
            key.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn equal_fingerprints_yield_equal_keys() {
        assert_eq!(
            CacheKey::from_fingerprint(b"same"),
            CacheKey::from_fingerprint(b"same")
        );
        assert_ne!(
            CacheKey::from_fingerprint(b"same"),
            CacheKey::from_fingerprint(b"different")
        );
    }

    #[test]
    fn key_display_matches_string_form() {
        let key = CacheKey::new("abc123").unwrap();
        assert_eq!(key.to_string(), "abc123");
    }

    // ==========================================================================
    // PackedEntry tests
    // ==========================================================================

    #[test]
    fn packed_entry_roundtrips_bytes() {
        let entry = PackedEntry::from_bytes(vec![1, 2, 3]);
        assert_eq!(entry.bytes(), &[1, 2, 3]);
        assert_eq!(entry.len(), 3);
        assert!(!entry.is_empty());
        assert_eq!(entry.into_bytes(), vec![1, 2, 3]);
    }

    // ==========================================================================
    // Manifest tests
    // ==========================================================================

    #[test]
    fn manifest_serde_roundtrip() {
        let manifest = EntryManifest {
            files: vec![ManifestFile {
                path: "0/report.xml".to_string(),
                size: 42,
                sha256: "abc".to_string(),
            }],
        };
        let json = serde_json::to_vec(&manifest).unwrap();
        let parsed: EntryManifest = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.files[0].path, "0/report.xml");
        assert_eq!(parsed.files[0].size, 42);
    }
}
