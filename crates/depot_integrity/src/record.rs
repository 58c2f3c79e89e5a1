//! Hash records and the sidecar file format.
//!
//! The sidecar is a pretty-printed JSON object keyed by the cached path:
//!
//! ```json
//! {
//!   "mods/a.zip": {
//!     "size": 100,
//!     "modified_at": "2024-05-01T10:00:00.123456789Z",
//!     "digest": "3a6eb079..."
//!   }
//! }
//! ```
//!
//! Keys are written in sorted order so an untouched table saves to the same
//! bytes it was loaded from.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IntegrityError;

/// Last known state of a cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    /// Path relative to the cache root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the content.
    pub digest: String,
}

impl HashRecord {
    /// Whether the record still describes a file with this size and mtime.
    pub fn matches(&self, size: u64, modified_at: DateTime<Utc>) -> bool {
        self.size == size && self.modified_at == modified_at
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SidecarEntry {
    size: u64,
    modified_at: DateTime<Utc>,
    digest: String,
}

/// Reads a sidecar file.
///
/// A missing file is an empty table. Anything unparseable is
/// [`IntegrityError::Corrupt`].
pub fn load_table(path: &Path) -> Result<HashMap<String, HashRecord>, IntegrityError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(IntegrityError::io("read", path, e)),
    };

    let entries: BTreeMap<String, SidecarEntry> =
        serde_json::from_slice(&data).map_err(|source| IntegrityError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(entries
        .into_iter()
        .map(|(path, entry)| {
            let record = HashRecord {
                path: path.clone(),
                size: entry.size,
                modified_at: entry.modified_at,
                digest: entry.digest,
            };
            (path, record)
        })
        .collect())
}

/// Writes a complete sidecar snapshot.
///
/// The data goes to `<path>.tmp` first and is renamed over the sidecar, so a
/// concurrent reader sees either the old or the new snapshot.
pub fn save_table<'a>(
    path: &Path,
    records: impl IntoIterator<Item = &'a HashRecord>,
) -> Result<(), IntegrityError> {
    let entries: BTreeMap<&str, SidecarEntry> = records
        .into_iter()
        .map(|record| {
            let entry = SidecarEntry {
                size: record.size,
                modified_at: record.modified_at,
                digest: record.digest.clone(),
            };
            (record.path.as_str(), entry)
        })
        .collect();

    let data = serde_json::to_vec_pretty(&entries).map_err(|e| IntegrityError::Io {
        op: "serialize",
        path: path.to_path_buf(),
        source: io::Error::other(e),
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IntegrityError::io("mkdir", parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, data).map_err(|e| IntegrityError::io("write", &tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        IntegrityError::io("rename", path, e)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(path: &str, size: u64, nanos: u32) -> HashRecord {
        HashRecord {
            path: path.to_string(),
            size,
            modified_at: Utc.timestamp_opt(1_700_000_000, nanos).unwrap(),
            digest: format!("{:064x}", size),
        }
    }

    #[test]
    fn test_missing_sidecar_is_empty() {
        let temp = TempDir::new().unwrap();
        let table = load_table(&temp.path().join(".integrity")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_records() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join(".integrity");
        let records = vec![
            record("mods/a.zip", 100, 123_456_789),
            record("mods/b.zip", 2048, 0),
            record("smr/c.zip", 7, 999_999_999),
        ];

        save_table(&sidecar, &records).unwrap();
        let table = load_table(&sidecar).unwrap();

        assert_eq!(table.len(), records.len());
        for expected in &records {
            assert_eq!(table.get(&expected.path), Some(expected));
        }
    }

    #[test]
    fn test_save_is_stable() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join(".integrity");
        let records = vec![record("b", 1, 1), record("a", 2, 2)];

        save_table(&sidecar, &records).unwrap();
        let first = fs::read(&sidecar).unwrap();

        let table = load_table(&sidecar).unwrap();
        save_table(&sidecar, table.values()).unwrap();
        let second = fs::read(&sidecar).unwrap();

        assert_eq!(first, second);
        assert!(!temp.path().join(".integrity.tmp").exists());
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join(".integrity");
        fs::write(&sidecar, b"{not json").unwrap();

        let err = load_table(&sidecar).unwrap_err();
        assert!(matches!(err, IntegrityError::Corrupt { .. }));
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join(".integrity");
        fs::write(&sidecar, br#"{"mods/a.zip": {"Hash": "abc"}}"#).unwrap();

        assert!(matches!(
            load_table(&sidecar),
            Err(IntegrityError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_matches() {
        let r = record("a", 10, 5);
        assert!(r.matches(10, r.modified_at));
        assert!(!r.matches(11, r.modified_at));
        assert!(!r.matches(10, Utc.timestamp_opt(1_700_000_000, 6).unwrap()));
    }
}
