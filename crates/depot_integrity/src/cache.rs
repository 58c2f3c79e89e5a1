use std::fs::{self, File, Metadata};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::IntegrityConfig;
use crate::error::IntegrityError;
use crate::record::{HashRecord, load_table, save_table};

/// Hit and miss counters since the cache was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Digests served from an up-to-date record.
    pub hits: u64,
    /// Digests that had to be computed.
    pub misses: u64,
}

/// Size/mtime keyed SHA-256 digests of files under a cache root.
///
/// Construct it once with [`IntegrityCache::open`] and share it (by reference
/// or `Arc`) between every worker that needs digests. Lookups for different
/// paths do not contend with each other. Every recomputed digest rewrites the
/// whole sidecar, so persistence cost grows with the number of tracked files.
pub struct IntegrityCache {
    config: IntegrityConfig,
    table: DashMap<String, HashRecord>,
    save_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IntegrityCache {
    /// Loads the sidecar from the configured root.
    ///
    /// A missing sidecar starts an empty table. A sidecar that cannot be read
    /// or parsed is discarded with a warning; its records are rebuilt as the
    /// files are hashed again.
    pub fn open(config: IntegrityConfig) -> Self {
        let sidecar = config.sidecar_path();
        let loaded = load_table(&sidecar).unwrap_or_else(|e| {
            warn!(error = %e, "failed to load integrity sidecar, recreating");
            Default::default()
        });
        info!(
            root = %config.root.display(),
            records = loaded.len(),
            "opened integrity cache"
        );

        Self {
            config,
            table: loaded.into_iter().collect(),
            save_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.config.sidecar_path()
    }

    /// Returns the SHA-256 digest of `path` (relative to the cache root).
    ///
    /// An up-to-date record costs one metadata call. Otherwise the file is
    /// streamed through the hasher, the record replaced and the sidecar
    /// rewritten before returning.
    pub fn digest(&self, path: &str) -> Result<String, IntegrityError> {
        let key = normalize(path)?;
        let full = self.config.root.join(&key);

        let metadata = fs::metadata(&full).map_err(|e| IntegrityError::io("stat", &full, e))?;
        let (size, modified_at) = identity(&full, &metadata)?;

        if let Some(record) = self.table.get(&key) {
            if record.matches(size, modified_at) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(record.digest.clone());
            }
            debug!(path = %key, "stale integrity record");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let record = self.compute(&key, &full)?;
        let digest = record.digest.clone();
        self.table.insert(key, record);

        if let Err(e) = self.save() {
            warn!(error = %e, "failed to persist integrity sidecar");
        }

        Ok(digest)
    }

    fn compute(&self, key: &str, full: &Path) -> Result<HashRecord, IntegrityError> {
        let mut file = File::open(full).map_err(|e| IntegrityError::io("open", full, e))?;
        // Size and mtime come from the handle being hashed, not the earlier stat.
        let metadata = file
            .metadata()
            .map_err(|e| IntegrityError::io("stat", full, e))?;
        let (size, modified_at) = identity(full, &metadata)?;

        let digest = sha256_reader(&mut file).map_err(|e| IntegrityError::io("hash", full, e))?;
        debug!(path = %key, size, digest = %digest, "hashed file");

        Ok(HashRecord {
            path: key.to_string(),
            size,
            modified_at,
            digest,
        })
    }

    /// The current record for `path`, without checking it against the file.
    pub fn record(&self, path: &str) -> Option<HashRecord> {
        let key = normalize(path).ok()?;
        self.table.get(&key).map(|r| r.value().clone())
    }

    /// Drops the record for `path` and persists the table.
    ///
    /// Returns whether a record was present.
    pub fn invalidate(&self, path: &str) -> Result<bool, IntegrityError> {
        let removed = self.table.remove(&normalize(path)?).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Writes a full snapshot of the table to the sidecar.
    ///
    /// Saves are serialized; each one writes a complete snapshot taken while
    /// holding the save lock.
    pub fn save(&self) -> Result<(), IntegrityError> {
        let _guard = self.save_lock.lock();
        let snapshot: Vec<HashRecord> = self.table.iter().map(|r| r.value().clone()).collect();
        save_table(&self.config.sidecar_path(), &snapshot)
    }

    /// Persists the table one last time and releases the cache.
    pub fn close(self) -> Result<(), IntegrityError> {
        self.save()?;
        info!(root = %self.config.root.display(), "closed integrity cache");
        Ok(())
    }
}

/// Lowercase hex SHA-256 of everything `reader` yields.
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Turns `path` into a sidecar key: `/`-separated, relative, inside the root.
fn normalize(path: &str) -> Result<String, IntegrityError> {
    let unified = path.replace('\\', "/");
    let relative = unified.trim_start_matches('/');

    let mut parts = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(outside_root(path));
            }
        }
    }
    if parts.is_empty() {
        return Err(outside_root(path));
    }
    Ok(parts.join("/"))
}

fn outside_root(path: &str) -> IntegrityError {
    IntegrityError::Io {
        op: "resolve",
        path: PathBuf::from(path),
        source: io::Error::new(
            io::ErrorKind::InvalidInput,
            "path does not name a file under the cache root",
        ),
    }
}

fn identity(full: &Path, metadata: &Metadata) -> Result<(u64, DateTime<Utc>), IntegrityError> {
    if !metadata.is_file() {
        return Err(IntegrityError::Io {
            op: "stat",
            path: full.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        });
    }
    let modified = metadata
        .modified()
        .map_err(|e| IntegrityError::io("stat", full, e))?;
    Ok((metadata.len(), DateTime::<Utc>::from(modified)))
}
