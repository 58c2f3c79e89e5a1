//! # Depot Integrity
//!
//! A content hash cache for files under a local cache root.
//!
//! Each tracked file is remembered with its size, modification time and
//! SHA-256 digest. The digest is only recomputed when the size or mtime no
//! longer match; a file rewritten with identical size and timestamp keeps its
//! old digest. The table is persisted to a `.integrity` sidecar in the cache
//! root after every recomputation.
//!
//! ## Usage
//!
//! ```no_run
//! use depot_integrity::{IntegrityCache, IntegrityConfig};
//!
//! let cache = IntegrityCache::open(IntegrityConfig::from_cache_dir("/home/user/.cache/depot"));
//! let digest = cache.digest("mods/a.zip").unwrap();
//! println!("{digest}");
//! cache.close().unwrap();
//! ```

mod cache;
mod config;
mod error;
mod record;

pub use cache::{CacheStats, IntegrityCache, sha256_reader};
pub use config::{DEFAULT_SIDECAR_NAME, DOWNLOAD_CACHE_DIR, IntegrityConfig};
pub use error::IntegrityError;
pub use record::{HashRecord, load_table, save_table};
