use std::io;

use thiserror::Error;

use crate::location::BackendKind;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error during {op} on {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{backend} transport error ({host}): {message}")]
    Transport {
        backend: BackendKind,
        host: String,
        message: String,
    },

    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("Unsupported storage backend: {0}")]
    Unsupported(String),
}

impl StorageError {
    /// Maps a native I/O error into the shared classification.
    ///
    /// `NotFound` and `AlreadyExists` kinds become the dedicated variants so
    /// callers can branch on them without knowing which backend produced them.
    pub fn from_io(op: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(path),
            io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(path),
            _ => StorageError::Io { op, path, source },
        }
    }

    pub fn is_not_exist(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_exist(&self) -> bool {
        matches!(self, StorageError::AlreadyExists(_))
    }

    pub fn is_a_directory(op: &'static str, path: impl Into<String>) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source: io::Error::from(io::ErrorKind::IsADirectory),
        }
    }

    pub fn not_a_directory(op: &'static str, path: impl Into<String>) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source: io::Error::from(io::ErrorKind::NotADirectory),
        }
    }
}
