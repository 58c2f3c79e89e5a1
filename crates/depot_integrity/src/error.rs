use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error during {op} on {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt integrity sidecar {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl IntegrityError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => IntegrityError::NotFound(path),
            _ => IntegrityError::Io { op, path, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, IntegrityError::NotFound(_))
    }
}
