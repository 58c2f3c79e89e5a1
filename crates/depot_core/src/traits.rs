use crate::error::*;
use crate::location::BackendKind;

use bytes::Bytes;
use std::io::Write;

/// A single entry returned by [`StorageBackend::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, is_dir: bool) -> Self {
        Self {
            name: name.into(),
            is_dir,
        }
    }
}

/// How [`StorageBackend::open`] treats an existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Create the file, or truncate it if it exists.
    #[default]
    Truncate,
    /// Create the file, or append to it if it exists.
    Append,
    /// Create the file; fail with [`StorageError::AlreadyExists`] if it exists.
    CreateNew,
}

/// A streaming write handle returned by [`StorageBackend::open`].
///
/// The handle must be committed with [`FileWriter::finish`]. Dropping it
/// without finishing releases the underlying resources but network backends
/// may leave a partial file behind.
pub trait FileWriter: Write + Send {
    fn finish(self: Box<Self>) -> Result<(), StorageError>;
}

/// The uniform storage contract implemented once per transport.
///
/// Paths are relative to the root of the location the backend was opened
/// with and always use `/` as separator. Every implementation maps its native
/// errors into [`StorageError`] so that [`StorageBackend::is_not_exist`] and
/// [`StorageBackend::is_exist`] behave the same regardless of transport.
pub trait StorageBackend: Send + Sync {
    /// Which transport this backend talks to.
    fn kind(&self) -> BackendKind;

    /// Succeeds if the file or directory exists.
    fn exists(&self, path: &str) -> Result<(), StorageError>;

    /// Returns the entire file.
    ///
    /// Fails if the path is a directory.
    fn read(&self, path: &str) -> Result<Bytes, StorageError>;

    /// Creates or overwrites the file. The parent directory must exist.
    fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError>;

    /// Deletes the file or directory recursively.
    fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Creates the directory and all missing parents.
    fn mkdir(&self, path: &str) -> Result<(), StorageError>;

    /// Lists the entries of a directory.
    ///
    /// Fails if the path is not a directory.
    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, StorageError>;

    /// Opens the path for streaming writes.
    fn open(&self, path: &str, mode: WriteMode) -> Result<Box<dyn FileWriter>, StorageError>;

    fn is_not_exist(&self, err: &StorageError) -> bool {
        err.is_not_exist()
    }

    fn is_exist(&self, err: &StorageError) -> bool {
        err.is_exist()
    }
}

impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn exists(&self, path: &str) -> Result<(), StorageError> {
        (**self).exists(path)
    }

    fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        (**self).read(path)
    }

    fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        (**self).write(path, data)
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        (**self).remove(path)
    }

    fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        (**self).mkdir(path)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        (**self).read_dir(path)
    }

    fn open(&self, path: &str, mode: WriteMode) -> Result<Box<dyn FileWriter>, StorageError> {
        (**self).open(path, mode)
    }

    fn is_not_exist(&self, err: &StorageError) -> bool {
        (**self).is_not_exist(err)
    }

    fn is_exist(&self, err: &StorageError) -> bool {
        (**self).is_exist(err)
    }
}
