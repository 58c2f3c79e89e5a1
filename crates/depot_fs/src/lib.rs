//! # Depot FileSystem Storage
//!
//! A local filesystem backend for depot.
//!
//! This crate implements the [`StorageBackend`] trait on top of `std::fs`.
//! All paths are resolved relative to the root the storage was created with.
//!
//! ## Features
//!
//! * **Atomic Writes**: [`StorageBackend::write`] goes through a temporary
//!   file and a rename, so readers never observe a partially written file.
//!
//! ## Usage
//!
//! ```no_run
//! use depot_core::prelude::*;
//! use depot_fs::LocalStorage;
//!
//! let storage = LocalStorage::new("./depot_data");
//! storage.mkdir("mods").unwrap();
//! ```

use bytes::Bytes;
use depot_core::prelude::*;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

fn display(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Unique name per writer, so concurrent writes to one path never share it.
    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|e| StorageError::from_io("write", display(path), e))?;
    tmp.write_all(data)
        .map_err(|e| StorageError::from_io("write", display(path), e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::from_io("rename", display(path), e.error))?;

    Ok(())
}

#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn get_path(&self, path: &str) -> PathBuf {
        if self.root.as_os_str().is_empty() {
            return PathBuf::from(path);
        }
        self.root.join(path.trim_start_matches('/'))
    }
}

impl StorageBackend for LocalStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn exists(&self, path: &str) -> Result<(), StorageError> {
        let path = self.get_path(path);
        fs::symlink_metadata(&path)
            .map(|_| ())
            .map_err(|e| StorageError::from_io("stat", display(&path), e))
    }

    fn read(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = self.get_path(path);
        debug!(path = %path.display(), "reading file");
        let metadata =
            fs::metadata(&path).map_err(|e| StorageError::from_io("stat", display(&path), e))?;
        if metadata.is_dir() {
            return Err(StorageError::is_a_directory("read", display(&path)));
        }
        fs::read(&path)
            .map(Bytes::from)
            .map_err(|e| StorageError::from_io("read", display(&path), e))
    }

    fn write(&self, path: &str, data: Bytes) -> Result<(), StorageError> {
        let path = self.get_path(path);
        debug!(path = %path.display(), bytes = data.len(), "writing file");
        atomic_write(&path, &data)
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        let path = self.get_path(path);
        debug!(path = %path.display(), "removing");
        let metadata = fs::symlink_metadata(&path)
            .map_err(|e| StorageError::from_io("stat", display(&path), e))?;
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| StorageError::from_io("remove", display(&path), e))
    }

    fn mkdir(&self, path: &str) -> Result<(), StorageError> {
        let path = self.get_path(path);
        debug!(path = %path.display(), "creating directory");
        fs::create_dir_all(&path).map_err(|e| StorageError::from_io("mkdir", display(&path), e))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, StorageError> {
        let path = self.get_path(path);
        let metadata =
            fs::metadata(&path).map_err(|e| StorageError::from_io("stat", display(&path), e))?;
        if !metadata.is_dir() {
            return Err(StorageError::not_a_directory("read_dir", display(&path)));
        }

        let mut entries = fs::read_dir(&path)
            .and_then(|iter| {
                iter.map(|entry| {
                    let entry = entry?;
                    let is_dir = entry.file_type()?.is_dir();
                    Ok(DirEntry::new(entry.file_name().to_string_lossy(), is_dir))
                })
                .collect::<io::Result<Vec<_>>>()
            })
            .map_err(|e| StorageError::from_io("read_dir", display(&path), e))?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries)
    }

    fn open(&self, path: &str, mode: WriteMode) -> Result<Box<dyn FileWriter>, StorageError> {
        let path = self.get_path(path);
        debug!(path = %path.display(), ?mode, "opening for write");

        let mut options = OpenOptions::new();
        match mode {
            WriteMode::Truncate => options.write(true).create(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
            WriteMode::CreateNew => options.write(true).create_new(true),
        };
        let file = options
            .open(&path)
            .map_err(|e| StorageError::from_io("open", display(&path), e))?;

        Ok(Box::new(LocalWriter {
            file: BufWriter::new(file),
            path,
        }))
    }
}

struct LocalWriter {
    file: BufWriter<File>,
    path: PathBuf,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl FileWriter for LocalWriter {
    fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let LocalWriter { file, path } = *self;
        let file = file
            .into_inner()
            .map_err(|e| StorageError::from_io("flush", display(&path), e.into_error()))?;
        file.sync_all()
            .map_err(|e| StorageError::from_io("sync", display(&path), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, LocalStorage) {
        let temp = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp.path());
        (temp, storage)
    }

    #[test]
    fn test_write_then_read() {
        let (_temp, storage) = storage();
        storage
            .write("a.zip", Bytes::from_static(b"content"))
            .unwrap();
        assert_eq!(storage.read("a.zip").unwrap(), Bytes::from_static(b"content"));
    }

    #[test]
    fn test_write_overwrites_and_leaves_no_tmp() {
        let (temp, storage) = storage();
        storage.write("a.zip", Bytes::from_static(b"one")).unwrap();
        storage.write("a.zip", Bytes::from_static(b"two")).unwrap();
        assert_eq!(storage.read("a.zip").unwrap(), Bytes::from_static(b"two"));
        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["a.zip"]);
    }

    #[test]
    fn test_concurrent_writes_to_one_path() {
        let (_temp, storage) = storage();
        let storage = std::sync::Arc::new(storage);

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let storage = std::sync::Arc::clone(&storage);
                std::thread::spawn(move || {
                    for _ in 0..16 {
                        storage
                            .write("a.zip", Bytes::from(vec![i; 4096]))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let data = storage.read("a.zip").unwrap();
        assert_eq!(data.len(), 4096);
        assert!(data.iter().all(|b| *b == data[0]));
        assert_eq!(storage.read_dir("").unwrap(), vec![DirEntry::new("a.zip", false)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_is_followed_for_reads() {
        let (temp, storage) = storage();
        storage.mkdir("real").unwrap();
        storage.write("real/a.zip", Bytes::from_static(b"x")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("link")).unwrap();

        assert_eq!(
            storage.read_dir("link").unwrap(),
            vec![DirEntry::new("a.zip", false)]
        );
        assert_eq!(storage.read("link/a.zip").unwrap(), Bytes::from_static(b"x"));

        // Removing the link leaves the target alone.
        storage.remove("link").unwrap();
        storage.exists("real/a.zip").unwrap();
    }

    #[test]
    fn test_write_does_not_create_parents() {
        let (_temp, storage) = storage();
        let err = storage
            .write("missing/a.zip", Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(storage.is_not_exist(&err));
    }

    #[test]
    fn test_read_directory_fails() {
        let (_temp, storage) = storage();
        storage.mkdir("mods").unwrap();
        let err = storage.read("mods").unwrap_err();
        assert!(!storage.is_not_exist(&err));
        assert!(!storage.is_exist(&err));
    }

    #[test]
    fn test_mkdir_is_recursive_and_idempotent() {
        let (temp, storage) = storage();
        storage.mkdir("a/b/c").unwrap();
        storage.mkdir("a/b/c").unwrap();
        assert!(temp.path().join("a/b/c").is_dir());
    }

    #[test]
    fn test_remove_is_recursive() {
        let (temp, storage) = storage();
        storage.mkdir("mods/nested").unwrap();
        storage
            .write("mods/nested/a.zip", Bytes::from_static(b"x"))
            .unwrap();
        storage.remove("mods").unwrap();
        assert!(!temp.path().join("mods").exists());
    }

    #[test]
    fn test_read_dir_lists_entries() {
        let (_temp, storage) = storage();
        storage.mkdir("mods/sub").unwrap();
        storage
            .write("mods/a.zip", Bytes::from_static(b"x"))
            .unwrap();

        let entries = storage.read_dir("mods").unwrap();
        assert_eq!(
            entries,
            vec![DirEntry::new("a.zip", false), DirEntry::new("sub", true)]
        );
    }

    #[test]
    fn test_read_dir_on_file_fails() {
        let (_temp, storage) = storage();
        storage.write("a.zip", Bytes::from_static(b"x")).unwrap();
        let err = storage.read_dir("a.zip").unwrap_err();
        assert!(matches!(err, StorageError::Io { op: "read_dir", .. }));
    }

    #[test]
    fn test_missing_path_is_not_exist_for_every_operation() {
        let (_temp, storage) = storage();
        let errors = vec![
            storage.exists("nope").unwrap_err(),
            storage.read("nope").unwrap_err(),
            storage.remove("nope").unwrap_err(),
            storage.read_dir("nope").unwrap_err(),
            storage
                .open("nope/a.zip", WriteMode::Truncate)
                .err()
                .unwrap(),
        ];
        for err in errors {
            assert!(storage.is_not_exist(&err), "{err}");
            assert!(!storage.is_exist(&err), "{err}");
        }
    }

    #[test]
    fn test_existing_path_is_exist() {
        let (_temp, storage) = storage();
        storage.write("a.zip", Bytes::from_static(b"x")).unwrap();
        storage.exists("a.zip").unwrap();

        let err = storage.open("a.zip", WriteMode::CreateNew).err().unwrap();
        assert!(storage.is_exist(&err));
        assert!(!storage.is_not_exist(&err));
    }

    #[test]
    fn test_open_modes() {
        let (_temp, storage) = storage();

        let mut writer = storage.open("log.txt", WriteMode::Truncate).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        let mut writer = storage.open("log.txt", WriteMode::Append).unwrap();
        writer.write_all(b" world").unwrap();
        writer.finish().unwrap();
        assert_eq!(storage.read("log.txt").unwrap(), Bytes::from_static(b"hello world"));

        let mut writer = storage.open("log.txt", WriteMode::Truncate).unwrap();
        writer.write_all(b"reset").unwrap();
        writer.finish().unwrap();
        assert_eq!(storage.read("log.txt").unwrap(), Bytes::from_static(b"reset"));
    }

    #[test]
    fn test_open_with_progress() {
        let (_temp, storage) = storage();
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);

        let inner = storage.open("big.bin", WriteMode::Truncate).unwrap();
        let mut writer: Box<dyn FileWriter> = Box::new(ProgressWriter::new(inner, 4, Some(tx)));
        writer.write_all(b"abcd").unwrap();
        writer.finish().unwrap();

        assert_eq!(rx.try_recv().unwrap(), ProgressSample { completed: 4, total: 4 });
        assert_eq!(storage.read("big.bin").unwrap(), Bytes::from_static(b"abcd"));
    }
}
