pub use depot_core::*;

use depot_core::prelude::*;
use tracing::info;

#[cfg(feature = "fs")]
pub mod fs {
    pub use depot_fs::*;
}

#[cfg(feature = "ftp")]
pub mod ftp {
    pub use depot_ftp::*;
}

#[cfg(feature = "sftp")]
pub mod sftp {
    pub use depot_sftp::*;
}

#[cfg(feature = "integrity")]
pub mod integrity {
    pub use depot_integrity::*;
}

/// Resolves a location string to a connected storage backend.
///
/// `ftp://` and `sftp://` locations select the network backends. Every other
/// string, including unknown schemes, is treated as a local path.
pub fn open_location(location: &str) -> Result<Box<dyn StorageBackend>, StorageError> {
    let location = Location::parse(location)?;

    match location.kind {
        BackendKind::Ftp => open_ftp(location),
        BackendKind::Sftp => open_sftp(location),
        BackendKind::Local => {
            info!(path = %location.path, "using local disk");
            open_local(location)
        }
    }
}

#[cfg(feature = "ftp")]
fn open_ftp(location: Location) -> Result<Box<dyn StorageBackend>, StorageError> {
    Ok(Box::new(depot_ftp::FtpStorage::connect(location)?))
}

#[cfg(not(feature = "ftp"))]
fn open_ftp(_location: Location) -> Result<Box<dyn StorageBackend>, StorageError> {
    Err(StorageError::Unsupported(
        "ftp support was not compiled in".into(),
    ))
}

#[cfg(feature = "sftp")]
fn open_sftp(location: Location) -> Result<Box<dyn StorageBackend>, StorageError> {
    Ok(Box::new(depot_sftp::SftpStorage::connect(
        location,
        depot_sftp::SftpOptions::default(),
    )?))
}

#[cfg(not(feature = "sftp"))]
fn open_sftp(_location: Location) -> Result<Box<dyn StorageBackend>, StorageError> {
    Err(StorageError::Unsupported(
        "sftp support was not compiled in".into(),
    ))
}

#[cfg(feature = "fs")]
fn open_local(location: Location) -> Result<Box<dyn StorageBackend>, StorageError> {
    Ok(Box::new(depot_fs::LocalStorage::new(location.path)))
}

#[cfg(not(feature = "fs"))]
fn open_local(_location: Location) -> Result<Box<dyn StorageBackend>, StorageError> {
    Err(StorageError::Unsupported(
        "local filesystem support was not compiled in".into(),
    ))
}

pub mod prelude {
    pub use depot_core::prelude::*;

    pub use crate::open_location;

    #[cfg(feature = "fs")]
    pub use depot_fs::LocalStorage;

    #[cfg(feature = "ftp")]
    pub use depot_ftp::FtpStorage;

    #[cfg(feature = "sftp")]
    pub use depot_sftp::{SftpOptions, SftpStorage};

    #[cfg(feature = "integrity")]
    pub use depot_integrity::{CacheStats, HashRecord, IntegrityCache, IntegrityConfig};
}
