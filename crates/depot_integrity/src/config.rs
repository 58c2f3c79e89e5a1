use std::path::{Path, PathBuf};

/// Name of the sidecar file holding the persisted hash table.
pub const DEFAULT_SIDECAR_NAME: &str = ".integrity";

/// Directory under the application cache dir that holds downloaded artifacts.
pub const DOWNLOAD_CACHE_DIR: &str = "downloadCache";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityConfig {
    /// Directory the cached paths are relative to.
    pub root: PathBuf,
    /// File name of the sidecar inside `root`.
    ///
    /// Defaults to `.integrity`.
    pub sidecar_name: String,
}

impl IntegrityConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sidecar_name: DEFAULT_SIDECAR_NAME.to_string(),
        }
    }

    /// Uses `<cache_dir>/downloadCache` as the root.
    pub fn from_cache_dir(cache_dir: impl AsRef<Path>) -> Self {
        Self::new(cache_dir.as_ref().join(DOWNLOAD_CACHE_DIR))
    }

    pub fn with_sidecar_name(mut self, name: impl Into<String>) -> Self {
        self.sidecar_name = name.into();
        self
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.root.join(&self.sidecar_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cache_dir() {
        let config = IntegrityConfig::from_cache_dir("/home/user/.cache/depot");
        assert_eq!(
            config.root,
            PathBuf::from("/home/user/.cache/depot/downloadCache")
        );
        assert_eq!(
            config.sidecar_path(),
            PathBuf::from("/home/user/.cache/depot/downloadCache/.integrity")
        );
    }

    #[test]
    fn test_custom_sidecar_name() {
        let config = IntegrityConfig::new("/tmp/cache").with_sidecar_name("hashes.json");
        assert_eq!(config.sidecar_path(), PathBuf::from("/tmp/cache/hashes.json"));
    }
}
