//! Hot-reloadable configuration sources.

use parking_lot::RwLock;
use ridge_types::{config_error, ConfigError, RawSearchConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Supplies the current operator configuration; called once per iteration.
pub trait ConfigProvider {
    fn load(&self) -> Result<RawSearchConfig, ConfigError>;
}

/// Re-reads a JSON file on every load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonFileConfig {
    path: PathBuf,
}

impl JsonFileConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for JsonFileConfig {
    fn load(&self) -> Result<RawSearchConfig, ConfigError> {
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| config_error!("{}: {}", self.path.display(), e))?;
        RawSearchConfig::from_json(&text)
    }
}

/// In-process configuration that can be edited while workers run.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<RawSearchConfig>>,
}

impl SharedConfig {
    pub fn new(raw: RawSearchConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(raw)),
        }
    }

    pub fn replace(&self, raw: RawSearchConfig) {
        *self.inner.write() = raw;
    }

    pub fn update<F: FnOnce(&mut RawSearchConfig)>(&self, edit: F) {
        edit(&mut self.inner.write());
    }

    pub fn snapshot(&self) -> RawSearchConfig {
        self.inner.read().clone()
    }
}

impl ConfigProvider for SharedConfig {
    fn load(&self) -> Result<RawSearchConfig, ConfigError> {
        Ok(self.snapshot())
    }
}
