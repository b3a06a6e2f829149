//! Repository index configuration
//!
//! Read from `.typescope.toml` at the repository root when present:
//!
//! ```toml
//! memo_capacity = 128
//! provider_timeout_secs = 120
//! compression = "fast"
//!
//! [pyre]
//! enabled = true
//! command = "pyre"
//! ```

use crate::error::IndexError;
use crate::error::Result;
use crate::providers::LiteralTypeProvider;
use crate::providers::MetadataProvider;
use crate::providers::PyreTypeProvider;
use crate::providers::QualifiedNameProvider;
use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use typescope_persistence::CacheStore;
use typescope_persistence::CompressionLevel;

pub const CONFIG_FILE_NAME: &str = ".typescope.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Fast,
    #[default]
    Balanced,
    Maximum,
}

impl From<Compression> for CompressionLevel {
    fn from(compression: Compression) -> Self {
        match compression {
            Compression::Fast => Self::Fast,
            Compression::Balanced => Self::Balanced,
            Compression::Maximum => Self::Maximum,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyreConfig {
    pub enabled: bool,
    pub command: String,
}

impl Default for PyreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "pyre".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoIndexConfig {
    /// Base directory for metadata caches; the user cache directory when unset.
    pub cache_dir: Option<PathBuf>,
    /// File extensions of tracked sources, without the dot.
    pub extensions: Vec<String>,
    /// Directory names never descended into. Hidden directories are always
    /// skipped.
    pub exclude_dirs: Vec<String>,
    pub compression: Compression,
    /// Upper bound on one provider resolution; unbounded when unset.
    pub provider_timeout_secs: Option<u64>,
    /// Number of built file indices kept in memory.
    pub memo_capacity: usize,
    pub literal_types: bool,
    pub pyre: PyreConfig,
}

impl Default for RepoIndexConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            extensions: vec!["py".to_string(), "pyi".to_string()],
            exclude_dirs: vec!["__pycache__".to_string()],
            compression: Compression::default(),
            provider_timeout_secs: None,
            memo_capacity: 64,
            literal_types: true,
            pyre: PyreConfig::default(),
        }
    }
}

impl RepoIndexConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| IndexError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `<root>/.typescope.toml`, falling back to defaults when absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "loading configuration");
                Self::from_toml_str(&text)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(IndexError::io(&path, &e)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.memo_capacity == 0 {
            return Err(IndexError::Config("memo_capacity must be at least 1".to_string()));
        }
        if self.extensions.is_empty() {
            return Err(IndexError::Config("extensions must not be empty".to_string()));
        }
        if self.provider_timeout_secs == Some(0) {
            return Err(IndexError::Config(
                "provider_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_base_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(CacheStore::default_base_dir)
    }

    pub fn provider_timeout(&self) -> Option<Duration> {
        self.provider_timeout_secs.map(Duration::from_secs)
    }

    /// Providers enabled by this configuration, in resolution order.
    pub fn providers(&self) -> Vec<Arc<dyn MetadataProvider>> {
        let mut providers: Vec<Arc<dyn MetadataProvider>> = vec![Arc::new(QualifiedNameProvider::new())];
        if self.literal_types {
            providers.push(Arc::new(LiteralTypeProvider::new()));
        }
        if self.pyre.enabled {
            providers.push(Arc::new(PyreTypeProvider::new(self.pyre.command.clone())));
        }
        providers
    }

    pub fn tracks(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|tracked| tracked == ext))
    }

    pub fn skips_dir(&self, name: &str) -> bool {
        name.starts_with('.') || self.exclude_dirs.iter().any(|excluded| excluded == name)
    }
}
