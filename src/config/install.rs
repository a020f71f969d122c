use std::path::PathBuf;

use crate::config::helpers::optional_env;
use crate::error::ConfigError;
use crate::installer::CachedInstall;

/// Where native engine binaries are looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    /// Binary to use for every engine, when it exists.
    pub binary: Option<PathBuf>,
    /// Directory distributions are extracted into.
    pub cache_dir: PathBuf,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            binary: None,
            cache_dir: default_cache_dir(),
        }
    }
}

impl InstallConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            binary: optional_env("SEARCH_SANDBOX_BINARY")?.map(PathBuf::from),
            cache_dir: optional_env("SEARCH_SANDBOX_CACHE_DIR")?
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
        })
    }

    /// Binary resolver for this configuration.
    pub fn resolver(&self) -> CachedInstall {
        CachedInstall::new(&self.cache_dir).with_explicit_binary(self.binary.clone())
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("search-sandbox")
}
