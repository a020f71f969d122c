use crate::config::helpers::{optional_env, parse_bool_env};
use crate::error::ConfigError;

/// Container strategy configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Image to run instead of the engine's pinned image (e.g. a mirror).
    pub image: Option<String>,
    /// Always use a container, even when a native binary is installed.
    pub force: bool,
}

impl ContainerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            image: optional_env("SEARCH_SANDBOX_IMAGE")?,
            force: parse_bool_env("SEARCH_SANDBOX_FORCE_CONTAINER", false)?,
        })
    }
}
