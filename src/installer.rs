//! Locating an already-installed engine binary.
//!
//! Downloading and extracting distributions is handled elsewhere; this
//! module only answers "is there a native binary for this engine on this
//! machine?" An absent binary is not an error: the launcher falls back to
//! running the engine in a container.

use std::path::{Path, PathBuf};

use crate::engine::EngineKind;

/// Resolves the native executable for an engine, if one is installed.
pub trait BinaryResolver: Send + Sync {
    /// Path to an existing executable, or `None` to use a container instead.
    fn resolve_binary(&self, kind: EngineKind) -> Option<PathBuf>;
}

/// Archive name the distribution for `kind` is published under for `os`/`arch`
/// (values as in [`std::env::consts`]). `None` when no build exists.
pub fn artifact_name(kind: EngineKind, os: &str, arch: &str) -> Option<String> {
    let (os, arch) = match kind {
        EngineKind::Elasticsearch => {
            let os = match os {
                "linux" => "linux",
                "macos" => "darwin",
                "windows" => "windows",
                _ => return None,
            };
            let arch = match arch {
                "x86_64" => "x86_64",
                "aarch64" if os != "windows" => "aarch64",
                _ => return None,
            };
            (os, arch)
        }
        EngineKind::OpenSearch => {
            let os = match os {
                "linux" => "linux",
                "windows" => "windows",
                _ => return None,
            };
            let arch = match arch {
                "x86_64" => "x64",
                "aarch64" if os == "linux" => "arm64",
                _ => return None,
            };
            (os, arch)
        }
    };
    Some(format!("{}-{}-{}-{}", kind.name(), kind.version(), os, arch))
}

/// Looks for distributions extracted into a cache directory.
///
/// Layout: `<cache>/<artifact>/<engine>-<version>/bin/<engine>[.bat]`.
#[derive(Debug, Clone)]
pub struct CachedInstall {
    cache_dir: PathBuf,
    explicit: Option<PathBuf>,
}

impl CachedInstall {
    /// Resolve against `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            explicit: None,
        }
    }

    /// Prefer `path` over the cache when it exists.
    pub fn with_explicit_binary(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    /// Where the binary for `kind` would live on this platform.
    pub fn expected_path(&self, kind: EngineKind) -> Option<PathBuf> {
        let artifact = artifact_name(kind, std::env::consts::OS, std::env::consts::ARCH)?;
        Some(binary_path(&self.cache_dir, &artifact, kind))
    }
}

fn binary_path(cache_dir: &Path, artifact: &str, kind: EngineKind) -> PathBuf {
    cache_dir
        .join(artifact)
        .join(format!("{}-{}", kind.name(), kind.version()))
        .join("bin")
        .join(kind.binary_filename())
}

impl BinaryResolver for CachedInstall {
    fn resolve_binary(&self, kind: EngineKind) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            if path.is_file() {
                return Some(path.clone());
            }
            tracing::warn!(
                "Configured {} binary {} does not exist, ignoring",
                kind,
                path.display()
            );
        }

        let path = self.expected_path(kind)?;
        if path.is_file() {
            tracing::debug!("Found {} binary at {}", kind, path.display());
            Some(path)
        } else {
            tracing::debug!("No {} binary at {}", kind, path.display());
            None
        }
    }
}

/// Never finds a binary, forcing the container strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerOnly;

impl BinaryResolver for ContainerOnly {
    fn resolve_binary(&self, _kind: EngineKind) -> Option<PathBuf> {
        None
    }
}

/// Always uses the given executable.
#[derive(Debug, Clone)]
pub struct FixedBinary(pub PathBuf);

impl BinaryResolver for FixedBinary {
    fn resolve_binary(&self, _kind: EngineKind) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}
