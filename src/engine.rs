//! Supported search engine variants and their fixed launch parameters.

use serde::{Deserialize, Serialize};

/// Conventional HTTP port for both engines.
pub const DEFAULT_PORT: u16 = 9200;

/// Path inside the container where the engine keeps its data.
pub const CONTAINER_DATA_PATH: &str = "/var/lib/search";

/// Path inside the container where the engine writes its logs.
pub const CONTAINER_LOGS_PATH: &str = "/var/log/search";

/// Which search engine to launch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Elasticsearch (default).
    #[default]
    Elasticsearch,
    /// OpenSearch.
    #[value(name = "opensearch")]
    #[serde(rename = "opensearch")]
    OpenSearch,
}

impl EngineKind {
    /// All supported engines.
    pub const ALL: [EngineKind; 2] = [EngineKind::Elasticsearch, EngineKind::OpenSearch];

    /// Lowercase engine name, also the executable and archive prefix.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "elasticsearch",
            Self::OpenSearch => "opensearch",
        }
    }

    /// Pinned engine version.
    pub fn version(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "8.6.2",
            Self::OpenSearch => "2.11.0",
        }
    }

    /// Container image for the pinned version.
    pub fn image(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "elastic/elasticsearch:8.6.2",
            Self::OpenSearch => "opensearchproject/opensearch:2.11.0",
        }
    }

    /// Setting that turns off security features a throwaway sandbox can't use.
    pub fn security_option(&self) -> &'static str {
        match self {
            Self::Elasticsearch => "xpack.security.enabled=false",
            Self::OpenSearch => "plugins.security.disabled=true",
        }
    }

    /// Launcher filename inside the distribution's `bin/` directory.
    pub fn binary_filename(&self) -> String {
        if cfg!(windows) {
            format!("{}.bat", self.name())
        } else {
            self.name().to_string()
        }
    }

    /// Port the engine listens on unless told otherwise.
    pub fn default_port(&self) -> u16 {
        DEFAULT_PORT
    }

    /// `key=value` startup settings for a single-node sandbox on `port`.
    pub fn startup_options(&self, port: u16) -> Vec<String> {
        vec![
            format!("http.port={}", port),
            "discovery.type=single-node".to_string(),
            self.security_option().to_string(),
        ]
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "elasticsearch" | "elastic" | "es" => Ok(Self::Elasticsearch),
            "opensearch" | "os" => Ok(Self::OpenSearch),
            _ => Err(format!(
                "invalid search engine '{}', expected 'elasticsearch' or 'opensearch'",
                s
            )),
        }
    }
}

/// URL callers use to reach an engine on `port`.
pub fn engine_url(port: u16) -> String {
    format!("http://localhost:{}", port)
}
