//! Run configuration
//!
//! One YAML file describes a run: the error policy, the backing store, and
//! the declarative mappings registered for each stream.
//!
//! ```yaml
//! error_policy: fail
//! stream_prefix: "conn1_"
//! backend:
//!   kind: http
//!   url: https://graph.example.com
//!   graph: default
//! transforms:
//!   - stream: github__orgs
//!     emit:
//!       - kind: entry
//!         type: vcs_Organization
//!         fields:
//!           uid: "{input.login}"
//! ```

use crate::pipeline::{ErrorPolicy, IngestPipeline};
use crate::protocol::StreamId;
use crate::revision::{
    BackendError, GraphBackend, HttpBackend, RevisionSink, SqliteBackend, DEFAULT_BATCH_SIZE,
};
use crate::transform::{DeclarativeSpec, DeclarativeTransform, Transform, TransformError, TransformRegistry};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable consulted when the HTTP backend has no `api_key`.
pub const API_KEY_ENV: &str = "GRAPHLINE_API_KEY";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid mapping for {stream}: {source}")]
    Transform {
        stream: String,
        #[source]
        source: TransformError,
    },

    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),
}

/// Where the run writes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Http {
        url: String,
        #[serde(default = "default_graph")]
        graph: String,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Sqlite { path: None }
    }
}

fn default_graph() -> String {
    "default".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub stream_prefix: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub transforms: Vec<DeclarativeSpec>,
    #[serde(default)]
    pub fallback: Option<DeclarativeSpec>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            dry_run: false,
            stream_prefix: None,
            batch_size: DEFAULT_BATCH_SIZE,
            backend: BackendConfig::default(),
            transforms: Vec::new(),
            fallback: None,
        }
    }
}

impl RunConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without touching input or the store.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be greater than 0".into()));
        }

        if let BackendConfig::Http { url, graph, timeout_secs, .. } = &self.backend {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("backend url '{}' is not http(s)", url)));
            }
            if graph.is_empty() || graph.contains('/') {
                return Err(ConfigError::Invalid(format!("invalid graph name '{}'", graph)));
            }
            if *timeout_secs == 0 {
                return Err(ConfigError::Invalid("timeout_secs must be greater than 0".into()));
            }
        }

        let mut seen: HashSet<&StreamId> = HashSet::new();
        for spec in &self.transforms {
            let stream = spec
                .stream
                .as_ref()
                .ok_or_else(|| ConfigError::Invalid("every transform needs a stream".into()))?;
            if !seen.insert(stream) {
                return Err(ConfigError::Invalid(format!("duplicate transform for {}", stream)));
            }
            DeclarativeTransform::new(spec.clone()).map_err(|source| ConfigError::Transform {
                stream: stream.to_string(),
                source,
            })?;
        }

        if let Some(fallback) = &self.fallback {
            DeclarativeTransform::new(fallback.clone()).map_err(|source| ConfigError::Transform {
                stream: "fallback".to_string(),
                source,
            })?;
        }
        Ok(())
    }

    /// Registry with one lazily-built transform per configured stream.
    pub fn build_registry(&self) -> Result<TransformRegistry, ConfigError> {
        let mut registry = TransformRegistry::new();
        for spec in &self.transforms {
            let Some(stream) = spec.stream.clone() else {
                continue;
            };
            let spec = spec.clone();
            registry.register_factory(stream, move || {
                let transform = DeclarativeTransform::new(spec.clone())?;
                Ok(Arc::new(transform) as Arc<dyn Transform>)
            });
        }

        if let Some(fallback) = &self.fallback {
            let transform = DeclarativeTransform::new(fallback.clone()).map_err(|source| {
                ConfigError::Transform {
                    stream: "fallback".to_string(),
                    source,
                }
            })?;
            registry = registry.with_fallback(Arc::new(transform));
        }
        Ok(registry)
    }

    /// Open the configured store. A dry run never writes to disk.
    pub fn build_backend(&self) -> Result<Arc<dyn GraphBackend>, ConfigError> {
        let backend: Arc<dyn GraphBackend> = match &self.backend {
            BackendConfig::Http {
                url,
                graph,
                api_key,
                timeout_secs,
            } => {
                let api_key = api_key.clone().or_else(|| std::env::var(API_KEY_ENV).ok());
                if api_key.is_none() {
                    tracing::warn!("no API key configured for {}", url);
                }
                Arc::new(HttpBackend::new(
                    url.clone(),
                    graph.clone(),
                    api_key,
                    Duration::from_secs(*timeout_secs),
                )?)
            }
            BackendConfig::Sqlite { .. } if self.dry_run => Arc::new(SqliteBackend::open_in_memory()?),
            BackendConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(default_db_path);
                tracing::debug!(path = %path.display(), "opening sqlite store");
                Arc::new(SqliteBackend::open(&path)?)
            }
        };
        Ok(backend)
    }

    pub fn build_sink(&self) -> Result<RevisionSink, ConfigError> {
        let mut sink = RevisionSink::new(self.build_backend()?)
            .with_dry_run(self.dry_run)
            .with_batch_size(self.batch_size);
        if let BackendConfig::Http { timeout_secs, .. } = &self.backend {
            sink = sink.with_timeout(Duration::from_secs(*timeout_secs));
        }
        Ok(sink)
    }

    /// Everything a run needs, wired together.
    pub fn build_pipeline(&self) -> Result<IngestPipeline, ConfigError> {
        Ok(IngestPipeline::new(self.build_registry()?, self.build_sink()?)
            .with_policy(self.error_policy)
            .with_stream_prefix(self.stream_prefix.clone()))
    }
}

/// Default store location (~/.local/share/graphline/graphline.db)
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("graphline").join("graphline.db")
}
