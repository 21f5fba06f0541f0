use crate::storage::StorageSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Only needed to collect from a live cluster.
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Remove every file from `path` on start. Sids restart at 0 with each
    /// process, so segments of a previous run would overlap new ones.
    #[serde(default = "default_true")]
    pub clear_on_start: bool,
    #[serde(default = "default_max_memory_generation")]
    pub max_memory_generation: usize,
    #[serde(default = "default_min_retirement", with = "humantime_serde")]
    pub min_retirement: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            clear_on_start: true,
            max_memory_generation: default_max_memory_generation(),
            min_retirement: default_min_retirement(),
        }
    }
}

impl StorageConfig {
    pub fn settings(&self) -> StorageSettings {
        StorageSettings {
            max_memory_generation: self.max_memory_generation,
            min_retirement: self.min_retirement,
            clear_on_start: self.clear_on_start,
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("~/.local/share/podlog/segments")
}

fn default_true() -> bool {
    true
}

fn default_max_memory_generation() -> usize {
    7000
}

fn default_min_retirement() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Delay before asking again for the log of a worker that is not ready.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Workers older than this whose log is still unavailable are ignored.
    #[serde(default = "default_give_up_after", with = "humantime_serde")]
    pub give_up_after: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry_delay: default_retry_delay(),
            give_up_after: default_give_up_after(),
        }
    }
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_give_up_after() -> Duration {
    Duration::from_secs(5 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub api_server: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Workers whose name starts with one of these are not collected.
    #[serde(default)]
    pub ignore_prefixes: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_server: "https://kubernetes.default.svc".to_string(),
            namespace: default_namespace(),
            token_file: None,
            ca_file: None,
            insecure: false,
            poll_interval: default_poll_interval(),
            ignore_prefixes: Vec::new(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Directory with the viewer bundle, served at `/`.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            static_dir: None,
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}
