use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root of the fjall keyspaces (`{data_dir}/tasks`, `{data_dir}/queue`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
        }
    }
}

impl ServerConfig {
    pub fn tasks_path(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue")
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Queue names
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_input_queue")]
    pub input_queue: String,
    #[serde(default = "default_success_queue")]
    pub success_queue: String,
    #[serde(default = "default_error_queue")]
    pub error_queue: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            input_queue: default_input_queue(),
            success_queue: default_success_queue(),
            error_queue: default_error_queue(),
        }
    }
}

impl BrokerConfig {
    pub fn queues(&self) -> [&str; 3] {
        [
            self.input_queue.as_str(),
            self.success_queue.as_str(),
            self.error_queue.as_str(),
        ]
    }
}

fn default_input_queue() -> String {
    "download.requests".to_string()
}

fn default_success_queue() -> String {
    "download.results.success".to_string()
}

fn default_error_queue() -> String {
    "download.results.error".to_string()
}

/// Downloader worker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Channel prefetch for each worker process
    #[serde(default = "default_max_simultaneous_downloads")]
    pub max_simultaneous_downloads: u16,
    /// Number of worker launchers started by `vidbox server`
    #[serde(default = "default_processes")]
    pub processes: usize,
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: PathBuf,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_downloads: default_max_simultaneous_downloads(),
            processes: default_processes(),
            ytdlp_bin: default_ytdlp_bin(),
            tmp_dir: default_tmp_dir(),
        }
    }
}

fn default_max_simultaneous_downloads() -> u16 {
    2
}

fn default_processes() -> usize {
    1
}

fn default_ytdlp_bin() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_tmp_dir() -> PathBuf {
    std::env::temp_dir().join("vidbox")
}

/// Result consumer supervision
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultsConfig {
    #[serde(default = "default_restart_backoff_ms")]
    pub restart_backoff_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Times a result may crash its handler before it is dead-lettered
    #[serde(default = "default_max_abandoned")]
    pub max_abandoned: u32,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            restart_backoff_ms: default_restart_backoff_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_abandoned: default_max_abandoned(),
        }
    }
}

impl ResultsConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn default_restart_backoff_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_max_abandoned() -> u32 {
    3
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Directory for the local provider
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::Local,
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/media")
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotifierConfig {
    /// POST target for applied results; log-only when unset
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
