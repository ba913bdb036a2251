use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fanout::ResourceClass;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.storyforge/data/storyforge.db` when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_capacity: default_cache_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Worker-pool size per resource class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_prompt_workers")]
    pub prompt: usize,
    #[serde(default = "default_image_workers")]
    pub image: usize,
    #[serde(default = "default_video_workers")]
    pub video: usize,
}

fn default_prompt_workers() -> usize {
    5
}

fn default_image_workers() -> usize {
    5
}

fn default_video_workers() -> usize {
    3
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt_workers(),
            image: default_image_workers(),
            video: default_video_workers(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn limit(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Prompt => self.prompt,
            ResourceClass::Image => self.image,
            ResourceClass::Video => self.video,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Sub-jobs still submitted after this long are failed. 0 disables.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> u64 {
    10
}

fn default_stale_after() -> u64 {
    6 * 60 * 60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_blocking_threads")]
    pub max_blocking_threads: usize,
}

fn default_blocking_threads() -> usize {
    num_cpus::get()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_blocking_threads: default_blocking_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_generation_poll")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

fn default_api_key_env() -> String {
    "STORYFORGE_API_KEY".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_generation_poll() -> u64 {
    5
}

fn default_max_wait() -> u64 {
    600
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            poll_interval_secs: default_generation_poll(),
            max_wait_secs: default_max_wait(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/aigc")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
