use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Frames larger than this close the connection.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7878".to_string(),
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    /// Buffered messages per queue before `Publish` blocks.
    pub capacity: usize,
    /// Time an in-flight message may stay unacknowledged.
    pub message_ttl_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            message_ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl QueueConfig {
    pub fn message_ttl(&self) -> Duration {
        Duration::from_millis(self.message_ttl_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WalConfig {
    pub directory: PathBuf,
    pub fsync: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./relaymq-data"),
            fsync: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub queues: QueueConfig,
    pub wal: WalConfig,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}
