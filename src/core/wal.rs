//! Durable log for RelayMQ queues.
//!
//! Every durable queue with undelivered messages owns one log unit: a text file
//! `<directory>/<escaped-name>.log` holding one payload per line in FIFO order.
//! The unit mirrors the undelivered tail of the queue, in-flight message
//! included, so its first line is always the oldest uncommitted message.
//!
//! - `append` adds a line, creating the unit on first write
//! - `commit_oldest` drops the first line and removes the unit once empty
//! - `append_live` / `commit_live` do the same for a queue instance and stop
//!   writing once that queue is deleted, so a stale delivery cannot touch the
//!   unit of a queue later declared under the same name
//! - `replay_all` reads every unit left by a previous run without touching it

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::WalConfig;
use crate::core::error::BrokerError;
use crate::core::queue::Queue;

const UNIT_SUFFIX: &str = ".log";
const TMP_SUFFIX: &str = ".log.tmp";

/// Per-directory durable log. Append and commit on the same unit are
/// serialized by that unit's lock; different units proceed independently.
#[derive(Debug)]
pub struct DurabilityLog {
    directory: PathBuf,
    fsync: bool,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DurabilityLog {
    /// Opens (creating if needed) the log directory.
    pub async fn open(config: &WalConfig) -> Result<Self, BrokerError> {
        fs::create_dir_all(&config.directory)
            .await
            .map_err(BrokerError::Persistence)?;
        Ok(Self {
            directory: config.directory.clone(),
            fsync: config.fsync,
            locks: DashMap::new(),
        })
    }

    /// Location of the unit backing `queue`.
    pub fn unit_path(&self, queue: &str) -> PathBuf {
        self.directory
            .join(format!("{}{UNIT_SUFFIX}", escape_name(queue)))
    }

    fn lock_for(&self, queue: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Appends `payload` as the newest entry of the queue's unit.
    pub async fn append(&self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        let lock = self.lock_for(queue);
        let _guard = lock.lock().await;

        let mut line = escape_payload(payload);
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.unit_path(queue))
            .await
            .map_err(BrokerError::Persistence)?;
        file.write_all(line.as_bytes())
            .await
            .map_err(BrokerError::Persistence)?;
        file.flush().await.map_err(BrokerError::Persistence)?;
        if self.fsync {
            file.sync_data().await.map_err(BrokerError::Persistence)?;
        }
        Ok(())
    }

    /// Drops the oldest entry. Returns `false` when the unit did not exist.
    pub async fn commit_oldest(&self, queue: &str) -> Result<bool, BrokerError> {
        let lock = self.lock_for(queue);
        let _guard = lock.lock().await;

        let path = self.unit_path(queue);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(queue, "commit on a missing log unit");
                return Ok(false);
            }
            Err(e) => return Err(BrokerError::Persistence(e)),
        };

        let rest = raw.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        if rest.is_empty() {
            fs::remove_file(&path)
                .await
                .map_err(BrokerError::Persistence)?;
            debug!(queue, "log unit drained and removed");
        } else {
            self.rewrite(&path, rest).await?;
        }
        Ok(true)
    }

    // Replace the unit through a temporary file so a crash mid-write leaves
    // either the old or the new contents.
    async fn rewrite(&self, path: &Path, contents: &str) -> Result<(), BrokerError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(BrokerError::Persistence)?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(BrokerError::Persistence)?;
        file.flush().await.map_err(BrokerError::Persistence)?;
        if self.fsync {
            file.sync_data().await.map_err(BrokerError::Persistence)?;
        }
        drop(file);
        fs::rename(&tmp, path)
            .await
            .map_err(BrokerError::Persistence)
    }

    /// Current entries of one unit, oldest first. A missing unit has none.
    pub async fn entries(&self, queue: &str) -> Result<Vec<String>, BrokerError> {
        read_unit(&self.unit_path(queue)).await
    }

    /// Deletes the queue's unit, if any.
    pub async fn remove(&self, queue: &str) -> Result<(), BrokerError> {
        let lock = self.lock_for(queue);
        let _guard = lock.lock().await;
        match fs::remove_file(self.unit_path(queue)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BrokerError::Persistence(e)),
        }?;
        self.locks.remove(queue);
        Ok(())
    }

    /// Appends on behalf of a live queue. Once `queue` is deleted this fails
    /// with `UnknownQueue` and leaves the unit alone, even if the name has
    /// since been declared again.
    pub async fn append_live(&self, queue: &Queue, payload: &str) -> Result<(), BrokerError> {
        let _gate = queue.log_gate().lock().await;
        if queue.is_closed() {
            return Err(BrokerError::UnknownQueue(queue.name().to_string()));
        }
        self.append(queue.name(), payload).await
    }

    /// Commits the oldest entry on behalf of a live queue. Returns `false`
    /// without touching the log when `queue` has been deleted.
    pub async fn commit_live(&self, queue: &Queue) -> Result<bool, BrokerError> {
        let _gate = queue.log_gate().lock().await;
        if queue.is_closed() {
            debug!(queue = queue.name(), "skipping commit for a deleted queue");
            return Ok(false);
        }
        self.commit_oldest(queue.name()).await
    }

    /// Reads every unit left in the directory, sorted by queue name.
    /// Units are left in place; empty units and stale temporaries are removed.
    pub async fn replay_all(&self) -> Result<Vec<(String, Vec<String>)>, BrokerError> {
        let mut units = Vec::new();
        let mut dir = fs::read_dir(&self.directory)
            .await
            .map_err(BrokerError::Persistence)?;

        while let Some(entry) = dir.next_entry().await.map_err(BrokerError::Persistence)? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if file_name.ends_with(TMP_SUFFIX) {
                warn!(file = file_name, "removing interrupted log rewrite");
                fs::remove_file(&path)
                    .await
                    .map_err(BrokerError::Persistence)?;
                continue;
            }

            let Some(stem) = file_name.strip_suffix(UNIT_SUFFIX) else {
                continue;
            };
            let Some(queue) = unescape_name(stem) else {
                warn!(file = file_name, "skipping log unit with undecodable name");
                continue;
            };

            let entries = read_unit(&path).await?;
            if entries.is_empty() {
                fs::remove_file(&path)
                    .await
                    .map_err(BrokerError::Persistence)?;
                continue;
            }
            info!(queue = %queue, entries = entries.len(), "found durable log unit");
            units.push((queue, entries));
        }

        units.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(units)
    }
}

async fn read_unit(path: &Path) -> Result<Vec<String>, BrokerError> {
    match fs::read_to_string(path).await {
        Ok(raw) => Ok(raw.lines().map(unescape_payload).collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(BrokerError::Persistence(e)),
    }
}

/// Maps a queue name to a file-name-safe stem: bytes outside
/// `[A-Za-z0-9_.-]` become `%XX`.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

pub fn unescape_name(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Keeps one payload on one line.
pub fn escape_payload(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len());
    for c in payload.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape_payload(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_log() -> (DurabilityLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log = DurabilityLog::open(&WalConfig {
            directory: temp_dir.path().to_path_buf(),
            fsync: true,
        })
        .await
        .unwrap();
        (log, temp_dir)
    }

    #[tokio::test]
    async fn commit_removes_oldest_then_the_unit() {
        let (log, _dir) = open_log().await;
        log.append("orders", "a").await.unwrap();
        log.append("orders", "b").await.unwrap();
        assert_eq!(log.entries("orders").await.unwrap(), vec!["a", "b"]);

        assert!(log.commit_oldest("orders").await.unwrap());
        assert_eq!(log.entries("orders").await.unwrap(), vec!["b"]);
        assert!(log.unit_path("orders").exists());

        assert!(log.commit_oldest("orders").await.unwrap());
        assert!(!log.unit_path("orders").exists());
        assert!(!log.commit_oldest("orders").await.unwrap());
    }

    #[tokio::test]
    async fn replay_preserves_units_and_order() {
        let (log, dir) = open_log().await;
        log.append("R", "1").await.unwrap();
        log.append("R", "2").await.unwrap();
        log.append("multi line", "x\ny\\z").await.unwrap();
        log.append("multi line", "").await.unwrap();
        std::fs::write(dir.path().join("empty.log"), "").unwrap();
        std::fs::write(dir.path().join("R.log.tmp"), "junk").unwrap();

        let units = log.replay_all().await.unwrap();
        assert_eq!(
            units,
            vec![
                ("R".to_string(), vec!["1".to_string(), "2".to_string()]),
                (
                    "multi line".to_string(),
                    vec!["x\ny\\z".to_string(), String::new()]
                ),
            ]
        );
        assert!(log.unit_path("R").exists());
        assert!(!dir.path().join("empty.log").exists());
        assert!(!dir.path().join("R.log.tmp").exists());
    }

    #[tokio::test]
    async fn closed_queue_can_no_longer_write() {
        let (log, _dir) = open_log().await;
        let queue = Queue::new("gone", true, 4);
        log.append_live(&queue, "a").await.unwrap();
        log.append_live(&queue, "b").await.unwrap();
        assert!(log.commit_live(&queue).await.unwrap());

        queue.close();
        let err = log.append_live(&queue, "c").await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownQueue(_)));
        assert!(!log.commit_live(&queue).await.unwrap());
        assert_eq!(log.entries("gone").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (log, _dir) = open_log().await;
        log.append("tmp", "x").await.unwrap();
        log.remove("tmp").await.unwrap();
        log.remove("tmp").await.unwrap();
        assert!(log.entries("tmp").await.unwrap().is_empty());
    }

    #[test]
    fn names_map_to_safe_file_stems() {
        assert_eq!(escape_name("a/b c"), "a%2Fb%20c");
        assert_eq!(unescape_name("a%2Fb%20c").as_deref(), Some("a/b c"));
        assert_eq!(unescape_name("bad%2"), None);
        assert_eq!(unescape_payload(&escape_payload("p\\n\r\n")), "p\\n\r\n");
    }
}
