// =============================================================================
// Key-Value Persistence — single-key atomic store backing SystemState
// =============================================================================
//
// Only three operations are required of a persistence backend: an atomic
// `set` with a TTL, `get`, and `ping`. No list or scan is ever needed because
// the state store keeps exactly one logical document. `FileKvStore` is the
// only implementation carried here, grounded on `runtime_config.rs`'s
// write-to-tmp-then-rename pattern so a crash mid-write never leaves a
// corrupt or partial document on disk.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A record written to the store: the raw JSON payload plus the unix-ms
/// timestamp it expires at.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    value: String,
    expires_at_ms: u64,
}

/// Single-key, atomic-write, TTL-aware persistence backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically write `value` under `key`, expiring after `ttl_secs`.
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Read the value stored under `key`. Returns `Ok(None)` if absent or
    /// expired; an expired record is treated identically to a missing one.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Liveness check against the backend itself.
    async fn ping(&self) -> Result<()>;
}

/// File-backed `KvStore`: one JSON document per key, written via a
/// write-to-`.tmp`-then-`rename` sequence so a crash mid-write never
/// corrupts the previously committed document.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create state directory {}", self.dir.display()))?;

        let record = StoredRecord {
            value: value.to_string(),
            expires_at_ms: Self::now_ms() + ttl_secs.saturating_mul(1000),
        };
        let content = serde_json::to_string(&record).context("failed to serialize kv record")?;

        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp kv record to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename tmp kv record to {}", path.display()))?;

        debug!(key, ttl_secs, "kv record persisted (atomic)");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("failed to read kv record {}", path.display())),
        };

        let record: StoredRecord = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse kv record {}", path.display()))?;

        if Self::now_ms() >= record.expires_at_ms {
            debug!(key, "kv record expired");
            return Ok(None);
        }

        Ok(Some(record.value))
    }

    async fn ping(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("kv store directory unavailable: {}", self.dir.display()))?;
        Ok(())
    }
}

/// Convenience constructor matching the reference engine's state directory
/// convention (sibling to the binary's working directory).
pub fn default_state_dir() -> PathBuf {
    Path::new("data").to_path_buf()
}
