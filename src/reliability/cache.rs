use crate::domain::LogEvent;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Entry of {size} bytes can never fit in a {max_size} byte cache")]
    EntryTooLarge { size: u64, max_size: u64 },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub directory: PathBuf,
    /// Upper bound on the sum of serialized record sizes, in bytes.
    pub max_size: u64,
}

/// One persisted record: the event plus enough metadata to re-establish
/// FIFO order after a restart. Each record is a self-describing JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub seq: u64,
    pub cached_at: String,
    pub payload: LogEvent,
}

impl CacheEntry {
    /// The zero-padded sequence prefix makes lexicographic file-name order
    /// equal insertion order.
    fn file_name(&self) -> String {
        record_file_name(self.seq, &self.id)
    }
}

fn record_file_name(seq: u64, id: &str) -> String {
    format!("{seq:020}-{id}.json")
}

fn seq_from_file_name(name: &str) -> Option<u64> {
    name.get(..20)?.parse().ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub count: u64,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    pub usage_percent: f64,
}

struct StoreState {
    next_seq: u64,
}

/// Size-bounded, FIFO-ordered, disk-persisted queue of events that failed
/// delivery.
///
/// All mutations (enqueue, evict, remove, clear, corrupt-record discard)
/// serialize on `state`; the byte/count totals are atomics written only inside
/// those critical sections, so `scan`/`stats` can run concurrently and never
/// observe a partially-applied size update.
pub struct CacheStore {
    directory: PathBuf,
    max_size: u64,
    total_bytes: AtomicU64,
    entry_count: AtomicU64,
    state: Mutex<StoreState>,
}

impl CacheStore {
    /// Opens (creating if needed) the cache directory and recovers totals and
    /// the next sequence number from whatever records are already on disk.
    pub async fn open(config: CacheConfig) -> Result<Self, CacheError> {
        fs::create_dir_all(&config.directory).await?;

        let mut total_bytes = 0u64;
        let mut entry_count = 0u64;
        let mut max_seq = 0u64;

        let mut entries = fs::read_dir(&config.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.ends_with(".json") {
                continue;
            }
            total_bytes += entry.metadata().await?.len();
            entry_count += 1;
            if let Some(seq) = seq_from_file_name(&name) {
                max_seq = max_seq.max(seq);
            }
        }

        debug!(
            directory = %config.directory.display(),
            entry_count,
            total_bytes,
            "opened retry cache"
        );

        Ok(Self {
            directory: config.directory,
            max_size: config.max_size,
            total_bytes: AtomicU64::new(total_bytes),
            entry_count: AtomicU64::new(entry_count),
            state: Mutex::new(StoreState {
                next_seq: max_seq + 1,
            }),
        })
    }

    /// Persists `event`, evicting oldest entries first until the new record
    /// fits. A record that exceeds `max_size` on its own is never admitted
    /// and is reported as [`CacheError::EntryTooLarge`].
    pub async fn enqueue(&self, event: &LogEvent) -> Result<String, CacheError> {
        let mut state = self.state.lock().await;

        let entry = CacheEntry {
            id: Uuid::new_v4().to_string(),
            seq: state.next_seq,
            cached_at: Utc::now().to_rfc3339(),
            payload: event.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&entry)?;
        let size = bytes.len() as u64;

        if size > self.max_size {
            warn!(
                size,
                max_size = self.max_size,
                "event too large to cache; dropping"
            );
            return Err(CacheError::EntryTooLarge {
                size,
                max_size: self.max_size,
            });
        }

        while self.total_bytes.load(Ordering::Acquire) + size > self.max_size
            && self.entry_count.load(Ordering::Acquire) > 0
        {
            self.evict_oldest_locked().await?;
        }

        let path = self.directory.join(entry.file_name());
        let mut file = fs::File::create(&path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;

        self.total_bytes.fetch_add(size, Ordering::Release);
        self.entry_count.fetch_add(1, Ordering::Release);
        state.next_seq += 1;

        debug!(id = %entry.id, seq = entry.seq, size, "cached event for retry");
        Ok(entry.id)
    }

    /// Re-reads current on-disk state and returns live entries in insertion
    /// order. Unreadable or corrupt records are discarded (size accounted)
    /// and the scan continues past them.
    pub async fn scan(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut out = Vec::new();

        for name in self.list_record_names().await? {
            let path = self.directory.join(&name);
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // Removed by a concurrent drain between listing and reading.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(record = %name, error = %e, "unreadable cache record; discarding");
                    self.discard_record(&path).await;
                    continue;
                }
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    warn!(record = %name, error = %e, "corrupt cache record; discarding");
                    self.discard_record(&path).await;
                }
            }
        }

        Ok(out)
    }

    /// Deletes the persisted record for `entry` if present. Idempotent:
    /// returns `Ok(false)` when the record is already gone.
    pub async fn remove(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let _state = self.state.lock().await;
        let path = self.directory.join(entry.file_name());

        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        match fs::remove_file(&path).await {
            Ok(()) => {
                self.subtract_record(size);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every record and resets the totals. Returns the number removed.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let _state = self.state.lock().await;
        let mut removed = 0u64;

        for name in self.list_record_names().await? {
            match fs::remove_file(self.directory.join(&name)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.total_bytes.store(0, Ordering::Release);
        self.entry_count.store(0, Ordering::Release);
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        let size_bytes = self.total_bytes.load(Ordering::Acquire);
        let usage_percent = if self.max_size > 0 {
            size_bytes as f64 / self.max_size as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            count: self.entry_count.load(Ordering::Acquire),
            size_bytes,
            max_size_bytes: self.max_size,
            usage_percent,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Record file names in insertion order.
    async fn list_record_names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && name.ends_with(".json")
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Caller must hold `state`.
    async fn evict_oldest_locked(&self) -> Result<(), CacheError> {
        let Some(oldest) = self.list_record_names().await?.into_iter().next() else {
            return Ok(());
        };
        let path = self.directory.join(&oldest);
        let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);

        match fs::remove_file(&path).await {
            Ok(()) => {
                self.subtract_record(size);
                warn!(
                    record = %oldest,
                    size,
                    "evicted oldest cached event to stay under the size bound"
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops a record found unreadable during a scan, treating it as already
    /// evicted. Takes the mutation lock for the size accounting.
    async fn discard_record(&self, path: &Path) {
        let _state = self.state.lock().await;
        let size = fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(path).await {
            Ok(()) => self.subtract_record(size),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(record = %path.display(), error = %e, "failed to discard cache record"),
        }
    }

    /// Caller must hold `state`; saturating so stray records cannot wrap the
    /// totals below zero.
    fn subtract_record(&self, size: u64) {
        let total = self.total_bytes.load(Ordering::Acquire);
        self.total_bytes
            .store(total.saturating_sub(size), Ordering::Release);
        let count = self.entry_count.load(Ordering::Acquire);
        self.entry_count
            .store(count.saturating_sub(1), Ordering::Release);
    }
}
