use crate::buffer::Batch;
use crate::domain::Envelope;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "blob";
const TEMP_EXTENSION: &str = "tmp";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Record of {size} bytes exceeds storage capacity of {max} bytes")]
    RecordTooLarge { size: u64, max: u64 },
    #[error("Storage is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
    pub max_size: u64, // bytes
    pub retention_period: Duration,
    pub maintenance_period: Duration,
    pub compression: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: std::env::temp_dir().join("rask-metrics-exporter"),
            max_size: 50 * 1024 * 1024,                            // 50MiB
            retention_period: Duration::from_secs(7 * 24 * 3600), // 7 days
            maintenance_period: Duration::from_secs(60),
            compression: false,
        }
    }
}

/// On-disk payload of one record.
#[derive(Serialize, Deserialize)]
struct StoredBatch {
    id: String,
    written_at: DateTime<Utc>,
    min_retry_delay_ms: u64,
    envelopes: Vec<Envelope>,
}

/// A batch handed back by [`RetryStore::get`], already removed from disk.
#[derive(Debug, Clone)]
pub struct StorageRecord {
    pub batch: Batch,
    pub written_at: DateTime<Utc>,
    pub min_retry_delay: Duration,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
    pub remaining_bytes: u64,
}

/// A record file as seen in a directory listing. Timestamps come from the
/// file name, so no payload has to be read to order or filter records.
#[derive(Debug, Clone)]
struct RecordFile {
    path: PathBuf,
    written_micros: u64,
    ready_micros: u64,
    size: u64,
}

struct StoreState {
    current_usage: u64,
    last_written_micros: u64,
}

/// Disk-backed queue of undelivered batches, oldest first.
///
/// Every operation holds the state lock for its whole duration, so the
/// maintenance sweep never interleaves with `put` or `get`.
pub struct RetryStore {
    config: StorageConfig,
    state: Mutex<StoreState>,
    closed: AtomicBool,
    cancel: CancellationToken,
    maintenance_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RetryStore {
    pub async fn new(config: StorageConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.path).await?;
        let current_usage = Self::calculate_disk_usage(&config.path).await?;

        Ok(Self {
            config,
            state: Mutex::new(StoreState {
                current_usage,
                last_written_micros: 0,
            }),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            maintenance_task: parking_lot::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Persists a batch for a later retry. Failures are logged and swallowed;
    /// the returned path is `None` when nothing was written.
    pub async fn put(&self, batch: &Batch, min_retry_delay: Duration) -> Option<PathBuf> {
        let outcome = self
            .write_record(batch.id(), batch.envelopes(), None, min_retry_delay)
            .await;
        Self::log_write(batch.id(), outcome)
    }

    /// Puts a record back after a failed redelivery. The original write time
    /// is kept, so retention still counts from the first failure.
    pub async fn requeue(&self, record: &StorageRecord, min_retry_delay: Duration) -> Option<PathBuf> {
        let outcome = self
            .write_record(
                record.batch.id(),
                record.batch.envelopes(),
                Some(record.written_at),
                min_retry_delay,
            )
            .await;
        Self::log_write(record.batch.id(), outcome)
    }

    fn log_write(batch_id: &str, outcome: Result<PathBuf, StorageError>) -> Option<PathBuf> {
        match outcome {
            Ok(path) => Some(path),
            Err(StorageError::Closed) => {
                debug!("Storage closed, batch {batch_id} not persisted");
                None
            }
            Err(e) => {
                error!("Failed to persist batch {batch_id}: {e}. Telemetry will be lost.");
                None
            }
        }
    }

    async fn write_record(
        &self,
        id: &str,
        envelopes: &[Envelope],
        original_write: Option<DateTime<Utc>>,
        min_retry_delay: Duration,
    ) -> Result<PathBuf, StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        let written_at = original_write.unwrap_or_else(Utc::now);
        let stored = StoredBatch {
            id: id.to_string(),
            written_at,
            min_retry_delay_ms: min_retry_delay.as_millis() as u64,
            envelopes: envelopes.to_vec(),
        };
        let data = self.encode(&stored)?;
        let size = data.len() as u64;

        if size > self.config.max_size {
            return Err(StorageError::RecordTooLarge {
                size,
                max: self.config.max_size,
            });
        }

        let mut state = self.state.lock().await;

        if state.current_usage + size > self.config.max_size {
            let target = self.config.max_size - size;
            let evicted = self.evict_oldest(&mut state, target).await?;
            warn!("Storage at capacity, evicted {evicted} oldest records");
        }

        let original_micros = written_at.timestamp_micros().max(0) as u64;
        let written_micros = if original_write.is_some() {
            original_micros
        } else {
            // Strictly increasing so that file names keep arrival order.
            let micros = original_micros.max(state.last_written_micros + 1);
            state.last_written_micros = micros;
            micros
        };
        let ready_micros = now_micros().max(written_micros) + min_retry_delay.as_micros() as u64;

        let name = format!(
            "{written_micros:020}-{ready_micros:020}-{}",
            Uuid::new_v4().simple()
        );
        let final_path = self.config.path.join(format!("{name}.{RECORD_EXTENSION}"));
        let temp_path = self.config.path.join(format!("{name}.{TEMP_EXTENSION}"));

        write_atomically(&temp_path, &final_path, &data).await?;
        state.current_usage += size;

        debug!("Stored batch {id} ({size} bytes)");
        Ok(final_path)
    }

    /// Removes and returns the oldest record whose retry delay has elapsed.
    /// Unreadable records are deleted and skipped.
    pub async fn get(&self) -> Option<StorageRecord> {
        if self.is_closed() {
            return None;
        }

        let mut state = self.state.lock().await;
        let files = match self.list_records().await {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list stored records: {e}");
                return None;
            }
        };

        let now = now_micros();
        let expiry = self.expiry_threshold_micros(now);

        for file in files {
            if file.written_micros < expiry {
                debug!("Skipping expired record {}", file.path.display());
                self.remove_file(&mut state, &file).await;
                continue;
            }
            if file.ready_micros > now {
                continue;
            }

            let record = self.read_record(&file).await;
            // At-least-once: the record leaves the store once handed out.
            self.remove_file(&mut state, &file).await;

            match record {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!("Discarding corrupt record {}: {e}", file.path.display());
                }
            }
        }

        None
    }

    /// Deletes expired records and stale temp files, then evicts oldest
    /// records until the store fits its size cap.
    pub async fn maintenance(&self) -> Result<MaintenanceReport, StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        let mut state = self.state.lock().await;
        self.sweep_temp_files().await?;

        let expiry = self.expiry_threshold_micros(now_micros());
        let mut expired = 0;
        for file in self.list_records().await? {
            if file.written_micros < expiry && fs::remove_file(&file.path).await.is_ok() {
                expired += 1;
            }
        }

        // Resync with the directory, which is the source of truth.
        state.current_usage = self
            .list_records()
            .await?
            .iter()
            .map(|f| f.size)
            .sum();

        let evicted = if state.current_usage > self.config.max_size {
            self.evict_oldest(&mut state, self.config.max_size).await?
        } else {
            0
        };

        let report = MaintenanceReport {
            expired,
            evicted,
            remaining_bytes: state.current_usage,
        };
        if expired > 0 || evicted > 0 {
            info!(
                "Storage maintenance removed {expired} expired and {evicted} excess records ({} bytes remain)",
                report.remaining_bytes
            );
        }
        Ok(report)
    }

    /// Spawns the periodic maintenance task. Only the first call starts one.
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut slot = self.maintenance_task.lock();
        if slot.is_some() || self.is_closed() {
            return;
        }

        let store = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.config.maintenance_period;

        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = store.maintenance().await {
                            if !matches!(e, StorageError::Closed) {
                                error!("Storage maintenance failed: {e}");
                            }
                        }
                    }
                }
            }
            debug!("Storage maintenance task stopped");
        }));
    }

    /// Stops maintenance and waits for any in-flight operation to finish.
    /// Returns `false` when the store was already closed.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.cancel.cancel();
        let task = self.maintenance_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("Storage maintenance task ended abnormally: {e}");
        }

        // Wait out any put/get that entered before the flag flipped.
        let _state = self.state.lock().await;
        info!("Retry storage closed");
        true
    }

    /// Bytes currently held on disk, as tracked by the store.
    pub async fn total_size(&self) -> u64 {
        self.state.lock().await.current_usage
    }

    /// Number of persisted records, eligible or not.
    pub async fn len(&self) -> usize {
        let _state = self.state.lock().await;
        self.list_records().await.map(|f| f.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn evict_oldest(&self, state: &mut StoreState, target: u64) -> Result<usize, StorageError> {
        let mut evicted = 0;
        for file in self.list_records().await? {
            if state.current_usage <= target {
                break;
            }
            if fs::remove_file(&file.path).await.is_ok() {
                state.current_usage = state.current_usage.saturating_sub(file.size);
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    async fn remove_file(&self, state: &mut StoreState, file: &RecordFile) {
        match fs::remove_file(&file.path).await {
            Ok(()) => state.current_usage = state.current_usage.saturating_sub(file.size),
            Err(e) => warn!("Failed to remove record {}: {e}", file.path.display()),
        }
    }

    async fn read_record(&self, file: &RecordFile) -> Result<StorageRecord, StorageError> {
        let data = fs::read(&file.path).await?;
        let stored = self.decode(&data)?;
        Ok(StorageRecord {
            batch: Batch::with_id(stored.id, stored.envelopes),
            written_at: stored.written_at,
            min_retry_delay: Duration::from_millis(stored.min_retry_delay_ms),
            size_bytes: file.size,
        })
    }

    /// Record files sorted oldest first. Unparseable record names are
    /// treated as corrupt and removed.
    async fn list_records(&self) -> Result<Vec<RecordFile>, StorageError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.config.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some((written_micros, ready_micros)) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_record_name)
            else {
                warn!("Removing unrecognised record file {}", path.display());
                let _ = fs::remove_file(&path).await;
                continue;
            };
            let size = entry.metadata().await?.len();
            records.push(RecordFile {
                path,
                written_micros,
                ready_micros,
                size,
            });
        }

        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    async fn sweep_temp_files(&self) -> Result<(), StorageError> {
        let mut entries = fs::read_dir(&self.config.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMP_EXTENSION) {
                continue;
            }
            let age = entry
                .metadata()
                .await?
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or_default();
            if age > self.config.retention_period {
                debug!("Removing stale temp file {}", path.display());
                let _ = fs::remove_file(&path).await;
            }
        }
        Ok(())
    }

    fn expiry_threshold_micros(&self, now: u64) -> u64 {
        now.saturating_sub(self.config.retention_period.as_micros() as u64)
    }

    fn encode(&self, stored: &StoredBatch) -> Result<Vec<u8>, StorageError> {
        let json = serde_json::to_vec(stored)?;
        if !self.config.compression {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    fn decode(&self, data: &[u8]) -> Result<StoredBatch, StorageError> {
        if data.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(data);
            let mut json = Vec::new();
            decoder.read_to_end(&mut json)?;
            Ok(serde_json::from_slice(&json)?)
        } else {
            Ok(serde_json::from_slice(data)?)
        }
    }

    async fn calculate_disk_usage(path: &Path) -> Result<u64, StorageError> {
        let mut total_size = 0u64;
        let mut entries = fs::read_dir(path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION) {
                total_size += entry.metadata().await?.len();
            }
        }

        Ok(total_size)
    }
}

impl std::fmt::Debug for RetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStore")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Writes through a temp file and renames it into place. The temp file is
/// removed when any step fails, since the size accounting never sees it.
async fn write_atomically(temp_path: &Path, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
    let result = async {
        let mut file = fs::File::create(temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(temp_path, final_path).await
    }
    .await;

    if result.is_err()
        && let Err(e) = fs::remove_file(temp_path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove temp file {}: {e}", temp_path.display());
    }
    result
}

fn now_micros() -> u64 {
    Utc::now().timestamp_micros().max(0) as u64
}

fn parse_record_name(stem: &str) -> Option<(u64, u64)> {
    let mut parts = stem.splitn(3, '-');
    let written = parts.next()?.parse().ok()?;
    let ready = parts.next()?.parse().ok()?;
    parts.next()?;
    Some((written, ready))
}
