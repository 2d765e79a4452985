//! Two-tier cache with L1 (memory) and L2 (disk) storage
//!
//! - L1: [`MemoryCache`] for hot objects
//! - L2: one file per object under a base directory, written behind by a
//!   background task so admission never waits on disk I/O
//!
//! L2 hits are promoted to L1 with their original expiry. Objects persist
//! across restarts until their freshness horizon passes.
//!
//! The writer task also sweeps the L2 directory: once at startup, on a fixed
//! interval, and whenever a write pushes the tracked size past the limit.
//! Expired and unreadable files are removed first, then files in order of
//! expiry until the directory fits in `max_size_bytes`.

use crate::cache::{AdmitOutcome, CacheStats, ContentCache, MemoryCache};
use crate::error::{GatewayError, Result};
use crate::models::{CacheEntry, CacheKey};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Pending disk writes held in memory before admission starts failing
const DISK_WRITE_QUEUE_CAPACITY: usize = 64;

/// Largest record header accepted when scanning L2 files
const MAX_RECORD_HEADER: usize = 64 * 1024;

/// L2 directory settings
#[derive(Debug, Clone)]
pub struct L2Config {
    /// Base directory for L2 files
    pub base_path: PathBuf,
    /// Upper bound on the bytes kept under `base_path`
    pub max_size_bytes: u64,
    /// Interval between periodic sweeps
    pub sweep_interval: Duration,
}

impl L2Config {
    /// Settings for `base_path` with a 10GB limit and a 10 minute sweep interval
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        L2Config {
            base_path: base_path.into(),
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            sweep_interval: Duration::from_secs(600),
        }
    }
}

/// Message for async disk write operations
#[derive(Debug)]
enum DiskWriteMessage {
    Write {
        key: CacheKey,
        entry: CacheEntry,
        expires_at: SystemTime,
    },
    Shutdown,
}

/// Header of an L2 file, followed on disk by the raw body
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    expires_at_secs: u64,
    status: u16,
    headers: Vec<(String, String)>,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct TieredCacheStats {
    pub l1_entries: usize,
    pub l1_bytes: usize,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub disk_writes: u64,
    pub disk_errors: u64,
    pub disk_evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    disk_writes: AtomicU64,
    disk_errors: AtomicU64,
    disk_evictions: AtomicU64,
}

/// Outcome of one pass over the L2 directory
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SweepReport {
    removed_expired: usize,
    removed_for_size: usize,
    remaining_bytes: u64,
}

/// An L2 file found by a sweep
struct DiskFile {
    path: PathBuf,
    size: u64,
    expires_at_secs: u64,
    modified: SystemTime,
}

/// Two-tier cache with memory (L1) and disk (L2) storage
pub struct TieredCache {
    l1: MemoryCache,
    l2_base_path: PathBuf,
    l2_enabled: bool,
    counters: Arc<Counters>,
    disk_writer_tx: Option<mpsc::Sender<DiskWriteMessage>>,
}

impl TieredCache {
    /// Create a new two-tier cache with default L2 limits
    ///
    /// # Arguments
    /// * `ttl` - Freshness horizon of admitted entries
    /// * `l1_max_size_bytes` - Maximum L1 (memory) cache size
    /// * `l2_base_path` - Base directory for L2 (disk) cache
    pub async fn new(
        ttl: Duration,
        l1_max_size_bytes: usize,
        l2_base_path: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::with_l2_config(ttl, l1_max_size_bytes, L2Config::new(l2_base_path.as_ref())).await
    }

    /// Create a new two-tier cache
    ///
    /// Falls back to memory-only operation if the L2 directory cannot be created.
    pub async fn with_l2_config(
        ttl: Duration,
        l1_max_size_bytes: usize,
        l2: L2Config,
    ) -> Result<Self> {
        if let Err(e) = fs::create_dir_all(&l2.base_path).await {
            warn!("Failed to create L2 cache directory {:?}: {}", l2.base_path, e);
            return Ok(Self::memory_only(ttl, l1_max_size_bytes));
        }

        info!(
            "Initializing two-tier cache: L1={}MB, L2={:?} (max {}MB, sweep every {:?})",
            l1_max_size_bytes / 1024 / 1024,
            l2.base_path,
            l2.max_size_bytes / 1024 / 1024,
            l2.sweep_interval
        );

        let (tx, rx) = mpsc::channel(DISK_WRITE_QUEUE_CAPACITY);
        let counters = Arc::new(Counters::default());
        let l2_base_path = l2.base_path.clone();

        tokio::spawn(Self::disk_writer_task(rx, l2, counters.clone()));

        Ok(TieredCache {
            l1: MemoryCache::new(ttl, l1_max_size_bytes),
            l2_base_path,
            l2_enabled: true,
            counters,
            disk_writer_tx: Some(tx),
        })
    }

    /// Create a memory-only cache (L2 disabled)
    pub fn memory_only(ttl: Duration, l1_max_size_bytes: usize) -> Self {
        info!("Creating memory-only tiered cache (L2 disabled)");

        TieredCache {
            l1: MemoryCache::new(ttl, l1_max_size_bytes),
            l2_base_path: PathBuf::new(),
            l2_enabled: false,
            counters: Arc::new(Counters::default()),
            disk_writer_tx: None,
        }
    }

    /// Get cache statistics
    pub fn get_stats(&self) -> TieredCacheStats {
        let (l1_entries, l1_bytes) = self.l1.size_stats();
        TieredCacheStats {
            l1_entries,
            l1_bytes,
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            disk_writes: self.counters.disk_writes.load(Ordering::Relaxed),
            disk_errors: self.counters.disk_errors.load(Ordering::Relaxed),
            disk_evictions: self.counters.disk_evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop an entry from L1 only; used to exercise L2 reads
    pub fn evict_from_memory(&self, key: &CacheKey) -> Result<bool> {
        self.l1.remove(key)
    }

    /// Lookup in L2 disk cache
    async fn lookup_l2(&self, key: &CacheKey) -> Result<Option<(CacheEntry, SystemTime)>> {
        let file_path = l2_file_path(&self.l2_base_path, key);

        let data = match fs::read(&file_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GatewayError::CacheError(format!(
                    "Failed to read {}: {}",
                    file_path.display(),
                    e
                )))
            }
        };

        let (record, body) = match decode_record(&data) {
            Some(decoded) => decoded,
            None => {
                warn!("Corrupt L2 cache file, removing: {}", file_path.display());
                let _ = fs::remove_file(&file_path).await;
                return Ok(None);
            }
        };

        // Hash collision with a different key
        if record.key != key.as_str() {
            return Ok(None);
        }

        let expires_at = UNIX_EPOCH + Duration::from_secs(record.expires_at_secs);
        if expires_at <= SystemTime::now() {
            debug!("L2 entry expired, removing: {}", key);
            let _ = fs::remove_file(&file_path).await;
            return Ok(None);
        }

        let entry = CacheEntry::new(record.status, record.headers, Bytes::copy_from_slice(body));
        Ok(Some((entry, expires_at)))
    }

    /// Async disk writer task
    ///
    /// Owns the L2 directory: writes and sweeps never run concurrently.
    async fn disk_writer_task(
        mut rx: mpsc::Receiver<DiskWriteMessage>,
        l2: L2Config,
        counters: Arc<Counters>,
    ) {
        info!("Disk writer task started");

        let period = l2.sweep_interval.max(Duration::from_secs(1));
        let mut sweep_timer = tokio::time::interval(period);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut disk_bytes = 0u64;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(DiskWriteMessage::Write {
                        key,
                        entry,
                        expires_at,
                    }) => match write_to_disk(&l2.base_path, &key, &entry, expires_at).await {
                        Ok(written) => {
                            disk_bytes += written;
                            if disk_bytes > l2.max_size_bytes {
                                disk_bytes = run_sweep(&l2, &counters, disk_bytes).await;
                            }
                            counters.disk_writes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            error!("Failed to write to L2 cache: {}", e);
                            counters.disk_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    Some(DiskWriteMessage::Shutdown) | None => {
                        info!("Disk writer task shutting down");
                        break;
                    }
                },
                // The first tick completes immediately and sweeps at startup
                _ = sweep_timer.tick() => {
                    disk_bytes = run_sweep(&l2, &counters, disk_bytes).await;
                }
            }
        }
    }
}

#[async_trait]
impl ContentCache for TieredCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.l1.get(key)? {
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            debug!("L1 cache hit: {}", key);
            return Ok(Some(entry));
        }

        if self.l2_enabled {
            if let Some((entry, expires_at)) = self.lookup_l2(key).await? {
                self.l1.put(key, entry.clone(), expires_at)?;
                self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                debug!("L2 cache hit (promoted to L1): {}", key);
                return Ok(Some(entry));
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss: {}", key);
        Ok(None)
    }

    async fn admit(&self, key: &CacheKey, entry: CacheEntry) -> Result<AdmitOutcome> {
        let expires_at = SystemTime::now() + self.l1.ttl();
        let outcome = self.l1.put(key, entry.clone(), expires_at)?;

        if outcome == AdmitOutcome::Stored && self.l2_enabled {
            if let Some(tx) = &self.disk_writer_tx {
                let msg = DiskWriteMessage::Write {
                    key: key.clone(),
                    entry,
                    expires_at,
                };
                tx.try_send(msg).map_err(|e| match e {
                    TrySendError::Full(_) => {
                        self.counters.disk_errors.fetch_add(1, Ordering::Relaxed);
                        GatewayError::CacheError(format!(
                            "disk write queue full, {} not persisted",
                            key
                        ))
                    }
                    TrySendError::Closed(_) => {
                        GatewayError::CacheError("disk writer has stopped".to_string())
                    }
                })?;
            }
        }

        Ok(outcome)
    }

    fn stats(&self) -> CacheStats {
        let stats = self.get_stats();
        CacheStats {
            total_entries: stats.l1_entries,
            total_bytes: stats.l1_bytes,
            hits: stats.l1_hits + stats.l2_hits,
            misses: stats.misses,
        }
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(tx) = &self.disk_writer_tx {
            // Dropping the sender also stops the task once the queue drains
            let _ = tx.try_send(DiskWriteMessage::Shutdown);
        }
    }
}

/// L2 file layout: `u32` record length (LE), bincode record, raw body
fn encode_record(record: &DiskRecord, body: &[u8]) -> Result<Vec<u8>> {
    let header = bincode::serialize(record)
        .map_err(|e| GatewayError::CacheError(format!("Failed to encode record: {}", e)))?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| GatewayError::CacheError("record header too large".to_string()))?;

    let mut out = Vec::with_capacity(4 + header.len() + body.len());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(body);
    Ok(out)
}

fn decode_record(data: &[u8]) -> Option<(DiskRecord, &[u8])> {
    let len_bytes: [u8; 4] = data.get(0..4)?.try_into().ok()?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header = data.get(4..4 + header_len)?;
    let record: DiskRecord = bincode::deserialize(header).ok()?;
    Some((record, &data[4 + header_len..]))
}

/// Read only the record header of an L2 file
async fn read_record_header(path: &Path) -> Option<DiskRecord> {
    let mut file = fs::File::open(path).await.ok()?;
    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes).await.ok()?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if header_len > MAX_RECORD_HEADER {
        return None;
    }

    let mut header = vec![0u8; header_len];
    file.read_exact(&mut header).await.ok()?;
    bincode::deserialize(&header).ok()
}

async fn run_sweep(l2: &L2Config, counters: &Counters, current_bytes: u64) -> u64 {
    match sweep_disk(&l2.base_path, l2.max_size_bytes).await {
        Ok(report) => {
            let removed = (report.removed_expired + report.removed_for_size) as u64;
            counters.disk_evictions.fetch_add(removed, Ordering::Relaxed);
            if removed > 0 {
                info!(
                    "L2 sweep: {} expired, {} over size limit, {} bytes remain",
                    report.removed_expired, report.removed_for_size, report.remaining_bytes
                );
            }
            report.remaining_bytes
        }
        Err(e) => {
            warn!("L2 sweep failed: {}", e);
            current_bytes
        }
    }
}

/// Sweep the L2 directory
///
/// Removes expired, unreadable and leftover temporary files, then evicts the
/// files closest to expiry until the directory holds at most `max_size_bytes`.
async fn sweep_disk(base_path: &Path, max_size_bytes: u64) -> Result<SweepReport> {
    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let mut report = SweepReport::default();
    let mut files = Vec::new();

    // Layout is fixed at two directory levels: XX/YY/<hash>.bin
    let mut dirs = vec![(base_path.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = dirs.pop() {
        let mut entries = fs::read_dir(&dir).await.map_err(|e| {
            GatewayError::CacheError(format!("Failed to read {}: {}", dir.display(), e))
        })?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };

            if metadata.is_dir() {
                if depth < 2 {
                    dirs.push((path, depth + 1));
                }
                continue;
            }

            match path.extension().and_then(|ext| ext.to_str()) {
                Some("bin") => {}
                Some("tmp") => {
                    let _ = fs::remove_file(&path).await;
                    continue;
                }
                _ => continue,
            }

            match read_record_header(&path).await {
                Some(record) if record.expires_at_secs > now_secs => files.push(DiskFile {
                    path,
                    size: metadata.len(),
                    expires_at_secs: record.expires_at_secs,
                    modified: metadata.modified().unwrap_or(UNIX_EPOCH),
                }),
                _ => {
                    if fs::remove_file(&path).await.is_ok() {
                        report.removed_expired += 1;
                    }
                }
            }
        }
    }

    let mut total: u64 = files.iter().map(|f| f.size).sum();
    if total > max_size_bytes {
        files.sort_by_key(|f| (f.expires_at_secs, f.modified));
        for file in &files {
            if total <= max_size_bytes {
                break;
            }
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    total -= file.size;
                    report.removed_for_size += 1;
                }
                Err(e) => warn!("Failed to evict {}: {}", file.path.display(), e),
            }
        }
    }

    report.remaining_bytes = total;
    Ok(report)
}

/// Write an entry to disk via a temporary file and rename
///
/// Returns the number of bytes written.
async fn write_to_disk(
    base_path: &Path,
    key: &CacheKey,
    entry: &CacheEntry,
    expires_at: SystemTime,
) -> Result<u64> {
    let file_path = l2_file_path(base_path, key);

    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            GatewayError::CacheError(format!("Failed to create cache directory: {}", e))
        })?;
    }

    let record = DiskRecord {
        key: key.as_str().to_string(),
        expires_at_secs: expires_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        status: entry.status,
        headers: entry.headers.clone(),
    };
    let data = encode_record(&record, &entry.body)?;

    let tmp_path = file_path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
        GatewayError::CacheError(format!("Failed to create cache file: {}", e))
    })?;
    file.write_all(&data)
        .await
        .map_err(|e| GatewayError::CacheError(format!("Failed to write data: {}", e)))?;
    file.sync_all()
        .await
        .map_err(|e| GatewayError::CacheError(format!("Failed to sync file: {}", e)))?;
    drop(file);

    fs::rename(&tmp_path, &file_path)
        .await
        .map_err(|e| GatewayError::CacheError(format!("Failed to publish cache file: {}", e)))?;

    debug!("Wrote to L2: {} ({} bytes)", key, entry.body.len());
    Ok(data.len() as u64)
}

/// L2 file path for a key: `XX/YY/<hash>.bin`
///
/// XXH3 keeps the layout stable across builds so files written by one process
/// are found by the next.
fn l2_file_path(base_path: &Path, key: &CacheKey) -> PathBuf {
    let hash = xxh3_64(key.as_str().as_bytes());
    let dir1 = format!("{:02x}", (hash >> 8) & 0xFF);
    let dir2 = format!("{:02x}", hash & 0xFF);
    base_path
        .join(dir1)
        .join(dir2)
        .join(format!("{:016x}.bin", hash))
}
