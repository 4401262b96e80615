//! Snapshot system — durable state checkpoints with integrity
//!
//! On a fixed interval the engine serializes balances, open and closed
//! positions, the trigger index, and metadata into a versioned, checksummed,
//! zstd-compressed blob. Files are timestamp-named, written atomically, a
//! `latest` pointer names the newest one, and retention prunes the rest.
//! The price cache is deliberately excluded: it refills from the live feed.
//!
//! Integrity: SHA-256 over the bincode serialization of the state payload.
//! Every keyed collection is a `BTreeMap`, so the same state always
//! serializes to the same bytes and the checksum is stable.

use crate::state::{EngineState, SharedState};
use crate::triggers::AssetTriggers;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};
use types::account::UserBalance;
use types::ids::{AssetId, OwnerId, PositionId};
use types::position::Position;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Name of the pointer file identifying the newest valid snapshot.
pub const LATEST_POINTER: &str = "latest";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Implausible snapshot timestamp: {0}")]
    ImplausibleTimestamp(i64),

    #[error("No snapshots found")]
    NoSnapshots,
}

// ── Snapshot payload ────────────────────────────────────────────────

/// Counts and provenance recorded alongside the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub engine_version: String,
    pub total_users: u64,
    pub total_open_positions: u64,
    pub total_closed_positions: u64,
    pub total_triggers: u64,
    pub generated_at: i64,
}

/// The serialized engine state: everything durable, nothing ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotState {
    pub balances: BTreeMap<OwnerId, UserBalance>,
    pub open_positions: BTreeMap<PositionId, Position>,
    pub closed_positions: BTreeMap<PositionId, Position>,
    pub owner_index: BTreeMap<OwnerId, Vec<PositionId>>,
    pub triggers: BTreeMap<AssetId, AssetTriggers>,
    pub metadata: SnapshotMetadata,
}

impl SnapshotState {
    /// Deterministic SHA-256 hash of the serialized state.
    pub fn compute_checksum(&self) -> String {
        let bytes =
            bincode::serialize(self).expect("snapshot state serialization should never fail");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// Capture a consistent view of the engine state.
///
/// Callers hold the state lock for the duration, so the view cannot tear.
pub fn capture(state: &EngineState, now: i64) -> SnapshotState {
    let (open_positions, closed_positions, owner_index) = state.book.export();
    let balances = state.ledger.export();
    let triggers = state.triggers.export();
    let metadata = SnapshotMetadata {
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        total_users: balances.len() as u64,
        total_open_positions: open_positions.len() as u64,
        total_closed_positions: closed_positions.len() as u64,
        total_triggers: state.triggers.entry_count() as u64,
        generated_at: now,
    };
    SnapshotState {
        balances,
        open_positions,
        closed_positions,
        owner_index,
        triggers,
        metadata,
    }
}

/// Rebuild engine state from a snapshot payload.
///
/// The price cache starts empty; quantization profiles come from the live
/// configuration, not the snapshot.
pub fn restore(config: &crate::config::EngineConfig, snapshot: SnapshotState) -> EngineState {
    let mut state = EngineState::new(config);
    state.ledger.restore(snapshot.balances);
    state.book.restore(
        snapshot.open_positions,
        snapshot.closed_positions,
        snapshot.owner_index,
    );
    state.triggers.restore(snapshot.triggers);
    state
}

// ── Snapshot document ───────────────────────────────────────────────

/// A complete snapshot file: version, generation time, checksum, state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub version: u32,
    pub timestamp_ms: i64,
    pub checksum: String,
    pub state: SnapshotState,
}

impl SnapshotDocument {
    /// Wrap a state payload with its computed integrity hash.
    pub fn new(state: SnapshotState, timestamp_ms: i64) -> Self {
        let checksum = state.compute_checksum();
        Self {
            version: SNAPSHOT_VERSION,
            timestamp_ms,
            checksum,
            state,
        }
    }

    /// Recompute the checksum and compare with the stored one.
    pub fn verify_integrity(&self) -> bool {
        self.state.compute_checksum() == self.checksum
    }
}

// ── Writer ──────────────────────────────────────────────────────────

/// Writes snapshot files, maintains the `latest` pointer, prunes retention.
pub struct SnapshotWriter {
    dir: PathBuf,
    retention: usize,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    /// Serialize → compress → write atomically → update pointer → prune.
    pub fn write(&self, document: &SnapshotDocument) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let encoded = bincode::serialize(document)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        let compressed = zstd::encode_all(encoded.as_slice(), 3)
            .map_err(|e| SnapshotError::Compression(e.to_string()))?;

        let filename = format!("snapshot-{:013}.snap.zst", document.timestamp_ms);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        // Atomic write: tmp, fsync, rename
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        self.update_latest_pointer(&filename)?;
        self.prune()?;

        Ok(path)
    }

    fn update_latest_pointer(&self, filename: &str) -> Result<(), SnapshotError> {
        let pointer_path = self.dir.join(LATEST_POINTER);
        let tmp_path = self.dir.join(format!("{}.tmp", LATEST_POINTER));
        fs::write(&tmp_path, filename)?;
        fs::rename(&tmp_path, &pointer_path)?;
        Ok(())
    }

    /// Remove files beyond the retention count, oldest first.
    fn prune(&self) -> Result<(), SnapshotError> {
        let mut snapshots = list_snapshots(&self.dir)?;
        if snapshots.len() <= self.retention {
            return Ok(());
        }
        snapshots.sort_by_key(|(ts, _)| *ts);
        let excess = snapshots.len() - self.retention;
        for (_, path) in snapshots.into_iter().take(excess) {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// List snapshot files as (timestamp_ms, path), unsorted.
pub fn list_snapshots(dir: &Path) -> Result<Vec<(i64, PathBuf)>, SnapshotError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut results = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(ts) = parse_timestamp(&name) {
            results.push((ts, entry.path()));
        }
    }
    Ok(results)
}

fn parse_timestamp(filename: &str) -> Option<i64> {
    filename
        .strip_prefix("snapshot-")?
        .strip_suffix(".snap.zst")?
        .parse()
        .ok()
}

/// Read the `latest` pointer, if present.
pub fn read_latest_pointer(dir: &Path) -> Option<PathBuf> {
    let pointer = fs::read_to_string(dir.join(LATEST_POINTER)).ok()?;
    let path = dir.join(pointer.trim());
    path.exists().then_some(path)
}

/// Load and decode one snapshot file. Integrity is NOT checked here;
/// validation policy belongs to recovery.
pub fn load_document(path: &Path) -> Result<SnapshotDocument, SnapshotError> {
    let mut compressed = Vec::new();
    File::open(path)?.read_to_end(&mut compressed)?;
    let encoded = zstd::decode_all(compressed.as_slice())
        .map_err(|e| SnapshotError::Compression(e.to_string()))?;
    bincode::deserialize(&encoded).map_err(|e| SnapshotError::Serialization(e.to_string()))
}

// ── Manager ─────────────────────────────────────────────────────────

/// Periodic snapshot task.
///
/// Captures inside the state lock (a clone, microseconds), then serializes
/// and writes without holding it, so the hot path never waits on disk.
pub struct SnapshotManager {
    state: SharedState,
    writer: SnapshotWriter,
    interval: Duration,
}

impl SnapshotManager {
    pub fn new(state: SharedState, dir: impl Into<PathBuf>, interval: Duration, retention: usize) -> Self {
        Self {
            state,
            writer: SnapshotWriter::new(dir, retention),
            interval,
        }
    }

    /// Run until shutdown, then write one final snapshot.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "snapshot manager started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so the initial
        // snapshot lands one full interval after boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.snapshot_once(),
            }
        }
        // Final flush so a clean shutdown loses nothing.
        self.snapshot_once();
        info!("snapshot manager stopped");
    }

    /// Capture and persist one snapshot.
    pub fn snapshot_once(&self) {
        let now = crate::clock::now_millis();
        let captured = {
            let state = self.state.lock().expect("engine state lock poisoned");
            capture(&state, now)
        };
        let document = SnapshotDocument::new(captured, now);
        match self.writer.write(&document) {
            Ok(path) => {
                info!(
                    path = %path.display(),
                    checksum = &document.checksum[..8],
                    users = document.state.metadata.total_users,
                    open = document.state.metadata.total_open_positions,
                    "snapshot written"
                );
            }
            Err(err) => {
                error!(error = %err, "failed to write snapshot");
            }
        }
    }
}
