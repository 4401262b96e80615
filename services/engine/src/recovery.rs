//! Recovery — startup restoration from the newest valid snapshot
//!
//! Runs once, before either ingest loop starts. The `latest` pointer is
//! tried first, then every retained snapshot newest to oldest. A candidate
//! is rejected for a bad version, a checksum mismatch, or an implausible
//! timestamp (in the future or too old). If nothing validates the engine
//! starts from empty state — recovery is never a fatal boot failure.

use crate::config::EngineConfig;
use crate::snapshot::{
    list_snapshots, load_document, read_latest_pointer, restore, SnapshotDocument, SnapshotError,
    SNAPSHOT_VERSION,
};
use crate::state::EngineState;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Reject snapshots claiming to be from more than a minute in the future.
const MAX_FUTURE_SKEW_MS: i64 = 60 * 1_000;

/// Reject snapshots older than a day; state that stale is worse than none.
const MAX_AGE_MS: i64 = 24 * 60 * 60 * 1_000;

/// What recovery did, for logging and tests.
#[derive(Debug)]
pub struct RecoveryReport {
    /// The file state was restored from; `None` means clean start.
    pub source: Option<PathBuf>,
    /// Candidates rejected on the way, with reasons.
    pub rejected: Vec<(PathBuf, String)>,
    pub users: u64,
    pub open_positions: u64,
    pub closed_positions: u64,
}

/// Startup restorer.
pub struct RecoveryManager {
    dir: PathBuf,
}

impl RecoveryManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Restore the newest valid snapshot, falling back across retained
    /// files, then to empty state.
    pub fn recover(&self, config: &EngineConfig) -> (EngineState, RecoveryReport) {
        self.recover_at(config, crate::clock::now_millis())
    }

    /// Same as [`recover`](Self::recover) with an injected clock, for
    /// timestamp-plausibility tests.
    pub fn recover_at(&self, config: &EngineConfig, now: i64) -> (EngineState, RecoveryReport) {
        let mut report = RecoveryReport {
            source: None,
            rejected: Vec::new(),
            users: 0,
            open_positions: 0,
            closed_positions: 0,
        };

        for path in self.candidates() {
            match self.load_valid(&path, now) {
                Ok(document) => {
                    report.users = document.state.metadata.total_users;
                    report.open_positions = document.state.metadata.total_open_positions;
                    report.closed_positions = document.state.metadata.total_closed_positions;
                    report.source = Some(path.clone());
                    info!(
                        path = %path.display(),
                        users = report.users,
                        open = report.open_positions,
                        closed = report.closed_positions,
                        "state recovered from snapshot"
                    );
                    return (restore(config, document.state), report);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "rejecting snapshot");
                    report.rejected.push((path, err.to_string()));
                }
            }
        }

        info!("no valid snapshot found, starting with clean state");
        (EngineState::new(config), report)
    }

    /// Candidate files: the `latest` pointer first, then every retained
    /// snapshot newest to oldest.
    fn candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(latest) = read_latest_pointer(&self.dir) {
            candidates.push(latest);
        }
        let mut listed = list_snapshots(&self.dir).unwrap_or_default();
        listed.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in listed {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates
    }

    /// Load one file and apply the full validation policy.
    fn load_valid(&self, path: &Path, now: i64) -> Result<SnapshotDocument, SnapshotError> {
        let document = load_document(path)?;

        if document.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(document.version));
        }
        if !document.verify_integrity() {
            return Err(SnapshotError::IntegrityFailure {
                expected: document.checksum.clone(),
                actual: document.state.compute_checksum(),
            });
        }
        if document.timestamp_ms > now + MAX_FUTURE_SKEW_MS
            || now - document.timestamp_ms > MAX_AGE_MS
        {
            return Err(SnapshotError::ImplausibleTimestamp(document.timestamp_ms));
        }

        Ok(document)
    }
}
