//! Debounced, regression-guarded progress persistence.
//!
//! Accepted position updates arrive on every page turn. Writes go out after a
//! quiet period, never move the reader back to the start by accident, and are
//! retried with backoff when the remote is down. A local backup mirrors the
//! last successful write so the regression guard survives reloads.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::store::{CacheKey, KeyValueStore};
use crate::tracker::PositionUpdate;

/// What gets persisted for a book, and nothing else.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub cfi: String,
    pub progress_percent: f32,
    pub scroll_offset_percent: f32,
    #[serde(default)]
    pub chapter_number: Option<u32>,
}

impl ProgressRecord {
    pub fn from_update(update: &PositionUpdate) -> Self {
        Self {
            cfi: update.locator.as_str().to_string(),
            progress_percent: update.progress_percent,
            scroll_offset_percent: update.scroll_offset_percent,
            chapter_number: update.chapter_number,
        }
    }

    fn same_position(&self, other: &Self, epsilon: f32) -> bool {
        self.cfi == other.cfi
            && self.chapter_number == other.chapter_number
            && (self.progress_percent - other.progress_percent).abs() <= epsilon
            && (self.scroll_offset_percent - other.scroll_offset_percent).abs() <= epsilon
    }
}

/// Backend endpoint for progress writes.
pub trait ProgressRemote {
    fn write(&mut self, record: &ProgressRecord) -> Result<(), SyncError>;

    /// Write that should survive page teardown.
    fn write_keepalive(&mut self, record: &ProgressRecord) -> Result<(), SyncError> {
        self.write(record)
    }

    /// Fire-and-forget unauthenticated delivery. Returns whether it was queued.
    fn send_beacon(&mut self, record: &ProgressRecord) -> bool {
        let _ = record;
        false
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub debounce_ms: u64,
    /// Percent fields closer than this count as unchanged.
    pub unchanged_epsilon: f32,
    /// Guard arms once persisted progress exceeds this...
    pub regression_from_percent: f32,
    /// ...and blocks writes that drop below this.
    pub regression_to_percent: f32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 5_000,
            unchanged_epsilon: 0.05,
            regression_from_percent: 5.0,
            regression_to_percent: 2.0,
            retry_initial_ms: 1_000,
            retry_max_ms: 60_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Queued { due_ms: u64 },
    /// Same as the last persisted record; any pending write was dropped.
    Unchanged,
    SuppressedRegression,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FlushOutcome {
    /// Nothing pending.
    Idle,
    /// Pending write not due yet.
    Waiting { due_ms: u64 },
    Written(ProgressRecord),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitFlush {
    NothingPending,
    KeptAlive,
    /// Keep-alive write failed; a beacon was queued instead.
    Beacon,
    Lost,
}

#[derive(Clone, Debug)]
struct PendingWrite {
    record: ProgressRecord,
    due_ms: u64,
}

pub struct ProgressSync<R, S> {
    remote: R,
    backup: S,
    backup_key: CacheKey,
    config: SyncConfig,
    last_persisted: Option<ProgressRecord>,
    pending: Option<PendingWrite>,
    consecutive_failures: u32,
    allow_backward: bool,
}

impl<R: ProgressRemote, S: KeyValueStore> ProgressSync<R, S> {
    /// Seeds the regression guard from the backup entry under `backup_key`.
    pub fn new(remote: R, backup: S, backup_key: CacheKey, config: SyncConfig) -> Self {
        let last_persisted = read_backup(&backup, &backup_key);
        Self {
            remote,
            backup,
            backup_key,
            config,
            last_persisted,
            pending: None,
            consecutive_failures: 0,
            allow_backward: false,
        }
    }

    pub fn last_persisted(&self) -> Option<&ProgressRecord> {
        self.last_persisted.as_ref()
    }

    pub fn pending(&self) -> Option<&ProgressRecord> {
        self.pending.as_ref().map(|p| &p.record)
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Let the next backward jump through the regression guard.
    pub fn allow_backward_jump(&mut self) {
        self.allow_backward = true;
    }

    /// Queue `record`; rapid calls coalesce into one trailing write.
    pub fn schedule(&mut self, record: ProgressRecord, now_ms: u64) -> ScheduleOutcome {
        if let Some(last) = &self.last_persisted {
            if last.same_position(&record, self.config.unchanged_epsilon) {
                self.pending = None;
                return ScheduleOutcome::Unchanged;
            }
            if last.progress_percent > self.config.regression_from_percent
                && record.progress_percent < self.config.regression_to_percent
            {
                if !self.allow_backward {
                    log::warn!(
                        "suppressed progress regression {:.1}% -> {:.1}% for {}",
                        last.progress_percent,
                        record.progress_percent,
                        self.backup_key.storage_key()
                    );
                    return ScheduleOutcome::SuppressedRegression;
                }
                self.allow_backward = false;
            }
        }
        let due_ms = now_ms.saturating_add(self.config.debounce_ms);
        self.pending = Some(PendingWrite { record, due_ms });
        ScheduleOutcome::Queued { due_ms }
    }

    /// Write the pending record if its debounce or backoff has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Result<FlushOutcome, SyncError> {
        match &self.pending {
            None => Ok(FlushOutcome::Idle),
            Some(pending) if now_ms < pending.due_ms => Ok(FlushOutcome::Waiting {
                due_ms: pending.due_ms,
            }),
            Some(_) => self.write_pending(now_ms),
        }
    }

    /// Write the pending record immediately.
    pub fn flush_now(&mut self, now_ms: u64) -> Result<FlushOutcome, SyncError> {
        if self.pending.is_none() {
            return Ok(FlushOutcome::Idle);
        }
        self.write_pending(now_ms)
    }

    /// Last-chance delivery on page teardown: keep-alive write, then beacon.
    pub fn flush_on_exit(&mut self) -> ExitFlush {
        let Some(pending) = self.pending.take() else {
            return ExitFlush::NothingPending;
        };
        match self.remote.write_keepalive(&pending.record) {
            Ok(()) => {
                self.mark_persisted(pending.record);
                ExitFlush::KeptAlive
            }
            Err(err) => {
                log::warn!("keep-alive progress write failed: {}", err);
                if self.remote.send_beacon(&pending.record) {
                    ExitFlush::Beacon
                } else {
                    ExitFlush::Lost
                }
            }
        }
    }

    fn write_pending(&mut self, now_ms: u64) -> Result<FlushOutcome, SyncError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(FlushOutcome::Idle);
        };
        match self.remote.write(&pending.record) {
            Ok(()) => {
                let record = pending.record.clone();
                self.pending = None;
                self.consecutive_failures = 0;
                self.mark_persisted(record.clone());
                Ok(FlushOutcome::Written(record))
            }
            Err(err) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                let delay = retry_backoff_ms(
                    self.consecutive_failures,
                    self.config.retry_initial_ms,
                    self.config.retry_max_ms,
                );
                pending.due_ms = now_ms.saturating_add(delay);
                log::warn!(
                    "progress write failed ({}), retrying in {}ms (consecutive_failures={})",
                    err,
                    delay,
                    self.consecutive_failures
                );
                Err(err)
            }
        }
    }

    fn mark_persisted(&mut self, record: ProgressRecord) {
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(err) = self.backup.set(&self.backup_key, &bytes) {
                    log::warn!("failed to mirror progress backup: {}", err);
                }
            }
            Err(err) => log::warn!("failed to encode progress backup: {}", err),
        }
        self.last_persisted = Some(record);
    }
}

fn read_backup<S: KeyValueStore>(store: &S, key: &CacheKey) -> Option<ProgressRecord> {
    let bytes = match store.get(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(err) => {
            log::warn!("progress backup read failed: {}", err);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(err) => {
            log::warn!("discarding corrupt progress backup {}: {}", key.storage_key(), err);
            if let Err(err) = store.delete(key) {
                log::warn!("failed to delete progress backup: {}", err);
            }
            None
        }
    }
}

/// 1s, 2s, 4s ... capped at `max_ms`.
fn retry_backoff_ms(consecutive_failures: u32, initial_ms: u64, max_ms: u64) -> u64 {
    let shift = consecutive_failures.saturating_sub(1).min(16);
    initial_ms.saturating_mul(1u64 << shift).min(max_ms)
}
