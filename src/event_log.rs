// src/event_log.rs
//
// Append-only CSV log of confirmed lost items. One row per track per run:
// a dedup set keyed by track id makes record() idempotent, so callers can
// retry persistence failures without double-counting. Rows are synced to
// disk before the id enters the dedup set, which means a failed write stays
// retryable.

use crate::classifier::LostEvent;
use crate::tracker::TrackId;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const CSV_HEADER: &str = "timestamp,object_id,type,frames_present,frame_number";

pub struct LostEventLog {
    file: File,
    logged: HashSet<TrackId>,
    path: PathBuf,
}

impl LostEventLog {
    /// Open (or create) the log at `path`. The header row is written only
    /// when the file is empty, so restarts keep appending to the same log.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create event log directory {}", parent.display())
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log at {}", path.display()))?;

        let is_empty = file
            .metadata()
            .with_context(|| format!("Failed to stat event log at {}", path.display()))?
            .len()
            == 0;
        if is_empty {
            writeln!(file, "{}", CSV_HEADER)
                .with_context(|| format!("Failed to write header to {}", path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync event log at {}", path.display()))?;
        }

        Ok(Self {
            file,
            logged: HashSet::new(),
            path: path.to_path_buf(),
        })
    }

    /// Append one event. Returns false when this track was already logged.
    pub fn record(&mut self, event: &LostEvent) -> Result<bool> {
        if self.logged.contains(&event.track_id) {
            return Ok(false);
        }

        writeln!(
            self.file,
            "{},{},{},{},{}",
            event.timestamp.to_rfc3339(),
            event.track_id,
            event.label,
            event.frames_present,
            event.frame_index
        )
        .with_context(|| format!("Failed to append to event log at {}", self.path.display()))?;
        self.file
            .sync_all()
            .with_context(|| format!("Failed to sync event log at {}", self.path.display()))?;

        self.logged.insert(event.track_id);
        info!(
            "💾 Logged lost {} (track {}) to {}",
            event.label,
            event.track_id,
            self.path.display()
        );
        Ok(true)
    }
}

// ============================================================================
// TESTS
// ============================================================================
