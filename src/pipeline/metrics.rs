// src/pipeline/metrics.rs
//
// Production observability. Counts provider traffic, classification
// verdicts, and persistence health for the final report and logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub frames_skipped: Arc<AtomicU64>,
    pub detect_calls: Arc<AtomicU64>,
    pub detect_failures: Arc<AtomicU64>,
    pub quota_exhaustions: Arc<AtomicU64>,
    pub confirmations_requested: Arc<AtomicU64>,
    pub confirmations_lost: Arc<AtomicU64>,
    pub confirmations_held: Arc<AtomicU64>,
    pub confirmation_failures: Arc<AtomicU64>,
    pub captions: Arc<AtomicU64>,
    pub events_logged: Arc<AtomicU64>,
    pub persist_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            frames_skipped: Arc::new(AtomicU64::new(0)),
            detect_calls: Arc::new(AtomicU64::new(0)),
            detect_failures: Arc::new(AtomicU64::new(0)),
            quota_exhaustions: Arc::new(AtomicU64::new(0)),
            confirmations_requested: Arc::new(AtomicU64::new(0)),
            confirmations_lost: Arc::new(AtomicU64::new(0)),
            confirmations_held: Arc::new(AtomicU64::new(0)),
            confirmation_failures: Arc::new(AtomicU64::new(0)),
            captions: Arc::new(AtomicU64::new(0)),
            events_logged: Arc::new(AtomicU64::new(0)),
            persist_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            fps: self.fps(),
            detect_calls: self.detect_calls.load(Ordering::Relaxed),
            detect_failures: self.detect_failures.load(Ordering::Relaxed),
            quota_exhaustions: self.quota_exhaustions.load(Ordering::Relaxed),
            confirmations_requested: self.confirmations_requested.load(Ordering::Relaxed),
            confirmations_lost: self.confirmations_lost.load(Ordering::Relaxed),
            confirmations_held: self.confirmations_held.load(Ordering::Relaxed),
            confirmation_failures: self.confirmation_failures.load(Ordering::Relaxed),
            captions: self.captions.load(Ordering::Relaxed),
            events_logged: self.events_logged.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub frames_skipped: u64,
    pub fps: f64,
    pub detect_calls: u64,
    pub detect_failures: u64,
    pub quota_exhaustions: u64,
    pub confirmations_requested: u64,
    pub confirmations_lost: u64,
    pub confirmations_held: u64,
    pub confirmation_failures: u64,
    pub captions: u64,
    pub events_logged: u64,
    pub persist_failures: u64,
    pub elapsed_secs: f64,
}
