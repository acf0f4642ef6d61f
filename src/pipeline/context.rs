// src/pipeline/context.rs
//
// Per-frame orchestration. One call to process_frame runs the whole chain:
// encode the frame once, fan out a detect call per watched label, feed the
// proposals to the track registry, sweep for dwell threshold crossings,
// resolve any confirmation questions, and persist confirmed events.
//
// Provider failures degrade per label: a label whose detect call fails
// simply contributes no proposals this frame while the others proceed.
// Events that fail to persist stay queued and are retried on the next
// frame and at flush time, so a disk hiccup cannot silently drop a report.

use super::frame_context::FrameContext;
use super::metrics::PipelineMetrics;
use crate::classifier::{ConfirmationOutcome, DwellClassifier, LostEvent};
use crate::event_log::LostEventLog;
use crate::provider::{EncodedImage, ProviderError, VisionProvider};
use crate::tracker::{TrackId, TrackRegistry};
use crate::types::{DetectionConfig, Frame, LabelProposals};

use anyhow::{bail, Result};
use futures::future::join_all;
use tracing::{error, info, warn};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Object labels queried on every processed frame
    pub labels: Vec<String>,
    /// Caption every Nth processed frame, 0 disables captioning
    pub caption_interval: u64,
}

impl PipelineOptions {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            labels: config.labels.clone(),
            caption_interval: config.caption_interval,
        }
    }
}

/// What one processed frame produced, for rendering and progress logs.
#[derive(Debug, Default)]
pub struct FrameSummary {
    /// Live tracks that have cleared the presence minimum
    pub surfaced: Vec<TrackId>,
    pub events_logged: usize,
    pub caption: Option<String>,
}

// ============================================================================
// PIPELINE CONTEXT
// ============================================================================

pub struct PipelineContext<P: VisionProvider> {
    pub provider: P,
    pub registry: TrackRegistry,
    pub metrics: PipelineMetrics,
    classifier: DwellClassifier,
    event_log: LostEventLog,
    options: PipelineOptions,
    unflushed: Vec<LostEvent>,
}

impl<P: VisionProvider> PipelineContext<P> {
    pub fn new(
        provider: P,
        registry: TrackRegistry,
        classifier: DwellClassifier,
        event_log: LostEventLog,
        metrics: PipelineMetrics,
        options: PipelineOptions,
    ) -> Self {
        Self {
            provider,
            registry,
            metrics,
            classifier,
            event_log,
            options,
            unflushed: Vec::new(),
        }
    }

    /// Events that failed to persist and are awaiting retry.
    pub fn events_pending(&self) -> usize {
        self.unflushed.len()
    }

    pub async fn process_frame(&mut self, frame: &Frame, ctx: FrameContext) -> Result<FrameSummary> {
        self.metrics.inc(&self.metrics.total_frames);

        let image = match EncodedImage::from_frame(frame) {
            Ok(image) => image,
            Err(e) => {
                warn!("⚠️ Skipping frame {}: {:#}", ctx.index, e);
                return Ok(FrameSummary::default());
            }
        };

        // ── Detection fan-out, one concurrent call per label ──
        let provider = &self.provider;
        let image_ref = &image;
        self.metrics
            .add(&self.metrics.detect_calls, self.options.labels.len() as u64);

        let detections = join_all(self.options.labels.iter().map(|label| async move {
            (label.clone(), provider.detect(image_ref, label).await)
        }))
        .await;

        let mut proposals: Vec<LabelProposals> = Vec::with_capacity(detections.len());
        for (label, result) in detections {
            match result {
                Ok(boxes) => proposals.push(LabelProposals { label, boxes }),
                Err(ProviderError::QuotaExhausted { pool_size }) => {
                    self.metrics.inc(&self.metrics.quota_exhaustions);
                    self.metrics.inc(&self.metrics.detect_failures);
                    error!(
                        "🚫 Quota exhausted across {} credential(s), no '{}' detections at frame {}",
                        pool_size, label, ctx.index
                    );
                }
                Err(e) => {
                    self.metrics.inc(&self.metrics.detect_failures);
                    warn!("⚠️ Detection for '{}' failed at frame {}: {}", label, ctx.index, e);
                }
            }
        }

        // ── Track update and dwell sweep ──
        let surfaced = self.registry.update(ctx.index, &proposals, ctx.dimensions());
        let outcome = self.classifier.scan(&mut self.registry, ctx.index);

        let mut fresh_events = outcome.lost;

        // ── Confirmation round trips for tracks that just hit the threshold ──
        if !outcome.pending.is_empty() {
            self.metrics.add(
                &self.metrics.confirmations_requested,
                outcome.pending.len() as u64,
            );

            let answers = join_all(outcome.pending.into_iter().map(|request| async move {
                let answer = provider.ask(image_ref, &request.prompt).await;
                (request, answer)
            }))
            .await;

            for (request, answer) in answers {
                match answer {
                    Ok(text) => match self.classifier.apply_confirmation(
                        &mut self.registry,
                        request.track_id,
                        &text,
                        ctx.index,
                    ) {
                        ConfirmationOutcome::Lost(event) => {
                            self.metrics.inc(&self.metrics.confirmations_lost);
                            fresh_events.push(event);
                        }
                        ConfirmationOutcome::Held => {
                            self.metrics.inc(&self.metrics.confirmations_held);
                        }
                        ConfirmationOutcome::Stale => {}
                    },
                    Err(e) => {
                        self.metrics.inc(&self.metrics.confirmation_failures);
                        warn!(
                            "⚠️ Confirmation for {} track {} failed: {}",
                            request.label, request.track_id, e
                        );
                        self.classifier
                            .apply_confirmation_failure(&mut self.registry, request.track_id);
                    }
                }
            }
        }

        // ── Persist, retrying anything still queued from earlier frames ──
        let mut queue = std::mem::take(&mut self.unflushed);
        queue.extend(fresh_events);
        let mut events_logged = 0usize;
        for event in queue {
            match self.event_log.record(&event) {
                Ok(true) => {
                    events_logged += 1;
                    self.metrics.inc(&self.metrics.events_logged);
                }
                Ok(false) => {}
                Err(e) => {
                    self.metrics.inc(&self.metrics.persist_failures);
                    error!(
                        "⚠️ Could not persist lost-item event for track {}: {:#}",
                        event.track_id, e
                    );
                    self.unflushed.push(event);
                }
            }
        }

        // ── Periodic scene caption ──
        let caption = if self.options.caption_interval > 0
            && ctx.index % self.options.caption_interval == 0
        {
            match self.provider.caption(&image).await {
                Ok(text) => {
                    self.metrics.inc(&self.metrics.captions);
                    info!(
                        "Scene at frame {} ({:.1}s): {}",
                        ctx.index,
                        ctx.timestamp_ms / 1000.0,
                        text
                    );
                    Some(text)
                }
                Err(e) => {
                    warn!("⚠️ Caption at frame {} failed: {}", ctx.index, e);
                    None
                }
            }
        } else {
            None
        };

        Ok(FrameSummary {
            surfaced,
            events_logged,
            caption,
        })
    }

    /// Final persistence pass. Fails when any event still cannot be written
    /// so the exit code reflects the data loss.
    pub fn flush(&mut self) -> Result<()> {
        let queue = std::mem::take(&mut self.unflushed);
        let mut still_failing = 0usize;
        for event in queue {
            match self.event_log.record(&event) {
                Ok(_) => {}
                Err(e) => {
                    still_failing += 1;
                    error!(
                        "Failed to flush lost-item event for track {}: {:#}",
                        event.track_id, e
                    );
                    self.unflushed.push(event);
                }
            }
        }
        if still_failing > 0 {
            bail!("{} lost-item event(s) could not be persisted", still_failing);
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBox;
    use crate::provider::ProviderResult;
    use crate::tracker::{RegistryConfig, TrackState};
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ScriptedProvider {
        boxes_by_label: HashMap<String, NormalizedBox>,
        failing_labels: HashSet<String>,
        quota_labels: HashSet<String>,
        answer: String,
        fail_asks: bool,
        detect_calls: AtomicU64,
        ask_calls: AtomicU64,
    }

    impl ScriptedProvider {
        fn seeing(label: &str) -> Self {
            Self {
                boxes_by_label: HashMap::from([(
                    label.to_string(),
                    NormalizedBox::new(0.1, 0.1, 0.5, 0.5),
                )]),
                failing_labels: HashSet::new(),
                quota_labels: HashSet::new(),
                answer: "yes".to_string(),
                fail_asks: false,
                detect_calls: AtomicU64::new(0),
                ask_calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl VisionProvider for ScriptedProvider {
        async fn detect(
            &self,
            _image: &EncodedImage,
            label: &str,
        ) -> ProviderResult<Vec<NormalizedBox>> {
            self.detect_calls.fetch_add(1, Ordering::Relaxed);
            if self.quota_labels.contains(label) {
                return Err(ProviderError::QuotaExhausted { pool_size: 2 });
            }
            if self.failing_labels.contains(label) {
                return Err(ProviderError::Unavailable("scripted outage".to_string()));
            }
            Ok(self
                .boxes_by_label
                .get(label)
                .map(|b| vec![*b])
                .unwrap_or_default())
        }

        async fn ask(&self, _image: &EncodedImage, _prompt: &str) -> ProviderResult<String> {
            self.ask_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_asks {
                return Err(ProviderError::Unavailable("scripted outage".to_string()));
            }
            Ok(self.answer.clone())
        }

        async fn caption(&self, _image: &EncodedImage) -> ProviderResult<String> {
            Ok("a quiet waiting area".to_string())
        }
    }

    fn pipeline(
        provider: ScriptedProvider,
        linger: u32,
        confirm: bool,
        dir: &Path,
    ) -> PipelineContext<ScriptedProvider> {
        let registry = TrackRegistry::new(RegistryConfig {
            iou_threshold: 0.5,
            linger_threshold: linger,
            presence_min: 1,
        });
        PipelineContext::new(
            provider,
            registry,
            DwellClassifier::new(linger, confirm),
            LostEventLog::open(&dir.join("events.csv")).unwrap(),
            PipelineMetrics::new(),
            PipelineOptions {
                labels: vec!["backpack".to_string(), "wallet".to_string()],
                caption_interval: 0,
            },
        )
    }

    fn frame() -> Frame {
        Frame {
            data: vec![40u8; 4 * 4 * 3],
            width: 4,
            height: 4,
            timestamp_ms: 0.0,
        }
    }

    async fn run_frames(
        pipeline: &mut PipelineContext<ScriptedProvider>,
        frames: std::ops::RangeInclusive<u64>,
    ) -> FrameSummary {
        let mut last = FrameSummary::default();
        for index in frames {
            let f = frame();
            let ctx = FrameContext::new(index, &f);
            last = pipeline.process_frame(&f, ctx).await.unwrap();
        }
        last
    }

    #[tokio::test]
    async fn test_stationary_object_reported_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = pipeline(ScriptedProvider::seeing("backpack"), 3, false, dir.path());

        let last = run_frames(&mut pipeline, 1..=3).await;
        assert_eq!(last.events_logged, 1);
        assert_eq!(last.surfaced.len(), 1);

        let track = pipeline.registry.live_tracks().next().unwrap();
        assert_eq!(track.state, TrackState::ConfirmedLost);

        let csv = std::fs::read_to_string(dir.path().join("events.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("backpack"));

        assert_eq!(pipeline.events_pending(), 0);
        pipeline.flush().unwrap();
    }

    #[tokio::test]
    async fn test_failing_label_leaves_others_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = ScriptedProvider::seeing("backpack");
        provider.boxes_by_label.insert(
            "wallet".to_string(),
            NormalizedBox::new(0.6, 0.6, 0.9, 0.9),
        );
        provider.failing_labels.insert("wallet".to_string());
        let mut pipeline = pipeline(provider, 10, false, dir.path());

        run_frames(&mut pipeline, 1..=1).await;

        assert_eq!(pipeline.registry.len(), 1, "only the healthy label tracks");
        assert_eq!(
            pipeline.registry.live_tracks().next().unwrap().label,
            "backpack"
        );
        let summary = pipeline.metrics.summary();
        assert_eq!(summary.detect_calls, 2);
        assert_eq!(summary.detect_failures, 1);
    }

    #[tokio::test]
    async fn test_quota_exhaustion_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = ScriptedProvider::seeing("backpack");
        provider.quota_labels.insert("backpack".to_string());
        let mut pipeline = pipeline(provider, 10, false, dir.path());

        run_frames(&mut pipeline, 1..=1).await;

        assert!(pipeline.registry.is_empty());
        let summary = pipeline.metrics.summary();
        assert_eq!(summary.quota_exhaustions, 1);
        assert_eq!(summary.detect_failures, 1);
    }

    #[tokio::test]
    async fn test_held_answer_suppresses_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = ScriptedProvider::seeing("backpack");
        provider.answer = "Yes.".to_string();
        let mut pipeline = pipeline(provider, 3, true, dir.path());

        let last = run_frames(&mut pipeline, 1..=3).await;
        assert_eq!(last.events_logged, 0);

        let track = pipeline.registry.live_tracks().next().unwrap();
        assert_eq!(track.state, TrackState::ConfirmedHeld);
        assert_eq!(track.frames_present, 0);

        let csv = std::fs::read_to_string(dir.path().join("events.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1, "header only, no event row");

        let summary = pipeline.metrics.summary();
        assert_eq!(summary.confirmations_requested, 1);
        assert_eq!(summary.confirmations_held, 1);
        assert_eq!(summary.confirmations_lost, 0);
    }

    #[tokio::test]
    async fn test_no_answer_logs_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = ScriptedProvider::seeing("wallet");
        provider.answer = " No ".to_string();
        let mut pipeline = pipeline(provider, 3, true, dir.path());

        let last = run_frames(&mut pipeline, 1..=3).await;
        assert_eq!(last.events_logged, 1);
        assert_eq!(
            pipeline.registry.live_tracks().next().unwrap().state,
            TrackState::ConfirmedLost
        );

        let csv = std::fs::read_to_string(dir.path().join("events.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("wallet"));
        assert_eq!(pipeline.metrics.summary().confirmations_lost, 1);
    }

    #[tokio::test]
    async fn test_failed_confirmation_is_retried_next_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut provider = ScriptedProvider::seeing("backpack");
        provider.fail_asks = true;
        let mut pipeline = pipeline(provider, 3, true, dir.path());

        run_frames(&mut pipeline, 1..=3).await;
        assert_eq!(pipeline.metrics.summary().confirmation_failures, 1);
        assert_eq!(
            pipeline.registry.live_tracks().next().unwrap().state,
            TrackState::Active
        );

        // Dwell is still past the threshold; the next frame asks again
        run_frames(&mut pipeline, 4..=4).await;
        assert_eq!(pipeline.provider.ask_calls.load(Ordering::Relaxed), 2);
        assert_eq!(pipeline.metrics.summary().confirmations_requested, 2);
    }

    #[tokio::test]
    async fn test_caption_cadence_follows_interval() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TrackRegistry::new(RegistryConfig::default());
        let mut pipeline = PipelineContext::new(
            ScriptedProvider::seeing("backpack"),
            registry,
            DwellClassifier::new(30, false),
            LostEventLog::open(&dir.path().join("events.csv")).unwrap(),
            PipelineMetrics::new(),
            PipelineOptions {
                labels: vec!["backpack".to_string()],
                caption_interval: 2,
            },
        );

        let f = frame();
        let first = pipeline.process_frame(&f, FrameContext::new(1, &f)).await.unwrap();
        assert!(first.caption.is_none());
        let second = pipeline.process_frame(&f, FrameContext::new(2, &f)).await.unwrap();
        assert_eq!(second.caption.as_deref(), Some("a quiet waiting area"));

        pipeline.process_frame(&f, FrameContext::new(3, &f)).await.unwrap();
        pipeline.process_frame(&f, FrameContext::new(4, &f)).await.unwrap();
        assert_eq!(pipeline.metrics.summary().captions, 2);
    }
}
