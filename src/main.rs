// src/main.rs

mod classifier;
mod config;
mod event_log;
mod frame_source;
mod geometry;
mod pipeline;
mod provider;
mod render;
mod tracker;
mod types;

use anyhow::{Context, Result};
use classifier::DwellClassifier;
use event_log::LostEventLog;
use frame_source::{FrameSource, ImageDirSource};
use pipeline::{FrameContext, PipelineContext, PipelineMetrics, PipelineOptions};
use provider::MoondreamClient;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracker::{RegistryConfig, Track, TrackRegistry, TrackState};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = types::Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!("lost_item_detection={}", config.logging.level))
        .init();

    info!("🎒 Lost Item Detection System Starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Watching [{}] | linger threshold: {} frames | confirmation: {}",
        config.detection.labels.join(", "),
        config.tracking.linger_threshold,
        if config.classification.confirm_with_vision {
            "vision"
        } else {
            "direct"
        }
    );

    // Environment wins over the config file so keys stay out of it
    let api_keys = match std::env::var("MOONDREAM_API_KEYS") {
        Ok(raw) => {
            let keys: Vec<String> = raw
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            info!("✓ Using {} credential(s) from MOONDREAM_API_KEYS", keys.len());
            keys
        }
        Err(_) => config.provider.api_keys.clone(),
    };

    let provider = MoondreamClient::new(
        &config.provider.base_url,
        api_keys,
        config.provider.timeout_secs,
    )?;
    info!(
        "✓ Vision provider ready ({} credential(s) in rotation)",
        provider.pool_size()
    );

    let registry = TrackRegistry::new(RegistryConfig::from_config(&config.tracking));
    let classifier = DwellClassifier::new(
        config.tracking.linger_threshold,
        config.classification.confirm_with_vision,
    );
    let event_log = LostEventLog::open(Path::new(&config.events.log_path))?;
    info!("💾 Lost-item events append to {}", config.events.log_path);

    let metrics = PipelineMetrics::new();
    let mut pipeline = PipelineContext::new(
        provider,
        registry,
        classifier,
        event_log,
        metrics.clone(),
        PipelineOptions::from_config(&config.detection),
    );

    let mut source = ImageDirSource::new(Path::new(&config.video.input_dir))?;
    if source.is_empty() {
        error!("No frames found in {}", config.video.input_dir);
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⚠️ Interrupt received, finishing current frame");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let total = source.total_frames();
    let stride = config.detection.frame_stride;
    let mut raw_frames: u64 = 0;
    let mut processed: u64 = 0;

    while let Some(frame) = source.next_frame()? {
        if shutdown.load(Ordering::Relaxed) {
            warn!("Stopping early after {} processed frame(s)", processed);
            break;
        }

        raw_frames += 1;
        if (raw_frames - 1) % stride != 0 {
            pipeline.metrics.inc(&pipeline.metrics.frames_skipped);
            continue;
        }
        processed += 1;

        let ctx = FrameContext::new(processed, &frame);
        let summary = match pipeline.process_frame(&frame, ctx).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Frame {} failed: {:#}", processed, e);
                continue;
            }
        };

        // ── Annotated output ─────────────────────────────────────────────
        if config.video.save_annotated
            && (!summary.surfaced.is_empty() || !config.video.save_events_only)
        {
            let visible: Vec<&Track> = summary
                .surfaced
                .iter()
                .filter_map(|id| pipeline.registry.get(*id))
                .collect();
            match render::annotate(&frame, &visible, pipeline.registry.linger_threshold()) {
                Ok(img) => {
                    if let Err(e) =
                        render::save_annotated(&img, Path::new(&config.video.output_dir), processed)
                    {
                        warn!("⚠️ Failed to save annotated frame {}: {:#}", processed, e);
                    }
                }
                Err(e) => warn!("⚠️ Annotation failed at frame {}: {:#}", processed, e),
            }
        }

        // ── Progress logging ─────────────────────────────────────────────
        if processed % 50 == 0 {
            let events = pipeline.metrics.summary().events_logged;
            match total {
                Some(total_frames) => info!(
                    "Progress: {:.1}% ({}/{}) | Live tracks: {} | Lost items: {}",
                    100.0 * raw_frames as f64 / total_frames.max(1) as f64,
                    raw_frames,
                    total_frames,
                    pipeline.registry.len(),
                    events
                ),
                None => info!(
                    "Progress: {} frame(s) | Live tracks: {} | Lost items: {}",
                    raw_frames,
                    pipeline.registry.len(),
                    events
                ),
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────
    let flush_result = pipeline.flush();

    if let Err(e) = write_snapshot(&pipeline.registry, Path::new(&config.events.snapshot_path)) {
        error!("Failed to write track snapshot: {:#}", e);
    }

    let linger_threshold = pipeline.registry.linger_threshold();
    for track in pipeline.registry.live_tracks().filter(|t| {
        t.frames_present >= linger_threshold
            && matches!(
                t.state,
                TrackState::Active | TrackState::PendingConfirmation
            )
    }) {
        warn!(
            "🚨 {} track {} still unattended at shutdown ({} frames)",
            track.label, track.id, track.frames_present
        );
    }

    let summary = metrics.summary();
    info!("\n📊 Final Report:");
    info!(
        "  Frames processed: {} ({} skipped by stride)",
        summary.total_frames, summary.frames_skipped
    );
    info!(
        "  Detect calls: {} ({} failed)",
        summary.detect_calls, summary.detect_failures
    );
    if summary.quota_exhaustions > 0 {
        warn!("  🚫 Quota exhaustions: {}", summary.quota_exhaustions);
    }
    info!(
        "  Confirmations: {} asked | {} held | {} lost | {} failed",
        summary.confirmations_requested,
        summary.confirmations_held,
        summary.confirmations_lost,
        summary.confirmation_failures
    );
    info!("  🚨 Lost items logged: {}", summary.events_logged);
    if summary.persist_failures > 0 {
        warn!("  ⚠️ Persistence failures: {}", summary.persist_failures);
    }
    if pipeline.events_pending() > 0 {
        warn!(
            "  ⚠️ {} event(s) still unpersisted after flush",
            pipeline.events_pending()
        );
    }
    info!(
        "  Tracks: {} created | {} evicted | {} live at shutdown",
        pipeline.registry.total_created(),
        pipeline.registry.total_evicted(),
        pipeline.registry.len()
    );
    if summary.captions > 0 {
        info!("  Scene captions: {}", summary.captions);
    }
    info!(
        "  🔑 Credential rotations: {}",
        pipeline.provider.rotation_count()
    );
    info!("  Processing Speed: {:.1} FPS", summary.fps);

    flush_result
}

/// Final registry state as a JSON object keyed by track id.
fn write_snapshot(registry: &TrackRegistry, path: &Path) -> Result<()> {
    let snapshot: std::collections::BTreeMap<String, &Track> = registry
        .live_tracks()
        .map(|t| (t.id.to_string(), t))
        .collect();

    let json =
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize track snapshot")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create snapshot directory {}", parent.display())
            })?;
        }
    }
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write track snapshot to {}", path.display()))?;

    info!("💾 Final track snapshot written to {}", path.display());
    Ok(())
}
