use crate::geometry::NormalizedBox;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    pub video: VideoConfig,
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Ordered credential pool; rotated round-robin on rate limits.
    /// Overridable at runtime via MOONDREAM_API_KEYS (comma-separated).
    pub api_keys: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Object classes queried on every processed frame
    pub labels: Vec<String>,
    /// Process every Nth source frame (1 = every frame)
    pub frame_stride: u64,
    /// Request a scene caption every N processed frames (0 = off)
    pub caption_interval: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            labels: vec![
                "backpack".to_string(),
                "wallet".to_string(),
                "phone".to_string(),
                "bottle".to_string(),
            ],
            frame_stride: 1,
            caption_interval: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum overlap ratio to match a proposal to an existing track
    pub iou_threshold: f32,
    /// Matched-frame count at which a track counts as lingering; doubles
    /// as the stale window for evicting unmatched tracks
    pub linger_threshold: u32,
    /// Minimum frames_present before a track is surfaced for rendering
    pub presence_min: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            linger_threshold: 30,
            presence_min: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Ask the vision service whether a lingering item is held by someone
    /// before declaring it lost; false classifies on dwell time alone
    pub confirm_with_vision: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confirm_with_vision: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
    pub save_annotated: bool,
    pub save_events_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub log_path: String,
    pub snapshot_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One decoded RGB frame from the source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: f64,
}

/// Detector output for one watched label on one frame, in provider-return
/// order. Boxes are normalized; the registry converts to pixel space.
#[derive(Debug, Clone)]
pub struct LabelProposals {
    pub label: String,
    pub boxes: Vec<NormalizedBox>,
}
