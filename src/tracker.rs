// src/tracker.rs
//
// Frame-to-frame object tracking. Detections arrive per label as normalized
// boxes; the registry greedily matches each one against live tracks of the
// same label by overlap ratio, first match wins. Unmatched detections open
// new tracks, and tracks unseen for longer than the linger window are
// evicted. Track ids are monotonic and never reused, so an object that
// disappears and comes back is a new identity by design of the id space.

use crate::geometry::{overlap_ratio, PixelBox};
use crate::types::{LabelProposals, TrackingConfig};

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Monotonic track identity. Formats as the bare number in logs and CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrackId(u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
impl TrackId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// Lifecycle of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackState {
    /// Seen recently, dwell below the lost threshold.
    Active,
    /// Dwell threshold reached, a confirmation question is in flight.
    PendingConfirmation,
    /// Confirmation said someone is holding it. Dwell counting restarts
    /// from zero and the track re-arms at its next sighting.
    ConfirmedHeld,
    /// Reported as lost. The track keeps updating so the object is not
    /// re-reported under a fresh id while it stays in view.
    ConfirmedLost,
}

#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub id: TrackId,
    pub label: String,
    pub bbox: PixelBox,
    pub last_seen: u64,
    pub frames_present: u32,
    pub state: TrackState,
}

impl Track {
    fn record_match(&mut self, bbox: PixelBox, frame_index: u64) {
        self.bbox = bbox;
        self.last_seen = frame_index;
        self.frames_present += 1;
        if self.state == TrackState::ConfirmedHeld {
            debug!("Track {} re-armed after held verdict", self.id);
            self.state = TrackState::Active;
        }
    }
}

// ============================================================================
// REGISTRY CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Minimum overlap ratio for a detection to extend an existing track
    pub iou_threshold: f32,
    /// Frames a track may go unseen before eviction. The same window is the
    /// dwell threshold for the lost classification.
    pub linger_threshold: u32,
    /// Minimum frames_present before a track is surfaced to downstream
    /// consumers (rendering, reporting)
    pub presence_min: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            linger_threshold: 30,
            presence_min: 5,
        }
    }
}

impl RegistryConfig {
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            linger_threshold: config.linger_threshold,
            presence_min: config.presence_min,
        }
    }
}

// ============================================================================
// TRACK REGISTRY
// ============================================================================

pub struct TrackRegistry {
    config: RegistryConfig,
    tracks: BTreeMap<TrackId, Track>,
    next_id: u64,
    total_created: u64,
    total_evicted: u64,
}

impl TrackRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
            total_created: 0,
            total_evicted: 0,
        }
    }

    /// Ingest one frame's detections and advance the registry.
    ///
    /// Matching is greedy: proposals are taken in arrival order and each
    /// claims the first unclaimed track of its label whose overlap clears
    /// the threshold. Every proposal lands somewhere, either on an existing
    /// track or as a new one. Eviction of stale tracks runs on every call,
    /// including frames with no proposals at all.
    ///
    /// Returns every surviving track whose presence has reached
    /// `presence_min`, in id order, matched this frame or not. A lost item
    /// the detector misses for a frame keeps reporting until eviction.
    pub fn update(
        &mut self,
        frame_index: u64,
        proposals: &[LabelProposals],
        frame_dimensions: (u32, u32),
    ) -> Vec<TrackId> {
        let (width, height) = frame_dimensions;
        let threshold = self.config.iou_threshold;
        let mut matched: HashSet<TrackId> = HashSet::new();

        for group in proposals {
            for raw in &group.boxes {
                let pixel = raw.to_pixels(width, height);

                let claimed = self
                    .tracks
                    .iter_mut()
                    .find(|(id, track)| {
                        track.label == group.label
                            && !matched.contains(*id)
                            && overlap_ratio(&track.bbox, &pixel) > threshold
                    })
                    .map(|(id, track)| {
                        track.record_match(pixel, frame_index);
                        *id
                    });

                match claimed {
                    Some(id) => {
                        matched.insert(id);
                    }
                    None => {
                        let id = self.open_track(&group.label, pixel, frame_index);
                        matched.insert(id);
                    }
                }
            }
        }

        self.evict_stale(frame_index);

        self.tracks
            .values()
            .filter(|t| t.frames_present >= self.config.presence_min)
            .map(|t| t.id)
            .collect()
    }

    fn open_track(&mut self, label: &str, bbox: PixelBox, frame_index: u64) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.total_created += 1;

        info!("🆕 New {} track {} at frame {}", label, id, frame_index);
        self.tracks.insert(
            id,
            Track {
                id,
                label: label.to_string(),
                bbox,
                last_seen: frame_index,
                frames_present: 1,
                state: TrackState::Active,
            },
        );
        id
    }

    fn evict_stale(&mut self, frame_index: u64) {
        let linger = self.config.linger_threshold as u64;
        let before = self.tracks.len();

        self.tracks.retain(|id, track| {
            let stale = frame_index.saturating_sub(track.last_seen) > linger;
            if stale {
                info!(
                    "🗑️ Evicting {} track {} (last seen frame {}, now frame {})",
                    track.label, id, track.last_seen, frame_index
                );
            }
            !stale
        });

        self.total_evicted += (before - self.tracks.len()) as u64;
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn live_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn live_tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn linger_threshold(&self) -> u32 {
        self.config.linger_threshold
    }

    pub fn total_created(&self) -> u64 {
        self.total_created
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }
}

// ============================================================================
// TESTS
// ============================================================================
