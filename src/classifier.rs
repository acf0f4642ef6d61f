// src/classifier.rs
//
// Dwell classification over the track registry. A track that stays Active
// for the full linger window either becomes a lost item outright or, when
// vision confirmation is enabled, moves to PendingConfirmation and emits a
// question for the provider. Answers come back through apply_confirmation.
//
// All transitions happen here, synchronously, against registry state. The
// network round trip lives in the pipeline; by the time an answer arrives
// the track may have been evicted, which is the Stale outcome.

use crate::tracker::{Track, TrackId, TrackRegistry, TrackState};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

// ============================================================================
// EVENTS
// ============================================================================

/// A confirmed lost item, ready for the event log.
#[derive(Debug, Clone)]
pub struct LostEvent {
    pub track_id: TrackId,
    pub label: String,
    pub frames_present: u32,
    pub frame_index: u64,
    pub timestamp: DateTime<Utc>,
}

impl LostEvent {
    fn from_track(track: &Track, frame_index: u64) -> Self {
        Self {
            track_id: track.id,
            label: track.label.clone(),
            frames_present: track.frames_present,
            frame_index,
            timestamp: Utc::now(),
        }
    }
}

/// A question for the vision provider about one pending track.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub track_id: TrackId,
    pub label: String,
    pub prompt: String,
}

/// What one scan pass produced.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub pending: Vec<ConfirmationRequest>,
    pub lost: Vec<LostEvent>,
}

/// Resolution of one confirmation answer.
#[derive(Debug)]
pub enum ConfirmationOutcome {
    Lost(LostEvent),
    Held,
    /// The track disappeared or changed state while the question was in
    /// flight. Nothing to do.
    Stale,
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct DwellClassifier {
    linger_threshold: u32,
    confirm_with_vision: bool,
}

impl DwellClassifier {
    pub fn new(linger_threshold: u32, confirm_with_vision: bool) -> Self {
        Self {
            linger_threshold,
            confirm_with_vision,
        }
    }

    /// Sweep the registry for tracks whose dwell reached the threshold.
    ///
    /// Each qualifying track fires once: the transition out of Active is the
    /// guard, so a track already pending or classified is never picked up
    /// again until something re-arms it.
    pub fn scan(&self, registry: &mut TrackRegistry, frame_index: u64) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();

        for track in registry.live_tracks_mut() {
            if track.state != TrackState::Active || track.frames_present < self.linger_threshold {
                continue;
            }

            if self.confirm_with_vision {
                track.state = TrackState::PendingConfirmation;
                info!(
                    "⏰ {} track {} unattended for {} frames, asking for confirmation",
                    track.label, track.id, track.frames_present
                );
                outcome.pending.push(ConfirmationRequest {
                    track_id: track.id,
                    label: track.label.clone(),
                    prompt: confirmation_prompt(&track.label),
                });
            } else {
                track.state = TrackState::ConfirmedLost;
                info!(
                    "🚨 LOST ITEM: {} track {} unattended for {} frames",
                    track.label, track.id, track.frames_present
                );
                outcome.lost.push(LostEvent::from_track(track, frame_index));
            }
        }

        outcome
    }

    /// Resolve one confirmation answer against the registry.
    ///
    /// Any answer other than a plain "no" counts as held: the question asks
    /// whether someone is holding the item, so "no" is the lost verdict.
    pub fn apply_confirmation(
        &self,
        registry: &mut TrackRegistry,
        track_id: TrackId,
        answer: &str,
        frame_index: u64,
    ) -> ConfirmationOutcome {
        let track = match registry.get_mut(track_id) {
            Some(track) => track,
            None => return ConfirmationOutcome::Stale,
        };
        if track.state != TrackState::PendingConfirmation {
            return ConfirmationOutcome::Stale;
        }

        if answer.trim().to_lowercase() == "no" {
            track.state = TrackState::ConfirmedLost;
            info!(
                "🚨 LOST ITEM: {} track {} confirmed unattended after {} frames",
                track.label, track.id, track.frames_present
            );
            ConfirmationOutcome::Lost(LostEvent::from_track(track, frame_index))
        } else {
            track.state = TrackState::ConfirmedHeld;
            track.frames_present = 0;
            info!(
                "✅ {} track {} is held by someone, dwell reset",
                track.label, track.id
            );
            ConfirmationOutcome::Held
        }
    }

    /// The provider call for this track's question failed. Drop the track
    /// back to Active so the next scan asks again.
    pub fn apply_confirmation_failure(&self, registry: &mut TrackRegistry, track_id: TrackId) {
        if let Some(track) = registry.get_mut(track_id) {
            if track.state == TrackState::PendingConfirmation {
                warn!(
                    "⚠️ Confirmation for track {} failed, will retry at next scan",
                    track_id
                );
                track.state = TrackState::Active;
            }
        }
    }
}

fn confirmation_prompt(label: &str) -> String {
    format!(
        "Is the {} which is labelled in the image held by someone? Answer in one word.",
        label
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBox;
    use crate::tracker::RegistryConfig;
    use crate::types::LabelProposals;

    const DIMS: (u32, u32) = (100, 100);

    fn props(label: &str) -> Vec<LabelProposals> {
        vec![LabelProposals {
            label: label.to_string(),
            boxes: vec![NormalizedBox::new(0.1, 0.1, 0.3, 0.3)],
        }]
    }

    fn registry(linger_threshold: u32) -> TrackRegistry {
        TrackRegistry::new(RegistryConfig {
            iou_threshold: 0.5,
            linger_threshold,
            presence_min: 1,
        })
    }

    #[test]
    fn test_direct_mode_flags_lost_at_threshold() {
        let mut reg = registry(30);
        let classifier = DwellClassifier::new(30, false);
        let mut events = Vec::new();

        for frame in 1..=30u64 {
            reg.update(frame, &props("backpack"), DIMS);
            let outcome = classifier.scan(&mut reg, frame);
            assert!(outcome.pending.is_empty());
            if frame < 30 {
                assert!(outcome.lost.is_empty(), "no event before frame 30");
            }
            events.extend(outcome.lost);
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "backpack");
        assert_eq!(events[0].frames_present, 30);
        assert_eq!(events[0].frame_index, 30);
    }

    #[test]
    fn test_classification_fires_once() {
        let mut reg = registry(3);
        let classifier = DwellClassifier::new(3, false);

        for frame in 1..=3u64 {
            reg.update(frame, &props("wallet"), DIMS);
        }
        assert_eq!(classifier.scan(&mut reg, 3).lost.len(), 1);

        // Track stays in view past the threshold; no second event
        for frame in 4..=6u64 {
            reg.update(frame, &props("wallet"), DIMS);
            assert!(classifier.scan(&mut reg, frame).lost.is_empty());
        }
    }

    #[test]
    fn test_confirmation_mode_asks_instead_of_flagging() {
        let mut reg = registry(3);
        let classifier = DwellClassifier::new(3, true);

        for frame in 1..=3u64 {
            reg.update(frame, &props("phone"), DIMS);
        }
        let outcome = classifier.scan(&mut reg, 3);

        assert!(outcome.lost.is_empty());
        assert_eq!(outcome.pending.len(), 1);
        let request = &outcome.pending[0];
        assert!(request.prompt.contains("phone"));
        assert_eq!(
            reg.get(request.track_id).unwrap().state,
            TrackState::PendingConfirmation
        );

        // Pending tracks are not scanned again
        assert!(classifier.scan(&mut reg, 4).pending.is_empty());
    }

    #[test]
    fn test_no_answer_confirms_lost() {
        let mut reg = registry(3);
        let classifier = DwellClassifier::new(3, true);

        for frame in 1..=3u64 {
            reg.update(frame, &props("bottle"), DIMS);
        }
        let id = classifier.scan(&mut reg, 3).pending[0].track_id;

        match classifier.apply_confirmation(&mut reg, id, " No ", 4) {
            ConfirmationOutcome::Lost(event) => {
                assert_eq!(event.track_id, id);
                assert_eq!(event.label, "bottle");
            }
            other => panic!("expected Lost, got {:?}", other),
        }
        assert_eq!(reg.get(id).unwrap().state, TrackState::ConfirmedLost);
    }

    #[test]
    fn test_punctuated_no_counts_as_held() {
        let mut reg = registry(3);
        let classifier = DwellClassifier::new(3, true);

        for frame in 1..=3u64 {
            reg.update(frame, &props("bottle"), DIMS);
        }
        let id = classifier.scan(&mut reg, 3).pending[0].track_id;

        // Only a bare "no" is the lost verdict; "No." normalizes to "no."
        // and stays on the conservative held side
        assert!(matches!(
            classifier.apply_confirmation(&mut reg, id, " No. ", 4),
            ConfirmationOutcome::Held
        ));
        assert_eq!(reg.get(id).unwrap().state, TrackState::ConfirmedHeld);
        assert_eq!(reg.get(id).unwrap().frames_present, 0);
    }

    #[test]
    fn test_yes_answer_resets_dwell_and_rearms() {
        let mut reg = registry(3);
        let classifier = DwellClassifier::new(3, true);

        for frame in 1..=3u64 {
            reg.update(frame, &props("backpack"), DIMS);
        }
        let id = classifier.scan(&mut reg, 3).pending[0].track_id;

        assert!(matches!(
            classifier.apply_confirmation(&mut reg, id, "Yes", 4),
            ConfirmationOutcome::Held
        ));
        let track = reg.get(id).unwrap();
        assert_eq!(track.state, TrackState::ConfirmedHeld);
        assert_eq!(track.frames_present, 0);

        // Next sighting re-arms the track and dwell counts from scratch
        reg.update(4, &props("backpack"), DIMS);
        let track = reg.get(id).unwrap();
        assert_eq!(track.state, TrackState::Active);
        assert_eq!(track.frames_present, 1);
    }

    #[test]
    fn test_failed_confirmation_retries_next_scan() {
        let mut reg = registry(3);
        let classifier = DwellClassifier::new(3, true);

        for frame in 1..=3u64 {
            reg.update(frame, &props("wallet"), DIMS);
        }
        let id = classifier.scan(&mut reg, 3).pending[0].track_id;

        classifier.apply_confirmation_failure(&mut reg, id);
        assert_eq!(reg.get(id).unwrap().state, TrackState::Active);

        // Dwell is still past the threshold, so the question goes out again
        reg.update(4, &props("wallet"), DIMS);
        let outcome = classifier.scan(&mut reg, 4);
        assert_eq!(outcome.pending.len(), 1);
        assert_eq!(outcome.pending[0].track_id, id);
    }

    #[test]
    fn test_answer_for_vanished_track_is_stale() {
        let mut reg = registry(3);
        let classifier = DwellClassifier::new(3, true);

        for frame in 1..=3u64 {
            reg.update(frame, &props("phone"), DIMS);
        }
        let id = classifier.scan(&mut reg, 3).pending[0].track_id;

        // Track evicts while the question is in flight
        for frame in 4..=10u64 {
            reg.update(frame, &[], DIMS);
        }
        assert!(reg.get(id).is_none());
        assert!(matches!(
            classifier.apply_confirmation(&mut reg, id, "no", 11),
            ConfirmationOutcome::Stale
        ));

        // Same for a track that is no longer pending
        let id2 = {
            reg.update(11, &props("phone"), DIMS);
            reg.live_tracks().next().unwrap().id
        };
        assert!(matches!(
            classifier.apply_confirmation(&mut reg, id2, "no", 12),
            ConfirmationOutcome::Stale
        ));
    }
}
