// src/render.rs
//
// Annotated frame output. Each surfaced track gets a hollow box whose color
// follows the lifecycle: green while fresh, amber once dwell passes half
// the linger window, orange while a confirmation is in flight, red when
// confirmed lost, blue when confirmed held.

use crate::geometry::PixelBox;
use crate::tracker::{Track, TrackState};
use crate::types::Frame;

use anyhow::{Context, Result};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};

const GREEN: Rgb<u8> = Rgb([0, 200, 83]);
const AMBER: Rgb<u8> = Rgb([255, 191, 0]);
const ORANGE: Rgb<u8> = Rgb([255, 120, 0]);
const RED: Rgb<u8> = Rgb([230, 30, 30]);
const BLUE: Rgb<u8> = Rgb([40, 140, 255]);

/// Draw the given tracks onto a copy of the frame.
pub fn annotate(frame: &Frame, tracks: &[&Track], linger_threshold: u32) -> Result<RgbImage> {
    let mut img: RgbImage = ImageBuffer::from_raw(frame.width, frame.height, frame.data.clone())
        .context("Frame buffer does not match its stated dimensions")?;

    for track in tracks {
        let color = state_color(track, linger_threshold);
        draw_track_box(&mut img, &track.bbox, color);
    }
    Ok(img)
}

/// Write an annotated frame as `frame_NNNNNN.jpg` under `out_dir`.
pub fn save_annotated(img: &RgbImage, out_dir: &Path, frame_index: u64) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    let path = out_dir.join(format!("frame_{:06}.jpg", frame_index));
    img.save(&path)
        .with_context(|| format!("Failed to write annotated frame {}", path.display()))?;
    Ok(path)
}

fn state_color(track: &Track, linger_threshold: u32) -> Rgb<u8> {
    match track.state {
        TrackState::Active => {
            if track.frames_present.saturating_mul(2) >= linger_threshold {
                AMBER
            } else {
                GREEN
            }
        }
        TrackState::PendingConfirmation => ORANGE,
        TrackState::ConfirmedLost => RED,
        TrackState::ConfirmedHeld => BLUE,
    }
}

fn draw_track_box(img: &mut RgbImage, bbox: &PixelBox, color: Rgb<u8>) {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    // Detections can poke past the frame edge; clamp to a drawable rect
    let x1 = bbox.x1.clamp(0.0, (width - 1) as f32);
    let y1 = bbox.y1.clamp(0.0, (height - 1) as f32);
    let x2 = bbox.x2.clamp(x1 + 1.0, width as f32);
    let y2 = bbox.y2.clamp(y1 + 1.0, height as f32);

    let w = (x2 - x1).round().max(1.0) as u32;
    let h = (y2 - y1).round().max(1.0) as u32;

    draw_hollow_rect_mut(img, Rect::at(x1 as i32, y1 as i32).of_size(w, h), color);
    // Second rect for a 2px line weight
    if w > 4 && h > 4 {
        let inner = Rect::at(x1 as i32 + 1, y1 as i32 + 1).of_size(w - 2, h - 2);
        draw_hollow_rect_mut(img, inner, color);
    }
}

// ============================================================================
// TESTS
// ============================================================================
