// src/frame_source.rs
//
// Frame acquisition. The pipeline only needs a pull-based stream of RGB
// frames; ImageDirSource provides one from a directory of numbered images,
// which is how extracted video sequences arrive here. Unreadable files are
// skipped with a warning rather than aborting the run.

use crate::types::Frame;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const NOMINAL_FPS: f64 = 30.0;

pub trait FrameSource {
    /// The next decoded frame, or None when the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn total_frames(&self) -> Option<u64> {
        None
    }
}

/// Reads frames from a directory of jpg/jpeg/png files in filename order.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageDirSource {
    pub fn new(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("Failed to list frame directory {}", dir.display()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false);
            if supported {
                files.push(path);
            }
        }
        files.sort();

        info!("✓ Found {} frame(s) in {}", files.len(), dir.display());
        Ok(Self { files, cursor: 0 })
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        while self.cursor < self.files.len() {
            let index = self.cursor;
            self.cursor += 1;
            let path = &self.files[index];

            match image::open(path) {
                Ok(img) => {
                    let rgb = img.to_rgb8();
                    let (width, height) = rgb.dimensions();
                    return Ok(Some(Frame {
                        data: rgb.into_raw(),
                        width,
                        height,
                        // Image sequences carry no timing, so synthesize one
                        // at the nominal capture rate
                        timestamp_ms: index as f64 * (1000.0 / NOMINAL_FPS),
                    }));
                }
                Err(e) => {
                    warn!("⚠️ Skipping unreadable frame {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.files.len() as u64)
    }
}

// ============================================================================
// TESTS
// ============================================================================
