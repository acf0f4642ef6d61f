// src/pipeline/frame_context.rs
//
// Single source of truth for per-frame bookkeeping. Every subsystem reads
// the same index and dimensions instead of deriving them separately.

use crate::types::Frame;

/// The index counts processed frames (after striding), which is the clock
/// the tracker and classifier run on.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: f64,
}

impl FrameContext {
    pub fn new(index: u64, frame: &Frame) -> Self {
        Self {
            index,
            width: frame.width,
            height: frame.height,
            timestamp_ms: frame.timestamp_ms,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
