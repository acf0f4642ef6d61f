// src/geometry.rs
//
// Axis-aligned box types and the overlap ratio (IoU) used to associate
// detector proposals with existing tracks.
//
// Two coordinate spaces exist side by side:
//   - NormalizedBox: [0,1] coordinates as returned by the vision service
//   - PixelBox: frame pixel space, the registry's working representation

use serde::{Deserialize, Serialize};

/// Detector-space box, coordinates normalized to [0,1] of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl NormalizedBox {
    #[inline]
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Scale into the pixel space of a frame with the given dimensions.
    #[inline]
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelBox {
        let (w, h) = (width as f32, height as f32);
        PixelBox::new(self.x_min * w, self.y_min * h, self.x_max * w, self.y_max * h)
    }
}

/// Pixel-space box, `(x1, y1)` top-left and `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl PixelBox {
    #[inline]
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    #[inline]
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Intersection over union of two boxes in the same coordinate space.
///
/// Symmetric, always in [0,1]. Returns 0 when the boxes do not intersect
/// or when either has non-positive area.
pub fn overlap_ratio(a: &PixelBox, b: &PixelBox) -> f32 {
    if a.area() <= 0.0 || b.area() <= 0.0 {
        return 0.0;
    }

    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
