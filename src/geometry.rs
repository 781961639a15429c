use serde::{Deserialize, Serialize};

use crate::frame::Rotation;

pub const DEFAULT_INFERENCE_WIDTH: u32 = 640;
pub const DEFAULT_INFERENCE_HEIGHT: u32 = 480;

/// Axis-aligned box in pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl BoundingBox {
    pub fn new(top: f32, right: f32, bottom: f32, left: f32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }
}

/// Fixed resolution frames are resized to before rotation and inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceGeometry {
    pub width: u32,
    pub height: u32,
}

impl Default for InferenceGeometry {
    fn default() -> Self {
        Self {
            width: DEFAULT_INFERENCE_WIDTH,
            height: DEFAULT_INFERENCE_HEIGHT,
        }
    }
}

impl InferenceGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of the model input after the rotation is applied.
    pub fn rotated(self, rotation: Rotation) -> Self {
        if rotation.is_transposing() {
            Self {
                width: self.height,
                height: self.width,
            }
        } else {
            self
        }
    }

    /// Map a box from model-input space back onto the source frame.
    ///
    /// Each axis is scaled independently: horizontal edges by
    /// `source_width / input_width`, vertical edges by
    /// `source_height / input_height`, where the input is this geometry after
    /// `rotation`. With 640x480 and a quarter turn the divisors are 480 and 640.
    pub fn remap(
        &self,
        bbox: BoundingBox,
        rotation: Rotation,
        source_width: u32,
        source_height: u32,
    ) -> BoundingBox {
        let input = self.rotated(rotation);
        let input_w = input.width as f32;
        let input_h = input.height as f32;
        let source_w = source_width as f32;
        let source_h = source_height as f32;
        BoundingBox {
            top: bbox.top / input_h * source_h,
            right: bbox.right / input_w * source_w,
            bottom: bbox.bottom / input_h * source_h,
            left: bbox.left / input_w * source_w,
        }
    }
}
