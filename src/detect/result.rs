use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;
use crate::value::Value;

/// One class hypothesis for a detected object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub label: String,
    pub score: f32,
    pub index: i32,
}

impl Category {
    pub fn new(label: impl Into<String>, score: f32, index: i32) -> Self {
        Self {
            label: label.into(),
            score,
            index,
        }
    }
}

/// Detector output in model-input coordinates, before remapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bounding_box: BoundingBox,
    /// Sorted by descending score.
    pub categories: Vec<Category>,
}

impl RawDetection {
    pub fn new(bounding_box: BoundingBox, categories: Vec<Category>) -> Self {
        Self {
            bounding_box,
            categories,
        }
    }

    /// Highest-scoring category, if any.
    pub fn top_category(&self) -> Option<&Category> {
        self.categories
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// A detection as returned to the caller: source-frame box, best label, score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub rect: BoundingBox,
    pub label: String,
    pub score: f32,
}

impl Detection {
    /// Channel encoding: `{rect: {top, right, bottom, left}, label, score}`.
    pub fn to_value(&self) -> Value {
        Value::map([
            (
                "rect",
                Value::map([
                    ("top", Value::from(self.rect.top)),
                    ("right", Value::from(self.rect.right)),
                    ("bottom", Value::from(self.rect.bottom)),
                    ("left", Value::from(self.rect.left)),
                ]),
            ),
            ("label", Value::from(self.label.as_str())),
            ("score", Value::from(self.score)),
        ])
    }
}
