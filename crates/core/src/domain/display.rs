//! Screen-space geometry shared by the response curve and the analyzer trace
//!
//! The presentation layer is out of scope; this module only produces plain
//! point lists in the coordinate system of a caller-supplied rectangle.
//! - Frequency axis: logarithmic, [`MIN_FREQUENCY_HZ`]..[`MAX_FREQUENCY_HZ`]
//! - Level axis: linear in dB over a [`DbRange`], ceiling at the top

use super::params::ParamId;
use serde::{Deserialize, Serialize};

pub const MIN_FREQUENCY_HZ: f64 = 20.0;
pub const MAX_FREQUENCY_HZ: f64 = 20000.0;

/// Map a [0, 1] proportion onto a logarithmic range
#[inline]
pub fn map_to_log10(proportion: f64, min: f64, max: f64) -> f64 {
    min * (max / min).powf(proportion)
}

/// Inverse of [`map_to_log10`]
#[inline]
pub fn map_from_log10(value: f64, min: f64, max: f64) -> f64 {
    (value / min).log10() / (max / min).log10()
}

/// Linear remap of `value` from one range to another
#[inline]
pub fn map_range(value: f64, source_min: f64, source_max: f64, target_min: f64, target_max: f64) -> f64 {
    target_min + (value - source_min) * (target_max - target_min) / (source_max - source_min)
}

/// Frequency shown at a pixel column
///
/// Column 0 is 20 Hz and column `width - 1` is 20 kHz.
pub fn column_frequency(column: usize, width: usize) -> f64 {
    if width <= 1 {
        return MIN_FREQUENCY_HZ;
    }
    let proportion = column as f64 / (width - 1) as f64;
    map_to_log10(proportion.clamp(0.0, 1.0), MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ)
}

/// Target rectangle in screen space (y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayBounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl DisplayBounds {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin
    pub fn sized(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Whole pixel columns covered by the rectangle
    pub fn columns(&self) -> usize {
        if self.width.is_finite() && self.width > 0.0 {
            self.width as usize
        } else {
            0
        }
    }
}

/// Level range of a plot, bottom edge to top edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbRange {
    pub floor_db: f64,
    pub ceiling_db: f64,
}

impl DbRange {
    /// Range of the response-curve plot
    pub const RESPONSE: DbRange = DbRange {
        floor_db: -24.0,
        ceiling_db: 24.0,
    };

    /// Range of the analyzer trace
    pub const ANALYZER: DbRange = DbRange {
        floor_db: -48.0,
        ceiling_db: 0.0,
    };

    pub fn new(floor_db: f64, ceiling_db: f64) -> Self {
        Self {
            floor_db,
            ceiling_db,
        }
    }

    /// Vertical coordinate of `db` inside `bounds`, clamped to the range
    pub fn map_to_y(&self, db: f64, bounds: &DisplayBounds) -> f32 {
        let db = if db.is_nan() {
            self.floor_db
        } else {
            db.clamp(self.floor_db, self.ceiling_db)
        };
        map_range(
            db,
            self.floor_db,
            self.ceiling_db,
            f64::from(bounds.bottom()),
            f64::from(bounds.y),
        ) as f32
    }
}

/// One vertex of a rendered path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub x: f32,
    pub y: f32,
}

/// Ordered screen-space polyline, one vertex per pixel column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagnitudePath {
    points: Vec<PathPoint>,
}

impl MagnitudePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Rebuild from per-column levels, reusing the allocation
    pub fn rebuild(&mut self, levels_db: &[f64], bounds: &DisplayBounds, range: &DbRange) {
        self.points.clear();
        self.points
            .extend(levels_db.iter().enumerate().map(|(column, &db)| PathPoint {
                x: bounds.x + column as f32,
                y: range.map_to_y(db, bounds),
            }));
    }

    pub fn push(&mut self, point: PathPoint) {
        self.points.push(point);
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[PathPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ============================================================================
// CONTROL DESCRIPTORS
// ============================================================================

/// How a parameter's control is decorated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlKind {
    /// Value text only
    Plain,
    /// Value text plus labels at both ends of the travel
    LabeledExtremes { min_label: String, max_label: String },
}

impl ControlKind {
    /// Labels for the ends of the travel, if this control draws them
    pub fn extremes(&self) -> Option<(&str, &str)> {
        match self {
            ControlKind::Plain => None,
            ControlKind::LabeledExtremes {
                min_label,
                max_label,
            } => Some((min_label, max_label)),
        }
    }
}

/// Decoration of the control bound to `id`
///
/// Continuous parameters label their range ends; slope choices show only
/// their current label.
pub fn control_kind(id: ParamId) -> ControlKind {
    if id.is_choice() {
        return ControlKind::Plain;
    }
    let range = id.range();
    ControlKind::LabeledExtremes {
        min_label: id.format_value(range.min),
        max_label: id.format_value(range.max),
    }
}
