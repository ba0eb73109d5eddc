use serde::Serialize;
use strum::Display;

use crate::config::{Anchor, CountingConfig, InDirection};
use crate::models::detection::{BoundingBox, Point};
use crate::models::job::CountStats;
use crate::tracking::tracker::Track;
use crate::tracking::EngineError;

/// Side of the counting line, by the sign of the cross product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CrossingDirection {
    In,
    Out,
}

/// A track changed sides between two consecutive matched observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub frame_index: u64,
    pub direction: CrossingDirection,
}

/// Directed segment in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountingLine {
    pub start: Point,
    pub end: Point,
}

impl CountingLine {
    pub fn new(start: Point, end: Point) -> Result<Self, EngineError> {
        if start == end {
            return Err(EngineError::DegenerateLine);
        }
        Ok(Self { start, end })
    }

    /// Scale the normalized endpoints of the configuration to a frame size.
    pub fn from_config(config: &CountingConfig, width: u32, height: u32) -> Result<Self, EngineError> {
        let (w, h) = (width as f32, height as f32);
        Self::new(
            Point::new(config.line_start_x * w, config.line_start_y * h),
            Point::new(config.line_end_x * w, config.line_end_y * h),
        )
    }

    /// `None` when the point lies exactly on the (infinite) line.
    pub fn side_of(&self, point: Point) -> Option<Side> {
        let cross = (self.end.x - self.start.x) * (point.y - self.start.y)
            - (self.end.y - self.start.y) * (point.x - self.start.x);
        if cross > 0.0 {
            Some(Side::Positive)
        } else if cross < 0.0 {
            Some(Side::Negative)
        } else {
            None
        }
    }
}

pub fn anchor_point(bbox: &BoundingBox, anchor: Anchor) -> Point {
    match anchor {
        Anchor::Center => bbox.center(),
        Anchor::BottomCenter => bbox.bottom_center(),
    }
}

/// Counts directional line crossings of tracked objects.
#[derive(Debug, Clone)]
pub struct LineZone {
    line: CountingLine,
    in_direction: InDirection,
    anchor: Anchor,
    total_in: u64,
    total_out: u64,
}

impl LineZone {
    pub fn new(line: CountingLine, in_direction: InDirection, anchor: Anchor) -> Self {
        Self {
            line,
            in_direction,
            anchor,
            total_in: 0,
            total_out: 0,
        }
    }

    pub fn line(&self) -> &CountingLine {
        &self.line
    }

    /// Record the side of a freshly matched track and fire a crossing when it
    /// differs from the side at its previous matched observation.
    pub fn observe(&mut self, track: &mut Track, frame_index: u64) -> Option<CrossingEvent> {
        let side = self.line.side_of(anchor_point(&track.bbox, self.anchor))?;
        let prior = track.prior_side.replace(side)?;
        if prior == side {
            return None;
        }

        let direction = match (self.in_direction, prior, side) {
            (InDirection::NegativeToPositive, Side::Negative, Side::Positive)
            | (InDirection::PositiveToNegative, Side::Positive, Side::Negative) => {
                CrossingDirection::In
            }
            _ => CrossingDirection::Out,
        };
        match direction {
            CrossingDirection::In => self.total_in += 1,
            CrossingDirection::Out => self.total_out += 1,
        }

        Some(CrossingEvent {
            track_id: track.id,
            frame_index,
            direction,
        })
    }

    pub fn stats(&self) -> CountStats {
        CountStats::new(self.total_in, self.total_out)
    }
}
