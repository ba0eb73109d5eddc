//! Scripted detector output for counting scenarios
//!
//! Every scenario uses a 640x480 frame with the default counting line
//! (horizontal, y = 240). Boxes move a few pixels per frame so consecutive
//! observations overlap well above the tracker's IoU thresholds.

use herd_counter::models::detection::{BoundingBox, Detection, Point};

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Per-frame detections plus the counts a correct run must produce.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub frames: Vec<Vec<Detection>>,
    pub expected_in: u64,
    pub expected_out: u64,
}

impl Scenario {
    pub fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }
}

pub fn animal(class: &str, x: f32, y: f32, size: f32, confidence: f32) -> Detection {
    Detection::new(class, confidence, BoundingBox::centered(Point::new(x, y), size, size))
}

pub fn cow_at(x: f32, y: f32) -> Detection {
    animal("cow", x, y, 80.0, 0.9)
}

/// One cow walking top to bottom across the line.
pub fn single_crossing() -> Scenario {
    Scenario {
        name: "single_crossing",
        frames: (0..30)
            .map(|i| vec![cow_at(320.0, 150.0 + 10.0 * i as f32)])
            .collect(),
        expected_in: 1,
        expected_out: 0,
    }
}

/// Down across the line, pausing exactly on it, then back up.
pub fn cross_and_return() -> Scenario {
    let path = [
        180.0, 200.0, 220.0, 240.0, 260.0, 280.0, 300.0, 280.0, 260.0, 240.0, 220.0, 200.0, 180.0,
    ];
    Scenario {
        name: "cross_and_return",
        frames: path.iter().map(|&y| vec![cow_at(320.0, y)]).collect(),
        expected_in: 1,
        expected_out: 1,
    }
}

/// Confident detections whose boxes are too small to count.
pub fn small_boxes() -> Scenario {
    Scenario {
        name: "small_boxes",
        frames: (0..30)
            .map(|i| vec![animal("sheep", 320.0, 150.0 + 10.0 * i as f32, 40.0, 0.99)])
            .collect(),
        expected_in: 0,
        expected_out: 0,
    }
}

/// A class outside the allow-list crossing the line.
pub fn ignored_class() -> Scenario {
    Scenario {
        name: "ignored_class",
        frames: (0..30)
            .map(|i| vec![animal("person", 320.0, 150.0 + 10.0 * i as f32, 80.0, 0.95)])
            .collect(),
        expected_in: 0,
        expected_out: 0,
    }
}

/// A cow going down on the left while a sheep goes up on the right.
pub fn two_herds() -> Scenario {
    Scenario {
        name: "two_herds",
        frames: (0..30)
            .map(|i| {
                let step = 10.0 * i as f32;
                vec![
                    cow_at(150.0, 150.0 + step),
                    animal("sheep", 500.0, 330.0 - step, 80.0, 0.8),
                ]
            })
            .collect(),
        expected_in: 1,
        expected_out: 1,
    }
}

/// A cow whose detector confidence dips below the high threshold mid-walk.
pub fn flickering_confidence() -> Scenario {
    Scenario {
        name: "flickering_confidence",
        frames: (0..30)
            .map(|i| {
                let confidence = if (8..14).contains(&i) { 0.3 } else { 0.9 };
                vec![animal("cow", 320.0, 150.0 + 10.0 * i as f32, 80.0, confidence)]
            })
            .collect(),
        expected_in: 1,
        expected_out: 0,
    }
}

pub fn all_scenarios() -> Vec<Scenario> {
    vec![
        single_crossing(),
        cross_and_return(),
        small_boxes(),
        ignored_class(),
        two_herds(),
        flickering_confidence(),
    ]
}
