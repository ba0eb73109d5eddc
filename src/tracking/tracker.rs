use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::{Anchor, CountingConfig};
use crate::models::detection::{BoundingBox, Detection, Point};
use crate::tracking::line_zone::{anchor_point, Side};

/// Persistent identity of one physical object within a job.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub last_matched_frame: u64,
    pub frames_since_match: u32,
    /// Side of the line at the last matched observation that had one.
    pub prior_side: Option<Side>,
    /// Recent anchor points, oldest first.
    pub trace: VecDeque<Point>,
    trace_length: usize,
}

impl Track {
    pub fn spawn(
        id: u64,
        frame_index: u64,
        detection: Detection,
        anchor: Anchor,
        trace_length: usize,
    ) -> Self {
        let mut track = Self {
            id,
            class_name: String::new(),
            confidence: 0.0,
            bbox: detection.bbox,
            last_matched_frame: frame_index,
            frames_since_match: 0,
            prior_side: None,
            trace: VecDeque::with_capacity(trace_length),
            trace_length,
        };
        track.absorb(frame_index, detection, anchor);
        track
    }

    fn absorb(&mut self, frame_index: u64, detection: Detection, anchor: Anchor) {
        self.class_name = detection.class_name;
        self.confidence = detection.confidence;
        self.bbox = detection.bbox;
        self.last_matched_frame = frame_index;
        self.frames_since_match = 0;

        if self.trace_length > 0 {
            if self.trace.len() == self.trace_length {
                self.trace.pop_front();
            }
            self.trace.push_back(anchor_point(&self.bbox, anchor));
        }
    }
}

/// Track ids touched by one [`Tracker::update`] call, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Association {
    /// Existing tracks matched to a detection this frame.
    pub matched: Vec<u64>,
    /// Tracks created from unmatched detections this frame.
    pub spawned: Vec<u64>,
    /// Tracks deleted after exceeding the lost-track budget.
    pub removed: Vec<u64>,
}

impl Association {
    /// Tracks observed this frame, matched or new.
    pub fn observed(&self) -> impl Iterator<Item = u64> + '_ {
        self.matched.iter().chain(self.spawned.iter()).copied()
    }
}

/// Two-pass IoU tracker.
///
/// High-confidence detections are matched first at a strict IoU threshold,
/// then the remaining detections are offered to still-unmatched tracks at a
/// relaxed threshold, which keeps identities through frames where the
/// detector is unsure.
#[derive(Debug, Clone)]
pub struct Tracker {
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
    high_confidence: f32,
    strict_iou: f32,
    relaxed_iou: f32,
    activation_confidence: f32,
    lost_track_budget: u32,
    anchor: Anchor,
    trace_length: usize,
}

impl Tracker {
    pub fn new(config: &CountingConfig) -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            high_confidence: config.high_confidence,
            strict_iou: config.strict_iou,
            relaxed_iou: config.relaxed_iou,
            activation_confidence: config.activation_confidence,
            lost_track_budget: config.lost_track_budget,
            anchor: config.anchor,
            trace_length: config.trace_length,
        }
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_mut(&mut self, id: u64) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Associate one frame's (already filtered) detections with the tracks.
    pub fn update(&mut self, frame_index: u64, detections: Vec<Detection>) -> Association {
        let mut free_tracks: BTreeSet<u64> = self.tracks.keys().copied().collect();
        let (high, low): (Vec<usize>, Vec<usize>) = (0..detections.len())
            .partition(|&i| detections[i].confidence >= self.high_confidence);

        let first = self.greedy_match(&free_tracks, &detections, &high, self.strict_iou);
        for (track_id, _) in &first {
            free_tracks.remove(track_id);
        }

        // unmatched confident detections skip the relaxed pass and spawn
        let second = self.greedy_match(&free_tracks, &detections, &low, self.relaxed_iou);
        for (track_id, _) in &second {
            free_tracks.remove(track_id);
        }

        let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
        let mut association = Association::default();

        for (track_id, det_index) in first.into_iter().chain(second) {
            if let (Some(track), Some(detection)) =
                (self.tracks.get_mut(&track_id), slots[det_index].take())
            {
                track.absorb(frame_index, detection, self.anchor);
                association.matched.push(track_id);
            }
        }
        association.matched.sort_unstable();

        for track_id in free_tracks {
            let lost = match self.tracks.get_mut(&track_id) {
                Some(track) => {
                    track.frames_since_match += 1;
                    track.frames_since_match > self.lost_track_budget
                }
                None => false,
            };
            if lost {
                self.tracks.remove(&track_id);
                association.removed.push(track_id);
            }
        }

        for detection in slots.into_iter().flatten() {
            if detection.confidence < self.activation_confidence {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.insert(
                id,
                Track::spawn(id, frame_index, detection, self.anchor, self.trace_length),
            );
            association.spawned.push(id);
        }

        association
    }

    /// Greedy best-first matching: highest IoU wins, ties go to the lower
    /// track id and then the lower detection index.
    fn greedy_match(
        &self,
        free_tracks: &BTreeSet<u64>,
        detections: &[Detection],
        candidates: &[usize],
        threshold: f32,
    ) -> Vec<(u64, usize)> {
        let mut pairs: Vec<(f32, u64, usize)> = Vec::new();
        for &track_id in free_tracks {
            let Some(track) = self.tracks.get(&track_id) else {
                continue;
            };
            for &det_index in candidates {
                let iou = track.bbox.iou(&detections[det_index].bbox);
                if iou > 0.0 && iou >= threshold {
                    pairs.push((iou, track_id, det_index));
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut used_tracks = BTreeSet::new();
        let mut used_detections = BTreeSet::new();
        let mut matches = Vec::new();
        for (_, track_id, det_index) in pairs {
            if used_tracks.contains(&track_id) || used_detections.contains(&det_index) {
                continue;
            }
            used_tracks.insert(track_id);
            used_detections.insert(det_index);
            matches.push((track_id, det_index));
        }
        matches
    }
}
