use async_trait::async_trait;

use crate::config::CountingConfig;
use crate::media::{FrameSink, FrameSource, VideoInfo};
use crate::models::detection::Detection;
use crate::models::job::CountStats;
use crate::services::detector::Detector;
use crate::tracking::annotate::annotate_frame;
use crate::tracking::line_zone::{CountingLine, CrossingEvent, LineZone};
use crate::tracking::tracker::{Association, Track, Tracker};
use crate::tracking::EngineError;

/// Receives percent-complete updates while a clip is processed.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, percent: u8);
}

/// Keep detections of allowed classes whose box area exceeds the minimum.
pub fn filter_detections(config: &CountingConfig, detections: Vec<Detection>) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| config.target_classes.iter().any(|c| c == &d.class_name))
        .filter(|d| d.bbox.area() > config.min_box_area)
        .collect()
}

/// Result of feeding one frame's detections into a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    pub association: Association,
    pub crossings: Vec<CrossingEvent>,
}

/// Tracking and counting state for a single job run.
pub struct CountingSession<'a> {
    config: &'a CountingConfig,
    tracker: Tracker,
    zone: LineZone,
}

impl<'a> CountingSession<'a> {
    pub fn new(config: &'a CountingConfig, line: CountingLine) -> Self {
        Self {
            config,
            tracker: Tracker::new(config),
            zone: LineZone::new(line, config.in_direction, config.anchor),
        }
    }

    /// Filter, associate and count one frame of raw detections.
    pub fn process(&mut self, frame_index: u64, raw: Vec<Detection>) -> FrameOutcome {
        let detections = filter_detections(self.config, raw);
        let association = self.tracker.update(frame_index, detections);

        let mut crossings = Vec::new();
        for track_id in association.observed() {
            if let Some(track) = self.tracker.track_mut(track_id) {
                if let Some(event) = self.zone.observe(track, frame_index) {
                    crossings.push(event);
                }
            }
        }

        FrameOutcome {
            association,
            crossings,
        }
    }

    pub fn stats(&self) -> CountStats {
        self.zone.stats()
    }

    pub fn line(&self) -> &CountingLine {
        self.zone.line()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Tracks observed in the given outcome, in id order.
    pub fn observed_tracks<'s>(&'s self, outcome: &'s FrameOutcome) -> impl Iterator<Item = &'s Track> {
        let tracker = &self.tracker;
        outcome
            .association
            .observed()
            .filter_map(move |id| tracker.track(id))
    }
}

/// Percent complete at `frame_index`, or `None` when the frame count is unknown.
pub fn progress_percent(frame_index: u64, total_frames: u64) -> Option<u8> {
    if total_frames == 0 {
        return None;
    }
    let percent = frame_index.saturating_mul(100) / total_frames;
    Some(percent.min(99) as u8)
}

/// Drives detection, tracking, counting and annotation over a whole clip.
pub struct CountingEngine<'a> {
    detector: &'a dyn Detector,
    config: &'a CountingConfig,
}

impl<'a> CountingEngine<'a> {
    pub fn new(detector: &'a dyn Detector, config: &'a CountingConfig) -> Self {
        Self { detector, config }
    }

    /// Consume every frame of `source`, writing annotated frames to `sink`.
    ///
    /// Counts are only meaningful once this returns; progress reports carry
    /// percent complete only.
    pub async fn run(
        &self,
        mut source: Box<dyn FrameSource>,
        mut sink: Box<dyn FrameSink>,
        info: &VideoInfo,
        progress: &dyn ProgressReporter,
    ) -> Result<CountStats, EngineError> {
        let line = CountingLine::from_config(self.config, info.width, info.height)?;
        let mut session = CountingSession::new(self.config, line);
        let mut last_reported: Option<u8> = None;
        let mut frames = 0u64;
        let every = self.config.progress_every_frames.max(1);

        while let Some(mut frame) = source.next_frame().await? {
            if frame.index % every == 0 {
                if let Some(percent) = progress_percent(frame.index, info.total_frames) {
                    let percent = last_reported.map_or(percent, |last| percent.max(last));
                    progress.report(percent).await;
                    last_reported = Some(percent);
                }
            }

            let detections = self.detector.detect(&frame).await?;
            let outcome = session.process(frame.index, detections);

            for event in &outcome.crossings {
                tracing::debug!(
                    track_id = event.track_id,
                    frame = event.frame_index,
                    direction = %event.direction,
                    "Line crossing"
                );
                metrics::counter!("line_crossings_total", "direction" => event.direction.to_string())
                    .increment(1);
            }

            annotate_frame(
                &mut frame.image,
                session.observed_tracks(&outcome),
                session.line(),
                session.stats(),
            );
            sink.write_frame(&frame).await?;
            frames += 1;
        }

        sink.finish().await?;

        let stats = session.stats();
        tracing::info!(
            frames,
            total_in = stats.total_in,
            total_out = stats.total_out,
            total_count = stats.total_count,
            "Counting finished"
        );
        Ok(stats)
    }
}
