//! Herd counter
//!
//! Counts animals crossing a virtual line in uploaded video clips. The
//! gateway stores uploads and enqueues jobs; workers lease jobs, run
//! detection, tracking and line counting over every frame, then publish an
//! annotated video, progress snapshots and a final count.

pub mod app_state;
pub mod config;
pub mod media;
pub mod models;
pub mod routes;
pub mod services;
pub mod tracking;
pub mod worker;
