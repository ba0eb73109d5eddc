pub mod detector;
pub mod memory;
pub mod progress;
pub mod queue;
pub mod storage;
pub mod submission;
