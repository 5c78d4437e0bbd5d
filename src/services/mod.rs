pub mod annotate;
pub mod detector;
pub mod live;
pub mod queue;
pub mod reaper;
pub mod recorder;
pub mod registry;
pub mod storage;
pub mod transcoder;
pub mod upload;
pub mod video;
pub mod worker;
