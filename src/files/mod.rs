//! File-level support
//!
//! The MP4 format module and the backup helper used by full rewrites.

pub mod backup;
pub mod mp4;

pub use mp4::planner::{ElementPosition, RewriteConfig, RewritePlan, Segment};
pub use mp4::tag::{Mp4ExtendedFieldId, Mp4Tag};
pub use mp4::track::{MediaType, Mp4Track};
pub use mp4::Mp4File;
