//! # tagkit
//!
//! A tag engine for MP4/ISO-BMFF files: parse, edit, and rewrite
//! iTunes-style metadata in place while preserving the audio/video payload
//! bit-exactly.
//!
//! The crate is built from three layers:
//!
//! - a fault-tolerant **atom tree parser** that discovers boxes on demand
//!   and degrades malformed regions to notifications,
//! - a generic **field-map tag model** with multi-valued, identifier-keyed
//!   fields, instantiated for the iTunes `ilst` scheme,
//! - a **rewrite planner** that patches files in place when the new tag
//!   fits into the existing padding and otherwise streams a new layout
//!   through a backup-swap with crash recovery, fixing up every
//!   `stco`/`co64` chunk offset along the way.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tagkit::{KnownField, Mp4File, RewriteConfig, Tag, TagValue};
//!
//! # fn main() -> Result<(), tagkit::TagError> {
//! let mut file = Mp4File::open("song.m4a")?;
//! let tag = file.create_tag();
//! tag.set_value_of(KnownField::Title, TagValue::text("Danse Macabre, Op.40"));
//! tag.set_value_of(KnownField::Artist, TagValue::text("Saint-Saëns"));
//! file.save(&RewriteConfig::default().padding(4096, 1024, 8192))?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod files;
pub mod types;
pub mod utils;

pub use crate::core::error::{TagError, TagResult};
pub use crate::core::notification::{Notification, NotificationLog, Severity};
pub use crate::core::tag::{FieldMapTag, Tag, TagField, TagVariant};
pub use crate::files::mp4::planner::{ElementPosition, RewriteConfig, RewritePlan, Segment};
pub use crate::files::mp4::tag::{Mp4ExtendedFieldId, Mp4Tag};
pub use crate::files::mp4::track::{MediaType, Mp4Track};
pub use crate::files::mp4::Mp4File;
pub use crate::types::known::{KnownField, TagDataType};
pub use crate::types::value::{PositionInSet, TagValue, TextEncoding};
