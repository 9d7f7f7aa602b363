//! Core module
//!
//! Container-independent building blocks: the error and diagnostic types
//! and the generic field-map tag model shared by all tag variants.

pub mod error;
pub mod notification;
pub mod tag;

pub use error::{TagError, TagResult};
pub use notification::{Notification, NotificationLog, Severity};
pub use tag::{FieldMapTag, Tag, TagField, TagVariant};
