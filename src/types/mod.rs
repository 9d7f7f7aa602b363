//! Shared value types
//!
//! This module defines the value types stored in tag fields and the
//! container-independent field identifiers.

pub mod genre;
pub mod known;
pub mod value;

pub use genre::{genre_index, genre_name};
pub use known::{proposed_data_type, KnownField, TagDataType};
pub use value::{PositionInSet, TagValue, TextEncoding};
