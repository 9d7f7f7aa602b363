//! Error types for tag operations
//!
//! This module defines all error types used throughout the tag engine.

use thiserror::Error;

/// Error types for tag operations
#[derive(Debug, Error)]
pub enum TagError {
    /// The byte source ended inside an atom
    #[error("truncated data: {0}")]
    Truncated(String),

    /// An atom header is malformed (size smaller than the header, forbidden nesting)
    #[error("invalid atom: {0}")]
    InvalidAtom(String),

    /// The top-level structure is not recognized as MP4/ISO-BMFF
    #[error("unsupported container format")]
    UnsupportedContainer,

    /// A chunk offset does not fit even after promotion to 64-bit tables
    #[error("chunk offset exceeds 64 bits after table promotion")]
    OffsetOverflow,

    /// A filesystem operation on the backup file failed before the original
    /// was modified
    #[error("backup operation failed: {0}")]
    BackupIo(String),

    /// An error occurred after the original file had been modified; the
    /// backup has been restored and the pre-edit state is on disk
    #[error("rewriting failed while {context}; the original file has been restored")]
    RewriteFailed {
        context: String,
        #[source]
        source: Box<TagError>,
    },

    /// A value is incompatible with the field's proposed data type and no
    /// lossless coercion exists
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Rejected configuration (e.g. min padding above max padding)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The tag variant cannot be attached to this container
    #[error("tag variant {0} is not supported by this container")]
    UnsupportedTagVariant(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TagError {
    /// Returns whether this error was raised after the original file had
    /// already been modified. Callers use this to tell "nothing happened"
    /// apart from "the backup was restored".
    pub fn is_volatile(&self) -> bool {
        matches!(self, TagError::RewriteFailed { .. })
    }
}

/// Result type alias for tag operations
pub type TagResult<T> = Result<T, TagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TagError::Truncated("atom at 0x40".to_string());
        assert!(err.to_string().contains("truncated data: atom at 0x40"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let tag_err: TagError = io_err.into();
        assert!(matches!(tag_err, TagError::Io(_)));
        assert!(!tag_err.is_volatile());
    }

    #[test]
    fn test_rewrite_failed_is_volatile() {
        let err = TagError::RewriteFailed {
            context: "making file".to_string(),
            source: Box::new(TagError::UnsupportedContainer),
        };
        assert!(err.is_volatile());
        assert!(err.to_string().contains("has been restored"));
    }
}
