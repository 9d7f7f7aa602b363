//! Tag field contract
//!
//! A field pairs a container-specific identifier with a value and optional
//! per-field type information. The identifier type is supplied by the tag
//! variant (a four-byte code for MP4, a three-letter code for ID3v2.3, a
//! numeric id for Matroska); it must be totally ordered so serialization
//! can be deterministic.

use std::fmt;

use crate::types::value::TagValue;

/// Contract implemented by each tag variant's field type.
pub trait TagField {
    /// Container-specific identifier with equality and canonical ordering.
    type Id: Clone + Eq + Ord + fmt::Debug;

    /// Secondary discriminator distinguishing same-identifier fields, e.g.
    /// MP4's extended (mean, name) pair or an ID3 language/country pair.
    type TypeInfo: Clone + PartialEq + fmt::Debug;

    /// Construct a field holding one value.
    fn with_value(id: Self::Id, value: TagValue) -> Self;

    fn id(&self) -> &Self::Id;

    fn value(&self) -> &TagValue;

    fn value_mut(&mut self) -> &mut TagValue;

    fn set_value(&mut self, value: TagValue);

    /// Type info, when the field carries one.
    fn type_info(&self) -> Option<&Self::TypeInfo> {
        None
    }

    /// Whether two fields address the same slot: same identifier and same
    /// type info (both absent counts as same).
    fn matches(&self, other: &Self) -> bool {
        self.id() == other.id()
            && match (self.type_info(), other.type_info()) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                _ => false,
            }
    }
}
