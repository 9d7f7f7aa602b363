//! Generic field-map tag
//!
//! [`FieldMapTag`] stores tag fields as an ordered multi-map from
//! identifier to field: several fields may share one identifier
//! (distinguished by type info), and insertion order is preserved. Tag
//! variants embed a `FieldMapTag` of their own field type and implement
//! the [`Tag`] trait on top, mapping [`KnownField`]s to their identifier
//! scheme.

pub mod field;

pub use field::TagField;

use crate::types::known::{self, KnownField, TagDataType};
use crate::types::value::{TagValue, TextEncoding};

/// The tag families the polymorphic contract accommodates. Only MP4 has a
/// codec in this crate; the others exist so a façade can talk about them
/// uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TagVariant {
    Mp4,
    Id3v1,
    Id3v2,
    Matroska,
    VorbisComment,
}

impl TagVariant {
    pub fn name(self) -> &'static str {
        match self {
            TagVariant::Mp4 => "MP4/iTunes tag",
            TagVariant::Id3v1 => "ID3v1 tag",
            TagVariant::Id3v2 => "ID3v2 tag",
            TagVariant::Matroska => "Matroska tag",
            TagVariant::VorbisComment => "Vorbis comment",
        }
    }
}

/// Ordered multi-map of tag fields.
#[derive(Debug, Clone, Default)]
pub struct FieldMapTag<F: TagField> {
    fields: Vec<F>,
}

impl<F: TagField> FieldMapTag<F> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// The first non-empty value under `id`, or the empty sentinel.
    pub fn value(&self, id: &F::Id) -> &TagValue {
        self.fields
            .iter()
            .find(|field| field.id() == id && !field.value().is_empty())
            .map(|field| field.value())
            .unwrap_or_else(|| TagValue::empty())
    }

    /// All non-empty values under `id`, in insertion order.
    pub fn values(&self, id: &F::Id) -> Vec<&TagValue> {
        self.fields
            .iter()
            .filter(|field| field.id() == id && !field.value().is_empty())
            .map(|field| field.value())
            .collect()
    }

    /// Replace the first value under `id`, or insert a new field when none
    /// exists and `value` is non-empty. Returns false when there is nothing
    /// to do (no existing field and an empty value).
    pub fn set_value(&mut self, id: F::Id, value: TagValue) -> bool {
        if let Some(field) = self.fields.iter_mut().find(|field| *field.id() == id) {
            field.set_value(value);
            true
        } else if !value.is_empty() {
            self.fields.push(F::with_value(id, value));
            true
        } else {
            false
        }
    }

    /// Replace all values under `id` with `values`: existing fields are
    /// updated in order, extras inserted, and leftover existing fields
    /// emptied (they become tombstones the codec drops at serialization).
    pub fn set_values(&mut self, id: F::Id, values: Vec<TagValue>) {
        let mut incoming = values.into_iter().filter(|value| !value.is_empty());
        for field in self.fields.iter_mut().filter(|field| *field.id() == id) {
            match incoming.next() {
                Some(value) => field.set_value(value),
                None => field.set_value(TagValue::Empty),
            }
        }
        for value in incoming {
            self.fields.push(F::with_value(id.clone(), value));
        }
    }

    /// Whether at least one non-empty value exists under `id`.
    pub fn has_field(&self, id: &F::Id) -> bool {
        self.fields
            .iter()
            .any(|field| field.id() == id && !field.value().is_empty())
    }

    /// Number of fields holding a non-empty value.
    pub fn field_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|field| !field.value().is_empty())
            .count()
    }

    pub fn remove_all_fields(&mut self) {
        self.fields.clear();
    }

    /// Direct access to the underlying fields, tombstones included.
    pub fn fields(&self) -> &[F] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Vec<F> {
        &mut self.fields
    }

    pub fn push_field(&mut self, field: F) {
        self.fields.push(field);
    }

    /// Merge fields from another map. Fields match on (identifier, type
    /// info); existing non-empty fields are only replaced when `overwrite`
    /// is set. Returns the number of fields inserted or updated.
    pub fn insert_fields(&mut self, from: &FieldMapTag<F>, overwrite: bool) -> usize
    where
        F: Clone,
    {
        let mut inserted = 0;
        for from_field in from.fields.iter() {
            if from_field.value().is_empty() {
                continue;
            }
            let mut matched = false;
            for own_field in self.fields.iter_mut() {
                if own_field.matches(from_field) {
                    if overwrite || own_field.value().is_empty() {
                        *own_field = from_field.clone();
                        inserted += 1;
                    }
                    matched = true;
                }
            }
            if !matched {
                self.fields.push(from_field.clone());
                inserted += 1;
            }
        }
        inserted
    }

    /// Re-encode every text value to `preferred`. Conversion failures leave
    /// the value untouched; the MP4 preferred encoding (UTF-8) never fails.
    pub fn ensure_text_values_properly_encoded(&mut self, preferred: TextEncoding) {
        for field in self.fields.iter_mut() {
            let _ = field.value_mut().convert_encoding(preferred);
        }
    }
}

/// Polymorphic tag contract for the file-info façade.
///
/// Identifier-based access lives on each variant's concrete type; this
/// trait covers the container-independent surface keyed by [`KnownField`].
pub trait Tag {
    fn variant(&self) -> TagVariant;

    fn type_name(&self) -> &'static str {
        self.variant().name()
    }

    /// The encoding the variant's codec writes text in.
    fn preferred_text_encoding(&self) -> TextEncoding;

    /// The first non-empty value of `field`, or the empty sentinel when the
    /// field is absent or unmapped in this variant.
    fn value_of(&self, field: KnownField) -> &TagValue;

    /// All non-empty values of `field` in insertion order.
    fn values_of(&self, field: KnownField) -> Vec<&TagValue>;

    /// Set the first value of `field`. Returns false when the variant has
    /// no mapping for `field` or there was nothing to do.
    fn set_value_of(&mut self, field: KnownField, value: TagValue) -> bool;

    /// Replace all values of `field`. Returns false when unmapped.
    fn set_values_of(&mut self, field: KnownField, values: Vec<TagValue>) -> bool;

    fn has_field(&self, field: KnownField) -> bool;

    /// Whether the variant can represent `field` at all.
    fn supports_field(&self, field: KnownField) -> bool;

    fn proposed_data_type(&self, field: KnownField) -> TagDataType {
        known::proposed_data_type(field)
    }

    fn field_count(&self) -> usize;

    fn remove_all_fields(&mut self);

    /// Merge known-field values from another tag, possibly of a different
    /// variant. Returns the number of fields inserted or updated.
    fn insert_values(&mut self, from: &dyn Tag, overwrite: bool) -> usize {
        let mut inserted = 0;
        for &field in KnownField::ALL {
            if !from.has_field(field) || !self.supports_field(field) {
                continue;
            }
            if !overwrite && self.has_field(field) {
                continue;
            }
            let values: Vec<TagValue> = from.values_of(field).into_iter().cloned().collect();
            if self.set_values_of(field, values) {
                inserted += 1;
            }
        }
        inserted
    }
}
