//! MP4 (iTunes-style) tag
//!
//! [`Mp4Tag`] hydrates from the `moov/udta/meta/ilst` subtree and
//! serializes back to a complete `meta` payload. Known fields map to the
//! usual iTunes four-byte codes; anything else is reachable by raw
//! identifier or by extended (mean, name) pair.

use std::io::{Read, Seek, Write};

use crate::core::error::{TagError, TagResult};
use crate::core::notification::NotificationLog;
use crate::core::tag::{FieldMapTag, Tag, TagField, TagVariant};
use crate::files::mp4::atom::Mp4Atom;
use crate::files::mp4::field::{Mp4TagField, Mp4TagFieldMaker};
use crate::files::mp4::ids::{
    atom, fourcc, genre_index, tag as tag_id, HANDLER_MANUFACTURER_APPL, HANDLER_MDIR,
};
use crate::types::known::{self, KnownField, TagDataType};
use crate::types::value::{TagValue, TextEncoding};
use crate::utils::io::write_u32_be;

/// Identifier of an extended (`----`) field: the (mean, name) pair plus a
/// write-time hint. Two fields match iff both strings match byte-exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4ExtendedFieldId {
    /// Typically [`crate::files::mp4::ids::ITUNES_MEAN`].
    pub mean: String,
    pub name: String,
    /// When set, writing only updates an existing field and never creates
    /// a new one.
    pub update_only: bool,
}

impl Mp4ExtendedFieldId {
    pub fn new(mean: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mean: mean.into(),
            name: name.into(),
            update_only: false,
        }
    }

    pub fn update_only(mut self) -> Self {
        self.update_only = true;
        self
    }

    pub fn matches(&self, field: &Mp4TagField) -> bool {
        field.mean() == self.mean && field.name() == self.name
    }
}

/// MP4/iTunes tag: a field map keyed by four-byte codes.
#[derive(Debug, Clone, Default)]
pub struct Mp4Tag {
    fields: FieldMapTag<Mp4TagField>,
}

impl Mp4Tag {
    pub fn new() -> Self {
        Self::default()
    }

    /// The identifier a known field maps to, if any.
    pub fn field_id(field: KnownField) -> Option<u32> {
        match field {
            KnownField::Title => Some(tag_id::TITLE),
            KnownField::Artist => Some(tag_id::ARTIST),
            KnownField::Album => Some(tag_id::ALBUM),
            KnownField::AlbumArtist => Some(tag_id::ALBUM_ARTIST),
            KnownField::Genre => Some(tag_id::GENRE),
            KnownField::Comment => Some(tag_id::COMMENT),
            KnownField::Description => Some(tag_id::DESCRIPTION),
            KnownField::Cover => Some(tag_id::COVER),
            KnownField::Year => Some(tag_id::YEAR),
            KnownField::TrackPosition => Some(tag_id::TRACK_POSITION),
            KnownField::DiskPosition => Some(tag_id::DISK_POSITION),
            KnownField::Encoder => Some(tag_id::ENCODER),
            KnownField::Composer => Some(tag_id::COMPOSER),
            KnownField::Copyright => Some(tag_id::COPYRIGHT),
            KnownField::Grouping => Some(tag_id::GROUPING),
            KnownField::Lyrics => Some(tag_id::LYRICS),
            KnownField::Bpm => Some(tag_id::BPM),
            KnownField::RecordLabel => Some(tag_id::RECORD_LABEL),
            // declared supported for historical reasons, but no mapping
            // exists and writes are a no-op
            KnownField::EncoderSettings => None,
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// The known field an identifier belongs to, if any.
    pub fn known_field(id: u32) -> Option<KnownField> {
        match id {
            tag_id::TITLE => Some(KnownField::Title),
            tag_id::ARTIST => Some(KnownField::Artist),
            tag_id::ALBUM => Some(KnownField::Album),
            tag_id::ALBUM_ARTIST => Some(KnownField::AlbumArtist),
            tag_id::GENRE | tag_id::PRE_DEFINED_GENRE => Some(KnownField::Genre),
            tag_id::COMMENT => Some(KnownField::Comment),
            tag_id::DESCRIPTION => Some(KnownField::Description),
            tag_id::COVER => Some(KnownField::Cover),
            tag_id::YEAR => Some(KnownField::Year),
            tag_id::TRACK_POSITION => Some(KnownField::TrackPosition),
            tag_id::DISK_POSITION => Some(KnownField::DiskPosition),
            tag_id::ENCODER => Some(KnownField::Encoder),
            tag_id::COMPOSER => Some(KnownField::Composer),
            tag_id::COPYRIGHT => Some(KnownField::Copyright),
            tag_id::GROUPING => Some(KnownField::Grouping),
            tag_id::LYRICS => Some(KnownField::Lyrics),
            tag_id::BPM => Some(KnownField::Bpm),
            tag_id::RECORD_LABEL => Some(KnownField::RecordLabel),
            _ => None,
        }
    }

    /// Identifier-based access to the underlying field map.
    pub fn value(&self, id: u32) -> &TagValue {
        self.fields.value(&id)
    }

    pub fn values(&self, id: u32) -> Vec<&TagValue> {
        self.fields.values(&id)
    }

    pub fn set_value(&mut self, id: u32, value: TagValue) -> bool {
        self.fields.set_value(id, value)
    }

    pub fn set_values(&mut self, id: u32, values: Vec<TagValue>) {
        self.fields.set_values(id, values)
    }

    pub fn has_id(&self, id: u32) -> bool {
        self.fields.has_field(&id)
    }

    /// The first non-empty value of the extended field with the given
    /// (mean, name) pair.
    pub fn extended_value(&self, mean: &str, name: &str) -> &TagValue {
        self.fields
            .fields()
            .iter()
            .find(|field| {
                field.is_extended()
                    && field.mean() == mean
                    && field.name() == name
                    && !field.value().is_empty()
            })
            .map(|field| field.value())
            .unwrap_or_else(|| TagValue::empty())
    }

    /// Set the extended field addressed by `id`. Honors `update_only`:
    /// without an existing match the write is a no-op returning false.
    pub fn set_extended_value(&mut self, id: &Mp4ExtendedFieldId, value: TagValue) -> bool {
        if let Some(field) = self
            .fields
            .fields_mut()
            .iter_mut()
            .find(|field| field.is_extended() && id.matches(field))
        {
            field.set_value(value);
            return true;
        }
        if id.update_only || value.is_empty() {
            return false;
        }
        self.fields
            .push_field(Mp4TagField::extended(id.mean.clone(), id.name.clone(), value));
        true
    }

    pub fn fields(&self) -> &FieldMapTag<Mp4TagField> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldMapTag<Mp4TagField> {
        &mut self.fields
    }

    pub fn insert_fields(&mut self, from: &Mp4Tag, overwrite: bool) -> usize {
        self.fields.insert_fields(&from.fields, overwrite)
    }

    /// Proposed value type for a raw identifier, via the known-field
    /// mapping. Unknown identifiers have no expectation.
    pub fn proposed_data_type_of(id: u32) -> TagDataType {
        Self::known_field(id)
            .map(known::proposed_data_type)
            .unwrap_or_default()
    }

    pub fn ensure_text_values_properly_encoded(&mut self) {
        self.fields
            .ensure_text_values_properly_encoded(TextEncoding::Utf8);
    }

    /// Hydrate the tag from a `meta` atom whose subtree has been
    /// discovered. Children of `ilst` that fail to parse degrade to
    /// notifications.
    pub fn parse<R: Read + Seek>(
        meta_atom: &Mp4Atom,
        reader: &mut R,
        log: &mut NotificationLog,
    ) -> TagResult<Mp4Tag> {
        let mut tag = Mp4Tag::new();
        let ilst = match meta_atom.child_by_id(atom::ILST) {
            Some(ilst) => ilst,
            None => return Ok(tag),
        };
        let end = ilst.end_offset();
        let mut pos = ilst.data_offset();
        while pos + 8 <= end {
            let field_atom = match Mp4Atom::parse_header(reader, pos, end) {
                Ok(field_atom) => field_atom,
                Err(error) => {
                    log.warning(error.to_string(), format!("parsing atom at 0x{:X}", pos));
                    break;
                }
            };
            for field in Mp4TagField::parse_from_atom(&field_atom, reader, log)? {
                tag.fields.push_field(field);
            }
            if field_atom.end_offset() <= pos {
                break;
            }
            pos = field_atom.end_offset();
        }
        Ok(tag)
    }

    /// Precompute the serialization. The returned maker knows the final
    /// size and streams bytes without recomputation.
    pub fn prepare(&self) -> TagResult<Mp4TagMaker> {
        Mp4TagMaker::new(self)
    }
}

impl Tag for Mp4Tag {
    fn variant(&self) -> TagVariant {
        TagVariant::Mp4
    }

    fn preferred_text_encoding(&self) -> TextEncoding {
        TextEncoding::Utf8
    }

    fn value_of(&self, field: KnownField) -> &TagValue {
        match field {
            KnownField::Genre => {
                let free_form = self.value(tag_id::GENRE);
                if free_form.is_empty() {
                    self.value(tag_id::PRE_DEFINED_GENRE)
                } else {
                    free_form
                }
            }
            // a comment-less file may still carry a description
            KnownField::Comment => {
                let comment = self.value(tag_id::COMMENT);
                if comment.is_empty() {
                    self.value(tag_id::DESCRIPTION)
                } else {
                    comment
                }
            }
            _ => match Self::field_id(field) {
                Some(id) => self.value(id),
                None => TagValue::empty(),
            },
        }
    }

    fn values_of(&self, field: KnownField) -> Vec<&TagValue> {
        match field {
            KnownField::Genre => {
                let mut values = self.values(tag_id::GENRE);
                values.extend(self.values(tag_id::PRE_DEFINED_GENRE));
                values
            }
            _ => match Self::field_id(field) {
                Some(id) => self.values(id),
                None => Vec::new(),
            },
        }
    }

    fn set_value_of(&mut self, field: KnownField, value: TagValue) -> bool {
        match field {
            KnownField::Genre => self.set_genre(value),
            _ => match Self::field_id(field) {
                Some(id) => self.set_value(id, value),
                None => false,
            },
        }
    }

    fn set_values_of(&mut self, field: KnownField, values: Vec<TagValue>) -> bool {
        match Self::field_id(field) {
            Some(id) => {
                self.set_values(id, values);
                true
            }
            None => false,
        }
    }

    fn has_field(&self, field: KnownField) -> bool {
        match field {
            KnownField::Genre => {
                self.has_id(tag_id::GENRE) || self.has_id(tag_id::PRE_DEFINED_GENRE)
            }
            _ => match Self::field_id(field) {
                Some(id) => self.has_id(id),
                None => false,
            },
        }
    }

    fn supports_field(&self, field: KnownField) -> bool {
        // EncoderSettings is reported as supported although no mapping is
        // defined; setting it is a no-op returning false
        field == KnownField::EncoderSettings || Self::field_id(field).is_some()
    }

    fn field_count(&self) -> usize {
        self.fields.field_count()
    }

    fn remove_all_fields(&mut self) {
        self.fields.remove_all_fields();
    }
}

impl Mp4Tag {
    /// Genre is two-headed: text hitting the ID3v1 table is stored as the
    /// pre-defined `gnre` index, anything else as free-form `©gen`.
    fn set_genre(&mut self, value: TagValue) -> bool {
        match &value {
            TagValue::Empty => {
                let cleared_text = self.set_value(tag_id::GENRE, TagValue::Empty);
                let cleared_index = self.set_value(tag_id::PRE_DEFINED_GENRE, TagValue::Empty);
                cleared_text || cleared_index
            }
            TagValue::StandardGenreIndex(_) => {
                self.set_values(tag_id::GENRE, Vec::new());
                self.set_values(tag_id::PRE_DEFINED_GENRE, vec![value]);
                true
            }
            TagValue::Text { .. } => {
                if let Some(index) = genre_index(&value.to_display_string()) {
                    self.set_values(tag_id::GENRE, Vec::new());
                    self.set_values(
                        tag_id::PRE_DEFINED_GENRE,
                        vec![TagValue::StandardGenreIndex(index)],
                    );
                } else {
                    self.set_values(tag_id::PRE_DEFINED_GENRE, Vec::new());
                    self.set_values(tag_id::GENRE, vec![value]);
                }
                true
            }
            _ => self.set_value(tag_id::GENRE, value),
        }
    }
}

/// Rendered `hdlr` atom for the metadata directory: handler `mdir`,
/// manufacturer `appl`, empty name.
fn render_meta_hdlr() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(37);
    bytes.extend_from_slice(&37u32.to_be_bytes());
    bytes.extend_from_slice(b"hdlr");
    bytes.extend_from_slice(&0u32.to_be_bytes()); // version/flags
    bytes.extend_from_slice(&0u32.to_be_bytes()); // predefined
    bytes.extend_from_slice(HANDLER_MDIR);
    bytes.extend_from_slice(HANDLER_MANUFACTURER_APPL);
    bytes.extend_from_slice(&[0u8; 12]); // reserved
    bytes.push(0); // empty name, single NUL
    bytes
}

/// Precomputed serialization of a complete tag.
///
/// [`Mp4TagMaker::required_size`] reports the size of the `meta` payload
/// (version/flags + `hdlr` + `ilst`), excluding the enclosing atom header;
/// [`Mp4TagMaker::write`] emits the full `meta` atom including its header.
#[derive(Debug)]
pub struct Mp4TagMaker {
    field_makers: Vec<Mp4TagFieldMaker>,
    hdlr: Vec<u8>,
    ilst_size: u64,
    meta_payload_size: u64,
}

impl Mp4TagMaker {
    fn new(tag: &Mp4Tag) -> TagResult<Mp4TagMaker> {
        // group fields by identifier slot, preserving first-appearance
        // order, so multi-valued entries serialize as one atom with
        // several data children
        let mut groups: Vec<(u32, &str, &str, Vec<&Mp4TagField>)> = Vec::new();
        for field in tag.fields.fields() {
            let slot = groups.iter_mut().find(|(id, mean, name, _)| {
                *id == *field.id() && *mean == field.mean() && *name == field.name()
            });
            match slot {
                Some((_, _, _, members)) => members.push(field),
                None => groups.push((*field.id(), field.mean(), field.name(), vec![field])),
            }
        }

        // deterministic order: known fields first in enumeration order,
        // unknown identifiers after, insertion order within equal keys
        let rank = |id: u32| -> usize {
            Mp4Tag::known_field(id)
                .map(|field| field.canonical_rank())
                .unwrap_or(usize::MAX)
        };
        groups.sort_by_key(|(id, _, _, _)| rank(*id));

        let mut field_makers = Vec::new();
        let mut ilst_size = 8u64;
        for (_, _, _, members) in &groups {
            if let Some(maker) = Mp4TagFieldMaker::new(members)? {
                ilst_size += maker.required_size();
                field_makers.push(maker);
            }
        }

        let hdlr = render_meta_hdlr();
        let meta_payload_size = 4 + hdlr.len() as u64 + ilst_size;
        Ok(Mp4TagMaker {
            field_makers,
            hdlr,
            ilst_size,
            meta_payload_size,
        })
    }

    /// Bytes of the complete new `meta` payload, excluding the enclosing
    /// atom header.
    pub fn required_size(&self) -> u64 {
        self.meta_payload_size
    }

    /// Total size of the `meta` atom including its header.
    pub fn total_size(&self) -> u64 {
        self.meta_payload_size + 8
    }

    /// Whether any field survived tombstone removal.
    pub fn has_fields(&self) -> bool {
        !self.field_makers.is_empty()
    }

    /// Stream the complete `meta` atom. Emits exactly `total_size()` bytes.
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> TagResult<()> {
        let meta_size = u32::try_from(self.total_size())
            .map_err(|_| TagError::InvalidValue("tag exceeds 4 GiB".to_string()))?;
        write_u32_be(writer, meta_size)?;
        write_u32_be(writer, atom::META)?;
        write_u32_be(writer, 0)?; // version/flags
        writer.write_all(&self.hdlr)?;
        write_u32_be(writer, self.ilst_size as u32)?;
        write_u32_be(writer, fourcc(b"ilst"))?;
        for maker in &self.field_makers {
            maker.write(writer)?;
        }
        Ok(())
    }
}
