//! MP4 tag fields
//!
//! An `ilst` child atom is one tag field: its type code is the field
//! identifier and its `data` sub-atoms hold the values. The extended
//! identifier `----` prepends `mean` and `name` sub-atoms; the effective
//! identifier is the (mean, name) pair. Parsing remembers the raw data
//! type indicator so unknown payloads round-trip byte-identically.

use std::io::{Read, Seek, Write};

use crate::core::error::{TagError, TagResult};
use crate::core::notification::NotificationLog;
use crate::core::tag::TagField;
use crate::files::mp4::atom::Mp4Atom;
use crate::files::mp4::ids::{data_type, fourcc_to_string, tag as tag_id};
use crate::types::value::{decode_text, encode_text, PositionInSet, TagValue, TextEncoding};
use crate::utils::io::write_u32_be;

/// One MP4 tag field: identifier, optional extended (mean, name) pair, one
/// value, and the wire details needed for faithful re-serialization.
#[derive(Debug, Clone, Default)]
pub struct Mp4TagField {
    id: u32,
    /// (mean, name) pair for `----` fields.
    extended: Option<(String, String)>,
    value: TagValue,
    /// Type indicator as parsed, kept for pass-through payloads.
    raw_data_type: Option<u32>,
    /// Country/language indicator as parsed; written back verbatim.
    locale: u32,
}

impl Mp4TagField {
    pub fn new(id: u32, value: TagValue) -> Self {
        Self {
            id,
            value,
            ..Default::default()
        }
    }

    /// An extended field addressed by (mean, name).
    pub fn extended(mean: impl Into<String>, name: impl Into<String>, value: TagValue) -> Self {
        Self {
            id: tag_id::EXTENDED,
            extended: Some((mean.into(), name.into())),
            value,
            ..Default::default()
        }
    }

    pub fn mean(&self) -> &str {
        self.extended.as_ref().map(|(mean, _)| mean.as_str()).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.extended.as_ref().map(|(_, name)| name.as_str()).unwrap_or("")
    }

    pub fn is_extended(&self) -> bool {
        self.id == tag_id::EXTENDED
    }

    pub fn locale(&self) -> u32 {
        self.locale
    }

    pub fn raw_data_type(&self) -> Option<u32> {
        self.raw_data_type
    }

    /// Parse one `ilst` child atom. Each `data` sub-atom becomes one field,
    /// so a multi-valued entry yields several fields with the same
    /// identifier.
    pub fn parse_from_atom<R: Read + Seek>(
        field_atom: &Mp4Atom,
        reader: &mut R,
        log: &mut NotificationLog,
    ) -> TagResult<Vec<Mp4TagField>> {
        let id = field_atom.id();
        let mut mean = String::new();
        let mut name = String::new();
        let mut fields = Vec::new();

        let end = field_atom.end_offset();
        let mut pos = field_atom.data_offset();
        while pos + 8 <= end {
            let child = match Mp4Atom::parse_header(reader, pos, end) {
                Ok(child) => child,
                Err(error) => {
                    log.warning(error.to_string(), format!("parsing atom at 0x{:X}", pos));
                    break;
                }
            };
            match child.id() {
                tag_id::MEAN => {
                    let data = child.read_data(reader)?;
                    mean = decode_text(TextEncoding::Utf8, data.get(4..).unwrap_or(&[])).into_owned();
                }
                tag_id::NAME => {
                    let data = child.read_data(reader)?;
                    name = decode_text(TextEncoding::Utf8, data.get(4..).unwrap_or(&[])).into_owned();
                }
                tag_id::DATA => {
                    let data = child.read_data(reader)?;
                    if data.len() < 8 {
                        log.warning(
                            format!(
                                "data atom of field {} is too small to hold its header",
                                fourcc_to_string(id)
                            ),
                            format!("parsing atom at 0x{:X}", child.start_offset()),
                        );
                    } else {
                        let type_indicator =
                            u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                        let locale = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                        let value = decode_value(id, type_indicator, &data[8..]);
                        let extended = (id == tag_id::EXTENDED)
                            .then(|| (mean.clone(), name.clone()));
                        fields.push(Mp4TagField {
                            id,
                            extended,
                            value,
                            raw_data_type: Some(type_indicator),
                            locale,
                        });
                    }
                }
                other => {
                    log.information(
                        format!(
                            "atom {} within field {} has been ignored",
                            fourcc_to_string(other),
                            fourcc_to_string(id)
                        ),
                        format!("parsing atom at 0x{:X}", child.start_offset()),
                    );
                }
            }
            if child.end_offset() <= pos {
                break;
            }
            pos = child.end_offset();
        }

        // an extended entry without data atoms still identifies a slot
        if fields.is_empty() && id == tag_id::EXTENDED && (!mean.is_empty() || !name.is_empty()) {
            fields.push(Mp4TagField {
                id,
                extended: Some((mean, name)),
                value: TagValue::Empty,
                raw_data_type: None,
                locale: 0,
            });
        }
        Ok(fields)
    }

    /// Render the wire form of this field's value: (type indicator, locale,
    /// payload). `None` for empty values (tombstones are dropped).
    pub fn render_data(&self) -> TagResult<Option<(u32, u32, Vec<u8>)>> {
        let rendered = match &self.value {
            TagValue::Empty => return Ok(None),
            TagValue::Text { encoding, data } => match encoding {
                TextEncoding::Utf8 => (data_type::UTF8, data.clone()),
                TextEncoding::Latin1 => (
                    data_type::UTF8,
                    encode_text(TextEncoding::Utf8, &decode_text(TextEncoding::Latin1, data))?,
                ),
                TextEncoding::Utf16Be => (data_type::UTF16, data.clone()),
                TextEncoding::Utf16Le => (
                    data_type::UTF16,
                    encode_text(
                        TextEncoding::Utf16Be,
                        &decode_text(TextEncoding::Utf16Le, data),
                    )?,
                ),
            },
            TagValue::Integer(value) => (data_type::BE_SIGNED_INT, render_integer(*value)),
            TagValue::Position(position) => (
                data_type::BINARY,
                render_position(self.id, position),
            ),
            TagValue::Binary { mime, data } => {
                let indicator = match mime.as_str() {
                    "image/jpeg" => data_type::JPEG,
                    "image/png" => data_type::PNG,
                    _ => self.raw_data_type.unwrap_or(data_type::BINARY),
                };
                (indicator, data.clone())
            }
            TagValue::DateTime(instant) => (data_type::UTF8, instant.as_bytes().to_vec()),
            TagValue::StandardGenreIndex(index) => {
                // gnre stores the table index shifted by one
                (data_type::BINARY, (index + 1).to_be_bytes().to_vec())
            }
        };
        Ok(Some((rendered.0, self.locale, rendered.1)))
    }
}

impl TagField for Mp4TagField {
    type Id = u32;
    type TypeInfo = (String, String);

    fn with_value(id: u32, value: TagValue) -> Self {
        Mp4TagField::new(id, value)
    }

    fn id(&self) -> &u32 {
        &self.id
    }

    fn value(&self) -> &TagValue {
        &self.value
    }

    fn value_mut(&mut self) -> &mut TagValue {
        &mut self.value
    }

    fn set_value(&mut self, value: TagValue) {
        self.value = value;
    }

    fn type_info(&self) -> Option<&(String, String)> {
        self.extended.as_ref()
    }
}

fn decode_value(field_id: u32, type_indicator: u32, payload: &[u8]) -> TagValue {
    match type_indicator {
        data_type::UTF8 => TagValue::Text {
            encoding: TextEncoding::Utf8,
            data: payload.to_vec(),
        },
        data_type::UTF16 => TagValue::Text {
            encoding: TextEncoding::Utf16Be,
            data: payload.to_vec(),
        },
        data_type::JPEG => TagValue::binary("image/jpeg", payload.to_vec()),
        data_type::PNG => TagValue::binary("image/png", payload.to_vec()),
        data_type::BE_SIGNED_INT => decode_integer(payload),
        data_type::BINARY => decode_untyped(field_id, payload),
        _ => TagValue::binary("application/octet-stream", payload.to_vec()),
    }
}

/// Type indicator 0 carries structured payloads for a few well-known ids.
fn decode_untyped(field_id: u32, payload: &[u8]) -> TagValue {
    match field_id {
        tag_id::TRACK_POSITION | tag_id::DISK_POSITION if payload.len() >= 6 => {
            let position = i32::from(i16::from_be_bytes([payload[2], payload[3]]));
            let total = i32::from(i16::from_be_bytes([payload[4], payload[5]]));
            TagValue::Position(PositionInSet::new(position, total))
        }
        tag_id::PRE_DEFINED_GENRE if payload.len() == 2 => {
            let raw = u16::from_be_bytes([payload[0], payload[1]]);
            if raw > 0 {
                TagValue::StandardGenreIndex(raw - 1)
            } else {
                TagValue::Empty
            }
        }
        _ => TagValue::binary("application/octet-stream", payload.to_vec()),
    }
}

fn decode_integer(payload: &[u8]) -> TagValue {
    let value = match payload.len() {
        1 => i64::from(payload[0] as i8),
        2 => i64::from(i16::from_be_bytes([payload[0], payload[1]])),
        4 => i64::from(i32::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3],
        ])),
        8 => i64::from_be_bytes([
            payload[0], payload[1], payload[2], payload[3], payload[4], payload[5], payload[6],
            payload[7],
        ]),
        _ => return TagValue::binary("application/octet-stream", payload.to_vec()),
    };
    TagValue::Integer(value)
}

fn render_integer(value: i64) -> Vec<u8> {
    if let Ok(v) = i8::try_from(value) {
        v.to_be_bytes().to_vec()
    } else if let Ok(v) = i16::try_from(value) {
        v.to_be_bytes().to_vec()
    } else if let Ok(v) = i32::try_from(value) {
        v.to_be_bytes().to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

fn render_position(field_id: u32, position: &PositionInSet) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&[0, 0]);
    payload.extend_from_slice(&(position.position as i16).to_be_bytes());
    payload.extend_from_slice(&(position.total as i16).to_be_bytes());
    // iTunes pads trkn to eight bytes but leaves disk at six
    if field_id == tag_id::TRACK_POSITION {
        payload.extend_from_slice(&[0, 0]);
    }
    payload
}

/// Precomputed serialization of one `ilst` entry: a field identifier (with
/// optional mean/name) and its rendered data atoms. Sizes are final at
/// construction so writing never recomputes.
#[derive(Debug)]
pub struct Mp4TagFieldMaker {
    id: u32,
    mean: Option<Vec<u8>>,
    name: Option<Vec<u8>>,
    data: Vec<(u32, u32, Vec<u8>)>,
    total_size: u64,
}

impl Mp4TagFieldMaker {
    /// Build the maker for a run of fields sharing one identifier slot.
    /// Returns `None` when every value is empty.
    pub fn new(fields: &[&Mp4TagField]) -> TagResult<Option<Mp4TagFieldMaker>> {
        let first = match fields.first() {
            Some(first) => first,
            None => return Ok(None),
        };
        let mut data = Vec::new();
        for field in fields {
            if let Some(rendered) = field.render_data()? {
                data.push(rendered);
            }
        }
        if data.is_empty() {
            return Ok(None);
        }

        let (mean, name) = if first.is_extended() {
            (
                Some(render_string_atom(tag_id::MEAN, first.mean())),
                Some(render_string_atom(tag_id::NAME, first.name())),
            )
        } else {
            (None, None)
        };

        let mut total_size = 8u64;
        if let Some(mean) = &mean {
            total_size += mean.len() as u64;
        }
        if let Some(name) = &name {
            total_size += name.len() as u64;
        }
        for (_, _, payload) in &data {
            total_size += 16 + payload.len() as u64;
        }

        Ok(Some(Mp4TagFieldMaker {
            id: first.id,
            mean,
            name,
            data,
            total_size,
        }))
    }

    /// Size of the complete `ilst` entry in bytes.
    pub fn required_size(&self) -> u64 {
        self.total_size
    }

    /// Stream the entry. Must produce exactly `required_size()` bytes.
    pub fn write<W: Write + Seek>(&self, writer: &mut W) -> TagResult<()> {
        let size = u32::try_from(self.total_size)
            .map_err(|_| TagError::InvalidValue("tag field exceeds 4 GiB".to_string()))?;
        write_u32_be(writer, size)?;
        write_u32_be(writer, self.id)?;
        if let Some(mean) = &self.mean {
            writer.write_all(mean)?;
        }
        if let Some(name) = &self.name {
            writer.write_all(name)?;
        }
        for (type_indicator, locale, payload) in &self.data {
            write_u32_be(writer, 16 + payload.len() as u32)?;
            write_u32_be(writer, tag_id::DATA)?;
            write_u32_be(writer, *type_indicator)?;
            write_u32_be(writer, *locale)?;
            writer.write_all(payload)?;
        }
        Ok(())
    }
}

fn render_string_atom(id: u32, text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(12 + text.len());
    bytes.extend_from_slice(&(12 + text.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&id.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(text.as_bytes());
    bytes
}
