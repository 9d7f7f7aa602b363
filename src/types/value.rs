//! Tag value types
//!
//! This module defines the discriminated value type stored in tag fields,
//! together with the text encodings a value's bytes may carry.

use std::borrow::Cow;
use std::fmt;

use crate::core::error::{TagError, TagResult};
use crate::types::genre::genre_name;

/// Character encoding of a text value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    Latin1,
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

/// A position within a set, e.g. track 3 of 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionInSet {
    pub position: i32,
    pub total: i32,
}

impl PositionInSet {
    pub fn new(position: i32, total: i32) -> Self {
        Self { position, total }
    }
}

impl fmt::Display for PositionInSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total > 0 {
            write!(f, "{}/{}", self.position, self.total)
        } else {
            write!(f, "{}", self.position)
        }
    }
}

/// A tag field value.
///
/// `Empty` is the absence of a value and is distinct from zero-length text.
/// Text values carry their encoding so round-trips stay lossless; all
/// conversions are explicit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TagValue {
    #[default]
    Empty,
    Text {
        encoding: TextEncoding,
        data: Vec<u8>,
    },
    Integer(i64),
    Position(PositionInSet),
    Binary {
        mime: String,
        data: Vec<u8>,
    },
    /// ISO 8601 instant, e.g. "2012-06-01T00:00:00Z".
    DateTime(String),
    /// Index into the ID3v1 genre table (0 = Blues). The MP4 `gnre` atom
    /// stores this off by one on the wire; the codec handles the shift.
    StandardGenreIndex(u16),
}

static EMPTY_VALUE: TagValue = TagValue::Empty;

impl TagValue {
    /// The shared empty sentinel.
    pub fn empty() -> &'static TagValue {
        &EMPTY_VALUE
    }

    /// Construct a UTF-8 text value.
    pub fn text(s: impl AsRef<str>) -> Self {
        TagValue::Text {
            encoding: TextEncoding::Utf8,
            data: s.as_ref().as_bytes().to_vec(),
        }
    }

    /// Construct a binary value with the given MIME type.
    pub fn binary(mime: impl Into<String>, data: Vec<u8>) -> Self {
        TagValue::Binary {
            mime: mime.into(),
            data,
        }
    }

    pub fn position(position: i32, total: i32) -> Self {
        TagValue::Position(PositionInSet::new(position, total))
    }

    /// Returns whether this is the empty sentinel. A zero-length text value
    /// is not empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, TagValue::Empty)
    }

    /// Decode a text value to a string. Non-text values are formatted via
    /// their natural representation; `Empty` yields an empty string.
    pub fn to_display_string(&self) -> String {
        match self {
            TagValue::Empty => String::new(),
            TagValue::Text { encoding, data } => decode_text(*encoding, data).into_owned(),
            TagValue::Integer(i) => i.to_string(),
            TagValue::Position(p) => p.to_string(),
            TagValue::Binary { mime, data } => format!("[{} bytes of {}]", data.len(), mime),
            TagValue::DateTime(s) => s.clone(),
            TagValue::StandardGenreIndex(idx) => genre_name(*idx).unwrap_or("").to_string(),
        }
    }

    /// Interpret the value as an integer. Text is parsed; anything without a
    /// lossless interpretation fails with `InvalidValue`.
    pub fn to_integer(&self) -> TagResult<i64> {
        match self {
            TagValue::Integer(i) => Ok(*i),
            TagValue::StandardGenreIndex(idx) => Ok(i64::from(*idx)),
            TagValue::Text { encoding, data } => decode_text(*encoding, data)
                .trim()
                .parse::<i64>()
                .map_err(|_| TagError::InvalidValue("text is not an integer".to_string())),
            _ => Err(TagError::InvalidValue(
                "value has no integer representation".to_string(),
            )),
        }
    }

    /// Interpret the value as a position in a set. Text of the form
    /// "pos" or "pos/total" is parsed.
    pub fn to_position(&self) -> TagResult<PositionInSet> {
        match self {
            TagValue::Position(p) => Ok(*p),
            TagValue::Integer(i) => Ok(PositionInSet::new(*i as i32, 0)),
            TagValue::Text { encoding, data } => {
                let text = decode_text(*encoding, data);
                let mut parts = text.trim().splitn(2, '/');
                let position = parts
                    .next()
                    .unwrap_or("")
                    .parse::<i32>()
                    .map_err(|_| TagError::InvalidValue("text is not a position".to_string()))?;
                let total = match parts.next() {
                    Some(t) => t
                        .parse::<i32>()
                        .map_err(|_| TagError::InvalidValue("text is not a position".to_string()))?,
                    None => 0,
                };
                Ok(PositionInSet::new(position, total))
            }
            _ => Err(TagError::InvalidValue(
                "value has no position representation".to_string(),
            )),
        }
    }

    /// The encoding of a text value, if this is one.
    pub fn text_encoding(&self) -> Option<TextEncoding> {
        match self {
            TagValue::Text { encoding, .. } => Some(*encoding),
            _ => None,
        }
    }

    /// Raw data size in bytes, for text and binary values.
    pub fn data_size(&self) -> usize {
        match self {
            TagValue::Text { data, .. } | TagValue::Binary { data, .. } => data.len(),
            _ => 0,
        }
    }

    /// Re-encode a text value in place. Values that are not text are left
    /// untouched. Fails with `InvalidValue` when the conversion would lose
    /// characters (Latin-1 cannot express the full range).
    pub fn convert_encoding(&mut self, target: TextEncoding) -> TagResult<()> {
        if let TagValue::Text { encoding, data } = self {
            if *encoding == target {
                return Ok(());
            }
            let decoded = decode_text(*encoding, data).into_owned();
            *data = encode_text(target, &decoded)?;
            *encoding = target;
        }
        Ok(())
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::text(s)
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text {
            encoding: TextEncoding::Utf8,
            data: s.into_bytes(),
        }
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Integer(i)
    }
}

impl From<PositionInSet> for TagValue {
    fn from(p: PositionInSet) -> Self {
        TagValue::Position(p)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Decode bytes in the given encoding to UTF-8 text. Invalid sequences are
/// replaced rather than failing: parsing keeps going on damaged files.
pub fn decode_text(encoding: TextEncoding, data: &[u8]) -> Cow<'_, str> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8_lossy(data),
        TextEncoding::Latin1 => {
            if data.is_ascii() {
                // Latin-1 and UTF-8 agree on ASCII
                String::from_utf8_lossy(data)
            } else {
                Cow::Owned(data.iter().map(|&b| b as char).collect())
            }
        }
        TextEncoding::Utf16Le => Cow::Owned(decode_utf16(data, u16::from_le_bytes)),
        TextEncoding::Utf16Be => Cow::Owned(decode_utf16(data, u16::from_be_bytes)),
    }
}

fn decode_utf16(data: &[u8], to_u16: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| to_u16([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Encode UTF-8 text into the given encoding.
pub fn encode_text(encoding: TextEncoding, text: &str) -> TagResult<Vec<u8>> {
    match encoding {
        TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| {
                let code = c as u32;
                if code <= 0xFF {
                    Ok(code as u8)
                } else {
                    Err(TagError::InvalidValue(format!(
                        "'{}' is not representable in Latin-1",
                        c
                    )))
                }
            })
            .collect(),
        TextEncoding::Utf16Le => Ok(text
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect()),
        TextEncoding::Utf16Be => Ok(text
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect()),
    }
}
