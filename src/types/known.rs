//! Semantic field identifiers
//!
//! A [`KnownField`] names a semantic piece of metadata independently of any
//! container-specific identifier scheme. Each tag variant maps known fields
//! to its own identifiers; fields without a mapping in a given variant are
//! simply unsupported there.

/// Semantic metadata fields shared across tag variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum KnownField {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Genre,
    Comment,
    Description,
    Cover,
    Year,
    TrackPosition,
    DiskPosition,
    Encoder,
    EncoderSettings,
    Composer,
    Copyright,
    Grouping,
    Lyrics,
    Bpm,
    RecordLabel,
}

impl KnownField {
    /// All known fields in canonical enumeration order. Serialization sorts
    /// mapped fields by this order before anything unmapped.
    pub const ALL: &'static [KnownField] = &[
        KnownField::Title,
        KnownField::Artist,
        KnownField::Album,
        KnownField::AlbumArtist,
        KnownField::Genre,
        KnownField::Comment,
        KnownField::Description,
        KnownField::Cover,
        KnownField::Year,
        KnownField::TrackPosition,
        KnownField::DiskPosition,
        KnownField::Encoder,
        KnownField::EncoderSettings,
        KnownField::Composer,
        KnownField::Copyright,
        KnownField::Grouping,
        KnownField::Lyrics,
        KnownField::Bpm,
        KnownField::RecordLabel,
    ];

    /// Position in the canonical enumeration.
    pub fn canonical_rank(self) -> usize {
        Self::ALL
            .iter()
            .position(|&field| field == self)
            .unwrap_or(Self::ALL.len())
    }
}

/// The value discriminator a codec expects for a given field. Used to
/// validate user input before serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagDataType {
    #[default]
    Undefined,
    Text,
    Integer,
    PositionInSet,
    Binary,
    DateTime,
    /// Either free-form text or an ID3v1 genre table index.
    StandardGenreIndex,
}

/// The data type proposed for a known field, independent of tag variant.
pub fn proposed_data_type(field: KnownField) -> TagDataType {
    match field {
        KnownField::Genre => TagDataType::StandardGenreIndex,
        KnownField::TrackPosition | KnownField::DiskPosition => TagDataType::PositionInSet,
        KnownField::Cover => TagDataType::Binary,
        KnownField::Bpm => TagDataType::Integer,
        _ => TagDataType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_rank_matches_enumeration() {
        assert_eq!(KnownField::Title.canonical_rank(), 0);
        assert!(KnownField::Title.canonical_rank() < KnownField::Genre.canonical_rank());
        assert!(KnownField::Genre.canonical_rank() < KnownField::Bpm.canonical_rank());
    }

    #[test]
    fn test_proposed_types() {
        assert_eq!(
            proposed_data_type(KnownField::TrackPosition),
            TagDataType::PositionInSet
        );
        assert_eq!(proposed_data_type(KnownField::Cover), TagDataType::Binary);
        assert_eq!(
            proposed_data_type(KnownField::Genre),
            TagDataType::StandardGenreIndex
        );
    }
}
