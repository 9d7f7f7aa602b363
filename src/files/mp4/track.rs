//! Track information
//!
//! Only what tag placement needs: identity and timing from `tkhd`/`mdhd`,
//! the media handler, the sample-description format fourcc, and the sample
//! table entries required to relocate media data (`stco`/`co64`) and to
//! verify it afterwards (`stsc`/`stsz`). Codec payloads are never
//! interpreted.

use std::io::{Read, Seek};

use crate::core::error::TagResult;
use crate::core::notification::NotificationLog;
use crate::files::mp4::atom::Mp4Atom;
use crate::files::mp4::ids::atom;

/// Seconds between 1904-01-01 (the ISO-BMFF epoch) and 1970-01-01.
const MAC_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Media handler classification from `hdlr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Hint,
    Text,
    Meta,
    Unknown(u32),
}

impl MediaType {
    fn from_handler(handler: u32) -> Self {
        match &handler.to_be_bytes() {
            b"soun" => MediaType::Audio,
            b"vide" => MediaType::Video,
            b"hint" => MediaType::Hint,
            b"text" | b"sbtl" => MediaType::Text,
            b"meta" => MediaType::Meta,
            _ => MediaType::Unknown(handler),
        }
    }
}

/// Which flavor of chunk-offset table a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetTableKind {
    Stco,
    Co64,
}

/// A parsed `stco` or `co64` table together with its location, so the
/// rewrite planner can find the bytes it needs to patch.
#[derive(Debug, Clone, Default)]
pub struct ChunkOffsetTable {
    pub kind: Option<OffsetTableKind>,
    /// Absolute file offset of the table atom.
    pub atom_start: u64,
    pub atom_size: u64,
    pub offsets: Vec<u64>,
}

/// Per-track data relevant to tag placement.
#[derive(Debug, Clone)]
pub struct Mp4Track {
    id: u32,
    media_type: MediaType,
    /// Fourcc of the first sample description entry, e.g. `mp4a`, `avc1`.
    format: u32,
    timescale: u32,
    duration: u64,
    /// ISO 639-2/T code unpacked from `mdhd`.
    language: String,
    /// Seconds since the 1904 epoch.
    creation_time: u64,
    uniform_sample_size: u32,
    sample_sizes: Vec<u32>,
    /// (first_chunk, samples_per_chunk, description_index) runs.
    sample_to_chunk: Vec<(u32, u32, u32)>,
    chunk_offsets: ChunkOffsetTable,
}

impl Mp4Track {
    /// Parse a `trak` atom whose subtree has been discovered.
    pub fn parse<R: Read + Seek>(
        trak: &Mp4Atom,
        reader: &mut R,
        log: &mut NotificationLog,
    ) -> TagResult<Mp4Track> {
        let mut track = Mp4Track {
            id: 0,
            media_type: MediaType::Unknown(0),
            format: 0,
            timescale: 1,
            duration: 0,
            language: String::new(),
            creation_time: 0,
            uniform_sample_size: 0,
            sample_sizes: Vec::new(),
            sample_to_chunk: Vec::new(),
            chunk_offsets: ChunkOffsetTable::default(),
        };

        if let Some(tkhd) = trak.child_by_id(atom::TKHD) {
            track.parse_tkhd(&tkhd.read_data(reader)?);
        } else {
            log.warning(
                "track lacks a tkhd atom",
                format!("parsing atom at 0x{:X}", trak.start_offset()),
            );
        }

        if let Some(mdia) = trak.child_by_id(atom::MDIA) {
            if let Some(mdhd) = mdia.child_by_id(atom::MDHD) {
                track.parse_mdhd(&mdhd.read_data(reader)?);
            }
            if let Some(hdlr) = mdia.child_by_id(atom::HDLR) {
                let data = hdlr.read_data(reader)?;
                if data.len() >= 12 {
                    track.media_type = MediaType::from_handler(u32::from_be_bytes([
                        data[8], data[9], data[10], data[11],
                    ]));
                }
            }
            if let Some(stbl) = mdia.child_by_path(&[atom::MINF, atom::STBL]) {
                track.parse_stbl(stbl, reader, log)?;
            }
        }

        Ok(track)
    }

    fn parse_tkhd(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if data[0] == 0 {
            if data.len() >= 16 {
                self.creation_time =
                    u64::from(u32::from_be_bytes([data[4], data[5], data[6], data[7]]));
                self.id = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
            }
        } else if data.len() >= 24 {
            self.creation_time = u64::from_be_bytes([
                data[4], data[5], data[6], data[7], data[8], data[9], data[10], data[11],
            ]);
            self.id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        }
    }

    fn parse_mdhd(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let language_raw;
        if data[0] == 0 {
            if data.len() < 22 {
                return;
            }
            self.timescale = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
            self.duration = u64::from(u32::from_be_bytes([data[16], data[17], data[18], data[19]]));
            language_raw = u16::from_be_bytes([data[20], data[21]]);
        } else {
            if data.len() < 34 {
                return;
            }
            self.timescale = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            self.duration = u64::from_be_bytes([
                data[24], data[25], data[26], data[27], data[28], data[29], data[30], data[31],
            ]);
            language_raw = u16::from_be_bytes([data[32], data[33]]);
        }
        // three 5-bit letters, each offset by 0x60
        if language_raw != 0 {
            self.language = (0..3)
                .rev()
                .map(|shift| {
                    let letter = ((language_raw >> (shift * 5)) & 0x1F) as u8;
                    (letter + 0x60) as char
                })
                .collect();
        }
    }

    fn parse_stbl<R: Read + Seek>(
        &mut self,
        stbl: &Mp4Atom,
        reader: &mut R,
        log: &mut NotificationLog,
    ) -> TagResult<()> {
        if let Some(stsd) = stbl.child_by_id(atom::STSD) {
            if let Some(entry) = stsd.first_child() {
                self.format = entry.id();
            }
        }
        if let Some(stsz) = stbl.child_by_id(atom::STSZ) {
            self.parse_stsz(&stsz.read_data(reader)?);
        }
        if let Some(stsc) = stbl.child_by_id(atom::STSC) {
            self.parse_stsc(&stsc.read_data(reader)?);
        }
        if let Some(stco) = stbl.child_by_id(atom::STCO) {
            self.parse_offsets(stco, &stco.read_data(reader)?, OffsetTableKind::Stco);
        } else if let Some(co64) = stbl.child_by_id(atom::CO64) {
            self.parse_offsets(co64, &co64.read_data(reader)?, OffsetTableKind::Co64);
        } else {
            log.warning(
                "sample table lacks a chunk offset atom",
                format!("parsing atom at 0x{:X}", stbl.start_offset()),
            );
        }
        Ok(())
    }

    fn parse_stsz(&mut self, data: &[u8]) {
        if data.len() < 12 {
            return;
        }
        self.uniform_sample_size = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;
        if self.uniform_sample_size == 0 {
            self.sample_sizes = (0..count)
                .map_while(|index| {
                    let at = 12 + index * 4;
                    data.get(at..at + 4)
                        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                })
                .collect();
        }
    }

    fn parse_stsc(&mut self, data: &[u8]) {
        if data.len() < 8 {
            return;
        }
        let count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        self.sample_to_chunk = (0..count)
            .map_while(|index| {
                let at = 8 + index * 12;
                let entry = data.get(at..at + 12)?;
                Some((
                    u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]),
                    u32::from_be_bytes([entry[4], entry[5], entry[6], entry[7]]),
                    u32::from_be_bytes([entry[8], entry[9], entry[10], entry[11]]),
                ))
            })
            .collect();
    }

    fn parse_offsets(&mut self, table_atom: &Mp4Atom, data: &[u8], kind: OffsetTableKind) {
        if data.len() < 8 {
            return;
        }
        let count = u32::from_be_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let width = match kind {
            OffsetTableKind::Stco => 4,
            OffsetTableKind::Co64 => 8,
        };
        let offsets = (0..count)
            .map_while(|index| {
                let at = 8 + index * width;
                let entry = data.get(at..at + width)?;
                Some(match kind {
                    OffsetTableKind::Stco => {
                        u64::from(u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]))
                    }
                    OffsetTableKind::Co64 => u64::from_be_bytes([
                        entry[0], entry[1], entry[2], entry[3], entry[4], entry[5], entry[6],
                        entry[7],
                    ]),
                })
            })
            .collect();
        self.chunk_offsets = ChunkOffsetTable {
            kind: Some(kind),
            atom_start: table_atom.start_offset(),
            atom_size: table_atom.total_size(),
            offsets,
        };
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Sample description fourcc (e.g. `mp4a`, `avc1`, `ac-3`).
    pub fn format(&self) -> u32 {
        self.format
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Creation time as seconds since the 1904 epoch.
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// Gregorian year of the creation time.
    pub fn creation_year(&self) -> i32 {
        let unix = self.creation_time as i64 - MAC_EPOCH_OFFSET;
        year_of_unix_time(unix)
    }

    pub fn chunk_offsets(&self) -> &ChunkOffsetTable {
        &self.chunk_offsets
    }

    /// Byte size of every chunk, derived from the sample-to-chunk runs and
    /// the sample sizes. Used to verify media preservation after a rewrite.
    pub fn chunk_sizes(&self) -> Vec<u64> {
        let chunk_count = self.chunk_offsets.offsets.len();
        let mut sizes = Vec::with_capacity(chunk_count);
        let mut sample_index = 0usize;
        for chunk_index in 0..chunk_count {
            let samples = self.samples_in_chunk(chunk_index as u32 + 1);
            let mut total = 0u64;
            for _ in 0..samples {
                let size = if self.uniform_sample_size != 0 {
                    self.uniform_sample_size
                } else {
                    self.sample_sizes.get(sample_index).copied().unwrap_or(0)
                };
                total += u64::from(size);
                sample_index += 1;
            }
            sizes.push(total);
        }
        sizes
    }

    /// (offset, size) of every chunk in file order.
    pub fn chunk_ranges(&self) -> Vec<(u64, u64)> {
        self.chunk_offsets
            .offsets
            .iter()
            .copied()
            .zip(self.chunk_sizes())
            .collect()
    }

    fn samples_in_chunk(&self, chunk_number: u32) -> u32 {
        let mut samples = 0;
        for &(first_chunk, samples_per_chunk, _) in &self.sample_to_chunk {
            if first_chunk > chunk_number {
                break;
            }
            samples = samples_per_chunk;
        }
        samples
    }
}

/// Year of a unix timestamp, via days-from-civil in reverse.
fn year_of_unix_time(unix_seconds: i64) -> i32 {
    let days = unix_seconds.div_euclid(86_400);
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let month_index = (5 * doy + 2) / 153;
    (year + i64::from(month_index >= 10)) as i32
}
