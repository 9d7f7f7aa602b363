//! Synthetic MP4 fixtures
//!
//! Builds small but structurally complete files in memory: `ftyp`, a
//! `moov` with one audio track whose sample table addresses real `mdat`
//! payload, optional tag and padding atoms, and an optional `moof` to
//! exercise the fragmented-file paths. Chunk offsets are patched after
//! assembly so they always point at the actual media bytes.

#![allow(dead_code)]

/// Seconds between the 1904 epoch and 2012-06-01T00:00:00Z.
pub const CREATION_2012: u64 = 1_338_508_800 + 2_082_844_800;

pub fn leaf(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + payload.len());
    bytes.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(id);
    bytes.extend_from_slice(payload);
    bytes
}

pub fn container(id: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let inner: usize = children.iter().map(Vec::len).sum();
    let mut bytes = Vec::with_capacity(8 + inner);
    bytes.extend_from_slice(&(8 + inner as u32).to_be_bytes());
    bytes.extend_from_slice(id);
    for child in children {
        bytes.extend_from_slice(child);
    }
    bytes
}

pub fn free(total_size: u64) -> Vec<u8> {
    assert!(total_size >= 8);
    leaf(b"free", &vec![0u8; total_size as usize - 8])
}

/// A `data` sub-atom of an `ilst` entry.
pub fn data_atom(type_indicator: u32, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + payload.len());
    bytes.extend_from_slice(&(16 + payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&type_indicator.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

pub fn text_entry(id: &[u8; 4], text: &str) -> Vec<u8> {
    container(id, &[data_atom(1, text.as_bytes())])
}

/// `gnre` entry holding a 1-based ID3v1 genre index.
pub fn genre_entry(table_index: u16) -> Vec<u8> {
    container(b"gnre", &[data_atom(0, &(table_index + 1).to_be_bytes())])
}

pub fn position_entry(id: &[u8; 4], position: i16, total: i16) -> Vec<u8> {
    let mut payload = vec![0u8, 0];
    payload.extend_from_slice(&position.to_be_bytes());
    payload.extend_from_slice(&total.to_be_bytes());
    if id == b"trkn" {
        payload.extend_from_slice(&[0, 0]);
    }
    container(id, &[data_atom(0, &payload)])
}

/// JPEG cover with the SOI/APP0 signature followed by filler.
pub fn jpeg_cover_entry(total_payload: usize) -> Vec<u8> {
    let mut payload = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46];
    payload.resize(total_payload, 0x55);
    container(b"covr", &[data_atom(13, &payload)])
}

pub fn extended_entry(mean: &str, name: &str, value: &str) -> Vec<u8> {
    let mut mean_atom = Vec::new();
    mean_atom.extend_from_slice(&(12 + mean.len() as u32).to_be_bytes());
    mean_atom.extend_from_slice(b"mean");
    mean_atom.extend_from_slice(&0u32.to_be_bytes());
    mean_atom.extend_from_slice(mean.as_bytes());
    let mut name_atom = Vec::new();
    name_atom.extend_from_slice(&(12 + name.len() as u32).to_be_bytes());
    name_atom.extend_from_slice(b"name");
    name_atom.extend_from_slice(&0u32.to_be_bytes());
    name_atom.extend_from_slice(name.as_bytes());
    container(b"----", &[mean_atom, name_atom, data_atom(1, value.as_bytes())])
}

fn full_box(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(body);
    leaf(id, &payload)
}

fn mvhd() -> Vec<u8> {
    full_box(b"mvhd", &[0u8; 96])
}

fn tkhd(track_id: u32, creation_time: u64) -> Vec<u8> {
    let mut body = vec![0u8; 80];
    body[0..4].copy_from_slice(&(creation_time as u32).to_be_bytes());
    body[8..12].copy_from_slice(&track_id.to_be_bytes());
    full_box(b"tkhd", &body)
}

fn mdhd(timescale: u32, language: &str) -> Vec<u8> {
    let mut body = vec![0u8; 20];
    body[8..12].copy_from_slice(&timescale.to_be_bytes());
    let lang = language.as_bytes();
    assert_eq!(lang.len(), 3);
    let packed: u16 = (u16::from(lang[0] - 0x60) << 10)
        | (u16::from(lang[1] - 0x60) << 5)
        | u16::from(lang[2] - 0x60);
    body[16..18].copy_from_slice(&packed.to_be_bytes());
    full_box(b"mdhd", &body)
}

fn media_hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut body = vec![0u8; 20];
    body[4..8].copy_from_slice(handler);
    full_box(b"hdlr", &body)
}

fn stsd(format: &[u8; 4]) -> Vec<u8> {
    let entry = leaf(format, &[0u8; 28]);
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&entry);
    leaf(b"stsd", &payload)
}

fn stts() -> Vec<u8> {
    full_box(b"stts", &0u32.to_be_bytes())
}

fn stsc() -> Vec<u8> {
    // a single run: one sample per chunk
    let mut body = Vec::new();
    body.extend_from_slice(&1u32.to_be_bytes());
    body.extend_from_slice(&1u32.to_be_bytes());
    body.extend_from_slice(&1u32.to_be_bytes());
    body.extend_from_slice(&1u32.to_be_bytes());
    full_box(b"stsc", &body)
}

fn stsz(sizes: &[u32]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    for size in sizes {
        body.extend_from_slice(&size.to_be_bytes());
    }
    full_box(b"stsz", &body)
}

fn stco_placeholder(chunk_count: usize) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(chunk_count as u32).to_be_bytes());
    body.extend_from_slice(&vec![0u8; chunk_count * 4]);
    full_box(b"stco", &body)
}

/// `meta` atom: version/flags, metadata `hdlr`, `ilst` with the given
/// entries.
pub fn meta_atom(ilst_entries: &[Vec<u8>]) -> Vec<u8> {
    let mut hdlr_body = vec![0u8; 8]; // version/flags + predefined
    hdlr_body.extend_from_slice(b"mdir");
    hdlr_body.extend_from_slice(b"appl");
    hdlr_body.extend_from_slice(&[0u8; 12]);
    hdlr_body.push(0);
    let hdlr = leaf(b"hdlr", &hdlr_body);
    let ilst = container(b"ilst", ilst_entries);
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&hdlr);
    payload.extend_from_slice(&ilst);
    leaf(b"meta", &payload)
}

/// Deterministic filler bytes for media chunks.
pub fn chunk_data(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| seed.wrapping_mul(31).wrapping_add(index as u8))
        .collect()
}

/// What to build.
pub struct FileSpec {
    pub brand: [u8; 4],
    pub moov_before_mdat: bool,
    /// `free` inside `udta`, directly after `meta`. 0 = none.
    pub udta_padding: u64,
    /// Top-level `free` after `moov`. 0 = none.
    pub top_level_padding: u64,
    /// `ilst` entries; `None` means no `udta`/`meta` at all.
    pub ilst_entries: Option<Vec<Vec<u8>>>,
    pub chunks: Vec<Vec<u8>>,
    pub track_id: u32,
    pub timescale: u32,
    pub language: &'static str,
    pub creation_time: u64,
    /// Append an empty movie fragment, making the file look like DASH.
    pub with_moof: bool,
}

impl Default for FileSpec {
    fn default() -> Self {
        Self {
            brand: *b"M4A ",
            moov_before_mdat: true,
            udta_padding: 0,
            top_level_padding: 0,
            ilst_entries: None,
            chunks: vec![chunk_data(1, 900), chunk_data(2, 1100), chunk_data(3, 700)],
            track_id: 1,
            timescale: 44_100,
            language: "und",
            creation_time: CREATION_2012,
            with_moof: false,
        }
    }
}

/// Assemble the file and patch the chunk offsets to their final values.
pub fn build(spec: &FileSpec) -> Vec<u8> {
    let mut ftyp_payload = Vec::new();
    ftyp_payload.extend_from_slice(&spec.brand);
    ftyp_payload.extend_from_slice(&0u32.to_be_bytes());
    ftyp_payload.extend_from_slice(b"isom");
    let ftyp = leaf(b"ftyp", &ftyp_payload);

    let sizes: Vec<u32> = spec.chunks.iter().map(|chunk| chunk.len() as u32).collect();
    let stbl = container(
        b"stbl",
        &[
            stsd(b"mp4a"),
            stts(),
            stsc(),
            stsz(&sizes),
            stco_placeholder(spec.chunks.len()),
        ],
    );
    let minf = container(b"minf", &[stbl]);
    let mdia = container(
        b"mdia",
        &[
            mdhd(spec.timescale, spec.language),
            media_hdlr(b"soun"),
            minf,
        ],
    );
    let trak = container(b"trak", &[tkhd(spec.track_id, spec.creation_time), mdia]);

    let mut moov_children = vec![mvhd(), trak];
    if let Some(entries) = &spec.ilst_entries {
        let mut udta_children = vec![meta_atom(entries)];
        if spec.udta_padding >= 8 {
            udta_children.push(free(spec.udta_padding));
        }
        moov_children.push(container(b"udta", &udta_children));
    }
    let moov = container(b"moov", &moov_children);

    let mdat_payload: Vec<u8> = spec.chunks.concat();
    let mdat = leaf(b"mdat", &mdat_payload);

    let mut file = Vec::new();
    file.extend_from_slice(&ftyp);
    if spec.moov_before_mdat {
        file.extend_from_slice(&moov);
        if spec.top_level_padding >= 8 {
            file.extend_from_slice(&free(spec.top_level_padding));
        }
        if spec.with_moof {
            file.extend_from_slice(&container(b"moof", &[container(b"traf", &[])]));
        }
        file.extend_from_slice(&mdat);
    } else {
        file.extend_from_slice(&mdat);
        file.extend_from_slice(&moov);
        if spec.top_level_padding >= 8 {
            file.extend_from_slice(&free(spec.top_level_padding));
        }
        if spec.with_moof {
            file.extend_from_slice(&container(b"moof", &[container(b"traf", &[])]));
        }
    }

    patch_chunk_offsets(&mut file, &spec.chunks);
    file
}

/// Point the (single) `stco` table at the real chunk positions inside
/// `mdat`.
fn patch_chunk_offsets(file: &mut [u8], chunks: &[Vec<u8>]) {
    // find_pattern lands just past the fourcc: on the stco version/flags
    // and on the first mdat payload byte respectively
    let stco_at = find_pattern(file, b"stco").expect("fixture always has an stco");
    let mdat_at = find_pattern(file, b"mdat").expect("fixture always has an mdat");
    let mut offset = mdat_at as u32;
    let mut at = stco_at + 8;
    for chunk in chunks {
        file[at..at + 4].copy_from_slice(&offset.to_be_bytes());
        at += 4;
        offset += chunk.len() as u32;
    }
}

fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| at + needle.len())
}

/// The media bytes a reparsed file addresses, chunk by chunk.
pub fn extract_chunks(bytes: &[u8], track: &tagkit::Mp4Track) -> Vec<Vec<u8>> {
    track
        .chunk_ranges()
        .into_iter()
        .map(|(offset, len)| bytes[offset as usize..(offset + len) as usize].to_vec())
        .collect()
}
