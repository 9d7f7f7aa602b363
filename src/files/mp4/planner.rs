//! Rewrite planning
//!
//! Given a parsed file and a prepared tag, the planner computes a byte-exact
//! output layout. When the new tag fits into the existing `meta` plus the
//! adjacent `free` slack, the file is patched in place and `mdat` never
//! moves. Otherwise a full rewrite reorders the top-level atoms, rebuilds
//! `moov` with the new tag, adjusts every chunk offset, and inserts fresh
//! padding.

use std::io::{Cursor, Read, Seek, Write};
use std::path::PathBuf;

use crate::core::error::{TagError, TagResult};
use crate::core::notification::NotificationLog;
use crate::files::mp4::atom::Mp4Atom;
use crate::files::mp4::ids::atom;
use crate::files::mp4::tag::Mp4TagMaker;
use crate::utils::io::copy_range;

/// Message emitted when a DASH file forces the index to the front.
pub const DASH_COERCION_MESSAGE: &str =
    "Sorry, but putting index/tags at the end is not possible when dealing with DASH files.";

/// Desired location of an element relative to the media data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementPosition {
    #[default]
    Keep,
    BeforeData,
    AfterData,
}

/// Configuration surface of the rewrite planner.
///
/// Built with the usual chaining setters:
///
/// ```
/// use tagkit::files::mp4::planner::{ElementPosition, RewriteConfig};
///
/// let config = RewriteConfig::default()
///     .tag_position(ElementPosition::BeforeData)
///     .padding(4096, 1024, 4096 + 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    pub tag_position: ElementPosition,
    pub index_position: ElementPosition,
    pub force_tag_position: bool,
    pub force_index_position: bool,
    pub force_rewrite: bool,
    pub preferred_padding: u64,
    pub min_padding: u64,
    pub max_padding: u64,
    /// Where backups are created; the original's directory when unset.
    pub backup_directory: Option<PathBuf>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            tag_position: ElementPosition::Keep,
            index_position: ElementPosition::Keep,
            force_tag_position: false,
            force_index_position: false,
            force_rewrite: false,
            preferred_padding: 0,
            min_padding: 0,
            max_padding: u64::MAX,
            backup_directory: None,
        }
    }
}

impl RewriteConfig {
    pub fn tag_position(mut self, position: ElementPosition) -> Self {
        self.tag_position = position;
        self.index_position = position;
        self
    }

    pub fn index_position(mut self, position: ElementPosition) -> Self {
        self.index_position = position;
        self
    }

    pub fn force_tag_position(mut self, force: bool) -> Self {
        self.force_tag_position = force;
        self.force_index_position = force;
        self
    }

    pub fn force_rewrite(mut self, force: bool) -> Self {
        self.force_rewrite = force;
        self
    }

    pub fn padding(mut self, preferred: u64, min: u64, max: u64) -> Self {
        self.preferred_padding = preferred;
        self.min_padding = min;
        self.max_padding = max;
        self
    }

    pub fn backup_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_directory = Some(dir.into());
        self
    }

    /// Reject contradictory settings before any I/O happens.
    pub fn validate(&self) -> TagResult<()> {
        if self.min_padding > self.max_padding {
            return Err(TagError::InvalidConfig(format!(
                "min padding {} exceeds max padding {}",
                self.min_padding, self.max_padding
            )));
        }
        Ok(())
    }
}

/// One piece of the planned output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Copy `[start, start + len)` from the source file.
    CopyFromSource { start: u64, len: u64 },
    /// Emit these bytes verbatim.
    Literal(Vec<u8>),
    /// Emit `len` zero bytes.
    ZeroFill { len: u64 },
}

impl Segment {
    pub fn len(&self) -> u64 {
        match self {
            Segment::CopyFromSource { len, .. } => *len,
            Segment::Literal(bytes) => bytes.len() as u64,
            Segment::ZeroFill { len } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The planner's verdict.
#[derive(Debug)]
pub enum RewritePlan {
    /// Overwrite a bounded region; `mdat` does not move. Patches are
    /// (absolute offset, bytes) in write order, arranged so the file stays
    /// valid after each individual write.
    InPlace {
        patches: Vec<(u64, Vec<u8>)>,
        padding: u64,
    },
    /// Stream a completely new layout through the backup helper.
    FullRewrite {
        segments: Vec<Segment>,
        total_len: u64,
        padding: u64,
    },
}

impl RewritePlan {
    pub fn is_in_place(&self) -> bool {
        matches!(self, RewritePlan::InPlace { .. })
    }

    pub fn padding(&self) -> u64 {
        match self {
            RewritePlan::InPlace { padding, .. } => *padding,
            RewritePlan::FullRewrite { padding, .. } => *padding,
        }
    }

    /// Check the plan invariants: segment lengths add up and no two
    /// source copies overlap.
    pub fn validate(&self) -> TagResult<()> {
        if let RewritePlan::FullRewrite {
            segments,
            total_len,
            ..
        } = self
        {
            let sum: u64 = segments.iter().map(Segment::len).sum();
            if sum != *total_len {
                return Err(TagError::InvalidConfig(format!(
                    "plan length mismatch: segments sum to {} but total is {}",
                    sum, total_len
                )));
            }
            let mut copies: Vec<(u64, u64)> = segments
                .iter()
                .filter_map(|segment| match segment {
                    Segment::CopyFromSource { start, len } => Some((*start, *len)),
                    _ => None,
                })
                .collect();
            copies.sort_unstable();
            for window in copies.windows(2) {
                if window[0].0 + window[0].1 > window[1].0 {
                    return Err(TagError::InvalidConfig(format!(
                        "plan copies overlap at 0x{:X}",
                        window[1].0
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Top-level layout facts collected before deciding anything.
struct Layout {
    ftyp: Option<(u64, u64)>,
    /// Everything between the first and the last `mdat`, inclusive, in
    /// original order: (start, len) spans copied verbatim.
    data_group: Vec<(u64, u64)>,
    before_side: Vec<(u64, u64)>,
    after_side: Vec<(u64, u64)>,
    has_moof: bool,
    moov_before_data: bool,
}

fn collect_layout(root: &Mp4Atom) -> TagResult<Layout> {
    let children = root.children();
    let moov = children
        .iter()
        .find(|child| child.id() == atom::MOOV)
        .ok_or_else(|| TagError::InvalidAtom("file has no moov atom".to_string()))?;

    let first_mdat = children.iter().find(|child| child.id() == atom::MDAT);
    let last_mdat = children.iter().rev().find(|child| child.id() == atom::MDAT);
    let (group_start, group_end) = match (first_mdat, last_mdat) {
        (Some(first), Some(last)) => (first.start_offset(), last.end_offset()),
        _ => (u64::MAX, u64::MAX),
    };

    let mut layout = Layout {
        ftyp: None,
        data_group: Vec::new(),
        before_side: Vec::new(),
        after_side: Vec::new(),
        has_moof: children.iter().any(|child| child.id() == atom::MOOF),
        moov_before_data: first_mdat
            .map(|mdat| moov.start_offset() < mdat.start_offset())
            .unwrap_or(true),
    };

    for child in children {
        let span = (child.start_offset(), child.total_size());
        match child.id() {
            atom::FTYP if layout.ftyp.is_none() => layout.ftyp = Some(span),
            atom::MOOV => {}
            // stale padding is dropped; the plan inserts its own
            atom::FREE | atom::SKIP | atom::WIDE
                if !(span.0 >= group_start && span.0 < group_end) => {}
            _ if span.0 >= group_start && span.0 < group_end => layout.data_group.push(span),
            _ if span.0 < group_start => layout.before_side.push(span),
            _ => layout.after_side.push(span),
        }
    }
    Ok(layout)
}

/// Compute the rewrite plan. Pure: nothing is written, the reader is only
/// used to load the original `moov` when a full rewrite is needed.
pub fn plan<R: Read + Seek>(
    root: &Mp4Atom,
    maker: Option<&Mp4TagMaker>,
    config: &RewriteConfig,
    document_type: &str,
    reader: &mut R,
    log: &mut NotificationLog,
) -> TagResult<RewritePlan> {
    config.validate()?;
    let layout = collect_layout(root)?;

    let new_meta_len = match maker {
        Some(maker) if maker.has_fields() => maker.total_size(),
        _ => 0,
    };

    // current meta plus trailing free slack inside udta
    let udta = root.child_by_path(&[atom::MOOV, atom::UDTA]);
    let meta = udta.and_then(|udta| udta.child_by_id(atom::META));
    let current_meta_len = meta.map(Mp4Atom::total_size).unwrap_or(0);
    let free_slack: u64 = udta
        .map(|udta| {
            udta.children()
                .iter()
                .skip_while(|child| child.id() != atom::META)
                .skip(1)
                .take_while(|child| child.id() == atom::FREE || child.id() == atom::SKIP)
                .map(Mp4Atom::total_size)
                .sum()
        })
        .unwrap_or(0);

    let current_position = if layout.moov_before_data {
        ElementPosition::BeforeData
    } else {
        ElementPosition::AfterData
    };
    let desired = resolve_position(config.index_position, config.tag_position);

    // in-place fast path: the region [meta .. meta + M + F) absorbs the new
    // meta and the remainder is expressible padding within bounds
    if !config.force_rewrite {
        let position_satisfied = desired == ElementPosition::Keep
            || desired == current_position
            || !(config.force_tag_position || config.force_index_position);
        // no tag before, no tag now: nothing to write at all
        if position_satisfied && meta.is_none() && new_meta_len == 0 && config.min_padding == 0 {
            return Ok(RewritePlan::InPlace {
                patches: Vec::new(),
                padding: 0,
            });
        }
        let region = current_meta_len + free_slack;
        if position_satisfied && meta.is_some() && new_meta_len <= region {
            let remainder = region - new_meta_len;
            let expressible = remainder == 0 || remainder >= 8;
            if expressible
                && remainder >= config.min_padding
                && remainder <= config.max_padding
            {
                tracing::debug!(
                    padding = remainder,
                    "patching tag in place, mdat does not move"
                );
                return Ok(plan_in_place(
                    meta.map(Mp4Atom::start_offset).unwrap_or(0),
                    region,
                    maker,
                    remainder,
                )?);
            }
        }
    }

    plan_full_rewrite(
        root,
        &layout,
        maker,
        config,
        desired,
        current_position,
        document_type,
        reader,
        log,
    )
}

fn resolve_position(index: ElementPosition, tag: ElementPosition) -> ElementPosition {
    // moov carries both the sample index and the tag, so the index
    // position wins when the two disagree
    match index {
        ElementPosition::Keep => tag,
        other => other,
    }
}

fn plan_in_place(
    meta_start: u64,
    region: u64,
    maker: Option<&Mp4TagMaker>,
    padding: u64,
) -> TagResult<RewritePlan> {
    let mut patches = Vec::new();
    let mut cursor = meta_start;
    if let Some(maker) = maker.filter(|maker| maker.has_fields()) {
        let mut meta_bytes = Cursor::new(Vec::with_capacity(maker.total_size() as usize));
        maker.write(&mut meta_bytes)?;
        let meta_bytes = meta_bytes.into_inner();
        cursor += meta_bytes.len() as u64;
        patches.push((meta_start, meta_bytes));
    }
    if padding > 0 {
        patches.push((cursor, render_free_atom(padding)));
    }
    debug_assert_eq!(cursor + padding, meta_start + region);
    Ok(RewritePlan::InPlace { patches, padding })
}

fn render_free_atom(total_size: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(total_size as usize);
    bytes.extend_from_slice(&(total_size as u32).to_be_bytes());
    bytes.extend_from_slice(b"free");
    bytes.resize(total_size as usize, 0);
    bytes
}

/// Clamp the configured padding into its bounds, rounding up to the
/// smallest expressible `free` atom when needed.
fn clamp_padding(config: &RewriteConfig) -> u64 {
    let mut padding = config
        .preferred_padding
        .clamp(config.min_padding, config.max_padding);
    if padding > 0 && padding < 8 {
        padding = if config.max_padding >= 8 { 8 } else { 0 };
    }
    padding
}

#[allow(clippy::too_many_arguments)]
fn plan_full_rewrite<R: Read + Seek>(
    root: &Mp4Atom,
    layout: &Layout,
    maker: Option<&Mp4TagMaker>,
    config: &RewriteConfig,
    desired: ElementPosition,
    current_position: ElementPosition,
    document_type: &str,
    reader: &mut R,
    log: &mut NotificationLog,
) -> TagResult<RewritePlan> {
    let mut position = match desired {
        ElementPosition::Keep => current_position,
        other => other,
    };

    // fragmented files keep their index up front, whatever was asked for
    let is_dash = document_type == "dash" || layout.has_moof;
    if is_dash && position == ElementPosition::AfterData {
        log.warning(DASH_COERCION_MESSAGE, "planning rewrite");
        position = ElementPosition::BeforeData;
    }

    let padding = clamp_padding(config);
    let mut moov_buf = rebuild_moov(root, maker, reader)?;

    // fixed point: patching offsets may force stco -> co64 promotion,
    // which grows moov and moves mdat again
    let mut iterations = 0;
    loop {
        iterations += 1;
        if iterations > 4 {
            log.critical(
                "chunk offsets failed to converge after table promotion",
                "planning rewrite",
            );
            return Err(TagError::OffsetOverflow);
        }

        let mapping = span_mapping(layout, position, moov_buf.len() as u64, padding);
        let tables = scan_offset_tables(&moov_buf);
        let mut to_promote = Vec::new();
        let mut patched: Vec<(usize, Vec<u64>)> = Vec::new();

        for table in &tables {
            let mut new_offsets = Vec::with_capacity(table.entries.len());
            let mut overflow = false;
            for &old in &table.entries {
                let adjusted = match adjust_offset(old, &mapping) {
                    Some(adjusted) => adjusted,
                    None => {
                        log.warning(
                            format!("chunk offset 0x{:X} points outside any copied atom", old),
                            "planning rewrite",
                        );
                        old
                    }
                };
                if table.kind == BufferTableKind::Stco && adjusted > u64::from(u32::MAX) {
                    overflow = true;
                }
                new_offsets.push(adjusted);
            }
            if overflow {
                to_promote.push(table.atom_offset);
            } else {
                patched.push((table.atom_offset, new_offsets));
            }
        }

        if to_promote.is_empty() {
            apply_offsets(&mut moov_buf, &tables, &patched)?;
            let (segments, total_len) =
                build_segments(layout, position, moov_buf, padding);
            let plan = RewritePlan::FullRewrite {
                segments,
                total_len,
                padding,
            };
            plan.validate()?;
            return Ok(plan);
        }

        tracing::debug!(
            tables = to_promote.len(),
            "promoting 32-bit chunk offset tables to co64"
        );
        moov_buf = promote_tables(&moov_buf, &to_promote);
    }
}

/// Rebuild `moov` with the new tag spliced into `udta`, dropping the old
/// `meta` and any trailing padding. Returns the complete atom bytes.
fn rebuild_moov<R: Read + Seek>(
    root: &Mp4Atom,
    maker: Option<&Mp4TagMaker>,
    reader: &mut R,
) -> TagResult<Vec<u8>> {
    let moov = root
        .child_by_id(atom::MOOV)
        .ok_or_else(|| TagError::InvalidAtom("file has no moov atom".to_string()))?;
    let write_tag = maker.map(|maker| maker.has_fields()).unwrap_or(false);

    let mut payload: Vec<u8> = Vec::with_capacity(moov.total_size() as usize);
    let mut wrote_udta = false;
    for child in moov.children() {
        if child.id() == atom::UDTA {
            wrote_udta = true;
            let udta_payload = rebuild_udta(child, maker, reader)?;
            if !udta_payload.is_empty() {
                payload.extend_from_slice(&(8 + udta_payload.len() as u32).to_be_bytes());
                payload.extend_from_slice(b"udta");
                payload.extend_from_slice(&udta_payload);
            }
        } else if child.id() == atom::META {
            // a meta directly below moov is superseded by the canonical
            // udta/meta placement
        } else {
            copy_range(reader, &mut payload, child.start_offset(), child.total_size())?;
        }
    }
    if !wrote_udta && write_tag {
        let maker = maker.ok_or_else(|| TagError::InvalidAtom("missing tag maker".to_string()))?;
        let mut meta_bytes = Cursor::new(Vec::with_capacity(maker.total_size() as usize));
        maker.write(&mut meta_bytes)?;
        let meta_bytes = meta_bytes.into_inner();
        payload.extend_from_slice(&(8 + meta_bytes.len() as u32).to_be_bytes());
        payload.extend_from_slice(b"udta");
        payload.extend_from_slice(&meta_bytes);
    }

    let mut moov_bytes = Vec::with_capacity(8 + payload.len());
    moov_bytes.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    moov_bytes.extend_from_slice(b"moov");
    moov_bytes.extend_from_slice(&payload);
    Ok(moov_bytes)
}

fn rebuild_udta<R: Read + Seek>(
    udta: &Mp4Atom,
    maker: Option<&Mp4TagMaker>,
    reader: &mut R,
) -> TagResult<Vec<u8>> {
    let mut payload = Vec::new();
    for child in udta.children() {
        match child.id() {
            atom::META | atom::FREE | atom::SKIP => {}
            _ => {
                copy_range(reader, &mut payload, child.start_offset(), child.total_size())?;
            }
        }
    }
    if let Some(maker) = maker.filter(|maker| maker.has_fields()) {
        let mut meta_bytes = Cursor::new(Vec::with_capacity(maker.total_size() as usize));
        maker.write(&mut meta_bytes)?;
        payload.extend_from_slice(&meta_bytes.into_inner());
    }
    Ok(payload)
}

/// Maps an original byte range to its position in the planned output.
#[derive(Debug, Clone, Copy)]
struct SpanMap {
    old_start: u64,
    len: u64,
    new_start: u64,
}

fn adjust_offset(old: u64, mapping: &[SpanMap]) -> Option<u64> {
    mapping
        .iter()
        .find(|span| old >= span.old_start && old < span.old_start + span.len)
        .map(|span| span.new_start + (old - span.old_start))
}

/// The output order shared by `span_mapping` and `build_segments`.
fn placed_spans(
    layout: &Layout,
    position: ElementPosition,
) -> (Vec<(u64, u64)>, Vec<(u64, u64)>) {
    // (spans before moov+padding, spans after) in output order
    let mut before: Vec<(u64, u64)> = Vec::new();
    let mut after: Vec<(u64, u64)> = Vec::new();
    match position {
        ElementPosition::AfterData => {
            before.extend(&layout.before_side);
            before.extend(&layout.data_group);
            after.extend(&layout.after_side);
        }
        _ => {
            after.extend(&layout.before_side);
            after.extend(&layout.data_group);
            after.extend(&layout.after_side);
        }
    }
    (before, after)
}

fn span_mapping(
    layout: &Layout,
    position: ElementPosition,
    moov_len: u64,
    padding: u64,
) -> Vec<SpanMap> {
    let (before, after) = placed_spans(layout, position);
    let mut mapping = Vec::new();
    let mut cursor = 0u64;
    if let Some((start, len)) = layout.ftyp {
        mapping.push(SpanMap {
            old_start: start,
            len,
            new_start: cursor,
        });
        cursor += len;
    }
    for (start, len) in before {
        mapping.push(SpanMap {
            old_start: start,
            len,
            new_start: cursor,
        });
        cursor += len;
    }
    cursor += moov_len + padding;
    for (start, len) in after {
        mapping.push(SpanMap {
            old_start: start,
            len,
            new_start: cursor,
        });
        cursor += len;
    }
    mapping
}

fn build_segments(
    layout: &Layout,
    position: ElementPosition,
    moov_buf: Vec<u8>,
    padding: u64,
) -> (Vec<Segment>, u64) {
    let (before, after) = placed_spans(layout, position);
    let mut segments = Vec::new();
    if let Some((start, len)) = layout.ftyp {
        segments.push(Segment::CopyFromSource { start, len });
    }
    for (start, len) in before {
        segments.push(Segment::CopyFromSource { start, len });
    }
    segments.push(Segment::Literal(moov_buf));
    if padding > 0 {
        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(&(padding as u32).to_be_bytes());
        header.extend_from_slice(b"free");
        segments.push(Segment::Literal(header));
        segments.push(Segment::ZeroFill { len: padding - 8 });
    }
    for (start, len) in after {
        segments.push(Segment::CopyFromSource { start, len });
    }
    let total_len = segments.iter().map(Segment::len).sum();
    (segments, total_len)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferTableKind {
    Stco,
    Co64,
}

/// An offset table located inside the rebuilt `moov` buffer.
#[derive(Debug)]
struct BufferTable {
    kind: BufferTableKind,
    /// Offset of the table atom within the buffer.
    atom_offset: usize,
    entries: Vec<u64>,
}

fn be32(buffer: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
}

fn be64(buffer: &[u8], at: usize) -> u64 {
    u64::from_be_bytes([
        buffer[at],
        buffer[at + 1],
        buffer[at + 2],
        buffer[at + 3],
        buffer[at + 4],
        buffer[at + 5],
        buffer[at + 6],
        buffer[at + 7],
    ])
}

const TABLE_PARENTS: [u32; 5] = [atom::MOOV, atom::TRAK, atom::MDIA, atom::MINF, atom::STBL];

fn scan_offset_tables(buffer: &[u8]) -> Vec<BufferTable> {
    let mut tables = Vec::new();
    scan_region(buffer, 0, buffer.len(), &mut tables);
    tables
}

/// Decode an atom header inside a buffer: (total size, header size).
/// Returns `None` when the header is malformed or overruns `end`.
fn buffer_atom_header(buffer: &[u8], pos: usize, end: usize) -> Option<(usize, usize)> {
    let size32 = be32(buffer, pos) as usize;
    let (size, header) = if size32 == 1 {
        if pos + 16 > end {
            return None;
        }
        (be64(buffer, pos + 8) as usize, 16)
    } else {
        (size32, 8)
    };
    if size < header || pos + size > end {
        return None;
    }
    Some((size, header))
}

fn scan_region(buffer: &[u8], start: usize, end: usize, tables: &mut Vec<BufferTable>) {
    let mut pos = start;
    while pos + 8 <= end {
        let (size, header) = match buffer_atom_header(buffer, pos, end) {
            Some(decoded) => decoded,
            None => break,
        };
        let id = be32(buffer, pos + 4);
        if (id == atom::STCO || id == atom::CO64) && size >= 16 {
            let count = be32(buffer, pos + 12) as usize;
            let kind = if id == atom::STCO {
                BufferTableKind::Stco
            } else {
                BufferTableKind::Co64
            };
            let width = if kind == BufferTableKind::Stco { 4 } else { 8 };
            let mut entries = Vec::with_capacity(count);
            for index in 0..count {
                let at = pos + 16 + index * width;
                if at + width > pos + size {
                    break;
                }
                entries.push(match kind {
                    BufferTableKind::Stco => u64::from(be32(buffer, at)),
                    BufferTableKind::Co64 => be64(buffer, at),
                });
            }
            tables.push(BufferTable {
                kind,
                atom_offset: pos,
                entries,
            });
        } else if TABLE_PARENTS.contains(&id) {
            scan_region(buffer, pos + header, pos + size, tables);
        }
        pos += size;
    }
}

fn apply_offsets(
    buffer: &mut [u8],
    tables: &[BufferTable],
    patched: &[(usize, Vec<u64>)],
) -> TagResult<()> {
    for (atom_offset, offsets) in patched {
        let table = tables
            .iter()
            .find(|table| table.atom_offset == *atom_offset)
            .ok_or_else(|| TagError::InvalidAtom("offset table vanished".to_string()))?;
        let width = if table.kind == BufferTableKind::Stco { 4 } else { 8 };
        for (index, &value) in offsets.iter().enumerate() {
            let at = atom_offset + 16 + index * width;
            match table.kind {
                BufferTableKind::Stco => {
                    let value = u32::try_from(value).map_err(|_| TagError::OffsetOverflow)?;
                    buffer[at..at + 4].copy_from_slice(&value.to_be_bytes());
                }
                BufferTableKind::Co64 => {
                    buffer[at..at + 8].copy_from_slice(&value.to_be_bytes());
                }
            }
        }
    }
    Ok(())
}

/// Rewrite the buffer with the given `stco` atoms converted to `co64`,
/// adjusting every ancestor size along the way. Entry values are copied
/// verbatim; they are re-patched on the next fixed-point iteration.
fn promote_tables(buffer: &[u8], promote: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buffer.len() + promote.len() * 64);
    promote_region(buffer, 0, buffer.len(), promote, &mut out);
    out
}

fn promote_region(buffer: &[u8], start: usize, end: usize, promote: &[usize], out: &mut Vec<u8>) {
    let mut pos = start;
    while pos + 8 <= end {
        let (size, header) = match buffer_atom_header(buffer, pos, end) {
            Some(decoded) => decoded,
            None => {
                out.extend_from_slice(&buffer[pos..end]);
                return;
            }
        };
        let id = be32(buffer, pos + 4);
        if id == atom::STCO && promote.contains(&pos) && size >= 16 {
            let count = be32(buffer, pos + 12) as usize;
            let new_size = 16 + count * 8;
            out.extend_from_slice(&(new_size as u32).to_be_bytes());
            out.extend_from_slice(b"co64");
            out.extend_from_slice(&buffer[pos + 8..pos + 12]); // version/flags
            out.extend_from_slice(&(count as u32).to_be_bytes());
            for index in 0..count {
                let at = pos + 16 + index * 4;
                let value = if at + 4 <= pos + size {
                    u64::from(be32(buffer, at))
                } else {
                    0
                };
                out.extend_from_slice(&value.to_be_bytes());
            }
        } else if TABLE_PARENTS.contains(&id) {
            let header_at = out.len();
            out.extend_from_slice(&[0u8; 4]);
            out.extend_from_slice(&buffer[pos + 4..pos + 8]);
            promote_region(buffer, pos + header, pos + size, promote, out);
            let new_size = (out.len() - header_at) as u32;
            out[header_at..header_at + 4].copy_from_slice(&new_size.to_be_bytes());
        } else {
            out.extend_from_slice(&buffer[pos..pos + size]);
        }
        pos += size;
    }
    if pos < end {
        out.extend_from_slice(&buffer[pos..end]);
    }
}

/// Stream a full-rewrite plan from `source` into `sink`.
pub fn write_segments<R: Read + Seek, W: Write>(
    segments: &[Segment],
    source: &mut R,
    sink: &mut W,
) -> TagResult<()> {
    for segment in segments {
        match segment {
            Segment::CopyFromSource { start, len } => copy_range(source, sink, *start, *len)?,
            Segment::Literal(bytes) => sink.write_all(bytes)?,
            Segment::ZeroFill { len } => {
                let zeros = [0u8; 4096];
                let mut remaining = *len;
                while remaining > 0 {
                    let chunk = remaining.min(zeros.len() as u64) as usize;
                    sink.write_all(&zeros[..chunk])?;
                    remaining -= chunk as u64;
                }
            }
        }
    }
    Ok(())
}

/// Apply in-place patches to a writer opened over the original file.
pub fn apply_patches<W: Write + Seek>(patches: &[(u64, Vec<u8>)], file: &mut W) -> TagResult<()> {
    for (offset, bytes) in patches {
        file.seek(std::io::SeekFrom::Start(*offset))?;
        file.write_all(bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = RewriteConfig::default().padding(0, 4096, 1024);
        assert!(matches!(config.validate(), Err(TagError::InvalidConfig(_))));
        let config = RewriteConfig::default().padding(2048, 1024, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clamp_padding() {
        let config = RewriteConfig::default().padding(5000, 1024, 4096);
        assert_eq!(clamp_padding(&config), 4096);
        let config = RewriteConfig::default().padding(0, 1024, 4096);
        assert_eq!(clamp_padding(&config), 1024);
        // sub-header padding rounds up to the smallest free atom
        let config = RewriteConfig::default().padding(4, 0, u64::MAX);
        assert_eq!(clamp_padding(&config), 8);
        let config = RewriteConfig::default().padding(0, 0, u64::MAX);
        assert_eq!(clamp_padding(&config), 0);
    }

    #[test]
    fn test_adjust_offset_mapping() {
        let mapping = [
            SpanMap {
                old_start: 100,
                len: 50,
                new_start: 200,
            },
            SpanMap {
                old_start: 1000,
                len: 10,
                new_start: 20,
            },
        ];
        assert_eq!(adjust_offset(100, &mapping), Some(200));
        assert_eq!(adjust_offset(149, &mapping), Some(249));
        assert_eq!(adjust_offset(150, &mapping), None);
        assert_eq!(adjust_offset(1005, &mapping), Some(25));
    }

    #[test]
    fn test_scan_and_promote_offset_table() {
        // moov { trak { mdia { minf { stbl { stco } } } } }
        let mut stco = Vec::new();
        stco.extend_from_slice(&24u32.to_be_bytes());
        stco.extend_from_slice(b"stco");
        stco.extend_from_slice(&0u32.to_be_bytes());
        stco.extend_from_slice(&1u32.to_be_bytes());
        stco.extend_from_slice(&0xFFFF_FF00u32.to_be_bytes());
        let mut wrap = stco;
        for id in [b"stbl", b"minf", b"mdia", b"trak", b"moov"] {
            let mut outer = Vec::new();
            outer.extend_from_slice(&(8 + wrap.len() as u32).to_be_bytes());
            outer.extend_from_slice(id);
            outer.extend_from_slice(&wrap);
            wrap = outer;
        }

        let tables = scan_offset_tables(&wrap);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].kind, BufferTableKind::Stco);
        assert_eq!(tables[0].entries, vec![0xFFFF_FF00]);

        let promoted = promote_tables(&wrap, &[tables[0].atom_offset]);
        assert_eq!(promoted.len(), wrap.len() + 4);
        let tables = scan_offset_tables(&promoted);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].kind, BufferTableKind::Co64);
        assert_eq!(tables[0].entries, vec![0xFFFF_FF00]);
    }

    #[test]
    fn test_write_segments() {
        let source_data: Vec<u8> = (0..64u8).collect();
        let mut source = std::io::Cursor::new(source_data);
        let segments = vec![
            Segment::Literal(vec![0xAA, 0xBB]),
            Segment::CopyFromSource { start: 10, len: 4 },
            Segment::ZeroFill { len: 3 },
        ];
        let mut sink = Vec::new();
        write_segments(&segments, &mut source, &mut sink).unwrap();
        assert_eq!(sink, vec![0xAA, 0xBB, 10, 11, 12, 13, 0, 0, 0]);
    }

    #[test]
    fn test_plan_validation_catches_overlap() {
        let plan = RewritePlan::FullRewrite {
            segments: vec![
                Segment::CopyFromSource { start: 0, len: 16 },
                Segment::CopyFromSource { start: 8, len: 16 },
            ],
            total_len: 32,
            padding: 0,
        };
        assert!(plan.validate().is_err());
    }
}
