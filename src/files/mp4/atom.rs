//! ISO-BMFF atom tree
//!
//! Atoms are materialized on demand: parsing an atom reads only its header,
//! and children are discovered the first time they are asked for. Malformed
//! regions degrade to notifications instead of failing the whole parse, so
//! a damaged file still yields a best-effort tree.

use std::io::{Read, Seek, SeekFrom};

use crate::core::error::{TagError, TagResult};
use crate::core::notification::NotificationLog;
use crate::files::mp4::ids::{self, atom, fourcc_to_string};
use crate::utils::io::{read_u32_be, read_u64_be};

/// A child may overrun its parent's end by up to this many bytes before
/// the parse is considered hopeless rather than clamped.
const OVERSIZE_TOLERANCE: u64 = 8;

/// One atom in the tree.
///
/// `children` is `None` until discovery; leaf payloads are never read by
/// the tree itself.
#[derive(Debug, Clone)]
pub struct Mp4Atom {
    id: u32,
    usertype: Option<[u8; 16]>,
    start_offset: u64,
    header_size: u8,
    total_size: u64,
    children: Option<Vec<Mp4Atom>>,
    parsed_with_warnings: bool,
}

impl Mp4Atom {
    /// Parse the atom header at `offset`. `end` bounds the enclosing region
    /// (parent end or source length). Only the header is read.
    pub fn parse_header<R: Read + Seek>(reader: &mut R, offset: u64, end: u64) -> TagResult<Mp4Atom> {
        let available = end.saturating_sub(offset);
        if available < 8 {
            return Err(TagError::Truncated(format!(
                "atom header at 0x{:X} needs 8 bytes but only {} remain",
                offset, available
            )));
        }
        reader.seek(SeekFrom::Start(offset))?;
        let size32 = read_u32_be(reader)?;
        let id = read_u32_be(reader)?;

        let (mut total_size, header_size) = match size32 {
            0 => (available, 8u8),
            1 => {
                if available < 16 {
                    return Err(TagError::Truncated(format!(
                        "atom at 0x{:X} declares an extended size but the header is cut off",
                        offset
                    )));
                }
                let extended = read_u64_be(reader)?;
                if extended < 16 {
                    return Err(TagError::InvalidAtom(format!(
                        "extended size {} of atom at 0x{:X} is smaller than its header",
                        extended, offset
                    )));
                }
                (extended, 16u8)
            }
            size if size < 8 => {
                return Err(TagError::InvalidAtom(format!(
                    "size {} of atom at 0x{:X} is smaller than its header",
                    size, offset
                )));
            }
            size => (u64::from(size), 8u8),
        };

        let usertype = if id == atom::UUID {
            if total_size < u64::from(header_size) + 16 {
                return Err(TagError::InvalidAtom(format!(
                    "uuid atom at 0x{:X} is too small to hold a usertype",
                    offset
                )));
            }
            let mut buf = [0u8; 16];
            reader.read_exact(&mut buf)?;
            Some(buf)
        } else {
            None
        };

        let mut parsed_with_warnings = false;
        if total_size > available {
            if total_size - available > OVERSIZE_TOLERANCE {
                return Err(TagError::Truncated(format!(
                    "atom {} at 0x{:X} claims {} bytes but only {} remain",
                    fourcc_to_string(id),
                    offset,
                    total_size,
                    available
                )));
            }
            total_size = available;
            parsed_with_warnings = true;
        }

        Ok(Mp4Atom {
            id,
            usertype,
            start_offset: offset,
            header_size,
            total_size,
            children: None,
            parsed_with_warnings,
        })
    }

    /// Synthetic root spanning the whole source; its children are the
    /// top-level atoms.
    pub fn root(source_len: u64) -> Mp4Atom {
        Mp4Atom {
            id: 0,
            usertype: None,
            start_offset: 0,
            header_size: 0,
            total_size: source_len,
            children: None,
            parsed_with_warnings: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn usertype(&self) -> Option<&[u8; 16]> {
        self.usertype.as_ref()
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// 8 or 16 bytes; a uuid usertype is accounted separately.
    pub fn header_size(&self) -> u8 {
        self.header_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Offset just past the atom.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.total_size
    }

    /// Offset of the payload, past header and usertype.
    pub fn data_offset(&self) -> u64 {
        self.start_offset + self.full_header_len()
    }

    pub fn data_size(&self) -> u64 {
        self.total_size.saturating_sub(self.full_header_len())
    }

    fn full_header_len(&self) -> u64 {
        u64::from(self.header_size) + if self.usertype.is_some() { 16 } else { 0 }
    }

    fn is_root(&self) -> bool {
        self.header_size == 0
    }

    /// Whether the registry classifies this atom as a container.
    pub fn is_container(&self) -> bool {
        self.is_root() || ids::is_container(self.id)
    }

    /// Whether this atom or a child failed to parse cleanly.
    pub fn parsed_with_warnings(&self) -> bool {
        self.parsed_with_warnings
    }

    /// Discover direct children if not done yet. Siblings are walked by
    /// seeking to `offset + total_size`; a child overrunning the parent is
    /// clamped and flagged, a malformed header ends the chain with a
    /// warning and leaves the atoms parsed so far in place.
    pub fn ensure_children<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        log: &mut NotificationLog,
    ) -> TagResult<()> {
        if self.children.is_some() {
            return Ok(());
        }
        if !self.is_container() {
            self.children = Some(Vec::new());
            return Ok(());
        }

        let first = self.data_offset() + if self.is_root() { 0 } else { ids::child_offset(self.id) };
        let end = self.end_offset();
        let mut children = Vec::new();
        let mut pos = first;
        while pos + 8 <= end {
            match Mp4Atom::parse_header(reader, pos, end) {
                Ok(child) => {
                    if child.parsed_with_warnings {
                        log.warning(
                            format!(
                                "atom {} runs past the end of its parent and has been clamped",
                                fourcc_to_string(child.id)
                            ),
                            format!("parsing atom at 0x{:X}", pos),
                        );
                        self.parsed_with_warnings = true;
                    }
                    let next = child.end_offset();
                    children.push(child);
                    if next <= pos {
                        break;
                    }
                    pos = next;
                }
                Err(error) => {
                    log.warning(
                        error.to_string(),
                        format!("parsing atom at 0x{:X}", pos),
                    );
                    self.parsed_with_warnings = true;
                    break;
                }
            }
        }
        self.children = Some(children);
        Ok(())
    }

    /// Recursively discover the whole subtree.
    pub fn deep_parse<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        log: &mut NotificationLog,
    ) -> TagResult<()> {
        self.ensure_children(reader, log)?;
        let mut warned = false;
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                child.deep_parse(reader, log)?;
                warned |= child.parsed_with_warnings;
            }
        }
        self.parsed_with_warnings |= warned;
        Ok(())
    }

    /// Drop cached children and rediscover the subtree.
    pub fn reparse<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        log: &mut NotificationLog,
    ) -> TagResult<()> {
        self.children = None;
        self.parsed_with_warnings = false;
        self.deep_parse(reader, log)
    }

    /// Direct children discovered so far.
    pub fn children(&self) -> &[Mp4Atom] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn children_mut(&mut self) -> &mut [Mp4Atom] {
        match self.children.as_mut() {
            Some(children) => children,
            None => &mut [],
        }
    }

    pub fn first_child(&self) -> Option<&Mp4Atom> {
        self.children().first()
    }

    /// The discovered sibling following `child`.
    pub fn next_sibling(&self, child: &Mp4Atom) -> Option<&Mp4Atom> {
        let index = self
            .children()
            .iter()
            .position(|candidate| candidate.start_offset() == child.start_offset())?;
        self.children().get(index + 1)
    }

    pub fn child_by_id(&self, id: u32) -> Option<&Mp4Atom> {
        self.children().iter().find(|child| child.id == id)
    }

    pub fn children_by_id(&self, id: u32) -> impl Iterator<Item = &Mp4Atom> {
        self.children().iter().filter(move |child| child.id == id)
    }

    /// Walk a path of atom ids through the discovered tree.
    pub fn child_by_path(&self, path: &[u32]) -> Option<&Mp4Atom> {
        match path.split_first() {
            None => Some(self),
            Some((&id, rest)) => self.child_by_id(id)?.child_by_path(rest),
        }
    }

    /// Walk a path, discovering children along the way.
    pub fn materialize_path<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        path: &[u32],
        log: &mut NotificationLog,
    ) -> TagResult<Option<&mut Mp4Atom>> {
        let (&id, rest) = match path.split_first() {
            None => return Ok(Some(self)),
            Some(split) => split,
        };
        self.ensure_children(reader, log)?;
        let child = self
            .children
            .as_mut()
            .and_then(|children| children.iter_mut().find(|child| child.id == id));
        match child {
            Some(child) => child.materialize_path(reader, rest, log),
            None => Ok(None),
        }
    }

    /// Read the payload of a leaf atom into memory.
    pub fn read_data<R: Read + Seek>(&self, reader: &mut R) -> TagResult<Vec<u8>> {
        reader.seek(SeekFrom::Start(self.data_offset()))?;
        let mut data = vec![0u8; self.data_size() as usize];
        reader.read_exact(&mut data)?;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::mp4::ids::fourcc;
    use std::io::Cursor;

    fn leaf(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(id);
        bytes.extend_from_slice(payload);
        bytes
    }

    fn container(id: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
        let inner: usize = children.iter().map(Vec::len).sum();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(8 + inner as u32).to_be_bytes());
        bytes.extend_from_slice(id);
        for child in children {
            bytes.extend_from_slice(child);
        }
        bytes
    }

    #[test]
    fn test_parse_plain_header() {
        let data = leaf(b"ftyp", b"isom\x00\x00\x00\x00isom");
        let mut reader = Cursor::new(&data);
        let atom = Mp4Atom::parse_header(&mut reader, 0, data.len() as u64).unwrap();
        assert_eq!(atom.id(), fourcc(b"ftyp"));
        assert_eq!(atom.header_size(), 8);
        assert_eq!(atom.total_size(), 20);
        assert_eq!(atom.data_size(), 12);
    }

    #[test]
    fn test_parse_extended_size() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&24u64.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        let mut reader = Cursor::new(&data);
        let atom = Mp4Atom::parse_header(&mut reader, 0, data.len() as u64).unwrap();
        assert_eq!(atom.header_size(), 16);
        assert_eq!(atom.total_size(), 24);
        assert_eq!(atom.data_size(), 8);
    }

    #[test]
    fn test_parse_size_zero_extends_to_end() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0xAB; 100]);
        let mut reader = Cursor::new(&data);
        let atom = Mp4Atom::parse_header(&mut reader, 0, data.len() as u64).unwrap();
        assert_eq!(atom.total_size(), 108);
    }

    #[test]
    fn test_parse_uuid_usertype() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0x42; 16]);
        payload.extend_from_slice(b"body");
        let data = leaf(b"uuid", &payload);
        let mut reader = Cursor::new(&data);
        let atom = Mp4Atom::parse_header(&mut reader, 0, data.len() as u64).unwrap();
        assert_eq!(atom.usertype(), Some(&[0x42; 16]));
        assert_eq!(atom.data_size(), 4);
    }

    #[test]
    fn test_invalid_size_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u32.to_be_bytes());
        data.extend_from_slice(b"junk");
        data.extend_from_slice(&[0u8; 8]);
        let mut reader = Cursor::new(&data);
        let result = Mp4Atom::parse_header(&mut reader, 0, data.len() as u64);
        assert!(matches!(result, Err(TagError::InvalidAtom(_))));
    }

    #[test]
    fn test_oversized_atom_rejected() {
        let mut data = Vec::new();
        data.extend_from_slice(&4096u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 16]);
        let mut reader = Cursor::new(&data);
        let result = Mp4Atom::parse_header(&mut reader, 0, data.len() as u64);
        assert!(matches!(result, Err(TagError::Truncated(_))));
    }

    #[test]
    fn test_children_and_path() {
        let file = [
            leaf(b"ftyp", b"M4A \x00\x00\x00\x00"),
            container(
                b"moov",
                &[container(b"udta", &[leaf(b"free", &[0u8; 16])])],
            ),
            leaf(b"mdat", &[1, 2, 3]),
        ]
        .concat();
        let mut reader = Cursor::new(&file);
        let mut log = NotificationLog::new();
        let mut root = Mp4Atom::root(file.len() as u64);
        root.deep_parse(&mut reader, &mut log).unwrap();

        assert_eq!(root.children().len(), 3);
        assert_eq!(root.first_child().unwrap().id(), fourcc(b"ftyp"));
        let ftyp = root.first_child().unwrap();
        assert_eq!(root.next_sibling(ftyp).unwrap().id(), fourcc(b"moov"));
        let free = root
            .child_by_path(&[fourcc(b"moov"), fourcc(b"udta"), fourcc(b"free")])
            .unwrap();
        assert_eq!(free.data_size(), 16);
        assert!(log.is_empty());
        assert!(!root.parsed_with_warnings());
    }

    #[test]
    fn test_meta_versioned_container_skips_flags() {
        // meta payload: 4 bytes version/flags, then an hdlr child
        let hdlr = leaf(b"hdlr", &[0u8; 24]);
        let mut meta_payload = vec![0u8; 4];
        meta_payload.extend_from_slice(&hdlr);
        let file = container(b"moov", &[container(b"udta", &[leaf(b"meta", &meta_payload)])]);
        let mut reader = Cursor::new(&file);
        let mut log = NotificationLog::new();
        let mut root = Mp4Atom::root(file.len() as u64);
        root.deep_parse(&mut reader, &mut log).unwrap();
        let meta = root
            .child_by_path(&[fourcc(b"moov"), fourcc(b"udta"), fourcc(b"meta")])
            .unwrap();
        assert_eq!(meta.children().len(), 1);
        assert_eq!(meta.first_child().unwrap().id(), fourcc(b"hdlr"));
    }

    #[test]
    fn test_garbage_child_degrades_to_warning() {
        let mut udta_payload = leaf(b"free", &[0u8; 4]);
        // size field of 3 is invalid; the sibling chain must stop here
        udta_payload.extend_from_slice(&3u32.to_be_bytes());
        udta_payload.extend_from_slice(b"bad!");
        udta_payload.extend_from_slice(&[0u8; 16]);
        let file = container(b"udta", &[udta_payload]);
        let mut reader = Cursor::new(&file);
        let mut log = NotificationLog::new();
        let mut root = Mp4Atom::root(file.len() as u64);
        root.deep_parse(&mut reader, &mut log).unwrap();

        let udta = root.child_by_id(fourcc(b"udta")).unwrap();
        assert_eq!(udta.children().len(), 1);
        assert!(udta.parsed_with_warnings());
        assert!(!log.is_empty());
        assert!(log.entries()[0].context.starts_with("parsing atom at 0x"));
    }

    #[test]
    fn test_reparse_rediscovers() {
        let file = container(b"udta", &[leaf(b"free", &[0u8; 8])]);
        let mut reader = Cursor::new(file.clone());
        let mut log = NotificationLog::new();
        let mut root = Mp4Atom::root(file.len() as u64);
        root.deep_parse(&mut reader, &mut log).unwrap();
        assert_eq!(root.children()[0].children().len(), 1);

        // grow the region behind the tree's back, then reparse
        let grown = container(b"udta", &[leaf(b"free", &[0u8; 8]), leaf(b"free", &[0u8; 4])]);
        let mut reader = Cursor::new(grown.clone());
        let mut root = Mp4Atom::root(grown.len() as u64);
        root.deep_parse(&mut reader, &mut log).unwrap();
        root.reparse(&mut reader, &mut log).unwrap();
        assert_eq!(root.children()[0].children().len(), 2);
    }
}
