//! MP4 format support
//!
//! [`Mp4File`] is the per-file session: it owns the byte source, the
//! discovered atom tree, the tag, and the track list, and it orchestrates
//! saving through the planner and the backup helper. One session edits one
//! file; concurrent sessions on the same file must be serialized by the
//! caller.

pub mod atom;
pub mod field;
pub mod ids;
pub mod planner;
pub mod tag;
pub mod track;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{TagError, TagResult};
use crate::core::notification::{NotificationLog, Severity};
use crate::core::tag::{Tag, TagVariant};
use crate::files::backup;
use crate::files::mp4::atom::Mp4Atom;
use crate::files::mp4::ids::atom as atom_id;
use crate::files::mp4::planner::{RewriteConfig, RewritePlan};
use crate::files::mp4::tag::Mp4Tag;
use crate::files::mp4::track::Mp4Track;
use crate::utils::io::copy_range;

/// An MP4 editing session over a seekable byte source.
pub struct Mp4File<R> {
    reader: R,
    path: Option<PathBuf>,
    root: Mp4Atom,
    document_type: String,
    tag: Option<Mp4Tag>,
    tracks: Vec<Mp4Track>,
    notifications: NotificationLog,
}

impl Mp4File<File> {
    /// Open and parse a file on disk.
    pub fn open(path: impl AsRef<Path>) -> TagResult<Mp4File<File>> {
        let path = path.as_ref();
        let reader = File::open(path)?;
        let mut file = Self::from_parts(reader, Some(path.to_path_buf()))?;
        file.parse_content()?;
        Ok(file)
    }

    /// Persist the current tag state.
    ///
    /// Patches in place when the planner allows it; otherwise moves the
    /// original aside, streams the new layout, and swaps. Errors raised
    /// before any modification propagate untouched; errors after go
    /// through the recovery path and surface as `RewriteFailed`.
    pub fn save(&mut self, config: &RewriteConfig) -> TagResult<()> {
        config.validate()?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| TagError::InvalidConfig("session has no file path".to_string()))?;

        let maker = match &self.tag {
            Some(tag) => Some(tag.prepare()?),
            None => None,
        };
        let plan = planner::plan(
            &self.root,
            maker.as_ref(),
            config,
            &self.document_type,
            &mut self.reader,
            &mut self.notifications,
        )?;

        match plan {
            RewritePlan::InPlace { patches, .. } => {
                let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
                planner::apply_patches(&patches, &mut file)?;
                file.sync_all()?;
            }
            RewritePlan::FullRewrite { segments, .. } => {
                let (backup_path, mut backup_file) =
                    backup::create_backup(&path, config.backup_directory.as_deref())?;
                let written = write_new_file(&path, &segments, &mut backup_file);
                if let Err(error) = written {
                    return Err(backup::handle_failure_after_modified(
                        "making file",
                        &path,
                        &backup_path,
                        error,
                        &mut self.notifications,
                    ));
                }
                drop(backup_file);
                if let Err(error) = fs::remove_file(&backup_path) {
                    self.notifications.warning(
                        format!(
                            "backup {} could not be removed: {}",
                            backup_path.display(),
                            error
                        ),
                        "making file",
                    );
                }
            }
        }

        // the tree describes the old layout; reparse the saved file
        self.reader = File::open(&path)?;
        self.parse_content()
    }
}

fn write_new_file(
    path: &Path,
    segments: &[planner::Segment],
    source: &mut File,
) -> TagResult<()> {
    let mut out = File::create(path)?;
    planner::write_segments(segments, source, &mut out)?;
    out.sync_all()?;
    Ok(())
}

impl<R: Read + Seek> Mp4File<R> {
    /// Parse a session from any seekable byte source, e.g. an in-memory
    /// cursor.
    pub fn read_from(reader: R) -> TagResult<Mp4File<R>> {
        let mut file = Self::from_parts(reader, None)?;
        file.parse_content()?;
        Ok(file)
    }

    fn from_parts(reader: R, path: Option<PathBuf>) -> TagResult<Mp4File<R>> {
        Ok(Mp4File {
            reader,
            path,
            root: Mp4Atom::root(0),
            document_type: String::new(),
            tag: None,
            tracks: Vec::new(),
            notifications: NotificationLog::new(),
        })
    }

    fn parse_content(&mut self) -> TagResult<()> {
        let len = self.reader.seek(SeekFrom::End(0))?;
        let mut root = Mp4Atom::root(len);
        let mut log = NotificationLog::new();
        root.deep_parse(&mut self.reader, &mut log)?;

        let ftyp = match root.first_child() {
            Some(child) if child.id() == atom_id::FTYP => child,
            _ => return Err(TagError::UnsupportedContainer),
        };
        let mut brand = [0u8; 4];
        if ftyp.data_size() >= 4 {
            self.reader.seek(SeekFrom::Start(ftyp.data_offset()))?;
            self.reader.read_exact(&mut brand)?;
        }
        self.document_type = String::from_utf8_lossy(&brand).into_owned();

        let meta = root
            .child_by_path(&[atom_id::MOOV, atom_id::UDTA, atom_id::META])
            .or_else(|| root.child_by_path(&[atom_id::MOOV, atom_id::META]));
        self.tag = match meta {
            Some(meta) => {
                let parsed = Mp4Tag::parse(meta, &mut self.reader, &mut log)?;
                (parsed.field_count() > 0 || meta.child_by_id(atom_id::ILST).is_some())
                    .then_some(parsed)
            }
            None => None,
        };

        let mut tracks = Vec::new();
        if let Some(moov) = root.child_by_id(atom_id::MOOV) {
            for trak in moov.children_by_id(atom_id::TRAK) {
                tracks.push(Mp4Track::parse(trak, &mut self.reader, &mut log)?);
            }
        }

        self.root = root;
        self.tracks = tracks;
        self.notifications.absorb(log);
        tracing::debug!(
            document_type = %self.document_type,
            tracks = self.tracks.len(),
            has_tag = self.tag.is_some(),
            "parsed MP4 structure"
        );
        Ok(())
    }

    /// Major brand of the `ftyp` atom, e.g. "M4A ", "mp42", "dash".
    pub fn document_type(&self) -> &str {
        &self.document_type
    }

    pub fn is_fragmented(&self) -> bool {
        self.document_type == "dash"
            || self.root.children_by_id(atom_id::MOOF).next().is_some()
    }

    pub fn tag(&self) -> Option<&Mp4Tag> {
        self.tag.as_ref()
    }

    pub fn tag_mut(&mut self) -> Option<&mut Mp4Tag> {
        self.tag.as_mut()
    }

    /// The session's tag, created empty when none exists yet.
    pub fn create_tag(&mut self) -> &mut Mp4Tag {
        self.tag.get_or_insert_with(Mp4Tag::new)
    }

    /// Attach a tag of the given variant. Only the MP4 variant is valid
    /// for this container.
    pub fn create_tag_of(&mut self, variant: TagVariant) -> TagResult<&mut Mp4Tag> {
        if variant != TagVariant::Mp4 {
            return Err(TagError::UnsupportedTagVariant(variant.name()));
        }
        Ok(self.create_tag())
    }

    /// Drop the tag; the next save removes it from the file.
    pub fn remove_tag(&mut self) {
        self.tag = None;
    }

    pub fn tracks(&self) -> &[Mp4Track] {
        &self.tracks
    }

    pub fn notifications(&self) -> &NotificationLog {
        &self.notifications
    }

    pub fn worst_notification_severity(&self) -> Severity {
        self.notifications.worst()
    }

    /// Attachments are not a concept this container module implements.
    pub fn parse_attachments(&mut self) {
        self.notifications.information(
            "Parsing attachments is not implemented for the container format of the file.",
            "parsing attachments",
        );
    }

    /// Total bytes of padding currently present: top-level `free`/`skip`
    /// atoms plus slack inside `udta`.
    pub fn padding_size(&self) -> u64 {
        let top_level: u64 = self
            .root
            .children()
            .iter()
            .filter(|child| child.id() == atom_id::FREE || child.id() == atom_id::SKIP)
            .map(Mp4Atom::total_size)
            .sum();
        let udta_level: u64 = self
            .root
            .child_by_path(&[atom_id::MOOV, atom_id::UDTA])
            .map(|udta| {
                udta.children()
                    .iter()
                    .filter(|child| child.id() == atom_id::FREE || child.id() == atom_id::SKIP)
                    .map(Mp4Atom::total_size)
                    .sum()
            })
            .unwrap_or(0);
        top_level + udta_level
    }

    /// Access to the discovered atom tree.
    pub fn root_atom(&self) -> &Mp4Atom {
        &self.root
    }

    /// Compute the rewrite plan for the current state without touching
    /// anything.
    pub fn plan_rewrite(&mut self, config: &RewriteConfig) -> TagResult<RewritePlan> {
        let maker = match &self.tag {
            Some(tag) => Some(tag.prepare()?),
            None => None,
        };
        planner::plan(
            &self.root,
            maker.as_ref(),
            config,
            &self.document_type,
            &mut self.reader,
            &mut self.notifications,
        )
    }

    /// Materialize the planned output into `writer`: the complete new file
    /// for a full rewrite, or a patched copy of the source for an in-place
    /// plan. Lets callers (and tests) exercise the write path without a
    /// real file.
    pub fn write_plan_to<W: Write + Seek>(
        &mut self,
        plan: &RewritePlan,
        writer: &mut W,
    ) -> TagResult<()> {
        match plan {
            RewritePlan::FullRewrite { segments, .. } => {
                planner::write_segments(segments, &mut self.reader, writer)
            }
            RewritePlan::InPlace { patches, .. } => {
                copy_range(&mut self.reader, writer, 0, self.root.total_size())?;
                planner::apply_patches(patches, writer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_rejects_non_mp4() {
        let result = Mp4File::read_from(Cursor::new(vec![0u8; 64]));
        assert!(matches!(result, Err(TagError::UnsupportedContainer)));
    }

    #[test]
    fn test_rejects_empty_source() {
        let result = Mp4File::read_from(Cursor::new(Vec::new()));
        assert!(matches!(result, Err(TagError::UnsupportedContainer)));
    }

    #[test]
    fn test_attachment_notification() {
        let mut data = Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(b"M4A \x00\x00\x00\x00");
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&8u32.to_be_bytes());
        data.extend_from_slice(b"mvhd");

        let mut file = Mp4File::read_from(Cursor::new(data)).unwrap();
        file.parse_attachments();
        assert_eq!(file.worst_notification_severity(), Severity::Information);
        assert!(file.notifications().entries()[0]
            .message
            .contains("not implemented"));
    }

    #[test]
    fn test_create_tag_of_wrong_variant() {
        let mut data = Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(b"M4A \x00\x00\x00\x00");
        let mut file = Mp4File::read_from(Cursor::new(data)).unwrap();
        let result = file.create_tag_of(TagVariant::Id3v2);
        assert!(matches!(result, Err(TagError::UnsupportedTagVariant(_))));
        assert!(file.create_tag_of(TagVariant::Mp4).is_ok());
    }
}
