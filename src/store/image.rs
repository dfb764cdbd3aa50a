//! On-disk image of a file-backed store.
//!
//! ```text
//! file:
//!   [0..8]   magic "OOCMAP\0\x02"
//!   frame*
//!
//! frame:
//!   [0..4]   body length (u32, little-endian)
//!   [4]      tag: 1 = checkpoint, 2 = commit
//!   [5..]    body (bincode, standard config)
//!
//! checkpoint body: table count (u32), then one BTreeMap<key, value> per table
//! commit body:     Vec<Change>
//! ```
//!
//! Loading replays frames in order: a checkpoint replaces every table, a
//! commit applies its changes. A commit is durable once its frame is fully
//! written, so a short final frame is the remains of an interrupted commit
//! and is dropped. A complete frame that fails to decode is corruption.
//!
//! A new image, and every compaction, is written to a sibling `.tmp` file and
//! renamed over the image, so the file on disk is never half a checkpoint.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bincode::config::standard;
use bincode::{Decode, Encode};
use mmap_rs::MmapOptions;

use crate::error::OocError;
use crate::trace;

use super::{Snapshot, StoreOptions, TABLE_COUNT, Table, TableMap};

pub(crate) const MAGIC: &[u8; 8] = b"OOCMAP\0\x02";

const FRAME_HEADER_SIZE: usize = 5;
const FRAME_CHECKPOINT: u8 = 1;
const FRAME_COMMIT: u8 = 2;

/// One key written or deleted by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Change {
    pub table: u8,
    pub key: Vec<u8>,
    /// `None` deletes the key.
    pub value: Option<Vec<u8>>,
}

pub(crate) struct LoadedImage {
    pub snapshot: Snapshot,
    /// Length of the image up to the last complete frame.
    pub valid_len: u64,
    /// Bytes of commit frames after the last checkpoint.
    pub log_bytes: u64,
    pub torn_tail: bool,
}

/// Read the image at `path`. `Ok(None)` for a missing or empty file.
pub(crate) fn load(path: &Path) -> Result<Option<LoadedImage>, OocError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let len = file.metadata()?.len() as usize;
    if len == 0 {
        return Ok(None);
    }
    let mapping = unsafe { MmapOptions::new(len)?.with_file(&file, 0) }.map()?;
    parse(mapping.as_slice()).map(Some)
}

pub(crate) fn parse(bytes: &[u8]) -> Result<LoadedImage, OocError> {
    if bytes.len() < MAGIC.len() || bytes[..MAGIC.len()] != MAGIC[..] {
        return Err(OocError::Image("not an oocmap image".to_string()));
    }

    let mut snapshot = Snapshot::default();
    let mut offset = MAGIC.len();
    let mut log_bytes = 0u64;
    let mut torn_tail = false;

    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < FRAME_HEADER_SIZE {
            torn_tail = true;
            break;
        }
        let body_len =
            u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
        let tag = remaining[4];
        if remaining.len() - FRAME_HEADER_SIZE < body_len {
            torn_tail = true;
            break;
        }
        let body = &remaining[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + body_len];
        match tag {
            FRAME_CHECKPOINT => {
                snapshot = decode_checkpoint(body)?;
                log_bytes = 0;
            }
            FRAME_COMMIT => {
                let changes: Vec<Change> = decode_exact(body, "commit")?;
                for change in &changes {
                    snapshot.apply(change)?;
                }
                log_bytes += (FRAME_HEADER_SIZE + body_len) as u64;
            }
            other => {
                return Err(OocError::Image(format!(
                    "unknown frame tag {} at offset {}",
                    other, offset
                )));
            }
        }
        offset += FRAME_HEADER_SIZE + body_len;
    }

    Ok(LoadedImage {
        snapshot,
        valid_len: offset as u64,
        log_bytes,
        torn_tail,
    })
}

fn decode_exact<T: Decode<()>>(body: &[u8], what: &str) -> Result<T, OocError> {
    let (value, read) = bincode::decode_from_slice(body, standard())?;
    if read != body.len() {
        return Err(OocError::Image(format!(
            "{} frame has {} trailing bytes",
            what,
            body.len() - read
        )));
    }
    Ok(value)
}

fn decode_checkpoint(body: &[u8]) -> Result<Snapshot, OocError> {
    let (count, mut read): (u32, usize) = bincode::decode_from_slice(body, standard())?;
    if count as usize != TABLE_COUNT {
        return Err(OocError::Image(format!(
            "checkpoint holds {} tables, expected {}",
            count, TABLE_COUNT
        )));
    }
    let mut snapshot = Snapshot::default();
    for table in Table::ALL {
        let (map, used): (TableMap, usize) =
            bincode::decode_from_slice(&body[read..], standard())?;
        *snapshot.table_mut(table) = map;
        read += used;
    }
    if read != body.len() {
        return Err(OocError::Image("checkpoint frame has trailing bytes".to_string()));
    }
    Ok(snapshot)
}

fn frame(tag: u8, body: &[u8]) -> Result<Vec<u8>, OocError> {
    let len = u32::try_from(body.len())
        .map_err(|_| OocError::Image(format!("frame of {} bytes is too large", body.len())))?;
    let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.push(tag);
    bytes.extend_from_slice(body);
    Ok(bytes)
}

/// A complete image holding `snapshot` as its only checkpoint.
pub(crate) fn checkpoint_image(snapshot: &Snapshot) -> Result<Vec<u8>, OocError> {
    let mut body = Vec::new();
    bincode::encode_into_std_write(TABLE_COUNT as u32, &mut body, standard())?;
    for table in Table::ALL {
        bincode::encode_into_std_write(snapshot.table(table), &mut body, standard())?;
    }
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&frame(FRAME_CHECKPOINT, &body)?);
    Ok(bytes)
}

pub(crate) fn commit_frame(changes: &[Change]) -> Result<Vec<u8>, OocError> {
    let body = bincode::encode_to_vec(changes, standard())?;
    frame(FRAME_COMMIT, &body)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Writable image of an open store.
pub(crate) struct ImageFile {
    path: PathBuf,
    file: File,
    len: u64,
    log_bytes: u64,
    sync: bool,
}

impl ImageFile {
    /// Open the image for appending. `valid_len` is the loaded length, or
    /// `None` when there is no image yet and one must be created.
    pub(crate) fn open(
        path: &Path,
        snapshot: &Snapshot,
        valid_len: Option<u64>,
        log_bytes: u64,
        options: StoreOptions,
    ) -> Result<ImageFile, OocError> {
        match valid_len {
            Some(valid_len) => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                if file.metadata()?.len() > valid_len {
                    file.set_len(valid_len)?;
                }
                Ok(ImageFile {
                    path: path.to_path_buf(),
                    file,
                    len: valid_len,
                    log_bytes,
                    sync: options.sync_on_commit,
                })
            }
            None => {
                let (file, len) = write_replacing(path, snapshot)?;
                Ok(ImageFile {
                    path: path.to_path_buf(),
                    file,
                    len,
                    log_bytes: 0,
                    sync: options.sync_on_commit,
                })
            }
        }
    }

    pub(crate) fn append_commit(&mut self, changes: &[Change]) -> Result<(), OocError> {
        let frame = commit_frame(changes)?;
        let written = self
            .file
            .seek(SeekFrom::Start(self.len))
            .and_then(|_| self.file.write_all(&frame))
            .and_then(|_| {
                if self.sync {
                    self.file.sync_data()
                } else {
                    Ok(())
                }
            });
        if let Err(error) = written {
            // Leave no partial frame behind for the next commit to follow.
            let _ = self.file.set_len(self.len);
            return Err(error.into());
        }
        self.len += frame.len() as u64;
        self.log_bytes += frame.len() as u64;
        trace::record(trace::EventKind::ImageWrite { bytes: frame.len() });
        Ok(())
    }

    /// Replace the image with a single checkpoint of `snapshot`.
    pub(crate) fn checkpoint(&mut self, snapshot: &Snapshot) -> Result<(), OocError> {
        let (file, len) = write_replacing(&self.path, snapshot)?;
        self.file = file;
        self.len = len;
        self.log_bytes = 0;
        Ok(())
    }

    /// Bytes of commit frames written since the last checkpoint.
    pub(crate) fn log_bytes(&self) -> u64 {
        self.log_bytes
    }
}

fn write_replacing(path: &Path, snapshot: &Snapshot) -> Result<(File, u64), OocError> {
    let bytes = checkpoint_image(snapshot)?;
    let temp = temp_path(path);
    {
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp, path)?;
    trace::record(trace::EventKind::ImageWrite { bytes: bytes.len() });
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok((file, bytes.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::TempPath;

    fn change(table: Table, key: &[u8], value: Option<&[u8]>) -> Change {
        Change {
            table: table.index() as u8,
            key: key.to_vec(),
            value: value.map(|v| v.to_vec()),
        }
    }

    fn sample_image() -> Vec<u8> {
        let mut snapshot = Snapshot::default();
        snapshot
            .table_mut(Table::Lists)
            .insert(b"one".to_vec(), b"1".to_vec());
        let mut bytes = checkpoint_image(&snapshot).unwrap();
        bytes.extend(
            commit_frame(&[
                change(Table::Lists, b"two", Some(b"2")),
                change(Table::Lists, b"one", None),
            ])
            .unwrap(),
        );
        bytes
    }

    #[test]
    fn test_replay_checkpoint_then_commit() {
        let bytes = sample_image();
        let loaded = parse(&bytes).unwrap();
        let lists = loaded.snapshot.table(Table::Lists);
        assert_eq!(lists.len(), 1);
        assert_eq!(lists.get(b"two".as_slice()), Some(&b"2".to_vec()));
        assert_eq!(loaded.valid_len, bytes.len() as u64);
        assert!(loaded.log_bytes > 0);
        assert!(!loaded.torn_tail);
    }

    #[test]
    fn test_short_final_frame_is_dropped() {
        let mut bytes = sample_image();
        let complete = bytes.len();
        let extra = commit_frame(&[change(Table::Meta, b"k", Some(b"v"))]).unwrap();
        bytes.extend_from_slice(&extra[..extra.len() - 3]);

        let loaded = parse(&bytes).unwrap();
        assert!(loaded.torn_tail);
        assert_eq!(loaded.valid_len, complete as u64);
        assert!(loaded.snapshot.table(Table::Meta).is_empty());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        assert!(matches!(parse(b"NOTOOCMAP"), Err(OocError::Image(_))));
        assert!(matches!(parse(b"OOC"), Err(OocError::Image(_))));
    }

    #[test]
    fn test_unknown_frame_tag_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&frame(9, &[]).unwrap());
        assert!(matches!(parse(&bytes), Err(OocError::Image(_))));
    }

    #[test]
    fn test_torn_file_is_truncated_on_open() {
        let path = TempPath::new("torn");
        let mut bytes = sample_image();
        let complete = bytes.len() as u64;
        bytes.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&path.0, &bytes).unwrap();

        let loaded = load(&path.0).unwrap().unwrap();
        assert!(loaded.torn_tail);
        let mut image = ImageFile::open(
            &path.0,
            &loaded.snapshot,
            Some(loaded.valid_len),
            loaded.log_bytes,
            StoreOptions::default(),
        )
        .unwrap();
        assert_eq!(std::fs::metadata(&path.0).unwrap().len(), complete);

        image
            .append_commit(&[change(Table::Meta, b"k", Some(b"v"))])
            .unwrap();
        let reloaded = load(&path.0).unwrap().unwrap();
        assert!(!reloaded.torn_tail);
        assert_eq!(
            reloaded.snapshot.table(Table::Meta).get(b"k".as_slice()),
            Some(&b"v".to_vec())
        );
    }

    #[test]
    fn test_checkpoint_resets_log() {
        let path = TempPath::new("checkpoint");
        let snapshot = Snapshot::default();
        let mut image =
            ImageFile::open(&path.0, &snapshot, None, 0, StoreOptions::default()).unwrap();
        image
            .append_commit(&[change(Table::Dicts, b"a", Some(b"b"))])
            .unwrap();
        assert!(image.log_bytes() > 0);

        let loaded = load(&path.0).unwrap().unwrap();
        image.checkpoint(&loaded.snapshot).unwrap();
        assert_eq!(image.log_bytes(), 0);
        let reloaded = load(&path.0).unwrap().unwrap();
        assert_eq!(reloaded.log_bytes, 0);
        assert_eq!(reloaded.snapshot.table(Table::Dicts).len(), 1);
    }

    #[test]
    fn test_missing_file_loads_as_none() {
        let path = TempPath::new("absent");
        assert!(load(&path.0).unwrap().is_none());
    }
}
