//! The engine's three state files.
//!
//! Each file is a four-byte magic, a little-endian `u32` format version and a
//! count-prefixed record stream. Files are read whole at load and written
//! whole at shutdown, through a temporary file renamed into place.

use crate::error::{CommitError, Result};
use crate::model::{Stamp, Status};
use crate::tracking::{UncommittedSet, UncommittedSnapshot};
use roaring::RoaringBitmap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const COMMIT_STATE_FILE: &str = "commit-manager.data";
pub const STAMP_ALIAS_FILE: &str = "stamp-alias.map";
pub const STAMP_COMMENT_FILE: &str = "stamp-comment.map";

const COMMIT_STATE_MAGIC: &[u8; 4] = b"LTCM";
const STAMP_ALIAS_MAGIC: &[u8; 4] = b"LTSA";
const STAMP_COMMENT_MAGIC: &[u8; 4] = b"LTSC";
const FILE_VERSION: u32 = 1;

/// Contents of `commit-manager.data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitState {
    pub database_sequence: u64,
    /// Milliseconds since the epoch; `None` before the first commit.
    pub last_commit_time: Option<i64>,
    /// Committed stamps in stamp-sequence order.
    pub stamps: Vec<Stamp>,
    pub uncommitted: UncommittedSnapshot,
}

// ============================================================================
// Writing
// ============================================================================

fn header(magic: &[u8; 4]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(magic);
    out.extend_from_slice(&FILE_VERSION.to_le_bytes());
    out
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn encode_commit_state(state: &CommitState) -> Result<Vec<u8>> {
    let mut out = header(COMMIT_STATE_MAGIC);
    out.extend_from_slice(&state.database_sequence.to_le_bytes());
    out.extend_from_slice(&state.last_commit_time.unwrap_or(-1).to_le_bytes());

    out.extend_from_slice(&(state.stamps.len() as u32).to_le_bytes());
    for stamp in &state.stamps {
        out.push(stamp.status.to_byte());
        out.extend_from_slice(&stamp.time.to_le_bytes());
        out.extend_from_slice(&stamp.author.to_le_bytes());
        out.extend_from_slice(&stamp.module.to_le_bytes());
        out.extend_from_slice(&stamp.path.to_le_bytes());
    }

    for set in UncommittedSet::ALL {
        let bitmap = state.uncommitted.set(set);
        let mut bytes = Vec::with_capacity(bitmap.serialized_size());
        bitmap.serialize_into(&mut bytes)?;
        out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

pub fn write_commit_state(dir: &Path, state: &CommitState) -> Result<()> {
    write_atomically(&dir.join(COMMIT_STATE_FILE), &encode_commit_state(state)?)
}

pub fn write_alias_map(dir: &Path, entries: &[(u32, u32)]) -> Result<()> {
    let mut out = header(STAMP_ALIAS_MAGIC);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (stamp, alias) in entries {
        out.extend_from_slice(&stamp.to_le_bytes());
        out.extend_from_slice(&alias.to_le_bytes());
    }
    write_atomically(&dir.join(STAMP_ALIAS_FILE), &out)
}

pub fn write_comment_map(dir: &Path, entries: &[(u32, String)]) -> Result<()> {
    let mut out = header(STAMP_COMMENT_MAGIC);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (stamp, comment) in entries {
        out.extend_from_slice(&stamp.to_le_bytes());
        out.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        out.extend_from_slice(comment.as_bytes());
    }
    write_atomically(&dir.join(STAMP_COMMENT_FILE), &out)
}

// ============================================================================
// Reading
// ============================================================================

/// Status byte, time, author, module, path.
const STAMP_RECORD_SIZE: usize = 1 + 8 + 4 + 4 + 4;

struct Reader<'a> {
    path: &'a Path,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn open(path: &'a Path, bytes: &'a [u8], magic: &[u8; 4]) -> Result<Self> {
        let mut reader = Self {
            path,
            bytes,
            offset: 0,
        };
        if reader.take(4)? != magic {
            return Err(reader.error("bad magic"));
        }
        let version = reader.u32()?;
        if version != FILE_VERSION {
            return Err(reader.error(format!("unsupported file version {version}")));
        }
        Ok(reader)
    }

    fn error(&self, reason: impl Into<String>) -> CommitError {
        CommitError::format(self.path, reason)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(n).filter(|end| *end <= self.bytes.len());
        let Some(end) = end else {
            return Err(self.error(format!("truncated at byte {}", self.offset)));
        };
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// A record count, rejected when `min_record_size`-byte records that many
    /// could not fit in the rest of the file.
    fn count(&mut self, min_record_size: usize) -> Result<usize> {
        let count = self.u32()? as usize;
        let remaining = self.bytes.len() - self.offset;
        if count > remaining / min_record_size {
            return Err(self.error(format!(
                "{count} records cannot fit in {remaining} remaining bytes"
            )));
        }
        Ok(count)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn finish(&self) -> Result<()> {
        if self.offset != self.bytes.len() {
            return Err(self.error(format!(
                "{} trailing bytes",
                self.bytes.len() - self.offset
            )));
        }
        Ok(())
    }
}

pub fn decode_commit_state(path: &Path, bytes: &[u8]) -> Result<CommitState> {
    let mut reader = Reader::open(path, bytes, COMMIT_STATE_MAGIC)?;
    let database_sequence = reader.u64()?;
    let last_commit_time = Some(reader.i64()?).filter(|t| *t >= 0);

    let count = reader.count(STAMP_RECORD_SIZE)?;
    let mut stamps = Vec::with_capacity(count);
    for _ in 0..count {
        let status_byte = reader.u8()?;
        let status = Status::from_byte(status_byte)
            .ok_or_else(|| reader.error(format!("unknown status byte {status_byte}")))?;
        stamps.push(Stamp {
            status,
            time: reader.i64()?,
            author: reader.i32()?,
            module: reader.i32()?,
            path: reader.i32()?,
        });
    }

    let mut uncommitted = UncommittedSnapshot::default();
    for set in UncommittedSet::ALL {
        let len = reader.u64()? as usize;
        let bytes = reader.take(len)?;
        let bitmap = RoaringBitmap::deserialize_from(bytes)
            .map_err(|e| reader.error(format!("bad {set:?} bitmap: {e}")))?;
        match set {
            UncommittedSet::ConceptsWithChecks => uncommitted.concepts_with_checks = bitmap,
            UncommittedSet::ConceptsNoChecks => uncommitted.concepts_no_checks = bitmap,
            UncommittedSet::SememesWithChecks => uncommitted.sememes_with_checks = bitmap,
            UncommittedSet::SememesNoChecks => uncommitted.sememes_no_checks = bitmap,
        }
    }
    reader.finish()?;

    Ok(CommitState {
        database_sequence,
        last_commit_time,
        stamps,
        uncommitted,
    })
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `Ok(None)` when the file does not exist yet.
pub fn read_commit_state(dir: &Path) -> Result<Option<CommitState>> {
    let path = dir.join(COMMIT_STATE_FILE);
    read_if_exists(&path)?
        .map(|bytes| decode_commit_state(&path, &bytes))
        .transpose()
}

pub fn read_alias_map(dir: &Path) -> Result<Vec<(u32, u32)>> {
    let path = dir.join(STAMP_ALIAS_FILE);
    let Some(bytes) = read_if_exists(&path)? else {
        return Ok(Vec::new());
    };
    let mut reader = Reader::open(&path, &bytes, STAMP_ALIAS_MAGIC)?;
    let count = reader.count(8)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push((reader.u32()?, reader.u32()?));
    }
    reader.finish()?;
    Ok(entries)
}

pub fn read_comment_map(dir: &Path) -> Result<Vec<(u32, String)>> {
    let path = dir.join(STAMP_COMMENT_FILE);
    let Some(bytes) = read_if_exists(&path)? else {
        return Ok(Vec::new());
    };
    let mut reader = Reader::open(&path, &bytes, STAMP_COMMENT_MAGIC)?;
    // Stamp and length prefix; the comment itself may be empty.
    let count = reader.count(8)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let stamp = reader.u32()?;
        let len = reader.u32()? as usize;
        let comment = String::from_utf8(reader.take(len)?.to_vec())
            .map_err(|_| reader.error(format!("comment for stamp {stamp} is not UTF-8")))?;
        entries.push((stamp, comment));
    }
    reader.finish()?;
    Ok(entries)
}

/// Paths of the three state files under `dir`.
pub fn state_files(dir: &Path) -> [PathBuf; 3] {
    [
        dir.join(COMMIT_STATE_FILE),
        dir.join(STAMP_ALIAS_FILE),
        dir.join(STAMP_COMMENT_FILE),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EditCoordinate;
    use tempfile::tempdir;

    fn sample_state() -> CommitState {
        let stamp = Stamp::uncommitted(Status::Active, EditCoordinate::new(1, 2, 3));
        let mut uncommitted = UncommittedSnapshot::default();
        uncommitted.concepts_with_checks.insert(4);
        uncommitted.sememes_no_checks.insert_range(10..20);
        CommitState {
            database_sequence: 9,
            last_commit_time: Some(1_700_000_000_000),
            stamps: vec![stamp.committed_at(5), stamp.committed_at(6)],
            uncommitted,
        }
    }

    #[test]
    fn commit_state_survives_a_write() {
        let dir = tempdir().unwrap();
        let state = sample_state();
        write_commit_state(dir.path(), &state).unwrap();
        assert_eq!(read_commit_state(dir.path()).unwrap(), Some(state));
        assert!(!dir.path().join("commit-manager.tmp").exists());
    }

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempdir().unwrap();
        assert_eq!(read_commit_state(dir.path()).unwrap(), None);
        assert!(read_alias_map(dir.path()).unwrap().is_empty());
        assert!(read_comment_map(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn maps_survive_a_write() {
        let dir = tempdir().unwrap();
        write_alias_map(dir.path(), &[(1, 2), (2, 3)]).unwrap();
        write_comment_map(dir.path(), &[(1, "bulk import".into()), (7, String::new())]).unwrap();
        assert_eq!(read_alias_map(dir.path()).unwrap(), vec![(1, 2), (2, 3)]);
        assert_eq!(
            read_comment_map(dir.path()).unwrap(),
            vec![(1, "bulk import".to_string()), (7, String::new())]
        );
    }

    #[test]
    fn corrupt_files_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(COMMIT_STATE_FILE);

        std::fs::write(&path, b"NOPE\x01\x00\x00\x00").unwrap();
        assert!(matches!(read_commit_state(dir.path()), Err(CommitError::Format { .. })));

        let mut bytes = encode_commit_state(&sample_state()).unwrap();
        bytes[4] = 2;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(read_commit_state(dir.path()), Err(CommitError::Format { .. })));

        let bytes = encode_commit_state(&sample_state()).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(read_commit_state(dir.path()), Err(CommitError::Format { .. })));
    }

    #[test]
    fn oversized_record_counts_are_rejected() {
        let dir = tempdir().unwrap();

        let mut bytes = header(COMMIT_STATE_MAGIC);
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&(-1i64).to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(dir.path().join(COMMIT_STATE_FILE), &bytes).unwrap();
        assert!(matches!(read_commit_state(dir.path()), Err(CommitError::Format { .. })));

        for (file, magic) in [
            (STAMP_ALIAS_FILE, STAMP_ALIAS_MAGIC),
            (STAMP_COMMENT_FILE, STAMP_COMMENT_MAGIC),
        ] {
            let mut bytes = header(magic);
            bytes.extend_from_slice(&u32::MAX.to_le_bytes());
            std::fs::write(dir.path().join(file), &bytes).unwrap();
        }
        assert!(matches!(read_alias_map(dir.path()), Err(CommitError::Format { .. })));
        assert!(matches!(read_comment_map(dir.path()), Err(CommitError::Format { .. })));
    }
}
