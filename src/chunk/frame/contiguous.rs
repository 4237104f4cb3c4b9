use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::{
    data_start, decode_frame, frame_len, FrameIndex, FrameMeta, FrameParts, FrameStore, IndexEntry,
    HEADER_LEN,
};
use crate::Error;

/// The smallest index capacity of a frame file.
const MIN_INDEX_CAPACITY: usize = 16;

/// A frame stored as a single buffer, in memory or in a file.
///
/// The chunks are kept in a payload arena. Appends and inserts push to the end of the arena, and an overwrite is
/// done in place if the new chunk fits in the space of the old one. Deleted and shrunk chunks leave gaps in the
/// arena, which are reclaimed by [`FrameStore::compact`]. A serialized frame is always compact, with the payloads
/// in index order.
///
/// A file backed frame mirrors the arena in the payload region of the file, and reserves free index slots for
/// future chunks. [`FrameStore::flush`] writes the chunks added since the previous flush at the end of the payload
/// region, followed by the index, the trailer and the header. The whole frame is rewritten only when the index is
/// full or after a compaction, into a temporary file renamed over the original when the frame starts the file.
///
/// A frame followed by other data in its file, such as another frame appended with
/// [`SChunk::to_file`](crate::chunk::SChunk::to_file), can not grow past its original end. A flush that would
/// overwrite the following data fails with [`Error::Config`].
#[derive(Debug)]
pub struct ContiguousFrame {
    meta: FrameMeta,
    /// Offsets of the entries are positions in the arena.
    index: FrameIndex,
    arena: Vec<u8>,
    garbage: usize,
    /// Arena ranges overwritten in place since the last flush.
    overwritten: Vec<Range<usize>>,
    file: Option<FileTarget>,
    dirty: bool,
}

#[derive(Debug)]
struct FileTarget {
    path: PathBuf,
    offset: u64,
    /// The layout of the frame on disk, `None` if the next flush rewrites the whole frame.
    synced: Option<Synced>,
    /// The end of the space available to the frame, if other data follows it in the file.
    limit: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Synced {
    capacity: usize,
    arena_len: usize,
    len: u64,
}

impl FileTarget {
    fn check_limit(&self, len: u64) -> Result<(), Error> {
        match self.limit {
            Some(limit) if self.offset + len > limit => Err(Error::config(format!(
                "frame at offset {} of {} is followed by other data, it can not grow to {} bytes",
                self.offset,
                self.path.display(),
                len
            ))),
            _ => Ok(()),
        }
    }
}

impl ContiguousFrame {
    /// Create an empty in-memory frame.
    pub fn new(meta: FrameMeta) -> Self {
        Self {
            meta,
            index: FrameIndex::default(),
            arena: Vec::new(),
            garbage: 0,
            overwritten: Vec::new(),
            file: None,
            dirty: false,
        }
    }

    /// Create an empty frame backed by a file.
    ///
    /// An `offset` of zero creates a new file, and fails if the file already exists. Otherwise the frame is written
    /// at `offset` in an existing file, and any content of the file beyond the offset is discarded.
    pub fn create(path: &Path, offset: u64, meta: FrameMeta) -> Result<Self, Error> {
        if offset == 0 {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)?;
        } else {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?
                .set_len(offset)?;
        }
        let mut frame = Self::new(meta);
        frame.file = Some(FileTarget {
            path: path.to_path_buf(),
            offset,
            synced: None,
            limit: None,
        });
        frame.dirty = true;
        frame.flush()?;
        Ok(frame)
    }

    /// Load an in-memory frame from a serialized contiguous frame.
    ///
    /// The buffer may continue past the end of the frame.
    pub fn from_frame(buf: &[u8]) -> Result<Self, Error> {
        Self::load(buf).map(|(frame, _)| frame)
    }

    fn load(buf: &[u8]) -> Result<(Self, Synced), Error> {
        let decoded = decode_frame(buf)?;
        if !decoded.contiguous {
            return Err(Error::corrupt_frame("not a contiguous frame"));
        }

        let data_start = data_start(decoded.capacity);
        let arena = buf[data_start..decoded.data_end].to_vec();
        let mut entries = Vec::with_capacity(decoded.entries.len());
        for (i, entry) in decoded.entries.iter().enumerate() {
            let start = entry.offset as usize - data_start;
            let bytes = &arena[start..start + entry.cbytes];
            let actual = IndexEntry::for_chunk(bytes, start as u64)
                .map_err(|e| Error::corrupt_frame(format!("chunk {i}: {e}")))?;
            if (actual.nbytes, actual.special) != (entry.nbytes, entry.special) {
                return Err(Error::corrupt_frame(format!(
                    "chunk {i} does not match its index entry"
                )));
            }
            entries.push(actual);
        }
        let index = FrameIndex::from_entries(entries);
        let garbage = arena
            .len()
            .checked_sub(index.cbytes())
            .ok_or_else(|| Error::corrupt_frame("chunks overlap"))?;

        let synced = Synced {
            capacity: decoded.capacity,
            arena_len: arena.len(),
            len: decoded.len,
        };
        let frame = Self {
            meta: decoded.meta,
            index,
            arena,
            garbage,
            overwritten: Vec::new(),
            file: None,
            dirty: false,
        };
        Ok((frame, synced))
    }

    /// Open a frame stored in a file, starting at `offset`.
    ///
    /// Only the bytes of the frame are read, the file may hold other data after it.
    pub fn open(path: &Path, offset: u64) -> Result<Self, Error> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < offset.saturating_add(HEADER_LEN as u64) {
            return Err(Error::corrupt_frame(format!(
                "no frame header at offset {} of {}, the file has {} bytes",
                offset,
                path.display(),
                file_len
            )));
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0; HEADER_LEN];
        file.read_exact(&mut buf)?;
        let len = frame_len(&buf)?;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= file_len)
            .ok_or_else(|| {
                Error::corrupt_frame(format!(
                    "frame of {} bytes at offset {} exceeds the file of {} bytes",
                    len, offset, file_len
                ))
            })?;
        buf.resize(len as usize, 0);
        file.read_exact(&mut buf[HEADER_LEN..])?;

        let (mut frame, synced) = Self::load(&buf)?;
        log::debug!(
            "opened contiguous frame {} at offset {}, {} chunks",
            path.display(),
            offset,
            frame.chunk_count()
        );
        frame.file = Some(FileTarget {
            path: path.to_path_buf(),
            offset,
            synced: Some(synced),
            limit: (end < file_len).then_some(end),
        });
        Ok(frame)
    }

    fn push_payload(&mut self, bytes: &[u8]) -> Result<IndexEntry, Error> {
        let entry = IndexEntry::for_chunk(bytes, self.arena.len() as u64)?;
        self.arena.extend_from_slice(bytes);
        Ok(entry)
    }

    fn payload(&self, entry: &IndexEntry) -> &[u8] {
        let start = entry.offset as usize;
        &self.arena[start..start + entry.cbytes]
    }

    /// Serialize the header, index and trailer for a payload region starting right after an index of `capacity`
    /// entries.
    fn parts(&self, capacity: usize) -> FrameParts {
        let data_start = data_start(capacity);
        let entries = self
            .index
            .entries()
            .iter()
            .map(|e| IndexEntry {
                offset: e.offset + data_start as u64,
                ..*e
            })
            .collect::<Vec<_>>();
        FrameParts::new(
            &self.meta,
            &entries,
            true,
            capacity,
            data_start + self.arena.len(),
        )
    }

    /// Write the chunks added since the last flush and the overwritten ranges, then the index, trailer and header.
    fn flush_incremental(&self, target: &FileTarget, synced: Synced) -> Result<Synced, Error> {
        let parts = self.parts(synced.capacity);
        target.check_limit(parts.len)?;

        let mut file = OpenOptions::new().write(true).open(&target.path)?;
        let data_start = target.offset + data_start(synced.capacity) as u64;
        for range in &self.overwritten {
            file.seek(SeekFrom::Start(data_start + range.start as u64))?;
            file.write_all(&self.arena[range.clone()])?;
        }
        file.seek(SeekFrom::Start(data_start + synced.arena_len as u64))?;
        file.write_all(&self.arena[synced.arena_len..])?;
        file.write_all(&parts.trailer)?;
        file.seek(SeekFrom::Start(target.offset + HEADER_LEN as u64))?;
        file.write_all(&parts.index)?;
        file.seek(SeekFrom::Start(target.offset))?;
        file.write_all(&parts.header)?;
        if target.limit.is_none() && parts.len < synced.len {
            file.set_len(target.offset + parts.len)?;
        }
        file.sync_all()?;
        log::debug!(
            "flushed contiguous frame {}, {} new payload bytes",
            target.path.display(),
            self.arena.len() - synced.arena_len
        );
        Ok(Synced {
            capacity: synced.capacity,
            arena_len: self.arena.len(),
            len: parts.len,
        })
    }

    /// Rewrite the whole frame, with room in the index for as many chunks as it holds.
    fn flush_full(&self, target: &FileTarget) -> Result<Synced, Error> {
        let capacity = (2 * self.index.len()).max(MIN_INDEX_CAPACITY);
        let parts = self.parts(capacity);
        target.check_limit(parts.len)?;

        let mut frame = Vec::with_capacity(parts.len as usize);
        frame.extend_from_slice(&parts.header);
        frame.extend_from_slice(&parts.index);
        frame.extend_from_slice(&self.arena);
        frame.extend_from_slice(&parts.trailer);

        if target.offset == 0 && target.limit.is_none() {
            let mut tmp_name = target.path.file_name().unwrap_or_default().to_os_string();
            tmp_name.push(".tmp");
            let tmp = target.path.with_file_name(tmp_name);
            let mut file = File::create(&tmp)?;
            file.write_all(&frame)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &target.path)?;
        } else {
            let mut file = OpenOptions::new().write(true).open(&target.path)?;
            file.seek(SeekFrom::Start(target.offset))?;
            file.write_all(&frame)?;
            if target.limit.is_none() {
                file.set_len(target.offset + parts.len)?;
            }
            file.sync_all()?;
        }
        log::debug!(
            "rewrote contiguous frame {}, {} bytes",
            target.path.display(),
            frame.len()
        );
        Ok(Synced {
            capacity,
            arena_len: self.arena.len(),
            len: parts.len,
        })
    }
}

impl FrameStore for ContiguousFrame {
    fn chunk_count(&self) -> usize {
        self.index.len()
    }

    fn entry(&self, index: usize) -> Result<IndexEntry, Error> {
        self.index.get(index)
    }

    fn nbytes(&self) -> usize {
        self.index.nbytes()
    }

    fn cbytes(&self) -> usize {
        self.index.cbytes()
    }

    fn read_chunk(&self, index: usize) -> Result<Cow<'_, [u8]>, Error> {
        let entry = self.index.get(index)?;
        Ok(Cow::Borrowed(self.payload(&entry)))
    }

    fn write_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error> {
        if index == self.index.len() {
            return self.insert_chunk(index, bytes);
        }
        let old = self.index.get(index)?;
        if bytes.len() > old.cbytes {
            return Err(Error::CompactionRequired);
        }
        let entry = IndexEntry::for_chunk(bytes, old.offset)?;
        let start = old.offset as usize;
        self.arena[start..start + bytes.len()].copy_from_slice(bytes);
        self.overwritten.push(start..start + bytes.len());
        self.index.replace(index, entry);
        self.garbage += old.cbytes - bytes.len();
        self.dirty = true;
        Ok(bytes.len())
    }

    fn insert_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error> {
        self.index.check_insert_index(index)?;
        let entry = self.push_payload(bytes)?;
        self.index.insert(index, entry);
        self.dirty = true;
        Ok(bytes.len())
    }

    fn rewrite_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error> {
        match self.write_chunk(index, bytes) {
            Err(Error::CompactionRequired) => {}
            res => return res,
        }
        let entry = self.push_payload(bytes)?;
        let old = self.index.replace(index, entry);
        self.garbage += old.cbytes;
        self.dirty = true;
        if self.garbage > self.arena.len() / 2 {
            self.compact()?;
        }
        Ok(bytes.len())
    }

    fn delete_chunk(&mut self, index: usize) -> Result<(), Error> {
        self.index.get(index)?;
        let old = self.index.remove(index);
        self.garbage += old.cbytes;
        self.dirty = true;
        Ok(())
    }

    fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut FrameMeta {
        self.dirty = true;
        &mut self.meta
    }

    fn compact(&mut self) -> Result<(), Error> {
        if self.garbage == 0 {
            return Ok(());
        }
        let mut arena = Vec::with_capacity(self.index.cbytes());
        let mut entries = Vec::with_capacity(self.index.len());
        for entry in self.index.entries() {
            entries.push(IndexEntry {
                offset: arena.len() as u64,
                ..*entry
            });
            arena.extend_from_slice(self.payload(entry));
        }
        log::debug!(
            "compacted contiguous frame, reclaimed {} bytes",
            self.arena.len() - arena.len()
        );
        self.arena = arena;
        self.index = FrameIndex::from_entries(entries);
        self.garbage = 0;
        self.overwritten.clear();
        if let Some(target) = &mut self.file {
            target.synced = None;
            self.dirty = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        let Some(target) = &self.file else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let synced = match target.synced {
            Some(synced) if synced.capacity >= self.index.len() => {
                self.flush_incremental(target, synced)?
            }
            _ => self.flush_full(target)?,
        };
        if let Some(target) = &mut self.file {
            target.synced = Some(synced);
        }
        self.overwritten.clear();
        self.dirty = false;
        Ok(())
    }

    fn remove(&mut self) -> Result<(), Error> {
        if let Some(target) = &self.file {
            if target.limit.is_some() {
                return Err(Error::config(format!(
                    "frame at offset {} of {} is followed by other data",
                    target.offset,
                    target.path.display()
                )));
            }
            if target.offset == 0 {
                std::fs::remove_file(&target.path)?;
            } else {
                OpenOptions::new()
                    .write(true)
                    .open(&target.path)?
                    .set_len(target.offset)?;
            }
            log::debug!("removed contiguous frame {}", target.path.display());
        }
        self.file = None;
        self.dirty = false;
        Ok(())
    }

    fn is_contiguous(&self) -> bool {
        true
    }

    fn urlpath(&self) -> Option<&Path> {
        self.file.as_ref().map(|t| t.path.as_path())
    }

    fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let payloads = self.index.entries().iter().map(|e| self.payload(e));
        Ok(super::encode_frame(
            &self.meta,
            self.index.entries(),
            Some(payloads),
        ))
    }
}
