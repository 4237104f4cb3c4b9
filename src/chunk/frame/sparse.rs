use std::borrow::Cow;
use std::path::{Path, PathBuf};

use super::{decode_frame, encode_frame, FrameIndex, FrameMeta, FrameStore, IndexEntry};
use crate::Error;

const META_FILE: &str = "frame.meta";

/// A frame stored as independent chunks, in memory or in a directory.
///
/// On disk, every chunk is stored in its own file named `{index:08X}.chunk`, and the frame header, index and trailer
/// are stored in a `frame.meta` file. The meta file is rewritten on every structural change, so a chunk update or
/// delete costs a single chunk write plus the renaming of the following chunk files.
#[derive(Debug)]
pub struct SparseFrame {
    meta: FrameMeta,
    index: FrameIndex,
    storage: Storage,
    dirty: bool,
}

#[derive(Debug)]
enum Storage {
    Memory(Vec<Vec<u8>>),
    Directory(PathBuf),
}

fn chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{index:08X}.chunk"))
}

impl SparseFrame {
    /// Create an empty in-memory frame.
    pub fn new(meta: FrameMeta) -> Self {
        Self {
            meta,
            index: FrameIndex::default(),
            storage: Storage::Memory(Vec::new()),
            dirty: false,
        }
    }

    /// Create an empty frame in a new directory.
    ///
    /// Fails if the directory already exists.
    pub fn create(dir: &Path, meta: FrameMeta) -> Result<Self, Error> {
        std::fs::create_dir(dir)?;
        let mut frame = Self {
            meta,
            index: FrameIndex::default(),
            storage: Storage::Directory(dir.to_path_buf()),
            dirty: true,
        };
        frame.write_meta()?;
        log::debug!("created sparse frame {}", dir.display());
        Ok(frame)
    }

    /// Open a frame stored in a directory.
    pub fn open(dir: &Path) -> Result<Self, Error> {
        let record = std::fs::read(dir.join(META_FILE))?;
        let decoded = decode_frame(&record)?;
        if decoded.contiguous {
            return Err(Error::corrupt_frame("meta record of a contiguous frame"));
        }
        for (i, entry) in decoded.entries.iter().enumerate() {
            let path = chunk_path(dir, i);
            let len = match std::fs::metadata(&path) {
                Ok(m) => m.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::corrupt_frame(format!("chunk file {} is missing", path.display())))
                }
                Err(e) => return Err(e.into()),
            };
            if len != entry.cbytes as u64 {
                return Err(Error::corrupt_frame(format!(
                    "chunk file {} has {} bytes, expected {}",
                    path.display(),
                    len,
                    entry.cbytes
                )));
            }
        }
        log::debug!(
            "opened sparse frame {}, {} chunks",
            dir.display(),
            decoded.entries.len()
        );
        Ok(Self {
            meta: decoded.meta,
            index: FrameIndex::from_entries(decoded.entries),
            storage: Storage::Directory(dir.to_path_buf()),
            dirty: false,
        })
    }

    /// Load an in-memory sparse frame from a serialized contiguous frame.
    pub fn from_frame(buf: &[u8]) -> Result<Self, Error> {
        let decoded = decode_frame(buf)?;
        if !decoded.contiguous {
            return Err(Error::corrupt_frame("not a contiguous frame"));
        }
        let mut chunks = Vec::with_capacity(decoded.entries.len());
        let mut entries = Vec::with_capacity(decoded.entries.len());
        for (i, entry) in decoded.entries.iter().enumerate() {
            let start = entry.offset as usize;
            let bytes = &buf[start..start + entry.cbytes];
            let actual = IndexEntry::for_chunk(bytes, 0)
                .map_err(|e| Error::corrupt_frame(format!("chunk {i}: {e}")))?;
            if (actual.nbytes, actual.special) != (entry.nbytes, entry.special) {
                return Err(Error::corrupt_frame(format!(
                    "chunk {i} does not match its index entry"
                )));
            }
            chunks.push(bytes.to_vec());
            entries.push(actual);
        }
        Ok(Self {
            meta: decoded.meta,
            index: FrameIndex::from_entries(entries),
            storage: Storage::Memory(chunks),
            dirty: false,
        })
    }

    fn write_meta(&mut self) -> Result<(), Error> {
        self.dirty = true;
        let Storage::Directory(dir) = &self.storage else {
            return Ok(());
        };
        let record = encode_frame(
            &self.meta,
            self.index.entries(),
            None::<std::iter::Empty<&[u8]>>,
        );
        let tmp = dir.join(format!("{META_FILE}.tmp"));
        std::fs::write(&tmp, record)?;
        std::fs::rename(&tmp, dir.join(META_FILE))?;
        self.dirty = false;
        Ok(())
    }
}

impl FrameStore for SparseFrame {
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
        self.index.get(index)?;
        Ok(match &self.storage {
            Storage::Memory(chunks) => Cow::Borrowed(chunks[index].as_slice()),
            Storage::Directory(dir) => Cow::Owned(std::fs::read(chunk_path(dir, index))?),
        })
    }

    fn write_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error> {
        if index == self.index.len() {
            return self.insert_chunk(index, bytes);
        }
        self.index.get(index)?;
        let entry = IndexEntry::for_chunk(bytes, 0)?;
        match &mut self.storage {
            Storage::Memory(chunks) => chunks[index] = bytes.to_vec(),
            Storage::Directory(dir) => std::fs::write(chunk_path(dir, index), bytes)?,
        }
        self.index.replace(index, entry);
        self.write_meta()?;
        Ok(bytes.len())
    }

    fn insert_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error> {
        self.index.check_insert_index(index)?;
        let entry = IndexEntry::for_chunk(bytes, 0)?;
        match &mut self.storage {
            Storage::Memory(chunks) => chunks.insert(index, bytes.to_vec()),
            Storage::Directory(dir) => {
                for i in (index..self.index.len()).rev() {
                    std::fs::rename(chunk_path(dir, i), chunk_path(dir, i + 1))?;
                }
                std::fs::write(chunk_path(dir, index), bytes)?;
            }
        }
        self.index.insert(index, entry);
        self.write_meta()?;
        Ok(bytes.len())
    }

    fn rewrite_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error> {
        self.write_chunk(index, bytes)
    }

    fn delete_chunk(&mut self, index: usize) -> Result<(), Error> {
        self.index.get(index)?;
        match &mut self.storage {
            Storage::Memory(chunks) => {
                chunks.remove(index);
            }
            Storage::Directory(dir) => {
                std::fs::remove_file(chunk_path(dir, index))?;
                for i in index + 1..self.index.len() {
                    std::fs::rename(chunk_path(dir, i), chunk_path(dir, i - 1))?;
                }
            }
        }
        self.index.remove(index);
        self.write_meta()
    }

    fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut FrameMeta {
        self.dirty = true;
        &mut self.meta
    }

    fn compact(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.dirty {
            self.write_meta()?;
            if let Storage::Directory(dir) = &self.storage {
                log::debug!("flushed sparse frame {}", dir.display());
            }
        }
        Ok(())
    }

    fn remove(&mut self) -> Result<(), Error> {
        if let Storage::Directory(dir) = &self.storage {
            std::fs::remove_dir_all(dir)?;
            log::debug!("removed sparse frame {}", dir.display());
            self.storage = Storage::Memory(Vec::new());
            self.index = FrameIndex::default();
        }
        self.dirty = false;
        Ok(())
    }

    fn is_contiguous(&self) -> bool {
        false
    }

    fn urlpath(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Memory(_) => None,
            Storage::Directory(dir) => Some(dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::{chunk_path, SparseFrame, META_FILE};
    use crate::chunk::frame::{FrameMeta, FrameStore};
    use crate::chunk::Encoder;
    use crate::{CParams, Error};

    fn rand_chunk(encoder: &mut Encoder, rand: &mut StdRng) -> Vec<u8> {
        let len = rand.random_range(1..100) * 8;
        let data = rand.random_iter().take(len).collect::<Vec<u8>>();
        encoder.compress(&data).unwrap().into_bytes().into_owned()
    }

    #[test]
    fn directory_layout() {
        let mut rand = StdRng::seed_from_u64(0x5ba);
        let mut encoder = Encoder::new(CParams::default()).unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().join("frame");
        let mut frame = SparseFrame::create(&dir, FrameMeta::new(&CParams::default(), 0)).unwrap();
        assert!(SparseFrame::create(&dir, FrameMeta::new(&CParams::default(), 0)).is_err());

        let mut expected = Vec::new();
        for i in 0..20 {
            let chunk = rand_chunk(&mut encoder, &mut rand);
            let idx = if i % 3 == 0 { 0 } else { expected.len() };
            frame.insert_chunk(idx, &chunk).unwrap();
            expected.insert(idx, chunk);
        }
        for idx in [0, 7, 17] {
            frame.delete_chunk(idx).unwrap();
            expected.remove(idx);
        }
        let chunk = rand_chunk(&mut encoder, &mut rand);
        frame.write_chunk(3, &chunk).unwrap();
        expected[3] = chunk;

        assert!(chunk_path(&dir, 16).exists());
        assert!(!chunk_path(&dir, 17).exists());
        assert_eq!(dir.join("0000000A.chunk"), chunk_path(&dir, 10));

        frame.meta_mut().vlmeta.insert("attr".to_string(), b"x".to_vec());
        frame.flush().unwrap();
        drop(frame);

        let reopened = SparseFrame::open(&dir).unwrap();
        assert_eq!(expected.len(), reopened.chunk_count());
        for (i, chunk) in expected.iter().enumerate() {
            assert_eq!(chunk.as_slice(), reopened.read_chunk(i).unwrap().as_ref());
        }
        assert_eq!(Some(&b"x".to_vec()), reopened.meta().vlmeta.get("attr"));
    }

    #[test]
    fn missing_chunk_file() {
        let mut rand = StdRng::seed_from_u64(0x5bb);
        let mut encoder = Encoder::new(CParams::default()).unwrap();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().join("frame");
        let mut frame = SparseFrame::create(&dir, FrameMeta::new(&CParams::default(), 0)).unwrap();
        for _ in 0..3 {
            let chunk = rand_chunk(&mut encoder, &mut rand);
            frame.write_chunk(frame.chunk_count(), &chunk).unwrap();
        }
        drop(frame);

        std::fs::write(chunk_path(&dir, 1), b"short").unwrap();
        assert!(matches!(SparseFrame::open(&dir), Err(Error::CorruptFrame(_))));
        std::fs::remove_file(chunk_path(&dir, 1)).unwrap();
        assert!(matches!(SparseFrame::open(&dir), Err(Error::CorruptFrame(_))));

        let mut record = std::fs::read(dir.join(META_FILE)).unwrap();
        record[30] ^= 0xff;
        std::fs::write(dir.join(META_FILE), record).unwrap();
        assert!(matches!(SparseFrame::open(&dir), Err(Error::CorruptFrame(_))));
    }

    #[test]
    fn to_frame_and_back() {
        let mut rand = StdRng::seed_from_u64(0x5bc);
        let mut encoder = Encoder::new(CParams::default()).unwrap();
        let mut frame = SparseFrame::new(FrameMeta::new(&CParams::default(), 0));
        let chunks = (0..8)
            .map(|_| rand_chunk(&mut encoder, &mut rand))
            .collect::<Vec<_>>();
        for chunk in &chunks {
            frame.write_chunk(frame.chunk_count(), chunk).unwrap();
        }
        assert!(matches!(frame.delete_chunk(8), Err(Error::ChunkNotFound { .. })));

        let serialized = frame.to_frame().unwrap();
        assert_eq!(0x1, serialized[5]);
        let loaded = SparseFrame::from_frame(&serialized).unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.as_slice(), loaded.read_chunk(i).unwrap().as_ref());
        }
        assert_eq!(frame.cbytes(), loaded.cbytes());
        assert_eq!(frame.nbytes(), loaded.nbytes());
    }
}
