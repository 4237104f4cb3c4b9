//! Frame stores, the persistence layer of [`SChunk`](crate::chunk::SChunk).
//!
//! A frame is the serialized form of a super chunk: a fixed header, an index of the chunks, the chunks payloads
//! and a trailer with the user metadata and a checksum. Two layouts are supported:
//! - [`ContiguousFrame`], the whole frame in a single buffer or file.
//! - [`SparseFrame`], a directory with one file per chunk and a `frame.meta` record holding everything but the
//!   payloads.
//!
//! Frame layout (little endian):
//! ```text
//! header  (80 bytes)
//!   [0..4]   magic "b2fr"   [4] version   [5] flags (bit 0 contiguous, bit 1 has vlmeta)
//!   [6] typesize  [7] codec  [8] codec meta  [9] clevel  [10] splitmode  [11] use_dict  [12] tuner
//!   [16..20] blocksize      [20..24] chunksize
//!   [24..32] nbytes         [32..40] cbytes           [40..48] nchunks
//!   [48..54] filters        [54..60] filters meta
//!   [60..64] index capacity [64..72] frame length
//! index   (capacity x 24 bytes): offset u64, cbytes u32, nbytes u32, special u8, padding
//!         the first nchunks entries are used, the rest are free slots for appends
//! payloads (contiguous frames only), possibly with gaps left by replaced chunks
//! trailer: vlmeta count u32, (name_len u16, name, blob_len u32, blob)*, xxh3(header + used index) u64
//! footer:  trailer offset u64
//! ```
//!
//! The frame length makes frames self-delimiting: a buffer or file may hold several frames back to back, and a
//! frame is opened at its offset.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use xxhash_rust::xxh3::Xxh3;

use crate::chunk::header::ChunkHeader;
use crate::constants as consts;
use crate::{CParams, Error, SplitMode, Tuner};

mod contiguous;
pub use contiguous::ContiguousFrame;

mod sparse;
pub use sparse::SparseFrame;

const MAGIC: &[u8; 4] = b"b2fr";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 80;
const INDEX_ENTRY_LEN: usize = 24;
const FOOTER_LEN: usize = 8;

const FLAG_CONTIGUOUS: u8 = 0x1;
const FLAG_VLMETA: u8 = 0x2;

/// The persistent metadata of a super chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMeta {
    /// The typesize of the items.
    pub typesize: u8,
    /// The codec id.
    pub codec: u8,
    /// The codec metadata byte.
    pub codec_meta: u8,
    /// The compression level.
    pub clevel: u8,
    /// The split mode code.
    pub splitmode: u8,
    /// Whether dictionaries are used.
    pub use_dict: bool,
    /// The tuner code.
    pub tuner: u8,
    /// The requested block size, 0 for automatic.
    pub blocksize: u32,
    /// The nominal size of the chunks, 0 until the first chunk is added.
    pub chunksize: usize,
    /// The filters pipeline.
    pub filters: [u8; consts::MAX_FILTERS],
    /// The metadata bytes of the filters pipeline.
    pub filters_meta: [u8; consts::MAX_FILTERS],
    /// User variable length metadata.
    pub vlmeta: BTreeMap<String, Vec<u8>>,
}
impl FrameMeta {
    pub(crate) fn new(cparams: &CParams, chunksize: usize) -> Self {
        Self {
            typesize: cparams.typesize as u8,
            codec: cparams.codec,
            codec_meta: cparams.codec_meta,
            clevel: cparams.clevel,
            splitmode: cparams.splitmode as u8,
            use_dict: cparams.use_dict,
            tuner: cparams.tuner as u8,
            blocksize: cparams.blocksize as u32,
            chunksize,
            filters: cparams.filters,
            filters_meta: cparams.filters_meta,
            vlmeta: BTreeMap::new(),
        }
    }

    /// Reconstruct the compression parameters stored in the frame.
    pub(crate) fn cparams(&self) -> Result<CParams, Error> {
        let mut cparams = CParams::default();
        cparams.typesize = self.typesize as usize;
        cparams.codec = self.codec;
        cparams.codec_meta = self.codec_meta;
        cparams.clevel = self.clevel;
        cparams.splitmode = SplitMode::from_code(self.splitmode)
            .ok_or_else(|| Error::corrupt_frame(format!("unknown split mode {}", self.splitmode)))?;
        cparams.use_dict = self.use_dict;
        cparams.tuner = Tuner::from_code(self.tuner)
            .ok_or_else(|| Error::corrupt_frame(format!("unknown tuner {}", self.tuner)))?;
        cparams.blocksize = self.blocksize as usize;
        cparams.filters = self.filters;
        cparams.filters_meta = self.filters_meta;
        cparams
            .validate()
            .map_err(|e| Error::corrupt_frame(format!("invalid parameters: {e}")))?;
        Ok(cparams)
    }
}

/// An entry of the frame index, describing a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset of the chunk payload, relative to the start of the frame (contiguous frames only).
    pub offset: u64,
    /// Compressed size of the chunk, header included.
    pub cbytes: usize,
    /// Uncompressed size of the chunk.
    pub nbytes: usize,
    /// The special kind of the chunk, see [`constants`](crate::constants).
    pub special: u8,
}
impl IndexEntry {
    /// Create an entry for a chunk, validating its header.
    pub(crate) fn for_chunk(bytes: &[u8], offset: u64) -> Result<Self, Error> {
        let header = ChunkHeader::read(bytes)?;
        if header.cbytes != bytes.len() {
            return Err(Error::corrupt_chunk(format!(
                "chunk of {} bytes declares cbytes {}",
                bytes.len(),
                header.cbytes
            )));
        }
        Ok(Self {
            offset,
            cbytes: header.cbytes,
            nbytes: header.nbytes,
            special: header.special(),
        })
    }
}

/// The chunks index with running totals.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameIndex {
    entries: Vec<IndexEntry>,
    nbytes: usize,
    cbytes: usize,
}
impl FrameIndex {
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let nbytes = entries.iter().map(|e| e.nbytes).sum();
        let cbytes = entries.iter().map(|e| e.cbytes).sum();
        Self {
            entries,
            nbytes,
            cbytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }
    pub fn cbytes(&self) -> usize {
        self.cbytes
    }

    pub fn get(&self, index: usize) -> Result<IndexEntry, Error> {
        self.entries
            .get(index)
            .copied()
            .ok_or_else(|| self.not_found(index))
    }

    pub fn not_found(&self, index: usize) -> Error {
        crate::trace!("chunk {} not found, {} chunks", index, self.entries.len());
        Error::ChunkNotFound {
            index,
            nchunks: self.entries.len(),
        }
    }

    pub fn check_insert_index(&self, index: usize) -> Result<(), Error> {
        if index > self.entries.len() {
            return Err(self.not_found(index));
        }
        Ok(())
    }

    pub fn insert(&mut self, index: usize, entry: IndexEntry) {
        self.nbytes += entry.nbytes;
        self.cbytes += entry.cbytes;
        self.entries.insert(index, entry);
    }

    pub fn replace(&mut self, index: usize, entry: IndexEntry) -> IndexEntry {
        let old = std::mem::replace(&mut self.entries[index], entry);
        self.nbytes = self.nbytes - old.nbytes + entry.nbytes;
        self.cbytes = self.cbytes - old.cbytes + entry.cbytes;
        old
    }

    pub fn remove(&mut self, index: usize) -> IndexEntry {
        let old = self.entries.remove(index);
        self.nbytes -= old.nbytes;
        self.cbytes -= old.cbytes;
        old
    }
}

/// A storage backend of a super chunk.
///
/// A store owns the compressed chunks and the frame metadata, and is responsible for their persistence.
/// Implementations exist for contiguous frames ([`ContiguousFrame`]) and sparse frames ([`SparseFrame`]), both
/// either in memory or on disk.
pub trait FrameStore: Send {
    /// The number of chunks in the store.
    fn chunk_count(&self) -> usize;

    /// The index entry of a chunk.
    fn entry(&self, index: usize) -> Result<IndexEntry, Error>;

    /// The total uncompressed size of the chunks.
    fn nbytes(&self) -> usize;

    /// The total compressed size of the chunks.
    fn cbytes(&self) -> usize;

    /// Read the compressed bytes of a chunk.
    fn read_chunk(&self, index: usize) -> Result<Cow<'_, [u8]>, Error>;

    /// Write a chunk at the given index, appending if `index == chunk_count()`.
    ///
    /// Returns the stored size of the chunk. Overwriting a chunk may fail with [`Error::CompactionRequired`] if the
    /// store can not replace it in place, in which case [`Self::rewrite_chunk`] should be used.
    fn write_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error>;

    /// Insert a chunk at the given index, shifting the following chunks.
    fn insert_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error>;

    /// Replace a chunk, rewriting the store layout if needed.
    fn rewrite_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<usize, Error>;

    /// Delete a chunk, shifting the following chunks.
    fn delete_chunk(&mut self, index: usize) -> Result<(), Error>;

    /// The frame metadata.
    fn meta(&self) -> &FrameMeta;

    /// The frame metadata, for modification.
    ///
    /// Modifications are persisted on the next structural change or [`Self::flush`].
    fn meta_mut(&mut self) -> &mut FrameMeta;

    /// Reclaim the space of deleted or shrunk chunks.
    fn compact(&mut self) -> Result<(), Error>;

    /// Persist all pending modifications.
    fn flush(&mut self) -> Result<(), Error>;

    /// Flush and release the store.
    fn close(&mut self) -> Result<(), Error> {
        self.flush()
    }

    /// Remove the persistent storage of the store, if any.
    fn remove(&mut self) -> Result<(), Error>;

    /// Whether the store is a contiguous frame.
    fn is_contiguous(&self) -> bool;

    /// The path of the persistent storage, if any.
    fn urlpath(&self) -> Option<&Path>;

    /// Serialize the store as a contiguous frame.
    fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let mut payloads = Vec::with_capacity(self.chunk_count());
        for i in 0..self.chunk_count() {
            payloads.push(self.read_chunk(i)?);
        }
        let entries = (0..self.chunk_count())
            .map(|i| self.entry(i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(encode_frame(
            self.meta(),
            &entries,
            Some(payloads.iter().map(|p| p.as_ref())),
        ))
    }
}

/// Encode a frame.
///
/// If `payloads` is `None`, a meta record is produced: the index offsets are zero and no payloads are written.
pub(crate) fn encode_frame<'p>(
    meta: &FrameMeta,
    entries: &[IndexEntry],
    payloads: Option<impl Iterator<Item = &'p [u8]>>,
) -> Vec<u8> {
    let contiguous = payloads.is_some();
    let data_start = data_start(entries.len());
    let mut offset = data_start as u64;
    let entries = entries
        .iter()
        .map(|entry| {
            let entry_offset = if contiguous { offset } else { 0 };
            offset += entry.cbytes as u64;
            IndexEntry {
                offset: entry_offset,
                ..*entry
            }
        })
        .collect::<Vec<_>>();
    let data_end = if contiguous {
        offset as usize
    } else {
        data_start
    };

    let parts = FrameParts::new(meta, &entries, contiguous, entries.len(), data_end);
    let mut buf = Vec::with_capacity(parts.len as usize);
    buf.extend_from_slice(&parts.header);
    buf.extend_from_slice(&parts.index);
    if let Some(payloads) = payloads {
        for payload in payloads {
            buf.extend_from_slice(payload);
        }
    }
    debug_assert_eq!(data_end, buf.len());
    buf.extend_from_slice(&parts.trailer);
    buf
}

/// The start of the payloads in a frame whose index has room for `capacity` entries.
pub(crate) fn data_start(capacity: usize) -> usize {
    HEADER_LEN + capacity * INDEX_ENTRY_LEN
}

/// The serialized parts of a frame surrounding the payloads.
pub(crate) struct FrameParts {
    /// The frame header.
    pub header: Vec<u8>,
    /// The index region, with room for `capacity` entries. Unused slots are zeroed.
    pub index: Vec<u8>,
    /// The trailer and the footer.
    pub trailer: Vec<u8>,
    /// The total length of the frame.
    pub len: u64,
}
impl FrameParts {
    /// Serialize the parts of a frame whose payloads end (and trailer starts) at `data_end`.
    ///
    /// The entries offsets are relative to the start of the frame.
    pub fn new(
        meta: &FrameMeta,
        entries: &[IndexEntry],
        contiguous: bool,
        capacity: usize,
        data_end: usize,
    ) -> Self {
        debug_assert!(capacity >= entries.len());
        debug_assert!(data_end >= data_start(capacity));
        let nchunks = entries.len();
        let nbytes = entries.iter().map(|e| e.nbytes as u64).sum::<u64>();
        let cbytes = entries.iter().map(|e| e.cbytes as u64).sum::<u64>();
        let trailer_len = 4
            + meta
                .vlmeta
                .iter()
                .map(|(name, blob)| 2 + name.len() + 4 + blob.len())
                .sum::<usize>()
            + 8
            + FOOTER_LEN;
        let len = (data_end + trailer_len) as u64;

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.push(VERSION);
        let mut flags = 0;
        if contiguous {
            flags |= FLAG_CONTIGUOUS;
        }
        if !meta.vlmeta.is_empty() {
            flags |= FLAG_VLMETA;
        }
        header.push(flags);
        header.extend_from_slice(&[
            meta.typesize,
            meta.codec,
            meta.codec_meta,
            meta.clevel,
            meta.splitmode,
            meta.use_dict as u8,
            meta.tuner,
            0,
            0,
            0,
        ]);
        header.extend_from_slice(&meta.blocksize.to_le_bytes());
        header.extend_from_slice(&(meta.chunksize as u32).to_le_bytes());
        header.extend_from_slice(&nbytes.to_le_bytes());
        header.extend_from_slice(&cbytes.to_le_bytes());
        header.extend_from_slice(&(nchunks as u64).to_le_bytes());
        header.extend_from_slice(&meta.filters);
        header.extend_from_slice(&meta.filters_meta);
        header.extend_from_slice(&(capacity as u32).to_le_bytes());
        header.extend_from_slice(&len.to_le_bytes());
        header.extend_from_slice(&[0; 8]);
        debug_assert_eq!(HEADER_LEN, header.len());

        let mut index = Vec::with_capacity(capacity * INDEX_ENTRY_LEN);
        for entry in entries {
            index.extend_from_slice(&entry.offset.to_le_bytes());
            index.extend_from_slice(&(entry.cbytes as u32).to_le_bytes());
            index.extend_from_slice(&(entry.nbytes as u32).to_le_bytes());
            index.push(entry.special);
            index.extend_from_slice(&[0; 7]);
        }
        let mut hasher = Xxh3::new();
        hasher.update(&header);
        hasher.update(&index);
        let checksum = hasher.digest();
        index.resize(capacity * INDEX_ENTRY_LEN, 0);

        let mut trailer = Vec::with_capacity(trailer_len);
        trailer.extend_from_slice(&(meta.vlmeta.len() as u32).to_le_bytes());
        for (name, blob) in &meta.vlmeta {
            trailer.extend_from_slice(&(name.len() as u16).to_le_bytes());
            trailer.extend_from_slice(name.as_bytes());
            trailer.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            trailer.extend_from_slice(blob);
        }
        trailer.extend_from_slice(&checksum.to_le_bytes());
        trailer.extend_from_slice(&(data_end as u64).to_le_bytes());
        debug_assert_eq!(trailer_len, trailer.len());

        Self {
            header,
            index,
            trailer,
            len,
        }
    }
}

/// Read the total length of a frame from its header.
pub(crate) fn frame_len(header: &[u8]) -> Result<u64, Error> {
    if header.len() < HEADER_LEN {
        return Err(Error::corrupt_frame(format!(
            "header of {} bytes is too short",
            header.len()
        )));
    }
    if &header[0..4] != MAGIC {
        return Err(Error::corrupt_frame("bad magic"));
    }
    if header[4] != VERSION {
        return Err(Error::corrupt_frame(format!(
            "unsupported version {}",
            header[4]
        )));
    }
    let len = Reader {
        buf: header,
        pos: 64,
    }
    .u64()?;
    if len < (HEADER_LEN + FOOTER_LEN) as u64 {
        return Err(Error::corrupt_frame(format!("frame length {len} is too short")));
    }
    Ok(len)
}

/// A decoded and validated frame.
#[derive(Debug)]
pub(crate) struct DecodedFrame {
    pub meta: FrameMeta,
    pub entries: Vec<IndexEntry>,
    pub contiguous: bool,
    /// The number of entries the index region has room for.
    pub capacity: usize,
    /// The end of the payloads, where the trailer starts.
    pub data_end: usize,
    /// The total length of the frame.
    pub len: u64,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}
impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::corrupt_frame("unexpected end of frame"))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }
    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn u64(&mut self) -> Result<u64, Error> {
        let b = self.bytes(8)?;
        let mut arr = [0; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }
}

/// Decode and validate a frame, either contiguous or a sparse meta record.
///
/// The buffer may continue past the end of the frame.
pub(crate) fn decode_frame(buf: &[u8]) -> Result<DecodedFrame, Error> {
    let len = frame_len(buf)?;
    let buf = usize::try_from(len)
        .ok()
        .and_then(|len| buf.get(..len))
        .ok_or_else(|| {
            Error::corrupt_frame(format!(
                "frame of {len} bytes exceeds the buffer of {} bytes",
                buf.len()
            ))
        })?;
    let flags = buf[5];
    let contiguous = flags & FLAG_CONTIGUOUS != 0;

    let mut r = Reader { buf, pos: 16 };
    let blocksize = r.u32()?;
    let chunksize = r.u32()? as usize;
    let nbytes = r.u64()?;
    let cbytes = r.u64()?;
    let nchunks = r.u64()?;
    let mut filters = [0; consts::MAX_FILTERS];
    filters.copy_from_slice(r.bytes(consts::MAX_FILTERS)?);
    let mut filters_meta = [0; consts::MAX_FILTERS];
    filters_meta.copy_from_slice(r.bytes(consts::MAX_FILTERS)?);
    let capacity = r.u32()? as usize;
    r.pos = HEADER_LEN;

    let footer_pos = buf.len() - FOOTER_LEN;
    let trailer_offset = Reader {
        buf,
        pos: footer_pos,
    }
    .u64()?;
    let nchunks = usize::try_from(nchunks)
        .ok()
        .filter(|n| *n <= capacity)
        .ok_or_else(|| {
            Error::corrupt_frame(format!(
                "{nchunks} chunks exceed the index capacity {capacity}"
            ))
        })?;
    let index_end = capacity
        .checked_mul(INDEX_ENTRY_LEN)
        .and_then(|len| len.checked_add(HEADER_LEN))
        .filter(|end| *end <= footer_pos)
        .ok_or_else(|| Error::corrupt_frame(format!("index of {capacity} entries out of range")))?;
    let trailer_offset = usize::try_from(trailer_offset)
        .ok()
        .filter(|off| (index_end..=footer_pos).contains(off))
        .ok_or_else(|| Error::corrupt_frame(format!("trailer offset {trailer_offset} out of range")))?;

    let entries_end = HEADER_LEN + nchunks * INDEX_ENTRY_LEN;
    let mut entries = Vec::with_capacity(nchunks);
    while r.pos < entries_end {
        let offset = r.u64()?;
        let entry_cbytes = r.u32()? as usize;
        let entry_nbytes = r.u32()? as usize;
        let special = r.bytes(8)?[0];
        entries.push(IndexEntry {
            offset,
            cbytes: entry_cbytes,
            nbytes: entry_nbytes,
            special,
        });
    }
    let checksum = xxhash_rust::xxh3::xxh3_64(&buf[..entries_end]);

    let mut r = Reader {
        buf: &buf[..footer_pos],
        pos: trailer_offset,
    };
    let mut vlmeta = BTreeMap::new();
    for _ in 0..r.u32()? {
        let name_len = r.u16()? as usize;
        let name = std::str::from_utf8(r.bytes(name_len)?)
            .map_err(|_| Error::corrupt_frame("vlmeta name is not utf8"))?
            .to_string();
        let blob_len = r.u32()? as usize;
        vlmeta.insert(name, r.bytes(blob_len)?.to_vec());
    }
    if r.u64()? != checksum {
        return Err(Error::corrupt_frame("checksum mismatch"));
    }
    if r.pos != footer_pos {
        return Err(Error::corrupt_frame("trailing bytes after the trailer"));
    }

    if entries.iter().map(|e| e.nbytes as u64).sum::<u64>() != nbytes
        || entries.iter().map(|e| e.cbytes as u64).sum::<u64>() != cbytes
    {
        return Err(Error::corrupt_frame("index totals do not match the header"));
    }
    for (i, entry) in entries.iter().enumerate() {
        if entry.cbytes < consts::CHUNK_HEADER_LEN {
            return Err(Error::corrupt_frame(format!("chunk {i} is too small")));
        }
        if !contiguous {
            continue;
        }
        let start = usize::try_from(entry.offset).unwrap_or(usize::MAX);
        if start < index_end
            || start
                .checked_add(entry.cbytes)
                .map_or(true, |end| end > trailer_offset)
        {
            return Err(Error::corrupt_frame(format!("chunk {i} out of range")));
        }
        if &buf[start..start + 2] != crate::chunk::header::MAGIC {
            return Err(Error::corrupt_frame(format!("chunk {i} has a bad magic")));
        }
    }

    let meta = FrameMeta {
        typesize: buf[6],
        codec: buf[7],
        codec_meta: buf[8],
        clevel: buf[9],
        splitmode: buf[10],
        use_dict: buf[11] != 0,
        tuner: buf[12],
        blocksize,
        chunksize,
        filters,
        filters_meta,
        vlmeta,
    };
    Ok(DecodedFrame {
        meta,
        entries,
        contiguous,
        capacity,
        data_end: trailer_offset,
        len,
    })
}

#[cfg(test)]
mod tests {
    use super::{data_start, decode_frame, encode_frame, FrameMeta, FrameParts, IndexEntry};
    use crate::chunk::Encoder;
    use crate::{CParams, Error};

    fn sample() -> (FrameMeta, Vec<Vec<u8>>) {
        let mut cparams = CParams::default();
        cparams.typesize(4).unwrap();
        let mut encoder = Encoder::new(cparams.clone()).unwrap();
        let chunks = (0..5u32)
            .map(|c| {
                let data = (0..1000u32).flat_map(|i| (i * c).to_ne_bytes()).collect::<Vec<u8>>();
                encoder.compress(&data).unwrap().into_bytes().into_owned()
            })
            .collect::<Vec<_>>();
        let mut meta = FrameMeta::new(&cparams, 4000);
        meta.vlmeta.insert("name".to_string(), b"value".to_vec());
        (meta, chunks)
    }

    fn encode(meta: &FrameMeta, chunks: &[Vec<u8>]) -> Vec<u8> {
        let entries = chunks
            .iter()
            .map(|c| IndexEntry::for_chunk(c, 0).unwrap())
            .collect::<Vec<_>>();
        encode_frame(meta, &entries, Some(chunks.iter().map(|c| c.as_slice())))
    }

    #[test]
    fn layout() {
        let (meta, chunks) = sample();
        let frame = encode(&meta, &chunks);
        assert_eq!(b"b2fr", &frame[0..4]);
        assert_eq!(1, frame[4]);
        assert_eq!(0x3, frame[5]);
        assert_eq!(4, frame[6]);
        assert_eq!(4000u32.to_le_bytes(), frame[20..24]);
        assert_eq!(5u64.to_le_bytes(), frame[40..48]);
        assert_eq!(5u32.to_le_bytes(), frame[60..64]);
        assert_eq!((frame.len() as u64).to_le_bytes(), frame[64..72]);
        // first chunk right after the index
        assert_eq!((80u64 + 5 * 24).to_le_bytes(), frame[80..88]);
        assert_eq!(b"b2", &frame[80 + 5 * 24..80 + 5 * 24 + 2]);

        let decoded = decode_frame(&frame).unwrap();
        assert!(decoded.contiguous);
        assert_eq!(meta, decoded.meta);
        assert_eq!(5, decoded.entries.len());
        for (entry, chunk) in decoded.entries.iter().zip(&chunks) {
            let start = entry.offset as usize;
            assert_eq!(chunk.as_slice(), &frame[start..start + entry.cbytes]);
        }
    }

    #[test]
    fn meta_record() {
        let (meta, chunks) = sample();
        let entries = chunks
            .iter()
            .map(|c| IndexEntry::for_chunk(c, 0).unwrap())
            .collect::<Vec<_>>();
        let record = encode_frame(&meta, &entries, None::<std::iter::Empty<&[u8]>>);
        assert_eq!(0x2, record[5]);
        let decoded = decode_frame(&record).unwrap();
        assert!(!decoded.contiguous);
        assert_eq!(entries, decoded.entries);
        assert_eq!(meta, decoded.meta);
    }

    #[test]
    fn corruption_is_detected() {
        let (meta, chunks) = sample();
        let frame = encode(&meta, &chunks);

        let corrupt = |f: &dyn Fn(&mut Vec<u8>)| {
            let mut frame = frame.clone();
            f(&mut frame);
            decode_frame(&frame)
        };
        assert!(matches!(corrupt(&|f| f[0] = b'x'), Err(Error::CorruptFrame(_))));
        assert!(matches!(corrupt(&|f| f[4] = 2), Err(Error::CorruptFrame(_))));
        // nbytes in the header, caught by the checksum
        assert!(matches!(corrupt(&|f| f[24] ^= 1), Err(Error::CorruptFrame(_))));
        // chunk offset in the index
        assert!(matches!(corrupt(&|f| f[80] ^= 0x40), Err(Error::CorruptFrame(_))));
        // frame length past the end of the buffer
        assert!(matches!(corrupt(&|f| f[70] ^= 1), Err(Error::CorruptFrame(_))));
        // index capacity smaller than the number of chunks
        assert!(matches!(corrupt(&|f| f[60] = 4), Err(Error::CorruptFrame(_))));
        assert!(matches!(corrupt(&|f| f.truncate(f.len() - 3)), Err(Error::CorruptFrame(_))));
        assert!(matches!(
            corrupt(&|f| {
                let len = f.len();
                f[len - 8..].copy_from_slice(&u64::MAX.to_le_bytes());
            }),
            Err(Error::CorruptFrame(_))
        ));
        assert!(matches!(decode_frame(&[]), Err(Error::CorruptFrame(_))));
    }

    #[test]
    fn frames_back_to_back() {
        let (meta, chunks) = sample();
        let first = encode(&meta, &chunks[..2]);
        let second = encode(&FrameMeta::new(&CParams::default(), 0), &[]);
        let mut buf = first.clone();
        buf.extend_from_slice(&second);
        buf.extend_from_slice(b"unrelated bytes");

        let decoded = decode_frame(&buf).unwrap();
        assert_eq!(first.len() as u64, decoded.len);
        assert_eq!(2, decoded.entries.len());
        assert_eq!(meta, decoded.meta);

        let decoded = decode_frame(&buf[first.len()..]).unwrap();
        assert_eq!(second.len() as u64, decoded.len);
        assert!(decoded.entries.is_empty());
        assert!(decoded.meta.vlmeta.is_empty());

        assert!(matches!(
            decode_frame(&first[..first.len() - 1]),
            Err(Error::CorruptFrame(_))
        ));
    }

    #[test]
    fn index_with_free_slots() {
        let (meta, chunks) = sample();
        let capacity = 16;
        let mut offset = data_start(capacity);
        let mut payloads = Vec::new();
        let mut entries = Vec::new();
        for chunk in &chunks {
            // leave a gap before every chunk
            payloads.extend_from_slice(&[0xaa; 10]);
            offset += 10;
            entries.push(IndexEntry::for_chunk(chunk, offset as u64).unwrap());
            payloads.extend_from_slice(chunk);
            offset += chunk.len();
        }
        let parts = FrameParts::new(&meta, &entries, true, capacity, offset);
        assert_eq!(capacity * 24, parts.index.len());
        let mut frame = [parts.header, parts.index, payloads, parts.trailer].concat();
        assert_eq!(parts.len, frame.len() as u64);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(capacity, decoded.capacity);
        assert_eq!(offset, decoded.data_end);
        assert_eq!(entries, decoded.entries);
        for (entry, chunk) in decoded.entries.iter().zip(&chunks) {
            let start = entry.offset as usize;
            assert_eq!(chunk.as_slice(), &frame[start..start + entry.cbytes]);
        }

        // free slots are not covered by the checksum
        let free_slot = 80 + chunks.len() * 24;
        frame[free_slot] = 0xff;
        assert!(decode_frame(&frame).is_ok());
        frame[80] ^= 1;
        assert!(matches!(decode_frame(&frame), Err(Error::CorruptFrame(_))));
    }

    #[test]
    fn cparams_from_meta() {
        let (meta, _) = sample();
        let cparams = meta.cparams().unwrap();
        assert_eq!(4, cparams.get_typesize());
        let mut bad = meta.clone();
        bad.splitmode = 77;
        assert!(matches!(bad.cparams(), Err(Error::CorruptFrame(_))));
    }
}
