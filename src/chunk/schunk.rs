use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::frame::{ContiguousFrame, FrameMeta, FrameStore, SparseFrame};
use crate::chunk::{Chunk, Decoder, Encoder, RepeatedValue};
use crate::{CParams, DParams, Error, Registry};

/// A super chunk (SChunk) is a collection of compressed chunks that are treated as a single entity.
///
/// It can be stored in memory or on disk, and support inserting, updating, deleting and appending
/// chunks or data to it. It support random access to either chunks or items in the chunks, by
/// decompressing only the relevant chunks or items.
///
/// All chunks of a super chunk have the same uncompressed size, the chunk size, which is set by the first chunk
/// added to it. Only the last chunk may be shorter.
///
/// An on-disk super chunk persists pending modifications when it is dropped, but errors at that point can only be
/// logged. Call [`Self::flush`] (or [`Self::remove`]) before dropping it to observe them.
///
/// ```rust
/// use superchunk::{CParams, DParams};
/// use superchunk::chunk::{SChunk, Encoder};
///
/// let i32len = std::mem::size_of::<i32>();
/// let cparams = CParams::default()
///     .typesize(i32len)
///     .unwrap()
///     .clone();
/// let mut schunk = SChunk::new(cparams.clone(), DParams::default()).unwrap();
///
/// // Create two data arrays
/// let data1: [i32; 7] = [1, 2, 3, 4, 5, 6, 7];
/// let data2: [i32; 7] = [8, 9, 10, 11, 12, 13, 14];
/// let data1_bytes = data1.iter().flat_map(|x| x.to_ne_bytes()).collect::<Vec<u8>>();
/// let data2_bytes = data2.iter().flat_map(|x| x.to_ne_bytes()).collect::<Vec<u8>>();
///
/// // Append the first data array to the SChunk, which will be compressed using SChunk's CParams
/// schunk.append(&data1_bytes).unwrap();
/// assert_eq!(schunk.num_chunks(), 1);
/// assert_eq!(7, schunk.items_num());
///
/// // Append the second data array to the SChunk, as already compressed data
/// let data2_cparams = CParams::default()
///     .typesize(i32len) // typesize must match the SChunk's CParams
///     .unwrap()
///     .clevel(9)
///     .clone();
/// let data2_chunk = Encoder::new(data2_cparams)
///     .unwrap()
///     .compress(&data2_bytes)
///     .unwrap();
/// schunk.append_chunk(data2_chunk.shallow_clone()).unwrap();
/// assert_eq!(schunk.num_chunks(), 2);
/// assert_eq!(14, schunk.items_num());
///
/// // Random access a whole chunk within the super-chunk
/// assert_eq!(
///     data2_chunk.decompress().unwrap(),
///     schunk.get_chunk(1).unwrap().decompress().unwrap()
/// );
///
/// // Random access individual items within the super-chunk
/// assert_eq!(5, i32::from_ne_bytes(schunk.item(4).unwrap().try_into().unwrap()));
/// assert_eq!(12, i32::from_ne_bytes(schunk.item(11).unwrap().try_into().unwrap()));
/// ```
pub struct SChunk {
    store: Box<dyn FrameStore>,
    encoder: Encoder,
    decoder: Decoder,
}
impl SChunk {
    /// Create a new in-memory super chunk.
    ///
    /// The created super chunk will not be contiguous. See [`Self::new_at`] for more details.
    pub fn new(cparams: CParams, dparams: DParams) -> Result<Self, Error> {
        Self::new_at(SChunkStorageParams::in_memory(), cparams, dparams)
    }

    /// Create a new on-disk super chunk at the given path.
    ///
    /// The created super chunk will not be contiguous. See [`Self::new_at`] for more details.
    pub fn new_on_disk(urlpath: &Path, cparams: CParams, dparams: DParams) -> Result<Self, Error> {
        Self::new_at(SChunkStorageParams::on_disk(urlpath), cparams, dparams)
    }

    /// Create a new super chunk with the specified parameters.
    ///
    /// # Arguments
    ///
    /// * `storage` - parameters specifying the storage location and layout of the super chunk.
    ///   See [`SChunkStorageParams`].
    /// * `cparams` - Compression parameters used to compress new chunks added to the super chunk.
    /// * `dparams` - Decompression parameters used to decompress chunks from the super chunk.
    pub fn new_at(
        storage: SChunkStorageParams,
        cparams: CParams,
        dparams: DParams,
    ) -> Result<Self, Error> {
        Self::with_registry(storage, cparams, dparams, Registry::global().clone())
    }

    /// Create a new super chunk that resolves codecs and filters in the given registry.
    pub fn with_registry(
        storage: SChunkStorageParams,
        cparams: CParams,
        dparams: DParams,
        registry: Arc<Registry>,
    ) -> Result<Self, Error> {
        let encoder = Encoder::with_registry(cparams.clone(), registry.clone())?;
        let decoder = Decoder::with_registry(dparams, registry)?;
        let meta = FrameMeta::new(&cparams, 0);
        let store: Box<dyn FrameStore> = match (storage.contiguous, storage.urlpath) {
            (true, None) => Box::new(ContiguousFrame::new(meta)),
            (true, Some(path)) => Box::new(ContiguousFrame::create(path, 0, meta)?),
            (false, None) => Box::new(SparseFrame::new(meta)),
            (false, Some(path)) => Box::new(SparseFrame::create(path, meta)?),
        };
        Ok(Self {
            store,
            encoder,
            decoder,
        })
    }

    /// Open an existing super chunk from the specified path.
    ///
    /// A directory is opened as a sparse frame, and a file as a contiguous frame. The same path must not be opened
    /// for writing by more than one super chunk at a time.
    pub fn open(urlpath: &Path) -> Result<Self, Error> {
        Self::open_with_options(urlpath, &SChunkOpenOptions::default())
    }

    /// Open an existing super chunk from the given options.
    pub fn open_with_options(urlpath: &Path, options: &SChunkOpenOptions) -> Result<Self, Error> {
        let store: Box<dyn FrameStore> = if urlpath.is_dir() {
            if options.offset != 0 {
                return Err(Error::config("an offset is not supported for sparse frames"));
            }
            Box::new(SparseFrame::open(urlpath)?)
        } else {
            Box::new(ContiguousFrame::open(urlpath, options.offset)?)
        };
        Self::from_store(store, options)
    }

    /// Create an in-memory super chunk from a serialized contiguous frame.
    pub fn from_buffer(buffer: &[u8]) -> Result<Self, Error> {
        Self::from_buffer_with_options(buffer, &SChunkOpenOptions::default())
    }

    /// Create an in-memory super chunk from a serialized contiguous frame, starting at the options offset.
    pub fn from_buffer_with_options(buffer: &[u8], options: &SChunkOpenOptions) -> Result<Self, Error> {
        let offset = usize::try_from(options.offset)
            .ok()
            .filter(|offset| *offset <= buffer.len())
            .ok_or_else(|| Error::config(format!("offset {} out of the buffer", options.offset)))?;
        let store = ContiguousFrame::from_frame(&buffer[offset..])?;
        Self::from_store(Box::new(store), options)
    }

    /// Same as [`Self::from_buffer`].
    pub fn from_frame(frame: &[u8]) -> Result<Self, Error> {
        Self::from_buffer(frame)
    }

    fn from_store(store: Box<dyn FrameStore>, options: &SChunkOpenOptions) -> Result<Self, Error> {
        let meta = store.meta();
        let cparams = meta.cparams()?;
        let nchunks = store.chunk_count();
        for i in 0..nchunks {
            let nbytes = store.entry(i)?.nbytes;
            let valid = if i + 1 < nchunks {
                nbytes == meta.chunksize
            } else {
                nbytes > 0 && nbytes <= meta.chunksize
            };
            if !valid {
                return Err(Error::corrupt_frame(format!(
                    "chunk {} of {} bytes does not match the chunk size {}",
                    i, nbytes, meta.chunksize
                )));
            }
        }

        let registry = options
            .registry
            .clone()
            .unwrap_or_else(|| Registry::global().clone());
        let encoder = Encoder::with_registry(cparams, registry.clone())?;
        let decoder = Decoder::with_registry(options.dparams.clone(), registry)?;
        Ok(Self {
            store,
            encoder,
            decoder,
        })
    }

    /// Serialize the super chunk to an in-memory contiguous frame.
    pub fn to_buffer(&self) -> Result<Vec<u8>, Error> {
        self.store.to_frame()
    }

    /// Same as [`Self::to_buffer`].
    pub fn to_contiguous_frame(&self) -> Result<Vec<u8>, Error> {
        self.to_buffer()
    }

    /// Serialize the super chunk to a file, as a contiguous frame.
    ///
    /// # Arguments
    ///
    /// * `urlpath` - The path to the file where the super chunk will be saved.
    /// * `append` - If true, the super chunk will be appended to the file, and it should be opened later with the
    ///   offset of the file length before the append. If false, the file should not exist, otherwise an error will
    ///   be returned.
    pub fn to_file(&self, urlpath: &Path, append: bool) -> Result<(), Error> {
        let frame = self.to_buffer()?;
        let mut file = if append {
            OpenOptions::new().append(true).create(true).open(urlpath)?
        } else {
            OpenOptions::new().write(true).create_new(true).open(urlpath)?
        };
        file.write_all(&frame)?;
        file.sync_all()?;
        log::debug!("wrote super chunk frame of {} bytes to {}", frame.len(), urlpath.display());
        Ok(())
    }

    /// Append (uncompressed) data to the super chunk as a new chunk.
    ///
    /// The data will be compressed using the compression parameters of the super chunk.
    ///
    /// # Returns
    ///
    /// The number of chunks in the super chunk after the append.
    pub fn append(&mut self, items: &[u8]) -> Result<usize, Error> {
        let index = self.num_chunks();
        self.check_chunk_size(index, items.len(), false)?;
        let bytes = self.encoder.compress_impl(items, Some(index))?;
        self.store.write_chunk(index, &bytes)?;
        self.set_chunksize(items.len());
        Ok(self.num_chunks())
    }

    /// Append a compressed chunk to the super chunk.
    ///
    /// # Returns
    ///
    /// The number of chunks in the super chunk after the append.
    pub fn append_chunk(&mut self, chunk: Chunk) -> Result<usize, Error> {
        let index = self.num_chunks();
        self.check_chunk(index, &chunk, false)?;
        self.store.write_chunk(index, chunk.as_bytes())?;
        self.set_chunksize(chunk.nbytes());
        Ok(self.num_chunks())
    }

    /// Insert (uncompressed) data as a new chunk at the specified index.
    pub fn insert(&mut self, index: usize, items: &[u8]) -> Result<(), Error> {
        self.check_chunk_size(index, items.len(), false)?;
        let bytes = self.encoder.compress_impl(items, Some(index))?;
        self.store.insert_chunk(index, &bytes)?;
        self.set_chunksize(items.len());
        Ok(())
    }

    /// Insert a compressed chunk at the specified index.
    pub fn insert_chunk(&mut self, index: usize, chunk: Chunk) -> Result<(), Error> {
        self.check_chunk(index, &chunk, false)?;
        self.store.insert_chunk(index, chunk.as_bytes())?;
        self.set_chunksize(chunk.nbytes());
        Ok(())
    }

    /// Replace the chunk at the specified index with (uncompressed) data.
    pub fn update(&mut self, index: usize, items: &[u8]) -> Result<(), Error> {
        self.check_chunk_size(index, items.len(), true)?;
        let bytes = self.encoder.compress_impl(items, Some(index))?;
        self.replace_chunk(index, &bytes)
    }

    /// Replace the chunk at the specified index with a compressed chunk.
    pub fn update_chunk(&mut self, index: usize, chunk: Chunk) -> Result<(), Error> {
        self.check_chunk(index, &chunk, true)?;
        self.replace_chunk(index, chunk.as_bytes())
    }

    fn replace_chunk(&mut self, index: usize, bytes: &[u8]) -> Result<(), Error> {
        match self.store.write_chunk(index, bytes) {
            Err(Error::CompactionRequired) => {
                self.store.rewrite_chunk(index, bytes)?;
            }
            res => {
                res?;
            }
        }
        Ok(())
    }

    fn check_chunk(&self, index: usize, chunk: &Chunk, replace: bool) -> Result<(), Error> {
        if chunk.typesize() != self.typesize() {
            return Err(Error::config(format!(
                "Chunk typesize {} does not match schunk typesize {}",
                chunk.typesize(),
                self.typesize()
            )));
        }
        self.check_chunk_size(index, chunk.nbytes(), replace)
    }

    /// Check that a chunk of `nbytes` may be written at `index`, either replacing a chunk or inserted.
    fn check_chunk_size(&self, index: usize, nbytes: usize, replace: bool) -> Result<(), Error> {
        let nchunks = self.num_chunks();
        if (replace && index >= nchunks) || index > nchunks {
            crate::trace!("chunk {} not found, {} chunks", index, nchunks);
            return Err(Error::ChunkNotFound { index, nchunks });
        }
        if nbytes == 0 {
            return Err(Error::config("Empty chunks are not allowed"));
        }
        let chunksize = self.chunksize();
        if chunksize == 0 {
            return Ok(());
        }
        let mismatch = |actual: usize| {
            crate::trace!("chunk of {} bytes, chunk size is {}", actual, chunksize);
            Err(Error::SizeMismatch {
                expected: chunksize,
                actual,
            })
        };
        if !replace && index == nchunks && nchunks > 0 {
            let last = self.store.entry(nchunks - 1)?.nbytes;
            if last != chunksize {
                return mismatch(last);
            }
        }
        let is_last = if replace {
            index + 1 == nchunks
        } else {
            index == nchunks
        };
        if (is_last && nbytes > chunksize) || (!is_last && nbytes != chunksize) {
            return mismatch(nbytes);
        }
        Ok(())
    }

    fn set_chunksize(&mut self, nbytes: usize) {
        if self.chunksize() == 0 {
            self.store.meta_mut().chunksize = nbytes;
        }
    }

    /// Delete a chunk at the specified index from the super chunk.
    pub fn delete_chunk(&mut self, index: usize) -> Result<(), Error> {
        self.store.delete_chunk(index)
    }

    /// Get a chunk at the specified index from the super chunk.
    ///
    /// The chunk is returned in its compressed form, and is decompressed using the super chunk's decompression
    /// parameters.
    pub fn get_chunk(&self, index: usize) -> Result<Chunk<'_>, Error> {
        let bytes = self.store.read_chunk(index)?;
        let chunk = Chunk::from_compressed(bytes)?;
        chunk.set_decoder(self.decoder.clone());
        Ok(chunk)
    }

    /// Decompress a chunk at the specified index into a new allocated bytes vector.
    pub fn decompress_chunk(&self, index: usize) -> Result<Vec<u8>, Error> {
        let bytes = self.store.read_chunk(index)?;
        self.decoder.decompress_impl(&bytes, Some(index))
    }

    /// Decompress a chunk at the specified index into the destination buffer.
    ///
    /// # Returns
    ///
    /// The number of bytes copied into the destination buffer.
    pub fn decompress_chunk_into(&self, index: usize, dst: &mut [u8]) -> Result<usize, Error> {
        let bytes = self.store.read_chunk(index)?;
        self.decoder.decompress_into_impl(&bytes, dst, Some(index))
    }

    /// Iterate over the chunks of the super chunk.
    pub fn iter_chunks(&self) -> ChunksIter<'_> {
        ChunksIter {
            schunk: self,
            next: 0,
            end: self.num_chunks(),
        }
    }

    /// Copy the super chunk to a new in-memory super chunk.
    ///
    /// The created super chunk will not be contiguous. See [`Self::copy_to`] for more details.
    pub fn copy(&self, cparams: CParams, dparams: DParams) -> Result<SChunk, Error> {
        self.copy_to(SChunkStorageParams::in_memory(), cparams, dparams)
    }

    /// Copy the super chunk to a new super chunk with the specified parameters.
    ///
    /// Chunks are copied as is if `cparams` describes the same compression pipeline as the one of this super chunk,
    /// otherwise they are decompressed and compressed again.
    ///
    /// # Arguments
    ///
    /// * `storage` - parameters specifying the storage location and layout of the super chunk.
    ///   See [`SChunkStorageParams`].
    /// * `cparams` - Compression parameters used to compress new chunks added to the super chunk.
    /// * `dparams` - Decompression parameters used to decompress chunks from the super chunk.
    pub fn copy_to(
        &self,
        storage: SChunkStorageParams,
        cparams: CParams,
        dparams: DParams,
    ) -> Result<SChunk, Error> {
        let transplant = cparams.same_pipeline(&self.cparams());
        let registry = self.encoder.registry().clone();
        let mut copy = SChunk::with_registry(storage, cparams, dparams, registry)?;
        for index in 0..self.num_chunks() {
            if transplant {
                let chunk = self.get_chunk(index)?;
                copy.append_chunk(chunk)?;
            } else {
                copy.append(&self.decompress_chunk(index)?)?;
            }
        }
        copy.store.meta_mut().vlmeta = self.store.meta().vlmeta.clone();
        copy.flush()?;
        Ok(copy)
    }

    /// Fill an empty super chunk with special chunks.
    ///
    /// # Arguments
    ///
    /// * `nitems` - The total number of items.
    /// * `value` - The repeated value of the items.
    /// * `chunksize` - The size in bytes of every chunk but the last one, a multiple of the typesize.
    ///
    /// # Returns
    ///
    /// The number of chunks in the super chunk.
    pub fn fill_special(
        &mut self,
        nitems: usize,
        value: &RepeatedValue,
        chunksize: usize,
    ) -> Result<usize, Error> {
        let typesize = self.typesize();
        if self.num_chunks() != 0 {
            return Err(Error::config("Only an empty super chunk can be filled"));
        }
        if chunksize == 0 || chunksize % typesize != 0 {
            return Err(Error::config(format!(
                "Chunk size {chunksize} is not a positive multiple of the typesize {typesize}"
            )));
        }
        if self.chunksize() != 0 && self.chunksize() != chunksize {
            return Err(Error::SizeMismatch {
                expected: self.chunksize(),
                actual: chunksize,
            });
        }
        let items_per_chunk = chunksize / typesize;
        let full = if nitems >= items_per_chunk {
            Some(self.encoder.compress_repeatval(items_per_chunk, value)?.into_bytes())
        } else {
            None
        };
        let mut remaining = nitems;
        while remaining > 0 {
            let count = remaining.min(items_per_chunk);
            let bytes = match &full {
                Some(full) if count == items_per_chunk => Cow::Borrowed(&full[..]),
                _ => self.encoder.compress_repeatval(count, value)?.into_bytes(),
            };
            let index = self.num_chunks();
            self.store.write_chunk(index, &bytes)?;
            remaining -= count;
        }
        if nitems > 0 {
            self.set_chunksize(chunksize);
        }
        Ok(self.num_chunks())
    }

    /// Get the number of chunks in the super chunk.
    pub fn num_chunks(&self) -> usize {
        self.store.chunk_count()
    }

    /// Get the total uncompressed size of the super chunk, in bytes.
    pub fn nbytes(&self) -> usize {
        self.store.nbytes()
    }

    /// Get the total compressed size of the chunks of the super chunk, in bytes.
    pub fn cbytes(&self) -> usize {
        self.store.cbytes()
    }

    /// Get the nominal uncompressed size of the chunks, zero if no chunk was ever added.
    pub fn chunksize(&self) -> usize {
        self.store.meta().chunksize
    }

    /// Get the compression parameters used by this super chunk.
    pub fn cparams(&self) -> CParams {
        self.encoder.params()
    }

    /// Get the decompression parameters used by this super chunk.
    pub fn dparams(&self) -> DParams {
        self.decoder.params()
    }

    /// Get the size of each item in the super chunk.
    pub fn typesize(&self) -> usize {
        self.store.meta().typesize as usize
    }

    /// Check whether the super chunk is contiguous (otherwise sparse).
    pub fn is_contiguous(&self) -> bool {
        self.store.is_contiguous()
    }

    /// Get the path of the super chunk storage, `None` for in-memory super chunks.
    pub fn urlpath(&self) -> Option<&Path> {
        self.store.urlpath()
    }

    /// Get the number of items in the super chunk.
    ///
    /// The returned number is the total number of items across all chunks in the super chunk.
    /// All of the `item(s)(_into)` and `set_item(s)` methods accept indices that are zero-based
    /// in the range `0..items_num()`.
    pub fn items_num(&self) -> usize {
        self.nbytes() / self.typesize()
    }

    /// Get an item at the specified index.
    ///
    /// Each item is `typesize` (as provided during encoding) bytes long, and the index is zero-based.
    ///
    /// Note that the returned vector may not be aligned to the original data type's alignment, and the caller should
    /// ensure that the alignment is correct before transmuting it to original type. Alternatively, the caller can
    /// use [`Self::item_into`] and provide an already aligned destination buffer.
    ///
    /// # Arguments
    ///
    /// * `idx` - The index of the item to retrieve. Must be in range `[0, items_num())`.
    ///
    /// # Returns
    ///
    /// The decompressed item as a vector of bytes, of size `typesize`.
    pub fn item(&self, idx: usize) -> Result<Vec<u8>, Error> {
        self.items(idx..idx + 1)
    }

    /// Get an item at the specified index and copy it into the provided destination buffer.
    ///
    /// # Returns
    ///
    /// The number of bytes copied into the destination buffer, `typesize`.
    pub fn item_into(&self, idx: usize, dst: &mut [u8]) -> Result<usize, Error> {
        self.items_into(idx..idx + 1, dst)
    }

    /// Get a range of items specified by the index range.
    ///
    /// Only the blocks of the chunks overlapping the range are decompressed.
    ///
    /// # Arguments
    ///
    /// * `idx` - The index range of the items to retrieve. Must be in range `[0, items_num())`.
    ///
    /// # Returns
    ///
    /// The decompressed items as a vector of bytes, of size `typesize * idx.len()`.
    pub fn items(&self, idx: Range<usize>) -> Result<Vec<u8>, Error> {
        let mut dst = vec![0; self.typesize() * idx.len()];
        let len = self.items_into(idx, &mut dst)?;
        dst.truncate(len);
        Ok(dst)
    }

    /// Get a range of items specified by the index range and copy them into the provided destination buffer.
    ///
    /// # Returns
    ///
    /// The number of bytes copied into the destination buffer, `typesize * idx.len()`.
    pub fn items_into(&self, idx: Range<usize>, dst: &mut [u8]) -> Result<usize, Error> {
        let bytes_range = self.items_bytes_range(&idx)?;
        let len = bytes_range.len();
        if dst.len() < len {
            crate::trace!(
                "Destination buffer is too small: {} bytes required, {} bytes provided",
                len,
                dst.len()
            );
            return Err(Error::DecodeSizeMismatch {
                required: len,
                capacity: dst.len(),
            });
        }
        for (nchunk, chunk_range, out_range) in self.chunks_of(bytes_range)? {
            let bytes = self.store.read_chunk(nchunk)?;
            self.decoder
                .decompress_range(&bytes, chunk_range, &mut dst[out_range])
                .map_err(|e| e.with_nchunk(Some(nchunk)))?;
        }
        Ok(len)
    }

    /// Set an item at the specified index.
    ///
    /// Note that this will re-compress the affected chunk in the super chunk.
    ///
    /// # Arguments
    ///
    /// * `idx` - The index of the item to set. Must be in range `[0, items_num())`.
    /// * `value` - The new value for the item. Must be of size `typesize`.
    pub fn set_item(&mut self, idx: usize, value: &[u8]) -> Result<(), Error> {
        self.set_items(idx..idx + 1, value)
    }

    /// Set a range of items specified by the index range.
    ///
    /// Note that this will re-compress the affected chunk(s) in the super chunk.
    ///
    /// # Arguments
    ///
    /// * `idx` - The index range of the items to set. Must be in range `[0, items_num())`.
    /// * `values` - The new values for the items. Must be of size `typesize * idx.len()`.
    pub fn set_items(&mut self, idx: Range<usize>, values: &[u8]) -> Result<(), Error> {
        let bytes_range = self.items_bytes_range(&idx)?;
        if bytes_range.len() != values.len() {
            return Err(Error::config(format!(
                "Expected {} bytes for {} items, got {} bytes",
                bytes_range.len(),
                idx.len(),
                values.len()
            )));
        }
        for (nchunk, chunk_range, values_range) in self.chunks_of(bytes_range)? {
            let mut data = self.decompress_chunk(nchunk)?;
            data[chunk_range].copy_from_slice(&values[values_range]);
            let bytes = self.encoder.compress_impl(&data, Some(nchunk))?;
            self.replace_chunk(nchunk, &bytes)?;
        }
        Ok(())
    }

    fn items_bytes_range(&self, idx: &Range<usize>) -> Result<Range<usize>, Error> {
        if idx.start > idx.end || idx.end > self.items_num() {
            return Err(Error::config(format!(
                "Invalid index range: {}..{} for items_num: {}",
                idx.start,
                idx.end,
                self.items_num()
            )));
        }
        let typesize = self.typesize();
        Ok(idx.start * typesize..idx.end * typesize)
    }

    /// Split a range of bytes of the super chunk into `(chunk index, range in chunk, range in output)` parts.
    fn chunks_of(&self, range: Range<usize>) -> Result<Vec<(usize, Range<usize>, Range<usize>)>, Error> {
        let chunksize = self.chunksize();
        let mut parts = Vec::new();
        let mut pos = range.start;
        while pos < range.end {
            let nchunk = pos / chunksize;
            let chunk_start = nchunk * chunksize;
            let chunk_end = (chunk_start + self.store.entry(nchunk)?.nbytes).min(range.end);
            if chunk_end <= pos {
                return Err(Error::corrupt_frame(format!("chunk {nchunk} is shorter than the chunk size")));
            }
            parts.push((
                nchunk,
                pos - chunk_start..chunk_end - chunk_start,
                pos - range.start..chunk_end - range.start,
            ));
            pos = chunk_end;
        }
        Ok(parts)
    }

    /// Set a variable length metadata entry, replacing any previous value.
    pub fn vlmeta_set(&mut self, name: &str, value: &[u8]) -> Result<(), Error> {
        if name.len() > u16::MAX as usize || value.len() > u32::MAX as usize {
            return Err(Error::config(format!("Variable length metadata '{name}' is too large")));
        }
        self.store
            .meta_mut()
            .vlmeta
            .insert(name.to_string(), value.to_vec());
        Ok(())
    }

    /// Get a variable length metadata entry.
    pub fn vlmeta_get(&self, name: &str) -> Result<&[u8], Error> {
        self.store
            .meta()
            .vlmeta
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| Error::VlmetaNotFound(name.to_string()))
    }

    /// Remove a variable length metadata entry, returning its value.
    pub fn vlmeta_remove(&mut self, name: &str) -> Result<Vec<u8>, Error> {
        if !self.store.meta().vlmeta.contains_key(name) {
            return Err(Error::VlmetaNotFound(name.to_string()));
        }
        self.store
            .meta_mut()
            .vlmeta
            .remove(name)
            .ok_or_else(|| Error::VlmetaNotFound(name.to_string()))
    }

    /// Get the names of the variable length metadata entries, sorted.
    pub fn vlmeta_names(&self) -> Vec<&str> {
        self.store.meta().vlmeta.keys().map(|k| k.as_str()).collect()
    }

    /// Persist all pending modifications to the storage.
    ///
    /// Dropping the super chunk also flushes it, but ignores failures, so this should be called whenever the
    /// outcome matters.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.store.flush()
    }

    /// Reclaim the space left by deleted or replaced chunks.
    pub fn compact(&mut self) -> Result<(), Error> {
        self.store.compact()
    }

    /// Remove the super chunk and its persistent storage.
    pub fn remove(mut self) -> Result<(), Error> {
        self.store.remove()
    }
}
impl Drop for SChunk {
    /// Flush the store, logging any failure.
    fn drop(&mut self) {
        if let Err(err) = self.store.close() {
            crate::trace!("Failed to close super chunk: {}", err);
        }
    }
}
impl std::fmt::Debug for SChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SChunk")
            .field("nchunks", &self.num_chunks())
            .field("chunksize", &self.chunksize())
            .field("nbytes", &self.nbytes())
            .field("cbytes", &self.cbytes())
            .field("contiguous", &self.is_contiguous())
            .field("urlpath", &self.urlpath())
            .finish()
    }
}

/// Remove the storage of a super chunk at the given path, either a contiguous frame file or a sparse frame
/// directory.
///
/// Does nothing if the path does not exist.
pub fn remove_urlpath(urlpath: &Path) -> Result<(), Error> {
    let res = if urlpath.is_dir() {
        std::fs::remove_dir_all(urlpath)
    } else {
        std::fs::remove_file(urlpath)
    };
    match res {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        res => Ok(res?),
    }
}

/// An iterator over the chunks of a super chunk, see [`SChunk::iter_chunks`].
pub struct ChunksIter<'a> {
    schunk: &'a SChunk,
    next: usize,
    end: usize,
}
impl<'a> Iterator for ChunksIter<'a> {
    type Item = Result<Chunk<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let chunk = self.schunk.get_chunk(self.next);
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.end - self.next;
        (len, Some(len))
    }
}
impl ExactSizeIterator for ChunksIter<'_> {}

/// Storage parameters for an [`SChunk`].
#[derive(Debug, Clone)]
pub struct SChunkStorageParams<'a> {
    /// If true, the super chunk will be stored as a single contiguous frame.
    /// Note that contiguous super chunks may be inefficient for update operations.
    pub contiguous: bool,
    /// If `Some(path)`, the super chunk will be stored on disk at the specified path.
    /// If `None`, the super chunk will be stored in memory.
    pub urlpath: Option<&'a Path>,
}
impl<'a> SChunkStorageParams<'a> {
    /// Create storage parameters for an in-memory super chunk.
    ///
    /// The storage will not be contiguous.
    pub fn in_memory() -> Self {
        Self {
            contiguous: false,
            urlpath: None,
        }
    }

    /// Create storage parameters for a super chunk stored on disk.
    ///
    /// The storage will not be contiguous.
    pub fn on_disk(urlpath: &'a Path) -> Self {
        Self {
            contiguous: false,
            urlpath: Some(urlpath),
        }
    }
}

/// Options for opening a super chunk.
#[derive(Debug, Clone, Default)]
pub struct SChunkOpenOptions {
    offset: u64,
    dparams: DParams,
    registry: Option<Arc<Registry>>,
}
impl SChunkOpenOptions {
    /// Create an options struct with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the offset in the file (or buffer) from which to read the super chunk.
    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Set the decompression parameters of the opened super chunk.
    pub fn dparams(&mut self, dparams: DParams) -> &mut Self {
        self.dparams = dparams;
        self
    }

    /// Set the registry used to resolve the codecs and filters of the opened super chunk.
    ///
    /// The global registry is used by default.
    pub fn registry(&mut self, registry: Arc<Registry>) -> &mut Self {
        self.registry = Some(registry);
        self
    }
}
