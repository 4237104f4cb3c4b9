use std::ops::Range;
use std::sync::Arc;

use rayon::prelude::*;

use crate::chunk::header::ChunkHeader;
use crate::chunk::Chunk;
use crate::constants as consts;
use crate::error::{Error, TransformKind};
use crate::registry::{CodecEntry, CodecParams, FilterEntry, FilterParams, Registry};
use crate::tune::{self, BlockContext, BlockPolicy};
use crate::{CParams, DParams, HookContext, SplitMode};

fn build_pool(nthreads: usize) -> Result<Option<Arc<rayon::ThreadPool>>, Error> {
    if nthreads <= 1 {
        return Ok(None);
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nthreads)
        .thread_name(|i| format!("superchunk-{i}"))
        .build()
        .map_err(|e| Error::config(format!("failed to create a pool of {nthreads} threads: {e}")))?;
    Ok(Some(Arc::new(pool)))
}

/// Map the items in parallel if a pool is available, collecting the results in order.
fn par_map<T, R, F>(pool: Option<&rayon::ThreadPool>, items: &[T], f: F) -> Result<Vec<R>, Error>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, Error> + Sync + Send,
{
    match pool {
        Some(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        None => items.iter().map(f).collect(),
    }
}

fn filter_entries(
    registry: &Registry,
    filters: &[u8; consts::MAX_FILTERS],
    filters_meta: &[u8; consts::MAX_FILTERS],
) -> Result<Vec<(Arc<FilterEntry>, u8)>, Error> {
    filters
        .iter()
        .zip(filters_meta)
        .filter(|(id, _)| **id != consts::NOFILTER)
        .map(|(id, meta)| Ok((registry.lookup_filter(*id)?, *meta)))
        .collect()
}

fn nan_bytes(typesize: usize) -> Option<Vec<u8>> {
    match typesize {
        4 => Some(f32::NAN.to_ne_bytes().to_vec()),
        8 => Some(f64::NAN.to_ne_bytes().to_vec()),
        _ => None,
    }
}

/// An encoder for compressing bytes into [`Chunk`].
///
/// The codec and filters of the pipeline are resolved in the encoder's registry when the encoder is created.
#[derive(Clone)]
pub struct Encoder {
    params: CParams,
    registry: Arc<Registry>,
    codec: Arc<CodecEntry>,
    filters: Vec<(Arc<FilterEntry>, u8)>,
    pool: Option<Arc<rayon::ThreadPool>>,
}
impl Encoder {
    /// Create a new `Encoder` with the given compression parameters, using the global registry.
    pub fn new(params: CParams) -> Result<Self, Error> {
        Self::with_registry(params, Registry::global().clone())
    }

    /// Create a new `Encoder` with the given compression parameters and registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTransform`] if the codec or one of the filters is not registered, and
    /// [`Error::Config`] for invalid parameters.
    pub fn with_registry(params: CParams, registry: Arc<Registry>) -> Result<Self, Error> {
        params.validate()?;
        let codec = registry.lookup_codec(params.codec)?;
        let filters = filter_entries(&registry, &params.filters, &params.filters_meta)?;
        let pool = build_pool(params.nthreads)?;
        Ok(Self {
            params,
            registry,
            codec,
            filters,
            pool,
        })
    }

    /// Compress the given bytes into a new allocated `Chunk`.
    ///
    /// # Arguments
    ///
    /// * `src` - The source bytes to compress. Should be a multiple of the item size.
    ///
    /// # Returns
    ///
    /// A `Chunk` containing the compressed data.
    pub fn compress(&mut self, src: &[u8]) -> Result<Chunk<'static>, Error> {
        let bytes = self.compress_impl(src, None)?;
        Ok(Chunk::from_parts(bytes.into(), src.len(), self.params.typesize))
    }

    /// Compress the given bytes into a pre-allocated buffer.
    ///
    /// A buffer of `src.len() + MAX_OVERHEAD` bytes is always large enough.
    ///
    /// # Arguments
    ///
    /// * `src` - The source bytes to compress. Should be a multiple of the item size.
    /// * `dst` - The destination buffer to write the compressed data into. After the function call the valid part of
    ///   the buffer will contain the compressed data, and can be interpreted as a `Chunk`.
    ///   See [`Chunk::from_compressed`].
    ///
    /// # Returns
    ///
    /// The number of bytes copied into the destination buffer.
    pub fn compress_into(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, Error> {
        let bytes = self.compress_impl(src, None)?;
        copy_to_dst(&bytes, dst)
    }

    /// Compress a repeated value into a new allocated `Chunk`.
    ///
    /// Repeated values are stored as a header-only chunk, without storing the repeated values many times.
    ///
    /// # Arguments
    ///
    /// * `count` - The number of times the value should be repeated.
    /// * `value` - The value to repeat. See [`RepeatedValue`] for details.
    ///
    /// # Returns
    ///
    /// A `Chunk` containing the compressed repeated value.
    pub fn compress_repeatval(
        &self,
        count: usize,
        value: &RepeatedValue,
    ) -> Result<Chunk<'static>, Error> {
        let bytes = self.repeatval_bytes(count, value)?;
        let typesize = self.params.typesize;
        Ok(Chunk::from_parts(bytes.into(), count * typesize, typesize))
    }

    /// Compress a repeated value into a pre-allocated buffer.
    ///
    /// This function is similar to [`Encoder::compress_repeatval`], but allows you to provide a
    /// pre-allocated buffer to store the compressed data.
    ///
    /// # Returns
    ///
    /// The number of bytes copied into the destination buffer.
    pub fn compress_repeatval_into(
        &self,
        count: usize,
        value: &RepeatedValue,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let bytes = self.repeatval_bytes(count, value)?;
        copy_to_dst(&bytes, dst)
    }

    /// Get the compression parameters used by this encoder.
    pub fn params(&self) -> CParams {
        self.params.clone()
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn header(&self, flags: u8, nbytes: usize) -> ChunkHeader {
        ChunkHeader {
            flags: flags | ChunkHeader::host_flags(),
            typesize: self.params.typesize as u8,
            codec: self.params.codec,
            codec_meta: self.params.codec_meta,
            clevel: self.params.clevel,
            nbytes,
            cbytes: consts::CHUNK_HEADER_LEN,
            blocksize: 0,
            nblocks: 0,
            filters: self.params.filters,
            filters_meta: self.params.filters_meta,
        }
    }

    fn special_bytes(&self, special: u8, nbytes: usize, value: Option<&[u8]>) -> Vec<u8> {
        let mut header = self.header(special, nbytes);
        header.cbytes += value.map_or(0, |v| v.len());
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(value.unwrap_or_default());
        bytes
    }

    fn repeatval_bytes(&self, count: usize, value: &RepeatedValue) -> Result<Vec<u8>, Error> {
        let typesize = self.params.typesize;
        let nbytes = count * typesize;
        check_nbytes(nbytes)?;
        Ok(match value {
            RepeatedValue::Zero => self.special_bytes(consts::SPECIAL_ZERO, nbytes, None),
            RepeatedValue::Uninit => self.special_bytes(consts::SPECIAL_UNINIT, nbytes, None),
            RepeatedValue::Nan => {
                if nan_bytes(typesize).is_none() {
                    return Err(Error::config(format!(
                        "NaN values require a typesize of 4 or 8, got {typesize}"
                    )));
                }
                self.special_bytes(consts::SPECIAL_NAN, nbytes, None)
            }
            RepeatedValue::Value(value) => {
                if value.len() != typesize {
                    return Err(Error::config(format!(
                        "Repeated value size doesn't match CParams: {} != {}",
                        value.len(),
                        typesize
                    )));
                }
                self.special_bytes(consts::SPECIAL_VALUE, nbytes, Some(*value))
            }
        })
    }

    fn detect_special(&self, src: &[u8]) -> Option<Vec<u8>> {
        let typesize = self.params.typesize;
        if src.is_empty() {
            return None;
        }
        if src.iter().all(|b| *b == 0) {
            return Some(self.special_bytes(consts::SPECIAL_ZERO, src.len(), None));
        }
        if src.len() % typesize != 0 {
            return None;
        }
        let first = &src[..typesize];
        if !src.chunks_exact(typesize).all(|item| item == first) {
            return None;
        }
        if nan_bytes(typesize).as_deref() == Some(first) {
            return Some(self.special_bytes(consts::SPECIAL_NAN, src.len(), None));
        }
        Some(self.special_bytes(consts::SPECIAL_VALUE, src.len(), Some(first)))
    }

    fn memcpy_bytes(&self, src: &[u8]) -> Vec<u8> {
        let mut header = self.header(consts::CHUNK_MEMCPYED, src.len());
        header.cbytes += src.len();
        header.blocksize = src.len();
        header.nblocks = usize::from(!src.is_empty());
        let mut bytes = Vec::with_capacity(header.cbytes);
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(src);
        bytes
    }

    fn policy(&self) -> &dyn BlockPolicy {
        match &self.params.block_policy {
            Some(policy) => policy.as_ref(),
            None => tune::tuner_policy(self.params.tuner),
        }
    }

    pub(crate) fn compress_impl(&self, src: &[u8], nchunk: Option<usize>) -> Result<Vec<u8>, Error> {
        check_nbytes(src.len())?;
        let typesize = self.params.typesize;

        let prefiltered;
        let src = match &self.params.prefilter {
            Some(prefilter) if !src.is_empty() => {
                let mut dst = vec![0; src.len()];
                let ctx = HookContext {
                    nchunk,
                    typesize,
                    nbytes: src.len(),
                };
                prefilter(src, &mut dst, &ctx).map_err(|source| Error::Codec {
                    kind: TransformKind::Prefilter,
                    id: 0,
                    nchunk,
                    source,
                })?;
                prefiltered = dst;
                prefiltered.as_slice()
            }
            _ => src,
        };

        if let Some(bytes) = self.detect_special(src) {
            return Ok(bytes);
        }
        if self.params.clevel == 0 || src.is_empty() {
            return Ok(self.memcpy_bytes(src));
        }

        let ctx = BlockContext {
            codec: self.params.codec,
            clevel: self.params.clevel,
            typesize,
            nbytes: src.len(),
            src,
        };
        let split = match self.params.splitmode {
            SplitMode::Never => false,
            SplitMode::Always => true,
            SplitMode::Auto => self.policy().split(&ctx),
            SplitMode::ForwardCompat => self.params.codec <= consts::DEFINED_CODECS_STOP,
        };
        let blocksize = match self.params.blocksize {
            _ if !split => src.len(),
            0 => self.policy().blocksize(&ctx),
            blocksize => blocksize,
        };
        let blocksize = tune::normalize_blocksize(blocksize, src.len(), typesize);
        let blocks = src.chunks(blocksize).collect::<Vec<_>>();
        let split = blocks.len() > 1;

        let pool = self.pool.as_deref();
        let filtered = par_map(pool, &blocks, |block| self.filter_block(block, nchunk))?;

        let dict = if self.params.use_dict && self.params.codec == consts::ZSTD && split {
            let samples = filtered.iter().map(|b| b.as_slice()).collect::<Vec<_>>();
            let max_size = (src.len() / 10).clamp(256, consts::MAX_DICT_SIZE);
            crate::codecs::train_dict(&samples, max_size)
        } else {
            None
        };
        let codec_params = CodecParams {
            clevel: self.params.clevel,
            meta: self.params.codec_meta,
            typesize,
            dict: dict.as_deref(),
        };
        let encoded = par_map(pool, &filtered, |block| {
            (self.codec.encode)(block, &codec_params).map_err(|source| Error::Codec {
                kind: TransformKind::Codec,
                id: self.codec.id,
                nchunk,
                source,
            })
        })?;

        let mut flags = 0;
        let mut data_start = consts::CHUNK_HEADER_LEN;
        if split {
            flags |= consts::CHUNK_SPLIT;
            data_start += 4 * blocks.len();
        }
        if let Some(dict) = &dict {
            flags |= consts::CHUNK_USEDICT;
            data_start += 4 + dict.len();
        }
        let cbytes = data_start + encoded.iter().map(Vec::len).sum::<usize>();
        if cbytes - consts::CHUNK_HEADER_LEN >= src.len() {
            return Ok(self.memcpy_bytes(src));
        }

        let mut header = self.header(flags, src.len());
        header.cbytes = cbytes;
        header.blocksize = blocksize;
        header.nblocks = blocks.len();
        let mut bytes = Vec::with_capacity(cbytes);
        bytes.extend_from_slice(&header.to_bytes());
        if split {
            let mut offset = data_start;
            for block in &encoded {
                bytes.extend_from_slice(&(offset as u32).to_le_bytes());
                offset += block.len();
            }
        }
        if let Some(dict) = &dict {
            bytes.extend_from_slice(&(dict.len() as u32).to_le_bytes());
            bytes.extend_from_slice(dict);
        }
        for block in &encoded {
            bytes.extend_from_slice(block);
        }
        debug_assert_eq!(cbytes, bytes.len());
        Ok(bytes)
    }

    fn filter_block(&self, block: &[u8], nchunk: Option<usize>) -> Result<Vec<u8>, Error> {
        let mut data = block.to_vec();
        for (filter, meta) in &self.filters {
            let params = FilterParams {
                typesize: self.params.typesize,
                meta: *meta,
            };
            let out = (filter.forward)(&data, &params).map_err(|source| Error::Codec {
                kind: TransformKind::Filter,
                id: filter.id,
                nchunk,
                source,
            })?;
            if out.len() != data.len() {
                return Err(Error::Codec {
                    kind: TransformKind::Filter,
                    id: filter.id,
                    nchunk,
                    source: format!("output of {} bytes for a {} bytes block", out.len(), data.len())
                        .into(),
                });
            }
            data = out;
        }
        Ok(data)
    }
}

fn check_nbytes(nbytes: usize) -> Result<(), Error> {
    if nbytes > consts::MAX_BUFFERSIZE {
        crate::trace!("source of {} bytes exceeds the maximum buffer size", nbytes);
        return Err(Error::EncodeOverflow {
            required: nbytes,
            bound: consts::MAX_BUFFERSIZE,
        });
    }
    Ok(())
}

fn copy_to_dst(bytes: &[u8], dst: &mut [u8]) -> Result<usize, Error> {
    if bytes.len() > dst.len() {
        crate::trace!("destination of {} bytes is too small for {} bytes", dst.len(), bytes.len());
        return Err(Error::EncodeOverflow {
            required: bytes.len(),
            bound: dst.len(),
        });
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Represents a repeated value that can be compressed.
///
/// This enum is used as an argument to [`Encoder::compress_repeatval`], and returned by
/// [`Chunk::special`](crate::chunk::Chunk::special).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RepeatedValue<'a> {
    /// Repeated zeros.
    Zero,
    /// Repeated NaN values (for types that support NaN, like `f32` and `f64`).
    Nan,
    /// Uninitialized values.
    ///
    /// Uninitialized chunks are decompressed as zeros.
    Uninit,
    /// A specific value to repeat.
    ///
    /// The value must have the same size as the `typesize` used in the compression parameters.
    Value(&'a [u8]),
}

/// A parsed chunk, ready for decoding any of its blocks.
struct ChunkView<'s> {
    header: ChunkHeader,
    src: &'s [u8],
    payloads: Vec<Range<usize>>,
    dict: Option<&'s [u8]>,
}
impl<'s> ChunkView<'s> {
    fn parse(src: &'s [u8]) -> Result<Self, Error> {
        let header = ChunkHeader::read(src)?;
        let src = &src[..header.cbytes];
        if header.special() != consts::NO_SPECIAL || header.is_memcpyed() {
            return Ok(ChunkView {
                header,
                src,
                payloads: Vec::new(),
                dict: None,
            });
        }

        let mut pos = consts::CHUNK_HEADER_LEN;
        let table = if header.is_split() {
            let table_end = pos + 4 * header.nblocks;
            if table_end > src.len() {
                return Err(Error::corrupt_chunk("block offsets table out of range"));
            }
            let table = src[pos..table_end]
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
                .collect::<Vec<_>>();
            pos = table_end;
            Some(table)
        } else {
            None
        };
        let mut dict = None;
        if header.has_dict() {
            if pos + 4 > src.len() {
                return Err(Error::corrupt_chunk("dictionary out of range"));
            }
            let dict_len =
                u32::from_le_bytes([src[pos], src[pos + 1], src[pos + 2], src[pos + 3]]) as usize;
            pos += 4;
            if pos + dict_len > src.len() {
                return Err(Error::corrupt_chunk("dictionary out of range"));
            }
            dict = Some(&src[pos..pos + dict_len]);
            pos += dict_len;
        }
        let payloads = match table {
            None => vec![pos..src.len()],
            Some(table) => {
                let mut payloads = Vec::with_capacity(table.len());
                for (i, &start) in table.iter().enumerate() {
                    let end = table.get(i + 1).copied().unwrap_or(src.len());
                    if start < pos || start > end || end > src.len() {
                        return Err(Error::corrupt_chunk(format!(
                            "block {i} offsets {start}..{end} out of range"
                        )));
                    }
                    payloads.push(start..end);
                }
                payloads
            }
        };
        Ok(ChunkView {
            header,
            src,
            payloads,
            dict,
        })
    }

    fn block_range(&self, i: usize) -> Range<usize> {
        let start = i * self.header.blocksize;
        start..(start + self.header.blocksize).min(self.header.nbytes)
    }

    fn fill(&self, dst: &mut [u8], offset: usize) -> Result<bool, Error> {
        let typesize = self.header.typesize as usize;
        let pattern = match self.header.special() {
            consts::NO_SPECIAL => {
                if self.header.is_memcpyed() {
                    let data = &self.src[consts::CHUNK_HEADER_LEN..];
                    dst.copy_from_slice(&data[offset..offset + dst.len()]);
                    return Ok(true);
                }
                return Ok(false);
            }
            consts::SPECIAL_ZERO | consts::SPECIAL_UNINIT => {
                dst.fill(0);
                return Ok(true);
            }
            consts::SPECIAL_NAN => nan_bytes(typesize)
                .ok_or_else(|| Error::corrupt_chunk(format!("NaN chunk with typesize {typesize}")))?,
            _ => self.src[consts::CHUNK_HEADER_LEN..consts::CHUNK_HEADER_LEN + typesize].to_vec(),
        };
        for (i, b) in dst.iter_mut().enumerate() {
            *b = pattern[(offset + i) % typesize];
        }
        Ok(true)
    }
}

/// A decoder for decompressing bytes from a [`Chunk`].
///
/// Functions of the decoder expect bytes slices, rather than an actual `Chunk` struct, but the bytes are expected to
/// be a `Chunk`s bytes.
#[derive(Clone)]
pub struct Decoder {
    params: DParams,
    registry: Arc<Registry>,
    pool: Option<Arc<rayon::ThreadPool>>,
}
impl Decoder {
    /// Create a new `Decoder` with the given decompression parameters, using the global registry.
    pub fn new(params: DParams) -> Result<Self, Error> {
        Self::with_registry(params, Registry::global().clone())
    }

    /// Create a new `Decoder` with the given decompression parameters and registry.
    pub fn with_registry(params: DParams, registry: Arc<Registry>) -> Result<Self, Error> {
        let pool = build_pool(params.nthreads)?;
        Ok(Self {
            params,
            registry,
            pool,
        })
    }

    /// Decompress the given bytes into a new allocated `Vec<u8>`.
    ///
    /// Note that the returned vector may not be aligned to the original data type's alignment, and the caller should
    /// ensure that the alignment is correct before transmuting it to original type. If the alignment does not match
    /// the original data type, the bytes should be copied to a new aligned allocation before transmuting, otherwise
    /// undefined behavior may occur. Alternatively, the caller can use [`Self::decompress_into`] and provide an already
    /// aligned destination buffer.
    ///
    /// # Arguments
    ///
    /// * `src` - The source bytes to decompress. Should be a [`Chunk`]'s bytes.
    ///
    /// # Returns
    ///
    /// A vector containing the decompressed bytes, of size `itemsize * items_num`.
    pub fn decompress(&mut self, src: &[u8]) -> Result<Vec<u8>, Error> {
        self.decompress_impl(src, None)
    }

    /// Decompress the given bytes into a pre-allocated buffer.
    ///
    /// # Arguments
    ///
    /// * `src` - The source bytes to decompress. Should be a [`Chunk`]'s bytes.
    /// * `dst` - The destination buffer to write the decompressed data into.
    ///
    /// # Returns
    ///
    /// The number of bytes copied into the destination buffer, `itemsize * items_num`.
    pub fn decompress_into(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize, Error> {
        self.decompress_into_impl(src, dst, None)
    }

    /// Get the decompression parameters used by this decoder.
    pub fn params(&self) -> DParams {
        self.params.clone()
    }

    pub(crate) fn decompress_impl(&self, src: &[u8], nchunk: Option<usize>) -> Result<Vec<u8>, Error> {
        let header = ChunkHeader::read(src)?;
        let mut dst = vec![0; header.nbytes];
        self.decompress_into_impl(src, &mut dst, nchunk)?;
        Ok(dst)
    }

    pub(crate) fn decompress_into_impl(
        &self,
        src: &[u8],
        dst: &mut [u8],
        nchunk: Option<usize>,
    ) -> Result<usize, Error> {
        let view = ChunkView::parse(src)?;
        let nbytes = view.header.nbytes;
        if dst.len() < nbytes {
            crate::trace!("destination of {} bytes is too small for {} bytes", dst.len(), nbytes);
            return Err(Error::DecodeSizeMismatch {
                required: nbytes,
                capacity: dst.len(),
            });
        }
        let dst = &mut dst[..nbytes];
        if !view.fill(dst, 0)? {
            self.decode_blocks(&view, dst, nchunk)?;
        }
        self.postfilter(&view, dst, nchunk)?;
        Ok(nbytes)
    }

    /// Decompress a range of bytes of a chunk, decoding only the blocks overlapping the range.
    pub(crate) fn decompress_range(
        &self,
        src: &[u8],
        range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let view = ChunkView::parse(src)?;
        let nbytes = view.header.nbytes;
        if range.start > range.end || range.end > nbytes {
            return Err(Error::config(format!(
                "range {}..{} out of the chunk's {} bytes",
                range.start, range.end, nbytes
            )));
        }
        if dst.len() < range.len() {
            return Err(Error::DecodeSizeMismatch {
                required: range.len(),
                capacity: dst.len(),
            });
        }
        if self.params.postfilter.is_some() {
            let full = self.decompress_impl(src, None)?;
            dst[..range.len()].copy_from_slice(&full[range.clone()]);
            return Ok(range.len());
        }
        let len = range.len();
        if view.fill(&mut dst[..len], range.start)? || len == 0 {
            return Ok(len);
        }

        let blocksize = view.header.blocksize;
        let first = range.start / blocksize;
        let last = (range.end - 1) / blocksize;
        let entries = self.entries(&view.header)?;
        let mut block = Vec::new();
        for i in first..=last {
            let block_range = view.block_range(i);
            block.resize(block_range.len(), 0);
            self.decode_block(&view, &entries, i, &mut block, None)?;
            let start = range.start.max(block_range.start);
            let end = range.end.min(block_range.end);
            dst[start - range.start..end - range.start]
                .copy_from_slice(&block[start - block_range.start..end - block_range.start]);
        }
        Ok(len)
    }

    fn entries(&self, header: &ChunkHeader) -> Result<(Arc<CodecEntry>, Vec<(Arc<FilterEntry>, u8)>), Error> {
        let codec = self.registry.lookup_codec(header.codec)?;
        let filters = filter_entries(&self.registry, &header.filters, &header.filters_meta)?;
        Ok((codec, filters))
    }

    fn decode_blocks(&self, view: &ChunkView, dst: &mut [u8], nchunk: Option<usize>) -> Result<(), Error> {
        let entries = self.entries(&view.header)?;
        let blocksize = view.header.blocksize;
        let work = |(i, out): (usize, &mut [u8])| self.decode_block(view, &entries, i, out, nchunk);
        match &self.pool {
            Some(pool) => pool.install(|| dst.par_chunks_mut(blocksize).enumerate().try_for_each(work)),
            None => dst.chunks_mut(blocksize).enumerate().try_for_each(work),
        }
    }

    fn decode_block(
        &self,
        view: &ChunkView,
        (codec, filters): &(Arc<CodecEntry>, Vec<(Arc<FilterEntry>, u8)>),
        i: usize,
        out: &mut [u8],
        nchunk: Option<usize>,
    ) -> Result<(), Error> {
        let header = &view.header;
        let payload = &view.src[view.payloads[i].clone()];
        let params = CodecParams {
            clevel: header.clevel,
            meta: header.codec_meta,
            typesize: header.typesize as usize,
            dict: view.dict,
        };
        let codec_err = |source| Error::Codec {
            kind: TransformKind::Codec,
            id: codec.id,
            nchunk,
            source,
        };
        let mut data = (codec.decode)(payload, out.len(), &params).map_err(codec_err)?;
        if data.len() != out.len() {
            return Err(codec_err(
                format!("decoded {} bytes, expected {}", data.len(), out.len()).into(),
            ));
        }
        for (filter, meta) in filters.iter().rev() {
            let params = FilterParams {
                typesize: header.typesize as usize,
                meta: *meta,
            };
            let filter_err = |source| Error::Codec {
                kind: TransformKind::Filter,
                id: filter.id,
                nchunk,
                source,
            };
            let restored = (filter.backward)(&data, &params).map_err(filter_err)?;
            if restored.len() != data.len() {
                return Err(filter_err(
                    format!("output of {} bytes for a {} bytes block", restored.len(), data.len()).into(),
                ));
            }
            data = restored;
        }
        out.copy_from_slice(&data);
        Ok(())
    }

    fn postfilter(&self, view: &ChunkView, dst: &mut [u8], nchunk: Option<usize>) -> Result<(), Error> {
        let Some(postfilter) = &self.params.postfilter else {
            return Ok(());
        };
        if dst.is_empty() {
            return Ok(());
        }
        let ctx = HookContext {
            nchunk,
            typesize: view.header.typesize as usize,
            nbytes: dst.len(),
        };
        let mut out = vec![0; dst.len()];
        postfilter(dst, &mut out, &ctx).map_err(|source| Error::Codec {
            kind: TransformKind::Postfilter,
            id: 0,
            nchunk,
            source,
        })?;
        dst.copy_from_slice(&out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::prelude::*;

    use super::{Decoder, Encoder, RepeatedValue};
    use crate::constants as consts;
    use crate::util::tests::{rand_cparams, rand_dparams, rand_src_len};
    use crate::{CParams, CompressAlgo, DParams, Error, Filter, Registry, SplitMode, TransformError};

    fn compressible_data(len: usize, rand: &mut impl Rng) -> Vec<u8> {
        let alphabet = rand.random_range(1..=16u8);
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            let run = rand.random_range(1..64);
            let b = rand.random_range(0..alphabet);
            data.extend(std::iter::repeat(b).take(run.min(len - data.len())));
        }
        data
    }

    #[test]
    fn round_trip() {
        let mut rand = StdRng::seed_from_u64(0x83a9228e9af47dec);
        for _ in 0..30 {
            let cparams = rand_cparams(&mut rand);
            let src_len = rand_src_len(cparams.get_typesize(), &mut rand);
            let src = if rand.random_bool(0.5) {
                (&mut rand).random_iter().take(src_len).collect::<Vec<u8>>()
            } else {
                compressible_data(src_len, &mut rand)
            };

            let compressed = Encoder::new(cparams).unwrap().compress(&src).unwrap();
            assert!(compressed.cbytes() <= src.len() + consts::MAX_OVERHEAD);

            let decompressed = Decoder::new(rand_dparams(&mut rand))
                .unwrap()
                .decompress(compressed.as_bytes())
                .unwrap();
            assert_eq!(src, decompressed);
        }
    }

    #[test]
    fn round_trip_every_codec_and_filter() {
        let registry = Registry::with_builtins();
        let mut rand = StdRng::seed_from_u64(0x4f1e2d3c);
        let codecs = registry.codec_names();
        let filters = [
            vec![],
            vec![Filter::ByteShuffle],
            vec![Filter::BitShuffle],
            vec![Filter::Delta],
            vec![Filter::Delta, Filter::ByteShuffle],
        ];
        for (codec, _) in &codecs {
            for filters in &filters {
                for splitmode in [SplitMode::Always, SplitMode::Never] {
                    let typesize = *[1, 2, 4, 8].choose(&mut rand).unwrap();
                    let mut cparams = CParams::default();
                    cparams
                        .codec(*codec)
                        .clevel(rand.random_range(1..=9))
                        .typesize(typesize)
                        .unwrap()
                        .filters(filters)
                        .unwrap()
                        .splitmode(splitmode)
                        .blocksize(Some(4096));
                    let src = compressible_data(typesize * rand.random_range(1..10000), &mut rand);
                    let chunk = Encoder::with_registry(cparams, registry.clone())
                        .unwrap()
                        .compress(&src)
                        .unwrap();
                    let decompressed = Decoder::with_registry(DParams::default(), registry.clone())
                        .unwrap()
                        .decompress(chunk.as_bytes())
                        .unwrap();
                    assert_eq!(src, decompressed, "codec {codec} filters {filters:?}");
                }
            }
        }
    }

    #[test]
    fn trunc_prec_bounded_error() {
        let mut rand = StdRng::seed_from_u64(0x3a7);
        let values = (0..5000)
            .map(|_| rand.random_range(-1.0..1.0f32))
            .collect::<Vec<_>>();
        let src = values.iter().flat_map(|v| v.to_ne_bytes()).collect::<Vec<u8>>();
        let mut cparams = CParams::default();
        cparams
            .typesize(4)
            .unwrap()
            .filters(&[Filter::TruncPrecision { prec_bits: 10 }, Filter::ByteShuffle])
            .unwrap();
        let chunk = Encoder::new(cparams).unwrap().compress(&src).unwrap();
        let decompressed = chunk.decompress().unwrap();
        for (orig, item) in values.iter().zip(decompressed.chunks_exact(4)) {
            let v = f32::from_ne_bytes(item.try_into().unwrap());
            assert!((orig - v).abs() <= orig.abs() * 2f32.powi(-10));
        }
    }

    #[test]
    fn zero_chunk_is_small() {
        let src = vec![0u8; 1 << 20];
        let chunk = Encoder::new(CParams::default()).unwrap().compress(&src).unwrap();
        assert!(chunk.cbytes() < src.len() / 100);
        assert_eq!(Some(RepeatedValue::Zero), chunk.special());
        assert_eq!(src, chunk.decompress().unwrap());
    }

    #[test]
    fn detected_specials() {
        let mut cparams = CParams::default();
        cparams.typesize(8).unwrap();
        let mut encoder = Encoder::new(cparams).unwrap();

        let nans = f64::NAN.to_ne_bytes().repeat(1000);
        let chunk = encoder.compress(&nans).unwrap();
        assert_eq!(Some(RepeatedValue::Nan), chunk.special());
        assert_eq!(nans, chunk.decompress().unwrap());

        let value = 7u64.to_ne_bytes().repeat(1000);
        let chunk = encoder.compress(&value).unwrap();
        assert_eq!(
            Some(RepeatedValue::Value(&7u64.to_ne_bytes())),
            chunk.special()
        );
        assert_eq!(consts::CHUNK_HEADER_LEN + 8, chunk.cbytes());
        assert_eq!(value, chunk.decompress().unwrap());
    }

    #[test]
    fn memcpy_fallback() {
        let mut rand = StdRng::seed_from_u64(0x11);
        let src = (&mut rand).random_iter().take(10000).collect::<Vec<u8>>();
        let mut cparams = CParams::default();
        cparams.typesize(1).unwrap().filters(&[]).unwrap();
        let chunk = Encoder::new(cparams.clone()).unwrap().compress(&src).unwrap();
        assert_eq!(src.len() + consts::CHUNK_HEADER_LEN, chunk.cbytes());
        assert_eq!(src, chunk.decompress().unwrap());

        cparams.clevel(0);
        let compressible = vec![1u8, 2, 3, 4].repeat(1000);
        let chunk = Encoder::new(cparams).unwrap().compress(&compressible).unwrap();
        assert_eq!(compressible.len() + consts::CHUNK_HEADER_LEN, chunk.cbytes());
    }

    #[test]
    fn compress_into_too_small() {
        let src = (0..4000u32).flat_map(|i| (i * 7919).to_ne_bytes()).collect::<Vec<u8>>();
        let mut encoder = Encoder::new(CParams::default()).unwrap();
        let mut dst = vec![0; 10];
        assert!(matches!(
            encoder.compress_into(&src, &mut dst),
            Err(Error::EncodeOverflow { bound: 10, .. })
        ));
        let mut dst = vec![0; src.len() + consts::MAX_OVERHEAD];
        let len = encoder.compress_into(&src, &mut dst).unwrap();

        let mut decoder = Decoder::new(DParams::default()).unwrap();
        let mut out = vec![0; src.len() - 1];
        assert!(matches!(
            decoder.decompress_into(&dst[..len], &mut out),
            Err(Error::DecodeSizeMismatch { .. })
        ));
        let mut out = vec![0; src.len()];
        assert_eq!(src.len(), decoder.decompress_into(&dst[..len], &mut out).unwrap());
        assert_eq!(src, out);
    }

    #[test]
    fn corrupt_block_offsets() {
        let src = (0..20000u32).flat_map(|i| (i % 97).to_ne_bytes()).collect::<Vec<u8>>();
        let mut cparams = CParams::default();
        cparams
            .typesize(4)
            .unwrap()
            .splitmode(SplitMode::Always)
            .blocksize(Some(8192));
        let chunk = Encoder::new(cparams).unwrap().compress(&src).unwrap();
        let mut bytes = chunk.as_bytes().to_vec();
        assert_ne!(0, bytes[3] & consts::CHUNK_SPLIT);
        bytes[consts::CHUNK_HEADER_LEN..consts::CHUNK_HEADER_LEN + 4]
            .copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Decoder::new(DParams::default()).unwrap().decompress(&bytes),
            Err(Error::CorruptChunk(_))
        ));
    }

    #[test]
    fn repeatedval() {
        let mut rand = StdRng::seed_from_u64(0x83a9228e9af47dec);
        for _ in 0..30 {
            let cparams = rand_cparams(&mut rand);
            let typesize = cparams.get_typesize();

            let mut element_buf = Vec::new();
            let value = {
                element_buf.clear();
                element_buf.extend(
                    (&mut rand)
                        .random_iter()
                        .take(typesize)
                        .collect::<Vec<u8>>(),
                );

                let mut variants = Vec::new();
                variants.push(RepeatedValue::Zero);
                variants.push(RepeatedValue::Uninit);
                variants.push(RepeatedValue::Value(&element_buf));
                if [4, 8].contains(&typesize) {
                    variants.push(RepeatedValue::Nan);
                }

                variants.choose(&mut rand).unwrap().clone()
            };
            let src_len = rand_src_len(typesize, &mut rand);

            let compressed = Encoder::new(cparams)
                .unwrap()
                .compress_repeatval(src_len / typesize, &value)
                .unwrap();

            let decompressed = Decoder::new(rand_dparams(&mut rand))
                .unwrap()
                .decompress(compressed.as_bytes())
                .unwrap();
            assert_eq!(src_len / typesize * typesize, decompressed.len());
            for item in decompressed.chunks_exact(typesize) {
                match value {
                    RepeatedValue::Zero | RepeatedValue::Uninit => {
                        assert!(item.iter().all(|&b| b == 0))
                    }
                    RepeatedValue::Nan => match typesize {
                        4 => assert!(f32::from_ne_bytes(item.try_into().unwrap()).is_nan()),
                        8 => assert!(f64::from_ne_bytes(item.try_into().unwrap()).is_nan()),
                        _ => panic!("Unexpected typesize for NaN: {typesize}"),
                    },
                    RepeatedValue::Value(v) => assert_eq!(item, v),
                }
            }
        }
    }

    #[test]
    fn repeatval_invalid() {
        let mut cparams = CParams::default();
        cparams.typesize(2).unwrap();
        let encoder = Encoder::new(cparams).unwrap();
        assert!(matches!(
            encoder.compress_repeatval(10, &RepeatedValue::Nan),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            encoder.compress_repeatval(10, &RepeatedValue::Value(&[1, 2, 3])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn pre_and_post_filters() {
        let mut rand = StdRng::seed_from_u64(0x9f);
        let src = compressible_data(4 * 5000, &mut rand);
        let mut cparams = CParams::default();
        cparams.typesize(4).unwrap().prefilter(|src, dst, _ctx| {
            for (d, s) in dst.iter_mut().zip(src) {
                *d = s.wrapping_add(17);
            }
            Ok(())
        });
        let mut dparams = DParams::default();
        dparams.postfilter(|src, dst, ctx| {
            assert_eq!(src.len(), ctx.nbytes);
            for (d, s) in dst.iter_mut().zip(src) {
                *d = s.wrapping_sub(17);
            }
            Ok(())
        });
        let chunk = Encoder::new(cparams).unwrap().compress(&src).unwrap();
        let raw = chunk.decompress().unwrap();
        assert_ne!(src, raw);
        let restored = Decoder::new(dparams).unwrap().decompress(chunk.as_bytes()).unwrap();
        assert_eq!(src, restored);
    }

    #[test]
    fn failing_hook_reports_kind() {
        let mut cparams = CParams::default();
        cparams.prefilter(|_, _, _| Err("prefilter refused".into()));
        let err = Encoder::new(cparams).unwrap().compress(&[1; 64]).unwrap_err();
        assert!(matches!(
            err,
            Error::Codec {
                kind: crate::TransformKind::Prefilter,
                ..
            }
        ));
    }

    #[test]
    fn user_codec_and_filter() {
        fn rle_encode(src: &[u8], _: &crate::CodecParams) -> Result<Vec<u8>, TransformError> {
            let mut out = Vec::new();
            for run in src.chunk_by(|a, b| a == b) {
                for part in run.chunks(255) {
                    out.push(part.len() as u8);
                    out.push(part[0]);
                }
            }
            Ok(out)
        }
        fn rle_decode(
            src: &[u8],
            expected: usize,
            _: &crate::CodecParams,
        ) -> Result<Vec<u8>, TransformError> {
            let mut out = Vec::with_capacity(expected);
            for pair in src.chunks_exact(2) {
                out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
            }
            Ok(out)
        }
        fn negate(src: &[u8], _: &crate::FilterParams) -> Result<Vec<u8>, TransformError> {
            Ok(src.iter().map(|b| !b).collect())
        }

        let registry = Registry::with_builtins();
        registry.register_codec(180, "rle", rle_encode, rle_decode).unwrap();
        registry.register_filter(181, "negate", negate, negate).unwrap();

        let mut cparams = CParams::default();
        cparams
            .compressor(CompressAlgo::User(180))
            .typesize(1)
            .unwrap()
            .filters(&[Filter::User { id: 181, meta: 0 }])
            .unwrap();
        let src = [1u8, 1, 1, 2, 2, 9, 9, 9, 9, 9].repeat(300);
        let chunk = Encoder::with_registry(cparams.clone(), registry.clone())
            .unwrap()
            .compress(&src)
            .unwrap();
        assert_eq!(180, chunk.as_bytes()[5]);
        let decoded = Decoder::with_registry(DParams::default(), registry)
            .unwrap()
            .decompress(chunk.as_bytes())
            .unwrap();
        assert_eq!(src.to_vec(), decoded);

        // Unknown to the global registry
        assert!(matches!(
            Encoder::new(cparams),
            Err(Error::UnknownTransform { id: 180, .. })
        ));
        assert!(matches!(
            Decoder::new(DParams::default())
                .unwrap()
                .decompress(chunk.as_bytes()),
            Err(Error::UnknownTransform { .. })
        ));
    }

    #[test]
    fn parallel_matches_sequential() {
        let mut rand = StdRng::seed_from_u64(0x7e);
        let src = compressible_data(1 << 20, &mut rand);
        let mut cparams = CParams::default();
        cparams.typesize(4).unwrap().blocksize(Some(1 << 14));
        let sequential = Encoder::new(cparams.clone()).unwrap().compress(&src).unwrap();
        let parallel = Encoder::new(cparams.nthreads(4).clone())
            .unwrap()
            .compress(&src)
            .unwrap();
        assert_eq!(sequential.as_bytes(), parallel.as_bytes());
        let mut dparams = DParams::default();
        dparams.nthreads(3);
        let decoded = Decoder::new(dparams).unwrap().decompress(parallel.as_bytes()).unwrap();
        assert_eq!(src, decoded);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_dict_round_trip() {
        let mut rand = StdRng::seed_from_u64(0xd1c7);
        let words: [&[u8]; 6] = [b"alpha ", b"beta ", b"gamma ", b"delta ", b"omega ", b"sigma "];
        let mut src = Vec::new();
        while src.len() < 1 << 18 {
            src.extend_from_slice(words[rand.random_range(0..words.len())]);
        }
        src.truncate(1 << 18);
        let mut cparams = CParams::default();
        cparams
            .compressor(CompressAlgo::Zstd)
            .typesize(1)
            .unwrap()
            .use_dict(true)
            .blocksize(Some(1 << 12));
        let chunk = Encoder::new(cparams).unwrap().compress(&src).unwrap();
        assert_eq!(src, chunk.decompress().unwrap());
    }

    #[test]
    fn encoder_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Encoder>();
        assert_send_sync::<Decoder>();
        let _ = Arc::new(Encoder::new(CParams::default()).unwrap());
    }
}
