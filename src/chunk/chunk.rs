use std::borrow::Cow;
use std::cell::RefCell;

use crate::chunk::header::ChunkHeader;
use crate::chunk::{Decoder, RepeatedValue};
use crate::constants as consts;
use crate::{DParams, Error};

/// A chunk of compressed data.
///
/// A chunk is a thin wrapper around `Cow<[u8]>`, with some additional metadata.
/// It is usually created using an [`Encoder`](crate::chunk::Encoder), or by accessing a
/// [`SChunk`](crate::chunk::SChunk).
///
/// ```rust
/// use superchunk::{CParams, DParams};
/// use superchunk::chunk::{Chunk, Decoder, Encoder};
///
/// let data: [i32; 7] = [1, 2, 3, 4, 5, 6, 7];
/// let data_bytes = data.iter().flat_map(|x| x.to_ne_bytes()).collect::<Vec<u8>>();
///
/// // Compress the data into a Chunk
/// let cparams = CParams::default()
///     .typesize(4)
///     .unwrap()
///     .clevel(5)
///     .nthreads(2)
///     .clone();
/// let chunk: Chunk = Encoder::new(cparams)
///     .unwrap()
///     .compress(&data_bytes)
///     .unwrap();
/// let chunk_bytes: &[u8] = chunk.as_bytes();
///
/// // Decompress the Chunk
/// let dparams = DParams::default();
/// let decompressed = Decoder::new(dparams)
///     .unwrap()
///     .decompress(chunk_bytes)
///     .unwrap();
///
/// // Check that the decompressed data matches the original
/// assert_eq!(data_bytes, decompressed);
///
/// // A chunk support random access to individual items
/// assert_eq!(&data_bytes[0..4], chunk.item(0).expect("failed to get the 0-th item"));
/// assert_eq!(&data_bytes[12..16], chunk.item(3).expect("failed to get the 3-th item"));
/// assert_eq!(&data_bytes[4..20], chunk.items(1..5).expect("failed to get items 1 to 4"));
/// ```
pub struct Chunk<'a> {
    pub(crate) buffer: Cow<'a, [u8]>,
    pub(crate) nbytes: usize,
    pub(crate) typesize: usize,
    pub(crate) decoder: RefCell<Option<Decoder>>,
}
impl<'a> Chunk<'a> {
    /// Create a new `Chunk` from a compressed bytes buffer.
    ///
    /// The compressed bytes buffer is usually obtained using an [`Encoder`](crate::chunk::Encoder).
    ///
    /// This function is very cheap, only the header of the chunk is validated.
    pub fn from_compressed(bytes: Cow<'a, [u8]>) -> Result<Self, Error> {
        let header = ChunkHeader::read(&bytes)?;
        let bytes = match bytes {
            Cow::Borrowed(bytes) => Cow::Borrowed(&bytes[..header.cbytes]),
            Cow::Owned(mut bytes) => {
                bytes.truncate(header.cbytes);
                Cow::Owned(bytes)
            }
        };
        Ok(Self::from_parts(bytes, header.nbytes, header.typesize as usize))
    }

    pub(crate) fn from_parts(bytes: Cow<'a, [u8]>, nbytes: usize, typesize: usize) -> Self {
        Self {
            buffer: bytes,
            nbytes,
            typesize,
            decoder: RefCell::new(None),
        }
    }

    /// Get a reference to the underlying (compressed) bytes buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Convert the chunk into a (compressed) bytes buffer.
    pub fn into_bytes(self) -> Cow<'a, [u8]> {
        self.buffer
    }

    fn with_decoder<R>(&self, f: impl FnOnce(&Decoder) -> Result<R, Error>) -> Result<R, Error> {
        let mut slot = self.decoder.borrow_mut();
        let decoder = match slot.take() {
            Some(decoder) => decoder,
            None => Decoder::new(Default::default())?,
        };
        let res = f(&decoder);
        *slot = Some(decoder);
        res
    }

    /// Get the current decompression parameters.
    pub fn get_dparams(&self) -> DParams {
        self.decoder
            .borrow()
            .as_ref()
            .map(|decoder| decoder.params())
            .unwrap_or_default()
    }

    /// Set the decompression parameters.
    pub fn set_dparams(&self, params: DParams) -> Result<(), Error> {
        *self.decoder.borrow_mut() = Some(Decoder::new(params)?);
        Ok(())
    }

    pub(crate) fn set_decoder(&self, decoder: Decoder) {
        *self.decoder.borrow_mut() = Some(decoder);
    }

    /// Decompress the whole chunk into a new allocated bytes vector.
    ///
    /// For decompressing the data into an already allocated buffer, create a `Decoder`
    /// (with other params or [`Self::get_dparams`]) and use [`Decoder::decompress_into`].
    pub fn decompress(&self) -> Result<Vec<u8>, Error> {
        self.with_decoder(|decoder| decoder.decompress_impl(&self.buffer, None))
    }

    /// Get the number of bytes in the *uncompressed* data.
    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    /// Get the number of bytes in the *compressed* data, header included.
    pub fn cbytes(&self) -> usize {
        self.buffer.len()
    }

    /// Get the size of each item in the chunk.
    pub fn typesize(&self) -> usize {
        self.typesize
    }

    /// Get the number of items in the chunk.
    pub fn items_num(&self) -> usize {
        self.nbytes / self.typesize
    }

    /// Get the repeated value of a special chunk, or `None` for a chunk storing actual data.
    pub fn special(&self) -> Option<RepeatedValue<'_>> {
        let flags = self.buffer.get(3).copied().unwrap_or_default();
        match flags & consts::SPECIAL_MASK {
            consts::SPECIAL_ZERO => Some(RepeatedValue::Zero),
            consts::SPECIAL_NAN => Some(RepeatedValue::Nan),
            consts::SPECIAL_UNINIT => Some(RepeatedValue::Uninit),
            consts::SPECIAL_VALUE => self
                .buffer
                .get(consts::CHUNK_HEADER_LEN..consts::CHUNK_HEADER_LEN + self.typesize)
                .map(RepeatedValue::Value),
            _ => None,
        }
    }

    /// Get an item at the specified index.
    ///
    /// Each item is `typesize` (as provided during encoding) bytes long, and the index is zero-based.
    ///
    /// Note that the returned vector may not be aligned to the original data type's alignment, and the caller should
    /// ensure that the alignment is correct before transmuting it to original type. Alternatively, the caller can use
    /// [`Self::item_into`] and provide an already aligned destination buffer.
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
    /// Only the blocks overlapping the range are decompressed.
    ///
    /// # Arguments
    ///
    /// * `idx` - The index range of the items to retrieve. Must be in range `[0, items_num())`.
    ///
    /// # Returns
    ///
    /// The decompressed items as a vector of bytes, of size `typesize * idx.len()`.
    pub fn items(&self, idx: std::ops::Range<usize>) -> Result<Vec<u8>, Error> {
        let mut dst = vec![0; self.typesize * idx.len()];
        let len = self.items_into(idx, &mut dst)?;
        dst.truncate(len);
        Ok(dst)
    }

    /// Get a range of items specified by the index range and copy them into the provided destination buffer.
    ///
    /// # Returns
    ///
    /// The number of bytes copied into the destination buffer, `typesize * idx.len()`.
    pub fn items_into(&self, idx: std::ops::Range<usize>, dst: &mut [u8]) -> Result<usize, Error> {
        if idx.start > idx.end || idx.end > self.items_num() {
            return Err(Error::config(format!(
                "items range {}..{} out of range [0, {})",
                idx.start,
                idx.end,
                self.items_num()
            )));
        }
        let range = idx.start * self.typesize..idx.end * self.typesize;
        self.with_decoder(|decoder| decoder.decompress_range(&self.buffer, range, dst))
    }

    /// Create a shallow clone of the chunk without re-allocating the internal buffer.
    pub fn shallow_clone(&self) -> Chunk<'_> {
        Chunk {
            buffer: Cow::Borrowed(&self.buffer),
            nbytes: self.nbytes,
            typesize: self.typesize,
            decoder: RefCell::new(self.decoder.borrow().clone()),
        }
    }

    /// Convert the chunk into an owned chunk, copying the buffer if it is borrowed.
    pub fn into_owned(self) -> Chunk<'static> {
        Chunk {
            buffer: Cow::Owned(self.buffer.into_owned()),
            nbytes: self.nbytes,
            typesize: self.typesize,
            decoder: self.decoder,
        }
    }
}
impl Clone for Chunk<'_> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            nbytes: self.nbytes,
            typesize: self.typesize,
            decoder: RefCell::new(self.decoder.borrow().clone()),
        }
    }
}
impl std::fmt::Debug for Chunk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("nbytes", &self.nbytes)
            .field("cbytes", &self.cbytes())
            .field("typesize", &self.typesize)
            .finish()
    }
}
