//! Format and registry constants.
//!
//! Codec, filter and split mode codes follow the numbering of the C-blosc2 library, so that the ids stored in
//! chunk headers keep their familiar meaning.

/// Maximum typesize in bytes.
pub const MAX_TYPESIZE: usize = 255;

/// Maximum number of filters in a single filter pipeline.
pub const MAX_FILTERS: usize = 6;

/// Length of the chunk header in bytes.
pub const CHUNK_HEADER_LEN: usize = 40;

/// Maximum compression overhead in bytes.
///
/// A compressed chunk is never larger than `nbytes + MAX_OVERHEAD`.
pub const MAX_OVERHEAD: usize = CHUNK_HEADER_LEN;

/// Maximum source buffer size (in bytes) that can be compressed into a single chunk.
pub const MAX_BUFFERSIZE: usize = i32::MAX as usize - MAX_OVERHEAD;

/// Maximum size in bytes of a trained compression dictionary.
pub const MAX_DICT_SIZE: usize = 128 * 1024;

/// Typical L1 cache size used by the block size heuristics.
pub const L1: usize = 32 * 1024;
/// Typical L2 cache size used by the block size heuristics.
pub const L2: usize = 256 * 1024;

// Codec ids

/// LZ4 codec.
pub const LZ4: u8 = 1;
/// Zlib (deflate) codec.
pub const ZLIB: u8 = 4;
/// Zstandard codec.
pub const ZSTD: u8 = 5;

/// Last id reserved for built-in codecs.
pub const DEFINED_CODECS_STOP: u8 = 31;
/// First id available for user-registered codecs.
pub const USER_REGISTERED_CODECS_START: u8 = 160;

// Filter ids

/// No filter.
pub const NOFILTER: u8 = 0;
/// Byte-wise shuffle filter.
pub const SHUFFLE: u8 = 1;
/// Bit-wise shuffle filter.
pub const BITSHUFFLE: u8 = 2;
/// Delta filter.
pub const DELTA: u8 = 3;
/// Truncate mantissa precision filter.
pub const TRUNC_PREC: u8 = 4;

/// Last id reserved for built-in filters.
pub const DEFINED_FILTERS_STOP: u8 = 31;
/// First id available for user-registered filters.
pub const USER_REGISTERED_FILTERS_START: u8 = 160;

// Split modes

/// Always split chunks into blocks.
pub const ALWAYS_SPLIT: u8 = 1;
/// Never split chunks, compress them as a single block.
pub const NEVER_SPLIT: u8 = 2;
/// Decide by the block policy.
pub const AUTO_SPLIT: u8 = 3;
/// Forward compatible split mode (the default), splits for all built-in codecs.
pub const FORWARD_COMPAT_SPLIT: u8 = 4;

// Tuners

/// The simple tuner.
pub const STUNE: u8 = 0;
/// The adaptive tuner.
pub const ATUNE: u8 = 1;

// Special values

/// Not a special chunk.
pub const NO_SPECIAL: u8 = 0x0;
/// Special chunk of zeros.
pub const SPECIAL_ZERO: u8 = 0x1;
/// Special chunk of NaN values.
pub const SPECIAL_NAN: u8 = 0x2;
/// Special chunk of a repeated value.
pub const SPECIAL_VALUE: u8 = 0x3;
/// Special chunk of uninitialized values.
pub const SPECIAL_UNINIT: u8 = 0x4;
/// Mask of the special kind in the chunk header flags.
pub const SPECIAL_MASK: u8 = 0x7;

// Chunk header flags

/// The chunk is split into blocks and carries a block offsets table.
pub const CHUNK_SPLIT: u8 = 0x8;
/// The chunk payload is the raw (uncompressed, unfiltered) data.
pub const CHUNK_MEMCPYED: u8 = 0x10;
/// The chunk was written on a big-endian host.
pub const CHUNK_BIGENDIAN: u8 = 0x20;
/// The chunk carries a compression dictionary.
pub const CHUNK_USEDICT: u8 = 0x40;
