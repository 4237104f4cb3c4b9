#![cfg_attr(deny_warnings, deny(warnings))]
#![cfg_attr(deny_warnings, deny(missing_docs))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! A chunked, compressed, persistent binary data store.
//!
//! Data is compressed in independent [`Chunk`](crate::chunk::Chunk)s, each split into blocks that pass through a
//! pipeline of up to six filters (byte shuffle, bit shuffle, delta, truncated precision or user filters) followed by
//! a codec (lz4, zlib, zstd or a user codec). Chunks are collected into a super chunk,
//! [`SChunk`](crate::chunk::SChunk), a growable list of chunks that supports random access to chunks and items, and
//! that can be stored in memory or on disk, as a single contiguous frame or as a directory of chunk files.
//!
//!
//! ### Getting Started
//!
//! To use this library, add the following to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! superchunk = "0.1"
//! ```
//!
//! In the following example, we create a super chunk, append a few chunks of `i64` items to it, and then access
//! whole chunks and single items:
//! ```rust
//! use superchunk::chunk::SChunk;
//! use superchunk::{CParams, DParams};
//!
//! let mut cparams = CParams::default();
//! cparams.typesize(8).unwrap();
//! let mut schunk = SChunk::new(cparams, DParams::default()).unwrap();
//!
//! for i in 0..5_i64 {
//!     let data = (0..200_i64).flat_map(|x| (i * x).to_ne_bytes()).collect::<Vec<u8>>();
//!     schunk.append(&data).unwrap();
//! }
//! assert_eq!(5, schunk.num_chunks());
//! assert_eq!(1600, schunk.chunksize());
//!
//! let chunk = schunk.decompress_chunk(3).unwrap();
//! assert_eq!(3 * 7, i64::from_ne_bytes(chunk[7 * 8..8 * 8].try_into().unwrap()));
//! assert_eq!(4 * 199, i64::from_ne_bytes(schunk.item(999).unwrap().try_into().unwrap()));
//! ```
//!
//! Codecs and filters are resolved by id in a [`Registry`]. The built-in transforms are always registered, and user
//! transforms can be added to the global registry or to a private one passed to the encoder, decoder or super
//! chunk constructors.
//!
//!
//! ## Features
//! - `zlib`: Enable support for the zlib compression codec.
//! - `zstd`: Enable support for the zstd compression codec.
//!
//! ## Error Handling
//! All fallible operations return [`Error`]. Failures are logged through the `log` crate under the `superchunk`
//! target, and in addition, if the environment variable `BLOSC_TRACE` is set, a detailed trace is printed to stderr
//! which is useful for debugging.

mod params;
pub use params::*;

pub mod chunk;
pub mod constants;
mod global;

mod codecs;
mod filters;

mod registry;
pub use registry::{
    CodecEntry, CodecParams, DecodeFn, EncodeFn, FilterEntry, FilterFn, FilterParams, Registry,
};

mod tune;
pub use tune::{AdaptiveTuner, BlockContext, BlockPolicy, SimpleTuner};

mod error;
pub use error::{Error, TransformError, TransformKind};

mod tracing;
pub(crate) use tracing::trace;

mod misc;
pub use misc::*;


/// The version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
