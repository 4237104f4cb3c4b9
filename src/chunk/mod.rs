//! Basic [`Chunk`] and [`SChunk`] types.
//!
//! This module contains the most basic compressed type of the library, [`Chunk`], which is a contiguous block of
//! memory that was compressed as a single unit and contains repeated "items" of the same typesize.
//! The super chunk, [`SChunk`], is a collection of multiple chunks forming a single logical list of items,
//! but it allows modifying, inserting, and deleting entire chunks while preserving the overall structure.
//!
//! A super chunk keeps its chunks in a [`FrameStore`](frame::FrameStore), either a contiguous frame (a single
//! buffer or file) or a sparse frame (one file per chunk in a directory). See the [`frame`] module for the
//! serialized layout.

mod header;
pub use header::chunk_sizes;

mod encode;
pub use encode::*;

#[allow(clippy::module_inception)]
mod chunk;
pub use chunk::*;

pub mod frame;

mod schunk;
pub use schunk::*;
