/// Errors of the superchunk library.
///
/// Most variants carry enough context to diagnose the failure on their own. For even more details, set the
/// environment variable `BLOSC_TRACE` to get trace prints at the failure sites, or install a [`log`] logger and
/// enable the `superchunk` target.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid parameter supplied to a function or to the compression pipeline
    #[error("Invalid parameter: {0}")]
    Config(String),
    /// The compressed output does not fit the maximum buffer size or the destination buffer
    #[error("Compressed size exceeds the available bound ({required} bytes required, {bound} available)")]
    EncodeOverflow {
        /// The number of bytes that would have been required.
        required: usize,
        /// The bound that was exceeded.
        bound: usize,
    },
    /// The destination buffer is too small for the decompressed data
    #[error("Not enough space to write {required} decompressed bytes into a {capacity} bytes buffer")]
    DecodeSizeMismatch {
        /// The uncompressed size of the chunk.
        required: usize,
        /// The size of the provided destination buffer.
        capacity: usize,
    },
    /// The compressed chunk failed structural validation
    #[error("Corrupt chunk: {0}")]
    CorruptChunk(String),
    /// The frame (contiguous buffer, file or directory) failed structural validation
    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),
    /// Chunk index out of range
    #[error("Chunk {index} not found, super chunk has {nchunks} chunks")]
    ChunkNotFound {
        /// The requested index.
        index: usize,
        /// The number of chunks at the time of the request.
        nchunks: usize,
    },
    /// A codec or filter is already registered under the id
    #[error("A {kind} with id {id} is already registered")]
    DuplicateId {
        /// The kind of the transform.
        kind: TransformKind,
        /// The colliding id.
        id: u8,
    },
    /// No codec or filter is registered under the id
    #[error("No {kind} registered with id {id}")]
    UnknownTransform {
        /// The kind of the transform.
        kind: TransformKind,
        /// The missing id.
        id: u8,
    },
    /// A chunk can not be replaced in place, and the frame must be rewritten
    ///
    /// This is a signal rather than a failure, the caller may choose to rewrite the whole frame.
    #[error("Chunk does not fit in place, the frame must be rewritten")]
    CompactionRequired,
    /// A codec, filter or a user hook failed
    #[error("{kind} {id} failed{}: {source}", .nchunk.map(|n| format!(" on chunk {n}")).unwrap_or_default())]
    Codec {
        /// The kind of the failing transform.
        kind: TransformKind,
        /// The id of the failing transform (zero for hooks).
        id: u8,
        /// The index of the chunk being processed, if known.
        nchunk: Option<usize>,
        /// The underlying failure.
        #[source]
        source: TransformError,
    },
    /// The chunk size does not match the super chunk's chunk size
    #[error("Chunk of {actual} bytes does not match the super chunk's chunk size of {expected} bytes")]
    SizeMismatch {
        /// The expected (nominal) chunk size.
        expected: usize,
        /// The actual size of the chunk.
        actual: usize,
    },
    /// Variable length metadata has not been found
    #[error("Variable length metadata '{0}' has not been found")]
    VlmetaNotFound(String),
    /// File read/write/open/remove failure
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// The error type returned by codec and filter functions, and by prefilter/postfilter hooks.
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

/// The kind of a transform unit, used for diagnostics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// A compression codec.
    Codec,
    /// A per-block filter.
    Filter,
    /// A whole-chunk prefilter hook.
    Prefilter,
    /// A whole-chunk postfilter hook.
    Postfilter,
}
impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransformKind::Codec => "codec",
            TransformKind::Filter => "filter",
            TransformKind::Prefilter => "prefilter",
            TransformKind::Postfilter => "postfilter",
        })
    }
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        crate::trace!("{}", msg);
        Error::Config(msg)
    }

    pub(crate) fn corrupt_chunk(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        crate::trace!("Corrupt chunk: {}", msg);
        Error::CorruptChunk(msg)
    }

    pub(crate) fn corrupt_frame(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        crate::trace!("Corrupt frame: {}", msg);
        Error::CorruptFrame(msg)
    }

    /// Attach a chunk index to a transform failure that was raised without one.
    pub(crate) fn with_nchunk(self, index: Option<usize>) -> Self {
        match self {
            Error::Codec {
                kind,
                id,
                nchunk: None,
                source,
            } => Error::Codec {
                kind,
                id,
                nchunk: index,
                source,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, TransformKind};

    #[test]
    fn codec_error_display() {
        let err = Error::Codec {
            kind: TransformKind::Codec,
            id: 200,
            nchunk: None,
            source: "boom".into(),
        };
        assert_eq!("codec 200 failed: boom", err.to_string());
        let err = err.with_nchunk(Some(3));
        assert_eq!("codec 200 failed on chunk 3: boom", err.to_string());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn with_nchunk_keeps_existing_index() {
        let err = Error::Codec {
            kind: TransformKind::Filter,
            id: 1,
            nchunk: Some(1),
            source: "bad".into(),
        }
        .with_nchunk(Some(7));
        assert!(matches!(err, Error::Codec { nchunk: Some(1), .. }));
    }
}
