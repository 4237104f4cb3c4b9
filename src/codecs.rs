//! Built-in codecs.

use std::sync::Arc;

use crate::constants as consts;
use crate::error::TransformError;
use crate::registry::{CodecEntry, CodecParams};

pub(crate) fn builtins() -> Vec<CodecEntry> {
    #[allow(unused_mut)]
    let mut codecs = vec![CodecEntry {
        id: consts::LZ4,
        name: "lz4".to_string(),
        encode: Arc::new(lz4_encode),
        decode: Arc::new(lz4_decode),
    }];
    #[cfg(feature = "zlib")]
    codecs.push(CodecEntry {
        id: consts::ZLIB,
        name: "zlib".to_string(),
        encode: Arc::new(zlib::encode),
        decode: Arc::new(zlib::decode),
    });
    #[cfg(feature = "zstd")]
    codecs.push(CodecEntry {
        id: consts::ZSTD,
        name: "zstd".to_string(),
        encode: Arc::new(zstd_codec::encode),
        decode: Arc::new(zstd_codec::decode),
    });
    codecs
}

fn check_len(decoded: Vec<u8>, expected_len: usize) -> Result<Vec<u8>, TransformError> {
    if decoded.len() != expected_len {
        return Err(format!(
            "decoded {} bytes, expected {}",
            decoded.len(),
            expected_len
        )
        .into());
    }
    Ok(decoded)
}

fn lz4_encode(src: &[u8], _params: &CodecParams) -> Result<Vec<u8>, TransformError> {
    Ok(lz4_flex::block::compress(src))
}

fn lz4_decode(
    src: &[u8],
    expected_len: usize,
    _params: &CodecParams,
) -> Result<Vec<u8>, TransformError> {
    check_len(lz4_flex::block::decompress(src, expected_len)?, expected_len)
}

#[cfg(feature = "zlib")]
mod zlib {
    use std::io::{Read, Write};

    use flate2::read::ZlibDecoder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::check_len;
    use crate::error::TransformError;
    use crate::registry::CodecParams;

    pub(super) fn encode(src: &[u8], params: &CodecParams) -> Result<Vec<u8>, TransformError> {
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(src.len() / 2),
            Compression::new(params.clevel as u32),
        );
        encoder.write_all(src)?;
        Ok(encoder.finish()?)
    }

    pub(super) fn decode(
        src: &[u8],
        expected_len: usize,
        _params: &CodecParams,
    ) -> Result<Vec<u8>, TransformError> {
        let mut dst = Vec::with_capacity(expected_len);
        ZlibDecoder::new(src)
            .take(expected_len as u64 + 1)
            .read_to_end(&mut dst)?;
        check_len(dst, expected_len)
    }
}

#[cfg(feature = "zstd")]
mod zstd_codec {
    use super::check_len;
    use crate::error::TransformError;
    use crate::registry::CodecParams;

    /// Map the [1, 9] compression level to the zstd levels.
    fn level(clevel: u8) -> i32 {
        if clevel >= 9 {
            22
        } else {
            clevel as i32 * 2 - 1
        }
    }

    pub(super) fn encode(src: &[u8], params: &CodecParams) -> Result<Vec<u8>, TransformError> {
        let level = level(params.clevel);
        Ok(match params.dict {
            Some(dict) => zstd::bulk::Compressor::with_dictionary(level, dict)?.compress(src)?,
            None => zstd::bulk::compress(src, level)?,
        })
    }

    pub(super) fn decode(
        src: &[u8],
        expected_len: usize,
        params: &CodecParams,
    ) -> Result<Vec<u8>, TransformError> {
        let dst = match params.dict {
            Some(dict) => {
                zstd::bulk::Decompressor::with_dictionary(dict)?.decompress(src, expected_len)?
            }
            None => zstd::bulk::decompress(src, expected_len)?,
        };
        check_len(dst, expected_len)
    }
}

/// Train a zstd dictionary from the blocks of a chunk.
///
/// Returns `None` if the training fails, typically because the samples are too few or too small.
#[cfg(feature = "zstd")]
pub(crate) fn train_dict(samples: &[&[u8]], max_size: usize) -> Option<Vec<u8>> {
    match zstd::dict::from_samples(samples, max_size) {
        Ok(dict) if !dict.is_empty() => Some(dict),
        Ok(_) => None,
        Err(err) => {
            log::debug!(target: "superchunk", "dictionary training failed: {}", err);
            None
        }
    }
}

#[cfg(not(feature = "zstd"))]
pub(crate) fn train_dict(_samples: &[&[u8]], _max_size: usize) -> Option<Vec<u8>> {
    None
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use crate::registry::{CodecParams, Registry};

    fn params(clevel: u8) -> CodecParams<'static> {
        CodecParams {
            clevel,
            meta: 0,
            typesize: 4,
            dict: None,
        }
    }

    #[test]
    fn builtin_codecs_round_trip() {
        let registry = Registry::with_builtins();
        let mut rand = StdRng::seed_from_u64(0xc0dec);
        for (id, _name) in registry.codec_names() {
            let codec = registry.lookup_codec(id).unwrap();
            for _ in 0..20 {
                let len = rand.random_range(0..20000);
                let alphabet = rand.random_range(1..=255u8);
                let src = (0..len)
                    .map(|_| rand.random_range(0..alphabet))
                    .collect::<Vec<u8>>();
                let params = params(rand.random_range(1..=9));
                let encoded = (codec.encode)(&src, &params).unwrap();
                let decoded = (codec.decode)(&encoded, src.len(), &params).unwrap();
                assert_eq!(src, decoded, "codec {}", codec.name);
            }
        }
    }

    #[test]
    fn decode_wrong_len_fails() {
        let registry = Registry::with_builtins();
        let codec = registry.lookup_codec(crate::constants::LZ4).unwrap();
        let src = vec![7u8; 1000];
        let encoded = (codec.encode)(&src, &params(5)).unwrap();
        assert!((codec.decode)(&encoded, 999, &params(5)).is_err());
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_with_dict() {
        let registry = Registry::with_builtins();
        let codec = registry.lookup_codec(crate::constants::ZSTD).unwrap();
        let mut rand = StdRng::seed_from_u64(0xd1c7);
        let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
        let blocks = (0..64)
            .map(|_| {
                (0..200)
                    .flat_map(|_| words[rand.random_range(0..words.len())].bytes())
                    .collect::<Vec<u8>>()
            })
            .collect::<Vec<_>>();
        let samples = blocks.iter().map(|b| b.as_slice()).collect::<Vec<_>>();
        let Some(dict) = super::train_dict(&samples, 4096) else {
            return;
        };
        let params = CodecParams {
            dict: Some(&dict),
            ..params(5)
        };
        for block in &blocks {
            let encoded = (codec.encode)(block, &params).unwrap();
            assert_eq!(
                *block,
                (codec.decode)(&encoded, block.len(), &params).unwrap()
            );
        }
    }
}
