//! Built-in filters.
//!
//! Filters are applied per block. Every filter maps a block to a block of the same length. Trailing bytes that do
//! not form a whole element are copied as is.

use std::sync::Arc;

use crate::constants as consts;
use crate::error::TransformError;
use crate::registry::{FilterEntry, FilterParams};

pub(crate) fn builtins() -> Vec<FilterEntry> {
    vec![
        FilterEntry {
            id: consts::SHUFFLE,
            name: "shuffle".to_string(),
            forward: Arc::new(shuffle_forward),
            backward: Arc::new(shuffle_backward),
        },
        FilterEntry {
            id: consts::BITSHUFFLE,
            name: "bitshuffle".to_string(),
            forward: Arc::new(bitshuffle_forward),
            backward: Arc::new(bitshuffle_backward),
        },
        FilterEntry {
            id: consts::DELTA,
            name: "delta".to_string(),
            forward: Arc::new(delta_forward),
            backward: Arc::new(delta_backward),
        },
        FilterEntry {
            id: consts::TRUNC_PREC,
            name: "trunc_prec".to_string(),
            forward: Arc::new(trunc_prec),
            backward: Arc::new(identity),
        },
    ]
}

fn shuffle_forward(src: &[u8], params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    Ok(shuffle(src, params.typesize))
}
fn shuffle_backward(src: &[u8], params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    Ok(unshuffle(src, params.typesize))
}
fn bitshuffle_forward(src: &[u8], params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    Ok(bitshuffle(src, params.typesize))
}
fn bitshuffle_backward(src: &[u8], params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    Ok(bitunshuffle(src, params.typesize))
}
fn delta_forward(src: &[u8], params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    Ok(delta_encode(src, params.typesize))
}
fn delta_backward(src: &[u8], params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    Ok(delta_decode(src, params.typesize))
}
fn identity(src: &[u8], _params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    Ok(src.to_vec())
}

/// Byte shuffle: group the i-th bytes of all elements together.
pub(crate) fn shuffle(src: &[u8], typesize: usize) -> Vec<u8> {
    let n = src.len() / typesize;
    let mut dst = vec![0; src.len()];
    for (i, item) in src.chunks_exact(typesize).enumerate() {
        for (j, b) in item.iter().enumerate() {
            dst[j * n + i] = *b;
        }
    }
    dst[n * typesize..].copy_from_slice(&src[n * typesize..]);
    dst
}

pub(crate) fn unshuffle(src: &[u8], typesize: usize) -> Vec<u8> {
    let n = src.len() / typesize;
    let mut dst = vec![0; src.len()];
    for (i, item) in dst.chunks_exact_mut(typesize).enumerate() {
        for (j, b) in item.iter_mut().enumerate() {
            *b = src[j * n + i];
        }
    }
    dst[n * typesize..].copy_from_slice(&src[n * typesize..]);
    dst
}

/// Bit shuffle: group the i-th bits of all elements together.
///
/// Only a multiple of 8 elements is transposed, the remaining elements are copied.
pub(crate) fn bitshuffle(src: &[u8], typesize: usize) -> Vec<u8> {
    let n = src.len() / typesize / 8 * 8;
    let nbits = typesize * 8;
    let mut dst = vec![0; src.len()];
    for i in 0..n {
        for b in 0..nbits {
            let bit = (src[i * typesize + b / 8] >> (b % 8)) & 1;
            let pos = b * n + i;
            dst[pos / 8] |= bit << (pos % 8);
        }
    }
    dst[n * typesize..].copy_from_slice(&src[n * typesize..]);
    dst
}

pub(crate) fn bitunshuffle(src: &[u8], typesize: usize) -> Vec<u8> {
    let n = src.len() / typesize / 8 * 8;
    let nbits = typesize * 8;
    let mut dst = vec![0; src.len()];
    for i in 0..n {
        for b in 0..nbits {
            let pos = b * n + i;
            let bit = (src[pos / 8] >> (pos % 8)) & 1;
            dst[i * typesize + b / 8] |= bit << (b % 8);
        }
    }
    dst[n * typesize..].copy_from_slice(&src[n * typesize..]);
    dst
}

/// Delta: XOR every element with its predecessor, the first element is kept.
pub(crate) fn delta_encode(src: &[u8], typesize: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    let n = src.len() / typesize;
    for i in 1..n {
        for k in 0..typesize {
            dst[i * typesize + k] = src[i * typesize + k] ^ src[(i - 1) * typesize + k];
        }
    }
    dst
}

pub(crate) fn delta_decode(src: &[u8], typesize: usize) -> Vec<u8> {
    let mut dst = src.to_vec();
    let n = src.len() / typesize;
    for i in 1..n {
        for k in 0..typesize {
            dst[i * typesize + k] ^= dst[(i - 1) * typesize + k];
        }
    }
    dst
}

/// Zero the least significant mantissa bits of floating point numbers.
fn trunc_prec(src: &[u8], params: &FilterParams) -> Result<Vec<u8>, TransformError> {
    let mantissa_bits: i32 = match params.typesize {
        4 => 23,
        8 => 52,
        typesize => {
            return Err(format!("trunc_prec requires a typesize of 4 or 8, got {typesize}").into())
        }
    };
    let prec_bits = params.meta as i8 as i32;
    let keep = if prec_bits < 0 {
        mantissa_bits + prec_bits
    } else {
        prec_bits
    };
    if !(0..=mantissa_bits).contains(&keep) {
        return Err(format!(
            "precision of {prec_bits} bits is invalid for a {mantissa_bits} bits mantissa"
        )
        .into());
    }
    let zero_bits = (mantissa_bits - keep) as u32;

    let mut dst = src.to_vec();
    let n = src.len() / params.typesize * params.typesize;
    match params.typesize {
        4 => {
            let mask = !((1u32 << zero_bits) - 1);
            for item in dst[..n].chunks_exact_mut(4) {
                let mut bytes = [0; 4];
                bytes.copy_from_slice(item);
                item.copy_from_slice(&(u32::from_ne_bytes(bytes) & mask).to_ne_bytes());
            }
        }
        _ => {
            let mask = !((1u64 << zero_bits) - 1);
            for item in dst[..n].chunks_exact_mut(8) {
                let mut bytes = [0; 8];
                bytes.copy_from_slice(item);
                item.copy_from_slice(&(u64::from_ne_bytes(bytes) & mask).to_ne_bytes());
            }
        }
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::*;
    use crate::registry::Registry;

    #[test]
    fn shuffle_layout() {
        let src = [1, 2, 3, 4, 5, 6, 7];
        assert_eq!(vec![1, 3, 5, 2, 4, 6, 7], shuffle(&src, 2));
        assert_eq!(src.to_vec(), unshuffle(&shuffle(&src, 2), 2));
    }

    #[test]
    fn delta_layout() {
        let src = [1, 1, 3, 3, 7, 0];
        assert_eq!(vec![1, 1, 2, 2, 4, 3], delta_encode(&src, 2));
        assert_eq!(src.to_vec(), delta_decode(&delta_encode(&src, 2), 2));
    }

    #[test]
    fn lossless_filters_round_trip() {
        let registry = Registry::with_builtins();
        let mut rand = StdRng::seed_from_u64(0xf117e5);
        for id in [consts::SHUFFLE, consts::BITSHUFFLE, consts::DELTA] {
            let filter = registry.lookup_filter(id).unwrap();
            for _ in 0..50 {
                let typesize = rand.random_range(1..=16);
                let len = rand.random_range(0..2000);
                let src = (&mut rand).random_iter().take(len).collect::<Vec<u8>>();
                let params = FilterParams { typesize, meta: 0 };
                let forward = (filter.forward)(&src, &params).unwrap();
                assert_eq!(src.len(), forward.len());
                assert_eq!(src, (filter.backward)(&forward, &params).unwrap(), "{}", filter.name);
            }
        }
    }

    #[test]
    fn trunc_prec_bounded_error() {
        let mut rand = StdRng::seed_from_u64(0x7c);
        let values = (0..1000)
            .map(|_| rand.random_range(-1000.0..1000.0f64))
            .collect::<Vec<_>>();
        let src = values.iter().flat_map(|v| v.to_ne_bytes()).collect::<Vec<u8>>();
        let params = FilterParams {
            typesize: 8,
            meta: 20,
        };
        let truncated = trunc_prec(&src, &params).unwrap();
        for (orig, item) in values.iter().zip(truncated.chunks_exact(8)) {
            let v = f64::from_ne_bytes(item.try_into().unwrap());
            assert!((orig - v).abs() <= orig.abs() * 2f64.powi(-20));
        }

        let params = FilterParams {
            typesize: 4,
            meta: (-30i8) as u8,
        };
        assert!(trunc_prec(&src, &params).is_err());
        let params = FilterParams {
            typesize: 2,
            meta: 5,
        };
        assert!(trunc_prec(&src, &params).is_err());
    }
}
