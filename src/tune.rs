//! Block size and split heuristics.
//!
//! A [`BlockPolicy`] decides how a chunk is partitioned into blocks, and whether the blocks are split. The
//! decisions only affect performance and compression ratio, any chunk is readable regardless of the policy that
//! produced it.

use crate::constants as consts;
use crate::params::Tuner;

/// The information available to a [`BlockPolicy`] when a chunk is encoded.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    /// The codec id.
    pub codec: u8,
    /// The compression level.
    pub clevel: u8,
    /// The typesize of the data.
    pub typesize: usize,
    /// The size of the chunk data in bytes.
    pub nbytes: usize,
    /// The chunk data, after the prefilter.
    pub src: &'a [u8],
}

/// A pluggable policy choosing block sizes and split decisions.
pub trait BlockPolicy: Send + Sync {
    /// The block size for a chunk.
    ///
    /// The returned value is normalized by the encoder: it is clamped to the chunk size and rounded down to a
    /// multiple of the typesize.
    fn blocksize(&self, ctx: &BlockContext) -> usize;

    /// Whether blocks should be split, used when the split mode is [`SplitMode::Auto`](crate::SplitMode::Auto).
    fn split(&self, ctx: &BlockContext) -> bool;
}

/// Cache-size based heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTuner;
impl BlockPolicy for SimpleTuner {
    fn blocksize(&self, ctx: &BlockContext) -> usize {
        let mut blocksize = consts::L1;
        if is_high_ratio_codec(ctx.codec) {
            blocksize *= 2;
        }
        blocksize = match ctx.clevel {
            0 => blocksize / 4,
            1 => blocksize / 2,
            2..=5 => blocksize,
            6..=7 => blocksize * 2,
            _ => blocksize * 4,
        };
        // Larger items compress better with larger blocks
        if ctx.typesize >= 8 {
            blocksize *= 2;
        }
        blocksize.min(4 * consts::L2)
    }

    fn split(&self, ctx: &BlockContext) -> bool {
        ctx.typesize <= 16 && (ctx.codec == consts::LZ4 || ctx.clevel <= 3)
    }
}

/// Adjusts the [`SimpleTuner`] block size to the compressibility of the data.
///
/// The compressibility is estimated from the number of distinct byte values in a sample of the chunk. The
/// estimation is deterministic, the same data always produce the same blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveTuner;
impl AdaptiveTuner {
    const SAMPLE_LEN: usize = 4096;

    fn diversity(src: &[u8]) -> usize {
        let mut seen = [false; 256];
        let step = (src.len() / Self::SAMPLE_LEN).max(1);
        for b in src.iter().step_by(step) {
            seen[*b as usize] = true;
        }
        seen.iter().filter(|s| **s).count()
    }
}
impl BlockPolicy for AdaptiveTuner {
    fn blocksize(&self, ctx: &BlockContext) -> usize {
        let blocksize = SimpleTuner.blocksize(ctx);
        match Self::diversity(ctx.src) {
            0..=16 => blocksize * 4,
            17..=128 => blocksize * 2,
            129..=224 => blocksize,
            _ => (blocksize / 2).max(consts::L1 / 2),
        }
    }

    fn split(&self, ctx: &BlockContext) -> bool {
        SimpleTuner.split(ctx) && Self::diversity(ctx.src) <= 224
    }
}

pub(crate) fn tuner_policy(tuner: Tuner) -> &'static dyn BlockPolicy {
    match tuner {
        Tuner::Simple => &SimpleTuner,
        Tuner::Adaptive => &AdaptiveTuner,
    }
}

fn is_high_ratio_codec(codec: u8) -> bool {
    matches!(codec, consts::ZLIB | consts::ZSTD)
}

/// Clamp a block size to the chunk size and round it down to a multiple of the typesize.
pub(crate) fn normalize_blocksize(blocksize: usize, nbytes: usize, typesize: usize) -> usize {
    if nbytes == 0 {
        return 0;
    }
    let blocksize = blocksize.clamp(1, nbytes);
    if blocksize < typesize || nbytes < typesize {
        return nbytes.min(typesize);
    }
    blocksize - blocksize % typesize
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::{normalize_blocksize, AdaptiveTuner, BlockContext, BlockPolicy, SimpleTuner};
    use crate::constants as consts;

    fn ctx(codec: u8, clevel: u8, typesize: usize, src: &[u8]) -> BlockContext {
        BlockContext {
            codec,
            clevel,
            typesize,
            nbytes: src.len(),
            src,
        }
    }

    #[test]
    fn normalize() {
        assert_eq!(0, normalize_blocksize(1000, 0, 4));
        assert_eq!(100, normalize_blocksize(1000, 100, 4));
        assert_eq!(96, normalize_blocksize(99, 100, 4));
        assert_eq!(4, normalize_blocksize(1, 100, 4));
        assert_eq!(3, normalize_blocksize(1000, 3, 8));

        let mut rand = StdRng::seed_from_u64(0x9e8a);
        for _ in 0..200 {
            let typesize = rand.random_range(1..=32);
            let nbytes = typesize * rand.random_range(1..10000);
            let blocksize = normalize_blocksize(rand.random_range(1..100000), nbytes, typesize);
            assert!(blocksize <= nbytes);
            assert_eq!(0, blocksize % typesize);
            assert!(blocksize > 0);
        }
    }

    #[test]
    fn simple_tuner_grows_with_clevel() {
        let src = vec![0u8; 1 << 20];
        let low = SimpleTuner.blocksize(&ctx(consts::LZ4, 1, 4, &src));
        let high = SimpleTuner.blocksize(&ctx(consts::LZ4, 9, 4, &src));
        assert!(low < high);
        let zstd = SimpleTuner.blocksize(&ctx(consts::ZSTD, 5, 4, &src));
        let lz4 = SimpleTuner.blocksize(&ctx(consts::LZ4, 5, 4, &src));
        assert!(lz4 < zstd);
    }

    #[test]
    fn simple_tuner_split() {
        let src = [0u8; 64];
        assert!(SimpleTuner.split(&ctx(consts::LZ4, 9, 8, &src)));
        assert!(!SimpleTuner.split(&ctx(consts::ZSTD, 9, 8, &src)));
        assert!(SimpleTuner.split(&ctx(consts::ZSTD, 1, 8, &src)));
        assert!(!SimpleTuner.split(&ctx(consts::LZ4, 9, 32, &src)));
    }

    #[test]
    fn adaptive_tuner_prefers_large_blocks_for_repetitive_data() {
        let mut rand = StdRng::seed_from_u64(0x51d3);
        let random = rand.random_iter().take(1 << 16).collect::<Vec<u8>>();
        let repetitive = (0..1 << 16).map(|i| (i % 4) as u8).collect::<Vec<u8>>();

        let random_bs = AdaptiveTuner.blocksize(&ctx(consts::LZ4, 5, 4, &random));
        let repetitive_bs = AdaptiveTuner.blocksize(&ctx(consts::LZ4, 5, 4, &repetitive));
        assert!(random_bs < repetitive_bs);
        assert_eq!(
            random_bs,
            AdaptiveTuner.blocksize(&ctx(consts::LZ4, 5, 4, &random))
        );
    }
}
