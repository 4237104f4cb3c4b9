use std::sync::Arc;

use crate::constants as consts;
use crate::tune::BlockPolicy;
use crate::{Error, TransformError};

/// Compression algorithms supported by the library.
///
/// The library itself always uses some "backend" compression algorithm, such as `lz4`, `zlib` or `zstd`, or a
/// codec registered by the user in a [`Registry`](crate::Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressAlgo {
    /// LZ4 compression algorithm.
    Lz4,
    /// Zlib compression algorithm.
    #[cfg(feature = "zlib")]
    Zlib,
    /// Zstandard compression algorithm.
    #[cfg(feature = "zstd")]
    Zstd,
    /// A user registered codec, identified by its id.
    ///
    /// User ids are in range `[160, 255]`, see [`Registry::register_codec`](crate::Registry::register_codec).
    User(u8),
}
impl CompressAlgo {
    /// The codec id stored in chunk headers.
    pub fn id(&self) -> u8 {
        match self {
            CompressAlgo::Lz4 => consts::LZ4,
            #[cfg(feature = "zlib")]
            CompressAlgo::Zlib => consts::ZLIB,
            #[cfg(feature = "zstd")]
            CompressAlgo::Zstd => consts::ZSTD,
            CompressAlgo::User(id) => *id,
        }
    }

    /// Get the algorithm of a codec id.
    ///
    /// Ids that do not match a built-in algorithm are mapped to [`CompressAlgo::User`].
    pub fn from_id(id: u8) -> Self {
        match id {
            consts::LZ4 => CompressAlgo::Lz4,
            #[cfg(feature = "zlib")]
            consts::ZLIB => CompressAlgo::Zlib,
            #[cfg(feature = "zstd")]
            consts::ZSTD => CompressAlgo::Zstd,
            id => CompressAlgo::User(id),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "lz4" => CompressAlgo::Lz4,
            #[cfg(feature = "zlib")]
            "zlib" => CompressAlgo::Zlib,
            #[cfg(feature = "zstd")]
            "zstd" => CompressAlgo::Zstd,
            _ => return None,
        })
    }
}

/// Filters that can be applied to the data before compression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Filter {
    /// Byte shuffle filter.
    ///
    /// Given an array of bytes, representing N elements of a type with S bytes, the filter rearrange the bytes from
    /// `[1_1, 1_2, ..., 1_S, 2_1, 2_2, ..., 2_S, ..., N_1, N_2, ..., N_S]` to
    /// `[1_1, 2_1, ..., N_1, 1_2, 2_2, ..., N_2, ..., 1_S, 2_S, ..., N_S]`,
    /// where `i_j` is the j-th byte of the i-th element.
    ByteShuffle,
    /// Bit shuffle filter.
    ///
    /// Similar to `ByteShuffle`, but operates on bits instead of bytes.
    BitShuffle,
    /// Delta filter.
    ///
    /// This filter encodes every element as the bitwise difference (XOR) from its preceding element.
    Delta,
    /// Truncation precision filter for floating point data.
    ///
    /// This filter reduces the precision of floating point numbers by truncating the least
    /// significant bits. It is lossy, decompression does not restore the truncated bits.
    ///
    /// This filter is only supported for floating point types (e.g., `f32`, `f64`). This can not
    /// be enforced by the library, there it is only checked that the typesize is 4 or 8 bytes.
    TruncPrecision {
        /// The number of bits to truncate.
        ///
        /// Positive value will set absolute precision bits, whereas negative
        /// value will reduce the precision bits (similar to Python slicing convention).
        prec_bits: i8,
    },
    /// A user registered filter, see [`Registry::register_filter`](crate::Registry::register_filter).
    User {
        /// The filter id, in range `[160, 255]`.
        id: u8,
        /// A metadata byte passed to the filter functions.
        meta: u8,
    },
}
impl Filter {
    fn to_code(&self) -> (u8, u8) {
        match self {
            Filter::ByteShuffle => (consts::SHUFFLE, 0),
            Filter::BitShuffle => (consts::BITSHUFFLE, 0),
            Filter::Delta => (consts::DELTA, 0),
            Filter::TruncPrecision { prec_bits } => (consts::TRUNC_PREC, *prec_bits as u8),
            Filter::User { id, meta } => (*id, *meta),
        }
    }

    fn from_code(id: u8, meta: u8) -> Option<Self> {
        Some(match id {
            consts::NOFILTER => return None,
            consts::SHUFFLE => Filter::ByteShuffle,
            consts::BITSHUFFLE => Filter::BitShuffle,
            consts::DELTA => Filter::Delta,
            consts::TRUNC_PREC => Filter::TruncPrecision {
                prec_bits: meta as i8,
            },
            id => Filter::User { id, meta },
        })
    }
}

/// A split mode option for encoders.
///
/// A split chunk is compressed as multiple independent blocks, which can be compressed and decompressed in
/// parallel and allow random access to items, at the cost of a small per-block overhead.
#[allow(missing_docs)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SplitMode {
    Always = consts::ALWAYS_SPLIT as _,
    Never = consts::NEVER_SPLIT as _,
    Auto = consts::AUTO_SPLIT as _,
    ForwardCompat = consts::FORWARD_COMPAT_SPLIT as _,
}
impl SplitMode {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            consts::ALWAYS_SPLIT => SplitMode::Always,
            consts::NEVER_SPLIT => SplitMode::Never,
            consts::AUTO_SPLIT => SplitMode::Auto,
            consts::FORWARD_COMPAT_SPLIT => SplitMode::ForwardCompat,
            _ => return None,
        })
    }
}

/// The tuner used to choose block sizes and split decisions.
///
/// See [`BlockPolicy`] for plugging a custom policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum Tuner {
    /// Cache-size based heuristics, the default.
    #[default]
    Simple = consts::STUNE as _,
    /// Like `Simple`, but adjusts the block size to the sampled compressibility of the data.
    Adaptive = consts::ATUNE as _,
}
impl Tuner {
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            consts::STUNE => Tuner::Simple,
            consts::ATUNE => Tuner::Adaptive,
            _ => return None,
        })
    }
}

/// Context passed to prefilter and postfilter hooks.
#[derive(Debug, Clone, Copy)]
pub struct HookContext {
    /// The index of the chunk within its super chunk, if the chunk belongs to one.
    pub nchunk: Option<usize>,
    /// The typesize of the chunk.
    pub typesize: usize,
    /// The (uncompressed) size of the chunk.
    pub nbytes: usize,
}

/// A whole-chunk hook, used as a prefilter or a postfilter.
///
/// The hook reads the source buffer and writes the transformed data into a destination buffer of the same length.
pub type Hook = Arc<dyn Fn(&[u8], &mut [u8], &HookContext) -> Result<(), TransformError> + Send + Sync>;

/// Compression parameters, used by [`Encoder`](crate::chunk::Encoder) and [`SChunk`](crate::chunk::SChunk).
#[derive(Clone)]
pub struct CParams {
    pub(crate) codec: u8,
    pub(crate) codec_meta: u8,
    pub(crate) clevel: u8,
    pub(crate) typesize: usize,
    pub(crate) nthreads: usize,
    pub(crate) blocksize: usize,
    pub(crate) splitmode: SplitMode,
    pub(crate) filters: [u8; consts::MAX_FILTERS],
    pub(crate) filters_meta: [u8; consts::MAX_FILTERS],
    pub(crate) use_dict: bool,
    pub(crate) tuner: Tuner,
    pub(crate) block_policy: Option<Arc<dyn BlockPolicy>>,
    pub(crate) prefilter: Option<Hook>,
}
impl Default for CParams {
    fn default() -> Self {
        let mut filters = [consts::NOFILTER; consts::MAX_FILTERS];
        filters[0] = consts::SHUFFLE;
        Self {
            codec: consts::LZ4,
            codec_meta: 0,
            clevel: 5,
            typesize: 8,
            nthreads: 1,
            blocksize: 0,
            splitmode: SplitMode::ForwardCompat,
            filters,
            filters_meta: [0; consts::MAX_FILTERS],
            use_dict: false,
            tuner: Tuner::Simple,
            block_policy: None,
            prefilter: None,
        }
    }
}
impl CParams {
    /// Set the compressor to use.
    ///
    /// By default, the compressor is set to `Lz4`.
    pub fn compressor(&mut self, compressor: CompressAlgo) -> &mut Self {
        self.codec = compressor.id();
        self
    }
    /// Get the compressor currently set in the parameters.
    pub fn get_compressor(&self) -> CompressAlgo {
        CompressAlgo::from_id(self.codec)
    }

    /// Set the codec by its raw id, built-in or user registered.
    pub fn codec(&mut self, id: u8) -> &mut Self {
        self.codec = id;
        self
    }
    /// Get the raw codec id currently set in the parameters.
    pub fn get_codec(&self) -> u8 {
        self.codec
    }

    /// Set the metadata byte passed to the codec.
    ///
    /// By default, the codec metadata is 0.
    pub fn codec_meta(&mut self, meta: u8) -> &mut Self {
        self.codec_meta = meta;
        self
    }
    /// Get the codec metadata byte currently set in the parameters.
    pub fn get_codec_meta(&self) -> u8 {
        self.codec_meta
    }

    /// Set the compression level, in range [0, 9].
    ///
    /// Level 0 stores the data without compression.
    ///
    /// By default, the compression level is set to 5.
    pub fn clevel(&mut self, clevel: u32) -> &mut Self {
        self.clevel = clevel.min(u8::MAX as u32) as u8;
        self
    }
    /// Get the compression level currently set in the parameters.
    pub fn get_clevel(&self) -> u32 {
        self.clevel as u32
    }

    /// Set the typesize of the data to compress (in bytes).
    ///
    /// The typesize must be in range [1, 255].
    ///
    /// By default, the typesize is set to 8 bytes.
    pub fn typesize(&mut self, typesize: usize) -> Result<&mut Self, Error> {
        if !(1..=consts::MAX_TYPESIZE).contains(&typesize) {
            return Err(Error::config(format!(
                "Itemsize {} is not in range [1, {}]",
                typesize,
                consts::MAX_TYPESIZE
            )));
        }
        self.typesize = typesize;
        Ok(self)
    }
    /// Get the typesize currently set in the parameters.
    pub fn get_typesize(&self) -> usize {
        debug_assert!(self.typesize > 0);
        self.typesize
    }

    /// Set the number of threads to use for compression.
    ///
    /// By default, the number of threads is set to 1.
    pub fn nthreads(&mut self, nthreads: usize) -> &mut Self {
        self.nthreads = nthreads.max(1);
        self
    }
    /// Get the number of threads currently set in the parameters.
    pub fn get_nthreads(&self) -> usize {
        self.nthreads
    }

    /// Set the block size for compression.
    ///
    /// `None` means automatic block size.
    ///
    /// By default, an automatic block size is used.
    pub fn blocksize(&mut self, blocksize: Option<usize>) -> &mut Self {
        self.blocksize = match blocksize {
            None => 0, // auto
            Some(0) => 1,
            Some(blocksize) => blocksize,
        };
        self
    }
    /// Get the block size currently set in the parameters.
    ///
    /// `None` means automatic block size.
    pub fn get_blocksize(&self) -> Option<usize> {
        (self.blocksize > 0).then_some(self.blocksize)
    }

    /// Set the split mode for the encoder.
    ///
    /// By default, the split mode is set to `ForwardCompat`.
    pub fn splitmode(&mut self, splitmode: SplitMode) -> &mut Self {
        self.splitmode = splitmode;
        self
    }
    /// Get the split mode currently set in the parameters.
    pub fn get_splitmode(&self) -> SplitMode {
        self.splitmode
    }

    /// Set the filters to apply before compression.
    ///
    /// The maximum number of filters is 6. The filters are applied in order during compression, and in reverse
    /// order during decompression.
    ///
    /// By default, a single `ByteShuffle` filter is applied.
    pub fn filters(&mut self, filters: &[Filter]) -> Result<&mut Self, Error> {
        if filters.len() > consts::MAX_FILTERS {
            return Err(Error::config(format!(
                "Too many filters, maximum is {}",
                consts::MAX_FILTERS
            )));
        }
        self.filters = [consts::NOFILTER; consts::MAX_FILTERS];
        self.filters_meta = [0; consts::MAX_FILTERS];
        for (i, filter) in filters.iter().enumerate() {
            let (filter, meta) = filter.to_code();
            self.filters[i] = filter;
            self.filters_meta[i] = meta;
        }
        Ok(self)
    }
    /// Get the filters currently set in the parameters.
    pub fn get_filters(&self) -> impl Iterator<Item = Filter> {
        let filters = self.filters;
        let filters_meta = self.filters_meta;
        filters
            .into_iter()
            .zip(filters_meta)
            .filter_map(|(f, meta)| Filter::from_code(f, meta))
    }

    /// Set whether a compression dictionary should be trained and stored in each chunk.
    ///
    /// Dictionaries are only used by the `Zstd` codec, and only for chunks with more than one block.
    ///
    /// By default, dictionaries are not used.
    pub fn use_dict(&mut self, use_dict: bool) -> &mut Self {
        self.use_dict = use_dict;
        self
    }
    /// Get whether dictionaries are enabled in the parameters.
    pub fn get_use_dict(&self) -> bool {
        self.use_dict
    }

    /// Set the tuner used for automatic block sizes and split decisions.
    ///
    /// By default, the `Simple` tuner is used.
    pub fn tuner(&mut self, tuner: Tuner) -> &mut Self {
        self.tuner = tuner;
        self
    }
    /// Get the tuner currently set in the parameters.
    pub fn get_tuner(&self) -> Tuner {
        self.tuner
    }

    /// Set a custom block policy, overriding the tuner.
    ///
    /// The policy only affects performance, chunks remain readable by any decoder. The policy is not persisted in
    /// frames.
    pub fn block_policy(&mut self, policy: Option<Arc<dyn BlockPolicy>>) -> &mut Self {
        self.block_policy = policy;
        self
    }

    /// Set a prefilter, a hook applied to the whole chunk data before the filters pipeline and compression.
    ///
    /// The prefilter is not persisted in frames, and a matching postfilter should be set in the [`DParams`] used
    /// for decompression if the prefilter is not idempotent to the reader.
    pub fn prefilter<F>(&mut self, prefilter: F) -> &mut Self
    where
        F: Fn(&[u8], &mut [u8], &HookContext) -> Result<(), TransformError> + Send + Sync + 'static,
    {
        self.prefilter = Some(Arc::new(prefilter));
        self
    }
    /// Remove the prefilter, if set.
    pub fn clear_prefilter(&mut self) -> &mut Self {
        self.prefilter = None;
        self
    }
    /// Check whether a prefilter is set.
    pub fn has_prefilter(&self) -> bool {
        self.prefilter.is_some()
    }

    /// Override the parameters from the `BLOSC_*` environment variables.
    ///
    /// The following variables are read, if set:
    /// - `BLOSC_CLEVEL`: the compression level.
    /// - `BLOSC_COMPRESSOR`: the compressor name (`lz4`, `zlib` or `zstd`).
    /// - `BLOSC_NTHREADS`: the number of threads.
    /// - `BLOSC_BLOCKSIZE`: the block size, 0 means automatic.
    /// - `BLOSC_TYPESIZE`: the typesize.
    /// - `BLOSC_SPLITMODE`: one of `ALWAYS`, `NEVER`, `AUTO` or `FORWARD_COMPAT`.
    /// - `BLOSC_SHUFFLE`: one of `NOSHUFFLE`, `SHUFFLE` or `BITSHUFFLE`, replacing the shuffle filter.
    /// - `BLOSC_DELTA`: `1` to add a delta filter as the first filter, `0` to remove it.
    pub fn apply_env(&mut self) -> Result<&mut Self, Error> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Override the parameters from variables provided by a lookup function.
    ///
    /// See [`Self::apply_env`] for the variables.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<&mut Self, Error> {
        if let Some(clevel) = lookup("BLOSC_CLEVEL") {
            let clevel: u32 = parse_env("BLOSC_CLEVEL", &clevel)?;
            if clevel > 9 {
                return Err(Error::config(format!("BLOSC_CLEVEL {clevel} is not in range [0, 9]")));
            }
            self.clevel(clevel);
        }
        if let Some(name) = lookup("BLOSC_COMPRESSOR") {
            let algo = CompressAlgo::from_name(&name)
                .ok_or_else(|| Error::config(format!("Unknown BLOSC_COMPRESSOR '{name}'")))?;
            self.compressor(algo);
        }
        if let Some(nthreads) = lookup("BLOSC_NTHREADS") {
            self.nthreads(parse_env("BLOSC_NTHREADS", &nthreads)?);
        }
        if let Some(blocksize) = lookup("BLOSC_BLOCKSIZE") {
            let blocksize: usize = parse_env("BLOSC_BLOCKSIZE", &blocksize)?;
            self.blocksize((blocksize > 0).then_some(blocksize));
        }
        if let Some(typesize) = lookup("BLOSC_TYPESIZE") {
            self.typesize(parse_env("BLOSC_TYPESIZE", &typesize)?)?;
        }
        if let Some(mode) = lookup("BLOSC_SPLITMODE") {
            self.splitmode(match mode.to_ascii_uppercase().as_str() {
                "ALWAYS" => SplitMode::Always,
                "NEVER" => SplitMode::Never,
                "AUTO" => SplitMode::Auto,
                "FORWARD_COMPAT" => SplitMode::ForwardCompat,
                _ => return Err(Error::config(format!("Unknown BLOSC_SPLITMODE '{mode}'"))),
            });
        }

        let mut filters = self.get_filters().collect::<Vec<_>>();
        if let Some(shuffle) = lookup("BLOSC_SHUFFLE") {
            let shuffle = match shuffle.to_ascii_uppercase().as_str() {
                "NOSHUFFLE" => None,
                "SHUFFLE" => Some(Filter::ByteShuffle),
                "BITSHUFFLE" => Some(Filter::BitShuffle),
                _ => return Err(Error::config(format!("Unknown BLOSC_SHUFFLE '{shuffle}'"))),
            };
            filters.retain(|f| !matches!(f, Filter::ByteShuffle | Filter::BitShuffle));
            filters.extend(shuffle);
        }
        if let Some(delta) = lookup("BLOSC_DELTA") {
            filters.retain(|f| *f != Filter::Delta);
            match delta.as_str() {
                "1" => filters.insert(0, Filter::Delta),
                "0" => {}
                _ => return Err(Error::config(format!("Unknown BLOSC_DELTA '{delta}'"))),
            }
        }
        self.filters(&filters)?;
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.clevel > 9 {
            return Err(Error::config(format!(
                "Compression level {} is not in range [0, 9]",
                self.clevel
            )));
        }
        if !(1..=consts::MAX_TYPESIZE).contains(&self.typesize) {
            return Err(Error::config(format!("Invalid typesize {}", self.typesize)));
        }
        Ok(())
    }

    /// Check whether two parameters produce chunks with the same pipeline, ignoring threads and hooks.
    pub(crate) fn same_pipeline(&self, other: &CParams) -> bool {
        self.codec == other.codec
            && self.codec_meta == other.codec_meta
            && self.clevel == other.clevel
            && self.typesize == other.typesize
            && self.blocksize == other.blocksize
            && self.splitmode == other.splitmode
            && self.filters == other.filters
            && self.filters_meta == other.filters_meta
            && self.use_dict == other.use_dict
            && self.prefilter.is_none()
            && other.prefilter.is_none()
    }
}
impl std::fmt::Debug for CParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CParams")
            .field("compressor", &self.get_compressor())
            .field("codec_meta", &self.codec_meta)
            .field("clevel", &self.get_clevel())
            .field("typesize", &self.get_typesize())
            .field("nthreads", &self.get_nthreads())
            .field("blocksize", &self.get_blocksize())
            .field("splitmode", &self.get_splitmode())
            .field("filters", &self.get_filters().collect::<Vec<_>>())
            .field("use_dict", &self.use_dict)
            .field("tuner", &self.tuner)
            .field("prefilter", &self.prefilter.is_some())
            .finish()
    }
}

/// Decompression parameters, used by [`Decoder`](crate::chunk::Decoder) and [`SChunk`](crate::chunk::SChunk).
#[derive(Clone)]
pub struct DParams {
    pub(crate) nthreads: usize,
    pub(crate) postfilter: Option<Hook>,
}
impl Default for DParams {
    fn default() -> Self {
        Self {
            nthreads: 1,
            postfilter: None,
        }
    }
}
impl DParams {
    /// Set the number of threads to use for decompression.
    ///
    /// By default, the number of threads is set to 1.
    pub fn nthreads(&mut self, nthreads: usize) -> &mut Self {
        self.nthreads = nthreads.max(1);
        self
    }
    /// Get the number of threads currently set in the parameters.
    pub fn get_nthreads(&self) -> usize {
        self.nthreads
    }

    /// Set a postfilter, a hook applied to the whole chunk data after decompression and the filters pipeline.
    pub fn postfilter<F>(&mut self, postfilter: F) -> &mut Self
    where
        F: Fn(&[u8], &mut [u8], &HookContext) -> Result<(), TransformError> + Send + Sync + 'static,
    {
        self.postfilter = Some(Arc::new(postfilter));
        self
    }
    /// Remove the postfilter, if set.
    pub fn clear_postfilter(&mut self) -> &mut Self {
        self.postfilter = None;
        self
    }
    /// Check whether a postfilter is set.
    pub fn has_postfilter(&self) -> bool {
        self.postfilter.is_some()
    }

    /// Override the number of threads from the `BLOSC_NTHREADS` environment variable, if set.
    pub fn apply_env(&mut self) -> Result<&mut Self, Error> {
        if let Ok(nthreads) = std::env::var("BLOSC_NTHREADS") {
            self.nthreads(parse_env("BLOSC_NTHREADS", &nthreads)?);
        }
        Ok(self)
    }
}
impl std::fmt::Debug for DParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DParams")
            .field("nthreads", &self.get_nthreads())
            .field("postfilter", &self.postfilter.is_some())
            .finish()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("Invalid value '{value}' for {key}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{CParams, CompressAlgo, Filter, SplitMode};
    use crate::Error;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn filters_round_trip() {
        let filters = [
            Filter::Delta,
            Filter::TruncPrecision { prec_bits: -3 },
            Filter::User { id: 170, meta: 9 },
            Filter::BitShuffle,
        ];
        let mut cparams = CParams::default();
        cparams.filters(&filters).unwrap();
        assert_eq!(filters.to_vec(), cparams.get_filters().collect::<Vec<_>>());

        let too_many = vec![Filter::ByteShuffle; 7];
        assert!(matches!(cparams.filters(&too_many), Err(Error::Config(_))));
    }

    #[test]
    fn typesize_range() {
        let mut cparams = CParams::default();
        assert!(cparams.typesize(0).is_err());
        assert!(cparams.typesize(256).is_err());
        assert_eq!(255, cparams.typesize(255).unwrap().get_typesize());
    }

    #[test]
    fn compressor_ids() {
        let mut cparams = CParams::default();
        assert_eq!(CompressAlgo::Lz4, cparams.get_compressor());
        cparams.compressor(CompressAlgo::User(200));
        assert_eq!(200, cparams.get_compressor().id());
        assert_eq!(CompressAlgo::User(200), CompressAlgo::from_id(200));
        assert_eq!(CompressAlgo::Lz4, CompressAlgo::from_id(1));
    }

    #[test]
    fn env_overrides() {
        let mut cparams = CParams::default();
        cparams
            .apply_env_with(lookup(&[
                ("BLOSC_CLEVEL", "9"),
                ("BLOSC_COMPRESSOR", "LZ4"),
                ("BLOSC_NTHREADS", "3"),
                ("BLOSC_BLOCKSIZE", "4096"),
                ("BLOSC_TYPESIZE", "4"),
                ("BLOSC_SPLITMODE", "never"),
                ("BLOSC_SHUFFLE", "BITSHUFFLE"),
                ("BLOSC_DELTA", "1"),
            ]))
            .unwrap();
        assert_eq!(9, cparams.get_clevel());
        assert_eq!(CompressAlgo::Lz4, cparams.get_compressor());
        assert_eq!(3, cparams.get_nthreads());
        assert_eq!(Some(4096), cparams.get_blocksize());
        assert_eq!(4, cparams.get_typesize());
        assert_eq!(SplitMode::Never, cparams.get_splitmode());
        assert_eq!(
            vec![Filter::Delta, Filter::BitShuffle],
            cparams.get_filters().collect::<Vec<_>>()
        );

        cparams
            .apply_env_with(lookup(&[("BLOSC_SHUFFLE", "NOSHUFFLE"), ("BLOSC_DELTA", "0")]))
            .unwrap();
        assert_eq!(0, cparams.get_filters().count());
    }

    #[test]
    fn env_invalid_values() {
        for (key, value) in [
            ("BLOSC_CLEVEL", "10"),
            ("BLOSC_CLEVEL", "high"),
            ("BLOSC_COMPRESSOR", "snappy"),
            ("BLOSC_TYPESIZE", "0"),
            ("BLOSC_SPLITMODE", "sometimes"),
            ("BLOSC_SHUFFLE", "twice"),
        ] {
            let mut cparams = CParams::default();
            assert!(
                matches!(cparams.apply_env_with(lookup(&[(key, value)])), Err(Error::Config(_))),
                "{key}={value}"
            );
        }
    }
}
