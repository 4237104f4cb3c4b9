//! Codec and filter registry.
//!
//! A [`Registry`] maps codec and filter ids to their implementations. Every encoder and decoder holds a handle to
//! a registry, and resolves the ids of the pipeline through it. The built-in codecs and filters are always
//! registered, and user transforms can be added under ids in range
//! `[USER_REGISTERED_CODECS_START, 255]`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::constants as consts;
use crate::error::{TransformError, TransformKind};
use crate::Error;

/// Parameters passed to codec functions.
#[derive(Debug, Clone, Copy)]
pub struct CodecParams<'a> {
    /// The compression level, in range [1, 9].
    pub clevel: u8,
    /// The codec metadata byte of the pipeline.
    pub meta: u8,
    /// The typesize of the data.
    pub typesize: usize,
    /// A trained dictionary, if the chunk uses one.
    pub dict: Option<&'a [u8]>,
}

/// Parameters passed to filter functions.
#[derive(Debug, Clone, Copy)]
pub struct FilterParams {
    /// The typesize of the data.
    pub typesize: usize,
    /// The filter metadata byte of the pipeline slot.
    pub meta: u8,
}

/// A codec encode function, compressing a block.
pub type EncodeFn = Arc<dyn Fn(&[u8], &CodecParams) -> Result<Vec<u8>, TransformError> + Send + Sync>;
/// A codec decode function, decompressing a block into exactly `expected_len` bytes.
pub type DecodeFn =
    Arc<dyn Fn(&[u8], usize, &CodecParams) -> Result<Vec<u8>, TransformError> + Send + Sync>;
/// A filter function, forward or backward, mapping a block to a block of the same length.
pub type FilterFn = Arc<dyn Fn(&[u8], &FilterParams) -> Result<Vec<u8>, TransformError> + Send + Sync>;

/// A registered codec.
pub struct CodecEntry {
    /// The codec id.
    pub id: u8,
    /// The codec name.
    pub name: String,
    /// The compress function.
    pub encode: EncodeFn,
    /// The decompress function.
    pub decode: DecodeFn,
}
impl std::fmt::Debug for CodecEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A registered filter.
pub struct FilterEntry {
    /// The filter id.
    pub id: u8,
    /// The filter name.
    pub name: String,
    /// The function applied before compression.
    pub forward: FilterFn,
    /// The function applied after decompression.
    pub backward: FilterFn,
}
impl std::fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A registry of codecs and filters.
///
/// The registry is append only, except for [`Self::register_codec_override`] and
/// [`Self::register_filter_override`] which replace user entries. Lookups return a shared handle to an entry, so
/// a reader observes either the mapping before or after a registration, never a partial entry.
#[derive(Debug, Default)]
pub struct Registry {
    codecs: RwLock<HashMap<u8, Arc<CodecEntry>>>,
    filters: RwLock<HashMap<u8, Arc<FilterEntry>>>,
}

impl Registry {
    /// Create a new registry with the built-in codecs and filters.
    pub fn with_builtins() -> Arc<Registry> {
        let registry = Registry::default();
        {
            let mut codecs = registry.codecs.write().unwrap_or_else(|e| e.into_inner());
            for entry in crate::codecs::builtins() {
                codecs.insert(entry.id, Arc::new(entry));
            }
            let mut filters = registry.filters.write().unwrap_or_else(|e| e.into_inner());
            for entry in crate::filters::builtins() {
                filters.insert(entry.id, Arc::new(entry));
            }
        }
        Arc::new(registry)
    }

    /// The default registry, used by the constructors that do not take an explicit registry.
    ///
    /// The registry is created on first use.
    pub fn global() -> &'static Arc<Registry> {
        crate::global::global_registry()
    }

    /// Register a new codec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if the id is already registered or belongs to the built-in range, and
    /// [`Error::Config`] if the id is outside the user range.
    pub fn register_codec<E, D>(&self, id: u8, name: &str, encode: E, decode: D) -> Result<(), Error>
    where
        E: Fn(&[u8], &CodecParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
        D: Fn(&[u8], usize, &CodecParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
    {
        self.insert_codec(id, name, Arc::new(encode), Arc::new(decode), false)
    }

    /// Register a codec, replacing a user codec previously registered under the same id.
    ///
    /// Built-in codecs can not be replaced.
    pub fn register_codec_override<E, D>(
        &self,
        id: u8,
        name: &str,
        encode: E,
        decode: D,
    ) -> Result<(), Error>
    where
        E: Fn(&[u8], &CodecParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
        D: Fn(&[u8], usize, &CodecParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
    {
        self.insert_codec(id, name, Arc::new(encode), Arc::new(decode), true)
    }

    fn insert_codec(
        &self,
        id: u8,
        name: &str,
        encode: EncodeFn,
        decode: DecodeFn,
        replace: bool,
    ) -> Result<(), Error> {
        check_user_id(TransformKind::Codec, id, consts::DEFINED_CODECS_STOP, consts::USER_REGISTERED_CODECS_START)?;
        let mut codecs = self.codecs.write().unwrap_or_else(|e| e.into_inner());
        if !replace && codecs.contains_key(&id) {
            crate::trace!("codec {} is already registered", id);
            return Err(Error::DuplicateId {
                kind: TransformKind::Codec,
                id,
            });
        }
        log::debug!(target: "superchunk", "registering codec {} '{}'", id, name);
        codecs.insert(
            id,
            Arc::new(CodecEntry {
                id,
                name: name.to_string(),
                encode,
                decode,
            }),
        );
        Ok(())
    }

    /// Register a new filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if the id is already registered or belongs to the built-in range, and
    /// [`Error::Config`] if the id is outside the user range.
    pub fn register_filter<F, B>(&self, id: u8, name: &str, forward: F, backward: B) -> Result<(), Error>
    where
        F: Fn(&[u8], &FilterParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
        B: Fn(&[u8], &FilterParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
    {
        self.insert_filter(id, name, Arc::new(forward), Arc::new(backward), false)
    }

    /// Register a filter, replacing a user filter previously registered under the same id.
    ///
    /// Built-in filters can not be replaced.
    pub fn register_filter_override<F, B>(
        &self,
        id: u8,
        name: &str,
        forward: F,
        backward: B,
    ) -> Result<(), Error>
    where
        F: Fn(&[u8], &FilterParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
        B: Fn(&[u8], &FilterParams) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
    {
        self.insert_filter(id, name, Arc::new(forward), Arc::new(backward), true)
    }

    fn insert_filter(
        &self,
        id: u8,
        name: &str,
        forward: FilterFn,
        backward: FilterFn,
        replace: bool,
    ) -> Result<(), Error> {
        check_user_id(TransformKind::Filter, id, consts::DEFINED_FILTERS_STOP, consts::USER_REGISTERED_FILTERS_START)?;
        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        if !replace && filters.contains_key(&id) {
            crate::trace!("filter {} is already registered", id);
            return Err(Error::DuplicateId {
                kind: TransformKind::Filter,
                id,
            });
        }
        log::debug!(target: "superchunk", "registering filter {} '{}'", id, name);
        filters.insert(
            id,
            Arc::new(FilterEntry {
                id,
                name: name.to_string(),
                forward,
                backward,
            }),
        );
        Ok(())
    }

    /// Get a codec by its id.
    pub fn lookup_codec(&self, id: u8) -> Result<Arc<CodecEntry>, Error> {
        let codecs = self.codecs.read().unwrap_or_else(|e| e.into_inner());
        codecs.get(&id).cloned().ok_or_else(|| {
            crate::trace!("no codec registered with id {}", id);
            Error::UnknownTransform {
                kind: TransformKind::Codec,
                id,
            }
        })
    }

    /// Get a filter by its id.
    pub fn lookup_filter(&self, id: u8) -> Result<Arc<FilterEntry>, Error> {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
        filters.get(&id).cloned().ok_or_else(|| {
            crate::trace!("no filter registered with id {}", id);
            Error::UnknownTransform {
                kind: TransformKind::Filter,
                id,
            }
        })
    }

    /// List the registered codecs as `(id, name)` pairs, sorted by id.
    pub fn codec_names(&self) -> Vec<(u8, String)> {
        let codecs = self.codecs.read().unwrap_or_else(|e| e.into_inner());
        let mut names = codecs.values().map(|c| (c.id, c.name.clone())).collect::<Vec<_>>();
        names.sort();
        names
    }

    /// List the registered filters as `(id, name)` pairs, sorted by id.
    pub fn filter_names(&self) -> Vec<(u8, String)> {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
        let mut names = filters.values().map(|f| (f.id, f.name.clone())).collect::<Vec<_>>();
        names.sort();
        names
    }
}

fn check_user_id(kind: TransformKind, id: u8, builtin_stop: u8, user_start: u8) -> Result<(), Error> {
    if id <= builtin_stop {
        crate::trace!("{} id {} is reserved for built-ins", kind, id);
        return Err(Error::DuplicateId { kind, id });
    }
    if id < user_start {
        return Err(Error::config(format!(
            "{kind} id {id} is not in the user range [{user_start}, 255]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{CodecParams, FilterParams, Registry};
    use crate::constants as consts;
    use crate::error::{TransformError, TransformKind};
    use crate::Error;

    fn identity_encode(src: &[u8], _: &CodecParams) -> Result<Vec<u8>, TransformError> {
        Ok(src.to_vec())
    }
    fn identity_decode(src: &[u8], _: usize, _: &CodecParams) -> Result<Vec<u8>, TransformError> {
        Ok(src.to_vec())
    }
    fn identity_filter(src: &[u8], _: &FilterParams) -> Result<Vec<u8>, TransformError> {
        Ok(src.to_vec())
    }

    #[test]
    fn builtins() {
        let registry = Registry::with_builtins();
        assert_eq!("lz4", registry.lookup_codec(consts::LZ4).unwrap().name);
        for id in [consts::SHUFFLE, consts::BITSHUFFLE, consts::DELTA, consts::TRUNC_PREC] {
            assert!(registry.lookup_filter(id).is_ok());
        }
        assert!(registry.codec_names().iter().any(|(id, _)| *id == consts::LZ4));
        assert!(matches!(
            registry.lookup_codec(200),
            Err(Error::UnknownTransform {
                kind: TransformKind::Codec,
                id: 200
            })
        ));
    }

    #[test]
    fn register_ranges() {
        let registry = Registry::with_builtins();
        assert!(matches!(
            registry.register_codec(consts::LZ4, "mine", identity_encode, identity_decode),
            Err(Error::DuplicateId { id: 1, .. })
        ));
        assert!(matches!(
            registry.register_codec(100, "mine", identity_encode, identity_decode),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            registry.register_filter(consts::SHUFFLE, "mine", identity_filter, identity_filter),
            Err(Error::DuplicateId { id: 1, .. })
        ));
        assert!(matches!(
            registry.register_filter(32, "mine", identity_filter, identity_filter),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn register_duplicate_and_override() {
        let registry = Registry::with_builtins();
        registry
            .register_codec(200, "first", identity_encode, identity_decode)
            .unwrap();
        assert!(matches!(
            registry.register_codec(200, "second", identity_encode, identity_decode),
            Err(Error::DuplicateId { id: 200, .. })
        ));
        assert_eq!("first", registry.lookup_codec(200).unwrap().name);

        registry
            .register_codec_override(200, "second", identity_encode, identity_decode)
            .unwrap();
        assert_eq!("second", registry.lookup_codec(200).unwrap().name);

        registry
            .register_filter(250, "noop", identity_filter, identity_filter)
            .unwrap();
        registry
            .register_filter_override(250, "noop2", identity_filter, identity_filter)
            .unwrap();
        assert_eq!("noop2", registry.lookup_filter(250).unwrap().name);
    }

    #[test]
    fn registries_are_independent() {
        let a = Registry::with_builtins();
        let b = Registry::with_builtins();
        a.register_codec(201, "a", identity_encode, identity_decode)
            .unwrap();
        assert!(a.lookup_codec(201).is_ok());
        assert!(b.lookup_codec(201).is_err());
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn concurrent_registration() {
        let registry = Registry::with_builtins();
        std::thread::scope(|s| {
            for id in 160..=200u8 {
                let registry = &registry;
                s.spawn(move || {
                    registry
                        .register_codec(id, "concurrent", identity_encode, identity_decode)
                        .unwrap();
                    assert!(registry.lookup_codec(id).is_ok());
                });
            }
        });
        assert!(registry.codec_names().len() > 40);
    }
}
