use crate::Registry;

/// Get a list of the compressors names registered in the global registry, sorted by id.
pub fn list_compressors() -> Vec<String> {
    Registry::global()
        .codec_names()
        .into_iter()
        .map(|(_, name)| name)
        .collect()
}

/// Get a list of the filters names registered in the global registry, sorted by id.
pub fn list_filters() -> Vec<String> {
    Registry::global()
        .filter_names()
        .into_iter()
        .map(|(_, name)| name)
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::{list_compressors, list_filters};

    #[test]
    fn builtins_are_listed() {
        let compressors = list_compressors();
        assert_eq!("lz4", compressors[0]);
        #[cfg(feature = "zlib")]
        assert!(compressors.iter().any(|c| c == "zlib"));
        #[cfg(feature = "zstd")]
        assert!(compressors.iter().any(|c| c == "zstd"));

        let filters = list_filters();
        for name in ["shuffle", "bitshuffle", "delta", "trunc_prec"] {
            assert!(filters.iter().any(|f| f == name), "missing filter {name}");
        }
    }
}
