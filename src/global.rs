use std::sync::{Arc, LazyLock};

use crate::Registry;

static GLOBAL_REGISTRY: LazyLock<Arc<Registry>> = LazyLock::new(|| {
    log::debug!(target: "superchunk", "initializing the global registry");
    Registry::with_builtins()
});

pub(crate) fn global_registry() -> &'static Arc<Registry> {
    &GLOBAL_REGISTRY
}
