use std::sync::OnceLock;

static TRACE_ENABLED: OnceLock<bool> = OnceLock::new();

#[inline(never)]
#[cold]
pub(crate) fn is_trace_enabled() -> bool {
    *TRACE_ENABLED.get_or_init(|| std::env::var_os("BLOSC_TRACE").is_some())
}

/// Report a failure site.
///
/// The message always goes to the `log` facade under the `superchunk` target, and is printed to stderr when
/// `BLOSC_TRACE` is set.
macro_rules! trace {
    ($($arg:tt)*) => {{
        log::debug!(target: "superchunk", $($arg)*);
        if $crate::tracing::is_trace_enabled() {
            eprintln!("[superchunk] {}", format_args!($($arg)*))
        }
    }};
}
pub(crate) use trace;
