//! Logging utilities for the nativebridge runtime
//!
//! Lightweight structured events for native calls, library loading and
//! trampoline dispatch. Uses `tracing`, so disabled levels cost a branch.

use core::ffi::c_void;

// Re-export tracing macros for use throughout the runtime
pub use tracing::{debug, error, info, trace, warn, Level};

use crate::interop::CallConvention;

/// Initialize runtime logging with sensible defaults
///
/// Honours `RUST_LOG`; otherwise INFO in release builds and DEBUG in debug
/// builds. Does nothing if a subscriber is already installed.
pub fn init_runtime_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("nativebridge_runtime=debug")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("nativebridge_runtime=info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}

/// Log an outbound native call
#[inline]
pub fn log_native_call(target: *const c_void, args_count: usize, convention: CallConvention, backend: &str) {
    trace!(
        target: "interop",
        target_addr = ?target,
        args_count,
        convention = convention.name(),
        backend,
        "native call"
    );
}

/// Log a native return
#[inline]
pub fn log_native_return(target: *const c_void, value: i64) {
    trace!(
        target: "interop",
        target_addr = ?target,
        value,
        "native return"
    );
}

/// Log a fault caught inside a native callee
#[inline]
pub fn log_native_fault(target: *const c_void, code: u32) {
    warn!(
        target: "interop",
        target_addr = ?target,
        code = format_args!("{:#010X}", code),
        "native call faulted"
    );
}

/// Log a stack imbalance after a StdCall call
#[inline]
pub fn log_stack_imbalance(target: *const c_void, delta_words: i32) {
    warn!(
        target: "interop",
        target_addr = ?target,
        delta_words,
        "stack imbalance after native call"
    );
}

/// Log a library load
#[inline]
pub fn log_library_loaded(name: &str) {
    debug!(target: "interop", library = name, "library loaded");
}

/// Log a library unload
#[inline]
pub fn log_library_unloaded(name: &str) {
    debug!(target: "interop", library = name, "library unloaded");
}

/// Log trampoline creation
#[inline]
pub fn log_trampoline_created(id: usize, function: &str, address: usize, param_count: usize) {
    debug!(
        target: "callback",
        id,
        function,
        address = format_args!("{:#x}", address),
        param_count,
        "trampoline created"
    );
}

/// Log trampoline release
#[inline]
pub fn log_trampoline_released(id: usize, address: usize) {
    debug!(
        target: "callback",
        id,
        address = format_args!("{:#x}", address),
        "trampoline released"
    );
}

/// Log a dispatch from native code into a script function
#[inline]
pub fn log_trampoline_dispatch(id: usize, function: &str, mode: &str, thread_id: u32) {
    trace!(
        target: "callback",
        id,
        function,
        mode,
        thread_id,
        "trampoline dispatch"
    );
}

/// Log a panic caught at the dispatch boundary
#[inline]
pub fn log_trampoline_panic(id: usize, message: &str) {
    error!(
        target: "callback",
        id,
        message,
        "script function panicked inside callback"
    );
}
