//! Lock-free interop counters

use core::sync::atomic::{AtomicUsize, Ordering};

static CALLS_MADE: AtomicUsize = AtomicUsize::new(0);
static NATIVE_FAULTS: AtomicUsize = AtomicUsize::new(0);
static STACK_IMBALANCES: AtomicUsize = AtomicUsize::new(0);
static MARSHALING_ERRORS: AtomicUsize = AtomicUsize::new(0);
static LIBRARIES_LOADED: AtomicUsize = AtomicUsize::new(0);
static TRAMPOLINES_LIVE: AtomicUsize = AtomicUsize::new(0);
static DISPATCHES: AtomicUsize = AtomicUsize::new(0);

/// Interop statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteropStats {
    pub calls_made: usize,
    pub native_faults: usize,
    pub stack_imbalances: usize,
    pub marshaling_errors: usize,
    pub libraries_loaded: usize,
    pub trampolines_live: usize,
    pub dispatches: usize,
}

/// Snapshot of the process-wide counters
pub fn snapshot() -> InteropStats {
    InteropStats {
        calls_made: CALLS_MADE.load(Ordering::Relaxed),
        native_faults: NATIVE_FAULTS.load(Ordering::Relaxed),
        stack_imbalances: STACK_IMBALANCES.load(Ordering::Relaxed),
        marshaling_errors: MARSHALING_ERRORS.load(Ordering::Relaxed),
        libraries_loaded: LIBRARIES_LOADED.load(Ordering::Relaxed),
        trampolines_live: TRAMPOLINES_LIVE.load(Ordering::Relaxed),
        dispatches: DISPATCHES.load(Ordering::Relaxed),
    }
}

#[inline]
pub(crate) fn record_call() {
    CALLS_MADE.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_fault() {
    NATIVE_FAULTS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_imbalance() {
    STACK_IMBALANCES.fetch_add(1, Ordering::Relaxed);
}

/// Counted by whoever rejects a script value before the call is attempted
#[inline]
pub fn record_marshaling_error() {
    MARSHALING_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_library_loaded() {
    LIBRARIES_LOADED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn trampoline_created() {
    TRAMPOLINES_LIVE.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn trampoline_released() {
    TRAMPOLINES_LIVE.fetch_sub(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_dispatch() {
    DISPATCHES.fetch_add(1, Ordering::Relaxed);
}
