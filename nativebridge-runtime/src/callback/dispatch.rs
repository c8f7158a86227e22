//! Generic dispatch entry shared by every trampoline stub

use core::sync::atomic::{AtomicUsize, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::{ExecutionMode, TrampolineBinding};
use crate::interop::{stats, value_to_result, word_to_value};
use crate::logging;
use crate::script::{InvocationContext, ScriptValue};

/// Result handed back to native code when the script produced nothing usable
pub const DEFAULT_RESULT: u32 = 0;

static BINDINGS: Lazy<DashMap<usize, Arc<TrampolineBinding>>> = Lazy::new(DashMap::new);
static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn register(id: usize, binding: Arc<TrampolineBinding>) {
    BINDINGS.insert(id, binding);
}

pub(crate) fn unregister(id: usize) -> bool {
    BINDINGS.remove(&id).is_some()
}

/// Number of registered trampolines
pub fn registered() -> usize {
    BINDINGS.len()
}

/// Address the stubs call
#[inline]
pub(crate) fn entry_address() -> u64 {
    trampoline_entry as *const () as usize as u64
}

/// Called by every stub with the captured argument words and its id
///
/// Never unwinds: a panic in the script body is logged and becomes the
/// default result.
pub(crate) extern "C" fn trampoline_entry(words: *const usize, id: usize) -> u32 {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch(words, id))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            logging::log_trampoline_panic(id, &message);
            DEFAULT_RESULT
        }
    }
}

fn dispatch(words: *const usize, id: usize) -> u32 {
    // Clone out of the map so no shard lock is held while script code runs.
    let binding = match BINDINGS.get(&id) {
        Some(entry) => Arc::clone(entry.value()),
        None => {
            logging::warn!(target: "callback", id, "dispatch to released trampoline");
            return DEFAULT_RESULT;
        }
    };
    stats::record_dispatch();

    let args: Vec<ScriptValue> = (0..binding.param_count)
        // SAFETY: the stub captured exactly `param_count` words at `words`.
        .map(|i| word_to_value(unsafe { *words.add(i) }))
        .collect();
    run(id, &binding, args)
}

fn run(id: usize, binding: &TrampolineBinding, args: Vec<ScriptValue>) -> u32 {
    let engine = &*binding.engine;
    let _exec = engine.lock();

    let mut _thread = None;
    let mut _resumed = None;
    let thread_id = match binding.mode {
        ExecutionMode::Isolated => match engine.begin_thread() {
            Some(guard) => _thread.insert(guard).id(),
            None => return DEFAULT_RESULT,
        },
        ExecutionMode::Fast => _resumed.insert(engine.resume_current()).id(),
    };
    let _event = engine.mirror_event_info(binding.tag);

    logging::log_trampoline_dispatch(id, binding.function.name(), binding.mode.name(), thread_id);

    let context = InvocationContext {
        tag: Some(binding.tag),
        thread_id,
    };
    let result = engine.invoke(&binding.function, args, context);
    value_to_result(result.as_ref()).unwrap_or(DEFAULT_RESULT)
}
