//! nativebridge runtime - dynamic native calls and callbacks for a script host
//!
//! Outbound, a script describes a native function with type strings at run
//! time and `interop` performs the call. Inbound, `callback` generates
//! trampolines that native code can call like any function pointer, which
//! land in script functions hosted by `script`.

pub mod callback;
pub mod interop;
pub mod logging;
pub mod script;

// Re-export core types
pub use callback::{ExecutionMode, Trampoline, TrampolineError};
pub use interop::{
    invoke, last_native_error, ArgKind, ArgumentDescriptor, CallConvention, CallOutcome, CallSpec,
};
pub use script::{ScriptEngine, ScriptFunction, ScriptValue, Variable};

/// Runtime initialization
pub fn init() {
    logging::init_runtime_logging();
    logging::info!(target: "runtime", "nativebridge runtime initialized");
}
