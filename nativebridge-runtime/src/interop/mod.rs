//! Interoperability - Call native functions described at run time
//!
//! Design: type tokens resolve to descriptors, descriptors marshal into an
//! ABI backend's frame, and the call runs under a fault guard.
//!
//! Architecture:
//! - `types.rs` - descriptors and the payload union
//! - `resolve.rs` - type token parsing
//! - `marshal.rs` - script value ↔ native conversions
//! - `abi.rs` - conventions, slots and the backend trait
//! - `backend/` - x86, x86-64 (System V and Windows), AArch64
//! - `guard.rs` - hardware fault isolation
//! - `call.rs` - the invoker
//! - `library.rs` - dynamic library loading (dlopen/LoadLibrary)
//! - `target.rs` - target text → address

mod abi;
pub mod backend;
mod call;
pub mod guard;
mod library;
mod marshal;
mod resolve;
pub(crate) mod stats;
mod target;
mod types;

pub use abi::{AbiBackend, CallConvention, NativeSlot, RawReturn, ReturnClass};
pub use call::{invoke, invoke_with, last_native_error, CallError, CallOutcome, CallSpec};
pub use library::{Library, LoadError, SymbolError, SymbolSource};
pub use marshal::{
    from_native, read_c_string, to_native, value_to_result, word_to_value, MarshalError, StringArg,
};
pub use resolve::{resolve, resolve_return, resolve_with_fallback, ResolveError};
pub use stats::{record_marshaling_error, InteropStats};
pub use target::{
    lookup_with_suffix, parse_address, split_qualified, ResolvedTarget, TargetError,
    TargetResolver, DEFAULT_LIBRARIES, DEFAULT_SYMBOL_SUFFIX,
};
pub use types::{ArgKind, ArgumentDescriptor, NativeValue, Payload};

/// Get interop statistics
#[inline]
pub fn stats() -> InteropStats {
    stats::snapshot()
}

#[cfg(test)]
mod tests;
