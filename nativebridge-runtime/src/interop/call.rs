//! Dynamic function calling
//!
//! Builds a native frame from a call specification, transfers control under
//! a fault guard and wraps whatever the callee left behind.

use core::cell::Cell;
use core::ffi::c_void;

use super::abi::{AbiBackend, CallConvention, NativeSlot, RawReturn, ReturnClass};
use super::backend::NativeBackend;
use super::guard;
use super::stats;
use super::types::{ArgKind, ArgumentDescriptor, NativeValue, Payload};
use crate::logging;

/// Everything needed for one native call, built fresh per call
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub target: *const c_void,
    pub convention: CallConvention,
    pub arguments: Vec<ArgumentDescriptor>,
    /// `by_address` means the callee writes the result into a hidden buffer
    pub return_descriptor: ArgumentDescriptor,
}

impl CallSpec {
    /// StdCall call returning `Int32` with no arguments yet
    #[inline]
    pub fn new(target: *const c_void) -> Self {
        Self {
            target,
            convention: CallConvention::StdCall,
            arguments: Vec::new(),
            return_descriptor: ArgumentDescriptor::new(ArgKind::Int32),
        }
    }

    #[inline]
    pub fn convention(mut self, convention: CallConvention) -> Self {
        self.convention = convention;
        self
    }

    #[inline]
    pub fn arg(mut self, descriptor: ArgumentDescriptor) -> Self {
        self.arguments.push(descriptor);
        self
    }

    #[inline]
    pub fn returns(mut self, descriptor: ArgumentDescriptor) -> Self {
        self.return_descriptor = descriptor;
        self
    }
}

/// What happened during a native call
#[derive(Debug, Clone, Copy)]
pub enum CallOutcome {
    Value(NativeValue),
    /// The callee raised a hardware fault; carries the exception code
    NativeFault(u32),
    /// The call completed but the callee popped the wrong number of words
    StackImbalance { delta: i32, value: NativeValue },
}

impl CallOutcome {
    /// The value the callee produced, if it returned at all
    #[inline]
    pub fn value(&self) -> Option<&NativeValue> {
        match self {
            Self::Value(value) | Self::StackImbalance { value, .. } => Some(value),
            Self::NativeFault(_) => None,
        }
    }

    #[inline]
    pub fn fault_code(&self) -> Option<u32> {
        match self {
            Self::NativeFault(code) => Some(*code),
            _ => None,
        }
    }
}

thread_local! {
    static LAST_NATIVE_ERROR: Cell<u32> = const { Cell::new(0) };
}

/// errno / GetLastError as captured right after this thread's last native call
#[inline]
pub fn last_native_error() -> u32 {
    LAST_NATIVE_ERROR.with(|e| e.get())
}

#[cfg(unix)]
#[inline(always)]
fn capture_last_error() {
    let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    LAST_NATIVE_ERROR.with(|e| e.set(code as u32));
}

#[cfg(windows)]
#[inline(always)]
fn capture_last_error() {
    // SAFETY: GetLastError has no preconditions.
    let code = unsafe { winapi::um::errhandlingapi::GetLastError() };
    LAST_NATIVE_ERROR.with(|e| e.set(code));
}

#[cfg(not(any(unix, windows)))]
#[inline(always)]
fn capture_last_error() {}

/// Call `spec.target` with the native backend for this target
///
/// By-address argument payloads are updated in place, so the caller can
/// read back whatever the callee wrote through them.
///
/// # Safety
/// Caller must ensure:
/// - `spec.target` is a function address (or the fault guard must catch it)
/// - argument kinds match what the callee reads
/// - pointer payloads are valid for the accesses the callee performs
#[inline]
pub unsafe fn invoke(spec: &mut CallSpec) -> Result<CallOutcome, CallError> {
    invoke_with::<NativeBackend>(spec)
}

/// Call with an explicit backend
///
/// # Safety
/// See `invoke`; additionally `B` must be the backend of the running target.
pub unsafe fn invoke_with<B: AbiBackend>(spec: &mut CallSpec) -> Result<CallOutcome, CallError> {
    if spec.target.is_null() {
        return Err(CallError::NullTarget);
    }

    let mut hidden = [0u64; 2];
    let hidden_ptr = spec
        .return_descriptor
        .by_address
        .then(|| hidden.as_mut_ptr() as usize as u64);

    let mut slots = Vec::with_capacity(spec.arguments.len() + 1);
    for descriptor in spec.arguments.iter_mut() {
        slots.push(NativeSlot::from_descriptor(descriptor));
    }
    let frame = B::layout(&slots, hidden_ptr);

    let target = spec.target;
    let convention = spec.convention;
    let class = ReturnClass::of(&spec.return_descriptor);
    logging::log_native_call(target, spec.arguments.len(), convention, B::NAME);

    let outcome = guard::guarded(|| B::transfer(target, &frame, convention, class));
    capture_last_error();

    let raw = match outcome {
        Ok(result) => result?,
        Err(code) => {
            stats::record_call();
            stats::record_fault();
            logging::log_native_fault(target, code);
            return Ok(CallOutcome::NativeFault(code));
        }
    };
    stats::record_call();

    let value = wrap_return(&spec.return_descriptor, &raw, &hidden);
    logging::log_native_return(target, value.as_i64());

    if raw.stack_delta != 0 {
        stats::record_imbalance();
        logging::log_stack_imbalance(target, raw.stack_delta);
        return Ok(CallOutcome::StackImbalance {
            delta: raw.stack_delta,
            value,
        });
    }
    Ok(CallOutcome::Value(value))
}

/// Convert raw register contents (or the hidden buffer) to the declared kind
fn wrap_return(descriptor: &ArgumentDescriptor, raw: &RawReturn, hidden: &[u64; 2]) -> NativeValue {
    let mut out = ArgumentDescriptor::new(descriptor.kind).unsigned(descriptor.is_unsigned);
    if descriptor.by_address {
        out.payload = Payload { u64: hidden[0] };
        return out.native_value();
    }
    match descriptor.kind {
        ArgKind::Float32 | ArgKind::Float64 => out.set_float(raw.float),
        ArgKind::Ptr | ArgKind::NativeString => out.set_ptr(raw.int as usize as *mut c_void),
        _ => out.set_int(raw.int as i64),
    }
    out.native_value()
}

/// Function call errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    NullTarget,
    UnsupportedArchitecture,
}

impl core::fmt::Display for CallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NullTarget => write!(f, "Call target is null"),
            Self::UnsupportedArchitecture => write!(f, "Architecture not supported"),
        }
    }
}

impl std::error::Error for CallError {}
