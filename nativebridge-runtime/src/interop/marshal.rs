//! Type marshaling - script values ↔ native payloads
//!
//! Scalars convert in place inside the descriptor. Strings need storage that
//! outlives the call, which `StringArg` provides.

use core::ffi::{c_char, c_void};
use std::ffi::CStr;

use super::types::{ArgKind, ArgumentDescriptor, NativeValue};
use crate::script::ScriptValue;

/// Store a script value into a descriptor's payload
///
/// Empty values marshal as zero. `NativeString` descriptors accept an
/// integer address here; text goes through `StringArg`.
pub fn to_native(descriptor: &mut ArgumentDescriptor, value: &ScriptValue) -> Result<(), MarshalError> {
    if value.is_empty() {
        descriptor.set_int(0);
        return Ok(());
    }
    match descriptor.kind {
        ArgKind::Float32 | ArgKind::Float64 => {
            let number = value.as_float().ok_or_else(|| MarshalError::not_numeric(value))?;
            descriptor.set_float(number);
        }
        ArgKind::NativeString => {
            let address = value.as_integer().ok_or(MarshalError::NeedsBuffer)?;
            descriptor.set_ptr(address as usize as *mut c_void);
        }
        _ => {
            let number = value.as_integer().ok_or_else(|| MarshalError::not_numeric(value))?;
            descriptor.set_int(number);
        }
    }
    Ok(())
}

/// Convert a native value to a script value
///
/// # Safety
/// A non-null `NativeString` value must point to a NUL-terminated string.
pub unsafe fn from_native(value: &NativeValue) -> ScriptValue {
    match value.kind {
        ArgKind::Float32 | ArgKind::Float64 => ScriptValue::Float(value.as_f64()),
        ArgKind::NativeString => ScriptValue::Text(read_c_string(value.as_ptr() as *const c_char)),
        _ => ScriptValue::Integer(value.as_i64()),
    }
}

/// Copy a NUL-terminated string (lossy UTF-8); null yields empty text
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn read_c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

/// Mutable, NUL-terminated buffer backing a `Str` argument
#[derive(Debug, Clone)]
pub struct StringArg {
    buffer: Vec<u8>,
}

impl StringArg {
    /// Buffer holding `text`, at least `capacity` bytes plus the terminator
    pub fn new(text: &str, capacity: usize) -> Self {
        let size = text.len().max(capacity) + 1;
        let mut buffer = vec![0u8; size];
        buffer[..text.len()].copy_from_slice(text.as_bytes());
        Self { buffer }
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.buffer.as_mut_ptr() as *mut c_void
    }

    /// Usable bytes, excluding the final terminator
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Contents up to the first NUL
    pub fn read(&self) -> String {
        let end = self
            .buffer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.buffer.len());
        String::from_utf8_lossy(&self.buffer[..end]).into_owned()
    }
}

/// Script value for one captured trampoline word
///
/// 32-bit targets read the word as unsigned, 64-bit targets as signed.
#[inline]
pub fn word_to_value(word: usize) -> ScriptValue {
    #[cfg(target_pointer_width = "32")]
    {
        ScriptValue::Integer(word as u32 as i64)
    }
    #[cfg(not(target_pointer_width = "32"))]
    {
        ScriptValue::Integer(word as isize as i64)
    }
}

/// Convert a callback result to the 32-bit value handed back to native code
///
/// `None` means the default result should be used.
pub fn value_to_result(value: Option<&ScriptValue>) -> Option<u32> {
    let value = value?;
    match value {
        ScriptValue::Integer(n) => Some(*n as u32),
        ScriptValue::Float(f) => Some(f.trunc() as i64 as u32),
        ScriptValue::Text(_) => value.as_integer().map(|n| n as u32),
        ScriptValue::Empty => None,
    }
}

/// Marshaling errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    /// Non-numeric text for a numeric by-value argument
    NotNumeric(String),
    /// Text supplied for a string argument without a buffer
    NeedsBuffer,
}

impl MarshalError {
    fn not_numeric(value: &ScriptValue) -> Self {
        Self::NotNumeric(value.to_string())
    }
}

impl core::fmt::Display for MarshalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotNumeric(text) => write!(f, "Non-numeric value '{}' for numeric argument", text),
            Self::NeedsBuffer => write!(f, "String argument requires a buffer"),
        }
    }
}

impl std::error::Error for MarshalError {}
