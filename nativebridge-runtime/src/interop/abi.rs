//! ABI (Application Binary Interface) handling
//!
//! Calling conventions, the machine-level form of marshalled arguments, and
//! the backend seam that turns an ordered slot list into a concrete call.

use core::ffi::c_void;

use super::call::CallError;
use super::types::{ArgKind, ArgumentDescriptor};

/// Calling convention requested by the script
///
/// Only 32-bit x86 distinguishes the two; every 64-bit target has a single
/// convention in which the caller restores the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CallConvention {
    /// Callee removes its arguments (`ret imm16`)
    #[default]
    StdCall,
    /// Caller removes the arguments
    CDecl,
}

impl CallConvention {
    /// Check if the callee is responsible for popping its arguments
    #[inline]
    pub const fn callee_cleans(self) -> bool {
        matches!(self, Self::StdCall)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::StdCall => "stdcall",
            Self::CDecl => "cdecl",
        }
    }
}

/// Argument in the form a backend places it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeSlot {
    /// Integer or pointer no wider than a machine word
    Word(u64),
    /// 64-bit integer (two stack words on x86)
    Wide(u64),
    /// Single-precision bits
    Float32(u32),
    /// Double-precision bits
    Float64(u64),
}

impl NativeSlot {
    /// Slot for one descriptor; by-address descriptors yield the payload's address
    pub fn from_descriptor(desc: &mut ArgumentDescriptor) -> Self {
        if desc.by_address {
            return Self::Word(desc.payload_address() as usize as u64);
        }
        match desc.kind {
            ArgKind::Int64 => Self::Wide(desc.int_value() as u64),
            ArgKind::Float32 => Self::Float32((desc.float_value() as f32).to_bits()),
            ArgKind::Float64 => Self::Float64(desc.float_value().to_bits()),
            ArgKind::Ptr | ArgKind::NativeString => Self::Word(desc.ptr_value() as usize as u64),
            _ => Self::Word(desc.int_value() as u64),
        }
    }

    /// Raw 64-bit image
    #[inline]
    pub const fn bits(self) -> u64 {
        match self {
            Self::Word(v) | Self::Wide(v) | Self::Float64(v) => v,
            Self::Float32(v) => v as u64,
        }
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32(_) | Self::Float64(_))
    }

    /// Number of 32-bit stack words the slot occupies on x86
    #[inline]
    pub const fn stack_words(self) -> usize {
        match self {
            Self::Word(_) | Self::Float32(_) => 1,
            Self::Wide(_) | Self::Float64(_) => 2,
        }
    }
}

/// Where the callee leaves its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnClass {
    Integer,
    Float32,
    Float64,
}

impl ReturnClass {
    /// Class for a return descriptor; hidden-buffer returns read nothing from
    /// the float unit
    pub fn of(desc: &ArgumentDescriptor) -> Self {
        match (desc.kind, desc.by_address) {
            (ArgKind::Float32, false) => Self::Float32,
            (ArgKind::Float64, false) => Self::Float64,
            _ => Self::Integer,
        }
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        !matches!(self, Self::Integer)
    }
}

/// Register contents captured after the callee returned
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawReturn {
    /// Integer result; the register pair is combined low word first on x86
    pub int: u64,
    /// Float result widened to double (exact for single precision)
    pub float: f64,
    /// Words the callee left on the stack relative to what it was given;
    /// positive when it popped fewer than supplied
    pub stack_delta: i32,
}

/// Architecture-specific call construction
///
/// `layout` must be pure so every backend can be exercised on any host;
/// `transfer` only runs on the architecture it targets and reports
/// `UnsupportedArchitecture` elsewhere.
pub trait AbiBackend {
    /// Backend name for diagnostics
    const NAME: &'static str;

    /// Laid-out argument frame
    type Frame;

    /// Lay out slots (leftmost argument first) plus an optional hidden
    /// result-buffer pointer
    fn layout(slots: &[NativeSlot], hidden_return: Option<u64>) -> Self::Frame;

    /// Call `target` with a laid-out frame
    ///
    /// # Safety
    /// `target` must be callable with the frame's arguments and every
    /// address in the frame must stay valid for the duration of the call.
    unsafe fn transfer(
        target: *const c_void,
        frame: &Self::Frame,
        convention: CallConvention,
        class: ReturnClass,
    ) -> Result<RawReturn, CallError>;
}
