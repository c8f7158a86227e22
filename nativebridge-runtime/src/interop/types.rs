//! Type definitions for FFI interoperability
//!
//! Argument descriptors keep their payload in the callee's native
//! representation, so a callee that receives the payload's address and writes
//! its native width through it round-trips exactly.

use core::ffi::c_void;

/// Native kind of one argument or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArgKind {
    Int32,
    Int16,
    Int8,
    Int64,
    Float32,
    Float64,
    /// Pointer-sized integer
    Ptr,
    NativeString,
    /// Blank type token; marshals exactly like `Int32`
    Default,
}

impl ArgKind {
    /// Size of the native value in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 | Self::Default => 4,
            Self::Int64 | Self::Float64 => 8,
            Self::Ptr | Self::NativeString => core::mem::size_of::<usize>(),
        }
    }

    /// Check if kind is floating point
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// Value holder (untagged union, 8 bytes)
#[repr(C)]
pub union Payload {
    pub i8: i8,
    pub u8: u8,
    pub i16: i16,
    pub u16: u16,
    pub i32: i32,
    pub u32: u32,
    pub i64: i64,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    pub ptr: *mut c_void,
}

impl Payload {
    /// All-zero payload
    #[inline]
    pub const fn zeroed() -> Self {
        Self { u64: 0 }
    }

    /// Raw 64-bit image of the payload
    #[inline]
    pub fn bits(&self) -> u64 {
        // SAFETY: every field is plain data inside an 8-byte union.
        unsafe { self.u64 }
    }
}

impl Default for Payload {
    #[inline]
    fn default() -> Self {
        Self::zeroed()
    }
}

// Manual implementations for Copy, Clone, and Debug since union doesn't auto-derive
impl Copy for Payload {}
impl Clone for Payload {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl core::fmt::Debug for Payload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Payload({:#018x})", self.bits())
    }
}

/// One native-call parameter or return value
#[derive(Debug, Clone, Copy)]
pub struct ArgumentDescriptor {
    pub kind: ArgKind,
    pub is_unsigned: bool,
    /// Callee receives a pointer to the payload instead of the value
    pub by_address: bool,
    pub payload: Payload,
}

impl ArgumentDescriptor {
    #[inline]
    pub const fn new(kind: ArgKind) -> Self {
        Self {
            kind,
            is_unsigned: false,
            by_address: false,
            payload: Payload::zeroed(),
        }
    }

    #[inline]
    pub const fn unsigned(mut self, is_unsigned: bool) -> Self {
        self.is_unsigned = is_unsigned;
        self
    }

    #[inline]
    pub const fn by_address(mut self, by_address: bool) -> Self {
        self.by_address = by_address;
        self
    }

    pub fn with_int(mut self, value: i64) -> Self {
        self.set_int(value);
        self
    }

    pub fn with_float(mut self, value: f64) -> Self {
        self.set_float(value);
        self
    }

    pub fn with_ptr(mut self, ptr: *mut c_void) -> Self {
        self.set_ptr(ptr);
        self
    }

    /// Store an integer in this kind's native representation
    ///
    /// Narrow kinds truncate; float kinds convert.
    pub fn set_int(&mut self, value: i64) {
        self.payload = Payload::zeroed();
        match self.kind {
            ArgKind::Int8 => self.payload.i8 = value as i8,
            ArgKind::Int16 => self.payload.i16 = value as i16,
            ArgKind::Int32 | ArgKind::Default => self.payload.i32 = value as i32,
            ArgKind::Int64 => self.payload.i64 = value,
            ArgKind::Float32 => self.payload.f32 = value as f32,
            ArgKind::Float64 => self.payload.f64 = value as f64,
            ArgKind::Ptr | ArgKind::NativeString => {
                self.payload.ptr = value as usize as *mut c_void
            }
        }
    }

    /// Store a float in this kind's native representation
    pub fn set_float(&mut self, value: f64) {
        match self.kind {
            ArgKind::Float32 => {
                self.payload = Payload::zeroed();
                self.payload.f32 = value as f32;
            }
            ArgKind::Float64 => self.payload = Payload { f64: value },
            _ => self.set_int(value as i64),
        }
    }

    pub fn set_ptr(&mut self, ptr: *mut c_void) {
        self.set_int(ptr as usize as i64);
        if matches!(self.kind, ArgKind::Ptr | ArgKind::NativeString) {
            self.payload.ptr = ptr;
        }
    }

    /// Read the payload as a script-domain integer
    ///
    /// Narrow kinds are sign- or zero-extended per `is_unsigned`; unsigned
    /// 64-bit values keep their bit pattern.
    pub fn int_value(&self) -> i64 {
        // SAFETY: the payload was written through the field matching `kind`
        // (or zeroed), and every field is plain data.
        unsafe {
            match (self.kind, self.is_unsigned) {
                (ArgKind::Int8, false) => self.payload.i8 as i64,
                (ArgKind::Int8, true) => self.payload.u8 as i64,
                (ArgKind::Int16, false) => self.payload.i16 as i64,
                (ArgKind::Int16, true) => self.payload.u16 as i64,
                (ArgKind::Int32 | ArgKind::Default, false) => self.payload.i32 as i64,
                (ArgKind::Int32 | ArgKind::Default, true) => self.payload.u32 as i64,
                (ArgKind::Int64, _) => self.payload.i64,
                (ArgKind::Float32, _) => self.payload.f32 as i64,
                (ArgKind::Float64, _) => self.payload.f64 as i64,
                (ArgKind::Ptr | ArgKind::NativeString, _) => self.payload.ptr as usize as i64,
            }
        }
    }

    /// Read the payload as a float (integers convert)
    pub fn float_value(&self) -> f64 {
        // SAFETY: see `int_value`.
        unsafe {
            match self.kind {
                ArgKind::Float32 => self.payload.f32 as f64,
                ArgKind::Float64 => self.payload.f64,
                _ => self.int_value() as f64,
            }
        }
    }

    /// Read the payload as a pointer
    pub fn ptr_value(&self) -> *mut c_void {
        match self.kind {
            // SAFETY: pointer kinds are always written through `ptr`.
            ArgKind::Ptr | ArgKind::NativeString => unsafe { self.payload.ptr },
            _ => self.int_value() as usize as *mut c_void,
        }
    }

    /// Address of the payload, handed to by-address callees
    #[inline]
    pub fn payload_address(&mut self) -> *mut c_void {
        core::ptr::addr_of_mut!(self.payload) as *mut c_void
    }

    /// Snapshot of the current payload as a value
    #[inline]
    pub fn native_value(&self) -> NativeValue {
        NativeValue {
            kind: self.kind,
            is_unsigned: self.is_unsigned,
            payload: self.payload,
        }
    }
}

impl Default for ArgumentDescriptor {
    #[inline]
    fn default() -> Self {
        Self::new(ArgKind::Default)
    }
}

/// A typed native value produced by a call
#[derive(Debug, Clone, Copy)]
pub struct NativeValue {
    pub kind: ArgKind,
    pub is_unsigned: bool,
    pub payload: Payload,
}

impl NativeValue {
    /// Zero of the given kind
    #[inline]
    pub const fn zero(kind: ArgKind, is_unsigned: bool) -> Self {
        Self {
            kind,
            is_unsigned,
            payload: Payload::zeroed(),
        }
    }

    #[inline]
    fn descriptor(&self) -> ArgumentDescriptor {
        ArgumentDescriptor {
            kind: self.kind,
            is_unsigned: self.is_unsigned,
            by_address: false,
            payload: self.payload,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> i64 {
        self.descriptor().int_value()
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.descriptor().float_value()
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.descriptor().ptr_value()
    }
}
