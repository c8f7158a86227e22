//! 32-bit x86: every argument goes on the stack
//!
//! The frame is an array of 32-bit words in call order (lowest address
//! first). It is filled right to left, so the rightmost argument lands at
//! the highest address, and padded to a 16-byte multiple at the top.

use core::ffi::c_void;

use crate::interop::abi::{AbiBackend, CallConvention, NativeSlot, RawReturn, ReturnClass};
use crate::interop::call::CallError;

pub struct X86;

/// Stack words plus the count of padding words appended after the arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub words: Vec<u32>,
    pub padding: usize,
}

impl StackFrame {
    /// Words that belong to arguments (excluding alignment padding)
    #[inline]
    pub fn argument_words(&self) -> usize {
        self.words.len() - self.padding
    }
}

impl AbiBackend for X86 {
    const NAME: &'static str = "x86";

    type Frame = StackFrame;

    fn layout(slots: &[NativeSlot], hidden_return: Option<u64>) -> StackFrame {
        let hidden = usize::from(hidden_return.is_some());
        let needed = hidden + slots.iter().map(|s| s.stack_words()).sum::<usize>();
        let padding = (4 - needed % 4) % 4;
        let mut words = vec![0u32; needed + padding];

        let mut cursor = needed;
        for slot in slots.iter().rev() {
            match *slot {
                NativeSlot::Word(v) => {
                    cursor -= 1;
                    words[cursor] = v as u32;
                }
                NativeSlot::Float32(bits) => {
                    cursor -= 1;
                    words[cursor] = bits;
                }
                NativeSlot::Wide(v) | NativeSlot::Float64(v) => {
                    cursor -= 2;
                    words[cursor] = v as u32;
                    words[cursor + 1] = (v >> 32) as u32;
                }
            }
        }
        if let Some(ptr) = hidden_return {
            cursor -= 1;
            words[cursor] = ptr as u32;
        }
        debug_assert_eq!(cursor, 0);

        StackFrame { words, padding }
    }

    #[cfg(target_arch = "x86")]
    unsafe fn transfer(
        target: *const c_void,
        frame: &StackFrame,
        convention: CallConvention,
        class: ReturnClass,
    ) -> Result<RawReturn, CallError> {
        let mut float_out: f64 = 0.0;
        let float_ptr = if class.is_float() {
            &mut float_out as *mut f64 as usize
        } else {
            0usize
        };
        let lo: usize;
        let hi: usize;
        let remaining: usize;

        // edi keeps the pre-call stack pointer (callee-saved). The words are
        // pushed last to first so the first word ends up at [esp]. After the
        // call, ecx receives how many bytes are still on the stack above esp.
        core::arch::asm!(
            "push edi",
            "mov edi, esp",
            "and esp, -16",
            "2:",
            "test ecx, ecx",
            "jz 3f",
            "push dword ptr [edx + ecx*4 - 4]",
            "dec ecx",
            "jmp 2b",
            "3:",
            "call eax",
            "mov ecx, edi",
            "and ecx, -16",
            "sub ecx, esp",
            "mov esp, edi",
            "pop edi",
            "test edi, edi",
            "jz 4f",
            "fstp qword ptr [edi]",
            "4:",
            inout("eax") target as usize => lo,
            inout("ecx") frame.words.len() => remaining,
            inout("edx") frame.words.as_ptr() as usize => hi,
            inout("edi") float_ptr => _,
            clobber_abi("C"),
        );

        let left_words = (remaining as i32) / 4;
        let stack_delta = if convention.callee_cleans() {
            left_words - frame.padding as i32
        } else {
            0
        };

        Ok(RawReturn {
            int: (lo as u64) | ((hi as u64) << 32),
            float: float_out,
            stack_delta,
        })
    }

    #[cfg(not(target_arch = "x86"))]
    unsafe fn transfer(
        _target: *const c_void,
        _frame: &StackFrame,
        _convention: CallConvention,
        _class: ReturnClass,
    ) -> Result<RawReturn, CallError> {
        Err(CallError::UnsupportedArchitecture)
    }
}
