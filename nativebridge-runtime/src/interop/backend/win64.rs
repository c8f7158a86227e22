//! x86-64 Windows
//!
//! The first four arguments are assigned by position: integer slots to rcx,
//! rdx, r8, r9 and float slots to xmm0-xmm3. Float bits are mirrored into
//! the integer register of the same position so unprototyped callees still
//! see them. Remaining arguments go above 32 bytes of shadow space.

use core::ffi::c_void;

use crate::interop::abi::{AbiBackend, CallConvention, NativeSlot, RawReturn, ReturnClass};
use crate::interop::call::CallError;

pub struct Win64;

pub const REGISTER_ARGS: usize = 4;
pub const SHADOW_SPACE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalFrame {
    pub gp: [u64; REGISTER_ARGS],
    pub fp: [u64; REGISTER_ARGS],
    pub stack: Vec<u64>,
}

impl AbiBackend for Win64 {
    const NAME: &'static str = "x86_64-windows";

    type Frame = PositionalFrame;

    fn layout(slots: &[NativeSlot], hidden_return: Option<u64>) -> PositionalFrame {
        let mut frame = PositionalFrame {
            gp: [0; REGISTER_ARGS],
            fp: [0; REGISTER_ARGS],
            stack: Vec::new(),
        };

        let hidden = hidden_return.map(NativeSlot::Word);
        for (position, slot) in hidden.iter().chain(slots).enumerate() {
            let bits = slot.bits();
            if position < REGISTER_ARGS {
                frame.gp[position] = bits;
                if slot.is_float() {
                    frame.fp[position] = bits;
                }
            } else {
                frame.stack.push(bits);
            }
        }
        frame
    }

    #[cfg(all(target_arch = "x86_64", windows))]
    unsafe fn transfer(
        target: *const c_void,
        frame: &PositionalFrame,
        _convention: CallConvention,
        class: ReturnClass,
    ) -> Result<RawReturn, CallError> {
        let int: u64;
        let xmm0: f64;

        // rsi and rdi are non-volatile here, so both are named explicitly.
        core::arch::asm!(
            "mov r12, rsp",
            "lea rax, [rcx*8 + 47]",
            "and rax, -16",
            "sub rsp, rax",
            "and rsp, -16",
            "lea rdi, [rsp + 32]",
            "rep movsq",
            "mov rcx, [r10]",
            "mov rdx, [r10 + 8]",
            "mov r8, [r10 + 16]",
            "mov r9, [r10 + 24]",
            "movq xmm0, [r11]",
            "movq xmm1, [r11 + 8]",
            "movq xmm2, [r11 + 16]",
            "movq xmm3, [r11 + 24]",
            "call r13",
            "mov rsp, r12",
            in("r10") frame.gp.as_ptr(),
            in("r11") frame.fp.as_ptr(),
            inout("rsi") frame.stack.as_ptr() => _,
            inout("rcx") frame.stack.len() => _,
            inout("r13") target => _,
            out("r12") _,
            out("rdi") _,
            lateout("rax") int,
            lateout("xmm0") xmm0,
            clobber_abi("C"),
        );

        let float = match class {
            ReturnClass::Float32 => f32::from_bits(xmm0.to_bits() as u32) as f64,
            _ => xmm0,
        };
        Ok(RawReturn {
            int,
            float,
            stack_delta: 0,
        })
    }

    #[cfg(not(all(target_arch = "x86_64", windows)))]
    unsafe fn transfer(
        _target: *const c_void,
        _frame: &PositionalFrame,
        _convention: CallConvention,
        _class: ReturnClass,
    ) -> Result<RawReturn, CallError> {
        Err(CallError::UnsupportedArchitecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_assignment() {
        let slots = [
            NativeSlot::Word(1),
            NativeSlot::Float64(2.0f64.to_bits()),
            NativeSlot::Word(3),
        ];
        let frame = Win64::layout(&slots, None);
        assert_eq!(frame.gp[0], 1);
        assert_eq!(frame.gp[1], 2.0f64.to_bits());
        assert_eq!(frame.fp[1], 2.0f64.to_bits());
        assert_eq!(frame.fp[0], 0);
        assert_eq!(frame.gp[2], 3);
    }

    #[test]
    fn test_fifth_argument_on_stack() {
        let slots: Vec<_> = (1..=6).map(NativeSlot::Word).collect();
        let frame = Win64::layout(&slots, Some(99));
        assert_eq!(frame.gp, [99, 1, 2, 3]);
        assert_eq!(frame.stack, vec![4, 5, 6]);
    }
}
