//! AArch64 (AAPCS64)
//!
//! Integer slots use x0-x7, float slots d0-d7/s0-s7, the hidden result
//! buffer goes in x8. Overflow arguments take one 8-byte stack slot each,
//! as on Linux.

use core::ffi::c_void;

use crate::interop::abi::{AbiBackend, CallConvention, NativeSlot, RawReturn, ReturnClass};
use crate::interop::call::CallError;

pub struct Aarch64;

pub const GP_REGISTERS: usize = 8;
pub const FP_REGISTERS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFrame {
    pub gp: [u64; GP_REGISTERS],
    pub fp: [u64; FP_REGISTERS],
    pub indirect_result: u64,
    pub stack: Vec<u64>,
}

impl AbiBackend for Aarch64 {
    const NAME: &'static str = "aarch64";

    type Frame = RegisterFrame;

    fn layout(slots: &[NativeSlot], hidden_return: Option<u64>) -> RegisterFrame {
        let mut frame = RegisterFrame {
            gp: [0; GP_REGISTERS],
            fp: [0; FP_REGISTERS],
            indirect_result: hidden_return.unwrap_or(0),
            stack: Vec::new(),
        };
        let (mut gp_used, mut fp_used) = (0, 0);

        for slot in slots {
            let bits = slot.bits();
            if slot.is_float() && fp_used < FP_REGISTERS {
                frame.fp[fp_used] = bits;
                fp_used += 1;
            } else if !slot.is_float() && gp_used < GP_REGISTERS {
                frame.gp[gp_used] = bits;
                gp_used += 1;
            } else {
                frame.stack.push(bits);
            }
        }
        frame
    }

    #[cfg(target_arch = "aarch64")]
    unsafe fn transfer(
        target: *const c_void,
        frame: &RegisterFrame,
        _convention: CallConvention,
        class: ReturnClass,
    ) -> Result<RawReturn, CallError> {
        let int: u64;
        let v0: f64;

        // x20 is callee-saved and keeps sp across the call.
        core::arch::asm!(
            "mov x20, sp",
            "lsl x9, x11, #3",
            "add x9, x9, #15",
            "and x9, x9, #0xfffffffffffffff0",
            "sub sp, sp, x9",
            "mov x12, sp",
            "2:",
            "cbz x11, 3f",
            "ldr x13, [x10], #8",
            "str x13, [x12], #8",
            "sub x11, x11, #1",
            "b 2b",
            "3:",
            "ldp x0, x1, [x14]",
            "ldp x2, x3, [x14, #16]",
            "ldp x4, x5, [x14, #32]",
            "ldp x6, x7, [x14, #48]",
            "ldp d0, d1, [x15]",
            "ldp d2, d3, [x15, #16]",
            "ldp d4, d5, [x15, #32]",
            "ldp d6, d7, [x15, #48]",
            "blr x16",
            "mov sp, x20",
            inout("x10") frame.stack.as_ptr() => _,
            inout("x11") frame.stack.len() => _,
            in("x14") frame.gp.as_ptr(),
            in("x15") frame.fp.as_ptr(),
            in("x16") target,
            in("x8") frame.indirect_result,
            out("x20") _,
            lateout("x0") int,
            lateout("v0") v0,
            clobber_abi("C"),
        );

        let float = match class {
            ReturnClass::Float32 => f32::from_bits(v0.to_bits() as u32) as f64,
            _ => v0,
        };
        Ok(RawReturn {
            int,
            float,
            stack_delta: 0,
        })
    }

    #[cfg(not(target_arch = "aarch64"))]
    unsafe fn transfer(
        _target: *const c_void,
        _frame: &RegisterFrame,
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
    fn test_indirect_result_register() {
        let frame = Aarch64::layout(&[NativeSlot::Word(1)], Some(0x4000));
        assert_eq!(frame.indirect_result, 0x4000);
        assert_eq!(frame.gp[0], 1);
    }

    #[test]
    fn test_independent_register_files() {
        let mut slots: Vec<_> = (0..9).map(|i| NativeSlot::Float64(i)).collect();
        slots.push(NativeSlot::Word(42));
        let frame = Aarch64::layout(&slots, None);
        assert_eq!(frame.fp, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(frame.gp[0], 42);
        assert_eq!(frame.stack, vec![8]);
    }
}
