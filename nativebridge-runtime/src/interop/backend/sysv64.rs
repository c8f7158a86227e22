//! x86-64 System V (Linux, macOS, BSD)
//!
//! Integer slots fill rdi, rsi, rdx, rcx, r8, r9 left to right; float slots
//! fill xmm0-xmm7. Whatever does not fit goes to the stack in argument order.

use core::ffi::c_void;

use crate::interop::abi::{AbiBackend, CallConvention, NativeSlot, RawReturn, ReturnClass};
use crate::interop::call::CallError;

pub struct SysV64;

pub const GP_REGISTERS: usize = 6;
pub const FP_REGISTERS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFrame {
    pub gp: [u64; GP_REGISTERS],
    pub fp: [u64; FP_REGISTERS],
    pub stack: Vec<u64>,
}

impl AbiBackend for SysV64 {
    const NAME: &'static str = "x86_64-sysv";

    type Frame = RegisterFrame;

    fn layout(slots: &[NativeSlot], hidden_return: Option<u64>) -> RegisterFrame {
        let mut frame = RegisterFrame {
            gp: [0; GP_REGISTERS],
            fp: [0; FP_REGISTERS],
            stack: Vec::with_capacity(slots.len()),
        };
        let mut gp_used = 0;
        let mut fp_used = 0;

        let hidden = hidden_return.map(NativeSlot::Word);
        for slot in hidden.iter().chain(slots) {
            if slot.is_float() {
                if fp_used < FP_REGISTERS {
                    frame.fp[fp_used] = slot.bits();
                    fp_used += 1;
                    continue;
                }
            } else if gp_used < GP_REGISTERS {
                frame.gp[gp_used] = slot.bits();
                gp_used += 1;
                continue;
            }
            frame.stack.push(slot.bits());
        }
        frame
    }

    #[cfg(all(target_arch = "x86_64", not(windows)))]
    unsafe fn transfer(
        target: *const c_void,
        frame: &RegisterFrame,
        _convention: CallConvention,
        class: ReturnClass,
    ) -> Result<RawReturn, CallError> {
        let int: u64;
        let xmm0: f64;

        // r12 holds the caller's rsp across the call. Stack space is
        // reserved rounded up to 16 bytes, then the words are copied with
        // rep movsq to [rsp] upward so the first stack argument sits at [rsp].
        core::arch::asm!(
            "mov r12, rsp",
            "lea rax, [rcx*8 + 15]",
            "and rax, -16",
            "sub rsp, rax",
            "and rsp, -16",
            "mov rdi, rsp",
            "rep movsq",
            "mov rdi, [r10]",
            "mov rsi, [r10 + 8]",
            "mov rdx, [r10 + 16]",
            "mov rcx, [r10 + 24]",
            "mov r8, [r10 + 32]",
            "mov r9, [r10 + 40]",
            "movq xmm0, [r11]",
            "movq xmm1, [r11 + 8]",
            "movq xmm2, [r11 + 16]",
            "movq xmm3, [r11 + 24]",
            "movq xmm4, [r11 + 32]",
            "movq xmm5, [r11 + 40]",
            "movq xmm6, [r11 + 48]",
            "movq xmm7, [r11 + 56]",
            "mov eax, 8",
            "call r13",
            "mov rsp, r12",
            in("r10") frame.gp.as_ptr(),
            in("r11") frame.fp.as_ptr(),
            inout("rsi") frame.stack.as_ptr() => _,
            inout("rcx") frame.stack.len() => _,
            inout("r13") target => _,
            out("r12") _,
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

    #[cfg(not(all(target_arch = "x86_64", not(windows))))]
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
    fn test_classification() {
        let slots = [
            NativeSlot::Word(1),
            NativeSlot::Float64(2.0f64.to_bits()),
            NativeSlot::Wide(3),
            NativeSlot::Float32(4.0f32.to_bits()),
        ];
        let frame = SysV64::layout(&slots, None);
        assert_eq!(&frame.gp[..2], &[1, 3]);
        assert_eq!(frame.fp[0], 2.0f64.to_bits());
        assert_eq!(frame.fp[1], 4.0f32.to_bits() as u64);
        assert!(frame.stack.is_empty());
    }

    #[test]
    fn test_spill_in_argument_order() {
        let slots: Vec<_> = (1..=9).map(NativeSlot::Word).collect();
        let frame = SysV64::layout(&slots, None);
        assert_eq!(frame.gp, [1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.stack, vec![7, 8, 9]);
    }

    #[test]
    fn test_hidden_return_takes_rdi() {
        let frame = SysV64::layout(&[NativeSlot::Word(5)], Some(0x1000));
        assert_eq!(&frame.gp[..2], &[0x1000, 5]);
    }
}
