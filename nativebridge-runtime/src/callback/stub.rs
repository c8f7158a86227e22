//! Trampoline stub emission
//!
//! A stub gathers the native caller's argument words into one contiguous
//! array and calls `dispatcher(words, id)`. The dispatcher's `u32` result is
//! left in eax/rax. Emission is plain byte generation, so every target's
//! encoder is available (and testable) on every host.

use crate::interop::CallConvention;

/// Machine a stub is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubTarget {
    X86,
    SysV64,
    Win64,
}

impl StubTarget {
    /// Stub flavour for the running target, if trampolines are supported here
    pub const fn native() -> Option<Self> {
        if cfg!(target_arch = "x86") {
            Some(Self::X86)
        } else if cfg!(all(target_arch = "x86_64", windows)) {
            Some(Self::Win64)
        } else if cfg!(target_arch = "x86_64") {
            Some(Self::SysV64)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    #[inline]
    fn emit(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    #[inline]
    fn imm16(&mut self, value: u16) -> &mut Self {
        self.emit(&value.to_le_bytes())
    }

    #[inline]
    fn imm32(&mut self, value: u32) -> &mut Self {
        self.emit(&value.to_le_bytes())
    }

    #[inline]
    fn imm64(&mut self, value: u64) -> &mut Self {
        self.emit(&value.to_le_bytes())
    }
}

/// Emit a stub for `target`
///
/// `param_count` must already be validated against `MAX_TRAMPOLINE_PARAMS`.
pub fn emit(
    target: StubTarget,
    param_count: usize,
    convention: CallConvention,
    id: usize,
    dispatcher: u64,
) -> Vec<u8> {
    match target {
        StubTarget::X86 => emit_x86(param_count, convention, id as u32, dispatcher as u32),
        StubTarget::SysV64 => emit_sysv64(param_count, id as u64, dispatcher),
        StubTarget::Win64 => emit_win64(id as u64, dispatcher),
    }
}

/// The arguments already sit contiguously above the return address; pass
/// their address, then pop them ourselves for StdCall.
fn emit_x86(param_count: usize, convention: CallConvention, id: u32, dispatcher: u32) -> Vec<u8> {
    let mut code = CodeBuffer::default();
    code.emit(&[0x55]) // push ebp
        .emit(&[0x89, 0xE5]) // mov ebp, esp
        .emit(&[0x83, 0xE4, 0xF0]) // and esp, -16
        .emit(&[0x83, 0xEC, 0x08]) // sub esp, 8
        .emit(&[0x8D, 0x45, 0x08]) // lea eax, [ebp + 8]
        .emit(&[0x68])
        .imm32(id) // push id
        .emit(&[0x50]) // push eax
        .emit(&[0xB8])
        .imm32(dispatcher) // mov eax, dispatcher
        .emit(&[0xFF, 0xD0]) // call eax
        .emit(&[0xC9]); // leave

    if convention.callee_cleans() && param_count > 0 {
        code.emit(&[0xC2]).imm16((param_count * 4) as u16); // ret n*4
    } else {
        code.emit(&[0xC3]); // ret
    }
    code.bytes
}

/// Integer argument registers in System V order, by machine register number
const SYSV_ARG_REGISTERS: [u8; 6] = [7, 6, 2, 1, 8, 9]; // rdi rsi rdx rcx r8 r9

/// Spill the register arguments and copy the stack ones into a local array
/// of `param_count` words at rsp.
fn emit_sysv64(param_count: usize, id: u64, dispatcher: u64) -> Vec<u8> {
    let frame = ((param_count * 8 + 15) & !15) as u32;
    let mut code = CodeBuffer::default();
    code.emit(&[0x55]) // push rbp
        .emit(&[0x48, 0x89, 0xE5]) // mov rbp, rsp
        .emit(&[0x48, 0x81, 0xEC])
        .imm32(frame); // sub rsp, frame

    for (index, &reg) in SYSV_ARG_REGISTERS.iter().enumerate().take(param_count) {
        let rex = 0x48 | if reg >= 8 { 0x04 } else { 0x00 };
        let modrm = 0x84 | ((reg & 7) << 3);
        // mov [rsp + 8*index], reg
        code.emit(&[rex, 0x89, modrm, 0x24]).imm32((index * 8) as u32);
    }
    for index in SYSV_ARG_REGISTERS.len()..param_count {
        let caller_slot = 16 + 8 * (index - SYSV_ARG_REGISTERS.len());
        code.emit(&[0x48, 0x8B, 0x85])
            .imm32(caller_slot as u32) // mov rax, [rbp + 16 + 8*(index-6)]
            .emit(&[0x48, 0x89, 0x84, 0x24])
            .imm32((index * 8) as u32); // mov [rsp + 8*index], rax
    }

    code.emit(&[0x48, 0x89, 0xE7]) // mov rdi, rsp
        .emit(&[0x48, 0xBE])
        .imm64(id) // mov rsi, id
        .emit(&[0x48, 0xB8])
        .imm64(dispatcher) // mov rax, dispatcher
        .emit(&[0xFF, 0xD0]) // call rax
        .emit(&[0xC9]) // leave
        .emit(&[0xC3]); // ret
    code.bytes
}

/// Home the four register arguments in the caller's shadow space so every
/// argument word is contiguous starting at [rsp + 8].
fn emit_win64(id: u64, dispatcher: u64) -> Vec<u8> {
    let mut code = CodeBuffer::default();
    code.emit(&[0x48, 0x89, 0x4C, 0x24, 0x08]) // mov [rsp + 8], rcx
        .emit(&[0x48, 0x89, 0x54, 0x24, 0x10]) // mov [rsp + 16], rdx
        .emit(&[0x4C, 0x89, 0x44, 0x24, 0x18]) // mov [rsp + 24], r8
        .emit(&[0x4C, 0x89, 0x4C, 0x24, 0x20]) // mov [rsp + 32], r9
        .emit(&[0x48, 0x8D, 0x4C, 0x24, 0x08]) // lea rcx, [rsp + 8]
        .emit(&[0x48, 0xBA])
        .imm64(id) // mov rdx, id
        .emit(&[0x48, 0xB8])
        .imm64(dispatcher) // mov rax, dispatcher
        .emit(&[0x48, 0x83, 0xEC, 0x28]) // sub rsp, 40
        .emit(&[0xFF, 0xD0]) // call rax
        .emit(&[0x48, 0x83, 0xC4, 0x28]) // add rsp, 40
        .emit(&[0xC3]); // ret
    code.bytes
}
