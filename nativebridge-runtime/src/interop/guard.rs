//! Guarded native calls
//!
//! Turns a hardware fault raised inside a native callee into an exception
//! code instead of terminating the process. Codes use the Windows exception
//! space on every platform.
//!
//! Limits: on Unix the callee's frames are abandoned by `siglongjmp`, so any
//! cleanup it had pending (locks, allocations) is skipped. A fault that
//! happens while no guard is active on the faulting thread is handed to the
//! previously installed disposition.

pub const ACCESS_VIOLATION: u32 = 0xC000_0005;
pub const IN_PAGE_ERROR: u32 = 0xC000_0006;
pub const ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
pub const FLOAT_INVALID_OPERATION: u32 = 0xC000_0090;
pub const INTEGER_DIVIDE_BY_ZERO: u32 = 0xC000_0094;

/// Run `f`, catching hardware faults it raises on this thread
///
/// # Safety
/// A fault unwinds nothing: values owned by frames between the guard and the
/// fault are leaked and their destructors never run. `f` must not hold
/// anything whose drop is required for soundness.
#[inline]
pub unsafe fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, u32> {
    platform::guarded(f)
}

#[cfg(unix)]
mod platform {
    use core::cell::Cell;
    use core::ffi::{c_int, c_void};
    use core::ptr;
    use std::sync::Once;

    use once_cell::sync::OnceCell;

    const SIGNALS: [c_int; 4] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE];

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    const FPE_INTDIV: c_int = 7;
    #[cfg(target_os = "freebsd")]
    const FPE_INTDIV: c_int = 2;
    #[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
    const FPE_INTDIV: c_int = 1;

    /// Opaque storage large enough for `sigjmp_buf` on every supported libc
    #[repr(C, align(16))]
    struct JumpBuffer([u8; 512]);

    extern "C" {
        #[cfg_attr(all(target_os = "linux", target_env = "gnu"), link_name = "__sigsetjmp")]
        fn sigsetjmp(env: *mut JumpBuffer, savemask: c_int) -> c_int;
        fn siglongjmp(env: *mut JumpBuffer, val: c_int) -> !;
    }

    thread_local! {
        static ACTIVE: Cell<*mut JumpBuffer> = const { Cell::new(ptr::null_mut()) };
        static FAULT_CODE: Cell<u32> = const { Cell::new(0) };
    }

    static INSTALL: Once = Once::new();
    static PREVIOUS: OnceCell<Vec<(c_int, libc::sigaction)>> = OnceCell::new();

    fn install() {
        INSTALL.call_once(|| {
            let mut previous = Vec::with_capacity(SIGNALS.len());
            for &signal in &SIGNALS {
                // SAFETY: zeroed sigaction is a valid starting point; the
                // handler has the SA_SIGINFO signature.
                unsafe {
                    let mut action: libc::sigaction = core::mem::zeroed();
                    action.sa_sigaction = fault_handler as *const () as usize;
                    action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
                    libc::sigemptyset(&mut action.sa_mask);
                    let mut old: libc::sigaction = core::mem::zeroed();
                    if libc::sigaction(signal, &action, &mut old) == 0 {
                        previous.push((signal, old));
                    }
                }
            }
            let _ = PREVIOUS.set(previous);
        });
    }

    fn code_for(signal: c_int, info: *const libc::siginfo_t) -> u32 {
        match signal {
            libc::SIGSEGV => super::ACCESS_VIOLATION,
            libc::SIGBUS => super::IN_PAGE_ERROR,
            libc::SIGILL => super::ILLEGAL_INSTRUCTION,
            libc::SIGFPE => {
                // SAFETY: the kernel hands SA_SIGINFO handlers a valid siginfo.
                let code = if info.is_null() { 0 } else { unsafe { (*info).si_code } };
                if code == FPE_INTDIV {
                    super::INTEGER_DIVIDE_BY_ZERO
                } else {
                    super::FLOAT_INVALID_OPERATION
                }
            }
            _ => super::ACCESS_VIOLATION,
        }
    }

    extern "C" fn fault_handler(signal: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
        let buffer = ACTIVE.with(|a| a.get());
        if buffer.is_null() {
            // SAFETY: forwarding to the disposition that was in place before us.
            unsafe { forward(signal, info, context) };
            return;
        }
        FAULT_CODE.with(|c| c.set(code_for(signal, info)));
        ACTIVE.with(|a| a.set(ptr::null_mut()));
        // SAFETY: `buffer` was filled by sigsetjmp in a frame that is still live.
        unsafe { siglongjmp(buffer, 1) }
    }

    unsafe fn forward(signal: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
        let previous = PREVIOUS
            .get()
            .and_then(|all| all.iter().find(|(s, _)| *s == signal))
            .map(|(_, action)| *action);

        match previous {
            Some(action)
                if action.sa_sigaction != libc::SIG_DFL && action.sa_sigaction != libc::SIG_IGN =>
            {
                if action.sa_flags & libc::SA_SIGINFO != 0 {
                    let handler: extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) =
                        core::mem::transmute(action.sa_sigaction);
                    handler(signal, info, context);
                } else {
                    let handler: extern "C" fn(c_int) = core::mem::transmute(action.sa_sigaction);
                    handler(signal);
                }
            }
            _ => {
                // Reinstate the default; the faulting instruction re-executes
                // and the fault is delivered as if we were never installed.
                let mut action: libc::sigaction = core::mem::zeroed();
                action.sa_sigaction = libc::SIG_DFL;
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(signal, &action, ptr::null_mut());
            }
        }
    }

    /// Puts the enclosing jump buffer back when `f` returns or unwinds
    struct RestoreActive(*mut JumpBuffer);

    impl Drop for RestoreActive {
        fn drop(&mut self) {
            ACTIVE.with(|a| a.set(self.0));
        }
    }

    #[cfg(test)]
    pub(super) fn is_active() -> bool {
        !ACTIVE.with(|a| a.get()).is_null()
    }

    #[inline(never)]
    pub(super) unsafe fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, u32> {
        install();
        let mut buffer = JumpBuffer([0; 512]);
        let enclosing = ACTIVE.with(|a| a.get());

        if sigsetjmp(&mut buffer, 1) == 0 {
            ACTIVE.with(|a| a.set(&mut buffer));
            let _restore = RestoreActive(enclosing);
            Ok(f())
        } else {
            ACTIVE.with(|a| a.set(enclosing));
            Err(FAULT_CODE.with(|c| c.get()))
        }
    }
}

#[cfg(windows)]
mod platform {
    use core::cell::Cell;
    use core::ptr;
    use std::sync::Once;

    use winapi::um::errhandlingapi::AddVectoredExceptionHandler;
    use winapi::um::winnt::{RtlCaptureContext, CONTEXT, EXCEPTION_POINTERS};
    use winapi::vc::excpt::{EXCEPTION_CONTINUE_EXECUTION, EXCEPTION_CONTINUE_SEARCH};

    thread_local! {
        static ACTIVE: Cell<*mut CONTEXT> = const { Cell::new(ptr::null_mut()) };
        static FAULTED: Cell<bool> = const { Cell::new(false) };
        static FAULT_CODE: Cell<u32> = const { Cell::new(0) };
    }

    static INSTALL: Once = Once::new();

    fn is_hardware_fault(code: u32) -> bool {
        matches!(
            code,
            super::ACCESS_VIOLATION
                | super::IN_PAGE_ERROR
                | super::ILLEGAL_INSTRUCTION
                | super::FLOAT_INVALID_OPERATION
                | super::INTEGER_DIVIDE_BY_ZERO
                | 0xC000_0096 // privileged instruction
                | 0xC000_00FD // stack overflow
        )
    }

    unsafe extern "system" fn vectored_handler(info: *mut EXCEPTION_POINTERS) -> i32 {
        let saved = ACTIVE.with(|a| a.get());
        if saved.is_null() {
            return EXCEPTION_CONTINUE_SEARCH;
        }
        let code = (*(*info).ExceptionRecord).ExceptionCode;
        if !is_hardware_fault(code) {
            return EXCEPTION_CONTINUE_SEARCH;
        }
        FAULT_CODE.with(|c| c.set(code));
        FAULTED.with(|f| f.set(true));
        ACTIVE.with(|a| a.set(ptr::null_mut()));
        *(*info).ContextRecord = *saved;
        EXCEPTION_CONTINUE_EXECUTION
    }

    struct RestoreActive(*mut CONTEXT);

    impl Drop for RestoreActive {
        fn drop(&mut self) {
            ACTIVE.with(|a| a.set(self.0));
        }
    }

    #[cfg(test)]
    pub(super) fn is_active() -> bool {
        !ACTIVE.with(|a| a.get()).is_null()
    }

    #[inline(never)]
    pub(super) unsafe fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, u32> {
        INSTALL.call_once(|| {
            AddVectoredExceptionHandler(1, Some(vectored_handler));
        });

        let mut context: CONTEXT = core::mem::zeroed();
        let enclosing = ACTIVE.with(|a| a.get());
        FAULTED.with(|f| f.set(false));

        // Execution resumes here a second time when the handler restores
        // the captured context.
        RtlCaptureContext(&mut context);

        if !FAULTED.with(|f| f.get()) {
            ACTIVE.with(|a| a.set(&mut context));
            let _restore = RestoreActive(enclosing);
            Ok(f())
        } else {
            FAULTED.with(|f| f.set(false));
            ACTIVE.with(|a| a.set(enclosing));
            Err(FAULT_CODE.with(|c| c.get()))
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    pub(super) unsafe fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, u32> {
        Ok(f())
    }
}

#[cfg(all(test, any(unix, windows)))]
mod tests {
    use super::*;

    #[test]
    fn test_passes_result_through() {
        let value = unsafe { guarded(|| 40 + 2) };
        assert_eq!(value, Ok(42));
    }

    #[test]
    fn test_unmapped_write_is_access_violation() {
        let result = unsafe {
            guarded(|| {
                let p = 8 as *mut u32;
                core::ptr::write_volatile(p, 7);
            })
        };
        assert_eq!(result, Err(ACCESS_VIOLATION));
    }

    #[test]
    fn test_usable_after_fault() {
        for _ in 0..3 {
            let result = unsafe { guarded(|| core::ptr::read_volatile(8 as *const u64)) };
            assert_eq!(result, Err(ACCESS_VIOLATION));
        }
        assert_eq!(unsafe { guarded(|| 1) }, Ok(1));
    }

    #[test]
    fn test_nested_guards() {
        let result = unsafe {
            guarded(|| {
                let inner = guarded(|| core::ptr::read_volatile(16 as *const u32));
                assert_eq!(inner, Err(ACCESS_VIOLATION));
                5
            })
        };
        assert_eq!(result, Ok(5));
    }

    #[test]
    fn test_panic_leaves_no_stale_guard() {
        let outcome = std::panic::catch_unwind(|| unsafe { guarded(|| panic!("callee panicked")) });
        assert!(outcome.is_err());
        assert!(!platform::is_active());

        let result = unsafe {
            guarded(|| {
                let inner = std::panic::catch_unwind(|| guarded(|| panic!("inner panicked")));
                assert!(inner.is_err());
                assert!(platform::is_active());
                core::ptr::read_volatile(8 as *const u32)
            })
        };
        assert_eq!(result, Err(ACCESS_VIOLATION));
        assert!(!platform::is_active());
    }
}
