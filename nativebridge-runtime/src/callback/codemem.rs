//! Executable code blocks
//!
//! Each block is mapped writable, filled, then flipped to read+execute. It
//! is never writable and executable at the same time.

use core::ptr::NonNull;

/// An owned, executable copy of some machine code
#[derive(Debug)]
pub struct ExecutableBlock {
    ptr: NonNull<u8>,
    len: usize,
    code_len: usize,
}

// The block is immutable once published.
unsafe impl Send for ExecutableBlock {}
unsafe impl Sync for ExecutableBlock {}

impl ExecutableBlock {
    /// Map a new block holding `code`
    pub fn new(code: &[u8]) -> Result<Self, CodeMemoryError> {
        if code.is_empty() {
            return Err(CodeMemoryError::Empty);
        }
        let len = round_to_page(code.len());
        let ptr = platform::map_writable(len)?;
        // SAFETY: the mapping is at least `code.len()` bytes and writable.
        unsafe { core::ptr::copy_nonoverlapping(code.as_ptr(), ptr.as_ptr(), code.len()) };
        if let Err(err) = platform::make_executable(ptr, len) {
            // SAFETY: ptr/len came from map_writable above.
            unsafe { platform::unmap(ptr, len) };
            return Err(err);
        }
        platform::flush_icache(ptr, code.len());
        Ok(Self {
            ptr,
            len,
            code_len: code.len(),
        })
    }

    /// Entry address of the code
    #[inline]
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn code_len(&self) -> usize {
        self.code_len
    }

    /// Release the mapping now; same as dropping
    #[inline]
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for ExecutableBlock {
    fn drop(&mut self) {
        // SAFETY: the block owns this mapping.
        unsafe { platform::unmap(self.ptr, self.len) }
    }
}

fn round_to_page(size: usize) -> usize {
    let page = platform::page_size();
    (size + page - 1) / page * page
}

#[cfg(unix)]
mod platform {
    use super::CodeMemoryError;
    use core::ptr::NonNull;

    pub fn page_size() -> usize {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    }

    pub fn map_writable(len: usize) -> Result<NonNull<u8>, CodeMemoryError> {
        // SAFETY: anonymous private mapping; no file descriptor involved.
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CodeMemoryError::AllocationFailed(last_error()));
        }
        NonNull::new(ptr as *mut u8).ok_or(CodeMemoryError::AllocationFailed(0))
    }

    pub fn make_executable(ptr: NonNull<u8>, len: usize) -> Result<(), CodeMemoryError> {
        // SAFETY: ptr/len describe a mapping we own.
        let rc = unsafe { libc::mprotect(ptr.as_ptr().cast(), len, libc::PROT_READ | libc::PROT_EXEC) };
        if rc == 0 {
            Ok(())
        } else {
            Err(CodeMemoryError::ProtectFailed(last_error()))
        }
    }

    pub unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
        libc::munmap(ptr.as_ptr().cast(), len);
    }

    // x86 keeps instruction and data caches coherent.
    pub fn flush_icache(_ptr: NonNull<u8>, _len: usize) {}

    fn last_error() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }
}

#[cfg(windows)]
mod platform {
    use super::CodeMemoryError;
    use core::ptr::NonNull;

    use winapi::um::errhandlingapi::GetLastError;
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
    use winapi::um::processthreadsapi::{FlushInstructionCache, GetCurrentProcess};
    use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE};

    pub fn page_size() -> usize {
        4096
    }

    pub fn map_writable(len: usize) -> Result<NonNull<u8>, CodeMemoryError> {
        // SAFETY: fresh reservation, no address hint.
        let ptr = unsafe {
            VirtualAlloc(core::ptr::null_mut(), len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| CodeMemoryError::AllocationFailed(unsafe { GetLastError() } as i32))
    }

    pub fn make_executable(ptr: NonNull<u8>, len: usize) -> Result<(), CodeMemoryError> {
        let mut old = 0;
        // SAFETY: ptr/len describe an allocation we own.
        let ok = unsafe { VirtualProtect(ptr.as_ptr().cast(), len, PAGE_EXECUTE_READ, &mut old) };
        if ok != 0 {
            Ok(())
        } else {
            Err(CodeMemoryError::ProtectFailed(unsafe { GetLastError() } as i32))
        }
    }

    pub unsafe fn unmap(ptr: NonNull<u8>, _len: usize) {
        VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE);
    }

    pub fn flush_icache(ptr: NonNull<u8>, len: usize) {
        // SAFETY: flushing our own freshly written range.
        unsafe {
            FlushInstructionCache(GetCurrentProcess(), ptr.as_ptr() as *const _, len);
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use super::CodeMemoryError;
    use core::ptr::NonNull;

    pub fn page_size() -> usize {
        4096
    }

    pub fn map_writable(_len: usize) -> Result<NonNull<u8>, CodeMemoryError> {
        Err(CodeMemoryError::AllocationFailed(0))
    }

    pub fn make_executable(_ptr: NonNull<u8>, _len: usize) -> Result<(), CodeMemoryError> {
        Err(CodeMemoryError::ProtectFailed(0))
    }

    pub unsafe fn unmap(_ptr: NonNull<u8>, _len: usize) {}

    pub fn flush_icache(_ptr: NonNull<u8>, _len: usize) {}
}

/// Executable memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeMemoryError {
    Empty,
    AllocationFailed(i32),
    ProtectFailed(i32),
}

impl core::fmt::Display for CodeMemoryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "No code to map"),
            Self::AllocationFailed(code) => {
                write!(f, "Cannot allocate executable memory (os error {})", code)
            }
            Self::ProtectFailed(code) => {
                write!(f, "Cannot make memory executable (os error {})", code)
            }
        }
    }
}

impl std::error::Error for CodeMemoryError {}
