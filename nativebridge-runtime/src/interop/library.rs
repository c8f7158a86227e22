//! Dynamic library loading and symbol resolution
//!
//! Platform-agnostic wrapper around dlopen/LoadLibrary.

use core::ffi::c_void;
use core::ptr::NonNull;
use std::ffi::CString;

use super::stats;
use crate::logging;

/// Anything symbols can be looked up in
pub trait SymbolSource {
    /// Name used in diagnostics
    fn source_name(&self) -> &str;

    /// Address of `symbol`, or `None` when this source does not export it
    fn lookup(&self, symbol: &str) -> Option<*const c_void>;
}

/// Handle to a dynamically loaded library
pub struct Library {
    handle: NonNull<c_void>,
    name: String,
    /// Dropping releases a reference count only when we took one
    owned: bool,
}

impl Library {
    /// Load library by name, taking a reference on it
    ///
    /// Searches standard library paths; absolute paths are used as given.
    pub fn load(name: &str) -> Result<Self, LoadError> {
        let handle = Self::load_impl(name)?;
        stats::record_library_loaded();
        logging::log_library_loaded(name);
        Ok(Self {
            handle,
            name: name.to_owned(),
            owned: true,
        })
    }

    /// Open a library only if it is already mapped into the process
    pub fn resident(name: &str) -> Option<Self> {
        Self::resident_impl(name)
    }

    /// The running program image
    pub fn process() -> Result<Self, LoadError> {
        Self::process_impl()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get function pointer by symbol name
    pub fn symbol(&self, name: &str) -> Result<*const c_void, SymbolError> {
        let cname = CString::new(name).map_err(|_| SymbolError::InvalidName)?;
        let ptr = self.symbol_impl(&cname);
        if ptr.is_null() {
            Err(SymbolError::NotFound(name.to_owned()))
        } else {
            Ok(ptr)
        }
    }

    #[cfg(unix)]
    fn load_impl(name: &str) -> Result<NonNull<c_void>, LoadError> {
        let cname = CString::new(name).map_err(|_| LoadError::InvalidName)?;
        // SAFETY: cname is NUL-terminated; dlerror is read on the same thread.
        unsafe {
            let handle = libc::dlopen(cname.as_ptr(), libc::RTLD_NOW);
            NonNull::new(handle).ok_or_else(|| LoadError::LoadFailed(dl_error()))
        }
    }

    #[cfg(unix)]
    fn resident_impl(name: &str) -> Option<Self> {
        let cname = CString::new(name).ok()?;
        // SAFETY: RTLD_NOLOAD never maps anything new.
        let handle = unsafe { libc::dlopen(cname.as_ptr(), libc::RTLD_NOW | libc::RTLD_NOLOAD) };
        NonNull::new(handle).map(|handle| Self {
            handle,
            name: name.to_owned(),
            owned: true,
        })
    }

    #[cfg(unix)]
    fn process_impl() -> Result<Self, LoadError> {
        // SAFETY: a null filename opens the main program.
        let handle = unsafe { libc::dlopen(core::ptr::null(), libc::RTLD_NOW) };
        NonNull::new(handle)
            .map(|handle| Self {
                handle,
                name: "<process>".to_owned(),
                owned: true,
            })
            .ok_or_else(|| LoadError::LoadFailed(dl_error()))
    }

    #[cfg(unix)]
    fn symbol_impl(&self, name: &CString) -> *const c_void {
        // SAFETY: handle came from dlopen and is still open.
        unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) as *const c_void }
    }

    #[cfg(windows)]
    fn load_impl(name: &str) -> Result<NonNull<c_void>, LoadError> {
        use winapi::um::errhandlingapi::GetLastError;
        use winapi::um::libloaderapi::LoadLibraryW;

        let wide = to_wide(name);
        // SAFETY: wide is NUL-terminated.
        unsafe {
            let handle = LoadLibraryW(wide.as_ptr());
            NonNull::new(handle as *mut c_void)
                .ok_or_else(|| LoadError::LoadFailed(format!("Error code: {}", GetLastError())))
        }
    }

    #[cfg(windows)]
    fn resident_impl(name: &str) -> Option<Self> {
        use winapi::um::libloaderapi::GetModuleHandleW;

        let wide = to_wide(name);
        // SAFETY: GetModuleHandleW takes no reference; we must not free it.
        let handle = unsafe { GetModuleHandleW(wide.as_ptr()) };
        NonNull::new(handle as *mut c_void).map(|handle| Self {
            handle,
            name: name.to_owned(),
            owned: false,
        })
    }

    #[cfg(windows)]
    fn process_impl() -> Result<Self, LoadError> {
        use winapi::um::libloaderapi::GetModuleHandleW;

        // SAFETY: a null name yields the executable's module.
        let handle = unsafe { GetModuleHandleW(core::ptr::null()) };
        NonNull::new(handle as *mut c_void)
            .map(|handle| Self {
                handle,
                name: "<process>".to_owned(),
                owned: false,
            })
            .ok_or_else(|| LoadError::LoadFailed("no process module".into()))
    }

    #[cfg(windows)]
    fn symbol_impl(&self, name: &CString) -> *const c_void {
        use winapi::um::libloaderapi::GetProcAddress;

        // SAFETY: handle is a live module handle.
        unsafe { GetProcAddress(self.handle.as_ptr() as _, name.as_ptr()) as *const c_void }
    }
}

impl SymbolSource for Library {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, symbol: &str) -> Option<*const c_void> {
        self.symbol(symbol).ok()
    }
}

impl core::fmt::Debug for Library {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Library")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("owned", &self.owned)
            .finish()
    }
}

impl Drop for Library {
    #[cfg(unix)]
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: we hold one dlopen reference.
            unsafe {
                libc::dlclose(self.handle.as_ptr());
            }
            logging::log_library_unloaded(&self.name);
        }
    }

    #[cfg(windows)]
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: we hold one LoadLibrary reference.
            unsafe {
                winapi::um::libloaderapi::FreeLibrary(self.handle.as_ptr() as _);
            }
            logging::log_library_unloaded(&self.name);
        }
    }
}

unsafe impl Send for Library {}
unsafe impl Sync for Library {}

#[cfg(unix)]
fn dl_error() -> String {
    // SAFETY: dlerror returns a thread-local message or null.
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "Unknown error".into()
        } else {
            std::ffi::CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

#[cfg(windows)]
fn to_wide(text: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;

    OsStr::new(text).encode_wide().chain(Some(0)).collect()
}

/// Library loading errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    InvalidName,
    LoadFailed(String),
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid library name"),
            Self::LoadFailed(msg) => write!(f, "Failed to load library: {}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

/// Symbol lookup errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    InvalidName,
    NotFound(String),
}

impl core::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "Invalid symbol name"),
            Self::NotFound(name) => write!(f, "Symbol not found: {}", name),
        }
    }
}

impl std::error::Error for SymbolError {}
