//! ABI backends, one per supported architecture
//!
//! Every backend's layout is compiled on every host; `NativeBackend` names
//! the one whose `transfer` works on this target.

pub mod aarch64;
pub mod sysv64;
pub mod win64;
pub mod x86;

pub use aarch64::Aarch64;
pub use sysv64::SysV64;
pub use win64::Win64;
pub use x86::X86;

#[cfg(target_arch = "x86")]
pub type NativeBackend = X86;

#[cfg(all(target_arch = "x86_64", windows))]
pub type NativeBackend = Win64;

#[cfg(all(target_arch = "x86_64", not(windows)))]
pub type NativeBackend = SysV64;

#[cfg(target_arch = "aarch64")]
pub type NativeBackend = Aarch64;

// Layout still works on other targets; transfer reports the architecture as unsupported.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
pub type NativeBackend = SysV64;
