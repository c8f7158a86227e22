//! Call status
//!
//! The status string a script sees after every outbound call: `0` on
//! success, negative codes for requests rejected before the call, the
//! exception code for a native fault and `A<delta>` for a StdCall stack
//! imbalance.

use std::fmt;

use nativebridge_runtime::interop::TargetError;

/// Diagnostic outcome of an outbound call
///
/// `Display` yields the script-visible status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    Success,
    /// `-1`
    InvalidTarget,
    /// `-2`: return or argument type token
    InvalidType,
    /// `-3`
    LibraryLoad,
    /// `-4`
    SymbolNotFound,
    /// `-5:N`, N counting arguments from 1
    NotNumeric { argument: usize },
    /// `-6`: no native call support on this architecture
    Unsupported,
    /// Exception code of the fault raised inside the callee
    NativeFault(u32),
    /// Signed word delta; the call was still made
    StackImbalance(i32),
}

impl CallStatus {
    #[inline]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "0"),
            Self::InvalidTarget => write!(f, "-1"),
            Self::InvalidType => write!(f, "-2"),
            Self::LibraryLoad => write!(f, "-3"),
            Self::SymbolNotFound => write!(f, "-4"),
            Self::NotNumeric { argument } => write!(f, "-5:{}", argument),
            Self::Unsupported => write!(f, "-6"),
            Self::NativeFault(code) => write!(f, "0x{:08X}", code),
            Self::StackImbalance(delta) => write!(f, "A{}", delta),
        }
    }
}

impl From<&TargetError> for CallStatus {
    fn from(err: &TargetError) -> Self {
        match err {
            TargetError::InvalidSpec(_) => Self::InvalidTarget,
            TargetError::LibraryNotFound { .. } => Self::LibraryLoad,
            TargetError::SymbolNotFound { .. } => Self::SymbolNotFound,
        }
    }
}
