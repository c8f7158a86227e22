//! Callbacks - native code calling into script functions
//!
//! A trampoline is a small generated stub that looks like an ordinary native
//! function pointer. Each stub forwards to one shared dispatch entry, which
//! finds the bound script function by the id baked into the stub.
//!
//! Architecture:
//! - `codemem.rs` - executable memory blocks
//! - `stub.rs` - per-architecture stub emission
//! - `dispatch.rs` - the shared entry point and binding registry

mod codemem;
mod dispatch;
mod stub;

use std::sync::Arc;

pub use codemem::{CodeMemoryError, ExecutableBlock};
pub use dispatch::{registered, DEFAULT_RESULT};
pub use stub::{emit, StubTarget};

use crate::interop::{stats, CallConvention};
use crate::logging;
use crate::script::{ScriptEngine, ScriptFunction};

/// Highest parameter count a trampoline can declare
pub const MAX_TRAMPOLINE_PARAMS: usize = 31;

/// How a callback runs relative to the logical thread table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionMode {
    /// New logical thread per invocation, subject to the thread ceiling
    #[default]
    Isolated,
    /// Reuse whatever thread is current, lifting a pause for the duration
    Fast,
}

impl ExecutionMode {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Isolated => "isolated",
            Self::Fast => "fast",
        }
    }
}

/// What the dispatcher needs to run a trampoline's function
pub(crate) struct TrampolineBinding {
    pub(crate) engine: Arc<ScriptEngine>,
    pub(crate) function: Arc<ScriptFunction>,
    pub(crate) param_count: usize,
    pub(crate) mode: ExecutionMode,
    pub(crate) tag: i64,
}

/// A native-callable entry point bound to a script function
///
/// Dropping (or `release`) unmaps the code. It must not happen while native
/// code may still call the address.
pub struct Trampoline {
    id: usize,
    convention: CallConvention,
    binding: Arc<TrampolineBinding>,
    block: ExecutableBlock,
}

impl Trampoline {
    /// Generate a trampoline for `function`
    ///
    /// `param_count` defaults to every formal parameter; `tag` defaults to
    /// the trampoline's own address.
    pub fn create(
        engine: &Arc<ScriptEngine>,
        function: Arc<ScriptFunction>,
        param_count: Option<usize>,
        convention: CallConvention,
        mode: ExecutionMode,
        tag: Option<i64>,
    ) -> Result<Self, TrampolineError> {
        if function.is_builtin() {
            return Err(TrampolineError::BuiltinFunction(function.name().to_owned()));
        }
        if function.has_by_ref_params() {
            return Err(TrampolineError::ByRefParams(function.name().to_owned()));
        }
        let declared = param_count.unwrap_or(function.param_count());
        let min = function.mandatory_count();
        let max = function.param_count().min(MAX_TRAMPOLINE_PARAMS);
        if declared < min || declared > max {
            return Err(TrampolineError::ParamCount {
                requested: declared,
                min,
                max,
            });
        }
        let target = StubTarget::native().ok_or(TrampolineError::UnsupportedArchitecture)?;

        let id = dispatch::next_id();
        let code = stub::emit(target, declared, convention, id, dispatch::entry_address());
        let block = ExecutableBlock::new(&code)?;
        let tag = tag.unwrap_or(block.address() as i64);

        let binding = Arc::new(TrampolineBinding {
            engine: Arc::clone(engine),
            function,
            param_count: declared,
            mode,
            tag,
        });
        dispatch::register(id, Arc::clone(&binding));
        stats::trampoline_created();
        logging::log_trampoline_created(id, binding.function.name(), block.address(), declared);

        Ok(Self {
            id,
            convention,
            binding,
            block,
        })
    }

    /// Native function pointer value
    #[inline]
    pub fn address(&self) -> usize {
        self.block.address()
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn function(&self) -> &Arc<ScriptFunction> {
        &self.binding.function
    }

    #[inline]
    pub fn param_count(&self) -> usize {
        self.binding.param_count
    }

    #[inline]
    pub fn convention(&self) -> CallConvention {
        self.convention
    }

    #[inline]
    pub fn mode(&self) -> ExecutionMode {
        self.binding.mode
    }

    #[inline]
    pub fn tag(&self) -> i64 {
        self.binding.tag
    }

    /// Release the code block now; same as dropping
    #[inline]
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        if dispatch::unregister(self.id) {
            stats::trampoline_released();
        }
        logging::log_trampoline_released(self.id, self.block.address());
    }
}

impl core::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Trampoline")
            .field("id", &self.id)
            .field("address", &format_args!("{:#x}", self.address()))
            .field("function", &self.binding.function.name())
            .field("param_count", &self.binding.param_count)
            .field("convention", &self.convention)
            .field("mode", &self.binding.mode)
            .field("tag", &self.binding.tag)
            .finish()
    }
}

/// Trampoline creation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrampolineError {
    BuiltinFunction(String),
    ByRefParams(String),
    ParamCount { requested: usize, min: usize, max: usize },
    UnsupportedArchitecture,
    CodeMemory(CodeMemoryError),
}

impl From<CodeMemoryError> for TrampolineError {
    fn from(err: CodeMemoryError) -> Self {
        Self::CodeMemory(err)
    }
}

impl core::fmt::Display for TrampolineError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BuiltinFunction(name) => {
                write!(f, "Built-in function '{}' cannot back a trampoline", name)
            }
            Self::ByRefParams(name) => {
                write!(f, "Function '{}' has by-reference parameters", name)
            }
            Self::ParamCount { requested, min, max } => write!(
                f,
                "Parameter count {} out of range {}..={}",
                requested, min, max
            ),
            Self::UnsupportedArchitecture => write!(f, "Trampolines not supported on this architecture"),
            Self::CodeMemory(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for TrampolineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CodeMemory(err) => Some(err),
            _ => None,
        }
    }
}
