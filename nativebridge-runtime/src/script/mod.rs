//! Script host model
//!
//! The slice of an interpreter the native bridge talks to: values,
//! functions with shared per-function storage, and an engine that keeps
//! the logical thread table and the execution lock.

mod context;
mod engine;
mod function;
mod value;

pub use context::with_isolated_locals;
pub use engine::{EngineError, ScriptEngine, ThreadState, DEFAULT_MAX_THREADS};
pub use function::{Body, FormalParam, Frame, FunctionBuilder, InvocationContext, ScriptFunction};
pub use value::{ScriptValue, Variable};

#[cfg(test)]
mod tests;
