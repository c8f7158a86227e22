//! Script engine
//!
//! One logical interpreter per engine. Every OS thread that wants to run
//! script code takes the reentrant execution lock first, so callbacks
//! arriving on foreign threads queue up while nested callbacks on the owning
//! thread proceed.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

use super::context::with_isolated_locals;
use super::function::{Frame, InvocationContext, ScriptFunction};
use super::value::ScriptValue;
use crate::logging;

/// Default ceiling on concurrently running logical threads
pub const DEFAULT_MAX_THREADS: usize = 10;

/// One logical script thread
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadState {
    pub id: u32,
    pub error_level: ScriptValue,
    pub event_info: i64,
    pub paused: bool,
}

impl ThreadState {
    fn idle() -> Self {
        Self {
            id: 0,
            error_level: ScriptValue::Integer(0),
            event_info: 0,
            paused: false,
        }
    }
}

struct ThreadTable {
    /// Index 0 is the idle base context and is never popped
    stack: Vec<ThreadState>,
    next_id: u32,
    max_threads: usize,
}

impl ThreadTable {
    fn current(&mut self) -> &mut ThreadState {
        let top = self.stack.len() - 1;
        &mut self.stack[top]
    }

    fn find(&mut self, id: u32) -> Option<&mut ThreadState> {
        self.stack.iter_mut().rev().find(|t| t.id == id)
    }
}

pub struct ScriptEngine {
    functions: DashMap<String, Arc<ScriptFunction>>,
    execution: ReentrantMutex<()>,
    threads: Mutex<ThreadTable>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::with_max_threads(DEFAULT_MAX_THREADS)
    }

    pub fn with_max_threads(max_threads: usize) -> Self {
        Self {
            functions: DashMap::new(),
            execution: ReentrantMutex::new(()),
            threads: Mutex::new(ThreadTable {
                stack: vec![ThreadState::idle()],
                next_id: 1,
                max_threads,
            }),
        }
    }

    pub fn max_threads(&self) -> usize {
        self.threads.lock().max_threads
    }

    pub fn set_max_threads(&self, max_threads: usize) {
        self.threads.lock().max_threads = max_threads;
    }

    /// Register a function, replacing any with the same name
    pub fn define(&self, function: ScriptFunction) -> Arc<ScriptFunction> {
        let function = Arc::new(function);
        self.functions
            .insert(function.name().to_ascii_lowercase(), Arc::clone(&function));
        function
    }

    /// Look up a function by name (case-insensitive)
    pub fn function(&self, name: &str) -> Option<Arc<ScriptFunction>> {
        self.functions
            .get(&name.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Call a script function directly, on the current logical thread
    pub fn call_function(
        &self,
        name: &str,
        args: Vec<ScriptValue>,
    ) -> Result<Option<ScriptValue>, EngineError> {
        let function = self
            .function(name)
            .ok_or_else(|| EngineError::UnknownFunction(name.to_owned()))?;
        if args.len() > function.param_count() {
            return Err(EngineError::TooManyArguments {
                function: function.name().to_owned(),
                expected: function.param_count(),
                got: args.len(),
            });
        }

        let _exec = self.lock();
        let context = InvocationContext {
            tag: None,
            thread_id: self.current_thread().id,
        };
        Ok(self.invoke(&function, args, context))
    }

    /// Run one invocation through the context manager
    ///
    /// Callers must hold the execution lock.
    pub(crate) fn invoke(
        &self,
        function: &ScriptFunction,
        args: Vec<ScriptValue>,
        context: InvocationContext,
    ) -> Option<ScriptValue> {
        logging::trace!(
            target: "script",
            function = function.name(),
            args = args.len(),
            thread = context.thread_id,
            "invoking script function"
        );
        with_isolated_locals(function, args, || {
            let mut frame = Frame::new(function, self, context);
            function.run(&mut frame)
        })
    }

    /// Enter the single logical interpreter (reentrant on the owning thread)
    #[inline]
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.execution.lock()
    }

    /// Snapshot of the running logical thread
    pub fn current_thread(&self) -> ThreadState {
        self.threads.lock().current().clone()
    }

    /// Logical threads running above the idle base context
    pub fn active_threads(&self) -> usize {
        self.threads.lock().stack.len() - 1
    }

    pub fn error_level(&self) -> ScriptValue {
        self.threads.lock().current().error_level.clone()
    }

    pub fn set_error_level(&self, value: impl Into<ScriptValue>) {
        self.threads.lock().current().error_level = value.into();
    }

    /// Ambient event info of the running thread (last trampoline tag)
    pub fn event_info(&self) -> i64 {
        self.threads.lock().current().event_info
    }

    pub fn is_paused(&self) -> bool {
        self.threads.lock().current().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.threads.lock().current().paused = paused;
    }

    /// Start a new logical thread unless the ceiling is reached
    ///
    /// The new thread inherits a copy of the ambient state; whatever it
    /// changes is discarded when the guard drops.
    pub(crate) fn begin_thread(&self) -> Option<ThreadGuard<'_>> {
        let mut table = self.threads.lock();
        let running = table.stack.len() - 1;
        if running >= table.max_threads {
            logging::warn!(
                target: "script",
                running,
                max_threads = table.max_threads,
                "thread ceiling reached"
            );
            return None;
        }
        let id = table.next_id;
        table.next_id = table.next_id.wrapping_add(1).max(1);
        let ambient = table.current().clone();
        table.stack.push(ThreadState {
            id,
            paused: false,
            ..ambient
        });
        Some(ThreadGuard { engine: self, id })
    }

    /// Run on the current logical thread with its pause state lifted
    pub(crate) fn resume_current(&self) -> ResumeGuard<'_> {
        let mut table = self.threads.lock();
        let current = table.current();
        let was_paused = core::mem::replace(&mut current.paused, false);
        ResumeGuard {
            engine: self,
            id: current.id,
            was_paused,
        }
    }

    /// Mirror a tag into the running thread's event info until the guard drops
    pub(crate) fn mirror_event_info(&self, tag: i64) -> EventInfoGuard<'_> {
        let mut table = self.threads.lock();
        let current = table.current();
        let previous = core::mem::replace(&mut current.event_info, tag);
        EventInfoGuard {
            engine: self,
            id: current.id,
            previous,
        }
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("functions", &self.functions.len())
            .field("active_threads", &self.active_threads())
            .finish()
    }
}

/// Pops a logical thread on drop
pub(crate) struct ThreadGuard<'a> {
    engine: &'a ScriptEngine,
    id: u32,
}

impl ThreadGuard<'_> {
    #[inline]
    pub(crate) fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for ThreadGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.engine.threads.lock();
        if let Some(index) = table.stack.iter().rposition(|t| t.id == self.id) {
            if index > 0 {
                table.stack.remove(index);
            }
        }
    }
}

/// Re-pauses the thread on drop if it was paused before
pub(crate) struct ResumeGuard<'a> {
    engine: &'a ScriptEngine,
    id: u32,
    was_paused: bool,
}

impl ResumeGuard<'_> {
    #[inline]
    pub(crate) fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        if self.was_paused {
            if let Some(thread) = self.engine.threads.lock().find(self.id) {
                thread.paused = true;
            }
        }
    }
}

/// Puts back the previous event info on drop
pub(crate) struct EventInfoGuard<'a> {
    engine: &'a ScriptEngine,
    id: u32,
    previous: i64,
}

impl Drop for EventInfoGuard<'_> {
    fn drop(&mut self) {
        if let Some(thread) = self.engine.threads.lock().find(self.id) {
            thread.event_info = self.previous;
        }
    }
}

/// Direct call errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    UnknownFunction(String),
    TooManyArguments {
        function: String,
        expected: usize,
        got: usize,
    },
}

impl core::fmt::Display for EngineError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::UnknownFunction(name) => write!(f, "Call to nonexistent function '{}'", name),
            Self::TooManyArguments {
                function,
                expected,
                got,
            } => write!(
                f,
                "Too many parameters passed to '{}': expected at most {}, got {}",
                function, expected, got
            ),
        }
    }
}

impl std::error::Error for EngineError {}
