//! Script functions
//!
//! A function owns one storage block shared by all of its invocations:
//! formal parameters first, then declared locals. Recursion and callbacks
//! that re-enter a running function go through the context manager, which
//! saves and restores that block.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::engine::ScriptEngine;
use super::value::ScriptValue;

/// One formal parameter
#[derive(Debug, Clone, PartialEq)]
pub struct FormalParam {
    pub name: String,
    /// Parameters with a default are optional
    pub default: Option<ScriptValue>,
    pub by_ref: bool,
}

/// Body of a function; returns `None` when it produces no result
pub type Body = Arc<dyn Fn(&mut Frame<'_>) -> Option<ScriptValue> + Send + Sync>;

pub struct ScriptFunction {
    name: String,
    params: Vec<FormalParam>,
    locals: Vec<String>,
    builtin: bool,
    body: Body,
    storage: Mutex<Vec<ScriptValue>>,
    instances: AtomicUsize,
}

impl ScriptFunction {
    pub fn builder(name: impl Into<String>) -> FunctionBuilder {
        FunctionBuilder {
            name: name.into(),
            params: Vec::new(),
            locals: Vec::new(),
            builtin: false,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn params(&self) -> &[FormalParam] {
        &self.params
    }

    #[inline]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Parameters without a default
    pub fn mandatory_count(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    pub fn has_by_ref_params(&self) -> bool {
        self.params.iter().any(|p| p.by_ref)
    }

    /// Built-in functions are implemented natively and cannot back trampolines
    #[inline]
    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    /// Number of invocations currently running
    #[inline]
    pub fn instances(&self) -> usize {
        self.instances.load(Ordering::Acquire)
    }

    /// Storage slot for a parameter or local (case-insensitive)
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.params
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.locals.iter().map(String::as_str))
            .position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Current contents of a storage slot
    pub fn read_slot(&self, slot: usize) -> ScriptValue {
        self.storage.lock().get(slot).cloned().unwrap_or_default()
    }

    pub fn write_slot(&self, slot: usize, value: ScriptValue) {
        if let Some(cell) = self.storage.lock().get_mut(slot) {
            *cell = value;
        }
    }

    /// Take the whole storage block, leaving it cleared
    pub(crate) fn take_storage(&self) -> Vec<ScriptValue> {
        let mut storage = self.storage.lock();
        let cleared = vec![ScriptValue::Empty; storage.len()];
        core::mem::replace(&mut *storage, cleared)
    }

    pub(crate) fn restore_storage(&self, saved: Vec<ScriptValue>) {
        *self.storage.lock() = saved;
    }

    pub(crate) fn clear_storage(&self) {
        self.storage.lock().iter_mut().for_each(|v| *v = ScriptValue::Empty);
    }

    /// Bind actual arguments left to right; missing ones take their default
    pub(crate) fn bind(&self, args: Vec<ScriptValue>) {
        let mut storage = self.storage.lock();
        let mut args = args.into_iter();
        for (slot, param) in self.params.iter().enumerate() {
            storage[slot] = args
                .next()
                .or_else(|| param.default.clone())
                .unwrap_or_default();
        }
    }

    pub(crate) fn enter(&self) -> InstanceGuard<'_> {
        self.instances.fetch_add(1, Ordering::AcqRel);
        InstanceGuard { function: self }
    }

    #[inline]
    pub(crate) fn run(&self, frame: &mut Frame<'_>) -> Option<ScriptValue> {
        (self.body)(frame)
    }
}

impl core::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScriptFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("locals", &self.locals)
            .field("builtin", &self.builtin)
            .field("instances", &self.instances())
            .finish()
    }
}

/// Keeps the live-instance counter raised for one invocation
pub(crate) struct InstanceGuard<'a> {
    function: &'a ScriptFunction,
}

impl Drop for InstanceGuard<'_> {
    fn drop(&mut self) {
        self.function.instances.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct FunctionBuilder {
    name: String,
    params: Vec<FormalParam>,
    locals: Vec<String>,
    builtin: bool,
}

impl FunctionBuilder {
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(FormalParam {
            name: name.into(),
            default: None,
            by_ref: false,
        });
        self
    }

    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<ScriptValue>) -> Self {
        self.params.push(FormalParam {
            name: name.into(),
            default: Some(default.into()),
            by_ref: false,
        });
        self
    }

    pub fn param_by_ref(mut self, name: impl Into<String>) -> Self {
        self.params.push(FormalParam {
            name: name.into(),
            default: None,
            by_ref: true,
        });
        self
    }

    pub fn local(mut self, name: impl Into<String>) -> Self {
        self.locals.push(name.into());
        self
    }

    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    pub fn body<F>(self, body: F) -> ScriptFunction
    where
        F: Fn(&mut Frame<'_>) -> Option<ScriptValue> + Send + Sync + 'static,
    {
        let slots = self.params.len() + self.locals.len();
        ScriptFunction {
            name: self.name,
            params: self.params,
            locals: self.locals,
            builtin: self.builtin,
            body: Arc::new(body),
            storage: Mutex::new(vec![ScriptValue::Empty; slots]),
            instances: AtomicUsize::new(0),
        }
    }
}

/// Per-invocation data, passed explicitly instead of through globals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvocationContext {
    /// Trampoline tag, when invoked from native code
    pub tag: Option<i64>,
    pub thread_id: u32,
}

/// View of a running invocation handed to the body
pub struct Frame<'a> {
    function: &'a ScriptFunction,
    engine: &'a ScriptEngine,
    context: InvocationContext,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        function: &'a ScriptFunction,
        engine: &'a ScriptEngine,
        context: InvocationContext,
    ) -> Self {
        Self {
            function,
            engine,
            context,
        }
    }

    /// Read a parameter or local; unknown names read as empty
    pub fn get(&self, name: &str) -> ScriptValue {
        self.function
            .slot_of(name)
            .map(|slot| self.function.read_slot(slot))
            .unwrap_or_default()
    }

    /// Write a parameter or local; returns false for unknown names
    pub fn set(&mut self, name: &str, value: impl Into<ScriptValue>) -> bool {
        match self.function.slot_of(name) {
            Some(slot) => {
                self.function.write_slot(slot, value.into());
                true
            }
            None => false,
        }
    }

    /// Positional parameter
    pub fn arg(&self, index: usize) -> ScriptValue {
        if index < self.function.param_count() {
            self.function.read_slot(index)
        } else {
            ScriptValue::Empty
        }
    }

    #[inline]
    pub fn tag(&self) -> Option<i64> {
        self.context.tag
    }

    #[inline]
    pub fn thread_id(&self) -> u32 {
        self.context.thread_id
    }

    #[inline]
    pub fn context(&self) -> InvocationContext {
        self.context
    }

    #[inline]
    pub fn function(&self) -> &ScriptFunction {
        self.function
    }

    #[inline]
    pub fn engine(&self) -> &ScriptEngine {
        self.engine
    }
}
