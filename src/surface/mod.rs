//! Script-facing surface
//!
//! `Bridge` is what a script's `Call`, `RegisterTrampoline` and
//! `FreeTrampoline` commands talk to. Outbound calls take the flat
//! `[type, value]* [returnType]` parameter list a script writes and report
//! problems through `CallStatus` instead of failing.
//!
//! Architecture:
//! - `call.rs` - outbound calls
//! - `callback.rs` - trampoline registration
//! - `status.rs` - status codes

mod call;
mod callback;
mod status;

use std::sync::Arc;

use dashmap::DashMap;
use nativebridge_runtime::interop::TargetResolver;
use nativebridge_runtime::{
    CallConvention, ExecutionMode, ScriptEngine, ScriptValue, Trampoline, Variable,
};

pub use callback::TrampolineOptions;
pub use status::CallStatus;

use crate::frontend::Config;

/// One entry of a call's parameter list
#[derive(Debug)]
pub enum Param<'a> {
    /// A literal, passed by value
    Value(ScriptValue),
    /// A script variable; receives output written through by-address
    /// arguments and `Str` buffers
    Var(&'a mut Variable),
}

impl<'a> Param<'a> {
    #[inline]
    pub fn value(&self) -> &ScriptValue {
        match self {
            Self::Value(value) => value,
            Self::Var(var) => var.value(),
        }
    }

    #[inline]
    pub fn is_var(&self) -> bool {
        matches!(self, Self::Var(_))
    }

    /// Type token text plus the fallback token a variable offers (its name)
    fn type_token(&self) -> (String, Option<&str>) {
        match self {
            Self::Value(value) => (value.to_string(), None),
            Self::Var(var) => (var.value().to_string(), Some(var.name())),
        }
    }
}

macro_rules! param_from_value {
    ($($ty:ty),*) => {
        $(
            impl<'a> From<$ty> for Param<'a> {
                fn from(value: $ty) -> Self {
                    Self::Value(value.into())
                }
            }
        )*
    };
}

param_from_value!(ScriptValue, i64, i32, f64, &str, String);

impl<'a> From<&'a mut Variable> for Param<'a> {
    fn from(var: &'a mut Variable) -> Self {
        Self::Var(var)
    }
}

/// Result of an outbound call
///
/// `value` is always usable: the zero of the return kind when the call did
/// not produce one.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub value: ScriptValue,
    pub status: CallStatus,
    /// errno / GetLastError right after the native call
    pub last_error: u32,
}

impl CallResult {
    fn failed(status: CallStatus, value: ScriptValue) -> Self {
        Self {
            value,
            status,
            last_error: 0,
        }
    }

    /// JSON view used by the command line
    pub fn to_json(&self) -> serde_json::Value {
        let value = match &self.value {
            ScriptValue::Empty => serde_json::Value::Null,
            ScriptValue::Integer(n) => serde_json::Value::from(*n),
            ScriptValue::Float(x) => serde_json::Value::from(*x),
            ScriptValue::Text(text) => serde_json::Value::from(text.as_str()),
        };
        serde_json::json!({
            "value": value,
            "status": self.status.to_string(),
            "last_error": self.last_error,
        })
    }
}

/// Outbound calls and trampoline registry over one script engine
pub struct Bridge {
    engine: Arc<ScriptEngine>,
    resolver: TargetResolver,
    unload_on_demand: bool,
    callback_defaults: TrampolineOptions,
    trampolines: DashMap<usize, Trampoline>,
}

impl Bridge {
    /// Bridge with the default configuration
    pub fn new(engine: Arc<ScriptEngine>) -> Self {
        Self::with_config(engine, &Config::default())
    }

    /// Bridge configured from a `.nativebridge.toml`
    ///
    /// Also applies the configured thread ceiling to `engine`.
    pub fn with_config(engine: Arc<ScriptEngine>, config: &Config) -> Self {
        engine.set_max_threads(config.engine.max_threads);
        Self {
            engine,
            resolver: config.target_resolver(),
            unload_on_demand: config.resolver.unload_on_demand,
            callback_defaults: TrampolineOptions {
                mode: ExecutionMode::from(config.callbacks.default_mode),
                convention: CallConvention::from(config.callbacks.default_convention),
            },
            trampolines: DashMap::new(),
        }
    }

    #[inline]
    pub fn engine(&self) -> &Arc<ScriptEngine> {
        &self.engine
    }
}

impl core::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bridge")
            .field("unload_on_demand", &self.unload_on_demand)
            .field("callback_defaults", &self.callback_defaults)
            .field("trampolines", &self.trampolines.len())
            .finish()
    }
}
