//! nativebridge - script-facing native calls and callbacks
//!
//! The runtime (`nativebridge_runtime`) does the native work; this crate
//! adds the surface a script host exposes (`Bridge`), status codes, the
//! configuration file, logging setup and the command-line front end.

pub mod errors;
pub mod frontend;
pub mod infrastructure;
pub mod surface;

pub use nativebridge_runtime as runtime;

// Re-export commonly used items
pub use errors::{BridgeError, ConfigError};
pub use frontend::{cli_main, Config};
pub use infrastructure::{init_dev_logging, init_logging, LogConfig, LogFormat, LogOutput};
pub use nativebridge_runtime::{ScriptEngine, ScriptFunction, ScriptValue, Variable};
pub use surface::{Bridge, CallResult, CallStatus, Param, TrampolineOptions};
