use std::fmt;
use std::path::PathBuf;

use nativebridge_runtime::TrampolineError;

/// Errors raised by the script-facing surface outside of `Bridge::call`
///
/// Outbound calls never fail as a whole; they report through `CallStatus`.
#[derive(Debug)]
pub enum BridgeError {
    UnknownFunction(String),
    Trampoline(TrampolineError),
    UnknownTrampoline(usize),
    Config(ConfigError),
    Usage(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFunction(name) => write!(f, "Unknown function: {}", name),
            Self::Trampoline(err) => write!(f, "Cannot create trampoline: {}", err),
            Self::UnknownTrampoline(address) => {
                write!(f, "No trampoline at address {:#x}", address)
            }
            Self::Config(err) => write!(f, "{}", err),
            Self::Usage(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Trampoline(err) => Some(err),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TrampolineError> for BridgeError {
    fn from(err: TrampolineError) -> Self {
        Self::Trampoline(err)
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// Configuration file errors
#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Write { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "Failed to read config {}: {}", path.display(), source)
            }
            Self::Write { path, source } => {
                write!(f, "Failed to write config {}: {}", path.display(), source)
            }
            Self::Parse(err) => write!(f, "Failed to parse config: {}", err),
            Self::Serialize(err) => write!(f, "Failed to serialize config: {}", err),
            Self::InvalidValue { key, value } => {
                write!(f, "Invalid value for {}: '{}'", key, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Serialize(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}
