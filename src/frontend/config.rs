use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nativebridge_runtime::interop::{TargetResolver, DEFAULT_LIBRARIES, DEFAULT_SYMBOL_SUFFIX};
use nativebridge_runtime::script::DEFAULT_MAX_THREADS;
use nativebridge_runtime::{CallConvention, ExecutionMode};
use tracing::Level;

use crate::errors::ConfigError;
use crate::infrastructure::{LogConfig, LogFormat};

/// File name searched for by `Config::discover`
pub const CONFIG_FILE_NAME: &str = ".nativebridge.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub callbacks: CallbackConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ceiling on concurrently running isolated callbacks
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Libraries searched, in order, for bare symbol names
    #[serde(default = "default_libraries")]
    pub default_libraries: Vec<String>,

    /// Single character appended on the retry after a failed lookup; empty disables it
    #[serde(default = "default_suffix")]
    pub symbol_suffix: String,

    /// Unload libraries loaded for one call once it returns
    #[serde(default = "default_true")]
    pub unload_on_demand: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackConfig {
    #[serde(default)]
    pub default_mode: ModeSetting,

    #[serde(default)]
    pub default_convention: ConventionSetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    #[default]
    Isolated,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConventionSetting {
    #[default]
    Stdcall,
    Cdecl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatSetting {
    Pretty,
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: FormatSetting,

    /// Log file; stderr when absent
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_libraries: default_libraries(),
            symbol_suffix: default_suffix(),
            unload_on_demand: true,
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            default_mode: ModeSetting::Isolated,
            default_convention: ConventionSetting::Stdcall,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: FormatSetting::Compact,
            file: None,
        }
    }
}

fn default_true() -> bool { true }
fn default_max_threads() -> usize { DEFAULT_MAX_THREADS }
fn default_level() -> String { "warn".to_string() }
fn default_suffix() -> String { DEFAULT_SYMBOL_SUFFIX.to_string() }

fn default_libraries() -> Vec<String> {
    DEFAULT_LIBRARIES.iter().map(|s| s.to_string()).collect()
}

impl From<ModeSetting> for ExecutionMode {
    fn from(setting: ModeSetting) -> Self {
        match setting {
            ModeSetting::Isolated => ExecutionMode::Isolated,
            ModeSetting::Fast => ExecutionMode::Fast,
        }
    }
}

impl From<ConventionSetting> for CallConvention {
    fn from(setting: ConventionSetting) -> Self {
        match setting {
            ConventionSetting::Stdcall => CallConvention::StdCall,
            ConventionSetting::Cdecl => CallConvention::CDecl,
        }
    }
}

impl From<FormatSetting> for LogFormat {
    fn from(setting: FormatSetting) -> Self {
        match setting {
            FormatSetting::Pretty => LogFormat::Pretty,
            FormatSetting::Compact => LogFormat::Compact,
            FormatSetting::Json => LogFormat::Json,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.symbol_suffix.chars().count() > 1 {
            return Err(ConfigError::InvalidValue {
                key: "resolver.symbol_suffix",
                value: self.resolver.symbol_suffix.clone(),
            });
        }
        if self.engine.max_threads == 0 {
            return Err(ConfigError::InvalidValue {
                key: "engine.max_threads",
                value: "0".to_string(),
            });
        }
        self.log_level()?;
        Ok(())
    }

    /// Find and load `.nativebridge.toml` from the current directory or its parents
    ///
    /// Unreadable or invalid files are skipped; defaults apply when none is found.
    pub fn discover() -> Self {
        std::env::current_dir()
            .ok()
            .and_then(|dir| Self::discover_from(&dir))
            .unwrap_or_default()
    }

    /// Search `start` and its ancestors for a loadable configuration file
    pub fn discover_from(start: &Path) -> Option<Self> {
        start.ancestors().find_map(|dir| {
            let path = dir.join(CONFIG_FILE_NAME);
            if !path.is_file() {
                return None;
            }
            match Self::load(&path) {
                Ok(config) => Some(config),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring config file");
                    None
                }
            }
        })
    }

    /// Suffix for the retry lookup, if enabled
    pub fn symbol_suffix(&self) -> Option<char> {
        self.resolver.symbol_suffix.chars().next()
    }

    /// Target resolver over the configured library list
    pub fn target_resolver(&self) -> TargetResolver {
        TargetResolver::with_libraries(self.resolver.default_libraries.clone(), self.symbol_suffix())
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        Level::from_str(self.logging.level.trim()).map_err(|_| ConfigError::InvalidValue {
            key: "logging.level",
            value: self.logging.level.clone(),
        })
    }

    /// Logging setup described by the `[logging]` table
    pub fn log_config(&self) -> LogConfig {
        let config = LogConfig::new()
            .with_level(self.log_level().unwrap_or(Level::WARN))
            .with_format(self.logging.format.into());
        match &self.logging.file {
            Some(file) => config.with_file(file),
            None => config,
        }
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}
