use std::path::PathBuf;
use std::sync::Arc;

use nativebridge_runtime::ScriptEngine;
use tracing::{debug, info, Level};

use crate::errors::BridgeError;
use crate::frontend::config::{Config, CONFIG_FILE_NAME};
use crate::infrastructure::init_logging;
use crate::surface::{Bridge, Param};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Call a native function: `call <target> [<type> <value>]... [<returnType>]`
    Call {
        target: String,
        params: Vec<String>,
        json: bool,
    },
    /// Write a default configuration file
    InitConfig { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub command: Command,
    pub config_path: Option<PathBuf>,
    pub verbose: bool,
}

pub fn usage(prog: &str) -> String {
    format!(
        "nativebridge - call native functions described at run time\n\n\
        USAGE:\n    \
        {0} [OPTIONS] call <target> [<type> <value>]... [<returnType>]\n    \
        {0} [OPTIONS] config --init [path]\n\n\
        OPTIONS:\n    \
        -h, --help        Print help information\n    \
        -v, --verbose     Debug logging to stderr\n    \
        --config <path>   Use this configuration file\n    \
        --json            Print the call result as JSON\n\n\
        EXAMPLES:\n    \
        {0} call libm.so.6!cos Double 0 \"CDecl Double\"\n    \
        {0} call getpid \"CDecl Int\"\n    \
        {0} config --init",
        prog
    )
}

/// Parse command-line arguments (including the program name)
///
/// Anything not starting with `--` (apart from `-h`/`-v`) is positional, so
/// negative numbers pass through as values.
pub fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let prog = args.first().map(String::as_str).unwrap_or("nativebridge");
    let mut positional = Vec::new();
    let mut config_path = None;
    let mut verbose = false;
    let mut json = false;
    let mut init = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Err(usage(prog)),
            "--verbose" | "-v" => verbose = true,
            "--json" => json = true,
            "--init" => init = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires an argument")?;
                config_path = Some(PathBuf::from(path));
            }
            opt if opt.starts_with("--") => {
                return Err(format!("Unknown option: {}\n\n{}", opt, usage(prog)));
            }
            value => positional.push(value.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("call") => {
            let target = positional
                .next()
                .ok_or_else(|| format!("call requires a target\n\n{}", usage(prog)))?;
            Command::Call {
                target,
                params: positional.collect(),
                json,
            }
        }
        Some("config") if init => Command::InitConfig {
            path: positional
                .next()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
        },
        Some("config") => return Err("config requires --init".to_string()),
        Some(other) => return Err(format!("Unknown command: {}\n\n{}", other, usage(prog))),
        None => return Err(usage(prog)),
    };

    Ok(CliConfig {
        command,
        config_path,
        verbose,
    })
}

pub struct Cli {
    options: CliConfig,
    config: Config,
}

impl Cli {
    pub fn new(options: CliConfig, config: Config) -> Self {
        Self { options, config }
    }

    /// Run the command; returns the process exit code
    pub fn run(&self) -> Result<i32, BridgeError> {
        match &self.options.command {
            Command::InitConfig { path } => {
                if path.exists() {
                    return Err(BridgeError::Usage(format!("{} already exists", path.display())));
                }
                self.config.save(path)?;
                println!("Created {}", path.display());
                Ok(0)
            }
            Command::Call {
                target,
                params,
                json,
            } => {
                let bridge = Bridge::with_config(Arc::new(ScriptEngine::new()), &self.config);
                let mut params: Vec<Param<'_>> = params.iter().map(|p| Param::from(p.as_str())).collect();

                debug!(target: "cli", %target, params = params.len(), "calling");
                // SAFETY: the user describes the signature; faults are caught
                // and reported through the status.
                let result = unsafe { bridge.call(target.as_str(), &mut params) };
                info!(target: "cli", status = %result.status, "call finished");

                if *json {
                    println!("{}", result.to_json());
                } else {
                    println!("{}", result.value);
                    if !result.status.is_success() {
                        eprintln!("status: {} (last error {})", result.status, result.last_error);
                    }
                }
                Ok(if result.status.is_success() { 0 } else { 1 })
            }
        }
    }
}

/// Entry point for CLI binary
pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args).map_err(BridgeError::Usage)?;

    let config = match &options.config_path {
        Some(path) => Config::load(path)?,
        None => Config::discover(),
    };

    let mut log_config = config.log_config();
    if options.verbose {
        log_config = log_config.with_level(Level::DEBUG);
    }
    let guard = init_logging(log_config);

    let exit_code = Cli::new(options, config).run()?;
    drop(guard);
    std::process::exit(exit_code);
}
