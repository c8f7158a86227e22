//! Frontend components
//!
//! The configuration file and the command-line front end.

pub mod cli;
pub mod config;

pub use cli::main as cli_main;
pub use config::Config;
