//! Shared ambient services for envmon binaries
//!
//! - `logging`: tracing subscriber bootstrap with console and rolling file output
//! - `config`: layered configuration loading (defaults, file, environment)

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
