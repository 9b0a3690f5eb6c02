//! # psyrec Common Library
//!
//! Shared code for the psyrec questionnaire reconciliation tools:
//! - Error type shared by every crate
//! - Configuration file resolution and TOML loading
//! - Tracing subscriber initialization
//! - Psytools timestamp and date parsing

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
