//! # ifxb Common Library
//!
//! Shared code for the ifxb backup tools:
//! - Configuration model and config file resolution
//! - Tracing subscriber setup
//! - Common error type
//! - Clock helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
