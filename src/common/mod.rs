//! Common utilities shared between the suite runner and the probe agent

pub mod config;
pub mod error;
pub mod logging;

pub use error::{CaseFailure, Error, Result};
