//! Suite runner
//!
//! Reads a suite of reachability checks from YAML or TOML and runs each one
//! against the live cluster, printing a ✓/✗ line per case.

mod config;
mod runner;

pub use config::*;
pub use runner::{run_case, run_suite, CaseResult, RunContext, SuiteReport};
