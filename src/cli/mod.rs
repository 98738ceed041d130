//! Command-line interface for branchforge.
//!
//! Provides commands for running and validating campaign files, a
//! generational demo, and listing the built-in pipeline kinds.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
