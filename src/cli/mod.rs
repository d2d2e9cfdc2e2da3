//! Command-line interface for trajforge.
//!
//! Provides the `run`, `rescore`, `filter` and `validate` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
