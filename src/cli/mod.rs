//! Command-line interface for the `file-events` binary.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
