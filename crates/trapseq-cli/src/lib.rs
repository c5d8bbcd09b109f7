//! Camera trap segmentation CLI library.
//!
//! This crate provides the CLI interface for trapseq.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, KindArg};
pub use config::Config;
