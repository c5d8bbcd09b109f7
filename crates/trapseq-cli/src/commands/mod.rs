//! CLI subcommand implementations.

pub mod import;
pub mod prune;
pub mod runs;
pub mod segment;
pub mod status;
