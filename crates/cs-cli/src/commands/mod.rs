//! CLI subcommand implementations.

pub mod check;
pub mod context;
pub mod run;
pub mod status;
pub mod sync;
