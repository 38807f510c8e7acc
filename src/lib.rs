//! The `complete` command: completes a sparse tensor from a training file,
//! validating every epoch against a held-out file.

pub mod cli;
pub mod launch;
pub mod report;

pub use cli::Cli;
pub use launch::{Inputs, Settings, Summary, exit_status};
