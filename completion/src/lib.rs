//! Low-rank completion of sparse tensors with missing entries.
//!
//! A [`FactorModel`] is fit to the entries of a [`SparseTensor`] by one of the
//! [`Algorithm`]s, validated after every epoch against a held-out tensor. The
//! training loop in [`train`] keeps the best model seen so far in the
//! [`Workspace`].

pub mod algorithm;
pub mod config;
pub mod error;
pub mod eval;
pub mod exec;
pub mod index;
pub mod io;
pub mod linalg;
pub mod model;
pub mod storage;
pub mod tensor;
pub mod train;
pub mod workspace;

pub use algorithm::Algorithm;
pub use config::CompletionConfig;
pub use error::{CompletionErr, Result};
pub use eval::{Metric, Scores};
pub use exec::{ExecutionContext, default_threads};
pub use model::{FactorModel, RowInit};
pub use tensor::SparseTensor;
pub use train::{EpochReport, Outcome, Solver, StopReason, Verdict, build_solver};
pub use workspace::{Best, Workspace, clock_seed};

/// The maximum amount of modes of a tensor.
pub const MAX_MODES: usize = 8;
