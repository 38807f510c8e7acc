//! Distributed partition contract for the completion engine: which mode-0
//! layer a worker owns, and the collective sums used at epoch boundaries.

pub mod error;
pub mod layers;
pub mod reducer;

pub use error::{ReduceErr, Result};
pub use layers::{Layer, block_of, layer_range};
pub use reducer::{GroupReducer, LocalReducer, Reducer};
