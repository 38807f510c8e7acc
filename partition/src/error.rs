use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used by every collective operation.
pub type Result<T> = std::result::Result<T, ReduceErr>;

/// Error returned by a collective operation. Any of these is fatal for the
/// whole group, no worker can continue without its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReduceErr {
    LengthMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
    GroupClosed {
        rank: usize,
    },
}

impl Display for ReduceErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceErr::LengthMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "reduction length mismatch on rank {rank}: got {got}, expected {expected}"
            ),
            ReduceErr::GroupClosed { rank } => {
                write!(f, "reduction group was closed, rank {rank} left early")
            }
        }
    }
}

impl Error for ReduceErr {}
