use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use partition::ReduceErr;
use rand_distr::uniform::Error as UniformError;
use rayon::ThreadPoolBuildError;

/// The result type used in the entire completion crate.
pub type Result<T> = std::result::Result<T, CompletionErr>;

/// The completion crate's error type.
#[derive(Debug)]
pub enum CompletionErr {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Malformed {
        path: PathBuf,
        line: usize,
        reason: &'static str,
    },
    ModeCount {
        got: usize,
    },
    IndexOutOfRange {
        mode: usize,
        index: usize,
        extent: usize,
    },
    UnknownAlgorithm(String),
    ZeroRank,
    ZeroDim {
        mode: usize,
    },
    Init(String),
    ThreadPool(String),
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    Reduction(ReduceErr),
    /// Another worker of the group failed and the run was abandoned.
    PeerFailed,
}

impl CompletionErr {
    /// Whether this error comes from the user's input: unreadable or malformed
    /// files, unsupported shapes or an unknown algorithm.
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            CompletionErr::Io { .. }
                | CompletionErr::Malformed { .. }
                | CompletionErr::ModeCount { .. }
                | CompletionErr::IndexOutOfRange { .. }
                | CompletionErr::UnknownAlgorithm(_)
                | CompletionErr::SizeMismatch { .. }
        )
    }

    /// Whether this error was raised while sizing the model or the workspace.
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            CompletionErr::ZeroRank | CompletionErr::ZeroDim { .. } | CompletionErr::Init(_)
        )
    }
}

impl Display for CompletionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionErr::Io { path, source } => {
                write!(f, "failed to access '{}': {source}", path.display())
            }
            CompletionErr::Malformed { path, line, reason } => {
                write!(f, "malformed tensor '{}' at line {line}: {reason}", path.display())
            }
            CompletionErr::ModeCount { got } => write!(
                f,
                "unsupported number of modes {got}, expected between 2 and {}",
                crate::MAX_MODES
            ),
            CompletionErr::IndexOutOfRange {
                mode,
                index,
                extent,
            } => write!(
                f,
                "index {index} is out of range for mode {mode} of extent {extent}"
            ),
            CompletionErr::UnknownAlgorithm(name) => {
                write!(f, "unknown completion algorithm '{name}'")
            }
            CompletionErr::ZeroRank => f.write_str("the decomposition rank must be non zero"),
            CompletionErr::ZeroDim { mode } => write!(f, "mode {mode} has a zero extent"),
            CompletionErr::Init(msg) => write!(f, "failed to initialize the factors: {msg}"),
            CompletionErr::ThreadPool(msg) => write!(f, "failed to build the thread pool: {msg}"),
            CompletionErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "there's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            CompletionErr::Reduction(e) => write!(f, "reduction failed: {e}"),
            CompletionErr::PeerFailed => f.write_str("another worker failed, run abandoned"),
        }
    }
}

impl Error for CompletionErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CompletionErr::Io { source, .. } => Some(source),
            CompletionErr::Reduction(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UniformError> for CompletionErr {
    fn from(value: UniformError) -> Self {
        Self::Init(value.to_string())
    }
}

impl From<ThreadPoolBuildError> for CompletionErr {
    fn from(value: ThreadPoolBuildError) -> Self {
        Self::ThreadPool(value.to_string())
    }
}

impl From<ReduceErr> for CompletionErr {
    fn from(value: ReduceErr) -> Self {
        Self::Reduction(value)
    }
}
