use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::CompletionErr;

/// The optimization strategies available for completing a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Gd,
    #[serde(alias = "cg")]
    Nlcg,
    Lbfgs,
    Sgd,
    Als,
    Ccd,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::Gd,
        Algorithm::Nlcg,
        Algorithm::Lbfgs,
        Algorithm::Sgd,
        Algorithm::Als,
        Algorithm::Ccd,
    ];

    /// The name used on the command line and in reports.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Gd => "gd",
            Algorithm::Nlcg => "nlcg",
            Algorithm::Lbfgs => "lbfgs",
            Algorithm::Sgd => "sgd",
            Algorithm::Als => "als",
            Algorithm::Ccd => "ccd",
        }
    }

    /// A one line description of the strategy.
    pub fn describe(self) -> &'static str {
        match self {
            Algorithm::Gd => "gradient descent",
            Algorithm::Nlcg => "nonlinear conjugate gradient",
            Algorithm::Lbfgs => "limited-memory BFGS",
            Algorithm::Sgd => "stochastic gradient descent",
            Algorithm::Als => "alternating least squares",
            Algorithm::Ccd => "coordinate descent",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_uppercase())
    }
}

impl FromStr for Algorithm {
    type Err = CompletionErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gd" => Ok(Algorithm::Gd),
            "cg" | "nlcg" => Ok(Algorithm::Nlcg),
            "lbfgs" => Ok(Algorithm::Lbfgs),
            "sgd" => Ok(Algorithm::Sgd),
            "als" => Ok(Algorithm::Als),
            "ccd" => Ok(Algorithm::Ccd),
            other => Err(CompletionErr::UnknownAlgorithm(other.to_string())),
        }
    }
}
