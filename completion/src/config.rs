use serde::{Deserialize, Serialize};

use crate::Algorithm;

/// User overrides for a completion run.
///
/// Every field is optional, `None` keeps the default chosen by the workspace
/// or the launcher. Loaded from JSON and then overridden field by field by
/// the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionConfig {
    pub algorithm: Option<Algorithm>,
    pub rank: Option<usize>,
    pub nthreads: Option<usize>,
    pub workers: Option<usize>,
    pub max_its: Option<usize>,
    pub max_seconds: Option<f64>,
    pub tolerance: Option<f64>,
    pub learn_rate: Option<f32>,
    pub reg: Option<f32>,
    pub seed: Option<u64>,
    pub rand_per_iteration: Option<bool>,
    pub hogwild: Option<bool>,
    pub folds: Option<usize>,
    pub write: Option<bool>,
}

impl CompletionConfig {
    /// Returns a config where every field set in `overrides` replaces this one's.
    pub fn merge(self, overrides: CompletionConfig) -> Self {
        Self {
            algorithm: overrides.algorithm.or(self.algorithm),
            rank: overrides.rank.or(self.rank),
            nthreads: overrides.nthreads.or(self.nthreads),
            workers: overrides.workers.or(self.workers),
            max_its: overrides.max_its.or(self.max_its),
            max_seconds: overrides.max_seconds.or(self.max_seconds),
            tolerance: overrides.tolerance.or(self.tolerance),
            learn_rate: overrides.learn_rate.or(self.learn_rate),
            reg: overrides.reg.or(self.reg),
            seed: overrides.seed.or(self.seed),
            rand_per_iteration: overrides.rand_per_iteration.or(self.rand_per_iteration),
            hogwild: overrides.hogwild.or(self.hogwild),
            folds: overrides.folds.or(self.folds),
            write: overrides.write.or(self.write),
        }
    }
}
