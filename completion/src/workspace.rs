use std::{
    num::NonZeroUsize,
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;
use partition::{LocalReducer, Reducer};

use crate::{CompletionConfig, ExecutionContext, FactorModel, Result};

pub const DEFAULT_LEARN_RATE: f32 = 0.001;
pub const DEFAULT_REG: f32 = 0.02;
pub const DEFAULT_MAX_ITS: usize = 500;
pub const DEFAULT_MAX_SECONDS: f64 = 1000.;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const MAX_BAD_EPOCHS: usize = 20;

/// Scratch rows are padded to a full cache line (16 floats).
const SCRATCH_ALIGN: usize = 16;

/// A seed derived from the wall clock.
pub fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// The best model observed on the validation set.
#[derive(Debug, Clone)]
pub struct Best {
    pub model: FactorModel,
    pub rmse: f64,
    pub epoch: usize,
}

/// Tunables, scratch buffers and best-model bookkeeping of one training run.
pub struct Workspace {
    pub learn_rate: f32,
    /// Regularization of every mode.
    pub regularization: Vec<f32>,
    /// 0 leaves the run unbounded by epochs.
    pub max_its: usize,
    /// <= 0 disables the timeout.
    pub max_seconds: f64,
    pub tolerance: f64,
    pub rand_per_iteration: bool,
    pub hogwild: bool,
    pub folds: NonZeroUsize,
    pub max_bad_epochs: usize,
    pub seed: u64,

    rank: usize,
    exec: ExecutionContext,
    scratch: Vec<Vec<f32>>,
    best: Option<Best>,
    reducer: Box<dyn Reducer>,
}

impl Workspace {
    /// Allocates a workspace with the default tunables for `model`.
    ///
    /// # Arguments
    /// * `model` - The model that will be trained.
    /// * `nthreads` - The amount of threads of the execution context.
    pub fn alloc(model: &FactorModel, nthreads: NonZeroUsize) -> Result<Self> {
        let rank = model.rank();
        let exec = ExecutionContext::new(nthreads)?;

        Ok(Self {
            learn_rate: DEFAULT_LEARN_RATE,
            regularization: vec![DEFAULT_REG; model.nmodes()],
            max_its: DEFAULT_MAX_ITS,
            max_seconds: DEFAULT_MAX_SECONDS,
            tolerance: DEFAULT_TOLERANCE,
            rand_per_iteration: true,
            hogwild: false,
            folds: NonZeroUsize::MIN,
            max_bad_epochs: MAX_BAD_EPOCHS,
            seed: clock_seed(),
            rank,
            scratch: scratch_for(nthreads.get(), rank),
            exec,
            best: None,
            reducer: Box::new(LocalReducer::new()),
        })
    }

    /// Replaces the reducer, making this workspace one worker of a group.
    pub fn with_reducer(mut self, reducer: Box<dyn Reducer>) -> Self {
        self.reducer = reducer;
        self
    }

    /// Applies every override set in `config`, the rest keep their value.
    pub fn apply(&mut self, config: &CompletionConfig) -> Result<()> {
        if let Some(learn_rate) = config.learn_rate {
            self.learn_rate = learn_rate;
        }
        if let Some(reg) = config.reg {
            self.regularization.fill(reg);
        }
        if let Some(max_its) = config.max_its {
            self.max_its = max_its;
        }
        if let Some(max_seconds) = config.max_seconds {
            self.max_seconds = max_seconds;
        }
        if let Some(tolerance) = config.tolerance {
            self.tolerance = tolerance;
        }
        if let Some(rand_per_iteration) = config.rand_per_iteration {
            self.rand_per_iteration = rand_per_iteration;
        }
        if let Some(hogwild) = config.hogwild {
            self.hogwild = hogwild;
        }
        if let Some(folds) = config.folds {
            self.folds = NonZeroUsize::new(folds).unwrap_or(NonZeroUsize::MIN);
        }
        if let Some(seed) = config.seed {
            self.seed = seed;
        }
        if let Some(nthreads) = config.nthreads.and_then(NonZeroUsize::new) {
            self.set_threads(nthreads)?;
        }

        Ok(())
    }

    /// Rebuilds the execution context and the per-thread scratch for `nthreads` threads.
    pub fn set_threads(&mut self, nthreads: NonZeroUsize) -> Result<()> {
        if nthreads.get() != self.exec.nthreads() {
            self.exec = ExecutionContext::new(nthreads)?;
            self.scratch = scratch_for(nthreads.get(), self.rank);
        }
        Ok(())
    }

    #[inline]
    pub fn timeout_enabled(&self) -> bool {
        self.max_seconds.is_finite() && self.max_seconds > 0.
    }

    /// Restores the default bounds when every stopping criterion was disabled.
    ///
    /// # Returns
    /// Whether the defaults had to be restored.
    pub fn ensure_bounded(&mut self) -> bool {
        let bounded = self.max_its > 0 || self.timeout_enabled() || self.tolerance > 0.;
        if !bounded {
            warn!("every stopping criterion is disabled, falling back to the defaults");
            self.max_its = DEFAULT_MAX_ITS;
            self.max_seconds = DEFAULT_MAX_SECONDS;
            self.tolerance = DEFAULT_TOLERANCE;
        }
        !bounded
    }

    #[inline]
    pub fn nthreads(&self) -> usize {
        self.exec.nthreads()
    }

    #[inline]
    pub fn exec(&self) -> &ExecutionContext {
        &self.exec
    }

    /// The execution context together with one scratch row per thread.
    pub fn exec_and_scratch(&mut self) -> (&ExecutionContext, &mut [Vec<f32>]) {
        (&self.exec, &mut self.scratch)
    }

    #[inline]
    pub fn reducer(&self) -> &dyn Reducer {
        self.reducer.as_ref()
    }

    #[inline]
    pub fn best(&self) -> Option<&Best> {
        self.best.as_ref()
    }

    /// The best validation RMSE so far, +inf before the first evaluation.
    pub fn best_rmse(&self) -> f64 {
        self.best.as_ref().map_or(f64::INFINITY, |b| b.rmse)
    }

    pub fn best_epoch(&self) -> usize {
        self.best.as_ref().map_or(0, |b| b.epoch)
    }

    pub fn best_model(&self) -> Option<&FactorModel> {
        self.best.as_ref().map(|b| &b.model)
    }

    /// Resets the best model to `model` with the worst possible score at epoch 0.
    pub fn reset_best(&mut self, model: &FactorModel) -> Result<()> {
        self.record_best(model, f64::INFINITY, 0)
    }

    /// Snapshots `model` as the best one.
    ///
    /// The previous snapshot's buffers are reused, the result never shares
    /// storage with `model`.
    pub fn record_best(&mut self, model: &FactorModel, rmse: f64, epoch: usize) -> Result<()> {
        let snapshot = match self.best.take() {
            Some(Best { model: mut old, .. }) if old.dims() == model.dims() => {
                old.copy_from(model)?;
                old
            }
            _ => model.clone(),
        };

        self.best = Some(Best {
            model: snapshot,
            rmse,
            epoch,
        });
        Ok(())
    }

    /// Moves the best model out of the workspace.
    pub fn take_best(&mut self) -> Option<Best> {
        self.best.take()
    }
}

fn scratch_for(nthreads: usize, rank: usize) -> Vec<Vec<f32>> {
    let len = rank.next_multiple_of(SCRATCH_ALIGN);
    vec![vec![0.; len]; nthreads]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> FactorModel {
        FactorModel::alloc(&[4, 3, 2], 3, 5).unwrap()
    }

    #[test]
    fn defaults() {
        let ws = Workspace::alloc(&model(), NonZeroUsize::new(2).unwrap()).unwrap();

        assert_eq!(ws.learn_rate, DEFAULT_LEARN_RATE);
        assert_eq!(ws.regularization, [DEFAULT_REG; 3]);
        assert_eq!(ws.max_its, DEFAULT_MAX_ITS);
        assert!(ws.timeout_enabled());
        assert!(ws.rand_per_iteration);
        assert!(!ws.hogwild);
        assert_eq!(ws.nthreads(), 2);
        assert_eq!(ws.best_rmse(), f64::INFINITY);
        assert_eq!(ws.best_epoch(), 0);
        assert!(ws.best_model().is_none());
        assert_eq!(ws.reducer().npes(), 1);
    }

    #[test]
    fn apply_only_touches_set_fields() {
        let mut ws = Workspace::alloc(&model(), NonZeroUsize::MIN).unwrap();
        let config = CompletionConfig {
            reg: Some(0.5),
            max_seconds: Some(-1.),
            folds: Some(4),
            nthreads: Some(3),
            ..Default::default()
        };

        ws.apply(&config).unwrap();
        assert_eq!(ws.regularization, [0.5; 3]);
        assert!(!ws.timeout_enabled());
        assert_eq!(ws.folds.get(), 4);
        assert_eq!(ws.nthreads(), 3);
        assert_eq!(ws.exec_and_scratch().1.len(), 3);
        assert_eq!(ws.learn_rate, DEFAULT_LEARN_RATE);
        assert_eq!(ws.max_its, DEFAULT_MAX_ITS);
    }

    #[test]
    fn unbounded_runs_fall_back_to_defaults() {
        let mut ws = Workspace::alloc(&model(), NonZeroUsize::MIN).unwrap();
        ws.max_its = 0;
        ws.max_seconds = 0.;
        ws.tolerance = 0.;

        assert!(ws.ensure_bounded());
        assert_eq!(ws.max_its, DEFAULT_MAX_ITS);
        assert!(!ws.ensure_bounded());
    }

    #[test]
    fn best_snapshot_is_independent_from_the_live_model() {
        let mut live = model();
        let mut ws = Workspace::alloc(&live, NonZeroUsize::MIN).unwrap();

        ws.record_best(&live, 1.5, 3).unwrap();
        live.factor_mut(1).fill(42.);

        let best = ws.best().unwrap();
        assert_eq!(best.rmse, 1.5);
        assert_eq!(best.epoch, 3);
        assert!(best.model.factor(1).iter().all(|&v| v != 42.));

        ws.record_best(&live, 1.0, 4).unwrap();
        assert_eq!(ws.best_model().unwrap(), &live);
    }
}
