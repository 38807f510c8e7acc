mod als;
mod ccd;
mod descent;
mod gd;
mod lbfgs;
mod nlcg;
mod replicas;
mod sgd;
mod strata;

pub use als::Als;
pub use ccd::Ccd;
pub use gd::Gd;
pub use lbfgs::Lbfgs;
pub use nlcg::Nlcg;
pub use replicas::{average_replicas, sum_matrices};
pub use sgd::Sgd;
pub use strata::Strata;

use std::{
    fmt::{self, Display},
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::{
    Algorithm, FactorModel, Result, SparseTensor, Workspace,
    eval::{frobsq, loss_sq, rmse},
};

/// One optimization strategy plugged into the shared convergence loop.
pub trait Solver {
    fn name(&self) -> &'static str;

    /// Runs one epoch, updating `model` in place.
    ///
    /// # Arguments
    /// * `train` - The local training tensor.
    /// * `model` - The live model.
    /// * `ws` - The workspace of the run.
    /// * `epoch` - The 1-based number of this epoch.
    ///
    /// # Returns
    /// Whether the solver can make further progress.
    fn epoch(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &mut Workspace,
        epoch: usize,
    ) -> Result<bool>;

    /// Called once the epoch has been validated.
    fn after_epoch(&mut self, _report: &EpochReport, _ws: &mut Workspace) {}
}

/// The outcome of validating one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Improved,
    Stalled,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The validation RMSE didn't improve for too many consecutive epochs.
    Converged,
    TimedOut,
    MaxIters,
    /// The validation RMSE became non finite.
    Diverged,
    /// The solver reported it can't make further progress.
    Exhausted,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Converged => "converged",
            StopReason::TimedOut => "timed out",
            StopReason::MaxIters => "reached the maximum number of epochs",
            StopReason::Diverged => "diverged",
            StopReason::Exhausted => "no further progress possible",
        };
        f.write_str(s)
    }
}

/// Statistics of one validated epoch, every aggregate is global.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    /// Sum of squared training residuals.
    pub loss: f64,
    /// Regularization penalty.
    pub frobsq: f64,
    pub train_rmse: f64,
    pub validate_rmse: f64,
    pub epoch_time: Duration,
    pub validate_time: Duration,
    pub verdict: Verdict,
}

impl EpochReport {
    /// The training objective, `loss + frobsq`.
    #[inline]
    pub fn objective(&self) -> f64 {
        self.loss + self.frobsq
    }
}

/// The result of a whole run. The best model stays in the workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reason: StopReason,
    pub epochs: usize,
    pub best_rmse: f64,
    pub best_epoch: usize,
    pub elapsed: Duration,
}

/// Builds the solver of `algorithm` for a run on `train`.
pub fn build_solver(
    algorithm: Algorithm,
    train: &SparseTensor,
    model: &FactorModel,
    ws: &Workspace,
) -> Box<dyn Solver> {
    match algorithm {
        Algorithm::Gd => Box::new(Gd::new(train, model)),
        Algorithm::Nlcg => Box::new(Nlcg::new(train, model)),
        Algorithm::Lbfgs => Box::new(Lbfgs::new(train, model)),
        Algorithm::Sgd => Box::new(Sgd::new(train, ws)),
        Algorithm::Als => Box::new(Als::new(train)),
        Algorithm::Ccd => Box::new(Ccd::new(train)),
    }
}

/// Trains `model` on `train` until one of the stopping criteria fires.
///
/// After every epoch the model is validated. An epoch improves when its
/// validation RMSE is lower than the best one by more than the tolerance, in
/// which case the model is snapshotted into the workspace. The run stops after
/// `ws.max_bad_epochs` consecutive epochs without improvement, after
/// `ws.max_its` epochs, once `ws.max_seconds` elapsed, when the validation
/// RMSE stops being finite or when the solver runs out of progress.
///
/// # Arguments
/// * `train` - The local training tensor.
/// * `validate` - The local validation tensor.
/// * `model` - The live model, left in its final state.
/// * `ws` - The workspace, holding the best model on return.
/// * `solver` - The per-epoch update rule.
/// * `on_epoch` - Observer called with every epoch's report.
///
/// # Returns
/// The outcome of the run, or the first error raised by the solver, the
/// evaluator or the reducer.
pub fn train<S, F>(
    train: &SparseTensor,
    validate: &SparseTensor,
    model: &mut FactorModel,
    ws: &mut Workspace,
    solver: &mut S,
    mut on_epoch: F,
) -> Result<Outcome>
where
    S: Solver + ?Sized,
    F: FnMut(&EpochReport),
{
    let dims = model.dims();
    train.check_fits(&dims)?;
    validate.check_fits(&dims)?;

    ws.ensure_bounded();

    let train_nnz = ws.reducer().sum_count(train.nnz())?;
    let validate_nnz = ws.reducer().sum_count(validate.nnz())?;
    ws.reset_best(model)?;

    info!(
        solver = solver.name(), train_nnz = train_nnz, validate_nnz = validate_nnz;
        "starting training"
    );

    let tolerance = ws.tolerance.max(0.);
    let start = Instant::now();
    let mut bad_epochs = 0;
    let mut epoch = 0;

    let reason = loop {
        if ws.max_its > 0 && epoch >= ws.max_its {
            break StopReason::MaxIters;
        }
        epoch += 1;

        let clock = Instant::now();
        let more = solver.epoch(train, model, ws, epoch)?;
        let epoch_time = clock.elapsed();

        let clock = Instant::now();
        let loss = loss_sq(train, model, ws)?;
        let frobsq = frobsq(model, ws)?;
        let validate_rmse = rmse(validate, model, ws)?;
        let validate_time = clock.elapsed();

        let verdict = if validate_rmse - ws.best_rmse() < -tolerance {
            ws.record_best(model, validate_rmse, epoch)?;
            bad_epochs = 0;
            Verdict::Improved
        } else {
            bad_epochs += 1;
            Verdict::Stalled
        };

        let report = EpochReport {
            epoch,
            loss,
            frobsq,
            train_rmse: if train_nnz > 0 {
                (loss / train_nnz as f64).sqrt()
            } else {
                0.
            },
            validate_rmse,
            epoch_time,
            validate_time,
            verdict,
        };

        debug!(
            epoch = epoch, loss = loss, frobsq = frobsq, validate_rmse = validate_rmse, bad_epochs = bad_epochs;
            "validated epoch"
        );
        on_epoch(&report);
        solver.after_epoch(&report, ws);

        // Local conditions are agreed on by the whole group, so every worker
        // leaves the loop after the same epoch.
        let timed_out = ws.timeout_enabled() && start.elapsed().as_secs_f64() >= ws.max_seconds;
        let mut flags = [f64::from(u8::from(timed_out)), f64::from(u8::from(!more))];
        ws.reducer().sum_into(&mut flags)?;

        if !validate_rmse.is_finite() {
            break StopReason::Diverged;
        }
        if bad_epochs >= ws.max_bad_epochs {
            break StopReason::Converged;
        }
        if flags[1] > 0. {
            break StopReason::Exhausted;
        }
        if flags[0] > 0. {
            break StopReason::TimedOut;
        }
    };

    let outcome = Outcome {
        reason,
        epochs: epoch,
        best_rmse: ws.best_rmse(),
        best_epoch: ws.best_epoch(),
        elapsed: start.elapsed(),
    };

    info!(
        epochs = outcome.epochs, best_epoch = outcome.best_epoch, best_rmse = outcome.best_rmse;
        "training {}", outcome.reason
    );
    Ok(outcome)
}
