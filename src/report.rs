//! Human oriented console output of a run. Only worker 0 prints it.

use std::fmt::Write;

use completion::{EpochReport, Verdict, Workspace};

use crate::launch::{Inputs, Settings, Summary};

/// The configuration echo printed before training.
///
/// # Arguments
/// * `nnz` - The global amount of train, validation and test entries.
pub fn header(inputs: &Inputs, settings: &Settings, ws: &Workspace, nnz: [usize; 3]) -> String {
    let mut out = String::new();
    let [train_nnz, validate_nnz, test_nnz] = nnz;

    let _ = writeln!(out, "Train:      {} (nnz={train_nnz})", inputs.train.display());
    let _ = writeln!(
        out,
        "Validate:   {} (nnz={validate_nnz})",
        inputs.validate.display()
    );
    if let Some(test) = &inputs.test {
        let _ = writeln!(out, "Test:       {} (nnz={test_nnz})", test.display());
    }

    let _ = writeln!(
        out,
        "Algorithm:  {} ({})",
        settings.algorithm,
        settings.algorithm.describe()
    );
    let _ = writeln!(
        out,
        "Settings:   RANK={} WORKERS={} THREADS={} SEED={}",
        settings.rank,
        settings.workers,
        ws.nthreads(),
        ws.seed
    );
    let _ = write!(
        out,
        "Tunables:   STEP={} REG={} MAX_ITS={} TIME={}s TOL={:e} RAND={} HOGWILD={} FOLDS={}",
        ws.learn_rate,
        ws.regularization.first().copied().unwrap_or_default(),
        ws.max_its,
        ws.max_seconds,
        ws.tolerance,
        ws.rand_per_iteration,
        ws.hogwild,
        ws.folds
    );

    out
}

/// One line of training progress, improving epochs are starred.
pub fn epoch_line(report: &EpochReport) -> String {
    let mark = match report.verdict {
        Verdict::Improved => '*',
        Verdict::Stalled => ' ',
    };

    format!(
        "  epoch:{:5}   obj: {:.5e}   loss: {:.5e}   frobsq: {:.5e}   \
         train-rmse: {:.5}   val-rmse: {:.5}{mark}   time: {:.3}s (val {:.3}s)",
        report.epoch,
        report.objective(),
        report.loss,
        report.frobsq,
        report.train_rmse,
        report.validate_rmse,
        report.epoch_time.as_secs_f64(),
        report.validate_time.as_secs_f64(),
    )
}

/// The results printed once training ends.
pub fn footer(summary: &Summary) -> String {
    let mut out = String::new();
    let outcome = &summary.outcome;

    let _ = writeln!(
        out,
        "Stopped after {} epochs ({}) in {:.3}s",
        outcome.epochs,
        outcome.reason,
        outcome.elapsed.as_secs_f64()
    );
    let _ = write!(
        out,
        "Best epoch {}:  val-rmse: {:.5}   val-mae: {:.5}",
        outcome.best_epoch, summary.validate.rmse, summary.validate.mae
    );

    if let Some(test) = &summary.test {
        let _ = write!(
            out,
            "\nTest:  rmse: {:.5}   mae: {:.5}   nnz: {}",
            test.rmse, test.mae, test.nnz
        );
    }

    for path in &summary.written {
        let _ = write!(out, "\nWrote {}", path.display());
    }

    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use completion::{Outcome, Scores, StopReason};

    use super::*;

    fn epoch(verdict: Verdict) -> EpochReport {
        EpochReport {
            epoch: 3,
            loss: 2.,
            frobsq: 0.5,
            train_rmse: 0.25,
            validate_rmse: 0.5,
            epoch_time: Duration::from_millis(12),
            validate_time: Duration::from_millis(1),
            verdict,
        }
    }

    #[test]
    fn improving_epochs_are_starred() {
        let improved = epoch_line(&epoch(Verdict::Improved));
        let stalled = epoch_line(&epoch(Verdict::Stalled));

        assert!(improved.contains("val-rmse: 0.50000*"));
        assert!(stalled.contains("val-rmse: 0.50000 "));
        assert!(improved.contains("obj: 2.50000e0"));
    }

    #[test]
    fn footer_lists_the_test_scores() {
        let summary = Summary {
            outcome: Outcome {
                reason: StopReason::MaxIters,
                epochs: 4,
                best_rmse: 0.5,
                best_epoch: 2,
                elapsed: Duration::from_secs(1),
            },
            validate: Scores {
                rmse: 0.5,
                mae: 0.4,
                nnz: 10,
            },
            test: Some(Scores {
                rmse: 0.75,
                mae: 0.5,
                nnz: 3,
            }),
            written: Vec::new(),
        };

        let text = footer(&summary);
        assert!(text.starts_with("Stopped after 4 epochs"));
        assert!(text.contains("Best epoch 2:"));
        assert!(text.contains("rmse: 0.75000"));
    }
}
