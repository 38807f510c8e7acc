use std::fmt::{self, Display};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{FactorModel, Result, SparseTensor, Workspace};

/// Entries summed by one task. Partial sums are always combined in chunk
/// order, so the result doesn't depend on the amount of threads.
const CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Rmse,
    Mae,
}

impl Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Rmse => f.write_str("RMSE"),
            Metric::Mae => f.write_str("MAE"),
        }
    }
}

/// Both metrics of a model against one tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub rmse: f64,
    pub mae: f64,
    /// The global amount of entries the scores were computed on.
    pub nnz: usize,
}

/// Sums `f(k, residual)` over every entry of `tensor`, deterministically.
fn residual_sum<F>(tensor: &SparseTensor, model: &FactorModel, ws: &Workspace, f: F) -> f64
where
    F: Fn(f64) -> f64 + Sync,
{
    ws.exec().install(|| {
        let partials: Vec<f64> = tensor
            .vals()
            .par_chunks(CHUNK)
            .enumerate()
            .map(|(c, vals)| {
                let base = c * CHUNK;
                vals.iter()
                    .enumerate()
                    .map(|(j, &v)| {
                        let predicted = model.predict_entry(tensor, base + j);
                        f(f64::from(v) - f64::from(predicted))
                    })
                    .sum::<f64>()
            })
            .collect();

        partials.iter().sum()
    })
}

/// Scores `model` against `tensor` with `metric`.
///
/// In a distributed run the error and the amount of entries are summed across
/// every worker before the metric is finalized, so the result matches a single
/// worker run on the whole tensor. A tensor without entries scores 0.
///
/// # Arguments
/// * `tensor` - The local part of the tensor to score against.
/// * `model` - The model to score.
/// * `metric` - The metric to compute.
/// * `ws` - The workspace providing the execution context and the reducer.
///
/// # Returns
/// A `BadInput` error if `tensor` addresses rows outside the model, or the
/// reduction error if the group failed.
pub fn score(
    tensor: &SparseTensor,
    model: &FactorModel,
    metric: Metric,
    ws: &Workspace,
) -> Result<f64> {
    tensor.check_fits(&model.dims())?;

    let local = match metric {
        Metric::Rmse => residual_sum(tensor, model, ws, |e| e * e),
        Metric::Mae => residual_sum(tensor, model, ws, f64::abs),
    };

    let mut buf = [local, tensor.nnz() as f64];
    ws.reducer().sum_into(&mut buf)?;
    let [err, nnz] = buf;

    if nnz == 0. {
        return Ok(0.);
    }

    Ok(match metric {
        Metric::Rmse => (err / nnz).sqrt(),
        Metric::Mae => err / nnz,
    })
}

pub fn rmse(tensor: &SparseTensor, model: &FactorModel, ws: &Workspace) -> Result<f64> {
    score(tensor, model, Metric::Rmse, ws)
}

pub fn mae(tensor: &SparseTensor, model: &FactorModel, ws: &Workspace) -> Result<f64> {
    score(tensor, model, Metric::Mae, ws)
}

/// Computes RMSE and MAE with a single reduction.
pub fn scores(tensor: &SparseTensor, model: &FactorModel, ws: &Workspace) -> Result<Scores> {
    tensor.check_fits(&model.dims())?;

    let sq = residual_sum(tensor, model, ws, |e| e * e);
    let abs = residual_sum(tensor, model, ws, f64::abs);

    let mut buf = [sq, abs, tensor.nnz() as f64];
    ws.reducer().sum_into(&mut buf)?;
    let [sq, abs, nnz] = buf;

    if nnz == 0. {
        return Ok(Scores {
            rmse: 0.,
            mae: 0.,
            nnz: 0,
        });
    }

    Ok(Scores {
        rmse: (sq / nnz).sqrt(),
        mae: abs / nnz,
        nnz: nnz as usize,
    })
}

/// The global sum of squared residuals of `model` over `tensor`.
pub fn loss_sq(tensor: &SparseTensor, model: &FactorModel, ws: &Workspace) -> Result<f64> {
    let local = residual_sum(tensor, model, ws, |e| e * e);
    Ok(ws.reducer().sum(local)?)
}

/// The regularization penalty `sum_m reg[m] * ||A_m||^2`.
///
/// Mode 0 is partitioned so its term is summed across workers, the replicated
/// modes are counted once.
pub fn frobsq(model: &FactorModel, ws: &Workspace) -> Result<f64> {
    let reg = &ws.regularization;
    let own = f64::from(reg[0]) * model.norm_sq(0);
    let partitioned = ws.reducer().sum(own)?;

    let replicated: f64 = (1..model.nmodes())
        .map(|m| f64::from(reg[m]) * model.norm_sq(m))
        .sum();

    Ok(partitioned + replicated)
}
