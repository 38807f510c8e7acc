//! Machinery shared by the full-batch solvers: gradients of the regularized
//! objective, global inner products and a backtracking line search.

use ndarray::{Array2, Axis, Zip, parallel::prelude::*};

use super::replicas::sum_matrices;
use crate::{
    FactorModel, Result, SparseTensor, Workspace,
    eval::{frobsq, loss_sq},
    index::ModeIndex,
};

/// One matrix per mode, shaped like the factors.
pub type Params = Vec<Array2<f32>>;

const MAX_HALVINGS: usize = 10;
const GROWTH: f32 = 1.5;
/// Sufficient decrease constant of the Armijo condition.
const ARMIJO: f64 = 1e-4;

/// Zeroed parameters shaped like `model`.
pub fn zeros_like(model: &FactorModel) -> Params {
    model
        .factors()
        .iter()
        .map(|f| Array2::zeros(f.raw_dim()))
        .collect()
}

/// The objective minimized by every solver, `0.5 * (loss + frobsq)`.
pub fn objective(train: &SparseTensor, model: &FactorModel, ws: &Workspace) -> Result<f64> {
    Ok(0.5 * (loss_sq(train, model, ws)? + frobsq(model, ws)?))
}

/// The global inner product of two parameter sets.
///
/// Mode 0 is partitioned across workers so its contribution is reduced, the
/// replicated modes are identical everywhere and counted once.
pub fn dot(a: &Params, b: &Params, ws: &Workspace) -> Result<f64> {
    let mode_dot = |m: usize| -> f64 {
        a[m].iter()
            .zip(b[m].iter())
            .map(|(&x, &y)| f64::from(x) * f64::from(y))
            .sum()
    };

    let partitioned = ws.reducer().sum(mode_dot(0))?;
    let replicated: f64 = (1..a.len()).map(mode_dot).sum();
    Ok(partitioned + replicated)
}

/// `dst = a + alpha * b`, mode by mode.
pub fn axpy_into(dst: &mut Params, a: &Params, alpha: f32, b: &Params) {
    for ((d, a), b) in dst.iter_mut().zip(a).zip(b) {
        Zip::from(d).and(a).and(b).for_each(|d, &a, &b| *d = a + alpha * b);
    }
}

/// `dst += alpha * x`.
pub fn axpy(dst: &mut Params, alpha: f32, x: &Params) {
    for (d, x) in dst.iter_mut().zip(x) {
        d.scaled_add(alpha, x);
    }
}

/// `dst = -src`.
pub fn negate_into(dst: &mut Params, src: &Params) {
    for (d, s) in dst.iter_mut().zip(src) {
        Zip::from(d).and(s).for_each(|d, &s| *d = -s);
    }
}

/// `dst *= alpha`.
pub fn scale(dst: &mut Params, alpha: f32) {
    dst.iter_mut().for_each(|d| d.mapv_inplace(|v| v * alpha));
}

/// State of a full-batch solver: the row indexes of the training tensor, the
/// current gradient and the adaptive step.
pub struct Descent {
    indexes: Vec<ModeIndex>,
    residuals: Vec<f32>,
    pub grad: Params,
    start: FactorModel,
    pub step: Option<f32>,
}

impl Descent {
    pub fn new(train: &SparseTensor, model: &FactorModel) -> Self {
        Self {
            indexes: ModeIndex::all(train),
            residuals: vec![0.; train.nnz()],
            grad: zeros_like(model),
            start: model.clone(),
            step: None,
        }
    }

    /// Computes the gradient of `objective` at `model` into `self.grad`.
    pub fn gradient(
        &mut self,
        train: &SparseTensor,
        model: &FactorModel,
        ws: &Workspace,
    ) -> Result<()> {
        let rank = model.rank();
        let nmodes = model.nmodes();
        let residuals = &mut self.residuals;
        let grad = &mut self.grad;
        let indexes = &self.indexes;

        ws.exec().install(|| {
            residuals
                .par_iter_mut()
                .zip(train.vals().par_iter())
                .enumerate()
                .for_each(|(k, (r, &v))| *r = v - model.predict_entry(train, k));
            let residuals: &[f32] = residuals;

            for (m, g) in grad.iter_mut().enumerate() {
                let index = &indexes[m];
                g.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(i, mut row)| {
                        row.fill(0.);
                        if i >= index.nrows() {
                            return;
                        }

                        for &k in index.row(i) {
                            let r = residuals[k];
                            for f in 0..rank {
                                let prod: f32 = (0..nmodes)
                                    .filter(|&n| n != m)
                                    .map(|n| model.factor(n)[[train.ind(n)[k], f]])
                                    .product();
                                row[f] -= r * prod;
                            }
                        }
                    });
            }
        });

        if ws.reducer().npes() > 1 {
            sum_matrices(grad.iter_mut().skip(1), ws.reducer(), 1.)?;
        }

        for (m, g) in grad.iter_mut().enumerate() {
            let reg = ws.regularization[m];
            Zip::from(g)
                .and(model.factor(m))
                .for_each(|g, &a| *g += reg * a);
        }

        Ok(())
    }

    /// Backtracking line search along `dir` from `model`.
    ///
    /// The step starts from the last accepted one (the learning rate on the
    /// first call), is halved until the objective decreases enough and grows
    /// after every success.
    ///
    /// # Arguments
    /// * `f0` - The objective at `model`.
    /// * `slope` - The directional derivative `grad . dir`, negative.
    ///
    /// # Returns
    /// The new objective and the accepted step, `None` if no step decreased
    /// the objective, in which case `model` is left untouched.
    pub fn line_search(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &Workspace,
        dir: &Params,
        f0: f64,
        slope: f64,
    ) -> Result<Option<(f64, f32)>> {
        self.start.copy_from(model)?;
        let mut step = self.step.unwrap_or(ws.learn_rate);

        for _ in 0..=MAX_HALVINGS {
            for ((a, a0), d) in model
                .factors_mut()
                .iter_mut()
                .zip(self.start.factors())
                .zip(dir)
            {
                Zip::from(a)
                    .and(a0)
                    .and(d)
                    .for_each(|a, &a0, &d| *a = a0 + step * d);
            }

            let f = objective(train, model, ws)?;
            if f.is_finite() && f <= f0 + ARMIJO * f64::from(step) * slope {
                self.step = Some(step * GROWTH);
                return Ok(Some((f, step)));
            }
            step *= 0.5;
        }

        model.copy_from(&self.start)?;
        self.step = Some(step);
        Ok(None)
    }
}
