use ndarray::{Axis, parallel::prelude::*};
use rayon::prelude::*;

use super::Solver;
use crate::{FactorModel, Result, SparseTensor, Workspace, index::ModeIndex};

/// Coordinate descent over rank-one components (CCD++).
///
/// One rank column at a time is added back to the residual, refit one mode
/// after the other in closed form, then removed again.
pub struct Ccd {
    indexes: Vec<ModeIndex>,
    residuals: Vec<f32>,
    /// Numerator and denominator of every row's update.
    stats: Vec<f64>,
}

impl Ccd {
    pub fn new(train: &SparseTensor) -> Self {
        Self {
            indexes: ModeIndex::all(train),
            residuals: vec![0.; train.nnz()],
            stats: Vec::new(),
        }
    }

    /// Adds `sign` times rank component `f` to every residual.
    fn shift_residuals(
        &mut self,
        train: &SparseTensor,
        model: &FactorModel,
        ws: &Workspace,
        f: usize,
        sign: f32,
    ) {
        let nmodes = model.nmodes();
        ws.exec().install(|| {
            self.residuals
                .par_iter_mut()
                .enumerate()
                .for_each(|(k, r)| {
                    let component: f32 = (0..nmodes)
                        .map(|n| model.factor(n)[[train.ind(n)[k], f]])
                        .product();
                    *r += sign * component;
                });
        });
    }

    fn update_column(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &Workspace,
        m: usize,
        f: usize,
    ) -> Result<()> {
        let nmodes = model.nmodes();
        let nrows = model.factor(m).nrows();
        let index = &self.indexes[m];
        let residuals = &self.residuals;

        self.stats.clear();
        self.stats.resize(nrows * 2, 0.);

        let others: &FactorModel = model;

        ws.exec().install(|| {
            self.stats
                .par_chunks_mut(2)
                .enumerate()
                .for_each(|(i, s)| {
                    if i >= index.nrows() {
                        return;
                    }

                    for &k in index.row(i) {
                        let q: f64 = (0..nmodes)
                            .filter(|&n| n != m)
                            .map(|n| f64::from(others.factor(n)[[train.ind(n)[k], f]]))
                            .product();
                        s[0] += f64::from(residuals[k]) * q;
                        s[1] += q * q;
                    }
                });
        });

        if m > 0 && ws.reducer().npes() > 1 {
            ws.reducer().sum_into(&mut self.stats)?;
        }

        let reg = f64::from(ws.regularization[m]);
        let stats = &self.stats;
        let factor = model.factor_mut(m);
        ws.exec().install(|| {
            factor
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(stats.par_chunks(2))
                .for_each(|(mut row, s)| {
                    let denom = s[1] + reg;
                    if denom > 0. {
                        row[f] = (s[0] / denom) as f32;
                    }
                });
        });

        Ok(())
    }
}

impl Solver for Ccd {
    fn name(&self) -> &'static str {
        "ccd"
    }

    fn epoch(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &mut Workspace,
        _epoch: usize,
    ) -> Result<bool> {
        ws.exec().install(|| {
            self.residuals
                .par_iter_mut()
                .zip(train.vals().par_iter())
                .enumerate()
                .for_each(|(k, (r, &v))| *r = v - model.predict_entry(train, k));
        });

        for f in 0..model.rank() {
            self.shift_residuals(train, model, ws, f, 1.);
            for m in 0..model.nmodes() {
                self.update_column(train, model, ws, m, f)?;
            }
            self.shift_residuals(train, model, ws, f, -1.);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use partition::GroupReducer;

    use super::*;
    use crate::{
        CompletionErr,
        eval::{frobsq, loss_sq},
    };

    #[test]
    fn epochs_never_increase_the_objective() {
        let entries = (0..40).map(|k| {
            (
                vec![k % 5, (k * 3) % 4, (k * 7) % 3],
                ((k % 4) as f32) * 0.5 + 0.25,
            )
        });
        let t = SparseTensor::from_entries(3, entries).unwrap();
        let mut model = FactorModel::for_tensor(&t, 3, 1).unwrap();
        let mut ws = Workspace::alloc(&model, NonZeroUsize::new(2).unwrap()).unwrap();
        let mut ccd = Ccd::new(&t);

        let objective = |model: &FactorModel, ws: &Workspace| {
            loss_sq(&t, model, ws).unwrap() + frobsq(model, ws).unwrap()
        };

        let mut last = objective(&model, &ws);
        for epoch in 1..=5 {
            ccd.epoch(&t, &mut model, &mut ws, epoch).unwrap();
            let now = objective(&model, &ws);
            assert!(now <= last + 1e-4, "{now} > {last}");
            last = now;
        }
    }

    #[test]
    fn a_failed_reduction_leaves_the_model_whole() {
        let t = SparseTensor::from_entries(2, [(vec![0, 1], 1.), (vec![2, 0], 0.5)]).unwrap();
        let mut model = FactorModel::for_tensor(&t, 2, 8).unwrap();
        let before = model.clone();

        let mut group = GroupReducer::group(NonZeroUsize::new(2).unwrap());
        drop(group.pop());
        let reducer = group.pop().unwrap();
        let mut ws = Workspace::alloc(&model, NonZeroUsize::MIN)
            .unwrap()
            .with_reducer(Box::new(reducer));

        let err = Ccd::new(&t).epoch(&t, &mut model, &mut ws, 1).unwrap_err();

        assert!(matches!(err, CompletionErr::Reduction(_)), "{err}");
        assert_eq!(model.dims(), before.dims());
        assert_eq!(model.factor(1), before.factor(1));
    }
}
