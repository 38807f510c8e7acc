use ndarray::{Axis, parallel::prelude::*};
use rayon::prelude::*;

use super::Solver;
use crate::{
    FactorModel, Result, SparseTensor, Workspace, index::ModeIndex, linalg::cholesky_solve,
};

/// Alternating least squares.
///
/// Every mode is solved in turn with the others fixed: each row is the ridge
/// regression of its entries on the products of the other modes' rows.
pub struct Als {
    indexes: Vec<ModeIndex>,
    /// Per row normal equations, `rank x rank` followed by the right-hand side.
    stats: Vec<f64>,
}

impl Als {
    pub fn new(train: &SparseTensor) -> Self {
        Self {
            indexes: ModeIndex::all(train),
            stats: Vec::new(),
        }
    }

    fn solve_mode(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &Workspace,
        m: usize,
    ) -> Result<()> {
        let rank = model.rank();
        let nmodes = model.nmodes();
        let width = rank * rank + rank;
        let nrows = model.factor(m).nrows();
        let index = &self.indexes[m];

        self.stats.clear();
        self.stats.resize(nrows * width, 0.);

        let others: &FactorModel = model;

        ws.exec().install(|| {
            self.stats
                .par_chunks_mut(width)
                .enumerate()
                .for_each_init(
                    || vec![0f64; rank],
                    |q, (i, s)| {
                        if i >= index.nrows() {
                            return;
                        }

                        let (gram, rhs) = s.split_at_mut(rank * rank);
                        for &k in index.row(i) {
                            for (f, q) in q.iter_mut().enumerate() {
                                *q = (0..nmodes)
                                    .filter(|&n| n != m)
                                    .map(|n| f64::from(others.factor(n)[[train.ind(n)[k], f]]))
                                    .product();
                            }

                            let v = f64::from(train.vals()[k]);
                            for a in 0..rank {
                                rhs[a] += v * q[a];
                                for b in 0..rank {
                                    gram[a * rank + b] += q[a] * q[b];
                                }
                            }
                        }
                    },
                );
        });

        if m > 0 && ws.reducer().npes() > 1 {
            ws.reducer().sum_into(&mut self.stats)?;
        }

        let reg = f64::from(ws.regularization[m]);
        let stats = &mut self.stats;
        let factor = model.factor_mut(m);
        ws.exec().install(|| {
            factor
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(stats.par_chunks_mut(width))
                .for_each(|(mut row, s)| {
                    let (gram, rhs) = s.split_at_mut(rank * rank);
                    for a in 0..rank {
                        gram[a * rank + a] += reg;
                    }

                    // singular systems keep the current row
                    if cholesky_solve(gram, rhs, rank) {
                        for (r, &x) in row.iter_mut().zip(rhs.iter()) {
                            *r = x as f32;
                        }
                    }
                });
        });

        Ok(())
    }
}

impl Solver for Als {
    fn name(&self) -> &'static str {
        "als"
    }

    fn epoch(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &mut Workspace,
        _epoch: usize,
    ) -> Result<bool> {
        for m in 0..model.nmodes() {
            self.solve_mode(train, model, ws, m)?;
        }
        Ok(true)
    }
}
