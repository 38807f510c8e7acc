use log::debug;
use partition::layer_range;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;

use super::{EpochReport, Solver, Strata, average_replicas};
use crate::{ExecutionContext, FactorModel, Result, SparseTensor, Workspace, storage::SharedFactors};

/// Decorrelates the shuffling streams of the workers of a group.
const SHUFFLE_STREAM: u64 = 0xd1b5_4a32_d192_ed03;
const SPEEDUP: f32 = 1.05;
const SLOWDOWN: f32 = 0.5;

/// Stochastic gradient descent over the training entries.
///
/// Entries are visited in a random order, shuffled once at creation and,
/// unless disabled, again before every epoch. An epoch is split in `folds`
/// consecutive slices of that order; the replicated factors are averaged
/// across workers after each one. Without hogwild the entries of a fold are
/// processed stratum by stratum so that concurrent threads never update the
/// same row, which makes the result independent of thread scheduling.
pub struct Sgd {
    rng: StdRng,
    order: Vec<usize>,
    /// One set of strata per fold, valid while the order doesn't change.
    strata: Vec<Strata>,
    prev_objective: Option<f64>,
}

impl Sgd {
    pub fn new(train: &SparseTensor, ws: &Workspace) -> Self {
        let stream = (ws.reducer().rank() as u64).wrapping_mul(SHUFFLE_STREAM);
        let mut rng = StdRng::seed_from_u64(ws.seed ^ stream);

        let mut order: Vec<usize> = (0..train.nnz()).collect();
        order.shuffle(&mut rng);

        Self {
            rng,
            order,
            strata: Vec::new(),
            prev_objective: None,
        }
    }

    fn fold_entries(&self, fold: usize, folds: usize) -> &[usize] {
        &self.order[layer_range(self.order.len(), fold, folds)]
    }
}

impl Solver for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn epoch(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &mut Workspace,
        epoch: usize,
    ) -> Result<bool> {
        let folds = ws.folds.get();
        let hogwild = ws.hogwild;
        let lr = ws.learn_rate;
        let reg = ws.regularization.clone();
        let nblocks = Strata::blocks_for(ws.nthreads(), train.nmodes());

        if ws.rand_per_iteration && epoch > 1 {
            self.order.shuffle(&mut self.rng);
            self.strata.clear();
        }

        if !hogwild && self.strata.len() != folds {
            self.strata = (0..folds)
                .map(|fold| Strata::new(train, self.fold_entries(fold, folds), nblocks))
                .collect();
        }

        debug!(epoch = epoch, learn_rate = lr, folds = folds, hogwild = hogwild; "sgd epoch");

        for fold in 0..folds {
            {
                let shared = SharedFactors::new(model);
                let (exec, scratch) = ws.exec_and_scratch();

                if hogwild {
                    let entries = self.fold_entries(fold, folds);
                    hogwild_pass(&shared, train, entries, lr, &reg, exec, scratch);
                } else {
                    stratified_pass(&shared, train, &self.strata[fold], lr, &reg, exec, scratch);
                }
            }

            average_replicas(model, ws.reducer())?;
        }

        Ok(true)
    }

    /// Bold driver: speeds up while the objective decreases, backs off otherwise.
    fn after_epoch(&mut self, report: &EpochReport, ws: &mut Workspace) {
        let objective = report.objective();
        if let Some(prev) = self.prev_objective {
            ws.learn_rate *= if objective < prev { SPEEDUP } else { SLOWDOWN };
        }
        self.prev_objective = Some(objective);
    }
}

/// Every thread walks its own contiguous slice of `entries`, rows are shared
/// without any synchronization.
fn hogwild_pass(
    shared: &SharedFactors<'_>,
    train: &SparseTensor,
    entries: &[usize],
    lr: f32,
    reg: &[f32],
    exec: &ExecutionContext,
    scratch: &mut [Vec<f32>],
) {
    let nthreads = scratch.len();
    exec.install(|| {
        scratch.par_iter_mut().enumerate().for_each(|(t, buf)| {
            for &k in &entries[layer_range(entries.len(), t, nthreads)] {
                // SAFETY: the factors outlive the pass. Concurrent updates to
                //         the same row are the accepted hogwild races.
                unsafe { update_entry(shared, train, k, lr, reg, buf) };
            }
        });
    });
}

/// Processes the strata one after the other, the buckets of a stratum in
/// parallel. Returning from a stratum's parallel loop is the barrier.
fn stratified_pass(
    shared: &SharedFactors<'_>,
    train: &SparseTensor,
    strata: &Strata,
    lr: f32,
    reg: &[f32],
    exec: &ExecutionContext,
    scratch: &mut [Vec<f32>],
) {
    let nblocks = strata.nblocks();
    exec.install(|| {
        for s in 0..strata.nstrata() {
            scratch[..nblocks]
                .par_iter_mut()
                .enumerate()
                .for_each(|(b, buf)| {
                    for &k in strata.bucket(s, b) {
                        // SAFETY: the buckets of a stratum touch disjoint rows
                        //         of every mode.
                        unsafe { update_entry(shared, train, k, lr, reg, buf) };
                    }
                });
        }
    });
}

/// One stochastic gradient step on entry `k`.
///
/// The residual is computed once, then the modes are updated in order, each
/// one using the freshest rows including those already updated for `k`.
///
/// # Safety
/// No other thread may access the rows of entry `k` during the call, unless
/// the caller accepts racy updates.
unsafe fn update_entry(
    shared: &SharedFactors<'_>,
    train: &SparseTensor,
    k: usize,
    lr: f32,
    reg: &[f32],
    buf: &mut [f32],
) {
    let rank = shared.rank();
    let nmodes = shared.nmodes();
    let prod = &mut buf[..rank];

    prod.fill(1.);
    for m in 0..nmodes {
        // SAFETY: guaranteed by the caller.
        let row = unsafe { shared.row(m, train.ind(m)[k]) };
        prod.iter_mut().zip(row).for_each(|(p, &a)| *p *= a);
    }
    let err = train.vals()[k] - prod.iter().sum::<f32>();

    for m in 0..nmodes {
        prod.fill(1.);
        for n in (0..nmodes).filter(|&n| n != m) {
            // SAFETY: guaranteed by the caller.
            let row = unsafe { shared.row(n, train.ind(n)[k]) };
            prod.iter_mut().zip(row).for_each(|(p, &a)| *p *= a);
        }

        // SAFETY: guaranteed by the caller, no other row reference is alive.
        let row = unsafe { shared.row_mut(m, train.ind(m)[k]) };
        for (a, &p) in row.iter_mut().zip(prod.iter()) {
            *a += lr * (err * p - reg[m] * *a);
        }
    }
}
