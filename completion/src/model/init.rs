use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Uniform};

use crate::Result;

/// Decorrelates the generators of the modes derived from a single seed.
const MODE_STREAM: u64 = 0x9e37_79b9_7f4a_7c15;
/// Decorrelates the generators of the rows of a mode.
const ROW_STREAM: u64 = 0xbf58_476d_1ce4_e5b9;

/// Random initial values of factor rows, uniform in `[0, 1/sqrt(rank))`.
///
/// Every row draws from its own generator keyed by the seed, the mode and the
/// row's global index. A worker owning rows `[start..end)` of mode 0 gets the
/// same values as the single worker owning the whole mode.
#[derive(Debug, Clone)]
pub struct RowInit {
    seed: u64,
    dist: Uniform<f32>,
}

impl RowInit {
    /// # Returns
    /// An `Init` error if `rank` is zero.
    pub fn new(seed: u64, rank: usize) -> Result<Self> {
        let high = 1. / (rank as f32).sqrt();
        Ok(Self {
            seed,
            dist: Uniform::new(0., high)?,
        })
    }

    /// Fills `factor`, whose first row is global row `first_row` of `mode`.
    pub fn fill(&self, mode: usize, first_row: usize, factor: &mut Array2<f32>) {
        let stream = self.seed ^ MODE_STREAM.wrapping_mul(mode as u64 + 1);

        for (i, mut row) in factor.rows_mut().into_iter().enumerate() {
            let global = (first_row + i) as u64;
            let mut rng = StdRng::seed_from_u64(stream ^ ROW_STREAM.wrapping_mul(global + 1));
            row.iter_mut().for_each(|v| *v = self.dist.sample(&mut rng));
        }
    }
}
