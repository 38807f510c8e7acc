mod init;

pub use init::RowInit;

use ndarray::{Array2, ArrayView1};

use crate::{CompletionErr, Result, SparseTensor};

/// A low-rank factor model: one dense `dims[m] x rank` matrix per mode.
///
/// Row `i` of factor `m` is the latent vector of index `i` along mode `m`. The
/// model predicts an entry as the sum over the rank of the product of its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorModel {
    rank: usize,
    factors: Vec<Array2<f32>>,
}

impl FactorModel {
    /// Allocates a randomly initialized model.
    ///
    /// Values are uniform in `[0, 1/sqrt(rank))`, drawn per row from `seed`,
    /// the mode and the row index.
    ///
    /// # Returns
    /// An allocation error if the rank or any extent is zero.
    pub fn alloc(dims: &[usize], rank: usize, seed: u64) -> Result<Self> {
        Self::alloc_layer(dims, rank, seed, 0)
    }

    /// Allocates the model of a worker whose mode-0 rows start at global row
    /// `layer_start`.
    ///
    /// The rows hold the values of the same rows of the model allocated whole,
    /// so splitting mode 0 over workers doesn't change the starting point.
    ///
    /// # Arguments
    /// * `dims` - The extent of every mode, mode 0 being the local one.
    /// * `rank` - The decomposition rank.
    /// * `seed` - The seed shared by every worker.
    /// * `layer_start` - The global index of the first local mode-0 row.
    pub fn alloc_layer(
        dims: &[usize],
        rank: usize,
        seed: u64,
        layer_start: usize,
    ) -> Result<Self> {
        let mut model = Self::zeros(dims, rank)?;
        let init = RowInit::new(seed, rank)?;

        for (mode, factor) in model.factors.iter_mut().enumerate() {
            let first_row = if mode == 0 { layer_start } else { 0 };
            init.fill(mode, first_row, factor);
        }

        Ok(model)
    }

    /// Allocates a model with every value set to `value`.
    pub fn filled(dims: &[usize], rank: usize, value: f32) -> Result<Self> {
        let mut model = Self::zeros(dims, rank)?;
        model.factors.iter_mut().for_each(|f| f.fill(value));
        Ok(model)
    }

    fn zeros(dims: &[usize], rank: usize) -> Result<Self> {
        if rank == 0 {
            return Err(CompletionErr::ZeroRank);
        }

        if let Some(mode) = dims.iter().position(|&d| d == 0) {
            return Err(CompletionErr::ZeroDim { mode });
        }

        let factors = dims.iter().map(|&d| Array2::zeros((d, rank))).collect();
        Ok(Self { rank, factors })
    }

    /// Wraps already computed factors, one `dims[m] x rank` matrix per mode.
    ///
    /// # Returns
    /// An allocation error if a factor is empty, a `SizeMismatch` error if the
    /// factors disagree on the rank.
    pub fn from_factors(factors: Vec<Array2<f32>>) -> Result<Self> {
        let rank = factors.first().map_or(0, |f| f.ncols());
        if rank == 0 {
            return Err(CompletionErr::ZeroRank);
        }

        for (mode, factor) in factors.iter().enumerate() {
            if factor.nrows() == 0 {
                return Err(CompletionErr::ZeroDim { mode });
            }
            if factor.ncols() != rank {
                return Err(CompletionErr::SizeMismatch {
                    a: "factor columns",
                    b: "rank",
                    got: factor.ncols(),
                    expected: rank,
                });
            }
        }

        Ok(Self { rank, factors })
    }

    /// Allocates a model shaped after `tensor`.
    pub fn for_tensor(tensor: &SparseTensor, rank: usize, seed: u64) -> Result<Self> {
        Self::alloc(tensor.dims(), rank, seed)
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn nmodes(&self) -> usize {
        self.factors.len()
    }

    /// The extent of every mode.
    pub fn dims(&self) -> Vec<usize> {
        self.factors.iter().map(|f| f.nrows()).collect()
    }

    #[inline]
    pub fn factor(&self, mode: usize) -> &Array2<f32> {
        &self.factors[mode]
    }

    #[inline]
    pub fn factor_mut(&mut self, mode: usize) -> &mut Array2<f32> {
        &mut self.factors[mode]
    }

    #[inline]
    pub fn factors(&self) -> &[Array2<f32>] {
        &self.factors
    }

    #[inline]
    pub fn factors_mut(&mut self) -> &mut [Array2<f32>] {
        &mut self.factors
    }

    /// Row `idx` of factor `mode`.
    #[inline]
    pub fn row(&self, mode: usize, idx: usize) -> ArrayView1<'_, f32> {
        self.factors[mode].row(idx)
    }

    /// Predicts the value at `coords`.
    pub fn predict(&self, coords: &[usize]) -> f32 {
        (0..self.rank)
            .map(|f| {
                self.factors
                    .iter()
                    .zip(coords)
                    .map(|(a, &i)| a[[i, f]])
                    .product::<f32>()
            })
            .sum()
    }

    /// Predicts the value of entry `k` of `tensor`.
    pub fn predict_entry(&self, tensor: &SparseTensor, k: usize) -> f32 {
        (0..self.rank)
            .map(|f| {
                self.factors
                    .iter()
                    .enumerate()
                    .map(|(m, a)| a[[tensor.ind(m)[k], f]])
                    .product::<f32>()
            })
            .sum()
    }

    /// The squared Frobenius norm of factor `mode`.
    pub fn norm_sq(&self, mode: usize) -> f64 {
        self.factors[mode]
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum()
    }

    /// Overwrites this model's values with `other`'s, reusing the allocations.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the models don't share the same shape.
    pub fn copy_from(&mut self, other: &FactorModel) -> Result<()> {
        if self.rank != other.rank || self.dims() != other.dims() {
            return Err(CompletionErr::SizeMismatch {
                a: "snapshot",
                b: "model",
                got: self.factors.iter().map(|f| f.len()).sum(),
                expected: other.factors.iter().map(|f| f.len()).sum(),
            });
        }

        for (mine, theirs) in self.factors.iter_mut().zip(&other.factors) {
            mine.assign(theirs);
        }

        Ok(())
    }

    /// Whether every value of the model is finite.
    pub fn is_finite(&self) -> bool {
        self.factors.iter().all(|f| f.iter().all(|v| v.is_finite()))
    }
}
