use std::marker::PhantomData;

use crate::FactorModel;

/// A view over the factor rows of a model that many threads update at once.
///
/// It doesn't synchronize anything. Callers either guarantee that no two
/// threads touch the same row (stratified updates) or embrace the races
/// (hogwild updates).
pub struct SharedFactors<'m> {
    rank: usize,
    rows: Vec<usize>,
    ptrs: Vec<*mut f32>,
    _model: PhantomData<&'m mut FactorModel>,
}

unsafe impl Send for SharedFactors<'_> {}
unsafe impl Sync for SharedFactors<'_> {}

impl<'m> SharedFactors<'m> {
    /// Borrows every factor of `model` for concurrent row updates.
    ///
    /// Factors are made contiguous in row-major order first.
    pub fn new(model: &'m mut FactorModel) -> Self {
        let rank = model.rank();
        let mut rows = Vec::with_capacity(model.nmodes());
        let mut ptrs = Vec::with_capacity(model.nmodes());

        for factor in model.factors_mut() {
            if !factor.is_standard_layout() {
                *factor = factor.as_standard_layout().into_owned();
            }
            rows.push(factor.nrows());
            ptrs.push(factor.as_mut_ptr());
        }

        Self {
            rank,
            rows,
            ptrs,
            _model: PhantomData,
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn nmodes(&self) -> usize {
        self.ptrs.len()
    }

    /// Row `idx` of factor `mode`.
    ///
    /// # Safety
    /// No other thread may write this row while the returned slice lives,
    /// unless the caller accepts racy reads.
    #[inline]
    pub unsafe fn row(&self, mode: usize, idx: usize) -> &[f32] {
        debug_assert!(idx < self.rows[mode]);
        // SAFETY: the factor is contiguous and outlives 'm, idx is inside it.
        unsafe { std::slice::from_raw_parts(self.ptrs[mode].add(idx * self.rank), self.rank) }
    }

    /// Mutable row `idx` of factor `mode`.
    ///
    /// # Safety
    /// No other reference to this row may be alive in the calling thread, and
    /// no other thread may access it unless the caller accepts the races.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn row_mut(&self, mode: usize, idx: usize) -> &mut [f32] {
        debug_assert!(idx < self.rows[mode]);
        // SAFETY: the factor is contiguous and outlives 'm, idx is inside it.
        unsafe { std::slice::from_raw_parts_mut(self.ptrs[mode].add(idx * self.rank), self.rank) }
    }
}
