use crate::{CompletionErr, MAX_MODES, Result};

/// A sparse tensor in coordinate format.
///
/// Entry `k` lives at `(ind[0][k], .., ind[N-1][k])` with value `vals[k]`. In a
/// distributed run mode-0 indices are local to the worker's layer and `dims[0]`
/// is the layer's extent.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor {
    dims: Vec<usize>,
    ind: Vec<Vec<usize>>,
    vals: Vec<f32>,
}

impl SparseTensor {
    /// Creates a new `SparseTensor`.
    ///
    /// # Arguments
    /// * `dims` - The extent of every mode.
    /// * `ind` - The indices of every entry, one vector per mode.
    /// * `vals` - The value of every entry.
    ///
    /// # Returns
    /// An error if the mode count is unsupported, the index vectors disagree in
    /// length with `vals` or an index lies outside its mode's extent.
    pub fn new(dims: Vec<usize>, ind: Vec<Vec<usize>>, vals: Vec<f32>) -> Result<Self> {
        let nmodes = dims.len();
        if !(2..=MAX_MODES).contains(&nmodes) {
            return Err(CompletionErr::ModeCount { got: nmodes });
        }

        if ind.len() != nmodes {
            return Err(CompletionErr::SizeMismatch {
                a: "indices",
                b: "dims",
                got: ind.len(),
                expected: nmodes,
            });
        }

        for (mode, (col, &extent)) in ind.iter().zip(&dims).enumerate() {
            if col.len() != vals.len() {
                return Err(CompletionErr::SizeMismatch {
                    a: "indices",
                    b: "values",
                    got: col.len(),
                    expected: vals.len(),
                });
            }

            if let Some(&index) = col.iter().find(|&&i| i >= extent) {
                return Err(CompletionErr::IndexOutOfRange {
                    mode,
                    index,
                    extent,
                });
            }
        }

        Ok(Self { dims, ind, vals })
    }

    /// Builds a tensor from `(coords, value)` pairs, using the smallest extents
    /// that fit every coordinate.
    pub fn from_entries<I>(nmodes: usize, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<usize>, f32)>,
    {
        let mut dims = vec![0; nmodes];
        let mut ind = vec![Vec::new(); nmodes];
        let mut vals = Vec::new();

        for (coords, val) in entries {
            if coords.len() != nmodes {
                return Err(CompletionErr::SizeMismatch {
                    a: "coordinates",
                    b: "modes",
                    got: coords.len(),
                    expected: nmodes,
                });
            }

            for (m, &i) in coords.iter().enumerate() {
                dims[m] = dims[m].max(i + 1);
                ind[m].push(i);
            }
            vals.push(val);
        }

        Self::new(dims, ind, vals)
    }

    #[inline]
    pub fn nmodes(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// The indices of every entry along `mode`.
    #[inline]
    pub fn ind(&self, mode: usize) -> &[usize] {
        &self.ind[mode]
    }

    #[inline]
    pub fn vals(&self) -> &[f32] {
        &self.vals
    }

    /// Grows every mode's extent to at least the given one, entries are untouched.
    ///
    /// # Arguments
    /// * `dims` - The minimum extents.
    pub fn widen_dims(&mut self, dims: &[usize]) {
        for (mine, &other) in self.dims.iter_mut().zip(dims) {
            *mine = (*mine).max(other);
        }
    }

    /// Checks that every entry addresses a row of a model with extents `dims`.
    pub fn check_fits(&self, dims: &[usize]) -> Result<()> {
        if dims.len() != self.nmodes() {
            return Err(CompletionErr::SizeMismatch {
                a: "tensor modes",
                b: "model modes",
                got: self.nmodes(),
                expected: dims.len(),
            });
        }

        for (mode, (col, &extent)) in self.ind.iter().zip(dims).enumerate() {
            if let Some(&index) = col.iter().find(|&&i| i >= extent) {
                return Err(CompletionErr::IndexOutOfRange {
                    mode,
                    index,
                    extent,
                });
            }
        }

        Ok(())
    }
}
