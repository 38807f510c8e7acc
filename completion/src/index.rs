use crate::SparseTensor;

/// The entries of a tensor grouped by their index along one mode.
///
/// Row `i` lists, in increasing order, the entries whose index along the mode
/// is `i`. Solvers use it to give every row to exactly one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeIndex {
    mode: usize,
    ptr: Vec<usize>,
    entries: Vec<usize>,
}

impl ModeIndex {
    /// Groups the entries of `tensor` along `mode`.
    ///
    /// # Arguments
    /// * `tensor` - The tensor to index.
    /// * `mode` - The mode whose rows group the entries.
    pub fn new(tensor: &SparseTensor, mode: usize) -> Self {
        let nrows = tensor.dims()[mode];
        let ind = tensor.ind(mode);

        let mut ptr = vec![0; nrows + 1];
        for &i in ind {
            ptr[i + 1] += 1;
        }
        for i in 0..nrows {
            ptr[i + 1] += ptr[i];
        }

        let mut fill = ptr.clone();
        let mut entries = vec![0; ind.len()];
        for (k, &i) in ind.iter().enumerate() {
            entries[fill[i]] = k;
            fill[i] += 1;
        }

        Self { mode, ptr, entries }
    }

    /// Indexes every mode of `tensor`.
    pub fn all(tensor: &SparseTensor) -> Vec<Self> {
        (0..tensor.nmodes()).map(|m| Self::new(tensor, m)).collect()
    }

    #[inline]
    pub fn mode(&self) -> usize {
        self.mode
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.ptr.len() - 1
    }

    /// The entries of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[usize] {
        &self.entries[self.ptr[i]..self.ptr[i + 1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_entries_by_row_in_order() {
        let t = SparseTensor::from_entries(
            2,
            [
                (vec![2, 0], 1.),
                (vec![0, 1], 1.),
                (vec![2, 1], 1.),
                (vec![0, 0], 1.),
            ],
        )
        .unwrap();

        let rows = ModeIndex::new(&t, 0);
        assert_eq!(rows.nrows(), 3);
        assert_eq!(rows.row(0), [1, 3]);
        assert!(rows.row(1).is_empty());
        assert_eq!(rows.row(2), [0, 2]);

        let cols = ModeIndex::new(&t, 1);
        assert_eq!(cols.row(0), [0, 3]);
        assert_eq!(cols.row(1), [1, 2]);
    }
}
