use partition::block_of;

use crate::SparseTensor;

/// Upper bound on the amount of buckets, `nblocks^nmodes`.
const MAX_BUCKETS: usize = 1 << 16;

/// The entries of a tensor split into strata of row-disjoint buckets.
///
/// The rows of every mode are split in `nblocks` contiguous blocks. Bucket
/// `b` of a stratum holds entries in block `b` of mode 0 and in block
/// `(b + offset[m]) % nblocks` of every other mode `m`, so the buckets of one
/// stratum never share a factor row and can be processed concurrently.
#[derive(Debug, Clone)]
pub struct Strata {
    nblocks: usize,
    nstrata: usize,
    ptr: Vec<usize>,
    entries: Vec<usize>,
}

impl Strata {
    /// The amount of blocks used for `nthreads` threads on a tensor with `nmodes` modes.
    pub fn blocks_for(nthreads: usize, nmodes: usize) -> usize {
        let mut nblocks = nthreads.max(1);
        while nblocks > 1
            && (nblocks as u128).pow(nmodes as u32) > MAX_BUCKETS as u128
        {
            nblocks -= 1;
        }
        nblocks
    }

    /// Buckets the entries listed in `order`, keeping their relative order.
    ///
    /// # Arguments
    /// * `tensor` - The training tensor.
    /// * `order` - The entries to bucket, in the order they must be visited.
    /// * `nblocks` - The amount of blocks of every mode.
    pub fn new(tensor: &SparseTensor, order: &[usize], nblocks: usize) -> Self {
        let nblocks = nblocks.max(1);
        let nstrata = nblocks.pow(tensor.nmodes() as u32 - 1);
        let keys: Vec<usize> = order
            .iter()
            .map(|&k| bucket_key(tensor, k, nblocks))
            .collect();

        let mut ptr = vec![0; nstrata * nblocks + 1];
        for &key in &keys {
            ptr[key + 1] += 1;
        }
        for b in 0..nstrata * nblocks {
            ptr[b + 1] += ptr[b];
        }

        let mut fill = ptr.clone();
        let mut entries = vec![0; order.len()];
        for (&k, &key) in order.iter().zip(&keys) {
            entries[fill[key]] = k;
            fill[key] += 1;
        }

        Self {
            nblocks,
            nstrata,
            ptr,
            entries,
        }
    }

    #[inline]
    pub fn nblocks(&self) -> usize {
        self.nblocks
    }

    #[inline]
    pub fn nstrata(&self) -> usize {
        self.nstrata
    }

    /// The entries of bucket `block` of stratum `stratum`.
    #[inline]
    pub fn bucket(&self, stratum: usize, block: usize) -> &[usize] {
        let b = stratum * self.nblocks + block;
        &self.entries[self.ptr[b]..self.ptr[b + 1]]
    }
}

fn bucket_key(tensor: &SparseTensor, k: usize, nblocks: usize) -> usize {
    let dims = tensor.dims();
    let first = block_of(tensor.ind(0)[k], dims[0], nblocks);

    let mut stratum = 0;
    let mut radix = 1;
    for m in 1..tensor.nmodes() {
        let block = block_of(tensor.ind(m)[k], dims[m], nblocks);
        let offset = (block + nblocks - first) % nblocks;
        stratum += offset * radix;
        radix *= nblocks;
    }

    stratum * nblocks + first
}
