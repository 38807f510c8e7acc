use std::num::NonZeroUsize;
use std::ops::Range;

/// Splits `total` mode-0 slices among `npes` workers and returns the layer for `rank`.
///
/// Properties:
/// - Ranges are contiguous, disjoint and cover `[0..total)`.
/// - Sizes differ by at most 1 (balanced partition).
pub fn layer_range(total: usize, rank: usize, npes: usize) -> Range<usize> {
    assert!(npes > 0);
    assert!(rank < npes);

    let base = total / npes;
    let rem = total % npes;

    let start = rank * base + rank.min(rem);
    let extra = if rank < rem { 1 } else { 0 };
    let end = start + base + extra;

    start..end
}

/// Returns the block owning index `idx` when `[0..total)` is split with `layer_range`.
///
/// # Arguments
/// * `idx` - An index lower than `total`.
/// * `total` - The extent being split.
/// * `nblocks` - The amount of blocks.
pub fn block_of(idx: usize, total: usize, nblocks: usize) -> usize {
    debug_assert!(idx < total);

    let base = total / nblocks;
    let rem = total % nblocks;
    let wide = rem * (base + 1);

    if idx < wide {
        idx / (base + 1)
    } else {
        rem + (idx - wide) / base
    }
}

/// The mode-0 layer assigned to one worker of the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub rank: usize,
    pub npes: NonZeroUsize,
    pub range: Range<usize>,
}

impl Layer {
    /// Creates the layer of worker `rank` out of `npes` workers for a mode of extent `total`.
    pub fn new(total: usize, rank: usize, npes: NonZeroUsize) -> Self {
        assert!(rank < npes.get(), "rank out of range");
        let range = layer_range(total, rank, npes.get());
        Self { rank, npes, range }
    }

    /// A single worker owning every slice, `[0..usize::MAX)`.
    ///
    /// Used when the extent is not known in advance, the loader takes the
    /// real extent from the data.
    pub fn whole() -> Self {
        Self {
            rank: 0,
            npes: NonZeroUsize::MIN,
            range: 0..usize::MAX,
        }
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.range.start
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.range.end
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        self.range.contains(&idx)
    }

    /// Whether this layer covers the whole mode.
    #[inline]
    pub fn is_whole(&self) -> bool {
        self.npes.get() == 1
    }
}
