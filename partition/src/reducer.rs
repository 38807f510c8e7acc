use std::{num::NonZeroUsize, sync::Arc};

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::{ReduceErr, Result};

/// Collective operations shared by every worker of a training group.
///
/// Every worker must call the same sequence of collectives with buffers of the
/// same length, otherwise the call fails for the whole group.
pub trait Reducer: Send + Sync {
    /// The identity of this worker inside the group.
    fn rank(&self) -> usize;

    /// The amount of workers in the group.
    fn npes(&self) -> usize;

    /// Replaces `buf` with the elementwise sum of every worker's `buf`.
    ///
    /// # Arguments
    /// * `buf` - The local contribution, overwritten with the global sum.
    ///
    /// # Returns
    /// A `ReduceErr` if the workers disagree on the length or a peer left the group.
    fn sum_into(&self, buf: &mut [f64]) -> Result<()>;

    /// Sums a single scalar across the group.
    fn sum(&self, value: f64) -> Result<f64> {
        let mut buf = [value];
        self.sum_into(&mut buf)?;
        Ok(buf[0])
    }

    /// Sums a count across the group.
    fn sum_count(&self, count: usize) -> Result<usize> {
        Ok(self.sum(count as f64)? as usize)
    }

    /// Whether this worker should produce console output and shared artifacts.
    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// The reducer of a group with a single worker, every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalReducer;

impl LocalReducer {
    pub fn new() -> Self {
        Self
    }
}

impl Reducer for LocalReducer {
    fn rank(&self) -> usize {
        0
    }

    fn npes(&self) -> usize {
        1
    }

    fn sum_into(&self, _buf: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Gate {
    arrived: usize,
    generation: u64,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    npes: usize,
    gate: Mutex<Gate>,
    turn: Condvar,
    slots: Mutex<Vec<Vec<f64>>>,
}

impl Shared {
    /// Blocks until every worker of the group reaches this point.
    fn wait(&self, rank: usize) -> Result<()> {
        let mut gate = self.gate.lock();

        if gate.closed {
            return Err(ReduceErr::GroupClosed { rank });
        }

        let generation = gate.generation;
        gate.arrived += 1;

        if gate.arrived == self.npes {
            gate.arrived = 0;
            gate.generation += 1;
            self.turn.notify_all();
            return Ok(());
        }

        while gate.generation == generation {
            if gate.closed {
                return Err(ReduceErr::GroupClosed { rank });
            }
            self.turn.wait(&mut gate);
        }

        Ok(())
    }

    fn close(&self) {
        let mut gate = self.gate.lock();
        gate.closed = true;
        self.turn.notify_all();
    }
}

/// A handle to an in-process reduction group, one per worker thread.
///
/// Sums are accumulated in rank order, so every worker obtains a bit-identical
/// result regardless of arrival order. Dropping a handle closes the group: peers
/// blocked in, or entering, a later collective fail with `ReduceErr::GroupClosed`.
#[derive(Debug)]
pub struct GroupReducer {
    rank: usize,
    shared: Arc<Shared>,
}

impl GroupReducer {
    /// Creates a group of `npes` workers.
    ///
    /// # Returns
    /// One handle per worker, the i-th handle has rank i.
    pub fn group(npes: NonZeroUsize) -> Vec<GroupReducer> {
        let npes = npes.get();
        let shared = Arc::new(Shared {
            npes,
            gate: Mutex::new(Gate::default()),
            turn: Condvar::new(),
            slots: Mutex::new(vec![Vec::new(); npes]),
        });

        (0..npes)
            .map(|rank| GroupReducer {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Reducer for GroupReducer {
    fn rank(&self) -> usize {
        self.rank
    }

    fn npes(&self) -> usize {
        self.shared.npes
    }

    fn sum_into(&self, buf: &mut [f64]) -> Result<()> {
        let shared = &self.shared;

        // The previous collective's readers are done with the slots.
        shared.wait(self.rank)?;
        {
            let mut slots = shared.slots.lock();
            let slot = &mut slots[self.rank];
            slot.clear();
            slot.extend_from_slice(buf);
        }
        shared.wait(self.rank)?;

        let slots = shared.slots.lock();
        if let Some(other) = slots.iter().find(|s| s.len() != buf.len()) {
            return Err(ReduceErr::LengthMismatch {
                rank: self.rank,
                got: other.len(),
                expected: buf.len(),
            });
        }

        for (i, out) in buf.iter_mut().enumerate() {
            *out = slots.iter().map(|s| s[i]).sum();
        }

        trace!(rank = self.rank, len = buf.len(); "reduced buffer");
        Ok(())
    }
}

impl Drop for GroupReducer {
    fn drop(&mut self) {
        self.shared.close();
    }
}
