use ndarray::Array2;
use partition::Reducer;

use crate::{FactorModel, Result};

/// Sums matrices elementwise across the group and scales the result.
///
/// Every worker must pass matrices of the same shapes in the same order. The
/// reduction runs in `f64` and the results are identical on every worker.
pub fn sum_matrices<'a, I>(mats: I, reducer: &dyn Reducer, scale: f64) -> Result<()>
where
    I: IntoIterator<Item = &'a mut Array2<f32>>,
{
    let mut mats: Vec<_> = mats.into_iter().collect();
    let mut buf: Vec<f64> = mats
        .iter()
        .flat_map(|m| m.iter().map(|&v| f64::from(v)))
        .collect();

    reducer.sum_into(&mut buf)?;

    let mut sums = buf.into_iter();
    for mat in mats.iter_mut() {
        for (v, s) in mat.iter_mut().zip(sums.by_ref()) {
            *v = (s * scale) as f32;
        }
    }

    Ok(())
}

/// Averages the replicated factors, every mode but 0, across the group.
///
/// A group of one worker leaves the model untouched.
pub fn average_replicas(model: &mut FactorModel, reducer: &dyn Reducer) -> Result<()> {
    let npes = reducer.npes();
    if npes == 1 {
        return Ok(());
    }

    sum_matrices(
        model.factors_mut().iter_mut().skip(1),
        reducer,
        1. / npes as f64,
    )
}
