use ndarray::Zip;

use super::{
    Solver,
    descent::{Descent, Params, dot, negate_into, objective, zeros_like},
};
use crate::{FactorModel, Result, SparseTensor, Workspace};

/// Nonlinear conjugate gradient with Polak-Ribière+ directions.
pub struct Nlcg {
    descent: Descent,
    dir: Params,
    prev_grad: Params,
    /// `g . g` of the previous gradient, `None` after a restart.
    prev_norm: Option<f64>,
}

impl Nlcg {
    pub fn new(train: &SparseTensor, model: &FactorModel) -> Self {
        Self {
            descent: Descent::new(train, model),
            dir: zeros_like(model),
            prev_grad: zeros_like(model),
            prev_norm: None,
        }
    }
}

impl Solver for Nlcg {
    fn name(&self) -> &'static str {
        "nlcg"
    }

    fn epoch(
        &mut self,
        train: &SparseTensor,
        model: &mut FactorModel,
        ws: &mut Workspace,
        _epoch: usize,
    ) -> Result<bool> {
        let f0 = objective(train, model, ws)?;
        self.descent.gradient(train, model, ws)?;
        let grad = &self.descent.grad;
        let norm = dot(grad, grad, ws)?;

        let beta = match self.prev_norm {
            Some(prev) if prev > 0. => {
                let overlap = dot(grad, &self.prev_grad, ws)?;
                ((norm - overlap) / prev).max(0.)
            }
            _ => 0.,
        };

        let b = beta as f32;
        for (d, g) in self.dir.iter_mut().zip(grad) {
            Zip::from(d).and(g).for_each(|d, &g| *d = b * *d - g);
        }

        let mut slope = dot(grad, &self.dir, ws)?;
        let mut momentum = beta > 0.;
        if slope >= 0. {
            negate_into(&mut self.dir, grad);
            slope = -norm;
            momentum = false;
        }
        if slope >= 0. {
            return Ok(false);
        }

        for (p, g) in self.prev_grad.iter_mut().zip(grad) {
            p.assign(g);
        }
        self.prev_norm = Some(norm);

        let found = self
            .descent
            .line_search(train, model, ws, &self.dir, f0, slope)?;
        if found.is_some() {
            return Ok(true);
        }

        // retry from steepest descent before giving up
        self.prev_norm = None;
        Ok(momentum)
    }
}
