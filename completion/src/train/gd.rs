use super::{
    Solver,
    descent::{Descent, Params, dot, negate_into, objective, zeros_like},
};
use crate::{FactorModel, Result, SparseTensor, Workspace};

/// Full-batch gradient descent with a backtracking line search.
pub struct Gd {
    descent: Descent,
    dir: Params,
}

impl Gd {
    pub fn new(train: &SparseTensor, model: &FactorModel) -> Self {
        Self {
            descent: Descent::new(train, model),
            dir: zeros_like(model),
        }
    }
}

impl Solver for Gd {
    fn name(&self) -> &'static str {
        "gd"
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
        negate_into(&mut self.dir, &self.descent.grad);

        let slope = dot(&self.descent.grad, &self.dir, ws)?;
        if slope >= 0. {
            return Ok(false);
        }

        let found = self
            .descent
            .line_search(train, model, ws, &self.dir, f0, slope)?;
        Ok(found.is_some())
    }
}
