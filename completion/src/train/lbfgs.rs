use std::collections::VecDeque;

use log::trace;

use super::{
    Solver,
    descent::{Descent, Params, axpy, axpy_into, dot, negate_into, objective, scale, zeros_like},
};
use crate::{FactorModel, Result, SparseTensor, Workspace};

const HISTORY: usize = 5;

struct Pair {
    s: Params,
    y: Params,
    rho: f64,
}

/// Limited-memory BFGS with a backtracking line search.
pub struct Lbfgs {
    descent: Descent,
    dir: Params,
    prev_grad: Params,
    /// The last accepted move, pending its gradient difference.
    last_move: Option<Params>,
    history: VecDeque<Pair>,
}

impl Lbfgs {
    pub fn new(train: &SparseTensor, model: &FactorModel) -> Self {
        Self {
            descent: Descent::new(train, model),
            dir: zeros_like(model),
            prev_grad: zeros_like(model),
            last_move: None,
            history: VecDeque::with_capacity(HISTORY),
        }
    }

    /// Stores the curvature pair of the last move, dropping the history if the
    /// curvature isn't positive.
    fn update_history(&mut self, ws: &Workspace) -> Result<()> {
        let Some(s) = self.last_move.take() else {
            return Ok(());
        };

        let mut y = zeros_like_params(&s);
        axpy_into(&mut y, &self.descent.grad, -1., &self.prev_grad);

        let sy = dot(&s, &y, ws)?;
        if sy <= 0. || !sy.is_finite() {
            trace!(sy = sy; "non positive curvature, resetting the history");
            self.history.clear();
            return Ok(());
        }

        if self.history.len() == HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(Pair { s, y, rho: 1. / sy });
        Ok(())
    }

    /// Two-loop recursion, `dir = -H grad`.
    fn direction(&mut self, ws: &Workspace) -> Result<()> {
        let grad = &self.descent.grad;
        let Some(newest) = self.history.back() else {
            negate_into(&mut self.dir, grad);
            return Ok(());
        };

        let gamma = 1. / (newest.rho * dot(&newest.y, &newest.y, ws)?);

        let mut q = grad.clone();
        let mut alphas = Vec::with_capacity(self.history.len());
        for pair in self.history.iter().rev() {
            let alpha = pair.rho * dot(&pair.s, &q, ws)?;
            axpy(&mut q, -alpha as f32, &pair.y);
            alphas.push(alpha);
        }

        scale(&mut q, gamma as f32);
        for (pair, alpha) in self.history.iter().zip(alphas.into_iter().rev()) {
            let beta = pair.rho * dot(&pair.y, &q, ws)?;
            axpy(&mut q, (alpha - beta) as f32, &pair.s);
        }

        negate_into(&mut self.dir, &q);
        Ok(())
    }
}

fn zeros_like_params(p: &Params) -> Params {
    p.iter().map(|a| ndarray::Array2::zeros(a.raw_dim())).collect()
}

impl Solver for Lbfgs {
    fn name(&self) -> &'static str {
        "lbfgs"
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
        self.update_history(ws)?;
        self.direction(ws)?;

        let grad = &self.descent.grad;
        let mut slope = dot(grad, &self.dir, ws)?;
        if slope >= 0. {
            self.history.clear();
            negate_into(&mut self.dir, grad);
            slope = dot(grad, &self.dir, ws)?;
        }
        if slope >= 0. {
            return Ok(false);
        }

        let quasi_newton = !self.history.is_empty();
        if quasi_newton {
            self.descent.step = Some(1.);
        }

        for (p, g) in self.prev_grad.iter_mut().zip(&self.descent.grad) {
            p.assign(g);
        }

        match self
            .descent
            .line_search(train, model, ws, &self.dir, f0, slope)?
        {
            Some((_, step)) => {
                let mut s = self.dir.clone();
                scale(&mut s, step);
                self.last_move = Some(s);
                Ok(true)
            }
            None => {
                self.history.clear();
                self.last_move = None;
                Ok(quasi_newton)
            }
        }
    }
}
