use super::BackwardGraphResult;
use crate::Tensor;
use gradscope_core::error::{Error, Result};
use std::sync::Arc;

/// A cached backward program bound to the values one call saved for it.
pub struct BackwardGraphWithClosure {
    graph: Arc<BackwardGraphResult>,
    closure: Vec<Tensor>,
}

impl BackwardGraphWithClosure {
    /// Runs the precomputation and keeps what the save mask asks for.
    pub fn new(graph: Arc<BackwardGraphResult>, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Self> {
        let nargs = graph.num_inputs();
        let nouts = graph.num_outputs();
        if inputs.len() != nargs || outputs.len() != nouts {
            return Err(Error::InvalidArgument(format!(
                "backward graph for {} inputs and {} outputs bound to {} and {}",
                nargs,
                nouts,
                inputs.len(),
                outputs.len()
            )));
        }

        let mut closure = Vec::new();
        if let Some(precomp) = &graph.precomp {
            let args: Vec<Tensor> = inputs.iter().chain(outputs).cloned().collect();
            for value in precomp.run(&args)? {
                closure.push(value.ok_or_else(|| Error::Internal {
                    message: "precomputation left a value undefined".into(),
                })?);
            }
        }
        let saved = &graph.save_for_backward;
        closure.extend(inputs.iter().zip(saved).filter(|(_, s)| **s).map(|(t, _)| t.clone()));
        closure.extend(outputs.iter().zip(&saved[nargs..]).filter(|(_, s)| **s).map(|(t, _)| t.clone()));

        Ok(Self { graph, closure })
    }

    pub fn graph(&self) -> &Arc<BackwardGraphResult> {
        &self.graph
    }

    pub fn input_has_grad(&self, i: usize) -> bool {
        self.graph.input_has_grad.get(i).copied().unwrap_or(false)
    }

    pub fn output_captured(&self, i: usize) -> bool {
        self.graph.save_for_backward.get(self.graph.num_inputs() + i).copied().unwrap_or(false)
    }

    pub fn output_requires_grad(&self, i: usize) -> bool {
        let offset = self.graph.num_inputs() + self.graph.num_outputs();
        self.graph.save_for_backward.get(offset + i).copied().unwrap_or(false)
    }

    /// One gradient per forward input.
    ///
    /// Flagged gradients are read in output order. A node whose flagged
    /// gradients end in missing ones contributes nothing. A gradient present
    /// after a missing one is an error.
    pub fn run(&self, grads: &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> {
        let nargs = self.graph.num_inputs();
        let mut args = self.closure.clone();
        let mut missing = false;
        for (i, grad) in grads.iter().enumerate() {
            if !self.output_requires_grad(i) {
                continue;
            }
            match grad {
                Some(_) if missing => return Err(Error::NullGradient),
                Some(g) => args.push(g.clone()),
                None => missing = true,
            }
        }
        if missing {
            return Ok(vec![None; nargs]);
        }

        let mut result = self.graph.backward.run(&args)?;
        result.resize(nargs, None);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backward_graph::ProgramBuilder;
    use gradscope_core::op::Op;

    // one input, two outputs that both need a gradient, dx = g0 + g1
    fn two_output_graph() -> Arc<BackwardGraphResult> {
        let mut b = ProgramBuilder::new(2);
        let (g0, g1) = (b.input(0), b.input(1));
        let dx = b.push(Op::add(), &[g0, g1]);
        Arc::new(BackwardGraphResult {
            input_has_grad: vec![true],
            save_for_backward: vec![false, false, false, true, true],
            precomp: None,
            backward: b.finish(vec![Some(dx)]),
        })
    }

    #[test]
    fn gradient_after_a_missing_one_is_rejected() -> Result<()> {
        let x = Tensor::new(vec![1.0f32, 2.0])?;
        let outputs = [x.copy(), x.copy()];
        let closure = BackwardGraphWithClosure::new(two_output_graph(), &[x.clone()], &outputs)?;

        assert!(closure.output_requires_grad(1));
        assert!(!closure.output_captured(0));
        assert!(matches!(closure.run(&[None, Some(x.clone())]), Err(Error::NullGradient)));
        assert!(closure.run(&[Some(x.clone()), None])?.iter().all(Option::is_none));
        assert!(closure.run(&[None, None])?.iter().all(Option::is_none));

        let dx = closure.run(&[Some(x.clone()), Some(x)])?;
        assert_eq!(dx.len(), 1);
        assert_eq!(dx[0].as_ref().map(|t| t.to_vec::<f32>()).transpose()?, Some(vec![2.0, 4.0]));
        Ok(())
    }

    #[test]
    fn binding_checks_arity() -> Result<()> {
        let x = Tensor::new(vec![1.0f32])?;
        let bound = BackwardGraphWithClosure::new(two_output_graph(), &[x.clone()], &[x]);
        assert!(matches!(bound, Err(Error::InvalidArgument(_))));
        Ok(())
    }
}
