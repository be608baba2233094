mod binary;
mod indexing;
mod matmul;
mod reduction;
mod transform;
mod unary;

use crate::{dispatch::apply, Tensor};
use gradscope_core::{
    error::{Error, Result},
    op::Op,
};

/// Dispatches a single-output op.
pub(crate) fn apply_single(op: &Op, inputs: &[Tensor]) -> Result<Tensor> {
    apply(op, inputs)?.into_iter().next().ok_or_else(|| Error::Internal {
        message: format!("{} produced no output", op),
    })
}
