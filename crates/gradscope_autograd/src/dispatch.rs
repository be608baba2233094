//! The single entry point every tensor op goes through.

use crate::{global_disable, global_enable, grad::apply_grad, Tensor, TensorFlags};
use gradscope_core::{
    error::{Error, Result},
    executor::executor,
    op::Op,
};
use std::sync::Arc;

/// Runs `op` over `inputs`, recording it on every active gradient key that
/// watches one of them.
pub fn apply(op: &Op, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let mut flags = TensorFlags::empty();
    for input in inputs {
        flags |= input.flags();
    }
    let flags = (flags - global_disable()) | global_enable();

    if flags.contains(TensorFlags::GRAD) {
        return apply_grad(op, inputs);
    }
    apply_backend(op, inputs)
}

/// Executes `op` without recording anything.
pub(crate) fn apply_backend(op: &Op, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    if let (Op::FastpathCopy, [x]) = (op, inputs) {
        return Ok(vec![x.fastpath_copy()]);
    }

    let exec = match inputs.first() {
        Some(first) => {
            let exec = first.executor().clone();
            if inputs.iter().any(|t| !std::ptr::addr_eq(Arc::as_ptr(t.executor()), Arc::as_ptr(&exec))) {
                return Err(Error::InvalidArgument(format!(
                    "{} inputs live in different executors",
                    op
                )));
            }
            exec
        }
        None => executor(),
    };

    let handles: Vec<_> = inputs.iter().map(Tensor::handle).collect();
    exec.apply_op(op, &handles)?
        .into_iter()
        .map(|handle| Tensor::from_handle(handle, exec.clone()))
        .collect()
}
