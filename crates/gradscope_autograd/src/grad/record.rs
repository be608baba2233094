use super::{
    key::{higher_order_enabled, GradKeyInner},
    node::{GradBackward, GradFn, GradSlotPtr, GradSlotProducerPtr},
};
use crate::{
    backward_graph::{closure::BackwardGraphWithClosure, get_backward_graph, LogicalTensorDesc},
    dispatch::{apply, apply_backend},
    grad_override::{grad_rule, overrides_enabled, CustomBackwardMaker},
    ops::apply_single,
    ScopedDisable, Tensor, TensorFlags,
};
use gradscope_core::{
    error::{Error, Result},
    op::Op,
};
use smallvec::SmallVec;
use std::rc::Rc;

/// Dispatches `op` and records one node per active key watching its inputs.
pub(crate) fn apply_grad(op: &Op, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
    let keys = active_keys(inputs);
    if keys.is_empty() {
        return apply_backend(op, inputs);
    }
    if keys.len() > 1 && !higher_order_enabled() {
        return Err(Error::SecondOrderGrad);
    }

    let requires_grad: Vec<bool> = inputs
        .iter()
        .map(|input| {
            let info = input.grad_info();
            keys.iter().any(|k| info.contains(k))
        })
        .collect();

    let (outputs, backward) = {
        let _no_grad = ScopedDisable::new(TensorFlags::GRAD);
        record_forward(op, inputs, &requires_grad)?
    };
    if matches!(backward, GradBackward::Empty) {
        return Ok(outputs);
    }

    // the closure keeps the value it captured, the caller gets a fresh handle
    let outputs: Vec<Tensor> = outputs
        .into_iter()
        .enumerate()
        .map(|(i, t)| if backward.output_captured(i) { t.fastpath_copy() } else { t })
        .collect();

    for key in &keys {
        let grad_fn = Rc::new(GradFn::new(Rc::downgrade(key), outputs.len(), backward.clone()));
        let dsts: Vec<Option<GradSlotProducerPtr>> = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                if !backward.input_has_grad(i) {
                    return None;
                }
                input.grad_info().get(key).cloned().map(GradSlotProducerPtr::new)
            })
            .collect();
        *grad_fn.dsts.borrow_mut() = dsts;

        for (i, output) in outputs.iter().enumerate() {
            if !backward.output_requires_grad(i) {
                continue;
            }
            output.grad_info_mut().insert(key, GradSlotPtr::new(grad_fn.clone(), i));
            output.set_flags(TensorFlags::GRAD);
            key.track(output);
        }

        let mut tape = key.tape.borrow_mut();
        tape.push(Rc::downgrade(&grad_fn));
        log::trace!("key {}: recorded {} as node {}", key.id(), op, tape.len() - 1);
    }
    Ok(outputs)
}

/// Distinct keys that are alive, active and not blocked by a running backward.
///
/// Prunes finalized linkage from every input on the way.
fn active_keys(inputs: &[Tensor]) -> SmallVec<[Rc<GradKeyInner>; 2]> {
    let mut keys: SmallVec<[Rc<GradKeyInner>; 2]> = SmallVec::new();
    for input in inputs {
        if !input.is_grad_tracked() {
            continue;
        }
        let stale = {
            let mut info = input.grad_info_mut();
            let stale = info.shrink();
            for entry in info.iter() {
                let Some(key) = entry.key.upgrade() else {
                    continue;
                };
                if key.is_blocked() || keys.iter().any(|k| Rc::ptr_eq(k, &key)) {
                    continue;
                }
                keys.push(key);
            }
            if info.is_empty() {
                input.clear_flags(TensorFlags::GRAD);
            }
            stale
        };
        drop(stale);
    }
    keys
}

fn record_forward(op: &Op, inputs: &[Tensor], requires_grad: &[bool]) -> Result<(Vec<Tensor>, GradBackward)> {
    if overrides_enabled() {
        if let Some(rule) = grad_rule(op.kind()) {
            let mut maker = CustomBackwardMaker::new(requires_grad);
            if let Some(outputs) = rule(op, inputs, &mut maker)? {
                let backward = match maker.finish() {
                    Some(custom) => GradBackward::Custom(Rc::new(custom)),
                    None => GradBackward::Empty,
                };
                return Ok((outputs, backward));
            }
        }
    }

    let copies: Vec<Tensor> = inputs.iter().map(Tensor::copy).collect();
    let outputs = apply(op, &copies)?;
    let descs: Vec<LogicalTensorDesc> = copies.iter().map(LogicalTensorDesc::of).collect();
    let output_has_grad = vec![true; outputs.len()];
    let backward = match get_backward_graph(op, &descs, requires_grad, &output_has_grad)? {
        Some(result) => GradBackward::Graph(Rc::new(BackwardGraphWithClosure::new(result, &copies, &outputs)?)),
        None => GradBackward::Empty,
    };
    Ok((outputs, backward))
}

/// Adds `grad` into the slot, going through dispatch so outer keys can record it.
pub(crate) fn accum_grad(dst: &GradSlotPtr, grad: Tensor) -> Result<()> {
    let merged = match dst.grad() {
        Some(prev) => apply_single(&Op::add(), &[prev, grad])?,
        None => grad,
    };
    dst.set_grad(merged)
}
