//! Hand-written backward shortcuts that bypass the generic graph builder.
//!
//! A rule runs the forward op itself and describes its backward through a
//! [`CustomBackwardMaker`]. Returning `Ok(None)` declines the call and
//! leaves it to the generic path.

use crate::{dispatch::apply, ops::apply_single, Tensor};
use gradscope_core::{
    dtype::DType,
    error::Result,
    op::{ElemwiseMode, Op, OpKind, ReduceMode},
};
use rustc_hash::FxHashMap;
use std::{cell::Cell, rc::Rc, sync::LazyLock};

pub type BackwardFn = Rc<dyn Fn(&[Option<Tensor>]) -> Result<Vec<Option<Tensor>>>>;

pub type GradRule = fn(&Op, &[Tensor], &mut CustomBackwardMaker) -> Result<Option<Vec<Tensor>>>;

/// A backward closure produced by an override rule.
pub struct CustomBackward {
    input_has_grad: Vec<bool>,
    output_captured: Vec<bool>,
    backward: BackwardFn,
}

impl CustomBackward {
    pub fn input_has_grad(&self, i: usize) -> bool {
        self.input_has_grad.get(i).copied().unwrap_or(false)
    }

    pub fn output_requires_grad(&self, i: usize) -> bool {
        i < self.output_captured.len()
    }

    pub fn output_captured(&self, i: usize) -> bool {
        self.output_captured.get(i).copied().unwrap_or(false)
    }

    /// One gradient per forward input; nothing flows when no output got one.
    pub fn run(&self, grads: &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> {
        let nargs = self.input_has_grad.len();
        if grads.iter().all(Option::is_none) {
            return Ok(vec![None; nargs]);
        }
        let mut result = (self.backward)(grads)?;
        result.resize(nargs, None);
        for (grad, has) in result.iter_mut().zip(&self.input_has_grad) {
            if !has {
                *grad = None;
            }
        }
        Ok(result)
    }
}

pub struct CustomBackwardMaker {
    requires_grad: Vec<bool>,
    input_has_grad: Vec<bool>,
    output_captured: Vec<bool>,
    backward: Option<BackwardFn>,
}

impl CustomBackwardMaker {
    pub(crate) fn new(requires_grad: &[bool]) -> Self {
        Self {
            requires_grad: requires_grad.to_vec(),
            input_has_grad: requires_grad.to_vec(),
            output_captured: Vec::new(),
            backward: None,
        }
    }

    pub fn input_requires_grad(&self, i: usize) -> bool {
        self.requires_grad.get(i).copied().unwrap_or(false)
    }

    /// Defaults to whether the input requires grad at all.
    pub fn input_has_grad(&mut self, i: usize, has: bool) -> &mut Self {
        if let Some(slot) = self.input_has_grad.get_mut(i) {
            *slot = has && self.requires_grad[i];
        }
        self
    }

    pub fn output_size(&mut self, n: usize) -> &mut Self {
        self.output_captured.resize(n, false);
        self
    }

    pub fn output_captured(&mut self, i: usize, captured: bool) -> &mut Self {
        if let Some(slot) = self.output_captured.get_mut(i) {
            *slot = captured;
        }
        self
    }

    pub fn backward<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> + 'static,
    {
        self.backward = Some(Rc::new(f));
        self
    }

    /// `None` when no backward was set or no input has a gradient.
    pub fn finish(self) -> Option<CustomBackward> {
        let backward = self.backward?;
        if !self.input_has_grad.iter().any(|&h| h) {
            return None;
        }
        Some(CustomBackward {
            input_has_grad: self.input_has_grad,
            output_captured: self.output_captured,
            backward,
        })
    }
}

thread_local! {
    static OVERRIDES_ENABLED: Cell<bool> = const { Cell::new(true) };
}

pub(crate) fn overrides_enabled() -> bool {
    OVERRIDES_ENABLED.with(|e| e.get())
}

pub struct OverrideGuard {
    prev: bool,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        OVERRIDES_ENABLED.with(|e| e.set(self.prev));
    }
}

/// Routes every recorded op through the generic backward path while alive.
pub fn disable_grad_overrides() -> OverrideGuard {
    let prev = OVERRIDES_ENABLED.with(|e| e.replace(false));
    OverrideGuard { prev }
}

static REGISTRY: LazyLock<FxHashMap<OpKind, GradRule>> = LazyLock::new(|| {
    let mut rules: FxHashMap<OpKind, GradRule> = FxHashMap::default();
    rules.insert(OpKind::Elemwise, elemwise_rule);
    rules.insert(OpKind::Reshape, reshape_rule);
    rules.insert(OpKind::Subtensor, subtensor_rule);
    rules.insert(OpKind::IndexingMultiAxisVec, indexing_rule);
    rules.insert(OpKind::Reduce, reduce_rule);
    rules.insert(OpKind::AddAxis, axis_rule);
    rules.insert(OpKind::RemoveAxis, axis_rule);
    rules
});

pub(crate) fn grad_rule(kind: OpKind) -> Option<GradRule> {
    REGISTRY.get(&kind).copied()
}

fn shape_of(x: &Tensor) -> Result<Tensor> {
    apply_single(&Op::GetVarShape, std::slice::from_ref(x))
}

fn zeros(shape: &Tensor, dtype: DType) -> Result<Tensor> {
    apply_single(&Op::fill(0.0, dtype), std::slice::from_ref(shape))
}

fn first_grad(grads: &[Option<Tensor>]) -> Option<Tensor> {
    grads.first().cloned().flatten()
}

/// ADD only; shapes are taken now and each gradient reduced back to them.
fn elemwise_rule(op: &Op, inputs: &[Tensor], maker: &mut CustomBackwardMaker) -> Result<Option<Vec<Tensor>>> {
    if !matches!(op, Op::Elemwise { mode: ElemwiseMode::Add }) {
        return Ok(None);
    }
    let outputs = apply(op, inputs)?;

    let shapes = inputs
        .iter()
        .enumerate()
        .map(|(i, x)| maker.input_requires_grad(i).then(|| shape_of(x)).transpose())
        .collect::<Result<Vec<_>>>()?;

    maker.output_size(outputs.len()).output_captured(0, false);
    maker.backward(move |grads| {
        let Some(g) = first_grad(grads) else {
            return Ok(vec![None; shapes.len()]);
        };
        shapes
            .iter()
            .map(|shape| shape.as_ref().map(|s| apply_single(&Op::sum(None), &[g.clone(), s.clone()])).transpose())
            .collect()
    });
    Ok(Some(outputs))
}

fn reshape_rule(op: &Op, inputs: &[Tensor], maker: &mut CustomBackwardMaker) -> Result<Option<Vec<Tensor>>> {
    let Some(x) = inputs.first() else {
        return Ok(None);
    };
    let outputs = apply(op, inputs)?;
    let shape = shape_of(x)?;

    maker.input_has_grad(1, false);
    maker.output_size(1).output_captured(0, false);
    maker.backward(move |grads| {
        let dx = first_grad(grads).map(|g| apply_single(&Op::Reshape, &[g, shape.clone()])).transpose()?;
        Ok(vec![dx, None])
    });
    Ok(Some(outputs))
}

fn subtensor_rule(op: &Op, inputs: &[Tensor], maker: &mut CustomBackwardMaker) -> Result<Option<Vec<Tensor>>> {
    let (Op::Subtensor { items }, Some(x)) = (op, inputs.first()) else {
        return Ok(None);
    };
    let outputs = apply(op, inputs)?;
    let shape = shape_of(x)?;
    let dtype = x.dtype();
    let items = items.clone();

    maker.output_size(1).output_captured(0, false);
    maker.backward(move |grads| {
        let dx = first_grad(grads)
            .map(|g| apply_single(&Op::SetSubtensor { items: items.clone() }, &[zeros(&shape, dtype)?, g]))
            .transpose()?;
        Ok(vec![dx])
    });
    Ok(Some(outputs))
}

fn indexing_rule(op: &Op, inputs: &[Tensor], maker: &mut CustomBackwardMaker) -> Result<Option<Vec<Tensor>>> {
    let (Op::IndexingMultiAxisVec { axes }, Some(x)) = (op, inputs.first()) else {
        return Ok(None);
    };
    let outputs = apply(op, inputs)?;
    let shape = shape_of(x)?;
    let dtype = x.dtype();
    let axes = axes.clone();
    let index: Vec<Tensor> = inputs[1..].iter().map(Tensor::copy).collect();
    let nargs = inputs.len();

    for i in 1..nargs {
        maker.input_has_grad(i, false);
    }
    maker.output_size(1).output_captured(0, false);
    maker.backward(move |grads| {
        let mut result = vec![None; nargs];
        if let Some(g) = first_grad(grads) {
            let mut args = vec![zeros(&shape, dtype)?, g];
            args.extend(index.iter().cloned());
            result[0] = Some(apply_single(&Op::IndexingSetMultiAxisVec { axes: axes.clone() }, &args)?);
        }
        Ok(result)
    });
    Ok(Some(outputs))
}

/// Plain SUM over one input; MAX and reductions to a target shape decline.
fn reduce_rule(op: &Op, inputs: &[Tensor], maker: &mut CustomBackwardMaker) -> Result<Option<Vec<Tensor>>> {
    let (Op::Reduce { mode: ReduceMode::Sum, .. }, [x]) = (op, inputs) else {
        return Ok(None);
    };
    let outputs = apply(op, inputs)?;
    let shape = shape_of(x)?;

    maker.output_size(1).output_captured(0, false);
    maker.backward(move |grads| {
        let dx = first_grad(grads).map(|g| apply_single(&Op::Broadcast, &[g, shape.clone()])).transpose()?;
        Ok(vec![dx])
    });
    Ok(Some(outputs))
}

/// AddAxis and RemoveAxis, each undone by the other.
fn axis_rule(op: &Op, inputs: &[Tensor], maker: &mut CustomBackwardMaker) -> Result<Option<Vec<Tensor>>> {
    let Some(inverse) = op.axis_inverse() else {
        return Ok(None);
    };
    let outputs = apply(op, inputs)?;

    maker.output_size(1).output_captured(0, false);
    maker.backward(move |grads| {
        let dx = first_grad(grads).map(|g| apply_single(&inverse, &[g])).transpose()?;
        Ok(vec![dx])
    });
    Ok(Some(outputs))
}
