use super::key::GradKeyInner;
use crate::{
    backward_graph::closure::BackwardGraphWithClosure, grad_override::CustomBackward, Tensor,
};
use gradscope_core::error::{Error, Result};
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

pub(crate) type GradCallback = Box<dyn FnMut(Tensor)>;

#[derive(Default)]
pub(crate) struct GradSlot {
    pub(crate) grad: Option<Tensor>,
    pub(crate) callback: Option<GradCallback>,
}

/// How a node turns output gradients into input gradients.
#[derive(Clone, Default)]
pub(crate) enum GradBackward {
    #[default]
    Empty,
    Graph(Rc<BackwardGraphWithClosure>),
    Custom(Rc<CustomBackward>),
}

impl GradBackward {
    pub(crate) fn input_has_grad(&self, i: usize) -> bool {
        match self {
            Self::Empty => false,
            Self::Graph(g) => g.input_has_grad(i),
            Self::Custom(c) => c.input_has_grad(i),
        }
    }

    pub(crate) fn output_requires_grad(&self, i: usize) -> bool {
        match self {
            Self::Empty => false,
            Self::Graph(g) => g.output_requires_grad(i),
            Self::Custom(c) => c.output_requires_grad(i),
        }
    }

    pub(crate) fn output_captured(&self, i: usize) -> bool {
        match self {
            Self::Empty => false,
            Self::Graph(g) => g.output_captured(i),
            Self::Custom(c) => c.output_captured(i),
        }
    }

    /// One entry per forward input; `None` means no contribution.
    pub(crate) fn run(&self, grads: &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> {
        match self {
            Self::Empty => Err(Error::InvalidState("replaying a node without backward".into())),
            Self::Graph(g) => g.run(grads),
            Self::Custom(c) => c.run(grads),
        }
    }
}

/// One forward op's contribution to one key's tape.
pub(crate) struct GradFn {
    pub(crate) key: RefCell<Weak<GradKeyInner>>,
    /// one per forward output
    pub(crate) slots: RefCell<Vec<GradSlot>>,
    /// live producer count per slot, maintained by [`GradSlotProducerPtr`]
    producers: Box<[Cell<usize>]>,
    /// one per forward input
    pub(crate) dsts: RefCell<Vec<Option<GradSlotProducerPtr>>>,
    pub(crate) backward: RefCell<GradBackward>,
    pub(crate) in_ref_keeper: Cell<bool>,
}

impl GradFn {
    pub(crate) fn new(key: Weak<GradKeyInner>, num_slots: usize, backward: GradBackward) -> Self {
        Self {
            key: RefCell::new(key),
            slots: RefCell::new((0..num_slots).map(|_| GradSlot::default()).collect()),
            producers: (0..num_slots).map(|_| Cell::new(0)).collect(),
            dsts: RefCell::new(Vec::new()),
            backward: RefCell::new(backward),
            in_ref_keeper: Cell::new(false),
        }
    }

    pub(crate) fn key(&self) -> Option<Rc<GradKeyInner>> {
        self.key.borrow().upgrade()
    }

    pub(crate) fn slot_grads(&self) -> Vec<Option<Tensor>> {
        self.slots.borrow().iter().map(|s| s.grad.clone()).collect()
    }

    pub(crate) fn producer_count(&self, idx: usize) -> usize {
        self.producers.get(idx).map(Cell::get).unwrap_or(0)
    }

    /// Releases everything the node holds once its tape position is consumed.
    ///
    /// Contents are moved out before being dropped so no borrow is held while
    /// other nodes are freed.
    pub(crate) fn clear(&self) {
        let _key = self.key.replace(Weak::new());
        let _slots = std::mem::take(&mut *self.slots.borrow_mut());
        let _dsts = std::mem::take(&mut *self.dsts.borrow_mut());
        let _backward = std::mem::take(&mut *self.backward.borrow_mut());
    }
}

/// Points at one output slot of a node.
#[derive(Clone)]
pub(crate) struct GradSlotPtr {
    pub(crate) grad_fn: Rc<GradFn>,
    pub(crate) idx: usize,
}

impl GradSlotPtr {
    pub(crate) fn new(grad_fn: Rc<GradFn>, idx: usize) -> Self {
        Self { grad_fn, idx }
    }

    pub(crate) fn grad(&self) -> Option<Tensor> {
        self.grad_fn.slots.borrow().get(self.idx).and_then(|s| s.grad.clone())
    }

    pub(crate) fn set_grad(&self, grad: Tensor) -> Result<()> {
        let previous = {
            let mut slots = self.grad_fn.slots.borrow_mut();
            let slot = slots
                .get_mut(self.idx)
                .ok_or_else(|| Error::InvalidState("gradient slot already released".into()))?;
            slot.grad.replace(grad)
        };
        drop(previous);
        Ok(())
    }

    pub(crate) fn has_callback(&self) -> bool {
        self.grad_fn
            .slots
            .borrow()
            .get(self.idx)
            .map(|s| s.callback.is_some())
            .unwrap_or(false)
    }

    pub(crate) fn set_callback(&self, callback: GradCallback) -> Result<()> {
        let mut slots = self.grad_fn.slots.borrow_mut();
        let slot = slots
            .get_mut(self.idx)
            .ok_or_else(|| Error::InvalidState("gradient slot already released".into()))?;
        if slot.callback.is_some() {
            return Err(Error::CallbackAlreadySet);
        }
        slot.callback = Some(callback);
        Ok(())
    }

    /// Delivers the accumulated gradient once no producer of this slot is left.
    pub(crate) fn finalize_if_last(&self) {
        if self.grad_fn.producer_count(self.idx) != 0 {
            return;
        }
        let Some(grad) = self.grad() else {
            return;
        };
        // the callback runs without any borrow held, it may dispatch ops
        let callback = self
            .grad_fn
            .slots
            .borrow_mut()
            .get_mut(self.idx)
            .and_then(|s| s.callback.take());
        if let Some(mut callback) = callback {
            callback(grad);
            if let Some(slot) = self.grad_fn.slots.borrow_mut().get_mut(self.idx) {
                slot.callback.get_or_insert(callback);
            }
        }
    }

    pub(crate) fn same_slot(&self, other: &GradSlotPtr) -> bool {
        Rc::ptr_eq(&self.grad_fn, &other.grad_fn) && self.idx == other.idx
    }
}

/// A slot pointer that counts as one pending producer of that slot while alive.
pub(crate) struct GradSlotProducerPtr {
    pub(crate) ptr: GradSlotPtr,
}

impl GradSlotProducerPtr {
    pub(crate) fn new(ptr: GradSlotPtr) -> Self {
        if let Some(count) = ptr.grad_fn.producers.get(ptr.idx) {
            count.set(count.get() + 1);
        }
        Self { ptr }
    }
}

impl Drop for GradSlotProducerPtr {
    fn drop(&mut self) {
        if let Some(count) = self.ptr.grad_fn.producers.get(self.ptr.idx) {
            count.set(count.get().saturating_sub(1));
        }
    }
}

/// Weak observer of a tape node, for liveness checks.
#[derive(Clone)]
pub struct WeakGradFn(pub(crate) Weak<GradFn>);

impl WeakGradFn {
    /// Whether the node is still reachable from anything.
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}
