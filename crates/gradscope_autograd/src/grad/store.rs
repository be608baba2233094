use super::GradKey;
use crate::{Tensor, TensorId};
use gradscope_core::error::Result;
use rustc_hash::FxHashMap;
use std::{cell::RefCell, rc::Rc};

/// Collects the gradients delivered to attached tensors, keyed by tensor id.
#[derive(Clone, Default)]
pub struct GradStore {
    grads: Rc<RefCell<FxHashMap<TensorId, Tensor>>>,
}

impl GradStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `tensor` to `key` and stores its gradient once backward finalizes it.
    pub fn attach(&self, key: &GradKey, tensor: &Tensor) -> Result<()> {
        let grads = self.grads.clone();
        let id = tensor.id();
        key.attach_with_callback(tensor, move |grad| {
            grads.borrow_mut().insert(id, grad);
        })
    }

    pub fn get(&self, tensor: &Tensor) -> Option<Tensor> {
        self.grads.borrow().get(&tensor.id()).cloned()
    }

    pub fn take(&self, tensor: &Tensor) -> Option<Tensor> {
        self.grads.borrow_mut().remove(&tensor.id())
    }

    pub fn len(&self) -> usize {
        self.grads.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.borrow().is_empty()
    }
}
