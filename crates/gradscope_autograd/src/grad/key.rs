use super::{
    info::GradInfo,
    node::{GradBackward, GradFn, GradSlotPtr},
    record::accum_grad,
    WeakGradFn,
};
use crate::{Tensor, TensorFlags, TensorInner};
use gradscope_core::error::{Error, Result};
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    sync::atomic::{AtomicUsize, Ordering},
};

static KEY_COUNTER: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static LIVE_KEYS: Cell<i32> = const { Cell::new(0) };
    static MIN_PRIORITY: Cell<i32> = const { Cell::new(i32::MIN) };
    static HIGHER_ORDER: Cell<bool> = const { Cell::new(false) };
}

/// Keys with a priority below this are blocked from recording.
pub(crate) fn min_priority() -> i32 {
    MIN_PRIORITY.with(|p| p.get())
}

pub(crate) fn higher_order_enabled() -> bool {
    HIGHER_ORDER.with(|h| h.get())
}

struct PriorityGuard {
    prev: i32,
}

impl PriorityGuard {
    fn raise(min: i32) -> Self {
        let prev = MIN_PRIORITY.with(|p| p.replace(p.get().max(min)));
        Self { prev }
    }
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        MIN_PRIORITY.with(|p| p.set(self.prev));
    }
}

pub struct HigherOrderGuard {
    prev: bool,
}

impl Drop for HigherOrderGuard {
    fn drop(&mut self) {
        HIGHER_ORDER.with(|h| h.set(self.prev));
    }
}

/// Lets one operation record onto several active keys at once.
pub fn enable_higher_order() -> HigherOrderGuard {
    let prev = HIGHER_ORDER.with(|h| h.replace(true));
    HigherOrderGuard { prev }
}

pub(crate) struct GradKeyInner {
    id: usize,
    name: RefCell<String>,
    priority: Cell<i32>,
    active: Cell<bool>,
    pub(crate) tape: RefCell<Vec<Weak<GradFn>>>,
    pub(crate) free_vars: RefCell<Vec<Weak<TensorInner>>>,
}

impl GradKeyInner {
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority.get()
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.priority.get() < min_priority()
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Remembers `tensor` for unlinking at cleanup.
    ///
    /// Entries of dropped tensors are pruned whenever the list would grow.
    pub(crate) fn track(&self, tensor: &Tensor) {
        let mut vars = self.free_vars.borrow_mut();
        if vars.len() == vars.capacity() {
            vars.retain(|v| v.strong_count() > 0);
        }
        vars.push(Rc::downgrade(tensor.inner()));
    }

    /// Marks the key finalized, forgets the tape and unlinks every tensor it tracked.
    fn cleanup(&self) {
        self.active.set(false);
        let tape = std::mem::take(&mut *self.tape.borrow_mut());
        drop(tape);

        let free_vars = std::mem::take(&mut *self.free_vars.borrow_mut());
        let this = self as *const GradKeyInner;
        let mut released: Vec<GradSlotPtr> = Vec::with_capacity(free_vars.len());
        for var in free_vars.iter().filter_map(Weak::upgrade) {
            let Ok(mut info) = var.grad_info.try_borrow_mut() else {
                log::warn!(
                    "{}: tensor {:?} is borrowed during cleanup, its linkage is pruned lazily",
                    self.name.borrow(),
                    var.id
                );
                continue;
            };
            if let Some(slot) = info.remove_ptr(this) {
                released.push(slot);
            }
            let stale: Vec<GradInfo> = info.shrink();
            let empty = info.is_empty();
            drop(info);
            drop(stale);
            if empty {
                Tensor::from_inner(var).clear_flags(TensorFlags::GRAD);
            }
        }
        drop(released);
    }
}

impl Drop for GradKeyInner {
    fn drop(&mut self) {
        self.cleanup();
        let _ = LIVE_KEYS.try_with(|n| n.set(n.get() - 1));
    }
}

struct CleanupGuard<'a>(&'a GradKeyInner);

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.0.cleanup();
    }
}

/// A scope that records differentiable operations and replays them backward once.
///
/// Clones share the same key.
#[derive(Clone)]
pub struct GradKey(pub(crate) Rc<GradKeyInner>);

impl Default for GradKey {
    fn default() -> Self {
        Self::new()
    }
}

impl GradKey {
    /// New active key. Its priority is below every key already alive on this
    /// thread, so outer scopes outrank inner ones.
    pub fn new() -> Self {
        let live = LIVE_KEYS.with(|n| n.get());
        Self::with_priority(-live)
    }

    pub fn with_priority(priority: i32) -> Self {
        LIVE_KEYS.with(|n| n.set(n.get() + 1));
        let id = KEY_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(Rc::new(GradKeyInner {
            id,
            name: RefCell::new(format!("key{}", id)),
            priority: Cell::new(priority),
            active: Cell::new(true),
            tape: RefCell::new(Vec::new()),
            free_vars: RefCell::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.0.name.borrow_mut() = name.into();
    }

    pub fn priority(&self) -> i32 {
        self.0.priority()
    }

    pub fn set_priority(&self, priority: i32) {
        self.0.priority.set(priority);
    }

    pub fn is_active(&self) -> bool {
        self.0.is_active()
    }

    /// Tape entries whose node is still alive.
    pub fn tape_len(&self) -> usize {
        self.0.tape.borrow().iter().filter(|w| w.strong_count() > 0).count()
    }

    /// Weak observers of every node recorded so far, in recording order.
    pub fn tape_nodes(&self) -> Vec<WeakGradFn> {
        self.0.tape.borrow().iter().map(|w| WeakGradFn(w.clone())).collect()
    }

    /// Starts tracking `tensor` under this key.
    pub fn attach(&self, tensor: &Tensor) -> Result<()> {
        self.attach_slot(tensor).map(|_| ())
    }

    /// Starts tracking `tensor` and calls `callback` with its gradient once
    /// every contribution to it has been accumulated during [`GradKey::backward`].
    pub fn attach_with_callback<F>(&self, tensor: &Tensor, callback: F) -> Result<()>
    where
        F: FnMut(Tensor) + 'static,
    {
        let slot = self.attach_slot(tensor)?;
        if slot.has_callback() {
            return Err(Error::CallbackAlreadySet);
        }
        slot.set_callback(Box::new(callback))
    }

    fn attach_slot(&self, tensor: &Tensor) -> Result<GradSlotPtr> {
        if !self.0.is_active() {
            return Err(Error::GradKeyFinalized);
        }
        if let Some(slot) = tensor.grad_info().get(&self.0) {
            return Ok(slot.clone());
        }

        let grad_fn = Rc::new(GradFn::new(Rc::downgrade(&self.0), 1, GradBackward::Empty));
        let slot = GradSlotPtr::new(grad_fn, 0);
        tensor.grad_info_mut().insert(&self.0, slot.clone());
        tensor.set_flags(TensorFlags::GRAD);
        self.0.track(tensor);
        Ok(slot)
    }

    /// Seeds `grads` at `tensors` and replays the tape in reverse.
    ///
    /// The key is finalized on entry and cleaned up on every exit path, so a
    /// key can run backward only once.
    pub fn backward(&self, tensors: &[Tensor], grads: &[Tensor]) -> Result<()> {
        let inner = &*self.0;
        if !inner.is_active() {
            return Err(Error::GradKeyFinalized);
        }
        if tensors.len() != grads.len() {
            return Err(Error::TensorGradCountMismatch {
                tensors: tensors.len(),
                grads: grads.len(),
            });
        }

        inner.active.set(false);
        let _cleanup = CleanupGuard(inner);
        let _priority = PriorityGuard::raise(inner.priority().saturating_add(1));

        let tape = inner.tape.borrow().clone();
        log::debug!("{}: backward over {} recorded nodes", inner.name.borrow(), tape.len());

        let mut ref_keeper: Vec<Rc<GradFn>> = Vec::with_capacity(tape.len());
        let mut seeded: Vec<GradSlotPtr> = Vec::with_capacity(tensors.len());
        for (tensor, grad) in tensors.iter().zip(grads) {
            let slot = tensor.grad_info().get(&self.0).cloned();
            let Some(slot) = slot else {
                continue;
            };
            slot.set_grad(grad.clone())?;
            if !slot.grad_fn.in_ref_keeper.replace(true) {
                ref_keeper.push(slot.grad_fn.clone());
            }
            if !seeded.iter().any(|s| s.same_slot(&slot)) {
                seeded.push(slot);
            }
        }
        // nothing recorded will feed these, the seed is already final
        for slot in &seeded {
            slot.finalize_if_last();
        }

        for (pos, node) in tape.iter().enumerate().rev() {
            let Some(grad_fn) = node.upgrade() else {
                continue;
            };
            log::trace!("{}: replaying node {}", inner.name.borrow(), pos);

            let backward = grad_fn.backward.borrow().clone();
            let input_grads = backward.run(&grad_fn.slot_grads())?;

            for (i, grad) in input_grads.into_iter().enumerate() {
                let Some(grad) = grad else {
                    continue;
                };
                let dst = grad_fn.dsts.borrow().get(i).and_then(|d| d.as_ref().map(|p| p.ptr.clone()));
                if let Some(dst) = dst {
                    accum_grad(&dst, grad)?;
                }
            }

            let dsts = std::mem::take(&mut *grad_fn.dsts.borrow_mut());
            let mut landed: Vec<GradSlotPtr> = Vec::with_capacity(dsts.len());
            for dst in dsts.iter().flatten() {
                let dst_fn = &dst.ptr.grad_fn;
                // once this node is cleared the producer may lose its last owner
                if !dst_fn.in_ref_keeper.replace(true) {
                    ref_keeper.push(dst_fn.clone());
                }
                if !landed.iter().any(|l| l.same_slot(&dst.ptr)) {
                    landed.push(dst.ptr.clone());
                }
            }
            drop(dsts);
            grad_fn.clear();

            for slot in &landed {
                slot.finalize_if_last();
            }
        }
        log::debug!("{}: backward finished", inner.name.borrow());
        Ok(())
    }
}

impl std::fmt::Debug for GradKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GradKey")
            .field("name", &*self.0.name.borrow())
            .field("priority", &self.0.priority())
            .field("active", &self.0.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_outputs_do_not_pile_up() -> Result<()> {
        let x = Tensor::new(vec![0.5f32, 1.0])?;
        let key = GradKey::new();
        key.attach(&x)?;

        for _ in 0..200 {
            let y = x.exp()?;
            assert!(y.is_grad_tracked());
        }
        let tracked = key.0.free_vars.borrow().len();
        assert!(tracked < 16, "{} tensors still tracked", tracked);
        Ok(())
    }

    #[test]
    fn cleanup_unlinks_live_tensors() -> Result<()> {
        let x = Tensor::new(vec![1.0f32])?;
        let key = GradKey::new();
        key.attach(&x)?;
        let y = x.neg()?;
        assert_eq!(y.linkage_count(), 1);

        drop(key);
        assert_eq!(x.linkage_count(), 0);
        assert_eq!(y.linkage_count(), 0);
        assert!(!x.is_grad_tracked());
        assert!(!y.is_grad_tracked());
        Ok(())
    }
}
