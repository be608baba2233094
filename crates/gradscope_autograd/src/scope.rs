//! A thread-local stack of gradient keys, for callers that only ever
//! differentiate through the innermost open scope.

use crate::{GradKey, Tensor};
use gradscope_core::error::{Error, Result};
use std::cell::RefCell;

thread_local! {
    static SCOPES: RefCell<Vec<GradKey>> = const { RefCell::new(Vec::new()) };
}

/// Opens a new innermost scope backed by a fresh key.
pub fn start_scope() -> GradKey {
    let key = GradKey::new();
    SCOPES.with(|s| s.borrow_mut().push(key.clone()));
    log::debug!("started scope {}", key.name());
    key
}

/// Closes the innermost scope. Its key is finalized once the last clone is dropped.
pub fn end_scope() -> Option<GradKey> {
    let key = SCOPES.with(|s| s.borrow_mut().pop());
    if let Some(key) = &key {
        log::debug!("ended scope {}", key.name());
    }
    key
}

pub fn current_scope() -> Option<GradKey> {
    SCOPES.with(|s| s.borrow().last().cloned())
}

pub fn scope_depth() -> usize {
    SCOPES.with(|s| s.borrow().len())
}

fn require_scope() -> Result<GradKey> {
    current_scope().ok_or_else(|| Error::InvalidState("no gradient scope is open".into()))
}

/// Tracks `tensor` in the innermost scope and hands its gradient to `callback`.
pub fn attach<F>(tensor: &Tensor, callback: F) -> Result<()>
where
    F: FnMut(Tensor) + 'static,
{
    require_scope()?.attach_with_callback(tensor, callback)
}

/// Runs the innermost scope backward from `tensor`, seeded with ones.
pub fn backward(tensor: &Tensor) -> Result<()> {
    let key = require_scope()?;
    let seed = Tensor::ones_like(tensor)?;
    key.backward(std::slice::from_ref(tensor), &[seed])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_nest() {
        assert!(current_scope().is_none());
        let outer = start_scope();
        let inner = start_scope();
        assert_eq!(scope_depth(), 2);
        assert_eq!(current_scope().map(|k| k.id()), Some(inner.id()));
        assert!(outer.priority() > inner.priority());

        assert_eq!(end_scope().map(|k| k.id()), Some(inner.id()));
        assert_eq!(current_scope().map(|k| k.id()), Some(outer.id()));
        end_scope();
        assert!(end_scope().is_none());
    }

    #[test]
    fn attach_without_scope_fails() -> Result<()> {
        let t = Tensor::ones(&[2])?;
        assert!(matches!(attach(&t, |_| {}), Err(Error::InvalidState(_))));
        Ok(())
    }
}
