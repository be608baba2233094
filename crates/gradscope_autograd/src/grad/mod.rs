//! Gradient keys, tape nodes and the per-tensor linkage between them.
//!
//! A [`GradKey`] owns its tape only weakly. Nodes are kept alive by the
//! tensors whose gradient they produce and by the nodes consuming those
//! gradients, so dropping every tensor of a computation frees its nodes.

pub(crate) mod info;
mod key;
mod node;
mod record;
mod store;

pub use key::{enable_higher_order, GradKey, HigherOrderGuard};
pub use node::WeakGradFn;
pub use store::GradStore;

pub(crate) use record::apply_grad;
