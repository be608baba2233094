pub use crate::autograd::{
    apply, disable_grad_overrides, enable_higher_order, no_grad, scope, GradKey, GradStore, Tensor,
};
pub use crate::core::{
    device::{get_default_device, set_default_device, Device},
    dtype::*,
    error::{Error, Result},
    op::Op,
};
