use super::apply_single;
use crate::Tensor;
use gradscope_core::{
    error::Result,
    op::{ElemwiseMode, Op},
};

macro_rules! binary_op {
    ($($name:ident => $mode:ident),* $(,)?) => {
        impl Tensor {
            $(
                pub fn $name(&self, rhs: &Tensor) -> Result<Tensor> {
                    apply_single(&Op::elemwise(ElemwiseMode::$mode), &[self.clone(), rhs.clone()])
                }
            )*
        }
    };
}

binary_op! {
    add => Add,
    sub => Sub,
    mul => Mul,
    div => Div,
}

impl Tensor {
    /// `grad` where `self > 0`, zero elsewhere.
    pub fn relu_grad(&self, grad: &Tensor) -> Result<Tensor> {
        apply_single(&Op::elemwise(ElemwiseMode::ReluGrad), &[self.clone(), grad.clone()])
    }
}
