use super::apply_single;
use crate::Tensor;
use gradscope_core::{
    error::Result,
    op::{ElemwiseMode, Op},
};

macro_rules! unary_op {
    ($($name:ident => $mode:ident),* $(,)?) => {
        impl Tensor {
            $(
                pub fn $name(&self) -> Result<Tensor> {
                    apply_single(&Op::elemwise(ElemwiseMode::$mode), std::slice::from_ref(self))
                }
            )*
        }
    };
}

unary_op! {
    neg => Neg,
    exp => Exp,
    log => Log,
    sin => Sin,
    cos => Cos,
    relu => Relu,
}
