use super::apply_single;
use crate::Tensor;
use gradscope_core::{
    error::Result,
    op::{Op, ReduceMode},
};

impl Tensor {
    /// Sums along `dim`, keeping it with extent 1.
    pub fn sum(&self, dim: usize) -> Result<Tensor> {
        apply_single(&Op::sum(Some(dim)), std::slice::from_ref(self))
    }

    /// Sums every element into a 0-dim tensor.
    pub fn sum_all(&self) -> Result<Tensor> {
        apply_single(&Op::sum(None), std::slice::from_ref(self))
    }

    /// Sums broadcast axes away until the result has `shape`.
    pub fn sum_to_shape(&self, shape: &[usize]) -> Result<Tensor> {
        self.sum_to(&Tensor::shape_tensor(shape)?)
    }

    /// Like [`Tensor::sum_to_shape`] with the shape given as a tensor.
    pub fn sum_to(&self, shape: &Tensor) -> Result<Tensor> {
        apply_single(&Op::sum(None), &[self.clone(), shape.clone()])
    }

    pub fn max(&self, dim: usize) -> Result<Tensor> {
        let op = Op::Reduce {
            mode: ReduceMode::Max,
            axis: Some(dim),
        };
        apply_single(&op, std::slice::from_ref(self))
    }

    pub fn max_all(&self) -> Result<Tensor> {
        let op = Op::Reduce {
            mode: ReduceMode::Max,
            axis: None,
        };
        apply_single(&op, std::slice::from_ref(self))
    }
}
