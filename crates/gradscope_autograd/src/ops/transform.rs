use super::apply_single;
use crate::Tensor;
use gradscope_core::{
    dtype::DType,
    error::Result,
    op::{FillValue, Op},
};

impl Tensor {
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        self.reshape_to(&Tensor::shape_tensor(shape)?)
    }

    pub fn reshape_to(&self, shape: &Tensor) -> Result<Tensor> {
        apply_single(&Op::Reshape, &[self.clone(), shape.clone()])
    }

    pub fn broadcast(&self, shape: &[usize]) -> Result<Tensor> {
        self.broadcast_to(&Tensor::shape_tensor(shape)?)
    }

    pub fn broadcast_to(&self, shape: &Tensor) -> Result<Tensor> {
        apply_single(&Op::Broadcast, &[self.clone(), shape.clone()])
    }

    /// The runtime shape as a 1-D `I64` tensor.
    pub fn shape_of(&self) -> Result<Tensor> {
        apply_single(&Op::GetVarShape, std::slice::from_ref(self))
    }

    /// A tensor of extents `shape` filled with `value`.
    pub fn fill(shape: &Tensor, value: f64, dtype: DType) -> Result<Tensor> {
        let op = Op::Fill {
            value: FillValue(value),
            dtype,
        };
        apply_single(&op, std::slice::from_ref(shape))
    }

    /// Inserts unit axes, each index referring to the shape built so far.
    pub fn add_axis(&self, axis: &[usize]) -> Result<Tensor> {
        apply_single(&Op::AddAxis { axis: axis.to_vec() }, std::slice::from_ref(self))
    }

    /// Removes unit axes, each index referring to the shape left so far.
    pub fn remove_axis(&self, axis: &[usize]) -> Result<Tensor> {
        apply_single(&Op::RemoveAxis { axis: axis.to_vec() }, std::slice::from_ref(self))
    }

    pub fn unsqueeze(&self, dim: usize) -> Result<Tensor> {
        self.add_axis(&[dim])
    }

    pub fn squeeze(&self, dim: usize) -> Result<Tensor> {
        self.remove_axis(&[dim])
    }

    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor> {
        apply_single(&Op::TypeCvt { dtype }, std::slice::from_ref(self))
    }

    /// A new handle over the same value, without running a kernel.
    pub fn identity(&self) -> Result<Tensor> {
        apply_single(&Op::FastpathCopy, std::slice::from_ref(self))
    }
}
