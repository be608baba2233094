use super::apply_single;
use crate::Tensor;
use gradscope_core::{
    error::Result,
    op::{AxisSlice, Op},
};

impl Tensor {
    /// Basic slicing: every item slices or indexes one axis.
    pub fn subtensor(&self, items: &[AxisSlice]) -> Result<Tensor> {
        apply_single(&Op::Subtensor { items: items.to_vec() }, std::slice::from_ref(self))
    }

    /// Copy of `self` with the sliced region replaced by `value`, broadcast as needed.
    pub fn set_subtensor(&self, items: &[AxisSlice], value: &Tensor) -> Result<Tensor> {
        apply_single(&Op::SetSubtensor { items: items.to_vec() }, &[self.clone(), value.clone()])
    }

    /// Advanced indexing with one integer index tensor per axis in `axes`.
    pub fn index_select(&self, axes: &[usize], indices: &[Tensor]) -> Result<Tensor> {
        let mut inputs = Vec::with_capacity(indices.len() + 1);
        inputs.push(self.clone());
        inputs.extend_from_slice(indices);
        apply_single(&Op::IndexingMultiAxisVec { axes: axes.to_vec() }, &inputs)
    }

    /// Copy of `self` with the indexed elements replaced by `value`.
    pub fn index_set(&self, axes: &[usize], value: &Tensor, indices: &[Tensor]) -> Result<Tensor> {
        let mut inputs = Vec::with_capacity(indices.len() + 2);
        inputs.push(self.clone());
        inputs.push(value.clone());
        inputs.extend_from_slice(indices);
        apply_single(&Op::IndexingSetMultiAxisVec { axes: axes.to_vec() }, &inputs)
    }
}
