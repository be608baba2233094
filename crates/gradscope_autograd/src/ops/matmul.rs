use super::apply_single;
use crate::Tensor;
use gradscope_core::{error::Result, op::Op};

impl Tensor {
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.matmul_t(rhs, false, false)
    }

    /// `op(self) · op(rhs)` where `op` transposes when its flag is set.
    pub fn matmul_t(&self, rhs: &Tensor, transpose_a: bool, transpose_b: bool) -> Result<Tensor> {
        let op = Op::MatMul {
            transpose_a,
            transpose_b,
        };
        apply_single(&op, &[self.clone(), rhs.clone()])
    }
}
