use super::expect_inputs;
use crate::{
    error::{Error, Result},
    host::HostTensor,
};
use gradscope_cpu::ops::matmul as kernel;

pub fn matmul(transpose_a: bool, transpose_b: bool, inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("matmul", inputs, 2)?;
    let (a, b) = (inputs[0], inputs[1]);
    if a.ndim() != 2 || b.ndim() != 2 {
        return Err(Error::InvalidShape {
            message: format!("matmul expects 2-D operands, got {:?} and {:?}", a.shape(), b.shape()),
        });
    }

    let (ar, ac) = (a.shape()[0], a.shape()[1]);
    let (br, bc) = (b.shape()[0], b.shape()[1]);
    let (m, k, a_strides) = if transpose_a { (ac, ar, [1, ac]) } else { (ar, ac, [ac, 1]) };
    let (k2, n, b_strides) = if transpose_b { (bc, br, [1, bc]) } else { (br, bc, [bc, 1]) };
    if k != k2 {
        return Err(Error::IncompatibleShape(format!(
            "matmul inner dimensions differ: {:?}{} x {:?}{}",
            a.shape(),
            if transpose_a { "^T" } else { "" },
            b.shape(),
            if transpose_b { "^T" } else { "" },
        )));
    }

    let data = zip_arith!(a.data(), b.data(), (x, y) => kernel::matmul(m, k, n, x, a_strides, y, b_strides));
    HostTensor::from_data(data, &[m, n])
}
