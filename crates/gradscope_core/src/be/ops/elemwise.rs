use super::expect_inputs;
use crate::{
    error::{Error, Result},
    host::{HostData, HostTensor},
    layout::Layout,
    op::ElemwiseMode,
};
use gradscope_cpu::{
    ops::{binary, unary},
    utils::broadcast_strides,
};

pub fn elemwise(mode: ElemwiseMode, inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs(mode.as_str(), inputs, mode.arity())?;
    match mode.arity() {
        1 => {
            let x = inputs[0];
            HostTensor::from_data(unary_data(mode, x.data())?, x.shape())
        }
        _ => binary_tensor(mode, inputs[0], inputs[1]),
    }
}

fn unary_data(mode: ElemwiseMode, data: &HostData) -> Result<HostData> {
    Ok(match mode {
        ElemwiseMode::Neg => map_arith!(data, v => unary::neg(v)),
        ElemwiseMode::Exp => map_arith!(data, v => unary::exp(v)),
        ElemwiseMode::Log => map_arith!(data, v => unary::log(v)),
        ElemwiseMode::Sin => map_arith!(data, v => unary::sin(v)),
        ElemwiseMode::Cos => map_arith!(data, v => unary::cos(v)),
        ElemwiseMode::Relu => map_arith!(data, v => unary::relu(v)),
        _ => {
            return Err(Error::Internal {
                message: format!("{} is not unary", mode.as_str()),
            })
        }
    })
}

fn binary_tensor(mode: ElemwiseMode, lhs: &HostTensor, rhs: &HostTensor) -> Result<HostTensor> {
    let dims = Layout::broadcast_shape(lhs.shape(), rhs.shape())?;
    let ls = broadcast_strides(lhs.shape(), &dims);
    let rs = broadcast_strides(rhs.shape(), &dims);

    let data = match mode {
        ElemwiseMode::Add => zip_arith!(lhs.data(), rhs.data(), (a, b) => binary::add(&dims, a, &ls, b, &rs)),
        ElemwiseMode::Sub => zip_arith!(lhs.data(), rhs.data(), (a, b) => binary::sub(&dims, a, &ls, b, &rs)),
        ElemwiseMode::Mul => zip_arith!(lhs.data(), rhs.data(), (a, b) => binary::mul(&dims, a, &ls, b, &rs)),
        ElemwiseMode::Div => zip_arith!(lhs.data(), rhs.data(), (a, b) => binary::div(&dims, a, &ls, b, &rs)),
        ElemwiseMode::ReluGrad => zip_arith!(lhs.data(), rhs.data(), (a, b) => binary::relu_grad(&dims, a, &ls, b, &rs)),
        _ => {
            return Err(Error::Internal {
                message: format!("{} is not binary", mode.as_str()),
            })
        }
    };
    HostTensor::from_data(data, &dims)
}
