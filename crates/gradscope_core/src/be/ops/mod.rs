//! Host implementations of every [`Op`], dispatched per dtype to `gradscope_cpu` kernels.

use crate::{
    error::{Error, Result},
    host::HostTensor,
    op::Op,
};

/// Runs `$body` for arithmetic dtypes, rewrapping the result in the same variant.
macro_rules! map_arith {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::host::HostData::BF16($v) => $crate::host::HostData::BF16($body),
            $crate::host::HostData::F16($v) => $crate::host::HostData::F16($body),
            $crate::host::HostData::F32($v) => $crate::host::HostData::F32($body),
            $crate::host::HostData::F64($v) => $crate::host::HostData::F64($body),
            $crate::host::HostData::I32($v) => $crate::host::HostData::I32($body),
            $crate::host::HostData::I64($v) => $crate::host::HostData::I64($body),
            other => return Err($crate::error::Error::UnsupportedDType(other.dtype())),
        }
    };
}

macro_rules! zip_arith {
    ($lhs:expr, $rhs:expr, ($a:ident, $b:ident) => $body:expr) => {
        match ($lhs, $rhs) {
            ($crate::host::HostData::BF16($a), $crate::host::HostData::BF16($b)) => $crate::host::HostData::BF16($body),
            ($crate::host::HostData::F16($a), $crate::host::HostData::F16($b)) => $crate::host::HostData::F16($body),
            ($crate::host::HostData::F32($a), $crate::host::HostData::F32($b)) => $crate::host::HostData::F32($body),
            ($crate::host::HostData::F64($a), $crate::host::HostData::F64($b)) => $crate::host::HostData::F64($body),
            ($crate::host::HostData::I32($a), $crate::host::HostData::I32($b)) => $crate::host::HostData::I32($body),
            ($crate::host::HostData::I64($a), $crate::host::HostData::I64($b)) => $crate::host::HostData::I64($body),
            (l, r) if l.dtype() != r.dtype() => {
                return Err($crate::error::Error::DTypeMismatch {
                    expected: l.dtype(),
                    got: r.dtype(),
                })
            }
            (l, _) => return Err($crate::error::Error::UnsupportedDType(l.dtype())),
        }
    };
}

/// Like `map_arith!` but for every dtype; the body may only move elements.
macro_rules! map_any {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::host::HostData::BF16($v) => $crate::host::HostData::BF16($body),
            $crate::host::HostData::F16($v) => $crate::host::HostData::F16($body),
            $crate::host::HostData::F32($v) => $crate::host::HostData::F32($body),
            $crate::host::HostData::F64($v) => $crate::host::HostData::F64($body),
            $crate::host::HostData::BOOL($v) => $crate::host::HostData::BOOL($body),
            $crate::host::HostData::U8($v) => $crate::host::HostData::U8($body),
            $crate::host::HostData::U32($v) => $crate::host::HostData::U32($body),
            $crate::host::HostData::I8($v) => $crate::host::HostData::I8($body),
            $crate::host::HostData::I32($v) => $crate::host::HostData::I32($body),
            $crate::host::HostData::I64($v) => $crate::host::HostData::I64($body),
        }
    };
}

macro_rules! zip_any {
    ($lhs:expr, $rhs:expr, ($a:ident, $b:ident) => $body:expr) => {
        match ($lhs, $rhs) {
            ($crate::host::HostData::BF16($a), $crate::host::HostData::BF16($b)) => $crate::host::HostData::BF16($body),
            ($crate::host::HostData::F16($a), $crate::host::HostData::F16($b)) => $crate::host::HostData::F16($body),
            ($crate::host::HostData::F32($a), $crate::host::HostData::F32($b)) => $crate::host::HostData::F32($body),
            ($crate::host::HostData::F64($a), $crate::host::HostData::F64($b)) => $crate::host::HostData::F64($body),
            ($crate::host::HostData::BOOL($a), $crate::host::HostData::BOOL($b)) => $crate::host::HostData::BOOL($body),
            ($crate::host::HostData::U8($a), $crate::host::HostData::U8($b)) => $crate::host::HostData::U8($body),
            ($crate::host::HostData::U32($a), $crate::host::HostData::U32($b)) => $crate::host::HostData::U32($body),
            ($crate::host::HostData::I8($a), $crate::host::HostData::I8($b)) => $crate::host::HostData::I8($body),
            ($crate::host::HostData::I32($a), $crate::host::HostData::I32($b)) => $crate::host::HostData::I32($body),
            ($crate::host::HostData::I64($a), $crate::host::HostData::I64($b)) => $crate::host::HostData::I64($body),
            (l, r) => {
                return Err($crate::error::Error::DTypeMismatch {
                    expected: l.dtype(),
                    got: r.dtype(),
                })
            }
        }
    };
}

pub mod elemwise;
pub mod indexing;
pub mod matmul;
pub mod reduction;
pub mod shape;

pub fn apply(op: &Op, inputs: &[&HostTensor]) -> Result<Vec<HostTensor>> {
    let output = match op {
        Op::Elemwise { mode } => elemwise::elemwise(*mode, inputs)?,
        Op::Reduce { mode, axis } => reduction::reduce(*mode, *axis, inputs)?,
        Op::Reshape => shape::reshape(inputs)?,
        Op::Broadcast => shape::broadcast(inputs)?,
        Op::GetVarShape => shape::get_var_shape(inputs)?,
        Op::Fill { value, dtype } => shape::fill(value.0, *dtype, inputs)?,
        Op::AddAxis { axis } => shape::add_axis(axis, inputs)?,
        Op::RemoveAxis { axis } => shape::remove_axis(axis, inputs)?,
        Op::Subtensor { items } => indexing::subtensor(items, inputs)?,
        Op::SetSubtensor { items } => indexing::set_subtensor(items, inputs)?,
        Op::IndexingMultiAxisVec { axes } => indexing::indexing_multi_axis_vec(axes, inputs)?,
        Op::IndexingSetMultiAxisVec { axes } => indexing::indexing_set_multi_axis_vec(axes, inputs)?,
        Op::MatMul { transpose_a, transpose_b } => matmul::matmul(*transpose_a, *transpose_b, inputs)?,
        Op::TypeCvt { dtype } => {
            expect_inputs(op.name(), inputs, 1)?;
            inputs[0].to_dtype(*dtype)
        }
        Op::FastpathCopy => {
            expect_inputs(op.name(), inputs, 1)?;
            inputs[0].clone()
        }
    };
    Ok(vec![output])
}

pub(crate) fn expect_inputs(name: &str, inputs: &[&HostTensor], n: usize) -> Result<()> {
    if inputs.len() != n {
        return Err(Error::InvalidArgument(format!(
            "{} expects {} inputs, got {}",
            name,
            n,
            inputs.len()
        )));
    }
    Ok(())
}
