//! The operation handle: an immutable, hashable description of one primitive.

use crate::dtype::DType;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ElemwiseMode {
    Neg,
    Exp,
    Log,
    Sin,
    Cos,
    Relu,
    Add,
    Sub,
    Mul,
    Div,
    /// `g where x > 0 else 0`, inputs `(x, g)`
    ReluGrad,
}

impl ElemwiseMode {
    pub fn arity(&self) -> usize {
        match self {
            Self::Neg | Self::Exp | Self::Log | Self::Sin | Self::Cos | Self::Relu => 1,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::ReluGrad => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neg => "neg",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Relu => "relu",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::ReluGrad => "relu_grad",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReduceMode {
    Sum,
    Max,
}

/// One entry of a static basic-indexing description.
///
/// Either a `start:stop:step` slice (python semantics, negatives count from
/// the end) or a single `index`, which removes the axis from the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxisSlice {
    pub axis: usize,
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: Option<isize>,
    pub index: Option<isize>,
}

impl AxisSlice {
    pub fn index(axis: usize, index: isize) -> Self {
        Self {
            axis,
            start: None,
            stop: None,
            step: None,
            index: Some(index),
        }
    }

    pub fn range(axis: usize, start: Option<isize>, stop: Option<isize>) -> Self {
        Self {
            axis,
            start,
            stop,
            step: None,
            index: None,
        }
    }

    pub fn with_step(mut self, step: isize) -> Self {
        self.step = Some(step);
        self
    }
}

/// Fill value compared and hashed by bit pattern.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FillValue(pub f64);

impl PartialEq for FillValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FillValue {}

impl Hash for FillValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl From<f64> for FillValue {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Op {
    Elemwise { mode: ElemwiseMode },
    /// `(x)` or `(x, target_shape)`
    Reduce { mode: ReduceMode, axis: Option<usize> },
    /// `(x, shape)`
    Reshape,
    /// `(x, shape)`
    Broadcast,
    GetVarShape,
    /// `(shape)`
    Fill { value: FillValue, dtype: DType },
    AddAxis { axis: Vec<usize> },
    RemoveAxis { axis: Vec<usize> },
    Subtensor { items: Vec<AxisSlice> },
    /// `(x, value)`
    SetSubtensor { items: Vec<AxisSlice> },
    /// `(x, idx..)`
    IndexingMultiAxisVec { axes: Vec<usize> },
    /// `(x, value, idx..)`
    IndexingSetMultiAxisVec { axes: Vec<usize> },
    MatMul { transpose_a: bool, transpose_b: bool },
    TypeCvt { dtype: DType },
    FastpathCopy,
}

/// Discriminant of an [`Op`], used to key per-kind tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Elemwise,
    Reduce,
    Reshape,
    Broadcast,
    GetVarShape,
    Fill,
    AddAxis,
    RemoveAxis,
    Subtensor,
    SetSubtensor,
    IndexingMultiAxisVec,
    IndexingSetMultiAxisVec,
    MatMul,
    TypeCvt,
    FastpathCopy,
}

impl Op {
    pub fn elemwise(mode: ElemwiseMode) -> Self {
        Self::Elemwise { mode }
    }
    pub fn add() -> Self {
        Self::elemwise(ElemwiseMode::Add)
    }
    pub fn sum(axis: Option<usize>) -> Self {
        Self::Reduce {
            mode: ReduceMode::Sum,
            axis,
        }
    }
    pub fn fill(value: f64, dtype: DType) -> Self {
        Self::Fill {
            value: FillValue(value),
            dtype,
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Self::Elemwise { .. } => OpKind::Elemwise,
            Self::Reduce { .. } => OpKind::Reduce,
            Self::Reshape => OpKind::Reshape,
            Self::Broadcast => OpKind::Broadcast,
            Self::GetVarShape => OpKind::GetVarShape,
            Self::Fill { .. } => OpKind::Fill,
            Self::AddAxis { .. } => OpKind::AddAxis,
            Self::RemoveAxis { .. } => OpKind::RemoveAxis,
            Self::Subtensor { .. } => OpKind::Subtensor,
            Self::SetSubtensor { .. } => OpKind::SetSubtensor,
            Self::IndexingMultiAxisVec { .. } => OpKind::IndexingMultiAxisVec,
            Self::IndexingSetMultiAxisVec { .. } => OpKind::IndexingSetMultiAxisVec,
            Self::MatMul { .. } => OpKind::MatMul,
            Self::TypeCvt { .. } => OpKind::TypeCvt,
            Self::FastpathCopy => OpKind::FastpathCopy,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Elemwise { mode } => mode.as_str(),
            Self::Reduce { mode: ReduceMode::Sum, .. } => "reduce_sum",
            Self::Reduce { mode: ReduceMode::Max, .. } => "reduce_max",
            Self::Reshape => "reshape",
            Self::Broadcast => "broadcast",
            Self::GetVarShape => "get_var_shape",
            Self::Fill { .. } => "fill",
            Self::AddAxis { .. } => "add_axis",
            Self::RemoveAxis { .. } => "remove_axis",
            Self::Subtensor { .. } => "subtensor",
            Self::SetSubtensor { .. } => "set_subtensor",
            Self::IndexingMultiAxisVec { .. } => "indexing_multi_axis_vec",
            Self::IndexingSetMultiAxisVec { .. } => "indexing_set_multi_axis_vec",
            Self::MatMul { .. } => "matmul",
            Self::TypeCvt { .. } => "typecvt",
            Self::FastpathCopy => "fastpath_copy",
        }
    }

    /// The op undoing an `AddAxis` or `RemoveAxis`, for inputs of any rank.
    ///
    /// Both apply their list in order against the shape built so far, so
    /// every axis is first resolved to its place in the other shape. The
    /// inverse removes in descending and inserts in ascending order.
    pub fn axis_inverse(&self) -> Option<Op> {
        match self {
            Self::AddAxis { axis } => {
                // where each inserted axis ends up in the output
                let mut placed: Vec<usize> = Vec::with_capacity(axis.len());
                for &a in axis {
                    for p in placed.iter_mut().filter(|p| **p >= a) {
                        *p += 1;
                    }
                    placed.push(a);
                }
                placed.sort_unstable_by(|a, b| b.cmp(a));
                Some(Self::RemoveAxis { axis: placed })
            }
            Self::RemoveAxis { axis } => {
                // where each removed axis sat in the input
                let mut removed: Vec<usize> = Vec::with_capacity(axis.len());
                for &a in axis {
                    let mut pos = a;
                    for &p in &removed {
                        if p <= pos {
                            pos += 1;
                        }
                    }
                    let at = removed.partition_point(|&p| p < pos);
                    removed.insert(at, pos);
                }
                Some(Self::AddAxis { axis: removed })
            }
            _ => None,
        }
    }

    /// Stable 64-bit hash of the operation and all its parameters.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ops_hash_equal() {
        let a = Op::AddAxis { axis: vec![0, 2] };
        let b = Op::AddAxis { axis: vec![0, 2] };
        let c = Op::AddAxis { axis: vec![2, 0] };
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
        assert_ne!(a, c);
        assert_eq!(a.kind(), OpKind::AddAxis);
    }

    #[test]
    fn axis_inverse_resolves_list_order() {
        // [3] -> [3, 1] -> [1, 3, 1]
        let add = Op::AddAxis { axis: vec![1, 0] };
        assert_eq!(add.axis_inverse(), Some(Op::RemoveAxis { axis: vec![2, 0] }));
        let add = Op::AddAxis { axis: vec![0, 2] };
        assert_eq!(add.axis_inverse(), Some(Op::RemoveAxis { axis: vec![2, 0] }));

        // [1, 3, 1] -> [3, 1] -> [3]
        let remove = Op::RemoveAxis { axis: vec![0, 1] };
        assert_eq!(remove.axis_inverse(), Some(Op::AddAxis { axis: vec![0, 2] }));
        let remove = Op::RemoveAxis { axis: vec![2, 0] };
        assert_eq!(remove.axis_inverse(), Some(Op::AddAxis { axis: vec![0, 2] }));
        // [1, 1, 3] -> [1, 3] -> [3]
        let remove = Op::RemoveAxis { axis: vec![0, 0] };
        assert_eq!(remove.axis_inverse(), Some(Op::AddAxis { axis: vec![0, 1] }));

        assert_eq!(Op::FastpathCopy.axis_inverse(), None);
    }

    #[test]
    fn fill_value_compares_bits() {
        assert_eq!(Op::fill(0.0, DType::F32), Op::fill(0.0, DType::F32));
        assert_ne!(Op::fill(0.0, DType::F32), Op::fill(-0.0, DType::F32));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_roundtrip() {
        let op = Op::Subtensor {
            items: vec![AxisSlice::range(0, Some(1), None).with_step(2), AxisSlice::index(1, -1)],
        };
        let json = serde_json::to_string(&op).unwrap();
        let back: Op = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
