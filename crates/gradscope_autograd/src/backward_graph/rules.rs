//! The default backward compiler, one hand-written rule per op.
//!
//! Rules only ever see dtypes and devices. Anything shape-dependent is read
//! off the live values with `GetVarShape`, either in the precomputation
//! (when only the shape is needed) or inside the backward program.

use super::{BackwardGraphCompiler, BackwardGraphResult, LogicalTensorDesc, ProgramBuilder, Var};
use gradscope_core::{
    error::Result,
    op::{ElemwiseMode, Op, ReduceMode},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Src {
    Precomp(usize),
    Input(usize),
    Output(usize),
    Grad(usize),
    Value(usize),
}

/// Builds one backward program while tracking what it needs saved.
struct GraphMaker<'a> {
    inputs: &'a [LogicalTensorDesc],
    requires_grad: &'a [bool],
    nouts: usize,
    precomp: ProgramBuilder,
    precomp_outputs: Vec<Var>,
    save: Vec<bool>,
    instrs: Vec<(Op, Vec<Src>)>,
}

impl<'a> GraphMaker<'a> {
    fn new(inputs: &'a [LogicalTensorDesc], requires_grad: &'a [bool], output_has_grad: &[bool]) -> Self {
        let nargs = inputs.len();
        let nouts = output_has_grad.len();
        let mut save = vec![false; nargs + nouts];
        save.extend_from_slice(output_has_grad);
        Self {
            inputs,
            requires_grad,
            nouts,
            precomp: ProgramBuilder::new(nargs + nouts),
            precomp_outputs: Vec::new(),
            save,
            instrs: Vec::new(),
        }
    }

    fn nargs(&self) -> usize {
        self.inputs.len()
    }

    fn requires(&self, i: usize) -> bool {
        self.requires_grad.get(i).copied().unwrap_or(false)
    }

    fn input(&mut self, i: usize) -> Src {
        self.save[i] = true;
        Src::Input(i)
    }

    fn output(&mut self, j: usize) -> Src {
        let nargs = self.nargs();
        self.save[nargs + j] = true;
        Src::Output(j)
    }

    fn grad(&self, j: usize) -> Src {
        Src::Grad(j)
    }

    /// Shape of input `i`, computed once at forward time.
    fn shape_of(&mut self, i: usize) -> Src {
        let x = self.precomp.input(i);
        let shape = self.precomp.push(Op::GetVarShape, &[x]);
        self.precomp_outputs.push(shape);
        Src::Precomp(self.precomp_outputs.len() - 1)
    }

    fn push(&mut self, op: Op, args: &[Src]) -> Src {
        self.instrs.push((op, args.to_vec()));
        Src::Value(self.instrs.len() - 1)
    }

    fn elemwise(&mut self, mode: ElemwiseMode, args: &[Src]) -> Src {
        self.push(Op::elemwise(mode), args)
    }

    fn reduce_to(&mut self, x: Src, shape: Src) -> Src {
        self.push(Op::sum(None), &[x, shape])
    }

    fn zeros(&mut self, shape: Src, of_input: usize) -> Src {
        let dtype = self.inputs[of_input].dtype;
        self.push(Op::fill(0.0, dtype), &[shape])
    }

    /// `None` when no input ends up with a gradient.
    fn finish(self, grads: Vec<Option<Src>>) -> Option<BackwardGraphResult> {
        let nargs = self.nargs();
        let mut input_has_grad = vec![false; nargs];
        for (has, g) in input_has_grad.iter_mut().zip(&grads) {
            *has = g.is_some();
        }
        if !input_has_grad.iter().any(|&h| h) {
            return None;
        }

        // backward inputs: precomputed values, then every saved value in mask order
        let num_precomp = self.precomp_outputs.len();
        let mut next = num_precomp;
        let position: Vec<Option<usize>> = self
            .save
            .iter()
            .map(|&saved| {
                saved.then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();
        let num_inputs = next;
        let nouts = self.nouts;

        let resolve = |src: Src| -> Option<usize> {
            match src {
                Src::Precomp(k) => Some(k),
                Src::Input(i) => position.get(i).copied().flatten(),
                Src::Output(j) => position.get(nargs + j).copied().flatten(),
                Src::Grad(j) => position.get(nargs + nouts + j).copied().flatten(),
                Src::Value(n) => Some(num_inputs + n),
            }
        };

        let mut backward = ProgramBuilder::new(num_inputs);
        for (op, args) in &self.instrs {
            let args = args.iter().map(|&a| resolve(a).map(Var)).collect::<Option<Vec<Var>>>()?;
            backward.push(op.clone(), &args);
        }
        let outputs = grads
            .iter()
            .map(|g| match g {
                Some(g) => resolve(*g).map(|v| Some(Var(v))),
                None => Some(None),
            })
            .collect::<Option<Vec<Option<Var>>>>()?;

        let precomp_outputs = self.precomp_outputs.iter().map(|&v| Some(v)).collect();
        let precomp = (num_precomp > 0).then(|| self.precomp.finish(precomp_outputs));
        Some(BackwardGraphResult {
            input_has_grad,
            save_for_backward: self.save,
            precomp,
            backward: backward.finish(outputs),
        })
    }
}

/// Covers the differentiable ops of the CPU backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCompiler;

impl BackwardGraphCompiler for RuleCompiler {
    fn make_backward_graph(
        &self,
        op: &Op,
        inputs: &[LogicalTensorDesc],
        input_requires_grad: &[bool],
        output_has_grad: &[bool],
    ) -> Result<Option<BackwardGraphResult>> {
        let mut m = GraphMaker::new(inputs, input_requires_grad, output_has_grad);
        let grads = match op {
            Op::Elemwise { mode } => elemwise_grads(&mut m, *mode),
            Op::Reduce { mode: ReduceMode::Sum, .. } => {
                let g = m.grad(0);
                let dx = m.requires(0).then(|| {
                    let shape = m.shape_of(0);
                    m.push(Op::Broadcast, &[g, shape])
                });
                vec![dx, None]
            }
            Op::Broadcast => {
                let g = m.grad(0);
                let dx = m.requires(0).then(|| {
                    let shape = m.shape_of(0);
                    m.reduce_to(g, shape)
                });
                vec![dx, None]
            }
            Op::Reshape => {
                let g = m.grad(0);
                let dx = m.requires(0).then(|| {
                    let shape = m.shape_of(0);
                    m.push(Op::Reshape, &[g, shape])
                });
                vec![dx, None]
            }
            Op::AddAxis { .. } | Op::RemoveAxis { .. } => {
                let g = m.grad(0);
                let inverse = op.axis_inverse();
                vec![inverse.filter(|_| m.requires(0)).map(|inverse| m.push(inverse, &[g]))]
            }
            Op::Subtensor { items } => {
                let g = m.grad(0);
                let dx = m.requires(0).then(|| {
                    let shape = m.shape_of(0);
                    let zeros = m.zeros(shape, 0);
                    m.push(Op::SetSubtensor { items: items.clone() }, &[zeros, g])
                });
                vec![dx]
            }
            Op::SetSubtensor { items } => {
                let g = m.grad(0);
                let value_shape = (m.requires(0) || m.requires(1)).then(|| m.shape_of(1));
                let dx = match (m.requires(0), value_shape) {
                    (true, Some(shape)) => {
                        let zeros = m.zeros(shape, 0);
                        Some(m.push(Op::SetSubtensor { items: items.clone() }, &[g, zeros]))
                    }
                    _ => None,
                };
                let dv = match (m.requires(1), value_shape) {
                    (true, Some(shape)) => {
                        let picked = m.push(Op::Subtensor { items: items.clone() }, &[g]);
                        Some(m.reduce_to(picked, shape))
                    }
                    _ => None,
                };
                vec![dx, dv]
            }
            Op::IndexingMultiAxisVec { axes } => {
                let g = m.grad(0);
                let dx = m.requires(0).then(|| {
                    let shape = m.shape_of(0);
                    let zeros = m.zeros(shape, 0);
                    let mut args = vec![zeros, g];
                    args.extend((1..inputs.len()).map(|i| m.input(i)));
                    m.push(Op::IndexingSetMultiAxisVec { axes: axes.clone() }, &args)
                });
                let mut grads = vec![dx];
                grads.resize(inputs.len(), None);
                grads
            }
            Op::IndexingSetMultiAxisVec { axes } => {
                let g = m.grad(0);
                let wanted = m.requires(0) || m.requires(1);
                let value_shape = wanted.then(|| m.shape_of(1));
                let index: Vec<Src> = if wanted {
                    (2..inputs.len()).map(|i| m.input(i)).collect()
                } else {
                    Vec::new()
                };
                let dx = match (m.requires(0), value_shape) {
                    (true, Some(shape)) => {
                        let zeros = m.zeros(shape, 0);
                        let mut args = vec![g, zeros];
                        args.extend_from_slice(&index);
                        Some(m.push(Op::IndexingSetMultiAxisVec { axes: axes.clone() }, &args))
                    }
                    _ => None,
                };
                let dv = match (m.requires(1), value_shape) {
                    (true, Some(shape)) => {
                        let mut args = vec![g];
                        args.extend_from_slice(&index);
                        let picked = m.push(Op::IndexingMultiAxisVec { axes: axes.clone() }, &args);
                        Some(m.reduce_to(picked, shape))
                    }
                    _ => None,
                };
                let mut grads = vec![dx, dv];
                grads.resize(inputs.len(), None);
                grads
            }
            Op::MatMul { transpose_a, transpose_b } => matmul_grads(&mut m, *transpose_a, *transpose_b),
            Op::TypeCvt { .. } => {
                let src = inputs.first().map(|d| d.dtype);
                let g = m.grad(0);
                vec![src.filter(|_| m.requires(0)).map(|dtype| m.push(Op::TypeCvt { dtype }, &[g]))]
            }
            Op::FastpathCopy => vec![m.requires(0).then(|| m.grad(0))],
            Op::Reduce { mode: ReduceMode::Max, .. } | Op::GetVarShape | Op::Fill { .. } => return Ok(None),
        };

        let mut grads = grads;
        grads.resize(inputs.len(), None);
        grads.truncate(inputs.len());
        Ok(m.finish(grads))
    }
}

fn elemwise_grads(m: &mut GraphMaker<'_>, mode: ElemwiseMode) -> Vec<Option<Src>> {
    use ElemwiseMode::*;

    let g = m.grad(0);
    match mode {
        Add | Sub => {
            let da = m.requires(0).then(|| {
                let shape = m.shape_of(0);
                m.reduce_to(g, shape)
            });
            let db = m.requires(1).then(|| {
                let shape = m.shape_of(1);
                let reduced = m.reduce_to(g, shape);
                if mode == Sub {
                    m.elemwise(Neg, &[reduced])
                } else {
                    reduced
                }
            });
            vec![da, db]
        }
        Mul => {
            let da = m.requires(0).then(|| {
                let b = m.input(1);
                let shape = m.shape_of(0);
                let prod = m.elemwise(Mul, &[g, b]);
                m.reduce_to(prod, shape)
            });
            let db = m.requires(1).then(|| {
                let a = m.input(0);
                let shape = m.shape_of(1);
                let prod = m.elemwise(Mul, &[g, a]);
                m.reduce_to(prod, shape)
            });
            vec![da, db]
        }
        Div => {
            let da = m.requires(0).then(|| {
                let b = m.input(1);
                let shape = m.shape_of(0);
                let quot = m.elemwise(Div, &[g, b]);
                m.reduce_to(quot, shape)
            });
            // d(a / b) / db = -(a / b) / b
            let db = m.requires(1).then(|| {
                let b = m.input(1);
                let c = m.output(0);
                let shape = m.shape_of(1);
                let gc = m.elemwise(Mul, &[g, c]);
                let quot = m.elemwise(Div, &[gc, b]);
                let neg = m.elemwise(Neg, &[quot]);
                m.reduce_to(neg, shape)
            });
            vec![da, db]
        }
        Neg => vec![m.requires(0).then(|| m.elemwise(Neg, &[g]))],
        Exp => vec![m.requires(0).then(|| {
            let y = m.output(0);
            m.elemwise(Mul, &[g, y])
        })],
        Log => vec![m.requires(0).then(|| {
            let x = m.input(0);
            m.elemwise(Div, &[g, x])
        })],
        Sin => vec![m.requires(0).then(|| {
            let x = m.input(0);
            let cos = m.elemwise(Cos, &[x]);
            m.elemwise(Mul, &[g, cos])
        })],
        Cos => vec![m.requires(0).then(|| {
            let x = m.input(0);
            let sin = m.elemwise(Sin, &[x]);
            let prod = m.elemwise(Mul, &[g, sin]);
            m.elemwise(Neg, &[prod])
        })],
        Relu => vec![m.requires(0).then(|| {
            let x = m.input(0);
            m.elemwise(ReluGrad, &[x, g])
        })],
        ReluGrad => Vec::new(),
    }
}

/// `C = op_a(A) · op_b(B)`; each gradient is another product of `G` with the
/// other operand, transposes chosen so no explicit transpose is needed.
fn matmul_grads(m: &mut GraphMaker<'_>, ta: bool, tb: bool) -> Vec<Option<Src>> {
    let g = m.grad(0);
    let mm = |transpose_a, transpose_b| Op::MatMul { transpose_a, transpose_b };

    let da = m.requires(0).then(|| {
        let b = m.input(1);
        match (ta, tb) {
            (false, false) => m.push(mm(false, true), &[g, b]),
            (true, false) => m.push(mm(false, true), &[b, g]),
            (false, true) => m.push(mm(false, false), &[g, b]),
            (true, true) => m.push(mm(true, true), &[b, g]),
        }
    });
    let db = m.requires(1).then(|| {
        let a = m.input(0);
        match (ta, tb) {
            (false, false) => m.push(mm(true, false), &[a, g]),
            (true, false) => m.push(mm(false, false), &[a, g]),
            (false, true) => m.push(mm(true, false), &[g, a]),
            (true, true) => m.push(mm(true, true), &[g, a]),
        }
    });
    vec![da, db]
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradscope_core::{device::Device, dtype::DType};

    fn descs(n: usize) -> Vec<LogicalTensorDesc> {
        vec![LogicalTensorDesc::new(DType::F32, Device::CPU); n]
    }

    fn compile(op: Op, requires_grad: &[bool]) -> Option<BackwardGraphResult> {
        RuleCompiler
            .make_backward_graph(&op, &descs(requires_grad.len()), requires_grad, &[true])
            .ok()
            .flatten()
    }

    #[test]
    fn add_keeps_only_shapes() {
        let graph = compile(Op::add(), &[true, true]).expect("add is differentiable");
        assert_eq!(graph.input_has_grad, vec![true, true]);
        assert_eq!(graph.save_for_backward, vec![false, false, false, true]);
        let precomp = graph.precomp.expect("shapes are precomputed");
        assert_eq!(precomp.num_inputs, 3);
        assert_eq!(precomp.outputs.len(), 2);
        // two precomputed shapes plus one gradient
        assert_eq!(graph.backward.num_inputs, 3);
    }

    #[test]
    fn exp_captures_its_output() {
        let graph = compile(Op::elemwise(ElemwiseMode::Exp), &[true]).expect("exp is differentiable");
        assert_eq!(graph.save_for_backward, vec![false, true, true]);
        assert!(graph.precomp.is_none());
        assert_eq!(graph.backward.instrs.len(), 1);
    }

    #[test]
    fn mul_saves_the_other_operand() {
        let graph = compile(Op::elemwise(ElemwiseMode::Mul), &[true, false]).expect("mul is differentiable");
        assert_eq!(graph.input_has_grad, vec![true, false]);
        assert_eq!(graph.save_for_backward, vec![false, true, false, true]);
    }

    #[test]
    fn index_inputs_have_no_grad() {
        let axes = vec![0];
        let graph = compile(Op::IndexingMultiAxisVec { axes }, &[true, true]).expect("indexing is differentiable");
        assert_eq!(graph.input_has_grad, vec![true, false]);
        assert_eq!(graph.save_for_backward, vec![false, true, false, true]);
    }

    #[test]
    fn axis_inverses_are_sorted() {
        let graph = compile(Op::AddAxis { axis: vec![0, 2] }, &[true]).expect("add_axis is differentiable");
        assert_eq!(graph.backward.instrs[0].op, Op::RemoveAxis { axis: vec![2, 0] });

        let graph = compile(Op::AddAxis { axis: vec![1, 0] }, &[true]).expect("add_axis is differentiable");
        assert_eq!(graph.backward.instrs[0].op, Op::RemoveAxis { axis: vec![2, 0] });

        let graph = compile(Op::RemoveAxis { axis: vec![2, 0] }, &[true]).expect("remove_axis is differentiable");
        assert_eq!(graph.backward.instrs[0].op, Op::AddAxis { axis: vec![0, 2] });
    }

    #[test]
    fn non_differentiable_ops() {
        let max = Op::Reduce {
            mode: ReduceMode::Max,
            axis: None,
        };
        assert!(compile(max, &[true]).is_none());
        assert!(compile(Op::GetVarShape, &[true]).is_none());
        assert!(compile(Op::elemwise(ElemwiseMode::ReluGrad), &[true, true]).is_none());
        assert!(compile(Op::add(), &[false, false]).is_none());
    }

    #[test]
    fn fastpath_copy_is_identity() {
        let graph = compile(Op::FastpathCopy, &[true]).expect("copy is differentiable");
        assert!(graph.backward.instrs.is_empty());
        assert_eq!(graph.backward.outputs, vec![Some(0)]);
    }
}
