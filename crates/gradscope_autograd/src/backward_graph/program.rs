use crate::{ops::apply_single, Tensor};
use gradscope_core::{
    error::{Error, Result},
    op::Op,
};

/// One step of a [`Program`]; `args` index the program's value list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub op: Op,
    pub args: Vec<usize>,
}

/// A straight-line list of single-output ops.
///
/// Values `0..num_inputs` are the inputs, instruction `i` defines value
/// `num_inputs + i`. An output of `None` is an absent result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub num_inputs: usize,
    pub instrs: Vec<Instr>,
    pub outputs: Vec<Option<usize>>,
}

impl Program {
    pub fn num_values(&self) -> usize {
        self.num_inputs + self.instrs.len()
    }

    /// Evaluates every instruction through dispatch, so the ops it runs are
    /// recorded like any other.
    pub fn run(&self, inputs: &[Tensor]) -> Result<Vec<Option<Tensor>>> {
        if inputs.len() != self.num_inputs {
            return Err(Error::InvalidArgument(format!(
                "program expects {} inputs, got {}",
                self.num_inputs,
                inputs.len()
            )));
        }

        let mut values: Vec<Tensor> = Vec::with_capacity(self.num_values());
        values.extend_from_slice(inputs);
        for instr in &self.instrs {
            let args = instr
                .args
                .iter()
                .map(|&a| values.get(a).cloned().ok_or_else(|| dangling(a)))
                .collect::<Result<Vec<_>>>()?;
            values.push(apply_single(&instr.op, &args)?);
        }

        self.outputs
            .iter()
            .map(|out| out.map(|v| values.get(v).cloned().ok_or_else(|| dangling(v))).transpose())
            .collect()
    }
}

fn dangling(value: usize) -> Error {
    Error::Internal {
        message: format!("program refers to undefined value {}", value),
    }
}

/// A value of the program under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var(pub(crate) usize);

impl Var {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Appends instructions in order and hands out their result values.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    num_inputs: usize,
    instrs: Vec<Instr>,
}

impl ProgramBuilder {
    pub fn new(num_inputs: usize) -> Self {
        Self {
            num_inputs,
            instrs: Vec::new(),
        }
    }

    pub fn input(&self, i: usize) -> Var {
        Var(i)
    }

    pub fn push(&mut self, op: Op, args: &[Var]) -> Var {
        self.instrs.push(Instr {
            op,
            args: args.iter().map(Var::index).collect(),
        });
        Var(self.num_inputs + self.instrs.len() - 1)
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn finish(self, outputs: Vec<Option<Var>>) -> Program {
        Program {
            num_inputs: self.num_inputs,
            instrs: self.instrs,
            outputs: outputs.into_iter().map(|v| v.map(|v| v.0)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradscope_core::op::ElemwiseMode;

    #[test]
    fn builder_numbers_values_after_inputs() {
        let mut b = ProgramBuilder::new(2);
        let x = b.input(0);
        let y = b.input(1);
        let s = b.push(Op::add(), &[x, y]);
        let n = b.push(Op::elemwise(ElemwiseMode::Neg), &[s]);
        let program = b.finish(vec![Some(n), None]);

        assert_eq!(s.index(), 2);
        assert_eq!(program.num_values(), 4);
        assert_eq!(program.instrs[1].args, vec![2]);
        assert_eq!(program.outputs, vec![Some(3), None]);
    }

    #[test]
    fn run_checks_arity() {
        let program = ProgramBuilder::new(1).finish(vec![]);
        assert!(matches!(program.run(&[]), Err(Error::InvalidArgument(_))));
    }
}
