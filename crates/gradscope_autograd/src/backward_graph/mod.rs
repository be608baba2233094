//! Generic backward construction: a swappable compiler turns an op into
//! backward programs, and a process-wide cache remembers the result per
//! op, dtype, device and gradient pattern.

pub mod closure;
pub mod program;
pub mod rules;

use crate::Tensor;
use dashmap::DashMap;
use gradscope_core::{
    device::{on_device_finalize, Device},
    dtype::DType,
    error::Result,
    op::Op,
};
use rustc_hash::FxHasher;
use std::{
    hash::{Hash, Hasher},
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

pub use program::{Instr, Program, ProgramBuilder, Var};
pub use rules::RuleCompiler;

/// What the compiler may know about an input: never its shape or data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalTensorDesc {
    pub dtype: DType,
    pub device: Device,
}

impl LogicalTensorDesc {
    pub fn new(dtype: DType, device: Device) -> Self {
        Self { dtype, device }
    }

    pub fn of(tensor: &Tensor) -> Self {
        Self::new(tensor.dtype(), tensor.device())
    }
}

/// How to compute an op's input gradients from its output gradients.
///
/// `save_for_backward` has one flag per input, then per output, then per
/// output gradient. The backward program receives the precomputed values,
/// then the saved inputs, saved outputs and saved gradients, in that order,
/// and yields one optional gradient per input.
#[derive(Debug, Clone)]
pub struct BackwardGraphResult {
    pub input_has_grad: Vec<bool>,
    pub save_for_backward: Vec<bool>,
    /// runs at forward time over all inputs followed by all outputs
    pub precomp: Option<Program>,
    pub backward: Program,
}

impl BackwardGraphResult {
    pub fn num_inputs(&self) -> usize {
        self.input_has_grad.len()
    }

    pub fn num_outputs(&self) -> usize {
        (self.save_for_backward.len() - self.num_inputs()) / 2
    }
}

pub trait BackwardGraphCompiler: Send + Sync {
    /// `Ok(None)` means the op has no differentiable structure.
    fn make_backward_graph(
        &self,
        op: &Op,
        inputs: &[LogicalTensorDesc],
        input_requires_grad: &[bool],
        output_has_grad: &[bool],
    ) -> Result<Option<BackwardGraphResult>>;
}

struct InstalledCompiler {
    /// bumped on every swap and folded into cache keys
    generation: u64,
    compiler: Arc<dyn BackwardGraphCompiler>,
}

static COMPILER: LazyLock<RwLock<InstalledCompiler>> = LazyLock::new(|| {
    RwLock::new(InstalledCompiler {
        generation: 0,
        compiler: Arc::new(RuleCompiler),
    })
});

fn installed_compiler() -> (u64, Arc<dyn BackwardGraphCompiler>) {
    let installed = COMPILER.read().unwrap_or_else(PoisonError::into_inner);
    (installed.generation, installed.compiler.clone())
}

pub fn backward_graph_compiler() -> Arc<dyn BackwardGraphCompiler> {
    installed_compiler().1
}

/// Swaps the process-wide compiler and forgets every cached result.
///
/// A lookup racing with the swap may still finish with the old compiler,
/// its result is keyed by the old generation and never served afterwards.
pub fn set_backward_graph_compiler(compiler: Arc<dyn BackwardGraphCompiler>) {
    {
        let mut installed = COMPILER.write().unwrap_or_else(PoisonError::into_inner);
        installed.generation += 1;
        installed.compiler = compiler;
    }
    clear_backward_graph_cache();
}

type GraphCache = DashMap<u64, Option<Arc<BackwardGraphResult>>>;

static CACHE: LazyLock<GraphCache> = LazyLock::new(|| {
    on_device_finalize(clear_backward_graph_cache);
    DashMap::new()
});

pub fn backward_graph_cache_len() -> usize {
    CACHE.len()
}

pub fn clear_backward_graph_cache() {
    log::debug!("clearing {} cached backward graphs", CACHE.len());
    CACHE.clear();
}

fn cache_key(
    generation: u64,
    op: &Op,
    inputs: &[LogicalTensorDesc],
    input_requires_grad: &[bool],
    output_has_grad: &[bool],
) -> u64 {
    let mut hasher = FxHasher::default();
    generation.hash(&mut hasher);
    op.hash_value().hash(&mut hasher);
    for desc in inputs {
        desc.dtype.hash(&mut hasher);
        desc.device.hash(&mut hasher);
    }
    input_requires_grad.hash(&mut hasher);
    output_has_grad.hash(&mut hasher);
    hasher.finish()
}

/// Cached backward for `op` under the given gradient pattern.
///
/// Results are shared between every call with the same key regardless of
/// shapes, including the absence of a backward.
pub fn get_backward_graph(
    op: &Op,
    inputs: &[LogicalTensorDesc],
    input_requires_grad: &[bool],
    output_has_grad: &[bool],
) -> Result<Option<Arc<BackwardGraphResult>>> {
    let (generation, compiler) = installed_compiler();
    let key = cache_key(generation, op, inputs, input_requires_grad, output_has_grad);
    if let Some(hit) = CACHE.get(&key) {
        return Ok(hit.value().clone());
    }

    log::debug!("backward graph cache miss for {} over {} inputs", op, inputs.len());
    let built = compiler
        .make_backward_graph(op, inputs, input_requires_grad, output_has_grad)?
        .map(Arc::new);
    let entry = CACHE.entry(key).or_insert(built);
    Ok(entry.value().clone())
}
