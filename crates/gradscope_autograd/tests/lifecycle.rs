mod utils;

use gradscope_autograd::{
    backward_graph::{
        backward_graph_cache_len, get_backward_graph, set_backward_graph_compiler, BackwardGraphCompiler,
        BackwardGraphResult, LogicalTensorDesc, RuleCompiler,
    },
    GradKey, Tensor,
};
use gradscope_core::{
    device::{finalize_device, Device},
    dtype::DType,
    error::Result,
    op::{ElemwiseMode, Op},
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use utils::{grad_values, setup_device, setup_tensor, watch};

/// Refuses every op, counting how often it is asked.
#[derive(Default)]
struct Refusing {
    calls: AtomicUsize,
}

impl BackwardGraphCompiler for Refusing {
    fn make_backward_graph(
        &self,
        _op: &Op,
        _inputs: &[LogicalTensorDesc],
        _input_requires_grad: &[bool],
        _output_has_grad: &[bool],
    ) -> Result<Option<BackwardGraphResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

fn exp_grad() -> Result<Vec<f64>> {
    let x = setup_tensor(vec![0.0f32, 0.0], DType::F32)?;
    let key = GradKey::new();
    let store = watch(&key, &[&x])?;
    let y = x.exp()?;
    if y.is_grad_tracked() {
        key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;
    }
    grad_values(&store, &x)
}

fn exp_grad_on_other_thread() -> Result<Vec<f64>> {
    thread::spawn(|| {
        setup_device();
        exp_grad()
    })
    .join()
    .expect("worker thread panicked")
}

fn exp_graph_is_cached_as_some() -> Result<bool> {
    let descs = [LogicalTensorDesc::new(DType::F32, Device::CPU)];
    Ok(get_backward_graph(&Op::elemwise(ElemwiseMode::Exp), &descs, &[true], &[true])?.is_some())
}

// one test, since the cache is shared by the whole process
#[test]
fn cache_follows_device_and_compiler_lifecycle() -> Result<()> {
    setup_device();

    assert_eq!(exp_grad()?, vec![1.0, 1.0]);
    assert!(backward_graph_cache_len() > 0);

    finalize_device();
    assert_eq!(backward_graph_cache_len(), 0);

    let refusing = Arc::new(Refusing::default());
    set_backward_graph_compiler(refusing.clone());
    assert_eq!(backward_graph_cache_len(), 0);
    assert!(exp_grad()?.is_empty());
    assert!(exp_grad()?.is_empty());
    // the refusal is cached like any other result
    assert_eq!(refusing.calls.load(Ordering::SeqCst), 1);
    assert_eq!(backward_graph_cache_len(), 1);
    // the compiler is process-wide, other threads see the refusal too
    assert!(exp_grad_on_other_thread()?.is_empty());
    assert!(!exp_graph_is_cached_as_some()?);

    set_backward_graph_compiler(Arc::new(RuleCompiler));
    assert!(exp_graph_is_cached_as_some()?);
    assert_eq!(exp_grad()?, vec![1.0, 1.0]);
    assert_eq!(exp_grad_on_other_thread()?, vec![1.0, 1.0]);
    assert_eq!(refusing.calls.load(Ordering::SeqCst), 1);
    Ok(())
}
