//! The kernel/backend collaborator the gradient engine dispatches to.

use crate::{
    be::cpu::CpuExecutor,
    device::Device,
    dtype::DType,
    error::Result,
    host::HostTensor,
    op::Op,
};
use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, LazyLock,
    },
};

/// Opaque id of a value stored by an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueHandle(usize);

static VALUE_COUNTER: AtomicUsize = AtomicUsize::new(1);

impl ValueHandle {
    pub fn next() -> Self {
        Self(VALUE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub dtype: DType,
    pub device: Device,
    pub shape: Vec<usize>,
}

pub trait Executor: Send + Sync {
    /// Runs `op` over stored inputs and stores its outputs.
    fn apply_op(&self, op: &Op, inputs: &[ValueHandle]) -> Result<Vec<ValueHandle>>;
    /// Copies a stored value back to the host.
    fn get_value(&self, handle: ValueHandle) -> Result<HostTensor>;
    /// Stores a host value. `borrow` hints that the caller keeps its copy alive.
    fn put(&self, value: HostTensor, borrow: bool) -> Result<ValueHandle>;
    fn delete(&self, handle: ValueHandle);
    fn info(&self, handle: ValueHandle) -> Result<ValueInfo>;
}

static SHARED_CPU_EXECUTOR: LazyLock<Arc<CpuExecutor>> = LazyLock::new(|| Arc::new(CpuExecutor::new()));

thread_local! {
    static CURRENT_EXECUTOR: RefCell<Arc<dyn Executor>> = RefCell::new(SHARED_CPU_EXECUTOR.clone() as Arc<dyn Executor>);
}

/// The executor used by this thread.
pub fn executor() -> Arc<dyn Executor> {
    CURRENT_EXECUTOR.with(|e| e.borrow().clone())
}

pub fn set_executor(executor: Arc<dyn Executor>) {
    CURRENT_EXECUTOR.with(|e| *e.borrow_mut() = executor);
}

/// The process-wide CPU executor every thread starts with.
pub fn shared_cpu_executor() -> Arc<CpuExecutor> {
    SHARED_CPU_EXECUTOR.clone()
}
