pub mod backward_graph;
mod creation;
pub mod dispatch;
pub mod grad;
pub mod grad_override;
mod ops;
pub mod scope;

use crate::grad::info::GradInfoCollection;
use gradscope_core::{
    device::Device,
    dtype::DType,
    error::Result,
    executor::{Executor, ValueHandle, ValueInfo},
    host::{HostElement, HostTensor},
};
use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not, Sub},
    rc::Rc,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

pub use dispatch::apply;
pub use grad::{enable_higher_order, GradKey, GradStore, HigherOrderGuard, WeakGradFn};
pub use grad_override::disable_grad_overrides;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);
static TENSOR_COUNTER: AtomicUsize = AtomicUsize::new(1);

#[inline]
pub(crate) fn next_tensor_id() -> TensorId {
    TensorId(TENSOR_COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Dynamic per-tensor flags, also used for the thread-wide force/disable masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TensorFlags(u8);

impl TensorFlags {
    pub const SCALAR: Self = Self(1);
    pub const GRAD: Self = Self(1 << 1);
    pub const TRACE: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }
    pub const fn bits(&self) -> u8 {
        self.0
    }
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for TensorFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TensorFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TensorFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for TensorFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for TensorFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl Sub for TensorFlags {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

// ---- global flag masks ----

thread_local! {
    static GLOBAL_DISABLE: Cell<TensorFlags> = const { Cell::new(TensorFlags::empty()) };
    static GLOBAL_ENABLE: Cell<TensorFlags> = const { Cell::new(TensorFlags::empty()) };
}

/// Flags masked out of every dispatch on this thread.
pub fn global_disable() -> TensorFlags {
    GLOBAL_DISABLE.with(|f| f.get())
}

/// Flags forced on for every dispatch on this thread.
pub fn global_enable() -> TensorFlags {
    GLOBAL_ENABLE.with(|f| f.get())
}

pub struct ScopedDisable {
    prev: TensorFlags,
}

impl ScopedDisable {
    pub fn new(flags: TensorFlags) -> Self {
        let prev = GLOBAL_DISABLE.with(|f| f.replace(f.get() | flags));
        Self { prev }
    }
}

impl Drop for ScopedDisable {
    fn drop(&mut self) {
        GLOBAL_DISABLE.with(|f| f.set(self.prev));
    }
}

pub struct ScopedEnable {
    prev: TensorFlags,
}

impl ScopedEnable {
    pub fn new(flags: TensorFlags) -> Self {
        let prev = GLOBAL_ENABLE.with(|f| f.replace(f.get() | flags));
        Self { prev }
    }
}

impl Drop for ScopedEnable {
    fn drop(&mut self) {
        GLOBAL_ENABLE.with(|f| f.set(self.prev));
    }
}

pub fn no_grad() -> ScopedDisable {
    ScopedDisable::new(TensorFlags::GRAD)
}

pub fn is_grad_enabled() -> bool {
    !global_disable().contains(TensorFlags::GRAD)
}

/// Disables gradient recording in the current lexical scope.
/// When the scope ends, the previous state is automatically restored.
///
/// ### Example
/// ```rust
/// gradscope_autograd::no_grad!();
/// // Operations inside this scope are not recorded on any gradient key.
/// ```
#[macro_export]
macro_rules! no_grad {
    () => {
        let _grad_guard = $crate::no_grad();
    };
}

// ---- tensor ----

/// Backend value owned jointly by every tensor sharing it.
pub(crate) struct SharedValue {
    handle: ValueHandle,
    executor: Arc<dyn Executor>,
}

impl Drop for SharedValue {
    fn drop(&mut self) {
        self.executor.delete(self.handle);
    }
}

pub(crate) struct TensorInner {
    id: TensorId,
    value: Rc<SharedValue>,
    info: ValueInfo,
    flags: Cell<TensorFlags>,
    grad_info: RefCell<GradInfoCollection>,
}

/// Reference-counted handle to a backend value plus its gradient linkage.
///
/// Cloning shares the same handle. [`Tensor::copy`] makes a new handle over
/// the same value.
#[derive(Clone)]
pub struct Tensor(Rc<TensorInner>);

impl Tensor {
    pub(crate) fn from_value(value: Rc<SharedValue>, info: ValueInfo, flags: TensorFlags, grad_info: GradInfoCollection) -> Self {
        Self(Rc::new(TensorInner {
            id: next_tensor_id(),
            value,
            info,
            flags: Cell::new(flags),
            grad_info: RefCell::new(grad_info),
        }))
    }

    /// Wraps a value freshly stored in `executor`.
    pub(crate) fn from_handle(handle: ValueHandle, executor: Arc<dyn Executor>) -> Result<Self> {
        let value = Rc::new(SharedValue { handle, executor });
        let info = value.executor.info(handle)?;
        let flags = if info.shape.is_empty() {
            TensorFlags::SCALAR
        } else {
            TensorFlags::empty()
        };
        Ok(Self::from_value(value, info, flags, GradInfoCollection::default()))
    }

    /// New handle over the same value, keeping flags and gradient linkage.
    pub fn copy(&self) -> Self {
        let grad_info = self.0.grad_info.borrow().clone();
        Self::from_value(self.0.value.clone(), self.0.info.clone(), self.flags(), grad_info)
    }

    /// New handle over the same value with no gradient linkage.
    pub(crate) fn fastpath_copy(&self) -> Self {
        Self::from_value(
            self.0.value.clone(),
            self.0.info.clone(),
            self.flags() - TensorFlags::GRAD,
            GradInfoCollection::default(),
        )
    }

    pub fn id(&self) -> TensorId {
        self.0.id
    }
    pub fn handle(&self) -> ValueHandle {
        self.0.value.handle
    }
    pub(crate) fn executor(&self) -> &Arc<dyn Executor> {
        &self.0.value.executor
    }
    pub fn shape(&self) -> &[usize] {
        &self.0.info.shape
    }
    pub fn ndim(&self) -> usize {
        self.0.info.shape.len()
    }
    pub fn size(&self) -> usize {
        self.0.info.shape.iter().product()
    }
    pub fn dtype(&self) -> DType {
        self.0.info.dtype
    }
    pub fn device(&self) -> Device {
        self.0.info.device
    }

    pub fn flags(&self) -> TensorFlags {
        self.0.flags.get()
    }
    pub(crate) fn set_flags(&self, flags: TensorFlags) {
        self.0.flags.set(self.flags() | flags);
    }
    pub(crate) fn clear_flags(&self, flags: TensorFlags) {
        self.0.flags.set(self.flags() - flags);
    }

    /// Whether some gradient key still tracks this tensor.
    pub fn is_grad_tracked(&self) -> bool {
        self.flags().contains(TensorFlags::GRAD)
    }

    /// Number of gradient keys holding a linkage entry for this tensor.
    pub fn linkage_count(&self) -> usize {
        self.0.grad_info.borrow().len()
    }

    pub(crate) fn grad_info(&self) -> Ref<'_, GradInfoCollection> {
        self.0.grad_info.borrow()
    }
    pub(crate) fn grad_info_mut(&self) -> RefMut<'_, GradInfoCollection> {
        self.0.grad_info.borrow_mut()
    }
    pub(crate) fn inner(&self) -> &Rc<TensorInner> {
        &self.0
    }
    pub(crate) fn from_inner(inner: Rc<TensorInner>) -> Self {
        Self(inner)
    }

    pub fn to_host(&self) -> Result<HostTensor> {
        self.executor().get_value(self.handle())
    }

    pub fn to_vec<T: HostElement>(&self) -> Result<Vec<T>> {
        Ok(self.to_host()?.to_vec::<T>())
    }

    /// Whether both handles share the same backend value.
    pub fn shares_value(&self, other: &Tensor) -> bool {
        Rc::ptr_eq(&self.0.value, &other.0.value)
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.0.id)
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .field("flags", &self.flags())
            .finish()
    }
}
