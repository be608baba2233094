use crate::{
    be::ops,
    device::Device,
    error::{Error, Result},
    executor::{Executor, ValueHandle, ValueInfo},
    host::HostTensor,
    op::Op,
};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Reference executor running every op on the host.
#[derive(Default)]
pub struct CpuExecutor {
    values: DashMap<ValueHandle, Arc<HostTensor>>,
    apply_count: AtomicUsize,
}

impl CpuExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `apply_op` calls served so far.
    pub fn apply_count(&self) -> usize {
        self.apply_count.load(Ordering::SeqCst)
    }

    /// Number of values currently stored.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn fetch(&self, handle: ValueHandle) -> Result<Arc<HostTensor>> {
        self.values
            .get(&handle)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::InvalidState(format!("value {} is not stored", handle.id())))
    }

    fn store(&self, value: HostTensor) -> ValueHandle {
        let handle = ValueHandle::next();
        self.values.insert(handle, Arc::new(value));
        handle
    }
}

impl Executor for CpuExecutor {
    fn apply_op(&self, op: &Op, inputs: &[ValueHandle]) -> Result<Vec<ValueHandle>> {
        let values = inputs.iter().map(|&h| self.fetch(h)).collect::<Result<Vec<_>>>()?;
        for v in &values {
            if v.device() != Device::CPU {
                return Err(Error::InvalidDevice(format!("{} value on CPU executor", v.device().name())));
            }
        }
        let refs: Vec<&HostTensor> = values.iter().map(|v| v.as_ref()).collect();
        let outputs = ops::apply(op, &refs)?;
        self.apply_count.fetch_add(1, Ordering::SeqCst);
        Ok(outputs.into_iter().map(|o| self.store(o)).collect())
    }

    fn get_value(&self, handle: ValueHandle) -> Result<HostTensor> {
        Ok(self.fetch(handle)?.as_ref().clone())
    }

    fn put(&self, value: HostTensor, _borrow: bool) -> Result<ValueHandle> {
        Ok(self.store(value))
    }

    fn delete(&self, handle: ValueHandle) {
        self.values.remove(&handle);
    }

    fn info(&self, handle: ValueHandle) -> Result<ValueInfo> {
        let value = self.fetch(handle)?;
        Ok(ValueInfo {
            dtype: value.dtype(),
            device: value.device(),
            shape: value.shape().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::ElemwiseMode;

    #[test]
    fn apply_counts_and_stores() -> Result<()> {
        let exec = CpuExecutor::new();
        let a = exec.put(HostTensor::new(vec![1.0f32, 2.0])?, false)?;
        let b = exec.put(HostTensor::new(vec![3.0f32, 4.0])?, false)?;
        let out = exec.apply_op(&Op::elemwise(ElemwiseMode::Mul), &[a, b])?;
        assert_eq!(exec.apply_count(), 1);
        assert_eq!(exec.get_value(out[0])?.to_vec::<f32>(), vec![3.0, 8.0]);
        assert_eq!(exec.info(out[0])?.shape, vec![2]);

        exec.delete(a);
        assert!(exec.get_value(a).is_err());
        assert_eq!(exec.len(), 2);
        Ok(())
    }
}
