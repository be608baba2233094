#![allow(dead_code)]

use gradscope_autograd::{GradKey, GradStore, Tensor};
use gradscope_core::{
    be::cpu::CpuExecutor,
    device::{set_default_device, Device},
    dtype::DType,
    error::Result,
    executor::set_executor,
    host::{HostElement, HostTensor},
};
use std::sync::Arc;

// Helper functions
pub fn setup_device() -> Arc<CpuExecutor> {
    set_default_device(Device::CPU);
    let exec = Arc::new(CpuExecutor::new());
    set_executor(exec.clone());
    exec
}

pub fn setup_tensor<T: HostElement>(data: Vec<T>, dtype: DType) -> Result<Tensor> {
    let len = data.len();
    setup_tensor_with_shape(data, dtype, &[len])
}

pub fn setup_tensor_with_shape<T: HostElement>(data: Vec<T>, dtype: DType, shape: &[usize]) -> Result<Tensor> {
    Tensor::from_host(HostTensor::from_vec(data, shape)?.to_dtype(dtype))
}

pub fn setup_index(data: Vec<i64>) -> Result<Tensor> {
    let len = data.len();
    Tensor::from_vec(data, &[len])
}

/// Attaches every tensor to `key` and collects their gradients.
pub fn watch(key: &GradKey, tensors: &[&Tensor]) -> Result<GradStore> {
    let store = GradStore::new();
    for t in tensors {
        store.attach(key, t)?;
    }
    Ok(store)
}

pub fn values(t: &Tensor) -> Result<Vec<f64>> {
    Ok(t.to_host()?.data().to_f64_vec())
}

pub fn grad_values(store: &GradStore, t: &Tensor) -> Result<Vec<f64>> {
    match store.get(t) {
        Some(grad) => values(&grad),
        None => Ok(Vec::new()),
    }
}

pub fn tolerance(dtype: DType) -> f64 {
    match dtype {
        DType::BF16 => 2e-2,
        DType::F16 => 5e-3,
        DType::F32 => 1e-5,
        _ => 1e-10,
    }
}

pub fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tol * e.abs().max(1.0), "{:?} vs {:?}", actual, expected);
    }
}

#[macro_export]
macro_rules! test_float_grads {
    ([$($op:ident),*]) => {
        $(
            mod $op {
                use super::*;
                use paste::paste;

                paste! {
                    #[test]
                    fn bf16() -> Result<()> {
                        test_functions::[<$op _test>](DType::BF16)
                    }

                    #[test]
                    fn f16() -> Result<()> {
                        test_functions::[<$op _test>](DType::F16)
                    }

                    #[test]
                    fn f32() -> Result<()> {
                        test_functions::[<$op _test>](DType::F32)
                    }

                    #[test]
                    fn f64() -> Result<()> {
                        test_functions::[<$op _test>](DType::F64)
                    }
                }
            }
        )*
    };
}
