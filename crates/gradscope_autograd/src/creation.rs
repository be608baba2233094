use crate::Tensor;
use gradscope_core::{
    dtype::{get_default_dtype, DType},
    error::Result,
    executor::executor,
    host::{HostElement, HostTensor, TensorAdapter},
};

impl Tensor {
    pub fn new<A>(data: A) -> Result<Self>
    where
        A: TensorAdapter,
    {
        Self::from_host(HostTensor::new(data)?)
    }

    /// Stores `host` in this thread's executor.
    pub fn from_host(host: HostTensor) -> Result<Self> {
        let exec = executor();
        let handle = exec.put(host, false)?;
        Self::from_handle(handle, exec)
    }

    pub fn from_vec<T: HostElement>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        Self::from_host(HostTensor::from_vec(data, shape)?)
    }

    pub fn scalar<T: HostElement>(value: T) -> Result<Self> {
        Self::from_host(HostTensor::scalar(value))
    }

    pub fn full(shape: &[usize], value: f64, dtype: DType) -> Result<Self> {
        Self::from_host(HostTensor::full(shape, value, dtype))
    }

    pub fn zeros(shape: &[usize]) -> Result<Self> {
        Self::full(shape, 0.0, get_default_dtype())
    }

    pub fn zeros_with_dtype(shape: &[usize], dtype: DType) -> Result<Self> {
        Self::full(shape, 0.0, dtype)
    }

    pub fn zeros_like(src: &Tensor) -> Result<Self> {
        Self::full(src.shape(), 0.0, src.dtype())
    }

    pub fn ones(shape: &[usize]) -> Result<Self> {
        Self::full(shape, 1.0, get_default_dtype())
    }

    pub fn ones_with_dtype(shape: &[usize], dtype: DType) -> Result<Self> {
        Self::full(shape, 1.0, dtype)
    }

    pub fn ones_like(src: &Tensor) -> Result<Self> {
        Self::full(src.shape(), 1.0, src.dtype())
    }

    /// 1-D `I64` tensor holding `shape`, the form shape operands take.
    pub fn shape_tensor(shape: &[usize]) -> Result<Self> {
        Self::from_host(HostTensor::shape_tensor(shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_data_keeps_shape() -> Result<()> {
        let t = Tensor::new(vec![vec![1.0f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]])?;
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        Ok(())
    }

    #[test]
    fn like_constructors_follow_source() -> Result<()> {
        let src = Tensor::from_vec(vec![1i32, 2, 3, 4], &[2, 2])?;
        let ones = Tensor::ones_like(&src)?;
        assert_eq!(ones.dtype(), DType::I32);
        assert_eq!(ones.to_vec::<i32>()?, vec![1; 4]);
        assert!(!ones.is_grad_tracked());
        Ok(())
    }

    #[test]
    fn scalars_are_flagged() -> Result<()> {
        let s = Tensor::scalar(2.5f64)?;
        assert!(s.flags().contains(crate::TensorFlags::SCALAR));
        assert_eq!(s.ndim(), 0);
        Ok(())
    }

    #[test]
    fn shape_tensors_are_i64() -> Result<()> {
        let s = Tensor::shape_tensor(&[3, 2])?;
        assert_eq!(s.dtype(), DType::I64);
        assert_eq!(s.to_vec::<i64>()?, vec![3, 2]);
        Ok(())
    }
}
