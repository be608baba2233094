mod utils;

use gradscope_autograd::{
    backward_graph::{get_backward_graph, LogicalTensorDesc},
    GradKey, Tensor,
};
use gradscope_core::{
    device::Device,
    dtype::DType,
    error::Result,
    op::{AxisSlice, ElemwiseMode, Op, ReduceMode},
};
use std::sync::Arc;
use utils::{
    assert_close, grad_values, setup_device, setup_index, setup_tensor, setup_tensor_with_shape, tolerance, values,
    watch,
};

#[test]
fn equal_ops_share_one_cached_graph() -> Result<()> {
    let descs = [LogicalTensorDesc::new(DType::F32, Device::CPU); 2];
    let first = Op::elemwise(ElemwiseMode::Mul);
    let second = Op::elemwise(ElemwiseMode::Mul);

    let a = get_backward_graph(&first, &descs, &[true, true], &[true])?.expect("mul has a backward");
    let b = get_backward_graph(&second, &descs, &[true, true], &[true])?.expect("mul has a backward");
    assert!(Arc::ptr_eq(&a, &b));

    let other = get_backward_graph(&first, &descs, &[true, false], &[true])?.expect("mul has a backward");
    assert!(!Arc::ptr_eq(&a, &other));

    let max = Op::Reduce {
        mode: ReduceMode::Max,
        axis: None,
    };
    assert!(get_backward_graph(&max, &descs[..1], &[true], &[true])?.is_none());
    assert!(get_backward_graph(&max, &descs[..1], &[true], &[true])?.is_none());
    Ok(())
}

#[test]
fn cached_graph_serves_every_shape() -> Result<()> {
    setup_device();
    let shapes: [&[usize]; 3] = [&[3], &[2, 2], &[1, 5]];
    for shape in shapes {
        let n: usize = shape.iter().product();
        let a_data: Vec<f32> = (1..=n).map(|v| v as f32).collect();
        let b_data: Vec<f32> = (1..=n).map(|v| (v * 10) as f32).collect();
        let a = setup_tensor_with_shape(a_data.clone(), DType::F32, shape)?;
        let b = setup_tensor_with_shape(b_data.clone(), DType::F32, shape)?;
        let key = GradKey::new();
        let store = watch(&key, &[&a, &b])?;

        let c = a.mul(&b)?;
        key.backward(&[c.clone()], &[Tensor::ones_like(&c)?])?;

        let da = store.get(&a).expect("a receives a gradient");
        assert_eq!(da.shape(), shape);
        assert_eq!(values(&da)?, b_data.iter().map(|&v| v as f64).collect::<Vec<_>>());
        assert_eq!(grad_values(&store, &b)?, a_data.iter().map(|&v| v as f64).collect::<Vec<_>>());
    }
    Ok(())
}

mod test_functions {
    use super::*;

    pub fn div_test(dtype: DType) -> Result<()> {
        setup_device();
        let a = setup_tensor(vec![2.0f32, 4.0], dtype)?;
        let b = setup_tensor(vec![2.0f32], dtype)?;
        let key = GradKey::new();
        let store = watch(&key, &[&a, &b])?;

        let c = a.div(&b)?;
        key.backward(&[c.clone()], &[Tensor::ones_like(&c)?])?;

        assert_close(&grad_values(&store, &a)?, &[0.5, 0.5], tolerance(dtype));
        assert_close(&grad_values(&store, &b)?, &[-1.5], tolerance(dtype));
        Ok(())
    }

    pub fn log_test(dtype: DType) -> Result<()> {
        setup_device();
        let x = setup_tensor(vec![1.0f32, 2.0, 4.0], dtype)?;
        let key = GradKey::new();
        let store = watch(&key, &[&x])?;

        let y = x.log()?;
        key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

        assert_close(&grad_values(&store, &x)?, &[1.0, 0.5, 0.25], tolerance(dtype));
        Ok(())
    }

    pub fn exp_test(dtype: DType) -> Result<()> {
        setup_device();
        let x = setup_tensor(vec![0.0f32, 1.0], dtype)?;
        let key = GradKey::new();
        let store = watch(&key, &[&x])?;

        let y = x.exp()?;
        let seed = setup_tensor(vec![2.0f32, 1.0], dtype)?;
        key.backward(&[y], &[seed])?;

        assert_close(&grad_values(&store, &x)?, &[2.0, 1.0f64.exp()], tolerance(dtype));
        Ok(())
    }

    pub fn trig_test(dtype: DType) -> Result<()> {
        setup_device();
        let x = setup_tensor(vec![0.0f32, 0.5], dtype)?;
        let key = GradKey::new();
        let store = watch(&key, &[&x])?;

        // d/dx cos(sin x) = -sin(sin x) cos x
        let y = x.sin()?.cos()?;
        key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

        let expected: Vec<f64> = values(&x)?.iter().map(|v| -(v.sin().sin()) * v.cos()).collect();
        assert_close(&grad_values(&store, &x)?, &expected, tolerance(dtype) * 4.0);
        Ok(())
    }

    pub fn relu_test(dtype: DType) -> Result<()> {
        setup_device();
        let x = setup_tensor(vec![-1.0f32, 2.0, 0.0, 3.0], dtype)?;
        let key = GradKey::new();
        let store = watch(&key, &[&x])?;

        let y = x.relu()?.neg()?;
        key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

        assert_close(&grad_values(&store, &x)?, &[0.0, -1.0, 0.0, -1.0], tolerance(dtype));
        Ok(())
    }
}

test_float_grads!([div, log, exp, trig, relu]);

#[test]
fn matmul_grads_for_every_transpose() -> Result<()> {
    setup_device();
    let a = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let at = vec![1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0];
    let bt = vec![1.0f32, 3.0, 5.0, 2.0, 4.0, 6.0];

    let da = vec![3.0, 7.0, 11.0, 3.0, 7.0, 11.0];
    let db = vec![5.0, 5.0, 7.0, 7.0, 9.0, 9.0];
    let dat = vec![3.0, 3.0, 7.0, 7.0, 11.0, 11.0];
    let dbt = vec![5.0, 7.0, 9.0, 5.0, 7.0, 9.0];

    let cases = [
        (false, false, (&a, [2usize, 3], &da), (&b, [3usize, 2], &db)),
        (true, false, (&at, [3, 2], &dat), (&b, [3, 2], &db)),
        (false, true, (&a, [2, 3], &da), (&bt, [2, 3], &dbt)),
        (true, true, (&at, [3, 2], &dat), (&bt, [2, 3], &dbt)),
    ];
    for (ta, tb, (lhs, lhs_shape, dlhs), (rhs, rhs_shape, drhs)) in cases {
        let x = setup_tensor_with_shape(lhs.clone(), DType::F32, &lhs_shape)?;
        let w = setup_tensor_with_shape(rhs.clone(), DType::F32, &rhs_shape)?;
        let key = GradKey::new();
        let store = watch(&key, &[&x, &w])?;

        let y = x.matmul_t(&w, ta, tb)?;
        assert_eq!(values(&y)?, vec![22.0, 28.0, 49.0, 64.0]);
        key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

        assert_eq!(&grad_values(&store, &x)?, dlhs, "lhs, transposes ({}, {})", ta, tb);
        assert_eq!(&grad_values(&store, &w)?, drhs, "rhs, transposes ({}, {})", ta, tb);
    }
    Ok(())
}

#[test]
fn set_subtensor_splits_the_gradient() -> Result<()> {
    setup_device();
    let x = setup_tensor_with_shape(vec![1.0f32; 6], DType::F32, &[2, 3])?;
    let v = setup_tensor(vec![7.0f32, 8.0], DType::F32)?;
    let key = GradKey::new();
    let store = watch(&key, &[&x, &v])?;

    let y = x.set_subtensor(&[AxisSlice::range(1, Some(1), None)], &v)?;
    assert_eq!(values(&y)?, vec![1.0, 7.0, 8.0, 1.0, 7.0, 8.0]);
    key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

    assert_eq!(grad_values(&store, &x)?, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    assert_eq!(grad_values(&store, &v)?, vec![2.0, 2.0]);
    Ok(())
}

#[test]
fn index_set_splits_the_gradient() -> Result<()> {
    setup_device();
    let x = setup_tensor_with_shape(vec![0.0f32; 6], DType::F32, &[3, 2])?;
    let v = setup_tensor_with_shape(vec![1.0f32, 2.0], DType::F32, &[1, 2])?;
    let idx = setup_index(vec![0, 2])?;
    let key = GradKey::new();
    let store = watch(&key, &[&x, &v])?;

    let y = x.index_set(&[0], &v, &[idx])?;
    assert_eq!(values(&y)?, vec![1.0, 2.0, 0.0, 0.0, 1.0, 2.0]);
    let seed = setup_tensor_with_shape(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], DType::F32, &[3, 2])?;
    key.backward(&[y], &[seed])?;

    assert_eq!(grad_values(&store, &x)?, vec![0.0, 0.0, 3.0, 4.0, 0.0, 0.0]);
    assert_eq!(grad_values(&store, &v)?, vec![6.0, 8.0]);
    Ok(())
}

#[test]
fn broadcast_reduces_back() -> Result<()> {
    setup_device();
    let x = setup_tensor_with_shape(vec![1.0f32, 2.0], DType::F32, &[2, 1])?;
    let key = GradKey::new();
    let store = watch(&key, &[&x])?;

    let y = x.broadcast(&[2, 3])?;
    key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

    let dx = store.get(&x).expect("x receives a gradient");
    assert_eq!(dx.shape(), &[2, 1]);
    assert_eq!(values(&dx)?, vec![3.0, 3.0]);
    Ok(())
}

#[test]
fn type_conversion_returns_source_dtype() -> Result<()> {
    setup_device();
    let x = setup_tensor(vec![1.5f32, 2.5], DType::F32)?;
    let key = GradKey::new();
    let store = watch(&key, &[&x])?;

    let y = x.to_dtype(DType::F64)?;
    assert_eq!(y.dtype(), DType::F64);
    key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

    let dx = store.get(&x).expect("x receives a gradient");
    assert_eq!(dx.dtype(), DType::F32);
    assert_eq!(dx.to_vec::<f32>()?, vec![1.0, 1.0]);
    Ok(())
}

#[test]
fn half_precision_grads_read_back() -> Result<()> {
    setup_device();
    let x = setup_tensor(vec![1.0f32, 2.0], DType::BF16)?;
    let key = GradKey::new();
    let store = watch(&key, &[&x])?;

    let y = x.mul(&x)?;
    key.backward(&[y.clone()], &[Tensor::ones_like(&y)?])?;

    let dx = store.get(&x).expect("x receives a gradient");
    assert_eq!(dx.to_vec::<half::bf16>()?, vec![half::bf16::from_f32(2.0), half::bf16::from_f32(4.0)]);
    Ok(())
}
