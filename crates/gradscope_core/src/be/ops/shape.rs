use super::expect_inputs;
use crate::{
    dtype::DType,
    error::{Error, Result},
    host::HostTensor,
};
use gradscope_cpu::{ops::indexing, utils::broadcast_strides};

pub fn reshape(inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("reshape", inputs, 2)?;
    let shape = inputs[1].to_shape_vec()?;
    inputs[0].reshaped(&shape)
}

pub fn broadcast(inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("broadcast", inputs, 2)?;
    let shape = inputs[1].to_shape_vec()?;
    broadcast_to(inputs[0], &shape)
}

/// Materializes `x` broadcast to `shape`.
pub fn broadcast_to(x: &HostTensor, shape: &[usize]) -> Result<HostTensor> {
    if x.shape() == shape {
        return Ok(x.clone());
    }
    if !x.layout().can_broadcast_to(shape) {
        return Err(Error::IncompatibleShape(format!(
            "cannot broadcast {:?} to {:?}",
            x.shape(),
            shape
        )));
    }
    let strides = broadcast_strides(x.shape(), shape);
    let data = map_any!(x.data(), v => indexing::strided_copy(v, shape, &strides));
    HostTensor::from_data(data, shape)
}

pub fn get_var_shape(inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("get_var_shape", inputs, 1)?;
    Ok(HostTensor::shape_tensor(inputs[0].shape()))
}

pub fn fill(value: f64, dtype: DType, inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("fill", inputs, 1)?;
    let shape = inputs[0].to_shape_vec()?;
    Ok(HostTensor::full(&shape, value, dtype))
}

/// Inserts unit axes in list order; each index refers to the shape built so far.
pub fn add_axis(axes: &[usize], inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("add_axis", inputs, 1)?;
    let mut shape = inputs[0].shape().to_vec();
    for &axis in axes {
        if axis > shape.len() {
            return Err(Error::DimensionOutOfBounds {
                dim: axis,
                ndim: shape.len(),
            });
        }
        shape.insert(axis, 1);
    }
    inputs[0].reshaped(&shape)
}

/// Removes unit axes in list order; each index refers to the shape left so far.
pub fn remove_axis(axes: &[usize], inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("remove_axis", inputs, 1)?;
    let mut shape = inputs[0].shape().to_vec();
    for &axis in axes {
        if axis >= shape.len() {
            return Err(Error::DimensionOutOfBounds {
                dim: axis,
                ndim: shape.len(),
            });
        }
        if shape[axis] != 1 {
            return Err(Error::InvalidShape {
                message: format!("cannot remove axis {} of extent {}", axis, shape[axis]),
            });
        }
        shape.remove(axis);
    }
    inputs[0].reshaped(&shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_lists_apply_in_order() -> Result<()> {
        let x = HostTensor::new(vec![1.0f32, 2.0, 3.0])?;
        let y = add_axis(&[0, 2], &[&x])?;
        assert_eq!(y.shape(), &[1, 3, 1]);
        let z = remove_axis(&[2, 0], &[&y])?;
        assert_eq!(z.shape(), &[3]);
        assert!(remove_axis(&[0], &[&z]).is_err());
        Ok(())
    }

    #[test]
    fn broadcast_bool() -> Result<()> {
        let x = HostTensor::new(vec![vec![true], vec![false]])?;
        let y = broadcast_to(&x, &[2, 2])?;
        assert_eq!(y.to_vec::<bool>(), vec![true, true, false, false]);
        Ok(())
    }
}
