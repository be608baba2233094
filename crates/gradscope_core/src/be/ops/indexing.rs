use super::{expect_inputs, shape::broadcast_to};
use crate::{
    error::{Error, Result},
    host::HostTensor,
    layout::Layout,
    op::AxisSlice,
};
use gradscope_cpu::ops::indexing;

/// Flat source offsets of a selection and the shape they form.
struct Selection {
    dims: Vec<usize>,
    offsets: Vec<usize>,
}

fn normalize_index(index: isize, len: usize) -> Result<usize> {
    let i = if index < 0 { index + len as isize } else { index };
    if i < 0 || i as usize >= len {
        return Err(Error::IndexOutOfBounds { index, size: len });
    }
    Ok(i as usize)
}

/// Positions a python-style `start:stop:step` slice visits on an axis of `len`.
fn slice_positions(len: usize, item: &AxisSlice) -> Result<Vec<usize>> {
    let step = item.step.unwrap_or(1);
    if step == 0 {
        return Err(Error::InvalidArgument("slice step cannot be zero".into()));
    }
    let len = len as isize;
    let clamp = |v: isize, lo: isize, hi: isize| v.max(lo).min(hi);
    let resolve = |v: isize| if v < 0 { v + len } else { v };

    let mut positions = Vec::new();
    if step > 0 {
        let start = item.start.map_or(0, |s| clamp(resolve(s), 0, len));
        let stop = item.stop.map_or(len, |s| clamp(resolve(s), 0, len));
        let mut i = start;
        while i < stop {
            positions.push(i as usize);
            i += step;
        }
    } else {
        let start = item.start.map_or(len - 1, |s| clamp(resolve(s), -1, len - 1));
        let stop = item.stop.map_or(-1, |s| clamp(resolve(s), -1, len - 1));
        let mut i = start;
        while i > stop {
            positions.push(i as usize);
            i += step;
        }
    }
    Ok(positions)
}

/// Sums one offset contribution per axis over the row-major cartesian product.
fn cartesian_offsets(contributions: &[Vec<usize>]) -> Vec<usize> {
    let total: usize = contributions.iter().map(|c| c.len()).product();
    let mut offsets = Vec::with_capacity(total);
    if total == 0 {
        return offsets;
    }
    let mut counter = vec![0usize; contributions.len()];
    for _ in 0..total {
        offsets.push(counter.iter().zip(contributions).map(|(&c, list)| list[c]).sum());
        for a in (0..contributions.len()).rev() {
            counter[a] += 1;
            if counter[a] < contributions[a].len() {
                break;
            }
            counter[a] = 0;
        }
    }
    offsets
}

fn basic_selection(shape: &[usize], items: &[AxisSlice]) -> Result<Selection> {
    let ndim = shape.len();
    let mut positions: Vec<Option<Vec<usize>>> = vec![None; ndim];
    let mut keep = vec![true; ndim];

    for item in items {
        let axis = item.axis;
        if axis >= ndim {
            return Err(Error::DimensionOutOfBounds { dim: axis, ndim });
        }
        if positions[axis].is_some() {
            return Err(Error::InvalidArgument(format!("axis {} indexed twice", axis)));
        }
        positions[axis] = Some(match item.index {
            Some(index) => {
                keep[axis] = false;
                vec![normalize_index(index, shape[axis])?]
            }
            None => slice_positions(shape[axis], item)?,
        });
    }

    let strides = Layout::compute_strides(shape);
    let positions: Vec<Vec<usize>> = positions
        .into_iter()
        .enumerate()
        .map(|(a, p)| p.unwrap_or_else(|| (0..shape[a]).collect()))
        .collect();
    let dims = positions
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(p, _)| p.len())
        .collect();
    let contributions: Vec<Vec<usize>> = positions
        .iter()
        .zip(&strides)
        .map(|(p, &s)| p.iter().map(|&i| i * s).collect())
        .collect();

    Ok(Selection {
        dims,
        offsets: cartesian_offsets(&contributions),
    })
}

/// Indexed axes collapse into one axis placed at the first indexed position.
fn vector_selection(shape: &[usize], axes: &[usize], indices: &[&HostTensor]) -> Result<Selection> {
    let ndim = shape.len();
    if axes.is_empty() || axes.len() != indices.len() {
        return Err(Error::InvalidArgument(format!(
            "{} axes with {} index tensors",
            axes.len(),
            indices.len()
        )));
    }
    if axes.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::InvalidArgument(format!("axes {:?} must be strictly ascending", axes)));
    }
    if let Some(&axis) = axes.iter().find(|&&a| a >= ndim) {
        return Err(Error::DimensionOutOfBounds { dim: axis, ndim });
    }

    let mut resolved = Vec::with_capacity(axes.len());
    for (&axis, index) in axes.iter().zip(indices) {
        let values = index
            .to_index_vec()?
            .into_iter()
            .map(|i| normalize_index(i as isize, shape[axis]))
            .collect::<Result<Vec<_>>>()?;
        resolved.push(values);
    }
    let n = resolved[0].len();
    if resolved.iter().any(|r| r.len() != n) {
        return Err(Error::IncompatibleShape("index tensors differ in length".into()));
    }

    let strides = Layout::compute_strides(shape);
    let vector: Vec<usize> = (0..n)
        .map(|k| axes.iter().zip(&resolved).map(|(&a, r)| r[k] * strides[a]).sum())
        .collect();

    let mut dims = Vec::with_capacity(ndim - axes.len() + 1);
    let mut contributions = Vec::with_capacity(dims.capacity());
    for a in 0..ndim {
        if a == axes[0] {
            dims.push(n);
            contributions.push(vector.clone());
        }
        if !axes.contains(&a) {
            dims.push(shape[a]);
            contributions.push((0..shape[a]).map(|i| i * strides[a]).collect());
        }
    }

    Ok(Selection {
        dims,
        offsets: cartesian_offsets(&contributions),
    })
}

fn gather(x: &HostTensor, selection: &Selection) -> Result<HostTensor> {
    let data = map_any!(x.data(), v => indexing::gather(v, &selection.offsets));
    HostTensor::from_data(data, &selection.dims)
}

fn scatter(x: &HostTensor, value: &HostTensor, selection: &Selection) -> Result<HostTensor> {
    let value = broadcast_to(value, &selection.dims)?;
    let data = zip_any!(x.data(), value.data(), (dst, src) => {
        let mut out = dst.clone();
        indexing::scatter(&mut out, &selection.offsets, src);
        out
    });
    HostTensor::from_data(data, x.shape())
}

pub fn subtensor(items: &[AxisSlice], inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("subtensor", inputs, 1)?;
    let selection = basic_selection(inputs[0].shape(), items)?;
    gather(inputs[0], &selection)
}

pub fn set_subtensor(items: &[AxisSlice], inputs: &[&HostTensor]) -> Result<HostTensor> {
    expect_inputs("set_subtensor", inputs, 2)?;
    let selection = basic_selection(inputs[0].shape(), items)?;
    scatter(inputs[0], inputs[1], &selection)
}

pub fn indexing_multi_axis_vec(axes: &[usize], inputs: &[&HostTensor]) -> Result<HostTensor> {
    if inputs.len() < 2 {
        return Err(Error::InvalidArgument("indexing expects a tensor and index tensors".into()));
    }
    let selection = vector_selection(inputs[0].shape(), axes, &inputs[1..])?;
    gather(inputs[0], &selection)
}

pub fn indexing_set_multi_axis_vec(axes: &[usize], inputs: &[&HostTensor]) -> Result<HostTensor> {
    if inputs.len() < 3 {
        return Err(Error::InvalidArgument(
            "indexing set expects a tensor, a value and index tensors".into(),
        ));
    }
    let selection = vector_selection(inputs[0].shape(), axes, &inputs[2..])?;
    scatter(inputs[0], inputs[1], &selection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(axis: usize, start: Option<isize>, stop: Option<isize>, step: Option<isize>) -> AxisSlice {
        AxisSlice {
            axis,
            start,
            stop,
            step,
            index: None,
        }
    }

    #[test]
    fn python_slices() -> Result<()> {
        assert_eq!(slice_positions(5, &item(0, Some(1), Some(4), None))?, vec![1, 2, 3]);
        assert_eq!(slice_positions(5, &item(0, None, None, Some(2)))?, vec![0, 2, 4]);
        assert_eq!(slice_positions(5, &item(0, Some(-2), None, None))?, vec![3, 4]);
        assert_eq!(slice_positions(4, &item(0, None, None, Some(-1)))?, vec![3, 2, 1, 0]);
        assert_eq!(slice_positions(4, &item(0, Some(10), None, None))?, Vec::<usize>::new());
        assert!(slice_positions(4, &item(0, None, None, Some(0))).is_err());
        Ok(())
    }

    #[test]
    fn subtensor_index_drops_axis() -> Result<()> {
        let x = HostTensor::new(vec![vec![1i32, 2, 3], vec![4, 5, 6]])?;
        let row = subtensor(&[AxisSlice::index(0, -1)], &[&x])?;
        assert_eq!(row.shape(), &[3]);
        assert_eq!(row.to_vec::<i32>(), vec![4, 5, 6]);

        let cols = subtensor(&[AxisSlice::range(1, Some(1), None)], &[&x])?;
        assert_eq!(cols.shape(), &[2, 2]);
        assert_eq!(cols.to_vec::<i32>(), vec![2, 3, 5, 6]);
        Ok(())
    }

    #[test]
    fn set_subtensor_broadcasts_value() -> Result<()> {
        let x = HostTensor::zeros(&[2, 3], crate::dtype::DType::F32);
        let v = HostTensor::scalar(7.0f32);
        let y = set_subtensor(&[AxisSlice::index(1, 0)], &[&x, &v])?;
        assert_eq!(y.to_vec::<f32>(), vec![7.0, 0.0, 0.0, 7.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn vector_indexing_collapses_axes() -> Result<()> {
        // x[[0, 1], :, [2, 0]] on a [2, 2, 3] tensor
        let x = HostTensor::from_vec((0..12).map(|v| v as f64).collect(), &[2, 2, 3])?;
        let i0 = HostTensor::new(vec![0i64, 1])?;
        let i2 = HostTensor::new(vec![2i64, 0])?;
        let y = indexing_multi_axis_vec(&[0, 2], &[&x, &i0, &i2])?;
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y.to_vec::<f64>(), vec![2.0, 5.0, 6.0, 9.0]);

        let rows = indexing_multi_axis_vec(&[1], &[&x, &HostTensor::new(vec![1i32])?])?;
        assert_eq!(rows.shape(), &[2, 1, 3]);
        Ok(())
    }

    #[test]
    fn vector_set_writes_rows() -> Result<()> {
        let x = HostTensor::zeros(&[3, 2], crate::dtype::DType::I32);
        let idx = HostTensor::new(vec![2i64, 0])?;
        let v = HostTensor::new(vec![vec![1i32, 2], vec![3, 4]])?;
        let y = indexing_set_multi_axis_vec(&[0], &[&x, &v, &idx])?;
        assert_eq!(y.to_vec::<i32>(), vec![3, 4, 0, 0, 1, 2]);
        assert!(indexing_multi_axis_vec(&[0], &[&x, &HostTensor::new(vec![3i64])?]).is_err());
        Ok(())
    }
}
