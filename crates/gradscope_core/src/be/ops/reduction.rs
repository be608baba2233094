use crate::{
    error::{Error, Result},
    host::HostTensor,
    op::ReduceMode,
};
use gradscope_cpu::ops::reduction;

/// `(x)` reduces along `axis` (kept with extent 1) or to 0-dim; `(x, shape)` reduces to `shape`.
pub fn reduce(mode: ReduceMode, axis: Option<usize>, inputs: &[&HostTensor]) -> Result<HostTensor> {
    let x = *inputs.first().ok_or_else(|| Error::InvalidArgument("reduce expects an input".into()))?;
    let ndim = x.ndim();

    let (padded, out_shape) = match (inputs.len(), axis) {
        (1, Some(a)) => {
            if a >= ndim {
                return Err(Error::DimensionOutOfBounds { dim: a, ndim });
            }
            let mut dims = x.shape().to_vec();
            dims[a] = 1;
            (dims.clone(), dims)
        }
        (1, None) => (vec![1; ndim], vec![]),
        (2, None) => {
            let target = inputs[1].to_shape_vec()?;
            (reduce_target(x.shape(), &target)?, target)
        }
        (2, Some(_)) => {
            return Err(Error::InvalidArgument(
                "reduce to a target shape takes no axis".into(),
            ))
        }
        (n, _) => return Err(Error::InvalidArgument(format!("reduce expects 1 or 2 inputs, got {}", n))),
    };

    let data = match mode {
        ReduceMode::Sum => map_arith!(x.data(), v => reduction::sum_to(v, x.shape(), &padded)),
        ReduceMode::Max => map_arith!(x.data(), v => reduction::max_to(v, x.shape(), &padded)),
    };
    HostTensor::from_data(data, &out_shape)
}

/// Left-pads `target` to the rank of `src`, checking every axis is kept or reduced to 1.
fn reduce_target(src: &[usize], target: &[usize]) -> Result<Vec<usize>> {
    let incompatible = || Error::IncompatibleShape(format!("cannot reduce {:?} to {:?}", src, target));
    if target.len() > src.len() {
        return Err(incompatible());
    }
    let mut padded = vec![1; src.len() - target.len()];
    padded.extend_from_slice(target);
    if padded.iter().zip(src).any(|(&t, &s)| t != s && t != 1) {
        return Err(incompatible());
    }
    Ok(padded)
}
