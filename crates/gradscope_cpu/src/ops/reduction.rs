use crate::{
    element::Element,
    utils::{broadcast_strides, get_strided_index},
};

/// Folds `input` of shape `src_dims` down to `dst_dims`.
///
/// `dst_dims` must have the same rank as `src_dims`, with every axis equal to
/// the source extent or 1. Axes of extent 1 are the reduced ones.
pub fn reduce_to<T, F>(input: &[T], src_dims: &[usize], dst_dims: &[usize], init: T, f: F) -> Vec<T>
where
    T: Element,
    F: Fn(T, T) -> T,
{
    let out_size: usize = dst_dims.iter().product();
    let mut out = vec![init; out_size];
    if out_size == 0 {
        return out;
    }

    // output index of source element `i`: reduced axes collapse to stride 0
    let dst_strides = broadcast_strides(dst_dims, src_dims);
    let num_dims = src_dims.len();
    for (i, &x) in input.iter().enumerate() {
        let dst_idx = get_strided_index(i, num_dims, src_dims, &dst_strides);
        out[dst_idx] = f(out[dst_idx], x);
    }
    out
}

pub fn sum_to<T: Element>(input: &[T], src_dims: &[usize], dst_dims: &[usize]) -> Vec<T> {
    reduce_to(input, src_dims, dst_dims, T::ZERO, |acc, x| acc.add(x))
}

pub fn max_to<T: Element>(input: &[T], src_dims: &[usize], dst_dims: &[usize]) -> Vec<T> {
    reduce_to(input, src_dims, dst_dims, T::LOWEST, |acc, x| acc.max(x))
}
