use crate::{element::Element, utils::get_strided_index};
use rayon::prelude::*;

/// Applies `f` elementwise over `dims`, reading each side through its own strides.
pub fn binary_map<T, U, F>(dims: &[usize], lhs: &[T], lhs_strides: &[usize], rhs: &[T], rhs_strides: &[usize], f: F) -> Vec<U>
where
    T: Copy + Send + Sync,
    U: Send,
    F: Fn(T, T) -> U + Send + Sync,
{
    let num_els: usize = dims.iter().product();
    let num_dims = dims.len();

    (0..num_els)
        .into_par_iter()
        .map(|i| {
            let lhs_idx = get_strided_index(i, num_dims, dims, lhs_strides);
            let rhs_idx = get_strided_index(i, num_dims, dims, rhs_strides);
            f(lhs[lhs_idx], rhs[rhs_idx])
        })
        .collect()
}

macro_rules! binary_op {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            pub fn $name<T: Element>(dims: &[usize], lhs: &[T], lhs_strides: &[usize], rhs: &[T], rhs_strides: &[usize]) -> Vec<T> {
                binary_map(dims, lhs, lhs_strides, rhs, rhs_strides, $op)
            }
        )*
    };
}

binary_op! {
    add => |a: T, b: T| a.add(b),
    sub => |a: T, b: T| a.sub(b),
    mul => |a: T, b: T| a.mul(b),
    div => |a: T, b: T| a.div(b),
    // gradient of relu: passes `b` where `a` is positive
    relu_grad => |a: T, b: T| if a > T::ZERO { b } else { T::ZERO },
}
