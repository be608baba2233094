use crate::element::Element;
use rayon::prelude::*;

pub fn unary_map<T, U, F>(input: &[T], f: F) -> Vec<U>
where
    T: Copy + Send + Sync,
    U: Send,
    F: Fn(T) -> U + Send + Sync,
{
    input.par_iter().map(|&x| f(x)).collect()
}

macro_rules! unary_op {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            pub fn $name<T: Element>(input: &[T]) -> Vec<T> {
                unary_map(input, $op)
            }
        )*
    };
}

unary_op! {
    neg => |x: T| x.neg(),
    exp => |x: T| x.exp(),
    log => |x: T| x.ln(),
    sin => |x: T| x.sin(),
    cos => |x: T| x.cos(),
    relu => |x: T| if x > T::ZERO { x } else { T::ZERO },
}

/// Converts every element through `f64`.
pub fn cast<T: Element, U: Element>(input: &[T]) -> Vec<U> {
    unary_map(input, |x: T| U::from_f64(x.to_f64()))
}
