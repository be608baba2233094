use crate::element::Element;
use rayon::prelude::*;

/// `[m, k] x [k, n]` product where each operand is read through `(row, col)` strides.
///
/// Passing swapped strides reads an operand transposed without copying it.
#[allow(clippy::too_many_arguments)]
pub fn matmul<T: Element>(m: usize, k: usize, n: usize, a: &[T], a_strides: [usize; 2], b: &[T], b_strides: [usize; 2]) -> Vec<T> {
    (0..m * n)
        .into_par_iter()
        .map(|idx| {
            let i = idx / n;
            let j = idx % n;
            let mut acc = T::ZERO;
            for p in 0..k {
                let lhs = a[i * a_strides[0] + p * a_strides[1]];
                let rhs = b[p * b_strides[0] + j * b_strides[1]];
                acc = acc.add(lhs.mul(rhs));
            }
            acc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_product() {
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [5.0f32, 6.0, 7.0, 8.0];
        assert_eq!(matmul(2, 2, 2, &a, [2, 1], &b, [2, 1]), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn transposed_lhs() {
        // a stored as [2, 3], read as its [3, 2] transpose
        let a = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.0f64, 1.0];
        assert_eq!(matmul(3, 2, 1, &a, [1, 3], &b, [1, 1]), vec![5.0, 7.0, 9.0]);
    }
}
