use crate::utils::get_strided_index;
use rayon::prelude::*;

/// Reads `input` at precomputed flat offsets.
pub fn gather<T: Copy + Send + Sync>(input: &[T], offsets: &[usize]) -> Vec<T> {
    offsets.par_iter().map(|&o| input[o]).collect()
}

/// Materializes `input` under `dims` through (possibly zero) `strides`.
pub fn strided_copy<T: Copy + Send + Sync>(input: &[T], dims: &[usize], strides: &[usize]) -> Vec<T> {
    let num_els: usize = dims.iter().product();
    let num_dims = dims.len();
    (0..num_els)
        .into_par_iter()
        .map(|i| input[get_strided_index(i, num_dims, dims, strides)])
        .collect()
}

/// Writes `values[i]` to `out[offsets[i]]`. Later writes win on repeated offsets.
pub fn scatter<T: Copy>(out: &mut [T], offsets: &[usize], values: &[T]) {
    for (&o, &v) in offsets.iter().zip(values) {
        out[o] = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_and_scatter() {
        let x = [10, 20, 30, 40];
        assert_eq!(gather(&x, &[3, 0, 3]), vec![40, 10, 40]);

        let mut out = [0; 4];
        scatter(&mut out, &[1, 3], &[7, 9]);
        assert_eq!(out, [0, 7, 0, 9]);
    }

    #[test]
    fn strided_copy_repeats_rows() {
        let x = [true, false];
        assert_eq!(strided_copy(&x, &[2, 2], &[0, 1]), vec![true, false, true, false]);
    }
}
