/// Row-major strides for a contiguous buffer.
#[inline]
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1;
    for d in (0..dims.len()).rev() {
        strides[d] = acc;
        acc *= dims[d];
    }
    strides
}

/// Strides that read a contiguous `src_dims` buffer as if it had `dst_dims`.
///
/// `src_dims` is aligned to the right of `dst_dims`; axes of extent 1 that
/// are stretched get stride 0. Callers validate compatibility first.
pub fn broadcast_strides(src_dims: &[usize], dst_dims: &[usize]) -> Vec<usize> {
    let src_strides = contiguous_strides(src_dims);
    let offset = dst_dims.len() - src_dims.len();
    let mut strides = vec![0; dst_dims.len()];
    for d in 0..src_dims.len() {
        strides[offset + d] = if src_dims[d] == 1 && dst_dims[offset + d] != 1 {
            0
        } else {
            src_strides[d]
        };
    }
    strides
}

#[inline]
pub fn is_contiguous(num_dims: usize, dims: &[usize], strides: &[usize]) -> bool {
    let mut acc = 1;
    for d in 0..num_dims {
        let dim_idx = num_dims - 1 - d;
        if dims[dim_idx] > 1 && acc != strides[dim_idx] {
            return false;
        }
        acc *= dims[dim_idx];
    }
    true
}

#[inline]
pub fn get_strided_index(idx: usize, num_dims: usize, dims: &[usize], strides: &[usize]) -> usize {
    let mut strided_i = 0;
    let mut remaining_idx = idx;

    for d in 0..num_dims {
        let dim_idx = num_dims - 1 - d;
        strided_i += (remaining_idx % dims[dim_idx]) * strides[dim_idx];
        remaining_idx /= dims[dim_idx];
    }

    strided_i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_of_contiguous() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn broadcast_strides_zero_stretched_axes() {
        assert_eq!(broadcast_strides(&[3], &[2, 3]), vec![0, 1]);
        assert_eq!(broadcast_strides(&[2, 1], &[2, 3]), vec![1, 0]);
        assert_eq!(broadcast_strides(&[1], &[4]), vec![0]);
    }

    #[test]
    fn strided_index_transposed() {
        // [2, 3] read through the strides of its [3, 2] transpose
        let dims = [2, 3];
        let strides = [1, 2];
        let idx: Vec<usize> = (0..6).map(|i| get_strided_index(i, 2, &dims, &strides)).collect();
        assert_eq!(idx, vec![0, 2, 4, 1, 3, 5]);
        assert!(!is_contiguous(2, &dims, &strides));
        assert!(is_contiguous(2, &dims, &[3, 1]));
    }
}
