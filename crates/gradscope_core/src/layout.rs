use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl Layout {
    pub fn from_shape(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            strides: Self::compute_strides(shape),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
    pub fn size_dim(&self, dim: usize) -> Option<usize> {
        self.shape.get(dim).copied()
    }
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn view(&mut self, new_shape: &[usize]) -> Result<()> {
        let old_size = self.size();
        let new_size = Self::compute_size(new_shape);

        if old_size != new_size {
            return Err(Error::IncompatibleShape(format!(
                "Cannot reshape layout of size {} to size {}",
                old_size, new_size
            )));
        }

        self.shape = new_shape.to_vec();
        self.strides = Self::compute_strides(new_shape);

        Ok(())
    }

    // helper

    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        gradscope_cpu::utils::contiguous_strides(shape)
    }

    pub fn compute_size(shape: &[usize]) -> usize {
        shape.iter().product()
    }

    pub fn can_broadcast_to(&self, target: &[usize]) -> bool {
        if self.shape.len() > target.len() {
            return false;
        }
        let rank_diff = target.len() - self.shape.len();
        self.shape
            .iter()
            .zip(&target[rank_diff..])
            .all(|(&a, &b)| a == b || a == 1)
    }

    /// numpy broadcast of two shapes.
    pub fn broadcast_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
        let ndim = lhs.len().max(rhs.len());
        let mut out = vec![0; ndim];
        for i in 0..ndim {
            let l = if i < ndim - lhs.len() { 1 } else { lhs[i - (ndim - lhs.len())] };
            let r = if i < ndim - rhs.len() { 1 } else { rhs[i - (ndim - rhs.len())] };
            out[i] = match (l, r) {
                (l, r) if l == r => l,
                (1, r) => r,
                (l, 1) => l,
                _ => {
                    return Err(Error::IncompatibleShape(format!(
                        "Cannot broadcast shapes {:?} and {:?}",
                        lhs, rhs
                    )))
                }
            };
        }
        Ok(out)
    }
}
