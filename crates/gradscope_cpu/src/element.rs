use half::{bf16, f16};

/// Numeric element the kernels operate on.
///
/// Integer arithmetic wraps and integer division by zero yields zero.
/// Transcendental functions on integers go through `f64` and truncate.
pub trait Element: Copy + Send + Sync + PartialOrd + 'static {
    const ZERO: Self;
    const ONE: Self;
    const LOWEST: Self;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;

    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> Self;

    fn neg(self) -> Self {
        Self::ZERO.sub(self)
    }
    fn exp(self) -> Self {
        Self::from_f64(self.to_f64().exp())
    }
    fn ln(self) -> Self {
        Self::from_f64(self.to_f64().ln())
    }
    fn sin(self) -> Self {
        Self::from_f64(self.to_f64().sin())
    }
    fn cos(self) -> Self {
        Self::from_f64(self.to_f64().cos())
    }
    fn max(self, rhs: Self) -> Self {
        if self >= rhs {
            self
        } else {
            rhs
        }
    }
}

macro_rules! impl_float_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const ZERO: Self = 0.0;
                const ONE: Self = 1.0;
                const LOWEST: Self = <$t>::NEG_INFINITY;

                #[inline]
                fn from_f64(v: f64) -> Self {
                    v as $t
                }
                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }
                #[inline]
                fn sub(self, rhs: Self) -> Self {
                    self - rhs
                }
                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }
                #[inline]
                fn div(self, rhs: Self) -> Self {
                    self / rhs
                }
                #[inline]
                fn neg(self) -> Self {
                    -self
                }
                #[inline]
                fn exp(self) -> Self {
                    <$t>::exp(self)
                }
                #[inline]
                fn ln(self) -> Self {
                    <$t>::ln(self)
                }
                #[inline]
                fn sin(self) -> Self {
                    <$t>::sin(self)
                }
                #[inline]
                fn cos(self) -> Self {
                    <$t>::cos(self)
                }
            }
        )*
    };
}

macro_rules! impl_half_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const ZERO: Self = <$t>::ZERO;
                const ONE: Self = <$t>::ONE;
                const LOWEST: Self = <$t>::NEG_INFINITY;

                #[inline]
                fn from_f64(v: f64) -> Self {
                    <$t>::from_f64(v)
                }
                #[inline]
                fn to_f64(self) -> f64 {
                    <$t>::to_f64(self)
                }
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self + rhs
                }
                #[inline]
                fn sub(self, rhs: Self) -> Self {
                    self - rhs
                }
                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self * rhs
                }
                #[inline]
                fn div(self, rhs: Self) -> Self {
                    self / rhs
                }
                #[inline]
                fn neg(self) -> Self {
                    -self
                }
            }
        )*
    };
}

macro_rules! impl_int_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const ZERO: Self = 0;
                const ONE: Self = 1;
                const LOWEST: Self = <$t>::MIN;

                #[inline]
                fn from_f64(v: f64) -> Self {
                    v as $t
                }
                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }
                #[inline]
                fn add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }
                #[inline]
                fn sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }
                #[inline]
                fn mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }
                #[inline]
                fn div(self, rhs: Self) -> Self {
                    if rhs == 0 {
                        0
                    } else {
                        self.wrapping_div(rhs)
                    }
                }
            }
        )*
    };
}

impl_float_element!(f32, f64);
impl_half_element!(bf16, f16);
impl_int_element!(u8, u32, i8, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_division_by_zero_is_zero() {
        assert_eq!(Element::div(7i32, 0), 0);
        assert_eq!(Element::div(7i64, 2), 3);
    }

    #[test]
    fn half_roundtrips_through_f64() {
        let v = <f16 as Element>::from_f64(1.5);
        assert_eq!(Element::to_f64(v), 1.5);
        assert_eq!(Element::to_f64(Element::neg(v)), -1.5);
    }

    #[test]
    fn unsigned_neg_wraps() {
        assert_eq!(Element::neg(1u8), u8::MAX);
    }
}
