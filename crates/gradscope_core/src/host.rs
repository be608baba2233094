//! Host-side tensor values: what the executor stores and hands back.

use crate::{
    device::{get_default_device, Device},
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};
use half::{bf16, f16};

/// Rust element types with a matching [`DType`].
pub trait HostElement: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn wrap(data: Vec<Self>) -> HostData;
    fn unwrap_ref(data: &HostData) -> Option<&[Self]>;
}

macro_rules! host_data {
    (@to_f64 BOOL, $x:expr) => { if $x { 1.0 } else { 0.0 } };
    (@to_f64 BF16, $x:expr) => { $x.to_f64() };
    (@to_f64 F16, $x:expr) => { $x.to_f64() };
    (@to_f64 $other:ident, $x:expr) => { $x as f64 };

    (@from_f64 BOOL, $ty:ty, $x:expr) => { $x != 0.0 };
    (@from_f64 BF16, $ty:ty, $x:expr) => { bf16::from_f64($x) };
    (@from_f64 F16, $ty:ty, $x:expr) => { f16::from_f64($x) };
    (@from_f64 $other:ident, $ty:ty, $x:expr) => { $x as $ty };

    ($($variant:ident => $ty:ty),* $(,)?) => {
        /// Flat row-major storage, one variant per dtype.
        #[derive(Debug, Clone, PartialEq)]
        pub enum HostData {
            $($variant(Vec<$ty>),)*
        }

        impl HostData {
            pub fn dtype(&self) -> DType {
                match self {
                    $(Self::$variant(_) => DType::$variant,)*
                }
            }

            pub fn len(&self) -> usize {
                match self {
                    $(Self::$variant(v) => v.len(),)*
                }
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            pub fn to_f64_vec(&self) -> Vec<f64> {
                match self {
                    $(Self::$variant(v) => v.iter().map(|&x| host_data!(@to_f64 $variant, x)).collect(),)*
                }
            }

            pub fn from_f64_slice(values: &[f64], dtype: DType) -> Self {
                match dtype {
                    $(DType::$variant => Self::$variant(values.iter().map(|&x| host_data!(@from_f64 $variant, $ty, x)).collect()),)*
                }
            }

            paste::paste! {
                $(
                    pub fn [<as_ $variant:lower>](&self) -> Option<&[$ty]> {
                        match self {
                            Self::$variant(v) => Some(v),
                            _ => None,
                        }
                    }
                )*
            }
        }

        $(
            impl HostElement for $ty {
                const DTYPE: DType = DType::$variant;

                fn wrap(data: Vec<Self>) -> HostData {
                    HostData::$variant(data)
                }
                fn unwrap_ref(data: &HostData) -> Option<&[Self]> {
                    match data {
                        HostData::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

host_data! {
    BF16 => bf16,
    F16 => f16,
    F32 => f32,
    F64 => f64,
    BOOL => bool,
    U8 => u8,
    U32 => u32,
    I8 => i8,
    I32 => i32,
    I64 => i64,
}

/// A dense, contiguous tensor value living on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    data: HostData,
    layout: Layout,
    device: Device,
}

impl HostTensor {
    pub fn new<A: TensorAdapter>(data: A) -> Result<Self> {
        let shape = data.get_shape();
        let flat = data.to_flatten_vec()?;
        Self::from_vec(flat, &shape)
    }

    pub fn from_vec<T: HostElement>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        Self::from_data(T::wrap(data), shape)
    }

    pub fn from_data(data: HostData, shape: &[usize]) -> Result<Self> {
        let size = Layout::compute_size(shape);
        if data.len() != size {
            return Err(Error::InvalidShape {
                message: format!("{} elements do not fill shape {:?}", data.len(), shape),
            });
        }
        Ok(Self {
            data,
            layout: Layout::from_shape(shape),
            device: get_default_device(),
        })
    }

    pub fn scalar<T: HostElement>(value: T) -> Self {
        Self {
            data: T::wrap(vec![value]),
            layout: Layout::from_shape(&[]),
            device: get_default_device(),
        }
    }

    pub fn full(shape: &[usize], value: f64, dtype: DType) -> Self {
        let size = Layout::compute_size(shape);
        Self {
            data: HostData::from_f64_slice(&vec![value; size], dtype),
            layout: Layout::from_shape(shape),
            device: get_default_device(),
        }
    }

    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        Self::full(shape, 0.0, dtype)
    }

    pub fn ones(shape: &[usize], dtype: DType) -> Self {
        Self::full(shape, 1.0, dtype)
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn data(&self) -> &HostData {
        &self.data
    }
    pub fn into_data(self) -> HostData {
        self.data
    }
    pub fn layout(&self) -> &Layout {
        &self.layout
    }
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }
    pub fn strides(&self) -> &[usize] {
        self.layout.strides()
    }
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }
    pub fn size(&self) -> usize {
        self.layout.size()
    }
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }
    pub fn device(&self) -> Device {
        self.device
    }

    /// Same data under a new shape of equal size.
    pub fn reshaped(&self, shape: &[usize]) -> Result<Self> {
        let mut layout = self.layout.clone();
        layout.view(shape)?;
        Ok(Self {
            data: self.data.clone(),
            layout,
            device: self.device,
        })
    }

    pub fn to_dtype(&self, dtype: DType) -> Self {
        if dtype == self.dtype() {
            return self.clone();
        }
        Self {
            data: HostData::from_f64_slice(&self.data.to_f64_vec(), dtype),
            layout: self.layout.clone(),
            device: self.device,
        }
    }

    /// Flat copy of the values, converted to `T` if the dtype differs.
    pub fn to_vec<T: HostElement>(&self) -> Vec<T> {
        match T::unwrap_ref(&self.data) {
            Some(values) => values.to_vec(),
            None => {
                let converted = HostData::from_f64_slice(&self.data.to_f64_vec(), T::DTYPE);
                T::unwrap_ref(&converted).map(|v| v.to_vec()).unwrap_or_default()
            }
        }
    }

    /// Values of a 1-D integer tensor as non-negative extents.
    pub fn to_shape_vec(&self) -> Result<Vec<usize>> {
        if self.ndim() != 1 || !self.dtype().is_int() {
            return Err(Error::InvalidArgument(format!(
                "shape must be a 1-D integer tensor, got {} of shape {:?}",
                self.dtype(),
                self.shape()
            )));
        }
        self.to_vec::<i64>()
            .into_iter()
            .map(|d| {
                usize::try_from(d).map_err(|_| Error::InvalidShape {
                    message: format!("negative extent {}", d),
                })
            })
            .collect()
    }

    /// Values of a 1-D integer tensor as signed indices.
    pub fn to_index_vec(&self) -> Result<Vec<i64>> {
        if self.ndim() != 1 || !self.dtype().is_int() {
            return Err(Error::InvalidArgument(format!(
                "index must be a 1-D integer tensor, got {} of shape {:?}",
                self.dtype(),
                self.shape()
            )));
        }
        Ok(self.to_vec::<i64>())
    }

    pub fn shape_tensor(shape: &[usize]) -> Self {
        let dims: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
        Self {
            layout: Layout::from_shape(&[dims.len()]),
            data: HostData::I64(dims),
            device: get_default_device(),
        }
    }
}

pub trait TensorAdapter: Sized {
    type Elem: HostElement;

    fn to_flatten_vec(self) -> Result<Vec<Self::Elem>>;
    fn get_shape(&self) -> Vec<usize>;
    fn dtype(&self) -> DType {
        <Self::Elem as HostElement>::DTYPE
    }
}

fn ragged(shape: &[usize]) -> Error {
    Error::InvalidShape {
        message: format!("ragged nested data, expected rows matching {:?}", shape),
    }
}

macro_rules! impl_tensor_adapter {
    ($($t:ty),*) => {
        $(
            // Scalar (0-dim)
            impl TensorAdapter for $t {
                type Elem = $t;

                fn to_flatten_vec(self) -> Result<Vec<$t>> {
                    Ok(vec![self])
                }
                fn get_shape(&self) -> Vec<usize> {
                    vec![]
                }
            }

            impl TensorAdapter for Vec<$t> {
                type Elem = $t;

                fn to_flatten_vec(self) -> Result<Vec<$t>> {
                    Ok(self)
                }
                fn get_shape(&self) -> Vec<usize> {
                    vec![self.len()]
                }
            }

            impl TensorAdapter for Vec<Vec<$t>> {
                type Elem = $t;

                fn to_flatten_vec(self) -> Result<Vec<$t>> {
                    let shape = self.get_shape();
                    let mut flat = Vec::with_capacity(shape.iter().product());
                    for row in self {
                        if row.len() != shape[1] {
                            return Err(ragged(&shape));
                        }
                        flat.extend(row);
                    }
                    Ok(flat)
                }
                fn get_shape(&self) -> Vec<usize> {
                    if self.is_empty() {
                        vec![0, 0]
                    } else {
                        vec![self.len(), self[0].len()]
                    }
                }
            }

            impl TensorAdapter for Vec<Vec<Vec<$t>>> {
                type Elem = $t;

                fn to_flatten_vec(self) -> Result<Vec<$t>> {
                    let shape = self.get_shape();
                    let mut flat = Vec::with_capacity(shape.iter().product());
                    for matrix in self {
                        if matrix.len() != shape[1] {
                            return Err(ragged(&shape));
                        }
                        for row in matrix {
                            if row.len() != shape[2] {
                                return Err(ragged(&shape));
                            }
                            flat.extend(row);
                        }
                    }
                    Ok(flat)
                }
                fn get_shape(&self) -> Vec<usize> {
                    if self.is_empty() {
                        vec![0, 0, 0]
                    } else if self[0].is_empty() {
                        vec![self.len(), 0, 0]
                    } else {
                        vec![self.len(), self[0].len(), self[0][0].len()]
                    }
                }
            }

            impl<const N: usize> TensorAdapter for [$t; N] {
                type Elem = $t;

                fn to_flatten_vec(self) -> Result<Vec<$t>> {
                    Ok(self.to_vec())
                }
                fn get_shape(&self) -> Vec<usize> {
                    vec![N]
                }
            }

            impl<const N: usize, const M: usize> TensorAdapter for [[$t; N]; M] {
                type Elem = $t;

                fn to_flatten_vec(self) -> Result<Vec<$t>> {
                    Ok(self.iter().flat_map(|row| row.iter().copied()).collect())
                }
                fn get_shape(&self) -> Vec<usize> {
                    vec![M, N]
                }
            }
        )*
    };
}

impl_tensor_adapter!(bf16, f16, f32, f64, bool, u8, u32, i8, i32, i64);
