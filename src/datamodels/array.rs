//! Dtype-tagged n-dimensional arrays, the only non-scalar leaves of a model tree.

use super::error::ModelError;
use byteorder::{ByteOrder, LittleEndian};
use ndarray::{Array, ArrayD, Dimension, IxDyn};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Element types an array in a data model may have, named the way ASDF names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// `bool8`, stored as one byte
    #[serde(rename = "bool8", alias = "bool")]
    Bool,
    /// `uint8`
    Uint8,
    /// `uint16`
    Uint16,
    /// `uint32`
    Uint32,
    /// `int32`
    Int32,
    /// `int64`
    Int64,
    /// `float32`
    Float32,
    /// `float64`
    Float64,
}

impl DType {
    /// Every supported dtype.
    pub const ALL: [DType; 8] = [
        DType::Bool,
        DType::Uint8,
        DType::Uint16,
        DType::Uint32,
        DType::Int32,
        DType::Int64,
        DType::Float32,
        DType::Float64,
    ];

    /// The ASDF datatype name.
    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool8",
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    /// The size of one element in bytes.
    pub fn item_size(&self) -> usize {
        match self {
            DType::Bool | DType::Uint8 => 1,
            DType::Uint16 => 2,
            DType::Uint32 | DType::Int32 | DType::Float32 => 4,
            DType::Int64 | DType::Float64 => 8,
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" | "bool8" => Ok(DType::Bool),
            _ => DType::ALL
                .iter()
                .find(|dtype| dtype.name() == s)
                .copied()
                .ok_or_else(|| ModelError::UnknownDType {
                    name: s.to_string(),
                }),
        }
    }
}

/// A primitive that can live in an [`NdArray`].
pub trait Element: Copy + Default + PartialEq + Send + Sync + 'static {
    /// The dtype of this element.
    const DTYPE: DType;

    /// Wrap an array of this element into an [`NdArray`].
    fn wrap(array: ArrayD<Self>) -> NdArray;

    /// Unwrap an [`NdArray`] holding this element, handing it back otherwise.
    fn unwrap(array: NdArray) -> Result<ArrayD<Self>, NdArray>;

    /// Numeric value as f64, used for dtype casts.
    fn to_f64(self) -> f64;

    /// Cast from f64 with `as` semantics.
    fn from_f64(value: f64) -> Self;

    /// Decode little-endian bytes into `out`. `bytes.len()` must be
    /// `out.len() * Self::DTYPE.item_size()`.
    fn read_le(bytes: &[u8], out: &mut [Self]);

    /// Encode `values` as little-endian bytes onto the end of `out`.
    fn write_le(values: &[Self], out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($t:ty, $variant:ident, $read:ident, $write:ident) => {
        impl Element for $t {
            const DTYPE: DType = DType::$variant;

            fn wrap(array: ArrayD<Self>) -> NdArray {
                NdArray::$variant(array)
            }

            fn unwrap(array: NdArray) -> Result<ArrayD<Self>, NdArray> {
                match array {
                    NdArray::$variant(array) => Ok(array),
                    other => Err(other),
                }
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn read_le(bytes: &[u8], out: &mut [Self]) {
                LittleEndian::$read(bytes, out);
            }

            fn write_le(values: &[Self], out: &mut Vec<u8>) {
                let start = out.len();
                out.resize(start + values.len() * std::mem::size_of::<$t>(), 0);
                LittleEndian::$write(values, &mut out[start..]);
            }
        }
    };
}

impl_element!(u16, Uint16, read_u16_into, write_u16_into);
impl_element!(u32, Uint32, read_u32_into, write_u32_into);
impl_element!(i32, Int32, read_i32_into, write_i32_into);
impl_element!(i64, Int64, read_i64_into, write_i64_into);
impl_element!(f32, Float32, read_f32_into, write_f32_into);
impl_element!(f64, Float64, read_f64_into, write_f64_into);

impl Element for u8 {
    const DTYPE: DType = DType::Uint8;

    fn wrap(array: ArrayD<Self>) -> NdArray {
        NdArray::Uint8(array)
    }

    fn unwrap(array: NdArray) -> Result<ArrayD<Self>, NdArray> {
        match array {
            NdArray::Uint8(array) => Ok(array),
            other => Err(other),
        }
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as u8
    }

    fn read_le(bytes: &[u8], out: &mut [Self]) {
        out.copy_from_slice(bytes);
    }

    fn write_le(values: &[Self], out: &mut Vec<u8>) {
        out.extend_from_slice(values);
    }
}

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn wrap(array: ArrayD<Self>) -> NdArray {
        NdArray::Bool(array)
    }

    fn unwrap(array: NdArray) -> Result<ArrayD<Self>, NdArray> {
        match array {
            NdArray::Bool(array) => Ok(array),
            other => Err(other),
        }
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }

    fn read_le(bytes: &[u8], out: &mut [Self]) {
        for (value, &byte) in out.iter_mut().zip(bytes) {
            *value = byte != 0;
        }
    }

    fn write_le(values: &[Self], out: &mut Vec<u8>) {
        out.extend(values.iter().map(|&value| u8::from(value)));
    }
}

/// An n-dimensional array of one of the supported [`DType`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum NdArray {
    /// bool array
    Bool(ArrayD<bool>),
    /// uint8 array
    Uint8(ArrayD<u8>),
    /// uint16 array
    Uint16(ArrayD<u16>),
    /// uint32 array
    Uint32(ArrayD<u32>),
    /// int32 array
    Int32(ArrayD<i32>),
    /// int64 array
    Int64(ArrayD<i64>),
    /// float32 array
    Float32(ArrayD<f32>),
    /// float64 array
    Float64(ArrayD<f64>),
}

/// Apply `$body` to the inner `ArrayD` of any variant.
macro_rules! with_inner {
    ($array:expr, $inner:ident => $body:expr) => {
        match $array {
            NdArray::Bool($inner) => $body,
            NdArray::Uint8($inner) => $body,
            NdArray::Uint16($inner) => $body,
            NdArray::Uint32($inner) => $body,
            NdArray::Int32($inner) => $body,
            NdArray::Int64($inner) => $body,
            NdArray::Float32($inner) => $body,
            NdArray::Float64($inner) => $body,
        }
    };
}

fn cast<T: Element>(array: &ArrayD<T>, dtype: DType) -> NdArray {
    fn to<T: Element, U: Element>(array: &ArrayD<T>) -> NdArray {
        U::wrap(array.mapv(|value| U::from_f64(value.to_f64())))
    }
    if dtype == T::DTYPE {
        return T::wrap(array.clone());
    }
    match dtype {
        DType::Bool => to::<T, bool>(array),
        DType::Uint8 => to::<T, u8>(array),
        DType::Uint16 => to::<T, u16>(array),
        DType::Uint32 => to::<T, u32>(array),
        DType::Int32 => to::<T, i32>(array),
        DType::Int64 => to::<T, i64>(array),
        DType::Float32 => to::<T, f32>(array),
        DType::Float64 => to::<T, f64>(array),
    }
}

fn decode<T: Element>(shape: &[usize], bytes: &[u8]) -> Result<NdArray, ModelError> {
    let len: usize = shape.iter().product();
    let mut values = vec![T::default(); len];
    T::read_le(bytes, &mut values);
    let array = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|source| {
        ModelError::ArrayShape {
            field: "<block>".into(),
            source,
        }
    })?;
    Ok(T::wrap(array))
}

impl NdArray {
    /// The element type of this array.
    pub fn dtype(&self) -> DType {
        match self {
            NdArray::Bool(_) => DType::Bool,
            NdArray::Uint8(_) => DType::Uint8,
            NdArray::Uint16(_) => DType::Uint16,
            NdArray::Uint32(_) => DType::Uint32,
            NdArray::Int32(_) => DType::Int32,
            NdArray::Int64(_) => DType::Int64,
            NdArray::Float32(_) => DType::Float32,
            NdArray::Float64(_) => DType::Float64,
        }
    }

    /// The shape of this array, slowest axis first.
    pub fn shape(&self) -> &[usize] {
        with_inner!(self, array => array.shape())
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        with_inner!(self, array => array.ndim())
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        with_inner!(self, array => array.len())
    }

    /// Whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to another dtype with `as` casting semantics. Bools become
    /// 0 / 1, and any non-zero value becomes `true`. The shape is preserved.
    pub fn astype(&self, dtype: DType) -> NdArray {
        with_inner!(self, array => cast(array, dtype))
    }

    /// Encode the elements in row-major order as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        fn encode<T: Element>(array: &ArrayD<T>) -> Vec<u8> {
            let mut out = Vec::with_capacity(array.len() * T::DTYPE.item_size());
            match array.as_slice() {
                Some(values) => T::write_le(values, &mut out),
                None => {
                    let values: Vec<T> = array.iter().copied().collect();
                    T::write_le(&values, &mut out);
                }
            }
            out
        }
        with_inner!(self, array => encode(array))
    }

    /// Decode row-major little-endian bytes into an array of the given dtype and shape.
    ///
    /// # Errors
    ///
    /// Will return [`ModelError::ArrayByteCount`] if `bytes` does not hold
    /// exactly the number of elements in `shape`.
    pub fn from_le_bytes(dtype: DType, shape: &[usize], bytes: &[u8]) -> Result<Self, ModelError> {
        let expected = shape
            .iter()
            .try_fold(dtype.item_size(), |acc, &dim| acc.checked_mul(dim));
        if expected != Some(bytes.len()) {
            return Err(ModelError::ArrayByteCount {
                dtype,
                shape: shape.to_vec(),
                expected: expected.unwrap_or(usize::MAX),
                found: bytes.len(),
            });
        }
        match dtype {
            DType::Bool => decode::<bool>(shape, bytes),
            DType::Uint8 => decode::<u8>(shape, bytes),
            DType::Uint16 => decode::<u16>(shape, bytes),
            DType::Uint32 => decode::<u32>(shape, bytes),
            DType::Int32 => decode::<i32>(shape, bytes),
            DType::Int64 => decode::<i64>(shape, bytes),
            DType::Float32 => decode::<f32>(shape, bytes),
            DType::Float64 => decode::<f64>(shape, bytes),
        }
    }

    /// Extract a statically typed array, checking dtype and dimensionality.
    ///
    /// `field` names the array in the error.
    ///
    /// # Errors
    ///
    /// - [`ModelError::DTypeMismatch`] if the element type is not `T`
    /// - [`ModelError::ArrayShape`] if the dimensionality is not `D`
    pub fn into_typed<T: Element, D: Dimension>(
        self,
        field: &str,
    ) -> Result<Array<T, D>, ModelError> {
        let found = self.dtype();
        let array = T::unwrap(self).map_err(|_| ModelError::DTypeMismatch {
            field: field.to_string(),
            expected: T::DTYPE,
            found,
        })?;
        array
            .into_dimensionality::<D>()
            .map_err(|source| ModelError::ArrayShape {
                field: field.to_string(),
                source,
            })
    }
}

impl<T: Element, D: Dimension> From<Array<T, D>> for NdArray {
    fn from(array: Array<T, D>) -> Self {
        T::wrap(array.into_dyn())
    }
}
