//! Typed numeric arrays.
//!
//! See the [records module] documentation since this is a private module anyways.
//!
//! [records module]: crate::records

use std::{convert::TryFrom, str::FromStr};

use derive_more::Display;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// The storage type tag of arrays whose data are the raw little-endian element bytes.
pub const NUMPY_STYPE: &str = "numpy.ndarray.tobytes";

/// The element type of an [`Array`].
///
/// The display representation matches the numpy dtype names.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DataType {
    #[display(fmt = "float32")]
    F32 = 0,
    #[display(fmt = "float64")]
    F64 = 1,
    #[display(fmt = "int32")]
    I32 = 2,
    #[display(fmt = "int64")]
    I64 = 3,
    #[display(fmt = "uint8")]
    U8 = 4,
}

impl DataType {
    /// Gets the number of bytes of a single element.
    pub fn element_size(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 => 8,
            DataType::U8 => 1,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown data type: {0}")]
/// Error returned when parsing an unknown data type name.
pub struct UnknownDataType(String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float32" => Ok(DataType::F32),
            "float64" => Ok(DataType::F64),
            "int32" => Ok(DataType::I32),
            "int64" => Ok(DataType::I64),
            "uint8" => Ok(DataType::U8),
            other => Err(UnknownDataType(other.to_string())),
        }
    }
}

/// Errors related to the construction and conversion of arrays.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArrayError {
    #[error("an array of type {dtype} and shape {shape:?} needs {expected} bytes, got {actual}")]
    LengthMismatch {
        dtype: DataType,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("the number of elements of shape {0:?} overflows")]
    ShapeOverflow(Vec<usize>),

    #[error("shape {0:?} has more than u32::MAX dimensions or a dimension above u32::MAX")]
    DimensionOverflow(Vec<usize>),

    #[error("an array of type {found} cannot be read as {expected}")]
    DataTypeMismatch { expected: DataType, found: DataType },
}

/// A numeric type that can be stored in an [`Array`].
pub trait Element: Copy + private::Sealed {
    /// The data type tag of the element.
    const DATA_TYPE: DataType;

    /// Appends the little-endian bytes of the element.
    fn write_le(self, out: &mut Vec<u8>);

    /// Reads an element from exactly [`DataType::element_size()`] little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Widens the element.
    fn to_f64(self) -> f64;

    /// Narrows a value to the element type. Integers are rounded to the nearest value.
    fn from_f64(value: f64) -> Self;
}

mod private {
    pub trait Sealed {}
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr, |$value:ident| $narrow:expr) => {
        impl private::Sealed for $ty {}

        impl Element for $ty {
            const DATA_TYPE: DataType = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0_u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_le_bytes(raw)
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64($value: f64) -> Self {
                $narrow
            }
        }
    };
}

impl_element!(f32, DataType::F32, |value| value as f32);
impl_element!(f64, DataType::F64, |value| value);
impl_element!(i32, DataType::I32, |value| value.round() as i32);
impl_element!(i64, DataType::I64, |value| value.round() as i64);
impl_element!(u8, DataType::U8, |value| value.round() as u8);

/// A dense, row-major numeric array.
///
/// The element bytes are kept in their little-endian wire form, so an array can be forwarded
/// without being decoded. The invariant `data.len() == product(shape) * element_size` is
/// checked by every constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Array {
    dtype: DataType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl Array {
    /// Creates an array from its raw parts.
    ///
    /// # Errors
    /// Fails if the length of `data` doesn't match the data type and the shape, or if the rank
    /// or one of the dimensions doesn't fit in the 32 bit length fields of the wire format.
    pub fn new(dtype: DataType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self, ArrayError> {
        let fits = |length: usize| u32::try_from(length).is_ok();
        if !fits(shape.len()) || !shape.iter().all(|dim| fits(*dim)) {
            return Err(ArrayError::DimensionOverflow(shape));
        }
        let expected = byte_length(dtype, &shape)?;
        if expected != data.len() {
            return Err(ArrayError::LengthMismatch {
                dtype,
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Creates an array from typed elements.
    pub fn from_values<E: Element>(shape: Vec<usize>, values: &[E]) -> Result<Self, ArrayError> {
        let mut data = Vec::with_capacity(values.len() * E::DATA_TYPE.element_size());
        for value in values {
            value.write_le(&mut data);
        }
        Self::new(E::DATA_TYPE, shape, data)
    }

    /// Creates an array of the given type from widened values.
    pub fn from_f64_values(
        dtype: DataType,
        shape: Vec<usize>,
        values: &[f64],
    ) -> Result<Self, ArrayError> {
        let data = match dtype {
            DataType::F32 => narrow::<f32>(values),
            DataType::F64 => narrow::<f64>(values),
            DataType::I32 => narrow::<i32>(values),
            DataType::I64 => narrow::<i64>(values),
            DataType::U8 => narrow::<u8>(values),
        };
        Self::new(dtype, shape, data)
    }

    /// Creates an array of the given type from wide integers.
    ///
    /// Values outside of the range of an integer `dtype` wrap around.
    pub fn from_i128_values(
        dtype: DataType,
        shape: Vec<usize>,
        values: &[i128],
    ) -> Result<Self, ArrayError> {
        let mut data = Vec::with_capacity(values.len() * dtype.element_size());
        for value in values.iter().copied() {
            match dtype {
                DataType::F32 => (value as f32).write_le(&mut data),
                DataType::F64 => (value as f64).write_le(&mut data),
                DataType::I32 => (value as i32).write_le(&mut data),
                DataType::I64 => (value as i64).write_le(&mut data),
                DataType::U8 => (value as u8).write_le(&mut data),
            }
        }
        Self::new(dtype, shape, data)
    }

    /// Gets the element type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Gets the shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Gets the raw little-endian element bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Gets the storage type tag.
    pub fn stype(&self) -> &'static str {
        NUMPY_STYPE
    }

    /// Gets the number of elements.
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.element_size()
    }

    /// Checks whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decodes the elements.
    ///
    /// # Errors
    /// Fails if `E` is not the element type of the array.
    pub fn to_values<E: Element>(&self) -> Result<Vec<E>, ArrayError> {
        if E::DATA_TYPE != self.dtype {
            return Err(ArrayError::DataTypeMismatch {
                expected: E::DATA_TYPE,
                found: self.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.element_size())
            .map(E::read_le)
            .collect())
    }

    /// Decodes and widens the elements.
    pub fn to_f64_values(&self) -> Vec<f64> {
        match self.dtype {
            DataType::F32 => widen::<f32>(&self.data),
            DataType::F64 => widen::<f64>(&self.data),
            DataType::I32 => widen::<i32>(&self.data),
            DataType::I64 => widen::<i64>(&self.data),
            DataType::U8 => widen::<u8>(&self.data),
        }
    }

    /// Decodes and widens the elements of an integer array without loss.
    ///
    /// Returns `None` for floating point arrays.
    pub fn to_i128_values(&self) -> Option<Vec<i128>> {
        let values = match self.dtype {
            DataType::I32 => widen_int::<i32>(&self.data),
            DataType::I64 => widen_int::<i64>(&self.data),
            DataType::U8 => widen_int::<u8>(&self.data),
            DataType::F32 | DataType::F64 => return None,
        };
        Some(values)
    }
}

impl TryFrom<(DataType, Vec<usize>, Vec<u8>)> for Array {
    type Error = ArrayError;

    fn try_from((dtype, shape, data): (DataType, Vec<usize>, Vec<u8>)) -> Result<Self, Self::Error> {
        Self::new(dtype, shape, data)
    }
}

/// Computes the number of bytes of an array of the given type and shape.
pub(crate) fn byte_length(dtype: DataType, shape: &[usize]) -> Result<usize, ArrayError> {
    shape
        .iter()
        .try_fold(dtype.element_size(), |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| ArrayError::ShapeOverflow(shape.to_vec()))
}

fn widen<E: Element>(data: &[u8]) -> Vec<f64> {
    data.chunks_exact(E::DATA_TYPE.element_size())
        .map(|chunk| E::read_le(chunk).to_f64())
        .collect()
}

fn widen_int<E: Element + Into<i128>>(data: &[u8]) -> Vec<i128> {
    data.chunks_exact(E::DATA_TYPE.element_size())
        .map(|chunk| E::read_le(chunk).into())
        .collect()
}

fn narrow<E: Element>(values: &[f64]) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * E::DATA_TYPE.element_size());
    for value in values {
        E::from_f64(*value).write_le(&mut data);
    }
    data
}
