//! Serialization of arrays.
//!
//! See the [records module] documentation since this is a private module anyways.
//!
//! [records module]: crate::records

use std::{
    convert::{TryFrom, TryInto},
    fmt,
    ops::Range,
};

use anyhow::{anyhow, Context};
use serde::{
    de::{self, SeqAccess, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};

use crate::{
    codec::{range, DecodeError, FromBytes, ToBytes},
    records::array::{byte_length, Array, DataType},
};

const DTYPE_FIELD: Range<usize> = range(0, 1);
const NDIM_FIELD: Range<usize> = range(DTYPE_FIELD.end, 4);
const DIM_LENGTH: usize = 4;

/// A buffer for serialized arrays.
///
/// ```text
/// 0        1                   5
/// +--------+--------+----------+----------------+---------------+
/// | dtype  |  ndim  | dim_0 .. | dim_{ndim - 1} |     data      |
/// +--------+--------+----------+----------------+---------------+
/// ```
///
/// - `dtype`: the [`DataType`] tag
/// - `ndim`: the number of dimensions, a big-endian `u32`
/// - `dim_i`: the length of the `i`-th dimension, a big-endian `u32`
/// - `data`: the little-endian element bytes, `product(dims) * element_size` bytes long
pub struct ArrayBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> ArrayBuffer<T> {
    /// Creates a new buffer from `bytes`.
    ///
    /// # Errors
    /// Fails if the `bytes` are not a complete serialized array.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid ArrayBuffer")?;
        Ok(buffer)
    }

    /// Creates a new buffer from `bytes` without any checks.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Checks that the buffer holds a complete serialized array.
    ///
    /// # Errors
    /// Fails if the buffer is too small or if the data type tag is unknown.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < NDIM_FIELD.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                NDIM_FIELD.end
            ));
        }

        let dtype = DataType::try_from(self.dtype_tag())
            .map_err(|_| anyhow!("invalid data type tag: {}", self.dtype_tag()))?;

        let shape_end = self
            .ndim()
            .checked_mul(DIM_LENGTH)
            .and_then(|length| length.checked_add(NDIM_FIELD.end))
            .ok_or_else(|| anyhow!("invalid number of dimensions: {}", self.ndim()))?;
        if len < shape_end {
            return Err(anyhow!("invalid buffer length: {} < {}", len, shape_end));
        }

        let data_length = byte_length(dtype, &self.shape())?;
        if len - shape_end < data_length {
            return Err(anyhow!(
                "invalid buffer length: expected {} bytes of data but buffer has only {} bytes left",
                data_length,
                len - shape_end,
            ));
        }
        Ok(())
    }

    /// Gets the data type tag.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn dtype_tag(&self) -> u8 {
        self.inner.as_ref()[DTYPE_FIELD.start]
    }

    /// Gets the number of dimensions.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn ndim(&self) -> usize {
        // UNWRAP SAFE: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[NDIM_FIELD].try_into().unwrap()) as usize
    }

    /// Gets the shape.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn shape(&self) -> Vec<usize> {
        self.inner.as_ref()[self.shape_range()]
            .chunks_exact(DIM_LENGTH)
            // UNWRAP SAFE: the chunks are exactly 4 bytes long
            .map(|dim| u32::from_be_bytes(dim.try_into().unwrap()) as usize)
            .collect()
    }

    /// Gets the element bytes.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn data(&self) -> &[u8] {
        let start = self.shape_range().end;
        let dtype = DataType::try_from(self.dtype_tag()).unwrap_or(DataType::U8);
        let length = byte_length(dtype, &self.shape()).unwrap_or(0);
        &self.inner.as_ref()[start..start + length]
    }

    fn shape_range(&self) -> Range<usize> {
        range(NDIM_FIELD.end, self.ndim() * DIM_LENGTH)
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> ArrayBuffer<T> {
    /// Sets the data type tag.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn set_dtype_tag(&mut self, tag: u8) {
        self.inner.as_mut()[DTYPE_FIELD.start] = tag;
    }

    /// Sets the number of dimensions. This must be set before the dimensions themselves.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn set_ndim(&mut self, ndim: u32) {
        self.inner.as_mut()[NDIM_FIELD].copy_from_slice(&ndim.to_be_bytes());
    }

    /// Sets the length of the `index`-th dimension.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn set_dim(&mut self, index: usize, length: u32) {
        let start = NDIM_FIELD.end + index * DIM_LENGTH;
        self.inner.as_mut()[range(start, DIM_LENGTH)].copy_from_slice(&length.to_be_bytes());
    }

    /// Gets a mutable reference to everything after the shape.
    ///
    /// # Panics
    /// May panic if this buffer is unchecked.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let start = self.shape_range().end;
        &mut self.inner.as_mut()[start..]
    }
}

impl ToBytes for Array {
    fn buffer_length(&self) -> usize {
        NDIM_FIELD.end + self.shape().len() * DIM_LENGTH + self.data().len()
    }

    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T) {
        let mut writer = ArrayBuffer::new_unchecked(buffer.as_mut());
        writer.set_dtype_tag(self.dtype().into());
        // `Array::new()` rejects ranks and dimensions above `u32::MAX`
        writer.set_ndim(self.shape().len() as u32);
        for (index, length) in self.shape().iter().enumerate() {
            writer.set_dim(index, *length as u32);
        }
        writer.data_mut()[..self.data().len()].copy_from_slice(self.data());
    }
}

impl FromBytes for Array {
    fn from_bytes<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let reader = ArrayBuffer::new(buffer.as_ref())?;
        let dtype = DataType::try_from(reader.dtype_tag())
            .map_err(|_| anyhow!("invalid data type tag: {}", reader.dtype_tag()))?;
        Array::new(dtype, reader.shape(), reader.data().to_vec()).context("invalid array")
    }
}

impl Serialize for Array {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_byte_vec())
    }
}

impl<'de> Deserialize<'de> for Array {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_byte_buf(ArrayVisitor)
    }
}

struct ArrayVisitor;

impl<'de> Visitor<'de> for ArrayVisitor {
    type Value = Array;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a serialized array")
    }

    fn visit_bytes<E: de::Error>(self, bytes: &[u8]) -> Result<Self::Value, E> {
        Array::from_bytes(&bytes).map_err(|err| E::custom(format!("{:#}", err)))
    }

    fn visit_byte_buf<E: de::Error>(self, bytes: Vec<u8>) -> Result<Self::Value, E> {
        self.visit_bytes(&bytes)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        self.visit_byte_buf(bytes)
    }
}
