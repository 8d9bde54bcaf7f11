//! Byte-level encoding traits.
//!
//! Types that travel as raw bytes implement [`ToBytes`] and [`FromBytes`]. Encoding never fails
//! once a large enough buffer is provided, while decoding validates the buffer and reports a
//! [`DecodeError`] describing what is wrong with it.

use std::ops::Range;

/// An error that signals a failure when trying to decode a byte buffer.
pub type DecodeError = anyhow::Error;

/// An interface for serializable types.
///
/// See also [`FromBytes`] for deserialization.
pub trait ToBytes {
    /// The length of the buffer for encoding the type.
    fn buffer_length(&self) -> usize;

    /// Serialize the type in the given buffer.
    ///
    /// # Panics
    /// This method may panic if the given buffer is too small. Thus, [`buffer_length()`] must be
    /// called prior to calling this, and a large enough buffer must be provided.
    ///
    /// [`buffer_length()`]: #method.buffer_length
    fn to_bytes<T: AsMut<[u8]>>(&self, buffer: &mut T);

    /// Serialize the type into a freshly allocated buffer of exactly the right size.
    fn to_byte_vec(&self) -> Vec<u8> {
        let mut buffer = vec![0; self.buffer_length()];
        self.to_bytes(&mut buffer);
        buffer
    }
}

/// An interface for deserializable types.
///
/// See also [`ToBytes`] for serialization.
pub trait FromBytes: Sized {
    /// Deserialize the type from the given buffer.
    ///
    /// # Errors
    /// May fail if certain parts of the deserialized buffer don't pass validity checks.
    fn from_bytes<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError>;
}

/// Creates a range from `start` to `start + length`.
pub(crate) const fn range(start: usize, length: usize) -> Range<usize> {
    start..(start + length)
}
