//! Low-level byte order and variable-length integer utilities for the ABC format.
//!
//! This module provides bounds-checked reading and writing of the primitive encodings an ABC
//! module is made of. Fixed-width values are always little-endian; the format additionally uses
//! two encodings of its own:
//!
//! - **`u30`/`u32`/`s32`** - a variable-length integer storing 7 bits per byte, least significant
//!   group first, with the high bit of each byte flagging a continuation. At most 5 bytes are
//!   used; the fifth byte contributes its low 4 bits.
//! - **`s24`** - a fixed 3-byte signed little-endian value used for branch displacements.
//!
//! # Key Components
//!
//! ## Core Trait
//! - [`crate::file::io::AbcIO`] - Endian-aware conversion for the fixed-width primitives
//!
//! ## Fixed-Width Functions
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Read little-endian values
//! - [`crate::file::io::write_le_at`] - Write little-endian values with auto-advance
//!
//! ## Variable-Length Functions
//! - [`crate::file::io::read_u30_at`] / [`crate::file::io::write_u30`]
//! - [`crate::file::io::read_s24_at`] / [`crate::file::io::write_s24_at`] / [`crate::file::io::push_s24`]
//!
//! # Usage Examples
//!
//! ```rust
//! use abcmerge::file::io::{read_u30_at, write_u30};
//!
//! let mut encoded = Vec::new();
//! write_u30(&mut encoded, 300);
//! assert_eq!(encoded, [0xAC, 0x02]);
//!
//! let mut offset = 0;
//! assert_eq!(read_u30_at(&encoded, &mut offset)?, 300);
//! assert_eq!(offset, 2);
//! # Ok::<(), abcmerge::Error>(())
//! ```
//!
//! # Error Handling
//!
//! All reading and patching functions return [`crate::Result<T>`] and fail with
//! [`crate::Error::OutOfBounds`] when the buffer is too short. Appending functions cannot fail.

use crate::{Error::OutOfBounds, Result};

/// Trait for type-specific little-endian conversion of fixed-width primitives.
///
/// Each implementation names the fixed-size byte array of its type (e.g. `[u8; 4]` for `u32`)
/// and converts between that array and the value.
pub trait AbcIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_abc_io {
    ($($ty:ty => $len:literal),* $(,)?) => {
        $(
            impl AbcIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_abc_io!(
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f64 => 8,
);

/// Maximum number of bytes of a variable-length `u30`/`u32` value.
pub const U30_MAX_LEN: usize = 5;

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: AbcIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
///
/// # Examples
///
/// ```rust
/// use abcmerge::file::io::read_le_at;
///
/// let data = [0x10, 0x00, 0x2E, 0x00]; // minor 16, major 46
/// let mut offset = 0;
///
/// let minor: u16 = read_le_at(&data, &mut offset)?;
/// let major: u16 = read_le_at(&data, &mut offset)?;
/// assert_eq!((major, minor), (46, 16));
/// assert_eq!(offset, 4);
/// # Ok::<(), abcmerge::Error>(())
/// ```
pub fn read_le_at<T: AbcIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Safely writes a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes written.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: AbcIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();

    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}

/// Appends a value of type `T` in little-endian byte order.
pub fn push_le<T: AbcIO>(out: &mut Vec<u8>, value: T) {
    out.extend_from_slice(value.to_le_bytes().as_ref());
}

/// Reads a variable-length `u30`/`u32` value at `offset`, advancing it.
///
/// Signed `s32` values share this encoding; reinterpret the result with `as i32`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the encoding runs past the end of `data`.
///
/// # Examples
///
/// ```rust
/// use abcmerge::file::io::read_u30_at;
///
/// let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
/// let mut offset = 0;
/// assert_eq!(read_u30_at(&data, &mut offset)?, u32::MAX);
/// assert_eq!(offset, 5);
/// # Ok::<(), abcmerge::Error>(())
/// ```
pub fn read_u30_at(data: &[u8], offset: &mut usize) -> Result<u32> {
    let mut value = 0_u32;
    let mut position = *offset;

    for group in 0..U30_MAX_LEN {
        let Some(&byte) = data.get(position) else {
            return Err(OutOfBounds);
        };
        position += 1;

        value |= u32::from(byte & 0x7F) << (7 * group as u32);
        if byte & 0x80 == 0 || group == U30_MAX_LEN - 1 {
            break;
        }
    }

    *offset = position;
    Ok(value)
}

/// Appends `value` as a variable-length `u30`/`u32`.
pub fn write_u30(out: &mut Vec<u8>, value: u32) {
    let mut rest = value;
    loop {
        let byte = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Reads a 3-byte signed little-endian `s24` at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than 3 bytes remain.
pub fn read_s24_at(data: &[u8], offset: &mut usize) -> Result<i32> {
    let Some(end) = offset.checked_add(3) else {
        return Err(OutOfBounds);
    };
    let Some(bytes) = data.get(*offset..end) else {
        return Err(OutOfBounds);
    };

    let raw = i32::from(bytes[0]) | i32::from(bytes[1]) << 8 | i32::from(bytes[2]) << 16;
    *offset = end;

    // sign-extend from bit 23
    Ok((raw << 8) >> 8)
}

/// Overwrites the 3 bytes at `offset` with `value` as `s24`, advancing the offset.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than 3 bytes remain.
pub fn write_s24_at(data: &mut [u8], offset: &mut usize, value: i32) -> Result<()> {
    let Some(end) = offset.checked_add(3) else {
        return Err(OutOfBounds);
    };
    let Some(slot) = data.get_mut(*offset..end) else {
        return Err(OutOfBounds);
    };

    slot.copy_from_slice(&value.to_le_bytes()[..3]);
    *offset = end;

    Ok(())
}

/// Appends `value` as a 3-byte `s24`.
pub fn push_s24(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u16() {
        let result = read_le::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0201);
    }

    #[test]
    fn read_le_u32() {
        let result = read_le::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0403_0201);
    }

    #[test]
    fn read_le_f64() {
        let data = 1.5_f64.to_le_bytes();
        let result = read_le::<f64>(&data).unwrap();
        assert_eq!(result, 1.5);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let result = read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(result, 0x0403);
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_le_out_of_bounds() {
        let mut offset = 6;
        assert!(matches!(
            read_le_at::<u32>(&TEST_BUFFER, &mut offset),
            Err(OutOfBounds)
        ));
        assert_eq!(offset, 6);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn write_le_at_roundtrip() {
        let mut data = [0u8; 6];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0x1234_u16).unwrap();
        write_le_at(&mut data, &mut offset, 0xDEAD_BEEF_u32).unwrap();
        assert_eq!(offset, 6);
        assert_eq!(data, [0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE]);

        assert!(write_le_at(&mut data, &mut offset, 1_u8).is_err());
    }

    #[test]
    fn u30_encodings() {
        let cases: [(u32, &[u8]); 7] = [
            (0, &[0x00]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x01]),
            (300, &[0xAC, 0x02]),
            (0x3FFF, &[0xFF, 0x7F]),
            (0x4000, &[0x80, 0x80, 0x01]),
            (u32::MAX, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            let mut out = Vec::new();
            write_u30(&mut out, value);
            assert_eq!(out, expected, "encoding of {value}");

            let mut offset = 0;
            assert_eq!(read_u30_at(expected, &mut offset).unwrap(), value);
            assert_eq!(offset, expected.len());
        }
    }

    #[test]
    fn u30_negative_s32() {
        let mut out = Vec::new();
        write_u30(&mut out, -1_i32 as u32);
        assert_eq!(out.len(), 5);

        let mut offset = 0;
        assert_eq!(read_u30_at(&out, &mut offset).unwrap() as i32, -1);
    }

    #[test]
    fn u30_fifth_byte_stops() {
        // a continuation bit on the fifth byte does not pull in a sixth
        let data = [0x80, 0x80, 0x80, 0x80, 0x81, 0x7F];
        let mut offset = 0;
        assert_eq!(read_u30_at(&data, &mut offset).unwrap(), 0x1000_0000);
        assert_eq!(offset, 5);
    }

    #[test]
    fn u30_truncated() {
        let data = [0x80, 0x80];
        let mut offset = 0;
        assert!(matches!(read_u30_at(&data, &mut offset), Err(OutOfBounds)));
        assert_eq!(offset, 0);
    }

    #[test]
    fn s24_sign_extension() {
        let mut out = Vec::new();
        push_s24(&mut out, -3);
        push_s24(&mut out, 0x12_3456);
        assert_eq!(out, [0xFD, 0xFF, 0xFF, 0x56, 0x34, 0x12]);

        let mut offset = 0;
        assert_eq!(read_s24_at(&out, &mut offset).unwrap(), -3);
        assert_eq!(read_s24_at(&out, &mut offset).unwrap(), 0x12_3456);
        assert!(read_s24_at(&out, &mut offset).is_err());
    }

    #[test]
    fn s24_patch() {
        let mut data = vec![0x10, 0x00, 0x00, 0x00];
        let mut offset = 1;
        write_s24_at(&mut data, &mut offset, -8).unwrap();
        assert_eq!(data, [0x10, 0xF8, 0xFF, 0xFF]);
        assert_eq!(offset, 4);

        let mut offset = 2;
        assert!(write_s24_at(&mut data, &mut offset, 1).is_err());
    }
}
