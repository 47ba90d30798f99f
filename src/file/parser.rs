//! Low-level byte stream parser for ABC decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based reader over a
//! byte slice with bounds-checked access to the fixed-width and variable-length encodings of
//! the ABC format.
//!
//! # Key Components
//!
//! ## Navigation Methods
//! - [`crate::file::parser::Parser::seek`] - Move to specific position
//! - [`crate::file::parser::Parser::advance_by`] - Move forward by specified bytes
//! - [`crate::file::parser::Parser::pos`] - Get current position
//!
//! ## Data Access Methods
//! - [`crate::file::parser::Parser::read_le`] - Read fixed-width primitives (little-endian)
//! - [`crate::file::parser::Parser::read_u30`] - Read variable-length integers
//! - [`crate::file::parser::Parser::read_s24`] - Read 3-byte branch displacements
//! - [`crate::file::parser::Parser::read_bytes`] - Borrow a run of raw bytes
//! - [`crate::file::parser::Parser::read_prefixed_bytes`] - Borrow a `u30` length-prefixed run
//!
//! # Usage Examples
//!
//! ```rust
//! use abcmerge::Parser;
//!
//! // minor 16, major 46, then an empty constant pool count
//! let data = [0x10, 0x00, 0x2E, 0x00, 0x00];
//! let mut parser = Parser::new(&data);
//!
//! let minor = parser.read_le::<u16>()?;
//! let major = parser.read_le::<u16>()?;
//! assert_eq!((major, minor), (46, 16));
//! assert_eq!(parser.read_u30()?, 0);
//! assert!(!parser.has_more_data());
//! # Ok::<(), abcmerge::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, read_s24_at, read_u30_at, AbcIO},
    Error::OutOfBounds,
    Result,
};

/// A generic binary data parser for reading ABC structures.
///
/// `Parser` maintains an internal position cursor and checks bounds on every read, so
/// truncated or malformed modules produce [`crate::Error::OutOfBounds`] instead of panics.
/// Slices handed out by the parser borrow the underlying data, not the parser.
///
/// # Examples
///
/// ```rust
/// use abcmerge::Parser;
///
/// let data = [0x03, b'a', b'b', b'c', 0xAC, 0x02];
/// let mut parser = Parser::new(&data);
///
/// assert_eq!(parser.read_prefixed_bytes()?, b"abc");
/// assert_eq!(parser.read_u30()?, 300);
/// # Ok::<(), abcmerge::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the current position to the specified index.
    ///
    /// Seeking to exactly the end of the data is allowed; the next read will fail.
    ///
    /// # Arguments
    /// * `pos` - The position to move the cursor to
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing by step would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let end = self.calc_end_position(step)?;
        self.position = end;
        Ok(())
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Get access to the complete underlying data buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Read a type `T` from the current position in little-endian and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: AbcIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a variable-length `u30`/`u32` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the encoding is truncated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use abcmerge::Parser;
    ///
    /// let data = [0x7F, 0x80, 0x01];
    /// let mut parser = Parser::new(&data);
    /// assert_eq!(parser.read_u30()?, 127);
    /// assert_eq!(parser.read_u30()?, 128);
    /// # Ok::<(), abcmerge::Error>(())
    /// ```
    pub fn read_u30(&mut self) -> Result<u32> {
        read_u30_at(self.data, &mut self.position)
    }

    /// Read a variable-length `u30` and widen it to `usize`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the encoding is truncated.
    pub fn read_count(&mut self) -> Result<usize> {
        Ok(self.read_u30()? as usize)
    }

    /// Read a 3-byte signed `s24` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 3 bytes remain.
    pub fn read_s24(&mut self) -> Result<i32> {
        read_s24_at(self.data, &mut self.position)
    }

    /// Read a single `u8`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_le::<u8>()
    }

    /// Returns the number of bytes remaining from the current position.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Ensures at least `needed` bytes remain.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer bytes remain.
    pub fn ensure_remaining(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(OutOfBounds);
        }
        Ok(())
    }

    /// Calculates the end position of a read of `length` bytes, checking bounds.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the end lies beyond the data or overflows.
    pub fn calc_end_position(&self, length: usize) -> Result<usize> {
        match self.position.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(end),
            _ => Err(OutOfBounds),
        }
    }

    /// Borrow the next `length` bytes and advance past them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Borrow a run of bytes prefixed by its `u30` length, as used by string constants.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the prefix or the payload is truncated.
    pub fn read_prefixed_bytes(&mut self) -> Result<&'a [u8]> {
        let length = self.read_count()?;
        self.read_bytes(length)
    }
}
