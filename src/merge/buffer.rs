//! Growable output buffers.
//!
//! [`ByteBuffer`] is the byte arena every rewritten structure is written into. It only grows
//! at the end; already written bytes can be patched in place through bounds-checked
//! operations, and the tail can be cut off again. Positions handed out are plain indices, so
//! holders such as the peephole window never alias the storage.
//!
//! [`SectionBuffer`] adds the merge bookkeeping of one output table: the number of entries
//! contributed by the modules already merged, which turns a module-local table index into a
//! merged one.

use crate::{
    file::io::{push_s24, read_u30_at, write_s24_at, write_u30},
    Error::OutOfBounds,
    Result,
};

/// Append-mostly byte arena with in-place patching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
}

impl ByteBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte at `position`, if written.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<u8> {
        self.bytes.get(position).copied()
    }

    /// Appends one byte.
    pub fn push(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Appends a run of bytes.
    pub fn extend(&mut self, values: &[u8]) {
        self.bytes.extend_from_slice(values);
    }

    /// Appends a variable-length `u30`.
    pub fn write_u30(&mut self, value: u32) {
        write_u30(&mut self.bytes, value);
    }

    /// Appends a 3-byte `s24`.
    pub fn push_s24(&mut self, value: i32) {
        push_s24(&mut self.bytes, value);
    }

    /// Reads back the `u30` at `position`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the encoding runs past the written bytes.
    pub fn read_u30_at(&self, position: usize) -> Result<u32> {
        let mut offset = position;
        read_u30_at(&self.bytes, &mut offset)
    }

    /// Overwrites the byte at `position`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `position` was never written.
    pub fn patch_u8(&mut self, position: usize, value: u8) -> Result<()> {
        let slot = self.bytes.get_mut(position).ok_or(OutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Overwrites the 3 bytes at `position` with an `s24`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the slot extends past the written bytes.
    pub fn patch_s24(&mut self, position: usize, value: i32) -> Result<()> {
        let mut offset = position;
        write_s24_at(&mut self.bytes, &mut offset, value)
    }

    /// Cuts the buffer back to `len` bytes. Longer lengths are ignored.
    pub fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    /// Drops all bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Consumes the buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

/// One output table: its bytes plus the number of entries of already merged modules.
///
/// The base grows exactly once per module, when the module has been fully consumed, by the
/// number of entries the module declared for this table. Until then every
/// [`SectionBuffer::translate`] call for that module uses the same base, so indices written
/// early stay valid.
#[derive(Debug, Clone, Default)]
pub struct SectionBuffer {
    bytes: ByteBuffer,
    merged_base: u32,
}

impl SectionBuffer {
    /// Creates an empty section.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merged index of module-local entry `local`.
    #[must_use]
    pub fn translate(&self, local: u32) -> u32 {
        self.merged_base + local
    }

    /// Accounts for a finished module that contributed `module_entries` entries.
    pub fn advance_base(&mut self, module_entries: u32) {
        self.merged_base += module_entries;
    }

    /// Number of entries contributed by all finished modules.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.merged_base
    }

    /// The section's bytes.
    #[must_use]
    pub fn bytes(&self) -> &ByteBuffer {
        &self.bytes
    }

    /// Appends one byte.
    pub fn push(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Appends a run of bytes.
    pub fn extend(&mut self, values: &[u8]) {
        self.bytes.extend(values);
    }

    /// Appends a variable-length `u30`.
    pub fn write_u30(&mut self, value: u32) {
        self.bytes.write_u30(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn patching() -> Result<()> {
        let mut buffer = ByteBuffer::new();
        buffer.push(0x10);
        buffer.push_s24(0);
        buffer.write_u30(300);

        buffer.patch_s24(1, -4)?;
        buffer.patch_u8(0, 0x11)?;
        assert_eq!(buffer.as_slice(), &[0x11, 0xFC, 0xFF, 0xFF, 0xAC, 0x02]);
        assert_eq!(buffer.read_u30_at(4)?, 300);

        assert!(matches!(buffer.patch_s24(4, 1), Err(Error::OutOfBounds)));
        assert!(matches!(buffer.patch_u8(6, 1), Err(Error::OutOfBounds)));

        buffer.truncate(1);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.get(0), Some(0x11));
        assert_eq!(buffer.get(1), None);
        Ok(())
    }

    #[test]
    fn translation_is_module_ordered() {
        let mut section = SectionBuffer::new();
        let module_sizes = [3_u32, 1, 4];
        let mut seen = Vec::new();

        for &size in &module_sizes {
            let first = section.translate(0);
            for local in 0..size {
                let merged = section.translate(local);
                assert!(seen.last().map_or(true, |&last| merged > last));
                seen.push(merged);
            }
            assert_eq!(section.translate(0), first);
            section.advance_base(size);
        }

        assert_eq!(seen, (0..8).collect::<Vec<u32>>());
        assert_eq!(section.count(), 8);
    }
}
