//! Content-addressed metadata table.

use std::collections::HashMap;

use crate::merge::buffer::ByteBuffer;

/// Merged metadata table that stores each distinct encoded entry once.
///
/// Entries are identified by their translated bytes, so identical metadata contributed by
/// different modules collapses into a single slot. Old indices are remembered per module:
/// the key is the module-local index offset by the number of entries of all modules processed
/// before, the same way section bases advance.
#[derive(Debug, Clone, Default)]
pub struct MetadataPool {
    bytes: ByteBuffer,
    slots: HashMap<Vec<u8>, u32>,
    count: u32,
    mapping: HashMap<u32, u32>,
    processed: u32,
}

impl MetadataPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entry` for module-local index `old` and returns its zero-based slot.
    pub fn add_entry(&mut self, old: u32, entry: Vec<u8>) -> u32 {
        let slot = match self.slots.get(&entry) {
            Some(&slot) => slot,
            None => {
                let slot = self.count;
                self.bytes.extend(&entry);
                self.slots.insert(entry, slot);
                self.count += 1;
                slot
            }
        };

        self.mapping.insert(self.processed + old, slot);
        slot
    }

    /// Slot of module-local index `old`; `None` if the entry was never added.
    #[must_use]
    pub fn lookup(&self, old: u32) -> Option<u32> {
        self.mapping.get(&(self.processed + old)).copied()
    }

    /// Accounts for a finished module that declared `module_entries` metadata entries.
    pub fn advance(&mut self, module_entries: u32) {
        self.processed += module_entries;
    }

    /// Number of distinct entries stored.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The stored entries, back to back.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.bytes.as_slice()
    }
}
