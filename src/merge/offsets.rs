//! Offset map of one method body.

use std::collections::HashMap;

use crate::{Error, Result};

/// Maps original code offsets to offsets in the rewritten code of the current method body.
///
/// The first pass records every offset the second pass will need: branch origins, the
/// destinations the driver announces, and the displacement slots of `lookupswitch`. A later
/// record for the same offset replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct OffsetMap {
    offsets: HashMap<usize, usize>,
}

impl OffsetMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that original offset `original` corresponds to `rewritten`.
    pub fn record(&mut self, original: usize, rewritten: usize) {
        self.offsets.insert(original, rewritten);
    }

    /// Rewritten offset of `original`.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedOffset`] if `original` was never recorded.
    pub fn resolve(&self, original: usize) -> Result<usize> {
        self.offsets
            .get(&original)
            .copied()
            .ok_or(Error::UnresolvedOffset { offset: original })
    }

    /// Number of recorded offsets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Forgets every offset.
    pub fn clear(&mut self) {
        self.offsets.clear();
    }
}
