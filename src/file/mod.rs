//! Input abstraction for ABC modules.
//!
//! This module abstracts over where the bytes of a module come from and provides the
//! low-level reading utilities every other layer builds on.
//!
//! # Key Components
//!
//! ## Core Types
//! - [`crate::file::Source`] - Owned module bytes, backed by memory or a memory-mapped file
//! - [`crate::file::Backend`] - Trait for different data sources (disk files, memory buffers)
//!
//! ## Parsing Infrastructure
//! - [`crate::file::parser::Parser`] - Cursor-based reader used by the ABC driver
//! - [`crate::file::io`] - Fixed-width and variable-length integer codecs
//!
//! # Examples
//!
//! ```rust,no_run
//! use abcmerge::Source;
//!
//! let source = Source::from_file("library.abc")?;
//! println!("Loaded module with {} bytes", source.len());
//!
//! let source = Source::from_mem(vec![0x10, 0x00, 0x2E, 0x00])?;
//! assert_eq!(&source.data()[2..], &[0x2E, 0x00]);
//! # Ok::<(), abcmerge::Error>(())
//! ```

pub mod io;
pub mod parser;

mod physical;

use std::path::Path;

use crate::{Error::Empty, Result};
use physical::Physical;

/// Backend trait for module data sources.
///
/// This trait abstracts over the source of module data, allowing for both in-memory and
/// on-disk representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];
}

impl Backend for Vec<u8> {
    fn data(&self) -> &[u8] {
        self.as_slice()
    }
}

/// The raw bytes of one ABC module.
///
/// A `Source` never interprets its bytes; parsing happens in [`crate::abc::AbcFile`], which
/// borrows from the source for the duration of a merge.
pub struct Source {
    backend: Box<dyn Backend>,
}

impl Source {
    /// Memory-maps a module from disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped, and
    /// [`crate::Error::Empty`] if it has no content.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Source> {
        let physical = Physical::new(path)?;
        if physical.data().is_empty() {
            return Err(Empty);
        }

        Ok(Source {
            backend: Box::new(physical),
        })
    }

    /// Takes ownership of an in-memory module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<Source> {
        if data.is_empty() {
            return Err(Empty);
        }

        Ok(Source {
            backend: Box::new(data),
        })
    }

    /// Returns the complete module data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backend.data()
    }

    /// Returns the module size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.backend.data().len()
    }

    /// Returns `true` if the module has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backend.data().is_empty()
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("len", &self.len()).finish()
    }
}
