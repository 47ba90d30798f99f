//! Physical file backend for memory-mapped I/O.
//!
//! Modules handed to a merge are often read straight from a build output directory; mapping
//! them avoids copying each one into a heap buffer before it is parsed.

use super::Backend;
use crate::{
    Error::{Error, FileError},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for efficient access to files on disk.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Option<Mmap>,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// Empty files cannot be mapped on every platform; they yield a backend of length 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        if file.metadata()?.len() == 0 {
            return Ok(Physical { data: None });
        }

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: Some(mmap) })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        match &self.data {
            Some(mmap) => mmap.as_ref(),
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, path::PathBuf};

    #[test]
    fn physical() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x10, 0x00, 0x2E, 0x00, 0xAA, 0xBB]).unwrap();
        file.flush().unwrap();

        let physical = Physical::new(file.path()).unwrap();
        assert_eq!(physical.data().len(), 6);
        assert_eq!(physical.data()[2], 0x2E);
        assert_eq!(&physical.data()[4..], &[0xAA, 0xBB]);
    }

    #[test]
    fn physical_invalid_file_path() {
        let result = Physical::new(PathBuf::from("/nonexistent/path/to/module.abc"));
        match result {
            Err(FileError(io_error)) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected FileError"),
        }
    }

    #[test]
    fn physical_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let physical = Physical::new(file.path()).unwrap();
        assert!(physical.data().is_empty());
    }
}
