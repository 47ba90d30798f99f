//! Serialization of the merged module.
//!
//! The merged tables are written as one ABC module. In [`OutputMode::Tagged`] the module is
//! wrapped in a SWF `DoABC2` tag whose long-form size field is patched once the module length
//! is known.

use crate::{
    file::io::{push_le, write_le_at},
    Result,
};

/// SWF tag code of `DoABC2`.
pub const DOABC2_TAG_CODE: u16 = 82;

/// `DoABC2` flag asking the player to defer initialization until the script is referenced.
pub const DOABC2_LAZY_INITIALIZE: u32 = 1;

/// Bytes written before the module in [`OutputMode::Tagged`]: tag header (2), long size (4),
/// flags (4), and the one-character module name `_` with its terminator (2).
pub const DOABC2_HEADER_LEN: usize = 12;

// code in the upper 10 bits, 0x3F in the lower 6 selects the long size form
const DOABC2_TAG_HEADER: u16 = (DOABC2_TAG_CODE << 6) | 0x3F;

/// Framing of the merged module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// A bare ABC module
    Standalone,
    /// The module inside a `DoABC2` tag
    #[default]
    Tagged,
}

/// Frames the module written by `write_module`.
///
/// `write_module` appends the module body after the version pair; the version is written
/// minor first, as stored on disk.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the size field cannot be patched, and any error
/// raised by `write_module`.
pub fn serialize<F>(mode: OutputMode, major: u16, minor: u16, write_module: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut out = Vec::new();

    if mode == OutputMode::Tagged {
        push_le::<u16>(&mut out, DOABC2_TAG_HEADER);
        push_le::<u32>(&mut out, 0);
        push_le::<u32>(&mut out, DOABC2_LAZY_INITIALIZE);
        out.extend_from_slice(b"_\0");
    }

    push_le::<u16>(&mut out, minor);
    push_le::<u16>(&mut out, major);
    write_module(&mut out)?;

    if mode == OutputMode::Tagged {
        // the size counts everything after the 6-byte tag header
        let size = (out.len() - 6) as u32;
        let mut offset = 2;
        write_le_at::<u32>(&mut out, &mut offset, size)?;
    }

    Ok(out)
}
