use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Every failure aborts the merge that produced it: a merge either succeeds completely or yields
/// no bytes at all. There is no partial output and no retry.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Corrupted or structurally invalid ABC data
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a module
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::UnknownOpcode`] - An instruction byte outside the AVM2 instruction set
/// - [`Error::UnknownConstantKind`] - A default value with an unrecognised constant kind
///
/// ## Merge Errors
/// - [`Error::UnresolvedOffset`] - A branch, switch or exception offset was never registered
/// - [`Error::Sequence`] - Driver events arrived in an order the merge session forbids
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Error`] - Generic failures with a message
///
/// # Examples
///
/// ```rust,no_run
/// use abcmerge::{AbcMerger, Error, MergeConfig, ModuleInput};
///
/// let inputs = vec![ModuleInput::from_file("library.abc")?];
/// match AbcMerger::new(MergeConfig::new()).merge(&inputs) {
///     Ok(bytes) => println!("merged {} bytes", bytes.len()),
///     Err(Error::UnresolvedOffset { offset }) => {
///         eprintln!("branch target {} does not start an instruction", offset)
///     }
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed module: {} ({}:{})", message, file, line)
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok::<(), abcmerge::Error>(())
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The module is damaged and could not be processed.
    ///
    /// Raised for every structural assertion of the merge: a multiname that must be a `QName`
    /// but is not, a module without a public package namespace where one is required, a hook
    /// whose trait count adjustment does not match what was written, or a multiname that
    /// references itself.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the module.
    ///
    /// This error occurs when trying to read data beyond the end of a buffer, or when a
    /// constant pool index points past the end of its pool.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Provided input was empty.
    ///
    /// Returned when a module has no bytes, or when a merge is requested without any module
    /// left to merge.
    #[error("Provided input was empty")]
    Empty,

    /// An instruction stream contained an opcode this crate does not know.
    ///
    /// The operand layout of an unknown opcode cannot be determined, so the remainder of the
    /// method body cannot be decoded.
    #[error("Unknown opcode 0x{opcode:02X} at code offset {offset}")]
    UnknownOpcode {
        /// The offending opcode byte
        opcode: u8,
        /// Byte offset of the opcode within its method body
        offset: usize,
    },

    /// A default value (optional parameter or slot initializer) used an unknown constant kind.
    ///
    /// The value's index cannot be remapped without knowing which pool it refers to.
    #[error("Unknown constant kind 0x{kind:02X} for value index {index}")]
    UnknownConstantKind {
        /// The constant kind tag
        kind: u8,
        /// The value index that accompanied the tag
        index: u32,
    },

    /// A code offset required during branch, switch or exception resolution was never mapped.
    ///
    /// Indicates inconsistent input: a branch or handler points somewhere that is not the start
    /// of a decoded instruction.
    #[error("Code offset {offset} could not be mapped into the rewritten method body")]
    UnresolvedOffset {
        /// The original code offset that failed to resolve
        offset: usize,
    },

    /// Merge events arrived out of order.
    ///
    /// The merge session enforces the fixed event grammar of a module; this error names the
    /// violated expectation.
    #[error("Invalid event sequence - {0}")]
    Sequence(&'static str),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while reading modules or writing the merged
    /// output.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Other errors that don't fit specific categories.
    #[error("{0}")]
    Error(String),
}
