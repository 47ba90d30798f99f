//! The ABC (AVM2 bytecode) format.
//!
//! # Key Components
//!
//! - [`crate::abc::constants`] - constant kinds, pool kinds and flag sets
//! - [`crate::abc::opcodes`] - opcode bytes and their operand layouts
//! - [`crate::abc::instruction`] - decoded instructions
//! - [`crate::abc::info`] - records of the method, metadata, class, script and body tables
//! - [`crate::abc::decoder`] - [`AbcFile`], the module driver, and the [`AbcVisitor`] it feeds
//! - [`crate::abc::builder`] - [`AbcBuilder`] for producing modules programmatically
//!
//! # Layout
//!
//! ```text
//! u16 minor, u16 major
//! constant pool   int, uint, double, string, namespace, ns set, multiname
//! u30 method_count     method_info[method_count]
//! u30 metadata_count   metadata_info[metadata_count]
//! u30 class_count      instance_info[class_count] class_info[class_count]
//! u30 script_count     script_info[script_count]
//! u30 body_count       method_body_info[body_count]
//! ```

pub mod builder;
pub mod constants;
pub mod decoder;
pub mod info;
pub mod instruction;
pub mod opcodes;

pub use builder::AbcBuilder;
pub use decoder::{AbcFile, AbcVisitor, BodyDecoding};
pub use instruction::{Instruction, Operand};
