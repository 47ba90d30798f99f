// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # abcmerge
//!
//! Merges independently compiled AVM2 bytecode modules (ABC units) into a single module.
//! Constant pools are deduplicated across modules, every cross-referencing index is remapped
//! into one numbering space, and method bodies are re-encoded through an optional peephole
//! optimizer. The result is emitted either as a raw ABC stream or wrapped in a `DoABC2` tag
//! ready to be spliced into a SWF container.
//!
//! ## Features
//!
//! - **Constant pool merging** - strings, numbers, namespaces, namespace sets and multinames are
//!   interned once; only constants the merged tables actually reference are emitted
//! - **Two-pass transcoding** - instructions are rewritten while branch and switch offsets are
//!   patched in a second pass, so shrinking sequences never breaks control flow
//! - **Peephole optimization** - an 8-entry lookback window fuses and elides redundant
//!   instruction sequences
//! - **Debug stripping** - `debug`, `debugline` and `debugfile` opcodes and parameter names can
//!   be dropped from the output
//! - **Per-module rewrite hooks** - remove or empty methods of one class, truncate its
//!   constructor after `constructsuper` and publish private fields
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use abcmerge::prelude::*;
//!
//! let inputs = vec![
//!     ModuleInput::from_file("a.abc")?,
//!     ModuleInput::from_file("b.abc")?,
//! ];
//!
//! let config = MergeConfig::new()
//!     .peephole(true)
//!     .strip_debug(true)
//!     .output(OutputMode::Standalone);
//!
//! let merged = AbcMerger::new(config).merge(&inputs)?;
//! println!("merged module: {} bytes", merged.len());
//! # Ok::<(), abcmerge::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`crate::file`] - byte order helpers, variable-length integer codecs and input backends
//! - [`crate::abc`] - the ABC format: constants, opcodes, the module driver and a builder
//! - [`crate::pool`] - per-module constant pool index and the cross-module pool history
//! - [`crate::merge`] - section buffers, the peephole window, the transcoder and the merge
//!   session that ties everything together
//!
//! The merge is single-threaded and deterministic. Modules are processed in the order they are
//! supplied; for every module the driver replays method infos, metadata, instances, classes,
//! scripts and method bodies into the merge session, and every method body is streamed twice.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger itself. Hook
//! decisions and module boundaries are reported at `debug`, individual peephole fusions at
//! `trace`.

#[macro_use]
pub(crate) mod error;

pub mod abc;
pub mod file;
pub mod merge;
pub mod pool;
pub mod prelude;

#[cfg(test)]
pub(crate) mod test;

/// `abcmerge` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `abcmerge` Error type
///
/// The main error type for all operations in this crate. Every failure aborts the merge that
/// raised it.
pub use error::Error;

pub use abc::{AbcBuilder, AbcFile};
pub use file::{parser::Parser, Source};
pub use merge::{AbcMerger, MergeConfig, ModuleInput, OutputMode};
