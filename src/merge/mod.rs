//! Merging of ABC modules.
//!
//! [`AbcMerger`] combines any number of ABC modules into one. Every module is parsed, then
//! replayed event by event into a [`session::MergeSession`], which re-encodes each structure
//! into the merged tables while translating all indices. Constant pool entries are deduplicated
//! across modules, method bodies are rewritten instruction by instruction (optionally through
//! the peephole optimizer), and the result is serialized as a bare module or a `DoABC2` tag.
//!
//! # Architecture
//!
//! - [`buffer`] - growable output buffers and per-table index bases
//! - [`metadata`] - the deduplicating metadata table
//! - [`offsets`] and [`window`] - per-body rewrite state
//! - [`transcoder`] - instruction rewriting and branch patching
//! - [`hooks`] - per-module class rewrites
//! - [`session`] - the event-driven merge controller
//! - [`output`] - final framing
//!
//! # Examples
//!
//! ```rust,no_run
//! use abcmerge::prelude::*;
//!
//! let inputs = vec![
//!     ModuleInput::from_file("framework.abc")?.with_name("framework"),
//!     ModuleInput::from_file("application.abc")?
//!         .with_name("application")
//!         .with_hook(ClassRewrite::new("Main").truncate_constructor()),
//! ];
//!
//! let merger = AbcMerger::new(MergeConfig::new().peephole(true).strip_debug(true));
//! merger.merge_to_file(&inputs, "merged.swf.tag")?;
//! # Ok::<(), abcmerge::Error>(())
//! ```

pub mod buffer;
pub mod hooks;
pub mod metadata;
pub mod offsets;
pub mod output;
pub mod session;
pub mod transcoder;
pub mod window;

use std::path::Path;

use log::debug;

pub use hooks::{ClassRewrite, MergeHook, MethodRule, RuleAction, Visibility};
pub use output::OutputMode;
pub use session::MergeSession;

use crate::{abc::decoder::AbcFile, file::Source, Error, Result};

/// Options of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    pub(crate) peephole: bool,
    pub(crate) strip_debug: bool,
    pub(crate) version: (u16, u16),
    pub(crate) output: OutputMode,
    pub(crate) excluded_module: Option<String>,
    pub(crate) stripped_metadata: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            peephole: false,
            strip_debug: false,
            version: (46, 16),
            output: OutputMode::Tagged,
            excluded_module: None,
            stripped_metadata: Vec::new(),
        }
    }
}

impl MergeConfig {
    /// Default options: no optimization, debug info kept, version 46.16, `DoABC2` output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the peephole optimizer.
    #[must_use]
    pub fn peephole(mut self, enabled: bool) -> Self {
        self.peephole = enabled;
        self
    }

    /// Drops debug opcodes, method names and parameter names.
    #[must_use]
    pub fn strip_debug(mut self, enabled: bool) -> Self {
        self.strip_debug = enabled;
        self
    }

    /// Sets the version written into the merged module.
    #[must_use]
    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.version = (major, minor);
        self
    }

    /// Selects the output framing.
    #[must_use]
    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Skips the module named `name` entirely.
    #[must_use]
    pub fn exclude_module(mut self, name: impl Into<String>) -> Self {
        self.excluded_module = Some(name.into());
        self
    }

    /// Drops metadata entries named `name` from the merged metadata table.
    #[must_use]
    pub fn strip_metadata(mut self, name: impl Into<String>) -> Self {
        self.stripped_metadata.push(name.into());
        self
    }

    /// Whether the peephole optimizer runs.
    #[must_use]
    pub fn peephole_enabled(&self) -> bool {
        self.peephole
    }

    /// Whether debug information is dropped.
    #[must_use]
    pub fn strips_debug(&self) -> bool {
        self.strip_debug
    }

    /// `(major, minor)` version of the output.
    #[must_use]
    pub fn output_version(&self) -> (u16, u16) {
        self.version
    }

    /// Output framing.
    #[must_use]
    pub fn output_mode(&self) -> OutputMode {
        self.output
    }
}

/// One module to merge, with an optional name and rewrite hook.
pub struct ModuleInput {
    source: Source,
    name: Option<String>,
    hook: Option<Box<dyn MergeHook>>,
}

impl ModuleInput {
    /// Wraps module bytes held in memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if `data` is empty.
    pub fn new(data: Vec<u8>) -> Result<Self> {
        Ok(Self::from_source(Source::from_mem(data)?))
    }

    /// Memory-maps a module from disk. The file stem becomes the module name.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be mapped and
    /// [`crate::Error::Empty`] if it is empty.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut input = Self::from_source(Source::from_file(path)?);
        input.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
        Ok(input)
    }

    fn from_source(source: Source) -> Self {
        ModuleInput {
            source,
            name: None,
            hook: None,
        }
    }

    /// Names the module, for exclusion and logging.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a rewrite hook.
    #[must_use]
    pub fn with_hook(mut self, hook: impl MergeHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// The module name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The rewrite hook, if any.
    #[must_use]
    pub fn hook(&self) -> Option<&dyn MergeHook> {
        self.hook.as_deref()
    }

    /// The module bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.source.data()
    }
}

impl std::fmt::Debug for ModuleInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInput")
            .field("name", &self.name)
            .field("len", &self.source.len())
            .field("hook", &self.hook.as_ref().map(|hook| hook.class_name()))
            .finish()
    }
}

/// Merges ABC modules with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct AbcMerger {
    config: MergeConfig,
}

impl AbcMerger {
    /// Creates a merger.
    #[must_use]
    pub fn new(config: MergeConfig) -> Self {
        AbcMerger { config }
    }

    /// The merge options.
    #[must_use]
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merges `inputs` in order and returns the serialized result.
    ///
    /// All modules are parsed before anything is merged, so a malformed module fails the merge
    /// before any work is done.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if no module remains after exclusion, and any parse or
    /// rewrite error of the modules. No partial output is produced.
    pub fn merge(&self, inputs: &[ModuleInput]) -> Result<Vec<u8>> {
        let excluded = self.config.excluded_module.as_deref();
        let selected: Vec<&ModuleInput> = inputs
            .iter()
            .filter(|input| match (excluded, input.name()) {
                (Some(excluded), Some(name)) => excluded != name,
                _ => true,
            })
            .collect();
        if selected.is_empty() {
            return Err(Error::Empty);
        }

        let files = selected
            .iter()
            .map(|input| AbcFile::parse(input.data()))
            .collect::<Result<Vec<_>>>()?;

        let mut session = MergeSession::new(&self.config);
        for (input, file) in selected.iter().zip(&files) {
            debug!("merging module {}", input.name().unwrap_or("<unnamed>"));
            session.set_hook(input.hook());
            file.decode(&mut session)?;
        }

        session.finish()
    }

    /// Merges `inputs` and writes the result to `path`.
    ///
    /// # Errors
    /// Returns the errors of [`AbcMerger::merge`] and [`crate::Error::FileError`] if the file
    /// cannot be written.
    pub fn merge_to_file(&self, inputs: &[ModuleInput], path: impl AsRef<Path>) -> Result<()> {
        let merged = self.merge(inputs)?;
        std::fs::write(path, merged)?;
        Ok(())
    }
}
