//! Constant pools.
//!
//! - [`crate::pool::constantpool::ConstantPool`] indexes the raw pool of a single module and
//!   decodes entries on demand.
//! - [`crate::pool::history::PoolHistory`] is the merged pool shared by all modules of a merge:
//!   it translates module-local indices, deduplicates entries and serializes the result.

pub mod constantpool;
pub mod history;

pub use constantpool::{ConstantPool, MultinameEntry, QualifiedName};
pub use history::{PoolHistory, ReplacementPolicy};
