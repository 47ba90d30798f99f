//! Shared test infrastructure.
//!
//! - [`factories`] - small ABC modules built with [`crate::AbcBuilder`]
//! - [`helpers`] - a recording visitor and merge shortcuts

pub mod factories;
pub mod helpers;
