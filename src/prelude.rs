//! # abcmerge Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the abcmerge library. Import this module to get quick access to everything needed
//! to merge ABC modules or inspect the result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all abcmerge operations
pub use crate::Error;

/// The result type used throughout abcmerge
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Merge façade, its options and inputs
pub use crate::merge::{AbcMerger, MergeConfig, ModuleInput, OutputMode};

/// Per-module class rewrites
pub use crate::merge::hooks::{ClassRewrite, MergeHook, MethodRule, RuleAction, Visibility};

/// Low-level input and parsing utilities
pub use crate::{Parser, Source};

// ================================================================================================
// ABC Model
// ================================================================================================

/// Parsed modules and their event interface
pub use crate::abc::decoder::{AbcFile, AbcVisitor, BodyDecoding};

/// Programmatic module construction
pub use crate::abc::builder::AbcBuilder;

/// Table records
pub use crate::abc::info::{
    ClassInfo, ExceptionInfo, InstanceInfo, MetadataInfo, MethodBody, MethodBodyHeader,
    MethodInfo, OptionDetail, ScriptInfo, Trait, TraitData,
};

/// Decoded instructions
pub use crate::abc::instruction::{Instruction, Operand};

/// Constant kinds and flag sets
pub use crate::abc::constants::{
    ConstantKind, InstanceFlags, MethodFlags, PoolKind, TraitAttributes, TraitKind,
};

// ================================================================================================
// Constant Pool
// ================================================================================================

/// Per-module pool index and the merged pool
pub use crate::pool::{ConstantPool, MultinameEntry, PoolHistory, QualifiedName, ReplacementPolicy};
