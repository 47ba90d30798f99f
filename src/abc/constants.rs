//! Constant kinds, pool kinds and flag sets of the ABC format.
//!
//! The same kind byte space is shared by namespace entries, multiname entries and the value
//! kinds attached to optional parameters and slot initializers, so a single
//! [`ConstantKind`] covers all of them.

use bitflags::bitflags;
use strum::{EnumCount, EnumIter, FromRepr};

/// One of the seven numbered tables of a constant pool.
///
/// The discriminant order is the order in which the pools are serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
pub enum PoolKind {
    /// Signed 32-bit integers
    Int,
    /// Unsigned 32-bit integers
    UInt,
    /// IEEE 754 doubles
    Double,
    /// Length-prefixed byte strings
    String,
    /// Namespaces (kind + name)
    Namespace,
    /// Namespace sets
    NamespaceSet,
    /// Multinames
    Multiname,
}

impl PoolKind {
    /// Dense array index of this kind.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Kind tag of a namespace, multiname or value constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ConstantKind {
    Undefined = 0x00,
    Utf8 = 0x01,
    Int = 0x03,
    UInt = 0x04,
    PrivateNamespace = 0x05,
    Double = 0x06,
    QName = 0x07,
    Namespace = 0x08,
    Multiname = 0x09,
    False = 0x0A,
    True = 0x0B,
    Null = 0x0C,
    QNameA = 0x0D,
    MultinameA = 0x0E,
    RTQName = 0x0F,
    RTQNameA = 0x10,
    RTQNameL = 0x11,
    RTQNameLA = 0x12,
    NamespaceSet = 0x15,
    PackageNamespace = 0x16,
    PackageInternalNamespace = 0x17,
    ProtectedNamespace = 0x18,
    ExplicitNamespace = 0x19,
    StaticProtectedNamespace = 0x1A,
    MultinameL = 0x1B,
    MultinameLA = 0x1C,
    TypeName = 0x1D,
}

impl ConstantKind {
    /// The pool a value of this kind indexes, if any.
    ///
    /// Runtime-qualified multinames and the late-bound forms cannot appear as default values
    /// and map to `None`, as do the literal kinds.
    #[must_use]
    pub fn pool_kind(self) -> Option<PoolKind> {
        match self {
            ConstantKind::Utf8 => Some(PoolKind::String),
            ConstantKind::Int => Some(PoolKind::Int),
            ConstantKind::UInt => Some(PoolKind::UInt),
            ConstantKind::Double => Some(PoolKind::Double),
            ConstantKind::Namespace
            | ConstantKind::PrivateNamespace
            | ConstantKind::PackageNamespace
            | ConstantKind::PackageInternalNamespace
            | ConstantKind::ProtectedNamespace
            | ConstantKind::ExplicitNamespace
            | ConstantKind::StaticProtectedNamespace => Some(PoolKind::Namespace),
            ConstantKind::QName
            | ConstantKind::QNameA
            | ConstantKind::Multiname
            | ConstantKind::MultinameA
            | ConstantKind::TypeName => Some(PoolKind::Multiname),
            ConstantKind::NamespaceSet => Some(PoolKind::NamespaceSet),
            _ => None,
        }
    }

    /// Kinds whose value is carried by the kind byte alone; their index is copied verbatim.
    #[must_use]
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            ConstantKind::Undefined | ConstantKind::False | ConstantKind::True | ConstantKind::Null
        )
    }

    /// `true` for the namespace entry kinds.
    #[must_use]
    pub fn is_namespace(self) -> bool {
        self.pool_kind() == Some(PoolKind::Namespace)
    }

    /// `true` for `QName` and `QNameA`.
    #[must_use]
    pub fn is_qname(self) -> bool {
        matches!(self, ConstantKind::QName | ConstantKind::QNameA)
    }
}

/// Kind of a trait, stored in the low nibble of the trait kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TraitKind {
    Slot = 0,
    Method = 1,
    Getter = 2,
    Setter = 3,
    Class = 4,
    Function = 5,
    Const = 6,
}

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
    /// Method info flags
    pub struct MethodFlags: u8 {
        /// Suggests to the VM that an `arguments` object be created
        const NEED_ARGUMENTS = 0x01;
        /// The method uses an activation object
        const NEED_ACTIVATION = 0x02;
        /// Excess arguments are collected into a rest array
        const NEED_REST = 0x04;
        /// Optional parameter default values follow the flags
        const HAS_OPTIONAL = 0x08;
        /// Excess arguments are silently ignored
        const IGNORE_REST = 0x10;
        /// Native method
        const NATIVE = 0x20;
        /// The method uses `dxns` or `dxnslate`
        const SET_DXNS = 0x40;
        /// Parameter names follow the optional values
        const HAS_PARAM_NAMES = 0x80;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
    /// Instance info flags
    pub struct InstanceFlags: u8 {
        /// Properties cannot be added dynamically
        const SEALED = 0x01;
        /// The class cannot be subclassed
        const FINAL = 0x02;
        /// The class is an interface
        const INTERFACE = 0x04;
        /// A protected namespace index follows the flags
        const PROTECTED_NS = 0x08;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
    /// Trait attributes, stored in the high nibble of the trait kind byte
    pub struct TraitAttributes: u8 {
        /// The trait cannot be overridden
        const FINAL = 0x01;
        /// The trait overrides a base class trait
        const OVERRIDE = 0x02;
        /// A metadata index list follows the trait data
        const METADATA = 0x04;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn pool_kind_order() {
        let order: Vec<PoolKind> = PoolKind::iter().collect();
        assert_eq!(order.len(), PoolKind::COUNT);
        assert_eq!(order.first(), Some(&PoolKind::Int));
        assert_eq!(order.last(), Some(&PoolKind::Multiname));
        for (position, kind) in order.iter().enumerate() {
            assert_eq!(kind.index(), position);
        }
    }

    #[test]
    fn value_kinds() {
        assert_eq!(ConstantKind::from_repr(0x01), Some(ConstantKind::Utf8));
        assert_eq!(ConstantKind::from_repr(0x02), None);
        assert_eq!(
            ConstantKind::PackageNamespace.pool_kind(),
            Some(PoolKind::Namespace)
        );
        assert_eq!(ConstantKind::TypeName.pool_kind(), Some(PoolKind::Multiname));
        assert_eq!(ConstantKind::RTQNameL.pool_kind(), None);
        assert!(ConstantKind::Null.is_literal());
        assert!(!ConstantKind::Int.is_literal());
        assert!(ConstantKind::QNameA.is_qname());
        assert!(!ConstantKind::Multiname.is_qname());
    }

    #[test]
    fn trait_kind_byte() {
        let byte = 0x41_u8;
        assert_eq!(TraitKind::from_repr(byte & 0x0F), Some(TraitKind::Method));
        let attributes = TraitAttributes::from_bits_retain(byte >> 4);
        assert!(attributes.contains(TraitAttributes::METADATA));
        assert_eq!(TraitKind::from_repr(7), None);
    }
}
