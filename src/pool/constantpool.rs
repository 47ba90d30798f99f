//! Index over the raw constant pool of one module.
//!
//! Parsing records the byte position of every entry of every kind and nothing else. Typed
//! readers decode an entry on demand straight from the module bytes, which keeps the index
//! cheap to build and lets name matching compare raw string bytes without materializing
//! strings.

use strum::EnumCount;

use crate::{
    abc::constants::{ConstantKind, PoolKind},
    file::parser::Parser,
    Error::OutOfBounds,
    Result,
};

/// Decoded multiname entry. Index fields still refer to the owning module's pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultinameEntry {
    /// `QName` / `QNameA`
    QName {
        /// Exact kind tag
        kind: ConstantKind,
        /// Namespace index
        namespace: u32,
        /// Local name string index
        name: u32,
    },
    /// `RTQName` / `RTQNameA`
    RTQName {
        /// Exact kind tag
        kind: ConstantKind,
        /// Local name string index
        name: u32,
    },
    /// `RTQNameL` / `RTQNameLA`
    RTQNameL {
        /// Exact kind tag
        kind: ConstantKind,
    },
    /// `Multiname` / `MultinameA`
    Multiname {
        /// Exact kind tag
        kind: ConstantKind,
        /// Local name string index
        name: u32,
        /// Namespace set index
        namespace_set: u32,
    },
    /// `MultinameL` / `MultinameLA`
    MultinameL {
        /// Exact kind tag
        kind: ConstantKind,
        /// Namespace set index
        namespace_set: u32,
    },
    /// Parameterized type such as `Vector.<int>`
    TypeName {
        /// Generic base multiname index
        name: u32,
        /// Type parameter multiname indices
        parameters: Vec<u32>,
    },
}

/// A qualified name decomposed for matching: namespace kind plus raw local name bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualifiedName<'a> {
    /// Namespace index in the owning module
    pub namespace: u32,
    /// Kind of that namespace, `None` for the any-namespace index 0
    pub namespace_kind: Option<ConstantKind>,
    /// Local name bytes, borrowed from the module
    pub name: &'a [u8],
}

/// Entry positions of the seven constant tables of one module.
///
/// Index 0 of every table is implicit and never stored; `position(kind, 1)` is the first
/// entry on disk.
#[derive(Debug, Clone)]
pub struct ConstantPool<'a> {
    data: &'a [u8],
    positions: [Vec<usize>; PoolKind::COUNT],
}

impl<'a> ConstantPool<'a> {
    /// Indexes the constant pool starting at the parser's position and leaves the parser
    /// just behind it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated entries and
    /// [`crate::Error::Malformed`] for an unknown multiname kind.
    pub fn parse(parser: &mut Parser<'a>) -> Result<ConstantPool<'a>> {
        let mut positions: [Vec<usize>; PoolKind::COUNT] = Default::default();

        for kind in [
            PoolKind::Int,
            PoolKind::UInt,
            PoolKind::Double,
            PoolKind::String,
            PoolKind::Namespace,
            PoolKind::NamespaceSet,
            PoolKind::Multiname,
        ] {
            let count = parser.read_count()?;
            let table = &mut positions[kind.index()];

            for _ in 1..count {
                table.push(parser.pos());
                Self::skip_entry(parser, kind)?;
            }
        }

        Ok(ConstantPool {
            data: parser.data(),
            positions,
        })
    }

    fn skip_entry(parser: &mut Parser<'a>, kind: PoolKind) -> Result<()> {
        match kind {
            PoolKind::Int | PoolKind::UInt => {
                parser.read_u30()?;
            }
            PoolKind::Double => {
                parser.advance_by(8)?;
            }
            PoolKind::String => {
                parser.read_prefixed_bytes()?;
            }
            PoolKind::Namespace => {
                parser.read_u8()?;
                parser.read_u30()?;
            }
            PoolKind::NamespaceSet => {
                let count = parser.read_count()?;
                for _ in 0..count {
                    parser.read_u30()?;
                }
            }
            PoolKind::Multiname => {
                Self::read_multiname(parser)?;
            }
        }
        Ok(())
    }

    fn read_multiname(parser: &mut Parser<'a>) -> Result<MultinameEntry> {
        let offset = parser.pos();
        let raw = parser.read_u8()?;
        let kind = ConstantKind::from_repr(raw);

        Ok(match kind {
            Some(kind @ (ConstantKind::QName | ConstantKind::QNameA)) => MultinameEntry::QName {
                kind,
                namespace: parser.read_u30()?,
                name: parser.read_u30()?,
            },
            Some(kind @ (ConstantKind::RTQName | ConstantKind::RTQNameA)) => {
                MultinameEntry::RTQName {
                    kind,
                    name: parser.read_u30()?,
                }
            }
            Some(kind @ (ConstantKind::RTQNameL | ConstantKind::RTQNameLA)) => {
                MultinameEntry::RTQNameL { kind }
            }
            Some(kind @ (ConstantKind::Multiname | ConstantKind::MultinameA)) => {
                MultinameEntry::Multiname {
                    kind,
                    name: parser.read_u30()?,
                    namespace_set: parser.read_u30()?,
                }
            }
            Some(kind @ (ConstantKind::MultinameL | ConstantKind::MultinameLA)) => {
                MultinameEntry::MultinameL {
                    kind,
                    namespace_set: parser.read_u30()?,
                }
            }
            Some(ConstantKind::TypeName) => {
                let name = parser.read_u30()?;
                let count = parser.read_count()?;
                let mut parameters = Vec::new();
                for _ in 0..count {
                    parameters.push(parser.read_u30()?);
                }
                MultinameEntry::TypeName { name, parameters }
            }
            _ => {
                return Err(malformed_error!(
                    "Invalid multiname kind 0x{:02X} at offset {}",
                    raw,
                    offset
                ))
            }
        })
    }

    /// Number of stored entries of `kind`, not counting the implicit index 0.
    #[must_use]
    pub fn entries(&self, kind: PoolKind) -> usize {
        self.positions[kind.index()].len()
    }

    /// Byte position of entry `index` of `kind` within the module.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for index 0 or an index past the table.
    pub fn position(&self, kind: PoolKind, index: u32) -> Result<usize> {
        let slot = (index as usize).checked_sub(1).ok_or(OutOfBounds)?;
        self.positions[kind.index()]
            .get(slot)
            .copied()
            .ok_or(OutOfBounds)
    }

    fn reader(&self, kind: PoolKind, index: u32) -> Result<Parser<'a>> {
        let mut parser = Parser::new(self.data);
        parser.seek(self.position(kind, index)?)?;
        Ok(parser)
    }

    /// Signed integer constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn int(&self, index: u32) -> Result<i32> {
        // s32 shares the u30 encoding
        #[allow(clippy::cast_possible_wrap)]
        Ok(self.reader(PoolKind::Int, index)?.read_u30()? as i32)
    }

    /// Unsigned integer constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn uint(&self, index: u32) -> Result<u32> {
        self.reader(PoolKind::UInt, index)?.read_u30()
    }

    /// Raw little-endian bytes of a double constant, so that NaN payloads survive untouched.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn double_bytes(&self, index: u32) -> Result<&'a [u8]> {
        self.reader(PoolKind::Double, index)?.read_bytes(8)
    }

    /// Raw UTF-8 bytes of a string constant. Index 0 is the empty string.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn string(&self, index: u32) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }
        self.reader(PoolKind::String, index)?.read_prefixed_bytes()
    }

    /// Kind tag and name string index of a namespace.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index and
    /// [`crate::Error::Malformed`] for a tag that is not a namespace kind.
    pub fn namespace(&self, index: u32) -> Result<(ConstantKind, u32)> {
        let mut parser = self.reader(PoolKind::Namespace, index)?;
        let raw = parser.read_u8()?;
        match ConstantKind::from_repr(raw) {
            Some(kind) if kind.is_namespace() => Ok((kind, parser.read_u30()?)),
            _ => Err(malformed_error!(
                "Namespace {} has invalid kind 0x{:02X}",
                index,
                raw
            )),
        }
    }

    /// Namespace indices of a namespace set.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn namespace_set(&self, index: u32) -> Result<Vec<u32>> {
        let mut parser = self.reader(PoolKind::NamespaceSet, index)?;
        let count = parser.read_count()?;
        let mut namespaces = Vec::new();
        for _ in 0..count {
            namespaces.push(parser.read_u30()?);
        }
        Ok(namespaces)
    }

    /// Decoded multiname entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn multiname(&self, index: u32) -> Result<MultinameEntry> {
        let mut parser = self.reader(PoolKind::Multiname, index)?;
        Self::read_multiname(&mut parser)
    }

    /// Decomposes a multiname that must be a `QName`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the multiname is of any other kind.
    pub fn qualified_name(&self, index: u32) -> Result<QualifiedName<'a>> {
        match self.multiname(index)? {
            MultinameEntry::QName {
                namespace, name, ..
            } => {
                let namespace_kind = if namespace == 0 {
                    None
                } else {
                    Some(self.namespace(namespace)?.0)
                };
                Ok(QualifiedName {
                    namespace,
                    namespace_kind,
                    name: self.string(name)?,
                })
            }
            other => Err(malformed_error!(
                "Multiname {} must be a QName, found {:?}",
                index,
                other
            )),
        }
    }

    /// Index of the public namespace: the first package namespace with an empty name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the module declares no such namespace.
    pub fn find_public_namespace(&self) -> Result<u32> {
        for index in 1..=self.entries(PoolKind::Namespace) as u32 {
            let (kind, name) = self.namespace(index)?;
            if kind == ConstantKind::PackageNamespace && self.string(name)?.is_empty() {
                return Ok(index);
            }
        }

        Err(malformed_error!("Module has no public package namespace"))
    }
}
