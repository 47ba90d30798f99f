//! The cross-module constant pool.
//!
//! [`PoolHistory`] owns the merged constant pool for the whole merge. Each module's entries are
//! translated lazily: the first time an old index is requested, the entry is re-encoded with all
//! of its dependencies already translated, and the resulting bytes are interned. Byte-identical
//! entries collapse into one merged index, and constants that nothing references never reach the
//! output.
//!
//! Private namespaces are the exception to byte-level deduplication. Two private namespaces are
//! distinct even when their encodings agree, so they are interned under a key that includes the
//! contributing module and their original index.

use std::collections::{HashMap, HashSet};

use strum::EnumCount;

use crate::{
    abc::constants::{ConstantKind, PoolKind},
    file::io::write_u30,
    pool::constantpool::{ConstantPool, MultinameEntry, QualifiedName},
    Error, Result,
};

/// How the merge treats the body of a given method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    /// Replace the body with a fixed body that only returns
    EmptyBody,
    /// Keep the code up to and including the first `constructsuper`, then return
    StopAfterConstructSuper,
    /// Transcode the body unmodified
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    /// `(module ordinal, original index)` for entries that must never be shared
    scope: Option<(usize, u32)>,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct InternTable {
    bytes: Vec<u8>,
    count: u32,
    index: HashMap<EntryKey, u32>,
}

impl InternTable {
    fn intern(&mut self, key: EntryKey) -> u32 {
        if let Some(&index) = self.index.get(&key) {
            return index;
        }

        self.bytes.extend_from_slice(&key.bytes);
        self.count += 1;
        self.index.insert(key, self.count);
        self.count
    }
}

/// Merged constant pool plus the per-module translation state.
#[derive(Debug, Default)]
pub struct PoolHistory<'a> {
    tables: [InternTable; PoolKind::COUNT],
    module: Option<&'a ConstantPool<'a>>,
    ordinal: usize,
    memo: [HashMap<u32, u32>; PoolKind::COUNT],
    in_progress: HashSet<u32>,
    debug_files: HashMap<u32, u32>,
    replacements: HashMap<u32, ReplacementPolicy>,
}

impl<'a> PoolHistory<'a> {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches translation to a new module and drops all per-module state of the previous one.
    pub fn begin_module(&mut self, pool: &'a ConstantPool<'a>) {
        self.module = Some(pool);
        self.ordinal += 1;
        for memo in &mut self.memo {
            memo.clear();
        }
        self.in_progress.clear();
        self.debug_files.clear();
        self.replacements.clear();
    }

    fn pool(&self) -> Result<&'a ConstantPool<'a>> {
        self.module
            .ok_or(Error::Sequence("constant pool used outside of a module"))
    }

    /// Merged index of entry `old` of `kind` in the current module. Index 0 maps to 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for indices past the module's table and
    /// [`crate::Error::Malformed`] for self-referencing multinames.
    pub fn translate(&mut self, kind: PoolKind, old: u32) -> Result<u32> {
        if old == 0 {
            return Ok(0);
        }
        if let Some(&merged) = self.memo[kind.index()].get(&old) {
            return Ok(merged);
        }

        let key = self.encode(kind, old)?;
        let merged = self.tables[kind.index()].intern(key);
        self.memo[kind.index()].insert(old, merged);
        Ok(merged)
    }

    fn encode(&mut self, kind: PoolKind, old: u32) -> Result<EntryKey> {
        let pool = self.pool()?;
        let mut bytes = Vec::new();
        let mut scope = None;

        match kind {
            PoolKind::Int => write_u30(&mut bytes, pool.int(old)? as u32),
            PoolKind::UInt => write_u30(&mut bytes, pool.uint(old)?),
            PoolKind::Double => bytes.extend_from_slice(pool.double_bytes(old)?),
            PoolKind::String => {
                let string = pool.string(old)?;
                write_u30(&mut bytes, string.len() as u32);
                bytes.extend_from_slice(string);
            }
            PoolKind::Namespace => {
                let (ns_kind, name) = pool.namespace(old)?;
                if ns_kind == ConstantKind::PrivateNamespace {
                    scope = Some((self.ordinal, old));
                }
                bytes.push(ns_kind as u8);
                write_u30(&mut bytes, self.translate(PoolKind::String, name)?);
            }
            PoolKind::NamespaceSet => {
                let namespaces = pool.namespace_set(old)?;
                write_u30(&mut bytes, namespaces.len() as u32);
                for namespace in namespaces {
                    write_u30(&mut bytes, self.translate(PoolKind::Namespace, namespace)?);
                }
            }
            PoolKind::Multiname => {
                if !self.in_progress.insert(old) {
                    return Err(malformed_error!("Multiname {} references itself", old));
                }
                let entry = pool.multiname(old)?;
                let encoded = self.encode_multiname(&entry, &mut bytes);
                self.in_progress.remove(&old);
                encoded?;
            }
        }

        Ok(EntryKey { scope, bytes })
    }

    fn encode_multiname(&mut self, entry: &MultinameEntry, out: &mut Vec<u8>) -> Result<()> {
        match entry {
            MultinameEntry::QName {
                kind,
                namespace,
                name,
            } => {
                out.push(*kind as u8);
                write_u30(out, self.translate(PoolKind::Namespace, *namespace)?);
                write_u30(out, self.translate(PoolKind::String, *name)?);
            }
            MultinameEntry::RTQName { kind, name } => {
                out.push(*kind as u8);
                write_u30(out, self.translate(PoolKind::String, *name)?);
            }
            MultinameEntry::RTQNameL { kind } => out.push(*kind as u8),
            MultinameEntry::Multiname {
                kind,
                name,
                namespace_set,
            } => {
                out.push(*kind as u8);
                write_u30(out, self.translate(PoolKind::String, *name)?);
                write_u30(out, self.translate(PoolKind::NamespaceSet, *namespace_set)?);
            }
            MultinameEntry::MultinameL {
                kind,
                namespace_set,
            } => {
                out.push(*kind as u8);
                write_u30(out, self.translate(PoolKind::NamespaceSet, *namespace_set)?);
            }
            MultinameEntry::TypeName { name, parameters } => {
                out.push(ConstantKind::TypeName as u8);
                write_u30(out, self.translate(PoolKind::Multiname, *name)?);
                write_u30(out, parameters.len() as u32);
                for parameter in parameters {
                    write_u30(out, self.translate(PoolKind::Multiname, *parameter)?);
                }
            }
        }
        Ok(())
    }

    /// Translates a default value given by its raw constant kind tag.
    ///
    /// Literal kinds (`undefined`, `true`, `false`, `null`) carry their value in the tag; their
    /// index is returned unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownConstantKind`] if the tag does not name a pool.
    pub fn translate_value(&mut self, kind: u8, value: u32) -> Result<u32> {
        match ConstantKind::from_repr(kind) {
            Some(constant) if constant.is_literal() => Ok(value),
            Some(constant) => match constant.pool_kind() {
                Some(pool_kind) => self.translate(pool_kind, value),
                None => Err(Error::UnknownConstantKind { kind, index: value }),
            },
            None => Err(Error::UnknownConstantKind { kind, index: value }),
        }
    }

    /// Interns a copy of `QName` `multiname` whose namespace is replaced by `namespace`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `multiname` is not a `QName`.
    pub fn translate_with_namespace(&mut self, multiname: u32, namespace: u32) -> Result<u32> {
        let (kind, name) = match self.pool()?.multiname(multiname)? {
            MultinameEntry::QName { kind, name, .. } => (kind, name),
            other => {
                return Err(malformed_error!(
                    "Multiname {} must be a QName, found {:?}",
                    multiname,
                    other
                ))
            }
        };

        let mut bytes = vec![kind as u8];
        write_u30(&mut bytes, self.translate(PoolKind::Namespace, namespace)?);
        write_u30(&mut bytes, self.translate(PoolKind::String, name)?);

        Ok(self.tables[PoolKind::Multiname.index()].intern(EntryKey { scope: None, bytes }))
    }

    /// Interns raw string bytes that do not come from any module's pool.
    pub fn intern_string(&mut self, string: &[u8]) -> u32 {
        let mut bytes = Vec::with_capacity(string.len() + 2);
        write_u30(&mut bytes, string.len() as u32);
        bytes.extend_from_slice(string);
        self.tables[PoolKind::String.index()].intern(EntryKey { scope: None, bytes })
    }

    /// Translates the path string of a `debugfile` instruction.
    ///
    /// Compiler-emitted paths look like `<source root>;<package>;<file>`. The source root is
    /// machine specific, so it is replaced with `$`. Paths that contain a non-ASCII byte before
    /// the first `;`, start with `;`, or have no `;` at all are translated unchanged.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid string index.
    pub fn rewrite_debug_file(&mut self, old: u32) -> Result<u32> {
        if let Some(&merged) = self.debug_files.get(&old) {
            return Ok(merged);
        }

        let path = self.pool()?.string(old)?;
        let mut separator = None;
        for (position, &byte) in path.iter().enumerate() {
            if byte > 127 {
                break;
            }
            if byte == b';' {
                if position > 0 {
                    separator = Some(position);
                }
                break;
            }
        }

        let merged = match separator {
            Some(position) => {
                let mut rewritten = Vec::with_capacity(path.len() - position + 1);
                rewritten.push(b'$');
                rewritten.extend_from_slice(&path[position..]);
                self.intern_string(&rewritten)
            }
            None => {
                log::debug!(
                    "debug file path {:?} left unrewritten",
                    String::from_utf8_lossy(path)
                );
                self.translate(PoolKind::String, old)?
            }
        };

        self.debug_files.insert(old, merged);
        Ok(merged)
    }

    /// Byte position of entry `old` of `kind` within the current module.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn raw_position(&self, kind: PoolKind, old: u32) -> Result<usize> {
        self.pool()?.position(kind, old)
    }

    /// Raw bytes of string `old` of the current module.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an invalid index.
    pub fn string(&self, old: u32) -> Result<&'a [u8]> {
        self.pool()?.string(old)
    }

    /// Decomposes `QName` `multiname` of the current module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the multiname is not a `QName`.
    pub fn qualified_name(&self, multiname: u32) -> Result<QualifiedName<'a>> {
        self.pool()?.qualified_name(multiname)
    }

    /// The current module's public namespace.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the module has none.
    pub fn find_public_namespace(&self) -> Result<u32> {
        self.pool()?.find_public_namespace()
    }

    /// Registers how the body of method `method` of the current module is to be emitted.
    pub fn mark_replacement(&mut self, method: u32, policy: ReplacementPolicy) {
        self.replacements.insert(method, policy);
    }

    /// The policy registered for `method`, [`ReplacementPolicy::Continue`] if none.
    #[must_use]
    pub fn pending_replacement_for(&self, method: u32) -> ReplacementPolicy {
        self.replacements
            .get(&method)
            .copied()
            .unwrap_or(ReplacementPolicy::Continue)
    }

    /// Number of merged entries of `kind`, not counting index 0.
    #[must_use]
    pub fn count(&self, kind: PoolKind) -> u32 {
        self.tables[kind.index()].count
    }

    /// Serializes the merged pool in ABC order.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for table in &self.tables {
            write_u30(out, if table.count == 0 { 0 } else { table.count + 1 });
            out.extend_from_slice(&table.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::parser::Parser;

    /// Builds a pool with the given strings, one package namespace per string, a private
    /// namespace named after the first string, and one `QName` per package namespace.
    fn pool_bytes(strings: &[&str]) -> Vec<u8> {
        let count = strings.len() as u32;
        let mut data = vec![0, 0, 0];

        write_u30(&mut data, count + 1);
        for string in strings {
            write_u30(&mut data, string.len() as u32);
            data.extend_from_slice(string.as_bytes());
        }

        write_u30(&mut data, count + 2);
        for index in 1..=count {
            data.push(ConstantKind::PackageNamespace as u8);
            write_u30(&mut data, index);
        }
        data.push(ConstantKind::PrivateNamespace as u8);
        write_u30(&mut data, 1);

        data.push(0);

        write_u30(&mut data, count + 1);
        for index in 1..=count {
            data.push(ConstantKind::QName as u8);
            write_u30(&mut data, index);
            write_u30(&mut data, index);
        }
        data
    }

    fn parse(data: &[u8]) -> Result<ConstantPool<'_>> {
        ConstantPool::parse(&mut Parser::new(data))
    }

    #[test]
    fn dedup_across_modules() -> Result<()> {
        let first = pool_bytes(&["a", "x"]);
        let second = pool_bytes(&["x", "b"]);
        let first = parse(&first)?;
        let second = parse(&second)?;

        let mut history = PoolHistory::new();
        history.begin_module(&first);
        assert_eq!(history.translate(PoolKind::String, 1)?, 1);
        assert_eq!(history.translate(PoolKind::String, 2)?, 2);
        assert_eq!(history.translate(PoolKind::String, 0)?, 0);

        history.begin_module(&second);
        assert_eq!(history.translate(PoolKind::String, 1)?, 2);
        assert_eq!(history.translate(PoolKind::String, 2)?, 3);
        assert_eq!(history.count(PoolKind::String), 3);
        Ok(())
    }

    #[test]
    fn multiname_dependencies() -> Result<()> {
        let first = pool_bytes(&["a", "x"]);
        let second = pool_bytes(&["x"]);
        let first = parse(&first)?;
        let second = parse(&second)?;

        let mut history = PoolHistory::new();
        history.begin_module(&first);
        let x_first = history.translate(PoolKind::Multiname, 2)?;
        history.begin_module(&second);
        let x_second = history.translate(PoolKind::Multiname, 1)?;

        assert_eq!(x_first, x_second);
        assert_eq!(history.count(PoolKind::Multiname), 1);
        assert_eq!(history.count(PoolKind::Namespace), 1);
        // only "x" was ever needed
        assert_eq!(history.count(PoolKind::String), 1);
        Ok(())
    }

    #[test]
    fn private_namespaces_stay_distinct() -> Result<()> {
        let data = pool_bytes(&["a"]);
        let first = parse(&data)?;
        let second = parse(&data)?;

        let mut history = PoolHistory::new();
        history.begin_module(&first);
        let private_first = history.translate(PoolKind::Namespace, 2)?;
        let public_first = history.translate(PoolKind::Namespace, 1)?;
        history.begin_module(&second);
        let private_second = history.translate(PoolKind::Namespace, 2)?;
        let public_second = history.translate(PoolKind::Namespace, 1)?;

        assert_ne!(private_first, private_second);
        assert_eq!(public_first, public_second);
        assert_eq!(history.count(PoolKind::Namespace), 3);
        Ok(())
    }

    #[test]
    fn self_referencing_type_name() -> Result<()> {
        // empty pools, then one TypeName whose base is itself
        let data = [0, 0, 0, 0, 0, 0, 2, 0x1D, 1, 1, 1];
        let pool = parse(&data)?;

        let mut history = PoolHistory::new();
        history.begin_module(&pool);
        assert!(matches!(
            history.translate(PoolKind::Multiname, 1),
            Err(Error::Malformed { .. })
        ));
        Ok(())
    }

    #[test]
    fn value_kinds() -> Result<()> {
        let data = pool_bytes(&["a", "b"]);
        let pool = parse(&data)?;

        let mut history = PoolHistory::new();
        history.begin_module(&pool);
        assert_eq!(history.translate_value(ConstantKind::Utf8 as u8, 2)?, 1);
        assert_eq!(history.translate_value(ConstantKind::True as u8, 11)?, 11);
        assert_eq!(history.translate_value(0, 0)?, 0);
        assert!(matches!(
            history.translate_value(0x02, 7),
            Err(Error::UnknownConstantKind { kind: 0x02, index: 7 })
        ));
        assert!(matches!(
            history.translate_value(ConstantKind::RTQNameL as u8, 1),
            Err(Error::UnknownConstantKind { .. })
        ));
        Ok(())
    }

    #[test]
    fn debug_file_paths() -> Result<()> {
        let data = pool_bytes(&["C:\\dev\\src;com\\app;Main.as", ";x;y", "caf\u{e9};a", "plain"]);
        let pool = parse(&data)?;

        let mut history = PoolHistory::new();
        history.begin_module(&pool);

        let rewritten = history.rewrite_debug_file(1)?;
        assert_eq!(rewritten, history.intern_string(b"$;com\\app;Main.as"));
        assert_eq!(history.rewrite_debug_file(1)?, rewritten);

        let leading = history.rewrite_debug_file(2)?;
        assert_eq!(leading, history.translate(PoolKind::String, 2)?);
        let non_ascii = history.rewrite_debug_file(3)?;
        assert_eq!(non_ascii, history.translate(PoolKind::String, 3)?);
        let plain = history.rewrite_debug_file(4)?;
        assert_eq!(plain, history.translate(PoolKind::String, 4)?);
        Ok(())
    }

    #[test]
    fn namespace_substitution() -> Result<()> {
        let data = pool_bytes(&["", "field"]);
        let pool = parse(&data)?;

        let mut history = PoolHistory::new();
        history.begin_module(&pool);
        let public = history.find_public_namespace()?;
        assert_eq!(public, 1);

        // QName 2 lives in namespace 2 ("field"); move it to the public namespace
        let published = history.translate_with_namespace(2, public)?;
        let qname = history.qualified_name(2)?;
        assert_eq!(qname.name, b"field");
        assert_ne!(published, history.translate(PoolKind::Multiname, 2)?);
        assert_eq!(history.count(PoolKind::Multiname), 2);
        Ok(())
    }

    #[test]
    fn replacement_table_is_per_module() -> Result<()> {
        let data = pool_bytes(&["a"]);
        let pool = parse(&data)?;

        let mut history = PoolHistory::new();
        history.begin_module(&pool);
        history.mark_replacement(3, ReplacementPolicy::EmptyBody);
        assert_eq!(history.pending_replacement_for(3), ReplacementPolicy::EmptyBody);
        assert_eq!(history.pending_replacement_for(4), ReplacementPolicy::Continue);

        history.begin_module(&pool);
        assert_eq!(history.pending_replacement_for(3), ReplacementPolicy::Continue);
        Ok(())
    }

    #[test]
    fn write_to_round_trips_through_the_parser() -> Result<()> {
        let data = pool_bytes(&["a", "b"]);
        let pool = parse(&data)?;

        let mut history = PoolHistory::new();
        history.begin_module(&pool);
        history.translate(PoolKind::Multiname, 2)?;

        let mut out = Vec::new();
        history.write_to(&mut out);
        let merged = parse(&out)?;

        assert_eq!(merged.entries(PoolKind::Int), 0);
        assert_eq!(merged.entries(PoolKind::String), 1);
        assert_eq!(merged.string(1)?, b"b");
        let qname = merged.qualified_name(1)?;
        assert_eq!(qname.name, b"b");
        assert_eq!(qname.namespace_kind, Some(ConstantKind::PackageNamespace));
        Ok(())
    }

    #[test]
    fn use_outside_module() {
        let mut history = PoolHistory::new();
        assert!(matches!(
            history.translate(PoolKind::String, 1),
            Err(Error::Sequence(_))
        ));
        assert_eq!(history.translate(PoolKind::String, 0).ok(), Some(0));
    }
}
