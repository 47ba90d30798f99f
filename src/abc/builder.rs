//! Programmatic construction of ABC modules.
//!
//! [`AbcBuilder`] assembles a module from pool entries, table records and raw code. It is the
//! counterpart of [`crate::abc::AbcFile::parse`] and is used to produce fixtures, benchmark
//! inputs and small synthetic modules for tooling.
//!
//! # Examples
//!
//! ```rust
//! use abcmerge::abc::{constants::ConstantKind, opcodes::*, AbcBuilder, AbcFile};
//! use abcmerge::abc::info::MethodInfo;
//!
//! let mut builder = AbcBuilder::new();
//! let public = builder.namespace(ConstantKind::PackageNamespace, "");
//! let trace = builder.qname(public, "trace");
//! let hello = builder.string("hello");
//!
//! let init = builder.method(MethodInfo::default());
//! builder.script(init, Vec::new());
//! builder.body(
//!     init,
//!     &[GETLOCAL0, PUSHSCOPE, FINDPROPSTRICT, trace as u8, PUSHSTRING, hello as u8,
//!       CALLPROPVOID, trace as u8, 1, RETURNVOID],
//! );
//!
//! let bytes = builder.build();
//! let file = AbcFile::parse(&bytes)?;
//! assert_eq!(file.scripts().len(), 1);
//! # Ok::<(), abcmerge::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    abc::{
        constants::{ConstantKind, InstanceFlags, MethodFlags, TraitAttributes, TraitKind},
        info::{
            ClassInfo, ExceptionInfo, InstanceInfo, MetadataInfo, MethodBodyHeader, MethodInfo,
            ScriptInfo, Trait, TraitData,
        },
    },
    file::io::{push_le, write_u30},
    pool::MultinameEntry,
};

impl Default for MethodInfo {
    fn default() -> Self {
        MethodInfo {
            return_type: 0,
            param_types: Vec::new(),
            name: 0,
            flags: MethodFlags::empty(),
            options: Vec::new(),
            param_names: Vec::new(),
        }
    }
}

impl Trait {
    /// A `Slot` trait without initial value.
    #[must_use]
    pub fn slot(name: u32, type_name: u32) -> Trait {
        Trait {
            name,
            kind: TraitKind::Slot,
            attributes: TraitAttributes::empty(),
            data: TraitData::Slot {
                slot_id: 0,
                type_name,
                value: 0,
                value_kind: 0,
            },
            metadata: Vec::new(),
        }
    }

    /// A `Method`, `Getter` or `Setter` trait.
    #[must_use]
    pub fn method(name: u32, kind: TraitKind, method: u32) -> Trait {
        Trait {
            name,
            kind,
            attributes: TraitAttributes::empty(),
            data: TraitData::Method { disp_id: 0, method },
            metadata: Vec::new(),
        }
    }

    /// A `Class` trait.
    #[must_use]
    pub fn class(name: u32, slot_id: u32, class: u32) -> Trait {
        Trait {
            name,
            kind: TraitKind::Class,
            attributes: TraitAttributes::empty(),
            data: TraitData::Class { slot_id, class },
            metadata: Vec::new(),
        }
    }

    /// Attaches metadata indices and sets the matching attribute.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Vec<u32>) -> Trait {
        self.attributes.set(TraitAttributes::METADATA, !metadata.is_empty());
        self.metadata = metadata;
        self
    }
}

impl InstanceInfo {
    /// A sealed instance without interfaces or traits.
    #[must_use]
    pub fn new(name: u32, super_name: u32, iinit: u32) -> InstanceInfo {
        InstanceInfo {
            name,
            super_name,
            flags: InstanceFlags::SEALED,
            protected_ns: None,
            interfaces: Vec::new(),
            iinit,
            traits: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingBody {
    header: MethodBodyHeader,
    code: Vec<u8>,
    exceptions: Vec<ExceptionInfo>,
    traits: Vec<Trait>,
}

/// Incremental builder of a standalone ABC module.
///
/// Pool methods return the index of the new entry. Strings are deduplicated; every other
/// entry is appended as given, so that modules with deliberately duplicated entries can be
/// produced.
#[derive(Debug, Clone)]
pub struct AbcBuilder {
    major: u16,
    minor: u16,
    ints: Vec<i32>,
    uints: Vec<u32>,
    doubles: Vec<f64>,
    strings: Vec<Vec<u8>>,
    string_index: HashMap<Vec<u8>, u32>,
    namespaces: Vec<(ConstantKind, u32)>,
    namespace_sets: Vec<Vec<u32>>,
    multinames: Vec<MultinameEntry>,
    methods: Vec<MethodInfo>,
    metadata: Vec<MetadataInfo>,
    instances: Vec<InstanceInfo>,
    classes: Vec<ClassInfo>,
    scripts: Vec<ScriptInfo>,
    bodies: Vec<PendingBody>,
}

impl Default for AbcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AbcBuilder {
    /// Creates an empty version 46.16 module.
    #[must_use]
    pub fn new() -> Self {
        AbcBuilder {
            major: 46,
            minor: 16,
            ints: Vec::new(),
            uints: Vec::new(),
            doubles: Vec::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            namespaces: Vec::new(),
            namespace_sets: Vec::new(),
            multinames: Vec::new(),
            methods: Vec::new(),
            metadata: Vec::new(),
            instances: Vec::new(),
            classes: Vec::new(),
            scripts: Vec::new(),
            bodies: Vec::new(),
        }
    }

    /// Sets the format version.
    #[must_use]
    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major = major;
        self.minor = minor;
        self
    }

    /// Interns a string.
    pub fn string(&mut self, value: &str) -> u32 {
        self.string_bytes(value.as_bytes())
    }

    /// Interns raw string bytes.
    pub fn string_bytes(&mut self, value: &[u8]) -> u32 {
        if let Some(&index) = self.string_index.get(value) {
            return index;
        }
        self.strings.push(value.to_vec());
        let index = self.strings.len() as u32;
        self.string_index.insert(value.to_vec(), index);
        index
    }

    /// Appends an integer constant.
    pub fn int(&mut self, value: i32) -> u32 {
        self.ints.push(value);
        self.ints.len() as u32
    }

    /// Appends an unsigned integer constant.
    pub fn uint(&mut self, value: u32) -> u32 {
        self.uints.push(value);
        self.uints.len() as u32
    }

    /// Appends a double constant.
    pub fn double(&mut self, value: f64) -> u32 {
        self.doubles.push(value);
        self.doubles.len() as u32
    }

    /// Appends a namespace of the given kind.
    pub fn namespace(&mut self, kind: ConstantKind, name: &str) -> u32 {
        let name = self.string(name);
        self.namespaces.push((kind, name));
        self.namespaces.len() as u32
    }

    /// Appends a namespace set.
    pub fn namespace_set(&mut self, namespaces: &[u32]) -> u32 {
        self.namespace_sets.push(namespaces.to_vec());
        self.namespace_sets.len() as u32
    }

    /// Appends a `QName` in `namespace`.
    pub fn qname(&mut self, namespace: u32, name: &str) -> u32 {
        let name = self.string(name);
        self.multiname(MultinameEntry::QName {
            kind: ConstantKind::QName,
            namespace,
            name,
        })
    }

    /// Appends an arbitrary multiname entry.
    pub fn multiname(&mut self, entry: MultinameEntry) -> u32 {
        self.multinames.push(entry);
        self.multinames.len() as u32
    }

    /// Appends a method signature and returns its method index.
    pub fn method(&mut self, info: MethodInfo) -> u32 {
        self.methods.push(info);
        self.methods.len() as u32 - 1
    }

    /// Appends a metadata entry and returns its index.
    pub fn metadata(&mut self, info: MetadataInfo) -> u32 {
        self.metadata.push(info);
        self.metadata.len() as u32 - 1
    }

    /// Appends a class and returns its class index.
    pub fn class(&mut self, instance: InstanceInfo, class: ClassInfo) -> u32 {
        self.instances.push(instance);
        self.classes.push(class);
        self.classes.len() as u32 - 1
    }

    /// Appends a script.
    pub fn script(&mut self, init: u32, traits: Vec<Trait>) -> u32 {
        self.scripts.push(ScriptInfo { init, traits });
        self.scripts.len() as u32 - 1
    }

    /// Appends a body for `method` with a small default header and no exceptions.
    pub fn body(&mut self, method: u32, code: &[u8]) -> u32 {
        let header = MethodBodyHeader {
            method,
            max_stack: 2,
            local_count: 1,
            init_scope_depth: 0,
            max_scope_depth: 1,
        };
        self.body_with(header, code, Vec::new(), Vec::new())
    }

    /// Appends a body with an explicit header, exception table and activation traits.
    pub fn body_with(
        &mut self,
        header: MethodBodyHeader,
        code: &[u8],
        exceptions: Vec<ExceptionInfo>,
        traits: Vec<Trait>,
    ) -> u32 {
        self.bodies.push(PendingBody {
            header,
            code: code.to_vec(),
            exceptions,
            traits,
        });
        self.bodies.len() as u32 - 1
    }

    /// Serializes the module.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_le::<u16>(&mut out, self.minor);
        push_le::<u16>(&mut out, self.major);

        write_count(&mut out, self.ints.len());
        for &value in &self.ints {
            write_u30(&mut out, value as u32);
        }
        write_count(&mut out, self.uints.len());
        for &value in &self.uints {
            write_u30(&mut out, value);
        }
        write_count(&mut out, self.doubles.len());
        for &value in &self.doubles {
            push_le::<f64>(&mut out, value);
        }
        write_count(&mut out, self.strings.len());
        for value in &self.strings {
            write_u30(&mut out, value.len() as u32);
            out.extend_from_slice(value);
        }
        write_count(&mut out, self.namespaces.len());
        for &(kind, name) in &self.namespaces {
            out.push(kind as u8);
            write_u30(&mut out, name);
        }
        write_count(&mut out, self.namespace_sets.len());
        for set in &self.namespace_sets {
            write_indices(&mut out, set);
        }
        write_count(&mut out, self.multinames.len());
        for entry in &self.multinames {
            write_multiname(&mut out, entry);
        }

        write_u30(&mut out, self.methods.len() as u32);
        for info in &self.methods {
            write_method_info(&mut out, info);
        }

        write_u30(&mut out, self.metadata.len() as u32);
        for info in &self.metadata {
            write_u30(&mut out, info.name);
            write_u30(&mut out, info.keys.len() as u32);
            for &key in &info.keys {
                write_u30(&mut out, key);
            }
            for &value in &info.values {
                write_u30(&mut out, value);
            }
        }

        write_u30(&mut out, self.instances.len() as u32);
        for info in &self.instances {
            write_u30(&mut out, info.name);
            write_u30(&mut out, info.super_name);
            out.push(info.flags.bits());
            if let Some(namespace) = info.protected_ns {
                write_u30(&mut out, namespace);
            }
            write_indices(&mut out, &info.interfaces);
            write_u30(&mut out, info.iinit);
            write_traits(&mut out, &info.traits);
        }
        for info in &self.classes {
            write_u30(&mut out, info.cinit);
            write_traits(&mut out, &info.traits);
        }

        write_u30(&mut out, self.scripts.len() as u32);
        for info in &self.scripts {
            write_u30(&mut out, info.init);
            write_traits(&mut out, &info.traits);
        }

        write_u30(&mut out, self.bodies.len() as u32);
        for body in &self.bodies {
            let header = &body.header;
            for value in [
                header.method,
                header.max_stack,
                header.local_count,
                header.init_scope_depth,
                header.max_scope_depth,
            ] {
                write_u30(&mut out, value);
            }
            write_u30(&mut out, body.code.len() as u32);
            out.extend_from_slice(&body.code);
            write_u30(&mut out, body.exceptions.len() as u32);
            for exception in &body.exceptions {
                for value in [
                    exception.from,
                    exception.to,
                    exception.target,
                    exception.exc_type,
                    exception.var_name,
                ] {
                    write_u30(&mut out, value);
                }
            }
            write_traits(&mut out, &body.traits);
        }

        out
    }
}

/// Pool counts include the implicit entry 0 unless the pool is empty.
fn write_count(out: &mut Vec<u8>, entries: usize) {
    write_u30(out, if entries == 0 { 0 } else { entries as u32 + 1 });
}

fn write_indices(out: &mut Vec<u8>, indices: &[u32]) {
    write_u30(out, indices.len() as u32);
    for &index in indices {
        write_u30(out, index);
    }
}

fn write_multiname(out: &mut Vec<u8>, entry: &MultinameEntry) {
    match entry {
        MultinameEntry::QName {
            kind,
            namespace,
            name,
        } => {
            out.push(*kind as u8);
            write_u30(out, *namespace);
            write_u30(out, *name);
        }
        MultinameEntry::RTQName { kind, name } => {
            out.push(*kind as u8);
            write_u30(out, *name);
        }
        MultinameEntry::RTQNameL { kind } => out.push(*kind as u8),
        MultinameEntry::Multiname {
            kind,
            name,
            namespace_set,
        } => {
            out.push(*kind as u8);
            write_u30(out, *name);
            write_u30(out, *namespace_set);
        }
        MultinameEntry::MultinameL {
            kind,
            namespace_set,
        } => {
            out.push(*kind as u8);
            write_u30(out, *namespace_set);
        }
        MultinameEntry::TypeName { name, parameters } => {
            out.push(ConstantKind::TypeName as u8);
            write_u30(out, *name);
            write_indices(out, parameters);
        }
    }
}

fn write_method_info(out: &mut Vec<u8>, info: &MethodInfo) {
    write_u30(out, info.param_types.len() as u32);
    write_u30(out, info.return_type);
    for &param in &info.param_types {
        write_u30(out, param);
    }
    write_u30(out, info.name);
    out.push(info.flags.bits());
    if info.flags.contains(MethodFlags::HAS_OPTIONAL) {
        write_u30(out, info.options.len() as u32);
        for option in &info.options {
            write_u30(out, option.value);
            out.push(option.kind);
        }
    }
    if info.flags.contains(MethodFlags::HAS_PARAM_NAMES) && !info.param_types.is_empty() {
        for &name in &info.param_names {
            write_u30(out, name);
        }
    }
}

fn write_traits(out: &mut Vec<u8>, traits: &[Trait]) {
    write_u30(out, traits.len() as u32);
    for entry in traits {
        write_u30(out, entry.name);
        out.push(entry.kind_byte());
        match entry.data {
            TraitData::Slot {
                slot_id,
                type_name,
                value,
                value_kind,
            } => {
                write_u30(out, slot_id);
                write_u30(out, type_name);
                write_u30(out, value);
                if value != 0 {
                    out.push(value_kind);
                }
            }
            TraitData::Method { disp_id, method } => {
                write_u30(out, disp_id);
                write_u30(out, method);
            }
            TraitData::Class { slot_id, class } => {
                write_u30(out, slot_id);
                write_u30(out, class);
            }
            TraitData::Function { slot_id, method } => {
                write_u30(out, slot_id);
                write_u30(out, method);
            }
        }
        if entry.attributes.contains(TraitAttributes::METADATA) {
            write_indices(out, &entry.metadata);
        }
    }
}
