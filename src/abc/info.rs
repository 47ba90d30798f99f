//! Parsed records of the ABC tables that follow the constant pool.
//!
//! Every record keeps the raw, module-local indices it was read with. Translating them into the
//! merged numbering space is the job of [`crate::merge`]; the types here only mirror the
//! on-disk layout and know how to read it back.

use crate::{
    abc::constants::{InstanceFlags, MethodFlags, TraitAttributes, TraitKind},
    file::parser::Parser,
    Result,
};

/// Default value of an optional parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionDetail {
    /// Index into the pool selected by `kind`, or an arbitrary non-zero value for literal kinds
    pub value: u32,
    /// Raw constant kind tag
    pub kind: u8,
}

/// A `method_info` entry: signature, flags and optional defaults of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Return type multiname (0 = any)
    pub return_type: u32,
    /// Parameter type multinames
    pub param_types: Vec<u32>,
    /// Debug name string
    pub name: u32,
    /// Method flags
    pub flags: MethodFlags,
    /// Defaults of the trailing optional parameters
    pub options: Vec<OptionDetail>,
    /// Parameter name strings, present only with [`MethodFlags::HAS_PARAM_NAMES`]
    pub param_names: Vec<u32>,
}

impl MethodInfo {
    /// Reads one `method_info` record.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the record is truncated.
    pub fn parse(parser: &mut Parser<'_>) -> Result<MethodInfo> {
        let param_count = parser.read_count()?;
        let return_type = parser.read_u30()?;

        let mut param_types = Vec::with_capacity(param_count.min(parser.remaining()));
        for _ in 0..param_count {
            param_types.push(parser.read_u30()?);
        }

        let name = parser.read_u30()?;
        let flags = MethodFlags::from_bits_retain(parser.read_u8()?);

        let mut options = Vec::new();
        if flags.contains(MethodFlags::HAS_OPTIONAL) {
            let option_count = parser.read_count()?;
            for _ in 0..option_count {
                options.push(OptionDetail {
                    value: parser.read_u30()?,
                    kind: parser.read_u8()?,
                });
            }
        }

        let mut param_names = Vec::new();
        if flags.contains(MethodFlags::HAS_PARAM_NAMES) && param_count != 0 {
            for _ in 0..param_count {
                param_names.push(parser.read_u30()?);
            }
        }

        Ok(MethodInfo {
            return_type,
            param_types,
            name,
            flags,
            options,
            param_names,
        })
    }
}

/// A `metadata_info` entry: a name plus key/value string pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataInfo {
    /// Name string
    pub name: u32,
    /// Key strings (0 = keyless item)
    pub keys: Vec<u32>,
    /// Value strings, one per key
    pub values: Vec<u32>,
}

impl MetadataInfo {
    /// Reads one `metadata_info` record. All keys are stored before all values.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the record is truncated.
    pub fn parse(parser: &mut Parser<'_>) -> Result<MetadataInfo> {
        let name = parser.read_u30()?;
        let item_count = parser.read_count()?;

        let mut keys = Vec::new();
        for _ in 0..item_count {
            keys.push(parser.read_u30()?);
        }
        let mut values = Vec::new();
        for _ in 0..item_count {
            values.push(parser.read_u30()?);
        }

        Ok(MetadataInfo { name, keys, values })
    }
}

/// Kind-specific payload of a [`Trait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraitData {
    /// `Slot` and `Const` traits
    Slot {
        /// Slot position (0 = assigned by the VM)
        slot_id: u32,
        /// Type multiname
        type_name: u32,
        /// Initial value index, 0 when absent
        value: u32,
        /// Constant kind of `value`, only stored when `value != 0`
        value_kind: u8,
    },
    /// `Method`, `Getter` and `Setter` traits
    Method {
        /// Dispatch id
        disp_id: u32,
        /// Method table index
        method: u32,
    },
    /// `Class` traits
    Class {
        /// Slot position
        slot_id: u32,
        /// Class table index
        class: u32,
    },
    /// `Function` traits
    Function {
        /// Slot position
        slot_id: u32,
        /// Method table index
        method: u32,
    },
}

/// A named member of an instance, class, script or activation scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trait {
    /// Name multiname, always a `QName` in well-formed modules
    pub name: u32,
    /// The trait kind (low nibble of the kind byte)
    pub kind: TraitKind,
    /// Trait attributes (high nibble of the kind byte)
    pub attributes: TraitAttributes,
    /// Kind-specific data
    pub data: TraitData,
    /// Metadata table indices, present only with [`TraitAttributes::METADATA`]
    pub metadata: Vec<u32>,
}

impl Trait {
    /// Reads one `traits_info` record.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown trait kind and
    /// [`crate::Error::OutOfBounds`] if the record is truncated.
    pub fn parse(parser: &mut Parser<'_>) -> Result<Trait> {
        let name = parser.read_u30()?;
        let kind_byte = parser.read_u8()?;
        let Some(kind) = TraitKind::from_repr(kind_byte & 0x0F) else {
            return Err(malformed_error!(
                "Invalid trait kind 0x{:02X} for trait name {}",
                kind_byte,
                name
            ));
        };
        let attributes = TraitAttributes::from_bits_retain(kind_byte >> 4);

        let data = match kind {
            TraitKind::Slot | TraitKind::Const => {
                let slot_id = parser.read_u30()?;
                let type_name = parser.read_u30()?;
                let value = parser.read_u30()?;
                let value_kind = if value != 0 { parser.read_u8()? } else { 0 };
                TraitData::Slot {
                    slot_id,
                    type_name,
                    value,
                    value_kind,
                }
            }
            TraitKind::Method | TraitKind::Getter | TraitKind::Setter => TraitData::Method {
                disp_id: parser.read_u30()?,
                method: parser.read_u30()?,
            },
            TraitKind::Class => TraitData::Class {
                slot_id: parser.read_u30()?,
                class: parser.read_u30()?,
            },
            TraitKind::Function => TraitData::Function {
                slot_id: parser.read_u30()?,
                method: parser.read_u30()?,
            },
        };

        let mut metadata = Vec::new();
        if attributes.contains(TraitAttributes::METADATA) {
            let count = parser.read_count()?;
            for _ in 0..count {
                metadata.push(parser.read_u30()?);
            }
        }

        Ok(Trait {
            name,
            kind,
            attributes,
            data,
            metadata,
        })
    }

    /// The combined kind byte as stored on disk.
    #[must_use]
    pub fn kind_byte(&self) -> u8 {
        (self.kind as u8) | (self.attributes.bits() << 4)
    }
}

fn parse_traits(parser: &mut Parser<'_>) -> Result<Vec<Trait>> {
    let count = parser.read_count()?;
    let mut traits = Vec::new();
    for _ in 0..count {
        traits.push(Trait::parse(parser)?);
    }
    Ok(traits)
}

/// An `instance_info` entry: the instance side of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Class name multiname
    pub name: u32,
    /// Superclass multiname (0 = none)
    pub super_name: u32,
    /// Instance flags
    pub flags: InstanceFlags,
    /// Protected namespace, present only with [`InstanceFlags::PROTECTED_NS`]
    pub protected_ns: Option<u32>,
    /// Implemented interface multinames
    pub interfaces: Vec<u32>,
    /// Instance initializer (constructor) method index
    pub iinit: u32,
    /// Instance traits
    pub traits: Vec<Trait>,
}

impl InstanceInfo {
    /// Reads one `instance_info` record.
    ///
    /// # Errors
    /// Propagates truncation and trait kind errors.
    pub fn parse(parser: &mut Parser<'_>) -> Result<InstanceInfo> {
        let name = parser.read_u30()?;
        let super_name = parser.read_u30()?;
        let flags = InstanceFlags::from_bits_retain(parser.read_u8()?);
        let protected_ns = if flags.contains(InstanceFlags::PROTECTED_NS) {
            Some(parser.read_u30()?)
        } else {
            None
        };

        let interface_count = parser.read_count()?;
        let mut interfaces = Vec::new();
        for _ in 0..interface_count {
            interfaces.push(parser.read_u30()?);
        }

        let iinit = parser.read_u30()?;
        let traits = parse_traits(parser)?;

        Ok(InstanceInfo {
            name,
            super_name,
            flags,
            protected_ns,
            interfaces,
            iinit,
            traits,
        })
    }
}

/// A `class_info` entry: the static side of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Static initializer method index
    pub cinit: u32,
    /// Static traits
    pub traits: Vec<Trait>,
}

impl ClassInfo {
    /// Reads one `class_info` record.
    ///
    /// # Errors
    /// Propagates truncation and trait kind errors.
    pub fn parse(parser: &mut Parser<'_>) -> Result<ClassInfo> {
        Ok(ClassInfo {
            cinit: parser.read_u30()?,
            traits: parse_traits(parser)?,
        })
    }
}

/// A `script_info` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    /// Script initializer method index
    pub init: u32,
    /// Script traits
    pub traits: Vec<Trait>,
}

impl ScriptInfo {
    /// Reads one `script_info` record.
    ///
    /// # Errors
    /// Propagates truncation and trait kind errors.
    pub fn parse(parser: &mut Parser<'_>) -> Result<ScriptInfo> {
        Ok(ScriptInfo {
            init: parser.read_u30()?,
            traits: parse_traits(parser)?,
        })
    }
}

/// Fixed header of a `method_body_info` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodBodyHeader {
    /// Method table index this body belongs to
    pub method: u32,
    /// Maximum operand stack depth
    pub max_stack: u32,
    /// Number of local registers
    pub local_count: u32,
    /// Scope depth at entry
    pub init_scope_depth: u32,
    /// Maximum scope depth
    pub max_scope_depth: u32,
}

/// One entry of a method body's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Code offset where the protected range starts
    pub from: u32,
    /// Code offset where the protected range ends
    pub to: u32,
    /// Code offset of the handler
    pub target: u32,
    /// Caught type multiname (0 = any)
    pub exc_type: u32,
    /// Catch variable multiname
    pub var_name: u32,
}

/// A `method_body_info` entry. The code itself stays in the module bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Fixed header
    pub header: MethodBodyHeader,
    /// Position of the first code byte within the module
    pub code_offset: usize,
    /// Code length in bytes
    pub code_len: usize,
    /// Exception table
    pub exceptions: Vec<ExceptionInfo>,
    /// Activation traits
    pub traits: Vec<Trait>,
}

impl MethodBody {
    /// Reads one `method_body_info` record, skipping over its code.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the record or its code is truncated.
    pub fn parse(parser: &mut Parser<'_>) -> Result<MethodBody> {
        let header = MethodBodyHeader {
            method: parser.read_u30()?,
            max_stack: parser.read_u30()?,
            local_count: parser.read_u30()?,
            init_scope_depth: parser.read_u30()?,
            max_scope_depth: parser.read_u30()?,
        };

        let code_len = parser.read_count()?;
        let code_offset = parser.pos();
        parser.advance_by(code_len)?;

        let exception_count = parser.read_count()?;
        let mut exceptions = Vec::new();
        for _ in 0..exception_count {
            exceptions.push(ExceptionInfo {
                from: parser.read_u30()?,
                to: parser.read_u30()?,
                target: parser.read_u30()?,
                exc_type: parser.read_u30()?,
                var_name: parser.read_u30()?,
            });
        }

        let traits = parse_traits(parser)?;

        Ok(MethodBody {
            header,
            code_offset,
            code_len,
            exceptions,
            traits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn method_info_with_optionals_and_names() -> Result<()> {
        // 2 params, return 1, types 2 3, name 4, flags HAS_OPTIONAL|HAS_PARAM_NAMES,
        // 1 option (index 5, Utf8), names 6 7
        let data = [2, 1, 2, 3, 4, 0x88, 1, 5, 0x01, 6, 7];
        let mut parser = Parser::new(&data);
        let info = MethodInfo::parse(&mut parser)?;

        assert_eq!(info.param_types, vec![2, 3]);
        assert_eq!(info.name, 4);
        assert_eq!(
            info.options,
            vec![OptionDetail {
                value: 5,
                kind: 0x01
            }]
        );
        assert_eq!(info.param_names, vec![6, 7]);
        assert!(!parser.has_more_data());
        Ok(())
    }

    #[test]
    fn param_names_skipped_without_params() -> Result<()> {
        let data = [0, 0, 0, 0x80, 0xFF];
        let mut parser = Parser::new(&data);
        let info = MethodInfo::parse(&mut parser)?;
        assert!(info.param_names.is_empty());
        assert_eq!(parser.pos(), 4);
        Ok(())
    }

    #[test]
    fn slot_trait_value_kind() -> Result<()> {
        // slot without value, then const with a Utf8 value and metadata
        let data = [1, 0x00, 0, 2, 0, 3, 0x46, 0, 2, 4, 0x01, 1, 7];
        let mut parser = Parser::new(&data);

        let slot = Trait::parse(&mut parser)?;
        assert_eq!(slot.kind, TraitKind::Slot);
        assert_eq!(
            slot.data,
            TraitData::Slot {
                slot_id: 0,
                type_name: 2,
                value: 0,
                value_kind: 0
            }
        );

        let constant = Trait::parse(&mut parser)?;
        assert_eq!(constant.kind, TraitKind::Const);
        assert!(constant.attributes.contains(TraitAttributes::METADATA));
        assert_eq!(constant.kind_byte(), 0x46);
        assert_eq!(constant.metadata, vec![7]);
        assert!(!parser.has_more_data());
        Ok(())
    }

    #[test]
    fn invalid_trait_kind() {
        let data = [1, 0x07, 0, 0];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            Trait::parse(&mut parser),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn instance_with_protected_namespace() -> Result<()> {
        let data = [1, 2, 0x08, 3, 1, 4, 5, 0];
        let mut parser = Parser::new(&data);
        let info = InstanceInfo::parse(&mut parser)?;
        assert_eq!(info.protected_ns, Some(3));
        assert_eq!(info.interfaces, vec![4]);
        assert_eq!(info.iinit, 5);
        assert!(info.traits.is_empty());
        Ok(())
    }

    #[test]
    fn method_body_skips_code() -> Result<()> {
        let data = [0, 1, 1, 0, 1, 3, 0xD0, 0x30, 0x47, 1, 0, 3, 3, 0, 0, 0];
        let mut parser = Parser::new(&data);
        let body = MethodBody::parse(&mut parser)?;
        assert_eq!(body.code_offset, 6);
        assert_eq!(body.code_len, 3);
        assert_eq!(body.exceptions.len(), 1);
        assert_eq!(body.exceptions[0].target, 3);
        assert!(body.traits.is_empty());
        Ok(())
    }
}
