//! The module driver.
//!
//! [`AbcFile::parse`] indexes a complete ABC module. [`AbcFile::decode`] then replays it into an
//! [`AbcVisitor`] as a fixed sequence of events:
//!
//! ```text
//! begin_module
//!   method_info*                     one per method_info entry
//!   metadata*                        one per metadata entry, with its index
//!   (begin_instance trait_count trait_entry* end_instance)*
//!   (begin_class trait_count trait_entry* end_class)*
//!   (begin_script trait_count trait_entry* end_script)*
//!   body*
//! end_module
//!
//! body := begin_method_body
//!         ( end_method_body                               if the visitor answered Skip
//!         | pass pass exceptions exceptions
//!           trait_count trait_entry* end_method_body )
//! pass := (target? instruction)* target* end_opcodes
//! exceptions := begin_exceptions exception* end_exceptions
//! ```
//!
//! Every method body is streamed twice so that a visitor rewriting the code can emit it in the
//! first pass and patch branch displacements in the second. Before each instruction that is the
//! destination of a branch, a `lookupswitch` case or an exception range boundary, the driver
//! announces the instruction's offset with `target`. Destinations at the very end of the code
//! are announced after the last instruction.

use std::collections::BTreeSet;

use crate::{
    abc::{
        info::{
            ClassInfo, ExceptionInfo, InstanceInfo, MetadataInfo, MethodBody, MethodBodyHeader,
            MethodInfo, ScriptInfo, Trait,
        },
        instruction::{decode_code, Instruction},
    },
    file::parser::Parser,
    pool::ConstantPool,
    Error::{Empty, OutOfBounds},
    Result,
};

/// How the driver streams a method body, as decided by the visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDecoding {
    /// Stream the complete body
    Continue,
    /// Stream instructions up to and including the first `constructsuper` and no exceptions
    StopAfterConstructSuper,
    /// Send nothing but `end_method_body`
    Skip,
}

/// Receiver of the events [`AbcFile::decode`] produces.
///
/// Every callback may fail; the first error aborts decoding and is returned to the caller.
pub trait AbcVisitor<'a> {
    /// A module starts. `file` stays borrowed until the matching `end_module`.
    fn begin_module(&mut self, file: &'a AbcFile<'a>) -> Result<()>;

    /// One `method_info` entry, in table order.
    fn method_info(&mut self, info: &MethodInfo) -> Result<()>;

    /// Metadata entry `index` of the module.
    fn metadata(&mut self, index: u32, info: &MetadataInfo) -> Result<()>;

    /// The instance side of a class starts. `info.traits` are replayed after it.
    fn begin_instance(&mut self, info: &InstanceInfo) -> Result<()>;

    /// All traits of the current instance were sent.
    fn end_instance(&mut self) -> Result<()>;

    /// The static side of a class starts, with its class initializer method.
    fn begin_class(&mut self, cinit: u32) -> Result<()>;

    /// All traits of the current class were sent.
    fn end_class(&mut self) -> Result<()>;

    /// A script starts, with its initializer method.
    fn begin_script(&mut self, init: u32) -> Result<()>;

    /// All traits of the current script were sent.
    fn end_script(&mut self) -> Result<()>;

    /// Number of `trait_entry` events that follow for the open instance, class, script or
    /// body.
    fn trait_count(&mut self, count: u32) -> Result<()>;

    /// One trait of the open instance, class, script or body.
    fn trait_entry(&mut self, entry: &Trait) -> Result<()>;

    /// A method body starts. The answer decides how much of it is streamed.
    fn begin_method_body(&mut self, header: &MethodBodyHeader) -> Result<BodyDecoding>;

    /// The next instruction, or the end of the code, is reached from original `offset`.
    fn target(&mut self, offset: usize) -> Result<()>;

    /// One instruction of the current pass.
    fn instruction(&mut self, instruction: &Instruction) -> Result<()>;

    /// End of one instruction pass. Sent twice per streamed body.
    fn end_opcodes(&mut self) -> Result<()>;

    /// An exception pass over `count` entries starts. Sent twice per streamed body.
    fn begin_exceptions(&mut self, count: u32) -> Result<()>;

    /// One exception table entry of the current pass.
    fn exception(&mut self, info: &ExceptionInfo) -> Result<()>;

    /// End of one exception pass.
    fn end_exceptions(&mut self) -> Result<()>;

    /// The current method body, including its activation traits, is complete.
    fn end_method_body(&mut self) -> Result<()>;

    /// The module is complete.
    fn end_module(&mut self) -> Result<()>;
}

/// A parsed ABC module borrowing its bytes.
#[derive(Debug, Clone)]
pub struct AbcFile<'a> {
    data: &'a [u8],
    minor: u16,
    major: u16,
    pool: ConstantPool<'a>,
    methods: Vec<MethodInfo>,
    metadata: Vec<MetadataInfo>,
    instances: Vec<InstanceInfo>,
    classes: Vec<ClassInfo>,
    scripts: Vec<ScriptInfo>,
    bodies: Vec<MethodBody>,
}

impl<'a> AbcFile<'a> {
    /// Parses and indexes a complete module.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::OutOfBounds`] for
    /// truncated input and [`crate::Error::Malformed`] for invalid kind tags.
    pub fn parse(data: &'a [u8]) -> Result<AbcFile<'a>> {
        if data.is_empty() {
            return Err(Empty);
        }

        let mut parser = Parser::new(data);
        let minor = parser.read_le::<u16>()?;
        let major = parser.read_le::<u16>()?;
        let pool = ConstantPool::parse(&mut parser)?;

        let method_count = parser.read_count()?;
        let mut methods = Vec::new();
        for _ in 0..method_count {
            methods.push(MethodInfo::parse(&mut parser)?);
        }

        let metadata_count = parser.read_count()?;
        let mut metadata = Vec::new();
        for _ in 0..metadata_count {
            metadata.push(MetadataInfo::parse(&mut parser)?);
        }

        let class_count = parser.read_count()?;
        let mut instances = Vec::new();
        for _ in 0..class_count {
            instances.push(InstanceInfo::parse(&mut parser)?);
        }
        let mut classes = Vec::new();
        for _ in 0..class_count {
            classes.push(ClassInfo::parse(&mut parser)?);
        }

        let script_count = parser.read_count()?;
        let mut scripts = Vec::new();
        for _ in 0..script_count {
            scripts.push(ScriptInfo::parse(&mut parser)?);
        }

        let body_count = parser.read_count()?;
        let mut bodies = Vec::new();
        for _ in 0..body_count {
            bodies.push(MethodBody::parse(&mut parser)?);
        }

        Ok(AbcFile {
            data,
            minor,
            major,
            pool,
            methods,
            metadata,
            instances,
            classes,
            scripts,
            bodies,
        })
    }

    /// Format version as `(major, minor)`.
    #[must_use]
    pub fn version(&self) -> (u16, u16) {
        (self.major, self.minor)
    }

    /// The module's constant pool.
    #[must_use]
    pub fn pool(&self) -> &ConstantPool<'a> {
        &self.pool
    }

    /// Method signatures.
    #[must_use]
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Metadata entries.
    #[must_use]
    pub fn metadata(&self) -> &[MetadataInfo] {
        &self.metadata
    }

    /// Instance sides of the classes.
    #[must_use]
    pub fn instances(&self) -> &[InstanceInfo] {
        &self.instances
    }

    /// Static sides of the classes.
    #[must_use]
    pub fn classes(&self) -> &[ClassInfo] {
        &self.classes
    }

    /// Scripts.
    #[must_use]
    pub fn scripts(&self) -> &[ScriptInfo] {
        &self.scripts
    }

    /// Method bodies.
    #[must_use]
    pub fn bodies(&self) -> &[MethodBody] {
        &self.bodies
    }

    /// Code bytes of a body of this module.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the body does not belong to this module's bytes.
    pub fn code(&self, body: &MethodBody) -> Result<&'a [u8]> {
        let end = body
            .code_offset
            .checked_add(body.code_len)
            .ok_or(OutOfBounds)?;
        self.data.get(body.code_offset..end).ok_or(OutOfBounds)
    }

    /// Replays the module into `visitor`.
    ///
    /// # Errors
    /// Returns the first error raised by the visitor, or an instruction decoding error.
    pub fn decode<'s, V: AbcVisitor<'s>>(&'s self, visitor: &mut V) -> Result<()>
    where
        'a: 's,
    {
        visitor.begin_module(self)?;

        for info in &self.methods {
            visitor.method_info(info)?;
        }
        for (index, info) in self.metadata.iter().enumerate() {
            visitor.metadata(index as u32, info)?;
        }

        for instance in &self.instances {
            visitor.begin_instance(instance)?;
            Self::replay_traits(&instance.traits, visitor)?;
            visitor.end_instance()?;
        }
        for class in &self.classes {
            visitor.begin_class(class.cinit)?;
            Self::replay_traits(&class.traits, visitor)?;
            visitor.end_class()?;
        }
        for script in &self.scripts {
            visitor.begin_script(script.init)?;
            Self::replay_traits(&script.traits, visitor)?;
            visitor.end_script()?;
        }

        for body in &self.bodies {
            self.decode_body(body, visitor)?;
        }

        visitor.end_module()
    }

    fn replay_traits<'s, V: AbcVisitor<'s>>(traits: &[Trait], visitor: &mut V) -> Result<()> {
        visitor.trait_count(traits.len() as u32)?;
        for entry in traits {
            visitor.trait_entry(entry)?;
        }
        Ok(())
    }

    fn decode_body<'s, V: AbcVisitor<'s>>(&self, body: &MethodBody, visitor: &mut V) -> Result<()> {
        let decoding = visitor.begin_method_body(&body.header)?;
        if decoding == BodyDecoding::Skip {
            return visitor.end_method_body();
        }

        let truncated = decoding == BodyDecoding::StopAfterConstructSuper;
        let instructions = decode_code(self.code(body)?, truncated)?;
        let code_end = instructions.last().map_or(0, |last| last.next);
        let exceptions: &[ExceptionInfo] = if truncated { &[] } else { &body.exceptions };

        let mut targets = BTreeSet::new();
        for instruction in &instructions {
            targets.extend(instruction.branch_targets());
        }
        for exception in exceptions {
            targets.insert(exception.from as usize);
            targets.insert(exception.to as usize);
            targets.insert(exception.target as usize);
        }

        for _ in 0..2 {
            for instruction in &instructions {
                if targets.contains(&instruction.offset) {
                    visitor.target(instruction.offset)?;
                }
                visitor.instruction(instruction)?;
            }
            // everything past a truncated body lands on the appended return
            for &offset in targets.range(code_end..) {
                if truncated || offset == code_end {
                    visitor.target(offset)?;
                }
            }
            visitor.end_opcodes()?;
        }

        for _ in 0..2 {
            visitor.begin_exceptions(exceptions.len() as u32)?;
            for exception in exceptions {
                visitor.exception(exception)?;
            }
            visitor.end_exceptions()?;
        }

        Self::replay_traits(&body.traits, visitor)?;
        visitor.end_method_body()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abc::opcodes::*,
        test::{factories::sample_module, helpers::EventLog},
        Error,
    };

    #[test]
    fn parse_sample_module() -> Result<()> {
        let data = sample_module();
        let file = AbcFile::parse(&data)?;

        assert_eq!(file.version(), (46, 16));
        assert_eq!(file.methods().len(), 3);
        assert_eq!(file.instances().len(), 1);
        assert_eq!(file.classes().len(), 1);
        assert_eq!(file.scripts().len(), 1);
        assert_eq!(file.bodies().len(), 3);

        let iinit = &file.bodies()[1];
        assert_eq!(file.code(iinit)?.first(), Some(&GETLOCAL0));
        Ok(())
    }

    #[test]
    fn empty_and_truncated_input() {
        assert!(matches!(AbcFile::parse(&[]), Err(Error::Empty)));

        let data = sample_module();
        assert!(matches!(
            AbcFile::parse(&data[..data.len() - 3]),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn event_grammar() -> Result<()> {
        let data = sample_module();
        let file = AbcFile::parse(&data)?;

        let mut log = EventLog::default();
        file.decode(&mut log)?;

        assert_eq!(log.events.first().map(String::as_str), Some("begin_module"));
        assert_eq!(log.events.last().map(String::as_str), Some("end_module"));
        assert_eq!(log.count("method_info"), 3);
        assert_eq!(log.count("begin_method_body"), 3);
        assert_eq!(log.count("end_opcodes"), 6);
        assert_eq!(log.count("begin_exceptions"), 6);
        assert_eq!(log.count("end_method_body"), 3);

        let instance = log.position("begin_instance").unwrap_or(usize::MAX);
        let class = log.position("begin_class").unwrap_or(0);
        let body = log.position("begin_method_body").unwrap_or(0);
        assert!(instance < class && class < body);
        Ok(())
    }

    #[test]
    fn targets_are_announced_in_both_passes() -> Result<()> {
        let data = sample_module();
        let file = AbcFile::parse(&data)?;

        let mut log = EventLog::default();
        file.decode(&mut log)?;

        // the script init body branches over one instruction
        let targets: Vec<&String> = log
            .events
            .iter()
            .filter(|event| event.starts_with("target"))
            .collect();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0], targets[1]);
        Ok(())
    }

    #[test]
    fn skip_and_truncate() -> Result<()> {
        let data = sample_module();
        let file = AbcFile::parse(&data)?;

        let mut log = EventLog {
            decisions: vec![
                BodyDecoding::Skip,
                BodyDecoding::StopAfterConstructSuper,
                BodyDecoding::Continue,
            ],
            ..EventLog::default()
        };
        file.decode(&mut log)?;

        assert_eq!(log.count("begin_method_body"), 3);
        assert_eq!(log.count("end_method_body"), 3);
        assert_eq!(log.count("end_opcodes"), 4);

        // the constructor is cut right after constructsuper, in both passes
        let constructor: Vec<&String> = log
            .events
            .iter()
            .skip_while(|event| event.as_str() != "begin_method_body 1")
            .take_while(|event| event.as_str() != "end_method_body")
            .filter(|event| event.starts_with("instruction"))
            .collect();
        assert_eq!(constructor.len(), 8);
        assert_eq!(constructor[3], constructor[7]);
        assert_eq!(
            constructor.last().map(|event| event.as_str()),
            Some(format!("instruction {CONSTRUCTSUPER:#04x}").as_str())
        );
        Ok(())
    }
}
