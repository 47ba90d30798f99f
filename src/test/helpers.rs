//! Recording visitor and merge shortcuts.

use crate::{
    abc::{
        decoder::{AbcFile, AbcVisitor, BodyDecoding},
        info::{ExceptionInfo, InstanceInfo, MetadataInfo, MethodBodyHeader, MethodInfo, Trait},
        instruction::Instruction,
    },
    merge::{AbcMerger, MergeConfig, ModuleInput, OutputMode},
    test::factories::code_module,
    Error, Result,
};

/// Visitor that records every event as a short string.
///
/// `decisions` answer successive `begin_method_body` events; once exhausted every body is
/// decoded with [`BodyDecoding::Continue`].
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<String>,
    pub decisions: Vec<BodyDecoding>,
    pub(crate) next_decision: usize,
}

impl EventLog {
    /// Number of events named `name`, with or without arguments.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .iter()
            .filter(|event| Self::is(event, name))
            .count()
    }

    /// Index of the first event named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.events.iter().position(|event| Self::is(event, name))
    }

    fn is(event: &str, name: &str) -> bool {
        event == name
            || event
                .strip_prefix(name)
                .is_some_and(|rest| rest.starts_with(' '))
    }

    fn push(&mut self, event: impl Into<String>) -> Result<()> {
        self.events.push(event.into());
        Ok(())
    }
}

impl<'a> AbcVisitor<'a> for EventLog {
    fn begin_module(&mut self, _file: &'a AbcFile<'a>) -> Result<()> {
        self.push("begin_module")
    }

    fn method_info(&mut self, _info: &MethodInfo) -> Result<()> {
        self.push("method_info")
    }

    fn metadata(&mut self, index: u32, _info: &MetadataInfo) -> Result<()> {
        self.push(format!("metadata {index}"))
    }

    fn begin_instance(&mut self, info: &InstanceInfo) -> Result<()> {
        self.push(format!("begin_instance {}", info.name))
    }

    fn end_instance(&mut self) -> Result<()> {
        self.push("end_instance")
    }

    fn begin_class(&mut self, cinit: u32) -> Result<()> {
        self.push(format!("begin_class {cinit}"))
    }

    fn end_class(&mut self) -> Result<()> {
        self.push("end_class")
    }

    fn begin_script(&mut self, init: u32) -> Result<()> {
        self.push(format!("begin_script {init}"))
    }

    fn end_script(&mut self) -> Result<()> {
        self.push("end_script")
    }

    fn trait_count(&mut self, count: u32) -> Result<()> {
        self.push(format!("trait_count {count}"))
    }

    fn trait_entry(&mut self, entry: &Trait) -> Result<()> {
        self.push(format!("trait_entry {}", entry.name))
    }

    fn begin_method_body(&mut self, header: &MethodBodyHeader) -> Result<BodyDecoding> {
        self.push(format!("begin_method_body {}", header.method))?;
        let decision = self
            .decisions
            .get(self.next_decision)
            .copied()
            .unwrap_or(BodyDecoding::Continue);
        self.next_decision += 1;
        Ok(decision)
    }

    fn target(&mut self, offset: usize) -> Result<()> {
        self.push(format!("target {offset}"))
    }

    fn instruction(&mut self, instruction: &Instruction) -> Result<()> {
        self.push(format!("instruction {:#04x}", instruction.opcode))
    }

    fn end_opcodes(&mut self) -> Result<()> {
        self.push("end_opcodes")
    }

    fn begin_exceptions(&mut self, count: u32) -> Result<()> {
        self.push(format!("begin_exceptions {count}"))
    }

    fn exception(&mut self, info: &ExceptionInfo) -> Result<()> {
        self.push(format!("exception {} {} {}", info.from, info.to, info.target))
    }

    fn end_exceptions(&mut self) -> Result<()> {
        self.push("end_exceptions")
    }

    fn end_method_body(&mut self) -> Result<()> {
        self.push("end_method_body")
    }

    fn end_module(&mut self) -> Result<()> {
        self.push("end_module")
    }
}

/// Merges [`code_module`] of `code` alone and returns the rewritten code of its one body.
pub fn merged_code(code: &[u8], config: MergeConfig) -> Result<Vec<u8>> {
    let merger = AbcMerger::new(config.output(OutputMode::Standalone));
    let merged = merger.merge(&[ModuleInput::new(code_module(code))?])?;

    let file = AbcFile::parse(&merged)?;
    let body = file.bodies().first().ok_or(Error::Empty)?;
    Ok(file.code(body)?.to_vec())
}
