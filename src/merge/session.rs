//! The merge controller.
//!
//! [`MergeSession`] receives the event stream of every module in turn and writes each event
//! straight into the merged output sections. Table indices are translated as they are written:
//! constant pool references go through [`PoolHistory`], method, class and body references are
//! offset by the section bases of the modules merged before, and metadata references resolve
//! through the [`MetadataPool`].
//!
//! Section bases only advance at the end of a module, so every index written while a module
//! is open uses the same base regardless of how far the module has been replayed.

use log::debug;

use crate::{
    abc::{
        constants::{MethodFlags, PoolKind, TraitAttributes, TraitKind},
        decoder::{AbcFile, AbcVisitor, BodyDecoding},
        info::{
            ExceptionInfo, InstanceInfo, MetadataInfo, MethodBodyHeader, MethodInfo, Trait,
            TraitData,
        },
        instruction::Instruction,
    },
    file::io::write_u30,
    merge::{
        buffer::SectionBuffer,
        hooks::{
            find_rule, is_rewritable_method, matches_class, matches_published, MergeHook,
            RuleAction,
        },
        metadata::MetadataPool,
        output::serialize,
        transcoder::{ExceptionPass, MethodBodyContext, OpcodePass, Transcoder},
        MergeConfig,
    },
    pool::{PoolHistory, ReplacementPolicy},
    Error, Result,
};

/// Body written for methods whose body is cleared: `max_stack` 1, 2 locals, scope depths 4
/// and 5, then `getlocal0 pushscope returnvoid` with no exceptions and no traits.
pub const EMPTY_METHOD_BODY: [u8; 10] = [0x01, 0x02, 0x04, 0x05, 0x03, 0xD0, 0x30, 0x47, 0x00, 0x00];

/// Which section trait events currently belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Idle,
    Instance {
        rewrite: bool,
        expected: Option<u32>,
        written: u32,
    },
    Class,
    Script,
    Body,
}

/// Merge state across all modules of one merge.
pub struct MergeSession<'a> {
    config: &'a MergeConfig,
    history: PoolHistory<'a>,
    methods: SectionBuffer,
    metadata: MetadataPool,
    instances: SectionBuffer,
    classes: SectionBuffer,
    scripts: SectionBuffer,
    bodies: SectionBuffer,
    module: Option<&'a AbcFile<'a>>,
    hook: Option<&'a dyn MergeHook>,
    scope: Scope,
    body: Option<MethodBodyContext>,
}

impl<'a> MergeSession<'a> {
    /// Creates an empty session.
    #[must_use]
    pub fn new(config: &'a MergeConfig) -> Self {
        MergeSession {
            config,
            history: PoolHistory::new(),
            methods: SectionBuffer::new(),
            metadata: MetadataPool::new(),
            instances: SectionBuffer::new(),
            classes: SectionBuffer::new(),
            scripts: SectionBuffer::new(),
            bodies: SectionBuffer::new(),
            module: None,
            hook: None,
            scope: Scope::Idle,
            body: None,
        }
    }

    /// Installs the hook consulted for the next module. `None` disables rewriting.
    pub fn set_hook(&mut self, hook: Option<&'a dyn MergeHook>) {
        self.hook = hook;
    }

    /// Number of methods merged so far.
    #[must_use]
    pub fn method_count(&self) -> u32 {
        self.methods.count()
    }

    /// Serializes everything merged so far.
    ///
    /// # Errors
    /// Returns [`crate::Error::Sequence`] if a module is still open.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.module.is_some() {
            return Err(Error::Sequence("merge finished inside a module"));
        }

        let (major, minor) = self.config.version;
        serialize(self.config.output, major, minor, |out| {
            self.history.write_to(out);

            write_u30(out, self.methods.count());
            out.extend_from_slice(self.methods.bytes().as_slice());

            write_u30(out, self.metadata.count());
            out.extend_from_slice(self.metadata.as_slice());

            write_u30(out, self.classes.count());
            out.extend_from_slice(self.instances.bytes().as_slice());
            out.extend_from_slice(self.classes.bytes().as_slice());

            write_u30(out, self.scripts.count());
            out.extend_from_slice(self.scripts.bytes().as_slice());

            write_u30(out, self.bodies.count());
            out.extend_from_slice(self.bodies.bytes().as_slice());
            Ok(())
        })
    }

    fn transcoder(&mut self) -> Result<Transcoder<'_, 'a>> {
        let ctx = self
            .body
            .as_mut()
            .ok_or(Error::Sequence("code event outside of a method body"))?;

        Ok(Transcoder {
            ctx,
            history: &mut self.history,
            methods: &self.methods,
            classes: &self.classes,
            bodies: &mut self.bodies,
            strip_debug: self.config.strip_debug,
        })
    }

    fn section(&mut self) -> Result<&mut SectionBuffer> {
        match self.scope {
            Scope::Instance { .. } => Ok(&mut self.instances),
            Scope::Class => Ok(&mut self.classes),
            Scope::Script => Ok(&mut self.scripts),
            Scope::Body => Ok(&mut self.bodies),
            Scope::Idle => Err(Error::Sequence("trait outside of an instance, class, script or body")),
        }
    }

    fn enter(&mut self, scope: Scope) -> Result<()> {
        if self.scope != Scope::Idle {
            return Err(Error::Sequence("nested trait scope"));
        }
        self.scope = scope;
        Ok(())
    }

    fn encode_trait(&mut self, entry: &Trait, name: u32) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        write_u30(&mut out, name);

        let metadata: Vec<u32> = entry
            .metadata
            .iter()
            .filter_map(|&index| self.metadata.lookup(index))
            .collect();
        let mut attributes = entry.attributes;
        if metadata.is_empty() {
            attributes.remove(TraitAttributes::METADATA);
        }
        out.push((entry.kind as u8) | (attributes.bits() << 4));

        match entry.data {
            TraitData::Slot {
                slot_id,
                type_name,
                value,
                value_kind,
            } => {
                write_u30(&mut out, slot_id);
                write_u30(&mut out, self.history.translate(PoolKind::Multiname, type_name)?);
                let value = self.history.translate_value(value_kind, value)?;
                write_u30(&mut out, value);
                if value != 0 {
                    out.push(value_kind);
                }
            }
            TraitData::Method { disp_id, method } => {
                write_u30(&mut out, disp_id);
                write_u30(&mut out, self.methods.translate(method));
            }
            TraitData::Class { slot_id, class } => {
                write_u30(&mut out, slot_id);
                write_u30(&mut out, self.classes.translate(class));
            }
            TraitData::Function { slot_id, method } => {
                write_u30(&mut out, slot_id);
                write_u30(&mut out, self.methods.translate(method));
            }
        }

        if attributes.contains(TraitAttributes::METADATA) {
            write_u30(&mut out, metadata.len() as u32);
            for index in metadata {
                write_u30(&mut out, index);
            }
        }
        Ok(out)
    }

    /// Instance trait count of the matched class once the hook has removed its methods.
    fn rewritten_trait_count(&self, hook: &dyn MergeHook, traits: &[Trait]) -> Result<u32> {
        let declared = traits.len() as u32;
        let delta = match hook.instance_trait_delta() {
            Some(delta) => delta,
            None => {
                let mut removed = 0i64;
                for entry in traits.iter().filter(|entry| is_rewritable_method(entry.kind)) {
                    let name = self.history.qualified_name(entry.name)?;
                    if find_rule(hook.method_rules(), &name)
                        .is_some_and(|rule| rule.action == RuleAction::Remove)
                    {
                        removed += 1;
                    }
                }
                -removed
            }
        };

        let adjusted = i64::from(declared) + delta;
        u32::try_from(adjusted).map_err(|_| {
            malformed_error!("Trait count {} adjusted by {} is negative", declared, delta)
        })
    }

    /// Applies the hook's instance trait rules. `None` drops the trait, otherwise the merged
    /// name to write.
    fn rewrite_instance_trait(&mut self, entry: &Trait) -> Result<Option<u32>> {
        let Some(hook) = self.hook else {
            return self.history.translate(PoolKind::Multiname, entry.name).map(Some);
        };

        match entry.kind {
            kind if is_rewritable_method(kind) => {
                let name = self.history.qualified_name(entry.name)?;
                if let Some(rule) = find_rule(hook.method_rules(), &name) {
                    let method = match entry.data {
                        TraitData::Method { method, .. } => method,
                        _ => return Err(malformed_error!("Method trait {} without a method", entry.name)),
                    };
                    match rule.action {
                        RuleAction::Remove => {
                            debug!("removing method {} of {}", rule.name, hook.class_name());
                            return Ok(None);
                        }
                        RuleAction::ClearBody => {
                            debug!("clearing body of {} in {}", rule.name, hook.class_name());
                            self.history.mark_replacement(method, ReplacementPolicy::EmptyBody);
                        }
                    }
                }
            }
            TraitKind::Slot | TraitKind::Const => {
                let name = self.history.qualified_name(entry.name)?;
                if matches_published(&name, hook.published_names()) {
                    debug!(
                        "publishing field {} of {}",
                        String::from_utf8_lossy(name.name),
                        hook.class_name()
                    );
                    let public = self.history.find_public_namespace()?;
                    return self
                        .history
                        .translate_with_namespace(entry.name, public)
                        .map(Some);
                }
            }
            _ => {}
        }

        self.history.translate(PoolKind::Multiname, entry.name).map(Some)
    }
}

impl<'a> AbcVisitor<'a> for MergeSession<'a> {
    fn begin_module(&mut self, file: &'a AbcFile<'a>) -> Result<()> {
        if self.module.is_some() {
            return Err(Error::Sequence("module started inside a module"));
        }
        debug!(
            "merging module: {} methods, {} classes, {} scripts, {} bodies",
            file.methods().len(),
            file.classes().len(),
            file.scripts().len(),
            file.bodies().len()
        );

        self.history.begin_module(file.pool());
        self.module = Some(file);
        Ok(())
    }

    fn method_info(&mut self, info: &MethodInfo) -> Result<()> {
        let strip = self.config.strip_debug;
        let mut out = Vec::new();

        write_u30(&mut out, info.param_types.len() as u32);
        write_u30(&mut out, self.history.translate(PoolKind::Multiname, info.return_type)?);
        for &param in &info.param_types {
            write_u30(&mut out, self.history.translate(PoolKind::Multiname, param)?);
        }

        let name = if strip {
            0
        } else {
            self.history.translate(PoolKind::String, info.name)?
        };
        write_u30(&mut out, name);

        let mut flags = info.flags;
        if strip {
            flags.remove(MethodFlags::HAS_PARAM_NAMES);
        }
        out.push(flags.bits());

        if flags.contains(MethodFlags::HAS_OPTIONAL) {
            write_u30(&mut out, info.options.len() as u32);
            for option in &info.options {
                write_u30(&mut out, self.history.translate_value(option.kind, option.value)?);
                out.push(option.kind);
            }
        }

        if flags.contains(MethodFlags::HAS_PARAM_NAMES) && !info.param_types.is_empty() {
            for &param_name in &info.param_names {
                write_u30(&mut out, self.history.translate(PoolKind::String, param_name)?);
            }
        }

        self.methods.extend(&out);
        Ok(())
    }

    fn metadata(&mut self, index: u32, info: &MetadataInfo) -> Result<()> {
        let name = self.history.string(info.name)?;
        if self
            .config
            .stripped_metadata
            .iter()
            .any(|stripped| stripped.as_bytes() == name)
        {
            debug!("dropping metadata {}", String::from_utf8_lossy(name));
            return Ok(());
        }

        let mut out = Vec::new();
        write_u30(&mut out, self.history.translate(PoolKind::String, info.name)?);
        write_u30(&mut out, info.keys.len() as u32);
        for &key in &info.keys {
            write_u30(&mut out, self.history.translate(PoolKind::String, key)?);
        }
        for &value in &info.values {
            write_u30(&mut out, self.history.translate(PoolKind::String, value)?);
        }

        self.metadata.add_entry(index, out);
        Ok(())
    }

    fn begin_instance(&mut self, info: &InstanceInfo) -> Result<()> {
        let hook = match self.hook {
            Some(hook) => {
                let name = self.history.qualified_name(info.name)?;
                matches_class(&name, hook.class_name()).then_some(hook)
            }
            None => None,
        };
        let expected = match hook {
            Some(hook) => {
                if hook.truncates_constructor() {
                    debug!("truncating constructor of {}", hook.class_name());
                    self.history
                        .mark_replacement(info.iinit, ReplacementPolicy::StopAfterConstructSuper);
                }
                Some(self.rewritten_trait_count(hook, &info.traits)?)
            }
            None => None,
        };
        self.enter(Scope::Instance {
            rewrite: hook.is_some(),
            expected,
            written: 0,
        })?;

        let mut out = Vec::new();
        write_u30(&mut out, self.history.translate(PoolKind::Multiname, info.name)?);
        write_u30(&mut out, self.history.translate(PoolKind::Multiname, info.super_name)?);
        out.push(info.flags.bits());
        if let Some(namespace) = info.protected_ns {
            write_u30(&mut out, self.history.translate(PoolKind::Namespace, namespace)?);
        }
        write_u30(&mut out, info.interfaces.len() as u32);
        for &interface in &info.interfaces {
            write_u30(&mut out, self.history.translate(PoolKind::Multiname, interface)?);
        }
        write_u30(&mut out, self.methods.translate(info.iinit));

        self.instances.extend(&out);
        Ok(())
    }

    fn end_instance(&mut self) -> Result<()> {
        let Scope::Instance {
            expected, written, ..
        } = self.scope
        else {
            return Err(Error::Sequence("instance ended outside of an instance"));
        };
        if expected != Some(written) {
            return Err(malformed_error!(
                "Instance declared {:?} traits but {} were written",
                expected,
                written
            ));
        }

        self.scope = Scope::Idle;
        Ok(())
    }

    fn begin_class(&mut self, cinit: u32) -> Result<()> {
        self.enter(Scope::Class)?;
        let cinit = self.methods.translate(cinit);
        self.classes.write_u30(cinit);
        Ok(())
    }

    fn end_class(&mut self) -> Result<()> {
        if self.scope != Scope::Class {
            return Err(Error::Sequence("class ended outside of a class"));
        }
        self.scope = Scope::Idle;
        Ok(())
    }

    fn begin_script(&mut self, init: u32) -> Result<()> {
        self.enter(Scope::Script)?;
        let init = self.methods.translate(init);
        self.scripts.write_u30(init);
        Ok(())
    }

    fn end_script(&mut self) -> Result<()> {
        if self.scope != Scope::Script {
            return Err(Error::Sequence("script ended outside of a script"));
        }
        self.scope = Scope::Idle;
        Ok(())
    }

    fn trait_count(&mut self, count: u32) -> Result<()> {
        let count = match &mut self.scope {
            Scope::Instance { expected, .. } => *expected.get_or_insert(count),
            _ => count,
        };

        self.section()?.write_u30(count);
        Ok(())
    }

    fn trait_entry(&mut self, entry: &Trait) -> Result<()> {
        let name = match self.scope {
            Scope::Instance { rewrite: true, .. } => match self.rewrite_instance_trait(entry)? {
                Some(name) => name,
                None => return Ok(()),
            },
            _ => self.history.translate(PoolKind::Multiname, entry.name)?,
        };

        let bytes = self.encode_trait(entry, name)?;
        self.section()?.extend(&bytes);

        if let Scope::Instance { written, .. } = &mut self.scope {
            *written += 1;
        }
        Ok(())
    }

    fn begin_method_body(&mut self, header: &MethodBodyHeader) -> Result<BodyDecoding> {
        if self.body.is_some() {
            return Err(Error::Sequence("method body started inside a method body"));
        }
        self.enter(Scope::Body)?;

        let method = self.methods.translate(header.method);
        let truncated = match self.history.pending_replacement_for(header.method) {
            ReplacementPolicy::EmptyBody => {
                self.bodies.write_u30(method);
                self.bodies.extend(&EMPTY_METHOD_BODY);
                return Ok(BodyDecoding::Skip);
            }
            ReplacementPolicy::StopAfterConstructSuper => true,
            ReplacementPolicy::Continue => false,
        };

        self.bodies.write_u30(method);
        self.bodies.write_u30(header.max_stack);
        self.bodies.write_u30(header.local_count);
        self.bodies.write_u30(header.init_scope_depth);
        self.bodies.write_u30(header.max_scope_depth);

        self.body = Some(MethodBodyContext::new(self.config.peephole, truncated));
        Ok(if truncated {
            BodyDecoding::StopAfterConstructSuper
        } else {
            BodyDecoding::Continue
        })
    }

    fn target(&mut self, offset: usize) -> Result<()> {
        self.transcoder()?.target(offset)
    }

    fn instruction(&mut self, instruction: &Instruction) -> Result<()> {
        self.transcoder()?.instruction(instruction)
    }

    fn end_opcodes(&mut self) -> Result<()> {
        self.transcoder()?.end_opcodes()
    }

    fn begin_exceptions(&mut self, count: u32) -> Result<()> {
        self.transcoder()?.begin_exceptions(count)
    }

    fn exception(&mut self, info: &ExceptionInfo) -> Result<()> {
        self.transcoder()?.exception(info)
    }

    fn end_exceptions(&mut self) -> Result<()> {
        self.transcoder()?.end_exceptions()
    }

    fn end_method_body(&mut self) -> Result<()> {
        if self.scope != Scope::Body {
            return Err(Error::Sequence("method body ended outside of a method body"));
        }
        if let Some(body) = self.body.take() {
            if body.opcode_pass() != OpcodePass::Done || body.exception_pass() != ExceptionPass::Done
            {
                return Err(Error::Sequence("method body ended before both passes"));
            }
        }

        self.scope = Scope::Idle;
        Ok(())
    }

    fn end_module(&mut self) -> Result<()> {
        let file = self
            .module
            .take()
            .ok_or(Error::Sequence("module ended outside of a module"))?;
        if self.scope != Scope::Idle {
            return Err(Error::Sequence("module ended inside a table"));
        }

        let classes = file.classes().len() as u32;
        self.methods.advance_base(file.methods().len() as u32);
        self.metadata.advance(file.metadata().len() as u32);
        self.instances.advance_base(classes);
        self.classes.advance_base(classes);
        self.scripts.advance_base(file.scripts().len() as u32);
        self.bodies.advance_base(file.bodies().len() as u32);
        self.hook = None;

        debug!(
            "module merged: {} methods, {} classes, {} strings so far",
            self.methods.count(),
            self.classes.count(),
            self.history.count(PoolKind::String)
        );
        Ok(())
    }
}
