//! Instruction transcoding.
//!
//! A [`Transcoder`] consumes the instruction events of one method body and writes the rewritten
//! code into the body's [`MethodBodyContext`]. Every body is seen twice:
//!
//! - **First pass**: instructions are re-emitted with all pool, method and class indices
//!   translated. With peephole optimization enabled, each handler first inspects the
//!   [`PeepholeWindow`] and may elide the instruction, rewrite its predecessor in place, or
//!   rewind predecessors and emit a fused replacement. Branches are written with placeholder
//!   displacements and the offsets the second pass needs are recorded in the [`OffsetMap`].
//! - **Second pass**: nothing is emitted. Branch and `lookupswitch` displacements are resolved
//!   through the offset map and patched in place.
//!
//! Once the second pass ends, the code is appended to the method body section; the exception
//! table follows after its own counting and resolving passes.

use log::trace;

use crate::{
    abc::{
        constants::PoolKind,
        info::ExceptionInfo,
        instruction::{Instruction, Operand},
        opcodes::{self, *},
    },
    merge::{
        buffer::{ByteBuffer, SectionBuffer},
        offsets::OffsetMap,
        window::PeepholeWindow,
    },
    pool::PoolHistory,
    Error, Result,
};

/// Progress through the two instruction passes of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodePass {
    /// Emitting rewritten code
    First,
    /// Patching branch displacements
    Second,
    /// Code has been flushed to the body section
    Done,
}

/// Progress through the two exception table passes of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPass {
    /// Entries are announced but not written
    Counting,
    /// Entries are resolved and written
    Resolving,
    /// The table has been flushed to the body section
    Done,
}

/// Rewrite state of the method body currently being transcoded.
///
/// Created when a body starts and dropped when it ends, so no window entry or offset ever
/// leaks from one body into the next.
#[derive(Debug, Clone)]
pub struct MethodBodyContext {
    code: ByteBuffer,
    exceptions: ByteBuffer,
    window: PeepholeWindow,
    offsets: OffsetMap,
    opcode_pass: OpcodePass,
    exception_pass: ExceptionPass,
    truncated: bool,
}

impl MethodBodyContext {
    /// Fresh state for one body. `truncated` bodies get a `returnvoid` appended after the first
    /// pass.
    #[must_use]
    pub fn new(peephole: bool, truncated: bool) -> Self {
        MethodBodyContext {
            code: ByteBuffer::new(),
            exceptions: ByteBuffer::new(),
            window: PeepholeWindow::new(peephole),
            offsets: OffsetMap::new(),
            opcode_pass: OpcodePass::First,
            exception_pass: ExceptionPass::Counting,
            truncated,
        }
    }

    /// Current instruction pass.
    #[must_use]
    pub fn opcode_pass(&self) -> OpcodePass {
        self.opcode_pass
    }

    /// Current exception pass.
    #[must_use]
    pub fn exception_pass(&self) -> ExceptionPass {
        self.exception_pass
    }

    /// Code emitted so far.
    #[must_use]
    pub fn code(&self) -> &[u8] {
        self.code.as_slice()
    }
}

/// Borrowed view of the merge state needed while transcoding one body event.
pub struct Transcoder<'t, 'a> {
    /// State of the current body
    pub ctx: &'t mut MethodBodyContext,
    /// Merged constant pool
    pub history: &'t mut PoolHistory<'a>,
    /// Method table, for `newfunction` and `callstatic`
    pub methods: &'t SectionBuffer,
    /// Class table, for `newclass`
    pub classes: &'t SectionBuffer,
    /// Body section the finished code and exceptions are appended to
    pub bodies: &'t mut SectionBuffer,
    /// Drop `debug`, `debugline` and `debugfile`
    pub strip_debug: bool,
}

fn relative(base: usize, delta: i32) -> Result<usize> {
    usize::try_from(base as i64 + i64::from(delta)).map_err(|_| Error::UnresolvedOffset { offset: base })
}

impl Transcoder<'_, '_> {
    /// Handles a branch destination announced by the driver.
    ///
    /// # Errors
    /// Returns [`crate::Error::Sequence`] after both passes ended.
    pub fn target(&mut self, offset: usize) -> Result<()> {
        match self.ctx.opcode_pass {
            OpcodePass::First => {
                self.ctx.offsets.record(offset, self.ctx.code.len());
                self.ctx.window.clear();
                Ok(())
            }
            OpcodePass::Second => Ok(()),
            OpcodePass::Done => Err(Error::Sequence("branch target after the opcode passes")),
        }
    }

    /// Handles one instruction of either pass.
    ///
    /// # Errors
    /// Returns translation errors in the first pass, [`crate::Error::UnresolvedOffset`] in the
    /// second, and [`crate::Error::Sequence`] after both passes ended.
    pub fn instruction(&mut self, instruction: &Instruction) -> Result<()> {
        match self.ctx.opcode_pass {
            OpcodePass::First => self.emit(instruction),
            OpcodePass::Second => self.patch(instruction),
            OpcodePass::Done => Err(Error::Sequence("instruction after the opcode passes")),
        }
    }

    /// Ends an instruction pass. The second call flushes the code into the body section.
    ///
    /// # Errors
    /// Returns [`crate::Error::Sequence`] on a third call.
    pub fn end_opcodes(&mut self) -> Result<()> {
        match self.ctx.opcode_pass {
            OpcodePass::First => {
                if self.ctx.truncated {
                    self.begin(RETURNVOID);
                }
                self.ctx.opcode_pass = OpcodePass::Second;
            }
            OpcodePass::Second => {
                self.bodies.write_u30(self.ctx.code.len() as u32);
                self.bodies.extend(self.ctx.code.as_slice());
                self.ctx.opcode_pass = OpcodePass::Done;
            }
            OpcodePass::Done => return Err(Error::Sequence("end of opcodes after both passes")),
        }
        Ok(())
    }

    /// Starts an exception pass. Only the resolving pass writes the count.
    ///
    /// # Errors
    /// Returns [`crate::Error::Sequence`] before the code was flushed or after both passes.
    pub fn begin_exceptions(&mut self, count: u32) -> Result<()> {
        if self.ctx.opcode_pass != OpcodePass::Done {
            return Err(Error::Sequence("exceptions before the code was flushed"));
        }
        match self.ctx.exception_pass {
            ExceptionPass::Counting => Ok(()),
            ExceptionPass::Resolving => {
                self.ctx.exceptions.write_u30(count);
                Ok(())
            }
            ExceptionPass::Done => Err(Error::Sequence("exceptions after both passes")),
        }
    }

    /// Handles one exception table entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnresolvedOffset`] if a range boundary or handler offset was
    /// never mapped.
    pub fn exception(&mut self, info: &ExceptionInfo) -> Result<()> {
        match self.ctx.exception_pass {
            ExceptionPass::Counting => Ok(()),
            ExceptionPass::Resolving => {
                for offset in [info.from, info.to, info.target] {
                    let rewritten = self.ctx.offsets.resolve(offset as usize)?;
                    self.ctx.exceptions.write_u30(rewritten as u32);
                }
                let exc_type = self.history.translate(PoolKind::Multiname, info.exc_type)?;
                let var_name = self.history.translate(PoolKind::Multiname, info.var_name)?;
                self.ctx.exceptions.write_u30(exc_type);
                self.ctx.exceptions.write_u30(var_name);
                Ok(())
            }
            ExceptionPass::Done => Err(Error::Sequence("exception entry after both passes")),
        }
    }

    /// Ends an exception pass. The second call appends the table to the body section.
    ///
    /// # Errors
    /// Returns [`crate::Error::Sequence`] on a third call.
    pub fn end_exceptions(&mut self) -> Result<()> {
        match self.ctx.exception_pass {
            ExceptionPass::Counting => self.ctx.exception_pass = ExceptionPass::Resolving,
            ExceptionPass::Resolving => {
                self.bodies.extend(self.ctx.exceptions.as_slice());
                self.ctx.exception_pass = ExceptionPass::Done;
            }
            ExceptionPass::Done => return Err(Error::Sequence("end of exceptions after both passes")),
        }
        Ok(())
    }

    fn op(&self, distance: usize) -> Option<u8> {
        self.ctx.window.opcode_at(&self.ctx.code, distance)
    }

    fn begin(&mut self, opcode: u8) {
        self.ctx.window.begin(&mut self.ctx.code, opcode);
    }

    fn rewind(&mut self, count: usize, rule: &'static str) {
        trace!("peephole {} at rewritten offset {}", rule, self.ctx.code.len());
        self.ctx.window.rewind(&mut self.ctx.code, count);
    }

    fn elide(&self, rule: &'static str) -> Result<()> {
        trace!("peephole {} at rewritten offset {}", rule, self.ctx.code.len());
        Ok(())
    }

    fn drop_coerce_a(&mut self) {
        if self.op(1) == Some(COERCE_A) {
            self.rewind(1, "drop coerce_a");
        }
    }

    fn u30(&mut self, value: u32) {
        self.ctx.code.write_u30(value);
    }

    fn multiname(&mut self, old: u32) -> Result<u32> {
        self.history.translate(PoolKind::Multiname, old)
    }

    fn emit(&mut self, instruction: &Instruction) -> Result<()> {
        let opcode = instruction.opcode;
        match (opcode, &instruction.operand) {
            (RETURNVALUE, _) => self.returnvalue(),
            (GETLOCAL, &Operand::U30(register)) => self.getlocal(register),
            (SETLOCAL, &Operand::U30(register)) => self.setlocal(register),
            (SETLOCAL1..=SETLOCAL3, _) => self.setlocal_n(opcode),
            (POP, _) => self.pop(),
            (CONVERT_S, _) => {
                self.drop_coerce_a();
                self.string_conversion(CONVERT_S)
            }
            (COERCE_S, _) => self.string_conversion(COERCE_S),
            (CONVERT_B, _) => self.convert_b(),
            (KILL, &Operand::U30(register)) => self.kill(register),
            (ADD, _) => {
                self.drop_coerce_a();
                self.begin(ADD);
                Ok(())
            }
            (SUBTRACT, _) => self.decrement_fold(SUBTRACT, DECREMENT),
            (SUBTRACT_I, _) => self.decrement_fold(SUBTRACT_I, DECREMENT_I),
            (NEWOBJECT, &Operand::U30(count)) => {
                if count >= 1 {
                    self.drop_coerce_a();
                }
                self.begin(NEWOBJECT);
                self.u30(count);
                Ok(())
            }
            (GETPROPERTY, &Operand::Multiname(name)) => self.getproperty(name),
            (SETPROPERTY | INITPROPERTY, &Operand::Multiname(name)) => {
                self.drop_coerce_a();
                let name = self.multiname(name)?;
                self.begin(opcode);
                self.u30(name);
                Ok(())
            }
            (SETGLOBALSLOT, &Operand::U30(slot)) => {
                self.drop_coerce_a();
                self.begin(SETGLOBALSLOT);
                self.u30(slot);
                Ok(())
            }
            (CALLPROPERTY, &Operand::MultinameArgs(name, args)) => {
                self.drop_coerce_a();
                let name = self.multiname(name)?;
                self.begin(CALLPROPERTY);
                self.u30(name);
                self.u30(args);
                Ok(())
            }
            (PUSHSHORT, &Operand::U30(raw)) => self.pushshort(raw),
            (PUSHBYTE, &Operand::Byte(value)) => self.pushbyte(value),
            (COERCE, &Operand::Multiname(name)) => self.coerce(name),
            (COERCE_A, _) => {
                if self.op(1) == Some(COERCE_A) {
                    return self.elide("repeated coerce_a");
                }
                self.begin(COERCE_A);
                Ok(())
            }
            (COERCE_I, _) => self.redundant_conversion(
                COERCE_I,
                &[
                    COERCE_I, CONVERT_I, INCREMENT_I, DECREMENT_I, PUSHBYTE, PUSHSHORT, PUSHINT,
                    BITAND, BITOR, BITXOR, LSHIFT, RSHIFT, ADD_I, SUBTRACT_I, MULTIPLY_I, BITNOT,
                ],
            ),
            (CONVERT_I, _) => self.redundant_conversion(
                CONVERT_I,
                &[
                    CONVERT_I, COERCE_I, BITAND, BITOR, BITXOR, LSHIFT, RSHIFT, ADD_I, SUBTRACT_I,
                    INCREMENT_I, DECREMENT_I, MULTIPLY_I, PUSHBYTE, PUSHSHORT, PUSHINT,
                ],
            ),
            (COERCE_U, _) => {
                self.redundant_conversion(COERCE_U, &[COERCE_U, CONVERT_U, URSHIFT])
            }
            (COERCE_D, _) => self.redundant_conversion(
                COERCE_D,
                &[
                    SUBTRACT, MULTIPLY, DIVIDE, MODULO, INCREMENT, DECREMENT, INCLOCAL, DECLOCAL,
                    COERCE_D, CONVERT_D,
                ],
            ),
            (IFTRUE, &Operand::Branch(delta)) => self.iftrue(instruction, delta),
            (IFFALSE, &Operand::Branch(delta)) => self.iffalse(instruction, delta),
            (_, &Operand::Branch(delta)) => {
                self.branch(opcode, instruction, delta);
                Ok(())
            }
            (LOOKUPSWITCH, Operand::Switch { default, cases, table }) => {
                self.lookupswitch(instruction, *default, cases, *table);
                Ok(())
            }
            (DEBUG | DEBUGLINE | DEBUGFILE, _) if self.strip_debug => Ok(()),
            (DEBUGFILE, &Operand::String(path)) => {
                self.begin(DEBUGFILE);
                let path = if path == 0 {
                    0
                } else {
                    self.history.rewrite_debug_file(path)?
                };
                self.u30(path);
                Ok(())
            }
            (_, operand) => {
                self.begin(opcode);
                self.write_operand(operand)
            }
        }
    }

    fn write_operand(&mut self, operand: &Operand) -> Result<()> {
        match *operand {
            Operand::None => {}
            Operand::Byte(value) => self.ctx.code.push(value as u8),
            Operand::UByte(value) => self.ctx.code.push(value),
            Operand::U30(value) => self.u30(value),
            Operand::U30Pair(first, second) | Operand::DispatchArgs(first, second) => {
                self.u30(first);
                self.u30(second);
            }
            Operand::Int(index) => {
                let index = self.history.translate(PoolKind::Int, index)?;
                self.u30(index);
            }
            Operand::UInt(index) => {
                let index = self.history.translate(PoolKind::UInt, index)?;
                self.u30(index);
            }
            Operand::Double(index) => {
                let index = self.history.translate(PoolKind::Double, index)?;
                self.u30(index);
            }
            Operand::String(index) => {
                let index = self.history.translate(PoolKind::String, index)?;
                self.u30(index);
            }
            Operand::Namespace(index) => {
                let index = self.history.translate(PoolKind::Namespace, index)?;
                self.u30(index);
            }
            Operand::Multiname(index) => {
                let index = self.multiname(index)?;
                self.u30(index);
            }
            Operand::MultinameArgs(index, args) => {
                let index = self.multiname(index)?;
                self.u30(index);
                self.u30(args);
            }
            Operand::Method(index) => {
                let index = self.methods.translate(index);
                self.u30(index);
            }
            Operand::MethodArgs(index, args) => {
                let index = self.methods.translate(index);
                self.u30(index);
                self.u30(args);
            }
            Operand::Class(index) => {
                let index = self.classes.translate(index);
                self.u30(index);
            }
            Operand::Debug {
                kind,
                name,
                register,
                extra,
            } => {
                let name = self.history.translate(PoolKind::String, name)?;
                self.ctx.code.push(kind);
                self.u30(name);
                self.ctx.code.push(register);
                self.u30(extra);
            }
            Operand::Branch(_) | Operand::Switch { .. } => {
                return Err(malformed_error!(
                    "Control flow operand routed through the generic path"
                ))
            }
        }
        Ok(())
    }

    fn returnvalue(&mut self) -> Result<()> {
        self.drop_coerce_a();
        if self.op(1) == Some(PUSHUNDEFINED) {
            self.rewind(1, "pushundefined returnvalue -> returnvoid");
            self.begin(RETURNVOID);
            return Ok(());
        }
        self.begin(RETURNVALUE);
        Ok(())
    }

    fn getlocal(&mut self, register: u32) -> Result<()> {
        if self.op(1) == Some(SETLOCAL)
            && self.ctx.window.read_u30_at(&self.ctx.code, 1) == Some(register)
        {
            self.rewind(1, "setlocal getlocal -> dup setlocal");
            self.begin(DUP);
            return self.setlocal(register);
        }
        self.begin(GETLOCAL);
        self.u30(register);
        Ok(())
    }

    fn setlocal(&mut self, register: u32) -> Result<()> {
        if self.op(2) == Some(GETLOCAL)
            && self.ctx.window.read_u30_at(&self.ctx.code, 2) == Some(register)
        {
            if let Some(fused) = self.increment_fusion() {
                self.rewind(2, "getlocal increment setlocal -> inclocal");
                self.begin(fused);
                self.u30(register);
                return Ok(());
            }
        }
        self.begin(SETLOCAL);
        self.u30(register);
        Ok(())
    }

    fn setlocal_n(&mut self, opcode: u8) -> Result<()> {
        let register = opcode - SETLOCAL0;
        if self.op(2) == Some(GETLOCAL0 + register) {
            if let Some(fused) = self.increment_fusion() {
                self.rewind(2, "getlocal_n increment setlocal_n -> inclocal");
                self.begin(fused);
                self.u30(u32::from(register));
                return Ok(());
            }
        }
        self.begin(opcode);
        Ok(())
    }

    fn increment_fusion(&self) -> Option<u8> {
        match self.op(1) {
            Some(INCREMENT_I) => Some(INCLOCAL_I),
            Some(INCREMENT) => Some(INCLOCAL),
            _ => None,
        }
    }

    fn pop(&mut self) -> Result<()> {
        let void = match self.op(1) {
            Some(CALLPROPERTY) => Some(CALLPROPVOID),
            Some(CALLSUPER) => Some(CALLSUPERVOID),
            _ => None,
        };
        if let Some(void) = void {
            trace!("peephole call pop -> void call at rewritten offset {}", self.ctx.code.len());
            return self.ctx.window.set_opcode_at(&mut self.ctx.code, 1, void);
        }
        self.begin(POP);
        Ok(())
    }

    fn string_conversion(&mut self, opcode: u8) -> Result<()> {
        if matches!(
            self.op(1),
            Some(COERCE_S | CONVERT_S | PUSHSTRING | TYPEOF)
        ) {
            return self.elide("string conversion of a string");
        }
        if self.op(2) == Some(PUSHSTRING) && self.op(1) == Some(ADD) {
            return self.elide("string conversion of a string concatenation");
        }
        self.begin(opcode);
        Ok(())
    }

    fn convert_b(&mut self) -> Result<()> {
        if matches!(
            self.op(1),
            Some(
                EQUALS
                    | STRICTEQUALS
                    | NOT
                    | GREATERTHAN
                    | LESSTHAN
                    | GREATEREQUALS
                    | LESSEQUALS
                    | ISTYPE
                    | ISTYPELATE
                    | INSTANCEOF
                    | DELETEPROPERTY
                    | IN
                    | CONVERT_B
                    | PUSHTRUE
                    | PUSHFALSE
            )
        ) {
            return self.elide("boolean conversion of a boolean");
        }
        self.begin(CONVERT_B);
        Ok(())
    }

    fn redundant_conversion(&mut self, opcode: u8, producers: &[u8]) -> Result<()> {
        if let Some(previous) = self.op(1) {
            if producers.contains(&previous) {
                return self.elide("redundant numeric conversion");
            }
        }
        self.begin(opcode);
        Ok(())
    }

    fn kill(&mut self, register: u32) -> Result<()> {
        if matches!(self.op(1), Some(RETURNVALUE | RETURNVOID)) {
            return self.elide("unreachable kill");
        }
        self.begin(KILL);
        self.u30(register);
        Ok(())
    }

    fn decrement_fold(&mut self, opcode: u8, decrement: u8) -> Result<()> {
        if self.op(1) == Some(PUSHBYTE) && self.ctx.window.read_byte_at(&self.ctx.code, 1) == Some(1)
        {
            self.rewind(1, "pushbyte 1 subtract -> decrement");
            self.begin(decrement);
            return Ok(());
        }
        self.begin(opcode);
        Ok(())
    }

    fn getproperty(&mut self, name: u32) -> Result<()> {
        let name = self.multiname(name)?;
        if self.op(1) == Some(FINDPROPSTRICT)
            && self.ctx.window.read_u30_at(&self.ctx.code, 1) == Some(name)
        {
            self.rewind(1, "findpropstrict getproperty -> getlex");
            self.begin(GETLEX);
            self.u30(name);
            return Ok(());
        }
        self.begin(GETPROPERTY);
        self.u30(name);
        Ok(())
    }

    fn coerce(&mut self, name: u32) -> Result<()> {
        let name = self.multiname(name)?;
        if self.op(1) == Some(COERCE) && self.ctx.window.read_u30_at(&self.ctx.code, 1) == Some(name)
        {
            return self.elide("repeated coerce");
        }
        self.begin(COERCE);
        self.u30(name);
        Ok(())
    }

    fn pushshort(&mut self, raw: u32) -> Result<()> {
        // the operand is a u30 holding a sign-extended 16-bit value
        let value = raw as u16 as i16;
        if self.ctx.window.enabled() && (-128..=127).contains(&value) {
            return self.pushbyte(value as i8);
        }
        self.begin(PUSHSHORT);
        self.u30(raw);
        Ok(())
    }

    fn pushbyte(&mut self, value: i8) -> Result<()> {
        let window = &self.ctx.window;
        let code = &self.ctx.code;
        let repeated = (self.op(1) == Some(PUSHBYTE) && window.read_byte_at(code, 1) == Some(value))
            || (self.op(1) == Some(DUP)
                && self.op(2) == Some(PUSHBYTE)
                && window.read_byte_at(code, 2) == Some(value));
        if repeated {
            trace!("peephole repeated pushbyte -> dup at rewritten offset {}", code.len());
            self.begin(DUP);
            return Ok(());
        }
        self.begin(PUSHBYTE);
        self.ctx.code.push(value as u8);
        Ok(())
    }

    fn branch(&mut self, opcode: u8, instruction: &Instruction, delta: i32) {
        self.begin(opcode);
        // placeholder until the second pass knows the rewritten destination
        self.ctx.code.push_s24(delta);
        self.ctx.offsets.record(instruction.next, self.ctx.code.len());
    }

    fn iftrue(&mut self, instruction: &Instruction, delta: i32) -> Result<()> {
        if self.op(1) == Some(CONVERT_B) {
            self.rewind(1, "convert_b iftrue -> iftrue");
        }
        if self.op(1) == Some(PUSHTRUE) {
            self.rewind(1, "pushtrue iftrue -> jump");
            self.branch(JUMP, instruction, delta);
            return Ok(());
        }
        self.branch(IFTRUE, instruction, delta);
        Ok(())
    }

    fn iffalse(&mut self, instruction: &Instruction, delta: i32) -> Result<()> {
        if self.op(1) == Some(CONVERT_B) {
            self.rewind(1, "convert_b iffalse -> iffalse");
        }
        if self.op(1) == Some(NOT) {
            match self.op(2) {
                Some(STRICTEQUALS) => {
                    self.rewind(2, "strictequals not iffalse -> ifstricteq");
                    self.branch(IFSTRICTEQ, instruction, delta);
                    return Ok(());
                }
                Some(EQUALS) => {
                    self.rewind(2, "equals not iffalse -> ifeq");
                    self.branch(IFEQ, instruction, delta);
                    return Ok(());
                }
                _ => {
                    self.rewind(1, "not iffalse -> iftrue");
                    return self.iftrue(instruction, delta);
                }
            }
        }
        if self.op(1) == Some(PUSHFALSE) {
            self.rewind(1, "pushfalse iffalse -> jump");
            self.branch(JUMP, instruction, delta);
            return Ok(());
        }
        self.branch(IFFALSE, instruction, delta);
        Ok(())
    }

    fn lookupswitch(&mut self, instruction: &Instruction, default: i32, cases: &[i32], table: usize) {
        let offset = instruction.offset;
        self.ctx.offsets.record(offset, self.ctx.code.len());
        self.begin(LOOKUPSWITCH);
        self.ctx.offsets.record(offset + 1, self.ctx.code.len());
        self.ctx.code.push_s24(default);
        self.u30(cases.len().saturating_sub(1) as u32);
        for (index, &case) in cases.iter().enumerate() {
            self.ctx.offsets.record(table + 3 * index, self.ctx.code.len());
            self.ctx.code.push_s24(case);
        }
    }

    fn patch(&mut self, instruction: &Instruction) -> Result<()> {
        let offsets = &self.ctx.offsets;
        match &instruction.operand {
            Operand::Branch(delta) if opcodes::is_branch(instruction.opcode) => {
                let origin = offsets.resolve(instruction.next)?;
                let target = offsets.resolve(relative(instruction.next, *delta)?)?;
                let displacement = target as i64 - origin as i64;
                self.ctx
                    .code
                    .patch_s24(origin.saturating_sub(3), displacement as i32)
            }
            Operand::Switch {
                default,
                cases,
                table,
            } => {
                let base = offsets.resolve(instruction.offset)? as i64;
                let mut patches = Vec::with_capacity(cases.len() + 1);

                let default_slot = offsets.resolve(instruction.offset + 1)?;
                let default_target = offsets.resolve(relative(instruction.offset, *default)?)?;
                patches.push((default_slot, default_target as i64 - base));

                for (index, case) in cases.iter().enumerate() {
                    let slot = offsets.resolve(table + 3 * index)?;
                    let target = offsets.resolve(relative(instruction.offset, *case)?)?;
                    patches.push((slot, target as i64 - base));
                }

                for (slot, displacement) in patches {
                    self.ctx.code.patch_s24(slot, displacement as i32)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{merge::MergeConfig, test::helpers::merged_code};

    fn optimized(code: &[u8]) -> Result<Vec<u8>> {
        merged_code(code, MergeConfig::new().peephole(true))
    }

    fn plain(code: &[u8]) -> Result<Vec<u8>> {
        merged_code(code, MergeConfig::new())
    }

    #[test]
    fn decrement_and_return_folds() -> Result<()> {
        assert_eq!(optimized(&[PUSHBYTE, 1, SUBTRACT])?, vec![DECREMENT]);
        assert_eq!(optimized(&[PUSHBYTE, 1, SUBTRACT_I])?, vec![DECREMENT_I]);
        assert_eq!(optimized(&[PUSHUNDEFINED, RETURNVALUE])?, vec![RETURNVOID]);
        assert_eq!(optimized(&[COERCE_A, RETURNVALUE])?, vec![RETURNVALUE]);
        assert_eq!(
            optimized(&[PUSHBYTE, 2, SUBTRACT])?,
            vec![PUSHBYTE, 2, SUBTRACT]
        );
        Ok(())
    }

    #[test]
    fn disabled_peephole_keeps_everything() -> Result<()> {
        let code = [PUSHBYTE, 1, SUBTRACT, COERCE_A, RETURNVALUE];
        assert_eq!(plain(&code)?, code.to_vec());
        Ok(())
    }

    #[test]
    fn local_register_folds() -> Result<()> {
        assert_eq!(
            optimized(&[SETLOCAL, 4, GETLOCAL, 4])?,
            vec![DUP, SETLOCAL, 4]
        );
        assert_eq!(
            optimized(&[GETLOCAL, 5, INCREMENT_I, SETLOCAL, 5])?,
            vec![INCLOCAL_I, 5]
        );
        assert_eq!(
            optimized(&[GETLOCAL, 5, INCREMENT, SETLOCAL, 5])?,
            vec![INCLOCAL, 5]
        );
        assert_eq!(
            optimized(&[GETLOCAL2, INCREMENT_I, SETLOCAL2])?,
            vec![INCLOCAL_I, 2]
        );
        assert_eq!(
            optimized(&[GETLOCAL0, INCREMENT, SETLOCAL0])?,
            vec![GETLOCAL0, INCREMENT, SETLOCAL0]
        );
        assert_eq!(
            optimized(&[GETLOCAL, 5, INCREMENT, SETLOCAL, 6])?,
            vec![GETLOCAL, 5, INCREMENT, SETLOCAL, 6]
        );
        Ok(())
    }

    #[test]
    fn void_calls() -> Result<()> {
        assert_eq!(
            optimized(&[CALLPROPERTY, 1, 0, POP])?,
            vec![CALLPROPVOID, 1, 0]
        );
        assert_eq!(
            optimized(&[CALLSUPER, 1, 2, POP])?,
            vec![CALLSUPERVOID, 1, 2]
        );
        Ok(())
    }

    #[test]
    fn conversions() -> Result<()> {
        assert_eq!(optimized(&[PUSHSTRING, 1, CONVERT_S])?, vec![PUSHSTRING, 1]);
        assert_eq!(
            optimized(&[PUSHSTRING, 1, ADD, COERCE_S])?,
            vec![PUSHSTRING, 1, ADD]
        );
        assert_eq!(optimized(&[TYPEOF, COERCE_A, CONVERT_S])?, vec![TYPEOF]);
        assert_eq!(optimized(&[NOT, CONVERT_B])?, vec![NOT]);
        assert_eq!(optimized(&[BITAND, COERCE_I, CONVERT_I])?, vec![BITAND]);
        assert_eq!(optimized(&[URSHIFT, COERCE_U])?, vec![URSHIFT]);
        assert_eq!(optimized(&[DIVIDE, COERCE_D])?, vec![DIVIDE]);
        assert_eq!(optimized(&[ADD, COERCE_D])?, vec![ADD, COERCE_D]);
        assert_eq!(optimized(&[COERCE_A, COERCE_A])?, vec![COERCE_A]);
        assert_eq!(optimized(&[COERCE, 1, COERCE, 1])?, vec![COERCE, 1]);
        Ok(())
    }

    #[test]
    fn coerce_a_before_consumers() -> Result<()> {
        assert_eq!(
            optimized(&[COERCE_A, SETPROPERTY, 1])?,
            vec![SETPROPERTY, 1]
        );
        assert_eq!(optimized(&[COERCE_A, NEWOBJECT, 1])?, vec![NEWOBJECT, 1]);
        assert_eq!(
            optimized(&[COERCE_A, NEWOBJECT, 0])?,
            vec![COERCE_A, NEWOBJECT, 0]
        );
        assert_eq!(optimized(&[COERCE_A, ADD])?, vec![ADD]);
        Ok(())
    }

    #[test]
    fn getlex_fusion() -> Result<()> {
        assert_eq!(
            optimized(&[FINDPROPSTRICT, 1, GETPROPERTY, 1])?,
            vec![GETLEX, 1]
        );
        assert_eq!(
            optimized(&[FINDPROPSTRICT, 1, GETPROPERTY, 2])?,
            vec![FINDPROPSTRICT, 1, GETPROPERTY, 2]
        );
        Ok(())
    }

    #[test]
    fn push_folds() -> Result<()> {
        assert_eq!(optimized(&[PUSHSHORT, 0x05])?, vec![PUSHBYTE, 5]);
        // 0xFF80 is -128 as a 16-bit value
        assert_eq!(optimized(&[PUSHSHORT, 0x80, 0xFF, 0x03])?, vec![PUSHBYTE, 0x80]);
        assert_eq!(
            optimized(&[PUSHSHORT, 0x80, 0x02])?,
            vec![PUSHSHORT, 0x80, 0x02]
        );
        assert_eq!(plain(&[PUSHSHORT, 0x05])?, vec![PUSHSHORT, 0x05]);
        assert_eq!(
            optimized(&[PUSHBYTE, 3, PUSHBYTE, 3, PUSHBYTE, 3])?,
            vec![PUSHBYTE, 3, DUP, DUP]
        );
        Ok(())
    }

    #[test]
    fn kill_after_return() -> Result<()> {
        assert_eq!(optimized(&[RETURNVOID, KILL, 1])?, vec![RETURNVOID]);
        Ok(())
    }

    #[test]
    fn conditional_branch_folds() -> Result<()> {
        // iffalse +1 over a nop, landing on returnvoid
        let tail = [0x01, 0x00, 0x00, NOP, RETURNVOID];

        let mut code = vec![PUSHTRUE, IFTRUE];
        code.extend_from_slice(&tail);
        assert_eq!(optimized(&code)?, vec![JUMP, 0x01, 0x00, 0x00, NOP, RETURNVOID]);

        let mut code = vec![STRICTEQUALS, NOT, IFFALSE];
        code.extend_from_slice(&tail);
        assert_eq!(
            optimized(&code)?,
            vec![IFSTRICTEQ, 0x01, 0x00, 0x00, NOP, RETURNVOID]
        );

        let mut code = vec![EQUALS, NOT, IFFALSE];
        code.extend_from_slice(&tail);
        assert_eq!(optimized(&code)?, vec![IFEQ, 0x01, 0x00, 0x00, NOP, RETURNVOID]);

        let mut code = vec![PUSHNULL, NOT, CONVERT_B, IFFALSE];
        code.extend_from_slice(&tail);
        assert_eq!(
            optimized(&code)?,
            vec![PUSHNULL, IFTRUE, 0x01, 0x00, 0x00, NOP, RETURNVOID]
        );

        let mut code = vec![PUSHFALSE, IFFALSE];
        code.extend_from_slice(&tail);
        assert_eq!(optimized(&code)?, vec![JUMP, 0x01, 0x00, 0x00, NOP, RETURNVOID]);
        Ok(())
    }

    #[test]
    fn branch_displacement_follows_shrinking_code() -> Result<()> {
        // jump over "pushbyte 1, subtract" which folds into one byte
        let code = [
            JUMP, 0x03, 0x00, 0x00, PUSHBYTE, 1, SUBTRACT, RETURNVOID,
        ];
        let rewritten = optimized(&code)?;
        assert_eq!(rewritten, vec![JUMP, 0x01, 0x00, 0x00, DECREMENT, RETURNVOID]);

        // backwards jump to the start
        let code = [NOP, JUMP, 0xFB, 0xFF, 0xFF];
        assert_eq!(plain(&code)?, code.to_vec());
        Ok(())
    }

    #[test]
    fn fusion_never_crosses_a_target() -> Result<()> {
        // the subtract at offset 7 is a branch destination, so it cannot fold into pushbyte
        let code = [
            PUSHTRUE, IFTRUE, 0x02, 0x00, 0x00, PUSHBYTE, 1, SUBTRACT, RETURNVOID,
        ];
        let rewritten = optimized(&code)?;
        assert_eq!(
            rewritten,
            vec![JUMP, 0x02, 0x00, 0x00, PUSHBYTE, 1, SUBTRACT, RETURNVOID]
        );
        Ok(())
    }

    #[test]
    fn lookupswitch_is_rebased() -> Result<()> {
        // switch at 2: default -> 15 (returnvoid), case 0 -> 14 (nop)
        let code = [
            PUSHBYTE, 0, LOOKUPSWITCH, 0x0D, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x00, PUSHBYTE, 1,
            SUBTRACT, POP, NOP, RETURNVOID,
        ];
        let rewritten = optimized(&code)?;
        assert_eq!(
            rewritten,
            vec![
                PUSHBYTE, 0, LOOKUPSWITCH, 0x0B, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, DECREMENT,
                POP, NOP, RETURNVOID
            ]
        );
        Ok(())
    }

    #[test]
    fn unresolved_branch_is_fatal() {
        // jump into the middle of the pushbyte operand
        let code = [JUMP, 0x01, 0x00, 0x00, PUSHBYTE, 1, RETURNVOID];
        assert!(matches!(
            plain(&code),
            Err(Error::UnresolvedOffset { offset: 5 })
        ));
    }

    #[test]
    fn debug_opcodes_are_stripped() -> Result<()> {
        let code = [DEBUGFILE, 0, DEBUGLINE, 7, DEBUG, 1, 0, 0, 0, RETURNVOID];
        assert_eq!(
            merged_code(&code, MergeConfig::new().strip_debug(true))?,
            vec![RETURNVOID]
        );
        assert_eq!(plain(&code)?, code.to_vec());
        Ok(())
    }
}
