//! Decoded instructions as streamed by the driver.

use crate::{
    abc::opcodes::{self, OperandFormat},
    file::parser::Parser,
    Error, Result,
};

/// Operand of a decoded instruction, tagged with the table an index operand refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// No operand
    None,
    /// Signed byte of `pushbyte`
    Byte(i8),
    /// Unsigned byte of `getscopeobject`
    UByte(u8),
    /// Plain `u30` that is not a table index
    U30(u32),
    /// Two plain `u30` values
    U30Pair(u32, u32),
    /// Int pool index
    Int(u32),
    /// UInt pool index
    UInt(u32),
    /// Double pool index
    Double(u32),
    /// String pool index
    String(u32),
    /// Namespace pool index
    Namespace(u32),
    /// Multiname pool index
    Multiname(u32),
    /// Multiname pool index and argument count
    MultinameArgs(u32, u32),
    /// Method table index
    Method(u32),
    /// Method table index and argument count
    MethodArgs(u32, u32),
    /// Dispatch id and argument count
    DispatchArgs(u32, u32),
    /// Class table index
    Class(u32),
    /// Branch displacement relative to the end of the instruction
    Branch(i32),
    /// `lookupswitch` operands
    Switch {
        /// Default displacement, relative to the start of the instruction
        default: i32,
        /// Case displacements (always at least one), relative to the start of the instruction
        cases: Vec<i32>,
        /// Code offset of the first case displacement
        table: usize,
    },
    /// `debug` operands
    Debug {
        /// Debug info kind
        kind: u8,
        /// String pool index of the name
        name: u32,
        /// Register number
        register: u8,
        /// Extra, unused by current VMs
        extra: u32,
    },
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The opcode byte
    pub opcode: u8,
    /// Code offset of the opcode
    pub offset: usize,
    /// Code offset of the following instruction
    pub next: usize,
    /// The decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// Decodes one instruction at the parser's position.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownOpcode`] for bytes outside the instruction set and
    /// [`crate::Error::OutOfBounds`] for truncated operands.
    pub fn decode(parser: &mut Parser<'_>) -> Result<Instruction> {
        let offset = parser.pos();
        let opcode = parser.read_u8()?;
        let format =
            opcodes::operand_format(opcode).ok_or(Error::UnknownOpcode { opcode, offset })?;

        let operand = match format {
            OperandFormat::None => Operand::None,
            OperandFormat::Byte => Operand::Byte(parser.read_le::<i8>()?),
            OperandFormat::UByte => Operand::UByte(parser.read_u8()?),
            OperandFormat::U30 => Operand::U30(parser.read_u30()?),
            OperandFormat::U30Pair => Operand::U30Pair(parser.read_u30()?, parser.read_u30()?),
            OperandFormat::Int => Operand::Int(parser.read_u30()?),
            OperandFormat::UInt => Operand::UInt(parser.read_u30()?),
            OperandFormat::Double => Operand::Double(parser.read_u30()?),
            OperandFormat::String => Operand::String(parser.read_u30()?),
            OperandFormat::Namespace => Operand::Namespace(parser.read_u30()?),
            OperandFormat::Multiname => Operand::Multiname(parser.read_u30()?),
            OperandFormat::MultinameArgs => {
                Operand::MultinameArgs(parser.read_u30()?, parser.read_u30()?)
            }
            OperandFormat::Method => Operand::Method(parser.read_u30()?),
            OperandFormat::MethodArgs => Operand::MethodArgs(parser.read_u30()?, parser.read_u30()?),
            OperandFormat::DispatchArgs => {
                Operand::DispatchArgs(parser.read_u30()?, parser.read_u30()?)
            }
            OperandFormat::Class => Operand::Class(parser.read_u30()?),
            OperandFormat::Branch => Operand::Branch(parser.read_s24()?),
            OperandFormat::Switch => {
                let default = parser.read_s24()?;
                let case_count = parser.read_count()?;
                let table = parser.pos();
                // each case is 3 bytes; refuse counts the remaining code cannot hold
                parser.ensure_remaining(case_count.saturating_add(1).saturating_mul(3))?;

                let mut cases = Vec::with_capacity(case_count + 1);
                for _ in 0..=case_count {
                    cases.push(parser.read_s24()?);
                }
                Operand::Switch {
                    default,
                    cases,
                    table,
                }
            }
            OperandFormat::Debug => Operand::Debug {
                kind: parser.read_u8()?,
                name: parser.read_u30()?,
                register: parser.read_u8()?,
                extra: parser.read_u30()?,
            },
        };

        Ok(Instruction {
            opcode,
            offset,
            next: parser.pos(),
            operand,
        })
    }

    /// Original code offsets this instruction may transfer control to.
    ///
    /// Offsets that would be negative are dropped; they can never be mapped.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<usize> {
        let relative = |base: usize, delta: i32| usize::try_from(base as i64 + i64::from(delta)).ok();

        match &self.operand {
            Operand::Branch(delta) if opcodes::is_branch(self.opcode) => {
                relative(self.next, *delta).into_iter().collect()
            }
            Operand::Switch { default, cases, .. } => std::iter::once(default)
                .chain(cases.iter())
                .filter_map(|delta| relative(self.offset, *delta))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The plain `u30` operand, if the instruction has one.
    #[must_use]
    pub fn u30(&self) -> Option<u32> {
        match self.operand {
            Operand::U30(value) => Some(value),
            _ => None,
        }
    }
}

/// Splits a method body's code into instructions.
///
/// With `stop_after_construct_super`, decoding ends right after the first `constructsuper`.
///
/// # Errors
/// Propagates [`Instruction::decode`] failures.
pub fn decode_code(code: &[u8], stop_after_construct_super: bool) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        let instruction = Instruction::decode(&mut parser)?;
        let stop = stop_after_construct_super && instruction.opcode == opcodes::CONSTRUCTSUPER;
        instructions.push(instruction);
        if stop {
            break;
        }
    }

    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::opcodes::*;

    #[test]
    fn decode_sequence() -> Result<()> {
        let code = [
            GETLOCAL0, PUSHSCOPE, PUSHBYTE, 0xFF, CALLPROPERTY, 0x03, 0x01, JUMP, 0x02, 0x00, 0x00,
            NOP, NOP, RETURNVOID,
        ];
        let instructions = decode_code(&code, false)?;

        assert_eq!(instructions.len(), 7);
        assert_eq!(instructions[2].operand, Operand::Byte(-1));
        assert_eq!(instructions[3].operand, Operand::MultinameArgs(3, 1));
        assert_eq!(instructions[4].offset, 7);
        assert_eq!(instructions[4].next, 11);
        assert_eq!(instructions[4].branch_targets(), vec![13]);
        assert_eq!(instructions[6].offset, 13);
        Ok(())
    }

    #[test]
    fn decode_switch() -> Result<()> {
        let code = [
            LOOKUPSWITCH, 0x09, 0x00, 0x00, 0x01, 0x0A, 0x00, 0x00, 0x0B, 0x00, 0x00, RETURNVOID,
            RETURNVOID,
        ];
        let instructions = decode_code(&code, false)?;

        match &instructions[0].operand {
            Operand::Switch {
                default,
                cases,
                table,
            } => {
                assert_eq!(*default, 9);
                assert_eq!(cases, &vec![10, 11]);
                assert_eq!(*table, 5);
            }
            other => panic!("unexpected operand {other:?}"),
        }
        assert_eq!(instructions[0].next, 11);
        assert_eq!(instructions[0].branch_targets(), vec![9, 10, 11]);
        Ok(())
    }

    #[test]
    fn decode_debug() -> Result<()> {
        let code = [DEBUG, 0x01, 0x05, 0x02, 0x00, DEBUGLINE, 0x0C];
        let instructions = decode_code(&code, false)?;
        assert_eq!(
            instructions[0].operand,
            Operand::Debug {
                kind: 1,
                name: 5,
                register: 2,
                extra: 0
            }
        );
        assert_eq!(instructions[1].u30(), Some(12));
        Ok(())
    }

    #[test]
    fn stop_after_construct_super() -> Result<()> {
        let code = [GETLOCAL0, CONSTRUCTSUPER, 0x00, GETLOCAL0, PUSHSCOPE, RETURNVOID];
        assert_eq!(decode_code(&code, true)?.len(), 2);
        assert_eq!(decode_code(&code, false)?.len(), 5);
        Ok(())
    }

    #[test]
    fn unknown_opcode() {
        let code = [NOP, 0x33];
        assert!(matches!(
            decode_code(&code, false),
            Err(Error::UnknownOpcode {
                opcode: 0x33,
                offset: 1
            })
        ));
    }

    #[test]
    fn truncated_operand() {
        let code = [JUMP, 0x01];
        assert!(matches!(decode_code(&code, false), Err(Error::OutOfBounds)));
    }
}
