//! Lookback window over the most recently emitted instructions.
//!
//! The window is a ring of the start positions of the last [`WINDOW_SIZE`] instructions
//! written into a method body's code buffer. Instructions are addressed by distance:
//! distance 1 is the most recently emitted one. Peephole rules use it to inspect their
//! predecessors, patch an opcode in place, or delete trailing instructions again.
//!
//! The driver clears the window at every branch destination, so no rule ever looks across
//! a point that control flow can enter from elsewhere.

use crate::{merge::buffer::ByteBuffer, Result};

/// Number of instructions the window remembers.
pub const WINDOW_SIZE: usize = 8;

/// Ring of instruction start positions.
#[derive(Debug, Clone)]
pub struct PeepholeWindow {
    slots: [usize; WINDOW_SIZE],
    head: usize,
    size: usize,
    enabled: bool,
}

impl PeepholeWindow {
    /// Creates an empty window. A disabled window reports no predecessors, which turns every
    /// rewrite rule off.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        PeepholeWindow {
            slots: [0; WINDOW_SIZE],
            head: 0,
            size: 0,
            enabled,
        }
    }

    /// Whether rules may inspect the window.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of instructions currently remembered.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Records the start of a new instruction and writes its opcode.
    pub fn begin(&mut self, code: &mut ByteBuffer, opcode: u8) {
        self.slots[self.head] = code.len();
        self.head = (self.head + 1) & (WINDOW_SIZE - 1);
        if self.size < WINDOW_SIZE {
            self.size += 1;
        }
        code.push(opcode);
    }

    fn start_of(&self, distance: usize) -> Option<usize> {
        if distance == 0 || distance > self.size {
            return None;
        }
        Some(self.slots[self.head.wrapping_sub(distance) & (WINDOW_SIZE - 1)])
    }

    /// Opcode of the instruction `distance` back, if the window is enabled and reaches it.
    #[must_use]
    pub fn opcode_at(&self, code: &ByteBuffer, distance: usize) -> Option<u8> {
        if !self.enabled {
            return None;
        }
        self.start_of(distance).and_then(|position| code.get(position))
    }

    /// Signed byte operand of the instruction `distance` back.
    #[must_use]
    pub fn read_byte_at(&self, code: &ByteBuffer, distance: usize) -> Option<i8> {
        self.start_of(distance)
            .and_then(|position| code.get(position + 1))
            .map(|byte| byte as i8)
    }

    /// First `u30` operand of the instruction `distance` back.
    #[must_use]
    pub fn read_u30_at(&self, code: &ByteBuffer, distance: usize) -> Option<u32> {
        self.start_of(distance)
            .and_then(|position| code.read_u30_at(position + 1).ok())
    }

    /// Replaces the opcode of the instruction `distance` back. Operands stay untouched.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if that instruction is no longer in the buffer.
    pub fn set_opcode_at(&self, code: &mut ByteBuffer, distance: usize, opcode: u8) -> Result<()> {
        match self.start_of(distance) {
            Some(position) => code.patch_u8(position, opcode),
            None => Ok(()),
        }
    }

    /// Deletes the last `count` instructions from `code` and forgets them.
    ///
    /// Counts larger than the window are ignored; rules only rewind instructions they have
    /// just inspected.
    pub fn rewind(&mut self, code: &mut ByteBuffer, count: usize) {
        if count == 0 || count > self.size {
            return;
        }

        let to = self.head.wrapping_sub(count) & (WINDOW_SIZE - 1);
        code.truncate(self.slots[to]);
        self.head = to;
        self.size -= count;
    }

    /// Forgets every instruction without touching the code.
    pub fn clear(&mut self) {
        self.slots = [0; WINDOW_SIZE];
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abc::opcodes::*;

    #[test]
    fn rewind_restores_length_and_predecessor() {
        let mut code = ByteBuffer::new();
        let mut window = PeepholeWindow::new(true);

        window.begin(&mut code, PUSHBYTE);
        code.push(7);
        let after_first = code.len();
        window.begin(&mut code, DUP);
        window.begin(&mut code, GETLOCAL);
        code.write_u30(300);

        window.rewind(&mut code, 2);
        assert_eq!(code.len(), after_first);
        assert_eq!(window.size(), 1);
        assert_eq!(window.opcode_at(&code, 1), Some(PUSHBYTE));
        assert_eq!(window.read_byte_at(&code, 1), Some(7));
        assert_eq!(window.opcode_at(&code, 2), None);
    }

    #[test]
    fn wraps_around() {
        let mut code = ByteBuffer::new();
        let mut window = PeepholeWindow::new(true);

        for index in 0..(WINDOW_SIZE as u32 + 3) {
            window.begin(&mut code, GETLOCAL);
            code.write_u30(index);
        }

        assert_eq!(window.size(), WINDOW_SIZE);
        assert_eq!(window.read_u30_at(&code, 1), Some(WINDOW_SIZE as u32 + 2));
        assert_eq!(window.read_u30_at(&code, WINDOW_SIZE), Some(3));
        assert_eq!(window.opcode_at(&code, WINDOW_SIZE + 1), None);
    }

    #[test]
    fn disabled_window_sees_nothing() {
        let mut code = ByteBuffer::new();
        let mut window = PeepholeWindow::new(false);
        window.begin(&mut code, COERCE_A);
        assert_eq!(window.opcode_at(&code, 1), None);
        assert_eq!(code.as_slice(), &[COERCE_A]);
    }

    #[test]
    fn set_opcode_and_clear() -> Result<()> {
        let mut code = ByteBuffer::new();
        let mut window = PeepholeWindow::new(true);
        window.begin(&mut code, CALLPROPERTY);
        code.write_u30(1);
        code.write_u30(0);

        window.set_opcode_at(&mut code, 1, CALLPROPVOID)?;
        assert_eq!(code.as_slice(), &[CALLPROPVOID, 1, 0]);

        window.clear();
        assert_eq!(window.opcode_at(&code, 1), None);
        Ok(())
    }
}
