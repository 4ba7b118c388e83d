use crate::opcode::{Fetch, Instruction};
use crate::vm::Fault;

/// A region of bytecode
pub trait Region {
  fn instructions(&self) -> &[u8];
}

/// A `Chunk` is a whole bytecode image, loaded at address 0 with no header.
///
/// An empty chunk is what a failed compilation produces; running it halts on
/// the first fetch, since zeroed memory decodes as `HALT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
  instructions: Vec<u8>,
}

impl Chunk {
  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  /// Decodes the chunk front to back into `(offset, instruction)` pairs.
  ///
  /// This follows the byte stream linearly, so embedded data that isn't
  /// reached by execution would still be decoded as code.
  pub fn disassemble(&self) -> Result<Vec<(usize, Instruction)>, Fault> {
    let mut cursor = Cursor::new(&self.instructions);
    let mut listing = Vec::new();
    while cursor.position() < self.instructions.len() {
      let offset = cursor.position();
      listing.push((offset, Instruction::read(&mut cursor)?));
    }
    Ok(listing)
  }
}

impl From<Vec<u8>> for Chunk {
  fn from(instructions: Vec<u8>) -> Self {
    Self { instructions }
  }
}

impl Region for Chunk {
  fn instructions(&self) -> &[u8] {
    &self.instructions
  }
}

/// Reads a byte slice front to back
pub struct Cursor<'a> {
  bytes: &'a [u8],
  position: usize,
}

impl<'a> Cursor<'a> {
  pub fn new(bytes: &'a [u8]) -> Self {
    Self { bytes, position: 0 }
  }

  pub fn position(&self) -> usize {
    self.position
  }
}

impl Fetch for Cursor<'_> {
  fn fetch(&mut self) -> Result<u8, Fault> {
    let byte = *self.bytes.get(self.position).ok_or(Fault::UnexpectedEnd)?;
    self.position += 1;
    Ok(byte)
  }
}
