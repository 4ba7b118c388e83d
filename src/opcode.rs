//! The canonical instruction table.
//!
//! [`for_each_opcode!`] is the only place an opcode's byte value, mnemonic and
//! operand layout are written down. The [`Opcode`] enum, the typed
//! [`Instruction`] the assembler emits and the VM executes, and operand
//! encoding and decoding are all generated from it, so the assembler and the
//! VM can't disagree on how many operand bytes follow an opcode.
//!
//! # Operand layout
//!
//! | Kind    | Bytes             | Meaning                                   |
//! |---------|-------------------|-------------------------------------------|
//! | `Reg`   | 1                 | register index                            |
//! | `Imm8`  | 1                 | unsigned immediate                        |
//! | `Addr`  | 2, big-endian     | absolute offset into memory               |
//! | `Str8`  | 1 + n             | 1-byte length prefix, then n Latin-1 bytes |
//! | `Str16` | 2 + n, big-endian | 2-byte length prefix, then n Latin-1 bytes |

use std::fmt;

use crate::vm::Fault;

macro_rules! for_each_opcode {
  ($callback:ident) => {
    $callback! {
      /// Stops the machine.
      ///
      /// | Operation | Semantics/RTL      | Assembly |
      /// |-----------|--------------------|----------|
      /// | halt      | `(stop execution)` | `EXIT`   |
      Halt = 0, "HALT" => [],

      /// Loads an immediate byte into a register.
      ///
      /// | Operation      | Semantics/RTL | Assembly      |
      /// |----------------|---------------|---------------|
      /// | Load Immediate | `r[d] ← vv`   | `SET Rd vv`   |
      Load = 1, "LOAD" => [rd: Reg, value: Imm8],

      /// `r[d] ← r[d] + r[s]`, wrapping.
      Add = 2, "ADD" => [rd: Reg, rs: Reg],
      /// `r[d] ← r[d] - r[s]`, wrapping.
      Sub = 3, "SUB" => [rd: Reg, rs: Reg],

      /// Stores the low byte of a register into memory.
      ///
      /// | Operation | Semantics/RTL         | Assembly          |
      /// |-----------|-----------------------|-------------------|
      /// | Store     | `m[r[a]] ← r[v] & 0xFF` | `RAM_WRITE Ra Rv` |
      Store = 4, "STORE" => [addr: Reg, value: Reg],

      /// `pc ← aaaa`
      Jmp = 5, "JMP" => [target: Addr],
      /// `if r[0] > 0 : pc ← aaaa`
      Jif = 6, "JIF" => [target: Addr],
      /// `if r[0] == 0 : pc ← aaaa`
      Jz = 7, "JZ" => [target: Addr],

      /// `r[d] ← r[d] × r[s]`, wrapping.
      Mul = 8, "MUL" => [rd: Reg, rs: Reg],
      /// `r[d] ← r[d] / r[s]`; a zero divisor leaves `r[d]` untouched.
      Div = 9, "DIV" => [rd: Reg, rs: Reg],

      PrintVal = 16, "PRINT_VAL" => [rs: Reg],
      PrintChar = 17, "PRINT_CHAR" => [rs: Reg],
      PrintStr = 19, "PRINT_STR" => [],
      InputStr = 20, "INPUT_STR" => [],
      /// Copies the string buffer into the clipboard.
      BufCopy = 21, "BUF_COPY" => [],
      /// Reads a console line as an integer, `0` when it doesn't parse.
      InputInt = 25, "INPUT_INT" => [rd: Reg],
      SetBuf = 29, "SET_BUF" => [text: Str16],

      /// Compares the trimmed string buffer against a command name.
      ///
      /// On a match (`name` exactly, or `name` followed by a space, ignoring
      /// ASCII case) the buffer is replaced by the remaining argument text and
      /// control jumps to `target`.
      CmdCheck = 30, "CMD_CHECK" => [name: Str8, target: Addr],

      FileList = 40, "FILE_LIST" => [],
      FileCreate = 41, "FILE_CREATE" => [],
      FileDelete = 42, "FILE_DELETE" => [],
      FileRead = 43, "FILE_READ" => [],
      /// Stops the machine and asks the host to load the program named by the
      /// string buffer.
      FileExec = 44, "FILE_EXEC" => [],
      MakeNote = 45, "MAKE_NOTE" => [],
      /// Overwrites the named file (or every file, given `*`) with garbage.
      ScrambleFile = 46, "SCRAMBLE_FILE" => [],
      /// Writes the string buffer to the embedded file name.
      FileWrite = 47, "FILE_WRITE" => [name: Str8],
      /// Writes the clipboard to the file named by the string buffer.
      FileSaveAs = 48, "FILE_SAVE_AS" => [],

      SysInfo = 50, "SYS_INFO" => [],
      ClearScr = 60, "CLEAR_SCR" => [],
      NetPing = 70, "NET_PING" => [],
      NetGet = 71, "NET_GET" => [],
    }
  };
}

macro_rules! define_opcodes {
  (
    $(
      $(#[$doc:meta])*
      $name:ident = $opcode:literal, $mnemonic:literal => [
        $( $field:ident : $kind:ident ),* $(,)?
      ]
    ),* $(,)?
  ) => {
    /// A single opcode byte.
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Opcode {
      $(
        $(#[$doc])*
        $name = $opcode,
      )*
    }

    impl TryFrom<u8> for Opcode {
      type Error = Fault;

      fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
          $( $opcode => Ok(Self::$name), )*
          _ => Err(Fault::IllegalOpcode(byte)),
        }
      }
    }

    impl Opcode {
      /// Every opcode, in table order.
      pub const ALL: &'static [Opcode] = &[ $( Opcode::$name ),* ];

      pub const fn mnemonic(self) -> &'static str {
        match self {
          $( Self::$name => $mnemonic, )*
        }
      }

      /// The operands that follow this opcode, in encoding order.
      pub const fn operands(self) -> &'static [Operand] {
        match self {
          $( Self::$name => &[ $( Operand::$kind ),* ], )*
        }
      }
    }

    /// A decoded instruction: an opcode together with its operands.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Instruction {
      $(
        $name { $( $field: define_opcodes!(@ty $kind) ),* },
      )*
    }

    impl Instruction {
      pub const fn opcode(&self) -> Opcode {
        match self {
          $( Self::$name { .. } => Opcode::$name, )*
        }
      }

      /// Appends the bytecode for this instruction to `out`.
      pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
          $(
            Self::$name { $( $field ),* } => {
              out.push($opcode);
              $( define_opcodes!(@encode out, $kind, $field); )*
            }
          )*
        }
        Ok(())
      }

      /// Reads the operands of `opcode` from `source`.
      pub fn decode<F>(opcode: Opcode, source: &mut F) -> Result<Self, Fault>
      where
        F: Fetch + ?Sized,
      {
        Ok(match opcode {
          $(
            Opcode::$name => Self::$name {
              $( $field: define_opcodes!(@decode source, $kind) ),*
            },
          )*
        })
      }
    }

    impl fmt::Display for Instruction {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
          $(
            Self::$name { $( $field ),* } => {
              f.write_str($mnemonic)?;
              $(
                f.write_str(" ")?;
                define_opcodes!(@show f, $kind, $field);
              )*
            }
          )*
        }
        Ok(())
      }
    }
  };

  // ---------- types ----------
  (@ty Reg) => { u8 };
  (@ty Imm8) => { u8 };
  (@ty Addr) => { u16 };
  (@ty Str8) => { String };
  (@ty Str16) => { String };

  // ---------- encoding ----------
  (@encode $out:ident, Reg, $v:ident) => { $out.push(*$v) };
  (@encode $out:ident, Imm8, $v:ident) => { $out.push(*$v) };
  (@encode $out:ident, Addr, $v:ident) => { $out.extend_from_slice(&$v.to_be_bytes()) };
  (@encode $out:ident, Str8, $v:ident) => { encode_str($out, $v, Operand::Str8)? };
  (@encode $out:ident, Str16, $v:ident) => { encode_str($out, $v, Operand::Str16)? };

  // ---------- decoding ----------
  (@decode $src:ident, Reg) => { $src.fetch()? };
  (@decode $src:ident, Imm8) => { $src.fetch()? };
  (@decode $src:ident, Addr) => { $src.fetch_u16()? };
  (@decode $src:ident, Str8) => { $src.fetch_str(Operand::Str8)? };
  (@decode $src:ident, Str16) => { $src.fetch_str(Operand::Str16)? };

  // ---------- listing ----------
  (@show $f:ident, Reg, $v:ident) => { write!($f, "R{}", $v)? };
  (@show $f:ident, Imm8, $v:ident) => { write!($f, "{}", $v)? };
  (@show $f:ident, Addr, $v:ident) => { write!($f, "{:#06x}", $v)? };
  (@show $f:ident, Str8, $v:ident) => { write!($f, "{:?}", $v)? };
  (@show $f:ident, Str16, $v:ident) => { write!($f, "{:?}", $v)? };
}

for_each_opcode!(define_opcodes);

/// The shape of one operand in the encoded instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
  Reg,
  Imm8,
  Addr,
  Str8,
  Str16,
}

impl Operand {
  /// Longest string a length-prefixed operand can carry, `None` for the
  /// fixed-width kinds.
  pub const fn max_str_len(self) -> Option<usize> {
    match self {
      Self::Str8 => Some(u8::MAX as usize),
      Self::Str16 => Some(u16::MAX as usize),
      Self::Reg | Self::Imm8 | Self::Addr => None,
    }
  }
}

/// An error raised while turning an [`Instruction`] into bytes
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
  #[error("string of {len} characters exceeds the {max} character limit")]
  StringTooLong { len: usize, max: usize },

  #[error("character {0:?} cannot be encoded as a single byte")]
  Unencodable(char),
}

/// A byte source read with post-increment, the way the VM walks memory.
pub trait Fetch {
  fn fetch(&mut self) -> Result<u8, Fault>;

  fn fetch_u16(&mut self) -> Result<u16, Fault> {
    let hi = self.fetch()?;
    let lo = self.fetch()?;
    Ok(u16::from_be_bytes([hi, lo]))
  }

  fn fetch_str(&mut self, prefix: Operand) -> Result<String, Fault> {
    let len = match prefix {
      Operand::Str16 => self.fetch_u16()? as usize,
      _ => self.fetch()? as usize,
    };
    (0..len).map(|_| self.fetch().map(char::from)).collect()
  }
}

impl Instruction {
  /// Fetches an opcode byte and its operands.
  pub fn read<F>(source: &mut F) -> Result<Self, Fault>
  where
    F: Fetch + ?Sized,
  {
    let opcode = Opcode::try_from(source.fetch()?)?;
    Self::decode(opcode, source)
  }
}

/// Maps each character onto one byte, failing outside Latin-1.
pub fn latin1(text: &str) -> Result<Vec<u8>, EncodeError> {
  text
    .chars()
    .map(|c| u8::try_from(c).map_err(|_| EncodeError::Unencodable(c)))
    .collect()
}

fn encode_str(out: &mut Vec<u8>, text: &str, prefix: Operand) -> Result<(), EncodeError> {
  let bytes = latin1(text)?;
  let max = prefix.max_str_len().unwrap_or(0);
  if bytes.len() > max {
    return Err(EncodeError::StringTooLong {
      len: bytes.len(),
      max,
    });
  }
  match prefix {
    Operand::Str16 => out.extend_from_slice(&(bytes.len() as u16).to_be_bytes()),
    _ => out.push(bytes.len() as u8),
  }
  out.extend_from_slice(&bytes);
  Ok(())
}
