//! TinyScript assembler.
//!
//! Translates line-oriented source into a [`Chunk`] in one forward pass,
//! recording a fixup for every label reference and patching them once the
//! whole program has been seen. Every instruction is emitted through
//! [`Instruction::encode`], so operand widths always agree with the VM.
//!
//! # Syntax
//!
//! ```text
//! // greet the user
//! PRINT "name? "
//! INPUT_STRING
//! CMD "exit" done
//! GOTO start
//! done:
//! EXIT
//! ```
//!
//! - One statement or label definition per line; blank lines are ignored
//! - `//` starts a comment, except inside a string literal
//! - Mnemonics and register names are case-insensitive, labels are not
//! - Registers are `R0` to `R3`; immediates are decimal `0` to `255`
//! - String literals are double-quoted and hold Latin-1 text

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::opcode::{EncodeError, Instruction};
use crate::region::Chunk;
use crate::vm::{MEMORY_SIZE, REGISTER_COUNT};

const COMMENT: &str = "//";
const LABEL_SUFFIX: char = ':';
const QUOTE: char = '"';

/// Scratch register clobbered by `PRINT` and `PRINT_LINE`.
pub const PRINT_REGISTER: u8 = 3;

/// An error raised while assembling; `line` is 1-based
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
  #[error("line {line}: unknown instruction `{name}`")]
  UnknownMnemonic { line: usize, name: String },

  #[error("line {line}: `{mnemonic}` takes {expected} operand(s), found {actual}")]
  ArityMismatch {
    line: usize,
    mnemonic: &'static str,
    expected: usize,
    actual: usize,
  },

  #[error("line {line}: `{token}` is not a register (R0-R3)")]
  InvalidRegister { line: usize, token: String },

  #[error("line {line}: `{token}` is not a byte value (0-255)")]
  InvalidImmediate { line: usize, token: String },

  #[error("line {line}: unterminated string literal")]
  UnterminatedString { line: usize },

  #[error("line {line}: `{name}` is not a valid label")]
  InvalidLabel { line: usize, name: String },

  #[error("line {line}: label `{name}` is already defined")]
  DuplicateLabel { line: usize, name: String },

  #[error("line {line}: undefined label `{name}`")]
  UndefinedLabel { line: usize, name: String },

  #[error("line {line}: {source}")]
  Encode {
    line: usize,
    #[source]
    source: EncodeError,
  },

  #[error("program of {len} bytes does not fit in {max} bytes of memory")]
  ProgramTooLarge { len: usize, max: usize },

  #[error("cannot read `{path}`: {message}")]
  Io { path: String, message: String },
}

macro_rules! define_keywords {
  ( $( $name:ident = $text:literal ),* $(,)? ) => {
    /// A TinyScript mnemonic
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Keyword {
      $( $name, )*
    }

    impl Keyword {
      const ALL: &'static [Keyword] = &[ $( Keyword::$name ),* ];

      const fn text(self) -> &'static str {
        match self {
          $( Self::$name => $text, )*
        }
      }

      fn lookup(word: &str) -> Option<Self> {
        Self::ALL
          .iter()
          .copied()
          .find(|keyword| keyword.text().eq_ignore_ascii_case(word))
      }
    }
  };
}

define_keywords! {
  Print = "PRINT",
  PrintLine = "PRINT_LINE",
  Set = "SET",
  Goto = "GOTO",
  GotoIf = "GOTO_IF",
  GotoZero = "GOTO_ZERO",
  Cmd = "CMD",
  Exit = "EXIT",
  InputString = "INPUT_STRING",
  View = "VIEW",
  Create = "CREATE",
  Void = "VOID",
  Reveal = "REVEAL",
  Exec = "EXEC",
  Identity = "IDENTITY",
  PrintBuf = "PRINT_BUF",
  InputNum = "INPUT_NUM",
  WriteNote = "WRITE_NOTE",
  Add = "ADD",
  Sub = "SUB",
  Mul = "MUL",
  Div = "DIV",
  String = "STRING",
  Write = "WRITE",
  RamWrite = "RAM_WRITE",
  Scramble = "SCRAMBLE",
  Cls = "CLS",
  PrintReg = "PRINT_REG",
  Ping = "PING",
  Download = "DOWNLOAD",
  Copy = "COPY",
  SaveAs = "SAVE_AS",
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
  Word(&'a str),
  /// A string literal, without its quotes
  Quoted(&'a str),
}

impl<'a> Token<'a> {
  fn text(self) -> &'a str {
    match self {
      Token::Word(text) | Token::Quoted(text) => text,
    }
  }
}

/// Splits a line on whitespace, keeping each quoted run as one token and
/// dropping everything from a `//` outside quotes.
fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token<'_>>, CompileError> {
  let mut tokens = Vec::new();
  let mut chars = line.char_indices().peekable();

  while let Some(&(start, c)) = chars.peek() {
    if c.is_whitespace() {
      chars.next();
    } else if c == QUOTE {
      chars.next();
      let end = loop {
        match chars.next() {
          Some((at, QUOTE)) => break at,
          Some(_) => {}
          None => return Err(CompileError::UnterminatedString { line: line_no }),
        }
      };
      tokens.push(Token::Quoted(&line[start + 1..end]));
    } else if line[start..].starts_with(COMMENT) {
      break;
    } else {
      let mut end = line.len();
      while let Some(&(at, c)) = chars.peek() {
        if c.is_whitespace() || c == QUOTE || line[at..].starts_with(COMMENT) {
          end = at;
          break;
        }
        chars.next();
      }
      tokens.push(Token::Word(&line[start..end]));
    }
  }

  Ok(tokens)
}

/// Parse a register token like `R0` or `r3`
fn parse_reg(line: usize, token: Token<'_>) -> Result<u8, CompileError> {
  let invalid = || CompileError::InvalidRegister {
    line,
    token: token.text().to_string(),
  };
  let Token::Word(word) = token else {
    return Err(invalid());
  };
  let digits = word
    .strip_prefix('R')
    .or_else(|| word.strip_prefix('r'))
    .ok_or_else(invalid)?;
  match digits.as_bytes() {
    [digit @ b'0'..=b'9'] if ((digit - b'0') as usize) < REGISTER_COUNT => Ok(digit - b'0'),
    _ => Err(invalid()),
  }
}

fn parse_u8(line: usize, token: Token<'_>) -> Result<u8, CompileError> {
  let value = match token {
    Token::Word(word) => word.parse().ok(),
    Token::Quoted(_) => None,
  };
  value.ok_or_else(|| CompileError::InvalidImmediate {
    line,
    token: token.text().to_string(),
  })
}

fn parse_label(line: usize, token: Token<'_>) -> Result<&str, CompileError> {
  match token {
    Token::Word(name) if is_label_name(name) => Ok(name),
    _ => Err(CompileError::InvalidLabel {
      line,
      name: token.text().to_string(),
    }),
  }
}

fn is_label_name(name: &str) -> bool {
  !name.is_empty() && !name.contains(LABEL_SUFFIX)
}

/// Extracts the name from a label definition line such as `loop:`.
fn label_definition<'a>(tokens: &[Token<'a>]) -> Option<&'a str> {
  match tokens {
    [Token::Word(word)] => word.strip_suffix(LABEL_SUFFIX),
    _ => None,
  }
}

/// A jump operand waiting for its label
#[derive(Debug)]
struct Fixup {
  /// Offset of the 2-byte big-endian placeholder
  at: usize,
  label: String,
  line: usize,
}

#[derive(Debug, Default)]
struct Assembler {
  bytes: Vec<u8>,
  labels: HashMap<String, usize>,
  fixups: Vec<Fixup>,
}

impl Assembler {
  fn line(&mut self, line_no: usize, text: &str) -> Result<(), CompileError> {
    let tokens = tokenize(line_no, text)?;
    if tokens.is_empty() {
      return Ok(());
    }
    if let Some(name) = label_definition(&tokens) {
      return self.define_label(line_no, name);
    }
    self.statement(line_no, &tokens)
  }

  fn define_label(&mut self, line: usize, name: &str) -> Result<(), CompileError> {
    if !is_label_name(name) {
      return Err(CompileError::InvalidLabel {
        line,
        name: name.to_string(),
      });
    }
    if self.labels.contains_key(name) {
      return Err(CompileError::DuplicateLabel {
        line,
        name: name.to_string(),
      });
    }
    self.labels.insert(name.to_string(), self.bytes.len());
    Ok(())
  }

  fn statement(&mut self, line: usize, tokens: &[Token<'_>]) -> Result<(), CompileError> {
    let unknown = || CompileError::UnknownMnemonic {
      line,
      name: tokens[0].text().to_string(),
    };
    let keyword = match tokens[0] {
      Token::Word(word) => Keyword::lookup(word).ok_or_else(unknown)?,
      Token::Quoted(_) => return Err(unknown()),
    };
    let args = &tokens[1..];
    let arity = |expected: usize| {
      if args.len() == expected {
        Ok(())
      } else {
        Err(CompileError::ArityMismatch {
          line,
          mnemonic: keyword.text(),
          expected,
          actual: args.len(),
        })
      }
    };

    let simple = match keyword {
      Keyword::Exit => Some(Instruction::Halt {}),
      Keyword::InputString => Some(Instruction::InputStr {}),
      Keyword::View => Some(Instruction::FileList {}),
      Keyword::Create => Some(Instruction::FileCreate {}),
      Keyword::Void => Some(Instruction::FileDelete {}),
      Keyword::Reveal => Some(Instruction::FileRead {}),
      Keyword::Exec => Some(Instruction::FileExec {}),
      Keyword::Identity => Some(Instruction::SysInfo {}),
      Keyword::PrintBuf => Some(Instruction::PrintStr {}),
      Keyword::WriteNote => Some(Instruction::MakeNote {}),
      Keyword::Scramble => Some(Instruction::ScrambleFile {}),
      Keyword::Cls => Some(Instruction::ClearScr {}),
      Keyword::Ping => Some(Instruction::NetPing {}),
      Keyword::Download => Some(Instruction::NetGet {}),
      Keyword::Copy => Some(Instruction::BufCopy {}),
      Keyword::SaveAs => Some(Instruction::FileSaveAs {}),
      _ => None,
    };
    if let Some(instruction) = simple {
      arity(0)?;
      return self.emit(line, &instruction);
    }

    match keyword {
      Keyword::Print => {
        arity(1)?;
        for c in args[0].text().chars() {
          let value = u8::try_from(c).map_err(|_| CompileError::Encode {
            line,
            source: EncodeError::Unencodable(c),
          })?;
          self.print_byte(line, value)?;
        }
        Ok(())
      }
      Keyword::PrintLine => {
        arity(0)?;
        self.print_byte(line, b'\n')
      }
      Keyword::Set => {
        arity(2)?;
        let rd = parse_reg(line, args[0])?;
        let value = parse_u8(line, args[1])?;
        self.emit(line, &Instruction::Load { rd, value })
      }
      Keyword::Goto | Keyword::GotoIf | Keyword::GotoZero => {
        arity(1)?;
        let label = parse_label(line, args[0])?;
        let jump = match keyword {
          Keyword::GotoIf => Instruction::Jif { target: 0 },
          Keyword::GotoZero => Instruction::Jz { target: 0 },
          _ => Instruction::Jmp { target: 0 },
        };
        self.emit_jump(line, &jump, label)
      }
      Keyword::Cmd => {
        arity(2)?;
        let label = parse_label(line, args[1])?;
        let check = Instruction::CmdCheck {
          name: args[0].text().to_string(),
          target: 0,
        };
        self.emit_jump(line, &check, label)
      }
      Keyword::InputNum | Keyword::PrintReg => {
        arity(1)?;
        let reg = parse_reg(line, args[0])?;
        let instruction = match keyword {
          Keyword::InputNum => Instruction::InputInt { rd: reg },
          _ => Instruction::PrintVal { rs: reg },
        };
        self.emit(line, &instruction)
      }
      Keyword::Add | Keyword::Sub | Keyword::Mul | Keyword::Div | Keyword::RamWrite => {
        arity(2)?;
        let a = parse_reg(line, args[0])?;
        let b = parse_reg(line, args[1])?;
        let instruction = match keyword {
          Keyword::Add => Instruction::Add { rd: a, rs: b },
          Keyword::Sub => Instruction::Sub { rd: a, rs: b },
          Keyword::Mul => Instruction::Mul { rd: a, rs: b },
          Keyword::Div => Instruction::Div { rd: a, rs: b },
          _ => Instruction::Store { addr: a, value: b },
        };
        self.emit(line, &instruction)
      }
      Keyword::String => {
        arity(1)?;
        let text = args[0].text().to_string();
        self.emit(line, &Instruction::SetBuf { text })
      }
      Keyword::Write => {
        arity(1)?;
        let name = args[0].text().to_string();
        self.emit(line, &Instruction::FileWrite { name })
      }
      _ => Err(unknown()),
    }
  }

  // LOAD R3 c; PRINT_CHAR R3
  fn print_byte(&mut self, line: usize, value: u8) -> Result<(), CompileError> {
    self.emit(
      line,
      &Instruction::Load {
        rd: PRINT_REGISTER,
        value,
      },
    )?;
    self.emit(line, &Instruction::PrintChar { rs: PRINT_REGISTER })
  }

  fn emit(&mut self, line: usize, instruction: &Instruction) -> Result<(), CompileError> {
    instruction
      .encode(&mut self.bytes)
      .map_err(|source| CompileError::Encode { line, source })
  }

  /// Emits an instruction whose last operand is a placeholder address and
  /// records where to patch it.
  fn emit_jump(
    &mut self,
    line: usize,
    instruction: &Instruction,
    label: &str,
  ) -> Result<(), CompileError> {
    self.emit(line, instruction)?;
    self.fixups.push(Fixup {
      at: self.bytes.len() - 2,
      label: label.to_string(),
      line,
    });
    Ok(())
  }

  fn finish(mut self) -> Result<Chunk, CompileError> {
    let too_large = |len: usize| CompileError::ProgramTooLarge {
      len,
      max: MEMORY_SIZE,
    };
    let len = self.bytes.len();
    if len > MEMORY_SIZE {
      return Err(too_large(len));
    }
    for fixup in &self.fixups {
      let offset = *self
        .labels
        .get(&fixup.label)
        .ok_or_else(|| CompileError::UndefinedLabel {
          line: fixup.line,
          name: fixup.label.clone(),
        })?;
      let target = u16::try_from(offset).map_err(|_| too_large(len))?;
      self.bytes[fixup.at..fixup.at + 2].copy_from_slice(&target.to_be_bytes());
    }
    debug!(
      len,
      labels = self.labels.len(),
      fixups = self.fixups.len(),
      "assembled program"
    );
    Ok(self.bytes.into())
  }
}

/// Assembles TinyScript source into a bytecode image.
pub fn assemble(source: &str) -> Result<Chunk, CompileError> {
  let mut assembler = Assembler::default();
  for (index, text) in source.lines().enumerate() {
    assembler.line(index + 1, text)?;
  }
  assembler.finish()
}

pub fn assemble_file(path: &Path) -> Result<Chunk, CompileError> {
  let source = fs::read_to_string(path).map_err(|err| CompileError::Io {
    path: path.display().to_string(),
    message: err.to_string(),
  })?;
  assemble(&source)
}

/// Like [`assemble`], but a failure yields an empty program, which halts as
/// soon as it runs.
pub fn compile(source: &str) -> Chunk {
  assemble(source).unwrap_or_else(|err| {
    warn!(%err, "compilation failed");
    Chunk::default()
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::opcode::Opcode;

  fn bytes(source: &str) -> Vec<u8> {
    use crate::region::Region;
    assemble(source).unwrap().instructions().to_vec()
  }

  mod tokenize {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
      assert_eq!(
        tokenize(1, "  ADD\tR0   R1 ").unwrap(),
        vec![Token::Word("ADD"), Token::Word("R0"), Token::Word("R1")]
      );
    }

    #[test]
    fn keeps_quoted_runs_together() {
      assert_eq!(
        tokenize(1, r#"CMD "list all" show"#).unwrap(),
        vec![
          Token::Word("CMD"),
          Token::Quoted("list all"),
          Token::Word("show"),
        ]
      );
    }

    #[test]
    fn strips_comments() {
      assert_eq!(tokenize(1, "EXIT // done").unwrap(), vec![Token::Word("EXIT")]);
      assert_eq!(tokenize(1, "EXIT// done").unwrap(), vec![Token::Word("EXIT")]);
      assert!(tokenize(1, "// nothing here").unwrap().is_empty());
    }

    #[test]
    fn comment_marker_inside_quotes_is_text() {
      assert_eq!(
        tokenize(1, r#"STRING "http://example.com" // fetch"#).unwrap(),
        vec![Token::Word("STRING"), Token::Quoted("http://example.com")]
      );
    }

    #[test]
    fn empty_literal() {
      assert_eq!(
        tokenize(1, r#"PRINT """#).unwrap(),
        vec![Token::Word("PRINT"), Token::Quoted("")]
      );
    }

    #[test]
    fn unterminated_literal() {
      assert_eq!(
        tokenize(7, r#"PRINT "oops"#),
        Err(CompileError::UnterminatedString { line: 7 })
      );
    }
  }

  mod statements {
    use super::*;

    #[test]
    fn arithmetic_program() {
      let source = "SET R0 5\nSET R1 3\nADD R0 R1\nPRINT_REG R0\nEXIT";
      #[rustfmt::skip]
      let expected = vec![
        0x01, 0x00, 0x05,
        0x01, 0x01, 0x03,
        0x02, 0x00, 0x01,
        0x10, 0x00,
        0x00,
      ];
      assert_eq!(bytes(source), expected);
    }

    #[test]
    fn mnemonics_and_registers_ignore_case() {
      assert_eq!(bytes("set r2 7\nsub R2 r1"), vec![0x01, 0x02, 0x07, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn every_arithmetic_opcode() {
      assert_eq!(
        bytes("ADD R0 R1\nSUB R0 R1\nMUL R0 R1\nDIV R0 R1\nRAM_WRITE R2 R3"),
        vec![2, 0, 1, 3, 0, 1, 8, 0, 1, 9, 0, 1, 4, 2, 3]
      );
    }

    #[test]
    fn zero_operand_mnemonics() {
      let source = "EXIT\nINPUT_STRING\nVIEW\nCREATE\nVOID\nREVEAL\nEXEC\nIDENTITY\n\
                    PRINT_BUF\nWRITE_NOTE\nSCRAMBLE\nCLS\nPING\nDOWNLOAD\nCOPY\nSAVE_AS";
      let expected: Vec<u8> = [
        Opcode::Halt,
        Opcode::InputStr,
        Opcode::FileList,
        Opcode::FileCreate,
        Opcode::FileDelete,
        Opcode::FileRead,
        Opcode::FileExec,
        Opcode::SysInfo,
        Opcode::PrintStr,
        Opcode::MakeNote,
        Opcode::ScrambleFile,
        Opcode::ClearScr,
        Opcode::NetPing,
        Opcode::NetGet,
        Opcode::BufCopy,
        Opcode::FileSaveAs,
      ]
      .iter()
      .map(|&op| op as u8)
      .collect();
      assert_eq!(bytes(source), expected);
    }

    #[test]
    fn print_expands_per_character() {
      #[rustfmt::skip]
      let expected = vec![
        0x01, 0x03, b'h', 0x11, 0x03,
        0x01, 0x03, b'i', 0x11, 0x03,
      ];
      assert_eq!(bytes(r#"PRINT "hi""#), expected);
    }

    #[test]
    fn print_line_loads_newline() {
      assert_eq!(bytes("PRINT_LINE"), vec![0x01, 0x03, 0x0A, 0x11, 0x03]);
    }

    #[test]
    fn string_uses_two_byte_prefix() {
      assert_eq!(
        bytes(r#"STRING "a b""#),
        vec![0x1D, 0x00, 0x03, b'a', b' ', b'b']
      );
    }

    #[test]
    fn write_uses_one_byte_prefix() {
      assert_eq!(
        bytes(r#"WRITE "n.txt""#),
        vec![0x2F, 0x05, b'n', b'.', b't', b'x', b't']
      );
    }

    #[test]
    fn unquoted_literal_is_accepted() {
      assert_eq!(bytes("STRING hello"), bytes(r#"STRING "hello""#));
    }

    #[test]
    fn input_num_and_print_reg() {
      assert_eq!(bytes("INPUT_NUM R1\nPRINT_REG R1"), vec![0x19, 0x01, 0x10, 0x01]);
    }

    #[test]
    fn latin1_literal() {
      assert_eq!(bytes(r#"STRING "é""#), vec![0x1D, 0x00, 0x01, 0xE9]);
    }
  }

  mod labels {
    use super::*;

    #[test]
    fn backward_reference() {
      assert_eq!(bytes("start:\nPRINT_LINE\nGOTO start"), {
        let mut expected = vec![0x01, 0x03, 0x0A, 0x11, 0x03];
        expected.extend([0x05, 0x00, 0x00]);
        expected
      });
    }

    #[test]
    fn forward_reference() {
      assert_eq!(bytes("GOTO end\nPRINT_LINE\nend:\nEXIT"), {
        let mut expected = vec![0x05, 0x00, 0x08];
        expected.extend([0x01, 0x03, 0x0A, 0x11, 0x03]);
        expected.push(0x00);
        expected
      });
    }

    #[test]
    fn resolution_ignores_definition_order() {
      // the same label referenced before and after its definition
      let listing = assemble("GOTO mid\nmid:\nGOTO mid")
        .unwrap()
        .disassemble()
        .unwrap();
      assert_eq!(listing[0].1, Instruction::Jmp { target: 3 });
      assert_eq!(listing[1].1, Instruction::Jmp { target: 3 });
    }

    #[test]
    fn conditional_gotos() {
      assert_eq!(
        bytes("top:\nGOTO_IF top\nGOTO_ZERO top"),
        vec![0x06, 0x00, 0x00, 0x07, 0x00, 0x00]
      );
    }

    #[test]
    fn cmd_check_target() {
      let listing = assemble("CMD \"cat\" show\nEXIT\nshow:\nPRINT_BUF")
        .unwrap()
        .disassemble()
        .unwrap();
      assert_eq!(
        listing[0].1,
        Instruction::CmdCheck {
          name: "cat".into(),
          target: 8,
        }
      );
      assert_eq!(listing[2], (8, Instruction::PrintStr {}));
    }

    #[test]
    fn labels_are_case_sensitive() {
      assert_eq!(
        assemble("Loop:\nGOTO loop"),
        Err(CompileError::UndefinedLabel {
          line: 2,
          name: "loop".into(),
        })
      );
    }

    #[test]
    fn label_with_comment() {
      assert_eq!(bytes("here: // loop head\nGOTO here"), vec![0x05, 0x00, 0x00]);
    }

    #[test]
    fn quoted_colon_is_not_a_label() {
      assert!(matches!(
        assemble("\"done:\""),
        Err(CompileError::UnknownMnemonic { line: 1, .. })
      ));
    }

    #[test]
    fn duplicate_label() {
      assert_eq!(
        assemble("a:\nEXIT\na:"),
        Err(CompileError::DuplicateLabel {
          line: 3,
          name: "a".into(),
        })
      );
    }

    #[test]
    fn empty_label() {
      assert_eq!(
        assemble(":"),
        Err(CompileError::InvalidLabel {
          line: 1,
          name: String::new(),
        })
      );
    }

    #[test]
    fn undefined_label() {
      assert_eq!(
        assemble("EXIT\nGOTO nowhere"),
        Err(CompileError::UndefinedLabel {
          line: 2,
          name: "nowhere".into(),
        })
      );
    }
  }

  mod errors {
    use super::*;

    #[test]
    fn unknown_mnemonic() {
      assert_eq!(
        assemble("EXIT\nJUMP start"),
        Err(CompileError::UnknownMnemonic {
          line: 2,
          name: "JUMP".into(),
        })
      );
    }

    #[test]
    fn missing_operand() {
      assert_eq!(
        assemble("SET R0"),
        Err(CompileError::ArityMismatch {
          line: 1,
          mnemonic: "SET",
          expected: 2,
          actual: 1,
        })
      );
    }

    #[test]
    fn extra_operand() {
      assert!(matches!(
        assemble("EXIT now"),
        Err(CompileError::ArityMismatch {
          expected: 0,
          actual: 1,
          ..
        })
      ));
    }

    #[test]
    fn bad_registers() {
      for token in ["R4", "R", "X1", "R01", "\"R1\"", "-1"] {
        let source = format!("PRINT_REG {token}");
        assert!(
          matches!(assemble(&source), Err(CompileError::InvalidRegister { .. })),
          "{token} should be refused"
        );
      }
    }

    #[test]
    fn bad_immediates() {
      for token in ["256", "-1", "x", "\"5\""] {
        let source = format!("SET R0 {token}");
        assert!(
          matches!(assemble(&source), Err(CompileError::InvalidImmediate { .. })),
          "{token} should be refused"
        );
      }
    }

    #[test]
    fn non_latin1_text() {
      assert_eq!(
        assemble("PRINT \"→\""),
        Err(CompileError::Encode {
          line: 1,
          source: EncodeError::Unencodable('→'),
        })
      );
    }

    #[test]
    fn file_name_too_long() {
      let source = format!("WRITE \"{}\"", "x".repeat(256));
      assert!(matches!(
        assemble(&source),
        Err(CompileError::Encode {
          source: EncodeError::StringTooLong { len: 256, max: 255 },
          ..
        })
      ));
    }

    #[test]
    fn program_too_large() {
      let source = "CLS\n".repeat(MEMORY_SIZE + 1);
      assert_eq!(
        assemble(&source),
        Err(CompileError::ProgramTooLarge {
          len: MEMORY_SIZE + 1,
          max: MEMORY_SIZE,
        })
      );
    }

    #[test]
    fn compile_yields_empty_program_on_error() {
      assert!(compile("SET R9 1").is_empty());
      assert!(!compile("EXIT").is_empty());
    }
  }

  mod files {
    use super::*;

    use crate::test_utils::TempDir;

    #[test]
    fn assemble_file_reads_source() {
      let dir = TempDir::new("asm");
      dir.write("boot.tiny", "// boot\r\nEXIT\r\n");
      assert_eq!(assemble_file(&dir.join("boot.tiny")).unwrap().len(), 1);
    }

    #[test]
    fn assemble_missing_file() {
      let dir = TempDir::new("asm");
      assert!(matches!(
        assemble_file(&dir.join("gone.tiny")),
        Err(CompileError::Io { .. })
      ));
    }
  }

  mod programs {
    use super::*;

    use crate::console::MemoryConsole;
    use crate::disk::Disk;
    use crate::sandbox::Sandbox;
    use crate::test_utils::{FakeNetwork, TempDir};
    use crate::vm::{Exit, Vm};

    fn run(source: &str, input: &[&str]) -> (Vm, MemoryConsole, TempDir) {
      let dir = TempDir::new("asm_run");
      let mut vm = Vm::new(Disk::new(Sandbox::new(dir.path())));
      let mut console = MemoryConsole::new(input.iter().copied());
      vm.run(&assemble(source).unwrap(), &mut console, &mut FakeNetwork::default());
      (vm, console, dir)
    }

    #[test]
    fn adds_and_prints() {
      let (vm, console, _dir) = run("SET R0 5\nSET R1 3\nADD R0 R1\nPRINT_REG R0\nEXIT", &[]);
      assert_eq!(console.output(), "8");
      assert_eq!(vm.exit(), Some(&Exit::Halted));
      assert!(!vm.should_load_new_program());
    }

    #[test]
    fn requests_next_program() {
      let (vm, _, _dir) = run("STRING \"hello.tiny\"\nEXEC", &[]);
      assert!(vm.should_load_new_program());
      assert_eq!(vm.buffer(), "hello.tiny");
    }

    #[test]
    fn command_dispatch() {
      let source = r#"
        start:
        PRINT "> "
        INPUT_STRING
        CMD "echo" echo
        CMD "quit" quit
        PRINT "?"
        PRINT_LINE
        GOTO start
        echo:
        PRINT_BUF
        GOTO start
        quit:
        EXIT
      "#;
      let (_, console, _dir) = run(source, &["echo hi there", "what", "QUIT"]);
      assert_eq!(console.output(), "> hi there\n> ?\n> ");
    }

    #[test]
    fn note_round_trip() {
      let source = r#"
        STRING "remember"
        WRITE "memo.txt"
        STRING "memo.txt"
        REVEAL
        PRINT_BUF
        EXIT
      "#;
      let (_, console, dir) = run(source, &[]);
      assert_eq!(dir.read("memo.txt"), "remember");
      assert_eq!(console.output(), "remember\n");
    }
  }
}
