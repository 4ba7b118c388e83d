use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use tracing::warn;

/// Line-oriented terminal the VM prints to and reads from
pub trait Console {
  fn write(&mut self, text: &str);

  /// Reads one line without its terminator. Returns an empty string once
  /// input is exhausted, after which [`is_closed`](Console::is_closed) holds.
  fn read_line(&mut self) -> String;

  fn clear(&mut self);

  fn is_closed(&self) -> bool {
    false
  }

  fn write_line(&mut self, text: &str) {
    self.write(text);
    self.write("\n");
  }
}

/// The process's stdin and stdout
#[derive(Debug, Default)]
pub struct StdConsole {
  closed: bool,
}

impl Console for StdConsole {
  fn write(&mut self, text: &str) {
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
  }

  fn read_line(&mut self) -> String {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
      Ok(0) => self.closed = true,
      Ok(_) => {}
      Err(err) => {
        warn!(%err, "console read failed");
        self.closed = true;
      }
    }
    trim_newline(&mut line);
    line
  }

  fn clear(&mut self) {
    self.write("\x1b[2J\x1b[1;1H");
  }

  fn is_closed(&self) -> bool {
    self.closed
  }
}

fn trim_newline(line: &mut String) {
  while line.ends_with(|c: char| c == '\n' || c == '\r') {
    line.pop();
  }
}

/// Scripted input and captured output, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryConsole {
  input: VecDeque<String>,
  output: String,
  clears: usize,
  closed: bool,
}

impl MemoryConsole {
  pub fn new<I, S>(lines: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      input: lines.into_iter().map(Into::into).collect(),
      ..Self::default()
    }
  }

  pub fn output(&self) -> &str {
    &self.output
  }

  /// How many times the screen was cleared
  pub fn clears(&self) -> usize {
    self.clears
  }
}

impl Console for MemoryConsole {
  fn write(&mut self, text: &str) {
    self.output.push_str(text);
  }

  fn read_line(&mut self) -> String {
    match self.input.pop_front() {
      Some(line) => line,
      None => {
        self.closed = true;
        String::new()
      }
    }
  }

  fn clear(&mut self) {
    self.clears += 1;
  }

  fn is_closed(&self) -> bool {
    self.closed
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn memory_console_replays_input() {
    let mut console = MemoryConsole::new(["one", "two"]);
    assert_eq!(console.read_line(), "one");
    assert_eq!(console.read_line(), "two");
    assert!(!console.is_closed());
    assert_eq!(console.read_line(), "");
    assert!(console.is_closed());
  }

  #[test]
  fn memory_console_captures_output() {
    let mut console = MemoryConsole::default();
    console.write("a");
    console.write_line("b");
    console.clear();
    assert_eq!(console.output(), "ab\n");
    assert_eq!(console.clears(), 1);
  }

  #[test]
  fn trims_crlf() {
    let mut line = String::from("cat notes.txt\r\n");
    trim_newline(&mut line);
    assert_eq!(line, "cat notes.txt");
  }
}
