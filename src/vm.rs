use tracing::{debug, error, trace, warn};

use crate::console::Console;
use crate::disk::{Disk, DiskError};
use crate::net::{self, Network, DEFAULT_DOWNLOAD_CAP, DOWNLOAD_ERROR, PING_FAIL};
use crate::opcode::{Fetch, Instruction};
use crate::region::Region;

/// The type of a single register in our virtual machine
pub type Register = i32;

/// Bytes of addressable memory; every 16-bit address is valid.
pub const MEMORY_SIZE: usize = 0x10000;
pub const REGISTER_COUNT: usize = 4;

/// What `SYS_INFO` leaves in the string buffer.
pub const SYSTEM_INFO: &str = "Host: TinyVM | OS: MOS v2.3 | SecureExt: YES";

const LISTING_HEADER: &str = "--- VDISK ---";
const LISTING_FOOTER: &str = "-------------";

/// A fatal error that stops the running program
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
  #[error("Illegal OpCode {0}")]
  IllegalOpcode(u8),

  #[error("register index {0} is out of range")]
  InvalidRegister(u8),

  #[error("memory address {0} is out of range")]
  MemoryOutOfBounds(Register),

  #[error("did not expect to reach the end of memory")]
  UnexpectedEnd,

  #[error("program of {0} bytes does not fit in memory")]
  ProgramTooLarge(usize),

  #[error("console input closed")]
  InputClosed,

  #[error("machine is halted")]
  MachineHalted,
}

/// Why a program stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
  /// `HALT` was executed.
  Halted,
  /// `FILE_EXEC` asked the host to load the named program.
  Exec(String),
  Faulted(Fault),
}

/// What a single step asks of the loop driving it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Halt,
  Exec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
  Active,
  Halted(Exit),
}

/// A register machine with byte-addressed memory, a string buffer and a
/// clipboard.
///
/// Programs are loaded at address 0 and run until they halt, fault, or ask
/// for another program with `FILE_EXEC`. Everything a program can touch
/// outside the machine goes through the [`Disk`] it owns, and the console and
/// network handed to [`step`](Vm::step) or [`run`](Vm::run).
#[derive(Debug)]
pub struct Vm {
  ip: usize,
  memory: Vec<u8>,
  registers: [Register; REGISTER_COUNT],
  buffer: String,
  clipboard: String,
  state: State,
  disk: Disk,
  download_cap: usize,
}

impl Vm {
  /// Create a new, empty virtual machine over `disk`
  pub fn new(disk: Disk) -> Self {
    Self {
      ip: 0,
      memory: vec![0; MEMORY_SIZE],
      registers: [0; REGISTER_COUNT],
      buffer: String::new(),
      clipboard: String::new(),
      state: State::Active,
      disk,
      download_cap: DEFAULT_DOWNLOAD_CAP,
    }
  }

  /// Characters of an HTTP body `NET_GET` keeps.
  pub fn with_download_cap(mut self, cap: usize) -> Self {
    self.download_cap = cap;
    self
  }

  /// Resets all machine state and copies `region` in at address 0.
  pub fn load<R>(&mut self, region: &R) -> Result<(), Fault>
  where
    R: Region + ?Sized,
  {
    let image = region.instructions();
    self.memory.fill(0);
    self.registers = [0; REGISTER_COUNT];
    self.buffer.clear();
    self.clipboard.clear();
    self.ip = 0;
    if image.len() > MEMORY_SIZE {
      let fault = Fault::ProgramTooLarge(image.len());
      self.state = State::Halted(Exit::Faulted(fault.clone()));
      return Err(fault);
    }
    self.memory[..image.len()].copy_from_slice(image);
    self.state = State::Active;
    debug!(len = image.len(), "program loaded");
    Ok(())
  }

  /// Executes a single instruction.
  ///
  /// A fault halts the machine as well as being returned.
  pub fn step<C, N>(&mut self, console: &mut C, network: &mut N) -> Result<Flow, Fault>
  where
    C: Console + ?Sized,
    N: Network + ?Sized,
  {
    if self.state != State::Active {
      return Err(Fault::MachineHalted);
    }
    let result = Task::new(self, console, network).run();
    match &result {
      Ok(Flow::Continue) => {}
      Ok(Flow::Halt) => self.state = State::Halted(Exit::Halted),
      Ok(Flow::Exec) => {
        let name = self.buffer.trim().to_string();
        debug!(%name, "program requested");
        self.state = State::Halted(Exit::Exec(name));
      }
      Err(fault) => self.state = State::Halted(Exit::Faulted(fault.clone())),
    }
    result
  }

  /// Loads `region` and steps until the machine stops. Faults are reported
  /// on the console.
  pub fn run<R, C, N>(&mut self, region: &R, console: &mut C, network: &mut N) -> Exit
  where
    R: Region + ?Sized,
    C: Console + ?Sized,
    N: Network + ?Sized,
  {
    let outcome = self
      .load(region)
      .and_then(|()| loop {
        match self.step(console, network)? {
          Flow::Continue => continue,
          flow => break Ok(flow),
        }
      });
    if let Err(fault) = outcome {
      error!(%fault, ip = self.ip, "cpu fault");
      console.write_line(&format!("[CPU ERROR]: {fault}"));
    }
    match &self.state {
      State::Halted(exit) => exit.clone(),
      State::Active => Exit::Halted,
    }
  }

  pub fn ip(&self) -> usize {
    self.ip
  }

  pub fn registers(&self) -> &[Register; REGISTER_COUNT] {
    &self.registers
  }

  pub fn memory(&self) -> &[u8] {
    &self.memory
  }

  pub fn buffer(&self) -> &str {
    &self.buffer
  }

  pub fn clipboard(&self) -> &str {
    &self.clipboard
  }

  pub fn disk(&self) -> &Disk {
    &self.disk
  }

  /// How the last program stopped, `None` while one is still running.
  pub fn exit(&self) -> Option<&Exit> {
    match &self.state {
      State::Halted(exit) => Some(exit),
      State::Active => None,
    }
  }

  pub fn should_load_new_program(&self) -> bool {
    matches!(self.state, State::Halted(Exit::Exec(_)))
  }

  /// The trimmed program name passed to `FILE_EXEC`.
  pub fn requested_program(&self) -> Option<&str> {
    match &self.state {
      State::Halted(Exit::Exec(name)) => Some(name),
      _ => None,
    }
  }

  fn register(&self, index: u8) -> Result<Register, Fault> {
    self
      .registers
      .get(index as usize)
      .copied()
      .ok_or(Fault::InvalidRegister(index))
  }

  fn register_mut(&mut self, index: u8) -> Result<&mut Register, Fault> {
    self
      .registers
      .get_mut(index as usize)
      .ok_or(Fault::InvalidRegister(index))
  }
}

struct Task<'vm, 'io, C: ?Sized, N: ?Sized> {
  vm: &'vm mut Vm,
  console: &'io mut C,
  network: &'io mut N,
}

impl<C, N> Fetch for Task<'_, '_, C, N>
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  #[inline]
  fn fetch(&mut self) -> Result<u8, Fault> {
    let byte = *self.vm.memory.get(self.vm.ip).ok_or(Fault::UnexpectedEnd)?;
    self.vm.ip += 1;
    Ok(byte)
  }
}

impl<'vm, 'io, C, N> Task<'vm, 'io, C, N>
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  fn new(vm: &'vm mut Vm, console: &'io mut C, network: &'io mut N) -> Self {
    Self {
      vm,
      console,
      network,
    }
  }

  fn run(&mut self) -> Result<Flow, Fault> {
    let pc = self.vm.ip;
    let instruction = Instruction::read(self)?;
    trace!(pc, %instruction, "execute");
    match instruction {
      Instruction::Halt {} => return Ok(Flow::Halt),
      Instruction::Load { rd, value } => *self.vm.register_mut(rd)? = Register::from(value),
      Instruction::Add { rd, rs } => arithmetic(self.vm, rd, rs, Register::wrapping_add)?,
      Instruction::Sub { rd, rs } => arithmetic(self.vm, rd, rs, Register::wrapping_sub)?,
      Instruction::Mul { rd, rs } => arithmetic(self.vm, rd, rs, Register::wrapping_mul)?,
      Instruction::Div { rd, rs } => divide(self, rd, rs)?,
      Instruction::Store { addr, value } => store(self.vm, addr, value)?,
      Instruction::Jmp { target } => self.vm.ip = target as usize,
      Instruction::Jif { target } => {
        if self.vm.registers[0] > 0 {
          self.vm.ip = target as usize;
        }
      }
      Instruction::Jz { target } => {
        if self.vm.registers[0] == 0 {
          self.vm.ip = target as usize;
        }
      }
      Instruction::PrintVal { rs } => {
        let value = self.vm.register(rs)?;
        self.console.write(&value.to_string());
      }
      Instruction::PrintChar { rs } => print_char(self, rs)?,
      Instruction::PrintStr {} => self.console.write_line(&self.vm.buffer),
      Instruction::InputStr {} => self.vm.buffer = read_line(self)?,
      Instruction::BufCopy {} => self.vm.clipboard.clone_from(&self.vm.buffer),
      Instruction::InputInt { rd } => {
        let line = read_line(self)?;
        *self.vm.register_mut(rd)? = line.trim().parse().unwrap_or(0);
      }
      Instruction::SetBuf { text } => self.vm.buffer = text,
      Instruction::CmdCheck { name, target } => command_check(self.vm, &name, target),
      Instruction::FileList {} => file_list(self),
      Instruction::FileCreate {} => {
        let result = self.vm.disk.create(&self.vm.buffer).map(drop);
        settle(self, result);
      }
      Instruction::FileDelete {} => {
        let result = self.vm.disk.delete(&self.vm.buffer);
        settle(self, result);
      }
      Instruction::FileRead {} => match self.vm.disk.read(&self.vm.buffer) {
        Ok(contents) => self.vm.buffer = contents,
        Err(err) => disk_failure(self, err),
      },
      Instruction::FileWrite { name } => {
        let result = self.vm.disk.write(&name, &self.vm.buffer).map(drop);
        settle(self, result);
      }
      Instruction::FileExec {} => return Ok(Flow::Exec),
      Instruction::MakeNote {} => make_note(self)?,
      Instruction::ScrambleFile {} => {
        let result = self.vm.disk.scramble(&self.vm.buffer).map(drop);
        settle(self, result);
      }
      Instruction::FileSaveAs {} => save_as(self),
      Instruction::SysInfo {} => self.vm.buffer = SYSTEM_INFO.to_string(),
      Instruction::ClearScr {} => self.console.clear(),
      Instruction::NetPing {} => net_ping(self),
      Instruction::NetGet {} => net_get(self),
    }
    Ok(Flow::Continue)
  }
}

// r[d] ← r[d] op r[s]
fn arithmetic(
  vm: &mut Vm,
  rd: u8,
  rs: u8,
  op: fn(Register, Register) -> Register,
) -> Result<(), Fault> {
  let rhs = vm.register(rs)?;
  let dst = vm.register_mut(rd)?;
  *dst = op(*dst, rhs);
  Ok(())
}

// r[d] ← r[d] / r[s], unless r[s] is zero
fn divide<C, N>(task: &mut Task<'_, '_, C, N>, rd: u8, rs: u8) -> Result<(), Fault>
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  let divisor = task.vm.register(rs)?;
  let dst = task.vm.register_mut(rd)?;
  if divisor == 0 {
    warn!(register = rd, "division by zero");
    task.console.write_line("Div/0 Error");
  } else {
    *dst = dst.wrapping_div(divisor);
  }
  Ok(())
}

// m[r[a]] ← r[v] & 0xFF
fn store(vm: &mut Vm, addr: u8, value: u8) -> Result<(), Fault> {
  let address = vm.register(addr)?;
  let byte = vm.register(value)? as u8;
  let at = usize::try_from(address)
    .ok()
    .filter(|&at| at < vm.memory.len())
    .ok_or(Fault::MemoryOutOfBounds(address))?;
  vm.memory[at] = byte;
  Ok(())
}

fn print_char<C, N>(task: &mut Task<'_, '_, C, N>, rs: u8) -> Result<(), Fault>
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  let value = task.vm.register(rs)?;
  let c = u32::try_from(value)
    .ok()
    .and_then(char::from_u32)
    .unwrap_or(char::REPLACEMENT_CHARACTER);
  task.console.write(c.encode_utf8(&mut [0; 4]));
  Ok(())
}

fn read_line<C, N>(task: &mut Task<'_, '_, C, N>) -> Result<String, Fault>
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  let line = task.console.read_line();
  if task.console.is_closed() {
    return Err(Fault::InputClosed);
  }
  Ok(line)
}

/// Matches `input` against a command word, ignoring ASCII case. Returns the
/// trimmed argument text on a match.
pub fn match_command<'a>(input: &'a str, name: &str) -> Option<&'a str> {
  let head = input.get(..name.len())?;
  if !head.eq_ignore_ascii_case(name) {
    return None;
  }
  let rest = &input[name.len()..];
  if rest.is_empty() {
    Some(rest)
  } else if rest.starts_with(' ') {
    Some(rest.trim())
  } else {
    None
  }
}

// if buffer names the command : buffer ← arguments, pc ← aaaa
fn command_check(vm: &mut Vm, name: &str, target: u16) {
  if let Some(rest) = match_command(vm.buffer.trim(), name) {
    vm.buffer = rest.to_string();
    vm.ip = target as usize;
  }
}

fn file_list<C, N>(task: &mut Task<'_, '_, C, N>)
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  match task.vm.disk.list() {
    Ok(names) => {
      task.console.write_line("");
      task.console.write_line(LISTING_HEADER);
      for name in names {
        task.console.write_line(&format!(" {name}"));
      }
      task.console.write_line(LISTING_FOOTER);
    }
    Err(err) => disk_failure(task, err),
  }
}

fn save_as<C, N>(task: &mut Task<'_, '_, C, N>)
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  let name = task.vm.buffer.trim().to_string();
  match task.vm.disk.write(&name, &task.vm.clipboard) {
    Ok(_) => task
      .console
      .write_line(&format!("[SYSTEM] Saved clipboard to {name}")),
    Err(err) => disk_failure(task, err),
  }
}

fn make_note<C, N>(task: &mut Task<'_, '_, C, N>) -> Result<(), Fault>
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  task.console.write("File: ");
  let name = read_line(task)?;
  task.console.write("Data: ");
  let contents = read_line(task)?;
  let result = task.vm.disk.write(&name, &contents).map(drop);
  settle(task, result);
  Ok(())
}

fn settle<C, N>(task: &mut Task<'_, '_, C, N>, result: Result<(), DiskError>)
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  if let Err(err) = result {
    disk_failure(task, err);
  }
}

// Reports the failure and leaves its sentinel where the program can test it.
fn disk_failure<C, N>(task: &mut Task<'_, '_, C, N>, err: DiskError)
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  warn!(%err, "file operation failed");
  let tag = match err {
    DiskError::Denied(_) => "SEC_ERR",
    DiskError::NotFound(_) | DiskError::Io { .. } => "DISK_ERR",
  };
  task.console.write_line(&format!("[{tag}] {err}"));
  task.vm.buffer = err.sentinel().to_string();
}

fn net_ping<C, N>(task: &mut Task<'_, '_, C, N>)
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  let host = task.vm.buffer.trim();
  match task.network.ping(host) {
    Ok(rtt) => {
      debug!(host, ?rtt, "ping answered");
      task.console.write_line("Ping OK");
    }
    Err(err) => {
      warn!(host, %err, "ping failed");
      task.console.write_line(PING_FAIL);
      task.vm.buffer = PING_FAIL.to_string();
    }
  }
}

fn net_get<C, N>(task: &mut Task<'_, '_, C, N>)
where
  C: Console + ?Sized,
  N: Network + ?Sized,
{
  task.console.write("Downloading... ");
  match net::download(&mut *task.network, &task.vm.buffer, task.vm.download_cap) {
    Ok(body) => {
      task.vm.buffer = body;
      task.console.write_line("Done.");
    }
    Err(err) => {
      warn!(%err, "download failed");
      task.console.write_line(&format!("Err: {err}"));
      task.vm.buffer = DOWNLOAD_ERROR.to_string();
    }
  }
}
