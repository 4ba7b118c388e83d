//! The host loop.
//!
//! A [`Shell`] picks a boot program, runs it, and keeps loading whatever
//! program the running one asks for with `FILE_EXEC` until one halts, faults,
//! or asks for `exit`.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::assembler::{assemble_file, CompileError};
use crate::config::{Config, BOOT_SCRIPT};
use crate::console::Console;
use crate::disk::Disk;
use crate::net::Network;
use crate::region::Chunk;
use crate::vm::{Exit, Vm};

/// Program name that ends the loop instead of being loaded.
pub const EXIT_COMMAND: &str = "exit";

const SCRIPT_EXTENSION: &str = "tiny";

#[derive(thiserror::Error, Debug)]
pub enum ShellError {
  #[error("no .tiny program found in `{0}`")]
  NoBootProgram(String),

  #[error("boot program `{0}` not found")]
  BootNotFound(String),

  #[error("cannot prepare the virtual disk at `{path}`: {source}")]
  Disk {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("cannot scan `{path}` for programs: {source}")]
  Scan {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Compile(#[from] CompileError),
}

pub struct Shell<C, N> {
  config: Config,
  vm: Vm,
  console: C,
  network: N,
}

impl<C, N> Shell<C, N>
where
  C: Console,
  N: Network,
{
  /// Creates the virtual disk directory if needed.
  pub fn new(config: Config, console: C, network: N) -> Result<Self, ShellError> {
    fs::create_dir_all(&config.disk_root).map_err(|source| ShellError::Disk {
      path: config.disk_root.display().to_string(),
      source,
    })?;
    let vm = Vm::new(Disk::new(config.sandbox())).with_download_cap(config.download_cap);
    Ok(Self {
      config,
      vm,
      console,
      network,
    })
  }

  pub fn console(&self) -> &C {
    &self.console
  }

  pub fn vm(&self) -> &Vm {
    &self.vm
  }

  /// The configured boot program, else [`BOOT_SCRIPT`] in the script root,
  /// else the first `.tiny` file there by name.
  pub fn boot_script(&self) -> Result<PathBuf, ShellError> {
    if let Some(name) = &self.config.boot {
      return self
        .locate(name)
        .ok_or_else(|| ShellError::BootNotFound(name.clone()));
    }

    let root = &self.config.script_root;
    let preferred = root.join(BOOT_SCRIPT);
    if preferred.is_file() {
      return Ok(preferred);
    }

    let scan_error = |source| ShellError::Scan {
      path: root.display().to_string(),
      source,
    };
    let mut scripts = Vec::new();
    for entry in fs::read_dir(root).map_err(scan_error)? {
      let path = entry.map_err(scan_error)?.path();
      let is_script = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case(SCRIPT_EXTENSION));
      if is_script && path.is_file() {
        scripts.push(path);
      }
    }
    scripts.sort();
    scripts
      .into_iter()
      .next()
      .ok_or_else(|| ShellError::NoBootProgram(root.display().to_string()))
  }

  /// Finds a program by name: bare file names in the script root first,
  /// then anything the sandbox admits on the virtual disk.
  pub fn locate(&self, name: &str) -> Option<PathBuf> {
    let name = name.trim();
    if is_bare_name(name) {
      let path = self.config.script_root.join(name);
      if path.is_file() {
        return Some(path);
      }
    }
    self
      .vm
      .disk()
      .sandbox()
      .resolve(name)
      .ok()
      .filter(|path| path.is_file())
  }

  /// Runs programs until one halts, faults, or requests [`EXIT_COMMAND`].
  ///
  /// A request for a program that can't be found or doesn't compile is
  /// reported, and the previous program runs again.
  pub fn run(&mut self) -> Result<(), ShellError> {
    let boot = self.boot_script()?;
    let mut program = assemble_file(&boot)?;
    info!(path = %boot.display(), "booting");

    loop {
      match self.vm.run(&program, &mut self.console, &mut self.network) {
        Exit::Exec(name) if name == EXIT_COMMAND => break,
        Exit::Exec(name) => {
          if self.console.is_closed() {
            debug!(%name, "console closed, not loading");
            break;
          }
          if let Some(next) = self.load(&name) {
            program = next;
          }
        }
        Exit::Halted => break,
        Exit::Faulted(fault) => {
          debug!(%fault, "program faulted, shutting down");
          break;
        }
      }
    }
    Ok(())
  }

  fn load(&mut self, name: &str) -> Option<Chunk> {
    let Some(path) = self.locate(name) else {
      warn!(%name, "program not found");
      self
        .console
        .write_line(&format!("[SYSTEM] Program not found: {name}"));
      return None;
    };
    match assemble_file(&path) {
      Ok(chunk) => {
        info!(path = %path.display(), "loading program");
        Some(chunk)
      }
      Err(err) => {
        warn!(path = %path.display(), %err, "program failed to compile");
        self
          .console
          .write_line(&format!("[SYSTEM] Cannot load {name}: {err}"));
        None
      }
    }
  }
}

fn is_bare_name(name: &str) -> bool {
  let mut components = Path::new(name).components();
  matches!(
    (components.next(), components.next()),
    (Some(Component::Normal(_)), None)
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::config::DEFAULT_DISK_DIR;
  use crate::console::MemoryConsole;
  use crate::test_utils::{FakeNetwork, TempDir};

  fn shell(dir: &TempDir, input: &[&str]) -> Shell<MemoryConsole, FakeNetwork> {
    Shell::new(
      Config::new(dir.path()),
      MemoryConsole::new(input.iter().copied()),
      FakeNetwork::default(),
    )
    .unwrap()
  }

  fn disk_file(dir: &TempDir, name: &str, contents: &str) {
    fs::create_dir_all(dir.join(DEFAULT_DISK_DIR)).unwrap();
    dir.write(&format!("{DEFAULT_DISK_DIR}/{name}"), contents);
  }

  mod boot {
    use super::*;

    #[test]
    fn creates_disk_directory() {
      let dir = TempDir::new("host");
      shell(&dir, &[]);
      assert!(dir.join(DEFAULT_DISK_DIR).is_dir());
    }

    #[test]
    fn prefers_mos() {
      let dir = TempDir::new("host");
      dir.write("alpha.tiny", "EXIT");
      dir.write(BOOT_SCRIPT, "EXIT");
      assert_eq!(shell(&dir, &[]).boot_script().unwrap(), dir.join(BOOT_SCRIPT));
    }

    #[test]
    fn falls_back_to_first_script() {
      let dir = TempDir::new("host");
      dir.write("zeta.tiny", "EXIT");
      dir.write("beta.tiny", "EXIT");
      dir.write("alpha.txt", "EXIT");
      assert_eq!(shell(&dir, &[]).boot_script().unwrap(), dir.join("beta.tiny"));
    }

    #[test]
    fn configured_boot() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "EXIT");
      dir.write("custom.tiny", "EXIT");
      let shell = Shell::new(
        Config::new(dir.path()).with_boot("custom.tiny"),
        MemoryConsole::default(),
        FakeNetwork::default(),
      )
      .unwrap();
      assert_eq!(shell.boot_script().unwrap(), dir.join("custom.tiny"));
    }

    #[test]
    fn configured_boot_missing() {
      let dir = TempDir::new("host");
      let shell = Shell::new(
        Config::new(dir.path()).with_boot("gone.tiny"),
        MemoryConsole::default(),
        FakeNetwork::default(),
      )
      .unwrap();
      assert!(matches!(
        shell.boot_script(),
        Err(ShellError::BootNotFound(_))
      ));
    }

    #[test]
    fn nothing_to_boot() {
      let dir = TempDir::new("host");
      assert!(matches!(
        shell(&dir, &[]).run(),
        Err(ShellError::NoBootProgram(_))
      ));
    }

    #[test]
    fn boot_compile_error() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "SET R7 1");
      assert!(matches!(
        shell(&dir, &[]).run(),
        Err(ShellError::Compile(CompileError::InvalidRegister { .. }))
      ));
    }
  }

  mod locate {
    use super::*;

    #[test]
    fn script_root_wins() {
      let dir = TempDir::new("host");
      let shell = shell(&dir, &[]);
      dir.write("app.tiny", "EXIT");
      disk_file(&dir, "app.tiny", "EXIT");
      assert_eq!(shell.locate("app.tiny"), Some(dir.join("app.tiny")));
    }

    #[test]
    fn falls_back_to_disk() {
      let dir = TempDir::new("host");
      let shell = shell(&dir, &[]);
      disk_file(&dir, "app.tiny", "EXIT");
      let found = shell.locate(" app.tiny ").unwrap();
      assert!(found.ends_with(format!("{DEFAULT_DISK_DIR}/app.tiny")));
    }

    #[test]
    fn missing() {
      let dir = TempDir::new("host");
      assert_eq!(shell(&dir, &[]).locate("app.tiny"), None);
    }

    #[test]
    fn no_escape_from_disk() {
      let dir = TempDir::new("host");
      let shell = shell(&dir, &[]);
      dir.write(BOOT_SCRIPT, "EXIT");
      assert_eq!(shell.locate(&format!("../{BOOT_SCRIPT}")), None);
      assert_eq!(shell.locate(&format!("{DEFAULT_DISK_DIR}/../{BOOT_SCRIPT}")), None);
    }

    #[test]
    fn bare_names() {
      assert!(is_bare_name("app.tiny"));
      assert!(!is_bare_name("dir/app.tiny"));
      assert!(!is_bare_name("../app.tiny"));
      assert!(!is_bare_name("/app.tiny"));
      assert!(!is_bare_name(""));
    }
  }

  mod run {
    use super::*;

    #[test]
    fn halts_after_boot() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "PRINT \"up\"\nEXIT");
      let mut shell = shell(&dir, &[]);
      shell.run().unwrap();
      assert_eq!(shell.console().output(), "up");
    }

    #[test]
    fn chains_programs() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "STRING \"hello.tiny\"\nEXEC");
      disk_file(&dir, "hello.tiny", "PRINT \"hi\"\nEXIT");
      let mut shell = shell(&dir, &[]);
      shell.run().unwrap();
      assert_eq!(shell.console().output(), "hi");
    }

    #[test]
    fn exit_request_stops() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "PRINT \"bye\"\nSTRING \" exit \"\nEXEC");
      let mut shell = shell(&dir, &[]);
      shell.run().unwrap();
      assert_eq!(shell.console().output(), "bye");
      assert!(shell.vm().should_load_new_program());
    }

    #[test]
    fn missing_program_reruns_previous() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "PRINT \"$ \"\nINPUT_STRING\nEXEC");
      let mut shell = shell(&dir, &["ghost.tiny", "exit"]);
      shell.run().unwrap();
      assert_eq!(
        shell.console().output(),
        "$ [SYSTEM] Program not found: ghost.tiny\n$ "
      );
    }

    #[test]
    fn broken_program_reruns_previous() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "PRINT \"$\"\nINPUT_STRING\nEXEC");
      disk_file(&dir, "broken.tiny", "GOTO nowhere");
      let mut shell = shell(&dir, &["broken.tiny", "exit"]);
      shell.run().unwrap();
      let output = shell.console().output();
      assert!(output.starts_with("$[SYSTEM] Cannot load broken.tiny: "));
      assert!(output.ends_with("\n$"));
    }

    #[test]
    fn fault_stops() {
      let dir = TempDir::new("host");
      dir.write(
        BOOT_SCRIPT,
        "SET R0 1\nSET R1 0\nSUB R1 R0\nRAM_WRITE R1 R0\nPRINT \"unreachable\"",
      );
      let mut shell = shell(&dir, &[]);
      shell.run().unwrap();
      assert_eq!(
        shell.console().output(),
        "[CPU ERROR]: memory address -1 is out of range\n"
      );
    }

    #[test]
    fn closed_console_stops() {
      let dir = TempDir::new("host");
      dir.write(BOOT_SCRIPT, "INPUT_STRING\nEXEC");
      let mut shell = shell(&dir, &[]);
      shell.run().unwrap();
      assert!(shell.console().output().starts_with("[CPU ERROR]: console input closed"));
    }

    #[test]
    fn mini_shell_session() {
      let dir = TempDir::new("host");
      let mos = r#"
        // a tiny command loop
        prompt:
        PRINT "mos> "
        INPUT_STRING
        CMD "ls" list
        CMD "cat" show
        CMD "run" launch
        CMD "quit" quit
        PRINT "unknown"
        PRINT_LINE
        GOTO prompt
        list:
        VIEW
        GOTO prompt
        show:
        REVEAL
        PRINT_BUF
        GOTO prompt
        launch:
        EXEC
        quit:
        EXIT
      "#;
      dir.write(BOOT_SCRIPT, mos);
      disk_file(&dir, "notes.txt", "buy milk");
      disk_file(&dir, "game.tiny", "PRINT \"game over\"\nPRINT_LINE\nSTRING \"MOS.tiny\"\nEXEC");
      let mut shell = shell(
        &dir,
        &["ls", "cat notes.txt", "run game.tiny", "dance", "quit"],
      );
      shell.run().unwrap();
      assert_eq!(
        shell.console().output(),
        concat!(
          "mos> \n--- VDISK ---\n game.tiny\n notes.txt\n-------------\n",
          "mos> buy milk\n",
          "mos> game over\n",
          "mos> unknown\n",
          "mos> ",
        )
      );
    }
  }
}
