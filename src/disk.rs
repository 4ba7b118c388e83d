//! Filesystem capability adapter.
//!
//! The only code that performs file I/O on behalf of a program. Every name is
//! resolved through the [`Sandbox`] first, and every failure comes back as a
//! [`DiskError`] whose [`sentinel`](DiskError::sentinel) the VM leaves in the
//! string buffer for the program to branch on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::sandbox::{Denied, Sandbox};

/// Contents written by `FILE_CREATE`.
pub const PLACEHOLDER: &str = "Empty";
/// Name that makes `SCRAMBLE_FILE` target every file on the disk.
pub const ALL_FILES: &str = "*";
/// Suffix appended to scrambled files.
pub const CORRUPTION_MARKER: &str = "[CORRUPTED]";
/// Number of random characters written before the marker.
pub const GARBAGE_LEN: usize = 64;

pub const ACCESS_DENIED: &str = "Access Denied";
pub const ERROR: &str = "Error";

#[derive(thiserror::Error, Debug)]
pub enum DiskError {
  #[error("access denied: {0}")]
  Denied(#[from] Denied),

  #[error("file not found: {0}")]
  NotFound(String),

  #[error("i/o error on `{name}`: {source}")]
  Io {
    name: String,
    #[source]
    source: io::Error,
  },
}

impl DiskError {
  /// The string-buffer value a program sees after this failure.
  pub fn sentinel(&self) -> &'static str {
    match self {
      Self::Denied(_) => ACCESS_DENIED,
      Self::NotFound(_) | Self::Io { .. } => ERROR,
    }
  }

  fn io(name: &str, source: io::Error) -> Self {
    if source.kind() == io::ErrorKind::NotFound {
      Self::NotFound(name.to_string())
    } else {
      Self::Io {
        name: name.to_string(),
        source,
      }
    }
  }
}

/// The virtual disk: one flat directory, reached only through its sandbox.
#[derive(Debug, Clone)]
pub struct Disk {
  sandbox: Sandbox,
}

impl Disk {
  pub fn new(sandbox: Sandbox) -> Self {
    Self { sandbox }
  }

  pub fn sandbox(&self) -> &Sandbox {
    &self.sandbox
  }

  /// Names of the regular files directly under the root, sorted.
  pub fn list(&self) -> Result<Vec<String>, DiskError> {
    let root = self.sandbox.root();
    let shown = root.display().to_string();
    let mut names = Vec::new();
    for entry in fs::read_dir(root).map_err(|err| DiskError::io(&shown, err))? {
      let entry = entry.map_err(|err| DiskError::io(&shown, err))?;
      if entry.file_type().is_ok_and(|kind| kind.is_file()) {
        names.push(entry.file_name().to_string_lossy().into_owned());
      }
    }
    names.sort();
    Ok(names)
  }

  pub fn read(&self, name: &str) -> Result<String, DiskError> {
    let path = self.sandbox.resolve(name)?;
    let bytes = fs::read(&path).map_err(|err| DiskError::io(name, err))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
  }

  pub fn write(&self, name: &str, contents: &str) -> Result<PathBuf, DiskError> {
    let path = self.sandbox.resolve(name)?;
    fs::write(&path, contents).map_err(|err| DiskError::io(name, err))?;
    debug!(path = %path.display(), bytes = contents.len(), "wrote file");
    Ok(path)
  }

  /// Creates (or resets) a file holding [`PLACEHOLDER`].
  pub fn create(&self, name: &str) -> Result<PathBuf, DiskError> {
    self.write(name, PLACEHOLDER)
  }

  pub fn delete(&self, name: &str) -> Result<(), DiskError> {
    let path = self.sandbox.resolve(name)?;
    fs::remove_file(&path).map_err(|err| DiskError::io(name, err))?;
    debug!(path = %path.display(), "deleted file");
    Ok(())
  }

  /// Overwrites `name` with random text and the corruption marker, or every
  /// file on the disk when `name` is [`ALL_FILES`]. Returns how many files were
  /// overwritten.
  pub fn scramble(&self, name: &str) -> Result<usize, DiskError> {
    let name = name.trim();
    if name == ALL_FILES {
      return self.scramble_all();
    }
    let path = self.sandbox.resolve(name)?;
    if !path.is_file() {
      return Err(DiskError::NotFound(name.to_string()));
    }
    corrupt(&path).map_err(|err| DiskError::io(name, err))?;
    Ok(1)
  }

  // Listed entries skip the extension whitelist but not containment.
  fn scramble_all(&self) -> Result<usize, DiskError> {
    let mut count = 0;
    for name in self.list()? {
      let path = match self.sandbox.confine(&self.sandbox.root().join(&name)) {
        Ok(path) => path,
        Err(denied) => {
          warn!(%denied, "skipping file during scramble");
          continue;
        }
      };
      corrupt(&path).map_err(|err| DiskError::io(&name, err))?;
      count += 1;
    }
    Ok(count)
  }
}

fn garbage() -> String {
  let mut text: String = rand::thread_rng()
    .sample_iter(&Alphanumeric)
    .take(GARBAGE_LEN)
    .map(char::from)
    .collect();
  text.push('\n');
  text.push_str(CORRUPTION_MARKER);
  text
}

fn corrupt(path: &Path) -> io::Result<()> {
  fs::write(path, garbage())?;
  warn!(path = %path.display(), "file scrambled");
  Ok(())
}
