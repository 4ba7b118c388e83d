//! Path containment for the virtual disk.
//!
//! Every file a program touches is named by a string it controls, so every
//! name goes through [`Sandbox::resolve`] before any I/O happens. A name is
//! accepted when:
//!
//! - it is not blank,
//! - its extension is one of [`ALLOWED_EXTENSIONS`] (ASCII case-insensitive),
//! - the path it denotes, with `.`/`..` folded and symlinks followed, lies
//!   strictly inside the canonical virtual-disk root.
//!
//! Containment is checked component by component on canonical paths, so a
//! sibling directory that merely shares the root's name as a textual prefix
//! (`vdisk_evil` next to `vdisk`) is rejected. Case folding of the root itself
//! is whatever the host filesystem's canonicalization does.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// File extensions a program may read or write, without the leading dot.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["json", "txt", "tiny"];

/// Why a name was refused
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Denied {
  #[error("empty file name")]
  EmptyName,

  #[error("file type `{extension}` of `{name}` is not allowed")]
  Extension { name: String, extension: String },

  #[error("`{0}` is outside the virtual disk")]
  OutsideRoot(String),

  #[error("`{0}` cannot be resolved")]
  Unresolvable(String),
}

#[derive(Debug, Clone)]
pub struct Sandbox {
  root: PathBuf,
}

impl Sandbox {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// The virtual-disk root as configured, not canonicalized
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Maps a program-supplied file name onto an absolute path inside the
  /// virtual disk.
  ///
  /// The file itself need not exist, but its parent directory must.
  pub fn resolve(&self, name: &str) -> Result<PathBuf, Denied> {
    let name = name.trim();
    if name.is_empty() {
      return Err(Denied::EmptyName);
    }
    check_extension(name)?;

    let root = self.canonical_root()?;
    let lexical = normalize(&root.join(name));
    if !is_strictly_inside(&lexical, &root) {
      return Err(Denied::OutsideRoot(name.to_string()));
    }

    let resolved = follow_links(&lexical).map_err(|_| Denied::Unresolvable(name.to_string()))?;
    if is_strictly_inside(&resolved, &root) {
      Ok(resolved)
    } else {
      Err(Denied::OutsideRoot(name.to_string()))
    }
  }

  /// Containment check alone, for paths that came from listing the disk
  /// rather than from a program.
  pub fn confine(&self, path: &Path) -> Result<PathBuf, Denied> {
    let shown = || path.display().to_string();
    let root = self.canonical_root()?;
    let resolved = fs::canonicalize(path).map_err(|_| Denied::Unresolvable(shown()))?;
    if is_strictly_inside(&resolved, &root) {
      Ok(resolved)
    } else {
      Err(Denied::OutsideRoot(shown()))
    }
  }

  fn canonical_root(&self) -> Result<PathBuf, Denied> {
    fs::canonicalize(&self.root).map_err(|_| Denied::Unresolvable(self.root.display().to_string()))
  }
}

fn check_extension(name: &str) -> Result<(), Denied> {
  let extension = Path::new(name)
    .extension()
    .and_then(OsStr::to_str)
    .unwrap_or_default();
  if ALLOWED_EXTENSIONS
    .iter()
    .any(|allowed| allowed.eq_ignore_ascii_case(extension))
  {
    Ok(())
  } else {
    Err(Denied::Extension {
      name: name.to_string(),
      extension: extension.to_string(),
    })
  }
}

/// Folds `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

/// Canonicalizes the parent directory, then the file itself when something
/// already exists there. A dangling symlink is an error: writing through it
/// would create its target, wherever that is.
fn follow_links(path: &Path) -> io::Result<PathBuf> {
  let parent = path
    .parent()
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
  let file_name = path
    .file_name()
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
  let candidate = fs::canonicalize(parent)?.join(file_name);

  match fs::canonicalize(&candidate) {
    Ok(real) => Ok(real),
    Err(err) if err.kind() == io::ErrorKind::NotFound => {
      if fs::symlink_metadata(&candidate).is_ok() {
        Err(err)
      } else {
        Ok(candidate)
      }
    }
    Err(err) => Err(err),
  }
}

fn is_strictly_inside(path: &Path, root: &Path) -> bool {
  path != root && path.starts_with(root)
}
