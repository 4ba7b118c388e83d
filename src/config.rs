use std::path::PathBuf;
use std::time::Duration;

use crate::net::DEFAULT_DOWNLOAD_CAP;
use crate::sandbox::Sandbox;

/// Virtual-disk directory name, relative to the script root.
pub const DEFAULT_DISK_DIR: &str = "vdisk";
/// Preferred boot program in the script root.
pub const BOOT_SCRIPT: &str = "MOS.tiny";

pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Where scripts live and how long the host may block on their behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Directory holding top-level `.tiny` programs.
  pub script_root: PathBuf,
  /// The only directory bytecode may read or write.
  pub disk_root: PathBuf,
  /// Program to start with instead of the discovered one.
  pub boot: Option<String>,
  pub ping_timeout: Duration,
  pub http_timeout: Duration,
  /// Characters kept from an HTTP response body.
  pub download_cap: usize,
}

impl Config {
  pub fn new(script_root: impl Into<PathBuf>) -> Self {
    let script_root = script_root.into();
    Self {
      disk_root: script_root.join(DEFAULT_DISK_DIR),
      script_root,
      boot: None,
      ping_timeout: DEFAULT_PING_TIMEOUT,
      http_timeout: DEFAULT_HTTP_TIMEOUT,
      download_cap: DEFAULT_DOWNLOAD_CAP,
    }
  }

  pub fn with_disk_root(mut self, disk_root: impl Into<PathBuf>) -> Self {
    self.disk_root = disk_root.into();
    self
  }

  pub fn with_boot(mut self, boot: impl Into<String>) -> Self {
    self.boot = Some(boot.into());
    self
  }

  pub fn sandbox(&self) -> Sandbox {
    Sandbox::new(&self.disk_root)
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
  }
}
