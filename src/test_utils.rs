use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::net::{NetError, Network};

/// A uniquely named directory under the system temp dir, removed on drop.
pub(crate) struct TempDir {
  path: PathBuf,
}

impl TempDir {
  pub(crate) fn new(label: &str) -> Self {
    let path = std::env::temp_dir().join(format!("tinyvm_{label}_{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&path).unwrap();
    Self { path }
  }

  pub(crate) fn path(&self) -> &Path {
    &self.path
  }

  pub(crate) fn join(&self, name: &str) -> PathBuf {
    self.path.join(name)
  }

  pub(crate) fn canonical(&self) -> PathBuf {
    fs::canonicalize(&self.path).unwrap()
  }

  pub(crate) fn write(&self, name: &str, contents: &str) {
    fs::write(self.join(name), contents).unwrap();
  }

  pub(crate) fn read(&self, name: &str) -> String {
    fs::read_to_string(self.join(name)).unwrap()
  }
}

impl Drop for TempDir {
  fn drop(&mut self) {
    let _ = fs::remove_dir_all(&self.path);
  }
}

/// Answers pings for `reachable` hosts and serves `pages` by exact URL.
#[derive(Debug, Default)]
pub(crate) struct FakeNetwork {
  pub(crate) reachable: Vec<String>,
  pub(crate) pages: HashMap<String, String>,
  pub(crate) requested: Vec<String>,
}

impl FakeNetwork {
  pub(crate) fn with_page(url: &str, body: &str) -> Self {
    let mut network = Self::default();
    network.pages.insert(url.to_string(), body.to_string());
    network
  }

  pub(crate) fn with_host(host: &str) -> Self {
    Self {
      reachable: vec![host.to_string()],
      ..Self::default()
    }
  }
}

impl Network for FakeNetwork {
  fn ping(&mut self, host: &str) -> Result<Duration, NetError> {
    if self.reachable.iter().any(|known| known == host) {
      Ok(Duration::from_millis(3))
    } else {
      Err(NetError::Unreachable(host.to_string()))
    }
  }

  fn get(&mut self, url: &str) -> Result<String, NetError> {
    self.requested.push(url.to_string());
    self.pages.get(url).cloned().ok_or(NetError::Status {
      url: url.to_string(),
      code: 404,
    })
  }
}
