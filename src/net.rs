//! Network capability adapter.
//!
//! [`Network`] is the seam between the VM and the host's network stack:
//! [`HostNetwork`] shells out to the system `ping` for ICMP probes and uses a
//! blocking `reqwest` client for HTTP GET. The download policy (scheme
//! defaulting and truncation) lives in [`download`] so it applies to any
//! implementation.

use std::io;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use tracing::debug;

use crate::config::Config;

/// Characters kept from a downloaded body by default.
pub const DEFAULT_DOWNLOAD_CAP: usize = 8000;
pub const TRUNCATION_MARKER: &str = "\n...[TRUNCATED]";

pub const DOWNLOAD_ERROR: &str = "Download Error";
pub const PING_FAIL: &str = "Ping Fail";

#[derive(thiserror::Error, Debug)]
pub enum NetError {
  #[error("no host given")]
  NoHost,

  #[error("`{0}` is not a valid host name")]
  InvalidHost(String),

  #[error("{0} did not answer")]
  Unreachable(String),

  #[error("could not run ping: {0}")]
  Probe(#[source] io::Error),

  #[error("{url} answered with status {code}")]
  Status { url: String, code: u16 },

  #[error(transparent)]
  Http(#[from] reqwest::Error),
}

pub trait Network {
  /// Sends one echo request, returning the round-trip time.
  fn ping(&mut self, host: &str) -> Result<Duration, NetError>;

  /// Fetches `url` and returns the body as text.
  fn get(&mut self, url: &str) -> Result<String, NetError>;
}

/// The real network, bounded by the timeouts in [`Config`].
#[derive(Debug, Clone)]
pub struct HostNetwork {
  client: Client,
  ping_timeout: Duration,
}

impl HostNetwork {
  pub fn new(config: &Config) -> Result<Self, NetError> {
    let client = Client::builder()
      .timeout(config.http_timeout)
      .user_agent(concat!("tinyvm/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      client,
      ping_timeout: config.ping_timeout,
    })
  }
}

impl Network for HostNetwork {
  fn ping(&mut self, host: &str) -> Result<Duration, NetError> {
    check_host(host)?;
    let started = Instant::now();
    let status = ping_command(host, self.ping_timeout)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .map_err(NetError::Probe)?;
    if status.success() {
      Ok(started.elapsed())
    } else {
      Err(NetError::Unreachable(host.to_string()))
    }
  }

  fn get(&mut self, url: &str) -> Result<String, NetError> {
    let response = self.client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
      return Err(NetError::Status {
        url: url.to_string(),
        code: status.as_u16(),
      });
    }
    Ok(response.text()?)
  }
}

fn ping_command(host: &str, timeout: Duration) -> Command {
  let mut command = Command::new("ping");
  if cfg!(windows) {
    command
      .args(["-n", "1", "-w"])
      .arg(timeout.as_millis().to_string());
  } else if cfg!(target_os = "macos") {
    command
      .args(["-c", "1", "-t"])
      .arg(timeout.as_secs().max(1).to_string());
  } else {
    command
      .args(["-c", "1", "-W"])
      .arg(timeout.as_secs().max(1).to_string());
  }
  command.arg(host);
  command
}

/// Host names and IP literals only; in particular nothing `ping` could read
/// as a flag.
fn check_host(host: &str) -> Result<(), NetError> {
  if host.is_empty() {
    return Err(NetError::NoHost);
  }
  let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '_' | '%');
  if host.starts_with('-') || !host.chars().all(allowed) {
    return Err(NetError::InvalidHost(host.to_string()));
  }
  Ok(())
}

/// Adds `https://` unless the text already starts with `http`.
pub fn normalize_url(raw: &str) -> String {
  let url = raw.trim();
  if url.starts_with("http") {
    url.to_string()
  } else {
    format!("https://{url}")
  }
}

/// Keeps the first `cap` characters, appending [`TRUNCATION_MARKER`] when
/// anything was cut.
pub fn truncate(mut body: String, cap: usize) -> String {
  if let Some((at, _)) = body.char_indices().nth(cap) {
    body.truncate(at);
    body.push_str(TRUNCATION_MARKER);
  }
  body
}

/// GETs the URL named by `raw` and applies the truncation policy.
pub fn download<N>(network: &mut N, raw: &str, cap: usize) -> Result<String, NetError>
where
  N: Network + ?Sized,
{
  let url = normalize_url(raw);
  debug!(%url, "downloading");
  network.get(&url).map(|body| truncate(body, cap))
}
