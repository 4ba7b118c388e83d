use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tinyvm::assembler::assemble_file;
use tinyvm::config::{Config, DEFAULT_DISK_DIR};
use tinyvm::console::StdConsole;
use tinyvm::host::Shell;
use tinyvm::net::{HostNetwork, DEFAULT_DOWNLOAD_CAP};

#[derive(Parser)]
#[command(name = "tinyvm", version, about = "Runs TinyScript programs on the TinyVM")]
struct Cli {
  /// Directory holding the .tiny programs
  #[arg(long, env = "TINYVM_ROOT", default_value = ".")]
  root: PathBuf,

  /// Virtual disk directory [default: <root>/vdisk]
  #[arg(long, env = "TINYVM_DISK")]
  disk: Option<PathBuf>,

  /// Program to boot instead of MOS.tiny
  #[arg(long, env = "TINYVM_BOOT")]
  boot: Option<String>,

  #[arg(long, env = "TINYVM_PING_TIMEOUT_MS", default_value_t = 1000)]
  ping_timeout_ms: u64,

  #[arg(long, env = "TINYVM_HTTP_TIMEOUT_SECS", default_value_t = 30)]
  http_timeout_secs: u64,

  /// Characters kept from a downloaded page
  #[arg(long, env = "TINYVM_DOWNLOAD_CAP", default_value_t = DEFAULT_DOWNLOAD_CAP)]
  download_cap: usize,

  /// Print the assembled listing of FILE and exit
  #[arg(long, value_name = "FILE")]
  disassemble: Option<PathBuf>,

  /// More log output on stderr (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

impl Cli {
  fn config(&self) -> Config {
    let mut config = Config::new(&self.root)
      .with_disk_root(self.disk.clone().unwrap_or_else(|| self.root.join(DEFAULT_DISK_DIR)));
    if let Some(boot) = &self.boot {
      config = config.with_boot(boot);
    }
    config.ping_timeout = Duration::from_millis(self.ping_timeout_ms);
    config.http_timeout = Duration::from_secs(self.http_timeout_secs);
    config.download_cap = self.download_cap;
    config
  }
}

fn init_tracing(verbose: u8) {
  let default = match verbose {
    0 => "warn",
    1 => "debug",
    _ => "trace",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn disassemble(path: &Path) -> ExitCode {
  let chunk = match assemble_file(path) {
    Ok(chunk) => chunk,
    Err(err) => {
      eprintln!("error: {}: {err}", path.display());
      return ExitCode::FAILURE;
    }
  };
  match chunk.disassemble() {
    Ok(listing) => {
      for (offset, instruction) in listing {
        println!("{offset:04x}  {instruction}");
      }
      ExitCode::SUCCESS
    }
    Err(fault) => {
      eprintln!("error: {}: {fault}", path.display());
      ExitCode::FAILURE
    }
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  if let Some(path) = &cli.disassemble {
    return disassemble(path);
  }

  let config = cli.config();
  let network = match HostNetwork::new(&config) {
    Ok(network) => network,
    Err(err) => {
      eprintln!("error: {err}");
      return ExitCode::FAILURE;
    }
  };
  let result = Shell::new(config, StdConsole::default(), network).and_then(|mut shell| shell.run());
  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("error: {err}");
      ExitCode::FAILURE
    }
  }
}
