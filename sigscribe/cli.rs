use std::path::PathBuf;

use clap::{
  ArgAction,
  Parser,
};

#[derive(Parser, Debug)]
#[command(
  name = "sigscribe",
  about = "Language server that synthesizes signature stubs for method definitions",
  version
)]
pub struct Cli {
  /// Serve the editor over standard input/output (the default)
  #[arg(long)]
  pub stdio: bool,

  /// Serve a local TCP socket on the given port instead of stdio
  #[arg(long, value_name = "PORT", conflicts_with = "stdio")]
  pub socket: Option<u16>,

  /// Increase logging verbosity (repeat for more detail)
  #[arg(short = 'v', action = ArgAction::Count)]
  pub verbosity: u8,

  /// Save logs to a specific file instead of stderr
  #[arg(long = "log", value_name = "FILE")]
  pub log_file: Option<PathBuf>,
}

impl Cli {
  pub fn log_level(&self) -> &'static str {
    match self.verbosity {
      0 => "warn",
      1 => "info",
      2 => "debug",
      _ => "trace",
    }
  }
}

#[cfg(test)]
mod test {
  use clap::CommandFactory;

  use super::*;

  #[test]
  fn arguments_parse() {
    Cli::command().debug_assert();

    let cli = Cli::parse_from(["sigscribe", "--socket", "7658", "-vv"]);
    assert_eq!(cli.socket, Some(7658));
    assert_eq!(cli.log_level(), "debug");

    let cli = Cli::parse_from(["sigscribe", "--stdio"]);
    assert!(cli.stdio);
    assert_eq!(cli.socket, None);
    assert_eq!(cli.log_level(), "warn");
  }
}
