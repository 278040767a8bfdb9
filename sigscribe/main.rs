use std::{
  fs::File,
  sync::{
    Arc,
    mpsc::Receiver,
  },
};

use anyhow::Context;
use clap::Parser;
use sig_lsp::{
  Dispatcher,
  Host,
  HostEvent,
  SigService,
  serve_stdio,
  serve_tcp,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

mod cli;

fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();
  init_logging(&cli)?;

  info!(
    "sigscribe {} starting (pid {})",
    env!("CARGO_PKG_VERSION"),
    std::process::id()
  );

  match cli.socket {
    Some(port) => serve_tcp(port, new_session).context("tcp server failed")?,
    None => {
      let (dispatcher, events) = new_session();
      serve_stdio(dispatcher, events).context("stdio server failed")?;
    },
  }

  info!("bye!");
  Ok(())
}

fn new_session() -> (Dispatcher<SigService>, Receiver<HostEvent>) {
  let (host, events) = Host::new();
  let dispatcher = Dispatcher::new(
    Arc::new(host),
    SigService::method_table(),
    SigService::with_default_analyzer(),
  );
  (dispatcher, events)
}

// Logs go to stderr (or a file): stdout is the protocol channel.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
  let builder = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);

  match &cli.log_file {
    Some(path) => {
      let file = File::create(path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;
      builder.with_writer(Arc::new(file)).init();
    },
    None => builder.with_writer(std::io::stderr).init(),
  }
  Ok(())
}
