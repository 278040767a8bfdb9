use std::{
  io::{
    self,
    BufRead,
    BufReader,
    Read,
    Write,
  },
  net::TcpListener,
  sync::{
    Arc,
    mpsc::{
      Receiver,
      Sender,
      channel,
    },
  },
  thread::{
    self,
    JoinHandle,
  },
};

use thiserror::Error;
use tracing::{
  debug,
  info,
  warn,
};

use crate::{
  dispatch::Dispatcher,
  host::{
    Host,
    HostEvent,
  },
  jsonrpc::Message,
};

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("failed to bind tcp listener: {0}")]
  Bind(io::Error),
  #[error("failed to accept connection: {0}")]
  Accept(io::Error),
  #[error("failed to clone connection stream: {0}")]
  CloneStream(io::Error),
  #[error("failed to read frame header: {0}")]
  ReadHeader(io::Error),
  #[error("invalid content-length header value: {0}")]
  InvalidContentLength(String),
  #[error("failed to read frame body: {0}")]
  ReadBody(io::Error),
  #[error("transport thread panicked")]
  ThreadPanicked,
}

enum InboundEvent {
  Message(Message),
  Closed,
  ReadError(String),
}

/// Decodes length-prefixed frames off a byte stream.
///
/// A frame whose body fails to parse is logged and dropped; the connection
/// stays alive. Header-level failures and end-of-stream terminate reading.
struct FrameReader<R> {
  reader: R,
  header: String,
  body:   Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
  fn new(reader: R) -> Self {
    Self {
      reader,
      header: String::new(),
      body: Vec::new(),
    }
  }

  /// The next decoded message, or `None` on a clean end of stream.
  fn next_message(&mut self) -> Result<Option<Message>, TransportError> {
    loop {
      let Some(body_len) = self.read_header()? else {
        return Ok(None);
      };
      self.body.resize(body_len, 0);
      self
        .reader
        .read_exact(&mut self.body)
        .map_err(TransportError::ReadBody)?;
      match serde_json::from_slice(&self.body) {
        Ok(message) => {
          self.body.clear();
          return Ok(Some(message));
        },
        Err(err) => {
          warn!("failed to parse incoming message: {err}");
          debug!("dropped body: {}", String::from_utf8_lossy(&self.body));
          self.body.clear();
        },
      }
    }
  }

  fn read_header(&mut self) -> Result<Option<usize>, TransportError> {
    let mut content_length = None;
    loop {
      self.header.clear();
      let read = self
        .reader
        .read_line(&mut self.header)
        .map_err(TransportError::ReadHeader)?;
      if read == 0 {
        return Ok(None);
      }

      if self.header == "\r\n" {
        match content_length {
          Some(length) => return Ok(Some(length)),
          None => continue,
        }
      }

      let line = self.header.trim_end_matches(['\r', '\n']);
      if let Some(rest) = line.strip_prefix("Content-Length:") {
        let value = rest.trim();
        let parsed = value
          .parse::<usize>()
          .map_err(|_| TransportError::InvalidContentLength(value.to_string()))?;
        content_length = Some(parsed);
      }
    }
  }
}

fn spawn_reader<R: Read + Send + 'static>(
  input: R,
  inbound_tx: Sender<InboundEvent>,
) -> JoinHandle<()> {
  thread::Builder::new()
    .name("sigscribe-reader".into())
    .spawn(move || {
      let mut frames = FrameReader::new(BufReader::new(input));
      loop {
        match frames.next_message() {
          Ok(Some(message)) => {
            if inbound_tx.send(InboundEvent::Message(message)).is_err() {
              break;
            }
          },
          Ok(None) => {
            let _ = inbound_tx.send(InboundEvent::Closed);
            break;
          },
          Err(err) => {
            let _ = inbound_tx.send(InboundEvent::ReadError(err.to_string()));
            break;
          },
        }
      }
    })
    .expect("failed to spawn transport reader thread")
}

fn spawn_writer<W: Write + Send + 'static>(
  mut output: W,
  host: Arc<Host>,
  events: Receiver<HostEvent>,
) -> JoinHandle<()> {
  thread::Builder::new()
    .name("sigscribe-writer".into())
    .spawn(move || {
      for event in events {
        match event {
          HostEvent::OutputReady => {
            if let Err(err) = drain(&mut output, &host) {
              warn!("failed to write outbound frames: {err}");
              break;
            }
          },
          HostEvent::Stopped => {
            let _ = drain(&mut output, &host);
            break;
          },
        }
      }
    })
    .expect("failed to spawn transport writer thread")
}

fn drain<W: Write>(output: &mut W, host: &Host) -> io::Result<()> {
  let bytes = host.flush();
  if bytes.is_empty() {
    return Ok(());
  }
  output.write_all(&bytes)?;
  output.flush()
}

/// Serves one connection: a reader thread decodes frames into an inbound
/// channel, a writer thread drains the host's outbound buffer whenever it
/// signals output (and once more on stop), and the calling thread drives
/// the dispatcher sequentially until the host stops or the stream closes.
pub fn serve<R, W, S>(
  input: R,
  output: W,
  mut dispatcher: Dispatcher<S>,
  events: Receiver<HostEvent>,
) -> Result<(), TransportError>
where
  R: Read + Send + 'static,
  W: Write + Send + 'static,
{
  let host = Arc::clone(dispatcher.host());
  host.start();

  let (inbound_tx, inbound_rx) = channel();
  let _reader = spawn_reader(input, inbound_tx);
  let writer = spawn_writer(output, Arc::clone(&host), events);

  for event in inbound_rx {
    match event {
      InboundEvent::Message(message) => {
        dispatcher.receive(message);
        if host.is_stopped() {
          break;
        }
      },
      InboundEvent::Closed => {
        debug!("client closed the connection");
        break;
      },
      InboundEvent::ReadError(err) => {
        warn!("transport read failed: {err}");
        break;
      },
    }
  }

  host.stop();
  writer.join().map_err(|_| TransportError::ThreadPanicked)?;
  // The reader thread is not joined: it ends when the client closes its half
  // of the stream, and an exit before that close must not hang shutdown.
  Ok(())
}

/// Serves the process's standard streams until the session ends.
pub fn serve_stdio<S>(
  dispatcher: Dispatcher<S>,
  events: Receiver<HostEvent>,
) -> Result<(), TransportError> {
  info!("serving on standard streams");
  serve(io::stdin(), io::stdout(), dispatcher, events)
}

/// Listens on localhost and serves connections sequentially, one fresh
/// host/service pair per connection.
pub fn serve_tcp<S, F>(port: u16, mut session_factory: F) -> Result<(), TransportError>
where
  F: FnMut() -> (Dispatcher<S>, Receiver<HostEvent>),
{
  let listener = TcpListener::bind(("127.0.0.1", port)).map_err(TransportError::Bind)?;
  info!("listening on port {port}");

  for connection in listener.incoming() {
    let stream = connection.map_err(TransportError::Accept)?;
    debug!("client connected");
    let input = stream.try_clone().map_err(TransportError::CloneStream)?;
    let (dispatcher, events) = session_factory();
    serve(input, stream, dispatcher, events)?;
    info!("client session ended");
  }
  Ok(())
}
