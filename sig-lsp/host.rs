use std::{
  collections::{
    HashMap,
    HashSet,
  },
  sync::{
    atomic::{
      AtomicU64,
      Ordering,
    },
    mpsc::{
      Receiver,
      Sender,
      channel,
    },
  },
};

use parking_lot::Mutex;
use serde_json::{
  Value,
  json,
};
use thiserror::Error;
use tracing::{
  debug,
  info,
};

use crate::{
  capabilities::CapabilitySet,
  jsonrpc::{
    Id,
    Message,
    encode_frame,
  },
};

/// `window/showMessage` severity levels.
pub mod message_types {
  pub const ERROR: u8 = 1;
  pub const WARNING: u8 = 2;
  pub const INFO: u8 = 3;
  pub const LOG: u8 = 4;
}

/// Signals the transport loop selects over: output was queued, or the host
/// transitioned to the stopped state (sent exactly once per transition).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
  OutputReady,
  Stopped,
}

pub type ResponseCallback = Box<dyn FnOnce(Option<Value>) + Send>;

/// A request this host sent to the client, awaiting the matching response.
struct PendingRequest {
  id:       u64,
  callback: Option<ResponseCallback>,
}

#[derive(Debug, Error)]
pub enum HostError {
  #[error("failed to serialize outbound message: {0}")]
  Serialize(#[from] serde_json::Error),
}

/// Shared protocol-host state: run lifecycle, cancellation bookkeeping, the
/// outbound byte queue, pending outgoing requests, and dynamic capability
/// registration.
///
/// Three independent locks guard three independent pieces of state (the
/// cancellation set, the outbound buffer, the capability bookkeeping); none
/// of them is ever held across a handler invocation, so a slow handler can
/// never starve queue draining.
pub struct Host {
  running:         Mutex<bool>,
  cancelled:       Mutex<HashSet<Id>>,
  outbound:        Mutex<Vec<u8>>,
  capabilities:    Mutex<CapabilitySet>,
  pending:         Mutex<HashMap<u64, PendingRequest>>,
  next_request_id: AtomicU64,
  events:          Sender<HostEvent>,
}

impl Host {
  /// Creates a stopped host plus the receiving end of its event channel.
  pub fn new() -> (Self, Receiver<HostEvent>) {
    let (events, events_rx) = channel();
    let host = Self {
      running: Mutex::new(false),
      cancelled: Mutex::new(HashSet::new()),
      outbound: Mutex::new(Vec::new()),
      capabilities: Mutex::new(CapabilitySet::default()),
      pending: Mutex::new(HashMap::new()),
      next_request_id: AtomicU64::new(0),
      events,
    };
    (host, events_rx)
  }

  /// Transitions Stopped -> Running. A no-op when already running.
  pub fn start(&self) {
    let mut running = self.running.lock();
    *running = true;
  }

  /// Transitions Running -> Stopped, emitting the terminal event exactly
  /// once per transition.
  pub fn stop(&self) {
    let mut running = self.running.lock();
    if !*running {
      return;
    }
    *running = false;
    drop(running);
    let _ = self.events.send(HostEvent::Stopped);
  }

  pub fn is_stopped(&self) -> bool {
    !*self.running.lock()
  }

  /// Marks a request id as cancelled. Cancellation is cooperative and
  /// advisory: in-flight work keeps running until it checks for itself.
  pub fn cancel(&self, id: Id) {
    self.cancelled.lock().insert(id);
  }

  pub fn is_cancelled(&self, id: &Id) -> bool {
    self.cancelled.lock().contains(id)
  }

  pub fn clear(&self, id: &Id) {
    self.cancelled.lock().remove(id);
  }

  /// Atomically swaps the outbound buffer for an empty one and returns the
  /// previous contents. This is the only way bytes leave the host.
  pub fn flush(&self) -> Vec<u8> {
    std::mem::take(&mut *self.outbound.lock())
  }

  pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), HostError> {
    let frame = encode_frame(&Message::notification(method, params))?;
    self.queue(frame);
    info!("server sent {method}");
    Ok(())
  }

  /// Sends a request to the client. Ids increase strictly from 0; the
  /// optional callback runs when the matching response arrives.
  pub fn send_request(
    &self,
    method: &str,
    params: Option<Value>,
    callback: Option<ResponseCallback>,
  ) -> Result<u64, HostError> {
    let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
    let frame = encode_frame(&Message::request(id, method, params))?;
    self
      .pending
      .lock()
      .insert(id, PendingRequest { id, callback });
    self.queue(frame);
    info!("server sent {method} (id {id})");
    Ok(id)
  }

  /// Resolves a response from the client against the pending request
  /// bookkeeping. Responses to unknown ids are silently ignored.
  pub fn resolve_response(&self, id: &Id, result: Option<Value>) {
    let entry = match id {
      Id::Number(id) => self.pending.lock().remove(id),
      Id::Null | Id::String(_) => None,
    };
    match entry {
      Some(request) => {
        debug!("response received for request {}", request.id);
        if let Some(callback) = request.callback {
          callback(result);
        }
      },
      None => debug!("ignoring response to unknown request id {id:?}"),
    }
  }

  pub fn reply_result(&self, id: Id, result: Value) -> Result<(), HostError> {
    self.reply(Message::response_ok(id, result))
  }

  pub fn reply_error(&self, id: Id, code: i64, message: impl Into<String>) -> Result<(), HostError> {
    self.reply(Message::response_err(id, code, message))
  }

  /// Ids of requests sent to the client that are still awaiting a response.
  pub fn pending_request_ids(&self) -> Vec<u64> {
    self.pending.lock().keys().copied().collect()
  }

  /// Flags a method the client negotiated as dynamically registrable.
  pub fn allow_registration(&self, method: impl Into<String>) {
    self.capabilities.lock().allow(method);
  }

  /// Registers the given methods with the client, skipping anything not
  /// flagged for dynamic registration or already registered. Sends exactly
  /// one batched request when anything qualifies, nothing otherwise.
  pub fn register_capabilities(&self, methods: &[&str]) -> Result<(), HostError> {
    debug!("registering capabilities: {methods:?}");
    let registrations = self.capabilities.lock().begin_registrations(methods);
    if registrations.is_empty() {
      return Ok(());
    }
    self.send_request(
      "client/registerCapability",
      Some(json!({ "registrations": registrations })),
      None,
    )?;
    Ok(())
  }

  /// Mirror of `register_capabilities`.
  pub fn unregister_capabilities(&self, methods: &[&str]) -> Result<(), HostError> {
    debug!("unregistering capabilities: {methods:?}");
    let unregistrations = self.capabilities.lock().begin_unregistrations(methods);
    if unregistrations.is_empty() {
      return Ok(());
    }
    self.send_request(
      "client/unregisterCapability",
      Some(json!({ "unregisterations": unregistrations })),
      None,
    )?;
    Ok(())
  }

  /// Shows a message in the client's UI.
  pub fn show_message(&self, text: &str, message_type: u8) -> Result<(), HostError> {
    self.send_notification(
      "window/showMessage",
      Some(json!({ "type": message_type, "message": text })),
    )
  }

  /// Shows a message with response options; the callback receives the
  /// action the user picked.
  pub fn show_message_request(
    &self,
    text: &str,
    message_type: u8,
    actions: &[&str],
    callback: ResponseCallback,
  ) -> Result<u64, HostError> {
    self.send_request(
      "window/showMessageRequest",
      Some(json!({ "type": message_type, "message": text, "actions": actions })),
      Some(callback),
    )
  }

  fn reply(&self, message: Message) -> Result<(), HostError> {
    let id = message.id().cloned();
    let frame = encode_frame(&message)?;
    self.queue(frame);
    if let Some(id) = id {
      self.clear(&id);
    }
    Ok(())
  }

  fn queue(&self, frame: Vec<u8>) {
    self.outbound.lock().extend_from_slice(&frame);
    let _ = self.events.send(HostEvent::OutputReady);
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    Arc,
    atomic::AtomicBool,
  };

  use super::*;

  #[test]
  fn stop_signals_exactly_once_per_transition() {
    let (host, events) = Host::new();
    host.start();
    host.start();
    assert!(!host.is_stopped());

    host.stop();
    host.stop();
    assert!(host.is_stopped());

    assert_eq!(events.try_recv(), Ok(HostEvent::Stopped));
    assert!(events.try_recv().is_err());

    host.start();
    host.stop();
    assert_eq!(events.try_recv(), Ok(HostEvent::Stopped));
  }

  #[test]
  fn flush_drains_the_outbound_buffer() {
    let (host, events) = Host::new();
    host.send_notification("window/logMessage", None).unwrap();

    assert_eq!(events.try_recv(), Ok(HostEvent::OutputReady));
    let bytes = host.flush();
    assert!(!bytes.is_empty());
    assert!(host.flush().is_empty());

    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("Content-Length: "));
    assert!(text.contains("window/logMessage"));
  }

  #[test]
  fn outgoing_request_ids_increase_from_zero() {
    let (host, _events) = Host::new();
    assert_eq!(host.send_request("a", None, None).unwrap(), 0);
    assert_eq!(host.send_request("b", None, None).unwrap(), 1);
    let mut pending = host.pending_request_ids();
    pending.sort_unstable();
    assert_eq!(pending, vec![0, 1]);
  }

  #[test]
  fn responses_resolve_pending_callbacks() {
    let (host, _events) = Host::new();
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    host
      .send_request(
        "window/showMessageRequest",
        None,
        Some(Box::new(move |result| {
          assert_eq!(result, Some(json!({ "title": "ok" })));
          flag.store(true, Ordering::SeqCst);
        })),
      )
      .unwrap();

    host.resolve_response(&Id::Number(0), Some(json!({ "title": "ok" })));
    assert!(called.load(Ordering::SeqCst));
    assert!(host.pending_request_ids().is_empty());

    // A second response to the same id is silently ignored.
    host.resolve_response(&Id::Number(0), None);
  }

  #[test]
  fn cancellation_marks_are_cleared_by_replies() {
    let (host, _events) = Host::new();
    host.cancel(Id::Number(9));
    assert!(host.is_cancelled(&Id::Number(9)));

    host.reply_result(Id::Number(9), json!(null)).unwrap();
    assert!(!host.is_cancelled(&Id::Number(9)));
  }

  #[test]
  fn show_message_request_routes_the_chosen_action() {
    let (host, _events) = Host::new();
    let chosen = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&chosen);
    let id = host
      .show_message_request(
        "update available",
        message_types::INFO,
        &["Update", "Ignore"],
        Box::new(move |result| {
          assert_eq!(result, Some(json!("Update")));
          flag.store(true, Ordering::SeqCst);
        }),
      )
      .unwrap();

    host.resolve_response(&Id::Number(id), Some(json!("Update")));
    assert!(chosen.load(Ordering::SeqCst));
  }

  #[test]
  fn duplicate_registration_sends_one_request() {
    let (host, _events) = Host::new();
    host.allow_registration("textDocument/completion");

    host.register_capabilities(&["textDocument/completion"]).unwrap();
    host.register_capabilities(&["textDocument/completion"]).unwrap();

    let text = String::from_utf8(host.flush()).unwrap();
    assert_eq!(text.matches("client/registerCapability").count(), 1);
    assert_eq!(text.matches("textDocument/completion").count(), 2); // id + method
  }

  #[test]
  fn unregistering_without_registration_sends_nothing() {
    let (host, _events) = Host::new();
    host.allow_registration("textDocument/completion");
    host.unregister_capabilities(&["textDocument/completion"]).unwrap();
    assert!(host.flush().is_empty());

    host.register_capabilities(&["textDocument/completion"]).unwrap();
    host.unregister_capabilities(&["textDocument/completion"]).unwrap();
    let text = String::from_utf8(host.flush()).unwrap();
    assert_eq!(text.matches("client/unregisterCapability").count(), 1);
  }
}
