use std::{
  collections::HashMap,
  sync::Arc,
};

use serde_json::Value;
use thiserror::Error;
use tracing::{
  debug,
  info,
  warn,
};

use crate::{
  host::{
    Host,
    HostError,
  },
  jsonrpc::{
    Id,
    Message,
    error_codes,
  },
};

/// Maps a wire method name onto the internal handler name registered in a
/// [`MethodTable`].
///
/// The bare initialization keyword gets a dedicated name so it cannot be
/// confused with a constructor; any other single segment maps to itself; a
/// `$`-prefixed two-segment method folds to an underscore-prefixed form of
/// its suffix; any other two-segment method folds both segments; anything
/// else has no handler.
pub fn resolve_method_name(method: &str) -> Option<String> {
  let segments: Vec<&str> = method.split('/').collect();
  match segments.as_slice() {
    ["initialize"] => Some("lsp_initialize".to_string()),
    [name] => Some((*name).to_string()),
    ["$", suffix] => Some(format!("_{}", snake_fold(suffix))),
    [base, suffix] => Some(format!("{}_{}", snake_fold(base), snake_fold(suffix))),
    _ => None,
  }
}

// Inserts an underscore before every uppercase letter and lowercases it:
// didOpen -> did_open.
fn snake_fold(name: &str) -> String {
  let mut out = String::with_capacity(name.len() + 4);
  for c in name.chars() {
    if c.is_ascii_uppercase() {
      out.push('_');
      out.push(c.to_ascii_lowercase());
    } else {
      out.push(c);
    }
  }
  out
}

/// Anything that can go wrong inside a handler. Every variant carries a
/// stable classification label for the log line and the error reply.
#[derive(Debug, Error)]
pub enum HandlerError {
  #[error("missing params")]
  MissingParams,
  #[error("invalid params: {0}")]
  InvalidParams(#[from] serde_json::Error),
  #[error(transparent)]
  Text(#[from] sig_text::TextError),
  #[error(transparent)]
  Session(#[from] crate::session::SessionError),
  #[error(transparent)]
  Host(#[from] HostError),
  #[error("{0}")]
  Other(String),
}

impl HandlerError {
  pub fn classification(&self) -> &'static str {
    match self {
      Self::MissingParams => "missing_params",
      Self::InvalidParams(_) => "invalid_params",
      Self::Text(_) => "text",
      Self::Session(_) => "session",
      Self::Host(_) => "host",
      Self::Other(_) => "internal",
    }
  }
}

pub type HandlerResult = Result<Option<Value>, HandlerError>;

/// A statically known handler: it gets the service state, the host handle
/// for outbound traffic, and the raw params. Returning `Ok(None)` sends
/// nothing back.
pub type HandlerFn<S> = fn(&mut S, &Host, Option<Value>) -> HandlerResult;

/// The explicit, finite method mapping, built once at startup. Unknown
/// names fail resolution at the same point a reflective lookup would have.
pub struct MethodTable<S> {
  handlers: HashMap<&'static str, HandlerFn<S>>,
}

impl<S> MethodTable<S> {
  pub fn new() -> Self {
    Self {
      handlers: HashMap::new(),
    }
  }

  pub fn register(&mut self, name: &'static str, handler: HandlerFn<S>) {
    self.handlers.insert(name, handler);
  }

  pub fn get(&self, name: &str) -> Option<HandlerFn<S>> {
    self.handlers.get(name).copied()
  }
}

impl<S> Default for MethodTable<S> {
  fn default() -> Self {
    Self::new()
  }
}

/// Drives one service: triages each decoded message, invokes the resolved
/// handler, and routes results, faults, and client responses. Handler
/// faults are caught and answered; they never stop the host.
pub struct Dispatcher<S> {
  host:    Arc<Host>,
  table:   MethodTable<S>,
  service: S,
}

impl<S> Dispatcher<S> {
  pub fn new(host: Arc<Host>, table: MethodTable<S>, service: S) -> Self {
    Self {
      host,
      table,
      service,
    }
  }

  pub fn host(&self) -> &Arc<Host> {
    &self.host
  }

  pub fn service(&self) -> &S {
    &self.service
  }

  pub fn receive(&mut self, message: Message) {
    match message {
      Message::Request(request) => {
        self.dispatch(&request.method, Some(request.id), request.params);
      },
      Message::Notification(notification) => {
        self.dispatch(&notification.method, None, notification.params);
      },
      Message::Response(response) => {
        self.host.resolve_response(&response.id, response.result);
      },
    }
  }

  fn dispatch(&mut self, method: &str, id: Option<Id>, params: Option<Value>) {
    let handler = resolve_method_name(method).and_then(|name| self.table.get(&name));
    let Some(handler) = handler else {
      // Best-effort "$/" notifications are dropped without a reply.
      if !method.starts_with("$/") {
        warn!("method not found: {method}");
        self.queue_reply_error(
          id.unwrap_or(Id::Null),
          error_codes::METHOD_NOT_FOUND,
          format!("Method not found: {method}"),
        );
      } else {
        debug!("ignoring unhandled notification {method}");
      }
      return;
    };

    info!("server received {method}");
    match handler(&mut self.service, &self.host, params) {
      Ok(result) => {
        if let (Some(id), Some(result)) = (id, result)
          && let Err(err) = self.host.reply_result(id, result)
        {
          warn!("failed to queue result for {method}: {err}");
        }
      },
      Err(err) => {
        warn!(
          "error processing {method}: [{}] {err}",
          err.classification()
        );
        if let Some(id) = id {
          self.queue_reply_error(
            id,
            error_codes::INTERNAL_ERROR,
            format!("[{}] {err}", err.classification()),
          );
        }
      },
    }
  }

  fn queue_reply_error(&self, id: Id, code: i64, message: String) {
    if let Err(err) = self.host.reply_error(id, code, message) {
      warn!("failed to queue error reply: {err}");
    }
  }
}

#[cfg(test)]
mod test {
  use serde_json::json;

  use super::*;

  #[test]
  fn wire_methods_map_to_handler_names() {
    let cases = [
      ("initialize", Some("lsp_initialize")),
      ("shutdown", Some("shutdown")),
      ("exit", Some("exit")),
      ("textDocument/didOpen", Some("text_document_did_open")),
      ("textDocument/completion", Some("text_document_completion")),
      ("$/cancel", Some("_cancel")),
      ("$/cancelRequest", Some("_cancel_request")),
      (
        "workspace/didChangeConfiguration",
        Some("workspace_did_change_configuration"),
      ),
      ("a/b/c", None),
    ];
    for (wire, expected) in cases {
      assert_eq!(resolve_method_name(wire).as_deref(), expected, "for {wire}");
    }
  }

  #[derive(Default)]
  struct TestService {
    calls: usize,
  }

  fn echo(service: &mut TestService, _host: &Host, params: Option<Value>) -> HandlerResult {
    service.calls += 1;
    Ok(params)
  }

  fn quiet(service: &mut TestService, _host: &Host, _params: Option<Value>) -> HandlerResult {
    service.calls += 1;
    Ok(None)
  }

  fn boom(_service: &mut TestService, _host: &Host, _params: Option<Value>) -> HandlerResult {
    Err(HandlerError::Other("kaboom".to_string()))
  }

  fn test_dispatcher() -> Dispatcher<TestService> {
    let (host, _events) = Host::new();
    host.start();
    let mut table = MethodTable::new();
    table.register("echo", echo);
    table.register("quiet", quiet);
    table.register("boom", boom);
    Dispatcher::new(Arc::new(host), table, TestService::default())
  }

  fn flushed_bodies(host: &Host) -> Vec<Value> {
    let text = String::from_utf8(host.flush()).unwrap();
    text
      .split("Content-Length:")
      .filter_map(|part| part.split_once("\r\n\r\n"))
      .map(|(_, body)| serde_json::from_str(body).unwrap())
      .collect()
  }

  #[test]
  fn requests_get_their_result_replied() {
    let mut dispatcher = test_dispatcher();
    dispatcher.receive(Message::request(1, "echo", Some(json!({ "x": 1 }))));

    let bodies = flushed_bodies(dispatcher.host());
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["id"], json!(1));
    assert_eq!(bodies[0]["result"], json!({ "x": 1 }));
  }

  #[test]
  fn notifications_and_resultless_handlers_stay_silent() {
    let mut dispatcher = test_dispatcher();
    dispatcher.receive(Message::notification("echo", Some(json!({ "x": 1 }))));
    dispatcher.receive(Message::request(2, "quiet", None));

    assert!(dispatcher.host().flush().is_empty());
    assert_eq!(dispatcher.service().calls, 2);
  }

  #[test]
  fn handler_faults_reply_once_and_keep_the_host_running() {
    let mut dispatcher = test_dispatcher();
    dispatcher.receive(Message::request(7, "boom", None));

    assert!(!dispatcher.host().is_stopped());
    let bodies = flushed_bodies(dispatcher.host());
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["id"], json!(7));
    assert_eq!(bodies[0]["error"]["code"], json!(error_codes::INTERNAL_ERROR));
    assert!(
      bodies[0]["error"]["message"]
        .as_str()
        .unwrap()
        .contains("kaboom")
    );

    // A faulting notification logs but replies to no one.
    dispatcher.receive(Message::notification("boom", None));
    assert!(dispatcher.host().flush().is_empty());
  }

  #[test]
  fn unknown_methods_are_answered_unless_best_effort() {
    let mut dispatcher = test_dispatcher();
    dispatcher.receive(Message::request(3, "textDocument/hover", None));

    let bodies = flushed_bodies(dispatcher.host());
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["error"]["code"], json!(error_codes::METHOD_NOT_FOUND));

    dispatcher.receive(Message::notification("$/unknownThing", None));
    assert!(dispatcher.host().flush().is_empty());
  }

  #[test]
  fn client_responses_resolve_pending_requests() {
    let mut dispatcher = test_dispatcher();
    dispatcher
      .host()
      .send_request("window/showMessageRequest", None, None)
      .unwrap();
    dispatcher.host().flush();

    dispatcher.receive(
      serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 0, "result": null })).unwrap(),
    );
    assert!(dispatcher.host().pending_request_ids().is_empty());
  }
}
