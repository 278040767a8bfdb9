use std::sync::Arc;

use serde::Deserialize;
use serde_json::{
  Value,
  json,
};
use tracing::{
  debug,
  info,
};

use crate::{
  analysis::{
    MethodScanner,
    SyntaxAnalyzer,
  },
  capabilities::{
    dynamic_registration_methods,
    server_capabilities,
  },
  completion::{
    CompletionParams,
    completion,
  },
  config::ServerConfig,
  dispatch::{
    HandlerError,
    HandlerResult,
    MethodTable,
  },
  host::Host,
  jsonrpc::Id,
  session::{
    DidChangeParams,
    DidCloseParams,
    DidOpenParams,
    DocumentSession,
  },
};

pub const SERVER_NAME: &str = "sigscribe";

/// The concrete language service: open documents, the syntax analyzer, and
/// the server configuration. Handlers live in the method table built by
/// [`SigService::method_table`].
pub struct SigService {
  session:  DocumentSession,
  analyzer: Arc<dyn SyntaxAnalyzer>,
  config:   ServerConfig,
}

impl SigService {
  pub fn new(analyzer: Arc<dyn SyntaxAnalyzer>) -> Self {
    Self {
      session: DocumentSession::new(),
      analyzer,
      config: ServerConfig::default(),
    }
  }

  /// A service backed by the built-in method scanner.
  pub fn with_default_analyzer() -> Self {
    Self::new(Arc::new(MethodScanner))
  }

  pub fn session(&self) -> &DocumentSession {
    &self.session
  }

  pub fn config(&self) -> &ServerConfig {
    &self.config
  }

  /// The full editor-protocol surface, mapped once at startup.
  pub fn method_table() -> MethodTable<SigService> {
    let mut table = MethodTable::new();
    table.register("lsp_initialize", lsp_initialize);
    table.register("initialized", initialized);
    table.register("shutdown", shutdown);
    table.register("exit", exit);
    table.register("_cancel_request", cancel_request);
    table.register("text_document_did_open", text_document_did_open);
    table.register("text_document_did_close", text_document_did_close);
    table.register("text_document_did_change", text_document_did_change);
    table.register("text_document_completion", text_document_completion);
    table.register(
      "workspace_did_change_configuration",
      workspace_did_change_configuration,
    );
    table
  }
}

fn parse<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, HandlerError> {
  let params = params.ok_or(HandlerError::MissingParams)?;
  Ok(serde_json::from_value(params)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
  #[serde(default)]
  capabilities: Value,
  #[serde(default)]
  initialization_options: Option<Value>,
}

fn lsp_initialize(service: &mut SigService, host: &Host, params: Option<Value>) -> HandlerResult {
  let params: InitializeParams = parse(params)?;

  for method in dynamic_registration_methods(&params.capabilities) {
    host.allow_registration(method);
  }
  if let Some(options) = &params.initialization_options {
    service.config.merge(options);
  }

  Ok(Some(json!({
    "capabilities": server_capabilities(),
    "serverInfo": {
      "name": SERVER_NAME,
      "version": env!("CARGO_PKG_VERSION"),
    },
  })))
}

fn initialized(_service: &mut SigService, host: &Host, _params: Option<Value>) -> HandlerResult {
  host.register_capabilities(&["textDocument/completion"])?;
  Ok(None)
}

fn shutdown(_service: &mut SigService, _host: &Host, _params: Option<Value>) -> HandlerResult {
  debug!("shutdown requested");
  Ok(None)
}

fn exit(_service: &mut SigService, host: &Host, _params: Option<Value>) -> HandlerResult {
  info!("exit received, stopping host");
  host.stop();
  Ok(None)
}

#[derive(Debug, Deserialize)]
struct CancelParams {
  id: Id,
}

fn cancel_request(_service: &mut SigService, host: &Host, params: Option<Value>) -> HandlerResult {
  let params: CancelParams = parse(params)?;
  host.cancel(params.id);
  Ok(None)
}

fn text_document_did_open(
  service: &mut SigService,
  _host: &Host,
  params: Option<Value>,
) -> HandlerResult {
  let params: DidOpenParams = parse(params)?;
  let document = params.text_document;
  debug!("opening {} ({})", document.uri, document.language_id);
  service.session.open(&document.uri, &document.text);
  Ok(None)
}

fn text_document_did_close(
  service: &mut SigService,
  _host: &Host,
  params: Option<Value>,
) -> HandlerResult {
  let params: DidCloseParams = parse(params)?;
  service.session.close(&params.text_document.uri);
  Ok(None)
}

fn text_document_did_change(
  service: &mut SigService,
  _host: &Host,
  params: Option<Value>,
) -> HandlerResult {
  let params: DidChangeParams = parse(params)?;
  service.session.apply_changes(
    &params.text_document.uri,
    params.text_document.version,
    &params.content_changes,
  )?;
  Ok(None)
}

fn text_document_completion(
  service: &mut SigService,
  _host: &Host,
  params: Option<Value>,
) -> HandlerResult {
  let params: CompletionParams = parse(params)?;
  let list = completion(
    &service.session,
    service.analyzer.as_ref(),
    &params.text_document.uri,
    params.position,
  );
  Ok(Some(serde_json::to_value(list)?))
}

#[derive(Debug, Deserialize)]
struct DidChangeConfigurationParams {
  #[serde(default)]
  settings: Value,
}

fn workspace_did_change_configuration(
  service: &mut SigService,
  _host: &Host,
  params: Option<Value>,
) -> HandlerResult {
  let params: DidChangeConfigurationParams = parse(params)?;
  service.config.merge(&params.settings);
  debug!("configuration updated: {:?}", service.config);
  Ok(None)
}
