mod analysis;
mod capabilities;
mod completion;
mod config;
mod dispatch;
mod host;
pub mod jsonrpc;
mod service;
mod session;
mod transport;

pub use analysis::{
  MethodDefinition,
  MethodScanner,
  ParsedDocument,
  SyntaxAnalyzer,
};
pub use capabilities::{
  CapabilitySet,
  dynamic_registration_methods,
  server_capabilities,
};
pub use completion::{
  CompletionItem,
  CompletionList,
  completion,
};
pub use config::ServerConfig;
pub use dispatch::{
  Dispatcher,
  HandlerError,
  HandlerFn,
  HandlerResult,
  MethodTable,
  resolve_method_name,
};
pub use host::{
  Host,
  HostError,
  HostEvent,
  ResponseCallback,
  message_types,
};
pub use service::{
  SERVER_NAME,
  SigService,
};
pub use session::{
  DocumentSession,
  LspPosition,
  LspRange,
  SessionError,
  offset_to_position,
  position_to_offset,
};
pub use transport::{
  TransportError,
  serve,
  serve_stdio,
  serve_tcp,
};
