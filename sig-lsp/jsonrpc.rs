use serde::{
  Deserialize,
  Serialize,
};
use serde_json::Value;

/// Standard JSON-RPC error codes this server actually emits.
pub mod error_codes {
  pub const PARSE_ERROR: i64 = -32700;
  pub const INVALID_REQUEST: i64 = -32600;
  pub const METHOD_NOT_FOUND: i64 = -32601;
  pub const INVALID_PARAMS: i64 = -32602;
  pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
  #[default]
  #[serde(rename = "2.0")]
  V2,
}

/// A request id. The protocol allows numbers and strings; `Null` shows up in
/// error replies to messages whose id could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
  Null,
  Number(u64),
  String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  #[serde(default)]
  pub jsonrpc: Version,
  pub id:      Id,
  pub method:  String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params:  Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  #[serde(default)]
  pub jsonrpc: Version,
  pub method:  String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params:  Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
  pub code:    i64,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data:    Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
  #[serde(default)]
  pub jsonrpc: Version,
  pub id:      Id,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result:  Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:   Option<ResponseError>,
}

/// Any decoded protocol message. Requests carry an id, notifications do not,
/// responses answer a request the server previously sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
  Request(Request),
  Notification(Notification),
  Response(Response),
}

impl Message {
  pub fn request(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
    Self::Request(Request {
      jsonrpc: Version::V2,
      id: Id::Number(id),
      method: method.into(),
      params,
    })
  }

  pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
    Self::Notification(Notification {
      jsonrpc: Version::V2,
      method: method.into(),
      params,
    })
  }

  pub fn response_ok(id: Id, result: Value) -> Self {
    Self::Response(Response {
      jsonrpc: Version::V2,
      id,
      result: Some(result),
      error: None,
    })
  }

  pub fn response_err(id: Id, code: i64, message: impl Into<String>) -> Self {
    Self::Response(Response {
      jsonrpc: Version::V2,
      id,
      result: None,
      error: Some(ResponseError {
        code,
        message: message.into(),
        data: None,
      }),
    })
  }

  pub fn method(&self) -> Option<&str> {
    match self {
      Self::Request(request) => Some(&request.method),
      Self::Notification(notification) => Some(&notification.method),
      Self::Response(_) => None,
    }
  }

  pub fn id(&self) -> Option<&Id> {
    match self {
      Self::Request(request) => Some(&request.id),
      Self::Response(response) => Some(&response.id),
      Self::Notification(_) => None,
    }
  }
}

/// Serializes a message into the length-prefixed envelope the transport
/// writes to the wire.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
  let body = serde_json::to_vec(message)?;
  let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
  frame.extend_from_slice(&body);
  Ok(frame)
}

#[cfg(test)]
mod test {
  use serde_json::json;

  use super::*;

  #[test]
  fn messages_triage_by_shape() {
    let request: Message =
      serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "shutdown"})).unwrap();
    assert!(matches!(request, Message::Request(_)));

    let notification: Message =
      serde_json::from_value(json!({"jsonrpc": "2.0", "method": "exit"})).unwrap();
    assert!(matches!(notification, Message::Notification(_)));

    let response: Message =
      serde_json::from_value(json!({"jsonrpc": "2.0", "id": 0, "result": {"ok": true}})).unwrap();
    assert!(matches!(response, Message::Response(_)));
  }

  #[test]
  fn frames_carry_the_body_length() {
    let frame = encode_frame(&Message::notification("exit", None)).unwrap();
    let text = String::from_utf8(frame).unwrap();
    let (header, body) = text.split_once("\r\n\r\n").unwrap();
    assert_eq!(header, format!("Content-Length: {}", body.len()));
    assert!(body.contains("\"exit\""));
  }

  #[test]
  fn error_replies_serialize_without_result() {
    let reply = Message::response_err(Id::Number(3), error_codes::METHOD_NOT_FOUND, "nope");
    let value = serde_json::to_value(&reply).unwrap();
    assert_eq!(value["error"]["code"], json!(-32601));
    assert!(value.get("result").is_none());
  }
}
