use serde::{
  Deserialize,
  Serialize,
};
use serde_json::Value;
use tracing::warn;

/// Server options, overlaid from the client's `initializationOptions` and
/// from `workspace/didChangeConfiguration` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
  pub completion:  bool,
  pub hover:       bool,
  pub symbols:     bool,
  pub definitions: bool,
  pub rename:      bool,
  pub references:  bool,
  pub autoformat:  bool,
  pub diagnostics: bool,
  pub formatting:  bool,
  pub folding:     bool,
  pub log_level:   String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      completion:  true,
      hover:       true,
      symbols:     true,
      definitions: true,
      rename:      true,
      references:  true,
      autoformat:  false,
      diagnostics: false,
      formatting:  false,
      folding:     true,
      log_level:   "warn".to_string(),
    }
  }
}

impl ServerConfig {
  /// Overlays the keys present in `update` onto the current values; keys
  /// that are absent keep their value, unknown keys are ignored.
  pub fn merge(&mut self, update: &Value) {
    let Some(update) = update.as_object() else {
      return;
    };
    let Ok(Value::Object(mut current)) = serde_json::to_value(&*self) else {
      return;
    };
    for (key, value) in update {
      current.insert(key.clone(), value.clone());
    }
    match serde_json::from_value(Value::Object(current)) {
      Ok(merged) => *self = merged,
      Err(err) => warn!("ignoring malformed configuration update: {err}"),
    }
  }
}
