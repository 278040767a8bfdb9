use std::collections::HashSet;

use serde::Serialize;
use serde_json::{
  Value,
  json,
};

/// The editor-protocol methods a client may flag for dynamic registration
/// during the initialization handshake, by capability section.
const DYNAMIC_METHODS: &[(&str, &[&str])] = &[
  (
    "textDocument",
    &[
      "completion",
      "signatureHelp",
      "onTypeFormatting",
      "hover",
      "formatting",
      "documentSymbol",
      "definition",
      "rename",
      "references",
      "foldingRange",
      "codeAction",
    ],
  ),
  ("workspace", &["symbol"]),
];

/// One entry of a `client/registerCapability` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
  pub id:               String,
  pub method:           String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub register_options: Option<Value>,
}

/// One entry of a `client/unregisterCapability` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Unregistration {
  pub id:     String,
  pub method: String,
}

/// Tracks which methods the client allows us to register dynamically and
/// which of those are currently registered.
///
/// A method is only ever part of a registration request when the client
/// flagged it as dynamically registrable and it is not registered yet;
/// registering adds it to the registered set, unregistering removes it.
#[derive(Debug, Default)]
pub struct CapabilitySet {
  dynamic:    HashSet<String>,
  registered: HashSet<String>,
}

impl CapabilitySet {
  /// Flags a method as available for dynamic registration.
  pub fn allow(&mut self, method: impl Into<String>) {
    self.dynamic.insert(method.into());
  }

  pub fn can_register(&self, method: &str) -> bool {
    self.dynamic.contains(method)
  }

  pub fn is_registered(&self, method: &str) -> bool {
    self.registered.contains(method)
  }

  /// Filters `methods` down to the registrable-and-unregistered ones, marks
  /// them registered, and returns their registration payloads. An empty
  /// result means there is nothing to send.
  pub fn begin_registrations(&mut self, methods: &[&str]) -> Vec<Registration> {
    let selected: Vec<&str> = methods
      .iter()
      .copied()
      .filter(|method| self.can_register(method) && !self.is_registered(method))
      .collect();
    selected
      .into_iter()
      .map(|method| {
        self.registered.insert(method.to_string());
        Registration {
          id:     method.to_string(),
          method: method.to_string(),
          register_options: register_options_for(method),
        }
      })
      .collect()
  }

  /// Mirror of `begin_registrations`: unmarks currently registered methods
  /// and returns their unregistration payloads.
  pub fn begin_unregistrations(&mut self, methods: &[&str]) -> Vec<Unregistration> {
    let selected: Vec<&str> = methods
      .iter()
      .copied()
      .filter(|method| self.is_registered(method))
      .collect();
    selected
      .into_iter()
      .map(|method| {
        self.registered.remove(method);
        Unregistration {
          id:     method.to_string(),
          method: method.to_string(),
        }
      })
      .collect()
  }
}

/// Walks the `initialize` capability payload and returns every method the
/// client flagged with `dynamicRegistration: true`.
pub fn dynamic_registration_methods(capabilities: &Value) -> Vec<String> {
  let mut methods = Vec::new();
  for (section, names) in DYNAMIC_METHODS {
    for name in *names {
      let flagged = capabilities
        .get(section)
        .and_then(|section| section.get(name))
        .and_then(|method| method.get("dynamicRegistration"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
      if flagged {
        methods.push(format!("{section}/{name}"));
      }
    }
  }
  methods
}

/// The capabilities declared up front in the initialization response:
/// open/close tracking with incremental change synchronization. Everything
/// else is registered dynamically.
pub fn server_capabilities() -> Value {
  json!({
    "textDocumentSync": {
      "openClose": true,
      "change": 2,
    },
  })
}

/// The fixed options payload sent along when a method is dynamically
/// registered.
fn register_options_for(method: &str) -> Option<Value> {
  match method {
    "textDocument/completion" => Some(json!({
      "resolveProvider": false,
      "triggerCharacters": ["{", "."],
    })),
    "textDocument/signatureHelp" => Some(json!({
      "triggerCharacters": ["(", ",", " "],
    })),
    "textDocument/onTypeFormatting" => Some(json!({
      "firstTriggerCharacter": "{",
      "moreTriggerCharacter": ["("],
    })),
    "textDocument/definition" => Some(json!({ "definitionProvider": true })),
    "textDocument/references" => Some(json!({ "referencesProvider": true })),
    "textDocument/rename" => Some(json!({ "renameProvider": true })),
    "textDocument/documentSymbol" => Some(json!({ "documentSymbolProvider": true })),
    "workspace/symbol" => Some(json!({ "workspaceSymbolProvider": true })),
    "textDocument/formatting" => Some(json!({ "formattingProvider": true })),
    "textDocument/foldingRange" => Some(json!({ "foldingRangeProvider": true })),
    "textDocument/codeAction" => Some(json!({ "codeActionProvider": true })),
    _ => None,
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn registration_requires_the_dynamic_flag() {
    let mut set = CapabilitySet::default();
    assert!(set.begin_registrations(&["textDocument/completion"]).is_empty());

    set.allow("textDocument/completion");
    let registrations = set.begin_registrations(&["textDocument/completion"]);
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].method, "textDocument/completion");
    assert!(registrations[0].register_options.is_some());
  }

  #[test]
  fn registering_twice_yields_one_registration() {
    let mut set = CapabilitySet::default();
    set.allow("textDocument/completion");

    assert_eq!(set.begin_registrations(&["textDocument/completion"]).len(), 1);
    assert!(set.begin_registrations(&["textDocument/completion"]).is_empty());
    assert!(set.is_registered("textDocument/completion"));
  }

  #[test]
  fn unregistering_an_unregistered_method_yields_nothing() {
    let mut set = CapabilitySet::default();
    set.allow("textDocument/completion");
    assert!(set.begin_unregistrations(&["textDocument/completion"]).is_empty());

    set.begin_registrations(&["textDocument/completion"]);
    let unregistrations = set.begin_unregistrations(&["textDocument/completion"]);
    assert_eq!(unregistrations.len(), 1);
    assert!(!set.is_registered("textDocument/completion"));
  }

  #[test]
  fn negotiation_scan_finds_flagged_methods() {
    let capabilities = serde_json::json!({
      "textDocument": {
        "completion": { "dynamicRegistration": true },
        "hover": { "dynamicRegistration": false },
        "rename": {},
      },
      "workspace": {
        "symbol": { "dynamicRegistration": true },
      },
    });

    let methods = dynamic_registration_methods(&capabilities);
    assert_eq!(methods, vec!["textDocument/completion", "workspace/symbol"]);
  }
}
