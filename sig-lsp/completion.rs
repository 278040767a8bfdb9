use serde::{
  Deserialize,
  Serialize,
};

use crate::{
  analysis::{
    MethodDefinition,
    ParsedDocument,
    SyntaxAnalyzer,
  },
  session::{
    DocumentIdentifier,
    DocumentSession,
    LspPosition,
  },
};

// CompletionItemKind.TypeParameter and InsertTextFormat.Snippet.
const ITEM_KIND: u8 = 25;
const SNIPPET_FORMAT: u8 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionParams {
  pub text_document: DocumentIdentifier,
  pub position:      LspPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
  pub label:              String,
  pub kind:               u8,
  pub insert_text:        String,
  pub insert_text_format: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionList {
  pub is_incomplete: bool,
  pub items: Vec<CompletionItem>,
}

impl CompletionList {
  pub fn empty() -> Self {
    Self {
      is_incomplete: false,
      items: Vec::new(),
    }
  }
}

/// Answers a completion query by synthesizing a signature stub for the
/// method defined on the line immediately following the cursor.
///
/// An unopened document, an unparsable snapshot, a line with no definition
/// under it, or a stub with nothing to say all yield the empty list — a
/// soft miss, never an error.
pub fn completion(
  session: &DocumentSession,
  analyzer: &dyn SyntaxAnalyzer,
  uri: &str,
  position: LspPosition,
) -> CompletionList {
  let Some(snapshot) = session.snapshot(uri) else {
    return CompletionList::empty();
  };

  let parsed = ParsedDocument::from_snapshot(analyzer, &snapshot);
  if !parsed.is_valid() {
    return CompletionList::empty();
  }

  // The editor reports 0-based lines, definitions are anchored 1-based.
  let Some(method) = parsed.definition_after_line(position.line as usize + 1) else {
    return CompletionList::empty();
  };

  let insert_text = insertion_text_for(method);
  if insert_text.is_empty() {
    return CompletionList::empty();
  }

  CompletionList {
    is_incomplete: false,
    items: vec![CompletionItem {
      label: label_for(method),
      kind: ITEM_KIND,
      insert_text,
      insert_text_format: SNIPPET_FORMAT,
    }],
  }
}

/// `(foo: ?, bar: ?) ⭢ void` — the human-readable summary of parameters
/// and inferred return classification.
fn label_for(method: &MethodDefinition) -> String {
  let params_part = method
    .params()
    .iter()
    .map(|name| format!("{name}: ?"))
    .collect::<Vec<_>>()
    .join(", ");
  let returns_part = method.returns().unwrap_or("?");
  format!("({params_part}) ⭢ {returns_part}")
}

/// The insertable snippet: every parameter as a numbered placeholder, then
/// a void marker or a returns-clause depending on the classification.
fn insertion_text_for(method: &MethodDefinition) -> String {
  let params_part = if method.has_params() {
    let list = method
      .params()
      .iter()
      .enumerate()
      .map(|(index, name)| format!("{name}: ${}", index + 1))
      .collect::<Vec<_>>()
      .join(", ");
    format!("params({list})")
  } else {
    String::new()
  };

  if method.is_void() {
    format!("{params_part}.void")
  } else if let Some(returns) = method.returns() {
    format!("{params_part}.returns({returns})")
  } else {
    params_part
  }
}
