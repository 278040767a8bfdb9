use std::{
  collections::HashMap,
  path::PathBuf,
};

use serde::Deserialize;
use sig_text::{
  CharRange,
  Snapshot,
  TextChange,
  TextDocument,
  TextError,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LspPosition {
  pub line:      u32,
  pub character: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LspRange {
  pub start: LspPosition,
  pub end:   LspPosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
  pub uri:         String,
  pub language_id: String,
  pub version:     i32,
  pub text:        String,
}

#[derive(Debug, Deserialize)]
pub struct DocumentIdentifier {
  pub uri: String,
}

#[derive(Debug, Deserialize)]
pub struct VersionedDocumentIdentifier {
  pub uri:     String,
  pub version: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenParams {
  pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidCloseParams {
  pub text_document: DocumentIdentifier,
}

/// One incremental content change. A change without a range replaces the
/// whole document (the full-sync fallback the protocol allows).
#[derive(Debug, Deserialize)]
pub struct ContentChange {
  pub range: Option<LspRange>,
  pub text:  String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeParams {
  pub text_document:   VersionedDocumentIdentifier,
  pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
  #[error("position line {line} is out of range")]
  LineOutOfRange { line: u32 },
  #[error(transparent)]
  Text(#[from] TextError),
}

/// Maps open-document uris to their buffers and owns the open/close/change
/// lifecycle. Accessed only from the dispatch thread.
#[derive(Debug, Default)]
pub struct DocumentSession {
  documents: HashMap<String, TextDocument>,
}

impl DocumentSession {
  pub fn new() -> Self {
    Self::default()
  }

  /// Opens a document, overwriting any prior entry for the same uri.
  pub fn open(&mut self, uri: &str, text: &str) {
    let filepath = path_for_uri(uri);
    self
      .documents
      .insert(uri.to_string(), TextDocument::from_text(filepath, text));
  }

  /// Closes a document. A no-op when the uri is not open.
  pub fn close(&mut self, uri: &str) {
    self.documents.remove(uri);
  }

  pub fn is_open(&self, uri: &str) -> bool {
    self.documents.contains_key(uri)
  }

  pub fn open_count(&self) -> usize {
    self.documents.len()
  }

  pub fn snapshot(&self, uri: &str) -> Option<Snapshot> {
    self
      .documents
      .get(uri)
      .map(|document| document.buffer().current_snapshot())
  }

  /// Translates the editor's line/character change ranges into offsets
  /// against the document's current snapshot (before any of this batch is
  /// applied) and applies them as one atomic batch.
  ///
  /// Changes addressed to a uri that is not open are silently dropped.
  pub fn apply_changes(
    &mut self,
    uri: &str,
    version: i32,
    changes: &[ContentChange],
  ) -> Result<Option<Snapshot>, SessionError> {
    let Some(document) = self.documents.get_mut(uri) else {
      debug!("dropping change for unopened document {uri}");
      return Ok(None);
    };

    let snapshot = document.buffer().current_snapshot();
    let mut batch = Vec::with_capacity(changes.len());
    for change in changes {
      let range = match &change.range {
        Some(range) => CharRange::new(
          position_to_offset(&snapshot, range.start)?,
          position_to_offset(&snapshot, range.end)?,
        ),
        None => CharRange::up_to(snapshot.len()),
      };
      batch.push(TextChange::new(range, change.text.clone()));
    }

    let applied = document.buffer_mut().apply_changes(batch)?;
    debug!(
      "applied {} change(s) to {uri} (client version {version}, snapshot version {})",
      changes.len(),
      applied.version()
    );
    Ok(Some(applied))
  }
}

/// line/character -> offset: the start offset of the (0-based) editor line,
/// shifted into the snapshot's 1-based numbering, plus the character column.
pub fn position_to_offset(snapshot: &Snapshot, position: LspPosition) -> Result<usize, SessionError> {
  let line = position.line as usize + 1;
  let start = snapshot
    .start_offset_for_line(line)
    .ok_or(SessionError::LineOutOfRange {
      line: position.line,
    })?;
  Ok(start + position.character as usize)
}

/// offset -> line/character, the inverse of [`position_to_offset`].
pub fn offset_to_position(snapshot: &Snapshot, offset: usize) -> LspPosition {
  let line = snapshot.line_from_offset(offset);
  let line_start = snapshot.start_offset_for_line(line).unwrap_or(0);
  LspPosition {
    line:      (line - 1) as u32,
    character: (offset - line_start) as u32,
  }
}

fn path_for_uri(uri: &str) -> PathBuf {
  url::Url::parse(uri)
    .ok()
    .filter(|parsed| parsed.scheme() == "file")
    .and_then(|parsed| parsed.to_file_path().ok())
    .unwrap_or_else(|| PathBuf::from(uri))
}

#[cfg(test)]
mod test {
  use super::*;

  fn position(line: u32, character: u32) -> LspPosition {
    LspPosition { line, character }
  }

  fn range(start: LspPosition, end: LspPosition) -> Option<LspRange> {
    Some(LspRange { start, end })
  }

  #[test]
  fn open_overwrites_and_close_is_a_no_op_when_absent() {
    let mut session = DocumentSession::new();
    session.open("file:///tmp/a.rb", "first");
    session.open("file:///tmp/a.rb", "second");
    assert_eq!(session.open_count(), 1);
    assert_eq!(session.snapshot("file:///tmp/a.rb").unwrap().content(), "second");

    session.close("file:///tmp/missing.rb");
    session.close("file:///tmp/a.rb");
    assert_eq!(session.open_count(), 0);
    assert!(session.snapshot("file:///tmp/a.rb").is_none());
  }

  #[test]
  fn changes_translate_lines_and_columns_to_offsets() {
    let mut session = DocumentSession::new();
    session.open("file:///tmp/a.rb", "Hello\nWorld\n!");

    let changes = [ContentChange {
      range: range(position(1, 0), position(1, 5)),
      text:  "Rust!".to_string(),
    }];
    let snapshot = session
      .apply_changes("file:///tmp/a.rb", 2, &changes)
      .unwrap()
      .unwrap();
    assert_eq!(snapshot.content(), "Hello\nRust!\n!");
  }

  #[test]
  fn all_changes_in_a_batch_address_the_pre_batch_snapshot() {
    let mut session = DocumentSession::new();
    session.open("file:///tmp/a.rb", "Hello World!");

    let changes = [
      ContentChange {
        range: range(position(0, 6), position(0, 11)),
        text:  "Myself".to_string(),
      },
      ContentChange {
        range: range(position(0, 0), position(0, 5)),
        text:  "Woot".to_string(),
      },
    ];
    session.apply_changes("file:///tmp/a.rb", 2, &changes).unwrap();
    assert_eq!(
      session.snapshot("file:///tmp/a.rb").unwrap().content(),
      "Woot Myself!"
    );
  }

  #[test]
  fn rangeless_change_replaces_the_whole_document() {
    let mut session = DocumentSession::new();
    session.open("file:///tmp/a.rb", "old content");

    let changes = [ContentChange {
      range: None,
      text:  "brand new".to_string(),
    }];
    session.apply_changes("file:///tmp/a.rb", 2, &changes).unwrap();
    assert_eq!(session.snapshot("file:///tmp/a.rb").unwrap().content(), "brand new");
  }

  #[test]
  fn changes_to_unopened_documents_are_dropped() {
    let mut session = DocumentSession::new();
    let result = session.apply_changes("file:///tmp/ghost.rb", 1, &[]);
    assert!(matches!(result, Ok(None)));
  }

  #[test]
  fn coordinate_translation_is_symmetric() {
    let snapshot = Snapshot::from_text("Hello\nWorld\n!", 0);
    for (line, character, offset) in [(0, 0, 0), (0, 3, 3), (1, 0, 6), (1, 4, 10), (2, 0, 12)] {
      let pos = position(line, character);
      assert_eq!(position_to_offset(&snapshot, pos), Ok(offset));
      assert_eq!(offset_to_position(&snapshot, offset), pos);
    }

    assert_eq!(
      position_to_offset(&snapshot, position(5, 0)),
      Err(SessionError::LineOutOfRange { line: 5 })
    );
  }
}
