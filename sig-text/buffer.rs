use crate::{
  range::CharRange,
  rope::TextError,
  snapshot::Snapshot,
};

/// One edit: replace the text at `range` with `new_text`. Ranges address the
/// coordinate space of the snapshot the batch is applied against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
  pub range:    CharRange,
  pub new_text: String,
}

impl TextChange {
  pub fn new(range: impl Into<CharRange>, new_text: impl Into<String>) -> Self {
    Self {
      range:    range.into(),
      new_text: new_text.into(),
    }
  }
}

/// The single mutable cell holding a document's current snapshot.
///
/// Every successful edit application swaps in a new snapshot; snapshots
/// themselves are never mutated. Version numbers increase monotonically per
/// buffer.
#[derive(Debug)]
pub struct TextBuffer {
  snapshot:     Snapshot,
  next_version: u64,
}

impl TextBuffer {
  pub fn new(text: &str) -> Self {
    Self {
      snapshot:     Snapshot::from_text(text, 0),
      next_version: 1,
    }
  }

  pub fn current_snapshot(&self) -> Snapshot {
    self.snapshot.clone()
  }

  /// Applies an ordered batch of changes as one atomic transition and
  /// returns the resulting snapshot.
  ///
  /// Changes are sorted by descending start offset before application, so
  /// each range stays valid in the then-current tree without any offset
  /// rewriting. Overlapping ranges within one batch are rejected. An empty
  /// batch returns the current snapshot itself.
  pub fn apply_changes(&mut self, mut changes: Vec<TextChange>) -> Result<Snapshot, TextError> {
    if changes.is_empty() {
      return Ok(self.snapshot.clone());
    }

    changes.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    self.validate(&changes)?;

    let mut rope = self.snapshot.rope().clone();
    for change in &changes {
      rope = rope.replace(change.range, &change.new_text)?;
    }
    if rope.needs_rebalance() {
      rope = rope.rebalanced();
    }

    let snapshot = Snapshot::new(rope, self.next_version);
    self.next_version += 1;
    self.snapshot = snapshot.clone();
    Ok(snapshot)
  }

  pub fn replace(
    &mut self,
    range: impl Into<CharRange>,
    new_text: impl Into<String>,
  ) -> Result<Snapshot, TextError> {
    self.apply_changes(vec![TextChange::new(range, new_text)])
  }

  pub fn insert(&mut self, position: usize, text: impl Into<String>) -> Result<Snapshot, TextError> {
    self.replace(CharRange::at(position), text)
  }

  pub fn remove(&mut self, range: impl Into<CharRange>) -> Result<Snapshot, TextError> {
    self.replace(range, "")
  }

  // Expects `changes` sorted by descending start offset.
  fn validate(&self, changes: &[TextChange]) -> Result<(), TextError> {
    let len = self.snapshot.len();
    let mut prev_start: Option<usize> = None;
    for change in changes {
      let CharRange { start, end } = change.range;
      if start > end {
        return Err(TextError::InvalidRange { start, end });
      }
      if end > len {
        return Err(TextError::RangeOutOfBounds { start, end, len });
      }
      if let Some(prev) = prev_start
        && end > prev
      {
        return Err(TextError::OverlappingChanges {
          start,
          end,
          prev_start: prev,
        });
      }
      prev_start = Some(start);
    }
    Ok(())
  }
}
