use std::{
  any::Any,
  collections::HashMap,
  sync::Arc,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::rope::TextRope;

/// An immutable, versioned view of document text at one point in time.
///
/// Cloning is cheap; all clones observe the same underlying tree, the same
/// lazily built newline index, and the same property cache. Distinct
/// snapshots never share cache entries, so anything derived from the text is
/// recomputed exactly once per version.
#[derive(Debug, Clone)]
pub struct Snapshot {
  inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
  rope:       TextRope,
  version:    u64,
  // Offsets of every newline, prefixed with a -1 sentinel so that offset 0
  // always lands on line 1.
  newlines:   OnceCell<Vec<isize>>,
  properties: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl std::fmt::Debug for SnapshotInner {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Snapshot")
      .field("version", &self.version)
      .field("len", &self.rope.len())
      .finish_non_exhaustive()
  }
}

impl PartialEq for Snapshot {
  /// Two handles are equal exactly when they share one underlying snapshot,
  /// matching [`Snapshot::same_as`].
  fn eq(&self, other: &Self) -> bool {
    self.same_as(other)
  }
}

impl Snapshot {
  pub fn new(rope: TextRope, version: u64) -> Self {
    Self {
      inner: Arc::new(SnapshotInner {
        rope,
        version,
        newlines: OnceCell::new(),
        properties: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn from_text(text: &str, version: u64) -> Self {
    Self::new(TextRope::from_text(text), version)
  }

  pub fn version(&self) -> u64 {
    self.inner.version
  }

  pub fn len(&self) -> usize {
    self.inner.rope.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.rope.is_empty()
  }

  pub fn rope(&self) -> &TextRope {
    &self.inner.rope
  }

  /// Materializes the full document text.
  pub fn content(&self) -> String {
    self.inner.rope.to_string()
  }

  /// The 1-based line containing `offset`, found by scanning the cached
  /// newline boundaries from the end for the first one strictly below it.
  pub fn line_from_offset(&self, offset: usize) -> usize {
    self
      .newline_index()
      .iter()
      .rposition(|boundary| offset as isize > *boundary)
      .map_or(1, |index| index + 1)
  }

  /// The offset just past the `(line - 1)`-th recorded newline, or `None`
  /// when the 1-based `line` is out of range.
  pub fn start_offset_for_line(&self, line: usize) -> Option<usize> {
    let index = self.newline_index();
    if line >= 1 && line <= index.len() {
      Some((index[line - 1] + 1) as usize)
    } else {
      None
    }
  }

  /// Fetches the property stored under `key`, building and caching it on the
  /// first call. The builder runs at most once per key for this snapshot;
  /// later calls return the cached value untouched.
  pub fn get_or_create_property<T, F>(&self, key: &str, build: F) -> Arc<T>
  where
    T: Any + Send + Sync,
    F: FnOnce() -> T,
  {
    let mut bag = self.inner.properties.lock();
    if let Some(existing) = bag.get(key)
      && let Ok(value) = Arc::clone(existing).downcast::<T>()
    {
      return value;
    }
    let value = Arc::new(build());
    bag.insert(key.to_string(), value.clone() as Arc<dyn Any + Send + Sync>);
    value
  }

  /// True when both views share one underlying snapshot.
  pub fn same_as(&self, other: &Snapshot) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  fn newline_index(&self) -> &[isize] {
    self.inner.newlines.get_or_init(|| {
      let mut index = vec![-1];
      index.extend(
        self
          .inner
          .rope
          .chars()
          .enumerate()
          .filter(|(_, c)| *c == '\n')
          .map(|(pos, _)| pos as isize),
      );
      index
    })
  }
}
