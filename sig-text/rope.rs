use std::{
  fmt,
  sync::Arc,
};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::range::CharRange;

/// Adjacent leaves smaller than this are merged into a single leaf when the
/// tree is rebuilt.
const MAX_CONSOLIDATION_CHARS: usize = 200;

/// Extra depth allowed on top of the logarithmic minimum before an edit
/// triggers a rebuild.
const DEPTH_SLACK: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextError {
  #[error("invalid range: start {start} is after end {end}")]
  InvalidRange { start: usize, end: usize },
  #[error("range {start}..{end} is out of bounds for text length {len}")]
  RangeOutOfBounds {
    start: usize,
    end:   usize,
    len:   usize,
  },
  #[error("change range {start}..{end} overlaps a change starting at {prev_start}")]
  OverlappingChanges {
    start:      usize,
    end:        usize,
    prev_start: usize,
  },
}

/// An immutable, structurally shared text tree.
///
/// Leaves hold a shared string plus a half-open character sub-range into it;
/// branches join two subtrees and cache their combined length and depth. No
/// node is ever mutated after construction, so any number of versions may
/// share any subtree. All offsets are character offsets into the logical
/// concatenation of the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRope {
  root: Arc<Node>,
}

#[derive(Debug, PartialEq)]
enum Node {
  Leaf {
    text: Arc<str>,
    span: CharRange,
  },
  Branch {
    left:  Arc<Node>,
    right: Arc<Node>,
    len:   usize,
    depth: u32,
  },
}

static EMPTY: Lazy<Arc<Node>> = Lazy::new(|| {
  Arc::new(Node::Leaf {
    text: Arc::from(""),
    span: CharRange::at(0),
  })
});

impl Node {
  fn len(&self) -> usize {
    match self {
      Node::Leaf { span, .. } => span.len(),
      Node::Branch { len, .. } => *len,
    }
  }

  fn depth(&self) -> u32 {
    match self {
      Node::Leaf { .. } => 0,
      Node::Branch { depth, .. } => *depth,
    }
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn leaf(text: &str) -> Arc<Node> {
    let chars = text.chars().count();
    if chars == 0 {
      return Arc::clone(&EMPTY);
    }
    Arc::new(Node::Leaf {
      text: Arc::from(text),
      span: CharRange::up_to(chars),
    })
  }

  fn branch(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
    let len = left.len() + right.len();
    let depth = 1 + left.depth().max(right.depth());
    Arc::new(Node::Branch {
      left,
      right,
      len,
      depth,
    })
  }

  /// Returns a node covering exactly `range`, sharing subtrees wherever the
  /// requested range lines up with an existing node's full extent.
  fn slice(node: &Arc<Node>, range: CharRange) -> Arc<Node> {
    if range.is_empty() {
      return Arc::clone(&EMPTY);
    }
    if range.start == 0 && range.end == node.len() {
      return Arc::clone(node);
    }
    match node.as_ref() {
      Node::Leaf { text, span } => Arc::new(Node::Leaf {
        text: Arc::clone(text),
        span: CharRange::new(span.start + range.start, span.start + range.end),
      }),
      Node::Branch { left, right, .. } => {
        let left_len = left.len();
        if range.end <= left_len {
          Node::slice(left, range)
        } else if range.start >= left_len {
          Node::slice(right, range.shifted_back(left_len))
        } else {
          Node::branch(
            Node::slice(left, CharRange::new(range.start, left_len)),
            Node::slice(right, CharRange::up_to(range.end - left_len)),
          )
        }
      },
    }
  }

  /// Joins the two remainders of a cut, collapsing zero-length sides.
  fn assemble(node: &Arc<Node>, left: CharRange, right: CharRange) -> Arc<Node> {
    if left.is_empty() {
      Node::slice(node, right)
    } else if right.is_empty() {
      Node::slice(node, left)
    } else {
      Node::branch(Node::slice(node, left), Node::slice(node, right))
    }
  }

  /// Like `assemble`, threading a freshly inserted subtree between the two
  /// remainders. An empty insertion degenerates to `assemble`.
  fn assemble_with(
    node: &Arc<Node>,
    left: CharRange,
    mid: Arc<Node>,
    right: CharRange,
  ) -> Arc<Node> {
    if mid.is_empty() {
      Node::assemble(node, left, right)
    } else if left.is_empty() && right.is_empty() {
      mid
    } else if left.is_empty() {
      Node::branch(mid, Node::slice(node, right))
    } else if right.is_empty() {
      Node::branch(Node::slice(node, left), mid)
    } else {
      Node::branch(Node::slice(node, left), Node::branch(mid, Node::slice(node, right)))
    }
  }

  /// Reconstructs the text for `range` by recursive descent, touching the
  /// right subtree only when the range straddles the split point.
  fn write_range(&self, range: CharRange, out: &mut String) {
    if range.is_empty() {
      return;
    }
    match self {
      Node::Leaf { text, span } => {
        let window = CharRange::new(span.start + range.start, span.start + range.end);
        out.push_str(char_slice(text, window));
      },
      Node::Branch { left, right, .. } => {
        let left_len = left.len();
        if range.end <= left_len {
          left.write_range(range, out);
        } else if range.start >= left_len {
          right.write_range(range.shifted_back(left_len), out);
        } else {
          left.write_range(CharRange::new(range.start, left_len), out);
          right.write_range(CharRange::up_to(range.end - left_len), out);
        }
      },
    }
  }

  fn collect_leaves<'a>(node: &'a Arc<Node>, out: &mut Vec<&'a Arc<Node>>) {
    match node.as_ref() {
      Node::Leaf { .. } => {
        if !node.is_empty() {
          out.push(node);
        }
      },
      Node::Branch { left, right, .. } => {
        Node::collect_leaves(left, out);
        Node::collect_leaves(right, out);
      },
    }
  }

  fn build_balanced(pieces: &[Arc<Node>]) -> Arc<Node> {
    match pieces {
      [] => Arc::clone(&EMPTY),
      [single] => Arc::clone(single),
      _ => {
        let mid = pieces.len() / 2;
        Node::branch(
          Node::build_balanced(&pieces[..mid]),
          Node::build_balanced(&pieces[mid..]),
        )
      },
    }
  }
}

impl TextRope {
  pub fn from_text(text: &str) -> Self {
    Self {
      root: Node::leaf(text),
    }
  }

  /// The canonical empty rope. All empty ropes share one leaf.
  pub fn empty() -> Self {
    Self {
      root: Arc::clone(&EMPTY),
    }
  }

  pub fn len(&self) -> usize {
    self.root.len()
  }

  pub fn is_empty(&self) -> bool {
    self.root.is_empty()
  }

  pub fn depth(&self) -> u32 {
    self.root.depth()
  }

  /// A new rope covering exactly `range` of this one.
  pub fn slice(&self, range: impl Into<CharRange>) -> Result<TextRope, TextError> {
    let range = self.checked(range.into())?;
    Ok(Self {
      root: Node::slice(&self.root, range),
    })
  }

  /// The substring at `range`, materialized.
  pub fn text_of(&self, range: impl Into<CharRange>) -> Result<String, TextError> {
    let range = self.checked(range.into())?;
    let mut out = String::new();
    self.root.write_range(range, &mut out);
    Ok(out)
  }

  /// Produces a new rope with `range` replaced by `new_text`, sharing every
  /// node outside the affected region with `self`.
  pub fn replace(&self, range: impl Into<CharRange>, new_text: &str) -> Result<TextRope, TextError> {
    let range = self.checked(range.into())?;
    let before = CharRange::up_to(range.start);
    let after = CharRange::new(range.end, self.len());
    let root = if new_text.is_empty() {
      Node::assemble(&self.root, before, after)
    } else {
      Node::assemble_with(&self.root, before, Node::leaf(new_text), after)
    };
    Ok(Self { root })
  }

  pub fn remove(&self, range: impl Into<CharRange>) -> Result<TextRope, TextError> {
    self.replace(range, "")
  }

  pub fn insert(&self, position: usize, text: &str) -> Result<TextRope, TextError> {
    self.replace(CharRange::at(position), text)
  }

  pub fn append(&self, text: &str) -> Result<TextRope, TextError> {
    self.insert(self.len(), text)
  }

  /// Streams every character of the rope in order without materializing the
  /// full text.
  pub fn chars(&self) -> Chars<'_> {
    Chars {
      stack:   vec![self.root.as_ref()],
      current: "".chars(),
    }
  }

  /// True when edits have left the tree deeper than the logarithmic budget
  /// for its length.
  pub fn needs_rebalance(&self) -> bool {
    self.depth() > depth_budget(self.len())
  }

  /// Rebuilds the tree balanced, consolidating runs of small adjacent leaves
  /// into single leaves of at most `MAX_CONSOLIDATION_CHARS` characters.
  pub fn rebalanced(&self) -> TextRope {
    let mut leaves = Vec::new();
    Node::collect_leaves(&self.root, &mut leaves);

    let mut pieces: Vec<Arc<Node>> = Vec::new();
    let mut pending = String::new();
    let mut pending_chars = 0usize;
    for leaf in leaves {
      let Node::Leaf { text, span } = leaf.as_ref() else {
        continue;
      };
      let chars = span.len();
      if chars > MAX_CONSOLIDATION_CHARS {
        if pending_chars > 0 {
          pieces.push(Node::leaf(&pending));
          pending.clear();
          pending_chars = 0;
        }
        pieces.push(Arc::clone(leaf));
        continue;
      }
      if pending_chars + chars > MAX_CONSOLIDATION_CHARS {
        pieces.push(Node::leaf(&pending));
        pending.clear();
        pending_chars = 0;
      }
      pending.push_str(char_slice(text, *span));
      pending_chars += chars;
    }
    if pending_chars > 0 {
      pieces.push(Node::leaf(&pending));
    }

    Self {
      root: Node::build_balanced(&pieces),
    }
  }

  fn checked(&self, range: CharRange) -> Result<CharRange, TextError> {
    if range.start > range.end {
      return Err(TextError::InvalidRange {
        start: range.start,
        end:   range.end,
      });
    }
    if range.end > self.len() {
      return Err(TextError::RangeOutOfBounds {
        start: range.start,
        end:   range.end,
        len:   self.len(),
      });
    }
    Ok(range)
  }
}

impl fmt::Display for TextRope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut out = String::with_capacity(self.len());
    self.root.write_range(CharRange::up_to(self.len()), &mut out);
    f.write_str(&out)
  }
}

pub struct Chars<'a> {
  stack:   Vec<&'a Node>,
  current: std::str::Chars<'a>,
}

impl<'a> Iterator for Chars<'a> {
  type Item = char;

  fn next(&mut self) -> Option<char> {
    loop {
      if let Some(c) = self.current.next() {
        return Some(c);
      }
      match self.stack.pop()? {
        Node::Leaf { text, span } => {
          self.current = char_slice(text, *span).chars();
        },
        Node::Branch { left, right, .. } => {
          self.stack.push(right.as_ref());
          self.stack.push(left.as_ref());
        },
      }
    }
  }
}

fn depth_budget(len: usize) -> u32 {
  (usize::BITS - len.max(1).leading_zeros()) + DEPTH_SLACK
}

/// Slices `text` at character (not byte) offsets.
fn char_slice(text: &str, span: CharRange) -> &str {
  let start = byte_of_char(text, span.start);
  let end = byte_of_char(text, span.end);
  &text[start..end]
}

fn byte_of_char(text: &str, char_idx: usize) -> usize {
  text
    .char_indices()
    .nth(char_idx)
    .map_or(text.len(), |(byte_idx, _)| byte_idx)
}

#[cfg(test)]
mod test {
  use proptest::prelude::*;

  use super::*;

  #[test]
  fn text_comes_back_the_same() {
    let text = "Hello World!";
    assert_eq!(TextRope::from_text(text).to_string(), text);
  }

  #[test]
  fn empty_round_trips() {
    assert_eq!(TextRope::from_text("").to_string(), "");
    assert!(TextRope::from_text("").is_empty());
  }

  #[test]
  fn can_concat_two_strings() {
    let rope = TextRope::from_text("Hello ").append("World!").unwrap();
    assert_eq!(rope.to_string(), "Hello World!");
  }

  #[test]
  fn can_remove_a_range() {
    let rope = TextRope::from_text("Hello World!").remove(0..5).unwrap();
    assert_eq!(rope.to_string(), " World!");
  }

  #[test]
  fn can_build_by_appending_every_char() {
    let text = "Hello World!";
    let mut rope = TextRope::empty();
    for c in text.chars() {
      rope = rope.append(&c.to_string()).unwrap();
    }
    assert_eq!(rope.to_string(), text);
  }

  #[test]
  fn can_insert_repeatedly_at_one_point() {
    let mut rope = TextRope::from_text("Hello World!");
    for _ in 0..4 {
      rope = rope.insert(5, "o").unwrap();
    }
    assert_eq!(rope.to_string(), "Hellooooo World!");
  }

  #[test]
  fn can_replace_the_beginning() {
    let rope = TextRope::from_text("Hello World!").replace(0..5, "Bye").unwrap();
    assert_eq!(rope.to_string(), "Bye World!");
  }

  #[test]
  fn can_replace_the_end() {
    let rope = TextRope::from_text("Hello World!").replace(6..11, "Me").unwrap();
    assert_eq!(rope.to_string(), "Hello Me!");
  }

  #[test]
  fn chars_iterates_in_order() {
    let text = "Hello World!";
    let rope = TextRope::from_text("Hello ").append("World!").unwrap();
    assert_eq!(rope.chars().collect::<String>(), text);
  }

  #[test]
  fn text_of_arbitrary_ranges() {
    let rope = TextRope::from_text("Hello ").append("World!").unwrap();
    assert_eq!(rope.text_of(0..1).unwrap(), "H");
    assert_eq!(rope.text_of(6..7).unwrap(), "W");
    assert_eq!(rope.text_of(0..5).unwrap(), "Hello");
    // Straddles the branch split point.
    assert_eq!(rope.text_of(4..8).unwrap(), "o Wo");
  }

  #[test]
  fn slice_matches_string_slicing() {
    let rope = TextRope::from_text("Hello ")
      .append("World!")
      .unwrap()
      .replace(5..6, "-")
      .unwrap();
    let text = rope.to_string();
    for start in 0..=text.len() {
      for end in start..=text.len() {
        let slice = rope.slice(start..end).unwrap();
        assert_eq!(slice.to_string(), text[start..end]);
        assert_eq!(slice.len(), end - start);
      }
    }
  }

  #[test]
  fn whole_extent_slice_shares_the_root() {
    let rope = TextRope::from_text("Hello ").append("World!").unwrap();
    let slice = rope.slice(0..rope.len()).unwrap();
    assert!(Arc::ptr_eq(&rope.root, &slice.root));
  }

  #[test]
  fn multibyte_edits_use_char_offsets() {
    let rope = TextRope::from_text("héllo wörld");
    let rope = rope.replace(2..4, "LL").unwrap();
    assert_eq!(rope.to_string(), "héLLo wörld");
    let rope = rope.insert(0, "世界 ").unwrap();
    assert_eq!(rope.to_string(), "世界 héLLo wörld");
    assert_eq!(rope.text_of(0..2).unwrap(), "世界");
  }

  #[test]
  fn out_of_bounds_edits_are_rejected() {
    let rope = TextRope::from_text("short");
    assert_eq!(
      rope.replace(3..9, "x"),
      Err(TextError::RangeOutOfBounds {
        start: 3,
        end:   9,
        len:   5,
      })
    );
  }

  #[test]
  fn rebalance_preserves_content_and_caps_depth() {
    let mut rope = TextRope::empty();
    for i in 0..500 {
      let c = char::from(b'a' + (i % 26) as u8);
      rope = rope.insert(0, &c.to_string()).unwrap();
    }
    let before = rope.to_string();
    assert!(rope.needs_rebalance());

    let rebuilt = rope.rebalanced();
    assert_eq!(rebuilt.to_string(), before);
    assert!(rebuilt.depth() <= depth_budget(rebuilt.len()));
    assert!(rebuilt.depth() < rope.depth());
  }

  proptest! {
    #[test]
    fn replace_matches_string_splicing(
      text in "[a-zé\\n]{0,40}",
      edits in proptest::collection::vec((0usize..40, 0usize..10, "[a-z]{0,5}"), 0..8),
    ) {
      let mut expected: Vec<char> = text.chars().collect();
      let mut rope = TextRope::from_text(&text);
      for (start, span, insert) in edits {
        let start = start.min(expected.len());
        let end = (start + span).min(expected.len());
        rope = rope.replace(start..end, &insert).unwrap();
        expected.splice(start..end, insert.chars());
        prop_assert_eq!(rope.to_string(), expected.iter().collect::<String>());
        prop_assert_eq!(rope.len(), expected.len());
      }
    }
  }
}
