use std::path::{
  Path,
  PathBuf,
};

use crate::buffer::TextBuffer;

/// An open document: where it lives on disk plus the buffer holding its
/// synchronized content.
#[derive(Debug)]
pub struct TextDocument {
  filepath: PathBuf,
  buffer:   TextBuffer,
}

impl TextDocument {
  pub fn from_text(filepath: impl Into<PathBuf>, content: &str) -> Self {
    Self {
      filepath: filepath.into(),
      buffer:   TextBuffer::new(content),
    }
  }

  pub fn filepath(&self) -> &Path {
    &self.filepath
  }

  pub fn set_filepath(&mut self, filepath: impl Into<PathBuf>) {
    self.filepath = filepath.into();
  }

  pub fn buffer(&self) -> &TextBuffer {
    &self.buffer
  }

  pub fn buffer_mut(&mut self) -> &mut TextBuffer {
    &mut self.buffer
  }
}
