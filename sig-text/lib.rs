mod buffer;
mod document;
mod range;
mod rope;
mod snapshot;

pub use buffer::{
  TextBuffer,
  TextChange,
};
pub use document::TextDocument;
pub use range::CharRange;
pub use rope::{
  TextError,
  TextRope,
};
pub use snapshot::Snapshot;
