use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use sig_text::Snapshot;

const PARSED_DOCUMENT_KEY: &str = "parsed_document";

/// One method definition reported by the syntax analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefinition {
  name:       String,
  params:     Vec<String>,
  void:       bool,
  first_line: usize,
}

impl MethodDefinition {
  pub fn new(
    name: impl Into<String>,
    params: Vec<String>,
    void: bool,
    first_line: usize,
  ) -> Self {
    Self {
      name: name.into(),
      params,
      void,
      first_line,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Parameter names, in declaration order.
  pub fn params(&self) -> &[String] {
    &self.params
  }

  pub fn has_params(&self) -> bool {
    !self.params.is_empty()
  }

  /// True when the method cannot meaningfully return a value (constructors,
  /// setters).
  pub fn is_void(&self) -> bool {
    self.void
  }

  /// The 1-based source line the definition starts on.
  pub fn first_line(&self) -> usize {
    self.first_line
  }

  /// The return classification we can infer, or `None` when unknown.
  pub fn returns(&self) -> Option<&'static str> {
    if self.void {
      Some("void")
    } else if self.name.ends_with('?') {
      Some("T::Boolean")
    } else {
      None
    }
  }
}

/// The narrow query interface to the external syntax-analysis service:
/// given document text, either the ordered method definitions or `None`
/// when the text does not parse.
pub trait SyntaxAnalyzer: Send + Sync {
  fn analyze(&self, text: &str) -> Option<Vec<MethodDefinition>>;
}

/// The analysis result for one snapshot's text.
#[derive(Debug)]
pub struct ParsedDocument {
  methods: Option<Vec<MethodDefinition>>,
}

impl ParsedDocument {
  pub fn new(analyzer: &dyn SyntaxAnalyzer, content: &str) -> Self {
    Self {
      methods: analyzer.analyze(content),
    }
  }

  /// The analysis for `snapshot`, memoized in its property cache: repeated
  /// queries against the same version never re-run the analyzer.
  pub fn from_snapshot(analyzer: &dyn SyntaxAnalyzer, snapshot: &Snapshot) -> Arc<ParsedDocument> {
    snapshot.get_or_create_property(PARSED_DOCUMENT_KEY, || {
      ParsedDocument::new(analyzer, &snapshot.content())
    })
  }

  pub fn is_valid(&self) -> bool {
    self.methods.is_some()
  }

  pub fn methods(&self) -> &[MethodDefinition] {
    self.methods.as_deref().unwrap_or_default()
  }

  /// The first definition starting on the line immediately following the
  /// 1-based `line`.
  pub fn definition_after_line(&self, line: usize) -> Option<&MethodDefinition> {
    self
      .methods()
      .iter()
      .find(|method| method.first_line == line + 1)
  }
}

static DEF_LINE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"^\s*def\s+(?:self\.)?([A-Za-z_][A-Za-z0-9_]*[?!=]?)\s*(?:\(([^)]*)\))?")
    .expect("method definition pattern is valid")
});

static BLOCK_OPENER: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^\s*(?:def|class|module)\b").expect("block opener pattern is valid"));

static BLOCK_END: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\bend\b").expect("block end pattern is valid"));

/// The built-in analyzer: a line scanner over definition syntax.
///
/// It recognizes `def` lines (including singleton and parenthesized forms),
/// normalizes parameter lists to bare names, classifies constructors and
/// setters as void, and treats text with unclosed definitions as unparsable.
#[derive(Debug, Default, Clone, Copy)]
pub struct MethodScanner;

impl SyntaxAnalyzer for MethodScanner {
  fn analyze(&self, text: &str) -> Option<Vec<MethodDefinition>> {
    let mut methods = Vec::new();
    let mut opened = 0usize;
    let mut closed = 0usize;

    for (index, line) in text.lines().enumerate() {
      if BLOCK_OPENER.is_match(line) {
        opened += 1;
      }
      closed += BLOCK_END.find_iter(line).count();

      if let Some(captures) = DEF_LINE.captures(line) {
        let name = captures[1].to_string();
        let params = captures
          .get(2)
          .map(|list| parse_params(list.as_str()))
          .unwrap_or_default();
        let void = is_void_name(&name);
        methods.push(MethodDefinition::new(name, params, void, index + 1));
      }
    }

    if opened > closed {
      return None;
    }
    Some(methods)
  }
}

fn parse_params(list: &str) -> Vec<String> {
  list
    .split(',')
    .filter_map(|param| {
      let param = param.trim().trim_start_matches(['*', '&']);
      // Cut defaults (`a = 1`) and keyword markers (`a:`) down to the name.
      let name = param.split(['=', ':']).next().unwrap_or("").trim();
      if name.is_empty() {
        None
      } else {
        Some(name.to_string())
      }
    })
    .collect()
}

// Setters (`foo=`) cannot meaningfully return; comparison operators can.
fn is_void_name(name: &str) -> bool {
  if name == "initialize" {
    return true;
  }
  name.ends_with('=') && !matches!(name, "==" | "===" | "!=" | "<=" | ">=" | "<=>")
}
