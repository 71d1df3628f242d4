//! Brace-delimited key/value tree, the vault's text format.
//!
//! ```text
//! node  := '{' entry* '}'
//! entry := key ( '=' value | node ) ';'?
//! key   := bare-word
//! value := quoted-string | bare-word
//! ```
//!
//! `#` starts a line comment. Writing always quotes values and escapes
//! `\ " \n \r \t`; parsing also accepts bare words. The database's text
//! export and import/merge are built on this tree.

use std::fmt::Write as _;

use crate::error::VaultError;

/// One node of the tree: scalar key/value pairs plus named child nodes,
/// both in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Node {
  name: String,
  values: Vec<(String, String)>,
  children: Vec<Node>,
}

impl Node {
  pub fn new(name: impl Into<String>) -> Self {
    Node {
      name: name.into(),
      values: Vec::new(),
      children: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Stores a scalar, replacing any earlier value under the same key.
  pub fn set(&mut self, key: &str, value: impl Into<String>) {
    let value = value.into();
    if let Some(slot) = self.values.iter_mut().find(|(k, _)| k == key) {
      slot.1 = value;
    } else {
      self.values.push((key.to_string(), value));
    }
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .values
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.as_str())
  }

  pub fn get_u64(&self, key: &str) -> Option<u64> {
    self.get(key).and_then(|v| v.parse().ok())
  }

  pub fn get_i64(&self, key: &str) -> Option<i64> {
    self.get(key).and_then(|v| v.parse().ok())
  }

  pub fn get_u16(&self, key: &str) -> Option<u16> {
    self.get(key).and_then(|v| v.parse().ok())
  }

  /// Reads a boolean; accepts `true`/`false` and `1`/`0`.
  pub fn get_bool(&self, key: &str) -> Option<bool> {
    match self.get(key) {
      Some("true") | Some("1") => Some(true),
      Some("false") | Some("0") => Some(false),
      _ => None,
    }
  }

  /// Appends a child node and returns a reference to it.
  pub fn add_child(&mut self, name: impl Into<String>) -> &mut Node {
    self.children.push(Node::new(name));
    self.children.last_mut().expect("just pushed")
  }

  pub fn children(&self) -> impl Iterator<Item = &Node> {
    self.children.iter()
  }

  /// Parses a document: one braced root node, nothing but whitespace and
  /// comments around it.
  pub fn parse(text: &str) -> Result<Node, VaultError> {
    let mut lexer = Lexer::new(text);
    match lexer.next_token()? {
      Some(Token::Open) => {}
      _ => return Err(VaultError::CorruptRecord),
    }

    let mut root = Node::new("");
    parse_body(&mut lexer, &mut root, 0)?;

    match lexer.next_token()? {
      None => Ok(root),
      Some(_) => Err(VaultError::CorruptRecord),
    }
  }

  /// Serializes the node as a braced document.
  pub fn write(&self) -> String {
    let mut out = String::new();
    self.write_body(&mut out, 0);
    out
  }

  fn write_body(&self, out: &mut String, depth: usize) {
    let pad = "  ".repeat(depth);
    out.push_str("{\n");
    for (key, value) in &self.values {
      let _ = write!(out, "{pad}  {key} = ");
      write_quoted(out, value);
      out.push_str(";\n");
    }
    for child in &self.children {
      let _ = write!(out, "{pad}  {} ", child.name);
      child.write_body(out, depth + 1);
    }
    out.push_str(&pad);
    out.push_str("}\n");
  }
}

const MAX_DEPTH: usize = 64;

fn parse_body(lexer: &mut Lexer, node: &mut Node, depth: usize) -> Result<(), VaultError> {
  if depth > MAX_DEPTH {
    return Err(VaultError::CorruptRecord);
  }

  loop {
    let key = match lexer.next_token()? {
      Some(Token::Close) => return Ok(()),
      Some(Token::Word(w)) => w,
      Some(Token::Quoted(w)) => w,
      _ => return Err(VaultError::CorruptRecord),
    };

    match lexer.next_token()? {
      Some(Token::Equals) => {
        let value = match lexer.next_token()? {
          Some(Token::Word(v)) | Some(Token::Quoted(v)) => v,
          _ => return Err(VaultError::CorruptRecord),
        };
        node.set(&key, value);
      }
      Some(Token::Open) => {
        let child = node.add_child(key);
        parse_body(lexer, child, depth + 1)?;
      }
      _ => return Err(VaultError::CorruptRecord),
    }
  }
}

fn write_quoted(out: &mut String, value: &str) {
  out.push('"');
  for c in value.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '"' => out.push_str("\\\""),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      c => out.push(c),
    }
  }
  out.push('"');
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
  Open,
  Close,
  Equals,
  Word(String),
  Quoted(String),
}

struct Lexer<'a> {
  chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Lexer<'a> {
  fn new(text: &'a str) -> Self {
    Lexer {
      chars: text.chars().peekable(),
    }
  }

  /// Next token, skipping whitespace, comments and the optional `;`
  /// entry terminators. `None` at end of input.
  fn next_token(&mut self) -> Result<Option<Token>, VaultError> {
    loop {
      match self.chars.peek() {
        None => return Ok(None),
        Some(c) if c.is_whitespace() => {
          self.chars.next();
        }
        Some(';') => {
          self.chars.next();
        }
        Some('#') => {
          for c in self.chars.by_ref() {
            if c == '\n' {
              break;
            }
          }
        }
        Some('{') => {
          self.chars.next();
          return Ok(Some(Token::Open));
        }
        Some('}') => {
          self.chars.next();
          return Ok(Some(Token::Close));
        }
        Some('=') => {
          self.chars.next();
          return Ok(Some(Token::Equals));
        }
        Some('"') => {
          self.chars.next();
          return self.quoted().map(Some);
        }
        Some(_) => return self.word().map(Some),
      }
    }
  }

  fn quoted(&mut self) -> Result<Token, VaultError> {
    let mut value = String::new();
    loop {
      match self.chars.next() {
        None => return Err(VaultError::CorruptRecord),
        Some('"') => return Ok(Token::Quoted(value)),
        Some('\\') => match self.chars.next() {
          Some('\\') => value.push('\\'),
          Some('"') => value.push('"'),
          Some('n') => value.push('\n'),
          Some('r') => value.push('\r'),
          Some('t') => value.push('\t'),
          _ => return Err(VaultError::CorruptRecord),
        },
        Some(c) => value.push(c),
      }
    }
  }

  fn word(&mut self) -> Result<Token, VaultError> {
    let mut value = String::new();
    while let Some(&c) = self.chars.peek() {
      if c.is_whitespace() || matches!(c, '{' | '}' | '=' | ';' | '#' | '"') {
        break;
      }
      value.push(c);
      self.chars.next();
    }

    if value.is_empty() {
      return Err(VaultError::CorruptRecord);
    }
    Ok(Token::Word(value))
  }
}
