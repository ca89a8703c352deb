//! Envelope codec
//!
//! An envelope is a `(command, tree)` pair carried as one line of text:
//!
//! ```text
//! <command>#<path>=<tag><value>&<path>=<tag><value>...
//! ```
//!
//! Paths join nested keys with `.`. Each value starts with a type tag:
//! `:` bytes (base64url), `$` text (base64url of UTF-8), `+` integer,
//! `{` empty subtree. Decoding splits on the first `#`, so a command can
//! never contain one.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{HandshakeError, Result};

/// Separates the command from the encoded tree.
pub const DELIMITER: char = '#';
const PAIR_SEP: char = '&';
const PATH_SEP: char = '.';

const TAG_BYTES: char = ':';
const TAG_TEXT: char = '$';
const TAG_NUMBER: char = '+';
const TAG_EMPTY: char = '{';

pub type Tree = BTreeMap<String, Node>;

/// One value in an envelope tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Bytes(Vec<u8>),
    Number(i64),
    Tree(Tree),
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Text(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::Text(s)
    }
}

impl From<Vec<u8>> for Node {
    fn from(b: Vec<u8>) -> Self {
        Node::Bytes(b)
    }
}

impl From<&[u8]> for Node {
    fn from(b: &[u8]) -> Self {
        Node::Bytes(b.to_vec())
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Number(n)
    }
}

impl From<Tree> for Node {
    fn from(t: Tree) -> Self {
        Node::Tree(t)
    }
}

/// A command tag plus its payload tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub command: String,
    pub tree: Tree,
}

impl Envelope {
    pub fn new(command: impl Into<String>, tree: Tree) -> Self {
        Self {
            command: command.into(),
            tree,
        }
    }

    /// Fail with `ProtocolMismatch` unless the command equals `expected`.
    pub fn expect_command(&self, expected: &str) -> Result<()> {
        if self.command == expected {
            Ok(())
        } else {
            Err(HandshakeError::ProtocolMismatch(format!(
                "expected command {expected:?}, got {:?}",
                self.command
            )))
        }
    }

    /// Encode to relay text. See [`encode`].
    pub fn encode(&self) -> Result<String> {
        encode(self)
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':')
}

fn flatten(tree: &Tree, prefix: &str, pairs: &mut Vec<String>) -> Result<()> {
    for (key, node) in tree {
        if !valid_key(key) {
            return Err(HandshakeError::Format(format!("invalid tree key {key:?}")));
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{PATH_SEP}{key}")
        };
        match node {
            Node::Tree(sub) if sub.is_empty() => pairs.push(format!("{path}={TAG_EMPTY}")),
            Node::Tree(sub) => flatten(sub, &path, pairs)?,
            Node::Bytes(b) => {
                pairs.push(format!("{path}={TAG_BYTES}{}", URL_SAFE_NO_PAD.encode(b)))
            }
            Node::Text(s) => pairs.push(format!(
                "{path}={TAG_TEXT}{}",
                URL_SAFE_NO_PAD.encode(s.as_bytes())
            )),
            Node::Number(n) => pairs.push(format!("{path}={TAG_NUMBER}{n}")),
        }
    }
    Ok(())
}

/// Encode an envelope to a single line of relay text.
///
/// Fails with `FormatError` if the command contains the delimiter or a tree
/// key uses characters outside `[A-Za-z0-9_:-]`.
pub fn encode(envelope: &Envelope) -> Result<String> {
    if envelope.command.contains(DELIMITER) {
        return Err(HandshakeError::Format(
            "command contains the payload delimiter".to_string(),
        ));
    }
    let mut pairs = Vec::new();
    flatten(&envelope.tree, "", &mut pairs)?;
    Ok(format!(
        "{}{DELIMITER}{}",
        envelope.command,
        pairs.join("&")
    ))
}

fn decode_value(raw: &str) -> Result<Node> {
    let mut chars = raw.chars();
    let tag = chars
        .next()
        .ok_or_else(|| HandshakeError::Format("empty value".to_string()))?;
    let body = chars.as_str();
    let b64 = |body: &str| {
        URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| HandshakeError::Format(format!("bad base64url: {e}")))
    };
    match tag {
        TAG_BYTES => Ok(Node::Bytes(b64(body)?)),
        TAG_TEXT => String::from_utf8(b64(body)?)
            .map(Node::Text)
            .map_err(|_| HandshakeError::Format("text value is not UTF-8".to_string())),
        TAG_NUMBER => body
            .parse::<i64>()
            .map(Node::Number)
            .map_err(|_| HandshakeError::Format(format!("bad number {body:?}"))),
        TAG_EMPTY if body.is_empty() => Ok(Node::Tree(Tree::new())),
        other => Err(HandshakeError::Format(format!("unknown value tag {other:?}"))),
    }
}

fn insert_path(tree: &mut Tree, path: &[&str], node: Node) -> Result<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| HandshakeError::Format("empty path".to_string()))?;

    let mut cursor = tree;
    for segment in parents {
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Node::Tree(Tree::new()));
        cursor = match slot {
            Node::Tree(sub) => sub,
            _ => {
                return Err(HandshakeError::Format(format!(
                    "path segment {segment:?} is both a value and a subtree"
                )))
            }
        };
    }

    match cursor.get(*last) {
        None => {
            cursor.insert(last.to_string(), node);
            Ok(())
        }
        Some(_) => Err(HandshakeError::Format(format!("duplicate path {last:?}"))),
    }
}

fn decode_tree(query: &str) -> Result<Tree> {
    let mut tree = Tree::new();
    if query.is_empty() {
        return Ok(tree);
    }
    for pair in query.split(PAIR_SEP) {
        let (path, raw) = pair
            .split_once('=')
            .ok_or_else(|| HandshakeError::Format(format!("pair without '=': {pair:?}")))?;
        let segments: Vec<&str> = path.split(PATH_SEP).collect();
        if segments.iter().any(|s| !valid_key(s)) {
            return Err(HandshakeError::Format(format!("invalid path {path:?}")));
        }
        insert_path(&mut tree, &segments, decode_value(raw)?)?;
    }
    Ok(tree)
}

/// Decode relay text into an envelope.
///
/// Empty text decodes to an empty command and tree. Otherwise the text is
/// split on the first delimiter; a missing delimiter or an undecodable
/// payload is a `FormatError`.
pub fn decode(text: &str) -> Result<Envelope> {
    if text.is_empty() {
        return Ok(Envelope::default());
    }
    let (command, query) = text.split_once(DELIMITER).ok_or_else(|| {
        HandshakeError::Format("no payload delimiter in relay text".to_string())
    })?;
    Ok(Envelope {
        command: command.to_string(),
        tree: decode_tree(query)?,
    })
}
