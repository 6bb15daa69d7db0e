//! References between descriptors and between pipeline stages.
//!
//! A descriptor never copies another descriptor's derived value (an ARN, a
//! repository URI, a variable published by an earlier stage). It embeds a
//! token that the provisioning engine, or the pipeline executor, resolves.
//!
//! # Token Formats
//!
//! - `$${Resource.attribute}` - derived attribute of a declared descriptor
//! - `#{Namespace.NAME}` - variable published by an earlier pipeline action
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so `$CLUSTER_NAME` and
//! `${CLUSTER_NAME}` reach the build shell untouched.
//!
//! # Escaping
//!
//! `$$${` produces a literal `$${`, `##{` produces a literal `#{`.
//!
//! # Example
//!
//! ```
//! use shiplane_lib::placeholder::{parse, Placeholder, Segment, VariableRef};
//!
//! let segments = parse("v#{BuildVariables.BUILD_VERSION}").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("v".to_string()),
//!     Segment::Placeholder(Placeholder::Variable(VariableRef::new("BuildVariables", "BUILD_VERSION"))),
//! ]);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::warn;

/// Derived attributes a descriptor exposes to others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
  /// Globally unique resource identifier.
  Arn,
  /// Push/pull URI of an image repository.
  RepositoryUri,
}

impl Attribute {
  pub fn as_str(&self) -> &'static str {
    match self {
      Attribute::Arn => "arn",
      Attribute::RepositoryUri => "repository_uri",
    }
  }
}

impl FromStr for Attribute {
  type Err = PlaceholderError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "arn" => Ok(Attribute::Arn),
      "repository_uri" => Ok(Attribute::RepositoryUri),
      other => Err(PlaceholderError::UnknownAttribute(other.to_string())),
    }
  }
}

/// A reference to a derived attribute of another descriptor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrRef {
  pub resource: String,
  pub attribute: Attribute,
}

impl AttrRef {
  pub fn new(resource: impl Into<String>, attribute: Attribute) -> Self {
    Self {
      resource: resource.into(),
      attribute,
    }
  }

  pub fn token(&self) -> String {
    format!("$${{{}.{}}}", self.resource, self.attribute.as_str())
  }
}

/// A reference to a variable published under a namespace by an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariableRef {
  pub namespace: String,
  pub name: String,
}

impl VariableRef {
  pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      namespace: namespace.into(),
      name: name.into(),
    }
  }

  pub fn token(&self) -> String {
    format!("#{{{}.{}}}", self.namespace, self.name)
  }
}

impl fmt::Display for AttrRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.token())
  }
}

impl fmt::Display for VariableRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.token())
  }
}

impl Serialize for AttrRef {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.token())
  }
}

impl<'de> Deserialize<'de> for AttrRef {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match parse(&raw).map_err(serde::de::Error::custom)?.as_slice() {
      [Segment::Placeholder(Placeholder::Attribute(r))] => Ok(r.clone()),
      _ => Err(serde::de::Error::custom(format!("not an attribute reference: '{raw}'"))),
    }
  }
}

impl Serialize for VariableRef {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.token())
  }
}

impl<'de> Deserialize<'de> for VariableRef {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match parse(&raw).map_err(serde::de::Error::custom)?.as_slice() {
      [Segment::Placeholder(Placeholder::Variable(r))] => Ok(r.clone()),
      _ => Err(serde::de::Error::custom(format!("not a variable reference: '{raw}'"))),
    }
  }
}

/// A parsed reference token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  Attribute(AttrRef),
  Variable(VariableRef),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("unknown attribute: {0}")]
  UnknownAttribute(String),
}

/// Supplies values for reference tokens.
///
/// `None` means the value was never published. Substitution treats that as an
/// empty string, matching how the pipeline executor behaves.
pub trait Resolver {
  fn resolve_attribute(&self, reference: &AttrRef) -> Option<&str>;

  fn resolve_variable(&self, reference: &VariableRef) -> Option<&str>;
}

/// In-memory table of known attribute values and published variables.
#[derive(Debug, Clone, Default)]
pub struct KnownValues {
  attributes: BTreeMap<AttrRef, String>,
  variables: BTreeMap<VariableRef, String>,
}

impl KnownValues {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_attribute(mut self, reference: AttrRef, value: impl Into<String>) -> Self {
    self.attributes.insert(reference, value.into());
    self
  }

  /// Record a variable published under `namespace`. Each slot has one writer;
  /// publishing twice keeps the latest value.
  pub fn publish(&mut self, namespace: &str, name: &str, value: impl Into<String>) {
    self.variables.insert(VariableRef::new(namespace, name), value.into());
  }
}

impl Resolver for KnownValues {
  fn resolve_attribute(&self, reference: &AttrRef) -> Option<&str> {
    self.attributes.get(reference).map(String::as_str)
  }

  fn resolve_variable(&self, reference: &VariableRef) -> Option<&str> {
    self.variables.get(reference).map(String::as_str)
  }
}

#[derive(Clone, Copy)]
enum TokenKind {
  Attribute,
  Variable,
}

/// Parse a string into literal text and reference tokens.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut pos = 0;

  while pos < input.len() {
    let tail = &input[pos..];

    if tail.starts_with("$$${") {
      literal.push_str("$${");
      pos += 4;
      continue;
    }
    if tail.starts_with("##{") {
      literal.push_str("#{");
      pos += 3;
      continue;
    }

    let (open_len, kind) = if tail.starts_with("$${") {
      (3, TokenKind::Attribute)
    } else if tail.starts_with("#{") {
      (2, TokenKind::Variable)
    } else {
      let Some(ch) = tail.chars().next() else {
        break;
      };
      literal.push(ch);
      pos += ch.len_utf8();
      continue;
    };

    let body = &tail[open_len..];
    let Some(close) = body.find('}') else {
      return Err(PlaceholderError::Unclosed(pos));
    };

    if !literal.is_empty() {
      segments.push(Segment::Literal(std::mem::take(&mut literal)));
    }
    segments.push(Segment::Placeholder(parse_token(&body[..close], kind)?));
    pos += open_len + close + 1;
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_token(content: &str, kind: TokenKind) -> Result<Placeholder, PlaceholderError> {
  let (left, right) = content
    .split_once('.')
    .ok_or_else(|| PlaceholderError::Malformed(format!("missing '.' in '{content}'")))?;

  let valid = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
  if !valid(left) || !valid(right) {
    return Err(PlaceholderError::Malformed(content.to_string()));
  }

  Ok(match kind {
    TokenKind::Attribute => Placeholder::Attribute(AttrRef::new(left, right.parse()?)),
    TokenKind::Variable => Placeholder::Variable(VariableRef::new(left, right)),
  })
}

/// Substitute every reference token in `input`.
///
/// Unresolved references become the empty string and are logged.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  Ok(substitute_segments(&segments, resolver))
}

pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> String {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(Placeholder::Attribute(r)) => match resolver.resolve_attribute(r) {
        Some(value) => result.push_str(value),
        None => warn!(reference = %r, "unresolved attribute reference, substituting empty value"),
      },
      Segment::Placeholder(Placeholder::Variable(r)) => match resolver.resolve_variable(r) {
        Some(value) => result.push_str(value),
        None => warn!(reference = %r, "variable was not published, substituting empty value"),
      },
    }
  }

  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use tracing_test::traced_test;

  fn repo_uri() -> AttrRef {
    AttrRef::new("AppRepository", Attribute::RepositoryUri)
  }

  fn build_version() -> VariableRef {
    VariableRef::new("BuildVariables", "BUILD_VERSION")
  }

  #[test]
  fn tokens_render_in_engine_syntax() {
    assert_eq!(repo_uri().token(), "$${AppRepository.repository_uri}");
    assert_eq!(build_version().token(), "#{BuildVariables.BUILD_VERSION}");
  }

  #[test]
  fn parse_tokens_back() {
    let input = format!("{}:{}", repo_uri().token(), build_version().token());
    let segments = parse(&input).unwrap();
    assert_eq!(
      segments,
      vec![
        Segment::Placeholder(Placeholder::Attribute(repo_uri())),
        Segment::Literal(":".to_string()),
        Segment::Placeholder(Placeholder::Variable(build_version())),
      ]
    );
  }

  #[test]
  fn shell_variables_pass_through() {
    let input = "helm upgrade $APP_NAME-${DEPLOY_ENV} -n $DEPLOY_NS";
    assert_eq!(parse(input).unwrap(), vec![Segment::Literal(input.to_string())]);
  }

  #[test]
  fn escapes_produce_literals() {
    let segments = parse("$$${x.arn} ##{a.b}").unwrap();
    assert_eq!(segments, vec![Segment::Literal("$${x.arn} #{a.b}".to_string())]);
  }

  #[test]
  fn unclosed_token_is_an_error() {
    assert_eq!(parse("ab#{BuildVariables.X").unwrap_err(), PlaceholderError::Unclosed(2));
  }

  #[test]
  fn malformed_tokens_are_rejected() {
    assert!(matches!(parse("#{NoDot}"), Err(PlaceholderError::Malformed(_))));
    assert!(matches!(parse("#{.X}"), Err(PlaceholderError::Malformed(_))));
    assert!(matches!(
      parse("$${Repo.color}"),
      Err(PlaceholderError::UnknownAttribute(a)) if a == "color"
    ));
  }

  #[test]
  fn substitute_uses_published_values() {
    let mut values = KnownValues::new().with_attribute(repo_uri(), "123.dkr.ecr/app");
    values.publish("BuildVariables", "BUILD_VERSION", "1.4.2");

    let input = format!("{}:{}", repo_uri().token(), build_version().token());
    assert_eq!(substitute(&input, &values).unwrap(), "123.dkr.ecr/app:1.4.2");
  }

  #[test]
  #[traced_test]
  fn unpublished_variable_substitutes_empty() {
    let values = KnownValues::new();
    assert_eq!(substitute(&build_version().token(), &values).unwrap(), "");
    assert!(logs_contain("variable was not published"));
  }

  #[test]
  fn references_serialize_as_tokens() {
    let json = serde_json::to_string(&repo_uri()).unwrap();
    assert_eq!(json, "\"$${AppRepository.repository_uri}\"");
    let back: AttrRef = serde_json::from_str(&json).unwrap();
    assert_eq!(back, repo_uri());

    let err = serde_json::from_str::<VariableRef>("\"plain\"");
    assert!(err.is_err());
  }
}
