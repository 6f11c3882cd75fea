use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IndexError;

/// One name in a node path. Same-name siblings are told apart by a 1-based index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment {
    pub name: String,
    pub index: u32,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), index: 1 }
    }

    pub fn with_index(name: impl Into<String>, index: u32) -> Self {
        Self { name: name.into(), index: index.max(1) }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index > 1 { write!(f, "{}[{}]", self.name, self.index) } else { f.write_str(&self.name) }
    }
}

impl FromStr for Segment {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IndexError::InvalidArgument("empty path segment".to_string()));
        }
        let Some(open) = s.find('[') else {
            return Ok(Segment::new(s));
        };
        let (name, rest) = s.split_at(open);
        let index = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .and_then(|digits| digits.parse::<u32>().ok())
            .filter(|i| *i >= 1)
            .ok_or_else(|| IndexError::InvalidArgument(format!("invalid segment index in '{}'", s)))?;
        if name.is_empty() {
            return Err(IndexError::InvalidArgument(format!("missing segment name in '{}'", s)));
        }
        Ok(Segment::with_index(name, index))
    }
}

/// Absolute hierarchical path of a node. The root path has no segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodePath {
    segments: Vec<Segment>,
}

impl NodePath {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Final segment; `None` for the root.
    pub fn last_segment(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.is_root() {
            return None;
        }
        Some(Self { segments: self.segments[..self.segments.len() - 1].to_vec() })
    }

    pub fn child(&self, segment: Segment) -> NodePath {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend_from_slice(&self.segments);
        segments.push(segment);
        Self { segments }
    }

    /// Strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &NodePath) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }

    pub fn is_at_or_below(&self, ancestor: &NodePath) -> bool {
        self == ancestor || self.is_descendant_of(ancestor)
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Err(IndexError::InvalidArgument(format!("path must be absolute: '{}'", s)));
        };
        let segments = rest
            .split('/')
            .filter(|part| !part.is_empty())
            .map(Segment::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }
}

impl TryFrom<String> for NodePath {
    type Error = IndexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.to_string()
    }
}

/// Identifies one node in a content source: its path plus an optional stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: NodePath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

impl Location {
    pub fn new(path: NodePath) -> Self {
        Self { path, id: None }
    }

    pub fn with_id(path: NodePath, id: Uuid) -> Self {
        Self { path, id: Some(id) }
    }

    pub fn root() -> Self {
        Self::new(NodePath::root())
    }

    pub fn is_root(&self) -> bool {
        self.path.is_root()
    }

    pub fn parent_path(&self) -> Option<NodePath> {
        self.path.parent()
    }

    pub fn name(&self) -> Option<&Segment> {
        self.path.last_segment()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} ({})", self.path, id),
            None => write!(f, "{}", self.path),
        }
    }
}

impl From<NodePath> for Location {
    fn from(path: NodePath) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> NodePath {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display_round_trip() {
        assert_eq!(path("/").to_string(), "/");
        assert_eq!(path("/a/b[2]/c").to_string(), "/a/b[2]/c");
        assert_eq!(path("/a/b[1]").to_string(), "/a/b");
    }

    #[test]
    fn test_parse_rejects_relative_and_bad_index() {
        assert!("a/b".parse::<NodePath>().is_err());
        assert!("/a/b[0]".parse::<NodePath>().is_err());
        assert!("/a/b[x]".parse::<NodePath>().is_err());
        assert!("/a/[2]".parse::<NodePath>().is_err());
    }

    #[test]
    fn test_parent_and_last_segment() {
        let p = path("/a/b[3]");
        assert_eq!(p.parent(), Some(path("/a")));
        assert_eq!(p.last_segment(), Some(&Segment::with_index("b", 3)));
        assert_eq!(NodePath::root().parent(), None);
        assert_eq!(path("/a").parent(), Some(NodePath::root()));
    }

    #[test]
    fn test_descendant_checks() {
        assert!(path("/a/b").is_descendant_of(&path("/a")));
        assert!(path("/a/b").is_descendant_of(&NodePath::root()));
        assert!(!path("/a").is_descendant_of(&path("/a")));
        assert!(path("/a").is_at_or_below(&path("/a")));
        assert!(!path("/ab").is_descendant_of(&path("/a")));
    }

    #[test]
    fn test_location_serializes_path_as_string() {
        let loc = Location::new(path("/docs/readme"));
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!(json, r#"{"path":"/docs/readme"}"#);
        let back: Location = serde_json::from_str(&json).unwrap();
        assert_eq!(back, loc);
    }
}
