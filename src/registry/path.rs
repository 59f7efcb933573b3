//! Slash-delimited addresses into the registry tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a node in the remote registry.
///
/// Opaque slash-delimited string, tokenized before each access. An empty
/// path is legal and marks a binding with no backing store (local-only
/// mirror).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    /// Build a path from its string form.
    pub fn new(path: impl Into<String>) -> Self {
        RemotePath(path.into())
    }

    /// A path with no backing store.
    pub fn empty() -> Self {
        RemotePath(String::new())
    }

    /// True if this path has no backing store.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tokenize into path segments, skipping empty components so that
    /// `"a//b/"` addresses the same node as `"a/b"`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The raw string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of a sub-node below this path.
    pub fn join(&self, segment: &str) -> RemotePath {
        if self.0.is_empty() {
            RemotePath(segment.to_string())
        } else {
            RemotePath(format!("{}/{}", self.0, segment))
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemotePath {
    fn from(s: &str) -> Self {
        RemotePath::new(s)
    }
}

impl From<String> for RemotePath {
    fn from(s: String) -> Self {
        RemotePath(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_skip_empty_components() {
        let path = RemotePath::new("boards//raf5/position/");
        let segments: Vec<_> = path.segments().collect();
        assert_eq!(segments, ["boards", "raf5", "position"]);
    }

    #[test]
    fn empty_path_has_no_segments() {
        let path = RemotePath::empty();
        assert!(path.is_empty());
        assert_eq!(path.segments().count(), 0);
    }

    #[test]
    fn join_extends_the_address() {
        let path = RemotePath::new("dsc/switching");
        assert_eq!(path.join("adjust").as_str(), "dsc/switching/adjust");
        assert_eq!(RemotePath::empty().join("adjust").as_str(), "adjust");
    }
}
