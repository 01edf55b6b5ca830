//! Canonical unit locations and reference resolution.

use std::convert::Infallible;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Normalised UTF-8 location of a unit, decoupled from the host OS.
///
/// `.` segments are dropped and `..` pops the previous segment (clamping at
/// the root), so two spellings of the same file always compare equal. This
/// is the identity the loader deduplicates on.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct VirtualPath {
    segments: Vec<String>,
    absolute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty reference")]
    EmptyReference,
    #[error("reference {0:?} does not name a file")]
    NotAFile(String),
}

impl VirtualPath {
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
            absolute: true,
        }
    }

    pub fn new_absolute<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::normalised(true, segments)
    }

    pub fn new_relative<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::normalised(false, segments)
    }

    fn normalised<I, S>(absolute: bool, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for segment in segments {
            let raw = segment.into();
            match raw.as_str() {
                "" | "." => {}
                ".." => {
                    out.pop();
                }
                _ => out.push(raw),
            }
        }
        Self {
            segments: out,
            absolute,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn join<S>(&self, segment: S) -> Self
    where
        S: Into<String>,
    {
        let mut cloned = self.segments.clone();
        cloned.push(segment.into());
        Self::normalised(self.absolute, cloned)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return self.absolute.then(Self::root);
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self::normalised(self.absolute, segments))
    }

    /// Directory a unit at this location resolves its own references
    /// against. The root has itself as its directory.
    pub fn directory(&self) -> Self {
        self.parent().unwrap_or_else(|| self.clone())
    }
}

/// Resolves a raw import reference against the directory of the importing
/// unit, producing the canonical key used for deduplication.
pub fn resolve_reference(base_directory: &VirtualPath, raw: &str) -> Result<VirtualPath, PathError> {
    let trimmed = strip_query_and_hash(raw.trim());
    if trimmed.is_empty() {
        return Err(PathError::EmptyReference);
    }
    let parts = trimmed.split(['/', '\\']).map(str::to_string);
    let resolved = if trimmed.starts_with(['/', '\\']) {
        VirtualPath::normalised(true, parts)
    } else {
        let mut segments = base_directory.segments.clone();
        segments.extend(parts);
        VirtualPath::normalised(base_directory.absolute, segments)
    };
    if resolved.segments.is_empty() {
        return Err(PathError::NotAFile(raw.to_string()));
    }
    Ok(resolved)
}

fn strip_query_and_hash(reference: &str) -> &str {
    let end = reference.find(['?', '#']).unwrap_or(reference.len());
    &reference[..end]
}

impl FromStr for VirtualPath {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for VirtualPath {
    fn from(s: &str) -> Self {
        let absolute = s.starts_with(['/', '\\']);
        Self::normalised(absolute, s.split(['/', '\\']))
    }
}

impl Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        write!(f, "{}", self.segments.join("/"))
    }
}

impl From<VirtualPath> for String {
    fn from(path: VirtualPath) -> Self {
        path.to_string()
    }
}

impl From<String> for VirtualPath {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}
