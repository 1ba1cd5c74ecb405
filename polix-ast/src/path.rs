//! Paths addressing into a nested document, and into a residual.
//!
//! A [`Path`] is an ordered sequence of [`Segment`]s. Document paths are
//! built purely from [`Segment::Field`]; residual paths additionally use
//! [`Segment::Index`] to key quantifier elements (spec §4.5: "keyed with the
//! element index in the residual path so that partial data can still produce
//! an open residual").

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// A single step of a [`Path`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Segment {
    /// A named field of a map/struct.
    Field(String),
    /// A positional index into a list, used for quantifier elements.
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// An ordered sequence of [`Segment`]s addressing into a document or residual.
#[derive(Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Path(SmallVec<[Segment; 4]>);

impl Path {
    /// Creates an empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a path from dotted field names, e.g. `["user", "role"]`.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(|s| Segment::Field(s.into())).collect())
    }

    /// Returns a path consisting of a single field.
    pub fn field(name: impl Into<String>) -> Self {
        Self::from_fields([name.into()])
    }

    /// Appends a field segment, consuming and returning `self`.
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.0.push(Segment::Field(name.into()));
        self
    }

    /// Appends an index segment, consuming and returning `self`.
    pub fn with_index(mut self, index: usize) -> Self {
        self.0.push(Segment::Index(index));
        self
    }

    /// Appends a segment in place.
    pub fn push(&mut self, segment: Segment) {
        self.0.push(segment);
    }

    /// Returns true if the path addresses the document root.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the segments as a slice.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Returns the first segment and the remaining path, if any.
    pub fn split_first(&self) -> Option<(&Segment, Path)> {
        let (first, rest) = self.0.split_first()?;
        Some((first, Path(rest.into())))
    }

    /// Returns a new path extended with `other`'s segments.
    pub fn join(&self, other: &Path) -> Path {
        let mut joined = self.0.clone();
        joined.extend(other.0.iter().cloned());
        Path(joined)
    }

    /// Returns true if `self` is a prefix of (or equal to) `other`.
    pub fn is_ancestor(&self, other: &Path) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Iterates over the segments.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.0.iter()
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                Segment::Field(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mixes_fields_and_indices() {
        let path = Path::field("users").with_index(1).with_field("role");
        assert_eq!(path.to_string(), "users[1].role");
    }

    #[test]
    fn ancestor() {
        let a = Path::from_fields(["user"]);
        let b = Path::from_fields(["user", "role"]);
        assert!(a.is_ancestor(&b));
        assert!(!b.is_ancestor(&a));
        assert!(a.is_ancestor(&a));
    }

    #[test]
    fn split_first_walks_segments() {
        let path = Path::from_fields(["user", "role"]);
        let (first, rest) = path.split_first().unwrap();
        assert_eq!(first, &Segment::Field("user".into()));
        assert_eq!(rest, Path::from_fields(["role"]));
    }
}
