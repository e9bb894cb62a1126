use std::{fmt::Display, sync::Arc};

use serde::Serialize;

/// A position in an IDL document, attached to every syntax and model node.
///
/// `line` and `column` are 1-based and count characters; `offset` and `len`
/// describe the byte span of the token the location was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
    pub len: usize,
}

impl Location {
    pub fn new(file: Arc<str>, line: usize, column: usize, offset: usize, len: usize) -> Self {
        Location {
            file,
            line,
            column,
            offset,
            len,
        }
    }

    /// Returns a location spanning from the start of `self` to the end of `end`.
    ///
    /// Both locations must come from the same document; otherwise `self` is
    /// returned unchanged.
    pub fn to(&self, end: &Location) -> Location {
        if self.file != end.file || end.offset < self.offset {
            return self.clone();
        }
        Location {
            len: end.offset + end.len - self.offset,
            ..self.clone()
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
