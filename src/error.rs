//! Error types shared by every compiler stage.
//!
//! User-facing problems with an IDL document are [`IdlError`]s, which every
//! stage accumulates instead of returning early. Anything outside that family
//! (I/O, a crashed backend) is a [`CompileError`] of its own kind and is never
//! mixed into the diagnostics list.

use std::{fmt, io, path::PathBuf};

use serde::Serialize;

use crate::{compiler::CompileState, location::Location};

/// The family an [`IdlError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Malformed input text.
    Syntax,
    /// Well-formed input describing an invalid model.
    Semantic,
    /// A valid model that a backend cannot express.
    CodeGen,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "syntax error"),
            ErrorKind::Semantic => write!(f, "semantic error"),
            ErrorKind::CodeGen => write!(f, "codegen error"),
        }
    }
}

/// A secondary location attached to a diagnostic, such as the first
/// definition of a duplicated name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub location: Location,
    pub message: String,
}

/// A user-facing error tied to a position in an IDL document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{location}: {kind}: {message}")]
pub struct IdlError {
    pub kind: ErrorKind,
    pub location: Location,
    pub message: String,
    pub notes: Vec<Note>,
}

impl IdlError {
    pub fn new(kind: ErrorKind, location: Location, message: impl Into<String>) -> Self {
        IdlError {
            kind,
            location,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn syntax(location: Location, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, location, message)
    }

    pub fn semantic(location: Location, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Semantic, location, message)
    }

    pub fn codegen(location: Location, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CodeGen, location, message)
    }

    /// Attaches a related location to the error.
    pub fn with_note(mut self, location: Location, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            location,
            message: message.into(),
        });
        self
    }
}

/// Turns a stage's accumulated errors into its result.
pub(crate) fn finish<T>(value: T, errors: Vec<IdlError>) -> Result<T, Vec<IdlError>> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

/// The outcome of a failed compile.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A stage finished with one or more IDL diagnostics.
    #[error("{stage} failed with {} error(s)", diagnostics.len())]
    Failed {
        stage: CompileState,
        diagnostics: Vec<IdlError>,
    },

    /// Reading a source document or writing generated output failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The compiler itself misbehaved, e.g. a backend panicked.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    /// The IDL diagnostics carried by this error, empty for non-IDL failures.
    pub fn diagnostics(&self) -> &[IdlError] {
        match self {
            CompileError::Failed { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}
