//! Rendering of [`IdlError`]s with source context.

use std::{collections::BTreeMap, fmt::Write, sync::Arc};

use crate::{
    color,
    error::{ErrorKind, IdlError},
    location::Location,
};

/// Number of lines shown above the offending one.
const CONTEXT_LINES: usize = 2;

/// The text of every document read during a compile, by source name.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    files: BTreeMap<Arc<str>, String>,
}

impl SourceMap {
    pub fn insert(&mut self, name: Arc<str>, text: String) {
        self.files.insert(name, text);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

struct Palette {
    error: &'static str,
    accent: &'static str,
    note: &'static str,
    bold: &'static str,
    end: &'static str,
}

impl Palette {
    fn new(enabled: bool) -> Self {
        if enabled {
            Palette {
                error: color::RED,
                accent: color::BLUE,
                note: color::YELLOW,
                bold: color::BOLD,
                end: color::END,
            }
        } else {
            Palette {
                error: "",
                accent: "",
                note: "",
                bold: "",
                end: "",
            }
        }
    }
}

fn label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Syntax => "syntax",
        ErrorKind::Semantic => "semantic",
        ErrorKind::CodeGen => "codegen",
    }
}

/// Renders a diagnostic as a multi-line report:
///
/// ```text
/// error[semantic]: unknown type 'Pointt'
///   --> geometry.idl:4:14
///    |
///  3 | service Geometry {
///  4 |     distance(a: Pointt, b: Point) -> float64;
///    |                 ^^^^^^
/// ```
///
/// Locations whose document is missing from `sources` are rendered without
/// the snippet.
pub fn render(error: &IdlError, sources: &SourceMap, color: bool) -> String {
    let palette = Palette::new(color);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{}error[{}]{}{}: {}{}",
        palette.bold,
        palette.error,
        label(error.kind),
        palette.end,
        palette.bold,
        error.message,
        palette.end
    );
    snippet(&mut out, &error.location, sources, &palette);

    for note in &error.notes {
        let _ = writeln!(
            out,
            "{}{}note{}: {}",
            palette.bold, palette.note, palette.end, note.message
        );
        snippet(&mut out, &note.location, sources, &palette);
    }
    out
}

/// Renders every diagnostic, separated by blank lines.
pub fn render_all(errors: &[IdlError], sources: &SourceMap, color: bool) -> String {
    errors
        .iter()
        .map(|error| render(error, sources, color))
        .collect::<Vec<_>>()
        .join("\n")
}

fn snippet(out: &mut String, location: &Location, sources: &SourceMap, palette: &Palette) {
    let Some(text) = sources.get(&location.file) else {
        let _ = writeln!(out, "  {}-->{} {location}", palette.accent, palette.end);
        return;
    };

    let lines: Vec<&str> = text.lines().collect();
    let last = location.line.min(lines.len().max(1));
    let first = last.saturating_sub(CONTEXT_LINES).max(1);
    let width = last.to_string().len();
    let gutter = " ".repeat(width);

    let _ = writeln!(
        out,
        "{gutter} {}-->{} {location}",
        palette.accent, palette.end
    );
    let _ = writeln!(out, "{gutter} {}|{}", palette.accent, palette.end);
    for number in first..=last {
        let line = lines.get(number - 1).copied().unwrap_or_default();
        let _ = writeln!(
            out,
            "{}{number:>width$} |{} {line}",
            palette.accent, palette.end
        );
    }

    let line = lines.get(last - 1).copied().unwrap_or_default();
    let available = line.chars().count().saturating_sub(location.column.saturating_sub(1));
    let span = location
        .len
        .min(text.len().saturating_sub(location.offset))
        .min(available);
    let spanned = text
        .get(location.offset..location.offset + span)
        .map(|s| s.chars().count())
        .unwrap_or(span);
    let _ = writeln!(
        out,
        "{gutter} {}|{} {}{}{}{}",
        palette.accent,
        palette.end,
        " ".repeat(location.column.saturating_sub(1)),
        palette.error,
        "^".repeat(spanned.max(1)),
        palette.end
    );
}
