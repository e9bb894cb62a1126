//! Reads a root document and everything it imports.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs, io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    ast::Document,
    diagnostic::SourceMap,
    error::{CompileError, IdlError},
    location::Location,
    parser,
};

/// Where the compiler reads IDL text from.
pub trait SourceProvider: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads documents from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystem;

impl SourceProvider for FileSystem {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Serves documents from memory, keyed by normalised path.
#[derive(Debug, Default, Clone)]
pub struct MemorySources {
    files: HashMap<PathBuf, String>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), text.into());
    }

    pub fn with(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl SourceProvider for MemorySources {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no such document")
        })
    }
}

/// A parsed document and the source names of the documents it imports.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub document: Document,
    pub imports: Vec<Arc<str>>,
}

/// Everything read during one load, including the problems found.
#[derive(Debug, Default)]
pub struct Loaded {
    /// Documents in load order; the root document comes first.
    pub documents: Vec<LoadedDocument>,
    pub errors: Vec<IdlError>,
}

/// Loads `entry` and, breadth first, every document it imports.
///
/// Imports are resolved relative to the importing document and each file is
/// read once, so import cycles terminate. Every text read is recorded in
/// `sources` for diagnostic rendering. Only failing to read `entry` itself
/// is an error here; problems in imported files are reported as
/// diagnostics.
pub fn load(
    provider: &dyn SourceProvider,
    entry: &Path,
    sources: &mut SourceMap,
) -> Result<Loaded, CompileError> {
    let root = normalize(entry);
    let mut loaded = Loaded::default();
    let mut seen = HashSet::from([root.clone()]);
    let mut queue: VecDeque<(PathBuf, Option<Location>)> = VecDeque::from([(root, None)]);

    while let Some((path, origin)) = queue.pop_front() {
        let text = match provider.read(&path) {
            Ok(text) => text,
            Err(source) => match origin {
                None => return Err(CompileError::Io { path, source }),
                Some(location) => {
                    warn!("Failed to read import {}: {source}", path.display());
                    loaded.errors.push(IdlError::semantic(
                        location,
                        format!("cannot import '{}': {source}", path.display()),
                    ));
                    continue;
                }
            },
        };

        let name = source_name(&path);
        debug!("Loaded {name} ({} bytes)", text.len());
        let parsed = parser::parse(name.clone(), &text);
        sources.insert(name, text);

        let document = match parsed {
            Ok(document) => document,
            Err(errors) => {
                loaded.errors.extend(errors);
                continue;
            }
        };

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut imports = Vec::with_capacity(document.imports.len());
        for import in &document.imports {
            let target = normalize(&dir.join(&import.path));
            imports.push(source_name(&target));
            if seen.insert(target.clone()) {
                queue.push_back((target, Some(import.location.clone())));
            }
        }
        loaded.documents.push(LoadedDocument { document, imports });
    }

    Ok(loaded)
}

/// The name a document is known by in locations and the source map.
pub fn source_name(path: &Path) -> Arc<str> {
    Arc::from(path.display().to_string())
}

/// Removes `.` components and folds `..` into its parent without touching
/// the file system.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}
