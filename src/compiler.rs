//! Drives a compile: parse, build, validate, then run every backend.

use std::{
    any::Any,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    builder,
    config::Language,
    diagnostic::SourceMap,
    error::{CompileError, IdlError},
    generators::{CodeGenerator, GeneratedFile},
    loader::{self, FileSystem, SourceProvider},
    model::InterfaceModel,
    validator,
};

/// Where a [`Compiler`] is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileState {
    Idle,
    Parsing,
    Building,
    Validating,
    Generating,
    Done,
    Failed,
}

impl fmt::Display for CompileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompileState::Idle => "idle",
            CompileState::Parsing => "parsing",
            CompileState::Building => "building",
            CompileState::Validating => "validating",
            CompileState::Generating => "generating",
            CompileState::Done => "done",
            CompileState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The files one backend produced.
#[derive(Debug, Clone, Serialize)]
pub struct BackendOutput {
    pub language: Language,
    pub output_dir: PathBuf,
    pub files: Vec<GeneratedFile>,
}

/// The result of a successful compile.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub model: Arc<InterfaceModel>,
    /// One entry per registered backend, in registration order.
    pub outputs: Vec<BackendOutput>,
}

impl Compilation {
    /// Writes every generated file below its backend's output directory and
    /// returns the paths written.
    pub fn write_outputs(&self) -> Result<Vec<PathBuf>, CompileError> {
        let mut written = Vec::new();
        for output in &self.outputs {
            for file in &output.files {
                let path = output.output_dir.join(&file.path);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|source| CompileError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                fs::write(&path, &file.content).map_err(|source| CompileError::Io {
                    path: path.clone(),
                    source,
                })?;
                debug!("Wrote {}", path.display());
                written.push(path);
            }
        }
        info!("Wrote {} file(s)", written.len());
        Ok(written)
    }
}

/// Compiles IDL documents into bindings for a set of backends.
///
/// Every compile starts from scratch; nothing but the backend list and the
/// source provider carries over from one compile to the next.
pub struct Compiler {
    provider: Box<dyn SourceProvider>,
    generators: Vec<Box<dyn CodeGenerator>>,
    state: CompileState,
    sources: SourceMap,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(Box::new(FileSystem))
    }
}

impl Compiler {
    pub fn new(provider: Box<dyn SourceProvider>) -> Self {
        Compiler {
            provider,
            generators: Vec::new(),
            state: CompileState::Idle,
            sources: SourceMap::default(),
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn CodeGenerator>) -> Self {
        self.add_generator(generator);
        self
    }

    pub fn add_generator(&mut self, generator: Box<dyn CodeGenerator>) {
        self.generators.push(generator);
    }

    pub fn state(&self) -> CompileState {
        self.state
    }

    /// Every document read by the last compile, for rendering diagnostics.
    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// Parses, builds and validates `entry` without running any backend.
    pub fn check(&mut self, entry: &Path) -> Result<Arc<InterfaceModel>, CompileError> {
        self.sources.clear();
        self.state = CompileState::Idle;
        let result = self.analyze(entry);
        self.state = match result {
            Ok(_) => CompileState::Done,
            Err(_) => CompileState::Failed,
        };
        result
    }

    /// Runs the whole pipeline on `entry`.
    pub fn compile(&mut self, entry: &Path) -> Result<Compilation, CompileError> {
        self.sources.clear();
        self.state = CompileState::Idle;
        let result = self.analyze(entry).and_then(|model| {
            self.enter(CompileState::Generating);
            let outputs = self.generate(&model)?;
            Ok(Compilation { model, outputs })
        });
        self.state = match result {
            Ok(_) => CompileState::Done,
            Err(_) => CompileState::Failed,
        };
        if self.state == CompileState::Done {
            info!("Compiled {}", entry.display());
        }
        result
    }

    fn enter(&mut self, state: CompileState) {
        debug!("{} -> {}", self.state, state);
        self.state = state;
    }

    /// Escalates a stage's diagnostics into a failure of that stage.
    fn fail(&self, diagnostics: Vec<IdlError>) -> CompileError {
        CompileError::Failed {
            stage: self.state,
            diagnostics,
        }
    }

    fn analyze(&mut self, entry: &Path) -> Result<Arc<InterfaceModel>, CompileError> {
        self.enter(CompileState::Parsing);
        let loaded = loader::load(self.provider.as_ref(), entry, &mut self.sources)?;
        if !loaded.errors.is_empty() {
            return Err(self.fail(loaded.errors));
        }

        self.enter(CompileState::Building);
        let model = builder::build(&loaded.documents).map_err(|errors| self.fail(errors))?;

        self.enter(CompileState::Validating);
        validator::validate(&model).map_err(|errors| self.fail(errors))?;

        Ok(Arc::new(model))
    }

    /// Runs every backend on its own thread over the shared model.
    fn generate(&self, model: &Arc<InterfaceModel>) -> Result<Vec<BackendOutput>, CompileError> {
        let results = thread::scope(|scope| {
            let handles: Vec<_> = self
                .generators
                .iter()
                .map(|generator| {
                    let model = Arc::clone(model);
                    scope.spawn(move || {
                        debug!("Running {} backend", generator.language());
                        generator.generate(&model)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        });

        let mut outputs = Vec::with_capacity(results.len());
        let mut diagnostics = Vec::new();
        for (generator, result) in self.generators.iter().zip(results) {
            match result {
                Ok(Ok(files)) => outputs.push(BackendOutput {
                    language: generator.language(),
                    output_dir: generator.options().output_dir.clone(),
                    files,
                }),
                Ok(Err(errors)) => diagnostics.extend(errors),
                Err(panic) => {
                    return Err(CompileError::Internal(format!(
                        "{} backend panicked: {}",
                        generator.language(),
                        panic_message(panic.as_ref())
                    )));
                }
            }
        }

        if diagnostics.is_empty() {
            Ok(outputs)
        } else {
            Err(self.fail(diagnostics))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::GeneratorOptions,
        error::ErrorKind,
        generators::{FileSet, create_generator},
        loader::MemorySources,
    };

    fn compiler(files: &[(&str, &str)]) -> Compiler {
        let mut sources = MemorySources::new();
        for (path, text) in files {
            sources.insert(path, *text);
        }
        Compiler::new(Box::new(sources))
    }

    struct Panicking;

    impl CodeGenerator for Panicking {
        fn language(&self) -> Language {
            Language::Rust
        }

        fn options(&self) -> &GeneratorOptions {
            unimplemented!()
        }

        fn emit_types(&self, _: &InterfaceModel, _: &mut FileSet) -> Result<(), Vec<IdlError>> {
            panic!("out of ideas")
        }

        fn emit_serializer(&self, _: &InterfaceModel, _: &mut FileSet) -> Result<(), Vec<IdlError>> {
            Ok(())
        }

        fn emit_client(&self, _: &InterfaceModel, _: &mut FileSet) -> Result<(), Vec<IdlError>> {
            Ok(())
        }

        fn emit_server(&self, _: &InterfaceModel, _: &mut FileSet) -> Result<(), Vec<IdlError>> {
            Ok(())
        }
    }

    #[test]
    fn test_states() {
        let mut compiler = compiler(&[("ok.idl", "struct P { x: int32; }"), ("bad.idl", "struct {")]);
        assert_eq!(compiler.state(), CompileState::Idle);

        compiler.compile(Path::new("ok.idl")).unwrap();
        assert_eq!(compiler.state(), CompileState::Done);

        let err = compiler.compile(Path::new("bad.idl")).unwrap_err();
        assert_eq!(compiler.state(), CompileState::Failed);
        assert!(matches!(
            err,
            CompileError::Failed {
                stage: CompileState::Parsing,
                ..
            }
        ));
        assert_eq!(err.diagnostics()[0].kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_failing_stage_is_reported() {
        let mut compiler = compiler(&[
            ("unknown.idl", "struct P { q: Missing; }"),
            ("empty.idl", "service S {}"),
        ]);
        let err = compiler.compile(Path::new("unknown.idl")).unwrap_err();
        assert!(matches!(err, CompileError::Failed { stage: CompileState::Building, .. }));

        let err = compiler.check(Path::new("empty.idl")).unwrap_err();
        assert!(matches!(err, CompileError::Failed { stage: CompileState::Validating, .. }));
        assert_eq!(err.to_string(), "validating failed with 1 error(s)");
    }

    #[test]
    fn test_sources_are_kept_for_rendering() {
        let mut compiler = compiler(&[("a.idl", "import \"b.idl\";"), ("b.idl", "struct B {}")]);
        compiler.check(Path::new("a.idl")).unwrap();
        assert_eq!(compiler.sources().len(), 2);
        assert_eq!(compiler.sources().get("b.idl"), Some("struct B {}"));
    }

    #[test]
    fn test_backend_errors_are_aggregated() {
        let mut compiler = compiler(&[("test.idl", "struct lambda { self: int8; }")])
            .with_generator(create_generator(Language::Python, GeneratorOptions::new("py")))
            .with_generator(create_generator(Language::Rust, GeneratorOptions::new("rs")));
        let err = compiler.compile(Path::new("test.idl")).unwrap_err();
        assert!(matches!(err, CompileError::Failed { stage: CompileState::Generating, .. }));
        let messages: Vec<&str> = err.diagnostics().iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "type name 'lambda' is a reserved word in Python",
                "field name 'self' is reserved for generated Python code",
                "field name 'self' cannot be used as an identifier in Rust",
            ]
        );
    }

    #[test]
    fn test_backend_panic_is_internal_error() {
        let mut compiler = compiler(&[("test.idl", "struct P {}")]).with_generator(Box::new(Panicking));
        let err = compiler.compile(Path::new("test.idl")).unwrap_err();
        match err {
            CompileError::Internal(message) => {
                assert_eq!(message, "rust backend panicked: out of ideas")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(compiler.state(), CompileState::Failed);
    }
}
