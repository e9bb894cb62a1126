use std::{
    fs,
    path::{Path, PathBuf},
};

use basalt::{
    ast::PrimitiveType,
    compiler::{CompileState, Compiler},
    config::{GeneratorOptions, Language, ProjectConfig},
    diagnostic::render_all,
    error::{CompileError, ErrorKind, IdlError},
    generators::{GeneratedFile, create_generator},
    loader::MemorySources,
    model::{QualifiedName, TypeDef, TypeRef},
};

fn in_memory(files: &[(&str, &str)]) -> Compiler {
    let mut sources = MemorySources::new();
    for (path, text) in files {
        sources.insert(path, *text);
    }
    Compiler::new(Box::new(sources))
}

fn with_backends(compiler: Compiler, languages: &[Language]) -> Compiler {
    languages.iter().fold(compiler, |compiler, language| {
        compiler.with_generator(create_generator(
            *language,
            GeneratorOptions::new(format!("out/{language}")),
        ))
    })
}

fn messages(errors: &[IdlError]) -> Vec<&str> {
    errors.iter().map(|e| e.message.as_str()).collect()
}

fn fixture(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(path)
}

fn content<'f>(files: &'f [GeneratedFile], path: &str) -> &'f str {
    files
        .iter()
        .find(|f| f.path == Path::new(path))
        .map(|f| f.content.as_str())
        .unwrap_or_else(|| panic!("no generated file {path}"))
}

const GEOMETRY: &str = "
struct Point { x: int32; y: int32; }
service Geometry { distance(a: Point, b: Point) -> float64; }
";

#[test]
fn point_geometry() {
    let mut compiler = with_backends(
        in_memory(&[("geo.idl", GEOMETRY)]),
        &[Language::Python, Language::Rust],
    );
    let compilation = compiler.compile(Path::new("geo.idl")).unwrap();
    assert_eq!(compiler.state(), CompileState::Done);

    let model = &compilation.model;
    match model.type_def(&QualifiedName::new("geo", "Point")) {
        Some(TypeDef::Struct(point)) => {
            let fields: Vec<(&str, u16, &TypeRef)> = point
                .fields
                .iter()
                .map(|f| (f.name.as_str(), f.id, &f.ty))
                .collect();
            let int32 = TypeRef::Primitive(PrimitiveType::Int32);
            assert_eq!(fields, vec![("x", 1, &int32), ("y", 2, &int32)]);
        }
        other => panic!("expected struct, got {other:?}"),
    }
    let service = model.service(&QualifiedName::new("geo", "Geometry")).unwrap();
    assert_eq!(service.functions[0].id, 1);
    assert_eq!(service.functions[0].params.len(), 2);

    assert_eq!(compilation.outputs.len(), 2);
    let python = &compilation.outputs[0];
    assert_eq!(python.language, Language::Python);
    assert_eq!(python.output_dir, PathBuf::from("out/python"));
    let module = content(&python.files, "geo/geo.py");
    assert!(module.contains("class Point(object):"));
    assert!(module.contains("class GeometryClient(object):"));
    assert!(module.contains("class GeometryProcessor(object):"));

    let rust = &compilation.outputs[1];
    let module = content(&rust.files, "geo/geo.rs");
    assert!(module.contains("pub struct Point {\n    pub x: i32,\n    pub y: i32,\n}"));
    assert!(module.contains("pub trait GeometryHandler {"));
}

#[test]
fn self_containing_struct_is_rejected() {
    let mut compiler = in_memory(&[("test.idl", "struct A { next: A; }")]);
    let err = compiler.compile(Path::new("test.idl")).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Failed {
            stage: CompileState::Validating,
            ..
        }
    ));
    assert_eq!(
        messages(err.diagnostics()),
        vec!["'test.A' contains itself by value: test.A -> test.A"]
    );
    assert_eq!(err.diagnostics()[0].location.line, 1);
}

#[test]
fn container_breaks_cycle() {
    let mut compiler = with_backends(
        in_memory(&[("test.idl", "struct A { items: list<A>; children: map<string, A>; }")]),
        &[Language::Python, Language::Rust],
    );
    let compilation = compiler.compile(Path::new("test.idl")).unwrap();
    let rust = content(&compilation.outputs[1].files, "test/test.rs");
    assert!(rust.contains("pub items: Vec<A>,"));
    assert!(rust.contains("pub children: std::collections::HashMap<String, A>,"));
}

#[test]
fn undefined_type() {
    let mut compiler = in_memory(&[("test.idl", "struct User {\n    hdr: Header;\n}")]);
    let err = compiler.compile(Path::new("test.idl")).unwrap_err();
    let diagnostics = err.diagnostics();
    assert_eq!(messages(diagnostics), vec!["unknown type 'Header'"]);
    assert_eq!(diagnostics[0].kind, ErrorKind::Semantic);
    assert_eq!(diagnostics[0].location.line, 2);
}

#[test]
fn duplicate_names() {
    let mut compiler = in_memory(&[(
        "geo.idl",
        "struct Point { x: int32; }\nstruct Point { y: int32; }",
    )]);
    let err = compiler.compile(Path::new("geo.idl")).unwrap_err();
    let diagnostics = err.diagnostics();
    assert_eq!(
        messages(diagnostics),
        vec!["duplicate struct 'Point' in namespace 'geo'"]
    );
    assert_eq!(diagnostics[0].location.line, 2);
    assert_eq!(diagnostics[0].notes[0].location.line, 1);
}

#[test]
fn forward_references() {
    let mut compiler = in_memory(&[(
        "test.idl",
        "service Shapes { largest(all: Shapes_) -> Shape; }
         typedef Shapes_ = list<Shape>;
         struct Shape { kind: Kind; }
         enum Kind { CIRCLE, SQUARE }",
    )]);
    assert!(compiler.check(Path::new("test.idl")).is_ok());
}

#[test]
fn every_error_is_reported_in_one_run() {
    let mut compiler = in_memory(&[(
        "test.idl",
        "struct A { b: Missing; }
         struct C { d: AlsoMissing; }",
    )]);
    let err = compiler.compile(Path::new("test.idl")).unwrap_err();
    assert_eq!(
        messages(err.diagnostics()),
        vec!["unknown type 'Missing'", "unknown type 'AlsoMissing'"]
    );

    let mut compiler = in_memory(&[("test.idl", "struct A { b: int32 }\nstruct { }")]);
    let err = compiler.compile(Path::new("test.idl")).unwrap_err();
    assert_eq!(err.diagnostics().len(), 2);
    assert!(err.diagnostics().iter().all(|e| e.kind == ErrorKind::Syntax));
}

#[test]
fn backend_output_is_independent_of_other_backends() {
    let files = |languages: &[Language], language: Language| {
        let mut compiler = with_backends(in_memory(&[("geo.idl", GEOMETRY)]), languages);
        let compilation = compiler.compile(Path::new("geo.idl")).unwrap();
        compilation
            .outputs
            .into_iter()
            .find(|o| o.language == language)
            .map(|o| o.files)
            .unwrap()
    };
    assert_eq!(
        files(&[Language::Python], Language::Python),
        files(&[Language::Rust, Language::Python], Language::Python)
    );
    assert_eq!(
        files(&[Language::Rust], Language::Rust),
        files(&[Language::Python, Language::Rust], Language::Rust)
    );
}

#[test]
fn imports_and_missing_imports() {
    let mut compiler = in_memory(&[
        (
            "app.idl",
            "import \"lib/shapes.idl\";\nimport \"lib/gone.idl\";\nstruct Scene { p: shapes.Point; }",
        ),
        ("lib/shapes.idl", "namespace shapes;\nstruct Point { x: int8; }"),
    ]);
    let err = compiler.compile(Path::new("app.idl")).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Failed {
            stage: CompileState::Parsing,
            ..
        }
    ));
    let diagnostics = err.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, ErrorKind::Semantic);
    assert!(diagnostics[0].message.starts_with("cannot import 'lib/gone.idl'"));
    assert_eq!(diagnostics[0].location.line, 2);

    let rendered = render_all(diagnostics, compiler.sources(), false);
    assert!(rendered.starts_with("error[semantic]: cannot import 'lib/gone.idl'"));
    assert!(rendered.contains("import \"lib/gone.idl\";"));
}

#[test]
fn missing_root_document() {
    let mut compiler = in_memory(&[]);
    let err = compiler.compile(Path::new("nowhere.idl")).unwrap_err();
    assert!(matches!(err, CompileError::Io { .. }));
    assert!(err.diagnostics().is_empty());
}

#[test]
fn compile_files_and_write_outputs() {
    let out = tempfile::tempdir().unwrap();
    let mut compiler = Compiler::default()
        .with_generator(create_generator(
            Language::Python,
            GeneratorOptions::new(out.path().join("py")),
        ))
        .with_generator(create_generator(
            Language::Rust,
            GeneratorOptions::new(out.path().join("rs")).with_emit_server(false),
        ));
    let compilation = compiler.compile(&fixture("geometry.idl")).unwrap();

    let exceptions: Vec<(String, u32)> = compilation
        .model
        .exceptions()
        .map(|e| (e.record.name.to_string(), e.class_id))
        .collect();
    assert_eq!(exceptions, vec![("errors.EmptyPath".to_string(), 1)]);

    let written = compilation.write_outputs().unwrap();
    assert_eq!(written.len(), 8);

    let python = fs::read_to_string(out.path().join("py/geometry/geometry.py")).unwrap();
    assert!(python.contains("from . import errors as _ns_errors\n"));
    assert!(python.contains("            1: _ns_errors.EmptyPathPacker,\n"));
    assert!(python.contains("    METRE = 1000\n"));
    assert!(python.contains("\nDEFAULT_UNIT = Unit.METRE\n"));
    assert!(out.path().join("py/geometry/errors.py").is_file());
    assert!(out.path().join("py/geometry/_wire.py").is_file());
    assert!(out.path().join("py/geometry/__init__.py").is_file());

    let rust = fs::read_to_string(out.path().join("rs/geometry/geometry.rs")).unwrap();
    assert!(rust.contains("EmptyPath(super::errors::EmptyPath),"));
    assert!(rust.contains("pub const DEFAULT_UNIT: Unit = Unit::Metre;"));
    assert!(!rust.contains("GeometryHandler"));
    assert!(out.path().join("rs/geometry/mod.rs").is_file());
}

#[test]
fn project_file_drives_targets() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("basalt.toml");
    fs::write(
        &config_path,
        format!(
            "input = {:?}\n\n[[target]]\nlanguage = \"python\"\noutput-dir = \"gen\"\npackage = \"acme.geo\"\nemit-server = false\n",
            fixture("geometry.idl").display().to_string()
        ),
    )
    .unwrap();

    let project = ProjectConfig::load(&config_path).unwrap();
    let mut compiler = Compiler::default();
    for generator in project.generators() {
        compiler.add_generator(generator);
    }
    let input = project.input.clone().unwrap();
    let compilation = compiler.compile(&input).unwrap();
    compilation.write_outputs().unwrap();

    let module = fs::read_to_string(dir.path().join("gen/acme/geo/geometry.py")).unwrap();
    assert!(module.contains("class GeometryClient(object):"));
    assert!(!module.contains("GeometryHandler"));
}

#[test]
fn model_dump_is_json() {
    let mut compiler = in_memory(&[("geo.idl", GEOMETRY)]);
    let model = compiler.check(Path::new("geo.idl")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&model.to_json().unwrap()).unwrap();
    assert_eq!(json["root"], "geo");
    assert_eq!(json["namespaces"]["geo"]["types"]["Point"]["kind"], "struct");
}
