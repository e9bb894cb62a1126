use std::{
    collections::{BTreeMap, btree_map::Entry},
    path::PathBuf,
    sync::Arc,
};

use serde::Serialize;

use crate::{
    config::{GeneratorOptions, Language},
    error::{IdlError, finish},
    location::Location,
    model::{InterfaceModel, Namespace, TypeDef, TypeRef},
};

pub mod py;
pub mod rust;
pub mod writer;

use writer::CodeWriter;

/// One generated file, with its path relative to the backend's output
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub content: String,
}

/// The files a backend is producing, each filled by one or more of its
/// capabilities in turn.
#[derive(Debug)]
pub struct FileSet {
    indent_spaces: u8,
    files: BTreeMap<PathBuf, CodeWriter>,
}

impl FileSet {
    pub fn new(indent_spaces: u8) -> Self {
        FileSet {
            indent_spaces,
            files: BTreeMap::new(),
        }
    }

    /// The writer for `path`; created empty on first use.
    pub fn writer(&mut self, path: impl Into<PathBuf>) -> &mut CodeWriter {
        let indent = self.indent_spaces;
        self.files
            .entry(path.into())
            .or_insert_with(|| CodeWriter::new(indent))
    }

    pub fn into_files(self) -> Vec<GeneratedFile> {
        self.files
            .into_iter()
            .map(|(path, writer)| GeneratedFile {
                path,
                content: writer.finish(),
            })
            .collect()
    }
}

/// A target backend translating a validated model into source files.
///
/// Backends are stateless between calls and receive the model read-only, so
/// several may run over the same model at once.
pub trait CodeGenerator: Send + Sync {
    fn language(&self) -> Language;

    fn options(&self) -> &GeneratorOptions;

    /// Width of one indentation level in the generated code.
    fn indent_spaces(&self) -> u8 {
        4
    }

    /// Rejects models this backend cannot express, e.g. identifiers that
    /// are reserved in the target language. Runs before any emission.
    fn check_model(&self, _model: &InterfaceModel) -> Vec<IdlError> {
        Vec::new()
    }

    /// Files for every enum, struct, exception, alias and constant.
    fn emit_types(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>>;

    /// Code that packs and unpacks types on the wire.
    fn emit_serializer(
        &self,
        model: &InterfaceModel,
        out: &mut FileSet,
    ) -> Result<(), Vec<IdlError>>;

    /// A client stub per service.
    fn emit_client(&self, model: &InterfaceModel, out: &mut FileSet)
    -> Result<(), Vec<IdlError>>;

    /// A handler interface and request dispatcher per service.
    fn emit_server(&self, model: &InterfaceModel, out: &mut FileSet)
    -> Result<(), Vec<IdlError>>;

    /// Runs every capability, server skeletons only when enabled, and
    /// returns the generated files or every error found on the way.
    fn generate(&self, model: &InterfaceModel) -> Result<Vec<GeneratedFile>, Vec<IdlError>> {
        let rejected = self.check_model(model);
        if !rejected.is_empty() {
            return Err(rejected);
        }

        let mut out = FileSet::new(self.indent_spaces());
        let mut errors = Vec::new();
        let mut run = |result: Result<(), Vec<IdlError>>| {
            if let Err(found) = result {
                errors.extend(found);
            }
        };
        run(self.emit_types(model, &mut out));
        run(self.emit_serializer(model, &mut out));
        run(self.emit_client(model, &mut out));
        if self.options().emit_server {
            run(self.emit_server(model, &mut out));
        }
        finish(out.into_files(), errors)
    }
}

/// Creates the backend for `language`.
pub fn create_generator(language: Language, options: GeneratorOptions) -> Box<dyn CodeGenerator> {
    match language {
        Language::Python => Box::new(py::PythonGenerator::new(options, None)),
        Language::Rust => Box::new(rust::RustGenerator::new(options)),
    }
}

/// The package generated code is placed in: the configured one, or the
/// model's root namespace.
pub fn package_name(options: &GeneratorOptions, model: &InterfaceModel) -> String {
    options
        .package
        .clone()
        .unwrap_or_else(|| options.file_naming.apply(&model.root))
}

/// The directory, relative to the output directory, of the package.
pub fn package_dir(options: &GeneratorOptions, model: &InterfaceModel) -> PathBuf {
    package_name(options, model).split('.').collect()
}

/// Where diagnostics about a namespace as a whole point: its first
/// declaration, or the start of its first document when it declares nothing.
pub fn namespace_location(ns: &Namespace) -> Location {
    ns.types_in_order()
        .map(TypeDef::location)
        .chain(ns.services.iter().map(|s| &s.location))
        .chain(ns.consts.iter().map(|c| &c.location))
        .next()
        .cloned()
        .unwrap_or_else(|| {
            let file = ns.sources.first().map(String::as_str).unwrap_or_default();
            Location::new(Arc::from(file), 1, 1, 0, 0)
        })
}

/// Rejects namespaces that `module_name` maps onto the same generated
/// module, since their declarations would end up in one file.
pub fn module_collisions(
    model: &InterfaceModel,
    language: Language,
    module_name: impl Fn(&str) -> String,
) -> Vec<IdlError> {
    let mut modules: BTreeMap<String, &str> = BTreeMap::new();
    let mut errors = Vec::new();
    for ns in model.namespaces.values() {
        match modules.entry(module_name(&ns.name)) {
            Entry::Vacant(entry) => {
                entry.insert(&ns.name);
            }
            Entry::Occupied(entry) => errors.push(IdlError::codegen(
                namespace_location(ns),
                format!(
                    "namespaces '{}' and '{}' both become the {language} module '{}'",
                    entry.get(),
                    ns.name,
                    entry.key()
                ),
            )),
        }
    }
    errors
}

/// A place in the model where a type is used, with a description for
/// diagnostics.
pub struct TypeUse<'m> {
    pub ty: &'m TypeRef,
    pub location: &'m Location,
    pub what: String,
}

/// Every type written in the model: fields, alias targets, parameters and
/// results.
pub fn type_uses(model: &InterfaceModel) -> Vec<TypeUse<'_>> {
    let mut uses = Vec::new();
    for ns in model.namespaces.values() {
        for def in ns.types_in_order() {
            if let TypeDef::Alias(alias) = def {
                uses.push(TypeUse {
                    ty: &alias.target,
                    location: &alias.location,
                    what: format!("typedef '{}'", alias.name),
                });
            }
            for field in def.fields().unwrap_or_default() {
                uses.push(TypeUse {
                    ty: &field.ty,
                    location: &field.location,
                    what: format!("field '{}' of '{}'", field.name, def.name()),
                });
            }
        }
        for function in ns.services.iter().flat_map(|s| &s.functions) {
            for param in &function.params {
                uses.push(TypeUse {
                    ty: &param.ty,
                    location: &param.location,
                    what: format!("parameter '{}' of '{}'", param.name, function.name),
                });
            }
            if let Some(returns) = &function.returns {
                uses.push(TypeUse {
                    ty: returns,
                    location: &function.location,
                    what: format!("result of '{}'", function.name),
                });
            }
        }
    }
    uses
}

/// Source documents a namespace came from, for file headers.
pub fn sources_of(model: &InterfaceModel, namespace: &str) -> String {
    model
        .namespace(namespace)
        .map(|ns| ns.sources.join(", "))
        .unwrap_or_default()
}
