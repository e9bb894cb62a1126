//! Lowers parsed documents into an [`InterfaceModel`].
//!
//! Building happens in phases over all documents at once: every name is
//! registered before any reference is resolved, so declarations may refer to
//! types declared later or in other documents. Problems are accumulated and
//! the model is only handed out when there are none.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::{
    ast::{
        ConstDecl, Declaration, Document, EnumDecl, FieldDecl, FunctionDecl, Ident, Literal,
        Path, PrimitiveType, ServiceDecl, StructDecl, TypeExpr,
    },
    error::{IdlError, finish},
    loader::LoadedDocument,
    location::Location,
    model::{
        AliasDef, Const, ConstValue, EnumDef, EnumMember, ExceptionDef, Field, Function,
        InterfaceModel, Namespace, Param, QualifiedName, Service, StructDef, TypeDef, TypeRef,
        Visit,
    },
};

/// Highest wire id a field may use.
pub const MAX_FIELD_ID: i64 = i16::MAX as i64;

/// Highest wire id a function may use.
pub const MAX_FUNCTION_ID: i64 = i32::MAX as i64;

/// Builds the model for a set of loaded documents. The first document is the
/// root of the compile.
pub fn build(documents: &[LoadedDocument]) -> Result<InterfaceModel, Vec<IdlError>> {
    let mut builder = ModelBuilder::new(documents);
    builder.register();
    builder.lower();
    builder.expand_aliases();
    builder.lower_consts();
    builder.assign_class_ids();

    debug!(
        namespaces = builder.model.namespaces.len(),
        errors = builder.errors.len(),
        "built interface model"
    );
    finish(builder.model, builder.errors)
}

/// The namespace a document declares into: its directive, or its file stem.
pub fn namespace_of(document: &Document) -> String {
    match &document.namespace {
        Some(path) => path.to_string(),
        None => std::path::Path::new(&*document.source)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| document.source.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolKind {
    Type,
    Service,
}

#[derive(Debug, Clone)]
struct Symbol {
    kind: SymbolKind,
    location: Location,
}

/// Where unqualified names of one document are looked up.
#[derive(Debug)]
struct Scope {
    namespace: String,
    imports: Vec<String>,
}

struct ModelBuilder<'d> {
    documents: &'d [LoadedDocument],
    scopes: Vec<Scope>,
    symbols: HashMap<String, HashMap<String, Symbol>>,
    consts: HashMap<String, HashMap<String, Location>>,
    model: InterfaceModel,
    errors: Vec<IdlError>,
}

impl<'d> ModelBuilder<'d> {
    fn new(documents: &'d [LoadedDocument]) -> Self {
        let by_source: HashMap<&str, String> = documents
            .iter()
            .map(|loaded| (&*loaded.document.source, namespace_of(&loaded.document)))
            .collect();

        let mut model = InterfaceModel::default();
        let mut scopes = Vec::with_capacity(documents.len());
        for loaded in documents {
            let namespace = namespace_of(&loaded.document);
            let mut imports: Vec<String> = Vec::new();
            for source in &loaded.imports {
                if let Some(imported) = by_source.get(&**source) {
                    if *imported != namespace && !imports.contains(imported) {
                        imports.push(imported.clone());
                    }
                }
            }

            let entry = model
                .namespaces
                .entry(namespace.clone())
                .or_insert_with(|| Namespace::new(namespace.clone()));
            entry.sources.push(loaded.document.source.to_string());
            for import in &imports {
                if !entry.imports.contains(import) {
                    entry.imports.push(import.clone());
                }
            }
            scopes.push(Scope { namespace, imports });
        }
        if let Some(root) = scopes.first() {
            model.root = root.namespace.clone();
        }

        ModelBuilder {
            documents,
            scopes,
            symbols: HashMap::new(),
            consts: HashMap::new(),
            model,
            errors: Vec::new(),
        }
    }

    // --- Phase 1: registration ---

    fn register(&mut self) {
        let documents = self.documents;
        for (index, loaded) in documents.iter().enumerate() {
            let namespace = &self.scopes[index].namespace;
            for decl in &loaded.document.declarations {
                let name = decl.name();
                if let Declaration::Const(_) = decl {
                    let table = self.consts.entry(namespace.clone()).or_default();
                    if let Some(first) = table.get(&name.name) {
                        self.errors.push(duplicate(name, "constant", namespace, first));
                    } else {
                        table.insert(name.name.clone(), name.location.clone());
                    }
                    continue;
                }

                let kind = match decl {
                    Declaration::Service(_) => SymbolKind::Service,
                    _ => SymbolKind::Type,
                };
                let table = self.symbols.entry(namespace.clone()).or_default();
                if let Some(first) = table.get(&name.name) {
                    self.errors
                        .push(duplicate(name, decl.keyword(), namespace, &first.location));
                } else {
                    table.insert(
                        name.name.clone(),
                        Symbol {
                            kind,
                            location: name.location.clone(),
                        },
                    );
                }
            }
        }
    }

    fn lookup(&self, namespace: &str, name: &str) -> Option<&Symbol> {
        self.symbols.get(namespace)?.get(name)
    }

    /// True when `name` is the declaration that won registration, so that a
    /// rejected duplicate is not lowered over the original.
    fn is_registered(&self, namespace: &str, name: &Ident) -> bool {
        self.lookup(namespace, &name.name)
            .is_some_and(|symbol| symbol.location == name.location)
    }

    // --- Phase 2 and 3: resolution, lowering, wire ids ---

    fn lower(&mut self) {
        let documents = self.documents;
        for (index, loaded) in documents.iter().enumerate() {
            let namespace = self.scopes[index].namespace.clone();
            for decl in &loaded.document.declarations {
                if let Declaration::Const(_) = decl {
                    continue;
                }
                if !self.is_registered(&namespace, decl.name()) {
                    continue;
                }
                match decl {
                    Declaration::Enum(e) => {
                        let def = self.lower_enum(&namespace, e);
                        self.insert_type(&namespace, TypeDef::Enum(def));
                    }
                    Declaration::Struct(s) => {
                        let def = self.lower_struct(index, s);
                        self.insert_type(&namespace, TypeDef::Struct(def));
                    }
                    Declaration::Exception(s) => {
                        let record = self.lower_struct(index, s);
                        self.insert_type(
                            &namespace,
                            TypeDef::Exception(ExceptionDef {
                                class_id: 0,
                                record,
                            }),
                        );
                    }
                    Declaration::Typedef(t) => {
                        if let Some(target) = self.resolve_type(index, &t.target) {
                            let alias = AliasDef {
                                doc: t.doc.clone(),
                                name: QualifiedName::new(&namespace, &t.name.name),
                                underlying: target.clone(),
                                target,
                                location: t.name.location.clone(),
                            };
                            self.insert_type(&namespace, TypeDef::Alias(alias));
                        }
                    }
                    Declaration::Service(s) => {
                        let service = self.lower_service(index, s);
                        if let Some(ns) = self.model.namespaces.get_mut(&namespace) {
                            ns.services.push(service);
                        }
                    }
                    Declaration::Const(_) => {}
                }
            }
        }
    }

    fn insert_type(&mut self, namespace: &str, def: TypeDef) {
        if let Some(ns) = self.model.namespaces.get_mut(namespace) {
            let name = def.name().name.clone();
            ns.order.push(name.clone());
            ns.types.insert(name, def);
        }
    }

    fn resolve_type(&mut self, scope: usize, expr: &TypeExpr) -> Option<TypeRef> {
        match expr {
            TypeExpr::Primitive(p, _) => Some(TypeRef::Primitive(*p)),
            TypeExpr::List(inner, _) => Some(TypeRef::List(Box::new(
                self.resolve_type(scope, inner)?,
            ))),
            TypeExpr::Set(inner, _) => Some(TypeRef::Set(Box::new(
                self.resolve_type(scope, inner)?,
            ))),
            TypeExpr::Map(key, value, _) => {
                let key = self.resolve_type(scope, key);
                let value = self.resolve_type(scope, value);
                Some(TypeRef::Map(Box::new(key?), Box::new(value?)))
            }
            TypeExpr::Named(path) => self.resolve_name(scope, path).map(TypeRef::Named),
        }
    }

    /// Resolves a type name as seen from the document at `scope`.
    fn resolve_name(&mut self, scope: usize, path: &Path) -> Option<QualifiedName> {
        let name = path.name();
        let candidates: Vec<String> = {
            let scope = &self.scopes[scope];
            match path.qualifier() {
                Some(namespace) => {
                    if namespace != scope.namespace && !scope.imports.contains(&namespace) {
                        let message = if self.model.namespaces.contains_key(&namespace) {
                            format!("namespace '{namespace}' is not imported here")
                        } else {
                            format!("unknown namespace '{namespace}'")
                        };
                        self.errors
                            .push(IdlError::semantic(path.location.clone(), message));
                        return None;
                    }
                    vec![namespace]
                }
                None if self.lookup(&scope.namespace, name).is_some() => {
                    vec![scope.namespace.clone()]
                }
                None => scope
                    .imports
                    .iter()
                    .filter(|ns| self.lookup(ns, name).is_some())
                    .cloned()
                    .collect(),
            }
        };

        match candidates.as_slice() {
            [namespace] => match self.lookup(namespace, name) {
                Some(symbol) if symbol.kind == SymbolKind::Service => {
                    let error = IdlError::semantic(
                        path.location.clone(),
                        format!("'{path}' is a service, not a type"),
                    )
                    .with_note(symbol.location.clone(), "service declared here");
                    self.errors.push(error);
                    None
                }
                Some(_) => Some(QualifiedName::new(namespace, name)),
                None => {
                    self.errors.push(IdlError::semantic(
                        path.location.clone(),
                        format!("unknown type '{path}'"),
                    ));
                    None
                }
            },
            [] => {
                self.errors.push(IdlError::semantic(
                    path.location.clone(),
                    format!("unknown type '{path}'"),
                ));
                None
            }
            many => {
                self.errors.push(IdlError::semantic(
                    path.location.clone(),
                    format!(
                        "ambiguous type '{path}': declared in namespaces {}",
                        many.join(", ")
                    ),
                ));
                None
            }
        }
    }

    fn lower_enum(&mut self, namespace: &str, decl: &EnumDecl) -> EnumDef {
        let mut members = Vec::with_capacity(decl.members.len());
        let mut seen: HashMap<&str, &Location> = HashMap::new();
        let mut next: i64 = 0;

        for member in &decl.members {
            if let Some(first) = seen.get(member.name.name.as_str()) {
                self.errors.push(
                    IdlError::semantic(
                        member.name.location.clone(),
                        format!(
                            "duplicate member '{}' in enum '{}'",
                            member.name.name, decl.name.name
                        ),
                    )
                    .with_note((*first).clone(), "first defined here"),
                );
                continue;
            }
            seen.insert(&member.name.name, &member.name.location);

            let (value, location) = match &member.value {
                Some(literal) => (literal.value, &literal.location),
                None => (next, &member.name.location),
            };
            next = value.saturating_add(1);
            let Ok(value) = i32::try_from(value) else {
                self.errors.push(IdlError::semantic(
                    location.clone(),
                    format!(
                        "value {value} of enum member '{}' does not fit in int32",
                        member.name.name
                    ),
                ));
                continue;
            };
            members.push(EnumMember {
                doc: member.doc.clone(),
                name: member.name.name.clone(),
                value,
                location: member.name.location.clone(),
            });
        }

        EnumDef {
            doc: decl.doc.clone(),
            name: QualifiedName::new(namespace, &decl.name.name),
            members,
            location: decl.name.location.clone(),
        }
    }

    fn lower_struct(&mut self, scope: usize, decl: &StructDecl) -> StructDef {
        let namespace = self.scopes[scope].namespace.clone();
        StructDef {
            doc: decl.doc.clone(),
            name: QualifiedName::new(namespace, &decl.name.name),
            fields: self.lower_fields(scope, &decl.name, &decl.fields),
            location: decl.name.location.clone(),
        }
    }

    fn lower_fields(&mut self, scope: usize, owner: &Ident, decls: &[FieldDecl]) -> Vec<Field> {
        let mut fields = Vec::with_capacity(decls.len());
        let mut seen: HashMap<&str, &Location> = HashMap::new();
        let mut next: i64 = 1;

        for decl in decls {
            if let Some(first) = seen.get(decl.name.name.as_str()) {
                self.errors.push(
                    IdlError::semantic(
                        decl.name.location.clone(),
                        format!("duplicate field '{}' in '{}'", decl.name.name, owner.name),
                    )
                    .with_note((*first).clone(), "first defined here"),
                );
                continue;
            }
            seen.insert(&decl.name.name, &decl.name.location);

            let (id, location) = match &decl.id {
                Some(literal) => (literal.value, &literal.location),
                None => (next, &decl.name.location),
            };
            next = id.saturating_add(1);
            let ty = self.resolve_type(scope, &decl.type_expr);
            if !(1..=MAX_FIELD_ID).contains(&id) {
                self.errors.push(IdlError::semantic(
                    location.clone(),
                    format!(
                        "id {id} of field '{}' is out of range 1..={MAX_FIELD_ID}",
                        decl.name.name
                    ),
                ));
                continue;
            }
            let Some(ty) = ty else { continue };
            fields.push(Field {
                doc: decl.doc.clone(),
                name: decl.name.name.clone(),
                ty,
                id: id as u16,
                location: decl.name.location.clone(),
            });
        }
        fields
    }

    fn lower_service(&mut self, scope: usize, decl: &ServiceDecl) -> Service {
        let namespace = self.scopes[scope].namespace.clone();
        let mut functions = Vec::with_capacity(decl.functions.len());
        let mut seen: HashMap<&str, &Location> = HashMap::new();
        let mut next: i64 = 1;

        for function in &decl.functions {
            if let Some(first) = seen.get(function.name.name.as_str()) {
                self.errors.push(
                    IdlError::semantic(
                        function.name.location.clone(),
                        format!(
                            "duplicate function '{}' in service '{}'",
                            function.name.name, decl.name.name
                        ),
                    )
                    .with_note((*first).clone(), "first defined here"),
                );
                continue;
            }
            seen.insert(&function.name.name, &function.name.location);

            let (id, location) = match &function.id {
                Some(literal) => (literal.value, &literal.location),
                None => (next, &function.name.location),
            };
            next = id.saturating_add(1);
            if !(1..=MAX_FUNCTION_ID).contains(&id) {
                self.errors.push(IdlError::semantic(
                    location.clone(),
                    format!(
                        "id {id} of function '{}' is out of range 1..={MAX_FUNCTION_ID}",
                        function.name.name
                    ),
                ));
                continue;
            }
            functions.push(self.lower_function(scope, function, id as u32));
        }

        Service {
            doc: decl.doc.clone(),
            name: QualifiedName::new(namespace, &decl.name.name),
            functions,
            location: decl.name.location.clone(),
        }
    }

    fn lower_function(&mut self, scope: usize, decl: &FunctionDecl, id: u32) -> Function {
        let mut params = Vec::with_capacity(decl.params.len());
        let mut seen: HashMap<&str, &Location> = HashMap::new();
        for param in &decl.params {
            if let Some(first) = seen.get(param.name.name.as_str()) {
                self.errors.push(
                    IdlError::semantic(
                        param.name.location.clone(),
                        format!(
                            "duplicate parameter '{}' in function '{}'",
                            param.name.name, decl.name.name
                        ),
                    )
                    .with_note((*first).clone(), "first defined here"),
                );
                continue;
            }
            seen.insert(&param.name.name, &param.name.location);
            if let Some(ty) = self.resolve_type(scope, &param.type_expr) {
                params.push(Param {
                    name: param.name.name.clone(),
                    ty,
                    location: param.name.location.clone(),
                });
            }
        }

        let returns = decl
            .returns
            .as_ref()
            .and_then(|ty| self.resolve_type(scope, ty));
        let throws = decl
            .throws
            .iter()
            .filter_map(|path| self.resolve_name(scope, path))
            .collect();

        Function {
            doc: decl.doc.clone(),
            name: decl.name.name.clone(),
            id,
            params,
            returns,
            throws,
            location: decl.name.location.clone(),
        }
    }

    // --- Phase 4: typedef expansion ---

    fn expand_aliases(&mut self) {
        let aliases: BTreeMap<QualifiedName, (TypeRef, Location)> = self
            .model
            .namespaces
            .values()
            .flat_map(|ns| ns.types.values())
            .filter_map(|def| match def {
                TypeDef::Alias(alias) => Some((
                    alias.name.clone(),
                    (alias.target.clone(), alias.location.clone()),
                )),
                _ => None,
            })
            .collect();

        let mut visits = HashMap::new();
        let mut stack = Vec::new();
        for name in aliases.keys() {
            self.visit_alias(name, &aliases, &mut visits, &mut stack);
        }

        // Follow chains of aliases to the first non-alias type. Recursive
        // chains were reported above and stop after one lap.
        let mut underlying: HashMap<QualifiedName, TypeRef> = HashMap::new();
        for (name, (target, _)) in &aliases {
            let mut current = target;
            let mut hops = 0;
            while let TypeRef::Named(next) = current {
                match aliases.get(next) {
                    Some((target, _)) if hops < aliases.len() => {
                        current = target;
                        hops += 1;
                    }
                    _ => break,
                }
            }
            underlying.insert(name.clone(), current.clone());
        }

        for ns in self.model.namespaces.values_mut() {
            for def in ns.types.values_mut() {
                if let TypeDef::Alias(alias) = def {
                    if let Some(ty) = underlying.get(&alias.name) {
                        alias.underlying = ty.clone();
                    }
                }
            }
            // Throws clauses name exceptions through aliases too.
            for function in ns.services.iter_mut().flat_map(|s| s.functions.iter_mut()) {
                for name in function.throws.iter_mut() {
                    if let Some(TypeRef::Named(target)) = underlying.get(&*name) {
                        *name = target.clone();
                    }
                }
            }
        }
    }

    fn visit_alias(
        &mut self,
        name: &QualifiedName,
        aliases: &BTreeMap<QualifiedName, (TypeRef, Location)>,
        visits: &mut HashMap<QualifiedName, Visit>,
        stack: &mut Vec<QualifiedName>,
    ) {
        match visits.get(name) {
            Some(Visit::Done) => return,
            Some(Visit::Active) => {
                let start = stack.iter().position(|n| n == name).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                if let Some((_, location)) = aliases.get(name) {
                    self.errors.push(IdlError::semantic(
                        location.clone(),
                        format!("recursive typedef '{name}': {}", cycle.join(" -> ")),
                    ));
                }
                return;
            }
            None => {}
        }

        let Some((target, _)) = aliases.get(name) else {
            return;
        };
        visits.insert(name.clone(), Visit::Active);
        stack.push(name.clone());
        for next in target.named() {
            if aliases.contains_key(next) {
                self.visit_alias(next, aliases, visits, stack);
            }
        }
        stack.pop();
        visits.insert(name.clone(), Visit::Done);
    }

    // --- Phase 5: constants ---

    fn lower_consts(&mut self) {
        let documents = self.documents;
        for (index, loaded) in documents.iter().enumerate() {
            let namespace = self.scopes[index].namespace.clone();
            for decl in &loaded.document.declarations {
                let Declaration::Const(decl) = decl else {
                    continue;
                };
                let registered = self
                    .consts
                    .get(&namespace)
                    .and_then(|table| table.get(&decl.name.name))
                    .is_some_and(|location| *location == decl.name.location);
                if !registered {
                    continue;
                }
                if let Some(constant) = self.lower_const(index, &namespace, decl) {
                    if let Some(ns) = self.model.namespaces.get_mut(&namespace) {
                        ns.consts.push(constant);
                    }
                }
            }
        }
    }

    fn lower_const(&mut self, scope: usize, namespace: &str, decl: &ConstDecl) -> Option<Const> {
        let ty = self.resolve_type(scope, &decl.type_expr)?;
        let underlying = self.model.underlying(&ty).clone();

        let legal = match &underlying {
            TypeRef::Primitive(p) => !matches!(p, PrimitiveType::Buffer | PrimitiveType::Date),
            TypeRef::Named(name) => matches!(self.model.type_def(name), Some(TypeDef::Enum(_))),
            _ => false,
        };
        if !legal {
            self.errors.push(IdlError::semantic(
                decl.type_expr.location().clone(),
                format!("type '{ty}' cannot be used for a constant"),
            ));
            return None;
        }

        let literal = &decl.value;
        let mismatch = |errors: &mut Vec<IdlError>| {
            errors.push(IdlError::semantic(
                literal.location.clone(),
                format!(
                    "expected a value of type '{ty}', found {}",
                    literal.value.describe()
                ),
            ));
        };

        let value = match (&underlying, &literal.value) {
            (TypeRef::Primitive(PrimitiveType::Bool), Literal::Bool(b)) => ConstValue::Bool(*b),
            (TypeRef::Primitive(PrimitiveType::String), Literal::String(s)) => {
                ConstValue::String(s.clone())
            }
            (TypeRef::Primitive(p), Literal::Int(v)) if p.is_integer() => {
                let (min, max) = p.integer_range()?;
                if !(min..=max).contains(v) {
                    self.errors.push(IdlError::semantic(
                        literal.location.clone(),
                        format!("integer literal {v} is out of range for {p}"),
                    ));
                    return None;
                }
                ConstValue::Int(*v)
            }
            (TypeRef::Primitive(p), Literal::Float(v)) if p.is_float() => ConstValue::Float(*v),
            (TypeRef::Primitive(p), Literal::Int(v)) if p.is_float() => ConstValue::Float(*v as f64),
            (TypeRef::Named(name), Literal::Path(path)) => {
                self.enum_member(scope, name, path)?
            }
            _ => {
                mismatch(&mut self.errors);
                return None;
            }
        };

        Some(Const {
            doc: decl.doc.clone(),
            name: QualifiedName::new(namespace, &decl.name.name),
            ty,
            value,
            location: decl.name.location.clone(),
        })
    }

    /// Resolves `Enum.MEMBER` against the enum a constant is declared as.
    fn enum_member(
        &mut self,
        scope: usize,
        expected: &QualifiedName,
        path: &Path,
    ) -> Option<ConstValue> {
        let Some((member, type_segments)) = path.segments.split_last() else {
            return None;
        };
        if type_segments.is_empty() {
            self.errors.push(IdlError::semantic(
                path.location.clone(),
                format!("expected 'Enum.MEMBER', found '{path}'"),
            ));
            return None;
        }

        let type_path = Path {
            segments: type_segments.to_vec(),
            location: path.location.clone(),
        };
        let named = TypeRef::Named(self.resolve_name(scope, &type_path)?);
        if *self.model.underlying(&named) != TypeRef::Named(expected.clone()) {
            self.errors.push(IdlError::semantic(
                path.location.clone(),
                format!("expected a member of '{expected}', found '{path}'"),
            ));
            return None;
        }

        let value = match self.model.type_def(expected) {
            Some(TypeDef::Enum(def)) => def.member(member).map(|m| m.value),
            _ => None,
        };
        match value {
            Some(value) => Some(ConstValue::EnumMember {
                member: member.clone(),
                value,
            }),
            None => {
                self.errors.push(IdlError::semantic(
                    path.location.clone(),
                    format!("enum '{expected}' has no member '{member}'"),
                ));
                None
            }
        }
    }

    // --- Phase 6: exception class ids ---

    fn assign_class_ids(&mut self) {
        let mut names: Vec<QualifiedName> = self
            .model
            .exceptions()
            .map(|e| e.record.name.clone())
            .collect();
        names.sort();

        for (index, name) in names.iter().enumerate() {
            let def = self
                .model
                .namespaces
                .get_mut(&name.namespace)
                .and_then(|ns| ns.types.get_mut(&name.name));
            if let Some(TypeDef::Exception(exception)) = def {
                exception.class_id = index as u32 + 1;
            }
        }
    }
}

fn duplicate(name: &Ident, what: &str, namespace: &str, first: &Location) -> IdlError {
    IdlError::semantic(
        name.location.clone(),
        format!(
            "duplicate {what} '{}' in namespace '{namespace}'",
            name.name
        ),
    )
    .with_note(first.clone(), "first defined here")
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::parser;

    /// Parses in-memory documents and wires up their imports by name.
    pub(crate) fn load_all(sources: &[(&str, &str)]) -> Vec<LoadedDocument> {
        sources
            .iter()
            .map(|(name, text)| {
                let document = parser::parse(*name, text).unwrap();
                let imports = document
                    .imports
                    .iter()
                    .map(|i| Arc::from(i.path.as_str()))
                    .collect();
                LoadedDocument { document, imports }
            })
            .collect()
    }

    pub(crate) fn build_str(text: &str) -> Result<InterfaceModel, Vec<IdlError>> {
        build(&load_all(&[("test.idl", text)]))
    }

    fn messages(errors: &[IdlError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    fn struct_def<'m>(model: &'m InterfaceModel, ns: &str, name: &str) -> &'m StructDef {
        match model.type_def(&QualifiedName::new(ns, name)) {
            Some(TypeDef::Struct(s)) => s,
            other => panic!("expected struct {ns}.{name}, got {other:?}"),
        }
    }

    #[test]
    fn test_point_geometry() {
        let model = build_str(
            "struct Point { x: int32; y: int32; }
             service Geometry { distance(a: Point, b: Point) -> float64; }",
        )
        .unwrap();

        assert_eq!(model.root, "test");
        let point = struct_def(&model, "test", "Point");
        let fields: Vec<(&str, u16)> = point.fields.iter().map(|f| (f.name.as_str(), f.id)).collect();
        assert_eq!(fields, vec![("x", 1), ("y", 2)]);
        assert!(
            point
                .fields
                .iter()
                .all(|f| f.ty == TypeRef::Primitive(PrimitiveType::Int32))
        );

        let geometry = &model.namespaces["test"].services[0];
        let distance = &geometry.functions[0];
        assert_eq!(distance.id, 1);
        assert_eq!(distance.params.len(), 2);
        assert_eq!(
            distance.params[0].ty,
            TypeRef::Named(QualifiedName::new("test", "Point"))
        );
        assert_eq!(
            distance.returns,
            Some(TypeRef::Primitive(PrimitiveType::Float64))
        );
    }

    #[test]
    fn test_forward_references() {
        let model = build_str(
            "service S { get() -> Later; }
             struct Later { e: Kind; }
             enum Kind { A, B }",
        )
        .unwrap();
        let later = struct_def(&model, "test", "Later");
        assert_eq!(
            later.fields[0].ty,
            TypeRef::Named(QualifiedName::new("test", "Kind"))
        );
        assert_eq!(model.namespaces["test"].order, vec!["Later", "Kind"]);
    }

    #[test]
    fn test_undefined_type() {
        let errors = build_str("struct P { x: Pointt; }").unwrap_err();
        assert_eq!(messages(&errors), vec!["unknown type 'Pointt'"]);
        assert_eq!(errors[0].location.line, 1);
        assert_eq!(errors[0].location.column, 15);
    }

    #[test]
    fn test_duplicate_names_report_both_locations() {
        let errors = build_str("struct A {}\nenum A { X }").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "duplicate enum 'A' in namespace 'test'");
        assert_eq!(errors[0].location.line, 2);
        assert_eq!(errors[0].notes[0].location.line, 1);
    }

    #[test]
    fn test_consts_have_their_own_namespace() {
        let model = build_str("struct A {}\nconst A: int32 = 1;").unwrap();
        assert_eq!(model.namespaces["test"].consts.len(), 1);

        let errors = build_str("const A: int32 = 1;\nconst A: int32 = 2;").unwrap_err();
        assert_eq!(errors[0].message, "duplicate constant 'A' in namespace 'test'");
    }

    #[test]
    fn test_service_is_not_a_type() {
        let errors = build_str("service S { f(); }\nstruct A { s: S; }").unwrap_err();
        assert_eq!(messages(&errors), vec!["'S' is a service, not a type"]);
    }

    #[test]
    fn test_wire_id_assignment() {
        let model = build_str(
            "struct S { a: int8; b: int8 (id=10); c: int8; }
             enum E { A, B = 5, C }
             service Svc { f(); g() (id=7); h(); }",
        )
        .unwrap();
        let s = struct_def(&model, "test", "S");
        assert_eq!(s.fields.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 10, 11]);

        let Some(TypeDef::Enum(e)) = model.type_def(&QualifiedName::new("test", "E")) else {
            panic!("expected enum");
        };
        assert_eq!(e.members.iter().map(|m| m.value).collect::<Vec<_>>(), vec![0, 5, 6]);

        let svc = &model.namespaces["test"].services[0];
        assert_eq!(svc.functions.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 7, 8]);
    }

    #[test]
    fn test_wire_id_ranges() {
        let errors = build_str(
            "struct S { a: int8 (id=0); b: int8 (id=32768); }
             enum E { A = 2147483648 }
             service Svc { f() (id=2147483648); }",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "id 0 of field 'a' is out of range 1..=32767",
                "id 32768 of field 'b' is out of range 1..=32767",
                "value 2147483648 of enum member 'A' does not fit in int32",
                "id 2147483648 of function 'f' is out of range 1..=2147483647",
            ]
        );
    }

    #[test]
    fn test_duplicate_members() {
        let errors = build_str(
            "struct S { a: int8; a: int16; }
             enum E { A, A }
             service Svc { f(x: int8, x: int8); f(); }",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "duplicate field 'a' in 'S'",
                "duplicate member 'A' in enum 'E'",
                "duplicate parameter 'x' in function 'f'",
                "duplicate function 'f' in service 'Svc'",
            ]
        );
    }

    #[test]
    fn test_typedef_expansion() {
        let model = build_str(
            "typedef Id = Key;
             typedef Key = int64;
             typedef Ids = list<Id>;
             exception Boom {}
             typedef Err = Boom;
             service S { f() throws (Err); }",
        )
        .unwrap();
        let Some(TypeDef::Alias(id)) = model.type_def(&QualifiedName::new("test", "Id")) else {
            panic!("expected alias");
        };
        assert_eq!(id.target, TypeRef::Named(QualifiedName::new("test", "Key")));
        assert_eq!(id.underlying, TypeRef::Primitive(PrimitiveType::Int64));

        let throws = &model.namespaces["test"].services[0].functions[0].throws;
        assert_eq!(throws, &vec![QualifiedName::new("test", "Boom")]);
    }

    #[test]
    fn test_recursive_typedefs() {
        let errors = build_str(
            "typedef A = B;
             typedef B = A;
             typedef L = list<L>;",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "recursive typedef 'test.A': test.A -> test.B -> test.A",
                "recursive typedef 'test.L': test.L -> test.L",
            ]
        );
    }

    #[test]
    fn test_const_values() {
        let model = build_str(
            "enum Color { RED, GREEN = 4 }
             typedef Shade = Color;
             const ON: bool = true;
             const MAX: int16 = -32768;
             const PI: float64 = 3;
             const NAME: string = \"basalt\";
             const DEFAULT: Shade = Color.GREEN;",
        )
        .unwrap();
        let values: Vec<&ConstValue> = model.namespaces["test"].consts.iter().map(|c| &c.value).collect();
        assert_eq!(
            values,
            vec![
                &ConstValue::Bool(true),
                &ConstValue::Int(-32768),
                &ConstValue::Float(3.0),
                &ConstValue::String("basalt".into()),
                &ConstValue::EnumMember {
                    member: "GREEN".into(),
                    value: 4
                },
            ]
        );
    }

    #[test]
    fn test_const_errors() {
        let errors = build_str(
            "enum Color { RED }
             enum Other { RED }
             struct S {}
             const A: int8 = 200;
             const B: string = 1;
             const C: S = 1;
             const D: Color = Other.RED;
             const E: Color = Color.BLUE;
             const F: buffer = \"x\";
             const G: Color = RED;",
        )
        .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "integer literal 200 is out of range for int8",
                "expected a value of type 'string', found integer literal",
                "type 'test.S' cannot be used for a constant",
                "expected a member of 'test.Color', found 'Other.RED'",
                "enum 'test.Color' has no member 'BLUE'",
                "type 'buffer' cannot be used for a constant",
                "expected 'Enum.MEMBER', found 'RED'",
            ]
        );
    }

    #[test]
    fn test_imports_and_qualified_names() {
        let docs = load_all(&[
            (
                "app.idl",
                "namespace app;\nimport \"shapes.idl\";\nstruct Scene { a: Point; b: shapes.Point; }",
            ),
            ("shapes.idl", "namespace shapes;\nstruct Point {}"),
        ]);
        let model = build(&docs).unwrap();
        let scene = struct_def(&model, "app", "Scene");
        let point = TypeRef::Named(QualifiedName::new("shapes", "Point"));
        assert_eq!(scene.fields[0].ty, point);
        assert_eq!(scene.fields[1].ty, point);
        assert_eq!(model.namespaces["app"].imports, vec!["shapes"]);
    }

    #[test]
    fn test_own_namespace_shadows_imports() {
        let docs = load_all(&[
            ("app.idl", "import \"lib.idl\";\nstruct Point {}\nstruct S { p: Point; }"),
            ("lib.idl", "struct Point {}"),
        ]);
        let model = build(&docs).unwrap();
        let s = struct_def(&model, "app", "S");
        assert_eq!(s.fields[0].ty, TypeRef::Named(QualifiedName::new("app", "Point")));
    }

    #[test]
    fn test_ambiguous_and_unimported_names() {
        let docs = load_all(&[
            (
                "app.idl",
                "import \"a.idl\";\nimport \"b.idl\";\nstruct S { p: Point; q: c.Q; }",
            ),
            ("a.idl", "import \"c.idl\";\nstruct Point {}"),
            ("b.idl", "struct Point {}"),
            ("c.idl", "struct Q {}"),
        ]);
        let errors = build(&docs).unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "ambiguous type 'Point': declared in namespaces a, b",
                "namespace 'c' is not imported here",
            ]
        );
    }

    #[test]
    fn test_class_ids_follow_qualified_names() {
        let docs = load_all(&[
            ("b.idl", "import \"a.idl\";\nexception Zed {}\nexception Alpha {}"),
            ("a.idl", "exception Mid {}"),
        ]);
        let model = build(&docs).unwrap();
        let ids: BTreeMap<String, u32> = model
            .exceptions()
            .map(|e| (e.record.name.to_string(), e.class_id))
            .collect();
        assert_eq!(ids["a.Mid"], 1);
        assert_eq!(ids["b.Alpha"], 2);
        assert_eq!(ids["b.Zed"], 3);
    }

    #[test]
    fn test_doc_comments_are_carried() {
        let model = build_str("/// A point.\nstruct P {\n/// Across.\nx: int32;\n}").unwrap();
        let p = struct_def(&model, "test", "P");
        assert_eq!(p.doc.as_deref(), Some("A point."));
        assert_eq!(p.fields[0].doc.as_deref(), Some("Across."));
    }
}
