//! The Interface Model: the resolved, validated view of every document in a
//! compile, shared read-only by all backends.

use std::{collections::BTreeMap, fmt};

use serde::Serialize;

use crate::{ast::PrimitiveType, location::Location};

/// A declaration name together with the namespace it lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QualifiedName {
    pub namespace: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        QualifiedName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// A resolved type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeRef {
    Primitive(PrimitiveType),
    List(Box<TypeRef>),
    Set(Box<TypeRef>),
    Map(Box<TypeRef>, Box<TypeRef>),
    /// A user-defined type; always present in the model's type table.
    Named(QualifiedName),
}

impl TypeRef {
    /// Every user-defined type mentioned anywhere in this reference,
    /// including inside containers.
    pub fn named(&self) -> Vec<&QualifiedName> {
        let mut names = Vec::new();
        self.collect_named(&mut names);
        names
    }

    fn collect_named<'t>(&'t self, names: &mut Vec<&'t QualifiedName>) {
        match self {
            TypeRef::Primitive(_) => {}
            TypeRef::List(inner) | TypeRef::Set(inner) => inner.collect_named(names),
            TypeRef::Map(key, value) => {
                key.collect_named(names);
                value.collect_named(names);
            }
            TypeRef::Named(name) => names.push(name),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Primitive(p) => write!(f, "{p}"),
            TypeRef::List(inner) => write!(f, "list<{inner}>"),
            TypeRef::Set(inner) => write!(f, "set<{inner}>"),
            TypeRef::Map(key, value) => write!(f, "map<{key}, {value}>"),
            TypeRef::Named(name) => write!(f, "{name}"),
        }
    }
}

/// A field of a struct or exception.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub doc: Option<String>,
    pub name: String,
    pub ty: TypeRef,
    /// Wire identifier, unique within the owning definition.
    pub id: u16,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumMember {
    pub doc: Option<String>,
    pub name: String,
    pub value: i32,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumDef {
    pub doc: Option<String>,
    pub name: QualifiedName,
    pub members: Vec<EnumMember>,
    pub location: Location,
}

impl EnumDef {
    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructDef {
    pub doc: Option<String>,
    pub name: QualifiedName,
    /// Fields in declaration order.
    pub fields: Vec<Field>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionDef {
    /// Identifies the exception after a packed-exception reply code.
    pub class_id: u32,
    #[serde(flatten)]
    pub record: StructDef,
}

/// A typedef. `underlying` is `target` with every alias at the top level
/// followed, so it is never itself an alias.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AliasDef {
    pub doc: Option<String>,
    pub name: QualifiedName,
    pub target: TypeRef,
    pub underlying: TypeRef,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Enum,
    Struct,
    Exception,
    Alias,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Enum => write!(f, "enum"),
            TypeKind::Struct => write!(f, "struct"),
            TypeKind::Exception => write!(f, "exception"),
            TypeKind::Alias => write!(f, "typedef"),
        }
    }
}

/// A user-defined type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeDef {
    Enum(EnumDef),
    Struct(StructDef),
    Exception(ExceptionDef),
    Alias(AliasDef),
}

impl TypeDef {
    pub fn name(&self) -> &QualifiedName {
        match self {
            TypeDef::Enum(e) => &e.name,
            TypeDef::Struct(s) => &s.name,
            TypeDef::Exception(e) => &e.record.name,
            TypeDef::Alias(a) => &a.name,
        }
    }

    pub fn location(&self) -> &Location {
        match self {
            TypeDef::Enum(e) => &e.location,
            TypeDef::Struct(s) => &s.location,
            TypeDef::Exception(e) => &e.record.location,
            TypeDef::Alias(a) => &a.location,
        }
    }

    pub fn doc(&self) -> Option<&str> {
        match self {
            TypeDef::Enum(e) => e.doc.as_deref(),
            TypeDef::Struct(s) => s.doc.as_deref(),
            TypeDef::Exception(e) => e.record.doc.as_deref(),
            TypeDef::Alias(a) => a.doc.as_deref(),
        }
    }

    pub fn kind(&self) -> TypeKind {
        match self {
            TypeDef::Enum(_) => TypeKind::Enum,
            TypeDef::Struct(_) => TypeKind::Struct,
            TypeDef::Exception(_) => TypeKind::Exception,
            TypeDef::Alias(_) => TypeKind::Alias,
        }
    }

    /// The fields of a struct or exception.
    pub fn fields(&self) -> Option<&[Field]> {
        match self {
            TypeDef::Struct(s) => Some(&s.fields),
            TypeDef::Exception(e) => Some(&e.record.fields),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    pub doc: Option<String>,
    pub name: String,
    /// Wire identifier sent with every invocation, unique within the service.
    pub id: u32,
    pub params: Vec<Param>,
    /// `None` for functions without a result.
    pub returns: Option<TypeRef>,
    /// Exceptions the function may raise, in declaration order.
    pub throws: Vec<QualifiedName>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Service {
    pub doc: Option<String>,
    pub name: QualifiedName,
    pub functions: Vec<Function>,
    pub location: Location,
}

impl Service {
    /// Every exception any function of the service may raise, without
    /// duplicates, in first-use order.
    pub fn exceptions(&self) -> Vec<&QualifiedName> {
        let mut seen: Vec<&QualifiedName> = Vec::new();
        for name in self.functions.iter().flat_map(|f| &f.throws) {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    EnumMember { member: String, value: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Const {
    pub doc: Option<String>,
    pub name: QualifiedName,
    pub ty: TypeRef,
    pub value: ConstValue,
    pub location: Location,
}

/// Every declaration made in one namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Namespace {
    pub name: String,
    /// Documents that contributed to this namespace.
    pub sources: Vec<String>,
    /// User-defined types by short name.
    pub types: BTreeMap<String, TypeDef>,
    /// The order in which types appeared in the source.
    pub order: Vec<String>,
    pub services: Vec<Service>,
    pub consts: Vec<Const>,
    /// Other namespaces this one was given access to through imports.
    pub imports: Vec<String>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Namespace {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Types in declaration order.
    pub fn types_in_order(&self) -> impl Iterator<Item = &TypeDef> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.services.is_empty() && self.consts.is_empty()
    }
}

/// Depth-first marker used when walking type references for cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Visit {
    Active,
    Done,
}

/// The root of the model: every namespace declared or imported in a compile.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterfaceModel {
    /// Namespace of the document the compile started from.
    pub root: String,
    pub namespaces: BTreeMap<String, Namespace>,
}

impl InterfaceModel {
    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.get(name)
    }

    pub fn type_def(&self, name: &QualifiedName) -> Option<&TypeDef> {
        self.namespaces.get(&name.namespace)?.types.get(&name.name)
    }

    pub fn service(&self, name: &QualifiedName) -> Option<&Service> {
        self.namespaces
            .get(&name.namespace)?
            .services
            .iter()
            .find(|s| s.name == *name)
    }

    /// Follows a top-level alias to the type it stands for.
    ///
    /// Containers are returned as they are; their element types may still
    /// name aliases.
    pub fn underlying<'m>(&'m self, ty: &'m TypeRef) -> &'m TypeRef {
        match ty {
            TypeRef::Named(name) => match self.type_def(name) {
                Some(TypeDef::Alias(alias)) => &alias.underlying,
                _ => ty,
            },
            _ => ty,
        }
    }

    /// The definition a type refers to once aliases are followed, if it is
    /// a user-defined type.
    pub fn resolve<'m>(&'m self, ty: &'m TypeRef) -> Option<&'m TypeDef> {
        match self.underlying(ty) {
            TypeRef::Named(name) => self.type_def(name),
            _ => None,
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.namespaces.values().flat_map(|ns| ns.services.iter())
    }

    pub fn exceptions(&self) -> impl Iterator<Item = &ExceptionDef> {
        self.namespaces
            .values()
            .flat_map(|ns| ns.types_in_order())
            .filter_map(|def| match def {
                TypeDef::Exception(e) => Some(e),
                _ => None,
            })
    }

    /// Dumps the declared shape of the model as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn loc() -> Location {
        Location::new(Arc::from("m.idl"), 1, 1, 0, 1)
    }

    fn sample() -> InterfaceModel {
        let mut ns = Namespace::new("geo");
        let point = QualifiedName::new("geo", "Point");
        ns.types.insert(
            "Point".into(),
            TypeDef::Struct(StructDef {
                doc: None,
                name: point.clone(),
                fields: vec![Field {
                    doc: None,
                    name: "x".into(),
                    ty: TypeRef::Primitive(PrimitiveType::Int32),
                    id: 1,
                    location: loc(),
                }],
                location: loc(),
            }),
        );
        ns.types.insert(
            "Spot".into(),
            TypeDef::Alias(AliasDef {
                doc: None,
                name: QualifiedName::new("geo", "Spot"),
                target: TypeRef::Named(point.clone()),
                underlying: TypeRef::Named(point),
                location: loc(),
            }),
        );
        ns.order = vec!["Point".into(), "Spot".into()];

        let mut model = InterfaceModel {
            root: "geo".into(),
            ..Default::default()
        };
        model.namespaces.insert("geo".into(), ns);
        model
    }

    #[test]
    fn test_type_ref_display() {
        let ty = TypeRef::Map(
            Box::new(TypeRef::Primitive(PrimitiveType::String)),
            Box::new(TypeRef::List(Box::new(TypeRef::Named(QualifiedName::new(
                "geo", "Point",
            ))))),
        );
        assert_eq!(ty.to_string(), "map<string, list<geo.Point>>");
    }

    #[test]
    fn test_underlying_follows_alias() {
        let model = sample();
        let spot = TypeRef::Named(QualifiedName::new("geo", "Spot"));
        assert_eq!(
            model.underlying(&spot),
            &TypeRef::Named(QualifiedName::new("geo", "Point"))
        );
        assert_eq!(model.resolve(&spot).map(TypeDef::kind), Some(TypeKind::Struct));

        let prim = TypeRef::Primitive(PrimitiveType::Bool);
        assert_eq!(model.underlying(&prim), &prim);
        assert!(model.resolve(&prim).is_none());
    }

    #[test]
    fn test_types_in_order() {
        let model = sample();
        let names: Vec<&str> = model.namespaces["geo"]
            .types_in_order()
            .map(|t| t.name().name.as_str())
            .collect();
        assert_eq!(names, vec!["Point", "Spot"]);
    }

    #[test]
    fn test_service_exceptions_are_deduplicated() {
        let not_found = QualifiedName::new("geo", "NotFound");
        let denied = QualifiedName::new("geo", "Denied");
        let function = |name: &str, throws: Vec<QualifiedName>| Function {
            doc: None,
            name: name.into(),
            id: 1,
            params: vec![],
            returns: None,
            throws,
            location: loc(),
        };
        let service = Service {
            doc: None,
            name: QualifiedName::new("geo", "S"),
            functions: vec![
                function("a", vec![not_found.clone()]),
                function("b", vec![denied.clone(), not_found.clone()]),
            ],
            location: loc(),
        };
        assert_eq!(service.exceptions(), vec![&not_found, &denied]);
    }

    #[test]
    fn test_json_dump() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"root\": \"geo\""));
        assert!(json.contains("\"kind\": \"struct\""));
        assert!(json.contains("\"primitive\": \"int32\""));
    }
}
