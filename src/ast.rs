use std::{fmt, sync::Arc};

use serde::Serialize;

use crate::location::Location;

/// Represents the primitive types supported by Basalt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    /// Boolean, packed as one byte.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit floating point number.
    Float32,
    /// 64-bit floating point number.
    Float64,
    /// UTF-8 text.
    String,
    /// Opaque byte string.
    Buffer,
    /// Point in time.
    Date,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 10] = [
        PrimitiveType::Bool,
        PrimitiveType::Int8,
        PrimitiveType::Int16,
        PrimitiveType::Int32,
        PrimitiveType::Int64,
        PrimitiveType::Float32,
        PrimitiveType::Float64,
        PrimitiveType::String,
        PrimitiveType::Buffer,
        PrimitiveType::Date,
    ];

    /// The keyword naming this type in IDL source.
    pub fn keyword(&self) -> &'static str {
        match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::String => "string",
            PrimitiveType::Buffer => "buffer",
            PrimitiveType::Date => "date",
        }
    }

    pub fn from_keyword(word: &str) -> Option<PrimitiveType> {
        PrimitiveType::ALL.into_iter().find(|p| p.keyword() == word)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PrimitiveType::Int8 | PrimitiveType::Int16 | PrimitiveType::Int32 | PrimitiveType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PrimitiveType::Float32 | PrimitiveType::Float64)
    }

    /// Inclusive value range of an integer type.
    pub fn integer_range(&self) -> Option<(i64, i64)> {
        match self {
            PrimitiveType::Int8 => Some((i8::MIN as i64, i8::MAX as i64)),
            PrimitiveType::Int16 => Some((i16::MIN as i64, i16::MAX as i64)),
            PrimitiveType::Int32 => Some((i32::MIN as i64, i32::MAX as i64)),
            PrimitiveType::Int64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// Gets the packed size in bytes of a fixed-width primitive type.
    ///
    /// Variable-length types (string, buffer) return `None`.
    pub fn get_byte_size(&self) -> Option<usize> {
        match self {
            PrimitiveType::Bool | PrimitiveType::Int8 => Some(1),
            PrimitiveType::Int16 => Some(2),
            PrimitiveType::Int32 | PrimitiveType::Float32 => Some(4),
            PrimitiveType::Int64 | PrimitiveType::Float64 | PrimitiveType::Date => Some(8),
            PrimitiveType::String | PrimitiveType::Buffer => None,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A name together with where it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub location: Location,
}

/// A possibly namespace-qualified name such as `Point` or `shapes.Point`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    pub segments: Vec<String>,
    pub location: Location,
}

impl Path {
    /// The last segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Everything before the last segment, joined with dots.
    pub fn qualifier(&self) -> Option<String> {
        match self.segments.len() {
            0 | 1 => None,
            n => Some(self.segments[..n - 1].join(".")),
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// A type as written in the source, before name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Primitive(PrimitiveType, Location),
    List(Box<TypeExpr>, Location),
    Set(Box<TypeExpr>, Location),
    Map(Box<TypeExpr>, Box<TypeExpr>, Location),
    /// A user-defined type, identified by its (possibly qualified) name.
    Named(Path),
}

impl TypeExpr {
    pub fn location(&self) -> &Location {
        match self {
            TypeExpr::Primitive(_, location)
            | TypeExpr::List(_, location)
            | TypeExpr::Set(_, location)
            | TypeExpr::Map(_, _, location) => location,
            TypeExpr::Named(path) => &path.location,
        }
    }
}

/// An integer written in the source, e.g. a wire id or enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntLiteral {
    pub value: i64,
    pub location: Location,
}

/// Represents a field within a struct or exception.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub doc: Option<String>,
    pub name: Ident,
    pub type_expr: TypeExpr,
    /// Explicit `(id=N)` wire identifier.
    pub id: Option<IntLiteral>,
}

/// Represents a member within an enum.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMemberDecl {
    pub doc: Option<String>,
    pub name: Ident,
    /// The optional assigned constant value for the member.
    pub value: Option<IntLiteral>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub doc: Option<String>,
    pub name: Ident,
    pub members: Vec<EnumMemberDecl>,
    pub location: Location,
}

/// A struct or exception body.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub doc: Option<String>,
    pub name: Ident,
    pub fields: Vec<FieldDecl>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefDecl {
    pub doc: Option<String>,
    pub name: Ident,
    pub target: TypeExpr,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: Ident,
    pub type_expr: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub doc: Option<String>,
    pub name: Ident,
    pub params: Vec<ParamDecl>,
    /// `None` for functions without a result (no arrow, or `-> void`).
    pub returns: Option<TypeExpr>,
    pub throws: Vec<Path>,
    pub id: Option<IntLiteral>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDecl {
    pub doc: Option<String>,
    pub name: Ident,
    pub functions: Vec<FunctionDecl>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    /// An enum member such as `Color.RED`.
    Path(Path),
}

impl Literal {
    /// Short description used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Literal::Int(_) => "integer literal",
            Literal::Float(_) => "float literal",
            Literal::String(_) => "string literal",
            Literal::Bool(_) => "boolean literal",
            Literal::Path(_) => "enum member",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralExpr {
    pub value: Literal,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub doc: Option<String>,
    pub name: Ident,
    pub type_expr: TypeExpr,
    pub value: LiteralExpr,
    pub location: Location,
}

/// Represents a top-level declaration in a Basalt document.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Const(ConstDecl),
    Typedef(TypedefDecl),
    Enum(EnumDecl),
    Struct(StructDecl),
    Exception(StructDecl),
    Service(ServiceDecl),
}

impl Declaration {
    /// Returns the declared name.
    pub fn name(&self) -> &Ident {
        match self {
            Declaration::Const(c) => &c.name,
            Declaration::Typedef(t) => &t.name,
            Declaration::Enum(e) => &e.name,
            Declaration::Struct(s) | Declaration::Exception(s) => &s.name,
            Declaration::Service(s) => &s.name,
        }
    }

    /// The keyword that introduced the declaration.
    pub fn keyword(&self) -> &'static str {
        match self {
            Declaration::Const(_) => "const",
            Declaration::Typedef(_) => "typedef",
            Declaration::Enum(_) => "enum",
            Declaration::Struct(_) => "struct",
            Declaration::Exception(_) => "exception",
            Declaration::Service(_) => "service",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    /// The imported document, relative to the importing one.
    pub path: String,
    pub location: Location,
}

/// Represents a parsed Basalt document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Name of the source the document was parsed from.
    pub source: Arc<str>,
    /// The `namespace` directive, if present.
    pub namespace: Option<Path>,
    pub imports: Vec<ImportDecl>,
    /// Declarations in source order.
    pub declarations: Vec<Declaration>,
}
