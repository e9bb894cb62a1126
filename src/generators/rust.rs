//! Rust bindings: one module per namespace plus a `wire` module, all
//! depending on the `basalt_runtime` crate for `Packable` and `Transport`.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    ast::PrimitiveType,
    config::{GeneratorOptions, Language},
    error::IdlError,
    generators::{
        CodeGenerator, FileSet, module_collisions, namespace_location, package_dir, sources_of,
        type_uses, writer::CodeWriter,
    },
    location::Location,
    model::{
        Const, ConstValue, EnumDef, Function, InterfaceModel, QualifiedName, Service, StructDef,
        TypeDef, TypeRef,
    },
    naming::{to_pascal_case, to_snake_case},
    wire::{self, Command, ReplyCode},
};

/// Keywords that are written as raw identifiers.
const KEYWORDS: [&str; 49] = [
    "abstract", "as", "async", "await", "become", "box", "break", "const", "continue", "do",
    "dyn", "else", "enum", "extern", "false", "final", "fn", "for", "gen", "if", "impl", "in",
    "let", "loop", "macro", "match", "mod", "move", "mut", "override", "priv", "pub", "ref",
    "return", "static", "struct", "trait", "true", "try", "type", "typeof", "unsafe", "unsized",
    "use", "virtual", "where", "while", "yield", "union",
];

/// Keywords that cannot be raw identifiers.
const FORBIDDEN: [&str; 5] = ["self", "Self", "super", "crate", "_"];

/// Names the generated code uses unqualified.
const PRELUDE_NAMES: [&str; 9] = [
    "Vec", "String", "Option", "Result", "Box", "Some", "None", "Ok", "Err",
];

/// Generic parameters of generated clients and dispatchers, which would hide
/// user types of the same name.
const GENERIC_PARAMS: [&str; 2] = ["T", "H"];

/// Methods every generated client has besides the service's functions.
const CLIENT_METHODS: [&str; 2] = ["new", "into_inner"];

const WIRE_MODULE: &str = "wire";

const RUNTIME: &str = "basalt_runtime";

/// Generates Rust modules for every namespace.
pub struct RustGenerator {
    options: GeneratorOptions,
}

impl RustGenerator {
    pub fn new(options: GeneratorOptions) -> Self {
        RustGenerator { options }
    }

    fn module_name(&self, namespace: &str) -> String {
        self.options.file_naming.apply(namespace)
    }

    fn module_path(&self, model: &InterfaceModel, namespace: &str) -> std::path::PathBuf {
        package_dir(&self.options, model).join(format!("{}.rs", self.module_name(namespace)))
    }

    fn scope<'m>(&'m self, model: &'m InterfaceModel, namespace: &'m str) -> Scope<'m> {
        Scope {
            generator: self,
            model,
            namespace,
        }
    }

    fn write_header(&self, w: &mut CodeWriter, model: &InterfaceModel, namespace: &str) {
        w.write_line(&format!(
            "// Generated by basalt from {}. Do not edit.",
            sources_of(model, namespace)
        ));
        w.write_line(
            "#![allow(dead_code, unused_imports, unused_variables, non_snake_case, non_camel_case_types)]",
        );
        w.blank_line();
        w.write_line(&format!("use {RUNTIME}::Packable as _;"));
    }

    fn write_wire_module(&self, w: &mut CodeWriter) {
        w.write_line("// Generated by basalt. Do not edit.");
        w.write_line("#![allow(dead_code)]");
        w.blank_line();
        w.write_line(&format!("use {RUNTIME}::{{Error, Packable}};"));
        w.blank_line();
        w.write_line(&format!("pub const MAGIC: u32 = {:#x};", wire::MAGIC));
        for command in Command::ALL {
            w.write_line(&format!("pub const {}: i8 = {};", command.constant(), command.code()));
        }
        for code in ReplyCode::ALL {
            w.write_line(&format!("pub const {}: i8 = {};", code.constant(), code.code()));
        }

        w.blank_line();
        w.write_line("/// The part of a reply that precedes its body.");
        w.write_line("#[derive(Debug, Clone, Copy, PartialEq, Eq)]");
        w.block("pub enum Reply {", |w| {
            w.write_line("Success,");
            w.write_line("PackedException(i32),");
        });
        w.write_line("}");

        w.blank_line();
        w.block(
            "pub fn write_invoke(output: &mut Vec<u8>, func_id: i32) -> Result<(), Error> {",
            |w| {
                w.write_line(&format!("{}.pack(output)?;", Command::Invoke.constant()));
                w.write_line("func_id.pack(output)");
            },
        );
        w.write_line("}");

        w.blank_line();
        w.write_line("/// Reads a reply code, turning error replies into errors.");
        w.block("pub fn read_reply(input: &mut &[u8]) -> Result<Reply, Error> {", |w| {
            w.block("match i8::unpack(input)? {", |w| {
                w.write_line(&format!("{} => Ok(Reply::Success),", ReplyCode::Success));
                w.write_line(&format!(
                    "{} => Ok(Reply::PackedException(i32::unpack(input)?)),",
                    ReplyCode::PackedException
                ));
                w.block(&format!("{} => {{", ReplyCode::GenericException), |w| {
                    w.write_line("let message = String::unpack(input)?;");
                    w.write_line("let traceback = String::unpack(input)?;");
                    w.write_line("Err(Error::Generic { message, traceback })");
                });
                w.write_line("}");
                w.write_line(&format!(
                    "{} => Err(Error::Protocol(String::unpack(input)?)),",
                    ReplyCode::ProtocolError
                ));
                w.write_line("code => Err(Error::Protocol(format!(\"invalid reply code {code}\"))),");
            });
            w.write_line("}");
        });
        w.write_line("}");

        w.blank_line();
        w.block("pub fn unknown_exception(class_id: i32) -> Error {", |w| {
            w.write_line("Error::Protocol(format!(\"unknown exception class id {class_id}\"))");
        });
        w.write_line("}");

        w.blank_line();
        w.block("pub fn write_success(output: &mut Vec<u8>) -> Result<(), Error> {", |w| {
            w.write_line(&format!("{}.pack(output)", ReplyCode::Success));
        });
        w.write_line("}");

        w.blank_line();
        w.block(
            "pub fn write_packed_exception(output: &mut Vec<u8>, class_id: i32) -> Result<(), Error> {",
            |w| {
                w.write_line(&format!("{}.pack(output)?;", ReplyCode::PackedException));
                w.write_line("class_id.pack(output)");
            },
        );
        w.write_line("}");

        w.blank_line();
        w.block(
            "pub fn write_generic_exception(output: &mut Vec<u8>, message: &str, traceback: &str) -> Result<(), Error> {",
            |w| {
                w.write_line(&format!("{}.pack(output)?;", ReplyCode::GenericException));
                w.write_line("String::from(message).pack(output)?;");
                w.write_line("String::from(traceback).pack(output)");
            },
        );
        w.write_line("}");

        w.blank_line();
        w.block(
            "pub fn write_protocol_error(output: &mut Vec<u8>, message: &str) -> Result<(), Error> {",
            |w| {
                w.write_line(&format!("{}.pack(output)?;", ReplyCode::ProtocolError));
                w.write_line("String::from(message).pack(output)");
            },
        );
        w.write_line("}");

        w.blank_line();
        w.block(
            "pub fn write_ping(output: &mut Vec<u8>, message: &str) -> Result<(), Error> {",
            |w| {
                w.write_line(&format!("{}.pack(output)?;", Command::Ping.constant()));
                w.write_line("String::from(message).pack(output)");
            },
        );
        w.write_line("}");

        w.blank_line();
        w.write_line("/// Serves one command read from `input`, handing invocations to `invoke`");
        w.write_line("/// (usually a generated `dispatch_*` function). Returns `false` once the");
        w.write_line("/// peer has quit.");
        w.write_line(
            "pub fn process<F>(input: &mut &[u8], output: &mut Vec<u8>, invoke: F) -> Result<bool, Error>",
        );
        w.block("where", |w| {
            w.write_line("F: FnOnce(i32, &mut &[u8], &mut Vec<u8>) -> Result<(), Error>,");
        });
        w.block("{", |w| {
            w.block("match i8::unpack(input)? {", |w| {
                w.block(&format!("{} => {{", Command::Invoke.constant()), |w| {
                    w.write_line("let func_id = i32::unpack(input)?;");
                    w.write_line("invoke(func_id, input, output)?;");
                });
                w.write_line("}");
                w.block(&format!("{} => {{", Command::Ping.constant()), |w| {
                    w.write_line("let message = String::unpack(input)?;");
                    w.write_line("write_success(output)?;");
                    w.write_line("message.pack(output)?;");
                });
                w.write_line("}");
                w.write_line("// No objects are registered by reference, so there is nothing to count.");
                w.block(
                    &format!(
                        "{} | {} => {{",
                        Command::Incref.constant(),
                        Command::Decref.constant()
                    ),
                    |w| w.write_line("i64::unpack(input)?;"),
                );
                w.write_line("}");
                w.write_line(&format!("{} => return Ok(false),", Command::Quit.constant()));
                w.write_line(
                    "code => write_protocol_error(output, &format!(\"unknown command code: {code}\"))?,",
                );
            });
            w.write_line("}");
            w.write_line("Ok(true)");
        });
        w.write_line("}");
    }
}

/// An identifier as written in Rust source.
fn ident(name: &str) -> String {
    if KEYWORDS.contains(&name) {
        format!("r#{name}")
    } else {
        name.to_string()
    }
}

fn variant_name(member: &str) -> String {
    to_pascal_case(member)
}

fn valid_variant(name: &str) -> bool {
    name != "Self" && name.chars().next().is_some_and(|c| c.is_alphabetic())
}

fn write_doc(w: &mut CodeWriter, doc: Option<&str>) {
    if let Some(doc) = doc {
        w.write_prefixed("/// ", doc);
    }
}

fn float_literal(value: f64, ty: &str) -> String {
    if value.is_nan() {
        format!("{ty}::NAN")
    } else if value.is_infinite() {
        if value > 0.0 {
            format!("{ty}::INFINITY")
        } else {
            format!("{ty}::NEG_INFINITY")
        }
    } else {
        format!("{value:?}")
    }
}

fn passed_by_value(ty: &TypeRef) -> bool {
    matches!(
        ty,
        TypeRef::Primitive(
            PrimitiveType::Bool
                | PrimitiveType::Int8
                | PrimitiveType::Int16
                | PrimitiveType::Int32
                | PrimitiveType::Int64
                | PrimitiveType::Float32
                | PrimitiveType::Float64
        )
    )
}

/// Renders code from inside the module of one namespace.
struct Scope<'m> {
    generator: &'m RustGenerator,
    model: &'m InterfaceModel,
    namespace: &'m str,
}

impl Scope<'_> {
    fn path(&self, name: &QualifiedName) -> String {
        if name.namespace == self.namespace {
            ident(&name.name)
        } else {
            format!(
                "super::{}::{}",
                ident(&self.generator.module_name(&name.namespace)),
                ident(&name.name)
            )
        }
    }

    fn rust_type(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Primitive(p) => match p {
                PrimitiveType::Bool => "bool".to_string(),
                PrimitiveType::Int8 => "i8".to_string(),
                PrimitiveType::Int16 => "i16".to_string(),
                PrimitiveType::Int32 => "i32".to_string(),
                PrimitiveType::Int64 => "i64".to_string(),
                PrimitiveType::Float32 => "f32".to_string(),
                PrimitiveType::Float64 => "f64".to_string(),
                PrimitiveType::String => "String".to_string(),
                PrimitiveType::Buffer => format!("{RUNTIME}::Buffer"),
                PrimitiveType::Date => format!("{RUNTIME}::Date"),
            },
            TypeRef::List(inner) => format!("Vec<{}>", self.rust_type(inner)),
            TypeRef::Set(inner) => {
                format!("std::collections::HashSet<{}>", self.rust_type(inner))
            }
            TypeRef::Map(key, value) => format!(
                "std::collections::HashMap<{}, {}>",
                self.rust_type(key),
                self.rust_type(value)
            ),
            TypeRef::Named(name) => self.path(name),
        }
    }

    fn param_type(&self, ty: &TypeRef) -> String {
        if passed_by_value(ty) {
            self.rust_type(ty)
        } else {
            format!("&{}", self.rust_type(ty))
        }
    }

    fn result_type(&self, function: &Function) -> String {
        match &function.returns {
            Some(ty) => self.rust_type(ty),
            None => "()".to_string(),
        }
    }

    fn error_variant(&self, exception: &QualifiedName) -> String {
        variant_name(&exception.name)
    }

    fn write_struct(&self, w: &mut CodeWriter, def: &StructDef) {
        write_doc(w, def.doc.as_deref());
        w.write_line("#[derive(Debug, Clone, PartialEq)]");
        w.block(&format!("pub struct {} {{", ident(&def.name.name)), |w| {
            for field in &def.fields {
                write_doc(w, field.doc.as_deref());
                w.write_line(&format!(
                    "pub {}: {},",
                    ident(&field.name),
                    self.rust_type(&field.ty)
                ));
            }
        });
        w.write_line("}");
    }

    fn write_enum(&self, w: &mut CodeWriter, def: &EnumDef) {
        let name = ident(&def.name.name);
        write_doc(w, def.doc.as_deref());
        w.write_line("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]");
        w.write_line("#[repr(i32)]");
        w.block(&format!("pub enum {name} {{"), |w| {
            for member in &def.members {
                write_doc(w, member.doc.as_deref());
                w.write_line(&format!("{} = {},", variant_name(&member.name), member.value));
            }
        });
        w.write_line("}");
        w.blank_line();
        w.block(&format!("impl {name} {{"), |w| {
            w.block("pub fn from_i32(value: i32) -> Option<Self> {", |w| {
                w.block("match value {", |w| {
                    for member in &def.members {
                        w.write_line(&format!(
                            "{} => Some(Self::{}),",
                            member.value,
                            variant_name(&member.name)
                        ));
                    }
                    w.write_line("_ => None,");
                });
                w.write_line("}");
            });
            w.write_line("}");
        });
        w.write_line("}");
    }

    fn write_exception_impls(&self, w: &mut CodeWriter, def: &StructDef, class_id: u32) {
        let name = ident(&def.name.name);
        w.blank_line();
        w.block(&format!("impl {name} {{"), |w| {
            w.write_line(&format!("pub const CLASS_ID: i32 = {class_id};"));
        });
        w.write_line("}");
        w.blank_line();
        w.block(&format!("impl std::fmt::Display for {name} {{"), |w| {
            w.block(
                "fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {",
                |w| w.write_line("write!(f, \"{self:?}\")"),
            );
            w.write_line("}");
        });
        w.write_line("}");
        w.blank_line();
        w.write_line(&format!("impl std::error::Error for {name} {{}}"));
    }

    fn write_const(&self, w: &mut CodeWriter, constant: &Const) {
        let underlying = self.model.underlying(&constant.ty);
        let ty = match underlying {
            TypeRef::Primitive(PrimitiveType::String) => "&str".to_string(),
            _ => self.rust_type(&constant.ty),
        };
        let value = match &constant.value {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Int(i) => i.to_string(),
            ConstValue::Float(f) => match underlying {
                TypeRef::Primitive(PrimitiveType::Float32) => float_literal(*f, "f32"),
                _ => float_literal(*f, "f64"),
            },
            ConstValue::String(s) => format!("{s:?}"),
            ConstValue::EnumMember { member, value } => match underlying {
                TypeRef::Named(enum_name) => {
                    format!("{}::{}", self.path(enum_name), variant_name(member))
                }
                _ => value.to_string(),
            },
        };
        write_doc(w, constant.doc.as_deref());
        w.write_line(&format!("pub const {}: {ty} = {value};", ident(&constant.name.name)));
    }

    fn write_packable_record(&self, w: &mut CodeWriter, def: &StructDef) {
        let ordered = wire::packing_order(&def.fields);
        w.block(
            &format!("impl {RUNTIME}::Packable for {} {{", ident(&def.name.name)),
            |w| {
                w.block(
                    &format!(
                        "fn pack<W: std::io::Write>(&self, writer: &mut W) -> Result<(), {RUNTIME}::Error> {{"
                    ),
                    |w| {
                        for field in &ordered {
                            w.write_line(&format!("self.{}.pack(writer)?;", ident(&field.name)));
                        }
                        w.write_line("Ok(())");
                    },
                );
                w.write_line("}");
                w.blank_line();
                w.block(
                    &format!(
                        "fn unpack<R: std::io::Read>(reader: &mut R) -> Result<Self, {RUNTIME}::Error> {{"
                    ),
                    |w| {
                        if ordered.is_empty() {
                            w.write_line("Ok(Self {})");
                            return;
                        }
                        w.block("Ok(Self {", |w| {
                            for field in &ordered {
                                w.write_line(&format!(
                                    "{}: {RUNTIME}::Packable::unpack(reader)?,",
                                    ident(&field.name)
                                ));
                            }
                        });
                        w.write_line("})");
                    },
                );
                w.write_line("}");
            },
        );
        w.write_line("}");
    }

    fn write_packable_enum(&self, w: &mut CodeWriter, def: &EnumDef) {
        let name = ident(&def.name.name);
        w.block(&format!("impl {RUNTIME}::Packable for {name} {{"), |w| {
            w.block(
                &format!(
                    "fn pack<W: std::io::Write>(&self, writer: &mut W) -> Result<(), {RUNTIME}::Error> {{"
                ),
                |w| w.write_line("(*self as i32).pack(writer)"),
            );
            w.write_line("}");
            w.blank_line();
            w.block(
                &format!(
                    "fn unpack<R: std::io::Read>(reader: &mut R) -> Result<Self, {RUNTIME}::Error> {{"
                ),
                |w| {
                    w.write_line("let value = i32::unpack(reader)?;");
                    w.write_line(&format!(
                        "Self::from_i32(value).ok_or({RUNTIME}::Error::InvalidEnumValue {{ type_name: {:?}, value }})",
                        def.name.name
                    ));
                },
            );
            w.write_line("}");
        });
        w.write_line("}");
    }

    fn write_error_enum(&self, w: &mut CodeWriter, service: &Service) {
        let error = format!("{}Error", service.name.name);
        let exceptions = service.exceptions();

        w.blank_line();
        w.write_line(&format!(
            "/// Every way a call to `{}` can fail.",
            service.name.name
        ));
        w.write_line("#[derive(Debug)]");
        w.block(&format!("pub enum {error} {{"), |w| {
            for exception in &exceptions {
                w.write_line(&format!(
                    "{}({}),",
                    self.error_variant(exception),
                    self.path(exception)
                ));
            }
            w.write_line(&format!("Runtime({RUNTIME}::Error),"));
        });
        w.write_line("}");

        let mut sources: Vec<(String, String)> = exceptions
            .iter()
            .map(|e| (self.error_variant(e), self.path(e)))
            .collect();
        sources.push(("Runtime".to_string(), format!("{RUNTIME}::Error")));
        for (variant, ty) in &sources {
            w.blank_line();
            w.block(&format!("impl From<{ty}> for {error} {{"), |w| {
                w.block(&format!("fn from(error: {ty}) -> Self {{"), |w| {
                    w.write_line(&format!("{error}::{variant}(error)"));
                });
                w.write_line("}");
            });
            w.write_line("}");
        }

        w.blank_line();
        w.block(&format!("impl std::fmt::Display for {error} {{"), |w| {
            w.block(
                "fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {",
                |w| {
                    w.block("match self {", |w| {
                        for (variant, _) in &sources {
                            w.write_line(&format!("{error}::{variant}(error) => write!(f, \"{{error}}\"),"));
                        }
                    });
                    w.write_line("}");
                },
            );
            w.write_line("}");
        });
        w.write_line("}");
        w.blank_line();
        w.write_line(&format!("impl std::error::Error for {error} {{}}"));
    }

    fn write_client(&self, w: &mut CodeWriter, service: &Service) {
        let name = &service.name.name;
        let client = format!("{name}Client");
        let error = format!("{name}Error");

        w.blank_line();
        write_doc(w, service.doc.as_deref());
        w.block(&format!("pub struct {client}<T: {RUNTIME}::Transport> {{"), |w| {
            w.write_line("transport: T,");
        });
        w.write_line("}");
        w.blank_line();
        w.block(&format!("impl<T: {RUNTIME}::Transport> {client}<T> {{"), |w| {
            w.block("pub fn new(transport: T) -> Self {", |w| {
                w.write_line(&format!("{client} {{ transport }}"));
            });
            w.write_line("}");
            w.blank_line();
            w.block("pub fn into_inner(self) -> T {", |w| w.write_line("self.transport"));
            w.write_line("}");

            for function in &service.functions {
                let params: String = function
                    .params
                    .iter()
                    .map(|p| format!(", {}: {}", ident(&p.name), self.param_type(&p.ty)))
                    .collect();
                w.blank_line();
                write_doc(w, function.doc.as_deref());
                w.block(
                    &format!(
                        "pub fn {}(&mut self{params}) -> Result<{}, {error}> {{",
                        ident(&function.name),
                        self.result_type(function)
                    ),
                    |w| self.write_client_body(w, function, &error),
                );
                w.write_line("}");
            }
        });
        w.write_line("}");
    }

    fn write_client_body(&self, w: &mut CodeWriter, function: &Function, error: &str) {
        w.write_line("let mut _request = Vec::new();");
        w.write_line(&format!(
            "super::{WIRE_MODULE}::write_invoke(&mut _request, {})?;",
            function.id
        ));
        for param in &function.params {
            w.write_line(&format!("{}.pack(&mut _request)?;", ident(&param.name)));
        }
        w.write_line("let _reply = self.transport.call(&_request)?;");
        w.write_line("let mut _reader = _reply.as_slice();");
        w.block(
            &format!("match super::{WIRE_MODULE}::read_reply(&mut _reader)? {{"),
            |w| {
                let success = if function.returns.is_some() {
                    format!("Ok({RUNTIME}::Packable::unpack(&mut _reader)?)")
                } else {
                    "Ok(())".to_string()
                };
                w.write_line(&format!("super::{WIRE_MODULE}::Reply::Success => {success},"));
                if function.throws.is_empty() {
                    w.write_line(&format!(
                        "super::{WIRE_MODULE}::Reply::PackedException(class_id) => Err(super::{WIRE_MODULE}::unknown_exception(class_id).into()),"
                    ));
                    return;
                }
                w.block(
                    &format!("super::{WIRE_MODULE}::Reply::PackedException(class_id) => match class_id {{"),
                    |w| {
                        for exception in &function.throws {
                            w.write_line(&format!(
                                "{}::CLASS_ID => Err({error}::{}({RUNTIME}::Packable::unpack(&mut _reader)?)),",
                                self.path(exception),
                                self.error_variant(exception)
                            ));
                        }
                        w.write_line(&format!(
                            "other => Err(super::{WIRE_MODULE}::unknown_exception(other).into()),"
                        ));
                    },
                );
                w.write_line("},");
            },
        );
        w.write_line("}");
    }

    fn write_server(&self, w: &mut CodeWriter, service: &Service) {
        let name = &service.name.name;
        let handler = format!("{name}Handler");
        let error = format!("{name}Error");

        w.blank_line();
        w.write_line(&format!("/// Implement this to serve `{name}`."));
        w.block(&format!("pub trait {handler} {{"), |w| {
            for (i, function) in service.functions.iter().enumerate() {
                if i > 0 {
                    w.blank_line();
                }
                let params: String = function
                    .params
                    .iter()
                    .map(|p| format!(", {}: {}", ident(&p.name), self.rust_type(&p.ty)))
                    .collect();
                write_doc(w, function.doc.as_deref());
                w.write_line(&format!(
                    "fn {}(&self{params}) -> Result<{}, {error}>;",
                    ident(&function.name),
                    self.result_type(function)
                ));
            }
        });
        w.write_line("}");

        w.blank_line();
        w.write_line(&format!(
            "/// Reads the arguments of function `_func_id` of `{name}` from `_input`, calls the handler and writes the reply to `_output`."
        ));
        w.block(
            &format!(
                "pub fn dispatch_{}<H: {handler} + ?Sized>(",
                to_snake_case(name)
            ),
            |w| {
                w.write_line("_handler: &H,");
                w.write_line("_func_id: i32,");
                w.write_line("_input: &mut &[u8],");
                w.write_line("_output: &mut Vec<u8>,");
            },
        );
        w.block(&format!(") -> Result<(), {RUNTIME}::Error> {{"), |w| {
            w.block("match _func_id {", |w| {
                for function in &service.functions {
                    w.block(&format!("{} => {{", function.id), |w| {
                        self.write_dispatch_arm(w, function, &error)
                    });
                    w.write_line("}");
                }
                w.write_line(&format!(
                    "_ => super::{WIRE_MODULE}::write_protocol_error(_output, &format!(\"unknown function id {{_func_id}}\")),"
                ));
            });
            w.write_line("}");
        });
        w.write_line("}");
    }

    fn write_dispatch_arm(&self, w: &mut CodeWriter, function: &Function, error: &str) {
        for param in &function.params {
            w.write_line(&format!(
                "let {}: {} = {RUNTIME}::Packable::unpack(_input)?;",
                ident(&param.name),
                self.rust_type(&param.ty)
            ));
        }
        let args: Vec<String> = function.params.iter().map(|p| ident(&p.name)).collect();
        w.block(
            &format!("match _handler.{}({}) {{", ident(&function.name), args.join(", ")),
            |w| {
                if function.returns.is_some() {
                    w.block("Ok(_result) => {", |w| {
                        w.write_line(&format!("super::{WIRE_MODULE}::write_success(_output)?;"));
                        w.write_line("_result.pack(_output)");
                    });
                    w.write_line("}");
                } else {
                    w.write_line(&format!(
                        "Ok(()) => super::{WIRE_MODULE}::write_success(_output),"
                    ));
                }
                for exception in &function.throws {
                    w.block(
                        &format!("Err({error}::{}(_error)) => {{", self.error_variant(exception)),
                        |w| {
                            w.write_line(&format!(
                                "super::{WIRE_MODULE}::write_packed_exception(_output, {}::CLASS_ID)?;",
                                self.path(exception)
                            ));
                            w.write_line("_error.pack(_output)");
                        },
                    );
                    w.write_line("}");
                }
                w.write_line(&format!(
                    "Err(_error) => super::{WIRE_MODULE}::write_generic_exception(_output, &_error.to_string(), &format!(\"{{_error:?}}\")),"
                ));
            },
        );
        w.write_line("}");
    }
}

fn forbidden(name: &str, location: &Location, what: &str) -> Option<IdlError> {
    FORBIDDEN.contains(&name).then(|| {
        IdlError::codegen(
            location.clone(),
            format!("{what} '{name}' cannot be used as an identifier in Rust"),
        )
    })
}

impl RustGenerator {
    fn check_enum(&self, errors: &mut Vec<IdlError>, def: &EnumDef) {
        let mut variants: BTreeMap<String, &str> = BTreeMap::new();
        for member in &def.members {
            let variant = variant_name(&member.name);
            if !valid_variant(&variant) {
                errors.push(IdlError::codegen(
                    member.location.clone(),
                    format!(
                        "enum member '{}' of '{}' has no valid Rust variant name",
                        member.name, def.name
                    ),
                ));
            } else if let Some(first) = variants.insert(variant.clone(), &member.name) {
                errors.push(IdlError::codegen(
                    member.location.clone(),
                    format!(
                        "enum members '{first}' and '{}' of '{}' both become variant '{variant}'",
                        member.name, def.name
                    ),
                ));
            }
        }
    }

    fn check_service(
        &self,
        errors: &mut Vec<IdlError>,
        model: &InterfaceModel,
        service: &Service,
    ) {
        let name = &service.name.name;
        let ns = &service.name.namespace;
        for generated in [
            format!("{name}Client"),
            format!("{name}Handler"),
            format!("{name}Error"),
        ] {
            if let Some(def) = model.type_def(&QualifiedName::new(ns.as_str(), generated.as_str())) {
                errors.push(IdlError::codegen(
                    service.location.clone(),
                    format!(
                        "'{generated}' generated for service '{}' collides with {} '{}'",
                        service.name,
                        def.kind(),
                        def.name()
                    ),
                ));
            }
        }

        let error = format!("{name}Error");
        let mut variants: BTreeMap<String, &QualifiedName> = BTreeMap::new();
        for exception in service.exceptions() {
            let variant = variant_name(&exception.name);
            if variant == "Runtime" {
                errors.push(IdlError::codegen(
                    service.location.clone(),
                    format!(
                        "exception '{exception}' of service '{}' collides with the 'Runtime' variant of '{error}'",
                        service.name
                    ),
                ));
            } else if let Some(first) = variants.insert(variant.clone(), exception) {
                errors.push(IdlError::codegen(
                    service.location.clone(),
                    format!(
                        "exceptions '{first}' and '{exception}' of service '{}' both become variant '{variant}' of '{error}'",
                        service.name
                    ),
                ));
            }
        }

        for function in &service.functions {
            errors.extend(forbidden(&function.name, &function.location, "function name"));
            if CLIENT_METHODS.contains(&function.name.as_str()) {
                errors.push(IdlError::codegen(
                    function.location.clone(),
                    format!(
                        "function name '{}' collides with a method of the generated client",
                        function.name
                    ),
                ));
            }
            for param in &function.params {
                errors.extend(forbidden(&param.name, &param.location, "parameter name"));
                if param.name.starts_with('_') {
                    errors.push(IdlError::codegen(
                        param.location.clone(),
                        format!(
                            "parameter name '{}' is reserved for generated Rust code",
                            param.name
                        ),
                    ));
                }
            }
        }
    }
}

impl CodeGenerator for RustGenerator {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    fn check_model(&self, model: &InterfaceModel) -> Vec<IdlError> {
        let mut errors = module_collisions(model, Language::Rust, |ns| self.module_name(ns));
        for ns in model.namespaces.values() {
            let module = self.module_name(&ns.name);
            if FORBIDDEN.contains(&module.as_str()) || module == WIRE_MODULE || module == "mod" {
                errors.push(IdlError::codegen(
                    namespace_location(ns),
                    format!("namespace '{}' cannot be a Rust module named '{module}'", ns.name),
                ));
            }

            for def in ns.types_in_order() {
                let name = &def.name().name;
                errors.extend(forbidden(name, def.location(), "type name"));
                if PRELUDE_NAMES.contains(&name.as_str()) {
                    errors.push(IdlError::codegen(
                        def.location().clone(),
                        format!("type name '{name}' would shadow a Rust prelude type"),
                    ));
                }
                if GENERIC_PARAMS.contains(&name.as_str()) {
                    errors.push(IdlError::codegen(
                        def.location().clone(),
                        format!("type name '{name}' is a generic parameter of generated Rust code"),
                    ));
                }
                for field in def.fields().unwrap_or_default() {
                    errors.extend(forbidden(&field.name, &field.location, "field name"));
                }
                if let TypeDef::Enum(e) = def {
                    self.check_enum(&mut errors, e);
                }
            }
            for constant in &ns.consts {
                errors.extend(forbidden(&constant.name.name, &constant.location, "constant name"));
            }
            for service in &ns.services {
                self.check_service(&mut errors, model, service);
            }
        }

        for used in type_uses(model) {
            check_hashable(&mut errors, model, used.ty, used.location, &used.what);
        }
        errors
    }

    fn emit_types(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        let root = out.writer(package_dir(&self.options, model).join("mod.rs"));
        root.write_line("// Generated by basalt. Do not edit.");
        root.write_line("#![allow(non_snake_case)]");
        root.blank_line();
        for ns in model.namespaces.keys() {
            root.write_line(&format!("pub mod {};", ident(&self.module_name(ns))));
        }
        root.write_line(&format!("pub mod {WIRE_MODULE};"));

        for ns in model.namespaces.values() {
            debug!(namespace = %ns.name, "emitting rust types");
            let scope = self.scope(model, &ns.name);
            let w = out.writer(self.module_path(model, &ns.name));
            self.write_header(w, model, &ns.name);

            for def in ns.types_in_order() {
                w.blank_line();
                match def {
                    TypeDef::Enum(e) => scope.write_enum(w, e),
                    TypeDef::Struct(s) => scope.write_struct(w, s),
                    TypeDef::Exception(e) => {
                        scope.write_struct(w, &e.record);
                        scope.write_exception_impls(w, &e.record, e.class_id);
                    }
                    TypeDef::Alias(alias) => {
                        write_doc(w, alias.doc.as_deref());
                        w.write_line(&format!(
                            "pub type {} = {};",
                            ident(&alias.name.name),
                            scope.rust_type(&alias.target)
                        ));
                    }
                }
            }

            if !ns.consts.is_empty() {
                w.blank_line();
            }
            for constant in &ns.consts {
                scope.write_const(w, constant);
            }
        }
        Ok(())
    }

    fn emit_serializer(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        self.write_wire_module(
            out.writer(package_dir(&self.options, model).join(format!("{WIRE_MODULE}.rs"))),
        );

        for ns in model.namespaces.values() {
            let scope = self.scope(model, &ns.name);
            let w = out.writer(self.module_path(model, &ns.name));
            for def in ns.types_in_order() {
                match def {
                    TypeDef::Struct(s) => {
                        w.blank_line();
                        scope.write_packable_record(w, s);
                    }
                    TypeDef::Exception(e) => {
                        w.blank_line();
                        scope.write_packable_record(w, &e.record);
                    }
                    TypeDef::Enum(e) => {
                        w.blank_line();
                        scope.write_packable_enum(w, e);
                    }
                    TypeDef::Alias(_) => {}
                }
            }
        }
        Ok(())
    }

    fn emit_client(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        for ns in model.namespaces.values() {
            let scope = self.scope(model, &ns.name);
            let w = out.writer(self.module_path(model, &ns.name));
            for service in &ns.services {
                scope.write_error_enum(w, service);
                scope.write_client(w, service);
            }
        }
        Ok(())
    }

    fn emit_server(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        for ns in model.namespaces.values() {
            let scope = self.scope(model, &ns.name);
            let w = out.writer(self.module_path(model, &ns.name));
            for service in &ns.services {
                scope.write_server(w, service);
            }
        }
        Ok(())
    }
}

/// Rust's float types implement neither `Hash` nor `Eq`, so they cannot key
/// a `HashSet` or `HashMap`.
fn check_hashable(
    errors: &mut Vec<IdlError>,
    model: &InterfaceModel,
    ty: &TypeRef,
    location: &Location,
    what: &str,
) {
    let is_float = |ty: &TypeRef| {
        matches!(
            model.underlying(ty),
            TypeRef::Primitive(PrimitiveType::Float32 | PrimitiveType::Float64)
        )
    };
    let mut reject = |role: &str, ty: &TypeRef| {
        errors.push(IdlError::codegen(
            location.clone(),
            format!("{role} type '{ty}' in {what} cannot be hashed in Rust"),
        ));
    };
    match ty {
        TypeRef::Set(inner) => {
            if is_float(inner) {
                reject("set element", inner);
            }
            check_hashable(errors, model, inner, location, what);
        }
        TypeRef::Map(key, value) => {
            if is_float(key) {
                reject("map key", key);
            }
            check_hashable(errors, model, key, location, what);
            check_hashable(errors, model, value, location, what);
        }
        TypeRef::List(inner) => check_hashable(errors, model, inner, location, what),
        TypeRef::Primitive(_) | TypeRef::Named(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        builder::{
            build,
            tests::{build_str, load_all},
        },
        error::ErrorKind,
        generators::GeneratedFile,
    };

    const GEOMETRY: &str = "
/// A point on the plane.
struct Point { y: int32 (id=2); x: int32 (id=1); }
exception TooFar { limit: float64; }
enum Color { RED, DARK_GREEN = 4 }
typedef Points = list<Point>;
const DEFAULT_COLOR: Color = Color.DARK_GREEN;
const GREETING: string = \"hi\";
const LIMIT: float32 = 2;
service Geometry {
    /// Straight-line distance.
    distance(a: Point, b: Point) -> float64 throws (TooFar);
    centroid(points: Points) -> Point (id=5);
    reset(hard: bool);
}
";

    fn generate(text: &str) -> Vec<GeneratedFile> {
        let model = build_str(text).unwrap();
        RustGenerator::new(GeneratorOptions::new("out"))
            .generate(&model)
            .unwrap()
    }

    fn file<'f>(files: &'f [GeneratedFile], path: &str) -> &'f str {
        files
            .iter()
            .find(|f| f.path == PathBuf::from(path))
            .map(|f| f.content.as_str())
            .unwrap_or_else(|| panic!("no file {path}"))
    }

    fn messages(errors: &[IdlError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_layout() {
        let files = generate(GEOMETRY);
        let paths: Vec<String> = files.iter().map(|f| f.path.display().to_string()).collect();
        assert_eq!(paths, vec!["test/mod.rs", "test/test.rs", "test/wire.rs"]);
        assert!(file(&files, "test/mod.rs").ends_with("pub mod test;\npub mod wire;\n"));
    }

    #[test]
    fn test_types() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.rs");
        assert!(module.starts_with("// Generated by basalt from test.idl. Do not edit.\n#![allow("));
        assert!(module.contains(
            "/// A point on the plane.\n#[derive(Debug, Clone, PartialEq)]\npub struct Point {\n    pub y: i32,\n    pub x: i32,\n}\n"
        ));
        assert!(module.contains("#[repr(i32)]\npub enum Color {\n    Red = 0,\n    DarkGreen = 4,\n}\n"));
        assert!(module.contains("            4 => Some(Self::DarkGreen),\n"));
        assert!(module.contains("impl TooFar {\n    pub const CLASS_ID: i32 = 1;\n}\n"));
        assert!(module.contains("impl std::error::Error for TooFar {}\n"));
        assert!(module.contains("pub type Points = Vec<Point>;\n"));
        assert!(module.contains("pub const DEFAULT_COLOR: Color = Color::DarkGreen;\n"));
        assert!(module.contains("pub const GREETING: &str = \"hi\";\n"));
        assert!(module.contains("pub const LIMIT: f32 = 2.0;\n"));
    }

    #[test]
    fn test_packing_follows_field_ids() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.rs");
        assert!(module.contains("        self.x.pack(writer)?;\n        self.y.pack(writer)?;\n        Ok(())\n"));
        assert!(module.contains(
            "        Ok(Self {\n            x: basalt_runtime::Packable::unpack(reader)?,\n            y: basalt_runtime::Packable::unpack(reader)?,\n        })\n"
        ));
        assert!(module.contains("        (*self as i32).pack(writer)\n"));
    }

    #[test]
    fn test_client() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.rs");
        assert!(module.contains("pub enum GeometryError {\n    TooFar(TooFar),\n    Runtime(basalt_runtime::Error),\n}\n"));
        assert!(module.contains("impl From<TooFar> for GeometryError {"));
        assert!(module.contains(
            "    /// Straight-line distance.
    pub fn distance(&mut self, a: &Point, b: &Point) -> Result<f64, GeometryError> {
        let mut _request = Vec::new();
        super::wire::write_invoke(&mut _request, 1)?;
        a.pack(&mut _request)?;
        b.pack(&mut _request)?;
        let _reply = self.transport.call(&_request)?;
        let mut _reader = _reply.as_slice();
        match super::wire::read_reply(&mut _reader)? {
            super::wire::Reply::Success => Ok(basalt_runtime::Packable::unpack(&mut _reader)?),
            super::wire::Reply::PackedException(class_id) => match class_id {
                TooFar::CLASS_ID => Err(GeometryError::TooFar(basalt_runtime::Packable::unpack(&mut _reader)?)),
                other => Err(super::wire::unknown_exception(other).into()),
            },
        }
    }
"
        ));
        assert!(module.contains("pub fn centroid(&mut self, points: &Points) -> Result<Point, GeometryError> {"));
        assert!(module.contains("pub fn reset(&mut self, hard: bool) -> Result<(), GeometryError> {"));
        assert!(module.contains("super::wire::Reply::Success => Ok(()),"));
    }

    #[test]
    fn test_server() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.rs");
        assert!(module.contains(
            "pub trait GeometryHandler {\n    /// Straight-line distance.\n    fn distance(&self, a: Point, b: Point) -> Result<f64, GeometryError>;\n"
        ));
        assert!(module.contains("pub fn dispatch_geometry<H: GeometryHandler + ?Sized>(\n"));
        assert!(module.contains(
            "        1 => {
            let a: Point = basalt_runtime::Packable::unpack(_input)?;
            let b: Point = basalt_runtime::Packable::unpack(_input)?;
            match _handler.distance(a, b) {
                Ok(_result) => {
                    super::wire::write_success(_output)?;
                    _result.pack(_output)
                }
                Err(GeometryError::TooFar(_error)) => {
                    super::wire::write_packed_exception(_output, TooFar::CLASS_ID)?;
                    _error.pack(_output)
                }
                Err(_error) => super::wire::write_generic_exception(_output, &_error.to_string(), &format!(\"{_error:?}\")),
            }
        }
"
        ));
        assert!(module.contains("                Ok(()) => super::wire::write_success(_output),\n"));
        assert!(module.contains("        _ => super::wire::write_protocol_error(_output, &format!(\"unknown function id {_func_id}\")),\n"));
    }

    #[test]
    fn test_wire_module() {
        let files = generate(GEOMETRY);
        let wire = file(&files, "test/wire.rs");
        assert!(wire.contains("pub const MAGIC: u32 = 0x5af30cf7;\n"));
        assert!(wire.contains("pub const CMD_HANDSHAKE: i8 = 5;\n"));
        assert!(wire.contains("pub const REPLY_GENERIC_EXCEPTION: i8 = 3;\n"));
        assert!(wire.contains("        REPLY_PACKED_EXCEPTION => Ok(Reply::PackedException(i32::unpack(input)?)),\n"));
        assert!(wire.contains(
            "        REPLY_GENERIC_EXCEPTION => {\n            let message = String::unpack(input)?;\n            let traceback = String::unpack(input)?;\n"
        ));
    }

    #[test]
    fn test_wire_module_serves_commands() {
        let files = generate(GEOMETRY);
        let wire = file(&files, "test/wire.rs");
        assert!(wire.contains(
            "pub fn process<F>(input: &mut &[u8], output: &mut Vec<u8>, invoke: F) -> Result<bool, Error>
where
    F: FnOnce(i32, &mut &[u8], &mut Vec<u8>) -> Result<(), Error>,
{
    match i8::unpack(input)? {
        CMD_INVOKE => {
            let func_id = i32::unpack(input)?;
            invoke(func_id, input, output)?;
        }
        CMD_PING => {
            let message = String::unpack(input)?;
            write_success(output)?;
            message.pack(output)?;
        }
"
        ));
        assert!(wire.contains("        CMD_INCREF | CMD_DECREF => {\n            i64::unpack(input)?;\n        }\n"));
        assert!(wire.contains("        CMD_QUIT => return Ok(false),\n"));
        assert!(wire.contains("unknown command code: {code}"));
        assert!(wire.contains("pub fn write_ping(output: &mut Vec<u8>, message: &str) -> Result<(), Error> {\n    CMD_PING.pack(output)?;\n"));
    }

    #[test]
    fn test_keywords_become_raw_identifiers() {
        let files = generate("struct Item { type: int32; match: list<string>; }");
        let module = file(&files, "test/test.rs");
        assert!(module.contains("    pub r#type: i32,\n    pub r#match: Vec<String>,\n"));
        assert!(module.contains("self.r#type.pack(writer)?;"));
    }

    #[test]
    fn test_cross_namespace_paths() {
        let docs = load_all(&[
            (
                "app.idl",
                "import \"shapes.idl\";
                 service Scene { find(name: string) -> shapes.Point throws (shapes.Missing); }",
            ),
            (
                "shapes.idl",
                "namespace shapes;
                 struct Point { x: int8; }
                 exception Missing {}",
            ),
        ]);
        let model = build(&docs).unwrap();
        let files = RustGenerator::new(GeneratorOptions::new("out"))
            .generate(&model)
            .unwrap();
        assert!(file(&files, "app/mod.rs").contains("pub mod app;\npub mod shapes;\n"));
        let app = file(&files, "app/app.rs");
        assert!(app.contains("    Missing(super::shapes::Missing),\n"));
        assert!(app.contains("pub fn find(&mut self, name: &String) -> Result<super::shapes::Point, SceneError> {"));
        assert!(app.contains("super::shapes::Missing::CLASS_ID => Err(SceneError::Missing("));
        assert!(file(&files, "app/shapes.rs").contains("pub struct Missing {\n}\n"));
        assert!(file(&files, "app/shapes.rs").contains("        Ok(Self {})\n"));
    }

    #[test]
    fn test_unrepresentable_models_are_rejected() {
        let model = build_str(
            "struct String { self: int8; }
             enum Color { DARK_RED, DarkRed }
             exception Runtime {}
             service Svc {
                 new(_x: int8) throws (Runtime);
             }",
        )
        .unwrap();
        let errors = RustGenerator::new(GeneratorOptions::new("out"))
            .generate(&model)
            .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "type name 'String' would shadow a Rust prelude type",
                "field name 'self' cannot be used as an identifier in Rust",
                "enum members 'DARK_RED' and 'DarkRed' of 'test.Color' both become variant 'DarkRed'",
                "exception 'test.Runtime' of service 'test.Svc' collides with the 'Runtime' variant of 'SvcError'",
                "function name 'new' collides with a method of the generated client",
                "parameter name '_x' is reserved for generated Rust code",
            ]
        );
        assert!(errors.iter().all(|e| e.kind == ErrorKind::CodeGen));
    }

    #[test]
    fn test_float_keys_are_rejected() {
        let model = build_str(
            "typedef Ratio = float32;
             struct S { weights: map<Ratio, int8>; tags: list<set<float64>>; }",
        )
        .unwrap();
        let errors = RustGenerator::new(GeneratorOptions::new("out"))
            .generate(&model)
            .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "map key type 'test.Ratio' in field 'weights' of 'test.S' cannot be hashed in Rust",
                "set element type 'float64' in field 'tags' of 'test.S' cannot be hashed in Rust",
            ]
        );
    }

    #[test]
    fn test_generated_names_must_not_collide() {
        let model = build_str(
            "struct SvcClient { x: int8; }
             struct H { y: int8; }
             service Svc { ping(); }",
        )
        .unwrap();
        let errors = RustGenerator::new(GeneratorOptions::new("out"))
            .generate(&model)
            .unwrap_err();
        assert_eq!(
            messages(&errors),
            vec![
                "type name 'H' is a generic parameter of generated Rust code",
                "'SvcClient' generated for service 'test.Svc' collides with struct 'test.SvcClient'",
            ]
        );
    }
}
