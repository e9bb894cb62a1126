use std::{
    collections::{BTreeMap, BTreeSet, btree_map::Entry},
    path::PathBuf,
};

use tracing::debug;

use crate::{
    ast::PrimitiveType,
    config::{GeneratorOptions, Language},
    error::IdlError,
    generators::{
        CodeGenerator, FileSet, module_collisions, namespace_location, package_dir, package_name,
        sources_of, writer::CodeWriter,
    },
    location::Location,
    model::{
        AliasDef, ConstValue, EnumDef, Field, Function, InterfaceModel, Namespace, QualifiedName,
        Service, StructDef, TypeDef, TypeRef,
    },
    wire::{self, Command, ReplyCode},
};

/// Words that cannot be used as Python identifiers.
const RESERVED_WORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Module-level names the generated modules refer to.
const GENERATED_CODE_NAMES: [&str; 7] = [
    "packers",
    "protocol",
    "object",
    "Exception",
    "NotImplementedError",
    "isinstance",
    "float",
];

/// Prefix of the names other namespaces' modules are imported under.
const IMPORT_PREFIX: &str = "_ns_";

/// The module holding protocol constants and helpers shared by the
/// generated modules.
const WIRE_MODULE: &str = "_wire";

/// Configuration settings specific to Python code generation
#[derive(Debug, Clone)]
pub struct PythonConfig {
    /// Number of spaces to use for each indentation level.
    pub indent_spaces: u8,
    /// Whether to use single quotes ('') or double quotes ("").
    pub use_double_quotes: bool,
}

impl Default for PythonConfig {
    fn default() -> Self {
        PythonConfig {
            indent_spaces: 4,
            use_double_quotes: true,
        }
    }
}

/// Generates one Python module per namespace inside a package directory.
pub struct PythonGenerator {
    options: GeneratorOptions,
    /// The configuration settings for the generated Python code.
    config: PythonConfig,
}

impl PythonGenerator {
    /// Creates a new `PythonGenerator` instance.
    ///
    /// # Arguments
    ///
    /// * `options` - Settings shared by every backend.
    /// * `config` - Optional configuration; uses default if None is provided.
    pub fn new(options: GeneratorOptions, config: Option<PythonConfig>) -> Self {
        PythonGenerator {
            options,
            config: config.unwrap_or_default(),
        }
    }

    fn module_name(&self, namespace: &str) -> String {
        self.options.file_naming.apply(namespace)
    }

    fn module_path(&self, model: &InterfaceModel, namespace: &str) -> PathBuf {
        package_dir(&self.options, model).join(format!("{}.py", self.module_name(namespace)))
    }

    fn quote_char(&self) -> char {
        if self.config.use_double_quotes { '"' } else { '\'' }
    }

    /// A Python string literal.
    fn string_literal(&self, s: &str) -> String {
        let quote = self.quote_char();
        let mut out = String::with_capacity(s.len() + 2);
        out.push(quote);
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                '\r' => out.push_str("\\r"),
                c if c == quote => {
                    out.push('\\');
                    out.push(c);
                }
                c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
                c => out.push(c),
            }
        }
        out.push(quote);
        out
    }

    fn write_docstring(&self, w: &mut CodeWriter, doc: Option<&str>) {
        let Some(doc) = doc else { return };
        let quotes = if self.config.use_double_quotes { "\"\"\"" } else { "'''" };
        let escaped = doc.replace('\\', "\\\\").replace(quotes, &format!("\\{quotes}"));
        let mut lines = escaped.lines();
        match (lines.next(), lines.next()) {
            (Some(only), None) => w.write_line(&format!("{quotes}{only}{quotes}")),
            _ => {
                let mut lines = escaped.lines();
                if let Some(first) = lines.next() {
                    w.write_line(&format!("{quotes}{first}"));
                }
                for line in lines {
                    w.write_line(line);
                }
                w.write_line(quotes);
            }
        }
    }

    /// How code in `from` refers to the class generated for `name`.
    fn class_ref(&self, from: &str, name: &QualifiedName) -> String {
        if name.namespace == from {
            name.name.clone()
        } else {
            format!(
                "{IMPORT_PREFIX}{}.{}",
                self.module_name(&name.namespace),
                name.name
            )
        }
    }

    /// The packer expression for a type, as seen from namespace `from`.
    fn packer_ref(&self, model: &InterfaceModel, from: &str, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Primitive(p) => primitive_packer(*p).to_string(),
            TypeRef::List(inner) => format!("packers.ListOf({})", self.packer_ref(model, from, inner)),
            TypeRef::Set(inner) => format!("packers.SetOf({})", self.packer_ref(model, from, inner)),
            TypeRef::Map(key, value) => format!(
                "packers.MapOf({}, {})",
                self.packer_ref(model, from, key),
                self.packer_ref(model, from, value)
            ),
            TypeRef::Named(name) => match model.type_def(name) {
                Some(TypeDef::Alias(alias)) => self.packer_ref(model, from, &alias.target),
                Some(TypeDef::Enum(_)) => primitive_packer(PrimitiveType::Int32).to_string(),
                _ => format!("{}Packer", self.class_ref(from, name)),
            },
        }
    }

    fn const_value(&self, model: &InterfaceModel, from: &str, ty: &TypeRef, value: &ConstValue) -> String {
        match value {
            ConstValue::Bool(true) => "True".to_string(),
            ConstValue::Bool(false) => "False".to_string(),
            ConstValue::Int(i) => i.to_string(),
            ConstValue::Float(f) if f.is_nan() => format!("float({})", self.string_literal("nan")),
            ConstValue::Float(f) if f.is_infinite() => {
                let inf = if *f > 0.0 { "inf" } else { "-inf" };
                format!("float({})", self.string_literal(inf))
            }
            ConstValue::Float(f) => format!("{f:?}"),
            ConstValue::String(s) => self.string_literal(s),
            ConstValue::EnumMember { member, value } => match model.underlying(ty) {
                TypeRef::Named(enum_name) if enum_name.namespace == from => {
                    format!("{}.{member}", enum_name.name)
                }
                // Another module's classes may not exist yet while this one loads.
                TypeRef::Named(enum_name) => format!("{value}  # {enum_name}.{member}"),
                _ => value.to_string(),
            },
        }
    }

    fn write_header(&self, w: &mut CodeWriter, model: &InterfaceModel, ns: &Namespace) {
        w.write_line(&format!(
            "# Generated by basalt from {}. Do not edit.",
            sources_of(model, &ns.name)
        ));
        w.write_line("from basalt_runtime import packers, protocol");
        w.blank_line();
        w.write_line(&format!("from . import {WIRE_MODULE}"));
        for other in referenced_namespaces(model, ns) {
            let module = self.module_name(other);
            w.write_line(&format!("from . import {module} as {IMPORT_PREFIX}{module}"));
        }
    }

    fn write_enum(&self, w: &mut CodeWriter, def: &EnumDef) {
        w.blank_line();
        w.blank_line();
        w.block(&format!("class {}(object):", def.name.name), |w| {
            self.write_docstring(w, def.doc.as_deref());
            for member in &def.members {
                if let Some(doc) = &member.doc {
                    w.write_prefixed("# ", doc);
                }
                w.write_line(&format!("{} = {}", member.name, member.value));
            }
            w.blank_line();
            let values: Vec<String> = def
                .members
                .iter()
                .map(|m| format!("{}: {}", self.string_literal(&m.name), m.value))
                .collect();
            let names: Vec<String> = def
                .members
                .iter()
                .map(|m| format!("{}: {}", m.value, self.string_literal(&m.name)))
                .collect();
            w.write_line(&format!("_values_ = {{{}}}", values.join(", ")));
            w.write_line(&format!("_names_ = {{{}}}", names.join(", ")));
        });
    }

    fn write_record(&self, w: &mut CodeWriter, def: &StructDef, class_id: Option<u32>) {
        let name = &def.name.name;
        let base = if class_id.is_some() {
            "protocol.PackedException"
        } else {
            "object"
        };
        let fields: Vec<&str> = def.fields.iter().map(|f| f.name.as_str()).collect();

        w.blank_line();
        w.blank_line();
        w.block(&format!("class {name}({base}):"), |w| {
            self.write_docstring(w, def.doc.as_deref());
            if let Some(class_id) = class_id {
                w.write_line(&format!("CLASS_ID = {class_id}"));
            }
            let slots: Vec<String> = fields.iter().map(|f| self.string_literal(f)).collect();
            match slots.as_slice() {
                [] => w.write_line("__slots__ = ()"),
                [one] => w.write_line(&format!("__slots__ = ({one},)")),
                many => w.write_line(&format!("__slots__ = ({})", many.join(", "))),
            }

            w.blank_line();
            let params: String = fields.iter().map(|f| format!(", {f}=None")).collect();
            w.block(&format!("def __init__(self{params}):"), |w| {
                if class_id.is_some() {
                    w.write_line("protocol.PackedException.__init__(self)");
                }
                for field in &def.fields {
                    if let Some(doc) = &field.doc {
                        w.write_prefixed("# ", doc);
                    }
                    w.write_line(&format!("self.{0} = {0}", field.name));
                }
                if def.fields.is_empty() && class_id.is_none() {
                    w.write_line("pass");
                }
            });

            w.blank_line();
            w.block("def __eq__(self, other):", |w| {
                let mut test = format!("isinstance(other, {name})");
                for field in &fields {
                    test.push_str(&format!(" and self.{field} == other.{field}"));
                }
                w.write_line(&format!("return {test}"));
            });

            w.blank_line();
            w.block("def __ne__(self, other):", |w| {
                w.write_line("return not self.__eq__(other)");
            });

            w.blank_line();
            w.block("def __repr__(self):", |w| {
                if fields.is_empty() {
                    w.write_line(&format!("return {}", self.string_literal(&format!("{name}()"))));
                } else {
                    let format: Vec<String> = fields.iter().map(|f| format!("{f}=%r")).collect();
                    let args: Vec<String> = fields.iter().map(|f| format!("self.{f}")).collect();
                    w.write_line(&format!(
                        "return {} % ({},)",
                        self.string_literal(&format!("{name}({})", format.join(", "))),
                        args.join(", ")
                    ));
                }
            });
        });
    }

    fn write_packer(&self, w: &mut CodeWriter, model: &InterfaceModel, from: &str, def: &StructDef) {
        let name = &def.name.name;
        let ordered = wire::packing_order(&def.fields);

        w.blank_line();
        w.blank_line();
        w.block(&format!("class {name}Packer(packers.Packer):"), |w| {
            w.write_line("@classmethod");
            w.block("def pack(cls, obj, stream):", |w| {
                if ordered.is_empty() {
                    w.write_line("pass");
                }
                for field in &ordered {
                    w.write_line(&format!(
                        "{}.pack(obj.{}, stream)",
                        self.packer_ref(model, from, &field.ty),
                        field.name
                    ));
                }
            });
            w.blank_line();
            w.write_line("@classmethod");
            w.block("def unpack(cls, stream):", |w| {
                w.write_line(&format!("obj = {name}()"));
                for field in &ordered {
                    w.write_line(&format!(
                        "obj.{} = {}.unpack(stream)",
                        field.name,
                        self.packer_ref(model, from, &field.ty)
                    ));
                }
                w.write_line("return obj");
            });
        });
    }

    fn write_client(&self, w: &mut CodeWriter, model: &InterfaceModel, from: &str, service: &Service) {
        let name = &service.name.name;
        w.blank_line();
        w.blank_line();
        w.block(&format!("class {name}Client(object):"), |w| {
            self.write_docstring(w, service.doc.as_deref());
            if service.doc.is_some() {
                w.blank_line();
            }
            w.block("def __init__(self, transport):", |w| {
                w.write_line("self._transport = transport");
                let exceptions = service.exceptions();
                if exceptions.is_empty() {
                    w.write_line("self._packed_exceptions = {}");
                    return;
                }
                w.block("self._packed_exceptions = {", |w| {
                    for exception in exceptions {
                        if let Some(TypeDef::Exception(def)) = model.type_def(exception) {
                            w.write_line(&format!(
                                "{}: {}Packer,",
                                def.class_id,
                                self.class_ref(from, exception)
                            ));
                        }
                    }
                });
                w.write_line("}");
            });

            for function in &service.functions {
                w.blank_line();
                w.block(&format!("def {}(self{}):", function.name, param_list(function)), |w| {
                    self.write_docstring(w, function.doc.as_deref());
                    w.write_line("_stream = self._transport.begin_call()");
                    w.write_line(&format!(
                        "{WIRE_MODULE}.write_invoke(_stream, {})",
                        function.id
                    ));
                    for param in &function.params {
                        w.write_line(&format!(
                            "{}.pack({}, _stream)",
                            self.packer_ref(model, from, &param.ty),
                            param.name
                        ));
                    }
                    w.write_line("_reply = self._transport.end_call(_stream)");
                    w.write_line(&format!(
                        "return {WIRE_MODULE}.read_reply(_reply, {}, self._packed_exceptions)",
                        self.result_packer(model, from, function)
                    ));
                });
            }
        });
    }

    fn result_packer(&self, model: &InterfaceModel, from: &str, function: &Function) -> String {
        match &function.returns {
            Some(ty) => self.packer_ref(model, from, ty),
            None => "None".to_string(),
        }
    }

    fn write_server(&self, w: &mut CodeWriter, model: &InterfaceModel, from: &str, service: &Service) {
        let name = &service.name.name;

        w.blank_line();
        w.blank_line();
        w.block(&format!("class {name}Handler(object):"), |w| {
            self.write_docstring(w, Some(&format!("Implement this to serve {name}.")));
            for function in &service.functions {
                w.blank_line();
                w.block(&format!("def {}(self{}):", function.name, param_list(function)), |w| {
                    self.write_docstring(w, function.doc.as_deref());
                    w.write_line("raise NotImplementedError()");
                });
            }
        });

        w.blank_line();
        w.blank_line();
        w.block(&format!("class {name}Processor(object):"), |w| {
            self.write_docstring(
                w,
                Some(&format!("Dispatches {name} invocations to a {name}Handler.")),
            );
            w.blank_line();
            w.block("def __init__(self, handler):", |w| {
                w.write_line("self._handler = handler");
                w.block("self._functions = {", |w| {
                    for function in &service.functions {
                        w.write_line(&format!("{}: self._invoke_{},", function.id, function.name));
                    }
                });
                w.write_line("}");
            });

            w.blank_line();
            w.block("def process(self, func_id, instream, outstream):", |w| {
                w.write_line("invoke = self._functions.get(func_id)");
                w.block("if invoke is None:", |w| {
                    w.write_line(&format!(
                        "{WIRE_MODULE}.write_protocol_error(outstream, {} % (func_id,))",
                        self.string_literal("unknown function id %d")
                    ));
                });
                w.block("else:", |w| w.write_line("invoke(instream, outstream)"));
            });

            w.blank_line();
            w.block("def handle(self, instream, outstream):", |w| {
                self.write_docstring(w, Some("Serves one command; returns False once the peer has quit."));
                w.write_line(&format!(
                    "return {WIRE_MODULE}.process_command(self, instream, outstream)"
                ));
            });

            for function in &service.functions {
                w.blank_line();
                w.block(
                    &format!("def _invoke_{}(self, _instream, _outstream):", function.name),
                    |w| self.write_invoke_body(w, model, from, function),
                );
            }
        });
    }

    fn write_invoke_body(&self, w: &mut CodeWriter, model: &InterfaceModel, from: &str, function: &Function) {
        for param in &function.params {
            w.write_line(&format!(
                "{} = {}.unpack(_instream)",
                param.name,
                self.packer_ref(model, from, &param.ty)
            ));
        }
        let args: Vec<&str> = function.params.iter().map(|p| p.name.as_str()).collect();
        w.block("try:", |w| {
            w.write_line(&format!(
                "_result = self._handler.{}({})",
                function.name,
                args.join(", ")
            ));
        });
        for exception in &function.throws {
            let class = self.class_ref(from, exception);
            w.block(&format!("except {class} as _ex:"), |w| {
                w.write_line(&format!(
                    "{WIRE_MODULE}.write_packed_exception(_outstream, {class}.CLASS_ID, {class}Packer, _ex)"
                ));
                w.write_line("return");
            });
        }
        w.block("except Exception as _ex:", |w| {
            w.write_line(&format!("{WIRE_MODULE}.write_generic_exception(_outstream, _ex)"));
            w.write_line("return");
        });
        w.write_line(&format!(
            "{WIRE_MODULE}.write_success(_outstream, {}, _result)",
            self.result_packer(model, from, function)
        ));
    }

    /// The protocol constants and helpers every generated module shares.
    fn write_wire_module(&self, w: &mut CodeWriter) {
        w.write_line("# Generated by basalt. Do not edit.");
        w.write_line("import traceback");
        w.blank_line();
        w.write_line("from basalt_runtime import packers, protocol");
        w.blank_line();
        w.write_line(&format!("MAGIC = {:#x}", wire::MAGIC));
        for command in Command::ALL {
            w.write_line(&format!("{} = {}", command.constant(), command.code()));
        }
        for code in ReplyCode::ALL {
            w.write_line(&format!("{} = {}", code.constant(), code.code()));
        }

        let s = |text: &str| self.string_literal(text);
        w.blank_line();
        w.blank_line();
        w.block("def write_invoke(stream, func_id):", |w| {
            w.write_line(&format!("packers.Int8.pack({}, stream)", Command::Invoke.constant()));
            w.write_line("packers.Int32.pack(func_id, stream)");
        });
        w.blank_line();
        w.blank_line();
        w.block("def read_reply(stream, packer, packed_exceptions):", |w| {
            w.write_line("code = packers.Int8.unpack(stream)");
            w.block(&format!("if code == {}:", ReplyCode::Success), |w| {
                w.write_line("return packer.unpack(stream) if packer is not None else None");
            });
            w.block(&format!("if code == {}:", ReplyCode::PackedException), |w| {
                w.write_line("class_id = packers.Int32.unpack(stream)");
                w.write_line("exception_packer = packed_exceptions.get(class_id)");
                w.block("if exception_packer is None:", |w| {
                    w.write_line(&format!(
                        "raise protocol.ProtocolError({} % (class_id,))",
                        s("unknown exception class id %d")
                    ));
                });
                w.write_line("raise exception_packer.unpack(stream)");
            });
            w.block(&format!("if code == {}:", ReplyCode::GenericException), |w| {
                w.write_line("message = packers.Str.unpack(stream)");
                w.write_line("remote_traceback = packers.Str.unpack(stream)");
                w.write_line("raise protocol.GenericException(message, remote_traceback)");
            });
            w.block(&format!("if code == {}:", ReplyCode::ProtocolError), |w| {
                w.write_line("raise protocol.ProtocolError(packers.Str.unpack(stream))");
            });
            w.write_line(&format!(
                "raise protocol.ProtocolError({} % (code,))",
                s("invalid reply code %d")
            ));
        });
        w.blank_line();
        w.blank_line();
        w.block("def write_success(stream, packer, value):", |w| {
            w.write_line(&format!("packers.Int8.pack({}, stream)", ReplyCode::Success));
            w.block("if packer is not None:", |w| w.write_line("packer.pack(value, stream)"));
        });
        w.blank_line();
        w.blank_line();
        w.block("def write_packed_exception(stream, class_id, packer, exception):", |w| {
            w.write_line(&format!("packers.Int8.pack({}, stream)", ReplyCode::PackedException));
            w.write_line("packers.Int32.pack(class_id, stream)");
            w.write_line("packer.pack(exception, stream)");
        });
        w.blank_line();
        w.blank_line();
        w.block("def write_generic_exception(stream, exception):", |w| {
            w.write_line(&format!("packers.Int8.pack({}, stream)", ReplyCode::GenericException));
            w.write_line("packers.Str.pack(str(exception), stream)");
            w.write_line("packers.Str.pack(traceback.format_exc(), stream)");
        });
        w.blank_line();
        w.blank_line();
        w.block("def write_protocol_error(stream, message):", |w| {
            w.write_line(&format!("packers.Int8.pack({}, stream)", ReplyCode::ProtocolError));
            w.write_line("packers.Str.pack(message, stream)");
        });
        w.blank_line();
        w.blank_line();
        w.block("def ping(transport, message):", |w| {
            w.write_line("stream = transport.begin_call()");
            w.write_line(&format!("packers.Int8.pack({}, stream)", Command::Ping.constant()));
            w.write_line("packers.Str.pack(message, stream)");
            w.write_line("return read_reply(transport.end_call(stream), packers.Str, {})");
        });
        w.blank_line();
        w.blank_line();
        w.block("def process_command(processor, instream, outstream):", |w| {
            w.write_line("command = packers.Int8.unpack(instream)");
            w.block(&format!("if command == {}:", Command::Invoke.constant()), |w| {
                w.write_line("processor.process(packers.Int32.unpack(instream), instream, outstream)");
            });
            w.block(&format!("elif command == {}:", Command::Ping.constant()), |w| {
                w.write_line("message = packers.Str.unpack(instream)");
                w.write_line(&format!("packers.Int8.pack({}, outstream)", ReplyCode::Success));
                w.write_line("packers.Str.pack(message, outstream)");
            });
            w.block(
                &format!(
                    "elif command == {} or command == {}:",
                    Command::Incref.constant(),
                    Command::Decref.constant()
                ),
                |w| {
                    w.write_line("# No objects are registered by reference, so there is nothing to count.");
                    w.write_line("packers.Int64.unpack(instream)");
                },
            );
            w.block(&format!("elif command == {}:", Command::Quit.constant()), |w| {
                w.write_line("return False");
            });
            w.block("else:", |w| {
                w.write_line(&format!(
                    "write_protocol_error(outstream, {} % (command,))",
                    s("unknown command code: %d")
                ));
            });
            w.write_line("return True");
        });
    }
}

fn primitive_packer(p: PrimitiveType) -> &'static str {
    match p {
        PrimitiveType::Bool => "packers.Bool",
        PrimitiveType::Int8 => "packers.Int8",
        PrimitiveType::Int16 => "packers.Int16",
        PrimitiveType::Int32 => "packers.Int32",
        PrimitiveType::Int64 => "packers.Int64",
        PrimitiveType::Float32 => "packers.Float32",
        PrimitiveType::Float64 => "packers.Float64",
        PrimitiveType::String => "packers.Str",
        PrimitiveType::Buffer => "packers.Buffer",
        PrimitiveType::Date => "packers.Date",
    }
}

fn param_list(function: &Function) -> String {
    function.params.iter().map(|p| format!(", {}", p.name)).collect()
}

/// Namespaces whose classes the module of `ns` uses. Only function bodies
/// refer to them, so import cycles between modules are harmless.
fn referenced_namespaces<'m>(model: &'m InterfaceModel, ns: &'m Namespace) -> BTreeSet<&'m str> {
    let mut used = BTreeSet::new();
    for def in ns.types_in_order() {
        for field in def.fields().unwrap_or_default() {
            packed_namespaces(model, &field.ty, &mut used);
        }
    }
    for function in ns.services.iter().flat_map(|s| &s.functions) {
        for param in &function.params {
            packed_namespaces(model, &param.ty, &mut used);
        }
        if let Some(returns) = &function.returns {
            packed_namespaces(model, returns, &mut used);
        }
        used.extend(function.throws.iter().map(|e| e.namespace.as_str()));
    }
    used.remove(ns.name.as_str());
    used
}

/// Namespaces of the packer classes that pack `ty`.
fn packed_namespaces<'m>(model: &'m InterfaceModel, ty: &'m TypeRef, used: &mut BTreeSet<&'m str>) {
    match ty {
        TypeRef::Primitive(_) => {}
        TypeRef::List(inner) | TypeRef::Set(inner) => packed_namespaces(model, inner, used),
        TypeRef::Map(key, value) => {
            packed_namespaces(model, key, used);
            packed_namespaces(model, value, used);
        }
        TypeRef::Named(name) => match model.type_def(name) {
            Some(TypeDef::Alias(alias)) => packed_namespaces(model, &alias.target, used),
            Some(TypeDef::Enum(_)) => {}
            _ => {
                used.insert(name.namespace.as_str());
            }
        },
    }
}

fn reserved(name: &str, location: &Location, what: &str) -> Option<IdlError> {
    RESERVED_WORDS.contains(&name).then(|| {
        IdlError::codegen(
            location.clone(),
            format!("{what} '{name}' is a reserved word in Python"),
        )
    })
}

fn shadows_generated(name: &str, location: &Location, what: &str) -> Option<IdlError> {
    let shadows = GENERATED_CODE_NAMES.contains(&name)
        || name == WIRE_MODULE
        || name.starts_with(IMPORT_PREFIX);
    shadows.then(|| {
        IdlError::codegen(
            location.clone(),
            format!("{what} '{name}' would shadow a name used by generated Python code"),
        )
    })
}

fn reserved_for_generated(location: &Location, what: &str, name: &str) -> IdlError {
    IdlError::codegen(
        location.clone(),
        format!("{what} '{name}' is reserved for generated Python code"),
    )
}

/// `exception` adds the names an exception class defines besides its fields.
fn check_fields(errors: &mut Vec<IdlError>, fields: &[Field], exception: bool) {
    for field in fields {
        errors.extend(reserved(&field.name, &field.location, "field name"));
        if field.name == "self" || (exception && field.name == "CLASS_ID") {
            errors.push(reserved_for_generated(&field.location, "field name", &field.name));
        }
    }
}

/// Rejects generated classes that would rebind a name already bound at
/// module level, like `PointPacker` for `struct Point` next to a
/// `struct PointPacker`.
fn check_bindings(errors: &mut Vec<IdlError>, ns: &Namespace) {
    let mut declared: Vec<(String, String)> = ns
        .types_in_order()
        .map(|def| (def.name().name.clone(), format!("{} '{}'", def.kind(), def.name())))
        .collect();
    declared.extend(
        ns.consts
            .iter()
            .map(|c| (c.name.name.clone(), format!("constant '{}'", c.name))),
    );

    let mut generated: Vec<(String, String, &Location)> = Vec::new();
    for def in ns.types_in_order() {
        if !matches!(def, TypeDef::Alias(_)) {
            generated.push((
                format!("{}Packer", def.name().name),
                format!("{} '{}'", def.kind(), def.name()),
                def.location(),
            ));
        }
    }
    for service in &ns.services {
        for suffix in ["Client", "Handler", "Processor"] {
            generated.push((
                format!("{}{suffix}", service.name.name),
                format!("service '{}'", service.name),
                &service.location,
            ));
        }
    }

    let mut bound: BTreeMap<String, String> = declared.into_iter().collect();
    for (name, source, location) in generated {
        match bound.entry(name) {
            Entry::Vacant(entry) => {
                entry.insert(format!("the class generated for {source}"));
            }
            Entry::Occupied(entry) => errors.push(IdlError::codegen(
                location.clone(),
                format!(
                    "'{}' generated for {source} collides with {}",
                    entry.key(),
                    entry.get()
                ),
            )),
        }
    }
}

impl CodeGenerator for PythonGenerator {
    fn language(&self) -> Language {
        Language::Python
    }

    fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    fn indent_spaces(&self) -> u8 {
        self.config.indent_spaces
    }

    fn check_model(&self, model: &InterfaceModel) -> Vec<IdlError> {
        let mut errors = module_collisions(model, Language::Python, |ns| self.module_name(ns));
        for ns in model.namespaces.values() {
            let module = self.module_name(&ns.name);
            if RESERVED_WORDS.contains(&module.as_str()) || module == WIRE_MODULE {
                errors.push(IdlError::codegen(
                    namespace_location(ns),
                    format!("namespace '{}' cannot be a Python module named '{module}'", ns.name),
                ));
            }

            for def in ns.types_in_order() {
                let name = &def.name().name;
                errors.extend(reserved(name, def.location(), "type name"));
                errors.extend(shadows_generated(name, def.location(), "type name"));
                match def {
                    TypeDef::Enum(e) => errors.extend(
                        e.members
                            .iter()
                            .filter_map(|m| reserved(&m.name, &m.location, "enum member")),
                    ),
                    TypeDef::Struct(s) => check_fields(&mut errors, &s.fields, false),
                    TypeDef::Exception(e) => check_fields(&mut errors, &e.record.fields, true),
                    TypeDef::Alias(_) => {}
                }
            }
            for constant in &ns.consts {
                let name = &constant.name.name;
                errors.extend(reserved(name, &constant.location, "constant name"));
                errors.extend(shadows_generated(name, &constant.location, "constant name"));
            }
            for service in &ns.services {
                errors.extend(reserved(&service.name.name, &service.location, "service name"));
                for function in &service.functions {
                    errors.extend(reserved(&function.name, &function.location, "function name"));
                    if function.name.starts_with('_') {
                        errors.push(reserved_for_generated(
                            &function.location,
                            "function name",
                            &function.name,
                        ));
                    }
                    for param in &function.params {
                        errors.extend(reserved(&param.name, &param.location, "parameter name"));
                        if param.name.starts_with('_') || param.name == "self" {
                            errors.push(reserved_for_generated(
                                &param.location,
                                "parameter name",
                                &param.name,
                            ));
                        }
                    }
                }
            }
            check_bindings(&mut errors, ns);
        }
        errors
    }

    fn emit_types(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        let package = package_name(&self.options, model);
        let init = out.writer(package_dir(&self.options, model).join("__init__.py"));
        init.write_line(&self.string_literal(&format!("Bindings generated by basalt for {package}.")));
        init.blank_line();
        let modules: Vec<String> = model
            .namespaces
            .keys()
            .map(|ns| self.string_literal(&self.module_name(ns)))
            .collect();
        init.write_line(&format!("__all__ = [{}]", modules.join(", ")));

        for ns in model.namespaces.values() {
            debug!(namespace = %ns.name, "emitting python types");
            let w = out.writer(self.module_path(model, &ns.name));
            self.write_header(w, model, ns);

            for def in ns.types_in_order() {
                match def {
                    TypeDef::Enum(e) => self.write_enum(w, e),
                    TypeDef::Struct(s) => self.write_record(w, s, None),
                    TypeDef::Exception(e) => self.write_record(w, &e.record, Some(e.class_id)),
                    TypeDef::Alias(_) => {}
                }
            }
            // Aliases bind names at import time, so they follow every class.
            for def in ns.types_in_order() {
                if let TypeDef::Alias(alias) = def {
                    self.write_alias(w, model, &ns.name, alias);
                }
            }

            if !ns.consts.is_empty() {
                w.blank_line();
            }
            for constant in &ns.consts {
                self.write_docstring_comment(w, constant.doc.as_deref());
                w.write_line(&format!(
                    "{} = {}",
                    constant.name.name,
                    self.const_value(model, &ns.name, &constant.ty, &constant.value)
                ));
            }
        }
        Ok(())
    }

    fn emit_serializer(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        let wire_path = package_dir(&self.options, model).join(format!("{WIRE_MODULE}.py"));
        self.write_wire_module(out.writer(wire_path));

        for ns in model.namespaces.values() {
            let w = out.writer(self.module_path(model, &ns.name));
            for def in ns.types_in_order() {
                match def {
                    TypeDef::Struct(s) => self.write_packer(w, model, &ns.name, s),
                    TypeDef::Exception(e) => self.write_packer(w, model, &ns.name, &e.record),
                    TypeDef::Enum(e) => {
                        w.blank_line();
                        w.write_line(&format!(
                            "{}Packer = {}",
                            e.name.name,
                            primitive_packer(PrimitiveType::Int32)
                        ));
                    }
                    TypeDef::Alias(_) => {}
                }
            }
        }
        Ok(())
    }

    fn emit_client(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        for ns in model.namespaces.values() {
            let w = out.writer(self.module_path(model, &ns.name));
            for service in &ns.services {
                self.write_client(w, model, &ns.name, service);
            }
        }
        Ok(())
    }

    fn emit_server(&self, model: &InterfaceModel, out: &mut FileSet) -> Result<(), Vec<IdlError>> {
        for ns in model.namespaces.values() {
            let w = out.writer(self.module_path(model, &ns.name));
            for service in &ns.services {
                self.write_server(w, model, &ns.name, service);
            }
        }
        Ok(())
    }
}

impl PythonGenerator {
    fn write_alias(&self, w: &mut CodeWriter, model: &InterfaceModel, from: &str, alias: &AliasDef) {
        w.blank_line();
        self.write_docstring_comment(w, alias.doc.as_deref());
        match model.resolve(&alias.target) {
            Some(target) if target.name().namespace == from => {
                w.write_line(&format!("{} = {}", alias.name.name, target.name().name))
            }
            _ => w.write_line(&format!("# typedef {} = {}", alias.name.name, alias.target)),
        }
    }

    fn write_docstring_comment(&self, w: &mut CodeWriter, doc: Option<&str>) {
        if let Some(doc) = doc {
            w.write_prefixed("# ", doc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::tests::{build_str, load_all},
        error::ErrorKind,
        generators::GeneratedFile,
    };

    const GEOMETRY: &str = "
/// A point on the plane.
struct Point { y: int32 (id=2); x: int32 (id=1); }
exception TooFar { limit: float64; }
enum Color { RED, GREEN = 4 }
typedef Spot = Point;
typedef Points = list<Point>;
const DEFAULT_COLOR: Color = Color.GREEN;
const GREETING: string = \"it's \\\"here\\\"\";
service Geometry {
    /// Straight-line distance.
    distance(a: Point, b: Point) -> float64 throws (TooFar);
    centroid(points: Points) -> Point (id=5);
    reset();
}
";

    fn generate(text: &str) -> Vec<GeneratedFile> {
        let model = build_str(text).unwrap();
        PythonGenerator::new(GeneratorOptions::new("out"), None)
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

    #[test]
    fn test_layout() {
        let files = generate(GEOMETRY);
        let paths: Vec<String> = files.iter().map(|f| f.path.display().to_string()).collect();
        assert_eq!(paths, vec!["test/__init__.py", "test/_wire.py", "test/test.py"]);
        assert_eq!(
            file(&files, "test/__init__.py"),
            "\"Bindings generated by basalt for test.\"\n\n__all__ = [\"test\"]\n"
        );
    }

    #[test]
    fn test_types() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.py");
        assert!(module.starts_with(
            "# Generated by basalt from test.idl. Do not edit.\nfrom basalt_runtime import packers, protocol\n\nfrom . import _wire\n"
        ));
        assert!(module.contains(
            "class Point(object):\n    \"\"\"A point on the plane.\"\"\"\n    __slots__ = (\"y\", \"x\")\n"
        ));
        assert!(module.contains("    def __init__(self, y=None, x=None):\n        self.y = y\n        self.x = x\n"));
        assert!(module.contains("class TooFar(protocol.PackedException):\n    CLASS_ID = 1\n    __slots__ = (\"limit\",)\n"));
        assert!(module.contains("class Color(object):\n    RED = 0\n    GREEN = 4\n"));
        assert!(module.contains("    _names_ = {0: \"RED\", 4: \"GREEN\"}\n"));
        assert!(module.contains("\nSpot = Point\n"));
        assert!(module.contains("\n# typedef Points = list<test.Point>\n"));
        assert!(module.contains("\nDEFAULT_COLOR = Color.GREEN\n"));
        assert!(module.contains("\nGREETING = \"it's \\\"here\\\"\"\n"));
    }

    #[test]
    fn test_packers_follow_field_ids() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.py");
        assert!(module.contains(
            "    def pack(cls, obj, stream):\n        packers.Int32.pack(obj.x, stream)\n        packers.Int32.pack(obj.y, stream)\n"
        ));
        assert!(module.contains(
            "        obj = Point()\n        obj.x = packers.Int32.unpack(stream)\n        obj.y = packers.Int32.unpack(stream)\n        return obj\n"
        ));
        assert!(module.contains("ColorPacker = packers.Int32\n"));
    }

    #[test]
    fn test_client() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.py");
        assert!(module.contains(
            "class GeometryClient(object):\n    def __init__(self, transport):\n        self._transport = transport\n        self._packed_exceptions = {\n            1: TooFarPacker,\n        }\n"
        ));
        assert!(module.contains(
            "    def distance(self, a, b):
        \"\"\"Straight-line distance.\"\"\"
        _stream = self._transport.begin_call()
        _wire.write_invoke(_stream, 1)
        PointPacker.pack(a, _stream)
        PointPacker.pack(b, _stream)
        _reply = self._transport.end_call(_stream)
        return _wire.read_reply(_reply, packers.Float64, self._packed_exceptions)
"
        ));
        assert!(module.contains("packers.ListOf(PointPacker).pack(points, _stream)"));
        assert!(module.contains("_wire.write_invoke(_stream, 6)\n        _reply = self._transport.end_call(_stream)\n        return _wire.read_reply(_reply, None, self._packed_exceptions)\n"));
    }

    #[test]
    fn test_server() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.py");
        assert!(module.contains("class GeometryHandler(object):"));
        assert!(module.contains("            1: self._invoke_distance,\n            5: self._invoke_centroid,\n            6: self._invoke_reset,\n"));
        assert!(module.contains(
            "    def _invoke_distance(self, _instream, _outstream):
        a = PointPacker.unpack(_instream)
        b = PointPacker.unpack(_instream)
        try:
            _result = self._handler.distance(a, b)
        except TooFar as _ex:
            _wire.write_packed_exception(_outstream, TooFar.CLASS_ID, TooFarPacker, _ex)
            return
        except Exception as _ex:
            _wire.write_generic_exception(_outstream, _ex)
            return
        _wire.write_success(_outstream, packers.Float64, _result)
"
        ));
    }

    #[test]
    fn test_wire_module() {
        let files = generate(GEOMETRY);
        let wire = file(&files, "test/_wire.py");
        assert!(wire.contains("MAGIC = 0x5af30cf7\n"));
        assert!(wire.contains("CMD_INVOKE = 1\n"));
        assert!(wire.contains("REPLY_PACKED_EXCEPTION = 2\n"));
        assert!(wire.contains("    if code == REPLY_PACKED_EXCEPTION:\n        class_id = packers.Int32.unpack(stream)\n"));
        assert!(wire.contains(
            "    if code == REPLY_GENERIC_EXCEPTION:
        message = packers.Str.unpack(stream)
        remote_traceback = packers.Str.unpack(stream)
        raise protocol.GenericException(message, remote_traceback)
"
        ));
        assert!(wire.contains(
            "    packers.Int8.pack(REPLY_GENERIC_EXCEPTION, stream)
    packers.Str.pack(str(exception), stream)
    packers.Str.pack(traceback.format_exc(), stream)
"
        ));
        assert!(wire.starts_with("# Generated by basalt. Do not edit.\nimport traceback\n"));
    }

    #[test]
    fn test_processor_serves_commands() {
        let files = generate(GEOMETRY);
        let module = file(&files, "test/test.py");
        assert!(module.contains(
            "    def handle(self, instream, outstream):
        \"\"\"Serves one command; returns False once the peer has quit.\"\"\"
        return _wire.process_command(self, instream, outstream)
"
        ));
        let wire = file(&files, "test/_wire.py");
        assert!(wire.contains(
            "def process_command(processor, instream, outstream):
    command = packers.Int8.unpack(instream)
    if command == CMD_INVOKE:
        processor.process(packers.Int32.unpack(instream), instream, outstream)
    elif command == CMD_PING:
        message = packers.Str.unpack(instream)
        packers.Int8.pack(REPLY_SUCCESS, outstream)
        packers.Str.pack(message, outstream)
    elif command == CMD_INCREF or command == CMD_DECREF:
"
        ));
        assert!(wire.contains(
            "    elif command == CMD_QUIT:
        return False
    else:
        write_protocol_error(outstream, \"unknown command code: %d\" % (command,))
    return True
"
        ));
        assert!(wire.contains("def ping(transport, message):\n    stream = transport.begin_call()\n    packers.Int8.pack(CMD_PING, stream)\n"));
    }

    #[test]
    fn test_cross_namespace_references() {
        let docs = load_all(&[
            ("app.idl", "import \"shapes.idl\";\nstruct Scene { origin: shapes.Point; }"),
            ("shapes.idl", "namespace shapes;\nstruct Point { x: int8; }"),
        ]);
        let model = crate::builder::build(&docs).unwrap();
        let files = PythonGenerator::new(GeneratorOptions::new("out").with_package("scenes"), None)
            .generate(&model)
            .unwrap();
        let app = file(&files, "scenes/app.py");
        assert!(app.contains("from . import shapes as _ns_shapes\n"));
        assert!(app.contains("_ns_shapes.PointPacker.pack(obj.origin, stream)"));
    }

    #[test]
    fn test_module_load_does_not_touch_other_modules() {
        let docs = load_all(&[
            (
                "app.idl",
                "import \"shapes.idl\";
                 import \"units.idl\";
                 typedef Spot = shapes.Point;
                 const UNIT: units.Unit = units.Unit.METRE;
                 service Scene { find(name: string) -> Spot throws (shapes.Missing); }",
            ),
            (
                "shapes.idl",
                "namespace shapes;
                 struct Point { x: int8; }
                 exception Missing {}",
            ),
            ("units.idl", "namespace units;\nenum Unit { MILLIMETRE, METRE = 1000 }"),
        ]);
        let model = crate::builder::build(&docs).unwrap();
        let files = PythonGenerator::new(GeneratorOptions::new("out"), None)
            .generate(&model)
            .unwrap();
        let app = file(&files, "app/app.py");
        assert!(app.contains("from . import _wire\nfrom . import shapes as _ns_shapes\n\n"));
        assert!(!app.contains("_ns_units"));
        assert!(app.contains("\n# typedef Spot = shapes.Point\n"));
        assert!(app.contains("\nUNIT = 1000  # units.Unit.METRE\n"));
        assert!(app.contains("        self._packed_exceptions = {\n            1: _ns_shapes.MissingPacker,\n"));
        assert!(app.contains("return _wire.read_reply(_reply, _ns_shapes.PointPacker, self._packed_exceptions)"));
    }

    #[test]
    fn test_names_generated_code_needs_are_rejected() {
        let model = build_str(
            "struct P { self: int32; }
             exception Oops { CLASS_ID: int32; }
             struct Point { x: int8; }
             struct PointPacker { y: int8; }
             struct protocol {}
             const _ns_app: int8 = 1;
             service Svc { _hidden(); }
             struct SvcProcessor {}",
        )
        .unwrap();
        let errors = PythonGenerator::new(GeneratorOptions::new("out"), None)
            .generate(&model)
            .unwrap_err();
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "field name 'self' is reserved for generated Python code",
                "field name 'CLASS_ID' is reserved for generated Python code",
                "type name 'protocol' would shadow a name used by generated Python code",
                "constant name '_ns_app' would shadow a name used by generated Python code",
                "function name '_hidden' is reserved for generated Python code",
                "'PointPacker' generated for struct 'test.Point' collides with struct 'test.PointPacker'",
                "'SvcProcessor' generated for service 'test.Svc' collides with struct 'test.SvcProcessor'",
            ]
        );
        assert!(errors.iter().all(|e| e.kind == ErrorKind::CodeGen));
        assert_eq!(errors[0].location.line, 1);
        assert_eq!(errors[5].location.line, 3);
    }

    #[test]
    fn test_reserved_words_are_rejected() {
        let model = build_str(
            "struct lambda { pass: int32; }
             service S { f(_x: int8, self: int8); }",
        )
        .unwrap();
        let errors = PythonGenerator::new(GeneratorOptions::new("out"), None)
            .generate(&model)
            .unwrap_err();
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "type name 'lambda' is a reserved word in Python",
                "field name 'pass' is a reserved word in Python",
                "parameter name '_x' is reserved for generated Python code",
                "parameter name 'self' is reserved for generated Python code",
            ]
        );
        assert!(errors.iter().all(|e| e.kind == ErrorKind::CodeGen));
        assert_eq!(errors[1].location.line, 1);
    }

    #[test]
    fn test_single_quotes() {
        let model = build_str("const NAME: string = \"it's\";").unwrap();
        let config = PythonConfig {
            indent_spaces: 2,
            use_double_quotes: false,
        };
        let files = PythonGenerator::new(GeneratorOptions::new("out"), Some(config))
            .generate(&model)
            .unwrap();
        assert!(file(&files, "test/test.py").contains("NAME = 'it\\'s'\n"));
    }
}
