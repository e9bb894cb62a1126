//! Prints an [`InterfaceModel`] back as IDL source.
//!
//! Every namespace becomes one document named `<namespace>.idl` that imports
//! the documents of the namespaces it refers to. Wire ids are always written
//! out explicitly, so parsing the output again yields the same model shape.

use std::collections::BTreeMap;

use crate::{
    generators::writer::CodeWriter,
    model::{ConstValue, Field, InterfaceModel, Namespace, QualifiedName, TypeDef, TypeRef},
};

/// Prints every namespace of the model, keyed by document name.
pub fn print_model(model: &InterfaceModel) -> BTreeMap<String, String> {
    model
        .namespaces
        .values()
        .map(|ns| (document_name(&ns.name), print_namespace(model, ns)))
        .collect()
}

pub fn document_name(namespace: &str) -> String {
    format!("{namespace}.idl")
}

pub fn print_namespace(model: &InterfaceModel, ns: &Namespace) -> String {
    let printer = Printer {
        model,
        namespace: &ns.name,
    };
    let mut w = CodeWriter::new(4);

    w.write_line(&format!("namespace {};", ns.name));
    for import in &ns.imports {
        w.write_line(&format!("import \"{}\";", document_name(import)));
    }

    for def in ns.types_in_order() {
        w.blank_line();
        printer.write_type(&mut w, def);
    }

    for service in &ns.services {
        w.blank_line();
        write_doc(&mut w, service.doc.as_deref());
        w.block(&format!("service {} {{", service.name.name), |w| {
            for function in &service.functions {
                write_doc(w, function.doc.as_deref());
                let params: Vec<String> = function
                    .params
                    .iter()
                    .map(|p| format!("{}: {}", p.name, printer.type_name(&p.ty)))
                    .collect();
                let mut line = format!("{}({})", function.name, params.join(", "));
                if let Some(returns) = &function.returns {
                    line.push_str(&format!(" -> {}", printer.type_name(returns)));
                }
                if !function.throws.is_empty() {
                    let throws: Vec<String> =
                        function.throws.iter().map(|n| printer.name(n)).collect();
                    line.push_str(&format!(" throws ({})", throws.join(", ")));
                }
                line.push_str(&format!(" (id={});", function.id));
                w.write_line(&line);
            }
        });
        w.write_line("}");
    }

    if !ns.consts.is_empty() {
        w.blank_line();
    }
    for constant in &ns.consts {
        write_doc(&mut w, constant.doc.as_deref());
        let value = match &constant.value {
            ConstValue::Bool(b) => b.to_string(),
            ConstValue::Int(i) => i.to_string(),
            ConstValue::Float(f) => format!("{f:?}"),
            ConstValue::String(s) => quote(s),
            ConstValue::EnumMember { member, .. } => match model.underlying(&constant.ty) {
                TypeRef::Named(enum_name) => format!("{}.{member}", printer.name(enum_name)),
                _ => member.clone(),
            },
        };
        w.write_line(&format!(
            "const {}: {} = {value};",
            constant.name.name,
            printer.type_name(&constant.ty)
        ));
    }

    w.finish()
}

struct Printer<'m> {
    model: &'m InterfaceModel,
    namespace: &'m str,
}

impl Printer<'_> {
    fn write_type(&self, w: &mut CodeWriter, def: &TypeDef) {
        write_doc(w, def.doc());
        match def {
            TypeDef::Enum(e) => {
                w.block(&format!("enum {} {{", e.name.name), |w| {
                    for member in &e.members {
                        write_doc(w, member.doc.as_deref());
                        w.write_line(&format!("{} = {},", member.name, member.value));
                    }
                });
                w.write_line("}");
            }
            TypeDef::Struct(s) => self.write_record(w, "struct", &s.name, &s.fields),
            TypeDef::Exception(e) => {
                self.write_record(w, "exception", &e.record.name, &e.record.fields)
            }
            TypeDef::Alias(a) => {
                w.write_line(&format!(
                    "typedef {} = {};",
                    a.name.name,
                    self.type_name(&a.target)
                ));
            }
        }
    }

    fn write_record(&self, w: &mut CodeWriter, keyword: &str, name: &QualifiedName, fields: &[Field]) {
        w.block(&format!("{keyword} {} {{", name.name), |w| {
            for field in fields {
                write_doc(w, field.doc.as_deref());
                w.write_line(&format!(
                    "{}: {} (id={});",
                    field.name,
                    self.type_name(&field.ty),
                    field.id
                ));
            }
        });
        w.write_line("}");
    }

    fn type_name(&self, ty: &TypeRef) -> String {
        match ty {
            TypeRef::Primitive(p) => p.to_string(),
            TypeRef::List(inner) => format!("list<{}>", self.type_name(inner)),
            TypeRef::Set(inner) => format!("set<{}>", self.type_name(inner)),
            TypeRef::Map(key, value) => {
                format!("map<{}, {}>", self.type_name(key), self.type_name(value))
            }
            TypeRef::Named(name) => self.name(name),
        }
    }

    /// Names from the printed namespace are written bare, others qualified.
    fn name(&self, name: &QualifiedName) -> String {
        if name.namespace == self.namespace && self.model.type_def(name).is_some() {
            name.name.clone()
        } else {
            name.to_string()
        }
    }
}

fn write_doc(w: &mut CodeWriter, doc: Option<&str>) {
    if let Some(doc) = doc {
        w.write_prefixed("/// ", doc);
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
