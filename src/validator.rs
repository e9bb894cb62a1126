//! Semantic checks over a built [`InterfaceModel`].
//!
//! The builder guarantees that every reference resolves; the validator
//! checks the rules that need the whole model: wire id uniqueness, what may
//! appear where, and recursion through by-value fields.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    ast::PrimitiveType,
    error::{IdlError, finish},
    location::Location,
    model::{
        EnumDef, Field, InterfaceModel, QualifiedName, Service, TypeDef, TypeKind, TypeRef, Visit,
    },
};

/// Runs every check and reports all violations at once.
pub fn validate(model: &InterfaceModel) -> Result<(), Vec<IdlError>> {
    let mut validator = Validator {
        model,
        errors: Vec::new(),
    };
    for ns in model.namespaces.values() {
        for def in ns.types_in_order() {
            validator.check_type(def);
        }
        for service in &ns.services {
            validator.check_service(service);
        }
    }
    validator.check_cycles();

    debug!(errors = validator.errors.len(), "validated interface model");
    finish((), validator.errors)
}

struct Validator<'m> {
    model: &'m InterfaceModel,
    errors: Vec<IdlError>,
}

impl<'m> Validator<'m> {
    fn check_type(&mut self, def: &'m TypeDef) {
        match def {
            TypeDef::Enum(e) => self.check_enum(e),
            TypeDef::Struct(_) | TypeDef::Exception(_) => {
                let owner = def.name();
                let fields = def.fields().unwrap_or_default();
                self.check_field_ids(owner, fields);
                for field in fields {
                    self.check_value_type(
                        &field.ty,
                        &field.location,
                        &format!("field '{}' of '{owner}'", field.name),
                    );
                }
            }
            TypeDef::Alias(alias) => {
                // An alias may name an exception for use in throws clauses,
                // so only its container elements are value positions.
                if !matches!(alias.target, TypeRef::Named(_)) {
                    self.check_value_type(
                        &alias.target,
                        &alias.location,
                        &format!("typedef '{}'", alias.name),
                    );
                }
            }
        }
    }

    fn check_enum(&mut self, def: &EnumDef) {
        if def.members.is_empty() {
            self.errors.push(IdlError::semantic(
                def.location.clone(),
                format!("enum '{}' has no members", def.name),
            ));
        }

        let mut seen: HashMap<i32, &str> = HashMap::new();
        for member in &def.members {
            if let Some(first) = seen.get(&member.value) {
                let mut error = IdlError::semantic(
                    member.location.clone(),
                    format!(
                        "duplicate value {} in enum '{}': '{}' and '{first}'",
                        member.value, def.name, member.name
                    ),
                );
                if let Some(first) = def.member(first) {
                    error = error.with_note(first.location.clone(), "value first used here");
                }
                self.errors.push(error);
            } else {
                seen.insert(member.value, &member.name);
            }
        }
    }

    fn check_field_ids(&mut self, owner: &QualifiedName, fields: &[Field]) {
        let mut seen: HashMap<u16, &Field> = HashMap::new();
        for field in fields {
            if let Some(first) = seen.get(&field.id) {
                self.errors.push(
                    IdlError::semantic(
                        field.location.clone(),
                        format!(
                            "duplicate field id {} in '{owner}': '{}' and '{}'",
                            field.id, field.name, first.name
                        ),
                    )
                    .with_note(first.location.clone(), "id first used here"),
                );
            } else {
                seen.insert(field.id, field);
            }
        }
    }

    fn check_service(&mut self, service: &Service) {
        if service.functions.is_empty() {
            self.errors.push(IdlError::semantic(
                service.location.clone(),
                format!("service '{}' has no functions", service.name),
            ));
        }

        let mut ids: HashMap<u32, &str> = HashMap::new();
        for function in &service.functions {
            if let Some(first) = ids.get(&function.id) {
                self.errors.push(IdlError::semantic(
                    function.location.clone(),
                    format!(
                        "duplicate function id {} in service '{}': '{}' and '{first}'",
                        function.id, service.name, function.name
                    ),
                ));
            } else {
                ids.insert(function.id, &function.name);
            }

            for param in &function.params {
                self.check_value_type(
                    &param.ty,
                    &param.location,
                    &format!("parameter '{}' of '{}'", param.name, function.name),
                );
            }
            if let Some(returns) = &function.returns {
                self.check_value_type(
                    returns,
                    &function.location,
                    &format!("result of '{}'", function.name),
                );
            }

            let mut thrown: Vec<&QualifiedName> = Vec::new();
            for name in &function.throws {
                if thrown.contains(&name) {
                    self.errors.push(IdlError::semantic(
                        function.location.clone(),
                        format!(
                            "'{name}' appears more than once in the throws clause of '{}'",
                            function.name
                        ),
                    ));
                    continue;
                }
                thrown.push(name);

                match self.model.type_def(name).map(TypeDef::kind) {
                    Some(TypeKind::Exception) => {}
                    Some(kind) => self.errors.push(IdlError::semantic(
                        function.location.clone(),
                        format!("'{name}' is a {kind}, not an exception"),
                    )),
                    None => self.errors.push(IdlError::semantic(
                        function.location.clone(),
                        format!("'{name}' is not an exception"),
                    )),
                }
            }
        }
    }

    /// Checks a type used where a value is stored or transferred.
    fn check_value_type(&mut self, ty: &TypeRef, location: &Location, what: &str) {
        match ty {
            TypeRef::Primitive(_) => {}
            TypeRef::List(inner) => self.check_value_type(inner, location, what),
            TypeRef::Set(inner) => {
                self.check_hashable(inner, location, "set element", what);
                self.check_value_type(inner, location, what);
            }
            TypeRef::Map(key, value) => {
                self.check_hashable(key, location, "map key", what);
                self.check_value_type(key, location, what);
                self.check_value_type(value, location, what);
            }
            TypeRef::Named(_) => {
                if let Some(TypeDef::Exception(e)) = self.model.resolve(ty) {
                    self.errors.push(IdlError::semantic(
                        location.clone(),
                        format!(
                            "exception '{}' cannot be used as a value type in {what}",
                            e.record.name
                        ),
                    ));
                }
            }
        }
    }

    fn check_hashable(&mut self, ty: &TypeRef, location: &Location, role: &str, what: &str) {
        let hashable = match self.model.underlying(ty) {
            TypeRef::Primitive(p) => *p != PrimitiveType::Buffer,
            TypeRef::Named(_) => matches!(self.model.resolve(ty), Some(TypeDef::Enum(_))),
            _ => false,
        };
        if !hashable {
            self.errors.push(IdlError::semantic(
                location.clone(),
                format!("{role} type '{ty}' in {what} is not hashable"),
            ));
        }
    }

    /// Reports every struct or exception that contains itself through
    /// by-value fields. Containers are an indirection and break the cycle.
    fn check_cycles(&mut self) {
        let model = self.model;
        let mut visits = HashMap::new();
        let mut type_stack = Vec::new();
        for ns in model.namespaces.values() {
            for def in ns.types_in_order() {
                if def.fields().is_some() {
                    self.visit_record(def, &mut visits, &mut type_stack);
                }
            }
        }
    }

    fn visit_record(
        &mut self,
        def: &'m TypeDef,
        visits: &mut HashMap<&'m QualifiedName, Visit>,
        type_stack: &mut Vec<&'m QualifiedName>,
    ) {
        let model = self.model;
        let name = def.name();
        if visits.contains_key(name) {
            return;
        }
        visits.insert(name, Visit::Active);
        type_stack.push(name);

        for field in def.fields().unwrap_or_default() {
            let Some(target) = model.resolve(&field.ty).filter(|t| t.fields().is_some()) else {
                continue;
            };
            match visits.get(target.name()) {
                Some(Visit::Active) => {
                    let start = type_stack
                        .iter()
                        .position(|n| *n == target.name())
                        .unwrap_or(0);
                    let cycle = type_stack[start..]
                        .iter()
                        .map(|n| n.to_string())
                        .chain(std::iter::once(target.name().to_string()))
                        .collect::<Vec<String>>()
                        .join(" -> ");
                    self.errors.push(
                        IdlError::semantic(
                            field.location.clone(),
                            format!("'{}' contains itself by value: {cycle}", target.name()),
                        )
                        .with_note(
                            target.location().clone(),
                            "wrap the field in a list, set or map to break the cycle",
                        ),
                    );
                }
                Some(Visit::Done) => {}
                None => self.visit_record(target, visits, type_stack),
            }
        }

        type_stack.pop();
        visits.insert(name, Visit::Done);
    }
}
