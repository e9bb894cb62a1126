use std::sync::Arc;

use tracing::debug;

use crate::{
    ast::{
        ConstDecl, Declaration, Document, EnumDecl, EnumMemberDecl, FieldDecl, FunctionDecl,
        Ident, ImportDecl, IntLiteral, Literal, LiteralExpr, ParamDecl, Path, ServiceDecl,
        StructDecl, TypeExpr, TypedefDecl,
    },
    error::{IdlError, finish},
    lexer::{Lexer, Token, TokenKind},
    location::Location,
};

type ParseResult<T> = Result<T, IdlError>;

/// Parses Basalt source text into a [`Document`].
///
/// A declaration that fails to parse is recorded as a syntax error and the
/// parser skips ahead to the next top-level keyword, so one run reports every
/// broken declaration. The document is only returned when no error was found.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    source: Arc<str>,
    current_token: Token,
    /// Doc comment lines directly preceding `current_token`.
    current_doc: Option<String>,
    errors: Vec<IdlError>,
}

/// Convenience wrapper around [`Parser::parse_document`].
pub fn parse(source_name: impl Into<Arc<str>>, text: &str) -> Result<Document, Vec<IdlError>> {
    Parser::new(source_name, text).parse_document()
}

impl<'a> Parser<'a> {
    /// Creates a new parser and grabs the first token.
    pub fn new(source_name: impl Into<Arc<str>>, text: &'a str) -> Self {
        let source: Arc<str> = source_name.into();
        let lexer = Lexer::new(source.clone(), text);
        let placeholder = Token {
            kind: TokenKind::Eof,
            location: Location::new(source.clone(), 1, 1, 0, 0),
        };
        let mut parser = Parser {
            lexer,
            source,
            current_token: placeholder,
            current_doc: None,
            errors: Vec::new(),
        };
        parser.advance();
        parser
    }

    /// Advances the parser to the next token, collecting doc comments on the way.
    fn advance(&mut self) {
        let mut doc_lines: Vec<String> = Vec::new();
        loop {
            // Fetch the next token from the iterator, or use EOF if none is available
            let token = self.lexer.next().unwrap_or(Token {
                kind: TokenKind::Eof,
                location: self.current_token.location.clone(),
            });
            match token.kind {
                TokenKind::DocComment(line) => doc_lines.push(line),
                _ => {
                    self.current_token = token;
                    break;
                }
            }
        }
        self.current_doc = if doc_lines.is_empty() {
            None
        } else {
            Some(doc_lines.join("\n"))
        };
    }

    fn location(&self) -> Location {
        self.current_token.location.clone()
    }

    /// Builds an "expected X, found Y" error at the current token.
    fn unexpected(&self, expected: &str) -> IdlError {
        match &self.current_token.kind {
            TokenKind::Error(msg) => IdlError::syntax(self.location(), msg.clone()),
            found => IdlError::syntax(self.location(), format!("expected {expected}, found {found}")),
        }
    }

    /// Checks if the current token matches an expected kind, consumes it, and advances.
    /// Returns an error if the current token does not match the expected kind.
    fn consume(&mut self, expected: TokenKind) -> ParseResult<Location> {
        if self.current_token.kind == expected {
            let location = self.location();
            self.advance();
            Ok(location)
        } else {
            Err(self.unexpected(&expected.to_string()))
        }
    }

    /// Consumes the current token if it matches, without failing otherwise.
    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.current_token.kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Helper to consume an Identifier and return its name.
    fn consume_identifier(&mut self) -> ParseResult<Ident> {
        let name = match &self.current_token.kind {
            TokenKind::Identifier(id) => id.clone(),
            _ => return Err(self.unexpected("an identifier")),
        };
        let location = self.location();
        self.advance();
        Ok(Ident { name, location })
    }

    // --- Core Parsing Functions ---

    /// Parses the entire document.
    pub fn parse_document(mut self) -> Result<Document, Vec<IdlError>> {
        let mut namespace: Option<Path> = None;
        let mut imports = Vec::new();
        let mut declarations = Vec::new();

        while self.current_token.kind != TokenKind::Eof {
            let before = self.current_token.location.offset;
            let result = match self.current_token.kind {
                TokenKind::Namespace => self.parse_namespace(namespace.as_ref()).map(|path| {
                    namespace = Some(path);
                }),
                TokenKind::Import => self.parse_import().map(|import| imports.push(import)),
                _ => self.parse_declaration().map(|decl| declarations.push(decl)),
            };

            if let Err(err) = result {
                debug!(source = %self.source, error = %err, "recovering from syntax error");
                self.errors.push(err);
                self.synchronize();
                if self.current_token.location.offset == before
                    && self.current_token.kind != TokenKind::Eof
                {
                    self.advance();
                }
            }
        }

        let document = Document {
            source: self.source.clone(),
            namespace,
            imports,
            declarations,
        };
        finish(document, self.errors)
    }

    /// Skips tokens until the next top-level keyword outside any braces,
    /// or past the closing brace of the body the error occurred in.
    fn synchronize(&mut self) {
        let mut depth: usize = 0;
        loop {
            let kind = &self.current_token.kind;
            if *kind == TokenKind::Eof || (depth == 0 && kind.starts_declaration()) {
                return;
            }
            if *kind == TokenKind::OpenBrace {
                depth += 1;
            } else if *kind == TokenKind::CloseBrace {
                if depth == 0 {
                    self.advance();
                    return;
                }
                depth -= 1;
            }
            self.advance();
        }
    }

    /// Parses the namespace directive (e.g., `namespace acme.geometry;`).
    fn parse_namespace(&mut self, existing: Option<&Path>) -> ParseResult<Path> {
        let keyword = self.consume(TokenKind::Namespace)?;
        if let Some(first) = existing {
            return Err(IdlError::syntax(
                keyword,
                "expected one namespace directive, found a second",
            )
            .with_note(first.location.clone(), "namespace first declared here"));
        }
        let path = self.parse_path()?;
        self.consume(TokenKind::Semicolon)?;
        Ok(path)
    }

    /// Parses `import "file.idl";`.
    fn parse_import(&mut self) -> ParseResult<ImportDecl> {
        let start = self.consume(TokenKind::Import)?;
        let path = match &self.current_token.kind {
            TokenKind::LiteralString(s) => s.clone(),
            _ => return Err(self.unexpected("an import path string")),
        };
        let end = self.location();
        self.advance();
        self.consume(TokenKind::Semicolon)?;
        Ok(ImportDecl {
            path,
            location: start.to(&end),
        })
    }

    /// Parses a top-level declaration.
    fn parse_declaration(&mut self) -> ParseResult<Declaration> {
        let doc = self.current_doc.take();
        match self.current_token.kind {
            TokenKind::Const => self.parse_const(doc).map(Declaration::Const),
            TokenKind::Typedef => self.parse_typedef(doc).map(Declaration::Typedef),
            TokenKind::Enum => self.parse_enum(doc).map(Declaration::Enum),
            TokenKind::Struct => self
                .parse_struct(TokenKind::Struct, doc)
                .map(Declaration::Struct),
            TokenKind::Exception => self
                .parse_struct(TokenKind::Exception, doc)
                .map(Declaration::Exception),
            TokenKind::Service => self.parse_service(doc).map(Declaration::Service),
            _ => Err(self.unexpected(
                "'namespace', 'import', 'const', 'typedef', 'enum', 'struct', 'exception' or 'service'",
            )),
        }
    }

    // --- Type Parsing ---

    /// Parses a dotted name such as `shapes.Point`.
    fn parse_path(&mut self) -> ParseResult<Path> {
        let first = self.consume_identifier()?;
        let mut location = first.location.clone();
        let mut segments = vec![first.name];
        while self.current_token.kind == TokenKind::Dot {
            self.advance();
            let next = self.consume_identifier()?;
            location = location.to(&next.location);
            segments.push(next.name);
        }
        Ok(Path { segments, location })
    }

    /// Parses a primitive, container or user-defined type.
    fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        if let TokenKind::Primitive(p) = self.current_token.kind {
            let location = self.location();
            self.advance();
            return Ok(TypeExpr::Primitive(p, location));
        }
        if !matches!(self.current_token.kind, TokenKind::Identifier(_)) {
            return Err(self.unexpected("a type"));
        }

        let path = self.parse_path()?;
        if path.segments.len() != 1 || self.current_token.kind != TokenKind::LessThan {
            return Ok(TypeExpr::Named(path));
        }

        // `list`, `set` and `map` are only containers when followed by `<`.
        let start = path.location.clone();
        match path.name() {
            "list" | "set" => {
                self.consume(TokenKind::LessThan)?;
                let element = self.parse_type()?;
                let end = self.consume(TokenKind::GreaterThan)?;
                let location = start.to(&end);
                if path.name() == "list" {
                    Ok(TypeExpr::List(Box::new(element), location))
                } else {
                    Ok(TypeExpr::Set(Box::new(element), location))
                }
            }
            "map" => {
                self.consume(TokenKind::LessThan)?;
                let key = self.parse_type()?;
                self.consume(TokenKind::Comma)?;
                let value = self.parse_type()?;
                let end = self.consume(TokenKind::GreaterThan)?;
                Ok(TypeExpr::Map(Box::new(key), Box::new(value), start.to(&end)))
            }
            other => Err(IdlError::syntax(
                self.location(),
                format!("'{other}' is not a generic type; expected 'list', 'set' or 'map'"),
            )),
        }
    }

    // --- Literals ---

    /// Parses an integer, accepting a leading minus sign.
    fn parse_int(&mut self) -> ParseResult<IntLiteral> {
        let start = self.location();
        let negative = self.eat(TokenKind::Minus);
        let raw = match self.current_token.kind {
            TokenKind::LiteralInt(v) => v,
            _ => return Err(self.unexpected("an integer literal")),
        };
        let location = start.to(&self.location());
        self.advance();
        let value = int_value(raw, negative)
            .ok_or_else(|| IdlError::syntax(location.clone(), "integer literal out of range"))?;
        Ok(IntLiteral { value, location })
    }

    /// Parses a constant's value.
    fn parse_literal(&mut self) -> ParseResult<LiteralExpr> {
        let start = self.location();
        let negative = self.eat(TokenKind::Minus);
        let value = match self.current_token.kind.clone() {
            TokenKind::LiteralInt(raw) => {
                let location = start.to(&self.location());
                Literal::Int(int_value(raw, negative).ok_or_else(|| {
                    IdlError::syntax(location, "integer literal out of range")
                })?)
            }
            TokenKind::LiteralFloat(v) => Literal::Float(if negative { -v } else { v }),
            _ if negative => return Err(self.unexpected("a number")),
            TokenKind::LiteralString(s) => Literal::String(s),
            TokenKind::True => Literal::Bool(true),
            TokenKind::False => Literal::Bool(false),
            TokenKind::Identifier(_) => {
                let path = self.parse_path()?;
                let location = path.location.clone();
                return Ok(LiteralExpr {
                    value: Literal::Path(path),
                    location,
                });
            }
            _ => return Err(self.unexpected("a literal value")),
        };
        let location = start.to(&self.location());
        self.advance();
        Ok(LiteralExpr { value, location })
    }

    /// Parses an optional `(id=N)` suffix.
    fn parse_wire_id(&mut self) -> ParseResult<Option<IntLiteral>> {
        if self.current_token.kind != TokenKind::OpenParen {
            return Ok(None);
        }
        self.advance();
        if !matches!(&self.current_token.kind, TokenKind::Identifier(word) if word == "id") {
            return Err(self.unexpected("'id'"));
        }
        self.advance();
        self.consume(TokenKind::Assign)?;
        let id = self.parse_int()?;
        self.consume(TokenKind::CloseParen)?;
        Ok(Some(id))
    }

    // --- Declarations ---

    /// Parses `const NAME: type = literal;`.
    fn parse_const(&mut self, doc: Option<String>) -> ParseResult<ConstDecl> {
        let start = self.consume(TokenKind::Const)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::Colon)?;
        let type_expr = self.parse_type()?;
        self.consume(TokenKind::Assign)?;
        let value = self.parse_literal()?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(ConstDecl {
            doc,
            name,
            type_expr,
            value,
            location: start.to(&end),
        })
    }

    /// Parses `typedef Name = type;`.
    fn parse_typedef(&mut self, doc: Option<String>) -> ParseResult<TypedefDecl> {
        let start = self.consume(TokenKind::Typedef)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::Assign)?;
        let target = self.parse_type()?;
        let end = self.consume(TokenKind::Semicolon)?;
        Ok(TypedefDecl {
            doc,
            name,
            target,
            location: start.to(&end),
        })
    }

    /// Parses an enum definition.
    fn parse_enum(&mut self, doc: Option<String>) -> ParseResult<EnumDecl> {
        let start = self.consume(TokenKind::Enum)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::OpenBrace)?;

        let mut members = Vec::new();
        while self.current_token.kind != TokenKind::CloseBrace
            && self.current_token.kind != TokenKind::Eof
        {
            let member_doc = self.current_doc.take();
            let member_name = self.consume_identifier()?;

            // Optional explicit assignment: '= 10'
            let value = if self.eat(TokenKind::Assign) {
                Some(self.parse_int()?)
            } else {
                None
            };

            members.push(EnumMemberDecl {
                doc: member_doc,
                name: member_name,
                value,
            });

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        let end = self.consume(TokenKind::CloseBrace)?;
        Ok(EnumDecl {
            doc,
            name,
            members,
            location: start.to(&end),
        })
    }

    /// Parses a struct or exception definition.
    fn parse_struct(&mut self, keyword: TokenKind, doc: Option<String>) -> ParseResult<StructDecl> {
        let start = self.consume(keyword)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::OpenBrace)?;

        let mut fields = Vec::new();
        while self.current_token.kind != TokenKind::CloseBrace
            && self.current_token.kind != TokenKind::Eof
        {
            fields.push(self.parse_field()?);
        }

        let end = self.consume(TokenKind::CloseBrace)?;
        Ok(StructDecl {
            doc,
            name,
            fields,
            location: start.to(&end),
        })
    }

    /// Parses a field definition: `name: type (id=N);`.
    fn parse_field(&mut self) -> ParseResult<FieldDecl> {
        let doc = self.current_doc.take();
        let name = self.consume_identifier()?;
        self.consume(TokenKind::Colon)?;
        let type_expr = self.parse_type()?;
        let id = self.parse_wire_id()?;
        self.consume(TokenKind::Semicolon)?;
        Ok(FieldDecl {
            doc,
            name,
            type_expr,
            id,
        })
    }

    /// Parses a service definition.
    fn parse_service(&mut self, doc: Option<String>) -> ParseResult<ServiceDecl> {
        let start = self.consume(TokenKind::Service)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::OpenBrace)?;

        let mut functions = Vec::new();
        while self.current_token.kind != TokenKind::CloseBrace
            && self.current_token.kind != TokenKind::Eof
        {
            functions.push(self.parse_function()?);
        }

        let end = self.consume(TokenKind::CloseBrace)?;
        Ok(ServiceDecl {
            doc,
            name,
            functions,
            location: start.to(&end),
        })
    }

    /// Parses `name(params) -> type throws (E) (id=N);`.
    fn parse_function(&mut self) -> ParseResult<FunctionDecl> {
        let doc = self.current_doc.take();
        let name = self.consume_identifier()?;
        self.consume(TokenKind::OpenParen)?;

        let mut params = Vec::new();
        while self.current_token.kind != TokenKind::CloseParen {
            let param_name = self.consume_identifier()?;
            self.consume(TokenKind::Colon)?;
            let type_expr = self.parse_type()?;
            params.push(ParamDecl {
                name: param_name,
                type_expr,
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::CloseParen)?;

        let returns = if self.eat(TokenKind::Arrow) {
            if self.eat(TokenKind::Void) {
                None
            } else {
                Some(self.parse_type()?)
            }
        } else {
            None
        };

        let mut throws = Vec::new();
        if self.eat(TokenKind::Throws) {
            self.consume(TokenKind::OpenParen)?;
            loop {
                throws.push(self.parse_path()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::CloseParen)?;
        }

        let id = self.parse_wire_id()?;
        let end = self.consume(TokenKind::Semicolon)?;
        let location = name.location.to(&end);
        Ok(FunctionDecl {
            doc,
            name,
            params,
            returns,
            throws,
            id,
            location,
        })
    }
}

/// Applies a sign to an unsigned literal, failing when it leaves `i64`.
fn int_value(raw: u64, negative: bool) -> Option<i64> {
    if negative {
        if raw == i64::MIN.unsigned_abs() {
            Some(i64::MIN)
        } else {
            i64::try_from(raw).ok().map(|v| -v)
        }
    } else {
        i64::try_from(raw).ok()
    }
}
