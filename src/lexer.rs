use std::{fmt, iter::Peekable, str::CharIndices, sync::Arc};

use crate::{ast::PrimitiveType, location::Location};

// The core token definition for the Basalt IDL.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    Namespace,
    Import,
    Const,
    Typedef,
    Enum,
    Struct,
    Exception,
    Service,
    Throws,
    Void,
    True,
    False,
    // Primitive Types
    Primitive(PrimitiveType),
    // Delimiters and Operators
    OpenBrace,   // {
    CloseBrace,  // }
    OpenParen,   // (
    CloseParen,  // )
    LessThan,    // <
    GreaterThan, // >
    Comma,       // ,
    Colon,       // :
    Semicolon,   // ;
    Assign,      // =
    Dot,         // .
    Minus,       // -
    Arrow,       // ->
    /// Names of types, fields, functions and namespaces.
    Identifier(String),
    /// Integer literal (i.e. 123 or 0x7f)
    LiteralInt(u64),
    /// Float literal (i.e. 1.5 or 2e10)
    LiteralFloat(f64),
    /// String literal with escapes already processed.
    LiteralString(String),
    /// A `///` comment line, without the slashes.
    DocComment(String),
    /// End of File
    Eof,
    /// Error token with a message
    Error(String),
}

impl TokenKind {
    /// Whether this keyword starts a top-level declaration.
    pub fn starts_declaration(&self) -> bool {
        matches!(
            self,
            TokenKind::Namespace
                | TokenKind::Import
                | TokenKind::Const
                | TokenKind::Typedef
                | TokenKind::Enum
                | TokenKind::Struct
                | TokenKind::Exception
                | TokenKind::Service
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Namespace => write!(f, "'namespace'"),
            TokenKind::Import => write!(f, "'import'"),
            TokenKind::Const => write!(f, "'const'"),
            TokenKind::Typedef => write!(f, "'typedef'"),
            TokenKind::Enum => write!(f, "'enum'"),
            TokenKind::Struct => write!(f, "'struct'"),
            TokenKind::Exception => write!(f, "'exception'"),
            TokenKind::Service => write!(f, "'service'"),
            TokenKind::Throws => write!(f, "'throws'"),
            TokenKind::Void => write!(f, "'void'"),
            TokenKind::True => write!(f, "'true'"),
            TokenKind::False => write!(f, "'false'"),
            TokenKind::Primitive(p) => write!(f, "type '{p}'"),
            TokenKind::OpenBrace => write!(f, "'{{'"),
            TokenKind::CloseBrace => write!(f, "'}}'"),
            TokenKind::OpenParen => write!(f, "'('"),
            TokenKind::CloseParen => write!(f, "')'"),
            TokenKind::LessThan => write!(f, "'<'"),
            TokenKind::GreaterThan => write!(f, "'>'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Semicolon => write!(f, "';'"),
            TokenKind::Assign => write!(f, "'='"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Arrow => write!(f, "'->'"),
            TokenKind::Identifier(name) => write!(f, "identifier '{name}'"),
            TokenKind::LiteralInt(v) => write!(f, "integer {v}"),
            TokenKind::LiteralFloat(v) => write!(f, "float {v}"),
            TokenKind::LiteralString(s) => write!(f, "string {s:?}"),
            TokenKind::DocComment(_) => write!(f, "doc comment"),
            TokenKind::Eof => write!(f, "end of file"),
            TokenKind::Error(msg) => write!(f, "{msg}"),
        }
    }
}

// A full token, including its kind and its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
}

pub struct Lexer<'a> {
    file: Arc<str>,
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    current_line: usize,
    line_start: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    /// Creates a new Lexer over `source`, naming it `file` in token locations.
    pub fn new(file: impl Into<Arc<str>>, source: &'a str) -> Self {
        Lexer {
            file: file.into(),
            source,
            chars: source.char_indices().peekable(),
            current_line: 1,
            line_start: 0,
            finished: false,
        }
    }

    /// Byte offset of the next unconsumed character.
    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.source.len())
    }

    /// Advances the internal position and consumes the current character.
    fn advance(&mut self) -> Option<char> {
        let (index, c) = self.chars.next()?;
        if c == '\n' {
            self.current_line += 1;
            self.line_start = index + 1;
        }
        Some(c)
    }

    /// Peeks at the next character without consuming it.
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    /// Peeks one character past the next one.
    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, c)| c)
    }

    fn location_from(&self, start: usize, line: usize, line_start: usize, end: usize) -> Location {
        let column = self.source[line_start..start].chars().count() + 1;
        Location::new(self.file.clone(), line, column, start, end - start)
    }

    /// Skips whitespace and non-doc comments.
    ///
    /// Returns an error message for an unterminated block comment.
    fn skip_trivia(&mut self) -> Result<(), String> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    if self.at_doc_comment() {
                        return Ok(());
                    }
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_second() == Some('*') => {
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(c) = self.advance() {
                        if c == '*' && self.peek() == Some('/') {
                            self.advance();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err("unterminated block comment".to_string());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// `///` starts a doc comment, `////` and longer are plain comments.
    fn at_doc_comment(&self) -> bool {
        let mut ahead = self.chars.clone();
        let prefix: String = ahead.by_ref().take(4).map(|(_, c)| c).collect();
        prefix.starts_with("///") && !prefix.starts_with("////")
    }

    fn take_doc_comment(&mut self) -> TokenKind {
        for _ in 0..3 {
            self.advance();
        }
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            text.push(c);
            self.advance();
        }
        let text = text.strip_prefix(' ').unwrap_or(&text).trim_end().to_string();
        TokenKind::DocComment(text)
    }

    /// Parses an identifier or keyword.
    fn take_identifier(&mut self) -> TokenKind {
        let start = self.offset();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let end = self.offset();
        let ident_str = &self.source[start..end];

        // Check if it's a reserved keyword or type
        match ident_str {
            "namespace" => TokenKind::Namespace,
            "import" => TokenKind::Import,
            "const" => TokenKind::Const,
            "typedef" => TokenKind::Typedef,
            "enum" => TokenKind::Enum,
            "struct" => TokenKind::Struct,
            "exception" => TokenKind::Exception,
            "service" => TokenKind::Service,
            "throws" => TokenKind::Throws,
            "void" => TokenKind::Void,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            other => match PrimitiveType::from_keyword(other) {
                Some(p) => TokenKind::Primitive(p),
                None => TokenKind::Identifier(other.to_string()),
            },
        }
    }

    /// Parses an integer or float literal.
    fn take_number(&mut self) -> TokenKind {
        let start = self.offset();

        if self.peek() == Some('0') && matches!(self.peek_second(), Some('x' | 'X')) {
            self.advance();
            self.advance();
            let digits_start = self.offset();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    self.advance();
                } else {
                    break;
                }
            }
            let digits = self.source[digits_start..self.offset()].replace('_', "");
            return match u64::from_str_radix(&digits, 16) {
                Ok(val) => TokenKind::LiteralInt(val),
                Err(_) => TokenKind::Error(format!(
                    "invalid or oversized hex literal: {}",
                    &self.source[start..self.offset()]
                )),
            };
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.advance();
            } else if c == '.' && !is_float && self.peek_second().is_some_and(|d| d.is_ascii_digit())
            {
                is_float = true;
                self.advance();
            } else if matches!(c, 'e' | 'E') {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some('+' | '-')) {
                    self.advance();
                }
            } else {
                break;
            }
        }
        let num_str = self.source[start..self.offset()].replace('_', "");

        if is_float {
            match num_str.parse::<f64>() {
                Ok(val) => TokenKind::LiteralFloat(val),
                Err(_) => TokenKind::Error(format!("invalid float literal: {num_str}")),
            }
        } else {
            match num_str.parse::<u64>() {
                Ok(val) => TokenKind::LiteralInt(val),
                Err(_) => {
                    TokenKind::Error(format!("invalid or oversized integer literal: {num_str}"))
                }
            }
        }
    }

    /// Parses a double-quoted string literal, processing escapes.
    fn take_string(&mut self) -> TokenKind {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.advance() {
                Some('"') => return TokenKind::LiteralString(value),
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        return TokenKind::Error(format!("unknown escape sequence '\\{other}'"));
                    }
                    None => return TokenKind::Error("unterminated string literal".to_string()),
                },
                Some('\n') | None => {
                    return TokenKind::Error("unterminated string literal".to_string());
                }
                Some(c) => value.push(c),
            }
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        // 1. Skip whitespace and comments before processing the next token
        let trivia = self.skip_trivia();

        let start = self.offset();
        let line = self.current_line;
        let line_start = self.line_start;

        let kind = if let Err(msg) = trivia {
            TokenKind::Error(msg)
        } else {
            match self.peek() {
                Some('/') if self.at_doc_comment() => self.take_doc_comment(),
                Some(c) if single_char_token(c).is_some() => {
                    self.advance();
                    if c == '-' && self.peek() == Some('>') {
                        self.advance();
                        TokenKind::Arrow
                    } else {
                        single_char_token(c).unwrap_or(TokenKind::Minus)
                    }
                }

                // Handle identifiers/keywords
                Some(c) if c.is_ascii_alphabetic() || c == '_' => self.take_identifier(),

                // Handle numbers
                Some(c) if c.is_ascii_digit() => self.take_number(),

                Some('"') => self.take_string(),

                // End of File is returned once, then the iterator is exhausted
                None => {
                    self.finished = true;
                    TokenKind::Eof
                }

                // Error token for unrecognized characters
                Some(c) => {
                    self.advance();
                    TokenKind::Error(format!("unrecognized character: '{c}'"))
                }
            }
        };

        let end = self.offset();
        Some(Token {
            kind,
            location: self.location_from(start, line, line_start, end),
        })
    }
}

fn single_char_token(c: char) -> Option<TokenKind> {
    let kind = match c {
        '{' => TokenKind::OpenBrace,
        '}' => TokenKind::CloseBrace,
        '(' => TokenKind::OpenParen,
        ')' => TokenKind::CloseParen,
        '<' => TokenKind::LessThan,
        '>' => TokenKind::GreaterThan,
        ',' => TokenKind::Comma,
        ':' => TokenKind::Colon,
        ';' => TokenKind::Semicolon,
        '=' => TokenKind::Assign,
        '.' => TokenKind::Dot,
        '-' => TokenKind::Minus,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new("test.idl", source).map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_and_punctuation() {
        assert_eq!(
            kinds("struct Point { x: int32 (id=1); }"),
            vec![
                TokenKind::Struct,
                TokenKind::Identifier("Point".into()),
                TokenKind::OpenBrace,
                TokenKind::Identifier("x".into()),
                TokenKind::Colon,
                TokenKind::Primitive(PrimitiveType::Int32),
                TokenKind::OpenParen,
                TokenKind::Identifier("id".into()),
                TokenKind::Assign,
                TokenKind::LiteralInt(1),
                TokenKind::CloseParen,
                TokenKind::Semicolon,
                TokenKind::CloseBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_arrow_and_minus() {
        assert_eq!(
            kinds("-> - >"),
            vec![
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::GreaterThan,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("42 0x1F 1.5 2e3 1_000"),
            vec![
                TokenKind::LiteralInt(42),
                TokenKind::LiteralInt(31),
                TokenKind::LiteralFloat(1.5),
                TokenKind::LiteralFloat(2000.0),
                TokenKind::LiteralInt(1000),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_oversized_integer() {
        let tokens = kinds("99999999999999999999999");
        assert!(matches!(&tokens[0], TokenKind::Error(m) if m.contains("oversized")));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n""#),
            vec![TokenKind::LiteralString("a\"b\n".into()), TokenKind::Eof]
        );
        let tokens = kinds("\"open");
        assert!(matches!(&tokens[0], TokenKind::Error(m) if m.contains("unterminated")));
    }

    #[test]
    fn test_comments() {
        let source = "// plain\n/* block\n comment */ struct /// the doc\n//// not doc\nA";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Struct,
                TokenKind::DocComment("the doc".into()),
                TokenKind::Identifier("A".into()),
                TokenKind::Eof,
            ]
        );
        let tokens = kinds("/* never closed");
        assert!(matches!(&tokens[0], TokenKind::Error(m) if m.contains("block comment")));
    }

    #[test]
    fn test_locations() {
        let tokens: Vec<Token> = Lexer::new("loc.idl", "enum\n  Color {").collect();
        assert_eq!(tokens[0].location.line, 1);
        assert_eq!(tokens[0].location.column, 1);
        assert_eq!(tokens[1].location.line, 2);
        assert_eq!(tokens[1].location.column, 3);
        assert_eq!(tokens[1].location.offset, 7);
        assert_eq!(tokens[1].location.len, 5);
        assert_eq!(&*tokens[1].location.file, "loc.idl");
    }

    #[test]
    fn test_unrecognized_character() {
        let tokens = kinds("struct @");
        assert!(matches!(&tokens[1], TokenKind::Error(m) if m.contains("'@'")));
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }
}
