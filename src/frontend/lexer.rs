use std::{
    collections::{BTreeMap, VecDeque},
    str::Chars,
};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::{Display, EnumString};

use crate::{
    error::{Diagnostic, Stage},
    frontend::SourceFile,
};

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    line_number: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: usize,
    pub value: TokenValue,
}

/// Decoded payload of literal tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValue {
    None,
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // fn
    Identifier,       // main

    /* Literals */
    IntegerLiteral, // 1
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,

    /* Other */
    Colon, // :
    Arrow, // ->
    Hash,  // #

    /* Unary Ops */
    Bang, // !

    /* Unary + Binary Ops */
    Minus, // -

    /* Binary Ops */
    Asterisk,             // *
    Plus,                 // +
    Divide,               // /
    Modulus,              // %
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    Equals, // =
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Keyword(keyword) => return write!(f, "`{keyword}`"),
            Self::Identifier => return f.write_str("identifier"),
            Self::IntegerLiteral => return f.write_str("integer literal"),
            Self::StringLiteral => return f.write_str("string literal"),
            Self::OpenParen => "(",
            Self::CloseParen => ")",
            Self::OpenBracket => "[",
            Self::CloseBracket => "]",
            Self::OpenBrace => "{",
            Self::CloseBrace => "}",
            Self::Semicolon => ";",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Arrow => "->",
            Self::Hash => "#",
            Self::Bang => "!",
            Self::Minus => "-",
            Self::Asterisk => "*",
            Self::Plus => "+",
            Self::Divide => "/",
            Self::Modulus => "%",
            Self::DoubleEquals => "==",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqualTo => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqualTo => ">=",
            Self::Equals => "=",
        };

        write!(f, "`{symbol}`")
    }
}

impl TokenKind {
    pub fn is_relational_operator(&self) -> bool {
        matches!(
            self,
            Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_equality_operator(&self) -> bool {
        matches!(self, Self::DoubleEquals | Self::NotEquals)
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide | Self::Modulus)
    }

    pub fn is_unary_operator(&self) -> bool {
        matches!(self, Self::Bang | Self::Minus)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Fn,
    Let,
    Loop,
    While,
    If,
    Else,
    Return,
    Break,
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('#', TokenKind::Hash),
        ('!', TokenKind::Bang),
        ('-', TokenKind::Minus),
        ('*', TokenKind::Asterisk),
        ('+', TokenKind::Plus),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('=', TokenKind::Equals),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            line_number: 1,
            peek_buffer: VecDeque::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn source(&self) -> &'source SourceFile {
        self.source
    }

    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Drains the problems found so far
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Lexes the whole source. Used by tests and the token dump.
    pub fn tokenize(source: &'source SourceFile) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();

        while let Some(token) = lexer.next() {
            tokens.push(token);
        }

        (tokens, lexer.diagnostics)
    }

    fn report_error(&mut self, line: usize, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(Stage::Lexer, line, message));
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();

        if c == '\n' {
            self.line_number += 1;
        }

        Some(c)
    }

    fn next_is(&mut self, n: usize, expected: char) -> bool {
        self.chars.peek_nth(n).is_some_and(|c| *c == expected)
    }

    fn ignore_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn ignore_line(&mut self) {
        while self.chars.peek().is_some_and(|c| *c != '\n') {
            self.bump();
        }
    }

    fn read_string(&mut self) -> Token {
        let start_position = self.position;
        let start_line = self.line_number;
        let mut value = String::new();

        // Consume the opening quote
        self.bump();

        loop {
            match self.chars.peek().copied() {
                None | Some('\n') => {
                    self.report_error(start_line, "unterminated string literal");
                    break;
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();

                    match self.chars.peek().copied() {
                        Some('\\') => value.push('\\'),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('"') => value.push('"'),
                        Some(' ') => value.push(' '),
                        Some(c) if c != '\n' => {
                            self.report_error(
                                self.line_number,
                                format!("unknown escape sequence `\\{c}`"),
                            );
                            value.push(c);
                        }
                        // Leave the newline (or end of file) for the unterminated check
                        _ => continue,
                    }

                    self.bump();
                }
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }

        Token {
            kind: TokenKind::StringLiteral,
            span: self.new_span(start_position),
            line: start_line,
            value: TokenValue::String(value),
        }
    }

    // Keyword or identifier
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while self
            .chars
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            self.bump();
        }

        let span = self.new_span(start_position);
        let kind = match self.source.value_of_span(span).parse() {
            Ok(keyword) => TokenKind::Keyword(keyword),
            Err(_) => TokenKind::Identifier,
        };

        Token {
            kind,
            span,
            line: self.line_number,
            value: TokenValue::None,
        }
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;

        while self.chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }

        let span = self.new_span(start_position);
        let text = self.source.value_of_span(span);
        let value = match text.parse::<i64>() {
            Ok(value) => value,
            Err(_) => {
                let message = format!("integer literal `{text}` does not fit in 64 bits");
                self.report_error(self.line_number, message);
                0
            }
        };

        Token {
            kind: TokenKind::IntegerLiteral,
            span,
            line: self.line_number,
            value: TokenValue::Integer(value),
        }
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
            line: self.line_number,
            value: TokenValue::None,
        }
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.bump();
        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
            line: self.line_number,
            value: TokenValue::None,
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> Option<&Token> {
        if self.peek_buffer.is_empty() {
            if let Some(token) = self.lex_token() {
                self.peek_buffer.push_back(token);
            }
        }

        self.peek_buffer.front()
    }

    pub fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Some(token);
        }

        self.lex_token()
    }

    fn lex_token(&mut self) -> Option<Token> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '/' if self.next_is(1, '/') => {
                    self.ignore_line();
                    continue;
                }

                '"' => self.read_string(),
                n if n.is_ascii_digit() => self.read_number(),
                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                '-' if self.next_is(1, '>') => self.read_double(TokenKind::Arrow),
                '=' if self.next_is(1, '=') => self.read_double(TokenKind::DoubleEquals),
                '!' if self.next_is(1, '=') => self.read_double(TokenKind::NotEquals),
                '<' if self.next_is(1, '=') => self.read_double(TokenKind::LessThanOrEqualTo),
                '>' if self.next_is(1, '=') => {
                    self.read_double(TokenKind::GreaterThanOrEqualTo)
                }

                c => match SINGLE_TOKENS.get(&c) {
                    Some(kind) => self.read_single(*kind),
                    None => {
                        self.report_error(
                            self.line_number,
                            format!("unexpected character `{c}`"),
                        );
                        self.bump();
                        continue;
                    }
                },
            };

            return Some(token);
        }

        None
    }
}
