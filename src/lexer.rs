use std::fmt::{self, Display};

use colored::Colorize;

/// Tracks token location, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Byte range of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Reserved words of the XDR language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Typedef,
    Enum,
    Struct,
    Union,
    Switch,
    Case,
    Default,
    Void,
    Const,
    Opaque,
    String,
    Unsigned,
    Int,
    Hyper,
    Float,
    Double,
    Bool,
    Namespace,
}

impl Keyword {
    /// Looks up a keyword by its spelling.
    pub fn lookup(word: &str) -> Option<Keyword> {
        let keyword = match word {
            "typedef" => Keyword::Typedef,
            "enum" => Keyword::Enum,
            "struct" => Keyword::Struct,
            "union" => Keyword::Union,
            "switch" => Keyword::Switch,
            "case" => Keyword::Case,
            "default" => Keyword::Default,
            "void" => Keyword::Void,
            "const" => Keyword::Const,
            "opaque" => Keyword::Opaque,
            "string" => Keyword::String,
            "unsigned" => Keyword::Unsigned,
            "int" => Keyword::Int,
            "hyper" => Keyword::Hyper,
            "float" => Keyword::Float,
            "double" => Keyword::Double,
            "bool" => Keyword::Bool,
            "namespace" => Keyword::Namespace,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Typedef => "typedef",
            Keyword::Enum => "enum",
            Keyword::Struct => "struct",
            Keyword::Union => "union",
            Keyword::Switch => "switch",
            Keyword::Case => "case",
            Keyword::Default => "default",
            Keyword::Void => "void",
            Keyword::Const => "const",
            Keyword::Opaque => "opaque",
            Keyword::String => "string",
            Keyword::Unsigned => "unsigned",
            Keyword::Int => "int",
            Keyword::Hyper => "hyper",
            Keyword::Float => "float",
            Keyword::Double => "double",
            Keyword::Bool => "bool",
            Keyword::Namespace => "namespace",
        }
    }
}

/// Broad token classes, used when reporting what the parser ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    Keyword,
    Identifier,
    Number,
    Symbol,
    EndOfStream,
}

// The core token definition for the XDR language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Keyword(Keyword),
    /// Type, field, constant or enum value name.
    Identifier(String),
    /// Decimal or hexadecimal integer literal, sign included.
    Number(i64),
    OpenBrace,    // {
    CloseBrace,   // }
    OpenBracket,  // [
    CloseBracket, // ]
    OpenAngle,    // <
    CloseAngle,   // >
    OpenParen,    // (
    CloseParen,   // )
    Semicolon,    // ;
    Colon,        // :
    Comma,        // ,
    Assign,       // =
    Star,         // *
    /// End of File
    Eof,
}

impl TokenKind {
    pub fn category(&self) -> TokenCategory {
        match self {
            TokenKind::Keyword(_) => TokenCategory::Keyword,
            TokenKind::Identifier(_) => TokenCategory::Identifier,
            TokenKind::Number(_) => TokenCategory::Number,
            TokenKind::Eof => TokenCategory::EndOfStream,
            _ => TokenCategory::Symbol,
        }
    }

    fn symbol(c: char) -> Option<TokenKind> {
        let kind = match c {
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            '[' => TokenKind::OpenBracket,
            ']' => TokenKind::CloseBracket,
            '<' => TokenKind::OpenAngle,
            '>' => TokenKind::CloseAngle,
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '=' => TokenKind::Assign,
            '*' => TokenKind::Star,
            _ => return None,
        };
        Some(kind)
    }
}

// A full token, including its kind, literal text and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
    pub span: Span,
}

impl Token {
    /// Human readable description used in diagnostics, e.g. `symbol '{'`.
    pub fn describe(&self) -> String {
        match self.kind.category() {
            TokenCategory::Keyword => format!("keyword '{}'", self.text),
            TokenCategory::Identifier => format!("identifier '{}'", self.text),
            TokenCategory::Number => format!("number '{}'", self.text),
            TokenCategory::Symbol => format!("symbol '{}'", self.text),
            TokenCategory::EndOfStream => "end of input".to_string(),
        }
    }
}

/// Errors raised while tokenizing. Tokenizing stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    #[error("{file}:{position}: unrecognized character '{found}'")]
    UnrecognizedCharacter {
        file: String,
        position: Position,
        found: char,
    },
    #[error("{file}:{position}: unterminated block comment")]
    UnterminatedComment { file: String, position: Position },
    #[error("{file}:{position}: invalid hexadecimal literal '{literal}'")]
    InvalidHexLiteral {
        file: String,
        position: Position,
        literal: String,
    },
    #[error("{file}:{position}: integer literal '{literal}' does not fit in 64 bits")]
    IntegerOutOfRange {
        file: String,
        position: Position,
        literal: String,
    },
}

impl LexError {
    pub fn file(&self) -> &str {
        match self {
            LexError::UnrecognizedCharacter { file, .. }
            | LexError::UnterminatedComment { file, .. }
            | LexError::InvalidHexLiteral { file, .. }
            | LexError::IntegerOutOfRange { file, .. } => file,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            LexError::UnrecognizedCharacter { position, .. }
            | LexError::UnterminatedComment { position, .. }
            | LexError::InvalidHexLiteral { position, .. }
            | LexError::IntegerOutOfRange { position, .. } => *position,
        }
    }
}

/// Converts XDR source text into tokens. Comments, whitespace and `%`
/// preprocessor lines produce no tokens.
pub struct Lexer<'a> {
    source: &'a str,
    file: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    /// Creates a new Lexer from the input source string.
    pub fn new(source: &'a str, file: &'a str) -> Self {
        Lexer {
            source,
            file,
            pos: 0,
            line: 1,
            column: 1,
            finished: false,
        }
    }

    fn current_position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    /// Peeks at the next character without consuming it.
    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    /// Advances the internal position and consumes the current character.
    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Whether only whitespace precedes the current character on its line.
    fn at_line_start(&self) -> bool {
        let before = &self.source[..self.pos];
        before[before.rfind('\n').map_or(0, |i| i + 1)..]
            .trim()
            .is_empty()
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                break;
            }
        }
    }

    /// Skips whitespace, comments and preprocessor lines.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek() {
            match c {
                c if c.is_ascii_whitespace() => {
                    self.advance();
                }
                '/' if self.peek_nth(1) == Some('/') => self.skip_line(),
                '/' if self.peek_nth(1) == Some('*') => self.skip_block_comment()?,
                '%' if self.at_line_start() => self.skip_line(),
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start = self.current_position();
        self.advance();
        self.advance();
        while let Some(c) = self.advance() {
            if c == '*' && self.peek() == Some('/') {
                self.advance();
                return Ok(());
            }
        }
        Err(LexError::UnterminatedComment {
            file: self.file.to_string(),
            position: start,
        })
    }

    /// Parses an identifier or keyword.
    fn take_identifier(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let word = &self.source[start..self.pos];
        match Keyword::lookup(word) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Identifier(word.to_string()),
        }
    }

    /// Parses a decimal or `0x` hexadecimal literal with an optional leading minus.
    fn take_number(&mut self, position: Position) -> Result<TokenKind, LexError> {
        let start = self.pos;
        let negative = self.peek() == Some('-');
        if negative {
            self.advance();
        }

        let is_hex = self.peek() == Some('0') && matches!(self.peek_nth(1), Some('x' | 'X'));
        let magnitude = if is_hex {
            self.advance();
            self.advance();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let digits = &self.source[digits_start..self.pos];
            if digits.is_empty() {
                return Err(LexError::InvalidHexLiteral {
                    file: self.file.to_string(),
                    position,
                    literal: self.source[start..self.pos].to_string(),
                });
            }
            u64::from_str_radix(digits, 16).ok()
        } else {
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
            self.source[digits_start..self.pos].parse::<u64>().ok()
        };

        let literal = &self.source[start..self.pos];
        let value = magnitude
            .map(i128::from)
            .map(|m| if negative { -m } else { m })
            .and_then(|v| i64::try_from(v).ok());

        match value {
            Some(value) => Ok(TokenKind::Number(value)),
            None => Err(LexError::IntegerOutOfRange {
                file: self.file.to_string(),
                position,
                literal: literal.to_string(),
            }),
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;

        let start = self.pos;
        let position = self.current_position();
        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.take_identifier(),
            Some(c) if c.is_ascii_digit() => self.take_number(position)?,
            Some('-') if self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.take_number(position)?
            }
            Some(c) => match TokenKind::symbol(c) {
                Some(kind) => {
                    self.advance();
                    kind
                }
                None => {
                    return Err(LexError::UnrecognizedCharacter {
                        file: self.file.to_string(),
                        position,
                        found: c,
                    });
                }
            },
        };

        Ok(Token {
            kind,
            text: self.source[start..self.pos].to_string(),
            position,
            span: Span {
                start,
                end: self.pos,
            },
        })
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    /// Yields tokens up to and including a single `Eof`, or stops after the
    /// first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let result = self.next_token();
        match &result {
            Ok(token) if token.kind == TokenKind::Eof => self.finished = true,
            Err(_) => self.finished = true,
            Ok(_) => {}
        }
        Some(result)
    }
}

/// Tokenizes a complete source text. The returned sequence always ends with
/// an `Eof` token.
pub fn tokenize(source: &str, file: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source, file).collect()
}

/// Renders the lines leading up to `token` with a caret marker underneath it.
pub fn display_token_in_context(source: &str, token: &Token) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() || token.position.line == 0 {
        return String::new();
    }
    let line_index = (token.position.line - 1).min(lines.len() - 1);
    let first = line_index.saturating_sub(3);

    let mut result = lines[first..=line_index].join("\n");
    let width = token.text.chars().count().max(1);
    let padding = " ".repeat(token.position.column.saturating_sub(1));
    result.push('\n');
    result.push_str(&padding);
    result.push_str(&"^".repeat(width).red().to_string());
    result
}
