use std::{fmt, mem};

use colored::Colorize;
use tracing::{debug, warn};

use crate::{
    ast::{
        CaseLabel, Constant, Definition, Discriminant, DiscriminantType, EnumDef, EnumValue,
        EnumValueSource, Field, FieldShape, FieldType, File, Primitive, Size, StructDef, Typedef,
        UnionCase, UnionDef,
    },
    error::Error,
    lexer::{self, Keyword, Position, Token, TokenKind},
};

/// Recursive descent parser turning a token sequence into a [`File`].
///
/// Parsing stops at the first error; no partial AST is returned.
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: Option<&'a str>,
    file: File,
}

impl<'a> Parser<'a> {
    /// Creates a parser over `tokens`, appending an `Eof` if the sequence lacks one.
    pub fn new(mut tokens: Vec<Token>, filename: &str) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let (position, span) = tokens
                .last()
                .map(|t| (t.position, t.span))
                .unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                position,
                span,
            });
        }
        Parser {
            tokens,
            pos: 0,
            source: None,
            file: File::new(filename),
        }
    }

    /// Attaches the source text so errors can quote the offending line.
    pub fn with_source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self, offset: usize) -> &TokenKind {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].kind
    }

    fn line(&self) -> usize {
        self.current().position.line
    }

    /// Advances the parser to the next token. Never moves past `Eof`.
    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        *self.kind() == TokenKind::Keyword(keyword)
    }

    /// Builds an error pointing at the current token.
    fn error(&self, expected: impl Into<String>) -> ParseError {
        self.error_at(self.current(), expected, self.current().describe())
    }

    fn error_at(&self, token: &Token, expected: impl Into<String>, found: String) -> ParseError {
        ParseError {
            file: self.file.filename.clone(),
            position: token.position,
            expected: expected.into(),
            found,
            context: self
                .source
                .map(|source| lexer::display_token_in_context(source, token)),
        }
    }

    /// Checks if the current token matches an expected kind, consumes it, and advances.
    fn consume(&mut self, expected: TokenKind, describe: &str) -> Result<(), ParseError> {
        if *self.kind() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(describe))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<(), ParseError> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("keyword '{}'", keyword.as_str())))
        }
    }

    /// Helper to consume an Identifier and return its string value.
    fn consume_identifier(&mut self) -> Result<String, ParseError> {
        let name = match self.kind() {
            TokenKind::Identifier(id) => id.clone(),
            _ => return Err(self.error("an identifier")),
        };
        self.advance();
        Ok(name)
    }

    fn parse_number(&mut self) -> Result<i64, ParseError> {
        let value = match self.kind() {
            TokenKind::Number(value) => *value,
            _ => return Err(self.error("a number")),
        };
        self.advance();
        Ok(value)
    }

    /// Parses an array bound or string length: a non-negative literal or a constant name.
    fn parse_size(&mut self) -> Result<Size, ParseError> {
        let size = match self.kind() {
            TokenKind::Number(value) => match u64::try_from(*value) {
                Ok(size) => Size::Literal(size),
                Err(_) => return Err(self.error("a non-negative size")),
            },
            TokenKind::Identifier(name) => Size::Named(name.clone()),
            _ => return Err(self.error("a size (number or constant name)")),
        };
        self.advance();
        Ok(size)
    }

    /// Adds a definition to the file. A repeated name of the same kind is
    /// kept and logged; see [`File::duplicate_names`].
    fn register(&mut self, def: Definition, at: &Token) {
        let duplicate = self
            .file
            .definitions
            .iter()
            .any(|d| mem::discriminant(d) == mem::discriminant(&def) && d.name() == def.name());
        if duplicate {
            warn!(
                file = %self.file.filename,
                line = at.position.line,
                name = def.name(),
                "Duplicate definition."
            );
        }
        self.file.definitions.push(def);
    }

    // --- Core Parsing Functions ---

    /// Parses the whole token sequence.
    ///
    /// Grammar: an optional `namespace NAME {` header, then constants,
    /// typedefs, enums, structs and unions until end of input or the brace
    /// closing the namespace.
    pub fn parse_file(mut self) -> Result<File, ParseError> {
        let mut in_namespace = false;
        if self.check_keyword(Keyword::Namespace) {
            self.advance();
            let name = self.consume_identifier()?;
            self.consume(TokenKind::OpenBrace, "symbol '{'")?;
            self.file.namespace = Some(name);
            in_namespace = true;
        }

        loop {
            let start = self.current().clone();
            let def = match &start.kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon => {
                    self.advance();
                    continue;
                }
                TokenKind::CloseBrace if in_namespace => {
                    self.advance();
                    if *self.kind() == TokenKind::Semicolon {
                        self.advance();
                    }
                    break;
                }
                TokenKind::Keyword(Keyword::Const) => Definition::Constant(self.parse_const()?),
                TokenKind::Keyword(Keyword::Typedef) => Definition::Typedef(self.parse_typedef()?),
                TokenKind::Keyword(Keyword::Enum) => Definition::Enum(self.parse_enum()?),
                TokenKind::Keyword(Keyword::Struct) => Definition::Struct(self.parse_struct()?),
                TokenKind::Keyword(Keyword::Union) => Definition::Union(self.parse_union()?),
                _ => {
                    return Err(
                        self.error("'const', 'typedef', 'enum', 'struct' or 'union'")
                    );
                }
            };
            self.register(def, &start);
        }

        debug!(
            file = %self.file.filename,
            definitions = self.file.definitions.len(),
            "Parsed XDR file."
        );
        Ok(self.file)
    }

    /// `const NAME = NUMBER;`
    fn parse_const(&mut self) -> Result<Constant, ParseError> {
        let line = self.line();
        self.consume_keyword(Keyword::Const)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::Assign, "symbol '='")?;
        let value = self.parse_number()?;
        self.consume(TokenKind::Semicolon, "symbol ';'")?;
        Ok(Constant { name, value, line })
    }

    // --- Type Parsing ---

    /// Parses a type reference, normalising the primitive spellings.
    fn parse_type_name(&mut self) -> Result<String, ParseError> {
        let primitive = match self.kind() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                return Ok(name);
            }
            TokenKind::Keyword(Keyword::Unsigned) => {
                self.advance();
                match self.kind() {
                    TokenKind::Keyword(Keyword::Int) => Primitive::Uint32,
                    TokenKind::Keyword(Keyword::Hyper) => Primitive::Uint64,
                    _ => return Err(self.error("'int' or 'hyper' after 'unsigned'")),
                }
            }
            TokenKind::Keyword(Keyword::Int) => Primitive::Int32,
            TokenKind::Keyword(Keyword::Hyper) => Primitive::Int64,
            TokenKind::Keyword(Keyword::Float) => Primitive::Float,
            TokenKind::Keyword(Keyword::Double) => Primitive::Double,
            TokenKind::Keyword(Keyword::Bool) => Primitive::Bool,
            TokenKind::Keyword(Keyword::String) => Primitive::String,
            TokenKind::Keyword(Keyword::Opaque) => Primitive::Opaque,
            _ => return Err(self.error("a type name")),
        };
        self.advance();
        Ok(primitive.as_str().to_string())
    }

    /// Parses an optional `[N]`, `<N>` or `<>` suffix after a declared name.
    fn parse_shape_suffix(&mut self, type_name: &str) -> Result<FieldShape, ParseError> {
        match self.kind() {
            TokenKind::OpenBracket => {
                self.advance();
                let size = self.parse_size()?;
                self.consume(TokenKind::CloseBracket, "symbol ']'")?;
                Ok(FieldShape::FixedArray(size))
            }
            TokenKind::OpenAngle => {
                self.advance();
                let size = if *self.kind() == TokenKind::CloseAngle {
                    None
                } else {
                    Some(self.parse_size()?)
                };
                self.consume(TokenKind::CloseAngle, "symbol '>'")?;
                if type_name == Primitive::String.as_str() {
                    Ok(FieldShape::BoundedString(size))
                } else {
                    Ok(FieldShape::VariableArray(size))
                }
            }
            _ => Ok(FieldShape::Plain),
        }
    }

    /// `typedef TYPE [*] NAME [suffix];`
    fn parse_typedef(&mut self) -> Result<Typedef, ParseError> {
        let line = self.line();
        self.consume_keyword(Keyword::Typedef)?;
        let underlying = self.parse_type_name()?;

        let optional = *self.kind() == TokenKind::Star;
        if optional {
            self.advance();
        }
        let name = self.consume_identifier()?;
        let shape = if optional {
            FieldShape::Optional
        } else {
            self.parse_shape_suffix(&underlying)?
        };
        self.consume(TokenKind::Semicolon, "symbol ';'")?;

        Ok(Typedef {
            name,
            underlying,
            shape,
            line,
        })
    }

    // --- Enum Parsing ---

    /// Parses an enum definition. Values are literals or references to
    /// other constants and enum values, resolved later.
    fn parse_enum(&mut self) -> Result<EnumDef, ParseError> {
        let line = self.line();
        self.consume_keyword(Keyword::Enum)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::OpenBrace, "symbol '{'")?;

        let mut values = Vec::new();
        while *self.kind() != TokenKind::CloseBrace {
            let value_line = self.line();
            let value_name = self.consume_identifier()?;
            self.consume(TokenKind::Assign, "symbol '='")?;

            let source = match self.kind() {
                TokenKind::Number(v) => EnumValueSource::Literal(*v),
                TokenKind::Identifier(symbol) => EnumValueSource::Reference {
                    symbol: symbol.clone(),
                    resolved: None,
                },
                _ => return Err(self.error("a number or a constant name")),
            };
            self.advance();

            values.push(EnumValue {
                name: value_name,
                source,
                line: value_line,
            });

            // Comma is optional before the closing brace
            if *self.kind() == TokenKind::Comma {
                self.advance();
            }
        }

        self.consume(TokenKind::CloseBrace, "symbol '}'")?;
        self.consume(TokenKind::Semicolon, "symbol ';'")?;
        Ok(EnumDef { name, values, line })
    }

    // --- Struct and Union Parsing ---

    fn parse_struct(&mut self) -> Result<StructDef, ParseError> {
        let line = self.line();
        self.consume_keyword(Keyword::Struct)?;
        let name = self.consume_identifier()?;
        self.consume(TokenKind::OpenBrace, "symbol '{'")?;
        let fields = self.parse_struct_body(&name)?;
        self.consume(TokenKind::CloseBrace, "symbol '}'")?;
        self.consume(TokenKind::Semicolon, "symbol ';'")?;
        Ok(StructDef { name, fields, line })
    }

    /// Parses fields up to (not including) the closing brace.
    fn parse_struct_body(&mut self, parent: &str) -> Result<Vec<Field>, ParseError> {
        let mut fields = Vec::new();
        while *self.kind() != TokenKind::CloseBrace {
            if *self.kind() == TokenKind::Eof {
                return Err(self.error("a field or symbol '}'"));
            }
            fields.push(self.parse_field(parent)?);
        }
        Ok(fields)
    }

    fn parse_union(&mut self) -> Result<UnionDef, ParseError> {
        let line = self.line();
        self.consume_keyword(Keyword::Union)?;
        let name = self.consume_identifier()?;
        let discriminant = self.parse_discriminant()?;
        self.consume(TokenKind::OpenBrace, "symbol '{'")?;
        let cases = self.parse_union_cases(&name)?;
        self.consume(TokenKind::CloseBrace, "symbol '}'")?;
        self.consume(TokenKind::Semicolon, "symbol ';'")?;
        Ok(UnionDef {
            name,
            discriminant,
            cases,
            line,
        })
    }

    /// `switch (TYPE NAME)`
    fn parse_discriminant(&mut self) -> Result<Discriminant, ParseError> {
        self.consume_keyword(Keyword::Switch)?;
        self.consume(TokenKind::OpenParen, "symbol '('")?;
        let ty = match self.kind() {
            TokenKind::Keyword(Keyword::Int) => {
                self.advance();
                DiscriminantType::Int
            }
            TokenKind::Keyword(Keyword::Unsigned) => {
                self.advance();
                self.consume_keyword(Keyword::Int)?;
                DiscriminantType::UnsignedInt
            }
            TokenKind::Keyword(Keyword::Bool) => {
                self.advance();
                DiscriminantType::Bool
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                DiscriminantType::Named(name)
            }
            _ => return Err(self.error("a discriminant type ('int' or an enum name)")),
        };
        let name = self.consume_identifier()?;
        self.consume(TokenKind::CloseParen, "symbol ')'")?;
        Ok(Discriminant { name, ty })
    }

    fn parse_union_cases(&mut self, parent: &str) -> Result<Vec<UnionCase>, ParseError> {
        let mut cases = Vec::new();
        while *self.kind() != TokenKind::CloseBrace {
            cases.push(self.parse_union_case(parent)?);
        }
        Ok(cases)
    }

    /// One arm: one or more `case X:` / `default:` labels, then a field or `void;`.
    fn parse_union_case(&mut self, parent: &str) -> Result<UnionCase, ParseError> {
        let line = self.line();
        let mut labels = Vec::new();
        loop {
            match self.kind() {
                TokenKind::Keyword(Keyword::Default) => {
                    self.advance();
                    labels.push(CaseLabel::Default);
                }
                TokenKind::Keyword(Keyword::Case) => {
                    self.advance();
                    let label = match self.kind() {
                        TokenKind::Number(v) => CaseLabel::Literal(*v),
                        TokenKind::Identifier(name) => CaseLabel::Named(name.clone()),
                        _ => return Err(self.error("a case value")),
                    };
                    self.advance();
                    labels.push(label);
                }
                _ => break,
            }
            self.consume(TokenKind::Colon, "symbol ':'")?;
        }
        if labels.is_empty() {
            return Err(self.error("'case' or 'default'"));
        }

        let field = if self.check_keyword(Keyword::Void) {
            self.advance();
            self.consume(TokenKind::Semicolon, "symbol ';'")?;
            None
        } else {
            Some(self.parse_field(parent)?)
        };

        Ok(UnionCase {
            labels,
            field,
            line,
        })
    }

    /// Parses a struct field or union arm declaration:
    ///
    /// - `T name;`, `T* name;`, `T name[N];`, `T name<N>;`, `T name<>;`
    /// - `struct { ... } name;`
    /// - `union switch (T v) { ... } name;`
    fn parse_field(&mut self, parent: &str) -> Result<Field, ParseError> {
        if self.check_keyword(Keyword::Struct) && *self.peek_kind(1) == TokenKind::OpenBrace {
            return self.parse_inline_struct_field(parent);
        }
        if self.check_keyword(Keyword::Union) {
            return self.parse_inline_union_field(parent);
        }

        let line = self.line();
        let type_name = self.parse_type_name()?;
        let optional = *self.kind() == TokenKind::Star;
        if optional {
            self.advance();
        }
        let name = self.consume_identifier()?;
        let shape = if optional {
            FieldShape::Optional
        } else {
            self.parse_shape_suffix(&type_name)?
        };
        self.consume(TokenKind::Semicolon, "symbol ';'")?;

        Ok(Field {
            name,
            ty: FieldType::Named(type_name),
            shape,
            line,
        })
    }

    /// Reads the field name that follows an inline body without consuming
    /// anything. Must be called just after the body's opening brace.
    fn peek_inline_field_name(&mut self) -> Result<String, ParseError> {
        let body_start = self.pos;
        let mut depth = 1usize;
        while depth > 0 {
            match self.kind() {
                TokenKind::OpenBrace => depth += 1,
                TokenKind::CloseBrace => depth -= 1,
                TokenKind::Eof => return Err(self.error("symbol '}' closing the inline body")),
                _ => {}
            }
            self.advance();
        }
        let name = self.consume_identifier();
        self.pos = body_start;
        name
    }

    /// `struct { fields } name [suffix];`, promoted to a top-level struct.
    fn parse_inline_struct_field(&mut self, parent: &str) -> Result<Field, ParseError> {
        let start = self.current().clone();
        self.consume_keyword(Keyword::Struct)?;
        self.consume(TokenKind::OpenBrace, "symbol '{'")?;

        let field_name = self.peek_inline_field_name()?;
        let struct_name = synthesized_name(parent, &field_name);

        let fields = self.parse_struct_body(&struct_name)?;
        self.consume(TokenKind::CloseBrace, "symbol '}'")?;
        self.consume_identifier()?;
        let shape = self.parse_shape_suffix(&struct_name)?;
        self.consume(TokenKind::Semicolon, "symbol ';'")?;

        let def = StructDef {
            name: struct_name,
            fields,
            line: start.position.line,
        };
        debug!(parent, name = %def.name, "Promoted inline struct.");
        self.register(Definition::Struct(def.clone()), &start);

        Ok(Field {
            name: field_name,
            ty: FieldType::InlineStruct(def),
            shape,
            line: start.position.line,
        })
    }

    /// `union switch (T v) { cases } name [suffix];`, promoted to a top-level union.
    fn parse_inline_union_field(&mut self, parent: &str) -> Result<Field, ParseError> {
        let start = self.current().clone();
        self.consume_keyword(Keyword::Union)?;
        let discriminant = self.parse_discriminant()?;
        self.consume(TokenKind::OpenBrace, "symbol '{'")?;

        let field_name = self.peek_inline_field_name()?;
        let union_name = synthesized_name(parent, &field_name);

        let cases = self.parse_union_cases(&union_name)?;
        self.consume(TokenKind::CloseBrace, "symbol '}'")?;
        self.consume_identifier()?;
        let shape = self.parse_shape_suffix(&union_name)?;
        self.consume(TokenKind::Semicolon, "symbol ';'")?;

        let def = UnionDef {
            name: union_name,
            discriminant,
            cases,
            line: start.position.line,
        };
        debug!(parent, name = %def.name, "Promoted inline union.");
        self.register(Definition::Union(def.clone()), &start);

        Ok(Field {
            name: field_name,
            ty: FieldType::InlineUnion(def),
            shape,
            line: start.position.line,
        })
    }
}

/// Name of an inline type: the enclosing type name followed by the field
/// name with its first letter upper-cased, e.g. `SorobanTransactionData` +
/// `ext` gives `SorobanTransactionDataExt`.
pub fn synthesized_name(parent: &str, field_name: &str) -> String {
    let mut chars = field_name.chars();
    match chars.next() {
        Some(first) => format!("{parent}{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => parent.to_string(),
    }
}

/// Parses an already tokenized file.
pub fn parse_tokens(tokens: Vec<Token>, filename: &str) -> Result<File, ParseError> {
    Parser::new(tokens, filename).parse_file()
}

/// Tokenizes and parses one IDL source text.
///
/// Enum references are left unresolved; call [`File::resolve_references`]
/// or [`crate::ast::resolve_enum_values`] afterwards.
pub fn parse(source: &str, filename: &str) -> Result<File, Error> {
    let tokens = lexer::tokenize(source, filename)?;
    let file = Parser::new(tokens, filename)
        .with_source(source)
        .parse_file()?;
    Ok(file)
}

/// A grammar violation. Carries the location, what the parser expected and
/// what it found instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub file: String,
    pub position: Position,
    pub expected: String,
    pub found: String,
    /// Source excerpt with a caret under the offending token, when the
    /// source text was available.
    pub context: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}:{}: expected {}, found {}",
            "error".red(),
            self.file,
            self.position,
            self.expected,
            self.found
        )?;
        if let Some(context) = &self.context {
            write!(f, "\n{context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(source: &str) -> Result<File, ParseError> {
        let tokens = tokenize(source, "test.x").unwrap();
        Parser::new(tokens, "test.x").with_source(source).parse_file()
    }

    #[test]
    fn test_parse_simple_struct() {
        let file = parse_src("struct Pair { int32 a; int32 b; };").unwrap();
        let pair = file.structs().next().unwrap();
        assert_eq!(pair.name, "Pair");
        assert_eq!(pair.fields.len(), 2);
        for (field, name) in pair.fields.iter().zip(["a", "b"]) {
            assert_eq!(field.name, name);
            assert_eq!(field.type_name(), "int32");
            assert_eq!(field.shape, FieldShape::Plain);
        }
    }

    #[test]
    fn test_primitive_spellings_are_normalised() {
        let file = parse_src(
            "struct P { unsigned int a; hyper b; unsigned hyper c; int d; bool e; opaque f[4]; };",
        )
        .unwrap();
        let names: Vec<_> = file.structs().next().unwrap().fields.iter().map(|f| f.type_name().to_string()).collect();
        assert_eq!(names, vec!["uint32", "int64", "uint64", "int32", "bool", "opaque"]);
    }

    #[test]
    fn test_field_shapes() {
        let file = parse_src(
            "struct S { string name<16>; Hash hashes<16>; Hash all<>; int32 fixed[MAX]; Foo* next; string any<>; };",
        )
        .unwrap();
        let fields = &file.structs().next().unwrap().fields;
        assert_eq!(fields[0].max_length(), Some(16));
        assert!(!fields[0].is_array());
        assert_eq!(fields[1].shape, FieldShape::VariableArray(Some(Size::Literal(16))));
        assert!(fields[2].is_unbounded_array());
        assert_eq!(fields[3].shape, FieldShape::FixedArray(Size::Named("MAX".to_string())));
        assert!(fields[4].is_optional());
        assert_eq!(fields[5].shape, FieldShape::BoundedString(None));
    }

    #[test]
    fn test_parse_enum_with_reference_and_hex() {
        let file = parse_src("enum E { A = 0x10, B = A, C = -1 };").unwrap();
        let e = file.enums().next().unwrap();
        assert_eq!(e.values[0].value(), Some(16));
        assert_eq!(e.values[1].reference(), Some("A"));
        assert_eq!(e.values[1].value(), None);
        assert_eq!(e.values[2].value(), Some(-1));
    }

    #[test]
    fn test_parse_const_and_typedefs() {
        let file = parse_src(
            "const MAX = 20; typedef opaque Hash[32]; typedef string string32<32>; typedef AccountID* Sponsor; typedef unsigned hyper TimePoint;",
        )
        .unwrap();
        assert_eq!(file.constants().next().unwrap().value, 20);
        let typedefs: Vec<_> = file.typedefs().collect();
        assert!(typedefs[0].is_opaque());
        assert_eq!(typedefs[0].shape, FieldShape::FixedArray(Size::Literal(32)));
        assert!(typedefs[1].is_string());
        assert_eq!(typedefs[1].shape, FieldShape::BoundedString(Some(Size::Literal(32))));
        assert_eq!(typedefs[2].shape, FieldShape::Optional);
        assert_eq!(typedefs[3].underlying, "uint64");
    }

    #[test]
    fn test_parse_union_with_multi_labels_and_default() {
        let file = parse_src(
            "union Asset switch (AssetType type) {
             case NATIVE: void;
             case A4: case A12: AssetCode code;
             case 7: int32 seven;
             default: void;
             };",
        )
        .unwrap();
        let union = file.unions().next().unwrap();
        assert_eq!(union.discriminant.name, "type");
        assert_eq!(union.discriminant.ty, DiscriminantType::Named("AssetType".to_string()));
        assert_eq!(union.cases.len(), 4);
        assert!(union.cases[0].is_void());
        assert_eq!(
            union.cases[1].labels,
            vec![CaseLabel::Named("A4".to_string()), CaseLabel::Named("A12".to_string())]
        );
        assert_eq!(union.cases[2].labels, vec![CaseLabel::Literal(7)]);
        assert!(union.cases[3].is_default());
    }

    #[test]
    fn test_inline_union_is_promoted() {
        let file = parse_src(
            "struct SorobanTransactionData {
                union switch (int v) { case 0: void; case 1: int32 x; } ext;
                int64 fee;
             };",
        )
        .unwrap();
        let names: Vec<_> = file.definitions.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["SorobanTransactionDataExt", "SorobanTransactionData"]);

        let outer = file.structs().next().unwrap();
        assert_eq!(outer.fields[0].name, "ext");
        assert_eq!(outer.fields[0].type_name(), "SorobanTransactionDataExt");
        assert!(matches!(outer.fields[0].ty, FieldType::InlineUnion(_)));
        assert_eq!(outer.fields[1].name, "fee");

        let ext = file.unions().next().unwrap();
        assert_eq!(ext.discriminant.ty, DiscriminantType::Int);
        assert_eq!(ext.cases.len(), 2);
    }

    #[test]
    fn test_nested_inline_types_use_synthesized_parent() {
        let file = parse_src(
            "union Outer switch (int v) {
             case 0:
                struct {
                    union switch (int w) { case 1: struct { int32 deep; } leaf; } inner;
                } payload;
             };",
        )
        .unwrap();
        let mut names: Vec<_> = file.definitions.iter().map(|d| d.name().to_string()).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "Outer",
                "OuterPayload",
                "OuterPayloadInner",
                "OuterPayloadInnerLeaf",
            ]
        );
        // Innermost types are registered first.
        assert_eq!(file.definitions[0].name(), "OuterPayloadInnerLeaf");
    }

    #[test]
    fn test_namespace_and_stray_semicolons() {
        let file = parse_src("namespace stellar { ; const A = 1; ; struct S { int a; }; };").unwrap();
        assert_eq!(file.namespace.as_deref(), Some("stellar"));
        assert_eq!(file.counts().total(), 2);
    }

    #[test]
    fn test_close_brace_without_namespace_is_an_error() {
        let err = parse_src("const A = 1; }").unwrap_err();
        assert_eq!(err.found, "symbol '}'");
    }

    #[test]
    fn test_error_reports_expected_and_found() {
        let err = parse_src("struct S {\n  int32 a\n};").unwrap_err();
        assert_eq!(err.position, Position { line: 3, column: 1 });
        assert_eq!(err.expected, "symbol ';'");
        assert_eq!(err.found, "symbol '}'");
        assert!(err.context.as_deref().unwrap().contains("int32 a"));
        assert!(err.to_string().contains("test.x:3:1: expected symbol ';', found symbol '}'"));
    }

    #[test]
    fn test_unterminated_inline_body() {
        let err = parse_src("struct S { struct { int a; ").unwrap_err();
        assert_eq!(err.found, "end of input");
    }

    #[test]
    fn test_duplicate_definitions_are_kept() {
        let file = parse_src("struct A { int a; }; struct A { int b; }; const A = 1;").unwrap();
        assert_eq!(file.structs().count(), 2);
        assert_eq!(file.structs().nth(1).unwrap().fields[0].name, "b");
        // Same name across kinds is not a repeat.
        assert_eq!(file.duplicate_names(), vec!["A"]);
        assert!(parse_src("const A = 1; struct A { int a; };").unwrap().duplicate_names().is_empty());
    }

    #[test]
    fn test_missing_eof_is_tolerated() {
        let mut tokens = tokenize("const A = 1;", "t.x").unwrap();
        tokens.pop();
        let file = parse_tokens(tokens, "t.x").unwrap();
        assert_eq!(file.constants().count(), 1);
    }

    #[test]
    fn test_synthesized_name() {
        assert_eq!(synthesized_name("LedgerEntry", "ext"), "LedgerEntryExt");
        assert_eq!(synthesized_name("A", "already"), "AAlready");
    }
}
