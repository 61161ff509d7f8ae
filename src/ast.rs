use std::{
    collections::{HashMap, HashSet},
    mem,
};

use tracing::{debug, warn};

/// The built-in XDR types, under their normalised spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `int`
    Int32,
    /// `unsigned int`
    Uint32,
    /// `hyper`
    Int64,
    /// `unsigned hyper`
    Uint64,
    Float,
    Double,
    Bool,
    String,
    Opaque,
    Void,
}

impl Primitive {
    /// The name a field or typedef records for this primitive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::Int32 => "int32",
            Primitive::Uint32 => "uint32",
            Primitive::Int64 => "int64",
            Primitive::Uint64 => "uint64",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Bool => "bool",
            Primitive::String => "string",
            Primitive::Opaque => "opaque",
            Primitive::Void => "void",
        }
    }

    /// Recognises both the normalised names and the raw XDR spellings.
    pub fn from_type_name(name: &str) -> Option<Primitive> {
        let primitive = match name {
            "int32" | "int" => Primitive::Int32,
            "uint32" | "unsigned int" => Primitive::Uint32,
            "int64" | "hyper" => Primitive::Int64,
            "uint64" | "unsigned hyper" => Primitive::Uint64,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "bool" => Primitive::Bool,
            "string" => Primitive::String,
            "opaque" => Primitive::Opaque,
            "void" => Primitive::Void,
            _ => return None,
        };
        Some(primitive)
    }
}

/// An array bound or string length: a literal or the name of a constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Size {
    Literal(u64),
    Named(String),
}

/// How a field (or typedef) wraps its base type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldShape {
    /// `T name`
    #[default]
    Plain,
    /// `T* name`
    Optional,
    /// `T name[N]`
    FixedArray(Size),
    /// `T name<N>` or `T name<>` for any `T` other than `string`.
    VariableArray(Option<Size>),
    /// `string name<N>` or `string name<>`. Encoded as a string, never as an array.
    BoundedString(Option<Size>),
}

/// The type a field refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// A primitive or a named type defined elsewhere.
    Named(String),
    /// An anonymous `struct { ... }`, promoted under a synthesized name.
    InlineStruct(StructDef),
    /// An anonymous `union switch (...) { ... }`, promoted under a synthesized name.
    InlineUnion(UnionDef),
}

impl FieldType {
    /// The base type name; for inline types this is the synthesized name.
    pub fn type_name(&self) -> &str {
        match self {
            FieldType::Named(name) => name,
            FieldType::InlineStruct(s) => &s.name,
            FieldType::InlineUnion(u) => &u.name,
        }
    }
}

/// Represents a field within a struct or a union arm.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub shape: FieldShape,
    pub line: usize,
}

impl Field {
    pub fn type_name(&self) -> &str {
        self.ty.type_name()
    }

    pub fn is_optional(&self) -> bool {
        self.shape == FieldShape::Optional
    }

    pub fn is_fixed_array(&self) -> bool {
        matches!(self.shape, FieldShape::FixedArray(_))
    }

    pub fn is_variable_array(&self) -> bool {
        matches!(self.shape, FieldShape::VariableArray(_))
    }

    /// Any kind of array. `string<N>` is not an array.
    pub fn is_array(&self) -> bool {
        self.is_fixed_array() || self.is_variable_array()
    }

    /// Variable array with no bound, `T name<>`.
    pub fn is_unbounded_array(&self) -> bool {
        self.shape == FieldShape::VariableArray(None)
    }

    pub fn array_size(&self) -> Option<&Size> {
        match &self.shape {
            FieldShape::FixedArray(size) => Some(size),
            FieldShape::VariableArray(size) => size.as_ref(),
            _ => None,
        }
    }

    /// Literal bound of a `string<N>` field.
    pub fn max_length(&self) -> Option<u64> {
        match &self.shape {
            FieldShape::BoundedString(Some(Size::Literal(n))) => Some(*n),
            _ => None,
        }
    }
}

/// `const NAME = value;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub name: String,
    pub value: i64,
    pub line: usize,
}

/// `typedef T name;` in all its shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Typedef {
    pub name: String,
    pub underlying: String,
    pub shape: FieldShape,
    pub line: usize,
}

impl Typedef {
    pub fn is_opaque(&self) -> bool {
        self.underlying == Primitive::Opaque.as_str()
    }

    pub fn is_string(&self) -> bool {
        self.underlying == Primitive::String.as_str()
    }
}

/// The value side of `NAME = ...` inside an enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumValueSource {
    Literal(i64),
    /// A symbolic reference, filled in by [`resolve_enum_values`].
    Reference {
        symbol: String,
        resolved: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub source: EnumValueSource,
    pub line: usize,
}

impl EnumValue {
    /// The concrete value, if it is a literal or a resolved reference.
    pub fn value(&self) -> Option<i64> {
        match &self.source {
            EnumValueSource::Literal(v) => Some(*v),
            EnumValueSource::Reference { resolved, .. } => *resolved,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match &self.source {
            EnumValueSource::Literal(_) => None,
            EnumValueSource::Reference { symbol, .. } => Some(symbol),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub values: Vec<EnumValue>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub line: usize,
}

/// The type a union switches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscriminantType {
    Int,
    UnsignedInt,
    Bool,
    /// A named enum type.
    Named(String),
}

impl DiscriminantType {
    pub fn type_name(&self) -> &str {
        match self {
            DiscriminantType::Int => "int",
            DiscriminantType::UnsignedInt => "unsigned int",
            DiscriminantType::Bool => "bool",
            DiscriminantType::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminant {
    pub name: String,
    pub ty: DiscriminantType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseLabel {
    Named(String),
    Literal(i64),
    Default,
}

/// One arm of a union: its labels and an optional payload (`None` is `void`).
#[derive(Debug, Clone, PartialEq)]
pub struct UnionCase {
    pub labels: Vec<CaseLabel>,
    pub field: Option<Field>,
    pub line: usize,
}

impl UnionCase {
    pub fn is_default(&self) -> bool {
        self.labels.contains(&CaseLabel::Default)
    }

    pub fn is_void(&self) -> bool {
        self.field.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionDef {
    pub name: String,
    pub discriminant: Discriminant,
    pub cases: Vec<UnionCase>,
    pub line: usize,
}

/// Represents a top-level definition in an XDR file.
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Constant(Constant),
    Typedef(Typedef),
    Enum(EnumDef),
    Struct(StructDef),
    Union(UnionDef),
}

impl Definition {
    /// Returns the name of the definition.
    pub fn name(&self) -> &str {
        match self {
            Definition::Constant(c) => &c.name,
            Definition::Typedef(t) => &t.name,
            Definition::Enum(e) => &e.name,
            Definition::Struct(s) => &s.name,
            Definition::Union(u) => &u.name,
        }
    }

    /// Whether the definition introduces a type (everything but constants).
    pub fn is_type(&self) -> bool {
        !matches!(self, Definition::Constant(_))
    }
}

/// Number of definitions of each kind in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefinitionCounts {
    pub constants: usize,
    pub typedefs: usize,
    pub enums: usize,
    pub structs: usize,
    pub unions: usize,
}

impl DefinitionCounts {
    pub fn total(&self) -> usize {
        self.constants + self.typedefs + self.enums + self.structs + self.unions
    }
}

/// A parsed XDR file.
///
/// Definitions are kept in source order. Inline structs and unions are
/// promoted into `definitions` as they are parsed, ahead of the definition
/// that encloses them, and are indistinguishable from top-level ones.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct File {
    pub filename: String,
    pub namespace: Option<String>,
    pub definitions: Vec<Definition>,
}

impl File {
    pub fn new(filename: impl Into<String>) -> Self {
        File {
            filename: filename.into(),
            ..File::default()
        }
    }

    pub fn constants(&self) -> impl Iterator<Item = &Constant> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Constant(c) => Some(c),
            _ => None,
        })
    }

    pub fn typedefs(&self) -> impl Iterator<Item = &Typedef> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Typedef(t) => Some(t),
            _ => None,
        })
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumDef> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Enum(e) => Some(e),
            _ => None,
        })
    }

    pub fn enums_mut(&mut self) -> impl Iterator<Item = &mut EnumDef> {
        self.definitions.iter_mut().filter_map(|d| match d {
            Definition::Enum(e) => Some(e),
            _ => None,
        })
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDef> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Struct(s) => Some(s),
            _ => None,
        })
    }

    pub fn unions(&self) -> impl Iterator<Item = &UnionDef> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Union(u) => Some(u),
            _ => None,
        })
    }

    /// Finds a definition of any kind by name.
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    /// Names of every type defined here (constants excluded).
    pub fn type_names(&self) -> Vec<&str> {
        self.definitions
            .iter()
            .filter(|d| d.is_type())
            .map(|d| d.name())
            .collect()
    }

    /// Names defined again under a kind they already had, once per repeat.
    /// Every copy stays in `definitions`.
    pub fn duplicate_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.definitions
            .iter()
            .filter(|d| !seen.insert((mem::discriminant(*d), d.name())))
            .map(|d| d.name())
            .collect()
    }

    pub fn counts(&self) -> DefinitionCounts {
        let mut counts = DefinitionCounts::default();
        for def in &self.definitions {
            match def {
                Definition::Constant(_) => counts.constants += 1,
                Definition::Typedef(_) => counts.typedefs += 1,
                Definition::Enum(_) => counts.enums += 1,
                Definition::Struct(_) => counts.structs += 1,
                Definition::Union(_) => counts.unions += 1,
            }
        }
        counts
    }

    /// Resolves symbolic enum values using only this file's symbols.
    pub fn resolve_references(&mut self) -> Vec<UnresolvedReference> {
        resolve_enum_values(std::slice::from_mut(self))
    }
}

/// An enum value whose symbolic reference could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub file: String,
    pub enum_name: String,
    pub value_name: String,
    pub symbol: String,
    pub line: usize,
}

impl std::fmt::Display for UnresolvedReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {}.{} references unknown symbol '{}'",
            self.file, self.line, self.enum_name, self.value_name, self.symbol
        )
    }
}

/// Fills in every symbolic enum value across `files`.
///
/// The symbol table holds all constants and all enum values with a known
/// value, from every file. Resolution repeats until nothing changes, so a
/// reference to an already resolved reference also resolves. Anything left
/// over stays unresolved and is reported once.
pub fn resolve_enum_values(files: &mut [File]) -> Vec<UnresolvedReference> {
    let mut symbols: HashMap<String, i64> = HashMap::new();
    for file in files.iter() {
        for constant in file.constants() {
            insert_symbol(&mut symbols, &constant.name, constant.value);
        }
        for enum_def in file.enums() {
            for value in &enum_def.values {
                if let EnumValueSource::Literal(v) = value.source {
                    insert_symbol(&mut symbols, &value.name, v);
                }
            }
        }
    }

    loop {
        let mut progress = false;
        for file in files.iter_mut() {
            for enum_def in file.enums_mut() {
                for value in &mut enum_def.values {
                    if let EnumValueSource::Reference { symbol, resolved } = &mut value.source
                        && resolved.is_none()
                        && let Some(v) = symbols.get(symbol.as_str()).copied()
                    {
                        *resolved = Some(v);
                        symbols.entry(value.name.clone()).or_insert(v);
                        progress = true;
                    }
                }
            }
        }
        if !progress {
            break;
        }
    }

    let mut unresolved = Vec::new();
    for file in files.iter() {
        for enum_def in file.enums() {
            for value in &enum_def.values {
                if let EnumValueSource::Reference {
                    symbol,
                    resolved: None,
                } = &value.source
                {
                    let reference = UnresolvedReference {
                        file: file.filename.clone(),
                        enum_name: enum_def.name.clone(),
                        value_name: value.name.clone(),
                        symbol: symbol.clone(),
                        line: value.line,
                    };
                    warn!(%reference, "Unresolved enum value reference.");
                    unresolved.push(reference);
                }
            }
        }
    }
    unresolved
}

fn insert_symbol(symbols: &mut HashMap<String, i64>, name: &str, value: i64) {
    if let Some(existing) = symbols.get(name) {
        if *existing != value {
            debug!(
                symbol = name,
                kept = existing,
                ignored = value,
                "Conflicting symbol definitions, keeping the first."
            );
        }
        return;
    }
    symbols.insert(name.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(name: &str, v: i64) -> EnumValue {
        EnumValue {
            name: name.to_string(),
            source: EnumValueSource::Literal(v),
            line: 1,
        }
    }

    fn reference(name: &str, symbol: &str) -> EnumValue {
        EnumValue {
            name: name.to_string(),
            source: EnumValueSource::Reference {
                symbol: symbol.to_string(),
                resolved: None,
            },
            line: 2,
        }
    }

    fn file_with_enum(filename: &str, name: &str, values: Vec<EnumValue>) -> File {
        let mut file = File::new(filename);
        file.definitions.push(Definition::Enum(EnumDef {
            name: name.to_string(),
            values,
            line: 1,
        }));
        file
    }

    fn field(shape: FieldShape, ty: &str) -> Field {
        Field {
            name: "f".to_string(),
            ty: FieldType::Named(ty.to_string()),
            shape,
            line: 1,
        }
    }

    #[test]
    fn test_primitive_names() {
        assert_eq!(Primitive::from_type_name("int"), Some(Primitive::Int32));
        assert_eq!(Primitive::from_type_name("uint64"), Some(Primitive::Uint64));
        assert_eq!(Primitive::from_type_name("Hash"), None);
        assert_eq!(Primitive::Uint32.as_str(), "uint32");
    }

    #[test]
    fn test_field_shape_helpers() {
        let string = field(FieldShape::BoundedString(Some(Size::Literal(16))), "string");
        assert_eq!(string.max_length(), Some(16));
        assert!(!string.is_array());

        let hashes = field(FieldShape::VariableArray(Some(Size::Literal(16))), "Hash");
        assert!(hashes.is_variable_array());
        assert!(!hashes.is_unbounded_array());
        assert_eq!(hashes.array_size(), Some(&Size::Literal(16)));

        let unbounded = field(FieldShape::VariableArray(None), "Hash");
        assert!(unbounded.is_unbounded_array());

        let fixed = field(FieldShape::FixedArray(Size::Named("MAX".to_string())), "int32");
        assert!(fixed.is_fixed_array() && fixed.is_array());
        assert!(field(FieldShape::Optional, "Foo").is_optional());
    }

    #[test]
    fn test_resolve_across_enums() {
        let mut file = file_with_enum("a.x", "A", vec![literal("X", 5)]);
        file.definitions.push(Definition::Enum(EnumDef {
            name: "B".to_string(),
            values: vec![reference("Y", "X")],
            line: 3,
        }));

        let unresolved = file.resolve_references();
        assert!(unresolved.is_empty());
        let b = file.enums().nth(1).unwrap();
        assert_eq!(b.values[0].value(), Some(5));
    }

    #[test]
    fn test_resolve_across_files_and_constants() {
        let mut consts = File::new("consts.x");
        consts.definitions.push(Definition::Constant(Constant {
            name: "KEY_TYPE".to_string(),
            value: 2,
            line: 1,
        }));
        let other = file_with_enum("keys.x", "PublicKeyType", vec![reference("PK", "KEY_TYPE")]);

        let mut files = vec![consts, other];
        assert!(resolve_enum_values(&mut files).is_empty());
        assert_eq!(files[1].enums().next().unwrap().values[0].value(), Some(2));
    }

    #[test]
    fn test_chained_reference_resolves() {
        let mut file = file_with_enum(
            "a.x",
            "E",
            vec![reference("C", "B"), reference("B", "A"), literal("A", 7)],
        );
        assert!(file.resolve_references().is_empty());
        let values: Vec<_> = file.enums().next().unwrap().values.iter().map(|v| v.value()).collect();
        assert_eq!(values, vec![Some(7), Some(7), Some(7)]);
    }

    #[test]
    fn test_unresolved_reference_is_reported_once() {
        let mut file = file_with_enum("c.x", "C", vec![reference("Z", "UNDEFINED_SYMBOL")]);
        let unresolved = file.resolve_references();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].symbol, "UNDEFINED_SYMBOL");
        assert_eq!(unresolved[0].value_name, "Z");
        assert_eq!(file.enums().next().unwrap().values[0].value(), None);
        assert!(unresolved[0].to_string().contains("unknown symbol 'UNDEFINED_SYMBOL'"));
    }

    #[test]
    fn test_counts_and_type_names() {
        let mut file = file_with_enum("a.x", "E", vec![literal("A", 0)]);
        file.definitions.push(Definition::Constant(Constant {
            name: "MAX".to_string(),
            value: 1,
            line: 1,
        }));
        file.definitions.push(Definition::Struct(StructDef {
            name: "S".to_string(),
            fields: vec![],
            line: 1,
        }));
        let counts = file.counts();
        assert_eq!(counts.enums, 1);
        assert_eq!(counts.constants, 1);
        assert_eq!(counts.structs, 1);
        assert_eq!(counts.total(), 3);
        assert_eq!(file.type_names(), vec!["E", "S"]);
        assert!(file.get("MAX").is_some());
    }
}
