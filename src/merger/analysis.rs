//! Structural facts about a target-language source file.
//!
//! Nothing here is persisted; every merge recomputes the analysis from the
//! text it is given.

use std::{path::PathBuf, sync::LazyLock};

use regex::Regex;

use super::{
    MergeConfig, MergeError,
    scanner::{self, Scanner, ScanState, is_ident_byte},
};

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^import\s+['"]([^'"]+)['"][^;]*;?\s*$"#).expect("import pattern is valid")
});

/// Start of the first import or class declaration line.
static FIRST_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:import\s|(?:(?:abstract|base|final|sealed|interface|mixin)\s+)*class\s)")
        .expect("first code pattern is valid")
});

/// `[static] Type name(`, where `Type` may be generic and nullable. Group 1
/// is the type, group 2 the name.
static METHOD_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:static\s+)?([\w$]+(?:<[\w$<>?,\s]*>)?\??)\s+(\w+)\s*\(")
        .expect("method pattern is valid")
});

const NOT_METHOD_NAMES: &[&str] = &["if", "for", "while", "switch", "return", "get", "set", "catch"];
const NOT_TYPE_TOKENS: &[&str] = &[
    "return", "new", "await", "throw", "else", "yield", "case", "in", "is", "as",
];

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("class '{name}' declared at line {line} has no closing brace")]
    UnterminatedClass { name: String, line: usize },
    #[error("custom code section at line {line} is not inside a class body")]
    SectionOutsideClass { line: usize },
    #[error("cannot read '{}': {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Hand-written code between a start and an end marker line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSection {
    pub class_name: String,
    /// The lines strictly between the two marker lines, each newline terminated.
    pub content: String,
    /// Line of the start marker.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    /// Start of the declaration, including modifiers and any doc comment or
    /// annotation lines directly above it.
    pub start: usize,
    pub open_brace: usize,
    pub close_brace: usize,
    /// Line of the `class` keyword.
    pub line: usize,
    pub sections: Vec<CustomSection>,
}

impl ClassInfo {
    /// The whole declaration, from `start` through the closing brace.
    pub fn source<'t>(&self, text: &'t str) -> &'t str {
        &text[self.start..=self.close_brace]
    }

    pub fn body<'t>(&self, text: &'t str) -> &'t str {
        &text[self.open_brace + 1..self.close_brace]
    }

    fn encloses(&self, pos: usize) -> bool {
        self.open_brace < pos && pos < self.close_brace
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceAnalysis {
    /// Text before the first import or class, trimmed.
    pub header: Option<String>,
    pub imports: Vec<String>,
    pub classes: Vec<ClassInfo>,
}

impl SourceAnalysis {
    pub fn class(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Start,
    End,
}

#[derive(Debug, Clone, Copy)]
struct MarkerLine {
    kind: MarkerKind,
    line: usize,
    /// Offset of the first byte of the line.
    start: usize,
    /// Offset just past the line's newline.
    end: usize,
}

fn marker_lines(text: &str, config: &MergeConfig) -> Vec<MarkerLine> {
    let mut markers = Vec::new();
    let mut offset = 0;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        let kind = if line.contains(&config.start_marker) {
            Some(MarkerKind::Start)
        } else if line.contains(&config.end_marker) {
            Some(MarkerKind::End)
        } else {
            None
        };
        if let Some(kind) = kind {
            markers.push(MarkerLine {
                kind,
                line: index + 1,
                start: offset,
                end: offset + line.len(),
            });
        }
        offset += line.len();
    }
    markers
}

/// Checks that start and end markers balance and never nest.
pub fn validate_markers(text: &str, config: &MergeConfig) -> Result<(), MergeError> {
    checked_markers(text, config).map(|_| ())
}

fn checked_markers(text: &str, config: &MergeConfig) -> Result<Vec<MarkerLine>, MergeError> {
    let markers = marker_lines(text, config);
    let starts = markers.iter().filter(|m| m.kind == MarkerKind::Start).count();
    let ends = markers.len() - starts;
    if starts != ends {
        return Err(MergeError::MarkerMismatch { starts, ends });
    }

    let mut open = false;
    for marker in &markers {
        match (marker.kind, open) {
            (MarkerKind::Start, true) => {
                return Err(MergeError::NestedMarker { line: marker.line });
            }
            (MarkerKind::End, false) => {
                return Err(MergeError::UnmatchedEnd { line: marker.line });
            }
            (MarkerKind::Start, false) => open = true,
            (MarkerKind::End, true) => open = false,
        }
    }
    Ok(markers)
}

/// Full analysis of an existing file: markers, header, imports, classes and
/// the custom sections inside each class.
///
/// A custom section that is not inside any class cannot be preserved, so
/// it fails the analysis.
pub fn analyze(text: &str, config: &MergeConfig) -> Result<SourceAnalysis, MergeError> {
    let markers = checked_markers(text, config)?;
    let mut classes = discover_classes(text).map_err(MergeError::ExistingFileAnalysis)?;

    for pair in markers.chunks_exact(2) {
        let (start, end) = (pair[0], pair[1]);
        let Some(class) = classes.iter_mut().find(|c| c.encloses(start.start)) else {
            return Err(MergeError::ExistingFileAnalysis(
                AnalysisError::SectionOutsideClass { line: start.line },
            ));
        };
        class.sections.push(CustomSection {
            class_name: class.name.clone(),
            content: text[start.end..end.start].to_string(),
            line: start.line,
        });
    }

    Ok(SourceAnalysis {
        header: extract_header(text),
        imports: extract_imports(text),
        classes,
    })
}

/// Finds every top-level class declaration and its body.
///
/// Only braces in code count. Mixin applications (`class A = B with C;`)
/// have no body and are skipped.
pub fn discover_classes(text: &str) -> Result<Vec<ClassInfo>, AnalysisError> {
    let mut classes = Vec::new();
    let mut scanner = Scanner::new(text);
    let mut depth = 0usize;
    let mut pending: Option<(String, usize)> = None;

    while let Some((at, byte)) = scanner.next() {
        match byte {
            b'{' if depth == 0 => match pending.take() {
                Some((name, keyword)) => {
                    let line = line_of(text, keyword);
                    let close = scanner::find_matching_brace(text, at)
                        .ok_or_else(|| AnalysisError::UnterminatedClass {
                            name: name.clone(),
                            line,
                        })?;
                    classes.push(ClassInfo {
                        name,
                        start: declaration_start(text, keyword),
                        open_brace: at,
                        close_brace: close,
                        line,
                        sections: Vec::new(),
                    });
                    scanner = Scanner::starting_at(text, close + 1);
                }
                None => depth += 1,
            },
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => pending = None,
            b'c' if depth == 0 && pending.is_none() && is_keyword_at(text, at, "class") => {
                pending = identifier_after(text, at + "class".len()).map(|name| (name, at));
            }
            _ => {}
        }
    }
    Ok(classes)
}

fn is_keyword_at(text: &str, at: usize, keyword: &str) -> bool {
    let bytes = text.as_bytes();
    bytes[at..].starts_with(keyword.as_bytes())
        && (at == 0 || !is_ident_byte(bytes[at - 1]))
        && bytes
            .get(at + keyword.len())
            .is_none_or(|b| !is_ident_byte(*b))
}

fn identifier_after(text: &str, from: usize) -> Option<String> {
    let rest = text[from..].trim_start();
    let len = rest.bytes().take_while(|b| is_ident_byte(*b)).count();
    if len == 0 || rest.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    Some(rest[..len].to_string())
}

fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map_or(0, |i| i + 1)
}

pub(crate) fn line_of(text: &str, pos: usize) -> usize {
    text.as_bytes()[..pos].iter().filter(|b| **b == b'\n').count() + 1
}

/// Line start of the `class` keyword, extended upwards over doc comment and
/// annotation lines.
fn declaration_start(text: &str, keyword: usize) -> usize {
    let mut start = line_start(text, keyword);
    while start > 0 {
        let previous = line_start(text, start - 1);
        let line = text[previous..start].trim();
        if line.starts_with("///") || line.starts_with('@') {
            start = previous;
        } else {
            break;
        }
    }
    start
}

/// Import directives, trimmed, in file order.
pub fn extract_imports(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| IMPORT_LINE.is_match(line))
        .map(str::to_string)
        .collect()
}

/// The quoted target of an import directive.
pub fn import_path(import: &str) -> Option<&str> {
    IMPORT_LINE
        .captures(import.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Module name of an import target, ignoring its path: `package:a/b.dart`
/// and `b.dart` are both `b`.
pub fn module_name(path: &str) -> &str {
    let file = path.rsplit(['/', ':']).next().unwrap_or(path);
    file.strip_suffix(".dart").unwrap_or(file)
}

/// Offset of the first import or class line that is code.
pub fn first_code_offset(text: &str) -> Option<usize> {
    FIRST_CODE
        .find_iter(text)
        .map(|m| m.start())
        .find(|start| scanner::state_at(text, *start) == ScanState::Normal)
}

/// Everything before the first import or class, trimmed; `None` if empty.
pub fn extract_header(text: &str) -> Option<String> {
    let end = first_code_offset(text)?;
    let header = text[..end].trim();
    (!header.is_empty()).then(|| header.to_string())
}

/// Names of the methods declared in a custom section, in order, deduplicated.
pub fn method_names(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in METHOD_SIGNATURE.captures_iter(content) {
        let (Some(whole), Some(ty), Some(name)) = (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };
        if scanner::state_at(content, whole.start()) != ScanState::Normal
            || NOT_TYPE_TOKENS.contains(&ty.as_str().trim_end_matches('?'))
            || NOT_METHOD_NAMES.contains(&name.as_str())
        {
            continue;
        }
        if !names.iter().any(|n| n == name.as_str()) {
            names.push(name.as_str().to_string());
        }
    }
    names
}
