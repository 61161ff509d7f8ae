//! Merges freshly generated source with the previous version of the same
//! file so that hand-written code survives regeneration.
//!
//! Hand-written members live between a start and an end marker comment
//! inside a class body. Whole classes that the generator no longer emits
//! are carried over as well. See [`Merger::merge_report`] for the steps.

pub mod analysis;
pub mod scanner;

use std::{fmt, fs, io, path::Path};

use regex::Regex;
use tracing::{debug, warn};

use self::analysis::{AnalysisError, ClassInfo, CustomSection};

/// Markers, naming convention and layout used by the [`Merger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    /// Prefix generated class names carry; `Foo` in an old file matches
    /// `XdrFoo` in generated code.
    pub class_prefix: String,
    pub start_marker: String,
    pub end_marker: String,
    /// Indentation of class members.
    pub member_indent: String,
    /// Comment line introducing the preserved classes block.
    pub preserved_label: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            class_prefix: "Xdr".to_string(),
            start_marker: "// CUSTOM_CODE_START".to_string(),
            end_marker: "// CUSTOM_CODE_END".to_string(),
            member_indent: "  ".to_string(),
            preserved_label: "// Preserved helper classes (not in XDR spec)".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("mismatched custom code markers: {starts} start markers, {ends} end markers")]
    MarkerMismatch { starts: usize, ends: usize },
    #[error("nested custom code start marker at line {line}; markers cannot be nested")]
    NestedMarker { line: usize },
    #[error("custom code end marker without a matching start at line {line}")]
    UnmatchedEnd { line: usize },
    #[error("failed to analyze existing file, merge aborted to keep custom code: {0}")]
    ExistingFileAnalysis(#[source] AnalysisError),
    #[error("failed to analyze generated code: {0}")]
    GeneratedAnalysis(#[source] AnalysisError),
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Something the merge did on its own that the caller may want to review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeWarning {
    /// A class of the old file is no longer generated and was appended as is,
    /// renamed to the generated naming convention when needed.
    ClassPreserved {
        name: String,
        renamed_to: Option<String>,
    },
    /// A custom section's class was not generated; the section travels with
    /// the preserved class instead.
    SectionTargetMissing { class_name: String, line: usize },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeWarning::ClassPreserved {
                name,
                renamed_to: Some(new_name),
            } => write!(f, "preserved class '{name}' as '{new_name}'"),
            MergeWarning::ClassPreserved {
                name,
                renamed_to: None,
            } => write!(f, "preserved class '{name}'"),
            MergeWarning::SectionTargetMissing { class_name, line } => write!(
                f,
                "class '{class_name}' not generated, custom section at line {line} kept with the preserved class"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub text: String,
    /// Names, as found in the old file, of the classes carried over whole.
    pub preserved_classes: Vec<String>,
    pub warnings: Vec<MergeWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct Merger {
    config: MergeConfig,
}

impl Merger {
    pub fn new(config: MergeConfig) -> Self {
        Merger { config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// [`Merger::merge_report`] without the report.
    pub fn merge(&self, generated: &str, existing: Option<&str>) -> Result<String, MergeError> {
        self.merge_report(generated, existing).map(|report| report.text)
    }

    /// Merges against the file at `path`. A missing file means there is
    /// nothing to preserve; a file that exists but cannot be read aborts.
    pub fn merge_path(&self, generated: &str, path: &Path) -> Result<MergeReport, MergeError> {
        match fs::read_to_string(path) {
            Ok(existing) => self.merge_report(generated, Some(&existing)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.merge_report(generated, None)
            }
            Err(source) => Err(MergeError::ExistingFileAnalysis(
                AnalysisError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                },
            )),
        }
    }

    /// Merges `generated` with the previous version of the file.
    ///
    /// 1. Validate markers and analyze the old file. Any failure aborts.
    /// 2. Match each old class to a generated one, by name or by name with
    ///    the class prefix added.
    /// 3. Splice custom sections into their matched classes, replacing
    ///    generated methods of the same name.
    /// 4. Append unmatched classes whole, renamed to the prefix convention.
    /// 5. Reconcile imports, then restore the old file header.
    ///
    /// Merging an output again against the same old file changes nothing.
    pub fn merge_report(
        &self,
        generated: &str,
        existing: Option<&str>,
    ) -> Result<MergeReport, MergeError> {
        let Some(existing) = existing else {
            return Ok(MergeReport {
                text: generated.to_string(),
                ..MergeReport::default()
            });
        };

        let old = analysis::analyze(existing, &self.config)?;
        let generated_classes =
            analysis::discover_classes(generated).map_err(MergeError::GeneratedAnalysis)?;

        let mut matched: Vec<(&ClassInfo, String)> = Vec::new();
        let mut missing: Vec<&ClassInfo> = Vec::new();
        for class in &old.classes {
            match self.matching_class(&class.name, &generated_classes) {
                Some(target) => matched.push((class, target)),
                None => missing.push(class),
            }
        }

        let mut report = MergeReport {
            text: generated.to_string(),
            ..MergeReport::default()
        };

        for (class, target) in &matched {
            if !class.sections.is_empty() {
                report.text = self.insert_sections(&report.text, target, &class.sections)?;
            }
        }

        for class in &missing {
            for section in &class.sections {
                report.warnings.push(MergeWarning::SectionTargetMissing {
                    class_name: class.name.clone(),
                    line: section.line,
                });
            }
        }

        if !missing.is_empty() {
            report.text = self.preserve_classes(&report.text, existing, &missing, &mut report.warnings)?;
            report.preserved_classes = missing.iter().map(|c| c.name.clone()).collect();
        }

        if !old.imports.is_empty() {
            report.text = merge_imports(&report.text, &old.imports);
        }
        if let Some(header) = &old.header {
            report.text = restore_header(&report.text, header);
        }

        for warning in &report.warnings {
            warn!(%warning, "Merge.");
        }
        debug!(
            spliced = matched.iter().map(|(c, _)| c.sections.len()).sum::<usize>(),
            preserved = report.preserved_classes.len(),
            "Merged file."
        );
        Ok(report)
    }

    /// The generated class an old class corresponds to: same name, or the
    /// name with the class prefix added.
    fn matching_class(&self, name: &str, generated: &[ClassInfo]) -> Option<String> {
        let exists = |candidate: &str| generated.iter().any(|c| c.name == candidate);
        if exists(name) {
            return Some(name.to_string());
        }
        let prefixed = self.prefixed(name)?;
        exists(&prefixed).then_some(prefixed)
    }

    /// `name` with the class prefix, or `None` if it already has it.
    fn prefixed(&self, name: &str) -> Option<String> {
        if name.starts_with(&self.config.class_prefix) {
            None
        } else {
            Some(format!("{}{name}", self.config.class_prefix))
        }
    }

    /// Inserts `sections` before the closing brace of class `target`.
    ///
    /// Skipped when the class already holds a custom section, so merging
    /// twice never duplicates them. Generated methods sharing a name with a
    /// method of a section are removed first.
    fn insert_sections(
        &self,
        text: &str,
        target: &str,
        sections: &[CustomSection],
    ) -> Result<String, MergeError> {
        let Some(class) = find_class(text, target)? else {
            return Ok(text.to_string());
        };
        if class.body(text).contains(&self.config.start_marker) {
            debug!(class = target, "Custom section already present.");
            return Ok(text.to_string());
        }

        let mut body = class.body(text).to_string();
        let mut formatted = String::new();
        for section in sections {
            for method in analysis::method_names(&section.content) {
                if remove_method(&mut body, &method)? {
                    debug!(class = target, method = %method, "Replaced generated method with custom one.");
                }
            }
            formatted.push_str(&self.format_section(&section.content));
        }

        Ok(format!(
            "{}{{{}\n{formatted}{}",
            &text[..class.open_brace],
            body.trim_end(),
            &text[class.close_brace..]
        ))
    }

    /// Marker-wrapped section, reindented to the member indent.
    fn format_section(&self, content: &str) -> String {
        let indent = &self.config.member_indent;
        let common = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.len() - line.trim_start().len())
            .min()
            .unwrap_or(0);

        let mut lines = String::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                lines.push('\n');
            } else {
                lines.push_str(indent);
                lines.push_str(line.get(common..).unwrap_or(line.trim_start()));
                lines.push('\n');
            }
        }
        format!(
            "\n{indent}{}\n{lines}{indent}{}\n",
            self.config.start_marker, self.config.end_marker
        )
    }

    /// Appends the unmatched classes of the old file after the generated code.
    ///
    /// Classes without the prefix get it, and every code reference to them
    /// or to a generated prefixed class is rewritten accordingly. Comments
    /// and strings are left untouched.
    fn preserve_classes(
        &self,
        text: &str,
        existing: &str,
        missing: &[&ClassInfo],
        warnings: &mut Vec<MergeWarning>,
    ) -> Result<String, MergeError> {
        let mut renames: Vec<(String, String)> = Vec::new();
        let mut blocks = Vec::with_capacity(missing.len());
        for class in missing {
            let renamed_to = self.prefixed(&class.name);
            if let Some(new_name) = &renamed_to {
                renames.push((class.name.clone(), new_name.clone()));
            }
            debug!(class = %class.name, renamed_to = ?renamed_to, "Preserving class.");
            warnings.push(MergeWarning::ClassPreserved {
                name: class.name.clone(),
                renamed_to,
            });
            blocks.push(class.source(existing));
        }

        let mut preserved = blocks.join("\n\n");
        for (old_name, new_name) in &renames {
            preserved = rename_identifier(&preserved, old_name, new_name)?;
        }

        let generated_classes =
            analysis::discover_classes(text).map_err(MergeError::GeneratedAnalysis)?;
        for class in &generated_classes {
            let Some(base) = class.name.strip_prefix(&self.config.class_prefix) else {
                continue;
            };
            if base.starts_with(|c: char| c.is_ascii_uppercase()) {
                preserved = rename_identifier(&preserved, base, &class.name)?;
            }
        }

        Ok(format!(
            "{}\n\n{}\n{preserved}\n",
            text.trim_end(),
            self.config.preserved_label
        ))
    }
}

fn find_class(text: &str, name: &str) -> Result<Option<ClassInfo>, MergeError> {
    let classes = analysis::discover_classes(text).map_err(MergeError::GeneratedAnalysis)?;
    Ok(classes.into_iter().find(|c| c.name == name))
}

/// Removes every member-level method `name` from a class body, along with
/// annotation lines directly above it. Both block bodies and `=>` bodies are
/// removed. Returns whether anything was removed.
fn remove_method(body: &mut String, name: &str) -> Result<bool, MergeError> {
    let pattern = Regex::new(&format!(
        r"(?m)(?:^[ \t]*@\w+(?:\([^)]*\))?[ \t]*\n)*^[ \t]*(?:static\s+)?[\w$]+(?:<[\w$<>?,\s]*>)?\??\s+{}\s*\([^)]*\)\s*(?:async\s*)?(?:\{{|=>)",
        regex::escape(name)
    ))?;

    let mut removed = false;
    let mut search_from = 0;
    while let Some(found) = pattern.find_at(body, search_from) {
        let range = found.range();
        let at_member_level = scanner::brace_depth_at(body, range.start) == Some(0);
        let last = if body[..range.end].ends_with('{') {
            scanner::find_matching_brace(body, range.end - 1)
        } else {
            scanner::find_statement_end(body, range.end)
        };
        match last {
            Some(last) if at_member_level => {
                let end = match body[last + 1..].find('\n') {
                    Some(newline) if body[last + 1..last + 1 + newline].trim().is_empty() => {
                        last + 1 + newline + 1
                    }
                    _ => last + 1,
                };
                body.replace_range(range.start..end, "");
                removed = true;
                search_from = range.start;
            }
            _ => search_from = range.end,
        }
    }
    Ok(removed)
}

/// Replaces whole-word occurrences of `old` with `new` in code only.
pub fn rename_identifier(text: &str, old: &str, new: &str) -> Result<String, MergeError> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(old)))?;
    let code = scanner::code_ranges(text);

    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for found in pattern.find_iter(text) {
        let in_code = code
            .iter()
            .any(|range| range.start <= found.start() && found.end() <= range.end);
        if in_code {
            result.push_str(&text[last..found.start()]);
            result.push_str(new);
            last = found.end();
        }
    }
    result.push_str(&text[last..]);
    Ok(result)
}

/// Keeps the old file's imports in their order and appends generated ones
/// whose module is not imported yet under any path.
fn merge_imports(text: &str, existing_imports: &[String]) -> String {
    let kept_modules: Vec<&str> = existing_imports
        .iter()
        .filter_map(|import| analysis::import_path(import))
        .map(analysis::module_name)
        .collect();

    let mut imports: Vec<String> = existing_imports.to_vec();
    for import in analysis::extract_imports(text) {
        let Some(path) = analysis::import_path(&import) else {
            continue;
        };
        let module = analysis::module_name(path);
        if kept_modules.contains(&module) || imports.contains(&import) {
            continue;
        }
        imports.push(import);
    }
    replace_imports(text, &imports)
}

/// Replaces the lines from the first through the last import with
/// `imports`. Without imports they go right before the first class.
fn replace_imports(text: &str, imports: &[String]) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let is_import = |line: &&str| line.trim_start().starts_with("import ");

    let (before, after) = match (
        lines.iter().position(is_import),
        lines.iter().rposition(is_import),
    ) {
        (Some(first), Some(last)) => (&lines[..first], &lines[last + 1..]),
        _ => {
            let Some(offset) = analysis::first_code_offset(text) else {
                return text.to_string();
            };
            let index = analysis::line_of(text, offset) - 1;
            let mut result: Vec<&str> = lines[..index].to_vec();
            result.extend(imports.iter().map(String::as_str));
            result.push("");
            result.extend_from_slice(&lines[index..]);
            return result.join("\n");
        }
    };

    let mut result: Vec<&str> = before.to_vec();
    result.extend(imports.iter().map(String::as_str));
    result.extend_from_slice(after);
    result.join("\n")
}

/// Puts `header` in front of the first import or class, replacing whatever
/// preceded it.
fn restore_header(text: &str, header: &str) -> String {
    match analysis::first_code_offset(text) {
        Some(offset) => format!("{header}\n\n{}", text[offset..].trim_start()),
        None => text.to_string(),
    }
}
