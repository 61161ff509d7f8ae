//! Runs the pipeline over many files at once.
//!
//! Files are independent at the parsing and merging stages, so both run in
//! parallel. A failing file is recorded and skipped; it never stops the rest
//! of the batch.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::Path,
};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    ast::{File, UnresolvedReference, resolve_enum_values},
    error::Error,
    merger::{MergeReport, Merger},
    parser,
    resolver::{DependencyGraph, ResolveError},
};

/// A file that could not be processed, and why.
#[derive(Debug)]
pub struct BatchFailure {
    pub file: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
    /// Non-fatal findings across the batch.
    pub warnings: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record<T>(&mut self, file: String, result: Result<T, Error>) -> Option<T> {
        match result {
            Ok(value) => {
                self.succeeded.push(file);
                Some(value)
            }
            Err(error) => {
                warn!(file = %file, %error, "Skipping file.");
                self.failed.push(BatchFailure { file, error });
                None
            }
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} warnings",
            self.succeeded.len(),
            self.failed.len(),
            self.warnings
        )?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.file, failure.error)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ParsedBatch {
    /// Successfully parsed files, in input order, with enum values resolved
    /// across all of them.
    pub files: Vec<File>,
    pub unresolved: Vec<UnresolvedReference>,
    pub report: BatchReport,
}

/// Parses `(filename, source)` pairs in parallel, then resolves enum value
/// references across every file that parsed. Repeated definitions and
/// unresolved references count as warnings.
pub fn parse_all(sources: &[(String, String)]) -> ParsedBatch {
    let results: Vec<(String, Result<File, Error>)> = sources
        .par_iter()
        .map(|(name, text)| (name.clone(), parser::parse(text, name)))
        .collect();

    let mut batch = ParsedBatch::default();
    for (name, result) in results {
        if let Some(file) = batch.report.record(name, result) {
            batch.report.warnings += file.duplicate_names().len();
            batch.files.push(file);
        }
    }

    batch.unresolved = resolve_enum_values(&mut batch.files);
    batch.report.warnings += batch.unresolved.len();
    debug!(report = %batch.report, "Parsed batch.");
    batch
}

#[derive(Debug, Default)]
pub struct MergedBatch {
    /// `(filename, merged text)` for every file that merged.
    pub outputs: Vec<(String, MergeReport)>,
    pub report: BatchReport,
}

/// Merges `(filename, generated text)` pairs in parallel against the files
/// of the same name in `existing_dir`.
pub fn merge_all(merger: &Merger, generated: &[(String, String)], existing_dir: &Path) -> MergedBatch {
    let results: Vec<(String, Result<MergeReport, Error>)> = generated
        .par_iter()
        .map(|(name, text)| {
            let result = merger
                .merge_path(text, &existing_dir.join(name))
                .map_err(Error::from);
            (name.clone(), result)
        })
        .collect();

    let mut batch = MergedBatch::default();
    for (name, result) in results {
        if let Some(merged) = batch.report.record(name.clone(), result) {
            batch.report.warnings += merged.warnings.len();
            batch.outputs.push((name, merged));
        }
    }
    debug!(report = %batch.report, "Merged batch.");
    batch
}

/// Import sets and generation order for the files of a dependency graph.
#[derive(Debug, Default)]
pub struct ImportPlan {
    /// Files that are not part of a cycle, dependencies first.
    pub order: Vec<String>,
    /// Import set of every file in `order`.
    pub imports: BTreeMap<String, Vec<String>>,
    /// Files caught in a dependency cycle.
    pub failed: Vec<BatchFailure>,
}

/// Orders the graph's files and computes their imports. Files in a cycle are
/// reported as failures; the rest are planned as usual.
pub fn plan_imports(graph: &DependencyGraph) -> ImportPlan {
    let mut blocked: BTreeMap<String, ResolveError> = BTreeMap::new();
    for (a, b) in graph.detect_cycles() {
        let error = ResolveError::CircularDependency {
            pairs: vec![(a.clone(), b.clone())],
        };
        block(&mut blocked, &[a, b], &error);
    }

    // Longer cycles only surface once the pairs are out of the way.
    let order = loop {
        let removed: BTreeSet<String> = blocked.keys().cloned().collect();
        let error = match graph.files.without(&removed).topological_order() {
            Ok(order) => break order,
            Err(error) => error,
        };
        let files: Vec<String> = match &error {
            ResolveError::Cycle { cycle } => cycle.clone(),
            ResolveError::CircularDependency { pairs } => pairs
                .iter()
                .flat_map(|(a, b)| [a.clone(), b.clone()])
                .collect(),
        };
        if !block(&mut blocked, &files, &error) {
            break Vec::new();
        }
    };

    let imports = order
        .iter()
        .map(|file| (file.clone(), graph.import_set(file)))
        .collect();
    let failed = blocked
        .into_iter()
        .map(|(file, error)| BatchFailure {
            file,
            error: error.into(),
        })
        .collect();
    ImportPlan {
        order,
        imports,
        failed,
    }
}

/// Marks `files` as failed with `error` unless already marked. Returns
/// whether any file was newly marked.
fn block(blocked: &mut BTreeMap<String, ResolveError>, files: &[String], error: &ResolveError) -> bool {
    let mut progressed = false;
    for file in files {
        if !blocked.contains_key(file) {
            blocked.insert(file.clone(), error.clone());
            progressed = true;
        }
    }
    progressed
}
