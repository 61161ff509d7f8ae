//! # xdrgen
//!
//! Front end and plumbing for generating Dart bindings from XDR interface definitions.
//! It reads `.x` files into a typed syntax tree, works out which generated files depend
//! on which, and merges freshly generated Dart source with hand-written code kept in the
//! previous version of each file.
//!
//! ## Core Components
//!
//! - **Lexer** (`lexer`): Tokenizes XDR source, skipping comments and preprocessor lines.
//! - **Parser** (`parser`): Consumes tokens to build the AST, naming anonymous inline types after their parent.
//! - **AST** (`ast`): Definitions, fields and enum values, plus cross-file enum value resolution.
//! - **Resolver** (`resolver`): Type and file dependency graphs, cycle detection, ordering and import sets.
//! - **Merger** (`merger`): Preserves custom code sections and helper classes across regeneration.
//! - **Batch** (`batch`): Runs parsing and merging over many files in parallel.
//!
//! ## Usage
//!
//! The typical flow is:
//! 1.  **Parsing**: `parser::parse(source, filename)?` produces a [`ast::File`].
//! 2.  **Resolving**: `DependencyResolver::build_graph` turns the parsed files and a
//!     type-to-file assignment into a [`resolver::DependencyGraph`].
//! 3.  **Merging**: once Dart source has been generated, `Merger::merge` folds the old
//!     file's custom code into it.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//!
//! use xdrgen::merger::Merger;
//! use xdrgen::parser::parse;
//! use xdrgen::resolver::{DependencyResolver, PrefixNaming, ResolverConfig};
//!
//! let source = "
//!     struct Point { int x; int y; };
//!     struct Line { Point a; Point b; };
//! ";
//!
//! // 1. Parse
//! let file = parse(source, "geometry.x")?;
//!
//! // 2. Resolve
//! let assignment: HashMap<String, String> = [
//!     ("XdrPoint".to_string(), "xdr_point.dart".to_string()),
//!     ("XdrLine".to_string(), "xdr_line.dart".to_string()),
//! ]
//! .into_iter()
//! .collect();
//! let resolver = DependencyResolver::new(PrefixNaming::default(), ResolverConfig::default());
//! let graph = resolver.build_graph(&[file], &assignment);
//! assert_eq!(
//!     graph.import_set("xdr_line.dart"),
//!     vec!["xdr_data_io.dart", "xdr_point.dart"]
//! );
//!
//! // 3. Merge
//! let generated = "class XdrPoint {\n}\n";
//! let existing = "class XdrPoint {\n  // CUSTOM_CODE_START\n  int get sum => x + y;\n  // CUSTOM_CODE_END\n}\n";
//! let merged = Merger::default().merge(generated, Some(existing))?;
//! assert!(merged.contains("int get sum => x + y;"));
//! # Ok::<(), xdrgen::Error>(())
//! ```

pub mod ast;
pub mod batch;
pub mod error;
pub mod lexer;
pub mod merger;
pub mod parser;
pub mod resolver;

pub use error::Error;
