use crate::{lexer::LexError, merger::MergeError, parser::ParseError, resolver::ResolveError};

/// Any fatal failure of a pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Merge(#[from] MergeError),
}
