//! Rowexpr: a compiled expression engine and batch transforms for record collections.
//!
//! Filter and compute expressions such as `price > 10 and category == 'books'`
//! are compiled once into a postfix instruction sequence and evaluated by a
//! small stack machine against each record of a collection. Batch operators
//! (filter, compute, select, dedupe, sort, rename, limit) are built on top.
//!
//! # Architecture
//! - Value domain and ordered records
//! - Lexer and recursive-descent compiler emitting postfix IR
//! - Immutable, shareable compiled expressions
//! - Stack-machine evaluator with a bounded stack
//! - Batch operators, a thread-safe compile cache and a transform step
//!
//! Evaluation never fails on data: type mismatches and arithmetic domain errors
//! produce null. Only compilation, stack exhaustion and invalid transform
//! descriptions are errors.

mod types;
mod record;
mod lexer;
mod ir;
mod compiler;
mod expr;
mod vm;
mod ops;
mod cache;
mod transform;
mod engine;

pub use types::*;
pub use record::*;
pub use lexer::*;
pub use ir::*;
pub use compiler::*;
pub use expr::*;
pub use vm::*;
pub use ops::*;
pub use cache::*;
pub use transform::*;
pub use engine::*;

use thiserror::Error;

/// Result alias for rowexpr operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Unified error type for rowexpr operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed expression source text.
    #[error("failed to compile expression '{expr}': {reason} (at offset {offset})")]
    Compile {
        expr: String,
        reason: String,
        offset: usize,
    },

    /// The evaluation stack would grow past its limit.
    #[error("evaluation stack overflow: depth {depth} exceeds limit of {limit}")]
    StackOverflow { depth: usize, limit: usize },

    /// A transform step description that cannot be applied.
    #[error("invalid transform: {0}")]
    InvalidTransform(String),
}
