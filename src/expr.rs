//! Expression module: wraps compiled instruction sequences and provides the
//! main evaluation API.
//!
//! This module provides the CompiledExpr type and the `compile` entry point.

use crate::compiler::ExprCompiler;
use crate::ir::{max_stack_depth, Instruction};
use crate::record::Record;
use crate::types::Value;
use crate::vm::{Evaluator, DEFAULT_MAX_STACK_DEPTH};
use crate::{EngineError, Result};
use std::fmt;

/// A compiled expression, ready for evaluation.
///
/// Immutable once built; share it behind an `Arc` to evaluate from several
/// threads at once.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    code: Vec<Instruction>,
    max_depth: usize,
    stack_limit: usize,
}

/// Compiles `source` with the default stack limit.
pub fn compile(source: &str) -> Result<CompiledExpr> {
    CompiledExpr::compile(source)
}

impl CompiledExpr {
    /// Compile an expression with the default stack limit.
    pub fn compile(source: &str) -> Result<Self> {
        Self::compile_with_limit(source, DEFAULT_MAX_STACK_DEPTH)
    }

    /// Compile an expression, rejecting it if evaluating it would need more
    /// than `stack_limit` stack slots.
    pub fn compile_with_limit(source: &str, stack_limit: usize) -> Result<Self> {
        let code = ExprCompiler::compile(source)?;
        let mut expr = Self::from_instructions(source, code);
        expr.stack_limit = stack_limit;
        if expr.max_depth > stack_limit {
            return Err(EngineError::StackOverflow {
                depth: expr.max_depth,
                limit: stack_limit,
            });
        }
        log::debug!(
            "compiled expression '{}' into {} instructions (stack depth {})",
            source,
            expr.code.len(),
            expr.max_depth
        );
        Ok(expr)
    }

    /// Wrap an already-built instruction sequence. No depth check is made;
    /// evaluation runs with the default stack limit.
    pub fn from_instructions(source: impl Into<String>, code: Vec<Instruction>) -> Self {
        let max_depth = max_stack_depth(&code);
        Self {
            source: source.into(),
            code,
            max_depth,
            stack_limit: DEFAULT_MAX_STACK_DEPTH,
        }
    }

    /// Evaluate the expression against a record.
    ///
    /// Never fails on data: ill-typed operations and missing fields produce
    /// null. Running out of stack is fatal and panics; [`CompiledExpr::compile`]
    /// rejects every expression that could.
    pub fn evaluate(&self, record: &Record) -> Value {
        match Evaluator::with_max_depth(self.stack_limit).eval(self, record) {
            Ok(value) => value,
            Err(e) => panic!("{}", e),
        }
    }

    /// Evaluate and coerce the result to a boolean.
    pub fn matches(&self, record: &Record) -> bool {
        self.evaluate(record).is_truthy()
    }

    /// The source text this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_depth
    }

    /// Names of the fields the expression reads, in first-use order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for instr in &self.code {
            if let Instruction::LoadField(name) = instr {
                if !out.contains(&name.as_str()) {
                    out.push(name.as_str());
                }
            }
        }
        out
    }
}

impl fmt::Display for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<expr '{}' ({} ops)>", self.source, self.code.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record::new().with("foo", 42).with("bar", "baz")
    }

    #[test]
    fn test_compiled_expr_evaluate_true() {
        let expr = compile("foo == 42 and bar == 'baz'").unwrap();
        assert_eq!(expr.evaluate(&record()), Value::Boolean(true));
        assert!(expr.matches(&record()));
    }

    #[test]
    fn test_compiled_expr_evaluate_false() {
        let expr = compile("foo == 0").unwrap();
        assert_eq!(expr.evaluate(&record()), Value::Boolean(false));
    }

    #[test]
    fn test_compiled_expr_keeps_source() {
        let expr = compile("foo * 2").unwrap();
        assert_eq!(expr.source(), "foo * 2");
        assert_eq!(expr.instructions().len(), 3);
        assert_eq!(expr.to_string(), "<expr 'foo * 2' (3 ops)>");
    }

    #[test]
    fn test_fields() {
        let expr = compile("a + b > a or c").unwrap();
        assert_eq!(expr.fields(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stack_limit_rejected_at_compile_time() {
        // right-nested additions need one slot per level
        let src = "1 + (1 + (1 + (1 + 1)))";
        assert_eq!(compile(src).unwrap().max_stack_depth(), 5);
        let err = CompiledExpr::compile_with_limit(src, 4).unwrap_err();
        assert_eq!(err, EngineError::StackOverflow { depth: 5, limit: 4 });
    }

    #[test]
    fn test_default_limit_allows_deep_but_bounded_expressions() {
        let depth = DEFAULT_MAX_STACK_DEPTH;
        let src = format!("{}1{}", "1 + (".repeat(depth - 1), ")".repeat(depth - 1));
        assert!(compile(&src).is_ok());
        let src = format!("{}1{}", "1 + (".repeat(depth), ")".repeat(depth));
        assert!(matches!(compile(&src), Err(EngineError::StackOverflow { .. })));
    }

    #[test]
    #[should_panic(expected = "evaluation stack overflow")]
    fn test_evaluate_panics_on_unchecked_overflow() {
        let code = vec![Instruction::LoadLiteral(Value::Integer(1)); DEFAULT_MAX_STACK_DEPTH + 1];
        let expr = CompiledExpr::from_instructions("pathological", code);
        expr.evaluate(&Record::new());
    }
}
