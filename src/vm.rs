//! Expression stack machine
//!
//! Runs a compiled expression against one record in a single left-to-right
//! pass. Field values and literals are borrowed onto the stack; only the
//! results of operations are owned. The stack lives for one call and keeps
//! small expressions off the heap.

use std::borrow::Cow;
use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::expr::CompiledExpr;
use crate::ir::Instruction;
use crate::record::Record;
use crate::types::{Value, NULL};
use crate::{EngineError, Result};

/// Default evaluation stack limit.
pub const DEFAULT_MAX_STACK_DEPTH: usize = 64;

/// Slots held inline before the stack spills to the heap.
const STACK_INLINE_CAPACITY: usize = 16;

type StackValue<'a> = Cow<'a, Value>;
type Stack<'a> = SmallVec<[StackValue<'a>; STACK_INLINE_CAPACITY]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Stack machine for compiled expressions.
///
/// Holds no per-record state, so one evaluator can be reused across records
/// and threads.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    max_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_STACK_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Evaluates `expr` against `record`.
    ///
    /// The only error is [`EngineError::StackOverflow`]; data problems such as
    /// missing fields or bad arithmetic produce null instead.
    pub fn eval(&self, expr: &CompiledExpr, record: &Record) -> Result<Value> {
        let mut stack: Stack<'_> = SmallVec::new();

        for instr in expr.instructions() {
            match instr {
                Instruction::LoadField(name) => {
                    self.push(&mut stack, Cow::Borrowed(record.get_or_null(name)))?;
                }
                Instruction::LoadLiteral(value) => {
                    self.push(&mut stack, Cow::Borrowed(value))?;
                }
                Instruction::CompareEq => self.compare(&mut stack, CompareOp::Eq),
                Instruction::CompareNeq => self.compare(&mut stack, CompareOp::Neq),
                Instruction::CompareLt => self.compare(&mut stack, CompareOp::Lt),
                Instruction::CompareLte => self.compare(&mut stack, CompareOp::Lte),
                Instruction::CompareGt => self.compare(&mut stack, CompareOp::Gt),
                Instruction::CompareGte => self.compare(&mut stack, CompareOp::Gte),
                Instruction::LogicalAnd => {
                    let (a, b) = pop2(&mut stack);
                    stack.push(Cow::Owned(Value::Boolean(a.is_truthy() && b.is_truthy())));
                }
                Instruction::LogicalOr => {
                    let (a, b) = pop2(&mut stack);
                    stack.push(Cow::Owned(Value::Boolean(a.is_truthy() || b.is_truthy())));
                }
                Instruction::LogicalNot => {
                    let a = pop(&mut stack);
                    stack.push(Cow::Owned(Value::Boolean(!a.is_truthy())));
                }
                Instruction::Add => self.arithmetic(&mut stack, ArithmeticOp::Add),
                Instruction::Sub => self.arithmetic(&mut stack, ArithmeticOp::Sub),
                Instruction::Mul => self.arithmetic(&mut stack, ArithmeticOp::Mul),
                Instruction::Div => self.arithmetic(&mut stack, ArithmeticOp::Div),
                Instruction::Mod => self.arithmetic(&mut stack, ArithmeticOp::Mod),
            }
        }

        Ok(stack.pop().map_or(Value::Null, Cow::into_owned))
    }

    #[inline]
    fn push<'a>(&self, stack: &mut Stack<'a>, value: StackValue<'a>) -> Result<()> {
        if stack.len() >= self.max_depth {
            return Err(EngineError::StackOverflow {
                depth: stack.len() + 1,
                limit: self.max_depth,
            });
        }
        stack.push(value);
        Ok(())
    }

    // Binary operators pop two and push one, so they never grow the stack.
    #[inline]
    fn compare(&self, stack: &mut Stack<'_>, op: CompareOp) {
        let (a, b) = pop2(stack);
        stack.push(Cow::Owned(Value::Boolean(compare_values(op, &a, &b))));
    }

    #[inline]
    fn arithmetic(&self, stack: &mut Stack<'_>, op: ArithmeticOp) {
        let (a, b) = pop2(stack);
        stack.push(Cow::Owned(arithmetic(op, &a, &b)));
    }
}

#[inline]
fn pop<'a>(stack: &mut Stack<'a>) -> StackValue<'a> {
    stack.pop().unwrap_or(Cow::Borrowed(&NULL))
}

/// Pops the right operand, then the left; returns `(left, right)`.
#[inline]
fn pop2<'a>(stack: &mut Stack<'a>) -> (StackValue<'a>, StackValue<'a>) {
    let b = pop(stack);
    let a = pop(stack);
    (a, b)
}

fn compare_values(op: CompareOp, a: &Value, b: &Value) -> bool {
    match (a.is_null(), b.is_null()) {
        // only an explicit `None == None` holds; null never orders
        (true, true) => op == CompareOp::Eq,
        (true, false) | (false, true) => false,
        (false, false) => {
            let ord = a.compare(b);
            match op {
                CompareOp::Eq => ord == Some(Ordering::Equal),
                CompareOp::Neq => ord != Some(Ordering::Equal),
                CompareOp::Lt => ord == Some(Ordering::Less),
                CompareOp::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                CompareOp::Gt => ord == Some(Ordering::Greater),
                CompareOp::Gte => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            }
        }
    }
}

fn arithmetic(op: ArithmeticOp, a: &Value, b: &Value) -> Value {
    if op == ArithmeticOp::Div {
        return match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) if y != 0.0 => Value::Float(x / y),
            _ => Value::Null,
        };
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return int_arithmetic(op, x, y).map_or(Value::Null, Value::Integer);
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => float_arithmetic(op, x, y).map_or(Value::Null, Value::Float),
        _ => Value::Null,
    }
}

fn int_arithmetic(op: ArithmeticOp, a: i64, b: i64) -> Option<i64> {
    match op {
        ArithmeticOp::Add => a.checked_add(b),
        ArithmeticOp::Sub => a.checked_sub(b),
        ArithmeticOp::Mul => a.checked_mul(b),
        ArithmeticOp::Mod => {
            if b == 0 {
                return None;
            }
            if b == -1 {
                return Some(0);
            }
            // floored: the result takes the divisor's sign
            let r = a % b;
            Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        }
        ArithmeticOp::Div => None,
    }
}

fn float_arithmetic(op: ArithmeticOp, a: f64, b: f64) -> Option<f64> {
    match op {
        ArithmeticOp::Add => Some(a + b),
        ArithmeticOp::Sub => Some(a - b),
        ArithmeticOp::Mul => Some(a * b),
        ArithmeticOp::Div => (b != 0.0).then(|| a / b),
        ArithmeticOp::Mod => {
            if b == 0.0 {
                return None;
            }
            let r = a % b;
            Some(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;

    fn eval(src: &str, record: &Record) -> Value {
        compile(src).unwrap().evaluate(record)
    }

    fn record() -> Record {
        Record::new()
            .with("a", 7)
            .with("f", 2.5)
            .with("s", "abc")
            .with("empty", "")
            .with("t", true)
            .with("n", Value::Null)
    }

    #[test]
    fn test_missing_field_is_null() {
        assert_eq!(eval("missing", &record()), Value::Null);
        assert_eq!(eval("n", &record()), Value::Null);
    }

    #[test]
    fn test_null_comparisons_are_false() {
        let r = record();
        for src in ["n > 1", "n < 1", "n >= 1", "n <= 1", "n == 1", "n != 1", "1 != missing"] {
            assert_eq!(eval(src, &r), Value::Boolean(false), "{}", src);
        }
        assert_eq!(eval("n == None", &r), Value::Boolean(true));
        assert_eq!(eval("missing == None", &r), Value::Boolean(true));
        assert_eq!(eval("n != None", &r), Value::Boolean(false));
        assert_eq!(eval("n >= None", &r), Value::Boolean(false));
        assert_eq!(eval("a == None", &r), Value::Boolean(false));
        assert_eq!(eval("a != None", &r), Value::Boolean(false));
    }

    #[test]
    fn test_numeric_comparisons_across_kinds() {
        let r = record();
        assert_eq!(eval("a > 5", &r), Value::Boolean(true));
        assert_eq!(eval("a == 7.0", &r), Value::Boolean(true));
        assert_eq!(eval("f < a", &r), Value::Boolean(true));
        assert_eq!(eval("t == 1", &r), Value::Boolean(true));
        assert_eq!(eval("t > False", &r), Value::Boolean(true));
    }

    #[test]
    fn test_text_comparisons() {
        let r = record();
        assert_eq!(eval("s == 'abc'", &r), Value::Boolean(true));
        assert_eq!(eval("s < \"abd\"", &r), Value::Boolean(true));
        assert_eq!(eval("s > 1", &r), Value::Boolean(false));
        assert_eq!(eval("s == 1", &r), Value::Boolean(false));
        assert_eq!(eval("s != 1", &r), Value::Boolean(true));
    }

    #[test]
    fn test_comparison_result_feeds_next_comparison() {
        // (a > 1) > 0 is True > 0
        let r = record();
        assert_eq!(eval("a > 1 > 0", &r), Value::Boolean(true));
        // (a > 10) > -1 is False > -1
        assert_eq!(eval("a > 10 > -1", &r), Value::Boolean(true));
        // mathematically 3 < a < 5 is false, but (3 < a) < 5 is True < 5
        assert_eq!(eval("3 < a < 5", &r), Value::Boolean(true));
    }

    #[test]
    fn test_logical_operators_use_truthiness() {
        let r = record();
        assert_eq!(eval("a and s", &r), Value::Boolean(true));
        assert_eq!(eval("a and empty", &r), Value::Boolean(false));
        assert_eq!(eval("n or 0", &r), Value::Boolean(false));
        assert_eq!(eval("n or f", &r), Value::Boolean(true));
        assert_eq!(eval("not n", &r), Value::Boolean(true));
        assert_eq!(eval("not s", &r), Value::Boolean(false));
        assert_eq!(eval("not 0.0", &r), Value::Boolean(true));
    }

    #[test]
    fn test_integer_arithmetic() {
        let r = record();
        assert_eq!(eval("a + 3", &r), Value::Integer(10));
        assert_eq!(eval("a - 10", &r), Value::Integer(-3));
        assert_eq!(eval("a * 2", &r), Value::Integer(14));
        assert_eq!(eval("a % 3", &r), Value::Integer(1));
        assert_eq!(eval("t + 1", &r), Value::Integer(2));
    }

    #[test]
    fn test_division_is_true_division() {
        let r = record();
        assert_eq!(eval("a / 2", &r), Value::Float(3.5));
        assert_eq!(eval("6 / 3", &r), Value::Float(2.0));
        assert_eq!(eval("f / 0.5", &r), Value::Float(5.0));
    }

    #[test]
    fn test_floored_modulo() {
        let r = Record::new();
        assert_eq!(eval("-7 % 3", &r), Value::Integer(2));
        assert_eq!(eval("7 % -3", &r), Value::Integer(-2));
        assert_eq!(eval("-7 % -3", &r), Value::Integer(-1));
        assert_eq!(eval("-9223372036854775808 % -1", &r), Value::Integer(0));
        assert_eq!(eval("-7.5 % 2", &r), Value::Float(0.5));
    }

    #[test]
    fn test_float_arithmetic() {
        let r = record();
        assert_eq!(eval("f + 1", &r), Value::Float(3.5));
        assert_eq!(eval("f * 2", &r), Value::Float(5.0));
        assert_eq!(eval("1.5 - f", &r), Value::Float(-1.0));
    }

    #[test]
    fn test_bad_arithmetic_yields_null() {
        let r = record();
        for src in [
            "n + 1",
            "missing * 2",
            "s + 1",
            "s + 'x'",
            "a / 0",
            "a % 0",
            "f / 0.0",
            "f % 0",
            "9223372036854775807 + 1",
            "-9223372036854775808 - 1",
            "9223372036854775807 * 2",
        ] {
            assert_eq!(eval(src, &r), Value::Null, "{}", src);
        }
    }

    #[test]
    fn test_null_propagates_through_later_operations() {
        let r = record();
        assert_eq!(eval("(a / 0) + 1", &r), Value::Null);
        assert_eq!(eval("(a / 0) > 1", &r), Value::Boolean(false));
        assert_eq!(eval("not (s * 2)", &r), Value::Boolean(true));
    }

    #[test]
    fn test_literal_results() {
        let r = Record::new();
        assert_eq!(eval("'text'", &r), Value::from("text"));
        assert_eq!(eval("None", &r), Value::Null);
        assert_eq!(eval("-3", &r), Value::Integer(-3));
    }

    #[test]
    fn test_stack_guard() {
        let expr = compile("1 + (2 + (3 + 4))").unwrap();
        let err = Evaluator::with_max_depth(3).eval(&expr, &Record::new()).unwrap_err();
        assert_eq!(err, EngineError::StackOverflow { depth: 4, limit: 3 });
        assert_eq!(
            Evaluator::with_max_depth(4).eval(&expr, &Record::new()).unwrap(),
            Value::Integer(10)
        );
    }

    #[test]
    fn test_empty_program_yields_null() {
        let expr = CompiledExpr::from_instructions("", Vec::new());
        assert_eq!(Evaluator::new().eval(&expr, &Record::new()).unwrap(), Value::Null);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let expr = compile("a * f + 1").unwrap();
        let r = record();
        let first = expr.evaluate(&r);
        for _ in 0..10 {
            assert_eq!(expr.evaluate(&r), first);
        }
        assert_eq!(first, Value::Float(18.5));
    }
}
