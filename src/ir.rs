//! Intermediate Representation (IR) for the expression engine.
//!
//! This module defines the postfix instructions a compiled expression is made of.

use crate::types::Value;
use serde::{Deserialize, Serialize};

/// A single instruction in the expression bytecode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// Push the value of a field onto the stack (null when absent).
    LoadField(String),
    /// Push a literal value onto the stack.
    LoadLiteral(Value),
    /// Comparison operations (pop two, push result).
    CompareEq,
    CompareNeq,
    CompareLt,
    CompareLte,
    CompareGt,
    CompareGte,
    /// Logical operations.
    LogicalAnd,
    LogicalOr,
    LogicalNot,
    /// Arithmetic operations (pop two, push result or null).
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Instruction {
    /// Net change in stack height after executing this instruction.
    pub fn stack_effect(&self) -> isize {
        match self {
            Instruction::LoadField(_) | Instruction::LoadLiteral(_) => 1,
            Instruction::LogicalNot => 0,
            _ => -1,
        }
    }
}

/// Highest stack height reached while running `code` from an empty stack.
pub fn max_stack_depth(code: &[Instruction]) -> usize {
    let mut depth: isize = 0;
    let mut max: isize = 0;
    for instr in code {
        depth += instr.stack_effect();
        max = max.max(depth);
    }
    max.max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_stack_depth() {
        // a + (b * c)
        let code = vec![
            Instruction::LoadField("a".into()),
            Instruction::LoadField("b".into()),
            Instruction::LoadField("c".into()),
            Instruction::Mul,
            Instruction::Add,
        ];
        assert_eq!(max_stack_depth(&code), 3);
        assert_eq!(max_stack_depth(&[]), 0);
        assert_eq!(
            max_stack_depth(&[
                Instruction::LoadLiteral(Value::Boolean(true)),
                Instruction::LogicalNot
            ]),
            1
        );
    }
}
