//! Compiler module: parses expression source text straight into postfix IR.
//!
//! Each grammar level is one function, lowest precedence first:
//! `or`, `and`, `not`, comparison, additive, multiplicative, primary.
//! Operands are emitted before their operator, so the output runs on a stack
//! machine without further transformation. No syntax tree is built.

use crate::ir::Instruction;
use crate::lexer::{LexMode, Lexer, Token, TokenKind};
use crate::types::Value;
use crate::{EngineError, Result};

/// Deepest run of nested parentheses and `not` prefixes accepted.
pub const MAX_NESTING: usize = 256;

// Hand-written recursive descent compiler for filter and compute expressions
pub struct ExprCompiler<'a> {
    lexer: Lexer<'a>,
    code: Vec<Instruction>,
    nesting: usize,
}

impl<'a> ExprCompiler<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            code: Vec::new(),
            nesting: 0,
        }
    }

    /// Compiles `source` into a postfix instruction sequence.
    ///
    /// The whole input must form a single expression.
    pub fn compile(source: &str) -> Result<Vec<Instruction>> {
        let mut compiler = ExprCompiler::new(source);
        compiler.parse_or()?;
        let trailing = compiler.lexer.next_token(LexMode::Operator);
        match trailing.kind {
            TokenKind::Eof => Ok(compiler.code),
            TokenKind::RParen => Err(compiler.error("unbalanced ')'", trailing.start)),
            TokenKind::Error(e) => Err(compiler.error(e.to_string(), trailing.start)),
            other => Err(compiler.error(
                format!("unexpected {} after complete expression", other),
                trailing.start,
            )),
        }
    }

    fn parse_or(&mut self) -> Result<()> {
        self.parse_and()?;
        while self.accept(LexMode::Operator, TokenKind::Or) {
            self.parse_and()?;
            self.emit(Instruction::LogicalOr);
        }
        Ok(())
    }

    fn parse_and(&mut self) -> Result<()> {
        self.parse_not()?;
        while self.accept(LexMode::Operator, TokenKind::And) {
            self.parse_not()?;
            self.emit(Instruction::LogicalAnd);
        }
        Ok(())
    }

    fn parse_not(&mut self) -> Result<()> {
        if self.accept(LexMode::Operand, TokenKind::Not) {
            let offset = self.lexer.position();
            self.enter(offset)?;
            self.parse_not()?;
            self.nesting -= 1;
            self.emit(Instruction::LogicalNot);
            return Ok(());
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<()> {
        self.parse_additive()?;
        loop {
            // left-associative, not chained: `a > 1 > 0` is `(a > 1) > 0`
            let op = match self.lexer.peek_token(LexMode::Operator).kind {
                TokenKind::Gt => Instruction::CompareGt,
                TokenKind::Lt => Instruction::CompareLt,
                TokenKind::Gte => Instruction::CompareGte,
                TokenKind::Lte => Instruction::CompareLte,
                TokenKind::Eq => Instruction::CompareEq,
                TokenKind::Neq => Instruction::CompareNeq,
                _ => break,
            };
            self.lexer.next_token(LexMode::Operator);
            self.parse_additive()?;
            self.emit(op);
        }
        Ok(())
    }

    fn parse_additive(&mut self) -> Result<()> {
        self.parse_multiplicative()?;
        loop {
            let op = match self.lexer.peek_token(LexMode::Operator).kind {
                TokenKind::Plus => Instruction::Add,
                TokenKind::Minus => Instruction::Sub,
                _ => break,
            };
            self.lexer.next_token(LexMode::Operator);
            self.parse_multiplicative()?;
            self.emit(op);
        }
        Ok(())
    }

    fn parse_multiplicative(&mut self) -> Result<()> {
        self.parse_primary()?;
        loop {
            let op = match self.lexer.peek_token(LexMode::Operator).kind {
                TokenKind::Star => Instruction::Mul,
                TokenKind::Slash => Instruction::Div,
                TokenKind::Percent => Instruction::Mod,
                _ => break,
            };
            self.lexer.next_token(LexMode::Operator);
            self.parse_primary()?;
            self.emit(op);
        }
        Ok(())
    }

    fn parse_primary(&mut self) -> Result<()> {
        let tok = self.lexer.next_token(LexMode::Operand);
        let instr = match tok.kind {
            TokenKind::Int(i) => Instruction::LoadLiteral(Value::Integer(i)),
            TokenKind::Float(f) => Instruction::LoadLiteral(Value::Float(f)),
            TokenKind::Str(s) => Instruction::LoadLiteral(Value::Text(s.to_string())),
            TokenKind::True => Instruction::LoadLiteral(Value::Boolean(true)),
            TokenKind::False => Instruction::LoadLiteral(Value::Boolean(false)),
            TokenKind::None => Instruction::LoadLiteral(Value::Null),
            TokenKind::Ident(name) => Instruction::LoadField(name.to_string()),
            TokenKind::LParen => return self.parse_group(tok),
            _ => return Err(self.unexpected_operand(tok)),
        };
        self.emit(instr);
        Ok(())
    }

    fn parse_group(&mut self, open: Token<'a>) -> Result<()> {
        self.enter(open.start)?;
        self.parse_or()?;
        self.nesting -= 1;
        let close = self.lexer.next_token(LexMode::Operator);
        match close.kind {
            TokenKind::RParen => Ok(()),
            TokenKind::Eof => Err(self.error("unbalanced '(': missing ')'", open.start)),
            TokenKind::Error(e) => Err(self.error(e.to_string(), close.start)),
            other => Err(self.error(format!("expected ')' but found {}", other), close.start)),
        }
    }

    fn unexpected_operand(&self, tok: Token<'a>) -> EngineError {
        match tok.kind {
            TokenKind::Eof => self.error("unexpected end of input, expected an operand", tok.start),
            TokenKind::Error(e) => self.error(e.to_string(), tok.start),
            TokenKind::RParen => self.error("unbalanced ')'", tok.start),
            TokenKind::Minus => self.error(
                "'-' negates numeric literals only, not fields or groups",
                tok.start,
            ),
            other => self.error(format!("expected an operand but found {}", other), tok.start),
        }
    }

    /// Consumes the next token if it is `kind`.
    fn accept(&mut self, mode: LexMode, kind: TokenKind<'a>) -> bool {
        if self.lexer.peek_token(mode).kind == kind {
            self.lexer.next_token(mode);
            true
        } else {
            false
        }
    }

    fn enter(&mut self, offset: usize) -> Result<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("expression nested too deeply", offset));
        }
        Ok(())
    }

    fn emit(&mut self, instr: Instruction) {
        self.code.push(instr);
    }

    fn error(&self, reason: impl Into<String>, offset: usize) -> EngineError {
        EngineError::Compile {
            expr: self.lexer.source().to_string(),
            reason: reason.into(),
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Instruction::*;

    fn field(name: &str) -> Instruction {
        LoadField(name.to_string())
    }

    fn int(i: i64) -> Instruction {
        LoadLiteral(Value::Integer(i))
    }

    fn reason(src: &str) -> String {
        match ExprCompiler::compile(src) {
            Err(EngineError::Compile { expr, reason, .. }) => {
                assert_eq!(expr, src);
                reason
            }
            other => panic!("expected compile error for {:?}, got {:?}", src, other),
        }
    }

    #[test]
    fn test_postfix_precedence() {
        let code = ExprCompiler::compile("a + b * 2 > 10").unwrap();
        assert_eq!(
            code,
            vec![field("a"), field("b"), int(2), Mul, Add, int(10), CompareGt]
        );
    }

    #[test]
    fn test_logical_precedence() {
        // not binds tighter than and, and tighter than or
        let code = ExprCompiler::compile("not a or b and c").unwrap();
        assert_eq!(
            code,
            vec![field("a"), LogicalNot, field("b"), field("c"), LogicalAnd, LogicalOr]
        );
    }

    #[test]
    fn test_not_is_right_recursive() {
        let code = ExprCompiler::compile("not not a == 1").unwrap();
        assert_eq!(code, vec![field("a"), int(1), CompareEq, LogicalNot, LogicalNot]);
    }

    #[test]
    fn test_comparisons_are_not_chained() {
        let code = ExprCompiler::compile("a > 1 > 0").unwrap();
        assert_eq!(code, vec![field("a"), int(1), CompareGt, int(0), CompareGt]);
    }

    #[test]
    fn test_left_associative_arithmetic() {
        let code = ExprCompiler::compile("a - b - c").unwrap();
        assert_eq!(code, vec![field("a"), field("b"), Sub, field("c"), Sub]);
        let code = ExprCompiler::compile("a / b % 3").unwrap();
        assert_eq!(code, vec![field("a"), field("b"), Div, int(3), Mod]);
    }

    #[test]
    fn test_parentheses_override_precedence() {
        let code = ExprCompiler::compile("(a + b) * c").unwrap();
        assert_eq!(code, vec![field("a"), field("b"), Add, field("c"), Mul]);
    }

    #[test]
    fn test_literals() {
        let code =
            ExprCompiler::compile("x == None or y != 'txt' or z == True or w < -2.5").unwrap();
        assert!(code.contains(&LoadLiteral(Value::Null)));
        assert!(code.contains(&LoadLiteral(Value::from("txt"))));
        assert!(code.contains(&LoadLiteral(Value::Boolean(true))));
        assert!(code.contains(&LoadLiteral(Value::Float(-2.5))));
    }

    #[test]
    fn test_negative_literal_only() {
        assert_eq!(ExprCompiler::compile("-5").unwrap(), vec![int(-5)]);
        assert_eq!(ExprCompiler::compile("a-5").unwrap(), vec![field("a"), int(5), Sub]);
        assert!(reason("-a").contains("negates numeric literals"));
        assert!(reason("-(a + 1)").contains("negates numeric literals"));
        assert!(reason("- 5").contains("negates numeric literals"));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        assert!(reason("(a > 1").contains("missing ')'"));
        assert!(reason("a > 1)").contains("unbalanced ')'"));
        assert!(reason("()").contains("unbalanced ')'"));
    }

    #[test]
    fn test_incomplete_expression() {
        assert!(reason("a >").contains("unexpected end of input"));
        assert!(reason("a and").contains("unexpected end of input"));
        assert!(reason("").contains("unexpected end of input"));
        assert!(reason("   ").contains("unexpected end of input"));
    }

    #[test]
    fn test_trailing_tokens() {
        assert!(reason("a b").contains("after complete expression"));
        assert!(reason("1 2").contains("after complete expression"));
    }

    #[test]
    fn test_bad_token() {
        assert!(reason("a & b").contains("unexpected character '&'"));
        assert!(reason("a = 1").contains("unexpected character '='"));
        assert!(reason("a > $").contains("unexpected character '$'"));
    }

    #[test]
    fn test_error_offset() {
        match ExprCompiler::compile("price > 10 @") {
            Err(EngineError::Compile { offset, .. }) => assert_eq!(offset, 11),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert!(reason(&deep).contains("nested too deeply"));
        let ok = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(ExprCompiler::compile(&ok).unwrap(), vec![int(1)]);
    }
}
