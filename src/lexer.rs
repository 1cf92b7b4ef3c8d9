//! Lexer module: splits expression source text into classified tokens.
//!
//! Negative numeric literals are recognized lexically, so the lexer needs to
//! know whether the parser expects an operand or an operator next.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind<'a> {
    Int(i64),
    Float(f64),
    Str(&'a str),
    Ident(&'a str),
    True,
    False,
    None,
    And,
    Or,
    Not,
    Gt,
    Lt,
    Gte,
    Lte,
    Eq,
    Neq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Eof,
    Error(LexError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexError {
    UnexpectedChar(char),
    IntegerOutOfRange,
    InvalidFloat,
}

/// A token and the byte span it covers in the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub start: usize,
    pub end: usize,
}

/// Position the parser is in when it asks for the next token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexMode {
    /// Start of a primary expression: `-` directly followed by a digit is a literal.
    Operand,
    /// After an operand: `-` is always subtraction.
    Operator,
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Looks at the next token without consuming it.
    pub fn peek_token(&mut self, mode: LexMode) -> Token<'a> {
        let saved = self.pos;
        let tok = self.next_token(mode);
        self.pos = saved;
        tok
    }

    pub fn next_token(&mut self, mode: LexMode) -> Token<'a> {
        self.skip_whitespace();
        let start = self.pos;
        let bytes = self.src.as_bytes();
        let Some(&c) = bytes.get(start) else {
            return self.token(TokenKind::Eof, start);
        };

        if c == b'\'' || c == b'"' {
            return self.lex_text(c);
        }

        let negative_literal = c == b'-'
            && mode == LexMode::Operand
            && bytes.get(start + 1).is_some_and(u8::is_ascii_digit);
        if c.is_ascii_digit() || negative_literal {
            return self.lex_number();
        }

        let next = bytes.get(start + 1).copied();
        let (kind, len) = match (c, next) {
            (b'>', Some(b'=')) => (TokenKind::Gte, 2),
            (b'<', Some(b'=')) => (TokenKind::Lte, 2),
            (b'=', Some(b'=')) => (TokenKind::Eq, 2),
            (b'!', Some(b'=')) => (TokenKind::Neq, 2),
            (b'>', _) => (TokenKind::Gt, 1),
            (b'<', _) => (TokenKind::Lt, 1),
            (b'+', _) => (TokenKind::Plus, 1),
            (b'-', _) => (TokenKind::Minus, 1),
            (b'*', _) => (TokenKind::Star, 1),
            (b'/', _) => (TokenKind::Slash, 1),
            (b'%', _) => (TokenKind::Percent, 1),
            (b'(', _) => (TokenKind::LParen, 1),
            (b')', _) => (TokenKind::RParen, 1),
            _ if c.is_ascii_alphabetic() || c == b'_' => return self.lex_word(),
            _ => {
                // report the whole character, not just its first byte
                let ch = self.src[start..].chars().next().unwrap_or('\u{FFFD}');
                self.pos = start + ch.len_utf8();
                return self.token(TokenKind::Error(LexError::UnexpectedChar(ch)), start);
            }
        };
        self.pos = start + len;
        self.token(kind, start)
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn token(&self, kind: TokenKind<'a>, start: usize) -> Token<'a> {
        Token {
            kind,
            start,
            end: self.pos,
        }
    }

    fn lex_text(&mut self, quote: u8) -> Token<'a> {
        let start = self.pos;
        let body_start = start + 1;
        // no escapes: the literal ends at the next matching quote or at end of input
        let (body_end, end) = match self.src.as_bytes()[body_start..]
            .iter()
            .position(|&b| b == quote)
        {
            Some(i) => (body_start + i, body_start + i + 1),
            None => (self.src.len(), self.src.len()),
        };
        self.pos = end;
        self.token(TokenKind::Str(&self.src[body_start..body_end]), start)
    }

    fn lex_number(&mut self) -> Token<'a> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        let mut p = start;
        if bytes[p] == b'-' {
            p += 1;
        }
        while p < bytes.len() && bytes[p].is_ascii_digit() {
            p += 1;
        }
        let mut is_float = false;
        if p < bytes.len() && bytes[p] == b'.' {
            is_float = true;
            p += 1;
            while p < bytes.len() && bytes[p].is_ascii_digit() {
                p += 1;
            }
        }
        self.pos = p;
        let text = &self.src[start..p];
        let kind = if is_float {
            match text.parse::<f64>() {
                Ok(f) => TokenKind::Float(f),
                Err(_) => TokenKind::Error(LexError::InvalidFloat),
            }
        } else {
            match text.parse::<i64>() {
                Ok(i) => TokenKind::Int(i),
                Err(_) => TokenKind::Error(LexError::IntegerOutOfRange),
            }
        };
        self.token(kind, start)
    }

    fn lex_word(&mut self) -> Token<'a> {
        let start = self.pos;
        let len = self.src.as_bytes()[start..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        self.pos = start + len;
        let word = &self.src[start..self.pos];
        let kind = match word {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            _ => TokenKind::Ident(word),
        };
        self.token(kind, start)
    }
}

impl fmt::Display for TokenKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Int(i) => write!(f, "integer {}", i),
            TokenKind::Float(v) => write!(f, "float {:?}", v),
            TokenKind::Str(s) => write!(f, "text {:?}", s),
            TokenKind::Ident(name) => write!(f, "field '{}'", name),
            TokenKind::True => write!(f, "'True'"),
            TokenKind::False => write!(f, "'False'"),
            TokenKind::None => write!(f, "'None'"),
            TokenKind::And => write!(f, "'and'"),
            TokenKind::Or => write!(f, "'or'"),
            TokenKind::Not => write!(f, "'not'"),
            TokenKind::Gt => write!(f, "'>'"),
            TokenKind::Lt => write!(f, "'<'"),
            TokenKind::Gte => write!(f, "'>='"),
            TokenKind::Lte => write!(f, "'<='"),
            TokenKind::Eq => write!(f, "'=='"),
            TokenKind::Neq => write!(f, "'!='"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Percent => write!(f, "'%'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::Error(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnexpectedChar(c) => write!(f, "unexpected character {:?}", c),
            LexError::IntegerOutOfRange => write!(f, "integer literal out of range"),
            LexError::InvalidFloat => write!(f, "invalid float literal"),
        }
    }
}
