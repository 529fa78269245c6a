//! Tokenizer for the query dialect.

use serde_json::Value;

use super::ast::{AssignOp, BinOp};
use super::value::parse_number;

/// How deeply string interpolations, and the parser's own constructs, may nest.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Dot,
    DotDot,
    Field(String),
    Var(String),
    Ident(String),
    Num(Value),
    Str(Vec<LexPart>),
    Format(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Alt,
    Assign(AssignOp),
}

/// Piece of a string token; interpolations keep their own token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LexPart {
    Lit(String),
    Interp(Vec<Token>),
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    nesting: usize,
}

/// Split a query into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        nesting: 0,
    };
    let tokens = lexer.tokens(false)?;
    if lexer.pos < lexer.chars.len() {
        return Err(format!("unexpected ')' at offset {}", lexer.pos));
    }
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos.saturating_add(offset)).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos = self.pos.saturating_add(1);
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos = self.pos.saturating_add(1);
            true
        } else {
            false
        }
    }

    /// Read tokens until the input ends or, inside an interpolation, until the
    /// closing parenthesis, which is consumed.
    fn tokens(&mut self, in_interp: bool) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        loop {
            self.skip_trivia();
            let Some(c) = self.peek() else {
                if in_interp {
                    return Err("unterminated string interpolation".to_string());
                }
                return Ok(tokens);
            };
            if c == ')' && depth == 0 {
                if in_interp {
                    self.pos = self.pos.saturating_add(1);
                }
                return Ok(tokens);
            }
            let token = self.token()?;
            match token {
                Token::LParen => depth = depth.saturating_add(1),
                Token::RParen => depth = depth.saturating_sub(1),
                _ => {}
            }
            tokens.push(token);
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos = self.pos.saturating_add(1);
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek().filter(|c| is_ident_char(*c)) {
            name.push(c);
            self.pos = self.pos.saturating_add(1);
        }
        name
    }

    fn token(&mut self) -> Result<Token, String> {
        let start = self.pos;
        let Some(c) = self.bump() else {
            return Err("unexpected end of query".to_string());
        };
        let token = match c {
            '.' => {
                if self.eat('.') {
                    Token::DotDot
                } else if self.peek().is_some_and(is_ident_start) {
                    Token::Field(self.ident())
                } else {
                    Token::Dot
                }
            }
            '$' => {
                if !self.peek().is_some_and(is_ident_start) {
                    return Err(format!("expected variable name at offset {start}"));
                }
                Token::Var(self.ident())
            }
            '@' => {
                if !self.peek().is_some_and(is_ident_start) {
                    return Err(format!("expected format name at offset {start}"));
                }
                Token::Format(self.ident())
            }
            '"' => Token::Str(self.string()?),
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            ':' => Token::Colon,
            ';' => Token::Semicolon,
            '?' => Token::Question,
            '|' => {
                if self.eat('=') {
                    Token::Assign(AssignOp::Update)
                } else {
                    Token::Pipe
                }
            }
            '=' => {
                if self.eat('=') {
                    Token::EqEq
                } else {
                    Token::Assign(AssignOp::Set)
                }
            }
            '!' => {
                if self.eat('=') {
                    Token::Ne
                } else {
                    return Err(format!("unexpected '!' at offset {start}"));
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '/' => {
                if self.eat('/') {
                    if self.eat('=') {
                        Token::Assign(AssignOp::Alt)
                    } else {
                        Token::Alt
                    }
                } else {
                    self.arith_or_assign(Token::Slash, BinOp::Div)
                }
            }
            '+' => self.arith_or_assign(Token::Plus, BinOp::Add),
            '-' => self.arith_or_assign(Token::Minus, BinOp::Sub),
            '*' => self.arith_or_assign(Token::Star, BinOp::Mul),
            '%' => self.arith_or_assign(Token::Percent, BinOp::Mod),
            c if c.is_ascii_digit() => {
                self.pos = start;
                Token::Num(self.number()?)
            }
            c if is_ident_start(c) => {
                self.pos = start;
                Token::Ident(self.ident())
            }
            other => return Err(format!("unexpected character {other:?} at offset {start}")),
        };
        Ok(token)
    }

    fn arith_or_assign(&mut self, plain: Token, op: BinOp) -> Token {
        if self.eat('=') {
            Token::Assign(AssignOp::Arith(op))
        } else {
            plain
        }
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        let mut text = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            text.push(c);
            self.pos = self.pos.saturating_add(1);
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.pos = self.pos.saturating_add(1);
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                text.push(c);
                self.pos = self.pos.saturating_add(1);
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = self.peek_at(1);
            let digit_at = if matches!(sign, Some('+' | '-')) { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    if let Some(c) = self.bump() {
                        text.push(c);
                    }
                }
                while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                    text.push(c);
                    self.pos = self.pos.saturating_add(1);
                }
            }
        }
        parse_number(&text).ok_or_else(|| format!("invalid number at offset {start}"))
    }

    fn string(&mut self) -> Result<Vec<LexPart>, String> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err("unterminated string literal".to_string());
            };
            match c {
                '"' => break,
                '\\' => {
                    let Some(escape) = self.bump() else {
                        return Err("unterminated escape sequence".to_string());
                    };
                    match escape {
                        '"' => literal.push('"'),
                        '\\' => literal.push('\\'),
                        '/' => literal.push('/'),
                        'b' => literal.push('\u{8}'),
                        'f' => literal.push('\u{c}'),
                        'n' => literal.push('\n'),
                        'r' => literal.push('\r'),
                        't' => literal.push('\t'),
                        'u' => literal.push(self.unicode_escape()?),
                        '(' => {
                            if !literal.is_empty() {
                                parts.push(LexPart::Lit(std::mem::take(&mut literal)));
                            }
                            if self.nesting >= MAX_NESTING {
                                return Err(format!(
                                    "query nests deeper than {MAX_NESTING} levels"
                                ));
                            }
                            self.nesting = self.nesting.saturating_add(1);
                            let inner = self.tokens(true);
                            self.nesting = self.nesting.saturating_sub(1);
                            parts.push(LexPart::Interp(inner?));
                        }
                        other => return Err(format!("invalid escape \\{other}")),
                    }
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(LexPart::Lit(literal));
        }
        Ok(parts)
    }

    fn hex4(&mut self) -> Result<u32, String> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| "invalid \\u escape".to_string())?;
            code = (code << 4) | digit;
        }
        Ok(code)
    }

    fn unicode_escape(&mut self) -> Result<char, String> {
        let high = self.hex4()?;
        if (0xD800..0xDC00).contains(&high) {
            if self.peek() == Some('\\') && self.peek_at(1) == Some('u') {
                self.pos = self.pos.saturating_add(2);
                let low = self.hex4()?;
                if (0xDC00..0xE000).contains(&low) {
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(code).ok_or_else(|| "invalid surrogate pair".to_string());
                }
            }
            return Ok('\u{FFFD}');
        }
        Ok(char::from_u32(high).unwrap_or('\u{FFFD}'))
    }
}
