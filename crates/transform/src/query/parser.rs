//! Recursive-descent parser.
//!
//! Precedence, loosest first: `def` and `label` (which scope the rest of
//! the pipe), `|`, `,`, `//`, assignments, `or`, `and`, comparisons, `+ -`,
//! `* / %`, unary minus, postfix suffixes.
//!
//! Nested brackets, patterns and scopes recurse; operator chains are read
//! in loops. Both the recursion and the height of every chain are capped at
//! [`MAX_NESTING`], so pathological queries are rejected here instead of
//! exhausting the stack later.

use serde_json::Value;

use super::ast::{AssignOp, BinOp, Expr, ObjKey, Param, Pattern, StrPart};
use super::builtins;
use super::lexer::{LexPart, MAX_NESTING, Token, tokenize};
use super::value::number;

/// Formats usable as `@name`.
pub const FORMATS: &[&str] = &[
    "text", "json", "base64", "base64d", "uri", "html", "sh", "csv", "tsv",
];

/// Parse query text. Blank text is the identity.
pub fn parse(source: &str) -> Result<Expr, String> {
    Parser::new(tokenize(source)?, 0, Vec::new(), Vec::new()).finish()
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("'{name}'"),
        Token::Field(name) => format!("'.{name}'"),
        Token::Var(name) => format!("'${name}'"),
        other => format!("{other:?}"),
    }
}

fn too_deep() -> String {
    format!("query nests deeper than {MAX_NESTING} levels")
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    /// User functions in scope as `(name, arity)`, innermost last.
    functions: Vec<(String, usize)>,
    labels: Vec<String>,
}

impl Parser {
    const fn new(
        tokens: Vec<Token>,
        depth: usize,
        functions: Vec<(String, usize)>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            functions,
            labels,
        }
    }

    fn finish(mut self) -> Result<Expr, String> {
        if self.tokens.is_empty() {
            return Ok(Expr::Identity);
        }
        let expr = self.pipe()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected token {}", describe(token))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_second(&self) -> Option<&Token> {
        self.tokens.get(self.pos.saturating_add(1))
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos = self.pos.saturating_add(1);
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos = self.pos.saturating_add(1);
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        if self.eat(expected) {
            return Ok(());
        }
        Err(match self.peek() {
            Some(found) => format!("expected {expected:?}, found {}", describe(found)),
            None => format!("expected {expected:?}, found end of query"),
        })
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.at_keyword(keyword) {
            self.pos = self.pos.saturating_add(1);
            return Ok(());
        }
        Err(match self.peek() {
            Some(found) => format!("expected '{keyword}', found {}", describe(found)),
            None => format!("expected '{keyword}', found end of query"),
        })
    }

    fn expect_var(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Var(name)) => Ok(name),
            Some(other) => Err(format!("expected variable, found {}", describe(&other))),
            None => Err("expected variable, found end of query".to_string()),
        }
    }

    /// Run `parse` one level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_NESTING {
            return Err(too_deep());
        }
        self.depth = self.depth.saturating_add(1);
        let result = parse(self);
        self.depth = self.depth.saturating_sub(1);
        result
    }

    /// Check that a node over `lhs` and `rest` stays within [`MAX_NESTING`].
    /// `known` carries the height of `lhs` between iterations of a loop.
    fn grow(known: &mut Option<usize>, lhs: &Expr, rest: &[&Expr]) -> Result<(), String> {
        let mut height = match *known {
            Some(height) => height,
            None => lhs.height_within(MAX_NESTING).ok_or_else(too_deep)?,
        };
        for expr in rest {
            height = height.max(expr.height_within(MAX_NESTING).ok_or_else(too_deep)?);
        }
        let height = height.saturating_add(1);
        if height > MAX_NESTING {
            return Err(too_deep());
        }
        *known = Some(height);
        Ok(())
    }

    /// Fold `items` into a right-leaning chain of `join` nodes.
    fn fold_right(items: Vec<Expr>, join: fn(Box<Expr>, Box<Expr>) -> Expr) -> Result<Expr, String> {
        let mut items = items.into_iter().rev();
        let Some(mut chain) = items.next() else {
            return Err("unexpected end of query".to_string());
        };
        let mut height = None;
        for item in items {
            Self::grow(&mut height, &chain, &[&item])?;
            chain = join(item.boxed(), chain.boxed());
        }
        Ok(chain)
    }

    /// A `def` or `label` scopes everything after it, so it ends the pipe.
    fn scoped_stage(&mut self) -> Result<Option<Expr>, String> {
        if self.at_keyword("def") {
            return self.nested(Self::definition).map(Some);
        }
        if self.at_keyword("label") {
            return self.nested(Self::label).map(Some);
        }
        Ok(None)
    }

    fn pipe(&mut self) -> Result<Expr, String> {
        let mut stages = Vec::new();
        loop {
            if let Some(scoped) = self.scoped_stage()? {
                stages.push(scoped);
                break;
            }
            stages.push(self.comma()?);
            if !self.eat(&Token::Pipe) {
                break;
            }
        }
        Self::fold_right(stages, Expr::Pipe)
    }

    /// `def name(params): body; rest`
    fn definition(&mut self) -> Result<Expr, String> {
        self.expect_keyword("def")?;
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(other) => return Err(format!("expected function name, found {}", describe(&other))),
            None => return Err("expected function name, found end of query".to_string()),
        };
        let mut params = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                params.push(match self.next() {
                    Some(Token::Ident(param)) => Param::Filter(param),
                    Some(Token::Var(param)) => Param::Value(param),
                    Some(other) => {
                        return Err(format!("expected parameter, found {}", describe(&other)));
                    }
                    None => return Err("expected parameter, found end of query".to_string()),
                });
                if self.eat(&Token::Semicolon) {
                    continue;
                }
                self.expect(&Token::RParen)?;
                break;
            }
        }
        self.expect(&Token::Colon)?;
        let scope = self.functions.len();
        self.functions.push((name.clone(), params.len()));
        self.functions
            .extend(params.iter().map(|param| (param.name().to_string(), 0)));
        let body = self.pipe().and_then(|body| {
            self.expect(&Token::Semicolon)?;
            Ok(body)
        });
        self.functions.truncate(scope);
        let body = body?;
        self.functions.push((name.clone(), params.len()));
        let rest = self.pipe();
        self.functions.truncate(scope);
        Ok(Expr::Def {
            name,
            params,
            body: body.boxed(),
            rest: rest?.boxed(),
        })
    }

    /// `label $name | body`
    fn label(&mut self) -> Result<Expr, String> {
        self.expect_keyword("label")?;
        let name = self.expect_var()?;
        self.expect(&Token::Pipe)?;
        self.labels.push(name.clone());
        let body = self.pipe();
        self.labels.pop();
        Ok(Expr::Label {
            name,
            body: body?.boxed(),
        })
    }

    fn comma(&mut self) -> Result<Expr, String> {
        let first = self.alternative()?;
        if self.peek() != Some(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.alternative()?);
        }
        Ok(Expr::Comma(items))
    }

    fn alternative(&mut self) -> Result<Expr, String> {
        let mut operands = vec![self.assignment()?];
        while self.eat(&Token::Alt) {
            operands.push(self.assignment()?);
        }
        Self::fold_right(operands, Expr::Alt)
    }

    fn assignment(&mut self) -> Result<Expr, String> {
        let lhs = self.or()?;
        if let Some(Token::Assign(op)) = self.peek() {
            let op = *op;
            self.pos = self.pos.saturating_add(1);
            let rhs = self.or()?;
            return Ok(Expr::Assign(op, lhs.boxed(), rhs.boxed()));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        let mut height = None;
        while self.at_keyword("or") {
            self.pos = self.pos.saturating_add(1);
            let rhs = self.and()?;
            Self::grow(&mut height, &lhs, &[&rhs])?;
            lhs = Expr::Or(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.comparison()?;
        let mut height = None;
        while self.at_keyword("and") {
            self.pos = self.pos.saturating_add(1);
            let rhs = self.comparison()?;
            Self::grow(&mut height, &lhs, &[&rhs])?;
            lhs = Expr::And(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn comparison_op(&self) -> Option<BinOp> {
        match self.peek()? {
            Token::EqEq => Some(BinOp::Eq),
            Token::Ne => Some(BinOp::Ne),
            Token::Lt => Some(BinOp::Lt),
            Token::Le => Some(BinOp::Le),
            Token::Gt => Some(BinOp::Gt),
            Token::Ge => Some(BinOp::Ge),
            _ => None,
        }
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.additive()?;
        let Some(op) = self.comparison_op() else {
            return Ok(lhs);
        };
        self.pos = self.pos.saturating_add(1);
        let rhs = self.additive()?;
        if self.comparison_op().is_some() {
            return Err("comparison operators are not associative".to_string());
        }
        Ok(Expr::Binary(op, lhs.boxed(), rhs.boxed()))
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        let mut height = None;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos = self.pos.saturating_add(1);
            let rhs = self.multiplicative()?;
            Self::grow(&mut height, &lhs, &[&rhs])?;
            lhs = Expr::Binary(op, lhs.boxed(), rhs.boxed());
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        let mut height = None;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos = self.pos.saturating_add(1);
            let rhs = self.unary()?;
            Self::grow(&mut height, &lhs, &[&rhs])?;
            lhs = Expr::Binary(op, lhs.boxed(), rhs.boxed());
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            return match self.postfix(true)? {
                Expr::Literal(Value::Number(n)) => Ok(Expr::Literal(
                    n.as_i64()
                        .and_then(i64::checked_neg)
                        .map_or_else(|| number(-n.as_f64().unwrap_or(0.0)), Value::from),
                )),
                other => Ok(Expr::Neg(other.boxed())),
            };
        }
        self.postfix(true)
    }

    fn postfix(&mut self, allow_bind: bool) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        let mut height = None;
        loop {
            match self.peek() {
                Some(Token::Field(name)) => {
                    let name = name.clone();
                    self.pos = self.pos.saturating_add(1);
                    Self::grow(&mut height, &expr, &[])?;
                    expr = expr.field(name);
                }
                Some(Token::Dot) if matches!(self.peek_second(), Some(Token::Str(_))) => {
                    self.pos = self.pos.saturating_add(1);
                    let key = self.string_literal()?;
                    Self::grow(&mut height, &expr, &[&key])?;
                    expr = Expr::Index(expr.boxed(), key.boxed());
                }
                Some(Token::Dot) if matches!(self.peek_second(), Some(Token::LBracket)) => {
                    self.pos = self.pos.saturating_add(2);
                    expr = self.bracket_suffix(expr, &mut height)?;
                }
                Some(Token::LBracket) => {
                    self.pos = self.pos.saturating_add(1);
                    expr = self.bracket_suffix(expr, &mut height)?;
                }
                Some(Token::Question) => {
                    self.pos = self.pos.saturating_add(1);
                    Self::grow(&mut height, &expr, &[])?;
                    expr = Expr::Optional(expr.boxed());
                }
                _ => break,
            }
        }
        if allow_bind && self.at_keyword("as") {
            self.pos = self.pos.saturating_add(1);
            let pattern = self.pattern()?;
            self.expect(&Token::Pipe)?;
            let body = self.nested(Self::pipe)?;
            return Ok(Expr::Bind {
                source: expr.boxed(),
                pattern,
                body: body.boxed(),
            });
        }
        Ok(expr)
    }

    /// Parse what follows `[` in a suffix: `]`, `e]`, `e:]`, `:e]` or `e:e]`.
    fn bracket_suffix(&mut self, target: Expr, height: &mut Option<usize>) -> Result<Expr, String> {
        if self.eat(&Token::RBracket) {
            Self::grow(height, &target, &[])?;
            return Ok(Expr::Iterate(target.boxed()));
        }
        if self.eat(&Token::Colon) {
            let end = self.pipe()?;
            self.expect(&Token::RBracket)?;
            Self::grow(height, &target, &[&end])?;
            return Ok(Expr::Slice(target.boxed(), None, Some(end.boxed())));
        }
        let index = self.pipe()?;
        if self.eat(&Token::Colon) {
            if self.eat(&Token::RBracket) {
                Self::grow(height, &target, &[&index])?;
                return Ok(Expr::Slice(target.boxed(), Some(index.boxed()), None));
            }
            let end = self.pipe()?;
            self.expect(&Token::RBracket)?;
            Self::grow(height, &target, &[&index, &end])?;
            return Ok(Expr::Slice(
                target.boxed(),
                Some(index.boxed()),
                Some(end.boxed()),
            ));
        }
        self.expect(&Token::RBracket)?;
        Self::grow(height, &target, &[&index])?;
        Ok(Expr::Index(target.boxed(), index.boxed()))
    }

    fn string_literal(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Str(parts)) => self.string_expr(None, parts),
            Some(other) => Err(format!("expected string, found {}", describe(&other))),
            None => Err("expected string, found end of query".to_string()),
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        self.nested(Self::term)
    }

    fn term(&mut self) -> Result<Expr, String> {
        let Some(token) = self.next() else {
            return Err("unexpected end of query".to_string());
        };
        match token {
            Token::Num(n) => Ok(Expr::Literal(n)),
            Token::Str(parts) => self.string_expr(None, parts),
            Token::Format(name) => {
                if !FORMATS.contains(&name.as_str()) {
                    return Err(format!("{name} is not a valid format"));
                }
                if let Some(Token::Str(_)) = self.peek() {
                    let Some(Token::Str(parts)) = self.next() else {
                        return Err("expected string".to_string());
                    };
                    return self.string_expr(Some(name), parts);
                }
                Ok(Expr::Format(name))
            }
            Token::Dot => match self.peek() {
                Some(Token::Str(_)) => {
                    let key = self.string_literal()?;
                    Ok(Expr::Index(Expr::Identity.boxed(), key.boxed()))
                }
                _ => Ok(Expr::Identity),
            },
            Token::DotDot => Ok(Expr::RecurseAll),
            Token::Field(name) => Ok(Expr::Identity.field(name)),
            Token::Var(name) => Ok(Expr::Var(name)),
            Token::LParen => {
                let inner = self.pipe()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::Array(None));
                }
                let inner = self.pipe()?;
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(Some(inner.boxed())))
            }
            Token::LBrace => self.object(),
            Token::Ident(name) => self.keyword_or_call(name),
            other => Err(format!("unexpected token {}", describe(&other))),
        }
    }

    fn is_function(&self, name: &str, arity: usize) -> bool {
        self.functions
            .iter()
            .any(|(defined, params)| defined == name && *params == arity)
            || builtins::is_defined(name, arity)
    }

    fn keyword_or_call(&mut self, name: String) -> Result<Expr, String> {
        match name.as_str() {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" => Ok(Expr::Literal(Value::Null)),
            "if" => self.if_expr(),
            "try" => {
                let body = self.postfix(false)?;
                let catch = if self.at_keyword("catch") {
                    self.pos = self.pos.saturating_add(1);
                    Some(self.postfix(false)?.boxed())
                } else {
                    None
                };
                Ok(Expr::Try {
                    body: body.boxed(),
                    catch,
                })
            }
            "reduce" => {
                let source = self.postfix(false)?;
                self.expect_keyword("as")?;
                let pattern = self.pattern()?;
                self.expect(&Token::LParen)?;
                let init = self.pipe()?;
                self.expect(&Token::Semicolon)?;
                let update = self.pipe()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Reduce {
                    source: source.boxed(),
                    pattern,
                    init: init.boxed(),
                    update: update.boxed(),
                })
            }
            "foreach" => {
                let source = self.postfix(false)?;
                self.expect_keyword("as")?;
                let pattern = self.pattern()?;
                self.expect(&Token::LParen)?;
                let init = self.pipe()?;
                self.expect(&Token::Semicolon)?;
                let update = self.pipe()?;
                let extract = if self.eat(&Token::Semicolon) {
                    Some(self.pipe()?.boxed())
                } else {
                    None
                };
                self.expect(&Token::RParen)?;
                Ok(Expr::Foreach {
                    source: source.boxed(),
                    pattern,
                    init: init.boxed(),
                    update: update.boxed(),
                    extract,
                })
            }
            "break" => {
                let label = self.expect_var()?;
                if !self.labels.contains(&label) {
                    return Err(format!("$*label-{label} is not defined"));
                }
                Ok(Expr::Break(label))
            }
            "def" | "label" => {
                self.pos = self.pos.saturating_sub(1);
                self.scoped_stage()?
                    .ok_or_else(|| format!("unexpected keyword '{name}'"))
            }
            "then" | "elif" | "else" | "end" | "as" | "catch" | "and" | "or" => {
                Err(format!("unexpected keyword '{name}'"))
            }
            _ => {
                let mut args = Vec::new();
                if self.eat(&Token::LParen) {
                    loop {
                        args.push(self.pipe()?);
                        if self.eat(&Token::Semicolon) {
                            continue;
                        }
                        self.expect(&Token::RParen)?;
                        break;
                    }
                }
                if !self.is_function(&name, args.len()) {
                    return Err(format!("{name}/{} is not defined", args.len()));
                }
                Ok(Expr::Call(name, args))
            }
        }
    }

    fn if_expr(&mut self) -> Result<Expr, String> {
        let mut branches = Vec::new();
        loop {
            let cond = self.pipe()?;
            self.expect_keyword("then")?;
            let then = self.pipe()?;
            branches.push((cond, then));
            if self.at_keyword("elif") {
                self.pos = self.pos.saturating_add(1);
                continue;
            }
            break;
        }
        let otherwise = if self.at_keyword("else") {
            self.pos = self.pos.saturating_add(1);
            Some(self.pipe()?.boxed())
        } else {
            None
        };
        self.expect_keyword("end")?;
        Ok(Expr::If {
            branches,
            otherwise,
        })
    }

    fn object(&mut self) -> Result<Expr, String> {
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let entry = match self.next() {
                Some(Token::Ident(name)) => {
                    let shorthand = Expr::Identity.field(name.clone());
                    (ObjKey::Str(vec![StrPart::Lit(name)]), Some(shorthand))
                }
                Some(Token::Var(name)) => (ObjKey::Var(name.clone()), Some(Expr::Var(name))),
                Some(Token::Str(parts)) => {
                    let key = self.string_parts(parts)?;
                    let shorthand = Expr::Index(
                        Expr::Identity.boxed(),
                        Expr::Str {
                            format: None,
                            parts: key.clone(),
                        }
                        .boxed(),
                    );
                    (ObjKey::Str(key), Some(shorthand))
                }
                Some(Token::LParen) => {
                    let key = self.pipe()?;
                    self.expect(&Token::RParen)?;
                    (ObjKey::Expr(key), None)
                }
                Some(other) => {
                    return Err(format!("unexpected object key {}", describe(&other)));
                }
                None => return Err("unterminated object".to_string()),
            };
            let (key, shorthand) = entry;
            let value = if self.eat(&Token::Colon) {
                self.object_value()?
            } else {
                shorthand.ok_or_else(|| "computed object key needs a value".to_string())?
            };
            entries.push((key, value));
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBrace)?;
            return Ok(Expr::Object(entries));
        }
    }

    /// Object values stop at `,` but may contain pipes.
    fn object_value(&mut self) -> Result<Expr, String> {
        let mut stages = vec![self.alternative()?];
        while self.eat(&Token::Pipe) {
            stages.push(self.alternative()?);
        }
        Self::fold_right(stages, Expr::Pipe)
    }

    /// `$x`, `[$a, $b]` or `{$a, key: $b, "k": [$c], (expr): $d}`.
    fn pattern(&mut self) -> Result<Pattern, String> {
        self.nested(|parser| match parser.next() {
            Some(Token::Var(name)) => Ok(Pattern::Var(name)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                loop {
                    items.push(parser.pattern()?);
                    if parser.eat(&Token::Comma) {
                        continue;
                    }
                    parser.expect(&Token::RBracket)?;
                    return Ok(Pattern::Array(items));
                }
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                loop {
                    entries.push(parser.pattern_entry()?);
                    if parser.eat(&Token::Comma) {
                        continue;
                    }
                    parser.expect(&Token::RBrace)?;
                    return Ok(Pattern::Object(entries));
                }
            }
            Some(other) => Err(format!("expected pattern, found {}", describe(&other))),
            None => Err("expected pattern, found end of query".to_string()),
        })
    }

    fn pattern_entry(&mut self) -> Result<(ObjKey, Option<Pattern>), String> {
        let key = match self.next() {
            Some(Token::Var(name)) => {
                let sub = if self.eat(&Token::Colon) {
                    Some(self.pattern()?)
                } else {
                    None
                };
                return Ok((ObjKey::Var(name), sub));
            }
            Some(Token::Ident(name)) => ObjKey::Str(vec![StrPart::Lit(name)]),
            Some(Token::Str(parts)) => ObjKey::Str(self.string_parts(parts)?),
            Some(Token::LParen) => {
                let key = self.pipe()?;
                self.expect(&Token::RParen)?;
                ObjKey::Expr(key)
            }
            Some(other) => return Err(format!("unexpected object pattern key {}", describe(&other))),
            None => return Err("unterminated object pattern".to_string()),
        };
        self.expect(&Token::Colon)?;
        Ok((key, Some(self.pattern()?)))
    }

    /// Interpolations parse with the enclosing scope and depth.
    fn string_parts(&self, parts: Vec<LexPart>) -> Result<Vec<StrPart>, String> {
        parts
            .into_iter()
            .map(|part| match part {
                LexPart::Lit(text) => Ok(StrPart::Lit(text)),
                LexPart::Interp(tokens) => Self::new(
                    tokens,
                    self.depth.saturating_add(1),
                    self.functions.clone(),
                    self.labels.clone(),
                )
                .finish()
                .map(StrPart::Interp),
            })
            .collect()
    }

    fn string_expr(&self, format: Option<String>, parts: Vec<LexPart>) -> Result<Expr, String> {
        let parts = self.string_parts(parts)?;
        if let [StrPart::Lit(text)] = parts.as_slice() {
            return Ok(Expr::Literal(Value::String(text.clone())));
        }
        Ok(Expr::Str { format, parts })
    }
}
