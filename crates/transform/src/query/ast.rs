//! Syntax tree of the query dialect.

use serde_json::Value;

/// Binary operators evaluated on values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    /// `=`
    Set,
    /// `|=`
    Update,
    /// `+=`, `-=`, `*=`, `/=`, `%=`
    Arith(BinOp),
    /// `//=`
    Alt,
}

/// Piece of a string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Lit(String),
    Interp(Expr),
}

/// Key of an object construction entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjKey {
    /// Literal or interpolated string key.
    Str(Vec<StrPart>),
    /// `$name` shorthand.
    Var(String),
    /// `(expr)` computed key.
    Expr(Expr),
}

/// Target of `as`, `reduce` and `foreach` bindings.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `$name`
    Var(String),
    /// `[$a, $b]`
    Array(Vec<Pattern>),
    /// `{$a, b: $c, "d": [$e]}`
    Object(Vec<(ObjKey, Option<Pattern>)>),
}

impl Pattern {
    /// Every variable the pattern binds, in order of appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut pending = vec![self];
        while let Some(pattern) = pending.pop() {
            match pattern {
                Self::Var(name) => names.push(name.as_str()),
                Self::Array(items) => pending.extend(items.iter().rev()),
                Self::Object(entries) => {
                    for (key, value) in entries.iter().rev() {
                        if let Some(value) = value {
                            pending.push(value);
                        }
                        if let ObjKey::Var(name) = key {
                            names.push(name.as_str());
                        }
                    }
                }
            }
        }
        names
    }
}

/// Parameter of a function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// `f`: a filter evaluated in the caller's scope.
    Filter(String),
    /// `$x`: bound to each output of the argument.
    Value(String),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Self::Filter(name) | Self::Value(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identity,
    RecurseAll,
    Literal(Value),
    Str {
        format: Option<String>,
        parts: Vec<StrPart>,
    },
    Format(String),
    Array(Option<Box<Expr>>),
    Object(Vec<(ObjKey, Expr)>),
    Neg(Box<Expr>),
    Pipe(Box<Expr>, Box<Expr>),
    /// `a, b, c`
    Comma(Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Alt(Box<Expr>, Box<Expr>),
    Assign(AssignOp, Box<Expr>, Box<Expr>),
    If {
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    Try {
        body: Box<Expr>,
        catch: Option<Box<Expr>>,
    },
    Reduce {
        source: Box<Expr>,
        pattern: Pattern,
        init: Box<Expr>,
        update: Box<Expr>,
    },
    Foreach {
        source: Box<Expr>,
        pattern: Pattern,
        init: Box<Expr>,
        update: Box<Expr>,
        extract: Option<Box<Expr>>,
    },
    Bind {
        source: Box<Expr>,
        pattern: Pattern,
        body: Box<Expr>,
    },
    /// `def name(params): body; rest`
    Def {
        name: String,
        params: Vec<Param>,
        body: Box<Expr>,
        rest: Box<Expr>,
    },
    /// `label $name | body`
    Label {
        name: String,
        body: Box<Expr>,
    },
    /// `break $name`
    Break(String),
    Var(String),
    Call(String, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    Iterate(Box<Expr>),
    Optional(Box<Expr>),
}

impl Expr {
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    /// `.name` applied to `self`.
    pub fn field(self, name: impl Into<String>) -> Self {
        Self::Index(self.boxed(), Self::Literal(Value::String(name.into())).boxed())
    }

    /// Direct subexpressions.
    pub fn children(&self) -> Vec<&Self> {
        fn parts(parts: &[StrPart]) -> impl Iterator<Item = &Expr> {
            parts.iter().filter_map(|part| match part {
                StrPart::Interp(expr) => Some(expr),
                StrPart::Lit(_) => None,
            })
        }
        fn key(key: &ObjKey) -> Vec<&Expr> {
            match key {
                ObjKey::Str(p) => parts(p).collect(),
                ObjKey::Var(_) => Vec::new(),
                ObjKey::Expr(expr) => vec![expr],
            }
        }
        fn pattern(pat: &Pattern) -> Vec<&Expr> {
            match pat {
                Pattern::Var(_) => Vec::new(),
                Pattern::Array(items) => items.iter().flat_map(pattern).collect(),
                Pattern::Object(entries) => entries
                    .iter()
                    .flat_map(|(k, v)| key(k).into_iter().chain(v.iter().flat_map(pattern)))
                    .collect(),
            }
        }
        match self {
            Self::Identity
            | Self::RecurseAll
            | Self::Literal(_)
            | Self::Format(_)
            | Self::Break(_)
            | Self::Var(_)
            | Self::Array(None) => Vec::new(),
            Self::Str { parts: p, .. } => parts(p).collect(),
            Self::Array(Some(inner))
            | Self::Neg(inner)
            | Self::Iterate(inner)
            | Self::Optional(inner)
            | Self::Label { body: inner, .. } => vec![inner],
            Self::Object(entries) => entries
                .iter()
                .flat_map(|(k, v)| key(k).into_iter().chain(std::iter::once(v)))
                .collect(),
            Self::Pipe(a, b)
            | Self::Binary(_, a, b)
            | Self::And(a, b)
            | Self::Or(a, b)
            | Self::Alt(a, b)
            | Self::Assign(_, a, b)
            | Self::Index(a, b)
            | Self::Def { body: a, rest: b, .. } => vec![a, b],
            Self::Comma(items) | Self::Call(_, items) => items.iter().collect(),
            Self::If {
                branches,
                otherwise,
            } => branches
                .iter()
                .flat_map(|(c, t)| [c, t])
                .chain(otherwise.as_deref())
                .collect(),
            Self::Try { body, catch } => std::iter::once(body.as_ref())
                .chain(catch.as_deref())
                .collect(),
            Self::Reduce {
                source,
                pattern: p,
                init,
                update,
            } => [source.as_ref(), init, update]
                .into_iter()
                .chain(pattern(p))
                .collect(),
            Self::Foreach {
                source,
                pattern: p,
                init,
                update,
                extract,
            } => [source.as_ref(), init, update]
                .into_iter()
                .chain(extract.as_deref())
                .chain(pattern(p))
                .collect(),
            Self::Bind {
                source,
                pattern: p,
                body,
            } => [source.as_ref(), body].into_iter().chain(pattern(p)).collect(),
            Self::Slice(target, from, to) => std::iter::once(target.as_ref())
                .chain(from.as_deref())
                .chain(to.as_deref())
                .collect(),
        }
    }

    /// Height of the tree, or `None` when it exceeds `limit`.
    pub fn height_within(&self, limit: usize) -> Option<usize> {
        let mut height = 0;
        for child in self.children() {
            let below = child.height_within(limit.checked_sub(1)?)?;
            height = height.max(below.saturating_add(1));
        }
        Some(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_is_bounded_by_limit() {
        let mut expr = Expr::Identity;
        for _ in 0..10 {
            expr = Expr::Neg(expr.boxed());
        }
        assert_eq!(expr.height_within(10), Some(10));
        assert_eq!(expr.height_within(9), None);
        assert_eq!(Expr::Identity.height_within(0), Some(0));
    }

    #[test]
    fn test_pattern_variables_in_order() {
        let pattern = Pattern::Array(vec![
            Pattern::Var("a".into()),
            Pattern::Object(vec![
                (ObjKey::Var("b".into()), None),
                (
                    ObjKey::Str(vec![StrPart::Lit("c".into())]),
                    Some(Pattern::Var("d".into())),
                ),
            ]),
        ]);
        assert_eq!(pattern.variables(), vec!["a", "b", "d"]);
    }
}
