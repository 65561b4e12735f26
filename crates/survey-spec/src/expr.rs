//! Restricted condition language used by `skip_if` and `valid_if`.
//!
//! Expressions are parsed once into an [`Expr`] tree and evaluated against a
//! [`Bindings`] scope that exposes nothing but the answer variables. There are
//! no builtins, calls or attribute lookups.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const MAX_DEPTH: usize = 64;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "True", "False", "None", "true", "false", "null",
];

const SYMBOLS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!",
];

/// Failure raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("syntax error at byte {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("name '{0}' is not defined")]
    UnboundVariable(String),
    #[error("unsupported operand types for {op}: {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("bad operand type for unary {op}: {operand}")]
    BadUnary {
        op: &'static str,
        operand: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("value bound to '{0}' cannot be used in a condition")]
    UnsupportedValue(String),
}

impl ExprError {
    fn syntax(position: usize, message: impl Into<String>) -> Self {
        ExprError::Syntax {
            position,
            message: message.into(),
        }
    }
}

/// A condition that could not be evaluated against the current answers.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to evaluate condition '{expression}': {source}")]
pub struct EvaluationError {
    pub expression: String,
    #[source]
    pub source: ExprError,
}

/// Name lookup used during evaluation.
pub trait Bindings {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Bindings for Map<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// Runtime value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Operand>),
}

impl Operand {
    fn from_json(name: &str, value: &Value) -> Result<Self, ExprError> {
        Ok(match value {
            Value::Null => Operand::None,
            Value::Bool(flag) => Operand::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => Operand::Int(int),
                None => Operand::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(text) => Operand::Str(text.clone()),
            Value::Array(items) => Operand::List(
                items
                    .iter()
                    .map(|item| Operand::from_json(name, item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(_) => return Err(ExprError::UnsupportedValue(name.to_string())),
        })
    }

    /// Truthiness: `None`, `false`, zero, empty strings and empty lists are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Operand::None => false,
            Operand::Bool(flag) => *flag,
            Operand::Int(int) => *int != 0,
            Operand::Float(float) => *float != 0.0,
            Operand::Str(text) => !text.is_empty(),
            Operand::List(items) => !items.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Operand::None => "None",
            Operand::Bool(_) => "bool",
            Operand::Int(_) => "int",
            Operand::Float(_) => "float",
            Operand::Str(_) => "str",
            Operand::List(_) => "list",
        }
    }

    /// Booleans count as `0`/`1` in numeric contexts.
    fn as_int(&self) -> Option<i64> {
        match self {
            Operand::Bool(flag) => Some(i64::from(*flag)),
            Operand::Int(int) => Some(*int),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Operand::Float(float) => Some(*float),
            other => other.as_int().map(|int| int as f64),
        }
    }

    fn loosely_equals(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::List(left), Operand::List(right)) => {
                left.len() == right.len()
                    && left
                        .iter()
                        .zip(right)
                        .all(|(left, right)| left.loosely_equals(right))
            }
            _ => match (self.as_int(), other.as_int()) {
                (Some(left), Some(right)) => left == right,
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(left), Some(right)) => left == right,
                    _ => self == other,
                },
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Operand),
    Var(String),
    List(Vec<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Parses an expression string.
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            cursor: 0,
            depth: 0,
            end: source.len(),
        };
        let expr = parser.parse_or()?;
        if let Some((position, token)) = parser.tokens.get(parser.cursor) {
            return Err(ExprError::syntax(
                *position,
                format!("unexpected {}", token.describe()),
            ));
        }
        Ok(expr)
    }

    /// Evaluates the expression to a value.
    pub fn evaluate<B: Bindings + ?Sized>(&self, scope: &B) -> Result<Operand, ExprError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => {
                let value = scope
                    .lookup(name)
                    .ok_or_else(|| ExprError::UnboundVariable(name.clone()))?;
                Operand::from_json(name, value)
            }
            Expr::List(items) => Ok(Operand::List(
                items
                    .iter()
                    .map(|item| item.evaluate(scope))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Unary { op, operand } => unary(*op, operand.evaluate(scope)?),
            Expr::Binary { op, left, right } => {
                binary(*op, left.evaluate(scope)?, right.evaluate(scope)?)
            }
            Expr::Compare { first, rest } => {
                let mut left = first.evaluate(scope)?;
                for (op, expr) in rest {
                    let right = expr.evaluate(scope)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Operand::Bool(false));
                    }
                    left = right;
                }
                Ok(Operand::Bool(true))
            }
            Expr::And(expressions) => {
                let mut last = Operand::Bool(true);
                for expr in expressions {
                    last = expr.evaluate(scope)?;
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Or(expressions) => {
                let mut last = Operand::Bool(false);
                for expr in expressions {
                    last = expr.evaluate(scope)?;
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Not(expression) => Ok(Operand::Bool(!expression.evaluate(scope)?.is_truthy())),
        }
    }

    fn collect_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                names.insert(name.clone());
            }
            Expr::List(items) | Expr::And(items) | Expr::Or(items) => {
                items.iter().for_each(|item| item.collect_variables(names))
            }
            Expr::Unary { operand, .. } => operand.collect_variables(names),
            Expr::Not(operand) => operand.collect_variables(names),
            Expr::Binary { left, right, .. } => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
            Expr::Compare { first, rest } => {
                first.collect_variables(names);
                rest.iter()
                    .for_each(|(_, expr)| expr.collect_variables(names));
            }
        }
    }
}

/// A parsed predicate together with its source text.
///
/// Serialized as the plain expression string; deserialization parses it, so a
/// malformed predicate is rejected when the question set is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        Ok(Self {
            source: source.trim().to_string(),
            expr: Expr::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluates the predicate to a boolean using truthiness.
    pub fn evaluate<B: Bindings + ?Sized>(&self, scope: &B) -> Result<bool, EvaluationError> {
        self.expr
            .evaluate(scope)
            .map(|value| value.is_truthy())
            .map_err(|source| EvaluationError {
                expression: self.source.clone(),
                source,
            })
    }

    /// Variable names referenced by the predicate.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.expr.collect_variables(&mut names);
        names
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl TryFrom<String> for Condition {
    type Error = ExprError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Condition::parse(&source)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.source
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and evaluates `expression` in one step.
pub fn evaluate<B: Bindings + ?Sized>(expression: &str, scope: &B) -> Result<bool, EvaluationError> {
    let condition = Condition::parse(expression).map_err(|source| EvaluationError {
        expression: expression.to_string(),
        source,
    })?;
    condition.evaluate(scope)
}

fn unary(op: UnaryOp, operand: Operand) -> Result<Operand, ExprError> {
    let symbol = match op {
        UnaryOp::Neg => "-",
        UnaryOp::Plus => "+",
    };
    match (op, operand) {
        (UnaryOp::Neg, Operand::Float(float)) => Ok(Operand::Float(-float)),
        (UnaryOp::Plus, Operand::Float(float)) => Ok(Operand::Float(float)),
        (op, other) => match (op, other.as_int()) {
            (UnaryOp::Neg, Some(int)) => Ok(int
                .checked_neg()
                .map(Operand::Int)
                .unwrap_or(Operand::Float(-(int as f64)))),
            (UnaryOp::Plus, Some(int)) => Ok(Operand::Int(int)),
            (_, None) => Err(ExprError::BadUnary {
                op: symbol,
                operand: other.type_name(),
            }),
        },
    }
}

fn binary(op: BinaryOp, left: Operand, right: Operand) -> Result<Operand, ExprError> {
    let mismatch = |left: &Operand, right: &Operand| ExprError::TypeMismatch {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };

    match (op, &left, &right) {
        (BinaryOp::Add, Operand::Str(a), Operand::Str(b)) => Ok(Operand::Str(format!("{a}{b}"))),
        (BinaryOp::Add, Operand::List(a), Operand::List(b)) => {
            Ok(Operand::List(a.iter().chain(b).cloned().collect()))
        }
        _ => match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => int_arithmetic(op, a, b),
            _ => {
                let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                    return Err(mismatch(&left, &right));
                };
                float_arithmetic(op, a, b)
            }
        },
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Operand, ExprError> {
    let checked = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => return float_arithmetic(op, a as f64, b as f64),
        BinaryOp::Mod => {
            if b == 0 {
                return Err(ExprError::DivisionByZero);
            }
            // Result takes the sign of the divisor.
            a.checked_rem(b).map(|rem| if rem != 0 && (rem < 0) != (b < 0) { rem + b } else { rem })
        }
    };
    match checked {
        Some(value) => Ok(Operand::Int(value)),
        None => float_arithmetic(op, a as f64, b as f64),
    }
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Operand, ExprError> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            let rem = a % b;
            if rem != 0.0 && (rem < 0.0) != (b < 0.0) {
                rem + b
            } else {
                rem
            }
        }
    };
    Ok(Operand::Float(value))
}

fn compare(op: CompareOp, left: &Operand, right: &Operand) -> Result<bool, ExprError> {
    let mismatch = || ExprError::TypeMismatch {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    };

    match op {
        CompareOp::Eq => Ok(left.loosely_equals(right)),
        CompareOp::Ne => Ok(!left.loosely_equals(right)),
        CompareOp::Is => Ok(left == right),
        CompareOp::IsNot => Ok(left != right),
        CompareOp::In | CompareOp::NotIn => {
            let found = match (left, right) {
                (_, Operand::List(items)) => items.iter().any(|item| item.loosely_equals(left)),
                (Operand::Str(needle), Operand::Str(haystack)) => haystack.contains(needle.as_str()),
                _ => return Err(mismatch()),
            };
            Ok(if op == CompareOp::In { found } else { !found })
        }
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = match (left, right) {
                (Operand::Str(a), Operand::Str(b)) => Some(a.cmp(b)),
                _ => match (left.as_int(), right.as_int()) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => match (left.as_f64(), right.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => return Err(mismatch()),
                    },
                },
            };
            // NaN compares false against everything.
            let Some(ordering) = ordering else {
                return Ok(false);
            };
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Symbol(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Int(value) => format!("number {value}"),
            Token::Float(value) => format!("number {value}"),
            Token::Str(text) => format!("string '{text}'"),
            Token::Ident(name) => format!("'{name}'"),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Comma => "','".into(),
            Token::Symbol(symbol) => format!("'{symbol}'"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = source.as_bytes();
    let mut cursor = 0;
    let mut tokens = Vec::new();

    while let Some(&byte) = bytes.get(cursor) {
        if byte.is_ascii_whitespace() {
            cursor += 1;
            continue;
        }
        let start = cursor;
        let token = match byte {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b'\'' | b'"' => {
                let (text, end) = lex_string(source, start)?;
                cursor = end;
                tokens.push((start, Token::Str(text)));
                continue;
            }
            b'0'..=b'9' => {
                let (token, end) = lex_number(source, start)?;
                cursor = end;
                tokens.push((start, token));
                continue;
            }
            b'.' if bytes.get(cursor + 1).is_some_and(u8::is_ascii_digit) => {
                let (token, end) = lex_number(source, start)?;
                cursor = end;
                tokens.push((start, token));
                continue;
            }
            _ if byte.is_ascii_alphabetic() || byte == b'_' => {
                let mut end = cursor;
                while bytes
                    .get(end)
                    .is_some_and(|byte| byte.is_ascii_alphanumeric() || *byte == b'_')
                {
                    end += 1;
                }
                cursor = end;
                tokens.push((start, Token::Ident(source[start..end].to_string())));
                continue;
            }
            _ => {
                let Some(symbol) = SYMBOLS
                    .iter()
                    .find(|symbol| bytes[cursor..].starts_with(symbol.as_bytes()))
                else {
                    let found = source[cursor..].chars().next().unwrap_or('?');
                    return Err(ExprError::syntax(
                        start,
                        format!("unexpected character '{found}'"),
                    ));
                };
                cursor += symbol.len();
                tokens.push((start, Token::Symbol(symbol)));
                continue;
            }
        };
        cursor += 1;
        tokens.push((start, token));
    }

    Ok(tokens)
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), ExprError> {
    let mut chars = source[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(ExprError::syntax(start, "expected string"));
    };
    let mut text = String::new();
    while let Some((offset, current)) = chars.next() {
        match current {
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            _ if current == quote => return Ok((text, start + offset + current.len_utf8())),
            _ => text.push(current),
        }
    }
    Err(ExprError::syntax(start, "unterminated string literal"))
}

fn lex_number(source: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = source.as_bytes();
    let mut end = start;
    let mut is_float = false;
    while let Some(&byte) = bytes.get(end) {
        match byte {
            b'0'..=b'9' | b'_' => end += 1,
            b'.' if !is_float => {
                is_float = true;
                end += 1;
            }
            b'e' | b'E' => {
                is_float = true;
                end += 1;
                if matches!(bytes.get(end), Some(b'+' | b'-')) {
                    end += 1;
                }
            }
            _ => break,
        }
    }
    let literal = source[start..end].replace('_', "");
    let token = if is_float {
        literal
            .parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ExprError::syntax(start, format!("invalid number '{literal}'")))?
    } else {
        literal
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ExprError::syntax(start, format!("invalid integer '{literal}'")))?
    };
    Ok((token, end))
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cursor: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|(_, token)| token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + offset).map(|(_, token)| token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map(|(position, _)| *position)
            .unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|(_, token)| token.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn at_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek(), Some(Token::Symbol(found)) if *found == symbol)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.at_keyword(keyword);
        if found {
            self.cursor += 1;
        }
        found
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        let found = self.at_symbol(symbol);
        if found {
            self.cursor += 1;
        }
        found
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        let position = self.position();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExprError::syntax(
                position,
                format!("expected {} but found {}", expected.describe(), token.describe()),
            )),
            None => Err(ExprError::syntax(
                position,
                format!("expected {} but reached end of expression", expected.describe()),
            )),
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::syntax(self.position(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut operands = vec![self.parse_and()?];
        while self.eat_keyword("or") || self.eat_symbol("||") {
            operands.push(self.parse_and()?);
        }
        self.depth -= 1;
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or(operands)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut operands = vec![self.parse_not()?];
        while self.eat_keyword("and") || self.eat_symbol("&&") {
            operands.push(self.parse_not()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And(operands)
        })
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.eat_keyword("not") || self.eat_symbol("!") {
            self.enter()?;
            let operand = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let first = self.parse_additive()?;
        let mut rest = Vec::new();
        while let Some(op) = self.compare_op() {
            rest.push((op, self.parse_additive()?));
        }
        Ok(if rest.is_empty() {
            first
        } else {
            Expr::Compare {
                first: Box::new(first),
                rest,
            }
        })
    }

    fn compare_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek()? {
            Token::Symbol("==") => CompareOp::Eq,
            Token::Symbol("!=") => CompareOp::Ne,
            Token::Symbol("<") => CompareOp::Lt,
            Token::Symbol("<=") => CompareOp::Le,
            Token::Symbol(">") => CompareOp::Gt,
            Token::Symbol(">=") => CompareOp::Ge,
            Token::Ident(name) if name == "in" => CompareOp::In,
            Token::Ident(name) if name == "is" => {
                if matches!(self.peek_at(1), Some(Token::Ident(next)) if next == "not") {
                    self.cursor += 2;
                    return Some(CompareOp::IsNot);
                }
                CompareOp::Is
            }
            Token::Ident(name) if name == "not" => {
                if matches!(self.peek_at(1), Some(Token::Ident(next)) if next == "in") {
                    self.cursor += 2;
                    return Some(CompareOp::NotIn);
                }
                return None;
            }
            _ => return None,
        };
        self.cursor += 1;
        Some(op)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_term()?;
        // Chains build left-deep trees, so every link counts toward the depth limit.
        let mut links = 0;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Sub
            } else {
                self.depth -= links;
                return Ok(left);
            };
            self.enter()?;
            links += 1;
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Mul
            } else if self.eat_symbol("/") {
                BinaryOp::Div
            } else if self.eat_symbol("%") {
                BinaryOp::Mod
            } else {
                self.depth -= links;
                return Ok(left);
            };
            self.enter()?;
            links += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat_symbol("-") {
            UnaryOp::Neg
        } else if self.eat_symbol("+") {
            UnaryOp::Plus
        } else {
            return self.parse_primary();
        };
        self.enter()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.position();
        let Some(token) = self.next() else {
            return Err(ExprError::syntax(position, "unexpected end of expression"));
        };
        match token {
            Token::Int(value) => Ok(Expr::Literal(Operand::Int(value))),
            Token::Float(value) => Ok(Expr::Literal(Operand::Float(value))),
            Token::Str(text) => Ok(Expr::Literal(Operand::Str(text))),
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Operand::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Operand::Bool(false))),
                "None" | "null" => Ok(Expr::Literal(Operand::None)),
                keyword if KEYWORDS.contains(&keyword) => Err(ExprError::syntax(
                    position,
                    format!("unexpected keyword '{keyword}'"),
                )),
                _ => Ok(Expr::Var(name)),
            },
            Token::LParen => {
                self.enter()?;
                if self.peek() == Some(&Token::RParen) {
                    self.cursor += 1;
                    self.depth -= 1;
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_or()?;
                let expr = if self.peek() == Some(&Token::Comma) {
                    let items = self.parse_sequence_tail(first, Token::RParen)?;
                    Expr::List(items)
                } else {
                    self.expect(Token::RParen)?;
                    first
                };
                self.depth -= 1;
                Ok(expr)
            }
            Token::LBracket => {
                self.enter()?;
                if self.peek() == Some(&Token::RBracket) {
                    self.cursor += 1;
                    self.depth -= 1;
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.parse_or()?;
                let items = self.parse_sequence_tail(first, Token::RBracket)?;
                self.depth -= 1;
                Ok(Expr::List(items))
            }
            other => Err(ExprError::syntax(
                position,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    fn parse_sequence_tail(&mut self, first: Expr, close: Token) -> Result<Vec<Expr>, ExprError> {
        let mut items = vec![first];
        while self.peek() == Some(&Token::Comma) {
            self.cursor += 1;
            if self.peek() == Some(&close) {
                break;
            }
            items.push(self.parse_or()?);
        }
        self.expect(close)?;
        Ok(items)
    }
}
