//! Conversion between native values and KQML terms.
//!
//! [`Value`] is the closed set of shapes an agent can hand to the wire.
//! [`to_term`] applies the conversion rules in a fixed precedence:
//!
//! 1. `Seq` becomes a list, element-wise.
//! 2. A two-element `Tuple` becomes a dotted pair; other arities become a
//!    list like `Seq`.
//! 3. `Str` without whitespace becomes a token. A string wrapped in
//!    parentheses is split on whitespace into a list of converted pieces.
//!    Any other string is quoted.
//! 4. `Bool` becomes `t` or `nil`.
//! 5. `Map` becomes a list of dotted pairs.
//! 6. Numbers become tokens of their decimal form.
//!
//! The parenthesised-string split in rule 3 is whitespace-only: nested
//! parentheses and embedded quoted strings are not respected, so
//! `"(a (b c))"` yields the tokens `a`, `(b`, `c))`.

use super::term::Term;
use crate::{AppError, Result};

/// A native value accepted by [`to_term`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Ordered sequence.
    Seq(Vec<Value>),
    /// Fixed-arity pair construct; arity two is a dotted pair.
    Tuple(Vec<Value>),
    /// String scalar.
    Str(String),
    /// Boolean.
    Bool(bool),
    /// Key/value mapping in insertion order.
    Map(Vec<(Value, Value)>),
    /// Integer scalar.
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
}

impl Value {
    /// A two-element pair.
    #[must_use]
    pub fn pair(car: impl Into<Value>, cdr: impl Into<Value>) -> Self {
        Self::Tuple(vec![car.into(), cdr.into()])
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::Seq(values.into_iter().map(Into::into).collect())
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((car, cdr): (A, B)) -> Self {
        Self::pair(car, cdr)
    }
}

/// Convert a native value into a term.
#[must_use]
pub fn to_term(value: &Value) -> Term {
    match value {
        Value::Seq(items) => Term::List(items.iter().map(to_term).collect()),
        Value::Tuple(items) if items.len() == 2 => {
            Term::dotted(to_term(&items[0]), to_term(&items[1]))
        }
        Value::Tuple(items) => Term::List(items.iter().map(to_term).collect()),
        Value::Str(s) => string_to_term(s),
        Value::Bool(true) => Term::token("t"),
        Value::Bool(false) => Term::nil(),
        Value::Map(entries) => Term::List(
            entries
                .iter()
                .map(|(k, v)| Term::dotted(to_term(k), to_term(v)))
                .collect(),
        ),
        Value::Int(n) => Term::token(n.to_string()),
        Value::Float(x) => Term::token(x.to_string()),
    }
}

fn string_to_term(s: &str) -> Term {
    // An empty token would vanish on the wire.
    if s.is_empty() {
        return Term::string("");
    }
    if !s.chars().any(char::is_whitespace) {
        return Term::token(s);
    }
    if s.len() >= 2 && s.starts_with('(') && s.ends_with(')') {
        let inner = &s[1..s.len() - 1];
        return Term::List(inner.split_whitespace().map(string_to_term).collect());
    }
    Term::string(s)
}

/// Convert a term back into a native value.
///
/// Lists become `Seq`, dotted pairs become two-element `Tuple`s, the tokens
/// `t` and `nil` become booleans, and every other atom becomes `Str`.
#[must_use]
pub fn from_term(term: &Term) -> Value {
    match term {
        Term::List(items) => Value::Seq(items.iter().map(from_term).collect()),
        Term::DottedPair(car, cdr) => Value::Tuple(vec![from_term(car), from_term(cdr)]),
        Term::Token(t) if t == "t" => Value::Bool(true),
        Term::Token(t) if t == "nil" => Value::Bool(false),
        Term::Token(s) | Term::Str(s) => Value::Str(s.clone()),
    }
}

/// Lisp truthiness: the token `nil` and the empty list are false, everything
/// else is true.
#[must_use]
pub fn convert_to_boolean(term: &Term) -> bool {
    match term {
        Term::Token(t) => t != "nil",
        Term::List(items) => !items.is_empty(),
        _ => true,
    }
}

/// Read an integer out of a token or string atom.
///
/// # Errors
///
/// Returns `AppError::MalformedMessage` when the term is not an atom or its
/// text is not an integer.
pub fn convert_to_int(term: &Term) -> Result<i64> {
    let text = term
        .as_atom()
        .ok_or_else(|| AppError::MalformedMessage(format!("expected integer atom, got {term}")))?;
    text.trim()
        .parse::<i64>()
        .map_err(|err| AppError::MalformedMessage(format!("invalid integer {text}: {err}")))
}
