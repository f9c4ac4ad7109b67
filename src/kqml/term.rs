//! Wire-level KQML terms and their S-expression reader/writer.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::{AppError, Result};

/// One node of a KQML value tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// Parenthesised sequence of terms.
    List(Vec<Term>),
    /// Unquoted atom (`tell`, `:content`, `?x`, `42`).
    Token(String),
    /// Double-quoted atom; may contain whitespace and escaped quotes.
    Str(String),
    /// `(car . cdr)`.
    DottedPair(Box<Term>, Box<Term>),
}

impl Term {
    /// Build a token.
    #[must_use]
    pub fn token(value: impl Into<String>) -> Self {
        Self::Token(value.into())
    }

    /// Build a quoted string.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Build a list.
    #[must_use]
    pub fn list(items: Vec<Term>) -> Self {
        Self::List(items)
    }

    /// Build a dotted pair.
    #[must_use]
    pub fn dotted(car: Term, cdr: Term) -> Self {
        Self::DottedPair(Box::new(car), Box::new(cdr))
    }

    /// The lisp `nil` token.
    #[must_use]
    pub fn nil() -> Self {
        Self::token("nil")
    }

    /// Text of a token or quoted string.
    #[must_use]
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Self::Token(s) | Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// First element of a list when it is a token, e.g. the predicate of a
    /// query or the verb of a performative.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        match self.as_list()?.first()? {
            Self::Token(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is a query variable (`?name`).
    #[must_use]
    pub fn is_variable(&self) -> bool {
        matches!(self, Self::Token(s) if s.starts_with('?'))
    }

    /// Whether this is a `:keyword` token.
    #[must_use]
    pub fn is_keyword(&self) -> bool {
        matches!(self, Self::Token(s) if s.starts_with(':'))
    }

    /// Parse exactly one term from `input`; trailing whitespace is allowed,
    /// anything else is not.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedMessage` on unbalanced parentheses,
    /// unterminated strings, empty input, or trailing data.
    pub fn parse(input: &str) -> Result<Self> {
        let mut reader = Reader::new(input);
        let term = reader.read_term()?;
        reader.skip_whitespace();
        if reader.peek().is_some() {
            return Err(AppError::MalformedMessage(format!(
                "trailing data after term at byte {}",
                reader.pos
            )));
        }
        Ok(term)
    }
}

impl FromStr for Term {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(s) => f.write_str(s),
            Self::Str(s) => {
                f.write_str("\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' | '\\' => write!(f, "\\{ch}")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        _ => write!(f, "{ch}")?,
                    }
                }
                f.write_str("\"")
            }
            Self::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::DottedPair(car, cdr) => write!(f, "({car} . {cdr})"),
        }
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn read_term(&mut self) -> Result<Term> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(AppError::MalformedMessage("unexpected end of input".into())),
            Some('(') => {
                self.bump();
                self.read_list()
            }
            Some(')') => Err(AppError::MalformedMessage(format!(
                "unexpected ')' at byte {}",
                self.pos
            ))),
            Some('"') => {
                self.bump();
                self.read_string()
            }
            Some(_) => Ok(self.read_token()),
        }
    }

    fn read_list(&mut self) -> Result<Term> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => {
                    return Err(AppError::MalformedMessage("unbalanced parentheses".into()));
                }
                Some(')') => {
                    self.bump();
                    break;
                }
                Some(_) => items.push(self.read_term()?),
            }
        }

        if items.len() == 3 && items[1] == Term::token(".") {
            let cdr = items.pop().unwrap_or_else(Term::nil);
            items.pop();
            let car = items.pop().unwrap_or_else(Term::nil);
            return Ok(Term::dotted(car, cdr));
        }
        Ok(Term::List(items))
    }

    fn read_string(&mut self) -> Result<Term> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(AppError::MalformedMessage("unterminated string".into())),
                Some('"') => return Ok(Term::Str(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some(escaped) => out.push(escaped),
                    None => {
                        return Err(AppError::MalformedMessage("unterminated string".into()));
                    }
                },
                Some(ch) => out.push(ch),
            }
        }
    }

    fn read_token(&mut self) -> Term {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == '(' || ch == ')' || ch == '"' {
                break;
            }
            self.bump();
        }
        Term::Token(self.src[start..self.pos].to_owned())
    }
}
