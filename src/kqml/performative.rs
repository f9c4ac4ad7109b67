//! KQML performatives: a verb plus ordered `:keyword value` fields.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use super::term::Term;
use crate::{AppError, Result};

/// Verbs the dispatcher treats as regular performatives and hands to the
/// application handler. `ping` is answered by the dispatch engine itself;
/// any other verb is answered with an error reply.
pub const KNOWN_PERFORMATIVES: &[&str] = &[
    "ask-if",
    "ask-all",
    "ask-one",
    "stream-all",
    "tell",
    "untell",
    "deny",
    "insert",
    "uninsert",
    "delete-one",
    "delete-all",
    "undelete",
    "achieve",
    "unachieve",
    "advertise",
    "unadvertise",
    "subscribe",
    "standby",
    "register",
    "forward",
    "broadcast",
    "transport-address",
    "broker-one",
    "broker-all",
    "recommend-one",
    "recommend-all",
    "recruit-one",
    "recruit-all",
    "reply",
    "request",
    "eos",
    "error",
    "sorry",
    "ready",
    "next",
    "rest",
    "discard",
];

/// Returns `true` when `verb` is in [`KNOWN_PERFORMATIVES`].
#[must_use]
pub fn is_known_performative(verb: &str) -> bool {
    KNOWN_PERFORMATIVES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(verb))
}

fn normalize_key(key: &str) -> &str {
    key.strip_prefix(':').unwrap_or(key)
}

/// A typed protocol message.
///
/// Field order is preserved for serialization; lookups ignore ASCII case and
/// an optional leading `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Performative {
    verb: String,
    fields: Vec<(String, Term)>,
}

impl Performative {
    /// Empty performative with the given verb.
    #[must_use]
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            fields: Vec::new(),
        }
    }

    /// The verb (`tell`, `ping`, ...).
    #[must_use]
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Case-insensitive verb comparison.
    #[must_use]
    pub fn is(&self, verb: &str) -> bool {
        self.verb.eq_ignore_ascii_case(verb)
    }

    /// Fields in wire order, keys without the leading `:`.
    #[must_use]
    pub fn fields(&self) -> &[(String, Term)] {
        &self.fields
    }

    /// Look up a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Term> {
        let key = normalize_key(key);
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Atom text of a field value, if the field is a token or string.
    #[must_use]
    pub fn get_atom(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Term::as_atom)
    }

    /// Replace a field in place, or append it when absent.
    pub fn set(&mut self, key: &str, value: Term) {
        let key = normalize_key(key);
        if let Some(slot) = self
            .fields
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            slot.1 = value;
        } else {
            self.fields.push((key.to_owned(), value));
        }
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: &str, value: Term) -> Self {
        self.set(key, value);
        self
    }

    /// Address `self` as a reply to `original`: `:receiver` becomes the
    /// original `:sender` and `:in-reply-to` echoes the original
    /// `:reply-with`, each only when present.
    pub fn address_reply_to(&mut self, original: &Performative) {
        if let Some(sender) = original.get("sender") {
            self.set("receiver", sender.clone());
        }
        if let Some(reply_with) = original.get("reply-with") {
            self.set("in-reply-to", reply_with.clone());
        }
    }

    /// The performative as a term tree.
    #[must_use]
    pub fn to_term(&self) -> Term {
        let mut items = Vec::with_capacity(1 + self.fields.len() * 2);
        items.push(Term::token(self.verb.clone()));
        for (key, value) in &self.fields {
            items.push(Term::token(format!(":{key}")));
            items.push(value.clone());
        }
        Term::List(items)
    }

    /// Interpret a term tree as a performative.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedMessage` if the term is not a list
    /// starting with a verb token followed by `:keyword value` pairs.
    pub fn from_term(term: &Term) -> Result<Self> {
        let items = term.as_list().ok_or_else(|| {
            AppError::MalformedMessage(format!("performative must be a list: {term}"))
        })?;
        let (verb, rest) = items
            .split_first()
            .ok_or_else(|| AppError::MalformedMessage("empty performative".into()))?;
        let verb = match verb {
            Term::Token(v) if !v.starts_with(':') => v.clone(),
            other => {
                return Err(AppError::MalformedMessage(format!(
                    "performative verb must be a token: {other}"
                )))
            }
        };

        if rest.len() % 2 != 0 {
            return Err(AppError::MalformedMessage(format!(
                "keyword without value in {verb} performative"
            )));
        }

        let mut fields = Vec::with_capacity(rest.len() / 2);
        for pair in rest.chunks_exact(2) {
            match &pair[0] {
                Term::Token(key) if key.starts_with(':') => {
                    fields.push((normalize_key(key).to_owned(), pair[1].clone()));
                }
                other => {
                    return Err(AppError::MalformedMessage(format!(
                        "expected :keyword in {verb} performative, got {other}"
                    )))
                }
            }
        }

        Ok(Self { verb, fields })
    }
}

impl FromStr for Performative {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        parse_message(s)
    }
}

impl Display for Performative {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_term())
    }
}

/// Parse a performative from its wire string.
///
/// # Errors
///
/// Returns `AppError::MalformedMessage` if `raw` is not a syntactically
/// valid performative.
pub fn parse_message(raw: &str) -> Result<Performative> {
    let term = Term::parse(raw)?;
    Performative::from_term(&term)
}
