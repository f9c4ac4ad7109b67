//! Query reply construction for `ask-one`/`ask-all` style requests.

use super::marshal::{to_term, Value};
use super::performative::Performative;
use super::term::Term;
use crate::{AppError, Result};

/// How query results are reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Return the query with each variable replaced by its result.
    #[default]
    Pattern,
    /// Return `(?var . result)` bindings for the variables only.
    Bind,
}

impl ResponseMode {
    /// Read the mode from a message's `:response` field. Absent or
    /// `:pattern` selects [`ResponseMode::Pattern`]; anything else binds.
    #[must_use]
    pub fn from_field(field: Option<&Term>) -> Self {
        match field {
            None => Self::Pattern,
            Some(term) if term.as_atom().is_some_and(|a| a.eq_ignore_ascii_case(":pattern")) => {
                Self::Pattern
            }
            Some(_) => Self::Bind,
        }
    }
}

/// Build the `tell` reply for a query.
///
/// Walks the query arguments alongside `results` (a non-`Seq` result counts
/// as a one-element sequence). Each variable consumes one result; when the
/// last argument is a variable and more than one result remains, that
/// variable takes all remaining results as a single list. Non-variable
/// arguments are copied through in pattern mode and dropped in bind mode.
///
/// The reply is addressed back to the sender of `original`.
///
/// # Errors
///
/// Returns `AppError::Query` if `query` has no predicate, or if it contains
/// more variables than there are results.
pub fn build_query_reply(
    agent_name: &str,
    original: &Performative,
    query: &Term,
    results: &Value,
    mode: ResponseMode,
) -> Result<Performative> {
    let predicate = query
        .head()
        .ok_or_else(|| AppError::Query(format!("query has no predicate: {query}")))?;
    let args = query.as_list().map_or(&[][..], |items| &items[1..]);

    let results: &[Value] = match results {
        Value::Seq(items) => items,
        scalar => std::slice::from_ref(scalar),
    };

    let last = args.len().saturating_sub(1);
    let mut next = 0usize;
    let mut content = vec![Term::token(predicate)];

    for (i, arg) in args.iter().enumerate() {
        if arg.is_variable() {
            let bound = if i == last && next + 1 < results.len() {
                Value::Seq(results[next..].to_vec())
            } else {
                results
                    .get(next)
                    .cloned()
                    .ok_or_else(|| AppError::Query(format!("no result left for variable {arg}")))?
            };
            let bound = to_term(&bound);
            content.push(match mode {
                ResponseMode::Pattern => bound,
                ResponseMode::Bind => Term::dotted(arg.clone(), bound),
            });
            next += 1;
        } else if mode == ResponseMode::Pattern {
            content.push(arg.clone());
        }
    }

    let mut reply = Performative::new("tell")
        .with("sender", Term::token(agent_name))
        .with("content", Term::List(content));
    reply.address_reply_to(original);
    Ok(reply)
}
