//! Ping replies: who the agent is, how long it has been up, what it is doing.

use chrono::{Datelike, Local, Months, NaiveDateTime};

use crate::dispatch::state::AgentState;
use crate::kqml::{Performative, Term};

/// Identity reported in ping replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    /// Agent name.
    pub name: String,
    /// Local wall-clock start time.
    pub started_at: NaiveDateTime,
    /// Host name of this machine.
    pub machine: String,
}

impl AgentIdentity {
    /// Identity for `name` starting now on this machine.
    #[must_use]
    pub fn now(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Local::now().naive_local(),
            machine: machine_name(),
        }
    }
}

/// Calendar difference between `start` and `now` as
/// `[years, months, days, hours, minutes, seconds]`.
///
/// Months are counted on the calendar, so one month after January 31st is
/// the last day of February. A `now` before `start` yields all zeros.
#[must_use]
pub fn uptime_components(start: NaiveDateTime, now: NaiveDateTime) -> [i64; 6] {
    if now <= start {
        return [0; 6];
    }
    let add = |months: i64| {
        u32::try_from(months)
            .ok()
            .and_then(|m| start.checked_add_months(Months::new(m)))
    };

    let mut months = i64::from(now.year() - start.year()) * 12
        + i64::from(now.month()) - i64::from(start.month());
    let mut anchor = add(months).unwrap_or(start);
    while months > 0 && anchor > now {
        months -= 1;
        anchor = add(months).unwrap_or(start);
    }

    let rest = now - anchor;
    [
        months / 12,
        months % 12,
        rest.num_days(),
        rest.num_hours() % 24,
        rest.num_minutes() % 60,
        rest.num_seconds() % 60,
    ]
}

/// Build the `update` sent in answer to a ping.
#[must_use]
pub fn status_update(
    identity: &AgentIdentity,
    now: NaiveDateTime,
    state: AgentState,
    subscriptions: usize,
) -> Performative {
    let uptime = uptime_components(identity.started_at, now)
        .iter()
        .map(|part| Term::token(part.to_string()))
        .collect();
    let content = Term::List(vec![
        Term::token(":agent"),
        Term::token(identity.name.clone()),
        Term::token(":uptime"),
        Term::List(uptime),
        Term::token(":status"),
        Term::token(":OK"),
        Term::token(":state"),
        Term::token(state.as_str()),
        Term::token(":machine"),
        Term::token(identity.machine.clone()),
        Term::token(":subscriptions"),
        Term::token(subscriptions.to_string()),
    ]);
    Performative::new("update")
        .with("sender", Term::token(identity.name.clone()))
        .with("content", content)
}

#[cfg(unix)]
fn machine_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(not(unix))]
fn machine_name() -> String {
    std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_owned())
}
