//! Unit tests for ping status replies and uptime arithmetic.

use chrono::NaiveDate;

use companions_agent::dispatch::{status_update, uptime_components, AgentIdentity, AgentState};

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .and_then(|date| date.and_hms_opt(h, mi, s))
        .expect("valid timestamp")
}

// ── Uptime ───────────────────────────────────────────────────────────────────

#[test]
fn uptime_splits_into_calendar_units() {
    let start = at(2024, 1, 10, 8, 0, 0);
    let now = at(2025, 3, 12, 10, 30, 15);
    assert_eq!(uptime_components(start, now), [1, 2, 2, 2, 30, 15]);
}

/// Crossing a month boundary before the day-of-month is reached does not
/// count a full month.
#[test]
fn partial_month_is_counted_in_days() {
    let start = at(2025, 1, 20, 12, 0, 0);
    let now = at(2025, 2, 5, 11, 0, 0);
    assert_eq!(uptime_components(start, now), [0, 0, 15, 23, 0, 0]);
}

#[test]
fn short_uptime_has_only_seconds() {
    let start = at(2025, 6, 1, 0, 0, 0);
    assert_eq!(
        uptime_components(start, at(2025, 6, 1, 0, 0, 42)),
        [0, 0, 0, 0, 0, 42]
    );
}

#[test]
fn clock_going_backwards_is_zero() {
    let start = at(2025, 6, 1, 0, 0, 0);
    assert_eq!(uptime_components(start, at(2025, 5, 1, 0, 0, 0)), [0; 6]);
}

// ── Status update ────────────────────────────────────────────────────────────

#[test]
fn status_update_carries_identity_and_state() {
    let identity = AgentIdentity {
        name: "Pinger".to_owned(),
        started_at: at(2025, 6, 1, 0, 0, 0),
        machine: "lab-7".to_owned(),
    };
    let update = status_update(&identity, at(2025, 6, 1, 1, 2, 3), AgentState::Idle, 4);

    assert_eq!(
        update.to_string(),
        "(update :sender Pinger :content (:agent Pinger :uptime (0 0 0 1 2 3) \
         :status :OK :state idle :machine lab-7 :subscriptions 4))"
    );
}

#[test]
fn agent_state_names() {
    assert_eq!(AgentState::Idle.to_string(), "idle");
    assert_eq!(AgentState::Dispatching.to_string(), "dispatching");
    assert_eq!(AgentState::Stopped.to_string(), "stopped");
}

#[test]
fn identity_now_records_this_machine() {
    let identity = AgentIdentity::now("Me");
    assert_eq!(identity.name, "Me");
    assert!(!identity.machine.is_empty());
}
