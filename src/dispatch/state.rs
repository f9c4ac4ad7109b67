//! Observable agent state.
//!
//! The state is derived rather than stored: the agent is `dispatching` while
//! at least one dispatch unit is processing a connection, `idle` otherwise,
//! and `stopped` once the accept loop has drained.

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Coarse agent state reported in ping replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No dispatch unit is running.
    Idle,
    /// At least one dispatch unit is processing a connection.
    Dispatching,
    /// The agent has shut down.
    Stopped,
}

impl AgentState {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Stopped => "stopped",
        }
    }
}

impl Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free counter of running dispatch units plus a stopped flag.
#[derive(Debug, Default)]
pub struct StateTracker {
    active: AtomicUsize,
    stopped: AtomicBool,
}

impl StateTracker {
    /// Current state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        if self.stopped.load(Ordering::Acquire) {
            AgentState::Stopped
        } else if self.active.load(Ordering::Acquire) > 0 {
            AgentState::Dispatching
        } else {
            AgentState::Idle
        }
    }

    /// Number of dispatch units currently processing a connection.
    #[must_use]
    pub fn active_units(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Mark one unit as started. The returned guard marks it finished on drop,
    /// including when the unit is aborted.
    #[must_use]
    pub fn enter(&self) -> UnitGuard<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        UnitGuard { tracker: self }
    }

    /// Mark the agent as stopped. Irreversible.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Held by a dispatch unit for as long as it processes a connection.
#[derive(Debug)]
pub struct UnitGuard<'a> {
    tracker: &'a StateTracker,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::AcqRel);
    }
}
