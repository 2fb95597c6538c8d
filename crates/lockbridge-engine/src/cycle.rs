//! Reconciliation cycle state machine.
//!
//! Every device owns one [`CycleTracker`]. A target-state request walks it
//! through a fixed sequence of phases, and the tracker enforces that order,
//! keeps the polling deadline, and records a bounded transition history.
//!
//! # Phases
//!
//! - `Idle`: no request in flight; the periodic poller may observe the device
//! - `Actuating`: target echoed to the hub, remote `lock()`/`unlock()` in flight
//! - `Polling`: waiting for the physical state to confirm the request
//! - `Resolved`: outcome decided and published
//!
//! # Valid Transitions
//!
//! - Idle → Actuating → Polling → Resolved → Idle
//! - Actuating → Resolved (actuation failed or request superseded)
//!
//! # Examples
//!
//! ```
//! use lockbridge_engine::cycle::{CyclePhase, CycleTracker};
//!
//! let mut tracker = CycleTracker::new();
//! assert_eq!(tracker.phase(), CyclePhase::Idle);
//!
//! tracker.transition_to(CyclePhase::Actuating).unwrap();
//! assert!(tracker.is_active());
//!
//! // Polling cannot be skipped straight back to Idle
//! assert!(tracker.transition_to(CyclePhase::Idle).is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use lockbridge_core::constants::MAX_CYCLE_HISTORY;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// Phase of a device's reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// No request in flight.
    Idle,

    /// Remote actuation requested.
    Actuating,

    /// Polling the physical state for confirmation.
    Polling,

    /// Outcome decided.
    Resolved,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            CyclePhase::Idle => "Idle",
            CyclePhase::Actuating => "Actuating",
            CyclePhase::Polling => "Polling",
            CyclePhase::Resolved => "Resolved",
        };
        write!(f, "{}", phase)
    }
}

impl CyclePhase {
    /// Check if transition to target phase is valid from this phase.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockbridge_engine::cycle::CyclePhase;
    ///
    /// assert!(CyclePhase::Idle.can_transition_to(&CyclePhase::Actuating));
    /// assert!(CyclePhase::Actuating.can_transition_to(&CyclePhase::Resolved));
    /// assert!(!CyclePhase::Idle.can_transition_to(&CyclePhase::Polling));
    /// ```
    pub fn can_transition_to(&self, target: &CyclePhase) -> bool {
        matches!(
            (self, target),
            (CyclePhase::Idle, CyclePhase::Actuating)
                | (CyclePhase::Actuating, CyclePhase::Polling | CyclePhase::Resolved)
                | (CyclePhase::Polling, CyclePhase::Resolved)
                | (CyclePhase::Resolved, CyclePhase::Idle)
        )
    }

    /// Returns `true` while a request is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, CyclePhase::Actuating | CyclePhase::Polling)
    }
}

/// A single recorded phase change.
#[derive(Debug, Clone)]
pub struct CycleTransition {
    /// Cycle the transition belongs to.
    pub cycle_id: Option<Uuid>,

    /// The phase transitioned from.
    pub from: CyclePhase,

    /// The phase transitioned to.
    pub to: CyclePhase,

    /// When the transition occurred.
    pub timestamp: Instant,
}

impl CycleTransition {
    fn new(cycle_id: Option<Uuid>, from: CyclePhase, to: CyclePhase) -> Self {
        Self {
            cycle_id,
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    /// Get the duration since this transition occurred.
    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Per-device cycle state machine.
///
/// Uses Tokio's clock so deadlines follow paused time in tests.
///
/// # Thread Safety
///
/// Not synchronized. The engine keeps it behind the device's cycle mutex,
/// and holding that mutex is what makes a cycle exclusive.
#[derive(Debug)]
pub struct CycleTracker {
    phase: CyclePhase,
    phase_entered_at: Instant,
    cycle_id: Option<Uuid>,
    history: VecDeque<CycleTransition>,
    timeout: Option<Duration>,
    completed_cycles: u64,
}

impl CycleTracker {
    /// Create a tracker in the `Idle` phase.
    pub fn new() -> Self {
        Self {
            phase: CyclePhase::Idle,
            phase_entered_at: Instant::now(),
            cycle_id: None,
            history: VecDeque::with_capacity(MAX_CYCLE_HISTORY),
            timeout: None,
            completed_cycles: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Returns `true` while a request is in flight.
    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Identifier of the cycle in progress, if any.
    pub fn cycle_id(&self) -> Option<Uuid> {
        self.cycle_id
    }

    /// Number of cycles that reached `Idle` again since creation.
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    /// Start a new cycle: `Idle → Actuating`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTransition` if a cycle is already running.
    pub fn begin(&mut self, cycle_id: Uuid) -> Result<CycleTransition> {
        self.check(CyclePhase::Actuating)?;
        self.cycle_id = Some(cycle_id);
        Ok(self.change(CyclePhase::Actuating))
    }

    /// Transition to a new phase, validating the transition.
    ///
    /// Returning to `Idle` closes the cycle and clears its identifier.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidTransition` if the transition is not
    /// allowed from the current phase.
    pub fn transition_to(&mut self, phase: CyclePhase) -> Result<CycleTransition> {
        self.check(phase)?;
        let transition = self.change(phase);
        if phase == CyclePhase::Idle {
            self.cycle_id = None;
            self.completed_cycles += 1;
        }
        Ok(transition)
    }

    /// Close the current cycle from wherever it stands: `→ Resolved → Idle`.
    ///
    /// Used on every exit path so the tracker is always left `Idle`.
    pub fn finish(&mut self) {
        if self.phase.is_active() {
            self.change(CyclePhase::Resolved);
        }
        if self.phase == CyclePhase::Resolved {
            self.change(CyclePhase::Idle);
            self.cycle_id = None;
            self.completed_cycles += 1;
        }
    }

    /// Get the time elapsed in the current phase.
    pub fn time_in_phase(&self) -> Duration {
        self.phase_entered_at.elapsed()
    }

    /// Set a deadline for the current phase and return it.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use lockbridge_engine::cycle::CycleTracker;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let mut tracker = CycleTracker::new();
    /// tracker.set_timeout(Duration::from_secs(5));
    /// assert!(!tracker.has_timed_out());
    /// # }
    /// ```
    pub fn set_timeout(&mut self, timeout: Duration) -> Instant {
        self.timeout = Some(timeout);
        self.phase_entered_at + timeout
    }

    /// Returns `true` if a deadline is set and has passed.
    pub fn has_timed_out(&self) -> bool {
        self.timeout
            .is_some_and(|timeout| self.time_in_phase() >= timeout)
    }

    /// Remaining time before the deadline, if one is set and not yet passed.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.timeout
            .and_then(|timeout| timeout.checked_sub(self.time_in_phase()))
    }

    /// Instant at which the current phase times out, if a deadline is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| self.phase_entered_at + timeout)
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> &VecDeque<CycleTransition> {
        &self.history
    }

    /// Get the last N transitions.
    pub fn last_transitions(&self, count: usize) -> Vec<CycleTransition> {
        self.history
            .iter()
            .rev()
            .take(count)
            .rev()
            .cloned()
            .collect()
    }

    fn check(&self, phase: CyclePhase) -> Result<()> {
        if self.phase.can_transition_to(&phase) {
            Ok(())
        } else {
            Err(EngineError::InvalidTransition {
                from: self.phase,
                to: phase,
            })
        }
    }

    fn change(&mut self, phase: CyclePhase) -> CycleTransition {
        let transition = CycleTransition::new(self.cycle_id, self.phase, phase);
        self.phase = phase;
        self.phase_entered_at = Instant::now();
        self.timeout = None;

        self.history.push_back(transition.clone());
        if self.history.len() > MAX_CYCLE_HISTORY {
            self.history.pop_front();
        }
        transition
    }
}

impl Default for CycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_new_tracker_starts_idle() {
        let tracker = CycleTracker::new();
        assert_eq!(tracker.phase(), CyclePhase::Idle);
        assert!(!tracker.is_active());
        assert!(tracker.history().is_empty());
        assert_eq!(tracker.cycle_id(), None);
    }

    #[test]
    fn test_full_cycle() {
        let mut tracker = CycleTracker::new();
        let id = Uuid::new_v4();

        let t = tracker.begin(id).unwrap();
        assert_eq!((t.from, t.to), (CyclePhase::Idle, CyclePhase::Actuating));
        assert_eq!(t.cycle_id, Some(id));

        tracker.transition_to(CyclePhase::Polling).unwrap();
        tracker.transition_to(CyclePhase::Resolved).unwrap();
        tracker.transition_to(CyclePhase::Idle).unwrap();

        assert_eq!(tracker.phase(), CyclePhase::Idle);
        assert_eq!(tracker.cycle_id(), None);
        assert_eq!(tracker.completed_cycles(), 1);
        assert_eq!(tracker.history().len(), 4);
    }

    #[test]
    fn test_begin_while_active_is_rejected() {
        let mut tracker = CycleTracker::new();
        tracker.begin(Uuid::new_v4()).unwrap();

        let err = tracker.begin(Uuid::new_v4()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: CyclePhase::Actuating,
                to: CyclePhase::Actuating
            }
        ));
    }

    #[rstest]
    #[case(CyclePhase::Idle, CyclePhase::Polling)]
    #[case(CyclePhase::Idle, CyclePhase::Resolved)]
    #[case(CyclePhase::Polling, CyclePhase::Actuating)]
    #[case(CyclePhase::Polling, CyclePhase::Idle)]
    #[case(CyclePhase::Resolved, CyclePhase::Polling)]
    fn test_invalid_transitions(#[case] from: CyclePhase, #[case] to: CyclePhase) {
        assert!(!from.can_transition_to(&to));
    }

    #[test]
    fn test_finish_from_any_phase() {
        let mut tracker = CycleTracker::new();
        tracker.begin(Uuid::new_v4()).unwrap();
        tracker.finish();
        assert_eq!(tracker.phase(), CyclePhase::Idle);

        tracker.begin(Uuid::new_v4()).unwrap();
        tracker.transition_to(CyclePhase::Polling).unwrap();
        tracker.finish();
        assert_eq!(tracker.phase(), CyclePhase::Idle);
        assert_eq!(tracker.completed_cycles(), 2);

        // Idle stays Idle without recording anything
        let before = tracker.history().len();
        tracker.finish();
        assert_eq!(tracker.history().len(), before);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = CycleTracker::new();
        for _ in 0..MAX_CYCLE_HISTORY {
            tracker.begin(Uuid::new_v4()).unwrap();
            tracker.finish();
        }
        assert_eq!(tracker.history().len(), MAX_CYCLE_HISTORY);
        assert_eq!(tracker.last_transitions(2).len(), 2);
        assert_eq!(
            tracker.last_transitions(1)[0].to,
            CyclePhase::Idle
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_follows_tokio_clock() {
        let mut tracker = CycleTracker::new();
        tracker.begin(Uuid::new_v4()).unwrap();
        tracker.transition_to(CyclePhase::Polling).unwrap();
        let started = tokio::time::Instant::now();
        let deadline = tracker.set_timeout(Duration::from_secs(5));
        assert_eq!(deadline, started + Duration::from_secs(5));
        assert_eq!(tracker.deadline(), Some(deadline));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!tracker.has_timed_out());
        assert_eq!(tracker.time_remaining(), Some(Duration::from_secs(2)));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(tracker.has_timed_out());
        assert_eq!(tracker.time_remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_transition_clears_timeout() {
        let mut tracker = CycleTracker::new();
        tracker.begin(Uuid::new_v4()).unwrap();
        tracker.set_timeout(Duration::from_secs(1));
        tracker.transition_to(CyclePhase::Polling).unwrap();
        assert_eq!(tracker.time_remaining(), None);
        assert_eq!(tracker.deadline(), None);
    }
}
