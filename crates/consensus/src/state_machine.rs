//! Consensus State Machine
//!
//! The round is driven by an explicit table mapping `(Step, Event)` to a
//! [`Transition`]: the action the engine performs and the step it lands in.
//! The engine observes its state to pick an [`Event`], looks the pair up
//! and runs the action; pairs missing from the table are rejected.
//!
//! # State Machine Diagram
//!
//! ```text
//! ┌────────────┐
//! │ NewNumber  │◄──────────────────────────────┐
//! └─────┬──────┘                               │
//!       │ Proceed / EnterPropose               │
//!       ▼                                      │
//! ┌────────────┐  ProposalMissing / Propose    │
//! │  Propose   │◄────────┐                     │
//! └─────┬──────┴─────────┘                     │
//!       │ ProposalReady / Prevote              │
//!       ▼                                      │
//! ┌────────────┐  QuorumPending / Wait         │
//! │  Prevote   │◄────────┐                     │
//! └─────┬──────┴─────────┘                     │
//!       │ PrevoteQuorum / Precommit            │
//!       ▼                                      │
//! ┌────────────┐  QuorumPending / Wait         │
//! │ Precommit  │◄────────┐                     │
//! └─────┬──────┴─────────┘                     │
//!       │ PrecommitQuorum / Commit             │
//!       ▼                                      │
//! ┌────────────┐                               │
//! │   Commit   │───────────────────────────────┘
//! └────────────┘  Proceed / NewNumber
//! ```
//!
//! `Stalled` is accepted in every step: the engine resynchronizes and stays
//! where it is.

use thiserror::Error;

use crate::types::Step;

/// Errors that can occur during state machine transitions
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    /// No transition is defined for the pair
    #[error("no transition from {step} on {event:?}")]
    InvalidTransition {
        /// Current step
        step: Step,
        /// Observed event
        event: Event,
    },
}

/// Result type for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;

/// What the engine observed about the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Nothing to wait for; move on
    Proceed,
    /// No proposal accepted yet
    ProposalMissing,
    /// A proposal has been accepted
    ProposalReady,
    /// Tallied stake is still below quorum
    QuorumPending,
    /// Prevotes reached two thirds of the stake
    PrevoteQuorum,
    /// Precommits reached two thirds of the stake
    PrecommitQuorum,
    /// The round has not moved for too long
    Stalled,
}

/// Work the engine performs on a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the round; propose if this node is the proposer
    EnterPropose,
    /// Propose if this node is the proposer and nothing is proposed yet
    Propose,
    /// Cast a prevote for the accepted proposal
    Prevote,
    /// Cast a precommit for the accepted proposal
    Precommit,
    /// Append the proposal to the chain and finalize state
    Commit,
    /// Re-arm for the next round
    NewNumber,
    /// Nothing to do yet
    Wait,
    /// Rebroadcast own votes and ask peers for blocks
    Resync,
}

/// Outcome of a table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Action to run
    pub action: Action,
    /// Step the engine moves to if the action succeeds
    pub next: Step,
}

impl Transition {
    const fn new(action: Action, next: Step) -> Self {
        Self { action, next }
    }

    /// Whether the transition changes step.
    pub fn advances(&self, from: Step) -> bool {
        self.next != from
    }
}

/// Looks up the transition for `(step, event)`.
pub fn transition(step: Step, event: Event) -> StateMachineResult<Transition> {
    use Action as A;
    use Event as E;

    let t = match (step, event) {
        (_, E::Stalled) => Transition::new(A::Resync, step),
        (Step::NewNumber, E::Proceed) => Transition::new(A::EnterPropose, Step::Propose),
        (Step::Propose, E::ProposalMissing) => Transition::new(A::Propose, Step::Propose),
        (Step::Propose, E::ProposalReady) => Transition::new(A::Prevote, Step::Prevote),
        (Step::Prevote, E::QuorumPending) => Transition::new(A::Wait, Step::Prevote),
        (Step::Prevote, E::PrevoteQuorum) => Transition::new(A::Precommit, Step::Precommit),
        (Step::Precommit, E::QuorumPending) => Transition::new(A::Wait, Step::Precommit),
        (Step::Precommit, E::PrecommitQuorum) => Transition::new(A::Commit, Step::Commit),
        (Step::Commit, E::Proceed) => Transition::new(A::NewNumber, Step::NewNumber),
        _ => return Err(StateMachineError::InvalidTransition { step, event }),
    };
    debug_assert!(t.next == step || step.can_transition_to(t.next));
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_visits_every_step_once() {
        let events = [
            Event::Proceed,
            Event::ProposalReady,
            Event::PrevoteQuorum,
            Event::PrecommitQuorum,
            Event::Proceed,
        ];
        let mut step = Step::NewNumber;
        let mut visited = vec![step];
        for event in events {
            step = transition(step, event).unwrap().next;
            visited.push(step);
        }
        assert_eq!(
            visited,
            vec![
                Step::NewNumber,
                Step::Propose,
                Step::Prevote,
                Step::Precommit,
                Step::Commit,
                Step::NewNumber
            ]
        );
    }

    #[test]
    fn test_pending_quorum_stays() {
        for step in [Step::Prevote, Step::Precommit] {
            let t = transition(step, Event::QuorumPending).unwrap();
            assert_eq!(t.action, Action::Wait);
            assert!(!t.advances(step));
        }
    }

    #[test]
    fn test_stalled_resyncs_in_place() {
        for step in [
            Step::NewNumber,
            Step::Propose,
            Step::Prevote,
            Step::Precommit,
            Step::Commit,
        ] {
            let t = transition(step, Event::Stalled).unwrap();
            assert_eq!(t.action, Action::Resync);
            assert_eq!(t.next, step);
        }
    }

    #[test]
    fn test_out_of_order_events_are_rejected() {
        assert!(transition(Step::NewNumber, Event::PrecommitQuorum).is_err());
        assert!(transition(Step::Propose, Event::PrevoteQuorum).is_err());
        assert!(transition(Step::Prevote, Event::PrecommitQuorum).is_err());
        assert!(transition(Step::Commit, Event::ProposalReady).is_err());
    }
}
