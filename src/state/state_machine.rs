use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Top-level phase of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Session created by the lobby; no round has started yet.
    Lobby,
    /// A round is running and accepting answers.
    Playing,
    /// The round ended; results are being computed or displayed.
    Scoring,
    /// The final round was scored. Terminal.
    Done,
}

/// What caused a round to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The shared countdown reached zero.
    TimerExpired,
    /// Every registered player submitted.
    AllSubmitted,
    /// Race mode: somebody submitted first.
    FirstSubmission,
    /// The host closed the round explicitly.
    HostAction,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    /// Open round `round_no`, which must directly follow the current one.
    StartRound {
        /// Number of the round being opened.
        round_no: u32,
    },
    /// Close round `round_no`, which must be the one running.
    EndRound {
        /// Number of the round being closed.
        round_no: u32,
        /// What triggered the close.
        reason: EndReason,
    },
    /// Leave scoring for good after the last configured round.
    FinishGame,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?} (round {round_no})")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GamePhase,
    /// The round the state machine was on.
    pub round_no: u32,
    /// The event that cannot be applied from this phase.
    pub event: GameEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: GamePhase,
        /// Current phase.
        actual: GamePhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: GamePhase,
    /// Phase the state machine will transition to.
    pub to: GamePhase,
    /// Round number after applying this transition.
    pub round_no_next: u32,
    /// Event that triggered this transition.
    pub event: GameEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GamePhase,
    /// Current round number.
    pub round_no: u32,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<GamePhase>,
}

/// Forward-only phase machine owned by the host.
///
/// `Lobby → Playing → Scoring → (Playing | Done)`. Round numbers only grow,
/// one at a time, and never past `rounds_total`.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    phase: GamePhase,
    round_no: u32,
    rounds_total: u32,
    version: usize,
    pending: Option<Plan>,
}

impl GameStateMachine {
    /// Create a machine for a fresh session sitting in the lobby.
    pub fn new(rounds_total: u32) -> Self {
        Self::resume(GamePhase::Lobby, 0, rounds_total)
    }

    /// Rebuild the machine from persisted session state.
    pub fn resume(phase: GamePhase, round_no: u32, rounds_total: u32) -> Self {
        Self {
            phase,
            round_no,
            rounds_total,
            version: 0,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Current round number, `0` before the first round.
    pub fn round_no(&self) -> u32 {
        self.round_no
    }

    /// Whether the current round is the last configured one.
    pub fn is_final_round(&self) -> bool {
        self.round_no >= self.rounds_total
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            round_no: self.round_no,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    /// Returns a Plan that can later be applied or aborted.
    pub fn plan(&mut self, event: GameEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let (next, round_no_next) = self
            .compute_transition(&event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            round_no_next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.round_no = plan.round_no_next;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it, returning the state machine to its
    /// previous state.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: &GameEvent) -> Result<(GamePhase, u32), InvalidTransition> {
        let next = match (self.phase, event) {
            (GamePhase::Lobby | GamePhase::Scoring, GameEvent::StartRound { round_no })
                if *round_no == self.round_no + 1 && *round_no <= self.rounds_total =>
            {
                (GamePhase::Playing, *round_no)
            }
            (GamePhase::Playing, GameEvent::EndRound { round_no, .. })
                if *round_no == self.round_no =>
            {
                (GamePhase::Scoring, self.round_no)
            }
            (GamePhase::Scoring, GameEvent::FinishGame) if self.is_final_round() => {
                (GamePhase::Done, self.round_no)
            }
            (from, _) => {
                return Err(InvalidTransition {
                    from,
                    round_no: self.round_no,
                    event: event.clone(),
                });
            }
        };

        Ok(next)
    }
}
