use thiserror::Error;

use crate::{
    clients::ClientError,
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError},
};

/// Errors surfaced by the round coordination services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The shared store could not serve the request.
    #[error("storage failure")]
    Storage(#[source] StorageError),
    /// A follower has not observed the host's write yet.
    #[error("host write not observed yet: {0}")]
    SyncDelay(String),
    /// The judge could not score the round; results stay pending.
    #[error("scoring failed")]
    ScoringFailed(#[source] ClientError),
    /// The player already consumed the hint of this round.
    #[error("hint already used this round")]
    HintAlreadyUsed,
    /// The session does not allow hints.
    #[error("hints are disabled for this game")]
    HintsDisabled,
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested record was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Storage(err)
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("state transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "state changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "state version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("transition plan does not match".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_machine::{GameEvent, GamePhase, InvalidTransition};

    #[test]
    fn invalid_transition_reads_as_invalid_state() {
        let err: ServiceError = PlanError::InvalidTransition(InvalidTransition {
            from: GamePhase::Done,
            round_no: 3,
            event: GameEvent::FinishGame,
        })
        .into();
        match err {
            ServiceError::InvalidState(message) => assert!(message.contains("Done")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn storage_conflict_is_wrapped() {
        let err: ServiceError = StorageError::conflict("hint::x").into();
        assert!(matches!(err, ServiceError::Storage(StorageError::Conflict { .. })));
    }
}
