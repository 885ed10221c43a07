//! Player submissions: one answer row per player per round.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::{
    dao::{
        game_store::{AnswerWrite, GameStore},
        models::{AnswerFields, Millis, PlayerAnswerEntity, PlayerEntity, RoundRecordEntity},
    },
    error::ServiceError,
};

/// Write the answers of `user_id` for `round` as submitted at `now`.
///
/// Returns the written row, or `None` when the player had already submitted:
/// the first submitted row stays untouched.
pub async fn submit(
    store: &dyn GameStore,
    round: &RoundRecordEntity,
    user_id: &str,
    fields: AnswerFields,
    now: Millis,
) -> Result<Option<PlayerAnswerEntity>, ServiceError> {
    let answer = PlayerAnswerEntity {
        round_id: round.id,
        user_id: user_id.to_string(),
        game_code: round.game_code.clone(),
        fields,
        submitted_at: Some(now),
        duration_ms: Some((now - round.started_at).max(0) as u64),
    };

    match store.put_answer(answer.clone()).await? {
        AnswerWrite::Written => {
            info!(
                game = %round.game_code,
                round = round.round_no,
                user = user_id,
                "answers submitted"
            );
            Ok(Some(answer))
        }
        AnswerWrite::AlreadySubmitted => {
            debug!(
                game = %round.game_code,
                round = round.round_no,
                user = user_id,
                "duplicate submission ignored"
            );
            Ok(None)
        }
    }
}

/// Whether every roster member has a submitted answer row.
///
/// A roster containing a guest (no `user_id`) never counts as complete, nor
/// does an empty roster.
pub fn all_submitted(roster: &[PlayerEntity], answers: &[PlayerAnswerEntity]) -> bool {
    if roster.is_empty() {
        return false;
    }
    let submitted: HashSet<&str> = answers
        .iter()
        .filter(|answer| answer.submitted_at.is_some())
        .map(|answer| answer.user_id.as_str())
        .collect();

    roster.iter().all(|player| {
        player
            .user_id
            .as_deref()
            .is_some_and(|user_id| submitted.contains(user_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{
            game_store::memory::MemoryGameStore,
            models::{RoundStatus, round_id},
        },
    };

    fn player(user_id: Option<&str>) -> PlayerEntity {
        PlayerEntity {
            game_code: "ABCD".into(),
            user_id: user_id.map(str::to_string),
            name: user_id.unwrap_or("guest").into(),
            joined_at: 0,
        }
    }

    fn answer(user_id: &str, submitted: bool) -> PlayerAnswerEntity {
        PlayerAnswerEntity {
            round_id: round_id("ABCD", 1),
            user_id: user_id.into(),
            game_code: "ABCD".into(),
            fields: AnswerFields::default(),
            submitted_at: submitted.then_some(10),
            duration_ms: None,
        }
    }

    #[test]
    fn complete_roster_counts_as_all_submitted() {
        let roster = [player(Some("a")), player(Some("b"))];
        let answers = [answer("a", true), answer("b", true)];
        assert!(all_submitted(&roster, &answers));
    }

    #[test]
    fn drafts_do_not_count() {
        let roster = [player(Some("a")), player(Some("b"))];
        let answers = [answer("a", true), answer("b", false)];
        assert!(!all_submitted(&roster, &answers));
    }

    #[test]
    fn guests_disable_the_fast_path() {
        let roster = [player(Some("a")), player(None)];
        let answers = [answer("a", true)];
        assert!(!all_submitted(&roster, &answers));
        assert!(!all_submitted(&[], &answers));
    }

    #[tokio::test]
    async fn duration_is_measured_from_round_start() {
        let store = MemoryGameStore::new();
        let round = RoundRecordEntity {
            id: round_id("ABCD", 1),
            game_code: "ABCD".into(),
            round_no: 1,
            letter: "U".into(),
            started_at: 1_000,
            ended_at: None,
            status: RoundStatus::Active,
            scored_at: None,
        };

        let first = submit(&store, &round, "a", AnswerFields::default(), 13_500)
            .await
            .unwrap();
        let second = submit(&store, &round, "a", AnswerFields::default(), 20_000)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let rows = store.list_answers(round.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_ms, Some(12_500));
    }
}
