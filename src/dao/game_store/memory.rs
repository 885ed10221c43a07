//! In-process store backend. Every record kind lives in its own `DashMap`
//! keyed by the natural key; changes fan out through a broadcast channel.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    StreamExt,
    future::{BoxFuture, ready},
    stream::BoxStream,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::warn;
use uuid::Uuid;

use crate::dao::{
    game_store::{AnswerWrite, ChangeEvent, ChangeFilter, GameStore},
    models::{
        GameSessionEntity, HintUsageEntity, PlayerAnswerEntity, PlayerEntity, RoundRecordEntity,
        RoundScoreEntity,
    },
    storage::{StorageError, StorageResult},
};

const CHANGE_CAPACITY: usize = 256;

/// Shared-store implementation backed by process memory.
#[derive(Clone)]
pub struct MemoryGameStore {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: DashMap<String, GameSessionEntity>,
    rounds: DashMap<(String, u32), RoundRecordEntity>,
    answers: DashMap<(Uuid, String), PlayerAnswerEntity>,
    hints: DashMap<String, HintUsageEntity>,
    scores: DashMap<(Uuid, String), RoundScoreEntity>,
    players: DashMap<String, Vec<PlayerEntity>>,
    changes: broadcast::Sender<ChangeEvent>,
    notify: AtomicBool,
}

impl Default for MemoryGameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGameStore {
    /// Create an empty store with notifications enabled.
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                rounds: DashMap::new(),
                answers: DashMap::new(),
                hints: DashMap::new(),
                scores: DashMap::new(),
                players: DashMap::new(),
                changes,
                notify: AtomicBool::new(true),
            }),
        }
    }

    /// Register a roster entry, as the lobby does before a game starts.
    pub fn add_player(&self, player: PlayerEntity) {
        self.inner
            .players
            .entry(player.game_code.clone())
            .or_default()
            .push(player);
    }

    /// Toggle change delivery; writes still land while notifications are off.
    pub fn set_notifications(&self, enabled: bool) {
        self.inner.notify.store(enabled, Ordering::SeqCst);
    }

    /// Number of hint ledger rows, across every game.
    pub fn hint_usage_count(&self) -> usize {
        self.inner.hints.len()
    }
}

impl Inner {
    fn publish(&self, event: ChangeEvent) {
        if self.notify.load(Ordering::SeqCst) {
            let _ = self.changes.send(event);
        }
    }
}

impl GameStore for MemoryGameStore {
    fn find_session(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>> {
        let found = self.inner.sessions.get(code).map(|entry| entry.clone());
        Box::pin(ready(Ok(found)))
    }

    fn save_session(&self, session: GameSessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.sessions.insert(session.code.clone(), session.clone());
            inner.publish(ChangeEvent::Session(session));
            Ok(())
        })
    }

    fn find_round(
        &self,
        code: &str,
        round_no: u32,
    ) -> BoxFuture<'static, StorageResult<Option<RoundRecordEntity>>> {
        let found = self
            .inner
            .rounds
            .get(&(code.to_string(), round_no))
            .map(|entry| entry.clone());
        Box::pin(ready(Ok(found)))
    }

    fn upsert_round(&self, round: RoundRecordEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .rounds
                .insert((round.game_code.clone(), round.round_no), round.clone());
            inner.publish(ChangeEvent::Round(round));
            Ok(())
        })
    }

    fn put_answer(
        &self,
        answer: PlayerAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerWrite>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let outcome = match inner
                .answers
                .entry((answer.round_id, answer.user_id.clone()))
            {
                Entry::Occupied(mut existing) => {
                    if existing.get().submitted_at.is_some() {
                        AnswerWrite::AlreadySubmitted
                    } else {
                        existing.insert(answer.clone());
                        AnswerWrite::Written
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(answer.clone());
                    AnswerWrite::Written
                }
            };

            if outcome == AnswerWrite::Written {
                inner.publish(ChangeEvent::Answer(answer));
            }
            Ok(outcome)
        })
    }

    fn list_answers(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerAnswerEntity>>> {
        let answers = self
            .inner
            .answers
            .iter()
            .filter(|entry| entry.key().0 == round_id)
            .map(|entry| entry.value().clone())
            .collect();
        Box::pin(ready(Ok(answers)))
    }

    fn insert_hint_usage(&self, usage: HintUsageEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            match inner.hints.entry(usage.key()) {
                Entry::Occupied(existing) => Err(StorageError::conflict(existing.key().clone())),
                Entry::Vacant(slot) => {
                    slot.insert(usage);
                    Ok(())
                }
            }
        })
    }

    fn upsert_score(&self, score: RoundScoreEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner
                .scores
                .insert((score.round_id, score.user_id.clone()), score.clone());
            inner.publish(ChangeEvent::Score(score));
            Ok(())
        })
    }

    fn list_scores(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundScoreEntity>>> {
        let scores = self
            .inner
            .scores
            .iter()
            .filter(|entry| entry.key().0 == round_id)
            .map(|entry| entry.value().clone())
            .collect();
        Box::pin(ready(Ok(scores)))
    }

    fn list_players(&self, code: &str) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let players = self
            .inner
            .players
            .get(code)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        Box::pin(ready(Ok(players)))
    }

    fn subscribe(&self, filter: ChangeFilter) -> BoxStream<'static, StorageResult<ChangeEvent>> {
        BroadcastStream::new(self.inner.changes.subscribe())
            .filter_map(move |item| {
                let passed = match item {
                    Ok(event) if filter.matches(&event) => Some(Ok(event)),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, ?filter, "change subscriber lagged; events dropped");
                        None
                    }
                };
                ready(passed)
            })
            .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{AnswerFields, Category};

    fn answer(submitted_at: Option<i64>, name: &str) -> PlayerAnswerEntity {
        PlayerAnswerEntity {
            round_id: Uuid::nil(),
            user_id: "u1".into(),
            game_code: "ABCD".into(),
            fields: AnswerFields {
                name: name.into(),
                ..AnswerFields::default()
            },
            submitted_at,
            duration_ms: None,
        }
    }

    #[tokio::test]
    async fn submitted_answers_are_never_overwritten() {
        let store = MemoryGameStore::new();
        assert_eq!(
            store.put_answer(answer(Some(10), "Nora")).await.unwrap(),
            AnswerWrite::Written
        );
        assert_eq!(
            store.put_answer(answer(Some(20), "Nadia")).await.unwrap(),
            AnswerWrite::AlreadySubmitted
        );

        let rows = store.list_answers(Uuid::nil()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields.name, "Nora");
    }

    #[tokio::test]
    async fn hint_usage_rejects_duplicate_key() {
        let store = MemoryGameStore::new();
        let usage = HintUsageEntity {
            game_code: "ABCD".into(),
            round_no: 1,
            user_id: "u1".into(),
            category: Category::Animal,
            used_at: 0,
        };
        store.insert_hint_usage(usage.clone()).await.unwrap();
        let err = store.insert_hint_usage(usage).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.hint_usage_count(), 1);
    }

    #[tokio::test]
    async fn subscription_applies_equality_filter() {
        let store = MemoryGameStore::new();
        let mut stream = store.subscribe(ChangeFilter::Answers {
            code: "ABCD".into(),
        });

        let mut other = answer(Some(1), "x");
        other.game_code = "ZZZZ".into();
        other.user_id = "u2".into();
        store.put_answer(other).await.unwrap();
        store.put_answer(answer(Some(2), "Nora")).await.unwrap();

        match stream.next().await {
            Some(Ok(ChangeEvent::Answer(received))) => assert_eq!(received.game_code, "ABCD"),
            other => panic!("unexpected change: {other:?}"),
        }
    }
}
