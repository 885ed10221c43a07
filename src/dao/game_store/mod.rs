#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;

use futures::{future::BoxFuture, stream::BoxStream};
use uuid::Uuid;

use crate::dao::models::{
    GameSessionEntity, HintUsageEntity, PlayerAnswerEntity, PlayerEntity, RoundRecordEntity,
    RoundScoreEntity,
};
use crate::dao::storage::StorageResult;

/// Outcome of writing a player's answer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerWrite {
    /// The row was created or updated.
    Written,
    /// A submitted row already exists for the key and was left untouched.
    AlreadySubmitted,
}

/// Record change pushed by the store to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Session(GameSessionEntity),
    Round(RoundRecordEntity),
    Answer(PlayerAnswerEntity),
    Score(RoundScoreEntity),
}

/// Equality filter selecting which changes a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeFilter {
    /// The session row with this code.
    Session { code: String },
    /// Every round record of a game.
    Rounds { code: String },
    /// Every answer row of a game.
    Answers { code: String },
    /// Every score row of a round.
    Scores { round_id: Uuid },
}

impl ChangeFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match (self, event) {
            (ChangeFilter::Session { code }, ChangeEvent::Session(session)) => {
                &session.code == code
            }
            (ChangeFilter::Rounds { code }, ChangeEvent::Round(round)) => &round.game_code == code,
            (ChangeFilter::Answers { code }, ChangeEvent::Answer(answer)) => {
                &answer.game_code == code
            }
            (ChangeFilter::Scores { round_id }, ChangeEvent::Score(score)) => {
                &score.round_id == round_id
            }
            _ => false,
        }
    }
}

/// Abstraction over the shared persistent store every client talks to.
///
/// Writes are keyed by natural keys so that retries and replays collapse into
/// the same rows.
pub trait GameStore: Send + Sync {
    fn find_session(
        &self,
        code: &str,
    ) -> BoxFuture<'static, StorageResult<Option<GameSessionEntity>>>;
    fn save_session(&self, session: GameSessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_round(
        &self,
        code: &str,
        round_no: u32,
    ) -> BoxFuture<'static, StorageResult<Option<RoundRecordEntity>>>;
    fn upsert_round(&self, round: RoundRecordEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Write an answer row unless a submitted row already exists for its key.
    fn put_answer(
        &self,
        answer: PlayerAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<AnswerWrite>>;
    fn list_answers(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PlayerAnswerEntity>>>;
    /// Create-only insert; an existing key yields
    /// [`StorageError::Conflict`](super::storage::StorageError::Conflict).
    fn insert_hint_usage(&self, usage: HintUsageEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn upsert_score(&self, score: RoundScoreEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_scores(
        &self,
        round_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<RoundScoreEntity>>>;
    fn list_players(&self, code: &str) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    /// Stream changes matching `filter` from now on.
    fn subscribe(&self, filter: ChangeFilter) -> BoxStream<'static, StorageResult<ChangeEvent>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
