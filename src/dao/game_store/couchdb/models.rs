use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value};
use uuid::Uuid;

use crate::dao::{
    game_store::ChangeEvent,
    models::{GameSessionEntity, PlayerAnswerEntity, RoundRecordEntity, RoundScoreEntity},
};

pub const SESSION_PREFIX: &str = "session::";
pub const ROUND_PREFIX: &str = "round::";
pub const ANSWER_PREFIX: &str = "answer::";
pub const HINT_PREFIX: &str = "hint::";
pub const SCORE_PREFIX: &str = "score::";
pub const PLAYER_PREFIX: &str = "player::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Discriminator stored next to every document body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Session,
    Round,
    Answer,
    Hint,
    Score,
    Player,
}

/// CouchDB envelope around an entity body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub kind: DocKind,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    pub fn new(id: String, kind: DocKind, body: T) -> Self {
        Self {
            id,
            rev: None,
            kind,
            body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct KindProbe {
    kind: DocKind,
}

/// Turn a `_changes` document into a change event, skipping kinds that are
/// never pushed to subscribers.
pub fn decode_change(doc: Value) -> Result<Option<ChangeEvent>, serde_json::Error> {
    let KindProbe { kind } = KindProbe::deserialize(&doc)?;
    let event = match kind {
        DocKind::Session => {
            ChangeEvent::Session(from_value::<CouchDocument<GameSessionEntity>>(doc)?.body)
        }
        DocKind::Round => {
            ChangeEvent::Round(from_value::<CouchDocument<RoundRecordEntity>>(doc)?.body)
        }
        DocKind::Answer => {
            ChangeEvent::Answer(from_value::<CouchDocument<PlayerAnswerEntity>>(doc)?.body)
        }
        DocKind::Score => {
            ChangeEvent::Score(from_value::<CouchDocument<RoundScoreEntity>>(doc)?.body)
        }
        DocKind::Hint | DocKind::Player => return Ok(None),
    };
    Ok(Some(event))
}

/// Render a CouchDB sequence token for the `since` query parameter.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(token) => token.clone(),
        other => other.to_string(),
    }
}

pub fn session_doc_id(code: &str) -> String {
    format!("{SESSION_PREFIX}{code}")
}

pub fn round_doc_id(code: &str, round_no: u32) -> String {
    format!("{ROUND_PREFIX}{code}:{round_no:05}")
}

pub fn answers_prefix(round_id: Uuid) -> String {
    format!("{ANSWER_PREFIX}{round_id}:")
}

pub fn answer_doc_id(round_id: Uuid, user_id: &str) -> String {
    format!("{}{user_id}", answers_prefix(round_id))
}

pub fn hint_doc_id(code: &str, round_no: u32, user_id: &str) -> String {
    format!("{HINT_PREFIX}{code}:{round_no:05}:{user_id}")
}

pub fn scores_prefix(round_id: Uuid) -> String {
    format!("{SCORE_PREFIX}{round_id}:")
}

pub fn score_doc_id(round_id: Uuid, user_id: &str) -> String {
    format!("{}{user_id}", scores_prefix(round_id))
}

pub fn players_prefix(code: &str) -> String {
    format!("{PLAYER_PREFIX}{code}:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dao::models::RoundStatus, state::state_machine::GamePhase};
    use serde_json::json;

    #[test]
    fn round_documents_round_trip_through_changes() {
        let record = RoundRecordEntity {
            id: Uuid::nil(),
            game_code: "ABCD".into(),
            round_no: 2,
            letter: "M".into(),
            started_at: 1_000,
            ended_at: None,
            status: RoundStatus::Active,
            scored_at: None,
        };
        let mut doc = CouchDocument::new(round_doc_id("ABCD", 2), DocKind::Round, record.clone());
        doc.rev = Some("1-abc".into());
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_id"], "round::ABCD:00002");
        assert_eq!(value["kind"], "round");

        match decode_change(value).unwrap() {
            Some(ChangeEvent::Round(decoded)) => assert_eq!(decoded, record),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn ledger_and_roster_documents_are_not_pushed() {
        let doc = json!({"_id": "player::ABCD:1", "kind": "player", "name": "Sam"});
        assert!(decode_change(doc).unwrap().is_none());
    }

    #[test]
    fn session_documents_decode() {
        let doc = json!({
            "_id": "session::ABCD",
            "_rev": "3-x",
            "kind": "session",
            "code": "ABCD",
            "host_user_id": "host",
            "language": "en",
            "letter_mode": "auto",
            "manual_letter": null,
            "round_duration_sec": 60,
            "rounds_total": 3,
            "current_round_no": 1,
            "phase": "playing",
            "submit_ends_round": true,
            "hints_enabled": true,
            "end_on_first_submit": false,
            "started_at": 5
        });
        match decode_change(doc).unwrap() {
            Some(ChangeEvent::Session(session)) => {
                assert_eq!(session.phase, GamePhase::Playing);
                assert_eq!(session.rounds_total, 3);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn sequence_tokens_render_without_quotes() {
        assert_eq!(seq_param(&json!("12-abc")), "12-abc");
        assert_eq!(seq_param(&json!(42)), "42");
    }
}
