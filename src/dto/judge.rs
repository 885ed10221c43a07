use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{
    AnswerFields, Category, FieldVerdict, Language, Millis, PlayerAnswerEntity, RoundScoreEntity,
};

/// Validation mode sent with every scoring request.
pub const VALIDATION_MODE: &str = "strict";

/// Scoring request for one round.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JudgeRequest {
    pub game_code: String,
    pub round_id: Uuid,
    pub language: Language,
    pub letter: String,
    pub round_duration_sec: u32,
    pub started_at: Millis,
    pub answers: Vec<JudgeAnswer>,
    pub validation_mode: &'static str,
}

/// One player's answers as the judge sees them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JudgeAnswer {
    pub user_id: String,
    pub fields: AnswerFields,
    pub duration_ms: Option<u64>,
}

impl From<&PlayerAnswerEntity> for JudgeAnswer {
    fn from(answer: &PlayerAnswerEntity) -> Self {
        Self {
            user_id: answer.user_id.clone(),
            fields: answer.fields.clone(),
            duration_ms: answer.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JudgeResponse {
    #[serde(default)]
    pub results: Vec<JudgeResult>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JudgeResult {
    pub user_id: String,
    pub base: i32,
    pub bonus: i32,
    pub total: i32,
    #[serde(default)]
    pub fields: IndexMap<Category, JudgeVerdict>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JudgeVerdict {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl JudgeResult {
    /// Build the score row for this result, echoing what the player typed.
    ///
    /// Verdicts are stored in category order regardless of the order the
    /// judge used.
    pub fn into_score(mut self, round_id: Uuid, typed: Option<&AnswerFields>) -> RoundScoreEntity {
        let fields = Category::ALL
            .into_iter()
            .filter_map(|category| {
                let verdict = self.fields.shift_remove(&category)?;
                let value = typed
                    .map(|fields| fields.get(category).to_string())
                    .unwrap_or_default();
                Some((
                    category,
                    FieldVerdict {
                        value,
                        valid: verdict.valid,
                        reason: verdict.reason,
                    },
                ))
            })
            .collect();

        RoundScoreEntity {
            round_id,
            user_id: self.user_id,
            base: self.base,
            bonus: self.bonus,
            total: self.total,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_camel_case_and_strict_mode() {
        let request = JudgeRequest {
            game_code: "ABCD".into(),
            round_id: Uuid::nil(),
            language: Language::En,
            letter: "U".into(),
            round_duration_sec: 60,
            started_at: 5,
            answers: vec![JudgeAnswer {
                user_id: "u1".into(),
                fields: AnswerFields::default(),
                duration_ms: Some(1200),
            }],
            validation_mode: VALIDATION_MODE,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["gameCode"], "ABCD");
        assert_eq!(value["roundDurationSec"], 60);
        assert_eq!(value["validationMode"], "strict");
        assert_eq!(value["answers"][0]["userId"], "u1");
        assert_eq!(value["answers"][0]["durationMs"], 1200);
    }

    #[test]
    fn result_becomes_ordered_score_row() {
        let response: JudgeResponse = serde_json::from_value(json!({
            "results": [{
                "user_id": "u1",
                "base": 20,
                "bonus": 5,
                "total": 25,
                "fields": {
                    "country": {"valid": false, "reason": "not a country"},
                    "name": {"valid": true}
                }
            }]
        }))
        .unwrap();

        let typed = AnswerFields {
            name: "Uma".into(),
            country: "Uzbek".into(),
            ..AnswerFields::default()
        };
        let result = response.results.into_iter().next().unwrap();
        let score = result.into_score(Uuid::nil(), Some(&typed));

        assert_eq!(score.total, 25);
        let keys: Vec<_> = score.fields.keys().copied().collect();
        assert_eq!(keys, vec![Category::Name, Category::Country]);
        assert_eq!(score.fields[&Category::Country].value, "Uzbek");
        assert_eq!(
            score.fields[&Category::Country].reason.as_deref(),
            Some("not a country")
        );
    }
}
