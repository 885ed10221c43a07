use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::state_machine::GamePhase;

/// Milliseconds since the Unix epoch, as written into shared records.
pub type Millis = i64;

/// Namespace used to derive deterministic round identifiers.
const ROUND_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a5e_93d4_4c1b_a0e7_52b8_d3f6_1e09);

/// Derive the identifier of the round `(game_code, round_no)`.
///
/// The identifier is a pure function of the natural key so that retried
/// upserts always address the same record.
pub fn round_id(game_code: &str, round_no: u32) -> Uuid {
    Uuid::new_v5(
        &ROUND_NAMESPACE,
        format!("{game_code}/{round_no}").as_bytes(),
    )
}

/// Language a game is played in; selects the letter alphabet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// English, 26 Latin letters.
    En,
    /// Arabic, 29 letters.
    Ar,
}

impl Language {
    /// Wire code of the language.
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ar => "ar",
        }
    }
}

/// How the letter of a round is chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LetterMode {
    /// Derived from the game code and round number.
    Auto,
    /// Picked by the host.
    Manual,
}

/// The five answer categories of a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Name,
    Animal,
    Plant,
    Object,
    Country,
}

impl Category {
    /// Every category in display order.
    pub const ALL: [Category; 5] = [
        Category::Name,
        Category::Animal,
        Category::Plant,
        Category::Object,
        Category::Country,
    ];

    /// Wire key of the category.
    pub fn key(self) -> &'static str {
        match self {
            Category::Name => "name",
            Category::Animal => "animal",
            Category::Plant => "plant",
            Category::Object => "object",
            Category::Country => "country",
        }
    }
}

/// Player input for the five categories of a round.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerFields {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub animal: String,
    #[serde(default)]
    pub plant: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub country: String,
}

impl AnswerFields {
    /// Borrow the value typed for `category`.
    pub fn get(&self, category: Category) -> &str {
        match category {
            Category::Name => &self.name,
            Category::Animal => &self.animal,
            Category::Plant => &self.plant,
            Category::Object => &self.object,
            Category::Country => &self.country,
        }
    }

    /// Mutably borrow the slot for `category`.
    pub fn slot_mut(&mut self, category: Category) -> &mut String {
        match category {
            Category::Name => &mut self.name,
            Category::Animal => &mut self.animal,
            Category::Plant => &mut self.plant,
            Category::Object => &mut self.object,
            Category::Country => &mut self.country,
        }
    }
}

/// Canonical session state of one game. Only the host writes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSessionEntity {
    /// Unique game code shared with players.
    pub code: String,
    /// User id of the single host.
    pub host_user_id: String,
    pub language: Language,
    pub letter_mode: LetterMode,
    /// Letter picked by the host when `letter_mode` is manual.
    pub manual_letter: Option<String>,
    pub round_duration_sec: u32,
    pub rounds_total: u32,
    /// Round currently in play or last played; `0` before the first round.
    pub current_round_no: u32,
    pub phase: GamePhase,
    /// Whether a complete set of submissions ends the round early.
    pub submit_ends_round: bool,
    pub hints_enabled: bool,
    /// Race mode: the first submission ends the round.
    pub end_on_first_submit: bool,
    /// Start instant of the current round.
    pub started_at: Option<Millis>,
}

/// Lifecycle of a single round record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Active,
    Ended,
    Scored,
}

/// One round of a game, keyed by `(game_code, round_no)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundRecordEntity {
    /// Deterministic identifier, see [`round_id`].
    pub id: Uuid,
    pub game_code: String,
    pub round_no: u32,
    /// Letter constraining the round; never rewritten once set.
    pub letter: String,
    /// Timer origin for every client.
    pub started_at: Millis,
    pub ended_at: Option<Millis>,
    pub status: RoundStatus,
    /// Set once results are written; gates the scoring pass.
    pub scored_at: Option<Millis>,
}

/// A player's answers for a round, keyed by `(round_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerAnswerEntity {
    pub round_id: Uuid,
    pub user_id: String,
    /// Game the round belongs to; used to filter notifications.
    pub game_code: String,
    pub fields: AnswerFields,
    pub submitted_at: Option<Millis>,
    /// Time from round start to submission.
    pub duration_ms: Option<u64>,
}

/// Ledger row recording that a player used their hint for a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HintUsageEntity {
    pub game_code: String,
    pub round_no: u32,
    pub user_id: String,
    pub category: Category,
    pub used_at: Millis,
}

impl HintUsageEntity {
    /// Natural key of the ledger row.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.game_code, self.round_no, self.user_id)
    }
}

/// Judge verdict for one category of a player's answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldVerdict {
    pub value: String,
    pub valid: bool,
    pub reason: Option<String>,
}

/// Scored result of one player for one round, keyed by `(round_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundScoreEntity {
    pub round_id: Uuid,
    pub user_id: String,
    pub base: i32,
    pub bonus: i32,
    pub total: i32,
    pub fields: IndexMap<Category, FieldVerdict>,
}

/// Roster membership. Guests have no `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    pub game_code: String,
    pub user_id: Option<String>,
    pub name: String,
    pub joined_at: Millis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_id_is_stable_per_natural_key() {
        assert_eq!(round_id("ABCD", 1), round_id("ABCD", 1));
        assert_ne!(round_id("ABCD", 1), round_id("ABCD", 2));
        assert_ne!(round_id("ABCD", 1), round_id("ABCE", 1));
    }

    #[test]
    fn answer_fields_slots_follow_categories() {
        let mut fields = AnswerFields::default();
        fields.slot_mut(Category::Plant).push_str("Basil");
        assert_eq!(fields.get(Category::Plant), "Basil");
        assert_eq!(fields.plant, "Basil");
        assert!(fields.get(Category::Name).is_empty());
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&GamePhase::Scoring).unwrap();
        assert_eq!(json, "\"scoring\"");
    }
}
