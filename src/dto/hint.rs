use serde::{Deserialize, Serialize};

use crate::dao::models::{Category, Language};

/// Request for a suggested word in one category.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HintRequest {
    pub game_code: String,
    pub round_no: u32,
    pub language: Language,
    pub letter: String,
    pub category: Category,
    /// What the player already typed in that category.
    pub partial: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HintResponse {
    pub hint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case() {
        let request = HintRequest {
            game_code: "ABCD".into(),
            round_no: 2,
            language: Language::Ar,
            letter: "ب".into(),
            category: Category::Plant,
            partial: String::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["roundNo"], 2);
        assert_eq!(value["language"], "ar");
        assert_eq!(value["category"], "plant");
    }
}
