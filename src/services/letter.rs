//! Deterministic letter selection.

use crate::{
    dao::models::{Language, LetterMode},
    error::ServiceError,
};

const LATIN: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

const ARABIC: [char; 29] = [
    'ا', 'ب', 'ت', 'ث', 'ج', 'ح', 'خ', 'د', 'ذ', 'ر', 'ز', 'س', 'ش', 'ص', 'ض', 'ط', 'ظ', 'ع', 'غ',
    'ف', 'ق', 'ك', 'ل', 'م', 'ن', 'ه', 'و', 'ي', 'ء',
];

/// Letters a round of a game played in `language` can use.
pub fn alphabet(language: Language) -> &'static [char] {
    match language {
        Language::En => &LATIN,
        Language::Ar => &ARABIC,
    }
}

/// Position-weighted sum of the code's characters.
fn code_hash(game_code: &str) -> u64 {
    game_code
        .chars()
        .enumerate()
        .fold(0u64, |acc, (index, ch)| {
            acc.wrapping_add((index as u64 + 1).wrapping_mul(u64::from(ch)))
        })
}

/// Letter of round `round_no`.
///
/// Auto mode is a pure function of `(game_code, language, round_no)` so any
/// participant can verify it. Manual mode returns the host's pick, normalized.
pub fn compute_letter(
    game_code: &str,
    language: Language,
    round_no: u32,
    mode: LetterMode,
    manual_letter: Option<&str>,
) -> Result<String, ServiceError> {
    let letters = alphabet(language);
    match mode {
        LetterMode::Auto => {
            let offset = u64::from(round_no.saturating_sub(1));
            let index = code_hash(game_code).wrapping_add(offset) % letters.len() as u64;
            Ok(letters[index as usize].to_string())
        }
        LetterMode::Manual => {
            let picked = manual_letter
                .map(str::trim)
                .filter(|picked| !picked.is_empty())
                .ok_or_else(|| {
                    ServiceError::InvalidState("manual letter mode without a picked letter".into())
                })?;
            normalize_letter(language, picked)
        }
    }
}

/// Validate a host-picked letter against the alphabet of `language`.
pub fn normalize_letter(language: Language, picked: &str) -> Result<String, ServiceError> {
    let mut chars = picked.trim().chars();
    let (Some(first), None) = (chars.next(), chars.next()) else {
        return Err(ServiceError::InvalidInput(format!(
            "`{picked}` is not a single letter"
        )));
    };
    let letter = first.to_ascii_uppercase();
    if !alphabet(language).contains(&letter) {
        return Err(ServiceError::InvalidInput(format!(
            "`{picked}` is not part of the {} alphabet",
            language.code()
        )));
    }
    Ok(letter.to_string())
}
