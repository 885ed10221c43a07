//! One hint per player per round, backed by the store's uniqueness constraint.

use tracing::{info, warn};

use crate::{
    clients::HintService,
    dao::{
        game_store::GameStore,
        models::{AnswerFields, Category, HintUsageEntity, Language, Millis},
    },
    dto::hint::HintRequest,
    error::ServiceError,
};

/// Everything needed to ask for a hint.
#[derive(Debug, Clone)]
pub struct HintAsk {
    pub game_code: String,
    pub round_no: u32,
    pub user_id: String,
    pub language: Language,
    pub letter: String,
    pub category: Category,
    pub partial: String,
}

/// Generic suggestion used when the hint service cannot answer.
pub fn fallback_hint(language: Language, letter: &str) -> String {
    match language {
        Language::En => format!("Try a common word starting with {letter}"),
        Language::Ar => format!("جرّب كلمة شائعة تبدأ بحرف {letter}"),
    }
}

/// Claim the hint of the round for the player and fetch a suggestion.
///
/// The ledger row is written before the service is called, so a service
/// failure still consumes the allowance and yields the fallback text.
pub async fn request_hint(
    store: &dyn GameStore,
    hints: &dyn HintService,
    ask: HintAsk,
    now: Millis,
) -> Result<String, ServiceError> {
    let usage = HintUsageEntity {
        game_code: ask.game_code.clone(),
        round_no: ask.round_no,
        user_id: ask.user_id.clone(),
        category: ask.category,
        used_at: now,
    };

    match store.insert_hint_usage(usage).await {
        Ok(()) => {}
        Err(err) if err.is_conflict() => {
            info!(
                game = %ask.game_code,
                round = ask.round_no,
                user = %ask.user_id,
                "hint already used this round"
            );
            return Err(ServiceError::HintAlreadyUsed);
        }
        Err(err) => return Err(err.into()),
    }

    let request = HintRequest {
        game_code: ask.game_code.clone(),
        round_no: ask.round_no,
        language: ask.language,
        letter: ask.letter.clone(),
        category: ask.category,
        partial: ask.partial,
    };

    match hints.suggest(request).await {
        Ok(response) if !response.hint.trim().is_empty() => Ok(response.hint),
        Ok(_) => Ok(fallback_hint(ask.language, &ask.letter)),
        Err(err) => {
            warn!(
                game = %ask.game_code,
                round = ask.round_no,
                user = %ask.user_id,
                error = %err,
                "hint service failed; using fallback"
            );
            Ok(fallback_hint(ask.language, &ask.letter))
        }
    }
}

/// Fill `category` with `suggestion` unless the player already typed there.
pub fn apply_hint(fields: &mut AnswerFields, category: Category, suggestion: &str) -> bool {
    let slot = fields.slot_mut(category);
    if !slot.trim().is_empty() {
        return false;
    }
    *slot = suggestion.to_string();
    true
}

#[cfg(test)]
mod tests {
    use futures::future::{BoxFuture, ready};

    use super::*;
    use crate::{
        clients::{ClientError, ClientResult},
        dao::game_store::memory::MemoryGameStore,
        dto::hint::HintResponse,
    };

    struct Fixed(Option<&'static str>);

    impl HintService for Fixed {
        fn suggest(&self, _request: HintRequest) -> BoxFuture<'static, ClientResult<HintResponse>> {
            let outcome = match self.0 {
                Some(hint) => Ok(HintResponse { hint: hint.into() }),
                None => Err(ClientError::Request("down".into())),
            };
            Box::pin(ready(outcome))
        }
    }

    fn ask() -> HintAsk {
        HintAsk {
            game_code: "ABCD".into(),
            round_no: 1,
            user_id: "u1".into(),
            language: Language::En,
            letter: "U".into(),
            category: Category::Animal,
            partial: String::new(),
        }
    }

    #[tokio::test]
    async fn second_request_is_rejected() {
        let store = MemoryGameStore::new();
        let service = Fixed(Some("Urchin"));
        assert_eq!(request_hint(&store, &service, ask(), 0).await.unwrap(), "Urchin");
        let err = request_hint(&store, &service, ask(), 1).await.unwrap_err();
        assert!(matches!(err, ServiceError::HintAlreadyUsed));
        assert_eq!(store.hint_usage_count(), 1);
    }

    #[tokio::test]
    async fn service_failure_still_consumes_the_hint() {
        let store = MemoryGameStore::new();
        let hint = request_hint(&store, &Fixed(None), ask(), 0).await.unwrap();
        assert_eq!(hint, "Try a common word starting with U");

        let err = request_hint(&store, &Fixed(Some("Urchin")), ask(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::HintAlreadyUsed));
    }

    #[test]
    fn hint_never_overwrites_input() {
        let mut fields = AnswerFields {
            animal: "Unicorn".into(),
            ..AnswerFields::default()
        };
        assert!(!apply_hint(&mut fields, Category::Animal, "Urchin"));
        assert_eq!(fields.animal, "Unicorn");
        assert!(apply_hint(&mut fields, Category::Plant, "Umbrella pine"));
        assert_eq!(fields.plant, "Umbrella pine");
    }

    #[test]
    fn arabic_fallback_mentions_letter() {
        assert!(fallback_hint(Language::Ar, "ب").ends_with('ب'));
    }
}
