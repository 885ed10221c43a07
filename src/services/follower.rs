//! Passive participant: mirrors whatever the host wrote.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dao::{game_store::ChangeEvent, models::RoundRecordEntity},
    error::ServiceError,
    services::retry::{RetryError, retry_until},
    state::{SharedContext, state_machine::GamePhase},
};

/// Follower side of the round protocol.
///
/// The letter is only ever read from the round record, never derived locally.
pub struct FollowerStrategy {
    ctx: SharedContext,
    shutdown: CancellationToken,
    letter_poll: Mutex<Option<(u32, CancellationToken)>>,
}

impl FollowerStrategy {
    pub fn new(ctx: SharedContext) -> Self {
        Self {
            ctx,
            shutdown: CancellationToken::new(),
            letter_poll: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    /// Fold a pushed or polled change into the local view.
    pub async fn on_change(&self, change: &ChangeEvent) {
        match change {
            ChangeEvent::Session(session) => {
                self.ctx.apply_session(session).await;
                self.await_letter_if_missing().await;
            }
            ChangeEvent::Round(round) => self.on_round(round).await,
            ChangeEvent::Answer(_) | ChangeEvent::Score(_) => {}
        }
    }

    async fn on_round(&self, round: &RoundRecordEntity) {
        self.ctx.apply_round(round).await;
        let view = self.ctx.view();
        if view.round_no == round.round_no && view.letter.is_some() {
            self.stop_letter_poll(round.round_no).await;
        }
    }

    /// Start polling for the round record when the view lacks a letter.
    pub async fn await_letter_if_missing(&self) {
        let view = self.ctx.view();
        if view.letter.is_some() || view.round_no == 0 || view.phase == GamePhase::Lobby {
            return;
        }
        self.spawn_letter_poll(view.round_no).await;
    }

    async fn spawn_letter_poll(&self, round_no: u32) {
        let mut slot = self.letter_poll.lock().await;
        if let Some((polling, token)) = slot.as_ref() {
            if *polling == round_no && !token.is_cancelled() {
                return;
            }
            token.cancel();
        }

        let token = self.shutdown.child_token();
        *slot = Some((round_no, token.clone()));
        drop(slot);

        let ctx = self.ctx.clone();
        let policy = ctx.config().letter_retry;
        tokio::spawn(async move {
            let code = ctx.game_code().to_string();
            debug!(game = %code, round = round_no, "waiting for host letter");
            let outcome = retry_until(policy, &token, |_attempt| {
                let store = ctx.store().clone();
                let code = code.clone();
                async move {
                    let round = store.find_round(&code, round_no).await?;
                    Ok::<_, ServiceError>(round.filter(|round| !round.letter.is_empty()))
                }
            })
            .await;

            match outcome {
                Ok(round) => {
                    info!(
                        game = %code,
                        round = round_no,
                        letter = %round.letter,
                        "letter observed by poll"
                    );
                    ctx.apply_round(&round).await;
                    token.cancel();
                }
                Err(RetryError::Cancelled) => {
                    debug!(game = %code, round = round_no, "letter poll cancelled");
                }
                Err(RetryError::Exhausted { attempts, last }) => {
                    let delay = ServiceError::SyncDelay(format!(
                        "letter of round {round_no} not observed"
                    ));
                    warn!(
                        game = %code,
                        round = round_no,
                        attempts,
                        error = %delay,
                        last_error = ?last,
                        "giving up on letter poll"
                    );
                    token.cancel();
                }
            }
        });
    }

    async fn stop_letter_poll(&self, round_no: u32) {
        let mut slot = self.letter_poll.lock().await;
        if let Some((polling, token)) = slot.take() {
            if polling <= round_no {
                token.cancel();
            } else {
                *slot = Some((polling, token));
            }
        }
    }

    /// Cancel every background task of this follower.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether a letter poll is currently running.
    pub async fn is_polling(&self) -> bool {
        self.letter_poll
            .lock()
            .await
            .as_ref()
            .is_some_and(|(_, token)| !token.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            game_store::{GameStore, memory::MemoryGameStore},
            models::{GameSessionEntity, Language, LetterMode, RoundStatus, round_id},
        },
        services::retry::RetryPolicy,
        state::{GameContext, clock::ManualClock},
    };

    fn session(round_no: u32) -> GameSessionEntity {
        GameSessionEntity {
            code: "ABCD".into(),
            host_user_id: "host".into(),
            language: Language::En,
            letter_mode: LetterMode::Manual,
            manual_letter: None,
            round_duration_sec: 60,
            rounds_total: 3,
            current_round_no: round_no,
            phase: GamePhase::Playing,
            submit_ends_round: true,
            hints_enabled: true,
            end_on_first_submit: false,
            started_at: Some(0),
        }
    }

    fn follower(store: Arc<MemoryGameStore>) -> FollowerStrategy {
        follower_with(store, RetryPolicy::new(50, Duration::from_millis(5)))
    }

    fn follower_with(store: Arc<MemoryGameStore>, letter_retry: RetryPolicy) -> FollowerStrategy {
        let config = AppConfig {
            letter_retry,
            ..AppConfig::default()
        };
        let ctx = GameContext::new(
            "guest-1",
            &session(0),
            store,
            Arc::new(ManualClock::new(0)),
            Arc::new(config),
        );
        FollowerStrategy::new(ctx)
    }

    #[tokio::test]
    async fn pushed_letter_stops_the_poll() {
        let store = Arc::new(MemoryGameStore::new());
        let follower = follower(store.clone());

        follower.on_change(&ChangeEvent::Session(session(1))).await;
        assert!(follower.is_polling().await);

        let round = RoundRecordEntity {
            id: round_id("ABCD", 1),
            game_code: "ABCD".into(),
            round_no: 1,
            letter: "Q".into(),
            started_at: 0,
            ended_at: None,
            status: RoundStatus::Active,
            scored_at: None,
        };
        follower.on_change(&ChangeEvent::Round(round)).await;

        assert!(!follower.is_polling().await);
        assert_eq!(follower.context().view().letter.as_deref(), Some("Q"));
    }

    #[tokio::test]
    async fn poll_picks_up_letter_written_later() {
        let store = Arc::new(MemoryGameStore::new());
        let follower = follower(store.clone());
        let mut view = follower.context().subscribe_view();

        follower.on_change(&ChangeEvent::Session(session(1))).await;
        store
            .upsert_round(RoundRecordEntity {
                id: round_id("ABCD", 1),
                game_code: "ABCD".into(),
                round_no: 1,
                letter: "Z".into(),
                started_at: 0,
                ended_at: None,
                status: RoundStatus::Active,
                scored_at: None,
            })
            .await
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(2),
            view.wait_for(|view| view.letter.is_some()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(follower.context().view().letter.as_deref(), Some("Z"));
    }

    #[tokio::test]
    async fn exhausted_poll_still_accepts_pushed_letter() {
        let store = Arc::new(MemoryGameStore::new());
        let follower = follower_with(store.clone(), RetryPolicy::new(2, Duration::from_millis(5)));

        follower.on_change(&ChangeEvent::Session(session(1))).await;
        assert!(follower.is_polling().await);
        tokio::time::timeout(Duration::from_secs(2), async {
            while follower.is_polling().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(follower.context().view().letter, None);

        let late = RoundRecordEntity {
            id: round_id("ABCD", 1),
            game_code: "ABCD".into(),
            round_no: 1,
            letter: "H".into(),
            started_at: 0,
            ended_at: None,
            status: RoundStatus::Active,
            scored_at: None,
        };
        store.upsert_round(late.clone()).await.unwrap();
        follower.on_change(&ChangeEvent::Round(late)).await;

        assert_eq!(follower.context().view().letter.as_deref(), Some("H"));
        assert!(!follower.is_polling().await);
    }
}
