pub mod clock;
pub mod countdown;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        game_store::GameStore,
        models::{GameSessionEntity, Language, Millis, RoundRecordEntity, RoundStatus, round_id},
    },
};

pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};
use self::{clock::Clock, countdown::Countdown, state_machine::GamePhase};

pub type SharedContext = Arc<GameContext>;

/// What a participant currently believes about the round, as rendered locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundView {
    pub round_no: u32,
    pub phase: GamePhase,
    /// Letter read from the round record; `None` until observed.
    pub letter: Option<String>,
    /// Shared timer origin read from the round record.
    pub started_at: Option<Millis>,
    pub duration_sec: u32,
    /// Displayed seconds left, frozen once this participant submitted.
    pub remaining_sec: Option<u32>,
    pub submitted: bool,
    pub language: Language,
    pub hints_enabled: bool,
}

impl RoundView {
    fn from_session(session: &GameSessionEntity) -> Self {
        Self {
            round_no: session.current_round_no,
            phase: session.phase,
            letter: None,
            started_at: None,
            duration_sec: session.round_duration_sec,
            remaining_sec: None,
            submitted: false,
            language: session.language,
            hints_enabled: session.hints_enabled,
        }
    }
}

/// Shared timer state sampled by one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerReading {
    /// Round whose `started_at` the countdown was synchronized to.
    pub round_no: u32,
    /// Seconds left on the shared timer; `None` before a round record is seen.
    pub remaining_sec: Option<u32>,
}

/// Position of a phase within a single round's lifecycle.
fn phase_rank(phase: GamePhase) -> u8 {
    match phase {
        GamePhase::Lobby => 0,
        GamePhase::Playing => 1,
        GamePhase::Scoring => 2,
        GamePhase::Done => 3,
    }
}

/// Per-participant state shared by the sync strategy and the driver tasks.
pub struct GameContext {
    game_code: String,
    user_id: String,
    store: Arc<dyn GameStore>,
    clock: Arc<dyn Clock>,
    config: Arc<AppConfig>,
    view: watch::Sender<RoundView>,
    countdown: Mutex<Countdown>,
}

impl GameContext {
    /// Build the context for `user_id` in the game described by `session`.
    pub fn new(
        user_id: impl Into<String>,
        session: &GameSessionEntity,
        store: Arc<dyn GameStore>,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
    ) -> SharedContext {
        let (view, _rx) = watch::channel(RoundView::from_session(session));
        Arc::new(Self {
            game_code: session.code.clone(),
            user_id: user_id.into(),
            store,
            clock,
            config,
            view,
            countdown: Mutex::new(Countdown::default()),
        })
    }

    pub fn game_code(&self) -> &str {
        &self.game_code
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Handle to the shared store.
    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current instant according to the injected clock.
    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    /// Copy of the current view.
    pub fn view(&self) -> RoundView {
        self.view.borrow().clone()
    }

    /// Receive every update of the view.
    pub fn subscribe_view(&self) -> watch::Receiver<RoundView> {
        self.view.subscribe()
    }

    /// Identifier of the round currently observed.
    pub fn current_round_id(&self) -> Uuid {
        round_id(&self.game_code, self.view.borrow().round_no)
    }

    /// Fold an observed session row into the view.
    ///
    /// Returns `true` when the row announced a round the view did not know yet.
    /// Rows older than the view are ignored.
    pub async fn apply_session(&self, session: &GameSessionEntity) -> bool {
        if session.code != self.game_code {
            return false;
        }
        let mut countdown = self.countdown.lock().await;
        let mut advanced = false;

        self.view.send_if_modified(|view| {
            if session.current_round_no < view.round_no {
                return false;
            }
            let before = view.clone();
            if session.current_round_no > view.round_no {
                advanced = true;
                view.round_no = session.current_round_no;
                view.letter = None;
                view.started_at = None;
                view.remaining_sec = None;
                view.submitted = false;
                view.phase = session.phase;
                *countdown = Countdown::default();
            } else if phase_rank(session.phase) >= phase_rank(view.phase) {
                view.phase = session.phase;
            }
            view.duration_sec = session.round_duration_sec;
            view.language = session.language;
            view.hints_enabled = session.hints_enabled;
            *view != before
        });

        if advanced {
            debug!(
                game = %self.game_code,
                round = session.current_round_no,
                "observed new round from session"
            );
        }
        advanced
    }

    /// Fold an observed round record into the view.
    ///
    /// The record's `started_at` always wins over local timer state; a changed
    /// origin resynchronizes the countdown immediately. Returns `true` when the
    /// record announced a round the view did not know yet.
    pub async fn apply_round(&self, round: &RoundRecordEntity) -> bool {
        if round.game_code != self.game_code {
            return false;
        }
        let now = self.now();
        let mut countdown = self.countdown.lock().await;
        let mut advanced = false;

        self.view.send_if_modified(|view| {
            if round.round_no < view.round_no {
                return false;
            }
            let before = view.clone();
            if round.round_no > view.round_no {
                advanced = true;
                view.round_no = round.round_no;
                view.letter = None;
                view.submitted = false;
                view.phase = match round.status {
                    RoundStatus::Active => GamePhase::Playing,
                    RoundStatus::Ended | RoundStatus::Scored => GamePhase::Scoring,
                };
                *countdown = Countdown::default();
            }
            if !round.letter.is_empty() {
                view.letter = Some(round.letter.clone());
            }
            if countdown.resync(round.started_at, view.duration_sec) {
                debug!(
                    game = %self.game_code,
                    round = round.round_no,
                    started_at = round.started_at,
                    "countdown resynchronized"
                );
            }
            view.started_at = Some(round.started_at);
            view.remaining_sec = countdown.displayed(now);
            *view != before
        });

        advanced
    }

    /// Recompute the countdown for the current instant.
    ///
    /// The reading carries the shared timer, which ignores any local freeze,
    /// and the round the countdown belongs to.
    pub async fn tick(&self) -> TimerReading {
        let now = self.now();
        let countdown = self.countdown.lock().await;
        let displayed = countdown.displayed(now);
        let mut round_no = 0;
        self.view.send_if_modified(|view| {
            round_no = view.round_no;
            if view.remaining_sec == displayed {
                return false;
            }
            view.remaining_sec = displayed;
            true
        });
        TimerReading {
            round_no,
            remaining_sec: countdown.remaining(now),
        }
    }

    /// Record that this participant submitted and pin the displayed countdown.
    pub async fn freeze_countdown(&self) {
        let now = self.now();
        let mut countdown = self.countdown.lock().await;
        countdown.freeze(now);
        let displayed = countdown.displayed(now);
        self.view.send_modify(|view| {
            view.submitted = true;
            view.remaining_sec = displayed;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::{game_store::memory::MemoryGameStore, models::LetterMode},
        state::clock::ManualClock,
    };

    const T0: Millis = 1_700_000_000_000;

    fn session(round_no: u32, phase: GamePhase) -> GameSessionEntity {
        GameSessionEntity {
            code: "ABCD".into(),
            host_user_id: "host".into(),
            language: Language::En,
            letter_mode: LetterMode::Auto,
            manual_letter: None,
            round_duration_sec: 60,
            rounds_total: 3,
            current_round_no: round_no,
            phase,
            submit_ends_round: true,
            hints_enabled: true,
            end_on_first_submit: false,
            started_at: None,
        }
    }

    fn record(round_no: u32, started_at: Millis) -> RoundRecordEntity {
        RoundRecordEntity {
            id: round_id("ABCD", round_no),
            game_code: "ABCD".into(),
            round_no,
            letter: "K".into(),
            started_at,
            ended_at: None,
            status: RoundStatus::Active,
            scored_at: None,
        }
    }

    fn context(clock: Arc<ManualClock>) -> SharedContext {
        GameContext::new(
            "u1",
            &session(0, GamePhase::Lobby),
            Arc::new(MemoryGameStore::new()),
            clock,
            Arc::new(AppConfig::default()),
        )
    }

    #[tokio::test]
    async fn stale_session_rows_are_ignored() {
        let ctx = context(Arc::new(ManualClock::new(T0)));
        assert!(ctx.apply_session(&session(2, GamePhase::Playing)).await);
        assert!(!ctx.apply_session(&session(1, GamePhase::Scoring)).await);

        let view = ctx.view();
        assert_eq!(view.round_no, 2);
        assert_eq!(view.phase, GamePhase::Playing);
    }

    #[tokio::test]
    async fn restarted_round_resynchronizes_timer() {
        let clock = Arc::new(ManualClock::new(T0 + 30_000));
        let ctx = context(clock.clone());
        ctx.apply_session(&session(1, GamePhase::Playing)).await;
        ctx.apply_round(&record(1, T0)).await;
        assert_eq!(ctx.tick().await.remaining_sec, Some(30));

        ctx.apply_round(&record(1, T0 + 30_000)).await;
        assert_eq!(ctx.view().remaining_sec, Some(60));
        assert_eq!(ctx.tick().await.remaining_sec, Some(60));
    }

    #[tokio::test]
    async fn frozen_display_keeps_shared_timer_running() {
        let clock = Arc::new(ManualClock::new(T0));
        let ctx = context(clock.clone());
        ctx.apply_session(&session(1, GamePhase::Playing)).await;
        ctx.apply_round(&record(1, T0)).await;

        clock.advance(10_000);
        ctx.freeze_countdown().await;
        clock.advance(20_000);

        assert_eq!(ctx.tick().await.remaining_sec, Some(30));
        let view = ctx.view();
        assert!(view.submitted);
        assert_eq!(view.remaining_sec, Some(50));
    }

    #[tokio::test]
    async fn next_round_record_reopens_play() {
        let ctx = context(Arc::new(ManualClock::new(T0)));
        ctx.apply_session(&session(1, GamePhase::Scoring)).await;
        assert!(ctx.apply_round(&record(2, T0)).await);
        ctx.apply_session(&session(2, GamePhase::Playing)).await;
        assert_eq!(ctx.view().phase, GamePhase::Playing);
        assert_eq!(ctx.view().round_no, 2);
    }

    #[tokio::test]
    async fn next_round_record_without_letter_drops_previous_letter() {
        let ctx = context(Arc::new(ManualClock::new(T0)));
        ctx.apply_session(&session(1, GamePhase::Scoring)).await;
        ctx.apply_round(&record(1, T0)).await;
        assert_eq!(ctx.view().letter.as_deref(), Some("K"));

        let mut next = record(2, T0 + 90_000);
        next.letter.clear();
        assert!(ctx.apply_round(&next).await);
        assert_eq!(ctx.view().round_no, 2);
        assert_eq!(ctx.view().letter, None);
    }

    #[tokio::test]
    async fn timer_reading_names_the_synchronized_round() {
        let clock = Arc::new(ManualClock::new(T0 + 61_000));
        let ctx = context(clock.clone());
        ctx.apply_session(&session(1, GamePhase::Playing)).await;
        ctx.apply_round(&record(1, T0)).await;

        let stale = ctx.tick().await;
        assert_eq!(
            stale,
            TimerReading {
                round_no: 1,
                remaining_sec: Some(0)
            }
        );

        ctx.apply_round(&record(2, T0 + 61_000)).await;
        let fresh = ctx.tick().await;
        assert_eq!(fresh.round_no, 2);
        assert_eq!(fresh.remaining_sec, Some(60));
    }

    #[tokio::test]
    async fn new_round_clears_letter_until_record_arrives() {
        let ctx = context(Arc::new(ManualClock::new(T0)));
        ctx.apply_session(&session(1, GamePhase::Playing)).await;
        ctx.apply_round(&record(1, T0)).await;
        assert_eq!(ctx.view().letter.as_deref(), Some("K"));

        assert!(ctx.apply_session(&session(2, GamePhase::Playing)).await);
        assert_eq!(ctx.view().letter, None);
        assert_eq!(ctx.view().remaining_sec, None);
    }
}
