//! Role-independent round synchronization: the `RoundSync` seam and the
//! driver that feeds it.

use std::{sync::Arc, time::Duration};

use futures::{
    StreamExt,
    future::{BoxFuture, ready},
    stream::{BoxStream, SelectAll, select_all},
};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    clients::{HintService, JudgeService},
    dao::{
        game_store::{ChangeEvent, ChangeFilter},
        models::{AnswerFields, Category, GameSessionEntity, RoundScoreEntity, round_id},
        storage::StorageResult,
    },
    error::ServiceError,
    services::{
        follower::FollowerStrategy,
        hint::{self, HintAsk},
        host::HostStrategy,
        submission,
    },
    state::{SharedContext, state_machine::GamePhase},
};

const SIGNAL_CAPACITY: usize = 64;

/// Part a participant plays in a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Follower,
}

impl Role {
    /// Role of `user_id` in `session`.
    pub fn of(session: &GameSessionEntity, user_id: &str) -> Self {
        if session.host_user_id == user_id {
            Role::Host
        } else {
            Role::Follower
        }
    }
}

/// Something that may have changed the round state.
#[derive(Debug, Clone)]
pub enum RoundSignal {
    /// A record pushed by the store or read by the poller.
    Change(ChangeEvent),
    /// Countdown recomputation is due.
    Tick,
}

/// Behavior of one participant in the round protocol.
pub trait RoundSync: Send + Sync {
    fn role(&self) -> Role;
    fn context(&self) -> &SharedContext;
    /// Hydrate local state before signals start flowing.
    fn start(&self) -> BoxFuture<'_, Result<(), ServiceError>>;
    /// Reconcile local state with one signal.
    fn observe(&self, signal: RoundSignal) -> BoxFuture<'_, Result<(), ServiceError>>;
    /// Release background work.
    fn end(&self) -> BoxFuture<'_, ()>;
}

/// Read the session and current round into the context view.
async fn hydrate(ctx: &SharedContext) -> Result<GameSessionEntity, ServiceError> {
    let code = ctx.game_code();
    let session = ctx
        .store()
        .find_session(code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{code}`")))?;
    ctx.apply_session(&session).await;
    if session.current_round_no > 0 {
        if let Some(round) = ctx.store().find_round(code, session.current_round_no).await? {
            ctx.apply_round(&round).await;
        }
    }
    Ok(session)
}

impl RoundSync for HostStrategy {
    fn role(&self) -> Role {
        Role::Host
    }

    fn context(&self) -> &SharedContext {
        HostStrategy::context(self)
    }

    fn start(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            let session = hydrate(self.context()).await?;
            info!(
                game = %session.code,
                round = session.current_round_no,
                phase = ?session.phase,
                "host attached"
            );
            Ok(())
        })
    }

    fn observe(&self, signal: RoundSignal) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            match signal {
                RoundSignal::Change(ChangeEvent::Session(session)) => {
                    self.context().apply_session(&session).await;
                }
                RoundSignal::Change(ChangeEvent::Round(round)) => {
                    self.context().apply_round(&round).await;
                }
                RoundSignal::Change(ChangeEvent::Answer(answer)) => self.on_answer(&answer).await?,
                RoundSignal::Change(ChangeEvent::Score(_)) => {}
                RoundSignal::Tick => {
                    let reading = self.context().tick().await;
                    self.on_tick(reading).await?;
                }
            }
            Ok(())
        })
    }

    fn end(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            info!(game = %self.context().game_code(), "host detached");
        })
    }
}

impl RoundSync for FollowerStrategy {
    fn role(&self) -> Role {
        Role::Follower
    }

    fn context(&self) -> &SharedContext {
        FollowerStrategy::context(self)
    }

    fn start(&self) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            hydrate(self.context()).await?;
            self.await_letter_if_missing().await;
            Ok(())
        })
    }

    fn observe(&self, signal: RoundSignal) -> BoxFuture<'_, Result<(), ServiceError>> {
        Box::pin(async move {
            match signal {
                RoundSignal::Change(change) => self.on_change(&change).await,
                RoundSignal::Tick => {
                    self.context().tick().await;
                }
            }
            Ok(())
        })
    }

    fn end(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.shutdown();
        })
    }
}

/// Build the strategy matching the role of the context's user.
pub async fn build_strategy(
    ctx: SharedContext,
    judge: Arc<dyn JudgeService>,
) -> Result<Arc<dyn RoundSync>, ServiceError> {
    let code = ctx.game_code().to_string();
    let session = ctx
        .store()
        .find_session(&code)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game `{code}`")))?;

    let strategy: Arc<dyn RoundSync> = match Role::of(&session, ctx.user_id()) {
        Role::Host => Arc::new(HostStrategy::new(ctx, judge, session)),
        Role::Follower => Arc::new(FollowerStrategy::new(ctx)),
    };
    debug!(game = %code, role = ?strategy.role(), "strategy selected");
    Ok(strategy)
}

/// Runs one participant: merges push, poll and tick producers into a single
/// reconciliation loop.
pub struct RoundDriver {
    sync: Arc<dyn RoundSync>,
    hints: Arc<dyn HintService>,
    cancel: CancellationToken,
}

impl RoundDriver {
    pub fn new(sync: Arc<dyn RoundSync>, hints: Arc<dyn HintService>) -> Self {
        Self {
            sync,
            hints,
            cancel: CancellationToken::new(),
        }
    }

    /// Token stopping [`RoundDriver::run`] when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn context(&self) -> &SharedContext {
        self.sync.context()
    }

    /// Reconcile until the game is done or the driver is cancelled.
    pub async fn run(&self) -> Result<(), ServiceError> {
        let ctx = self.context().clone();
        let code = ctx.game_code().to_string();
        let store = ctx.store().clone();

        let changes = select_all([
            store.subscribe(ChangeFilter::Session { code: code.clone() }),
            store.subscribe(ChangeFilter::Rounds { code: code.clone() }),
            store.subscribe(ChangeFilter::Answers { code: code.clone() }),
        ]);
        self.sync.start().await?;

        let producers = self.cancel.child_token();
        let (tx, mut rx) = mpsc::channel(SIGNAL_CAPACITY);
        tokio::spawn(push_changes(changes, tx.clone(), producers.clone()));
        tokio::spawn(poll_state(
            ctx.clone(),
            self.sync.role(),
            tx.clone(),
            producers.clone(),
        ));
        tokio::spawn(tick(ctx.config().tick_interval, tx, producers.clone()));

        info!(
            game = %code,
            user = %ctx.user_id(),
            role = ?self.sync.role(),
            "round driver running"
        );
        loop {
            if ctx.view().phase == GamePhase::Done {
                info!(game = %code, "game done");
                break;
            }
            let signal = tokio::select! {
                _ = self.cancel.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };
            if let Err(err) = self.sync.observe(signal).await {
                warn!(game = %code, error = %err, "failed to reconcile round state");
            }
        }

        producers.cancel();
        self.sync.end().await;
        Ok(())
    }

    /// Submit this participant's answers for the current round.
    ///
    /// Returns `false` when answers were already submitted.
    pub async fn submit(&self, fields: AnswerFields) -> Result<bool, ServiceError> {
        let ctx = self.context();
        let view = ctx.view();
        if view.phase != GamePhase::Playing {
            return Err(ServiceError::InvalidState(format!(
                "cannot submit while {:?}",
                view.phase
            )));
        }
        let round = ctx
            .store()
            .find_round(ctx.game_code(), view.round_no)
            .await?
            .ok_or_else(|| {
                ServiceError::SyncDelay(format!("round {} not observed yet", view.round_no))
            })?;

        let written =
            submission::submit(ctx.store().as_ref(), &round, ctx.user_id(), fields, ctx.now())
                .await?;
        ctx.freeze_countdown().await;

        match written {
            Some(answer) => {
                self.sync
                    .observe(RoundSignal::Change(ChangeEvent::Answer(answer)))
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ask for this round's hint in `category` and fill it in when empty.
    pub async fn request_hint(
        &self,
        category: Category,
        fields: &mut AnswerFields,
    ) -> Result<String, ServiceError> {
        let ctx = self.context();
        let view = ctx.view();
        if !view.hints_enabled {
            return Err(ServiceError::HintsDisabled);
        }
        if view.phase != GamePhase::Playing {
            return Err(ServiceError::InvalidState(format!(
                "no hints while {:?}",
                view.phase
            )));
        }
        let letter = view.letter.clone().ok_or_else(|| {
            ServiceError::SyncDelay(format!("letter of round {} not observed yet", view.round_no))
        })?;

        let ask = HintAsk {
            game_code: ctx.game_code().to_string(),
            round_no: view.round_no,
            user_id: ctx.user_id().to_string(),
            language: view.language,
            letter,
            category,
            partial: fields.get(category).to_string(),
        };
        let suggestion =
            hint::request_hint(ctx.store().as_ref(), self.hints.as_ref(), ask, ctx.now()).await?;
        hint::apply_hint(fields, category, &suggestion);
        Ok(suggestion)
    }

    /// Scores written for the round currently observed.
    pub async fn results(&self) -> Result<Vec<RoundScoreEntity>, ServiceError> {
        let ctx = self.context();
        Ok(ctx.store().list_scores(ctx.current_round_id()).await?)
    }

    /// Score rows of round `round_no` as the host writes them.
    pub fn score_updates(
        &self,
        round_no: u32,
    ) -> BoxStream<'static, StorageResult<RoundScoreEntity>> {
        let ctx = self.context();
        let filter = ChangeFilter::Scores {
            round_id: round_id(ctx.game_code(), round_no),
        };
        ctx.store()
            .subscribe(filter)
            .filter_map(|change| {
                ready(match change {
                    Ok(ChangeEvent::Score(score)) => Some(Ok(score)),
                    Ok(_) => None,
                    Err(err) => Some(Err(err)),
                })
            })
            .boxed()
    }
}

async fn push_changes(
    mut changes: SelectAll<BoxStream<'static, StorageResult<ChangeEvent>>>,
    tx: mpsc::Sender<RoundSignal>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = changes.next() => next,
        };
        match next {
            Some(Ok(change)) => {
                if tx.send(RoundSignal::Change(change)).await.is_err() {
                    break;
                }
            }
            Some(Err(err)) => warn!(error = %err, "change notification failed"),
            None => break,
        }
    }
}

/// Fallback for missed or delayed notifications.
async fn poll_state(
    ctx: SharedContext,
    role: Role,
    tx: mpsc::Sender<RoundSignal>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(ctx.config().poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let changes = match read_state(&ctx, role).await {
            Ok(changes) => changes,
            Err(err) => {
                debug!(game = %ctx.game_code(), error = %err, "state poll failed");
                continue;
            }
        };
        for change in changes {
            if tx.send(RoundSignal::Change(change)).await.is_err() {
                return;
            }
        }
    }
}

async fn read_state(ctx: &SharedContext, role: Role) -> StorageResult<Vec<ChangeEvent>> {
    let store = ctx.store();
    let code = ctx.game_code();
    let mut changes = Vec::new();

    let Some(session) = store.find_session(code).await? else {
        return Ok(changes);
    };
    let round_no = session.current_round_no;
    let playing = session.phase == GamePhase::Playing;
    changes.push(ChangeEvent::Session(session));

    if round_no == 0 {
        return Ok(changes);
    }
    if let Some(round) = store.find_round(code, round_no).await? {
        let round_id = round.id;
        changes.push(ChangeEvent::Round(round));

        if role == Role::Host && playing {
            let answers = store.list_answers(round_id).await?;
            if let Some(answer) = answers.into_iter().find(|answer| answer.submitted_at.is_some())
            {
                changes.push(ChangeEvent::Answer(answer));
            }
        }
    }
    Ok(changes)
}

async fn tick(period: Duration, tx: mpsc::Sender<RoundSignal>, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if tx.send(RoundSignal::Tick).await.is_err() {
            break;
        }
    }
}
