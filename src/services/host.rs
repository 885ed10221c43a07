//! The single authority of a game: starts and ends rounds, runs scoring and
//! closes the game.

use std::{future::Future, sync::Arc};

use tokio::{
    sync::{Mutex, RwLock},
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    clients::JudgeService,
    dao::models::{
        GameSessionEntity, LetterMode, PlayerAnswerEntity, RoundRecordEntity, RoundStatus,
        round_id,
    },
    dto::judge::{JudgeAnswer, JudgeRequest, VALIDATION_MODE},
    error::ServiceError,
    services::{
        letter::{compute_letter, normalize_letter},
        submission::all_submitted,
    },
    state::{
        AbortError, ApplyError, Plan, PlanError, PlanId, SharedContext, Snapshot, TimerReading,
        state_machine::{EndReason, GameEvent, GamePhase, GameStateMachine},
    },
};

/// Host side of the round protocol.
pub struct HostStrategy {
    ctx: SharedContext,
    judge: Arc<dyn JudgeService>,
    machine: RwLock<GameStateMachine>,
    session: RwLock<GameSessionEntity>,
    transition_gate: Mutex<()>,
    scoring_gate: Mutex<()>,
}

impl HostStrategy {
    /// Take authority over the game described by `session`.
    pub fn new(
        ctx: SharedContext,
        judge: Arc<dyn JudgeService>,
        session: GameSessionEntity,
    ) -> Self {
        let machine = GameStateMachine::resume(
            session.phase,
            session.current_round_no,
            session.rounds_total,
        );
        Self {
            ctx,
            judge,
            machine: RwLock::new(machine),
            session: RwLock::new(session),
            transition_gate: Mutex::new(()),
            scoring_gate: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.machine.read().await.snapshot()
    }

    /// Copy of the session as last written by this host.
    pub async fn session(&self) -> GameSessionEntity {
        self.session.read().await.clone()
    }

    async fn plan_transition(&self, event: GameEvent) -> Result<Plan, PlanError> {
        let mut sm = self.machine.write().await;
        sm.plan(event)
    }

    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let mut sm = self.machine.write().await;
        sm.apply(plan_id)
    }

    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.machine.write().await;
        sm.abort(plan_id)
    }

    /// Plan `event`, run the store writes in `work`, then apply or abort.
    async fn run_transition<F, Fut, T>(
        &self,
        event: GameEvent,
        work: F,
    ) -> Result<(T, GamePhase), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.transition_gate.lock().await;
        let Plan { id: plan_id, .. } = self.plan_transition(event.clone()).await?;

        let work_future = work();
        let outcome = if let Some(limit) = self.ctx.config().transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            event = ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }

    async fn adopt(&self, session: GameSessionEntity, round: Option<&RoundRecordEntity>) {
        if let Some(round) = round {
            self.ctx.apply_round(round).await;
        }
        self.ctx.apply_session(&session).await;
        *self.session.write().await = session;
    }

    /// Open round `round_no` with the configured letter mode.
    pub async fn start_round(&self, round_no: u32) -> Result<RoundRecordEntity, ServiceError> {
        self.open_round(round_no, None).await
    }

    /// Open the round after the current one, optionally with a host-picked letter.
    pub async fn start_next_round(
        &self,
        picked_letter: Option<&str>,
    ) -> Result<RoundRecordEntity, ServiceError> {
        let next = self.machine.read().await.round_no() + 1;
        self.open_round(next, picked_letter).await
    }

    async fn open_round(
        &self,
        round_no: u32,
        picked_letter: Option<&str>,
    ) -> Result<RoundRecordEntity, ServiceError> {
        let code = self.ctx.game_code();
        {
            let sm = self.machine.read().await;
            if sm.phase() == GamePhase::Playing && sm.round_no() == round_no {
                drop(sm);
                debug!(game = %code, round = round_no, "round already open");
                return self
                    .ctx
                    .store()
                    .find_round(code, round_no)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("round {round_no} of `{code}`")));
            }
        }

        let mut session = self.session().await;
        let picked = match (session.letter_mode, picked_letter) {
            (LetterMode::Manual, Some(picked)) => Some(normalize_letter(session.language, picked)?),
            (LetterMode::Auto, Some(_)) => {
                return Err(ServiceError::InvalidInput(
                    "letter is derived automatically in this game".into(),
                ));
            }
            (_, None) => None,
        };

        let store = self.ctx.store().clone();
        let now = self.ctx.now();
        let ((round, session), _) = self
            .run_transition(GameEvent::StartRound { round_no }, move || async move {
                if let Some(letter) = picked {
                    session.manual_letter = Some(letter);
                    store.save_session(session.clone()).await?;
                }

                let letter = match store.find_round(code, round_no).await? {
                    Some(existing) if !existing.letter.is_empty() => existing.letter,
                    _ => compute_letter(
                        code,
                        session.language,
                        round_no,
                        session.letter_mode,
                        session.manual_letter.as_deref(),
                    )?,
                };

                let round = RoundRecordEntity {
                    id: round_id(code, round_no),
                    game_code: code.to_string(),
                    round_no,
                    letter,
                    started_at: now,
                    ended_at: None,
                    status: RoundStatus::Active,
                    scored_at: None,
                };
                store.upsert_round(round.clone()).await?;

                session.current_round_no = round_no;
                session.phase = GamePhase::Playing;
                session.started_at = Some(now);
                store.save_session(session.clone()).await?;
                Ok((round, session))
            })
            .await?;

        info!(
            game = %code,
            round = round_no,
            letter = %round.letter,
            "round started"
        );
        self.adopt(session, Some(&round)).await;
        Ok(round)
    }

    /// Re-stamp the start of the running round; every participant resynchronizes.
    pub async fn restart_round(&self) -> Result<RoundRecordEntity, ServiceError> {
        let _gate = self.transition_gate.lock().await;
        let round_no = {
            let sm = self.machine.read().await;
            if sm.phase() != GamePhase::Playing {
                return Err(ServiceError::InvalidState(format!(
                    "cannot restart a round while {:?}",
                    sm.phase()
                )));
            }
            sm.round_no()
        };

        let code = self.ctx.game_code();
        let store = self.ctx.store();
        let mut round = store
            .find_round(code, round_no)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("round {round_no} of `{code}`")))?;
        let now = self.ctx.now();
        round.started_at = now;
        round.ended_at = None;
        store.upsert_round(round.clone()).await?;

        let mut session = self.session().await;
        session.started_at = Some(now);
        store.save_session(session.clone()).await?;

        info!(game = %code, round = round_no, "round restarted");
        self.adopt(session, Some(&round)).await;
        Ok(round)
    }

    /// Close the running round and score it.
    ///
    /// Safe to call from any number of triggers at once: only the first call
    /// made while the round is playing transitions, the others return `false`.
    pub async fn end_round_now(&self, reason: EndReason) -> Result<bool, ServiceError> {
        let round_no = self.machine.read().await.round_no();
        self.end_round(round_no, reason).await
    }

    /// Close round `round_no` if it is still the one running.
    ///
    /// A trigger that observed an earlier round returns `false` without
    /// touching the current one.
    pub async fn end_round(&self, round_no: u32, reason: EndReason) -> Result<bool, ServiceError> {
        if !self.is_playing(round_no).await {
            return Ok(false);
        }

        let code = self.ctx.game_code();
        let store = self.ctx.store().clone();
        let now = self.ctx.now();
        let mut session = self.session().await;

        let transition = self
            .run_transition(GameEvent::EndRound { round_no, reason }, move || async move {
                let mut round = store
                    .find_round(code, round_no)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("round {round_no} of `{code}`"))
                    })?;
                round.ended_at = Some(now);
                round.status = RoundStatus::Ended;
                store.upsert_round(round.clone()).await?;

                session.phase = GamePhase::Scoring;
                store.save_session(session.clone()).await?;
                Ok((round, session))
            })
            .await;

        let (round, session) = match transition {
            Ok((written, _)) => written,
            Err(err) => {
                if !self.is_playing(round_no).await {
                    debug!(game = %code, round = round_no, ?reason, "round already ended");
                    return Ok(false);
                }
                return Err(err);
            }
        };

        info!(game = %code, round = round_no, ?reason, "round ended");
        self.adopt(session, Some(&round)).await;

        if let Err(err) = self.score_round(round_no).await {
            warn!(
                game = %code,
                round = round_no,
                error = %err,
                "scoring incomplete; round stays in scoring"
            );
        }
        Ok(true)
    }

    /// Score `round_no` unless it already carries results.
    ///
    /// Returns `false` when the round was already scored. A judge failure
    /// leaves the round unscored.
    pub async fn score_round(&self, round_no: u32) -> Result<bool, ServiceError> {
        let _scoring = self.scoring_gate.lock().await;
        let code = self.ctx.game_code();
        let store = self.ctx.store();

        let mut round = store
            .find_round(code, round_no)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("round {round_no} of `{code}`")))?;
        if round.scored_at.is_some() {
            debug!(game = %code, round = round_no, "round already scored");
            return Ok(false);
        }

        let answers = store.list_answers(round.id).await?;
        let session = self.session().await;
        let request = JudgeRequest {
            game_code: code.to_string(),
            round_id: round.id,
            language: session.language,
            letter: round.letter.clone(),
            round_duration_sec: session.round_duration_sec,
            started_at: round.started_at,
            answers: answers.iter().map(JudgeAnswer::from).collect(),
            validation_mode: VALIDATION_MODE,
        };

        let response = self
            .judge
            .score(request)
            .await
            .map_err(ServiceError::ScoringFailed)?;

        for result in response.results {
            let typed = answers
                .iter()
                .find(|answer| answer.user_id == result.user_id)
                .map(|answer| &answer.fields);
            store.upsert_score(result.into_score(round.id, typed)).await?;
        }

        round.scored_at = Some(self.ctx.now());
        round.status = RoundStatus::Scored;
        store.upsert_round(round.clone()).await?;
        self.ctx.apply_round(&round).await;
        info!(game = %code, round = round_no, players = answers.len(), "round scored");

        if round_no >= session.rounds_total {
            sleep(self.ctx.config().final_round_grace).await;
            self.finish_game().await?;
        }
        Ok(true)
    }

    /// Run the scoring pass again for a round stuck in scoring.
    pub async fn retry_scoring(&self) -> Result<bool, ServiceError> {
        let (phase, round_no) = {
            let sm = self.machine.read().await;
            (sm.phase(), sm.round_no())
        };
        if phase != GamePhase::Scoring {
            return Err(ServiceError::InvalidState(format!(
                "nothing to score while {phase:?}"
            )));
        }
        self.score_round(round_no).await
    }

    async fn finish_game(&self) -> Result<(), ServiceError> {
        let store = self.ctx.store().clone();
        let mut session = self.session().await;
        let (session, _) = self
            .run_transition(GameEvent::FinishGame, move || async move {
                session.phase = GamePhase::Done;
                store.save_session(session.clone()).await?;
                Ok(session)
            })
            .await?;

        info!(game = %session.code, rounds = session.rounds_total, "game finished");
        self.adopt(session, None).await;
        Ok(())
    }

    /// React to a change of an answer row.
    pub async fn on_answer(&self, answer: &PlayerAnswerEntity) -> Result<(), ServiceError> {
        let (phase, round_no) = {
            let sm = self.machine.read().await;
            (sm.phase(), sm.round_no())
        };
        if phase != GamePhase::Playing
            || answer.submitted_at.is_none()
            || answer.round_id != round_id(self.ctx.game_code(), round_no)
        {
            return Ok(());
        }

        let session = self.session().await;
        if session.end_on_first_submit {
            self.end_round(round_no, EndReason::FirstSubmission).await?;
            return Ok(());
        }
        if !session.submit_ends_round {
            return Ok(());
        }

        let store = self.ctx.store();
        let roster = store.list_players(&session.code).await?;
        let answers = store.list_answers(answer.round_id).await?;
        if all_submitted(&roster, &answers) {
            self.end_round(round_no, EndReason::AllSubmitted).await?;
        }
        Ok(())
    }

    /// React to a countdown tick.
    ///
    /// Only the round the countdown was synchronized to can be closed by it.
    pub async fn on_tick(&self, reading: TimerReading) -> Result<(), ServiceError> {
        if reading.remaining_sec == Some(0) {
            self.end_round(reading.round_no, EndReason::TimerExpired).await?;
        }
        Ok(())
    }

    async fn is_playing(&self, round_no: u32) -> bool {
        let sm = self.machine.read().await;
        sm.phase() == GamePhase::Playing && sm.round_no() == round_no
    }
}
