//! Headless participant: joins one game as host or follower and runs it to the end.

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use round_sync::{
    clients::http::{HttpHints, HttpJudge},
    config::AppConfig,
    dao::game_store::{
        GameStore,
        couchdb::{CouchConfig, CouchGameStore},
    },
    services::{
        follower::FollowerStrategy,
        host::HostStrategy,
        retry::{RetryPolicy, retry_until},
        sync::{Role, RoundDriver, RoundSync},
    },
    state::{GameContext, clock::SystemClock, state_machine::GamePhase},
};

const CONNECT_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 5,
    delay: Duration::from_secs(2),
};
/// Optional pause after which a headless host opens the next round by itself.
const AUTO_ADVANCE_ENV: &str = "ROUND_SYNC_AUTO_ADVANCE_SECS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::load());
    let game_code = env::var("GAME_CODE").context("GAME_CODE is not set")?;
    let user_id = env::var("USER_ID").context("USER_ID is not set")?;

    let shutdown = CancellationToken::new();
    let couch = CouchConfig::from_env().context("reading CouchDB settings")?;
    let store: Arc<dyn GameStore> = Arc::new(
        retry_until(CONNECT_POLICY, &shutdown, |attempt| {
            let couch = couch.clone();
            async move {
                CouchGameStore::connect(couch)
                    .await
                    .map(Some)
                    .inspect_err(|err| {
                        warn!(attempt, error = %err, "CouchDB connection attempt failed")
                    })
            }
        })
        .await
        .context("connecting to CouchDB")?,
    );
    store.health_check().await.context("CouchDB health check")?;

    let session = store
        .find_session(&game_code)
        .await
        .context("loading game session")?
        .with_context(|| format!("game `{game_code}` does not exist"))?;

    let http = reqwest::Client::builder()
        .build()
        .context("building HTTP client")?;
    let judge = Arc::new(HttpJudge::new(http.clone(), &config.judge));
    let hints = Arc::new(HttpHints::new(http, &config.hint));

    let role = Role::of(&session, &user_id);
    let ctx = GameContext::new(
        user_id,
        &session,
        store,
        Arc::new(SystemClock),
        config.clone(),
    );

    let sync: Arc<dyn RoundSync> = match role {
        Role::Host => {
            let host = Arc::new(HostStrategy::new(ctx, judge, session));
            if let Some(pause) = auto_advance_pause() {
                tokio::spawn(auto_advance(host.clone(), pause, shutdown.child_token()));
            }
            host
        }
        Role::Follower => Arc::new(FollowerStrategy::new(ctx)),
    };

    let driver = Arc::new(RoundDriver::new(sync, hints));
    tokio::spawn(report_scores(driver.clone(), shutdown.child_token()));
    let stop = driver.cancel_token();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        signal_shutdown.cancel();
        stop.cancel();
    });

    info!(game = %game_code, ?role, "joining game");
    driver.run().await.context("running round driver")?;
    shutdown.cancel();
    Ok(())
}

fn auto_advance_pause() -> Option<Duration> {
    env::var(AUTO_ADVANCE_ENV)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Open the next round `pause` after the previous one was scored.
async fn auto_advance(host: Arc<HostStrategy>, pause: Duration, cancel: CancellationToken) {
    let mut view = host.context().subscribe_view();
    loop {
        if ready_for_next_round(&host).await {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
            if let Err(err) = host.start_next_round(None).await {
                warn!(error = %err, "could not open next round");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn ready_for_next_round(host: &HostStrategy) -> bool {
    let snapshot = host.snapshot().await;
    let session = host.session().await;
    match snapshot.phase {
        GamePhase::Lobby => true,
        GamePhase::Scoring if snapshot.round_no < session.rounds_total => host
            .context()
            .store()
            .find_round(&session.code, snapshot.round_no)
            .await
            .ok()
            .flatten()
            .is_some_and(|round| round.scored_at.is_some()),
        _ => false,
    }
}

/// Log the score rows of each observed round as the host posts them.
async fn report_scores(driver: Arc<RoundDriver>, cancel: CancellationToken) {
    let mut view = driver.context().subscribe_view();
    loop {
        let round_no = view.borrow_and_update().round_no;
        let mut scores = driver.score_updates(round_no);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = view.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if view.borrow().round_no != round_no {
                        break;
                    }
                }
                next = scores.next() => match next {
                    Some(Ok(score)) => info!(
                        round = round_no,
                        user = %score.user_id,
                        total = score.total,
                        "score posted"
                    ),
                    Some(Err(err)) => warn!(round = round_no, error = %err, "score feed failed"),
                    None => return,
                },
            }
        }
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,round_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
