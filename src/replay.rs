//! Send ("mass join") worker
//!
//! Replays stored access tokens against the guild-member-add endpoint, one
//! request per second. A token the provider rejects with 401 is treated as
//! permanently revoked and its record is deleted; any other failure is
//! counted and skipped. Only one run may be active at a time; the admin
//! endpoint and the slash command both go through `try_start`.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::error::{BotError, Result};
use crate::store::{SharedTokenStore, TokenStore};

/// Delay between consecutive member-add requests
const PACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Added,
    AlreadyMember,
}

#[derive(Debug, Error)]
pub enum JoinError {
    /// The stored access token was rejected (HTTP 401)
    #[error("access token rejected by Discord")]
    TokenRevoked,

    #[error("guild member add failed: {0}")]
    Other(String),
}

/// Seam for the guild-member-add call, so runs can be tested without
/// touching the Discord API.
#[async_trait]
pub trait GuildJoiner: Send + Sync {
    async fn add_member(
        &self,
        guild_id: u64,
        user_id: &str,
        access_token: &str,
    ) -> std::result::Result<JoinOutcome, JoinError>;
}

/// Real joiner: PUT /guilds/{guild}/members/{user} with the bot credential
/// and the member's delegated access token.
pub struct DiscordJoiner {
    http_client: reqwest::Client,
    bot_token: String,
}

impl DiscordJoiner {
    pub fn new(http_client: reqwest::Client, bot_token: impl Into<String>) -> Self {
        Self {
            http_client,
            bot_token: bot_token.into(),
        }
    }
}

#[async_trait]
impl GuildJoiner for DiscordJoiner {
    async fn add_member(
        &self,
        guild_id: u64,
        user_id: &str,
        access_token: &str,
    ) -> std::result::Result<JoinOutcome, JoinError> {
        let response = self
            .http_client
            .put(format!(
                "https://discord.com/api/guilds/{}/members/{}",
                guild_id, user_id
            ))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&serde_json::json!({ "access_token": access_token }))
            .send()
            .await
            .map_err(|e| JoinError::Other(e.to_string()))?;

        match response.status().as_u16() {
            201 => Ok(JoinOutcome::Added),
            // 204: the user was already a member
            204 => Ok(JoinOutcome::AlreadyMember),
            401 => Err(JoinError::TokenRevoked),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(JoinError::Other(format!("HTTP {}: {}", status, text)))
            }
        }
    }
}

/// Aggregate result of one send run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub removed: u32,
}

/// Handle to a running send run; resolves when the run finishes
pub struct RunHandle {
    report: oneshot::Receiver<ReplayReport>,
}

impl RunHandle {
    /// Wait for the run to finish. Returns None if the worker task died.
    pub async fn wait(self) -> Option<ReplayReport> {
        self.report.await.ok()
    }
}

pub struct ReplayWorker {
    store: SharedTokenStore,
    joiner: Arc<dyn GuildJoiner>,
    running: Arc<AtomicBool>,
}

impl ReplayWorker {
    pub fn new(store: SharedTokenStore, joiner: Arc<dyn GuildJoiner>) -> Self {
        Self {
            store,
            joiner,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a run in the background. Fails with `RunInProgress` while a
    /// previous run is still active.
    pub fn try_start(&self, guild_id: u64, count: usize) -> Result<RunHandle> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BotError::RunInProgress);
        }

        let (tx, rx) = oneshot::channel();
        let store = self.store.clone();
        let joiner = self.joiner.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let report = run_send(store, joiner, guild_id, count).await;
            running.store(false, Ordering::SeqCst);
            info!(
                "Send run for guild {} finished: {} attempted, {} succeeded, {} failed, {} removed",
                guild_id, report.attempted, report.succeeded, report.failed, report.removed
            );
            // Receiver may be gone (fire-and-forget admin trigger)
            let _ = tx.send(report);
        });

        Ok(RunHandle { report: rx })
    }
}

async fn run_send(
    store: SharedTokenStore,
    joiner: Arc<dyn GuildJoiner>,
    guild_id: u64,
    count: usize,
) -> ReplayReport {
    let users = match store.list(count).await {
        Ok(users) => users,
        Err(e) => {
            error!("Failed to list stored users for send run: {}", e);
            return ReplayReport::default();
        }
    };

    info!(
        "Starting send run: {} of requested {} users to guild {}",
        users.len(),
        count,
        guild_id
    );

    let mut report = ReplayReport::default();

    for (i, user) in users.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(PACE).await;
        }

        report.attempted += 1;
        match joiner
            .add_member(guild_id, &user.id, &user.access_token)
            .await
        {
            Ok(_) => {
                report.succeeded += 1;
            }
            Err(JoinError::TokenRevoked) => {
                warn!("Token for user {} revoked, removing record", user.id);
                if let Err(e) = store.delete(&user.id).await {
                    error!("Failed to delete revoked record {}: {}", user.id, e);
                }
                report.removed += 1;
            }
            Err(JoinError::Other(message)) => {
                warn!(
                    "Could not add user {} to guild {}: {}",
                    user.id, guild_id, message
                );
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AuthorizedUser, MemoryTokenStore, TokenStore};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Anything not listed succeeds
    #[derive(Clone, Copy)]
    enum StubBehavior {
        Revoked,
        Fail,
    }

    struct StubJoiner {
        behaviors: HashMap<String, StubBehavior>,
        calls: Mutex<Vec<(String, tokio::time::Instant)>>,
    }

    impl StubJoiner {
        fn with(behaviors: &[(&str, StubBehavior)]) -> Self {
            Self {
                behaviors: behaviors
                    .iter()
                    .map(|(id, b)| (id.to_string(), *b))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        async fn calls(&self) -> Vec<(String, tokio::time::Instant)> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl GuildJoiner for StubJoiner {
        async fn add_member(
            &self,
            _guild_id: u64,
            user_id: &str,
            _access_token: &str,
        ) -> std::result::Result<JoinOutcome, JoinError> {
            self.calls
                .lock()
                .await
                .push((user_id.to_string(), tokio::time::Instant::now()));
            match self.behaviors.get(user_id).copied() {
                Some(StubBehavior::Revoked) => Err(JoinError::TokenRevoked),
                Some(StubBehavior::Fail) => Err(JoinError::Other("HTTP 403".to_string())),
                _ => Ok(JoinOutcome::Added),
            }
        }
    }

    async fn seeded_store(ids: &[&str]) -> Arc<MemoryTokenStore> {
        let store = Arc::new(MemoryTokenStore::new());
        for id in ids {
            store
                .upsert(AuthorizedUser::new(*id, format!("user-{}", id), "tok", None))
                .await
                .unwrap();
            // Distinct timestamps keep the retrieval order stable
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_exactly_count_in_retrieval_order_with_pacing() {
        let store = seeded_store(&["1", "2", "3"]).await;
        let joiner = Arc::new(StubJoiner::with(&[]));
        let worker = Arc::new(ReplayWorker::new(store.clone(), joiner.clone()));

        let report = worker.try_start(99, 2).unwrap().wait().await.unwrap();

        assert_eq!(
            report,
            ReplayReport {
                attempted: 2,
                succeeded: 2,
                failed: 0,
                removed: 0
            }
        );

        let calls = joiner.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "1");
        assert_eq!(calls[1].0, "2");
        assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_token_is_deleted_without_halting_the_run() {
        let store = seeded_store(&["1", "2", "3"]).await;
        let joiner = Arc::new(StubJoiner::with(&[("2", StubBehavior::Revoked)]));
        let worker = Arc::new(ReplayWorker::new(store.clone(), joiner.clone()));

        let report = worker.try_start(99, 3).unwrap().wait().await.unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);

        // Record 2 is gone, the others survived
        assert!(store.get("2").await.unwrap().is_none());
        assert!(store.get("1").await.unwrap().is_some());
        assert!(store.get("3").await.unwrap().is_some());
        assert_eq!(joiner.calls().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_revocation_failure_keeps_the_record() {
        let store = seeded_store(&["1", "2"]).await;
        let joiner = Arc::new(StubJoiner::with(&[("1", StubBehavior::Fail)]));
        let worker = Arc::new(ReplayWorker::new(store.clone(), joiner.clone()));

        let report = worker.try_start(99, 2).unwrap().wait().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.removed, 0);
        assert!(store.get("1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_runs_are_rejected() {
        let store = seeded_store(&["1", "2"]).await;
        let joiner = Arc::new(StubJoiner::with(&[]));
        let worker = Arc::new(ReplayWorker::new(store.clone(), joiner.clone()));

        let handle = worker.try_start(99, 2).unwrap();
        // The first run has not finished yet, so a second trigger is refused
        assert!(matches!(
            worker.try_start(99, 2),
            Err(BotError::RunInProgress)
        ));

        handle.wait().await.unwrap();

        // After completion a new run may start
        assert!(worker.try_start(99, 1).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_store_produces_empty_report() {
        let store = Arc::new(MemoryTokenStore::new());
        let joiner = Arc::new(StubJoiner::with(&[]));
        let worker = Arc::new(ReplayWorker::new(store, joiner.clone()));

        let report = worker.try_start(99, 5).unwrap().wait().await.unwrap();

        assert_eq!(report, ReplayReport::default());
        assert!(joiner.calls().await.is_empty());
    }
}
