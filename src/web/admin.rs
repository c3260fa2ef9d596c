//! Password-gated admin panel
//!
//! One form: pick a target guild and a count, and the replay worker sends
//! that many stored users to the guild in the background. The shared secret
//! is compared in constant time; a wrong password is rejected synchronously.

use axum::{
    extract::State,
    response::Html,
    routing::{get, post},
    Form, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::server::error_page;
use crate::error::BotError;
use crate::replay::ReplayWorker;
use crate::store::{SharedTokenStore, TokenStore};

/// Shared state for the admin routes
#[derive(Clone)]
pub struct AdminState {
    pub admin_password: String,
    pub worker: Arc<ReplayWorker>,
    pub store: SharedTokenStore,
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(panel))
        .route("/send", post(send))
        .with_state(state)
}

/// Form fields for a send request
#[derive(Deserialize)]
struct SendForm {
    password: String,
    guild_id: String,
    count: usize,
}

/// Constant-time shared-secret comparison
pub fn password_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// GET /admin - render the send form
async fn panel(State(state): State<AdminState>) -> Html<String> {
    let stored = state.store.count().await.unwrap_or(0);
    Html(panel_page(stored))
}

/// POST /admin/send - trigger a send run
///
/// Returns immediately; the run continues in the background.
async fn send(State(state): State<AdminState>, Form(form): Form<SendForm>) -> Html<String> {
    if !password_matches(&state.admin_password, &form.password) {
        warn!("Admin send rejected: wrong password");
        return Html(error_page("Wrong admin password."));
    }

    let guild_id: u64 = match form.guild_id.trim().parse() {
        Ok(id) if id != 0 => id,
        _ => return Html(error_page("Target guild ID must be a numeric Discord ID.")),
    };

    match state.worker.try_start(guild_id, form.count) {
        Ok(_handle) => {
            info!(
                "Admin triggered send run: {} users to guild {}",
                form.count, guild_id
            );
            Html(accepted_page(guild_id, form.count))
        }
        Err(BotError::RunInProgress) => Html(error_page(
            "A send run is already in progress. Wait for it to finish.",
        )),
        Err(e) => Html(error_page(&format!("Could not start the run: {}", e))),
    }
}

fn panel_page(stored: u64) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Admin - Auth Manager</title>
    <style>
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #2b2d31;
            color: #fff;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
        }}
        .container {{
            background: #313338;
            border-radius: 10px;
            padding: 2.5rem;
            max-width: 420px;
            width: 90%;
            box-shadow: 0 4px 15px rgba(0,0,0,0.3);
        }}
        h1 {{ font-size: 1.5rem; margin-bottom: 0.5rem; }}
        .stored {{ color: #b5bac1; margin-bottom: 1.5rem; }}
        label {{ display: block; margin: 1rem 0 0.25rem; color: #b5bac1; font-size: 0.9rem; }}
        input {{
            width: 100%;
            padding: 0.6rem;
            border-radius: 5px;
            border: 1px solid #1e1f22;
            background: #1e1f22;
            color: #fff;
        }}
        button {{
            margin-top: 1.5rem;
            width: 100%;
            background: #5865F2;
            color: white;
            border: none;
            padding: 0.75rem;
            border-radius: 5px;
            font-weight: bold;
            font-size: 1rem;
            cursor: pointer;
        }}
        button:hover {{ background: #4752c4; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Send Stored Users</h1>
        <div class="stored">{stored} stored users</div>
        <form method="post" action="/admin/send">
            <label for="password">Admin password</label>
            <input type="password" id="password" name="password" required>
            <label for="guild_id">Target guild ID</label>
            <input type="text" id="guild_id" name="guild_id" required>
            <label for="count">How many users to send</label>
            <input type="number" id="count" name="count" min="1" value="1" required>
            <button type="submit">Send</button>
        </form>
    </div>
</body>
</html>"#,
        stored = stored
    )
}

fn accepted_page(guild_id: u64, count: usize) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Run Started - Auth Manager</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #2b2d31;
            color: #fff;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            margin: 0;
        }}
        .card {{
            background: #313338;
            border-radius: 10px;
            padding: 2.5rem;
            max-width: 420px;
            width: 90%;
            text-align: center;
            box-shadow: 0 4px 15px rgba(0,0,0,0.3);
        }}
        .icon {{ font-size: 48px; color: #23a559; margin-bottom: 1rem; }}
        p {{ color: #b5bac1; margin-top: 0.75rem; }}
        a {{ color: #5865F2; }}
    </style>
</head>
<body>
    <div class="card">
        <div class="icon">✓</div>
        <h1>Run started</h1>
        <p>Sending up to {count} stored users to guild <code>{guild_id}</code>.</p>
        <p>The run continues in the background at one request per second. Results are written to the bot log.</p>
        <p><a href="/admin">Back to the panel</a></p>
    </div>
</body>
</html>"#,
        guild_id = guild_id,
        count = count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::{GuildJoiner, JoinError, JoinOutcome};
    use crate::store::{AuthorizedUser, MemoryTokenStore, TokenStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn password_comparison() {
        assert!(password_matches("hunter2", "hunter2"));
        assert!(!password_matches("hunter2", "hunter3"));
        assert!(!password_matches("hunter2", ""));
        assert!(!password_matches("hunter2", "hunter22"));
    }

    #[derive(Default)]
    struct CountingJoiner {
        calls: AtomicU32,
    }

    #[async_trait]
    impl GuildJoiner for CountingJoiner {
        async fn add_member(
            &self,
            _guild_id: u64,
            _user_id: &str,
            _access_token: &str,
        ) -> Result<JoinOutcome, JoinError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(JoinOutcome::Added)
        }
    }

    async fn admin_state(joiner: Arc<CountingJoiner>) -> (AdminState, Arc<MemoryTokenStore>) {
        let store = Arc::new(MemoryTokenStore::new());
        for id in ["1", "2", "3"] {
            store
                .upsert(AuthorizedUser::new(id, format!("user-{}", id), "tok", None))
                .await
                .unwrap();
        }
        let worker = Arc::new(ReplayWorker::new(store.clone(), joiner));
        (
            AdminState {
                admin_password: "hunter2".to_string(),
                worker,
                store: store.clone(),
            },
            store,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn correct_password_starts_a_background_run() {
        let joiner = Arc::new(CountingJoiner::default());
        let (state, store) = admin_state(joiner.clone()).await;

        let Html(body) = send(
            State(state),
            Form(SendForm {
                password: "hunter2".to_string(),
                guild_id: "99".to_string(),
                count: 2,
            }),
        )
        .await;

        assert!(body.contains("Run started"));

        // Let the background run finish (paused clock auto-advances)
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        assert_eq!(joiner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_synchronously() {
        let joiner = Arc::new(CountingJoiner::default());
        let (state, _store) = admin_state(joiner.clone()).await;
        let worker = state.worker.clone();

        let Html(body) = send(
            State(state),
            Form(SendForm {
                password: "wrong".to_string(),
                guild_id: "99".to_string(),
                count: 2,
            }),
        )
        .await;

        assert!(body.contains("Wrong admin password"));
        assert_eq!(joiner.calls.load(Ordering::SeqCst), 0);
        // No run was started, so the worker is still free
        assert!(worker.try_start(99, 1).is_ok());
    }
}
