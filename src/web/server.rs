//! Web server: health route and the OAuth callback

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use poise::serenity_prelude::{self as serenity, ChannelId, GuildId, UserId};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info, warn};

use super::admin::{admin_router, AdminState};
use super::oauth::{DiscordUser, OAuthState, TokenResponse};
use crate::audit;
use crate::error::{BotError, Result};
use crate::store::{AuthorizedUser, SharedTokenStore, TokenStore};

/// Web server configuration
pub struct WebServerConfig {
    pub port: u16,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl WebServerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("HTTP_PORT")
                .or_else(|_| std::env::var("PORT"))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3000),
        }
    }
}

/// Callback behavior configured from the environment
#[derive(Clone)]
pub struct CallbackSettings {
    /// Channel that receives the audit embed for each authorization
    pub log_channel: Option<ChannelId>,
    /// Where the browser is sent when the callback carried no guild state
    pub redirect_target: String,
    /// Role granted (best-effort) in the originating guild
    pub verified_role_name: String,
}

impl CallbackSettings {
    pub fn from_env() -> Self {
        Self {
            log_channel: std::env::var("LOG_CHANNEL_ID")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|id| *id != 0)
                .map(ChannelId::new),
            redirect_target: std::env::var("REDIRECT_TARGET")
                .unwrap_or_else(|_| "https://discord.com/app".to_string()),
            verified_role_name: std::env::var("VERIFIED_ROLE_NAME")
                .unwrap_or_else(|_| "Verified".to_string()),
        }
    }
}

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub oauth: OAuthState,
    pub store: SharedTokenStore,
    pub serenity_http: Arc<serenity::Http>,
    pub settings: CallbackSettings,
}

/// Query parameters from the Discord OAuth callback
#[derive(Deserialize)]
pub struct CallbackParams {
    /// Authorization code; absent when the user cancelled the consent screen
    pub code: Option<String>,
    /// Correlation value: the guild ID the flow started from
    pub state: Option<String>,
}

/// Start the web server for the OAuth callback and admin panel
pub async fn start_web_server(
    config: WebServerConfig,
    state: AppState,
    admin_state: Option<AdminState>,
) -> anyhow::Result<()> {
    let base_url = state.oauth.base_url.clone();

    let mut app = Router::new()
        .route("/", get(health))
        .route("/callback", get(oauth_callback))
        .with_state(state);

    if let Some(admin_state) = admin_state {
        app = app.nest("/admin", admin_router(admin_state));
    } else {
        warn!("ADMIN_PASSWORD not set, admin panel disabled");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Web server listening on http://{}", addr);
    info!("=== Discord OAuth Configuration ===");
    info!("Add this Redirect URI in the Discord Developer Portal:");
    info!("  {}/callback", base_url);
    info!("Portal: https://discord.com/developers/applications -> OAuth2 -> Redirects");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> &'static str {
    "Auth Manager Online"
}

/// GET /callback - OAuth callback handler
async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    // No code, no side effects
    let code = match params.code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => code,
        None => return Html(error_page("Missing authorization code.")),
    };

    let origin_guild = params
        .state
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|id| *id != 0)
        .map(GuildId::new);

    match complete_authorization(&state, code, origin_guild).await {
        Ok(page) => Html(page),
        Err(e) => {
            error!("OAuth callback failed: {}", e);
            Html(error_page(
                "Verification failed. Please try again or contact an administrator.",
            ))
        }
    }
}

/// Four steps: exchange the code, fetch the profile, persist the tokens,
/// render the redirect page. Role grant and audit log are best-effort.
async fn complete_authorization(
    state: &AppState,
    code: &str,
    origin_guild: Option<GuildId>,
) -> Result<String> {
    // Exchange code for access token
    let token_response = state
        .oauth
        .http_client
        .post("https://discord.com/api/oauth2/token")
        .form(&[
            ("client_id", state.oauth.client_id.as_str()),
            ("client_secret", state.oauth.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &state.oauth.redirect_uri()),
        ])
        .send()
        .await
        .map_err(|e| BotError::TokenExchange {
            message: e.to_string(),
        })?;

    if !token_response.status().is_success() {
        let status = token_response.status();
        let text = token_response.text().await.unwrap_or_default();
        return Err(BotError::TokenExchange {
            message: format!("{}: {}", status, text),
        });
    }

    let token: TokenResponse =
        token_response
            .json()
            .await
            .map_err(|e| BotError::TokenExchange {
                message: format!("invalid token response: {}", e),
            })?;

    // Fetch the authenticated user's profile
    let user_response = state
        .oauth
        .http_client
        .get("https://discord.com/api/users/@me")
        .header(
            "Authorization",
            format!("{} {}", token.token_type, token.access_token),
        )
        .send()
        .await
        .map_err(|e| BotError::ProfileFetch {
            message: e.to_string(),
        })?;

    if !user_response.status().is_success() {
        let status = user_response.status();
        return Err(BotError::ProfileFetch {
            message: format!("{}", status),
        });
    }

    let discord_user: DiscordUser =
        user_response
            .json()
            .await
            .map_err(|e| BotError::ProfileFetch {
                message: format!("invalid user response: {}", e),
            })?;

    info!(
        "User authenticated: {} ({})",
        discord_user.username, discord_user.id
    );

    // Persist (or refresh) the record
    state
        .store
        .upsert(AuthorizedUser::new(
            discord_user.id.clone(),
            discord_user.username.clone(),
            token.access_token.clone(),
            token.refresh_token.clone(),
        ))
        .await?;

    // Best-effort role grant in the originating guild. Failure only changes
    // the status line in the audit message.
    let mut status = "Token saved".to_string();
    if let Some(guild_id) = origin_guild {
        match grant_verified_role(state, guild_id, &discord_user).await {
            Ok(role_name) => {
                info!(
                    "Granted role '{}' to {} in guild {}",
                    role_name, discord_user.id, guild_id
                );
                status = format!("Token saved, role '{}' granted", role_name);
            }
            Err(e) => {
                warn!(
                    "Could not grant role to {} in guild {}: {}",
                    discord_user.id, guild_id, e
                );
                status = "Token saved, role not granted".to_string();
            }
        }
    }

    // Audit embed to the log channel
    if let Some(channel) = state.settings.log_channel {
        audit::notify_authorized(&state.serenity_http, channel, &discord_user, &status).await;
    }

    let redirect_target = match origin_guild {
        Some(guild_id) => format!("https://discord.com/channels/{}", guild_id),
        None => state.settings.redirect_target.clone(),
    };

    Ok(success_page(&discord_user.username, &redirect_target))
}

/// Locate the configured role by name and attach it to the member.
async fn grant_verified_role(
    state: &AppState,
    guild_id: GuildId,
    discord_user: &DiscordUser,
) -> Result<String> {
    let role_name = &state.settings.verified_role_name;

    let user_id: u64 = discord_user.id.parse().map_err(|_| BotError::Internal {
        message: format!("invalid Discord user ID: {}", discord_user.id),
    })?;
    let user_id = UserId::new(user_id);

    let roles = guild_id.roles(&state.serenity_http).await?;
    let role_id = roles
        .iter()
        .find(|(_, role)| role.name == *role_name)
        .map(|(id, _)| *id)
        .ok_or_else(|| BotError::RoleNotFound {
            name: role_name.clone(),
        })?;

    let member = guild_id.member(&state.serenity_http, user_id).await?;
    member.add_role(&state.serenity_http, role_id).await?;

    Ok(role_name.clone())
}

fn success_page(username: &str, redirect_target: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Verified</title>
    <style>
        body {{
            background-color: #2b2d31;
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            color: white;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            flex-direction: column;
        }}
        .card {{
            background-color: #313338;
            padding: 40px;
            border-radius: 10px;
            box-shadow: 0 4px 15px rgba(0,0,0,0.3);
            text-align: center;
            max-width: 400px;
            width: 90%;
        }}
        .icon {{ font-size: 60px; color: #23a559; margin-bottom: 20px; }}
        h1 {{ margin: 0 0 10px 0; font-size: 24px; }}
        p {{ color: #b5bac1; margin-bottom: 30px; }}
        .btn {{
            background-color: #5865F2;
            color: white;
            padding: 12px 24px;
            text-decoration: none;
            border-radius: 5px;
            font-weight: bold;
            transition: background 0.2s;
            display: inline-block;
        }}
        .btn:hover {{ background-color: #4752c4; }}
        .timer {{ margin-top: 20px; font-size: 12px; color: #949ba4; }}
    </style>
</head>
<body>
    <div class="card">
        <div class="icon">✓</div>
        <h1>Verified!</h1>
        <p>Welcome, <strong>{username}</strong>. Your account has been authenticated. You can close this window.</p>
        <a href="{redirect_target}" class="btn">Back to the server</a>
        <div class="timer">Redirecting in <span id="count">3</span>s...</div>
    </div>
    <script>
        let seconds = 3;
        const countSpan = document.getElementById('count');
        setInterval(() => {{
            seconds--;
            countSpan.innerText = seconds;
            if (seconds <= 0) window.location.href = "{redirect_target}";
        }}, 1000);
    </script>
</body>
</html>"#,
        username = username,
        redirect_target = redirect_target
    )
}

pub(super) fn error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Verification Error</title>
    <style>
        body {{
            background-color: #2b2d31;
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            color: white;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }}
        .card {{
            background-color: #313338;
            padding: 40px;
            border-radius: 10px;
            box-shadow: 0 4px 15px rgba(0,0,0,0.3);
            text-align: center;
            max-width: 400px;
            width: 90%;
        }}
        .icon {{ font-size: 60px; color: #f23f43; margin-bottom: 20px; }}
        h1 {{ margin: 0 0 10px 0; font-size: 24px; }}
        .message {{
            background: #3b2527;
            padding: 15px;
            border-radius: 8px;
            color: #f38688;
            margin: 20px 0;
        }}
        p {{ color: #b5bac1; font-size: 14px; }}
    </style>
</head>
<body>
    <div class="card">
        <div class="icon">✕</div>
        <h1>Verification Failed</h1>
        <div class="message">{message}</div>
        <p>Please try again or contact an administrator.</p>
    </div>
</body>
</html>"#,
        message = message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryTokenStore, TokenStore};

    fn test_state(store: Arc<MemoryTokenStore>) -> AppState {
        AppState {
            oauth: OAuthState {
                client_id: "42".to_string(),
                client_secret: "secret".to_string(),
                bot_token: "bot".to_string(),
                base_url: "http://localhost:3000".to_string(),
                http_client: reqwest::Client::new(),
            },
            store,
            serenity_http: Arc::new(serenity::Http::new("")),
            settings: CallbackSettings {
                log_channel: None,
                redirect_target: "https://discord.com/app".to_string(),
                verified_role_name: "Verified".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn missing_code_short_circuits_without_store_mutation() {
        let store = Arc::new(MemoryTokenStore::new());
        let state = test_state(store.clone());

        // No code: handler must return the error page before any token
        // exchange, so no network access happens here.
        let Html(body) = oauth_callback(
            State(state),
            Query(CallbackParams {
                code: None,
                state: Some("123".to_string()),
            }),
        )
        .await;

        assert!(body.contains("Missing authorization code"));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_code_is_treated_as_missing() {
        let store = Arc::new(MemoryTokenStore::new());
        let state = test_state(store.clone());

        let Html(body) = oauth_callback(
            State(state),
            Query(CallbackParams {
                code: Some(String::new()),
                state: None,
            }),
        )
        .await;

        assert!(body.contains("Missing authorization code"));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn success_page_embeds_redirect_target() {
        let page = success_page("tester", "https://discord.com/channels/99");
        assert!(page.contains("https://discord.com/channels/99"));
        assert!(page.contains("tester"));
    }
}
