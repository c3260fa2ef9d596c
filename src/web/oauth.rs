//! OAuth state and Discord API types

use serde::Deserialize;

/// OAuth configuration
#[derive(Clone)]
pub struct OAuthState {
    pub client_id: String,
    pub client_secret: String,
    pub bot_token: String,
    pub base_url: String,
    pub http_client: reqwest::Client,
}

impl OAuthState {
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("DISCORD_CLIENT_ID").ok()?;
        let client_secret = std::env::var("DISCORD_CLIENT_SECRET").ok()?;
        let bot_token = std::env::var("DISCORD_BOT_TOKEN")
            .or_else(|_| std::env::var("DISCORD_TOKEN"))
            .ok()?;
        let base_url = std::env::var("WEB_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        Some(Self {
            client_id,
            client_secret,
            bot_token,
            base_url,
            http_client: reqwest::Client::new(),
        })
    }

    /// Must match the redirect URI registered in the Discord developer portal
    pub fn redirect_uri(&self) -> String {
        format!("{}/callback", self.base_url)
    }

    /// Consent-screen URL. The optional `state` value is round-tripped back
    /// to the callback and carries the originating guild ID.
    pub fn authorize_url(&self, state: Option<&str>) -> String {
        let mut url = format!(
            "https://discord.com/oauth2/authorize\
            ?client_id={}\
            &redirect_uri={}\
            &response_type=code\
            &scope=identify%20guilds.join",
            self.client_id,
            urlencoding::encode(&self.redirect_uri()),
        );
        if let Some(state) = state {
            url.push_str("&state=");
            url.push_str(&urlencoding::encode(state));
        }
        url
    }
}

/// Discord OAuth token response
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

/// Discord user info from /users/@me
#[derive(Deserialize, Debug)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    pub global_name: Option<String>,
    pub avatar: Option<String>,
}

impl DiscordUser {
    pub fn avatar_url(&self) -> Option<String> {
        self.avatar.as_ref().map(|hash| {
            format!("https://cdn.discordapp.com/avatars/{}/{}.png", self.id, hash)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth() -> OAuthState {
        OAuthState {
            client_id: "42".to_string(),
            client_secret: "secret".to_string(),
            bot_token: "bot".to_string(),
            base_url: "https://auth.example.com".to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    #[test]
    fn authorize_url_round_trips_state() {
        let url = oauth().authorize_url(Some("1430240815229305033"));
        assert!(url.contains("client_id=42"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fauth.example.com%2Fcallback"));
        assert!(url.contains("scope=identify%20guilds.join"));
        assert!(url.ends_with("&state=1430240815229305033"));
    }

    #[test]
    fn authorize_url_without_state() {
        let url = oauth().authorize_url(None);
        assert!(!url.contains("state="));
    }
}
