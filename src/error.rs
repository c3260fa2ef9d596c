use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    // Token store errors
    #[error("Token store error: {source}")]
    Store {
        #[source]
        source: sqlx::Error,
    },

    // OAuth errors
    #[error("Authorization code exchange failed: {message}")]
    TokenExchange { message: String },

    #[error("Failed to fetch user profile: {message}")]
    ProfileFetch { message: String },

    // Discord errors
    #[error("Discord API error: {message}")]
    Discord { message: String },

    #[error("Role not found: {name}")]
    RoleNotFound { name: String },

    // Replay errors
    #[error("A send run is already in progress")]
    RunInProgress,

    // Generic errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serenity::Error> for BotError {
    fn from(err: serenity::Error) -> Self {
        BotError::Discord {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        BotError::Store { source: err }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        BotError::Internal {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

use poise::serenity_prelude as serenity;
