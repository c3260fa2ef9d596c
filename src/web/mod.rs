//! Web server for the OAuth callback and admin panel
//!
//! Runs alongside the Discord bot to complete the authorization-code flow
//! and to let an administrator trigger send runs.

mod admin;
mod oauth;
mod server;

pub use admin::AdminState;
pub use oauth::{DiscordUser, OAuthState};
pub use server::{start_web_server, AppState, CallbackSettings, WebServerConfig};
