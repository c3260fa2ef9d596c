//! Audit notifications to the configured log channel

use poise::serenity_prelude::{self as serenity, ChannelId};
use tracing::warn;

use crate::web::{DiscordUser, OAuthState};

/// Announce a freshly authorized user. Best-effort: a failed send is logged
/// and otherwise ignored.
pub async fn notify_authorized(
    http: &serenity::Http,
    channel: ChannelId,
    user: &DiscordUser,
    status: &str,
) {
    let embed = base_embed(user.avatar_url().as_deref())
        .title("📥 New user authorized")
        .field("User", format!("{} ({})", user.username, user.id), true)
        .field("Status", status.to_string(), true)
        .footer(serenity::CreateEmbedFooter::new("Awaiting send"));

    if let Err(e) = channel
        .send_message(http, serenity::CreateMessage::new().embed(embed))
        .await
    {
        warn!("Failed to send audit message to channel {}: {}", channel, e);
    }
}

fn base_embed(avatar_url: Option<&str>) -> serenity::CreateEmbed {
    let mut embed = serenity::CreateEmbed::new().color(0x00ff00);
    if let Some(url) = avatar_url {
        embed = embed.thumbnail(url.to_string());
    }
    embed
}

/// Build the verification panel embed posted by /setup_auth.
pub fn panel_message(oauth: &OAuthState, guild_id: serenity::GuildId) -> serenity::CreateMessage {
    let auth_url = oauth.authorize_url(Some(&guild_id.to_string()));

    let embed = serenity::CreateEmbed::new()
        .title("🔓 Server Verification")
        .description(
            "Authenticate your Discord account to unlock member channels.\n\n\
             Click the button below to verify.",
        )
        .color(0x5865F2)
        .footer(serenity::CreateEmbedFooter::new("Secure verification"));

    let row = serenity::CreateActionRow::Buttons(vec![serenity::CreateButton::new_link(auth_url)
        .label("Verify now")
        .emoji('✅')]);

    serenity::CreateMessage::new().embed(embed).components(vec![row])
}
