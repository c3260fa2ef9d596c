use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Discord OAuth token vault: callback service, token store and mass-join bot
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Force re-sync of slash commands to all guilds (use when commands aren't showing up)
    #[arg(long, short = 's')]
    sync_commands: bool,

    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Specific guild ID to sync commands to (for testing)
    #[arg(long)]
    guild_id: Option<u64>,
}

mod audit;
mod commands;
mod error;
mod replay;
mod store;
mod web;

use commands::{help, ping, send_users, setup_auth, stored_users};
use replay::{DiscordJoiner, ReplayWorker};
use store::{MemoryTokenStore, PostgresTokenStore, SharedTokenStore};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub store: SharedTokenStore,
    pub worker: Arc<ReplayWorker>,
    pub oauth: web::OAuthState,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_max_level(tracing::level_filters::LevelFilter::INFO)
        .init();

    let oauth = web::OAuthState::from_env().ok_or_else(|| {
        anyhow::anyhow!(
            "Missing OAuth configuration: set DISCORD_CLIENT_ID, DISCORD_CLIENT_SECRET and DISCORD_TOKEN"
        )
    })?;
    let token = oauth.bot_token.clone();

    // Pick the token store backend
    let store: SharedTokenStore = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            info!("Connecting to Postgres token store...");
            Arc::new(PostgresTokenStore::connect(&url).await?)
        }
        Err(_) => {
            warn!("DATABASE_URL not set, using in-memory token store (records are lost on restart)");
            Arc::new(MemoryTokenStore::new())
        }
    };

    let joiner = Arc::new(DiscordJoiner::new(
        oauth.http_client.clone(),
        oauth.bot_token.clone(),
    ));
    let worker = Arc::new(ReplayWorker::new(store.clone(), joiner));

    // Extract CLI flags for use in setup
    let sync_commands = args.sync_commands;
    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id;

    if sync_commands {
        info!("--sync-commands: Will force re-register slash commands");
    }
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }
    if let Some(gid) = target_guild_id {
        info!("--guild-id: Targeting specific guild {}", gid);
    }

    let setup_store = store.clone();
    let setup_worker = worker.clone();
    let setup_oauth = oauth.clone();

    // Build framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ping(), help(), setup_auth(), send_users(), stored_users()],
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' completed for {}",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx.say(format!("An error occurred: {}", error)).await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                        }
                        poise::FrameworkError::MissingBotPermissions { missing_permissions, ctx, .. } => {
                            error!("Bot missing permissions for '{}': {:?}", ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say(format!("Bot is missing permissions: {:?}", missing_permissions)).await;
                        }
                        poise::FrameworkError::MissingUserPermissions { missing_permissions, ctx, .. } => {
                            error!("User {} missing permissions for '{}': {:?}", ctx.author().name, ctx.command().qualified_name, missing_permissions);
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let store = setup_store;
            let worker = setup_worker;
            let oauth = setup_oauth;

            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                // Determine which guilds to register commands for
                let guilds_to_register: Vec<serenity::GuildId> = if let Some(gid) = target_guild_id {
                    vec![serenity::GuildId::new(gid)]
                } else {
                    ready.guilds.iter().map(|g| g.id).collect()
                };

                if guild_commands || sync_commands {
                    // Register commands per-guild (faster for testing)
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        ).await {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        } else {
                            info!("Successfully registered {} commands for guild {}",
                                  framework.options().commands.len(), guild_id);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                // Start the web server for the OAuth callback and admin panel
                let web_config = web::WebServerConfig::from_env();
                let app_state = web::AppState {
                    oauth: oauth.clone(),
                    store: store.clone(),
                    serenity_http: ctx.http.clone(),
                    settings: web::CallbackSettings::from_env(),
                };
                let admin_state = std::env::var("ADMIN_PASSWORD")
                    .ok()
                    .filter(|p| !p.is_empty())
                    .map(|admin_password| web::AdminState {
                        admin_password,
                        worker: worker.clone(),
                        store: store.clone(),
                    });

                tokio::spawn(async move {
                    info!("Starting OAuth web server on port {}...", web_config.port);
                    if let Err(e) = web::start_web_server(web_config, app_state, admin_state).await {
                        error!("Web server error: {}", e);
                    }
                });

                Ok(Data { store, worker, oauth })
            })
        })
        .build();

    // The gateway is only used for slash commands and channel messages
    let intents = serenity::GatewayIntents::GUILDS;

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    client.start().await?;
    warn!("Bot ended.");

    Ok(())
}
