use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{input::Input, SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod health;
mod sources;
mod ui;

use crate::audio::{
    driver::SongbirdTransport,
    notice::Notifier,
    player::QueueController,
    voice::VoiceTransport,
};
use crate::bot::{DiscordNotifier, JukeboxBot};
use crate::config::Config;
use crate::health::HealthState;
use crate::sources::{MediaResolver, YouTubeResolver};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Configuration
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let resolver = Arc::new(YouTubeResolver::new(config.ytdlp_path.clone()));

    // `--health-check` only probes the resolver
    if std::env::args().any(|arg| arg == "--health-check") {
        let version = resolver.verify().await?;
        println!("OK (yt-dlp {})", version);
        return Ok(());
    }

    match resolver.verify().await {
        Ok(version) => info!("✅ yt-dlp {} available", version),
        Err(e) => error!("❌ yt-dlp unavailable, playback will fail: {:?}", e),
    }

    // Minimal gateway intents
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));

    let controller = Arc::new(QueueController::new(
        resolver as Arc<dyn MediaResolver<Input>>,
        Arc::new(SongbirdTransport::new(Arc::clone(&songbird))) as Arc<dyn VoiceTransport<Input>>,
        Arc::new(DiscordNotifier::new(http)) as Arc<dyn Notifier>,
        config.timings(),
        config.max_queue_size,
    ));

    // Liveness endpoint
    let health = HealthState::new();
    let ready = health.ready_flag();
    let port = config.port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(port, health).await {
            error!("Health endpoint stopped: {:?}", e);
        }
    });

    let handler = JukeboxBot::new(Arc::clone(&config), Arc::clone(&controller), ready);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Graceful shutdown
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {:?}", e);
            return;
        }
        info!(
            "⚠️ Shutdown signal received, closing ({} active sessions)...",
            controller.active_sessions()
        );
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
