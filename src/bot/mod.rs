//! # Bot Module
//!
//! The Discord side of the jukebox: a serenity [`EventHandler`] that decodes prefixed text
//! commands, enforces the caller-side preconditions and hands the rest to the
//! [`QueueController`].
//!
//! Notices raised by the playback core are rendered by [`DiscordNotifier`] into the text
//! channel that started the session.

use serenity::{
    all::{ActivityData, Context, EventHandler, Http, Message, Ready},
    async_trait,
    builder::CreateMessage,
};
use songbird::input::Input;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{
        notice::{Notice, Notifier},
        player::QueueController,
    },
    config::Config,
    ui::embeds,
};
use commands::Command;

pub type Controller = QueueController<Input>;

/// Main Discord bot handler.
pub struct JukeboxBot {
    config: Arc<Config>,
    controller: Arc<Controller>,
    /// Flipped once the gateway session is ready; read by the liveness endpoint
    ready: Arc<AtomicBool>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, controller: Arc<Controller>, ready: Arc<AtomicBool>) -> Self {
        Self {
            config,
            controller,
            ready,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::listening(format!(
            "{}help",
            self.config.command_prefix
        ))));
        self.ready.store(true, Ordering::Relaxed);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.guild_id.is_none() {
            return;
        }

        let Some(command) = Command::parse(&self.config.command_prefix, &msg.content) else {
            return;
        };

        if let Err(e) = handlers::handle_command(&ctx, &msg, command, self).await {
            error!("Error handling command: {:?}", e);
        }
    }
}

/// Renders playback notices as embeds in the session's text channel.
///
/// Notices are delivered one at a time by a single forwarding task, in the order the
/// playback core raised them.
pub struct DiscordNotifier {
    tx: mpsc::UnboundedSender<Notice>,
}

impl DiscordNotifier {
    /// Spawns the forwarding task; must be called inside the runtime.
    pub fn new(http: Arc<Http>) -> Self {
        Self::with_delivery(move |notice| {
            let http = Arc::clone(&http);
            async move { deliver(&http, notice).await }
        })
    }

    fn with_delivery<F, Fut>(mut deliver: F) -> Self
    where
        F: FnMut(Notice) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(notice) = rx.recv().await {
                deliver(notice).await;
            }
            debug!("Notice forwarder stopped");
        });
        Self { tx }
    }
}

impl Notifier for DiscordNotifier {
    fn notify(&self, notice: Notice) {
        if let Err(e) = self.tx.send(notice) {
            warn!("Notice forwarder is gone, dropping notice for guild {}", e.0.guild_id());
        }
    }
}

async fn deliver(http: &Http, notice: Notice) {
    let (channel_id, embed) = match &notice {
        Notice::NowPlaying {
            channel_id, track, ..
        } => (*channel_id, embeds::now_playing(track)),
        Notice::PlaybackError {
            channel_id,
            track,
            error,
            ..
        } => (*channel_id, embeds::playback_error(track, error)),
        Notice::SessionEnded {
            channel_id, reason, ..
        } => (*channel_id, embeds::session_ended(*reason)),
    };

    if let Err(e) = channel_id
        .send_message(http, CreateMessage::new().embed(embed))
        .await
    {
        warn!("Failed to deliver notice in guild {}: {:?}", notice.guild_id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::queue::Track, error::MusicError};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, GuildId};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_notices_are_delivered_in_order() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&delivered);
        let notifier = DiscordNotifier::with_delivery(move |notice| {
            let log = Arc::clone(&log);
            async move {
                // a slow first send must not let the next notice overtake it
                if matches!(notice, Notice::PlaybackError { .. }) {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                log.lock().push(notice);
            }
        });

        let track = |title: &str| Track::new(title, format!("https://youtu.be/{title}"), "3:00", "tester");
        notifier.notify(Notice::PlaybackError {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(2),
            track: track("broken"),
            error: MusicError::StreamOpenFailed("HTTP 403".into()),
        });
        notifier.notify(Notice::NowPlaying {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(2),
            track: track("next"),
        });

        tokio::time::sleep(Duration::from_secs(10)).await;

        let delivered = delivered.lock().clone();
        assert_eq!(delivered.len(), 2);
        assert!(matches!(
            &delivered[..],
            [Notice::PlaybackError { track: failed, .. }, Notice::NowPlaying { track: playing, .. }]
                if failed.title() == "broken" && playing.title() == "next"
        ));
    }
}
