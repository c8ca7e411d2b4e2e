use anyhow::Result;
use serenity::{
    builder::{CreateEmbed, CreateMessage, EditMessage},
    model::{
        channel::{Message, ReactionType},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::time::Instant;
use tracing::{error, info, warn};

use super::{commands::Command, JukeboxBot};
use crate::{
    audio::player::{Enqueued, JoinRequest},
    error::MusicError,
    ui::embeds,
};

/// Runs a decoded text command
pub async fn handle_command(
    ctx: &Context,
    msg: &Message,
    command: Command,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = msg
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Command used outside of a guild"))?;

    info!(
        "📝 Command {} used by {} in guild {}",
        command.name(),
        msg.author.name,
        guild_id
    );

    let voice_channel = match get_user_voice_channel(ctx, guild_id, msg.author.id) {
        Some(channel_id) => Some(channel_id),
        None if command.requires_voice() => {
            return reply_error(ctx, msg, &MusicError::NotInVoiceChannel).await;
        }
        None => None,
    };

    match command {
        Command::Play(query) => {
            // requires_voice guarantees the channel here
            let Some(voice_channel) = voice_channel else { return Ok(()) };
            handle_play(ctx, msg, guild_id, voice_channel, &query, bot).await
        }
        Command::Skip => handle_skip(ctx, msg, guild_id, bot).await,
        Command::Stop => handle_stop(ctx, msg, guild_id, bot).await,
        Command::Pause => handle_pause(ctx, msg, guild_id, bot).await,
        Command::Resume => handle_resume(ctx, msg, guild_id, bot).await,
        Command::Queue => handle_queue(ctx, msg, guild_id, bot).await,
        Command::NowPlaying => handle_nowplaying(ctx, msg, guild_id, bot).await,
        Command::Help => send_embed(ctx, msg.channel_id, embeds::help(&bot.config().command_prefix)).await,
        Command::Ping => handle_ping(ctx, msg).await,
    }
}

async fn handle_play(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    voice_channel: ChannelId,
    query: &str,
    bot: &JukeboxBot,
) -> Result<()> {
    if !bot_can_speak(ctx, guild_id, voice_channel) {
        return reply_error(ctx, msg, &MusicError::InsufficientPermissions).await;
    }

    if query.trim().is_empty() {
        let usage = format!(
            "❌ {}\nExample: `{}play never gonna give you up`",
            MusicError::EmptyQuery,
            bot.config().command_prefix
        );
        msg.reply(&ctx.http, usage).await?;
        return Ok(());
    }

    let loading = msg.channel_id.say(&ctx.http, "🔍 Searching...").await?;

    let request = JoinRequest {
        guild_id,
        voice_channel,
        text_channel: msg.channel_id,
    };
    let outcome = bot.controller().play(request, query, &msg.author.name).await;

    // best-effort: a leftover loading message is harmless
    if let Err(e) = loading.delete(&ctx.http).await {
        warn!("Failed to delete the loading message: {:?}", e);
    }

    match outcome {
        Ok((track, Enqueued::Queued { position })) => {
            send_embed(ctx, msg.channel_id, embeds::track_added(&track, position)).await
        }
        // the now-playing notice announces the track
        Ok((track, enqueued)) => {
            info!(
                "▶️ '{}' at position {} in guild {} ({:?})",
                track.title(),
                enqueued.position(),
                guild_id,
                enqueued
            );
            Ok(())
        }
        Err(err) => reply_error(ctx, msg, &err).await,
    }
}

async fn handle_skip(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &JukeboxBot) -> Result<()> {
    match bot.controller().skip(guild_id) {
        Ok(_) => react(ctx, msg, "⏭️").await,
        Err(err) => reply_error(ctx, msg, &err).await,
    }
}

async fn handle_stop(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &JukeboxBot) -> Result<()> {
    match bot.controller().stop(guild_id).await {
        Ok(()) => {
            msg.reply(&ctx.http, "👋 Left the voice channel!").await?;
            Ok(())
        }
        Err(err) => reply_error(ctx, msg, &err).await,
    }
}

async fn handle_pause(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &JukeboxBot) -> Result<()> {
    match bot.controller().pause(guild_id) {
        Ok(true) => react(ctx, msg, "⏸️").await,
        Ok(false) => {
            msg.reply(&ctx.http, "⏸️ Already paused").await?;
            Ok(())
        }
        Err(err) => reply_error(ctx, msg, &err).await,
    }
}

async fn handle_resume(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &JukeboxBot) -> Result<()> {
    match bot.controller().resume(guild_id) {
        Ok(()) => react(ctx, msg, "▶️").await,
        Err(err) => reply_error(ctx, msg, &err).await,
    }
}

async fn handle_queue(ctx: &Context, msg: &Message, guild_id: GuildId, bot: &JukeboxBot) -> Result<()> {
    match bot.controller().snapshot(guild_id) {
        Some(snapshot) if !snapshot.tracks.is_empty() => {
            send_embed(ctx, msg.channel_id, embeds::queue(&snapshot)).await
        }
        _ => {
            msg.reply(&ctx.http, "❌ The queue is empty!").await?;
            Ok(())
        }
    }
}

async fn handle_nowplaying(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    bot: &JukeboxBot,
) -> Result<()> {
    let snapshot = bot.controller().snapshot(guild_id);
    match snapshot.as_ref().and_then(|s| s.now_playing()) {
        Some(track) => send_embed(ctx, msg.channel_id, embeds::now_playing(track)).await,
        None => reply_error(ctx, msg, &MusicError::NothingPlaying).await,
    }
}

async fn handle_ping(ctx: &Context, msg: &Message) -> Result<()> {
    let started = Instant::now();
    let mut reply = msg.channel_id.say(&ctx.http, "🏓 Pong!").await?;
    let latency = started.elapsed();

    reply
        .edit(
            ctx,
            EditMessage::new().content(format!("🏓 Pong! `{}ms`", latency.as_millis())),
        )
        .await?;
    Ok(())
}

// Helpers

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Whether the bot holds Connect and Speak in `channel_id`, per the cache.
fn bot_can_speak(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> bool {
    let bot_id = ctx.cache.current_user().id;
    let Some(guild) = guild_id.to_guild_cached(&ctx.cache) else {
        return false;
    };

    match (guild.channels.get(&channel_id), guild.members.get(&bot_id)) {
        (Some(channel), Some(member)) => {
            let permissions = guild.user_permissions_in(channel, member);
            permissions.connect() && permissions.speak()
        }
        _ => false,
    }
}

async fn send_embed(ctx: &Context, channel_id: ChannelId, embed: CreateEmbed) -> Result<()> {
    channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;
    Ok(())
}

async fn react(ctx: &Context, msg: &Message, emoji: &str) -> Result<()> {
    msg.react(&ctx.http, ReactionType::Unicode(emoji.to_string()))
        .await?;
    Ok(())
}

async fn reply_error(ctx: &Context, msg: &Message, err: &MusicError) -> Result<()> {
    if err.is_command_failure() {
        info!("Command rejected in guild {:?}: {}", msg.guild_id, err);
    } else {
        error!("Command failed in guild {:?}: {}", msg.guild_id, err);
    }
    msg.reply(&ctx.http, format!("❌ {}", err)).await?;
    Ok(())
}
