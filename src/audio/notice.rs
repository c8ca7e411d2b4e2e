use serenity::model::id::{ChannelId, GuildId};

use super::queue::Track;
use crate::error::MusicError;

/// Why a guild's playback session ended without a `stop` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    IdleTimeout,
    ConnectionLost,
}

/// Listener-visible signals raised by the playback core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NowPlaying {
        guild_id: GuildId,
        channel_id: ChannelId,
        track: Track,
    },
    PlaybackError {
        guild_id: GuildId,
        channel_id: ChannelId,
        track: Track,
        error: MusicError,
    },
    SessionEnded {
        guild_id: GuildId,
        channel_id: ChannelId,
        reason: EndReason,
    },
}

impl Notice {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Notice::NowPlaying { guild_id, .. }
            | Notice::PlaybackError { guild_id, .. }
            | Notice::SessionEnded { guild_id, .. } => *guild_id,
        }
    }
}

/// Delivers notices to whoever listens for them (a text channel in production).
///
/// Fire and forget: delivery must not block the playback core.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}
