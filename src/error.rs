use thiserror::Error;

use crate::sources::ResolveError;

/// Errors surfaced by the playback core and its command surface.
///
/// The first group mirrors what a user can get wrong or what the outside world can do
/// to a playback session. The second group is the core's own bookkeeping outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MusicError {
    #[error("You need to be in a voice channel first")]
    NotInVoiceChannel,

    #[error("I need the Connect and Speak permissions in that voice channel")]
    InsufficientPermissions,

    #[error("Give me a song title or a URL")]
    EmptyQuery,

    #[error("No results for that query: {0}")]
    ResolutionFailed(String),

    #[error("The media source is rate limiting requests")]
    RateLimited,

    #[error("Timed out while joining the voice channel")]
    ConnectionTimeout,

    #[error("Could not open the audio stream: {0}")]
    StreamOpenFailed(String),

    #[error("Playback failed: {0}")]
    PlayerRuntimeError(String),

    #[error("Nothing is playing right now")]
    NothingPlaying,

    #[error("The voice connection is not ready yet")]
    NotConnected,

    #[error("The queue is full (max {0} tracks)")]
    QueueFull(usize),

    #[error("Failed to join the voice channel: {0}")]
    JoinFailed(String),

    #[error("Playback was stopped before it could start")]
    Cancelled,
}

impl MusicError {
    /// Terminal for the command that triggered it; nothing was mutated.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            MusicError::NotInVoiceChannel
                | MusicError::InsufficientPermissions
                | MusicError::EmptyQuery
                | MusicError::ResolutionFailed(_)
                | MusicError::NothingPlaying
                | MusicError::NotConnected
                | MusicError::QueueFull(_)
        )
    }

    /// Non-fatal for the guild session: the current track is dropped and the queue advances.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            MusicError::RateLimited
                | MusicError::StreamOpenFailed(_)
                | MusicError::PlayerRuntimeError(_)
        )
    }

    /// Maps a resolver failure raised while turning a query into a track.
    pub fn from_resolve(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => MusicError::ResolutionFailed("nothing matched".into()),
            ResolveError::RateLimited => MusicError::RateLimited,
            ResolveError::Other(reason) => MusicError::ResolutionFailed(reason),
        }
    }

    /// Maps a resolver failure raised while opening the stream of a queued track.
    pub fn from_stream(err: ResolveError) -> Self {
        match err {
            ResolveError::RateLimited => MusicError::RateLimited,
            ResolveError::NotFound => MusicError::StreamOpenFailed("source disappeared".into()),
            ResolveError::Other(reason) => MusicError::StreamOpenFailed(reason),
        }
    }
}

/// Result type for playback operations
pub type MusicResult<T> = Result<T, MusicError>;
