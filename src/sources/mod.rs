//! # Sources Module
//!
//! The media resolver seam. The playback core only knows how to ask for a [`Track`]
//! from a query and for a playable stream from a track URL; everything about how
//! those are obtained lives behind [`MediaResolver`].

pub mod youtube;

use async_trait::async_trait;
use thiserror::Error;

use crate::audio::queue::Track;

pub use youtube::YouTubeResolver;

/// Failure modes of the media resolver contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no result for query")]
    NotFound,

    #[error("rate limited by the media source")]
    RateLimited,

    #[error("{0}")]
    Other(String),
}

/// Turns user queries into tracks and tracks into playable streams.
///
/// `S` is the stream type handed to the voice transport (`songbird::input::Input`
/// in production).
#[async_trait]
pub trait MediaResolver<S: Send + 'static>: Send + Sync {
    /// Resolves a search phrase or URL into a single track requested by `requested_by`.
    async fn resolve(&self, query: &str, requested_by: &str) -> Result<Track, ResolveError>;

    /// Opens the audio stream behind a canonical track URL.
    async fn open_stream(&self, url: &str) -> Result<S, ResolveError>;
}
