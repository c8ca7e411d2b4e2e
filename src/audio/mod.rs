//! # Audio Module
//!
//! The playback core: per-guild queues, the player state machine and the voice lifecycle
//! around them.
//!
//! ## Architecture
//!
//! ### [`queue`] - Guild Playback State
//! - Immutable [`queue::Track`] descriptors
//! - One [`queue::GuildPlayback`] per guild, owning its session handle and idle timer
//!
//! ### [`registry`] - Playback Registry
//! - Concurrent guild → state map, the only shared structure
//!
//! ### [`player`] - Queue Controller
//! - Enqueue, advance on finish/error, pause/resume, skip, stop
//! - Idle-disconnect grace timer and per-guild event mailbox
//!
//! ### [`voice`] - Voice Transport Seam
//! - [`voice::VoiceTransport`] / [`voice::VoiceSession`] traits
//! - [`voice::Reconciler`] classifying connection drops as transient or permanent
//!
//! ### [`driver`] - Songbird Transport
//! - The production [`voice::VoiceTransport`] on top of songbird
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let controller = Arc::new(QueueController::new(resolver, transport, notifier, timings, 1000));
//!
//! controller.play(request, "never gonna give you up", "alice").await?;
//! controller.pause(guild_id)?;
//! controller.resume(guild_id)?;
//! controller.skip(guild_id)?;
//! controller.stop(guild_id).await?;
//! ```

pub mod driver;
pub mod notice;
pub mod player;
pub mod queue;
pub mod registry;
pub mod voice;

#[cfg(test)]
mod testing;
