//! Voice transport seam and the voice lifecycle reconciler.
//!
//! The transport owns the network side of a voice session (joining, encoding, the
//! player itself). It reports back through an [`EventSink`] handed over once per
//! session at join time, never once per track.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::error::MusicResult;

/// Connectivity of a voice session as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Signalling,
    Connected,
    Disconnected,
    Destroyed,
}

impl ConnectionState {
    /// States that show the transport is already working its way back.
    pub fn is_recovering(self) -> bool {
        matches!(
            self,
            ConnectionState::Signalling | ConnectionState::Connecting | ConnectionState::Connected
        )
    }
}

/// Events a voice session feeds back into the queue controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// The player went idle after the loaded track (natural end or forced stop).
    TrackEnd,
    /// The player failed mid-track.
    TrackError(String),
    /// The connection moved to a new state.
    Connection(ConnectionState),
}

/// Work items processed sequentially by a guild's driver task
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mail {
    Voice(VoiceEvent),
    /// Start the head of a queue that went idle and got a new track.
    Resume,
}

/// Sending half of a guild's mailbox, handed to the transport at join time
#[derive(Clone)]
pub struct EventSink {
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<Mail>,
}

impl EventSink {
    pub(crate) fn new(guild_id: GuildId, tx: mpsc::UnboundedSender<Mail>) -> Self {
        Self { guild_id, tx }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn emit(&self, event: VoiceEvent) {
        if self.tx.send(Mail::Voice(event)).is_err() {
            // the state this session belonged to is gone
            trace!("Dropped voice event for torn down guild {}", self.guild_id);
        }
    }
}

/// A live voice connection together with its audio player.
///
/// `S` is the stream type produced by the media resolver.
#[async_trait]
pub trait VoiceSession<S: Send + 'static>: Send + Sync {
    /// Loads `stream` into the player and subscribes the connection to it.
    async fn play(&self, stream: S) -> MusicResult<()>;

    fn pause(&self) -> MusicResult<()>;

    fn unpause(&self) -> MusicResult<()>;

    /// Stops the current resource. The player reports `TrackEnd` for it.
    fn stop(&self) -> MusicResult<()>;

    /// Leaves the channel and releases the connection.
    async fn disconnect(&self);
}

/// Establishes voice sessions
#[async_trait]
pub trait VoiceTransport<S: Send + 'static>: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: EventSink,
    ) -> MusicResult<Arc<dyn VoiceSession<S>>>;

    /// Abandons a join that timed out or failed half way.
    async fn abandon(&self, guild_id: GuildId);
}

/// Outcome of a connection drop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outage {
    /// The transport came back on its own within the window.
    Transient,
    /// Nothing came back; the session is lost.
    Permanent,
}

/// Classifies connection drops into blips and permanent losses
#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    window: Duration,
}

impl Reconciler {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Waits for the connection to re-enter `Signalling` or `Connecting` (or to get all
    /// the way to `Connected`) within the window.
    pub async fn classify(
        &self,
        guild_id: GuildId,
        mut state: watch::Receiver<ConnectionState>,
    ) -> Outage {
        debug!(
            "Voice connection dropped in guild {}, waiting {:?} for recovery",
            guild_id, self.window
        );

        match tokio::time::timeout(self.window, state.wait_for(|s| s.is_recovering())).await {
            Ok(Ok(recovered)) => {
                info!("🔄 Voice connection in guild {} recovering ({:?})", guild_id, *recovered);
                Outage::Transient
            }
            Ok(Err(_)) => {
                warn!("Voice state channel closed for guild {}", guild_id);
                Outage::Permanent
            }
            Err(_) => {
                warn!("🔌 Voice connection in guild {} did not recover", guild_id);
                Outage::Permanent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(42);

    #[tokio::test(start_paused = true)]
    async fn test_signalling_within_window_is_transient() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let reconciler = Reconciler::new(Duration::from_secs(5));

        let classify = tokio::spawn(async move { reconciler.classify(GUILD, rx).await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        tx.send_replace(ConnectionState::Signalling);

        assert_eq!(classify.await.unwrap(), Outage::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connecting_within_window_is_transient() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let reconciler = Reconciler::new(Duration::from_secs(5));

        let classify = tokio::spawn(async move { reconciler.classify(GUILD, rx).await });
        tokio::time::sleep(Duration::from_millis(4900)).await;
        tx.send_replace(ConnectionState::Connecting);

        assert_eq!(classify.await.unwrap(), Outage::Transient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_past_window_is_permanent() {
        let (_tx, rx) = watch::channel(ConnectionState::Disconnected);
        let reconciler = Reconciler::new(Duration::from_secs(5));

        assert_eq!(reconciler.classify(GUILD, rx).await, Outage::Permanent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_recovery_is_still_permanent() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let reconciler = Reconciler::new(Duration::from_secs(5));

        let classify = tokio::spawn(async move { reconciler.classify(GUILD, rx).await });
        tokio::time::sleep(Duration::from_secs(6)).await;
        tx.send_replace(ConnectionState::Connecting);

        assert_eq!(classify.await.unwrap(), Outage::Permanent);
    }

    #[tokio::test]
    async fn test_closed_state_channel_is_permanent() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        drop(tx);

        let outage = Reconciler::new(Duration::from_secs(5)).classify(GUILD, rx).await;
        assert_eq!(outage, Outage::Permanent);
    }

    #[test]
    fn test_sink_wraps_voice_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(GUILD, tx);

        sink.emit(VoiceEvent::TrackEnd);

        assert_eq!(rx.try_recv().unwrap(), Mail::Voice(VoiceEvent::TrackEnd));
        assert_eq!(sink.guild_id(), GUILD);
    }
}
