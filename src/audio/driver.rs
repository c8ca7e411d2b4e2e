//! songbird backed voice transport.
//!
//! Lifecycle listeners are registered once per call, right after the join. Track end and
//! error events are forwarded only for the handle the session most recently started, and
//! only once per handle.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::{CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent},
    input::Input,
    tracks::{PlayMode, TrackHandle},
    Call, Songbird,
};
use tracing::{debug, info, warn};

use super::voice::{ConnectionState, EventSink, VoiceEvent, VoiceSession, VoiceTransport};
use crate::error::{MusicError, MusicResult};

type CurrentTrack = Arc<TrackSlot>;

/// A handle to a track the driver was asked to play
trait PlayingTrack {
    fn is_same(&self, other: &Self) -> bool;
}

impl PlayingTrack for TrackHandle {
    fn is_same(&self, other: &Self) -> bool {
        self.uuid() == other.uuid()
    }
}

/// The track a session most recently started.
///
/// The end or failure of that track is claimed exactly once; events for any other handle
/// are stale.
struct TrackSlot<H = TrackHandle> {
    current: Mutex<Option<H>>,
}

impl<H: PlayingTrack> TrackSlot<H> {
    fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Starts a track with the slot locked, so its events cannot race the store.
    fn start(&self, start: impl FnOnce() -> H) {
        let mut current = self.current.lock();
        *current = Some(start());
    }

    /// Runs `f` on the current handle. Nothing to control is not an error.
    fn control(&self, f: impl FnOnce(&H) -> MusicResult<()>) -> MusicResult<()> {
        match self.current.lock().as_ref() {
            Some(handle) => f(handle),
            None => Ok(()),
        }
    }

    fn clear(&self) {
        self.current.lock().take();
    }

    /// Takes the current handle if `handle` is it. False for stale or repeated events.
    fn claim(&self, handle: &H) -> bool {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(playing) if playing.is_same(handle) => {
                current.take();
                true
            }
            _ => false,
        }
    }
}

/// What the controller is told when a track leaves the player
fn track_event(mode: &PlayMode) -> VoiceEvent {
    match mode {
        PlayMode::Errored(err) => VoiceEvent::TrackError(format!("{:?}", err)),
        _ => VoiceEvent::TrackEnd,
    }
}

fn connection_state(event: CoreEvent) -> Option<ConnectionState> {
    match event {
        CoreEvent::DriverConnect | CoreEvent::DriverReconnect => Some(ConnectionState::Connected),
        CoreEvent::DriverDisconnect => Some(ConnectionState::Disconnected),
        _ => None,
    }
}

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceTransport<Input> for SongbirdTransport {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        events: EventSink,
    ) -> MusicResult<Arc<dyn VoiceSession<Input>>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::JoinFailed(e.to_string()))?;

        let current: CurrentTrack = Arc::new(TrackSlot::new());
        {
            let mut handler = call.lock().await;
            // a call reused from an earlier session still carries that session's listeners
            handler.remove_all_global_events();
            register_voice_events(&mut handler, events, Arc::clone(&current));
        }

        let session: Arc<dyn VoiceSession<Input>> = Arc::new(SongbirdSession {
            manager: Arc::clone(&self.manager),
            guild_id,
            call,
            current,
        });
        Ok(session)
    }

    async fn abandon(&self, guild_id: GuildId) {
        if let Err(e) = self.manager.remove(guild_id).await {
            debug!("Nothing to abandon in guild {}: {}", guild_id, e);
        }
    }
}

struct SongbirdSession {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    current: CurrentTrack,
}

fn control_error(e: impl std::fmt::Display) -> MusicError {
    MusicError::PlayerRuntimeError(e.to_string())
}

#[async_trait]
impl VoiceSession<Input> for SongbirdSession {
    async fn play(&self, stream: Input) -> MusicResult<()> {
        let mut call = self.call.lock().await;
        self.current.start(|| call.play_only_input(stream));
        Ok(())
    }

    fn pause(&self) -> MusicResult<()> {
        self.current
            .control(|handle| handle.pause().map_err(control_error))
    }

    fn unpause(&self) -> MusicResult<()> {
        self.current
            .control(|handle| handle.play().map_err(control_error))
    }

    fn stop(&self) -> MusicResult<()> {
        self.current
            .control(|handle| handle.stop().map_err(control_error))
    }

    async fn disconnect(&self) {
        self.current.clear();
        match self.manager.remove(self.guild_id).await {
            Ok(()) => info!("👋 Left voice in guild {}", self.guild_id),
            Err(e) => warn!("Failed to leave voice in guild {}: {}", self.guild_id, e),
        }
    }
}

/// Forwards the end (or failure) of the session's current track
#[derive(Clone)]
struct TrackForwarder {
    events: EventSink,
    current: CurrentTrack,
}

#[async_trait]
impl VoiceEventHandler for TrackForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, handle) in *tracks {
                if self.current.claim(handle) {
                    self.events.emit(track_event(&state.playing));
                }
            }
        }

        None
    }
}

/// Forwards driver connectivity changes
struct ConnectionForwarder {
    events: EventSink,
}

#[async_trait]
impl VoiceEventHandler for ConnectionForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let event = match ctx {
            EventContext::DriverConnect(_) => CoreEvent::DriverConnect,
            EventContext::DriverReconnect(_) => CoreEvent::DriverReconnect,
            EventContext::DriverDisconnect(data) => {
                warn!(
                    "🔌 Voice driver disconnected in guild {} ({:?}, {:?})",
                    self.events.guild_id(),
                    data.kind,
                    data.reason
                );
                CoreEvent::DriverDisconnect
            }
            _ => return None,
        };

        if let Some(state) = connection_state(event) {
            self.events.emit(VoiceEvent::Connection(state));
        }
        None
    }
}

fn register_voice_events(handler: &mut Call, events: EventSink, current: CurrentTrack) {
    let tracks = TrackForwarder {
        events: events.clone(),
        current,
    };

    handler.add_global_event(Event::Track(TrackEvent::End), tracks.clone());
    handler.add_global_event(Event::Track(TrackEvent::Error), tracks);

    for event in [
        CoreEvent::DriverConnect,
        CoreEvent::DriverReconnect,
        CoreEvent::DriverDisconnect,
    ] {
        handler.add_global_event(
            Event::Core(event),
            ConnectionForwarder {
                events: events.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Handle(u32);

    impl PlayingTrack for Handle {
        fn is_same(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }

    #[test]
    fn test_claim_once_per_handle() {
        let slot = TrackSlot::new();
        slot.start(|| Handle(1));

        assert!(slot.claim(&Handle(1)));
        // end and error can both fire for the same track
        assert!(!slot.claim(&Handle(1)));
    }

    #[test]
    fn test_stale_handle_keeps_the_current_one() {
        let slot = TrackSlot::new();
        slot.start(|| Handle(1));
        slot.start(|| Handle(2));

        assert!(!slot.claim(&Handle(1)));
        assert!(slot.claim(&Handle(2)));
    }

    #[test]
    fn test_control_without_a_track_is_a_no_op() {
        let slot: TrackSlot<Handle> = TrackSlot::new();
        let mut called = false;
        assert_eq!(
            slot.control(|_| {
                called = true;
                Ok(())
            }),
            Ok(())
        );
        assert!(!called);

        slot.start(|| Handle(3));
        assert_eq!(
            slot.control(|_| Err(MusicError::PlayerRuntimeError("gone".into()))),
            Err(MusicError::PlayerRuntimeError("gone".into()))
        );

        slot.clear();
        assert!(!slot.claim(&Handle(3)));
    }

    #[test]
    fn test_finished_tracks_map_to_track_end() {
        assert_eq!(track_event(&PlayMode::End), VoiceEvent::TrackEnd);
        assert_eq!(track_event(&PlayMode::Stop), VoiceEvent::TrackEnd);
    }

    #[test]
    fn test_driver_events_map_to_connection_states() {
        assert_eq!(connection_state(CoreEvent::DriverConnect), Some(ConnectionState::Connected));
        assert_eq!(connection_state(CoreEvent::DriverReconnect), Some(ConnectionState::Connected));
        assert_eq!(
            connection_state(CoreEvent::DriverDisconnect),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(connection_state(CoreEvent::SpeakingStateUpdate), None);
    }
}
