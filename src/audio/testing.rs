//! In-memory resolver, transport and notifier used by the playback tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};

use super::{
    notice::{Notice, Notifier},
    player::{JoinRequest, PlaybackTimings, QueueController},
    queue::Track,
    voice::{EventSink, VoiceEvent, VoiceSession, VoiceTransport},
};
use crate::{
    error::{MusicError, MusicResult},
    sources::{MediaResolver, ResolveError},
};

pub const GUILD: GuildId = GuildId::new(100);
pub const VOICE: ChannelId = ChannelId::new(200);
pub const TEXT: ChannelId = ChannelId::new(300);

pub fn request() -> JoinRequest {
    JoinRequest {
        guild_id: GUILD,
        voice_channel: VOICE,
        text_channel: TEXT,
    }
}

pub fn track(title: &str) -> Track {
    Track::new(title, format!("https://media.test/{title}"), "3:00", "tester")
}

/// Lets spawned tasks (driver, reconciler, timers) run to their next await.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Streams are plain URLs. Titles containing `broken` fail to open, `limited` is rate limited.
#[derive(Default)]
pub struct FakeResolver {
    pub stream_delay: Duration,
}

#[async_trait]
impl MediaResolver<String> for FakeResolver {
    async fn resolve(&self, query: &str, requested_by: &str) -> Result<Track, ResolveError> {
        match query {
            "missing" => Err(ResolveError::NotFound),
            "throttled" => Err(ResolveError::RateLimited),
            _ => Ok(Track::new(
                query,
                format!("https://media.test/{query}"),
                "3:00",
                requested_by,
            )),
        }
    }

    async fn open_stream(&self, url: &str) -> Result<String, ResolveError> {
        if !self.stream_delay.is_zero() {
            tokio::time::sleep(self.stream_delay).await;
        }
        if url.contains("broken") {
            return Err(ResolveError::Other("HTTP 403".into()));
        }
        if url.contains("limited") {
            return Err(ResolveError::RateLimited);
        }
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Play(String),
    Pause,
    Unpause,
    Stop,
    Disconnect,
}

/// Records every call. Streams containing `crash` are refused by the player.
pub struct FakeSession {
    events: EventSink,
    calls: Mutex<Vec<SessionCall>>,
    playing: Mutex<bool>,
}

impl FakeSession {
    fn new(events: EventSink) -> Self {
        Self {
            events,
            calls: Mutex::new(Vec::new()),
            playing: Mutex::new(false),
        }
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().clone()
    }

    pub fn played(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SessionCall::Play(stream) => Some(stream.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &SessionCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl VoiceSession<String> for FakeSession {
    async fn play(&self, stream: String) -> MusicResult<()> {
        self.calls.lock().push(SessionCall::Play(stream.clone()));
        if stream.contains("crash") {
            return Err(MusicError::PlayerRuntimeError("decoder refused input".into()));
        }
        *self.playing.lock() = true;
        Ok(())
    }

    fn pause(&self) -> MusicResult<()> {
        self.calls.lock().push(SessionCall::Pause);
        Ok(())
    }

    fn unpause(&self) -> MusicResult<()> {
        self.calls.lock().push(SessionCall::Unpause);
        Ok(())
    }

    fn stop(&self) -> MusicResult<()> {
        self.calls.lock().push(SessionCall::Stop);
        let was_playing = std::mem::replace(&mut *self.playing.lock(), false);
        if was_playing {
            self.events.emit(VoiceEvent::TrackEnd);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.calls.lock().push(SessionCall::Disconnect);
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub join_delay: Duration,
    pub refuse_join: bool,
    pub(crate) sessions: Mutex<Vec<Arc<FakeSession>>>,
    pub(crate) sinks: Mutex<HashMap<GuildId, EventSink>>,
    pub(crate) abandoned: Mutex<Vec<GuildId>>,
}

impl FakeTransport {
    /// Session created by the `n`th successful join.
    pub fn session(&self, n: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock()[n])
    }

    pub fn joins(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Feeds an event to the guild's most recent session, as the real player would.
    pub fn emit(&self, guild_id: GuildId, event: VoiceEvent) {
        let sink = self.sinks.lock().get(&guild_id).cloned();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    pub fn abandoned(&self) -> Vec<GuildId> {
        self.abandoned.lock().clone()
    }
}

#[async_trait]
impl VoiceTransport<String> for FakeTransport {
    async fn join(
        &self,
        guild_id: GuildId,
        _channel_id: ChannelId,
        events: EventSink,
    ) -> MusicResult<Arc<dyn VoiceSession<String>>> {
        if !self.join_delay.is_zero() {
            tokio::time::sleep(self.join_delay).await;
        }
        if self.refuse_join {
            return Err(MusicError::JoinFailed("missing access".into()));
        }

        let session = Arc::new(FakeSession::new(events.clone()));
        self.sinks.lock().insert(guild_id, events);
        self.sessions.lock().push(Arc::clone(&session));

        let session: Arc<dyn VoiceSession<String>> = session;
        Ok(session)
    }

    async fn abandon(&self, guild_id: GuildId) {
        self.abandoned.lock().push(guild_id);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn playback_errors(&self) -> usize {
        self.notices
            .lock()
            .iter()
            .filter(|n| matches!(n, Notice::PlaybackError { .. }))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

pub struct Harness {
    pub controller: Arc<QueueController<String>>,
    pub transport: Arc<FakeTransport>,
    pub notices: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeResolver::default(), FakeTransport::default())
    }

    pub fn with(resolver: FakeResolver, transport: FakeTransport) -> Self {
        let transport = Arc::new(transport);
        let notices = Arc::new(RecordingNotifier::default());
        let controller = Arc::new(QueueController::new(
            Arc::new(resolver),
            Arc::clone(&transport) as Arc<dyn VoiceTransport<String>>,
            Arc::clone(&notices) as Arc<dyn Notifier>,
            PlaybackTimings::default(),
            1000,
        ));

        Self {
            controller,
            transport,
            notices,
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.controller
            .snapshot(GUILD)
            .map(|s| s.tracks.iter().map(|t| t.title().to_string()).collect())
            .unwrap_or_default()
    }
}
