use std::{collections::VecDeque, sync::Arc};

use serenity::model::id::ChannelId;
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};
use tracing::debug;

use super::voice::{ConnectionState, Mail, VoiceSession};
use crate::error::{MusicError, MusicResult};

/// One playable item, as produced by the media resolver.
///
/// Never mutated after creation; the queue entry holding it is its only owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    title: String,
    url: String,
    duration_label: String,
    thumbnail_url: Option<String>,
    requested_by: String,
}

impl Track {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        duration_label: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            duration_label: duration_label.into(),
            thumbnail_url: None,
            requested_by: requested_by.into(),
        }
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn duration_label(&self) -> &str {
        &self.duration_label
    }
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail_url.as_deref()
    }
    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }
}

/// Read-only copy of a guild's queue for `queue` / `nowplaying` views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub tracks: Vec<Track>,
    pub is_playing: bool,
}

impl QueueSnapshot {
    pub fn now_playing(&self) -> Option<&Track> {
        self.tracks.first()
    }

    pub fn upcoming(&self) -> &[Track] {
        self.tracks.get(1..).unwrap_or_default()
    }
}

/// Playback state of a single guild.
///
/// `tracks[0]` is the track loaded into the player (or about to be). The session is
/// absent only while the initial voice join is in flight. Dropping the state aborts its
/// idle-disconnect timer, so a timer can never outlive the state that armed it.
pub struct GuildPlayback<S: Send + 'static> {
    epoch: u64,
    tracks: VecDeque<Track>,
    session: Option<Arc<dyn VoiceSession<S>>>,
    is_playing: bool,
    // head has been handed to the player and its end/error event is still pending
    loaded: bool,
    // controls issued while the head was still opening, applied once it loads
    skip_requested: bool,
    pause_requested: bool,
    text_channel: ChannelId,
    mailbox: mpsc::UnboundedSender<Mail>,
    connection: watch::Sender<ConnectionState>,
    idle_timer: Option<AbortHandle>,
}

impl<S: Send + 'static> GuildPlayback<S> {
    pub(crate) fn new(
        epoch: u64,
        first: Track,
        text_channel: ChannelId,
        mailbox: mpsc::UnboundedSender<Mail>,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Connecting);

        Self {
            epoch,
            tracks: VecDeque::from([first]),
            session: None,
            is_playing: true,
            loaded: false,
            skip_requested: false,
            pause_requested: false,
            text_channel,
            mailbox,
            connection,
            idle_timer: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn text_channel(&self) -> ChannelId {
        self.text_channel
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn head(&self) -> Option<&Track> {
        self.tracks.front()
    }

    /// Appends to the tail and returns the 1-based position of the new track.
    pub fn push(&mut self, track: Track, max_size: usize) -> MusicResult<usize> {
        if self.tracks.len() >= max_size {
            return Err(MusicError::QueueFull(max_size));
        }

        debug!("Queued '{}' at position {}", track.title(), self.tracks.len() + 1);
        self.tracks.push_back(track);
        Ok(self.tracks.len())
    }

    /// Removes the head; the player no longer holds anything.
    pub fn pop_head(&mut self) -> Option<Track> {
        self.loaded = false;
        self.skip_requested = false;
        self.tracks.pop_front()
    }

    pub fn clear(&mut self) {
        self.loaded = false;
        self.skip_requested = false;
        self.pause_requested = false;
        self.tracks.clear();
    }

    pub fn session(&self) -> Option<Arc<dyn VoiceSession<S>>> {
        self.session.clone()
    }

    pub fn attach(&mut self, session: Arc<dyn VoiceSession<S>>) {
        self.session = Some(session);
    }

    pub fn take_session(&mut self) -> Option<Arc<dyn VoiceSession<S>>> {
        self.session.take()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.is_playing = playing;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    /// Marks the head for skipping once it reaches the player.
    pub fn request_skip(&mut self) {
        self.skip_requested = true;
    }

    pub fn take_skip_request(&mut self) -> bool {
        std::mem::take(&mut self.skip_requested)
    }

    /// Sets whether the next track to load must start paused.
    pub fn request_pause(&mut self, paused: bool) {
        self.pause_requested = paused;
    }

    pub fn take_pause_request(&mut self) -> bool {
        std::mem::take(&mut self.pause_requested)
    }

    /// Re-posts work into this guild's mailbox. False once the driver is gone.
    pub(crate) fn post(&self, mail: Mail) -> bool {
        self.mailbox.send(mail).is_ok()
    }

    #[cfg(test)]
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    #[cfg(test)]
    pub fn has_idle_timer(&self) -> bool {
        self.idle_timer.is_some()
    }

    pub fn arm_idle_timer(&mut self, timer: AbortHandle) {
        self.cancel_idle_timer();
        self.idle_timer = Some(timer);
    }

    pub fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    /// Forgets the timer without aborting it. Used by the timer task itself before it
    /// drops the state it is tearing down.
    pub fn disarm_idle_timer(&mut self) {
        self.idle_timer = None;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            tracks: self.tracks.iter().cloned().collect(),
            is_playing: self.is_playing,
        }
    }
}

impl<S: Send + 'static> Drop for GuildPlayback<S> {
    fn drop(&mut self) {
        self.cancel_idle_timer();
    }
}
