use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::{
    notice::{EndReason, Notice, Notifier},
    queue::{GuildPlayback, QueueSnapshot, Track},
    registry::{PlaybackRegistry, Slot},
    voice::{ConnectionState, EventSink, Mail, Outage, Reconciler, VoiceEvent, VoiceSession, VoiceTransport},
};
use crate::{
    error::{MusicError, MusicResult},
    sources::MediaResolver,
};

/// Deadlines of the playback state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTimings {
    pub join_timeout: Duration,
    pub idle_grace: Duration,
    pub reconnect_window: Duration,
}

impl Default for PlaybackTimings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(30),
            idle_grace: Duration::from_secs(60),
            reconnect_window: Duration::from_secs(5),
        }
    }
}

/// Where a `play` came from: the guild, the requester's voice channel and the text
/// channel that receives notices for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequest {
    pub guild_id: GuildId,
    pub voice_channel: ChannelId,
    pub text_channel: ChannelId,
}

/// Outcome of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new session was created and its first track handed to the player.
    Started,
    /// Appended behind the current track.
    Queued { position: usize },
    /// Appended to a drained session, which picks it up right away.
    Resumed,
}

impl Enqueued {
    /// 1-based position of the new track in the queue.
    pub fn position(&self) -> usize {
        match self {
            Enqueued::Started | Enqueued::Resumed => 1,
            Enqueued::Queued { position } => *position,
        }
    }
}

enum Claim<S: Send + 'static> {
    Play(Track, Arc<dyn VoiceSession<S>>),
    Drained,
    Busy,
}

/// The per-guild playback state machine.
///
/// Every guild's state is owned by the registry. Transport events reach a guild through its
/// mailbox and are handled one at a time by that guild's driver task; commands act on the
/// registry directly and never hold an entry across an `.await`. Each state carries an epoch,
/// and every async continuation re-checks it before touching the registry, so a late result
/// can never act on a state that was torn down or replaced in the meantime.
pub struct QueueController<S: Send + 'static> {
    registry: PlaybackRegistry<S>,
    resolver: Arc<dyn MediaResolver<S>>,
    transport: Arc<dyn VoiceTransport<S>>,
    notifier: Arc<dyn Notifier>,
    timings: PlaybackTimings,
    reconciler: Reconciler,
    max_queue_size: usize,
    epochs: AtomicU64,
}

impl<S: Send + 'static> QueueController<S> {
    pub fn new(
        resolver: Arc<dyn MediaResolver<S>>,
        transport: Arc<dyn VoiceTransport<S>>,
        notifier: Arc<dyn Notifier>,
        timings: PlaybackTimings,
        max_queue_size: usize,
    ) -> Self {
        Self {
            registry: PlaybackRegistry::new(),
            resolver,
            transport,
            notifier,
            reconciler: Reconciler::new(timings.reconnect_window),
            timings,
            max_queue_size,
            epochs: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.registry.contains(guild_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<QueueSnapshot> {
        self.registry.snapshot(guild_id)
    }

    /// Resolves `query` and enqueues the result.
    pub async fn play(
        self: &Arc<Self>,
        request: JoinRequest,
        query: &str,
        requested_by: &str,
    ) -> MusicResult<(Track, Enqueued)> {
        let query = query.trim();
        if query.is_empty() {
            return Err(MusicError::EmptyQuery);
        }

        debug!("Resolving '{}' for guild {}", query, request.guild_id);
        let track = self
            .resolver
            .resolve(query, requested_by)
            .await
            .map_err(MusicError::from_resolve)?;

        let enqueued = self.enqueue(request, track.clone()).await?;
        Ok((track, enqueued))
    }

    /// Appends `track` to the guild's queue, creating the session if there is none.
    ///
    /// Creating a session joins the voice channel (bounded by the join timeout) and starts
    /// the first track before returning.
    pub async fn enqueue(self: &Arc<Self>, request: JoinRequest, track: Track) -> MusicResult<Enqueued> {
        let guild_id = request.guild_id;
        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        let slot = self
            .registry
            .append_or_create(guild_id, track, self.max_queue_size, |first| {
                GuildPlayback::new(epoch, first, request.text_channel, tx.clone())
            })?;

        match slot {
            Slot::Appended { position, was_idle: false } => Ok(Enqueued::Queued { position }),
            Slot::Appended { was_idle: true, .. } => {
                debug!("Guild {} was idle, resuming with the new track", guild_id);
                self.registry.with(guild_id, |state| {
                    state.set_playing(true);
                    state.post(Mail::Resume)
                });
                Ok(Enqueued::Resumed)
            }
            Slot::Created => {
                info!("🎶 New playback session for guild {} (epoch {})", guild_id, epoch);
                self.open_session(request, epoch, EventSink::new(guild_id, tx), rx).await
            }
        }
    }

    async fn open_session(
        self: &Arc<Self>,
        request: JoinRequest,
        epoch: u64,
        events: EventSink,
        mailbox: mpsc::UnboundedReceiver<Mail>,
    ) -> MusicResult<Enqueued> {
        let guild_id = request.guild_id;
        let join = self.transport.join(guild_id, request.voice_channel, events);

        let session = match tokio::time::timeout(self.timings.join_timeout, join).await {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                warn!("Failed to join voice in guild {}: {}", guild_id, err);
                self.abort_join(guild_id, epoch).await;
                return Err(err);
            }
            Err(_) => {
                warn!(
                    "⏱️ Voice join in guild {} did not complete within {:?}",
                    guild_id, self.timings.join_timeout
                );
                self.abort_join(guild_id, epoch).await;
                return Err(MusicError::ConnectionTimeout);
            }
        };

        let attached = self
            .registry
            .with_epoch(guild_id, epoch, |state| {
                state.attach(Arc::clone(&session));
                state.set_connection_state(ConnectionState::Connected);
            })
            .is_some();

        if !attached {
            info!("Playback in guild {} was stopped while joining", guild_id);
            if !self.registry.contains(guild_id) {
                session.disconnect().await;
            }
            return Err(MusicError::Cancelled);
        }

        info!("🔊 Joined voice channel {} in guild {}", request.voice_channel, guild_id);
        self.start_playback(guild_id, epoch).await;

        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.drive(guild_id, epoch, mailbox).await });

        if self.registry.is_current(guild_id, epoch) {
            Ok(Enqueued::Started)
        } else {
            Err(MusicError::Cancelled)
        }
    }

    /// Discards a state whose join failed. The transport is only told to abandon the
    /// guild when no newer session took its place.
    async fn abort_join(&self, guild_id: GuildId, epoch: u64) {
        let removed = self.registry.remove_if(guild_id, epoch, |_| true).is_some();
        if removed || !self.registry.contains(guild_id) {
            self.transport.abandon(guild_id).await;
        }
    }

    /// Hands the head of the queue to the player, skipping tracks that fail to start.
    ///
    /// Returns without doing anything while a track is already loaded. When the queue
    /// runs dry the idle-disconnect timer is armed instead.
    async fn start_playback(self: &Arc<Self>, guild_id: GuildId, epoch: u64) {
        loop {
            let claim = self.registry.with_epoch(guild_id, epoch, |state| {
                if state.is_loaded() {
                    return Claim::Busy;
                }
                match (state.head().cloned(), state.session()) {
                    (Some(track), Some(session)) => Claim::Play(track, session),
                    (Some(_), None) => Claim::Busy,
                    (None, _) => Claim::Drained,
                }
            });

            let (track, session) = match claim {
                Some(Claim::Play(track, session)) => (track, session),
                Some(Claim::Drained) => {
                    self.schedule_idle_disconnect(guild_id, epoch);
                    return;
                }
                Some(Claim::Busy) => return,
                None => {
                    trace!("Playback state {} of guild {} is gone", epoch, guild_id);
                    return;
                }
            };

            let outcome = match self.resolver.open_stream(track.url()).await {
                Ok(stream) => {
                    let skipped = self.registry.with_epoch(guild_id, epoch, |state| {
                        let skipped = state.take_skip_request();
                        if skipped {
                            state.pop_head();
                        }
                        skipped
                    });
                    match skipped {
                        Some(false) => session.play(stream).await,
                        Some(true) => {
                            info!("⏭️ '{}' skipped before it started in guild {}", track.title(), guild_id);
                            continue;
                        }
                        None => {
                            debug!("Dropping late stream for '{}' in guild {}", track.title(), guild_id);
                            return;
                        }
                    }
                }
                Err(err) => Err(MusicError::from_stream(err)),
            };

            match outcome {
                Ok(()) => {
                    let loaded = self.registry.with_epoch(guild_id, epoch, |state| {
                        state.set_loaded(true);
                        let paused = state.take_pause_request();
                        state.set_playing(!paused);
                        (state.text_channel(), state.take_skip_request(), paused)
                    });
                    let Some((channel_id, skipped, paused)) = loaded else { return };

                    // the player reports the stopped track's end, which advances the queue
                    if skipped {
                        info!("⏭️ Skipping '{}' in guild {} as it starts", track.title(), guild_id);
                        if let Err(err) = session.stop() {
                            warn!("Failed to stop '{}' in guild {}: {}", track.title(), guild_id, err);
                        }
                        return;
                    }
                    if paused {
                        info!("⏸️ '{}' starts paused in guild {}", track.title(), guild_id);
                        if let Err(err) = session.pause() {
                            warn!("Failed to pause '{}' in guild {}: {}", track.title(), guild_id, err);
                        }
                    }

                    info!("🎵 Now playing '{}' in guild {}", track.title(), guild_id);
                    self.notifier.notify(Notice::NowPlaying {
                        guild_id,
                        channel_id,
                        track,
                    });
                    return;
                }
                Err(error) => {
                    if error.is_skippable() {
                        warn!("Skipping '{}' in guild {}: {}", track.title(), guild_id, error);
                    } else {
                        error!("Unexpected failure on '{}' in guild {}: {}", track.title(), guild_id, error);
                    }
                    let channel = self.registry.with_epoch(guild_id, epoch, |state| {
                        state.pop_head();
                        state.text_channel()
                    });
                    let Some(channel_id) = channel else { return };
                    self.notifier.notify(Notice::PlaybackError {
                        guild_id,
                        channel_id,
                        track,
                        error,
                    });
                }
            }
        }
    }

    fn schedule_idle_disconnect(self: &Arc<Self>, guild_id: GuildId, epoch: u64) {
        let controller = Arc::clone(self);
        let grace = self.timings.idle_grace;

        self.registry.with_epoch(guild_id, epoch, move |state| {
            state.set_playing(false);
            state.request_pause(false);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                controller.idle_disconnect(guild_id, epoch).await;
            });
            state.arm_idle_timer(timer.abort_handle());
            debug!("Queue of guild {} drained, disconnecting in {:?}", guild_id, grace);
        });
    }

    /// Tears the session down if it is still the one that armed the timer and nothing
    /// was queued since.
    async fn idle_disconnect(&self, guild_id: GuildId, epoch: u64) {
        let Some(mut state) = self.registry.remove_if(guild_id, epoch, |state| state.is_empty()) else {
            debug!("Stale idle timer for guild {} ignored", guild_id);
            return;
        };

        // this task is the timer; dropping the state must not abort it mid-disconnect
        state.disarm_idle_timer();
        let channel_id = state.text_channel();
        let session = state.take_session();
        drop(state);

        info!("💤 Leaving guild {} after {:?} idle", guild_id, self.timings.idle_grace);
        if let Some(session) = session {
            session.disconnect().await;
        }
        self.notifier.notify(Notice::SessionEnded {
            guild_id,
            channel_id,
            reason: EndReason::IdleTimeout,
        });
    }

    /// Reports that the loaded track ended naturally or was stopped by `skip`.
    ///
    /// Queued behind the guild's other events; false when the guild has no state.
    pub fn on_track_finished(&self, guild_id: GuildId) -> bool {
        self.post_event(guild_id, VoiceEvent::TrackEnd)
    }

    /// Reports that the player failed while playing the loaded track.
    pub fn on_track_error(&self, guild_id: GuildId, reason: String) -> bool {
        self.post_event(guild_id, VoiceEvent::TrackError(reason))
    }

    fn post_event(&self, guild_id: GuildId, event: VoiceEvent) -> bool {
        self.registry
            .with(guild_id, |state| state.post(Mail::Voice(event)))
            .unwrap_or(false)
    }

    async fn advance(self: &Arc<Self>, guild_id: GuildId, epoch: u64, error: Option<MusicError>) {
        let finished = self
            .registry
            .with_epoch(guild_id, epoch, |state| {
                if !state.is_loaded() {
                    return None;
                }
                state.pop_head().map(|track| (track, state.text_channel()))
            })
            .flatten();

        let Some((track, channel_id)) = finished else {
            trace!("No loaded track in guild {}, end event ignored", guild_id);
            return;
        };

        match error {
            Some(error) => {
                warn!("Track '{}' failed in guild {}: {}", track.title(), guild_id, error);
                self.notifier.notify(Notice::PlaybackError {
                    guild_id,
                    channel_id,
                    track,
                    error,
                });
            }
            None => debug!("Track '{}' finished in guild {}", track.title(), guild_id),
        }

        self.start_playback(guild_id, epoch).await;
    }

    /// Pauses the player. `Ok(false)` if it was not playing.
    pub fn pause(&self, guild_id: GuildId) -> MusicResult<bool> {
        self.registry
            .with(guild_id, |state| -> MusicResult<bool> {
                if state.is_empty() {
                    return Err(MusicError::NothingPlaying);
                }
                if !state.is_playing() {
                    return Ok(false);
                }
                let session = state.session().ok_or(MusicError::NotConnected)?;
                if state.is_loaded() {
                    session.pause()?;
                } else {
                    state.request_pause(true);
                }
                state.set_playing(false);
                info!("⏸️ Paused playback in guild {}", guild_id);
                Ok(true)
            })
            .unwrap_or(Err(MusicError::NothingPlaying))
    }

    pub fn resume(&self, guild_id: GuildId) -> MusicResult<()> {
        self.registry
            .with(guild_id, |state| -> MusicResult<()> {
                if state.is_empty() {
                    return Err(MusicError::NothingPlaying);
                }
                let session = state.session().ok_or(MusicError::NotConnected)?;
                if state.is_loaded() {
                    session.unpause()?;
                } else {
                    state.request_pause(false);
                }
                state.set_playing(true);
                info!("▶️ Resumed playback in guild {}", guild_id);
                Ok(())
            })
            .unwrap_or(Err(MusicError::NothingPlaying))
    }

    /// Stops the current track so the player reports its end early. Returns the skipped track.
    ///
    /// A head that is still opening is dropped as soon as its stream arrives.
    pub fn skip(&self, guild_id: GuildId) -> MusicResult<Track> {
        self.registry
            .with(guild_id, |state| -> MusicResult<Track> {
                let track = state.head().cloned().ok_or(MusicError::NothingPlaying)?;
                let session = state.session().ok_or(MusicError::NotConnected)?;
                if state.is_loaded() {
                    session.stop()?;
                } else {
                    state.request_skip();
                }
                info!("⏭️ Skipping '{}' in guild {}", track.title(), guild_id);
                Ok(track)
            })
            .unwrap_or(Err(MusicError::NothingPlaying))
    }

    /// Clears the queue and leaves the voice channel right away.
    pub async fn stop(&self, guild_id: GuildId) -> MusicResult<()> {
        let mut state = self.registry.remove(guild_id).ok_or(MusicError::NothingPlaying)?;
        state.clear();
        let session = state.take_session();
        drop(state);

        if let Some(session) = session {
            if let Err(err) = session.stop() {
                warn!("Failed to stop player in guild {}: {}", guild_id, err);
            }
            session.disconnect().await;
        }

        info!("⏹️ Stopped playback in guild {}", guild_id);
        Ok(())
    }

    /// Drops the state after the voice session was lost for good.
    async fn teardown(&self, guild_id: GuildId, epoch: u64, reason: EndReason) {
        let Some(mut state) = self.registry.remove_if(guild_id, epoch, |_| true) else {
            return;
        };
        let channel_id = state.text_channel();
        let session = state.take_session();
        drop(state);

        warn!("🔌 Tearing down playback in guild {} ({:?})", guild_id, reason);
        if let Some(session) = session {
            session.disconnect().await;
        }
        self.notifier.notify(Notice::SessionEnded {
            guild_id,
            channel_id,
            reason,
        });
    }

    async fn on_connection_state(self: &Arc<Self>, guild_id: GuildId, epoch: u64, next: ConnectionState) {
        let watch = self.registry.with_epoch(guild_id, epoch, |state| {
            state.set_connection_state(next);
            state.watch_connection()
        });
        let Some(watch) = watch else { return };

        match next {
            ConnectionState::Disconnected => {
                let controller = Arc::clone(self);
                tokio::spawn(async move {
                    if controller.reconciler.classify(guild_id, watch).await == Outage::Permanent {
                        controller
                            .teardown(guild_id, epoch, EndReason::ConnectionLost)
                            .await;
                    }
                });
            }
            ConnectionState::Destroyed => {
                self.teardown(guild_id, epoch, EndReason::ConnectionLost).await;
            }
            _ => trace!("Voice connection of guild {} is {:?}", guild_id, next),
        }
    }

    /// Processes a guild's mailbox until its state is gone.
    async fn drive(self: Arc<Self>, guild_id: GuildId, epoch: u64, mut mailbox: mpsc::UnboundedReceiver<Mail>) {
        while let Some(mail) = mailbox.recv().await {
            if !self.registry.is_current(guild_id, epoch) {
                break;
            }

            match mail {
                Mail::Resume => self.start_playback(guild_id, epoch).await,
                Mail::Voice(VoiceEvent::TrackEnd) => self.advance(guild_id, epoch, None).await,
                Mail::Voice(VoiceEvent::TrackError(reason)) => {
                    self.advance(guild_id, epoch, Some(MusicError::PlayerRuntimeError(reason)))
                        .await
                }
                Mail::Voice(VoiceEvent::Connection(next)) => {
                    self.on_connection_state(guild_id, epoch, next).await
                }
            }
        }

        debug!("Driver of guild {} (epoch {}) finished", guild_id, epoch);
    }
}
