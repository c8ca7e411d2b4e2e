use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use tracing::debug;

use super::queue::{GuildPlayback, QueueSnapshot, Track};
use crate::error::MusicResult;

/// Result of routing an enqueue through the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Appended to an existing state at this 1-based position.
    Appended { position: usize, was_idle: bool },
    /// No state existed; a fresh one was registered.
    Created,
}

/// Process-wide map from guild to its playback state.
///
/// Sole owner of every [`GuildPlayback`]; callers only get short closures over an entry,
/// so no shard lock is ever held across an `.await`.
pub struct PlaybackRegistry<S: Send + 'static> {
    states: DashMap<GuildId, GuildPlayback<S>>,
}

impl<S: Send + 'static> Default for PlaybackRegistry<S> {
    fn default() -> Self {
        Self {
            states: DashMap::new(),
        }
    }
}

impl<S: Send + 'static> PlaybackRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the guild's state, or registers `create()` when there is none.
    pub fn append_or_create(
        &self,
        guild_id: GuildId,
        track: Track,
        max_size: usize,
        create: impl FnOnce(Track) -> GuildPlayback<S>,
    ) -> MusicResult<Slot> {
        match self.states.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                let was_idle = state.is_empty();
                let position = state.push(track, max_size)?;
                if was_idle {
                    state.cancel_idle_timer();
                }
                Ok(Slot::Appended { position, was_idle })
            }
            Entry::Vacant(entry) => {
                let state = create(track);
                debug!("Registered playback state {} for guild {}", state.epoch(), guild_id);
                entry.insert(state);
                Ok(Slot::Created)
            }
        }
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.states.contains_key(&guild_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn epoch_of(&self, guild_id: GuildId) -> Option<u64> {
        self.states.get(&guild_id).map(|state| state.epoch())
    }

    pub fn is_current(&self, guild_id: GuildId, epoch: u64) -> bool {
        self.epoch_of(guild_id) == Some(epoch)
    }

    /// Runs `f` on the guild's state, whatever its epoch.
    pub fn with<R>(&self, guild_id: GuildId, f: impl FnOnce(&mut GuildPlayback<S>) -> R) -> Option<R> {
        self.states.get_mut(&guild_id).map(|mut state| f(&mut state))
    }

    /// Runs `f` only if the guild's state is still the one created at `epoch`.
    pub fn with_epoch<R>(
        &self,
        guild_id: GuildId,
        epoch: u64,
        f: impl FnOnce(&mut GuildPlayback<S>) -> R,
    ) -> Option<R> {
        let mut state = self.states.get_mut(&guild_id)?;
        if state.epoch() != epoch {
            return None;
        }
        Some(f(&mut state))
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<GuildPlayback<S>> {
        self.states.remove(&guild_id).map(|(_, state)| state)
    }

    /// Removes the guild's state if it is still the one created at `epoch` and `pred` holds.
    pub fn remove_if(
        &self,
        guild_id: GuildId,
        epoch: u64,
        pred: impl FnOnce(&GuildPlayback<S>) -> bool,
    ) -> Option<GuildPlayback<S>> {
        self.states
            .remove_if(&guild_id, |_, state| state.epoch() == epoch && pred(state))
            .map(|(_, state)| state)
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<QueueSnapshot> {
        self.states.get(&guild_id).map(|state| state.snapshot())
    }
}
