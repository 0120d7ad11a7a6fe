use crate::audio::{AudioEngine, EngineEvent};
use crate::focus::{
    DUCKED_OUTPUT_LEVEL, FULL_OUTPUT_LEVEL, FocusArbiter, FocusChange, FocusGrant,
};
use crate::model::AudioTrack;
use crate::notify::NowPlayingSurface;
use crate::playlist::Playlist;
use anyhow::Result;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Stopped,
    Paused,
    Playing,
}

/// Observable player transitions. Track changes carry both sides of the
/// delta so listeners can skip redundant artwork/UI work themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackChanged {
        previous: Option<AudioTrack>,
        current: Option<AudioTrack>,
    },
    StateChanged {
        old: PlayerState,
        new: PlayerState,
    },
}

/// The playback state machine: binds one [`Playlist`] to the render engine
/// under the focus arbiter's authority.
///
/// Every command returns immediately. Asynchronous preparation is a
/// sub-phase of the transition into `Playing`: between `play()` and the
/// engine's `Prepared` callback the state stays `Stopped` and further
/// `play()` calls are no-ops. All engine and focus callbacks must be fed
/// back in on the same thread that issues commands: the struct is the
/// state machine, the owning loop is its serial execution context.
pub struct Player {
    playlist: Option<Playlist>,
    state: PlayerState,
    previous_track: Option<AudioTrack>,
    engine: Box<dyn AudioEngine>,
    focus: Box<dyn FocusArbiter>,
    surface: Box<dyn NowPlayingSurface>,
    subscribers: Vec<Sender<PlayerEvent>>,
    preparing: Option<u64>,
}

impl Player {
    pub fn new(
        engine: Box<dyn AudioEngine>,
        focus: Box<dyn FocusArbiter>,
        surface: Box<dyn NowPlayingSurface>,
    ) -> Self {
        Self {
            playlist: None,
            state: PlayerState::Stopped,
            previous_track: None,
            engine,
            focus,
            surface,
            subscribers: Vec::new(),
            preparing: None,
        }
    }

    /// Registers a new event subscriber. Receivers that hang up are pruned
    /// on the next emit; there is no limit on concurrent subscribers.
    pub fn subscribe(&mut self) -> Receiver<PlayerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Replaces the active track sequence. The sequence's current track
    /// becomes the new previous-track baseline, and a track-changed
    /// notification fires if the current track actually differs.
    pub fn set_playlist(&mut self, playlist: Playlist) {
        self.playlist = Some(playlist);
        self.notify_track_changed();
    }

    pub fn playlist(&self) -> Option<&Playlist> {
        self.playlist.as_ref()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Current track under the sequence cursor, or `None` before any
    /// sequence is assigned. There is no guarantee the track is audible yet.
    pub fn current_track(&self) -> Option<AudioTrack> {
        self.playlist
            .as_ref()
            .and_then(|playlist| playlist.current_track())
            .cloned()
    }

    /// Requests exclusive output and starts (or resumes) playback. A denied
    /// request surfaces an advisory and changes nothing. While a prepare is
    /// outstanding the call is a no-op.
    pub fn play(&mut self) {
        if self.preparing.is_some() {
            return;
        }
        if self
            .playlist
            .as_ref()
            .is_none_or(|playlist| playlist.is_empty())
        {
            return;
        }

        match self.focus.request_exclusive() {
            FocusGrant::Denied => {
                log::warn!("focus arbiter denied exclusive audio output");
                self.surface.advisory("Unable to play audio at this time.");
            }
            FocusGrant::Granted => self.begin_playback(),
        }
    }

    /// Effective only from `Playing`.
    pub fn pause(&mut self) {
        if self.state == PlayerState::Playing {
            self.engine.pause();
            self.set_state(PlayerState::Paused);
        }
    }

    /// Effective unless already `Stopped`. Always cancels an outstanding
    /// prepare, so it is safe to call mid-suspension-window.
    pub fn stop(&mut self) {
        self.preparing = None;
        if self.state != PlayerState::Stopped {
            self.engine.stop();
            self.set_state(PlayerState::Stopped);
        }
    }

    /// Stops before moving the cursor so the engine is never asked to
    /// switch tracks mid-render, then notifies and plays.
    pub fn next_track(&mut self) {
        if self
            .playlist
            .as_ref()
            .is_none_or(|playlist| playlist.is_empty())
        {
            return;
        }
        self.stop();
        if let Some(playlist) = self.playlist.as_mut() {
            playlist.move_to_next_track();
        }
        self.notify_track_changed();
        self.play();
    }

    pub fn previous_track(&mut self) {
        if self
            .playlist
            .as_ref()
            .is_none_or(|playlist| playlist.is_empty())
        {
            return;
        }
        self.stop();
        if let Some(playlist) = self.playlist.as_mut() {
            playlist.move_to_previous_track();
        }
        self.notify_track_changed();
        self.play();
    }

    /// Plays the track at `position` in the original (catalog) order, the
    /// index space list rows live in. If the tapped track is already the
    /// current one (matched by stable id, not identity) playback resumes
    /// instead of re-preparing from scratch.
    pub fn play_track_at(&mut self, position: usize) {
        let Some(target) = self
            .playlist
            .as_ref()
            .and_then(|playlist| playlist.unshuffled_track(position))
            .cloned()
        else {
            return;
        };

        if self.current_track().is_some_and(|track| track.id == target.id) {
            if self.state != PlayerState::Playing {
                self.play();
            }
            return;
        }

        self.stop();
        if let Some(playlist) = self.playlist.as_mut()
            && let Some(active_position) = playlist.active_position_by_id(target.id)
        {
            playlist.set_cursor(active_position);
        }
        self.notify_track_changed();
        self.play();
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        if let Some(playlist) = self.playlist.as_mut() {
            playlist.set_repeat(repeat);
        }
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        if let Some(playlist) = self.playlist.as_mut() {
            playlist.set_shuffle(shuffle);
        }
    }

    /// Thread-safe append terminus: the catalog indexer's worker posts
    /// discovered tracks to the app loop, which lands them here.
    pub fn append_track(&mut self, track: AudioTrack) {
        if let Some(playlist) = self.playlist.as_mut() {
            playlist.add_track(track);
        }
    }

    /// Removes a track by original-order position, from both orderings when
    /// shuffle is active. Removal never interrupts the engine; an already
    /// rendering track plays out.
    pub fn remove_track(&mut self, position: usize) -> Option<AudioTrack> {
        self.playlist
            .as_mut()
            .and_then(|playlist| playlist.remove_track(position))
    }

    pub fn playhead(&self) -> Option<Duration> {
        self.engine.position()
    }

    /// Seeks within the current track. Never changes the player state.
    pub fn seek_to(&mut self, position: Duration) -> Result<()> {
        self.engine.seek_to(position)
    }

    pub fn volume(&self) -> f32 {
        self.engine.volume()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.engine.set_volume(volume);
    }

    /// Render-engine callbacks, serialized through the owning loop.
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Prepared { generation } => {
                if self.preparing != Some(generation)
                    || generation != self.engine.generation()
                {
                    log::debug!("ignoring prepared callback from superseded request");
                    return;
                }
                self.preparing = None;
                self.engine.start();
                self.set_state(PlayerState::Playing);
            }
            EngineEvent::Completed { generation } => {
                if generation != self.engine.generation() {
                    return;
                }
                self.set_state(PlayerState::Stopped);
                let has_next = self
                    .playlist
                    .as_ref()
                    .is_some_and(|playlist| playlist.has_next_track());
                if has_next {
                    if let Some(playlist) = self.playlist.as_mut() {
                        playlist.move_to_next_track();
                    }
                    self.notify_track_changed();
                    self.play();
                }
            }
            EngineEvent::Error {
                generation,
                message,
            } => {
                if generation != self.engine.generation() {
                    return;
                }
                // A failed render must not cascade into the rest of the
                // sequence: stop and wait for the next command.
                self.preparing = None;
                log::error!("render engine error: {message}");
                self.engine.stop();
                self.set_state(PlayerState::Stopped);
            }
        }
    }

    /// Once-per-loop-iteration housekeeping: lets the engine detect a
    /// naturally drained render and post its `Completed` callback.
    pub fn tick(&mut self) {
        self.engine.poll_completion();
    }

    /// Focus-arbiter callbacks, serialized through the owning loop.
    pub fn handle_focus_change(&mut self, change: FocusChange) {
        match change {
            FocusChange::Gained => {
                if self.state != PlayerState::Playing {
                    self.begin_playback();
                }
                self.engine.set_volume(FULL_OUTPUT_LEVEL);
            }
            FocusChange::Lost | FocusChange::LostTransient => {
                // Paused, not stopped: position survives for the resume.
                if self.state == PlayerState::Playing {
                    self.pause();
                }
            }
            FocusChange::LostTransientCanDuck => {
                if self.state == PlayerState::Playing {
                    self.engine.set_volume(DUCKED_OUTPUT_LEVEL);
                }
            }
        }
    }

    /// Resume-or-prepare. Shared between a granted `play()` and a focus
    /// regain, which is authorized by the grant it is restoring.
    fn begin_playback(&mut self) {
        if self.preparing.is_some() {
            return;
        }

        if self.state == PlayerState::Paused {
            self.engine.start();
            self.set_state(PlayerState::Playing);
            return;
        }

        let Some(track) = self.current_track() else {
            return;
        };

        self.engine.reset();
        if let Err(err) = self.engine.set_source(&track.location) {
            log::error!(
                "failed to set render source to {}: {err:#}",
                track.location.display()
            );
            return;
        }
        self.preparing = Some(self.engine.generation());
        self.engine.prepare();
    }

    fn set_state(&mut self, new: PlayerState) {
        if new == self.state {
            return;
        }
        let old = self.state;
        self.state = new;
        self.emit(PlayerEvent::StateChanged { old, new });
        let track = self.current_track();
        self.surface.update(track.as_ref(), self.state);
    }

    fn notify_track_changed(&mut self) {
        let current = self.current_track();
        let unchanged = match (&self.previous_track, &current) {
            (Some(previous), Some(current)) => previous.id == current.id,
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }
        let previous = self.previous_track.take();
        self.previous_track = current.clone();
        self.emit(PlayerEvent::TrackChanged { previous, current });
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
