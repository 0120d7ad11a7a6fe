use crate::model::AudioTrack;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

/// An ordered, cursor-tracked track collection. This is the only shape the
/// player accepts: browse views resolve albums, saved playlists or the whole
/// catalog into one of these before handing it over.
///
/// Two orderings live side by side. `original` is catalog order and is what
/// every list view displays; `shuffled` is built lazily when shuffle turns on
/// and discarded when it turns off. The cursor always indexes the active
/// ordering.
#[derive(Debug)]
pub struct Playlist {
    original: Vec<AudioTrack>,
    shuffled: Vec<AudioTrack>,
    cursor: usize,
    repeat: bool,
    shuffle: bool,
    rng: SmallRng,
}

impl Playlist {
    pub fn new() -> Self {
        Self {
            original: Vec::new(),
            shuffled: Vec::new(),
            cursor: 0,
            repeat: false,
            shuffle: false,
            rng: SmallRng::from_os_rng(),
        }
    }

    pub fn from_tracks(tracks: Vec<AudioTrack>) -> Self {
        let mut playlist = Self::new();
        playlist.original = tracks;
        playlist
    }

    /// Appends to the original order only. A shuffled order that already
    /// exists is left alone; the new track joins it on the next reshuffle.
    pub fn add_track(&mut self, track: AudioTrack) {
        self.original.push(track);
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        if shuffle == self.shuffle {
            return;
        }

        if shuffle {
            self.shuffled = self.original.clone();
            if !self.shuffled.is_empty() {
                // Pin the track under the cursor to slot 0, then shuffle the rest.
                self.shuffled.swap(0, self.cursor);
                self.shuffled[1..].shuffle(&mut self.rng);
            }
            self.cursor = 0;
            self.shuffle = true;
        } else {
            self.shuffle = false;
            let current_id = self.shuffled.get(self.cursor).map(|track| track.id);
            self.cursor = current_id
                .and_then(|id| self.original.iter().position(|track| track.id == id))
                .unwrap_or(0);
            self.shuffled.clear();
        }
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat
    }

    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_track(&self) -> Option<&AudioTrack> {
        self.active().get(self.cursor)
    }

    /// Advances the cursor. At the last index the cursor wraps to 0 when
    /// repeat is on and stays put otherwise; staying put is the silent
    /// end-of-sequence signal, not an error.
    pub fn move_to_next_track(&mut self) -> Option<&AudioTrack> {
        if self.is_empty() {
            return None;
        }
        let end = self.len() - 1;
        if self.cursor == end && self.repeat {
            self.cursor = 0;
        } else if self.cursor != end {
            self.cursor += 1;
        }
        self.current_track()
    }

    /// Symmetric wrap/no-op behavior at index 0.
    pub fn move_to_previous_track(&mut self) -> Option<&AudioTrack> {
        if self.is_empty() {
            return None;
        }
        if self.cursor == 0 && self.repeat {
            self.cursor = self.len() - 1;
        } else if self.cursor != 0 {
            self.cursor -= 1;
        }
        self.current_track()
    }

    pub fn has_next_track(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.repeat || self.cursor < self.len() - 1
    }

    pub fn has_previous_track(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.repeat || self.cursor > 0
    }

    /// Positional access into the original order, independent of shuffle.
    /// List views always display catalog order, so "row N" resolves here.
    pub fn unshuffled_track(&self, position: usize) -> Option<&AudioTrack> {
        self.original.get(position)
    }

    /// Index of a track in the active ordering, matched by stable id. This
    /// is the bridge between catalog-order rows and the shuffled cursor
    /// space; the two index spaces are never interchangeable directly.
    pub fn active_position_by_id(&self, id: u64) -> Option<usize> {
        self.active().iter().position(|track| track.id == id)
    }

    /// Removes by original-order position. While shuffle is active the same
    /// logical track (matched by id) also leaves the shuffled order, so both
    /// orderings shrink by exactly one.
    pub fn remove_track(&mut self, position: usize) -> Option<AudioTrack> {
        if position >= self.original.len() {
            return None;
        }
        let removed = self.original.remove(position);
        if self.shuffle
            && let Some(shuffled_position) = self
                .shuffled
                .iter()
                .position(|track| track.id == removed.id)
        {
            self.shuffled.remove(shuffled_position);
        }
        if self.cursor >= self.len() {
            self.cursor = self.len().saturating_sub(1);
        }
        Some(removed)
    }

    /// Externally imposed cursor jump in the active ordering's index space.
    /// Out-of-range positions are ignored.
    pub fn set_cursor(&mut self, position: usize) {
        if position < self.len() {
            self.cursor = position;
        }
    }

    fn active(&self) -> &[AudioTrack] {
        if self.shuffle {
            &self.shuffled
        } else {
            &self.original
        }
    }
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new()
    }
}
