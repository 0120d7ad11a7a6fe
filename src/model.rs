use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A fully resolved catalog entry. The `id` is derived from the normalized
/// location path and is the identity used everywhere two orderings or two
/// loads of the catalog have to agree on "the same track".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub id: u64,
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Duration,
    pub location: PathBuf,
    pub cover_art: Option<PathBuf>,
}

impl AudioTrack {
    pub fn formatted_duration(&self) -> String {
        format_duration(self.duration)
    }
}

/// Formats a duration as `m:ss`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}", total / 60, total % 60)
}

/// An album derived from track tags, used by the browse views. The playback
/// core never consults this; it only ever sees resolved track sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Album {
    pub title: String,
    pub artist: Option<String>,
    pub track_ids: Vec<u64>,
}

/// A named, persisted playlist: a weak list of track locations that still
/// needs resolving against the scanned catalog before it can be played.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SavedPlaylist {
    pub tracks: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub folders: Vec<PathBuf>,
    pub playlists: HashMap<String, SavedPlaylist>,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default = "default_saved_volume")]
    pub saved_volume: f32,
}

fn default_saved_volume() -> f32 {
    1.0
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            playlists: HashMap::new(),
            repeat: false,
            shuffle: false,
            saved_volume: default_saved_volume(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formats_as_minutes_and_seconds() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(61)), "1:01");
        assert_eq!(format_duration(Duration::from_secs(600)), "10:00");
    }
}
