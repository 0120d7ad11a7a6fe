use crate::config;
use crate::model::{Album, AudioTrack};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::ffi::OsStr;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use walkdir::WalkDir;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "ogg", "m4a", "aac", "opus"];

/// Progressive reports from the catalog indexer worker. Tracks stream in
/// one at a time so the UI and the live sequence can grow while the walk is
/// still running; `Completed` closes the scan with the final count.
#[derive(Debug)]
pub enum ScanEvent {
    Track(AudioTrack),
    Completed { total: usize },
}

/// Walks the given folders on a worker thread, posting every discovered
/// track to `events`. The receiver hanging up aborts the walk.
pub fn spawn_scan(folders: Vec<PathBuf>, events: Sender<ScanEvent>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut total = 0_usize;
        for folder in &folders {
            for entry in WalkDir::new(folder)
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
            {
                let path = entry.path();
                if !entry.file_type().is_file() || !is_audio(path) {
                    continue;
                }
                total += 1;
                if events.send(ScanEvent::Track(read_track(path))).is_err() {
                    return;
                }
            }
        }
        log::info!("catalog scan finished with {total} tracks");
        let _ = events.send(ScanEvent::Completed { total });
    })
}

/// Synchronous variant of the scan, used by the CLI `--add` path and tests.
pub fn scan_folder(root: &Path) -> Vec<AudioTrack> {
    let mut tracks = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_audio(path) {
            continue;
        }
        tracks.push(read_track(path));
    }
    tracks.sort_by(|a, b| a.location.cmp(&b.location));
    tracks
}

/// Stable track identity: a hash of the normalized location. Identical
/// across rescans and across the two orderings of a sequence, which is what
/// every "same track?" comparison in the player relies on.
pub fn track_id_for_path(path: &Path) -> u64 {
    let normalized = config::normalize_path(path);
    let mut hasher = DefaultHasher::new();
    normalized.to_string_lossy().hash(&mut hasher);
    hasher.finish()
}

/// Reads one catalog entry. Tag problems are not fatal: an unreadable or
/// untagged file still becomes a track named after its file stem.
pub fn read_track(path: &Path) -> AudioTrack {
    let mut title = None;
    let mut artist = None;
    let mut album = None;
    let mut duration = Duration::ZERO;
    let mut cover_art = None;

    match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(tagged_file) => {
            duration = tagged_file.properties().duration();
            if let Some(tag) = tagged_file.primary_tag() {
                title = tag.title().map(|value| value.to_string());
                artist = tag.artist().map(|value| value.to_string());
                album = tag.album().map(|value| value.to_string());
                if !tag.pictures().is_empty() {
                    cover_art = Some(path.to_path_buf());
                }
            }
        }
        Err(err) => {
            log::debug!("failed to read tags for {}: {err}", path.display());
        }
    }

    let title = title
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .and_then(OsStr::to_str)
                .unwrap_or("unknown")
                .to_string()
        });

    AudioTrack {
        id: track_id_for_path(path),
        title,
        artist,
        album,
        duration,
        location: path.to_path_buf(),
        cover_art,
    }
}

/// Groups the catalog by album tag for the browse view. Untagged tracks
/// collect under "Unknown album". Albums come back sorted by title; member
/// tracks keep catalog order.
pub fn albums(tracks: &[AudioTrack]) -> Vec<Album> {
    let mut grouped: HashMap<String, Album> = HashMap::new();
    for track in tracks {
        let title = track
            .album
            .clone()
            .unwrap_or_else(|| String::from("Unknown album"));
        let entry = grouped.entry(title.clone()).or_insert_with(|| Album {
            title,
            artist: track.artist.clone(),
            track_ids: Vec::new(),
        });
        if entry.artist != track.artist {
            entry.artist = None;
        }
        entry.track_ids.push(track.id);
    }

    let mut albums: Vec<Album> = grouped.into_values().collect();
    albums.sort_by_cached_key(|album| album.title.to_ascii_lowercase());
    albums
}

/// Distinct artist names, sorted, for the browse view.
pub fn artists(tracks: &[AudioTrack]) -> Vec<String> {
    let mut artists: Vec<String> = tracks
        .iter()
        .filter_map(|track| track.artist.clone())
        .collect();
    artists.sort_by_cached_key(|artist| artist.to_ascii_lowercase());
    artists.dedup();
    artists
}

fn is_audio(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;

    fn track(id: u64, artist: Option<&str>, album: Option<&str>) -> AudioTrack {
        AudioTrack {
            id,
            title: format!("t{id}"),
            artist: artist.map(String::from),
            album: album.map(String::from),
            duration: Duration::from_secs(60),
            location: PathBuf::from(format!("t{id}.mp3")),
            cover_art: None,
        }
    }

    #[test]
    fn scan_picks_up_audio_files_and_skips_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("song.mp3"), b"x").unwrap();
        fs::write(dir.path().join("other.FLAC"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let tracks = scan_folder(dir.path());
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|track| track.duration == Duration::ZERO));
    }

    #[test]
    fn untagged_files_fall_back_to_the_file_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("My Favourite Song.mp3");
        fs::write(&path, b"not really audio").unwrap();

        let track = read_track(&path);
        assert_eq!(track.title, "My Favourite Song");
        assert_eq!(track.artist, None);
        assert_eq!(track.cover_art, None);
    }

    #[test]
    fn track_ids_are_stable_per_location() {
        let a = track_id_for_path(Path::new("music/song.mp3"));
        let b = track_id_for_path(Path::new("music/song.mp3"));
        let c = track_id_for_path(Path::new("music/other.mp3"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn spawn_scan_streams_tracks_then_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        fs::write(dir.path().join("b.ogg"), b"x").unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = spawn_scan(vec![dir.path().to_path_buf()], tx);
        handle.join().expect("scan thread");

        let events: Vec<ScanEvent> = rx.try_iter().collect();
        let tracks = events
            .iter()
            .filter(|event| matches!(event, ScanEvent::Track(_)))
            .count();
        assert_eq!(tracks, 2);
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Completed { total: 2 })
        ));
    }

    #[test]
    fn albums_group_by_tag_and_blank_mixed_artists() {
        let tracks = vec![
            track(1, Some("Ana"), Some("First")),
            track(2, Some("Ana"), Some("First")),
            track(3, Some("Ben"), Some("Second")),
            track(4, Some("Cal"), Some("Second")),
            track(5, None, None),
        ];

        let albums = albums(&tracks);
        assert_eq!(albums.len(), 3);
        assert_eq!(albums[0].title, "First");
        assert_eq!(albums[0].artist.as_deref(), Some("Ana"));
        assert_eq!(albums[0].track_ids, vec![1, 2]);
        assert_eq!(albums[1].title, "Second");
        assert_eq!(albums[1].artist, None, "mixed-artist album has no single artist");
        assert_eq!(albums[2].title, "Unknown album");
    }

    #[test]
    fn artists_are_sorted_and_deduplicated() {
        let tracks = vec![
            track(1, Some("zoe"), None),
            track(2, Some("Ana"), None),
            track(3, Some("Ana"), None),
            track(4, None, None),
        ];
        assert_eq!(artists(&tracks), vec!["Ana", "zoe"]);
    }
}
