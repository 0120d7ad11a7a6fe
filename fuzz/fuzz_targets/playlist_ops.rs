#![no_main]

use libfuzzer_sys::fuzz_target;
use resound::model::AudioTrack;
use resound::playlist::Playlist;
use std::path::PathBuf;
use std::time::Duration;

fn track(id: u64) -> AudioTrack {
    AudioTrack {
        id,
        title: format!("track_{id}"),
        artist: None,
        album: None,
        duration: Duration::from_secs(180),
        location: PathBuf::from(format!("track_{id}.mp3")),
        cover_art: None,
    }
}

fuzz_target!(|data: &[u8]| {
    let len = ((data.first().copied().unwrap_or(1) as u64) % 16).max(1);
    let mut playlist = Playlist::from_tracks((0..len).map(track).collect());
    let mut next_id = 1_000;

    for byte in data {
        match byte % 8 {
            0 => {
                playlist.move_to_next_track();
            }
            1 => {
                playlist.move_to_previous_track();
            }
            2 => playlist.set_shuffle(true),
            3 => playlist.set_shuffle(false),
            4 => playlist.set_repeat(!playlist.is_repeat()),
            5 => {
                playlist.remove_track((*byte as usize) >> 3);
            }
            6 => playlist.set_cursor((*byte as usize) >> 3),
            _ => {
                playlist.add_track(track(next_id));
                next_id += 1;
            }
        }

        if !playlist.is_empty() {
            assert!(playlist.cursor() < playlist.len());
            assert!(playlist.current_track().is_some());
        }
    }
});
