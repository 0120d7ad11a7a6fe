use crate::model::AudioTrack;
use crate::player::PlayerState;
use crossterm::execute;
use crossterm::terminal::SetTitle;
use std::io::stdout;

/// The external now-playing surface. The player pushes the current track and
/// transport state here on every transition; implementations render it
/// however the host allows (the shipped one mirrors it into the terminal
/// title). `advisory` carries transient user-facing notices such as a
/// denied focus request.
pub trait NowPlayingSurface {
    fn update(&mut self, track: Option<&AudioTrack>, state: PlayerState);

    fn advisory(&mut self, _message: &str) {}
}

pub struct NullNotifier;

impl NowPlayingSurface for NullNotifier {
    fn update(&mut self, _track: Option<&AudioTrack>, _state: PlayerState) {}
}

/// Mirrors now-playing text into the terminal title bar.
pub struct TerminalTitle;

impl NowPlayingSurface for TerminalTitle {
    fn update(&mut self, track: Option<&AudioTrack>, state: PlayerState) {
        let title = match (state, track) {
            (PlayerState::Playing, Some(track)) => {
                format!("\u{25b6} {} - {}", track.title, artist_label(track))
            }
            (PlayerState::Paused, Some(track)) => {
                format!("\u{23f8} {} - {}", track.title, artist_label(track))
            }
            _ => String::from("resound"),
        };
        let _ = execute!(stdout(), SetTitle(title));
    }
}

fn artist_label(track: &AudioTrack) -> &str {
    track.artist.as_deref().unwrap_or("Unknown artist")
}
