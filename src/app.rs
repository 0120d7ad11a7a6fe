use crate::audio::{AudioEngine, NullEngine, RodioEngine};
use crate::config;
use crate::focus::{FocusChange, UncontestedArbiter};
use crate::library::{self, ScanEvent};
use crate::model::{Album, AudioTrack, PersistedState, SavedPlaylist};
use crate::notify::TerminalTitle;
use crate::player::{Player, PlayerEvent, PlayerState};
use crate::playlist::Playlist;
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::collections::HashMap;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

const SEEK_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseView {
    Songs,
    Albums,
    Artists,
    Playlists,
}

impl BrowseView {
    pub fn label(self) -> &'static str {
        match self {
            Self::Songs => "Songs",
            Self::Albums => "Albums",
            Self::Artists => "Artists",
            Self::Playlists => "Playlists",
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Songs => Self::Albums,
            Self::Albums => Self::Artists,
            Self::Artists => Self::Playlists,
            Self::Playlists => Self::Songs,
        }
    }
}

/// Which playback context the active sequence was built from. Only the
/// whole-library context keeps growing while the scanner streams tracks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayContext {
    Library,
    Narrowed,
}

pub struct BrowseRow {
    pub label: String,
    pub track_id: Option<u64>,
}

pub struct App {
    pub catalog: Vec<AudioTrack>,
    pub albums: Vec<Album>,
    pub artists: Vec<String>,
    pub playlists: HashMap<String, SavedPlaylist>,
    pub folders: Vec<PathBuf>,
    pub view: BrowseView,
    pub selected: usize,
    pub status: String,
    pub dirty: bool,
    repeat: bool,
    shuffle: bool,
    context: PlayContext,
}

impl App {
    pub fn from_persisted(state: &PersistedState) -> Self {
        Self {
            catalog: Vec::new(),
            albums: Vec::new(),
            artists: Vec::new(),
            playlists: state.playlists.clone(),
            folders: state.folders.clone(),
            view: BrowseView::Songs,
            selected: 0,
            status: String::from("Scanning library..."),
            dirty: true,
            repeat: state.repeat,
            shuffle: state.shuffle,
            context: PlayContext::Library,
        }
    }

    pub fn persisted_state(&self, saved_volume: f32) -> PersistedState {
        PersistedState {
            folders: self.folders.clone(),
            playlists: self.playlists.clone(),
            repeat: self.repeat,
            shuffle: self.shuffle,
            saved_volume,
        }
    }

    pub fn visible_rows(&self, player: &Player) -> Vec<BrowseRow> {
        match self.view {
            BrowseView::Songs => {
                let Some(playlist) = player.playlist() else {
                    return Vec::new();
                };
                let mut rows = Vec::new();
                let mut position = 0;
                while let Some(track) = playlist.unshuffled_track(position) {
                    rows.push(BrowseRow {
                        label: format!(
                            "{} - {}  [{}]",
                            track.title,
                            track.artist.as_deref().unwrap_or("Unknown artist"),
                            track.formatted_duration(),
                        ),
                        track_id: Some(track.id),
                    });
                    position += 1;
                }
                rows
            }
            BrowseView::Albums => self
                .albums
                .iter()
                .map(|album| BrowseRow {
                    label: format!(
                        "{} - {}  ({})",
                        album.title,
                        album.artist.as_deref().unwrap_or("Various"),
                        album.track_ids.len(),
                    ),
                    track_id: None,
                })
                .collect(),
            BrowseView::Artists => self
                .artists
                .iter()
                .map(|artist| BrowseRow {
                    label: artist.clone(),
                    track_id: None,
                })
                .collect(),
            BrowseView::Playlists => {
                let mut names: Vec<&String> = self.playlists.keys().collect();
                names.sort_by_cached_key(|name| name.to_ascii_lowercase());
                names
                    .into_iter()
                    .map(|name| BrowseRow {
                        label: format!("{}  ({})", name, self.playlists[name].tracks.len()),
                        track_id: None,
                    })
                    .collect()
            }
        }
    }

    fn clamp_selection(&mut self, row_count: usize) {
        if row_count == 0 {
            self.selected = 0;
        } else {
            self.selected = self.selected.min(row_count - 1);
        }
    }

    fn rebuild_groups(&mut self) {
        self.albums = library::albums(&self.catalog);
        self.artists = library::artists(&self.catalog);
        self.dirty = true;
    }

    fn set_status(&mut self, message: &str) {
        self.status = message.to_string();
        self.dirty = true;
    }

    fn knows_track(&self, id: u64) -> bool {
        self.catalog.iter().any(|track| track.id == id)
    }

    /// Resolves a saved playlist's locations against the catalog, reading
    /// tags on the spot for entries the scanner has not seen.
    fn resolve_saved_playlist(&self, name: &str) -> Option<Vec<AudioTrack>> {
        let saved = self.playlists.get(name)?;
        let tracks = saved
            .tracks
            .iter()
            .map(|path| {
                let id = library::track_id_for_path(path);
                self.catalog
                    .iter()
                    .find(|track| track.id == id)
                    .cloned()
                    .unwrap_or_else(|| library::read_track(path))
            })
            .collect();
        Some(tracks)
    }
}

pub struct AppOptions {
    pub force_null_engine: bool,
    pub extra_folder: Option<PathBuf>,
}

pub fn run(options: AppOptions) -> Result<()> {
    let mut state = config::load_state()?;
    if let Some(folder) = options.extra_folder {
        let normalized = config::normalize_path(&folder);
        if !state.folders.contains(&normalized) {
            state.folders.push(normalized);
        }
    }
    let mut app = App::from_persisted(&state);

    let (engine_tx, engine_rx) = mpsc::channel();
    let engine: Box<dyn AudioEngine> = if options.force_null_engine {
        Box::new(NullEngine::new(engine_tx.clone()))
    } else {
        match RodioEngine::new(engine_tx.clone()) {
            Ok(engine) => Box::new(engine),
            Err(err) => {
                log::warn!("audio output unavailable, falling back to null engine: {err:#}");
                Box::new(NullEngine::new(engine_tx.clone()))
            }
        }
    };

    // The arbiter below never revokes; the channel is the seam a platform
    // focus broker would deliver revocations through.
    let (_focus_tx, focus_rx) = mpsc::channel::<FocusChange>();

    let mut player = Player::new(
        engine,
        Box::new(UncontestedArbiter),
        Box::new(TerminalTitle),
    );
    let player_events = player.subscribe();

    // The whole-library sequence starts empty and grows as the scan streams.
    // A persisted shuffle flag is applied once the scan completes, so the
    // permutation covers the full catalog rather than an empty list.
    player.set_playlist(Playlist::new());
    player.set_repeat(app.repeat);
    player.set_volume(state.saved_volume);

    let (scan_tx, scan_rx) = mpsc::channel();
    library::spawn_scan(app.folders.clone(), scan_tx.clone());

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut command_mode = false;
    let mut command_buffer = String::new();
    let mut last_tick = Instant::now();

    let result: Result<()> = loop {
        player.tick();
        pump_scan_events(&mut app, &mut player, &scan_rx);
        pump_engine_events(&mut player, &engine_rx, &mut app);
        pump_focus_events(&mut player, &focus_rx, &mut app);
        pump_player_events(&mut app, &player_events);

        if app.dirty || last_tick.elapsed() > Duration::from_millis(250) {
            terminal.draw(|frame| {
                crate::ui::draw(frame, &app, &player, &command_buffer, command_mode)
            })?;
            app.dirty = false;
            last_tick = Instant::now();
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if command_mode {
            match key.code {
                KeyCode::Esc => {
                    command_mode = false;
                    command_buffer.clear();
                    app.dirty = true;
                }
                KeyCode::Enter => {
                    let line = command_buffer.clone();
                    run_command(&mut app, &mut player, &scan_tx, &line);
                    command_mode = false;
                    command_buffer.clear();
                }
                KeyCode::Backspace => {
                    command_buffer.pop();
                    app.dirty = true;
                }
                KeyCode::Char(ch) => {
                    command_buffer.push(ch);
                    app.dirty = true;
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break Ok(()),
            KeyCode::Char('q') => break Ok(()),
            KeyCode::Down => {
                let count = app.visible_rows(&player).len();
                if count > 0 {
                    app.selected = (app.selected + 1).min(count - 1);
                    app.dirty = true;
                }
            }
            KeyCode::Up => {
                app.selected = app.selected.saturating_sub(1);
                app.dirty = true;
            }
            KeyCode::Tab => {
                app.view = app.view.next();
                app.selected = 0;
                app.dirty = true;
            }
            KeyCode::Enter => activate_selected(&mut app, &mut player),
            KeyCode::Char(' ') => match player.state() {
                PlayerState::Playing => {
                    player.pause();
                    app.set_status("Paused");
                }
                _ => {
                    player.play();
                    app.set_status("Playing");
                }
            },
            KeyCode::Char('n') => {
                player.next_track();
                app.dirty = true;
            }
            KeyCode::Char('b') => {
                player.previous_track();
                app.dirty = true;
            }
            KeyCode::Char('s') => {
                app.shuffle = !app.shuffle;
                player.set_shuffle(app.shuffle);
                app.set_status(if app.shuffle { "Shuffle on" } else { "Shuffle off" });
            }
            KeyCode::Char('r') => {
                app.repeat = !app.repeat;
                player.set_repeat(app.repeat);
                app.set_status(if app.repeat { "Repeat on" } else { "Repeat off" });
            }
            KeyCode::Char('d') => {
                if app.view == BrowseView::Songs && player.remove_track(app.selected).is_some() {
                    let count = app.visible_rows(&player).len();
                    app.clamp_selection(count);
                    app.set_status("Removed from queue");
                }
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                let next = (player.volume() + 0.05).clamp(0.0, 2.0);
                player.set_volume(next);
                app.set_status(&format!("Volume: {}%", (next * 100.0).round() as u16));
            }
            KeyCode::Char('-') => {
                let next = (player.volume() - 0.05).clamp(0.0, 2.0);
                player.set_volume(next);
                app.set_status(&format!("Volume: {}%", (next * 100.0).round() as u16));
            }
            KeyCode::Char(',') => {
                if let Some(position) = player.playhead() {
                    let _ = player.seek_to(position.saturating_sub(SEEK_STEP));
                    app.dirty = true;
                }
            }
            KeyCode::Char('.') => {
                if let Some(position) = player.playhead() {
                    let _ = player.seek_to(position.saturating_add(SEEK_STEP));
                    app.dirty = true;
                }
            }
            KeyCode::Char(':') => {
                command_mode = true;
                app.dirty = true;
            }
            _ => {}
        }
    };

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    let save_result = config::save_state(&app.persisted_state(player.volume()));
    result?;
    save_result?;
    Ok(())
}

fn pump_scan_events(app: &mut App, player: &mut Player, scan_rx: &Receiver<ScanEvent>) {
    while let Ok(event) = scan_rx.try_recv() {
        match event {
            ScanEvent::Track(track) => {
                if app.knows_track(track.id) {
                    continue;
                }
                if app.context == PlayContext::Library {
                    player.append_track(track.clone());
                }
                app.catalog.push(track);
                app.dirty = true;
            }
            ScanEvent::Completed { total } => {
                app.rebuild_groups();
                if app.context == PlayContext::Library && app.shuffle {
                    player.set_shuffle(true);
                }
                app.set_status(&format!("Library scan finished ({total} tracks)"));
            }
        }
    }
}

fn pump_engine_events(
    player: &mut Player,
    engine_rx: &Receiver<crate::audio::EngineEvent>,
    app: &mut App,
) {
    while let Ok(event) = engine_rx.try_recv() {
        player.handle_engine_event(event);
        app.dirty = true;
    }
}

fn pump_focus_events(player: &mut Player, focus_rx: &Receiver<FocusChange>, app: &mut App) {
    while let Ok(change) = focus_rx.try_recv() {
        player.handle_focus_change(change);
        app.dirty = true;
    }
}

fn pump_player_events(app: &mut App, player_events: &Receiver<PlayerEvent>) {
    while let Ok(event) = player_events.try_recv() {
        match event {
            PlayerEvent::TrackChanged { current, .. } => {
                if let Some(track) = current {
                    app.set_status(&format!("Now playing: {}", track.title));
                }
            }
            PlayerEvent::StateChanged { .. } => app.dirty = true,
        }
    }
}

fn activate_selected(app: &mut App, player: &mut Player) {
    match app.view {
        BrowseView::Songs => {
            player.play_track_at(app.selected);
            app.dirty = true;
        }
        BrowseView::Albums => {
            let Some(album) = app.albums.get(app.selected) else {
                app.set_status("Nothing selected");
                return;
            };
            let tracks: Vec<AudioTrack> = app
                .catalog
                .iter()
                .filter(|track| album.track_ids.contains(&track.id))
                .cloned()
                .collect();
            let title = album.title.clone();
            assign_sequence(app, player, tracks, PlayContext::Narrowed);
            player.play();
            app.view = BrowseView::Songs;
            app.selected = 0;
            app.set_status(&format!("Playing album: {title}"));
        }
        BrowseView::Artists => {
            let Some(artist) = app.artists.get(app.selected).cloned() else {
                app.set_status("Nothing selected");
                return;
            };
            let tracks: Vec<AudioTrack> = app
                .catalog
                .iter()
                .filter(|track| track.artist.as_deref() == Some(artist.as_str()))
                .cloned()
                .collect();
            assign_sequence(app, player, tracks, PlayContext::Narrowed);
            player.play();
            app.view = BrowseView::Songs;
            app.selected = 0;
            app.set_status(&format!("Playing artist: {artist}"));
        }
        BrowseView::Playlists => {
            let mut names: Vec<String> = app.playlists.keys().cloned().collect();
            names.sort_by_cached_key(|name| name.to_ascii_lowercase());
            let Some(name) = names.get(app.selected).cloned() else {
                app.set_status("Nothing selected");
                return;
            };
            play_saved_playlist(app, player, &name);
        }
    }
}

fn play_saved_playlist(app: &mut App, player: &mut Player, name: &str) {
    let Some(tracks) = app.resolve_saved_playlist(name) else {
        app.set_status("Playlist not found");
        return;
    };
    if tracks.is_empty() {
        app.set_status("Playlist is empty");
        return;
    }
    assign_sequence(app, player, tracks, PlayContext::Narrowed);
    player.play();
    app.view = BrowseView::Songs;
    app.selected = 0;
    app.set_status(&format!("Playing playlist: {name}"));
}

fn assign_sequence(app: &mut App, player: &mut Player, tracks: Vec<AudioTrack>, context: PlayContext) {
    player.stop();
    player.set_playlist(Playlist::from_tracks(tracks));
    player.set_repeat(app.repeat);
    player.set_shuffle(app.shuffle);
    app.context = context;
    app.dirty = true;
}

fn run_command(app: &mut App, player: &mut Player, scan_tx: &Sender<ScanEvent>, raw: &str) {
    let input = raw.trim();
    if input.is_empty() {
        app.set_status("No command");
        return;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => {
            app.set_status(
                "Commands: add <path> | playlist new <name> | playlist add <name> | playlist play <name> | library | save",
            );
        }
        "add" => {
            if rest.is_empty() {
                app.set_status("Usage: add <path>");
                return;
            }
            let normalized = config::normalize_path(&PathBuf::from(rest));
            if app.folders.contains(&normalized) {
                app.set_status("Folder already added");
                return;
            }
            app.folders.push(normalized.clone());
            library::spawn_scan(vec![normalized], scan_tx.clone());
            app.set_status("Folder added, scanning...");
        }
        "playlist" => {
            let mut playlist_split = rest.splitn(2, char::is_whitespace);
            let action = playlist_split.next().unwrap_or_default();
            let name = playlist_split.next().unwrap_or("").trim();

            if action.is_empty() || name.is_empty() {
                app.set_status("Usage: playlist <new|add|play> <name>");
                return;
            }

            match action {
                "new" => {
                    if app.playlists.contains_key(name) {
                        app.set_status("Playlist already exists");
                        return;
                    }
                    app.playlists
                        .insert(name.to_string(), SavedPlaylist::default());
                    app.set_status("Playlist created");
                }
                "add" => {
                    let selected_location = player
                        .playlist()
                        .and_then(|playlist| playlist.unshuffled_track(app.selected))
                        .map(|track| track.location.clone());
                    let Some(location) = selected_location else {
                        app.set_status("No track selected");
                        return;
                    };
                    app.playlists
                        .entry(name.to_string())
                        .or_default()
                        .tracks
                        .push(location);
                    app.set_status("Track added to playlist");
                }
                "play" => play_saved_playlist(app, player, name),
                _ => app.set_status("Usage: playlist <new|add|play> <name>"),
            }
        }
        "library" => {
            let tracks = app.catalog.clone();
            assign_sequence(app, player, tracks, PlayContext::Library);
            app.set_status("Loaded library queue");
        }
        "save" => {
            let state = app.persisted_state(player.volume());
            match config::save_state(&state) {
                Ok(()) => app.set_status("State saved"),
                Err(err) => app.set_status(&format!("save error: {err:#}")),
            }
        }
        _ => app.set_status("Unknown command. Use :help"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::{FocusArbiter, FocusGrant};
    use crate::notify::NullNotifier;
    use std::path::Path;

    struct GrantingArbiter;

    impl FocusArbiter for GrantingArbiter {
        fn request_exclusive(&mut self) -> FocusGrant {
            FocusGrant::Granted
        }
    }

    struct InertEngine;

    impl crate::audio::AudioEngine for InertEngine {
        fn reset(&mut self) {}
        fn set_source(&mut self, _location: &Path) -> Result<()> {
            Ok(())
        }
        fn prepare(&mut self) {}
        fn start(&mut self) {}
        fn pause(&mut self) {}
        fn stop(&mut self) {}
        fn position(&self) -> Option<Duration> {
            None
        }
        fn seek_to(&mut self, _position: Duration) -> Result<()> {
            Ok(())
        }
        fn volume(&self) -> f32 {
            1.0
        }
        fn set_volume(&mut self, _volume: f32) {}
        fn generation(&self) -> u64 {
            0
        }
        fn poll_completion(&mut self) {}
    }

    fn test_player() -> Player {
        Player::new(
            Box::new(InertEngine),
            Box::new(GrantingArbiter),
            Box::new(NullNotifier),
        )
    }

    fn track(id: u64, title: &str, artist: Option<&str>, album: Option<&str>) -> AudioTrack {
        AudioTrack {
            id,
            title: String::from(title),
            artist: artist.map(String::from),
            album: album.map(String::from),
            duration: Duration::from_secs(120),
            location: PathBuf::from(format!("{title}.mp3")),
            cover_art: None,
        }
    }

    #[test]
    fn scanner_tracks_append_to_the_library_context_only() {
        let mut app = App::from_persisted(&PersistedState::default());
        let mut player = test_player();
        player.set_playlist(Playlist::new());

        let (tx, rx) = mpsc::channel();
        tx.send(ScanEvent::Track(track(1, "a", None, None))).unwrap();
        tx.send(ScanEvent::Track(track(1, "a", None, None))).unwrap();
        tx.send(ScanEvent::Track(track(2, "b", None, None))).unwrap();
        pump_scan_events(&mut app, &mut player, &rx);

        assert_eq!(app.catalog.len(), 2, "duplicate reports are dropped");
        assert_eq!(player.playlist().unwrap().len(), 2);

        // A narrowed context must not grow behind the user's back.
        assign_sequence(
            &mut app,
            &mut player,
            vec![track(1, "a", None, None)],
            PlayContext::Narrowed,
        );
        tx.send(ScanEvent::Track(track(3, "c", None, None))).unwrap();
        pump_scan_events(&mut app, &mut player, &rx);
        assert_eq!(app.catalog.len(), 3);
        assert_eq!(player.playlist().unwrap().len(), 1);
    }

    #[test]
    fn scan_completion_rebuilds_browse_groups() {
        let mut app = App::from_persisted(&PersistedState::default());
        let mut player = test_player();
        player.set_playlist(Playlist::new());

        let (tx, rx) = mpsc::channel();
        tx.send(ScanEvent::Track(track(1, "a", Some("Ana"), Some("First"))))
            .unwrap();
        tx.send(ScanEvent::Track(track(2, "b", Some("Ben"), Some("First"))))
            .unwrap();
        tx.send(ScanEvent::Completed { total: 2 }).unwrap();
        pump_scan_events(&mut app, &mut player, &rx);

        assert_eq!(app.albums.len(), 1);
        assert_eq!(app.artists, vec!["Ana", "Ben"]);
        assert!(app.status.contains("2 tracks"));
    }

    #[test]
    fn playlist_commands_round_trip() {
        let mut app = App::from_persisted(&PersistedState::default());
        let mut player = test_player();
        let (scan_tx, _scan_rx) = mpsc::channel();

        app.catalog = vec![track(1, "a", None, None), track(2, "b", None, None)];
        let catalog = app.catalog.clone();
        assign_sequence(&mut app, &mut player, catalog, PlayContext::Library);

        run_command(&mut app, &mut player, &scan_tx, "playlist new mix");
        app.selected = 1;
        run_command(&mut app, &mut player, &scan_tx, "playlist add mix");
        assert_eq!(app.playlists["mix"].tracks, vec![PathBuf::from("b.mp3")]);

        run_command(&mut app, &mut player, &scan_tx, "playlist play mix");
        assert_eq!(player.playlist().unwrap().len(), 1);
        assert_eq!(app.view, BrowseView::Songs);
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut app = App::from_persisted(&PersistedState::default());
        let mut player = test_player();
        let (scan_tx, _scan_rx) = mpsc::channel();
        run_command(&mut app, &mut player, &scan_tx, "wat");
        assert!(app.status.contains("Unknown command"));
    }

    #[test]
    fn songs_rows_follow_catalog_order_even_when_shuffled() {
        let mut app = App::from_persisted(&PersistedState::default());
        let mut player = test_player();
        assign_sequence(
            &mut app,
            &mut player,
            vec![
                track(1, "a", None, None),
                track(2, "b", None, None),
                track(3, "c", None, None),
            ],
            PlayContext::Library,
        );
        player.set_shuffle(true);

        let rows = app.visible_rows(&player);
        let ids: Vec<Option<u64>> = rows.iter().map(|row| row.track_id).collect();
        assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn completion_auto_advance_is_driven_by_the_pump() {
        let mut app = App::from_persisted(&PersistedState::default());
        let (engine_tx, engine_rx) = mpsc::channel();
        let mut player = Player::new(
            Box::new(crate::audio::NullEngine::new(engine_tx.clone())),
            Box::new(GrantingArbiter),
            Box::new(NullNotifier),
        );
        player.set_playlist(Playlist::from_tracks(vec![
            track(1, "a", None, None),
            track(2, "b", None, None),
        ]));

        player.play();
        pump_engine_events(&mut player, &engine_rx, &mut app);
        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(player.current_track().unwrap().id, 1);
    }
}
