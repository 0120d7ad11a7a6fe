use anyhow::{Context, Result};
use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const MAX_VOLUME: f32 = 2.5;

/// Completion callbacks from the render engine. Every event carries the
/// engine generation current when the underlying request was issued, so a
/// completion that outlived its source can be told apart from a live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Prepared { generation: u64 },
    Completed { generation: u64 },
    Error { generation: u64, message: String },
}

/// Single-track render engine. Preparation is asynchronous: `prepare`
/// returns immediately and the outcome arrives as an [`EngineEvent`] on the
/// channel the engine was built with. `start` both begins a freshly prepared
/// render and resumes a paused one.
pub trait AudioEngine {
    fn reset(&mut self);
    fn set_source(&mut self, location: &Path) -> Result<()>;
    fn prepare(&mut self);
    fn start(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    fn position(&self) -> Option<Duration>;
    fn seek_to(&mut self, position: Duration) -> Result<()>;
    fn volume(&self) -> f32;
    fn set_volume(&mut self, volume: f32);
    fn generation(&self) -> u64;
    /// Called from the owning loop's tick; posts `Completed` once the
    /// current render drains naturally.
    fn poll_completion(&mut self);
}

type DecodedSource = Decoder<BufReader<File>>;

struct PreparedSource {
    generation: u64,
    source: DecodedSource,
}

pub struct RodioEngine {
    stream: OutputStream,
    sink: Sink,
    events: Sender<EngineEvent>,
    source_path: Option<PathBuf>,
    prepared: Arc<Mutex<Option<PreparedSource>>>,
    generation: u64,
    volume: f32,
    rendering: bool,
}

impl RodioEngine {
    pub fn new(events: Sender<EngineEvent>) -> Result<Self> {
        let (stream, sink) = Self::open_output_stream()?;
        Ok(Self {
            stream,
            sink,
            events,
            source_path: None,
            prepared: Arc::new(Mutex::new(None)),
            generation: 0,
            volume: 1.0,
            rendering: false,
        })
    }

    fn open_output_stream() -> Result<(OutputStream, Sink)> {
        let mut stream = match OutputStreamBuilder::from_default_device()
            .context("failed to open default system output stream")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_stream_or_fallback()
                    .context("failed to start default output stream")
            }) {
            Ok(stream) => stream,
            Err(default_err) => {
                let host = rodio::cpal::default_host();
                let mut candidates: Vec<String> = host
                    .output_devices()
                    .ok()
                    .into_iter()
                    .flatten()
                    .filter_map(|device| device.name().ok())
                    .collect();
                candidates.sort_by_cached_key(|name| {
                    let lower = name.to_ascii_lowercase();
                    let rank = if lower.contains("pulse") {
                        0_u8
                    } else if lower.contains("pipewire") {
                        1_u8
                    } else if lower.contains("default") {
                        2_u8
                    } else {
                        3_u8
                    };
                    (rank, lower)
                });
                candidates.dedup();

                let mut started: Option<OutputStream> = None;
                for candidate in candidates {
                    let device = match host
                        .output_devices()
                        .ok()
                        .into_iter()
                        .flatten()
                        .find(|entry| entry.name().ok().as_deref() == Some(candidate.as_str()))
                    {
                        Some(device) => device,
                        None => continue,
                    };
                    let opened = OutputStreamBuilder::from_device(device)
                        .context("failed to open fallback output device")
                        .and_then(|builder| {
                            builder
                                .with_error_callback(|_| {})
                                .open_stream_or_fallback()
                                .context("failed to start fallback output stream")
                        });
                    if let Ok(stream) = opened {
                        started = Some(stream);
                        break;
                    }
                }

                started.with_context(|| {
                    format!(
                        "unable to start any audio output stream after default failed: {default_err:#}"
                    )
                })?
            }
        };
        stream.log_on_drop(false);
        let sink = Sink::connect_new(stream.mixer());
        Ok((stream, sink))
    }

    fn post(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

impl AudioEngine for RodioEngine {
    fn reset(&mut self) {
        self.generation += 1;
        self.sink.stop();
        if let Ok(mut slot) = self.prepared.lock() {
            slot.take();
        }
        self.source_path = None;
        self.rendering = false;
    }

    fn set_source(&mut self, location: &Path) -> Result<()> {
        // Open eagerly so a bad location fails here instead of surfacing
        // later as an asynchronous prepare error.
        File::open(location)
            .with_context(|| format!("failed to open track {}", location.display()))?;
        self.source_path = Some(location.to_path_buf());
        Ok(())
    }

    fn prepare(&mut self) {
        let Some(path) = self.source_path.clone() else {
            self.post(EngineEvent::Error {
                generation: self.generation,
                message: String::from("prepare requested with no source set"),
            });
            return;
        };

        let generation = self.generation;
        let slot = Arc::clone(&self.prepared);
        let events = self.events.clone();
        thread::spawn(move || {
            let decoded = File::open(&path)
                .with_context(|| format!("failed to open track {}", path.display()))
                .and_then(|file| {
                    Decoder::try_from(file)
                        .with_context(|| format!("failed to decode {}", path.display()))
                });
            match decoded {
                Ok(source) => {
                    if let Ok(mut prepared) = slot.lock() {
                        *prepared = Some(PreparedSource { generation, source });
                    }
                    let _ = events.send(EngineEvent::Prepared { generation });
                }
                Err(err) => {
                    let _ = events.send(EngineEvent::Error {
                        generation,
                        message: format!("{err:#}"),
                    });
                }
            }
        });
    }

    fn start(&mut self) {
        if self.rendering {
            self.sink.play();
            return;
        }

        let prepared = self.prepared.lock().ok().and_then(|mut slot| slot.take());
        let Some(prepared) = prepared else {
            return;
        };
        if prepared.generation != self.generation {
            log::debug!("discarding prepared source from superseded generation");
            return;
        }

        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.append(prepared.source);
        self.sink.set_volume(self.volume);
        self.rendering = true;
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn stop(&mut self) {
        self.sink.stop();
        self.rendering = false;
    }

    fn position(&self) -> Option<Duration> {
        if !self.rendering {
            return None;
        }
        Some(self.sink.get_pos())
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if !self.rendering {
            return Err(anyhow::anyhow!("no active track"));
        }
        self.sink
            .try_seek(position)
            .map_err(|err| anyhow::anyhow!("failed to seek current track: {err:?}"))
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
        self.sink.set_volume(self.volume);
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn poll_completion(&mut self) {
        if self.rendering && !self.sink.is_paused() && self.sink.empty() {
            self.rendering = false;
            self.post(EngineEvent::Completed {
                generation: self.generation,
            });
        }
    }
}

/// Engine used when no output device can be opened, and by tests. Renders
/// nothing; the playhead is a wall clock capped at the decoded duration, and
/// completion fires once a known duration elapses.
pub struct NullEngine {
    events: Sender<EngineEvent>,
    source_path: Option<PathBuf>,
    paused: bool,
    rendering: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    generation: u64,
    volume: f32,
}

impl NullEngine {
    pub fn new(events: Sender<EngineEvent>) -> Self {
        Self {
            events,
            source_path: None,
            paused: false,
            rendering: false,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            generation: 0,
            volume: 1.0,
        }
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.rendering
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }
}

impl AudioEngine for NullEngine {
    fn reset(&mut self) {
        self.generation += 1;
        self.source_path = None;
        self.paused = false;
        self.rendering = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
    }

    fn set_source(&mut self, location: &Path) -> Result<()> {
        self.source_path = Some(location.to_path_buf());
        Ok(())
    }

    fn prepare(&mut self) {
        let generation = self.generation;
        if self.source_path.is_none() {
            let _ = self.events.send(EngineEvent::Error {
                generation,
                message: String::from("prepare requested with no source set"),
            });
            return;
        }
        self.track_duration = self
            .source_path
            .as_deref()
            .and_then(Self::estimate_duration);
        let _ = self.events.send(EngineEvent::Prepared { generation });
    }

    fn start(&mut self) {
        if self.rendering {
            if self.paused {
                self.paused = false;
                self.started_at = Some(Instant::now());
            }
            return;
        }
        self.rendering = true;
        self.paused = false;
        self.started_at = Some(Instant::now());
        self.position_offset = Duration::ZERO;
    }

    fn pause(&mut self) {
        if self.rendering && !self.paused {
            self.position_offset = self.current_position();
            self.started_at = None;
            self.paused = true;
        }
    }

    fn stop(&mut self) {
        self.rendering = false;
        self.paused = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
    }

    fn position(&self) -> Option<Duration> {
        if !self.rendering {
            return None;
        }
        Some(self.current_position())
    }

    fn seek_to(&mut self, position: Duration) -> Result<()> {
        if !self.rendering {
            return Err(anyhow::anyhow!("no active track"));
        }
        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = if self.paused {
            None
        } else {
            Some(Instant::now())
        };
        Ok(())
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, MAX_VOLUME);
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn poll_completion(&mut self) {
        let Some(duration) = self.track_duration else {
            return;
        };
        if self.rendering && !self.paused && self.current_position() >= duration {
            self.rendering = false;
            let _ = self.events.send(EngineEvent::Completed {
                generation: self.generation,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AudioEngine, EngineEvent, NullEngine};
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn write_test_wav(path: &Path, duration_ms: u32) {
        let sample_rate: u32 = 44_100;
        let channels: u16 = 1;
        let bits_per_sample: u16 = 16;
        let bytes_per_sample = u32::from(bits_per_sample / 8);
        let total_samples = (u64::from(sample_rate) * u64::from(duration_ms) / 1_000) as u32;
        let data_size = total_samples * u32::from(channels) * bytes_per_sample;
        let byte_rate = sample_rate * u32::from(channels) * bytes_per_sample;
        let block_align = channels * (bits_per_sample / 8);
        let riff_chunk_size = 36_u32.saturating_add(data_size);

        let mut bytes = Vec::with_capacity((44_u32 + data_size) as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&riff_chunk_size.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&bits_per_sample.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_size.to_le_bytes());
        bytes.resize((44_u32 + data_size) as usize, 0_u8);

        fs::write(path, bytes).expect("wav fixture should be written");
    }

    #[test]
    fn prepare_posts_a_prepared_event() {
        let (tx, rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine
            .set_source(Path::new("nonexistent-track.flac"))
            .expect("null engine accepts any source");
        engine.prepare();
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Prepared { generation: 0 });
    }

    #[test]
    fn prepare_without_a_source_posts_an_error() {
        let (tx, rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine.prepare();
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::Error { generation: 0, .. }
        ));
    }

    #[test]
    fn reset_bumps_the_generation() {
        let (tx, _rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        assert_eq!(engine.generation(), 0);
        engine.reset();
        engine.reset();
        assert_eq!(engine.generation(), 2);
    }

    #[test]
    fn position_advances_while_rendering() {
        let (tx, _rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine.set_source(Path::new("track.flac")).unwrap();
        engine.prepare();
        engine.start();
        let before = engine.position().expect("position should be present");
        thread::sleep(Duration::from_millis(20));
        let after = engine.position().expect("position should be present");
        assert!(after > before, "position should advance while rendering");
    }

    #[test]
    fn pause_freezes_and_start_resumes_the_position() {
        let (tx, _rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine.set_source(Path::new("track.flac")).unwrap();
        engine.prepare();
        engine.start();
        thread::sleep(Duration::from_millis(20));

        engine.pause();
        let paused = engine.position().expect("position should be present");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.position().unwrap(), paused, "paused position should freeze");

        engine.start();
        thread::sleep(Duration::from_millis(20));
        assert!(engine.position().unwrap() > paused, "position should continue after resume");
    }

    #[test]
    fn seek_moves_the_logical_position() {
        let (tx, _rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine.set_source(Path::new("track.flac")).unwrap();
        engine.prepare();
        engine.start();

        let target = Duration::from_secs(12);
        engine.seek_to(target).expect("seek should succeed");
        assert!(engine.position().unwrap() >= target);
    }

    #[test]
    fn seek_without_an_active_track_fails() {
        let (tx, _rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        assert!(engine.seek_to(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn known_duration_render_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let track = dir.path().join("fixture.wav");
        write_test_wav(&track, 80);

        let (tx, rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine.set_source(&track).unwrap();
        engine.prepare();
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Prepared { generation: 0 });
        engine.start();

        thread::sleep(Duration::from_millis(120));
        engine.poll_completion();
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Completed { generation: 0 });
        assert!(engine.position().is_none(), "completed render is no longer active");
    }

    #[test]
    fn unknown_duration_render_does_not_complete_on_its_own() {
        let (tx, rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine.set_source(Path::new("nonexistent-track.flac")).unwrap();
        engine.prepare();
        rx.try_recv().expect("prepared event");
        engine.start();

        thread::sleep(Duration::from_millis(40));
        engine.poll_completion();
        assert!(rx.try_recv().is_err(), "no completion without a known duration");
    }

    #[test]
    fn stop_while_prepared_is_safe() {
        let (tx, rx) = mpsc::channel();
        let mut engine = NullEngine::new(tx);
        engine.set_source(Path::new("track.flac")).unwrap();
        engine.prepare();
        engine.stop();
        engine.poll_completion();
        // Only the prepared event is ever posted.
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Prepared { generation: 0 });
        assert!(rx.try_recv().is_err());
    }
}
