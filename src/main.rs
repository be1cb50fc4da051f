use clap::{Parser, Subcommand};
use looptrack::audio::export::{AudioExporter, ExportSettings};
use looptrack::project::settings::{JsonFileStore, MemoryStore, SettingsStore, keys, load_or};
use looptrack::sequencer::transport::AudioTransport;
use looptrack::{AudioEngine, PracticeSession, Song, load_track};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Control loop period (one display frame at 60 Hz)
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "looptrack")]
#[command(about = "Bar-looped practice playback with a synthesized click track", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bar table of a song
    Info {
        /// Song record (.json)
        song: PathBuf,
    },

    /// Play a song with the metronome
    Play {
        /// Song record (.json)
        song: PathBuf,

        /// Song audio (.wav or .flac)
        audio: PathBuf,

        /// Loop between two bars (numbered from 1)
        #[arg(short, long = "loop", num_args = 2, value_names = ["FIRST", "LAST"],
              value_parser = clap::value_parser!(u32).range(1..))]
        loop_bars: Option<Vec<u32>>,

        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<f64>,

        /// Play without the metronome
        #[arg(long)]
        no_click: bool,
    },

    /// Render the click track (optionally with the song audio) to WAV
    Click {
        /// Song record (.json)
        song: PathBuf,

        /// Output WAV file path
        output: PathBuf,

        /// Song audio to mix under the click
        #[arg(short, long)]
        track: Option<PathBuf>,

        /// Loop between two bars (numbered from 1); needs --seconds
        #[arg(short, long = "loop", num_args = 2, value_names = ["FIRST", "LAST"],
              value_parser = clap::value_parser!(u32).range(1..), requires = "seconds")]
        loop_bars: Option<Vec<u32>>,

        /// Duration in seconds (default: the track, or the last bar)
        #[arg(short, long)]
        seconds: Option<f64>,

        /// Sample rate in Hz
        #[arg(short, long, default_value = "44100")]
        rate: u32,

        /// Write a single channel
        #[arg(long)]
        mono: bool,

        /// Click offset in milliseconds (default: the saved offset)
        #[arg(short, long, allow_hyphen_values = true)]
        offset: Option<f64>,
    },
}

/// 1-based bar numbers from the command line to bar indices
fn loop_indices(bars: Option<&[u32]>) -> Option<(usize, usize)> {
    match bars? {
        [first, last] => Some((*first as usize - 1, *last as usize - 1)),
        _ => None,
    }
}

/// Settings live in the user config dir; fall back to memory if it is unavailable
fn open_settings() -> Box<dyn SettingsStore> {
    let Some(path) = JsonFileStore::default_path() else {
        log::warn!("No config directory, settings will not be saved");
        return Box::new(MemoryStore::new());
    };
    match JsonFileStore::open(&path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            log::warn!("Cannot open settings {}: {}", path.display(), e);
            Box::new(MemoryStore::new())
        }
    }
}

fn info(song_path: &Path) -> Result<(), Box<dyn Error>> {
    let song = Song::load(song_path)?;
    let session: PracticeSession<looptrack::ManualTransport, looptrack::ClickRenderer> =
        PracticeSession::new(song, None, None, Box::new(MemoryStore::new()))?;

    println!("{}", song_path.display());
    println!(
        "   - Tempo: {} ({:.3}s per beat)",
        session.tempo(),
        session.tempo().beat_duration_seconds()
    );
    println!("   - Time signature: {}", session.song().time_signature);
    println!("   - Bars: {}", session.bars().len());
    println!("   - Beats: {}", session.beat_timing().timeline().len());
    println!();
    println!("  Bar     Start       End   Beat");
    for bar in session.bars() {
        println!(
            "{:>5} {:>8.3}s {:>8.3}s {:>6.3}s",
            bar.index + 1,
            bar.start,
            bar.end,
            bar.beat_duration
        );
    }
    Ok(())
}

/// Export settings from the command line, falling back to the user's saved mix and offset
fn export_settings(
    store: &dyn SettingsStore,
    rate: u32,
    mono: bool,
    offset: Option<f64>,
    include_track: bool,
    loop_bars: Option<(usize, usize)>,
) -> ExportSettings {
    let defaults = ExportSettings::default();
    ExportSettings {
        sample_rate: rate,
        channels: if mono { 1 } else { 2 },
        include_track,
        offset_ms: offset.unwrap_or_else(|| load_or(store, keys::METRONOME_OFFSET_MS, 0.0)),
        track_volume: load_or(store, keys::VOLUME_TRACK, defaults.track_volume),
        click_volume: load_or(store, keys::VOLUME_CLICK, defaults.click_volume),
        master_volume: load_or(store, keys::VOLUME_MASTER, defaults.master_volume),
        loop_bars,
        ..defaults
    }
}

fn click(
    song_path: &Path,
    output: &Path,
    track_path: Option<&Path>,
    settings: ExportSettings,
    seconds: Option<f64>,
) -> Result<(), Box<dyn Error>> {
    let song = Song::load(song_path)?;
    let track = track_path.map(load_track).transpose()?;

    let exporter = AudioExporter::new(settings);
    let summary = exporter.export(
        &song,
        track,
        output,
        seconds,
        Some(Box::new(|progress: f32| log::debug!("Export {:.0}%", progress * 100.0))),
    )?;

    println!(
        "Wrote {} ({:.2}s, {} clicks)",
        output.display(),
        summary.duration,
        summary.clicks
    );
    Ok(())
}

fn play(
    song_path: &Path,
    audio_path: &Path,
    loop_bars: Option<(usize, usize)>,
    seconds: Option<f64>,
    no_click: bool,
) -> Result<(), Box<dyn Error>> {
    let song = Song::load(song_path)?;
    let track = load_track(audio_path)?;

    let (engine, transport, clicks) = AudioEngine::start(Some(track))?;
    let mut session = PracticeSession::new(song, transport, Some(clicks), open_settings())?;
    if no_click {
        session.set_metronome_enabled(false);
    } else if !session.metronome().is_enabled() {
        session.set_metronome_enabled(true);
    }

    if let Some((first, last)) = loop_bars {
        session.handle_bar_click(first);
        session.handle_bar_click(last);
        match session.loop_region() {
            Some(region) => println!(
                "Looping bars {}-{} ({:.3}s - {:.3}s)",
                first + 1,
                last + 1,
                region.start_time,
                region.end_time
            ),
            None => log::warn!("Loop bars out of range, playing through"),
        }
    }

    let volumes = session.volumes();
    println!(
        "Playing {} at {} (track {:.2}, click {:.2}, master {:.2}, offset {:+.0}ms)",
        audio_path.display(),
        session.tempo(),
        volumes.track,
        volumes.click,
        volumes.master,
        session.metronome().manual_offset_ms()
    );

    let started = Instant::now();
    session.play();

    loop {
        std::thread::sleep(FRAME_INTERVAL);
        let now = started.elapsed().as_secs_f64();

        if engine.has_failed() {
            return Err("Audio stream failed".into());
        }
        if let Some(limit) = seconds
            && now >= limit
        {
            session.pause();
            break;
        }

        let Some(report) = session.tick(now) else {
            continue;
        };
        if report.clock.ended {
            println!("End of track");
            break;
        }
        if report.beat_changed {
            println!(
                "bar {:>3}  beat {}  {:>8.3}s",
                report.beat.measure, report.beat.beat_number, report.clock.position
            );
        }
    }

    if let Some(transport) = session.clock().transport() {
        log::info!("Stopped at {:.3}s", transport.current_time());
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Info { song } => info(&song),
        Commands::Play {
            song,
            audio,
            loop_bars,
            seconds,
            no_click,
        } => play(
            &song,
            &audio,
            loop_indices(loop_bars.as_deref()),
            seconds,
            no_click,
        ),
        Commands::Click {
            song,
            output,
            track,
            loop_bars,
            seconds,
            rate,
            mono,
            offset,
        } => {
            let store = open_settings();
            let settings = export_settings(
                store.as_ref(),
                rate,
                mono,
                offset,
                track.is_some(),
                loop_indices(loop_bars.as_deref()),
            );
            click(&song, &output, track.as_deref(), settings, seconds)
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use looptrack::project::settings::save;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_click() {
        let cli = Cli::try_parse_from([
            "looptrack", "click", "song.json", "out.wav", "--loop", "2", "3", "--seconds", "8.5",
            "--mono", "--offset", "-20",
        ])
        .unwrap();

        let Commands::Click {
            output,
            loop_bars,
            seconds,
            rate,
            mono,
            offset,
            track,
            ..
        } = cli.command
        else {
            panic!("expected the click command");
        };
        assert_eq!(output, PathBuf::from("out.wav"));
        assert_eq!(loop_indices(loop_bars.as_deref()), Some((1, 2)));
        assert_eq!(seconds, Some(8.5));
        assert_eq!(rate, 44100);
        assert!(mono);
        assert_eq!(offset, Some(-20.0));
        assert!(track.is_none());
    }

    #[test]
    fn test_parse_play() {
        let cli = Cli::try_parse_from(["looptrack", "play", "song.json", "song.wav", "--no-click"])
            .unwrap();
        let Commands::Play {
            audio,
            loop_bars,
            no_click,
            ..
        } = cli.command
        else {
            panic!("expected the play command");
        };
        assert_eq!(audio, PathBuf::from("song.wav"));
        assert!(loop_bars.is_none());
        assert!(no_click);
    }

    #[test]
    fn test_parse_errors() {
        let fails = |args: &[&str]| {
            let mut argv = vec!["looptrack"];
            argv.extend_from_slice(args);
            Cli::try_parse_from(argv).is_err()
        };

        // Bars are numbered from 1
        assert!(fails(&["play", "s.json", "a.wav", "--loop", "0", "2"]));
        // --loop takes two bars
        assert!(fails(&["play", "s.json", "a.wav", "--loop", "2"]));
        // Exporting a loop needs a duration
        assert!(fails(&["click", "s.json", "o.wav", "--loop", "1", "2"]));
        assert!(fails(&["click", "s.json", "o.wav", "--rate", "fast"]));
        assert!(fails(&["info"]));
        assert!(!fails(&["info", "s.json"]));
    }

    #[test]
    fn test_export_settings_use_saved_mix() {
        let mut store = MemoryStore::new();
        save(&mut store, keys::VOLUME_CLICK, &0.6f32);
        save(&mut store, keys::VOLUME_MASTER, &0.5f32);
        save(&mut store, keys::METRONOME_OFFSET_MS, &-15.0f64);

        let settings = export_settings(&store, 48000, true, None, false, Some((0, 1)));
        assert_eq!(settings.sample_rate, 48000);
        assert_eq!(settings.channels, 1);
        assert_eq!(settings.click_volume, 0.6);
        assert_eq!(settings.master_volume, 0.5);
        assert_eq!(settings.track_volume, 1.0);
        assert_eq!(settings.offset_ms, -15.0);
        assert_eq!(settings.loop_bars, Some((0, 1)));

        let settings = export_settings(&store, 44100, false, Some(30.0), true, None);
        assert_eq!(settings.offset_ms, 30.0);
        assert_eq!(settings.channels, 2);
    }
}
