// Audio Export - Offline rendering of the practice mix to WAV
//
// Runs a complete practice session faster than real time: the session is
// ticked once per block, exactly as a frame callback would, and the click
// renderer's clock advances with the rendered frames. The file therefore
// contains what a live session would have played, click latency included.

use super::buffer_transport::BufferTransport;
use super::click::ClickRenderer;
use super::dsp_utils::{flush_denormals_to_zero, soft_clip};
use super::loader::TrackBuffer;
use crate::project::settings::MemoryStore;
use crate::project::{Song, SongError};
use crate::sequencer::transport::{AudioTransport, ManualTransport};
use crate::session::PracticeSession;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Invalid duration: must be > 0, got {0}")]
    InvalidDuration(f64),

    #[error("Unsupported bit depth {0} (use 16 or 24)")]
    UnsupportedBitDepth(u16),

    #[error("Invalid channel count {0}")]
    InvalidChannels(u16),

    #[error(transparent)]
    Song(#[from] SongError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Audio export settings
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Sample rate (Hz)
    pub sample_rate: u32,
    /// Bit depth (16 or 24)
    pub bit_depth: u16,
    /// Number of channels (1=mono, 2=stereo)
    pub channels: u16,
    /// Mix the song audio under the click
    pub include_track: bool,
    /// Frames rendered per session tick
    pub block_frames: usize,
    pub offset_ms: f64,
    pub track_volume: f32,
    pub click_volume: f32,
    /// Scales both the track and the click
    pub master_volume: f32,
    /// Loop between these two bars (inclusive) instead of playing through
    pub loop_bars: Option<(usize, usize)>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            bit_depth: 16,
            channels: 2,
            include_track: true,
            block_frames: 64,
            offset_ms: 0.0,
            track_volume: 1.0,
            click_volume: 0.3,
            master_volume: 1.0,
            loop_bars: None,
        }
    }
}

/// Result of an export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportSummary {
    pub frames_written: u64,
    pub clicks: usize,
    pub duration: f64,
}

/// Progress callback for export (reports 0.0 to 1.0)
pub type ProgressCallback = Box<dyn FnMut(f32) + Send>;

type Writer = WavWriter<BufWriter<File>>;

/// Offline renderer
pub struct AudioExporter {
    settings: ExportSettings,
}

impl AudioExporter {
    pub fn new(settings: ExportSettings) -> Self {
        Self { settings }
    }

    /// Render `song` to `output_path`
    ///
    /// Without an explicit `duration`, renders the length of the track, or
    /// up to the end of the last bar when there is no track.
    pub fn export(
        &self,
        song: &Song,
        track: Option<TrackBuffer>,
        output_path: &Path,
        duration: Option<f64>,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ExportSummary, ExportError> {
        let settings = &self.settings;
        if settings.bit_depth != 16 && settings.bit_depth != 24 {
            return Err(ExportError::UnsupportedBitDepth(settings.bit_depth));
        }
        if settings.channels == 0 {
            return Err(ExportError::InvalidChannels(settings.channels));
        }

        let sample_rate = settings.sample_rate.max(1);
        let clicks = ClickRenderer::new(sample_rate);

        let total_duration = match (duration, track.as_ref()) {
            (Some(duration), _) => duration,
            (None, Some(track)) => track.duration(),
            (None, None) => {
                let timing: PracticeSession<ManualTransport, ClickRenderer> =
                    PracticeSession::new(song.clone(), None, None, Box::new(MemoryStore::new()))?;
                timing.bars().last().map_or(0.0, |bar| bar.end)
            }
        };
        if !(total_duration.is_finite() && total_duration > 0.0) {
            return Err(ExportError::InvalidDuration(total_duration));
        }
        let total_frames = (total_duration * sample_rate as f64).round() as u64;

        log::info!(
            "Exporting {:.2}s ({} frames) at {} Hz to {}",
            total_duration,
            total_frames,
            sample_rate,
            output_path.display()
        );

        let spec = WavSpec {
            channels: settings.channels,
            sample_rate,
            bits_per_sample: settings.bit_depth,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(output_path, spec)?;

        let summary = match track {
            Some(track) if settings.include_track => {
                let (transport, mut reader) = BufferTransport::new(track, sample_rate);
                let mut session = self.session(song, transport, clicks)?;
                self.render(
                    &mut session,
                    writer,
                    total_frames,
                    |_, block| reader.render(block),
                    progress_callback,
                )?
            }
            _ => {
                let seconds_per_frame = 1.0 / sample_rate as f64;
                let mut session = self.session(song, ManualTransport::new(None), clicks)?;
                self.render(
                    &mut session,
                    writer,
                    total_frames,
                    |transport, block| transport.advance(block.len() as f64 * seconds_per_frame),
                    progress_callback,
                )?
            }
        };

        log::info!(
            "Export complete: {} frames, {} clicks",
            summary.frames_written,
            summary.clicks
        );
        Ok(summary)
    }

    fn session<T: AudioTransport>(
        &self,
        song: &Song,
        transport: T,
        clicks: ClickRenderer,
    ) -> Result<PracticeSession<T, ClickRenderer>, ExportError> {
        let mut session = PracticeSession::new(
            song.clone(),
            Some(transport),
            Some(clicks),
            Box::new(MemoryStore::new()),
        )?;
        session.set_metronome_enabled(true);
        session.adjust_offset(self.settings.offset_ms);
        session.set_track_volume(self.settings.track_volume);
        session.set_click_volume(self.settings.click_volume);
        session.set_master_volume(self.settings.master_volume);
        if let Some((first, last)) = self.settings.loop_bars {
            session.handle_bar_click(first);
            session.handle_bar_click(last);
        }
        session.play();
        Ok(session)
    }

    /// Tick, render the track through `play_track`, add the clicks, write
    fn render<T, F>(
        &self,
        session: &mut PracticeSession<T, ClickRenderer>,
        mut writer: Writer,
        total_frames: u64,
        mut play_track: F,
        mut progress_callback: Option<ProgressCallback>,
    ) -> Result<ExportSummary, ExportError>
    where
        T: AudioTransport,
        F: FnMut(&mut T, &mut [f32]),
    {
        let sample_rate = self.settings.sample_rate.max(1);
        let block_frames = self.settings.block_frames.max(1);
        let progress_interval = sample_rate as u64;

        let mut scratch = vec![0.0f32; block_frames];
        let mut frames_written: u64 = 0;
        let mut clicks = 0;
        let mut next_progress = progress_interval;

        while frames_written < total_frames {
            let frames = block_frames.min((total_frames - frames_written) as usize);
            let block = &mut scratch[..frames];
            block.fill(0.0);

            let now = frames_written as f64 / sample_rate as f64;
            if let Some(report) = session.tick(now)
                && report.click.is_some()
            {
                clicks += 1;
            }

            if let Some(transport) = session.clock_mut().transport_mut() {
                play_track(transport, block);
            }
            if let Some(renderer) = session.metronome_mut().sink_mut() {
                renderer.render(block);
            }

            for sample in block.iter() {
                self.write_frame(&mut writer, soft_clip(flush_denormals_to_zero(*sample)))?;
            }

            frames_written += frames as u64;
            if frames_written >= next_progress {
                next_progress += progress_interval;
                if let Some(callback) = progress_callback.as_mut() {
                    callback(frames_written as f32 / total_frames as f32);
                }
            }
        }

        writer.finalize()?;
        if let Some(callback) = progress_callback.as_mut() {
            callback(1.0);
        }

        Ok(ExportSummary {
            frames_written,
            clicks,
            duration: frames_written as f64 / sample_rate as f64,
        })
    }

    fn write_frame(&self, writer: &mut Writer, sample: f32) -> Result<(), ExportError> {
        for _ in 0..self.settings.channels {
            if self.settings.bit_depth == 24 {
                writer.write_sample((sample * 8_388_607.0) as i32)?;
            } else {
                writer.write_sample((sample * i16::MAX as f32) as i16)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::timeline::TimeSignature;
    use hound::WavReader;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn song() -> Song {
        Song {
            tempo: 120.0,
            time_signature: TimeSignature::four_four(),
            bars: vec![0.0, 2000.0],
        }
    }

    fn mono_settings() -> ExportSettings {
        ExportSettings {
            sample_rate: 8000,
            channels: 1,
            ..ExportSettings::default()
        }
    }

    fn read_samples(path: &Path) -> Vec<i16> {
        WavReader::open(path)
            .unwrap()
            .samples::<i16>()
            .map(|s| s.unwrap())
            .collect()
    }

    #[test]
    fn test_export_settings_default() {
        let settings = ExportSettings::default();
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.bit_depth, 16);
        assert_eq!(settings.channels, 2);
        assert_eq!(settings.click_volume, 0.3);
    }

    #[test]
    fn test_click_track_covers_song() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clicks.wav");

        let exporter = AudioExporter::new(mono_settings());
        let summary = exporter.export(&song(), None, &path, None, None).unwrap();

        // Two bars of 4/4 at 120 BPM
        assert_eq!(summary.frames_written, 32000);
        assert_eq!(summary.clicks, 8);

        let samples = read_samples(&path);
        assert_eq!(samples.len(), 32000);
        // First click lands 10ms after the start
        assert!(samples[..80].iter().all(|s| *s == 0));
        assert!(samples[80..400].iter().any(|s| *s != 0));
    }

    #[test]
    fn test_track_is_mixed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        let settings = ExportSettings {
            click_volume: 0.0,
            ..mono_settings()
        };
        let track = TrackBuffer::new(vec![0.25; 8000], 8000);

        let exporter = AudioExporter::new(settings);
        let summary = exporter
            .export(&song(), Some(track), &path, Some(1.5), None)
            .unwrap();
        assert_eq!(summary.frames_written, 12000);

        let samples = read_samples(&path);
        let expected = (0.25f32.tanh() * i16::MAX as f32) as i16;
        assert!((samples[100] - expected).abs() <= 1);
        assert!((samples[7000] - expected).abs() <= 1);
        assert!(samples[8100..].iter().all(|s| *s == 0));
    }

    #[test]
    fn test_master_volume_scales_mix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.wav");
        let settings = ExportSettings {
            click_volume: 0.0,
            master_volume: 0.5,
            ..mono_settings()
        };
        let track = TrackBuffer::new(vec![0.5; 8000], 8000);

        AudioExporter::new(settings)
            .export(&song(), Some(track), &path, Some(1.0), None)
            .unwrap();

        let samples = read_samples(&path);
        let expected = (0.25f32.tanh() * i16::MAX as f32) as i16;
        assert!((samples[100] - expected).abs() <= 1);
        assert!((samples[7000] - expected).abs() <= 1);

        // Click peaks follow the master too
        let loud_path = dir.path().join("loud.wav");
        let quiet_path = dir.path().join("quiet.wav");
        AudioExporter::new(mono_settings())
            .export(&song(), None, &loud_path, Some(1.0), None)
            .unwrap();
        AudioExporter::new(ExportSettings {
            master_volume: 0.5,
            ..mono_settings()
        })
        .export(&song(), None, &quiet_path, Some(1.0), None)
        .unwrap();

        let peak = |path: &Path| read_samples(path).iter().map(|s| s.unsigned_abs()).max().unwrap();
        let loud = peak(&loud_path);
        let quiet = peak(&quiet_path);
        assert!(quiet > 0);
        assert!(quiet < loud);
        assert!((quiet as f32) < loud as f32 * 0.6);
    }

    #[test]
    fn test_stereo_24_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let settings = ExportSettings {
            sample_rate: 8000,
            bit_depth: 24,
            ..ExportSettings::default()
        };
        AudioExporter::new(settings)
            .export(&song(), None, &path, Some(0.5), None)
            .unwrap();

        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().bits_per_sample, 24);
        assert_eq!(reader.len(), 8000);
    }

    #[test]
    fn test_progress_reaches_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.wav");
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);

        AudioExporter::new(mono_settings())
            .export(
                &song(),
                None,
                &path,
                Some(2.0),
                Some(Box::new(move |p: f32| sink.lock().unwrap().push(p))),
            )
            .unwrap();

        let reports = reports.lock().unwrap();
        assert!(reports.len() >= 2);
        assert_eq!(reports.last(), Some(&1.0));
    }

    #[test]
    fn test_invalid_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.wav");

        let result = AudioExporter::new(mono_settings()).export(&song(), None, &path, Some(0.0), None);
        assert!(matches!(result, Err(ExportError::InvalidDuration(_))));

        let settings = ExportSettings {
            bit_depth: 12,
            ..mono_settings()
        };
        let result = AudioExporter::new(settings).export(&song(), None, &path, None, None);
        assert!(matches!(result, Err(ExportError::UnsupportedBitDepth(12))));
    }
}
