// Track loader - decode the song's audio into a mono buffer
//
// WAV goes through hound, FLAC through claxon. Multi-channel audio is
// averaged down to mono; the engine plays the track on every output channel.

use claxon::FlacReader;
use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Unsupported file format: '{0}'")]
    UnsupportedFormat(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("FLAC error: {0}")]
    Flac(#[from] claxon::Error),

    #[error("Audio file contains no samples")]
    Empty,
}

/// Decoded mono track
#[derive(Debug, Clone)]
pub struct TrackBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl TrackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Linear-interpolated sample at a fractional frame position
    #[inline]
    pub fn sample_at(&self, frame: f64) -> f32 {
        if frame < 0.0 {
            return 0.0;
        }
        let index = frame as usize;
        let Some(&a) = self.samples.get(index) else {
            return 0.0;
        };
        let b = self.samples.get(index + 1).copied().unwrap_or(0.0);
        let fraction = (frame - index as f64) as f32;
        a + (b - a) * fraction
    }
}

/// Load a WAV or FLAC file, chosen by extension
pub fn load_track(path: &Path) -> Result<TrackBuffer, LoadError> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    let track = match extension.as_str() {
        "wav" => load_wav(path)?,
        "flac" => load_flac(path)?,
        _ => return Err(LoadError::UnsupportedFormat(extension)),
    };

    if track.is_empty() {
        return Err(LoadError::Empty);
    }
    log::info!(
        "Loaded {}: {:.2}s at {} Hz",
        path.display(),
        track.duration(),
        track.sample_rate()
    );
    Ok(track)
}

fn load_wav(path: &Path) -> Result<TrackBuffer, LoadError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    Ok(TrackBuffer::new(
        downmix(&interleaved, spec.channels as usize),
        spec.sample_rate,
    ))
}

fn load_flac(path: &Path) -> Result<TrackBuffer, LoadError> {
    let mut reader = FlacReader::open(path)?;
    let info = reader.streaminfo();
    let scale = (1i64 << (info.bits_per_sample.max(1) - 1)) as f32;

    let interleaved: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|s| s as f32 / scale))
        .collect::<Result<_, _>>()?;

    Ok(TrackBuffer::new(
        downmix(&interleaved, info.channels as usize),
        info.sample_rate,
    ))
}

/// Average interleaved frames down to one channel
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
