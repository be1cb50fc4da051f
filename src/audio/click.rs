// Click synthesis - pre-rendered metronome clicks and a sample-accurate renderer
//
// Each click is a sine tone plus a short high-passed noise burst, each with
// its own attack/decay envelope. Clicks are rendered once per sample rate so
// the audio callback only copies and scales samples.

use super::dsp_utils::{HighPass, flush_denormals_to_zero};
use super::timing::AudioClock;
use crate::sequencer::metronome::{ClickSink, ClickType, ScheduledClick};
use rand::Rng;
use std::f32::consts::PI;

/// Level treated as silence at the end of an exponential decay
const SILENCE_LEVEL: f32 = 0.001;
/// Length of the noise burst buffer
const NOISE_BURST_SECONDS: f32 = 0.020;
/// Upper bound on clicks waiting to start (no allocation in the callback)
pub const MAX_PENDING_CLICKS: usize = 32;
/// Upper bound on clicks sounding at once
pub const MAX_ACTIVE_CLICKS: usize = 8;

/// Synthesis parameters of one click type (times in seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickTone {
    pub frequency: f32,
    pub peak: f32,
    pub attack: f32,
    /// Time at which the tone has decayed to silence and stops
    pub release: f32,
    pub noise_cutoff: f32,
    pub noise_peak: f32,
    pub noise_attack: f32,
    pub noise_release: f32,
}

impl ClickTone {
    /// Downbeat: higher, louder, longer
    pub const ACCENT: ClickTone = ClickTone {
        frequency: 1200.0,
        peak: 0.8,
        attack: 0.003,
        release: 0.100,
        noise_cutoff: 2000.0,
        noise_peak: 0.3,
        noise_attack: 0.001,
        noise_release: 0.020,
    };

    pub const REGULAR: ClickTone = ClickTone {
        frequency: 800.0,
        peak: 0.4,
        attack: 0.005,
        release: 0.080,
        noise_cutoff: 1000.0,
        noise_peak: 0.15,
        noise_attack: 0.002,
        noise_release: 0.015,
    };

    pub fn for_type(click_type: ClickType) -> Self {
        match click_type {
            ClickType::Accent => Self::ACCENT,
            ClickType::Regular => Self::REGULAR,
        }
    }

    /// Total length of the click
    pub fn duration(&self) -> f32 {
        self.release.max(self.noise_release.min(NOISE_BURST_SECONDS))
    }
}

/// Linear attack to `peak`, then exponential decay reaching silence at `release`
fn envelope(t: f32, peak: f32, attack: f32, release: f32) -> f32 {
    if t < attack {
        peak * t / attack
    } else if t < release {
        let progress = (t - attack) / (release - attack);
        peak * (SILENCE_LEVEL / peak).powf(progress)
    } else {
        0.0
    }
}

/// Pre-rendered click
#[derive(Debug, Clone)]
pub struct ClickSound {
    samples: Vec<f32>,
}

impl ClickSound {
    pub fn render<R: Rng>(tone: &ClickTone, sample_rate: f32, rng: &mut R) -> Self {
        let length = (tone.duration() * sample_rate).round() as usize;
        let noise_length = (NOISE_BURST_SECONDS * sample_rate) as usize;
        let phase_increment = 2.0 * PI * tone.frequency / sample_rate;
        let mut highpass = HighPass::new(tone.noise_cutoff, sample_rate);

        let samples = (0..length)
            .map(|i| {
                let t = i as f32 / sample_rate;
                let body = (i as f32 * phase_increment).sin()
                    * envelope(t, tone.peak, tone.attack, tone.release);

                let noise = if i < noise_length {
                    highpass.process(rng.gen_range(-1.0f32..1.0))
                        * envelope(t, tone.noise_peak, tone.noise_attack, tone.noise_release)
                } else {
                    0.0
                };

                flush_denormals_to_zero(body + noise)
            })
            .collect();

        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingClick {
    start_frame: u64,
    click_type: ClickType,
    gain: f32,
}

#[derive(Debug, Clone, Copy)]
struct ActiveClick {
    click_type: ClickType,
    gain: f32,
    position: usize,
    /// Frames to wait inside the current block before the first sample
    offset: usize,
}

/// Renders scheduled clicks against an [`AudioClock`]
///
/// Owns the synthesis clock: every call to [`render`](Self::render) advances
/// it by the number of rendered frames. A click whose time has already
/// passed starts at the beginning of the next block.
pub struct ClickRenderer {
    accent: ClickSound,
    regular: ClickSound,
    clock: AudioClock,
    pending: Vec<PendingClick>,
    active: Vec<ActiveClick>,
}

impl ClickRenderer {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_clock(AudioClock::new(sample_rate))
    }

    pub fn with_clock(clock: AudioClock) -> Self {
        let sample_rate = clock.sample_rate() as f32;
        let mut rng = rand::thread_rng();
        Self {
            accent: ClickSound::render(&ClickTone::ACCENT, sample_rate, &mut rng),
            regular: ClickSound::render(&ClickTone::REGULAR, sample_rate, &mut rng),
            clock,
            pending: Vec::with_capacity(MAX_PENDING_CLICKS),
            active: Vec::with_capacity(MAX_ACTIVE_CLICKS),
        }
    }

    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    pub fn sound(&self, click_type: ClickType) -> &ClickSound {
        match click_type {
            ClickType::Accent => &self.accent,
            ClickType::Regular => &self.regular,
        }
    }

    /// Queue a click; returns false if the queue is full
    pub fn queue(&mut self, click: ScheduledClick) -> bool {
        if self.pending.len() >= MAX_PENDING_CLICKS {
            return false;
        }
        self.pending.push(PendingClick {
            start_frame: self.clock.seconds_to_frame(click.at),
            click_type: click.click_type,
            gain: click.gain,
        });
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }

    /// Mix clicks into `out` (adds to existing content), then advance the clock
    pub fn render(&mut self, out: &mut [f32]) {
        let block_start = self.clock.current_frame();
        let block_end = block_start + out.len() as u64;

        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].start_frame < block_end {
                let click = self.pending.swap_remove(i);
                if self.active.len() < MAX_ACTIVE_CLICKS {
                    self.active.push(ActiveClick {
                        click_type: click.click_type,
                        gain: click.gain,
                        position: 0,
                        offset: click.start_frame.saturating_sub(block_start) as usize,
                    });
                }
            } else {
                i += 1;
            }
        }

        let accent = self.accent.samples();
        let regular = self.regular.samples();
        for click in &mut self.active {
            let samples = match click.click_type {
                ClickType::Accent => accent,
                ClickType::Regular => regular,
            };
            for out_sample in out.iter_mut().skip(click.offset) {
                let Some(sample) = samples.get(click.position) else {
                    break;
                };
                *out_sample += sample * click.gain;
                click.position += 1;
            }
            click.offset = 0;
        }

        let (accent_len, regular_len) = (accent.len(), regular.len());
        self.active.retain(|click| match click.click_type {
            ClickType::Accent => click.position < accent_len,
            ClickType::Regular => click.position < regular_len,
        });

        self.clock.advance(out.len());
    }
}

impl ClickSink for ClickRenderer {
    fn now(&self) -> f64 {
        self.clock.seconds()
    }

    fn schedule(&mut self, click: ScheduledClick) {
        if !self.queue(click) {
            log::warn!("Click queue full, dropping click at {:.3}s", click.at);
        }
    }
}
