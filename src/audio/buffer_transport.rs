// Buffer transport - AudioTransport over a decoded track played by the audio thread
//
// The control side (`BufferTransport`) and the audio side (`TrackReader`)
// share a playhead made of atomics. Seeks travel through a mailbox so the
// audio thread never overwrites a seek with a stale position.

use super::dsp_utils::OnePoleSmoother;
use super::loader::TrackBuffer;
use super::mixer::AtomicF32;
use crate::sequencer::transport::{AudioTransport, TransportEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Empty seek mailbox (a NaN bit pattern, never a valid position)
const NO_SEEK: u64 = u64::MAX;

#[derive(Debug)]
struct PlayheadState {
    /// Position in seconds (f64 bits), published by the audio thread
    position: AtomicU64,
    /// Requested position in seconds (f64 bits), or NO_SEEK
    pending_seek: AtomicU64,
    playing: AtomicBool,
    /// Set by the audio thread once it rendered a block while playing
    audible: AtomicBool,
    /// Set by the audio thread when the track ran out
    ended: AtomicBool,
}

/// Playhead shared between the control and audio threads
#[derive(Debug, Clone)]
pub struct SharedPlayhead {
    state: Arc<PlayheadState>,
    volume: AtomicF32,
}

impl SharedPlayhead {
    fn new() -> Self {
        Self {
            state: Arc::new(PlayheadState {
                position: AtomicU64::new(0.0f64.to_bits()),
                pending_seek: AtomicU64::new(NO_SEEK),
                playing: AtomicBool::new(false),
                audible: AtomicBool::new(false),
                ended: AtomicBool::new(false),
            }),
            volume: AtomicF32::new(1.0),
        }
    }

    /// Current position, a pending seek taking precedence
    pub fn seconds(&self) -> f64 {
        let pending = self.state.pending_seek.load(Ordering::Acquire);
        if pending != NO_SEEK {
            return f64::from_bits(pending);
        }
        f64::from_bits(self.state.position.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.state.playing.load(Ordering::Acquire)
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }
}

/// Control-side transport
pub struct BufferTransport {
    playhead: SharedPlayhead,
    duration: f64,
    events: VecDeque<TransportEvent>,
    awaiting_audible: bool,
}

impl BufferTransport {
    /// Create the transport and the reader to hand to the audio thread
    pub fn new(track: TrackBuffer, output_sample_rate: u32) -> (Self, TrackReader) {
        let playhead = SharedPlayhead::new();
        let transport = Self {
            playhead: playhead.clone(),
            duration: track.duration(),
            events: VecDeque::new(),
            awaiting_audible: false,
        };
        let reader = TrackReader::new(track, playhead, output_sample_rate);
        (transport, reader)
    }

    pub fn playhead(&self) -> &SharedPlayhead {
        &self.playhead
    }
}

impl AudioTransport for BufferTransport {
    fn current_time(&self) -> f64 {
        self.playhead.seconds()
    }

    fn seek(&mut self, time: f64) {
        let time = time.clamp(0.0, self.duration);
        let state = &self.playhead.state;
        state.position.store(time.to_bits(), Ordering::Release);
        state.pending_seek.store(time.to_bits(), Ordering::Release);
    }

    fn request_play(&mut self) {
        if self.current_time() >= self.duration {
            self.seek(0.0);
        }
        let state = &self.playhead.state;
        state.ended.store(false, Ordering::Release);
        state.audible.store(false, Ordering::Release);
        state.playing.store(true, Ordering::Release);
        self.awaiting_audible = true;
        self.events.push_back(TransportEvent::PlayAccepted);
    }

    /// Stop playback at the position reported now
    ///
    /// The audio thread may still be inside a block when the flag flips;
    /// the position is pinned as a pending seek so that block is rewound
    /// and playback resumes exactly where it was reported to stop.
    fn pause(&mut self) {
        self.playhead.state.playing.store(false, Ordering::Release);
        let time = self.current_time();
        self.seek(time);
        self.awaiting_audible = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.playhead.volume.set(volume.clamp(0.0, 1.0));
    }

    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        let state = &self.playhead.state;
        if self.awaiting_audible && state.audible.load(Ordering::Acquire) {
            self.awaiting_audible = false;
            return Some(TransportEvent::Playing);
        }
        if state.ended.swap(false, Ordering::AcqRel) {
            self.awaiting_audible = false;
            return Some(TransportEvent::Ended);
        }
        None
    }
}

/// Audio-side track player
pub struct TrackReader {
    track: TrackBuffer,
    playhead: SharedPlayhead,
    /// Track frames per output frame
    step: f64,
    /// Position in track frames
    frame: f64,
    gain: OnePoleSmoother,
    was_playing: bool,
}

impl TrackReader {
    fn new(track: TrackBuffer, playhead: SharedPlayhead, output_sample_rate: u32) -> Self {
        let step = track.sample_rate() as f64 / output_sample_rate.max(1) as f64;
        Self {
            track,
            playhead,
            step,
            frame: 0.0,
            gain: OnePoleSmoother::new(1.0, 10.0, output_sample_rate.max(1) as f32),
            was_playing: false,
        }
    }

    /// Add the track into `out` (mono, one sample per output frame)
    pub fn render(&mut self, out: &mut [f32]) {
        let state = &self.playhead.state;
        let rate = self.track.sample_rate() as f64;

        let pending = state.pending_seek.load(Ordering::Acquire);
        if pending != NO_SEEK {
            let seconds = f64::from_bits(pending);
            self.frame = seconds * rate;
            state.position.store(pending, Ordering::Release);
            let _ = state.pending_seek.compare_exchange(
                pending,
                NO_SEEK,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        if !state.playing.load(Ordering::Acquire) {
            self.was_playing = false;
            return;
        }

        // Volume changes are smoothed, but a fresh start begins at the target
        let volume = self.playhead.volume.get();
        if !self.was_playing {
            self.gain.reset(volume);
            self.was_playing = true;
        }

        let end = self.track.len() as f64;
        for sample in out.iter_mut() {
            if self.frame >= end {
                break;
            }
            *sample += self.track.sample_at(self.frame) * self.gain.process(volume);
            self.frame += self.step;
        }

        if self.frame >= end {
            self.frame = end;
            self.was_playing = false;
            state.playing.store(false, Ordering::Release);
            state.ended.store(true, Ordering::Release);
        }
        state.audible.store(true, Ordering::Release);

        // A seek that arrived while rendering wins over this block's position
        if state.pending_seek.load(Ordering::Acquire) == NO_SEEK {
            state.position.store((self.frame / rate).to_bits(), Ordering::Release);
        }
    }
}
