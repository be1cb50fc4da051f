// Beat timing - precomputed beat timeline with binary-search lookup
//
// Every beat of the song is laid out once per (first bar, bar count, tempo,
// meter) combination. Lookups during playback are O(log n) and allocation free.

use super::bars::BarDescriptor;
use super::timeline::TimeSignature;

/// Tolerance ceiling for "on the beat" detection (5ms)
const ON_BEAT_MAX_TOLERANCE: f64 = 0.005;
/// Tolerance as a fraction of the beat duration (1%)
const ON_BEAT_RELATIVE_TOLERANCE: f64 = 0.01;

/// One beat of the precomputed timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatTimingEntry {
    pub time: f64,
    pub beat_number: u32, // 1..=beats_per_bar
    pub bar_index: usize,
    pub is_first_beat: bool,
}

/// Answer to "which beat is active at time t"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatInfo {
    pub beat_number: u32,
    pub bar_index: usize,
    /// 1-based bar number, for display
    pub measure: usize,
    /// Index of the beat in the whole timeline
    pub total_beats_elapsed: usize,
    pub exact_time: f64,
    pub is_on_beat: bool,
}

/// Upcoming beat, as returned by [`BeatTimingService::next_beat`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NextBeat {
    pub time: f64,
    pub beat_number: u32,
    pub is_first_beat: bool,
}

/// Debug statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingStats {
    pub is_initialized: bool,
    pub first_bar_start: f64,
    pub beat_duration: f64,
    pub beats_per_bar: u32,
    pub total_beats: usize,
}

/// Formula-based beat position used when the timeline is not available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackBeat {
    pub beat_number: u32,
    pub measure: usize,
    pub total_beats_elapsed: usize,
}

/// `floor(t / beat) % beats_per_bar + 1`, counted from time zero
pub fn fallback_beat(time: f64, beat_duration: f64, beats_per_bar: u32) -> FallbackBeat {
    let beats_per_bar = beats_per_bar.max(1) as usize;
    let total = if beat_duration > 0.0 && time > 0.0 {
        (time / beat_duration).floor() as usize
    } else {
        0
    };
    FallbackBeat {
        beat_number: (total % beats_per_bar) as u32 + 1,
        measure: total / beats_per_bar + 1,
        total_beats_elapsed: total,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TimingKey {
    first_bar_start: f64,
    bar_count: usize,
    beat_duration: f64,
    beats_per_bar: u32,
}

/// Beat timing service
///
/// Owned by the playback session; call [`initialize`](Self::initialize) as
/// often as convenient, it only rebuilds when its inputs change by value.
#[derive(Debug, Default)]
pub struct BeatTimingService {
    key: Option<TimingKey>,
    timeline: Vec<BeatTimingEntry>,
}

impl BeatTimingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the beat timeline. Returns true if it was (re)built.
    pub fn initialize(
        &mut self,
        bars: &[BarDescriptor],
        bpm: f64,
        time_signature: &TimeSignature,
    ) -> bool {
        let Some(first_bar) = bars.first() else {
            self.key = None;
            self.timeline.clear();
            return false;
        };

        let key = TimingKey {
            first_bar_start: first_bar.start,
            bar_count: bars.len(),
            beat_duration: 60.0 / bpm,
            beats_per_bar: time_signature.beats_per_bar(),
        };
        if self.key == Some(key) {
            return false;
        }

        let beats_per_bar = key.beats_per_bar as usize;
        self.timeline.clear();
        self.timeline.reserve(bars.len() * beats_per_bar);
        for bar_index in 0..bars.len() {
            for beat in 0..beats_per_bar {
                let beat_index = bar_index * beats_per_bar + beat;
                self.timeline.push(BeatTimingEntry {
                    time: key.first_bar_start + beat_index as f64 * key.beat_duration,
                    beat_number: beat as u32 + 1,
                    bar_index,
                    is_first_beat: beat == 0,
                });
            }
        }

        log::debug!(
            "Beat timeline built: {} beats from {:.3}s",
            self.timeline.len(),
            key.first_bar_start
        );
        self.key = Some(key);
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.key.is_some() && !self.timeline.is_empty()
    }

    /// Beat active at `time`: the last entry whose time is <= `time`
    ///
    /// Returns None when uninitialized or before the first beat; callers
    /// should then use [`fallback_beat`].
    pub fn beat_at_time(&self, time: f64) -> Option<BeatInfo> {
        let key = self.key?;
        let upper = self.timeline.partition_point(|entry| entry.time <= time);
        let index = upper.checked_sub(1)?;
        let entry = self.timeline[index];

        let tolerance = ON_BEAT_MAX_TOLERANCE.min(key.beat_duration * ON_BEAT_RELATIVE_TOLERANCE);

        Some(BeatInfo {
            beat_number: entry.beat_number,
            bar_index: entry.bar_index,
            measure: entry.bar_index + 1,
            total_beats_elapsed: index,
            exact_time: entry.time,
            is_on_beat: (time - entry.time).abs() < tolerance,
        })
    }

    /// First beat strictly after `time`
    pub fn next_beat(&self, time: f64) -> Option<NextBeat> {
        self.key?;
        let upper = self.timeline.partition_point(|entry| entry.time <= time);
        self.timeline.get(upper).map(|entry| NextBeat {
            time: entry.time,
            beat_number: entry.beat_number,
            is_first_beat: entry.is_first_beat,
        })
    }

    /// Whether `time` falls within `[bars[0].start, bars[last].end]`
    pub fn is_in_valid_range(&self, time: f64, bars: &[BarDescriptor]) -> bool {
        match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => time >= first.start && time <= last.end,
            _ => true,
        }
    }

    pub fn timeline(&self) -> &[BeatTimingEntry] {
        &self.timeline
    }

    pub fn stats(&self) -> TimingStats {
        match self.key {
            Some(key) => TimingStats {
                is_initialized: true,
                first_bar_start: key.first_bar_start,
                beat_duration: key.beat_duration,
                beats_per_bar: key.beats_per_bar,
                total_beats: self.timeline.len(),
            },
            None => TimingStats {
                is_initialized: false,
                first_bar_start: 0.0,
                beat_duration: 0.0,
                beats_per_bar: 0,
                total_beats: 0,
            },
        }
    }
}
