// Bar timeline - per-bar descriptors derived from marked downbeats
//
// The user taps downbeats along with the recording; those marks (in ms) plus
// the song's tempo and time signature give every bar a start, an end and a
// beat duration. A global offset snaps the first mark onto the beat grid.

use super::timeline::{Tempo, TimeSignature};

/// One bar of the song, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarDescriptor {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub beat_duration: f64,
    pub beats_per_bar: u32,
}

impl BarDescriptor {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Global alignment correction, in seconds, for a first downbeat at `first_downbeat`
///
/// Rounds the first mark to the nearest whole beat. The correction never
/// exceeds one beat: marks further out are assumed to sit on beat 1 already.
pub fn offset_correction(first_downbeat: f64, beat_duration: f64) -> f64 {
    let offset_beats = (first_downbeat / beat_duration).round();
    if offset_beats > 1.0 {
        log::warn!(
            "First downbeat at {:.3}s is {} beats into the track, clamping correction to one beat",
            first_downbeat,
            offset_beats
        );
        return beat_duration;
    }
    offset_beats.max(0.0) * beat_duration
}

/// Compute bar descriptors from downbeat marks (milliseconds)
///
/// Pure function of its inputs, so callers may memoize on them.
pub fn compute_bars(
    downbeats_ms: &[f64],
    tempo: &Tempo,
    time_signature: &TimeSignature,
) -> Vec<BarDescriptor> {
    let Some(&first_ms) = downbeats_ms.first() else {
        return Vec::new();
    };

    let beat_duration = tempo.beat_duration_seconds();
    let beats_per_bar = time_signature.beats_per_bar();
    let offset = offset_correction(first_ms / 1000.0, beat_duration);

    downbeats_ms
        .iter()
        .enumerate()
        .map(|(index, &mark_ms)| {
            let start = mark_ms / 1000.0 - offset;
            let end = match downbeats_ms.get(index + 1) {
                Some(&next_ms) => next_ms / 1000.0 - offset,
                None => start + beat_duration * beats_per_bar as f64,
            };

            BarDescriptor {
                index,
                start: start.max(0.0),
                end,
                beat_duration,
                beats_per_bar,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct TimelineKey {
    downbeats_bits: Vec<u64>,
    bpm_bits: u64,
    time_signature: TimeSignature,
}

impl TimelineKey {
    fn new(downbeats_ms: &[f64], tempo: &Tempo, time_signature: &TimeSignature) -> Self {
        Self {
            downbeats_bits: downbeats_ms.iter().map(|ms| ms.to_bits()).collect(),
            bpm_bits: tempo.bpm().to_bits(),
            time_signature: *time_signature,
        }
    }
}

/// Memoized bar computation
///
/// Recomputes only when tempo, time signature or the downbeat list change.
#[derive(Debug, Default)]
pub struct BarTimeline {
    key: Option<TimelineKey>,
    bars: Vec<BarDescriptor>,
    recomputations: u64,
}

impl BarTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bars for the given inputs, recomputed only if they changed
    pub fn bars_for(
        &mut self,
        downbeats_ms: &[f64],
        tempo: &Tempo,
        time_signature: &TimeSignature,
    ) -> &[BarDescriptor] {
        let key = TimelineKey::new(downbeats_ms, tempo, time_signature);
        if self.key.as_ref() != Some(&key) {
            self.bars = compute_bars(downbeats_ms, tempo, time_signature);
            self.key = Some(key);
            self.recomputations += 1;
            log::debug!(
                "Bar timeline recomputed: {} bars at {} in {}",
                self.bars.len(),
                tempo,
                time_signature
            );
        }
        &self.bars
    }

    /// Last computed bars
    pub fn bars(&self) -> &[BarDescriptor] {
        &self.bars
    }

    /// How many times the bars were actually recomputed
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}
