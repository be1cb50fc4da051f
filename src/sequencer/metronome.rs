// Metronome - Click scheduling against the audio-synthesis clock
//
// The synthesis clock runs ahead of (and independently from) the frame
// clock that polls playback, so clicks are scheduled at absolute synthesis
// times rather than fired "now". Each musical beat is scheduled at most once
// while its dedup token is alive.

use crate::project::settings::{self, SettingsStore, keys};
use std::collections::VecDeque;

/// Fixed lead so a click is never scheduled into the buffer being rendered
pub const SCHEDULE_LEAD: f64 = 0.010;
/// Minimum distance into the future when the offset would land in the past
pub const MIN_FUTURE: f64 = 0.001;
/// Lifetime of a dedup token on the synthesis clock
pub const DEDUP_WINDOW: f64 = 0.5;
/// Manual offset bound, in milliseconds
pub const MAX_OFFSET_MS: f64 = 500.0;

/// Metronome click type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickType {
    /// Click on first beat of bar (accent/downbeat)
    Accent,
    /// Click on other beats
    Regular,
}

impl ClickType {
    pub fn for_beat(beat_number: u32) -> Self {
        if beat_number == 1 {
            ClickType::Accent
        } else {
            ClickType::Regular
        }
    }
}

/// A click placed on the synthesis timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledClick {
    /// Synthesis clock time in seconds
    pub at: f64,
    pub click_type: ClickType,
    /// Final click gain (click * master) at scheduling time
    pub gain: f32,
}

/// Destination for scheduled clicks, owner of the synthesis clock
pub trait ClickSink {
    /// Current synthesis clock time in seconds
    fn now(&self) -> f64;

    fn schedule(&mut self, click: ScheduledClick);
}

/// Identity of a musical beat for deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeatId {
    pub beat_number: u32,
    pub total_beats_elapsed: usize,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledBeat {
    id: BeatId,
    expiry: f64,
}

/// Metronome scheduler
///
/// Without a sink (no synthesis engine available) every call is a no-op.
pub struct MetronomeScheduler<S: ClickSink> {
    sink: Option<S>,
    enabled: bool,
    manual_offset_ms: f64,
    click_gain: f32,
    scheduled: VecDeque<ScheduledBeat>,
}

impl<S: ClickSink> MetronomeScheduler<S> {
    pub fn new(sink: Option<S>) -> Self {
        Self {
            sink,
            enabled: false,
            manual_offset_ms: 0.0,
            click_gain: 0.3,
            scheduled: VecDeque::new(),
        }
    }

    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    pub fn sink_mut(&mut self) -> Option<&mut S> {
        self.sink.as_mut()
    }

    /// Enable/disable metronome; disabling forgets scheduled beats
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.scheduled.clear();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the gain applied to subsequently scheduled clicks
    pub fn refresh_volume(&mut self, final_click_volume: f32) {
        self.click_gain = final_click_volume.clamp(0.0, 1.0);
    }

    pub fn click_gain(&self) -> f32 {
        self.click_gain
    }

    pub fn set_manual_offset(&mut self, offset_ms: f64) {
        if offset_ms.is_finite() {
            self.manual_offset_ms = offset_ms.clamp(-MAX_OFFSET_MS, MAX_OFFSET_MS);
        }
    }

    /// Nudge the manual offset, staying within ±500ms
    pub fn adjust_offset(&mut self, delta_ms: f64) {
        self.set_manual_offset(self.manual_offset_ms + delta_ms);
    }

    pub fn manual_offset_ms(&self) -> f64 {
        self.manual_offset_ms
    }

    /// Schedule the click for a beat, unless that beat was just scheduled
    pub fn play_beat_at_position(
        &mut self,
        beat_number: u32,
        total_beats_elapsed: usize,
    ) -> Option<ScheduledClick> {
        if !self.enabled {
            return None;
        }
        let sink = self.sink.as_mut()?;
        let now = sink.now();

        while self
            .scheduled
            .front()
            .is_some_and(|token| token.expiry <= now)
        {
            self.scheduled.pop_front();
        }

        let id = BeatId {
            beat_number,
            total_beats_elapsed,
        };
        if self.scheduled.iter().any(|token| token.id == id) {
            return None;
        }

        let mut at = now + SCHEDULE_LEAD + self.manual_offset_ms / 1000.0;
        if at < now {
            at = now + MIN_FUTURE;
        }

        self.scheduled.push_back(ScheduledBeat {
            id,
            expiry: now + DEDUP_WINDOW,
        });

        let click = ScheduledClick {
            at,
            click_type: ClickType::for_beat(beat_number),
            gain: self.click_gain,
        };
        sink.schedule(click);
        Some(click)
    }

    /// Number of live dedup tokens
    pub fn pending_tokens(&self) -> usize {
        self.scheduled.len()
    }

    /// Load the enabled flag and offset
    pub fn restore(&mut self, store: &dyn SettingsStore) {
        self.set_enabled(settings::load_or(store, keys::METRONOME_ENABLED, false));
        self.set_manual_offset(settings::load_or(store, keys::METRONOME_OFFSET_MS, 0.0));
    }

    pub fn persist(&self, store: &mut dyn SettingsStore) {
        settings::save(store, keys::METRONOME_ENABLED, &self.enabled);
        settings::save(store, keys::METRONOME_OFFSET_MS, &self.manual_offset_ms);
    }
}
