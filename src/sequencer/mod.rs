// Sequencer module
// Musical timeline, beat lookup, loop selection, playback clock and metronome scheduling

pub mod bars;
pub mod beat_timing;
pub mod loop_control;
pub mod metronome;
pub mod timeline;
pub mod transport;

pub use bars::{BarDescriptor, BarTimeline, compute_bars};
pub use beat_timing::{BeatInfo, BeatTimingService, FallbackBeat, NextBeat, TimingStats, fallback_beat};
pub use loop_control::{LoopBounds, LoopController, LoopRegion, LoopState};
pub use metronome::{ClickSink, ClickType, MetronomeScheduler, ScheduledClick};
pub use timeline::{Tempo, TimeSignature, TimelineError};
pub use transport::{
    AudioTransport, ClockConfig, ClockState, ClockTick, ManualTransport, PlaybackClock, TransportEvent,
};
