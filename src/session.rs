// Practice session - one loaded song and everything that keeps it in sync
//
// The session owns the bar timeline, beat lookup, loop selection, playback
// clock, metronome and mixer for a single song. The host calls `tick(now)`
// once per frame; within a tick the playback position is updated first and
// the beat lookup and metronome read the updated value.

use crate::audio::mixer::{VolumeMixer, VolumeSnapshot};
use crate::project::settings::SettingsStore;
use crate::project::{Song, SongError, validate_song};
use crate::sequencer::bars::{BarDescriptor, BarTimeline};
use crate::sequencer::beat_timing::{BeatTimingService, fallback_beat};
use crate::sequencer::loop_control::{LoopController, LoopRegion};
use crate::sequencer::metronome::{ClickSink, MetronomeScheduler, ScheduledClick};
use crate::sequencer::timeline::Tempo;
use crate::sequencer::transport::{
    AudioTransport, ClockConfig, ClockState, ClockTick, PlaybackClock, TransportEvent,
};

/// Subdivisions per beat that are always published (16th notes in x/4)
const SUBDIVISIONS_PER_BEAT: f64 = 4.0;
/// Distance from a beat start under which a newly reached position counts as that beat
const BEAT_START_TOLERANCE: f64 = 0.005;

/// Musical position of the playhead
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatPosition {
    /// 1-based beat within the bar
    pub beat_number: u32,
    /// 1-based bar number
    pub measure: usize,
    pub total_beats_elapsed: usize,
    /// Start time of the beat, when known from the beat timeline
    pub exact_time: Option<f64>,
    pub is_on_beat: bool,
}

/// What happened during one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub clock: ClockTick,
    pub beat: BeatPosition,
    /// The beat changed this tick
    pub beat_changed: bool,
    /// Click scheduled this tick, if any
    pub click: Option<ScheduledClick>,
}

/// A practice session over one song
pub struct PracticeSession<T: AudioTransport, S: ClickSink> {
    song: Song,
    tempo: Tempo,
    bar_timeline: BarTimeline,
    beat_timing: BeatTimingService,
    loop_control: LoopController,
    clock: PlaybackClock<T>,
    metronome: MetronomeScheduler<S>,
    mixer: VolumeMixer,
    settings: Box<dyn SettingsStore>,
    last_beat: Option<(u32, usize)>,
}

impl<T: AudioTransport, S: ClickSink> PracticeSession<T, S> {
    /// Build a session; persisted metronome and volume settings are restored
    pub fn new(
        song: Song,
        transport: Option<T>,
        click_sink: Option<S>,
        settings: Box<dyn SettingsStore>,
    ) -> Result<Self, SongError> {
        validate_song(&song)?;
        let tempo = song.tempo()?;

        let mut session = Self {
            song,
            tempo,
            bar_timeline: BarTimeline::new(),
            beat_timing: BeatTimingService::new(),
            loop_control: LoopController::new(),
            clock: PlaybackClock::new(transport),
            metronome: MetronomeScheduler::new(click_sink),
            mixer: VolumeMixer::new(),
            settings,
            last_beat: None,
        };

        session.rebuild_timing();
        session.mixer.restore(session.settings.as_ref());
        session.metronome.restore(session.settings.as_ref());
        session.apply_volumes();
        session.prime_beat();
        Ok(session)
    }

    /// Replace the song (tempo, meter or downbeats edited)
    pub fn update_song(&mut self, song: Song) -> Result<(), SongError> {
        validate_song(&song)?;
        self.tempo = song.tempo()?;
        self.song = song;
        self.rebuild_timing();
        Ok(())
    }

    fn rebuild_timing(&mut self) {
        let bars = self.bar_timeline.bars_for(
            &self.song.bars,
            &self.tempo,
            &self.song.time_signature,
        );
        let grid_origin = bars.first().map_or(0.0, |bar| bar.start);
        self.beat_timing
            .initialize(bars, self.tempo.bpm(), &self.song.time_signature);
        self.loop_control.rebind(bars);
        self.clock.set_loop(self.loop_control.active_bounds());

        let subdivision = self.tempo.beat_duration_seconds() / SUBDIVISIONS_PER_BEAT;
        self.clock.set_config(ClockConfig {
            subdivision,
            grid_origin,
            ..*self.clock.config()
        });
    }

    /// Request playback, entering the active loop if needed
    pub fn play(&mut self) -> bool {
        let started = self.clock.play(self.loop_control.active_bounds());
        self.prime_beat();
        started
    }

    /// Feed a notification from a transport that pushes events
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        self.clock.handle_event(event)
    }

    pub fn pause(&mut self) {
        self.clock.pause();
        self.prime_beat();
    }

    /// Pause and rewind to 0, whatever the loop
    pub fn stop(&mut self) {
        self.clock.stop();
        self.last_beat = None;
    }

    pub fn seek_to(&mut self, time: f64) {
        self.clock.seek_to(time);
        self.prime_beat();
    }

    /// Jump to the start of bar `bar_index`
    pub fn seek_to_bar(&mut self, bar_index: usize) {
        if let Some(bar) = self.bar_timeline.bars().get(bar_index) {
            let start = bar.start;
            self.seek_to(start);
        }
    }

    /// One frame: poll the clock, then derive the beat and schedule its click
    pub fn tick(&mut self, now: f64) -> Option<TickReport> {
        let clock_tick = self.clock.tick(now)?;
        let beat = self.beat_at(clock_tick.position);
        let id = (beat.beat_number, beat.total_beats_elapsed);

        let mut report = TickReport {
            clock: clock_tick,
            beat,
            beat_changed: false,
            click: None,
        };

        if clock_tick.ended {
            self.last_beat = None;
            return Some(report);
        }

        if self.clock.state() == ClockState::Playing && self.last_beat != Some(id) {
            self.last_beat = Some(id);
            report.beat_changed = true;
            report.click = self
                .metronome
                .play_beat_at_position(beat.beat_number, beat.total_beats_elapsed);
        }
        Some(report)
    }

    /// Beat at `time`, from the beat timeline or the tempo formula
    pub fn beat_at(&self, time: f64) -> BeatPosition {
        if let Some(info) = self.beat_timing.beat_at_time(time) {
            return BeatPosition {
                beat_number: info.beat_number,
                measure: info.measure,
                total_beats_elapsed: info.total_beats_elapsed,
                exact_time: Some(info.exact_time),
                is_on_beat: info.is_on_beat,
            };
        }

        let fallback = fallback_beat(
            time,
            self.tempo.beat_duration_seconds(),
            self.song.time_signature.beats_per_bar(),
        );
        BeatPosition {
            beat_number: fallback.beat_number,
            measure: fallback.measure,
            total_beats_elapsed: fallback.total_beats_elapsed,
            exact_time: None,
            is_on_beat: false,
        }
    }

    /// Remember the beat under the playhead so it does not click mid-beat,
    /// unless the playhead sits right on its start
    fn prime_beat(&mut self) {
        let position = self.clock.position();
        let beat = self.beat_at(position);
        let start = beat.exact_time.unwrap_or_else(|| {
            beat.total_beats_elapsed as f64 * self.tempo.beat_duration_seconds()
        });

        self.last_beat = if (position - start).abs() < BEAT_START_TOLERANCE {
            None
        } else {
            Some((beat.beat_number, beat.total_beats_elapsed))
        };
    }

    pub fn handle_bar_click(&mut self, bar_index: usize) {
        self.loop_control
            .handle_bar_click(bar_index, self.bar_timeline.bars());
        self.clock.set_loop(self.loop_control.active_bounds());
    }

    pub fn toggle_loop(&mut self) -> bool {
        let active = self.loop_control.toggle_loop();
        self.clock.set_loop(self.loop_control.active_bounds());
        active
    }

    pub fn clear_loop(&mut self) {
        self.loop_control.clear_loop();
        self.clock.set_loop(None);
    }

    pub fn loop_region(&self) -> Option<&LoopRegion> {
        self.loop_control.region()
    }

    pub fn set_metronome_enabled(&mut self, enabled: bool) {
        self.metronome.set_enabled(enabled);
        self.metronome.persist(self.settings.as_mut());
    }

    /// Nudge the click offset by `delta_ms`, clamped to ±500ms
    pub fn adjust_offset(&mut self, delta_ms: f64) {
        self.metronome.adjust_offset(delta_ms);
        self.metronome.persist(self.settings.as_mut());
    }

    pub fn set_track_volume(&mut self, volume: f32) {
        self.mixer.set_track_volume(volume);
        self.volumes_changed();
    }

    pub fn set_click_volume(&mut self, volume: f32) {
        self.mixer.set_click_volume(volume);
        self.volumes_changed();
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.mixer.set_master_volume(volume);
        self.volumes_changed();
    }

    pub fn mute_all(&mut self) {
        self.mixer.mute_all();
        self.volumes_changed();
    }

    pub fn unmute_all(&mut self) {
        self.mixer.unmute_all();
        self.volumes_changed();
    }

    pub fn volumes(&self) -> VolumeSnapshot {
        self.mixer.snapshot()
    }

    fn volumes_changed(&mut self) {
        self.apply_volumes();
        self.mixer.persist(self.settings.as_mut());
    }

    fn apply_volumes(&mut self) {
        if let Some(transport) = self.clock.transport_mut() {
            self.mixer.apply_track_volume(transport);
        }
        self.metronome.refresh_volume(self.mixer.final_click_volume());
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn bars(&self) -> &[BarDescriptor] {
        self.bar_timeline.bars()
    }

    pub fn beat_timing(&self) -> &BeatTimingService {
        &self.beat_timing
    }

    pub fn loop_controller(&self) -> &LoopController {
        &self.loop_control
    }

    /// Authoritative playback position
    pub fn position(&self) -> f64 {
        self.clock.position()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn clock(&self) -> &PlaybackClock<T> {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut PlaybackClock<T> {
        &mut self.clock
    }

    pub fn metronome(&self) -> &MetronomeScheduler<S> {
        &self.metronome
    }

    pub fn metronome_mut(&mut self) -> &mut MetronomeScheduler<S> {
        &mut self.metronome
    }

    pub fn mixer(&self) -> &VolumeMixer {
        &self.mixer
    }

    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }
}
