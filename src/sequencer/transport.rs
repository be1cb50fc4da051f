// Transport - Playback control and position polling
//
// `PlaybackClock` wraps an audio transport (anything that can play, pause,
// seek and report its position) and owns the authoritative playback
// position. The host drives it with `tick(now)` once per frame; the tick
// checks for loop wrap-around and publishes position changes.
//
// Starting playback is a two-phase protocol: `play()` requests the start,
// and the clock only reports itself started once the transport has both
// accepted the request and confirmed it is producing audio.

use super::loop_control::LoopBounds;
use std::collections::VecDeque;

/// Notifications emitted by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The play request was accepted
    PlayAccepted,
    /// The play request failed
    PlayRejected(String),
    /// Audio is actually coming out
    Playing,
    /// Playback reached the end of the media
    Ended,
}

/// A seekable, playable audio source
pub trait AudioTransport {
    /// Current media position in seconds
    fn current_time(&self) -> f64;

    /// Jump to `time` seconds
    fn seek(&mut self, time: f64);

    /// Ask the transport to start; completion is reported through events
    fn request_play(&mut self);

    fn pause(&mut self);

    /// Native output volume, 0.0 to 1.0
    fn set_volume(&mut self, volume: f32);

    /// Media length in seconds, if known
    fn duration(&self) -> Option<f64> {
        None
    }

    /// Next pending notification, if any
    fn poll_event(&mut self) -> Option<TransportEvent> {
        None
    }
}

/// Tunable thresholds of the polling loop (seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockConfig {
    /// Wrap when the transport is this close to the loop end
    pub wrap_threshold: f64,
    /// Publish the position when it moved more than this
    pub min_update_delta: f64,
    /// Never publish moves smaller than this
    pub jitter_floor: f64,
    /// Always publish when crossing a subdivision boundary
    pub subdivision: f64,
    /// Time of the first subdivision boundary (the first downbeat)
    pub grid_origin: f64,
    /// Frame gaps above this are logged
    pub stall_warning: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            wrap_threshold: 0.010,
            min_update_delta: 0.010,
            jitter_floor: 0.001,
            subdivision: 0.25,
            grid_origin: 0.0,
            stall_warning: 0.1,
        }
    }
}

/// Clock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Paused,
    /// Start requested, waiting for the transport
    Starting { accepted: bool, audible: bool },
    Playing,
}

impl ClockState {
    /// Whether the polling loop should be running
    pub fn is_running(&self) -> bool {
        matches!(self, ClockState::Starting { .. } | ClockState::Playing)
    }
}

/// Result of one polling tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    /// Authoritative position after the tick
    pub position: f64,
    /// The position was published this tick
    pub updated: bool,
    /// A loop wrap happened this tick
    pub wrapped: bool,
    /// The start was confirmed this tick
    pub started: bool,
    /// The media ended this tick; polling has stopped
    pub ended: bool,
}

/// Playback clock
///
/// Single writer of the playback position. Event handlers (`play`, `pause`,
/// `seek_to`, `set_loop`) write synchronously; `tick` reads the loop bounds
/// at most once per call.
pub struct PlaybackClock<T: AudioTransport> {
    transport: Option<T>,
    config: ClockConfig,
    state: ClockState,
    position: f64,
    last_published: f64,
    loop_bounds: Option<LoopBounds>,
    polling: bool,
    pre_play_time: f64,
    last_tick_at: Option<f64>,
}

impl<T: AudioTransport> PlaybackClock<T> {
    pub fn new(transport: Option<T>) -> Self {
        Self::with_config(transport, ClockConfig::default())
    }

    pub fn with_config(transport: Option<T>, config: ClockConfig) -> Self {
        let position = transport.as_ref().map_or(0.0, |t| t.current_time());
        Self {
            transport,
            config,
            state: ClockState::Stopped,
            position,
            last_published: position,
            loop_bounds: None,
            polling: false,
            pre_play_time: position,
            last_tick_at: None,
        }
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ClockConfig) {
        self.config = config;
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    /// True while the start is pending or confirmed
    pub fn is_playing(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    /// Authoritative playback position in seconds
    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn loop_bounds(&self) -> Option<LoopBounds> {
        self.loop_bounds
    }

    /// Update the loop used by the polling loop
    pub fn set_loop(&mut self, bounds: Option<LoopBounds>) {
        self.loop_bounds = bounds;
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    pub fn attach_transport(&mut self, transport: T) {
        self.cancel_polling();
        self.state = ClockState::Stopped;
        self.position = transport.current_time();
        self.last_published = self.position;
        self.transport = Some(transport);
    }

    pub fn detach_transport(&mut self) -> Option<T> {
        self.cancel_polling();
        self.state = ClockState::Stopped;
        self.transport.take()
    }

    /// Request playback
    ///
    /// With an active loop, a position outside `[start, end)` is moved to the
    /// loop start first. Returns false if there is no transport or playback is
    /// already running.
    pub fn play(&mut self, loop_bounds: Option<LoopBounds>) -> bool {
        self.loop_bounds = loop_bounds;
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };

        if let Some(bounds) = loop_bounds {
            let now = transport.current_time();
            if !bounds.contains(now) {
                transport.seek(bounds.start);
                self.position = bounds.start;
                self.last_published = bounds.start;
            }
        }

        if self.state.is_running() {
            return false;
        }

        self.pre_play_time = transport.current_time();
        self.state = ClockState::Starting {
            accepted: false,
            audible: false,
        };
        self.polling = true;
        transport.request_play();
        true
    }

    /// Feed a transport notification
    ///
    /// Returns true when this event completes the start protocol.
    pub fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::PlayAccepted => self.advance_start(true, false),
            TransportEvent::Playing => self.advance_start(false, true),
            TransportEvent::PlayRejected(reason) => {
                log::warn!("Transport refused to play: {}", reason);
                self.cancel_polling();
                self.state = ClockState::Paused;
                self.sync_to_transport();
                false
            }
            TransportEvent::Ended => {
                self.cancel_polling();
                self.state = ClockState::Paused;
                self.sync_to_transport();
                log::debug!("Playback ended at {:.3}s", self.position);
                false
            }
        }
    }

    fn advance_start(&mut self, accepted_now: bool, audible_now: bool) -> bool {
        let ClockState::Starting { accepted, audible } = self.state else {
            return false;
        };
        let accepted = accepted || accepted_now;
        let audible = audible || audible_now;

        if !(accepted && audible) {
            self.state = ClockState::Starting { accepted, audible };
            return false;
        }

        self.state = ClockState::Playing;
        self.sync_to_transport();
        log::debug!(
            "Play sync: pre={:.3}s, actual={:.3}s, diff={:.3}s",
            self.pre_play_time,
            self.position,
            self.position - self.pre_play_time
        );
        true
    }

    /// Pause and take the transport's exact position
    pub fn pause(&mut self) {
        self.cancel_polling();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        transport.pause();
        self.state = ClockState::Paused;
        self.sync_to_transport();
    }

    /// Pause and rewind to the very beginning (not the loop start)
    pub fn stop(&mut self) {
        self.cancel_polling();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        transport.pause();
        transport.seek(0.0);
        self.state = ClockState::Stopped;
        self.position = 0.0;
        self.last_published = 0.0;
    }

    /// Jump to `time`; the position becomes exactly `time`
    pub fn seek_to(&mut self, time: f64) {
        if !time.is_finite() {
            log::debug!("Ignoring seek to non-finite time {}", time);
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        transport.seek(time);
        self.position = time;
        self.last_published = time;
    }

    /// One polling step, called once per frame with a monotonic timestamp
    ///
    /// Returns None when playback is not running.
    pub fn tick(&mut self, now: f64) -> Option<ClockTick> {
        if !self.polling {
            return None;
        }

        if let Some(previous) = self.last_tick_at.replace(now) {
            let gap = now - previous;
            if gap > self.config.stall_warning {
                log::debug!("Polling stalled for {:.0}ms", gap * 1000.0);
            }
        }

        let mut tick = ClockTick {
            position: self.position,
            updated: false,
            wrapped: false,
            started: false,
            ended: false,
        };

        while let Some(event) = self.transport.as_mut().and_then(|t| t.poll_event()) {
            let ended = event == TransportEvent::Ended;
            tick.started |= self.handle_event(event);
            if ended {
                tick.ended = true;
                tick.position = self.position;
                tick.updated = true;
                return Some(tick);
            }
        }

        if !self.polling {
            tick.position = self.position;
            return Some(tick);
        }

        let Some(transport) = self.transport.as_mut() else {
            self.cancel_polling();
            return None;
        };
        let time = transport.current_time();

        if let Some(bounds) = self.loop_bounds
            && time >= bounds.end - self.config.wrap_threshold
        {
            transport.seek(bounds.start);
            self.position = bounds.start;
            self.last_published = bounds.start;
            log::debug!(
                "Loop jump: {:.3}s -> {:.3}s (end was {:.3}s)",
                time,
                bounds.start,
                bounds.end
            );
            tick.position = bounds.start;
            tick.updated = true;
            tick.wrapped = true;
            return Some(tick);
        }

        if self.should_publish(time) {
            self.position = time;
            self.last_published = time;
            tick.updated = true;
        }
        tick.position = self.position;
        Some(tick)
    }

    fn should_publish(&self, time: f64) -> bool {
        let diff = (time - self.last_published).abs();
        if diff <= self.config.jitter_floor {
            return false;
        }
        if diff > self.config.min_update_delta {
            return true;
        }
        let subdivision = self.config.subdivision;
        let origin = self.config.grid_origin;
        subdivision > 0.0
            && ((time - origin) / subdivision).floor()
                != ((self.last_published - origin) / subdivision).floor()
    }

    fn sync_to_transport(&mut self) {
        if let Some(transport) = self.transport.as_ref() {
            self.position = transport.current_time();
            self.last_published = self.position;
        }
    }

    fn cancel_polling(&mut self) {
        self.polling = false;
        self.last_tick_at = None;
    }
}

/// In-memory transport advanced explicitly by its owner
///
/// Used for offline rendering and headless sessions: time only moves when
/// [`advance`](Self::advance) is called while playing.
#[derive(Debug, Clone)]
pub struct ManualTransport {
    time: f64,
    playing: bool,
    volume: f32,
    duration: Option<f64>,
    auto_confirm: bool,
    events: VecDeque<TransportEvent>,
}

impl ManualTransport {
    /// A transport that confirms audible playback right after accepting
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            time: 0.0,
            playing: false,
            volume: 1.0,
            duration,
            auto_confirm: true,
            events: VecDeque::new(),
        }
    }

    /// A transport whose "playing" confirmation must be sent by hand
    pub fn with_manual_confirmation(duration: Option<f64>) -> Self {
        Self {
            auto_confirm: false,
            ..Self::new(duration)
        }
    }

    /// Report that audio is now audible
    pub fn confirm_playing(&mut self) {
        if self.playing {
            self.events.push_back(TransportEvent::Playing);
        }
    }

    /// Move time forward by `seconds` if playing
    pub fn advance(&mut self, seconds: f64) {
        if !self.playing {
            return;
        }
        self.time += seconds;
        if let Some(duration) = self.duration
            && self.time >= duration
        {
            self.time = duration;
            self.playing = false;
            self.events.push_back(TransportEvent::Ended);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl AudioTransport for ManualTransport {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn seek(&mut self, time: f64) {
        self.time = match self.duration {
            Some(duration) => time.clamp(0.0, duration),
            None => time.max(0.0),
        };
    }

    fn request_play(&mut self) {
        self.playing = true;
        self.events.push_back(TransportEvent::PlayAccepted);
        if self.auto_confirm {
            self.events.push_back(TransportEvent::Playing);
        }
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}
