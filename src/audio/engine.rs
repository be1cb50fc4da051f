// Audio engine - CPAL output stream mixing the track and the metronome
//
// # Format Support
//
// The device's preferred sample format is detected with `sample_format()`
// and a matching stream is built (F32, I16 or U16). Everything is mixed in
// mono f32 and converted per output frame through `FromSample<f32>`.
//
// # Threads
//
// Clicks are scheduled on the control thread and cross to the audio thread
// through a lock-free ring buffer. The track position crosses through the
// atomics of `SharedPlayhead`. The callback never locks or allocates.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::buffer_transport::{BufferTransport, TrackReader};
use super::click::ClickRenderer;
use super::dsp_utils::{flush_denormals_to_zero, soft_clip};
use super::loader::TrackBuffer;
use super::timing::AudioClock;
use crate::sequencer::metronome::{ClickSink, ScheduledClick};

/// Capacity of the click ring buffer
pub const CLICK_QUEUE_CAPACITY: usize = 64;
/// Frames mixed per inner block of the callback
const MAX_BLOCK_FRAMES: usize = 2048;

pub type ClickProducer = ringbuf::HeapProd<ScheduledClick>;
pub type ClickConsumer = ringbuf::HeapCons<ScheduledClick>;

pub fn create_click_channel(capacity: usize) -> (ClickProducer, ClickConsumer) {
    let rb = HeapRb::<ScheduledClick>::new(capacity);
    rb.split()
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No audio output device found")]
    NoDevice,

    #[error("Audio configuration error: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("Error in stream creation: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("Error starting stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("Unsupported sample format: {0}. Supported formats: F32, I16, U16")]
    UnsupportedFormat(String),
}

/// Control-side click sink: schedules against the engine's synthesis clock
pub struct ClickQueue {
    producer: ClickProducer,
    clock: AudioClock,
}

impl ClickQueue {
    pub fn new(producer: ClickProducer, clock: AudioClock) -> Self {
        Self { producer, clock }
    }
}

impl ClickSink for ClickQueue {
    fn now(&self) -> f64 {
        self.clock.seconds()
    }

    fn schedule(&mut self, click: ScheduledClick) {
        if self.producer.try_push(click).is_err() {
            log::warn!("Click queue full, dropping click at {:.3}s", click.at);
        }
    }
}

/// Everything the audio callback owns
struct CallbackState {
    track: Option<TrackReader>,
    clicks: ClickRenderer,
    click_rx: ClickConsumer,
    scratch: Vec<f32>,
}

impl CallbackState {
    /// Render one block into interleaved output
    fn process<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        while let Some(click) = self.click_rx.try_pop() {
            self.clicks.queue(click);
        }

        for chunk in data.chunks_mut(MAX_BLOCK_FRAMES * channels) {
            let frames = chunk.len() / channels;
            let mono = &mut self.scratch[..frames];
            mono.fill(0.0);

            if let Some(track) = self.track.as_mut() {
                track.render(mono);
            }
            self.clicks.render(mono);

            for (frame, sample) in chunk.chunks_mut(channels).zip(mono.iter()) {
                let value = T::from_sample(soft_clip(flush_denormals_to_zero(*sample)));
                for channel_sample in frame.iter_mut() {
                    *channel_sample = value;
                }
            }
        }
    }
}

/// Output stream plus the handles the session needs
pub struct AudioEngine {
    _stream: Stream,
    sample_rate: u32,
    channels: usize,
    clock: AudioClock,
    failed: Arc<AtomicBool>,
}

impl AudioEngine {
    /// Open the default output device and start streaming
    ///
    /// Returns the engine, a transport for `track` (if any) and the click
    /// sink to give to the metronome.
    pub fn start(
        track: Option<TrackBuffer>,
    ) -> Result<(Self, Option<BufferTransport>, ClickQueue), EngineError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(EngineError::NoDevice)?;
        log::info!(
            "Audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let supported_config = device.default_output_config()?;
        let sample_format = supported_config.sample_format();
        log::debug!("Audio config: {:?}", supported_config);

        let sample_rate = supported_config.sample_rate().0;
        let channels = supported_config.channels() as usize;
        let config: StreamConfig = supported_config.into();

        let clock = AudioClock::new(sample_rate);
        let (click_tx, click_rx) = create_click_channel(CLICK_QUEUE_CAPACITY);

        let (transport, reader) = match track {
            Some(track) => {
                let (transport, reader) = BufferTransport::new(track, sample_rate);
                (Some(transport), Some(reader))
            }
            None => (None, None),
        };

        let state = CallbackState {
            track: reader,
            clicks: ClickRenderer::with_clock(clock.clone()),
            click_rx,
            scratch: vec![0.0; MAX_BLOCK_FRAMES],
        };
        let failed = Arc::new(AtomicBool::new(false));

        let stream = match sample_format {
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &config, channels, state, failed.clone())
            }
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &config, channels, state, failed.clone())
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &config, channels, state, failed.clone())
            }
            other => return Err(EngineError::UnsupportedFormat(format!("{:?}", other))),
        }?;

        stream.play()?;
        log::info!("Audio engine started: {} Hz, {} channels", sample_rate, channels);

        let engine = Self {
            _stream: stream,
            sample_rate,
            channels,
            clock: clock.clone(),
            failed,
        };
        Ok((engine, transport, ClickQueue::new(click_tx, clock)))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The synthesis clock advanced by the callback
    pub fn clock(&self) -> &AudioClock {
        &self.clock
    }

    /// True once the stream reported an error
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        channels: usize,
        mut state: CallbackState,
        failed: Arc<AtomicBool>,
    ) -> Result<Stream, EngineError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // No allocations, no I/O, no blocking locks
                state.process(data, channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::metronome::ClickType;
    use crate::sequencer::transport::AudioTransport;
    use ringbuf::traits::Observer;

    fn callback_state(track: Option<TrackReader>) -> (CallbackState, ClickQueue) {
        let clock = AudioClock::new(8000);
        let (tx, rx) = create_click_channel(CLICK_QUEUE_CAPACITY);
        let state = CallbackState {
            track,
            clicks: ClickRenderer::with_clock(clock.clone()),
            click_rx: rx,
            scratch: vec![0.0; MAX_BLOCK_FRAMES],
        };
        (state, ClickQueue::new(tx, clock))
    }

    #[test]
    fn test_click_queue_crosses_to_callback() {
        let (mut state, mut queue) = callback_state(None);
        assert_eq!(queue.now(), 0.0);
        queue.schedule(ScheduledClick {
            at: 0.0,
            click_type: ClickType::Accent,
            gain: 1.0,
        });

        let mut data = vec![0.0f32; 512 * 2];
        state.process(&mut data, 2);
        assert!(data.iter().any(|s| *s != 0.0));
        // Both channels carry the same signal
        assert!(data.chunks(2).all(|frame| frame[0] == frame[1]));
        assert!((queue.now() - 512.0 / 8000.0).abs() < 1e-12);
    }

    #[test]
    fn test_full_queue_drops_clicks() {
        let (_state, mut queue) = callback_state(None);
        for i in 0..CLICK_QUEUE_CAPACITY + 4 {
            queue.schedule(ScheduledClick {
                at: i as f64,
                click_type: ClickType::Regular,
                gain: 1.0,
            });
        }
        assert_eq!(queue.producer.occupied_len(), CLICK_QUEUE_CAPACITY);
    }

    #[test]
    fn test_track_is_mixed_and_converted() {
        let (mut transport, reader) =
            BufferTransport::new(TrackBuffer::new(vec![0.5; 8000], 8000), 8000);
        transport.request_play();
        let (mut state, _queue) = callback_state(Some(reader));

        let mut data = vec![0i16; 256];
        state.process(&mut data, 1);
        let expected = i16::from_sample(soft_clip(0.5));
        assert!(data.iter().all(|s| *s == expected));
    }

    #[test]
    fn test_large_buffers_are_chunked() {
        let (mut state, queue) = callback_state(None);
        let mut data = vec![0.0f32; MAX_BLOCK_FRAMES * 3 + 17];
        state.process(&mut data, 1);
        assert_eq!(queue.clock.current_frame(), (MAX_BLOCK_FRAMES * 3 + 17) as u64);
    }
}
