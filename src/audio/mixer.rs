// Volume mixer - Track / click / master gains
//
// Levels live in atomic cells, so setters take `&self`. The final track gain
// is pushed to the transport; the final click gain is carried by each
// scheduled click. The same `AtomicF32` cell carries the track gain to the
// audio thread inside `SharedPlayhead`.

use crate::project::settings::{self, SettingsStore, keys};
use crate::sequencer::transport::AudioTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

pub const DEFAULT_TRACK_VOLUME: f32 = 1.0;
pub const DEFAULT_CLICK_VOLUME: f32 = 0.3;
pub const DEFAULT_MASTER_VOLUME: f32 = 1.0;

/// Thread-safe f32 parameter using atomic operations
/// Converts f32 to u32 bits for atomic storage
#[derive(Debug, Clone)]
pub struct AtomicF32 {
    inner: Arc<AtomicU32>,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            inner: Arc::new(AtomicU32::new(value.to_bits())),
        }
    }

    /// Set the value (control thread)
    pub fn set(&self, value: f32) {
        self.inner.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Get the value (audio thread)
    pub fn get(&self) -> f32 {
        f32::from_bits(self.inner.load(Ordering::Relaxed))
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Clamp a requested gain into [0, 1]; NaN is treated as silence
fn clamp_gain(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Point-in-time view of all gains
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSnapshot {
    pub track: f32,
    pub click: f32,
    pub master: f32,
    pub final_track: f32,
    pub final_click: f32,
}

/// Volume mixer
///
/// The effective gain of a channel is always `channel * master`.
#[derive(Debug, Clone)]
pub struct VolumeMixer {
    track: AtomicF32,
    click: AtomicF32,
    master: AtomicF32,
}

impl VolumeMixer {
    pub fn new() -> Self {
        Self {
            track: AtomicF32::new(DEFAULT_TRACK_VOLUME),
            click: AtomicF32::new(DEFAULT_CLICK_VOLUME),
            master: AtomicF32::new(DEFAULT_MASTER_VOLUME),
        }
    }

    pub fn set_track_volume(&self, volume: f32) {
        self.track.set(clamp_gain(volume));
    }

    pub fn set_click_volume(&self, volume: f32) {
        self.click.set(clamp_gain(volume));
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master.set(clamp_gain(volume));
    }

    pub fn track_volume(&self) -> f32 {
        self.track.get()
    }

    pub fn click_volume(&self) -> f32 {
        self.click.get()
    }

    pub fn master_volume(&self) -> f32 {
        self.master.get()
    }

    pub fn final_track_volume(&self) -> f32 {
        self.track.get() * self.master.get()
    }

    pub fn final_click_volume(&self) -> f32 {
        self.click.get() * self.master.get()
    }

    /// Push the effective track gain into the transport's own volume
    pub fn apply_track_volume<T: AudioTransport + ?Sized>(&self, transport: &mut T) {
        transport.set_volume(self.final_track_volume());
    }

    pub fn mute_all(&self) {
        self.master.set(0.0);
    }

    pub fn unmute_all(&self) {
        self.master.set(1.0);
    }

    pub fn snapshot(&self) -> VolumeSnapshot {
        VolumeSnapshot {
            track: self.track_volume(),
            click: self.click_volume(),
            master: self.master_volume(),
            final_track: self.final_track_volume(),
            final_click: self.final_click_volume(),
        }
    }

    /// Load the three levels, clamping anything out of range
    pub fn restore(&self, store: &dyn SettingsStore) {
        self.set_track_volume(settings::load_or(store, keys::VOLUME_TRACK, DEFAULT_TRACK_VOLUME));
        self.set_click_volume(settings::load_or(store, keys::VOLUME_CLICK, DEFAULT_CLICK_VOLUME));
        self.set_master_volume(settings::load_or(
            store,
            keys::VOLUME_MASTER,
            DEFAULT_MASTER_VOLUME,
        ));
    }

    pub fn persist(&self, store: &mut dyn SettingsStore) {
        settings::save(store, keys::VOLUME_TRACK, &self.track_volume());
        settings::save(store, keys::VOLUME_CLICK, &self.click_volume());
        settings::save(store, keys::VOLUME_MASTER, &self.master_volume());
    }
}

impl Default for VolumeMixer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::settings::MemoryStore;
    use crate::sequencer::transport::ManualTransport;

    #[test]
    fn test_atomic_f32() {
        let param = AtomicF32::new(0.5);
        assert_eq!(param.get(), 0.5);
        let shared = param.clone();
        shared.set(0.75);
        assert_eq!(param.get(), 0.75);
    }

    #[test]
    fn test_defaults() {
        let mixer = VolumeMixer::new();
        assert_eq!(mixer.track_volume(), 1.0);
        assert_eq!(mixer.click_volume(), 0.3);
        assert_eq!(mixer.master_volume(), 1.0);
    }

    #[test]
    fn test_setters_clamp() {
        let mixer = VolumeMixer::new();
        for (input, expected) in [(-1.0, 0.0), (0.25, 0.25), (1.7, 1.0), (f32::NAN, 0.0)] {
            mixer.set_track_volume(input);
            mixer.set_click_volume(input);
            mixer.set_master_volume(input);
            assert_eq!(mixer.track_volume(), expected);
            assert_eq!(mixer.click_volume(), expected);
            assert_eq!(mixer.master_volume(), expected);
        }
    }

    #[test]
    fn test_final_volumes_scale_by_master() {
        let mixer = VolumeMixer::new();
        mixer.set_click_volume(0.5);
        mixer.set_track_volume(0.8);
        mixer.set_master_volume(0.5);
        assert_eq!(mixer.final_click_volume(), 0.25);
        assert_eq!(mixer.final_track_volume(), 0.4);
    }

    #[test]
    fn test_apply_track_volume() {
        let mixer = VolumeMixer::new();
        mixer.set_track_volume(0.6);
        mixer.set_master_volume(0.5);
        let mut transport = ManualTransport::new(None);
        mixer.apply_track_volume(&mut transport);
        assert!((transport.volume() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_mute_unmute() {
        let mixer = VolumeMixer::new();
        mixer.mute_all();
        assert_eq!(mixer.final_track_volume(), 0.0);
        assert_eq!(mixer.final_click_volume(), 0.0);
        mixer.unmute_all();
        let snapshot = mixer.snapshot();
        assert_eq!(snapshot.master, 1.0);
        assert_eq!(snapshot.final_click, 0.3);
    }

    #[test]
    fn test_restore_defaults_on_corrupt_values() {
        let mut store = MemoryStore::new();
        store.set(keys::VOLUME_TRACK, "\"loud\"".to_string()).unwrap();
        store.set(keys::VOLUME_CLICK, "4.0".to_string()).unwrap();

        let mixer = VolumeMixer::new();
        mixer.set_master_volume(0.2);
        mixer.restore(&store);
        assert_eq!(mixer.track_volume(), 1.0);
        assert_eq!(mixer.click_volume(), 1.0);
        assert_eq!(mixer.master_volume(), 1.0);
    }

    #[test]
    fn test_persist_then_restore() {
        let mut store = MemoryStore::new();
        let mixer = VolumeMixer::new();
        mixer.set_track_volume(0.9);
        mixer.set_click_volume(0.45);
        mixer.set_master_volume(0.7);
        mixer.persist(&mut store);

        let restored = VolumeMixer::new();
        restored.restore(&store);
        assert_eq!(restored.snapshot(), mixer.snapshot());
    }
}
