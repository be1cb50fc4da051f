// Integration test: metronome and mixer settings survive a restart

use looptrack::project::settings::{JsonFileStore, SettingsStore, keys};
use looptrack::sequencer::metronome::{ClickSink, ScheduledClick};
use looptrack::{ManualTransport, PracticeSession, Song, TimeSignature};
use std::path::Path;

struct NullSink;

impl ClickSink for NullSink {
    fn now(&self) -> f64 {
        0.0
    }

    fn schedule(&mut self, _click: ScheduledClick) {}
}

type Session = PracticeSession<ManualTransport, NullSink>;

fn song() -> Song {
    Song {
        tempo: 100.0,
        time_signature: TimeSignature::three_four(),
        bars: vec![0.0, 1800.0, 3600.0],
    }
}

fn open_session(path: &Path) -> Session {
    let store = JsonFileStore::open(path).unwrap();
    PracticeSession::new(
        song(),
        Some(ManualTransport::new(None)),
        Some(NullSink),
        Box::new(store),
    )
    .unwrap()
}

#[test]
fn test_fresh_install_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let session = open_session(&dir.path().join("settings.json"));

    let volumes = session.volumes();
    assert_eq!(volumes.track, 1.0);
    assert_eq!(volumes.click, 0.3);
    assert_eq!(volumes.master, 1.0);
    assert!(!session.metronome().is_enabled());
    assert_eq!(session.metronome().manual_offset_ms(), 0.0);
}

#[test]
fn test_settings_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("looptrack").join("settings.json");

    {
        let mut session = open_session(&path);
        session.set_metronome_enabled(true);
        session.adjust_offset(-30.0);
        session.adjust_offset(-15.0);
        session.set_click_volume(0.8);
        session.set_master_volume(0.5);
    }
    assert!(path.exists());

    let session = open_session(&path);
    assert!(session.metronome().is_enabled());
    assert_eq!(session.metronome().manual_offset_ms(), -45.0);
    assert_eq!(session.volumes().click, 0.8);
    assert_eq!(session.volumes().master, 0.5);
    assert_eq!(session.metronome().click_gain(), 0.4);
    assert_eq!(session.clock().transport().unwrap().volume(), 0.5);
}

#[test]
fn test_corrupt_values_fall_back_individually() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{"metronome.enabled": "sometimes", "metronome.offset_ms": 25.0, "volume.track": "loud"}"#,
    )
    .unwrap();

    let session = open_session(&path);
    assert!(!session.metronome().is_enabled());
    assert_eq!(session.metronome().manual_offset_ms(), 25.0);
    assert_eq!(session.volumes().track, 1.0);
}

#[test]
fn test_unreadable_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    let mut store = JsonFileStore::open(&path).unwrap();
    assert_eq!(store.get(keys::VOLUME_CLICK), None);

    store.set(keys::VOLUME_CLICK, "0.5".to_string()).unwrap();
    let reopened = JsonFileStore::open(&path).unwrap();
    assert_eq!(reopened.get(keys::VOLUME_CLICK).as_deref(), Some("0.5"));
}
