// Song records consumed by the practice session
// Loaded from JSON: {"tempo": 120.0, "time_signature": "4/4", "bars": [480, 2480, ...]}

pub mod settings;

use crate::sequencer::timeline::{Tempo, TimeSignature, TimelineError};
use std::path::Path;

pub use settings::{JsonFileStore, MemoryStore, SettingsError, SettingsStore};

#[derive(Debug, thiserror::Error)]
pub enum SongError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid song: {0}")]
    InvalidStructure(String),

    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

/// A song as stored by the persistence layer
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Song {
    /// Tempo in BPM
    pub tempo: f64,
    #[serde(alias = "timeSignature")]
    pub time_signature: TimeSignature,
    /// Downbeat marks in milliseconds
    pub bars: Vec<f64>,
}

impl Song {
    /// Parse and validate a song record
    pub fn from_json(text: &str) -> Result<Self, SongError> {
        let song: Song = serde_json::from_str(text)?;
        validate_song(&song)?;
        Ok(song)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SongError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn tempo(&self) -> Result<Tempo, TimelineError> {
        Tempo::try_new(self.tempo)
    }
}

/// Check a song record before any timing is derived from it
pub fn validate_song(song: &Song) -> Result<(), SongError> {
    Tempo::try_new(song.tempo)?;

    if song.bars.is_empty() {
        return Err(SongError::InvalidStructure(
            "Song must have at least one bar".to_string(),
        ));
    }

    if let Some((index, mark)) = song
        .bars
        .iter()
        .enumerate()
        .find(|(_, mark)| !mark.is_finite() || **mark < 0.0)
    {
        return Err(SongError::InvalidStructure(format!(
            "Bar {} has an invalid downbeat time {}",
            index, mark
        )));
    }

    if let Some(index) = song.bars.windows(2).position(|pair| pair[1] <= pair[0]) {
        return Err(SongError::InvalidStructure(format!(
            "Downbeats must be strictly increasing (bar {} at {}ms, bar {} at {}ms)",
            index,
            song.bars[index],
            index + 1,
            song.bars[index + 1]
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_song() {
        let song = Song::from_json(r#"{"tempo": 120, "time_signature": "4/4", "bars": [480, 2480]}"#)
            .unwrap();
        assert_eq!(song.tempo, 120.0);
        assert_eq!(song.time_signature, TimeSignature::four_four());
        assert_eq!(song.bars, vec![480.0, 2480.0]);
        assert_eq!(song.tempo().unwrap().beat_duration_seconds(), 0.5);
    }

    #[test]
    fn test_parse_camel_case_alias() {
        let song =
            Song::from_json(r#"{"tempo": 90.5, "timeSignature": "3/4", "bars": [0]}"#).unwrap();
        assert_eq!(song.time_signature, TimeSignature::three_four());
    }

    #[test]
    fn test_invalid_time_signature_is_json_error() {
        let result = Song::from_json(r#"{"tempo": 120, "time_signature": "4/5", "bars": [0]}"#);
        assert!(matches!(result, Err(SongError::Json(_))));
    }

    #[test]
    fn test_validate_tempo() {
        let result = Song::from_json(r#"{"tempo": 5, "time_signature": "4/4", "bars": [0]}"#);
        assert!(matches!(
            result,
            Err(SongError::Timeline(TimelineError::InvalidTempo(_)))
        ));
    }

    #[test]
    fn test_validate_bars() {
        let song = Song {
            tempo: 120.0,
            time_signature: TimeSignature::four_four(),
            bars: vec![],
        };
        assert!(
            validate_song(&song)
                .unwrap_err()
                .to_string()
                .contains("at least one bar")
        );

        let song = Song {
            bars: vec![0.0, 2000.0, 1500.0],
            ..song
        };
        assert!(
            validate_song(&song)
                .unwrap_err()
                .to_string()
                .contains("strictly increasing")
        );

        let song = Song {
            bars: vec![-10.0],
            ..song
        };
        assert!(validate_song(&song).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.json");
        std::fs::write(&path, r#"{"tempo": 100, "time_signature": "4/4", "bars": [0, 2400]}"#)
            .unwrap();
        let song = Song::load(&path).unwrap();
        assert_eq!(song.bars.len(), 2);

        assert!(matches!(
            Song::load(dir.path().join("missing.json")),
            Err(SongError::Io(_))
        ));
    }
}
