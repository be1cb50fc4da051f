// Timeline - Musical time representation
// Tempo and time signature of a song, and the conversions between them

use std::fmt;
use std::str::FromStr;

/// Errors produced when building tempo or time signature values from user data
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("BPM must be between {min} and {max}, got {0}", min = Tempo::MIN_BPM, max = Tempo::MAX_BPM)]
    InvalidTempo(f64),

    #[error("Time signature numerator must be between 1 and 32, got {0}")]
    InvalidNumerator(u32),

    #[error("Time signature denominator must be a power of 2 and <= 32, got {0}")]
    InvalidDenominator(u32),

    #[error("Malformed time signature '{0}', expected \"N/D\"")]
    Malformed(String),
}

/// Time signature (numerator/denominator)
/// Example: 4/4 time = TimeSignature { numerator: 4, denominator: 4 }
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    pub numerator: u8,   // Beats per bar
    pub denominator: u8, // Note value (4 = quarter note, 8 = eighth note)
}

impl TimeSignature {
    /// Creates a new time signature, validating both parts
    pub fn try_new(numerator: u32, denominator: u32) -> Result<Self, TimelineError> {
        if numerator == 0 || numerator > 32 {
            return Err(TimelineError::InvalidNumerator(numerator));
        }
        if !denominator.is_power_of_two() || denominator > 32 {
            return Err(TimelineError::InvalidDenominator(denominator));
        }
        Ok(Self {
            numerator: numerator as u8,
            denominator: denominator as u8,
        })
    }

    /// Common 4/4 time signature
    pub fn four_four() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }

    /// Common 3/4 time signature (waltz)
    pub fn three_four() -> Self {
        Self {
            numerator: 3,
            denominator: 4,
        }
    }

    /// Number of beats per bar
    pub fn beats_per_bar(&self) -> u32 {
        self.numerator as u32
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = TimelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TimelineError::Malformed(s.to_string());
        let (num, den) = s.trim().split_once('/').ok_or_else(malformed)?;
        let numerator = num.trim().parse::<u32>().map_err(|_| malformed())?;
        let denominator = den.trim().parse::<u32>().map_err(|_| malformed())?;
        Self::try_new(numerator, denominator)
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = TimelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(ts: TimeSignature) -> Self {
        ts.to_string()
    }
}

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    pub const MIN_BPM: f64 = 20.0;
    pub const MAX_BPM: f64 = 999.0;

    /// Creates a new tempo
    /// BPM must be in range [20.0, 999.0]
    pub fn try_new(bpm: f64) -> Result<Self, TimelineError> {
        if !(Self::MIN_BPM..=Self::MAX_BPM).contains(&bpm) {
            return Err(TimelineError::InvalidTempo(bpm));
        }
        Ok(Self { bpm })
    }

    /// Get BPM value
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Duration of one beat in seconds
    pub fn beat_duration_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Duration of one bar in seconds at given time signature
    pub fn bar_duration_seconds(&self, time_signature: &TimeSignature) -> f64 {
        self.beat_duration_seconds() * time_signature.beats_per_bar() as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: 120.0 }
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}
