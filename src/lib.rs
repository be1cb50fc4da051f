// Looptrack - Library exports for the binary, tests and benchmarks

pub mod audio;
pub mod project;
pub mod sequencer;
pub mod session;

// Re-export commonly used types for convenience
pub use audio::buffer_transport::{BufferTransport, TrackReader};
pub use audio::click::ClickRenderer;
pub use audio::engine::{AudioEngine, ClickQueue};
pub use audio::export::{AudioExporter, ExportSettings};
pub use audio::loader::{TrackBuffer, load_track};
pub use audio::mixer::{VolumeMixer, VolumeSnapshot};
pub use project::{JsonFileStore, MemoryStore, SettingsStore, Song, SongError};
pub use sequencer::{
    BarDescriptor, BeatInfo, BeatTimingService, ClickType, LoopController, LoopRegion,
    LoopState, ManualTransport, MetronomeScheduler, PlaybackClock, Tempo, TimeSignature,
};
pub use session::{BeatPosition, PracticeSession, TickReport};
