//! Cavebot: records player navigation from the live packet stream,
//! compiles recordings into executable actions maps, and plays them back
//! against the world model.

pub mod compiler;
pub mod playback;
pub mod recording;

pub use compiler::{build_actions_map, ActionNode};
pub use playback::{PlaybackConfig, PlaybackEngine, PlaybackStatus, TargetingStrategy};
pub use recording::{Recorder, Recording, RecordingStore, Waypoint};
