//! Audio codec, capture, playback scheduling and device backends.

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
pub mod state;

pub use capture::{list_devices, list_output_devices, CapturePipeline, FrameOutcome};
pub use codec::{AudioBuffer, WireChunk};
pub use device::{AudioBackend, SystemAudio};
pub use playback::{HandleId, PlaybackScheduler};
pub use state::SessionState;
