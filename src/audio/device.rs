//! Audio hardware backends.
//!
//! The session only sees [`AudioBackend`]; [`SystemAudio`] opens the real
//! microphone through cpal and the real speakers through rodio.

use super::capture::{start_capture, CapturePipeline, CaptureStream};
use super::playback::{OutputDevice, PlaybackNotifier, RodioOutput};
use crate::error::AudioError;

/// Opens the input and output sides of the audio hardware.
pub trait AudioBackend {
    /// Open the microphone and start feeding `capture`.
    fn open_input(&self, capture: CapturePipeline) -> Result<Box<dyn CaptureStream>, AudioError>;

    /// Open the speakers. Finished chunks are reported on `finished`.
    fn open_output(&self, finished: PlaybackNotifier) -> Result<Box<dyn OutputDevice>, AudioError>;
}

/// The machine's audio devices, optionally pinned by name.
#[derive(Debug, Clone, Default)]
pub struct SystemAudio {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl SystemAudio {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

impl AudioBackend for SystemAudio {
    fn open_input(&self, capture: CapturePipeline) -> Result<Box<dyn CaptureStream>, AudioError> {
        let stream = start_capture(capture, self.input_device.as_deref())?;
        Ok(Box::new(stream))
    }

    fn open_output(&self, finished: PlaybackNotifier) -> Result<Box<dyn OutputDevice>, AudioError> {
        let output = RodioOutput::open(self.output_device.as_deref(), finished)?;
        Ok(Box::new(output))
    }
}
