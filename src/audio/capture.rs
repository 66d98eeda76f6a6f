//! Microphone capture and the outbound capture pipeline.
//!
//! Opens the default (or named) input device via cpal, downmixes to mono,
//! resamples to 16 kHz and hands fixed 4096-sample frames to the
//! [`CapturePipeline`], which encodes them and pushes them to the remote
//! channel unless the session is muted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::codec::{self, WireChunk, INPUT_SAMPLE_RATE};
use crate::error::AudioError;

/// Samples per capture frame (256 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;

/// Queue feeding the remote channel's writer.
pub type OutboundSender = mpsc::UnboundedSender<WireChunk>;

/// What happened to one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Forwarded,
    /// Dropped before encoding.
    Muted,
    /// Channel not open yet, or already torn down.
    Unwired,
    /// The outbound queue's receiver is gone.
    ChannelClosed,
}

#[derive(Default)]
struct CaptureShared {
    muted: AtomicBool,
    outbound: Mutex<Option<OutboundSender>>,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Per-frame encode-and-forward stage. Cheap to clone; clones share state,
/// so the session keeps one handle while the device callback owns another.
#[derive(Clone, Default)]
pub struct CapturePipeline {
    inner: Arc<CaptureShared>,
}

impl CapturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding frames to `outbound`.
    pub fn wire(&self, outbound: OutboundSender) {
        match self.inner.outbound.lock() {
            Ok(mut guard) => *guard = Some(outbound),
            Err(e) => error!("Failed to lock capture outbound: {}", e),
        }
    }

    /// Stop forwarding. Frames captured afterwards are dropped.
    pub fn unwire(&self) {
        match self.inner.outbound.lock() {
            Ok(mut guard) => *guard = None,
            Err(e) => error!("Failed to lock capture outbound: {}", e),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Acquire)
    }

    /// Frames handed to the outbound queue so far.
    pub fn forwarded_frames(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }

    /// Frames dropped (muted, unwired or closed channel) so far.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Handle one captured frame. Never blocks.
    pub fn process_frame(&self, frame: &[f32]) -> FrameOutcome {
        let outcome = self.forward(frame);
        if outcome == FrameOutcome::Forwarded {
            self.inner.forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    fn forward(&self, frame: &[f32]) -> FrameOutcome {
        if self.is_muted() {
            return FrameOutcome::Muted;
        }

        // Clone the sender out so encoding happens without holding the lock.
        let outbound = match self.inner.outbound.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                error!("Failed to lock capture outbound: {}", e);
                None
            }
        };
        let Some(outbound) = outbound else {
            return FrameOutcome::Unwired;
        };

        let chunk = WireChunk::outbound(codec::encode(frame));
        if outbound.send(chunk).is_err() {
            return FrameOutcome::ChannelClosed;
        }
        FrameOutcome::Forwarded
    }
}

/// Turns arbitrary device callbacks into fixed 16 kHz mono frames.
pub struct FrameAccumulator {
    native_rate: u32,
    channels: u16,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(native_rate: u32, channels: u16) -> Self {
        Self {
            native_rate,
            channels,
            pending: Vec::with_capacity(FRAME_SAMPLES * 2),
        }
    }

    /// Feed raw interleaved device samples; `emit` runs once per full frame,
    /// in capture order.
    pub fn push(&mut self, data: &[f32], mut emit: impl FnMut(&[f32])) {
        let mono = to_mono(data, self.channels);
        let resampled = resample_linear(&mono, self.native_rate, INPUT_SAMPLE_RATE);
        self.pending.extend_from_slice(&resampled);
        while self.pending.len() >= FRAME_SAMPLES {
            let frame: Vec<f32> = self.pending.drain(..FRAME_SAMPLES).collect();
            emit(&frame);
        }
    }

    /// Samples waiting for the next full frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Live cpal input stream. Dropping it stops capture.
pub trait CaptureStream {
    fn close(&mut self) -> Result<(), AudioError>;
}

pub struct CpalCapture {
    stream: Option<Stream>,
}

impl CaptureStream for CpalCapture {
    fn close(&mut self) -> Result<(), AudioError> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| AudioError::Device("input already closed".into()))?;
        let paused = stream.pause();
        drop(stream);
        info!("Audio capture stopped");
        paused.map_err(|e| AudioError::Device(format!("Failed to pause input stream: {e}")))
    }
}

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Resolved info about the audio input we will use.
struct CaptureConfig {
    device: cpal::Device,
    stream_config: StreamConfig,
    native_rate: u32,
}

/// Find and configure the input device.
fn resolve_device(device_name: Option<&str>) -> Result<CaptureConfig, AudioError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to enumerate input devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceUnavailable(format!("Input device not found: {name}")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| AudioError::DeviceUnavailable("No default input device available".into()))?
    };

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    info!(device = %dev_name, "Selected input device");

    let default_config = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to get default input config: {e}")))?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        native_rate,
        channels,
        "Input device config (will resample to {}Hz mono if needed)",
        INPUT_SAMPLE_RATE,
    );

    Ok(CaptureConfig {
        device,
        stream_config,
        native_rate,
    })
}

/// Simple linear resampler from `from_rate` to `to_rate`.
/// Operates on mono f32 samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Start audio capture feeding `pipeline`. The returned stream must be kept
/// alive for capture to continue.
///
/// `device_name` of `None` uses the system default input.
pub fn start_capture(
    pipeline: CapturePipeline,
    device_name: Option<&str>,
) -> Result<CpalCapture, AudioError> {
    let cfg = resolve_device(device_name)?;
    let mut accumulator = FrameAccumulator::new(cfg.native_rate, cfg.stream_config.channels);
    let mut last_outcome = FrameOutcome::Unwired;

    let stream = cfg
        .device
        .build_input_stream(
            &cfg.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                accumulator.push(data, |frame| {
                    let outcome = pipeline.process_frame(frame);
                    if outcome != last_outcome {
                        debug!(?outcome, "Capture frame outcome changed");
                        last_outcome = outcome;
                    }
                });
            },
            move |err| {
                error!("Audio input stream error: {}", err);
            },
            None, // no timeout
        )
        .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to build input stream: {e}")))?;

    if let Err(e) = stream.play() {
        warn!("Failed to start input stream: {}", e);
        return Err(AudioError::DeviceUnavailable(format!("Failed to start input stream: {e}")));
    }

    info!("Audio capture started");

    Ok(CpalCapture {
        stream: Some(stream),
    })
}
