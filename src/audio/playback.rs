//! Gapless playback scheduling on the output device timeline.
//!
//! Each decoded chunk is placed at `max(now, next_free_slot)` so consecutive
//! chunks play back-to-back with no silence and no overlap. Every scheduled
//! chunk stays in the active set until the device reports it finished or an
//! interruption stops it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::buffer::SamplesBuffer;
use rodio::source::{EmptyCallback, Zero};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::codec::AudioBuffer;
use crate::error::AudioError;

/// Identifies one scheduled chunk for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HandleId(u64);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sender the output device uses to report chunks that finished naturally.
pub type PlaybackNotifier = mpsc::UnboundedSender<HandleId>;

/// Output side of the audio hardware, as seen by the scheduler.
pub trait OutputDevice {
    /// Monotonic device clock: how much audio the device has played.
    fn now(&self) -> Duration;

    /// Queue `buffer` to start at `start` on the device clock. The device
    /// reports `id` on its notifier when playback ends naturally.
    fn play_at(&mut self, id: HandleId, buffer: &AudioBuffer, start: Duration) -> Result<(), AudioError>;

    /// Cut off everything queued. No completion is reported for it.
    fn stop_all(&mut self);

    /// Release the device. Called once, during teardown.
    fn close(&mut self) -> Result<(), AudioError>;
}

/// One in-flight chunk owned by the scheduler.
#[derive(Debug)]
pub struct PlaybackHandle {
    pub id: HandleId,
    pub buffer: AudioBuffer,
    pub scheduled_start: Duration,
}

impl PlaybackHandle {
    pub fn scheduled_end(&self) -> Duration {
        self.scheduled_start + self.buffer.duration()
    }
}

/// Where a chunk landed on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub id: HandleId,
    pub start: Duration,
    pub end: Duration,
}

/// Gapless scheduler over an [`OutputDevice`].
pub struct PlaybackScheduler {
    output: Box<dyn OutputDevice>,
    next_free_slot: Duration,
    active: BTreeMap<HandleId, PlaybackHandle>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputDevice>) -> Self {
        Self {
            output,
            next_free_slot: Duration::ZERO,
            active: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Queue a decoded chunk right after everything already queued.
    ///
    /// On error the chunk is dropped and the timeline is left untouched.
    pub fn schedule(&mut self, buffer: AudioBuffer) -> Result<Scheduled, AudioError> {
        if buffer.is_empty() {
            return Err(AudioError::PlaybackScheduling("empty buffer".into()));
        }

        let now = self.output.now();
        let start = now.max(self.next_free_slot);
        let id = HandleId(self.next_id);
        self.next_id += 1;

        self.output.play_at(id, &buffer, start)?;
        let end = start + buffer.duration();
        self.next_free_slot = end;

        debug!(
            id = %id,
            start_ms = start.as_millis() as u64,
            end_ms = end.as_millis() as u64,
            lead_ms = start.saturating_sub(now).as_millis() as u64,
            "Chunk scheduled"
        );

        self.active.insert(
            id,
            PlaybackHandle {
                id,
                buffer,
                scheduled_start: start,
            },
        );

        Ok(Scheduled { id, start, end })
    }

    /// Stop every active chunk, forget them and restart the timeline at now.
    ///
    /// Returns how many chunks were cut off.
    pub fn interrupt(&mut self) -> usize {
        let stopped = std::mem::take(&mut self.active).len();
        self.output.stop_all();
        self.next_free_slot = self.output.now();
        if stopped > 0 {
            info!(stopped, "Playback interrupted");
        }
        stopped
    }

    /// Drop a chunk that finished naturally. Unknown ids are ignored (the
    /// chunk may already have been cut off by an interruption).
    pub fn release(&mut self, id: HandleId) -> bool {
        match self.active.remove(&id) {
            Some(handle) => {
                debug!(
                    id = %id,
                    end_ms = handle.scheduled_end().as_millis() as u64,
                    now_ms = self.output.now().as_millis() as u64,
                    "Chunk released"
                );
                true
            }
            None => false,
        }
    }

    /// Stop everything and release the output device.
    pub fn shutdown(mut self) -> Result<(), AudioError> {
        self.interrupt();
        self.output.close()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn next_free_slot(&self) -> Duration {
        self.next_free_slot
    }

    pub fn now(&self) -> Duration {
        self.output.now()
    }
}

// ---------------------------------------------------------------------------
// rodio output
// ---------------------------------------------------------------------------

/// Output device backed by one long-lived rodio `Sink`. Chunks are appended
/// in order, each followed by a callback reporting natural completion. The
/// clock advances as the mixer pulls samples, so it tracks what was played
/// rather than wall time.
pub struct RodioOutput {
    stream: Option<OutputStream>,
    stream_handle: OutputStreamHandle,
    sink: Option<Sink>,
    /// Nanoseconds of audio pulled by the mixer, across every sink.
    played_nanos: Arc<AtomicU64>,
    /// Device time at which the current sink runs dry.
    queued_until: Duration,
    finished: PlaybackNotifier,
}

impl RodioOutput {
    /// Open the named output device, or the default one.
    pub fn open(device_name: Option<&str>, finished: PlaybackNotifier) -> Result<Self, AudioError> {
        let (stream, stream_handle) = open_output_stream(device_name)?;
        info!(device = device_name.unwrap_or("default"), "Audio output opened");
        Ok(Self {
            stream: Some(stream),
            stream_handle,
            sink: None,
            played_nanos: Arc::new(AtomicU64::new(0)),
            queued_until: Duration::ZERO,
            finished,
        })
    }

    fn sink(&mut self) -> Result<&Sink, AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::PlaybackScheduling("output closed".into()));
        }
        if self.sink.is_none() {
            let sink = Sink::try_new(&self.stream_handle)
                .map_err(|e| AudioError::PlaybackScheduling(format!("failed to create sink: {e}")))?;
            self.sink = Some(sink);
        }
        self.sink
            .as_ref()
            .ok_or_else(|| AudioError::PlaybackScheduling("no sink".into()))
    }
}

impl OutputDevice for RodioOutput {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.played_nanos.load(Ordering::Acquire))
    }

    fn play_at(&mut self, id: HandleId, buffer: &AudioBuffer, start: Duration) -> Result<(), AudioError> {
        let now = self.now();
        // An idle sink starts whatever is appended right away.
        let queued_until = self.queued_until.max(now);
        let gap = start.saturating_sub(queued_until);
        let channels = buffer.channel_count();
        let rate = buffer.sample_rate();
        let played = Arc::clone(&self.played_nanos);
        let finished = self.finished.clone();

        let sink = self.sink()?;
        if !gap.is_zero() {
            let silence = Zero::<f32>::new(channels, rate).take_duration(gap);
            sink.append(PlayedCounter::new(silence, Arc::clone(&played)));
        }
        let source = SamplesBuffer::new(channels, rate, buffer.interleaved());
        sink.append(PlayedCounter::new(source, played));
        sink.append(EmptyCallback::<f32>::new(Box::new(move || {
            // Receiver gone means the session is tearing down.
            let _ = finished.send(id);
        })));

        self.queued_until = queued_until + gap + buffer.duration();
        Ok(())
    }

    fn stop_all(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        // The next chunk goes on a fresh sink starting at the current position.
        self.queued_until = self.now();
    }

    fn close(&mut self) -> Result<(), AudioError> {
        self.stop_all();
        match self.stream.take() {
            Some(stream) => {
                drop(stream);
                info!("Audio output closed");
                Ok(())
            }
            None => Err(AudioError::Device("output already closed".into())),
        }
    }
}

/// Adds the playback time of every sample the mixer pulls to a shared counter.
struct PlayedCounter<S> {
    inner: S,
    played_nanos: Arc<AtomicU64>,
    samples_per_sec: u64,
    pulled: u64,
    reported_nanos: u64,
}

impl<S: Source<Item = f32>> PlayedCounter<S> {
    fn new(inner: S, played_nanos: Arc<AtomicU64>) -> Self {
        let samples_per_sec = (inner.sample_rate() as u64 * inner.channels() as u64).max(1);
        Self {
            inner,
            played_nanos,
            samples_per_sec,
            pulled: 0,
            reported_nanos: 0,
        }
    }
}

impl<S: Source<Item = f32>> Iterator for PlayedCounter<S> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let sample = self.inner.next()?;
        self.pulled += 1;
        let nanos = self.pulled * 1_000_000_000 / self.samples_per_sec;
        self.played_nanos
            .fetch_add(nanos - self.reported_nanos, Ordering::AcqRel);
        self.reported_nanos = nanos;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S: Source<Item = f32>> Source for PlayedCounter<S> {
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

/// Open the audio output stream for a named or default device.
fn open_output_stream(
    output_device_name: Option<&str>,
) -> Result<(OutputStream, OutputStreamHandle), AudioError> {
    if let Some(name) = output_device_name {
        let host = cpal::default_host();
        let device = host
            .output_devices()
            .map_err(|e| AudioError::DeviceUnavailable(format!("Failed to enumerate output devices: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false));

        match device {
            Some(dev) => OutputStream::try_from_device(&dev).map_err(|e| {
                AudioError::DeviceUnavailable(format!("Failed to open output device '{name}': {e}"))
            }),
            None => {
                warn!(device = %name, "Configured output device not found, falling back to default");
                OutputStream::try_default().map_err(|e| {
                    AudioError::DeviceUnavailable(format!("No audio output device available: {e}"))
                })
            }
        }
    } else {
        OutputStream::try_default()
            .map_err(|e| AudioError::DeviceUnavailable(format!("No audio output device available: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------
