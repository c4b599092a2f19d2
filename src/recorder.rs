//! Audio recording with cpal.
//!
//! Captures a fixed-duration mono f32 buffer per call. The stream is opened
//! for the capture and closed as soon as enough samples have arrived, so the
//! recorder itself holds no device handle and can move between threads.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::AudioConfig;
use crate::{Error, Result};

/// Extra time allowed past the nominal duration before a capture is declared stalled.
const STALL_GRACE: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Fixed-duration microphone recorder.
#[derive(Debug, Clone)]
pub struct AudioRecorder {
    config: AudioConfig,
}

struct CaptureState {
    buffer: Vec<f32>,
    max_samples: usize,
    stream_error: Option<String>,
}

impl AudioRecorder {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Record `duration` of audio from the default input device.
    ///
    /// Blocks until the buffer is full. Multi-channel devices are downmixed.
    pub fn record(&self, duration: Duration) -> Result<Vec<f32>> {
        let max_samples = (duration.as_secs_f64() * f64::from(self.config.sample_rate)) as usize;
        if max_samples == 0 {
            return Ok(Vec::new());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("No input audio device available".into()))?;

        debug!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let channels = self.config.channels.max(1);
        let stream_config = StreamConfig {
            channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(Mutex::new(CaptureState {
            buffer: Vec::with_capacity(max_samples),
            max_samples,
            stream_error: None,
        }));

        let data_state = Arc::clone(&shared);
        let error_state = Arc::clone(&shared);
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mut inner = data_state.lock().unwrap_or_else(PoisonError::into_inner);
                    let remaining = inner.max_samples.saturating_sub(inner.buffer.len());
                    if remaining == 0 {
                        return;
                    }
                    let mono = downmix(data, channels);
                    let to_copy = mono.len().min(remaining);
                    inner.buffer.extend_from_slice(&mono[..to_copy]);
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                    let mut inner = error_state.lock().unwrap_or_else(PoisonError::into_inner);
                    inner.stream_error = Some(err.to_string());
                },
                None, // timeout
            )
            .map_err(|e| Error::Audio(format!("Failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| Error::Audio(format!("Failed to start audio stream: {e}")))?;

        info!("Recording for {:.1} seconds...", duration.as_secs_f64());
        let deadline = Instant::now() + duration + STALL_GRACE;

        loop {
            std::thread::sleep(POLL_INTERVAL);
            let inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(err) = &inner.stream_error {
                return Err(Error::Audio(format!("Audio stream failed: {err}")));
            }
            if inner.buffer.len() >= inner.max_samples {
                break;
            }
            if Instant::now() >= deadline {
                return Err(Error::Audio(format!(
                    "Capture stalled after {} of {} samples",
                    inner.buffer.len(),
                    inner.max_samples
                )));
            }
        }

        drop(stream);

        let samples = std::mem::take(&mut shared.lock().unwrap_or_else(PoisonError::into_inner).buffer);
        let seconds = samples.len() as f64 / f64::from(self.config.sample_rate);
        info!("Recording complete: {:.1}s ({} samples)", seconds, samples.len());
        Ok(samples)
    }
}

/// Average interleaved frames down to a single channel.
fn downmix(data: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    let n = usize::from(channels);
    data.chunks(n)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Largest absolute sample value.
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()))
}

/// True when nothing in the buffer reaches `threshold`.
pub fn is_silent(samples: &[f32], threshold: f32) -> bool {
    let peak = peak_amplitude(samples);
    debug!("Audio peak amplitude: {peak:.4} (threshold: {threshold})");
    peak < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_uses_absolute_value() {
        assert_eq!(peak_amplitude(&[]), 0.0);
        assert_eq!(peak_amplitude(&[0.1, -0.5, 0.2]), 0.5);
    }

    #[test]
    fn silence_threshold_is_exclusive() {
        assert!(is_silent(&vec![0.0; 16000], 0.01));
        assert!(is_silent(&[0.009, -0.009], 0.01));
        assert!(!is_silent(&[0.0, 0.01], 0.01));
        assert!(!is_silent(&[0.0, -0.3], 0.01));
    }

    #[test]
    fn downmix_averages_frames() {
        assert_eq!(downmix(&[0.25, 0.75, -1.0, 1.0], 2), vec![0.5, 0.0]);
        assert_eq!(downmix(&[0.5, 0.25], 1), vec![0.5, 0.25]);
    }

    #[test]
    fn zero_duration_records_nothing() {
        let recorder = AudioRecorder::new(AudioConfig::default());
        assert!(recorder.record(Duration::ZERO).unwrap().is_empty());
    }
}
