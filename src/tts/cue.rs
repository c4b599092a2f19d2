//! Short sine-tone cues marking pipeline stages.

use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamBuilder, Sink};
use tracing::{debug, warn};

pub const CUE_SAMPLE_RATE: u32 = 44100;

/// A pure sine tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub frequency: f32,
    pub duration: Duration,
    pub amplitude: f32,
}

/// Audible markers for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// Recording is about to start.
    Ready,
    /// Recording finished.
    Done,
    /// Something went wrong.
    Error,
}

impl Cue {
    pub fn tone(self) -> Tone {
        match self {
            Cue::Ready => Tone {
                frequency: 880.0,
                duration: Duration::from_millis(100),
                amplitude: 0.3,
            },
            Cue::Done => Tone {
                frequency: 440.0,
                duration: Duration::from_millis(150),
                amplitude: 0.3,
            },
            Cue::Error => Tone {
                frequency: 220.0,
                duration: Duration::from_millis(300),
                amplitude: 0.4,
            },
        }
    }
}

/// Render `tone` as mono f32 samples.
pub fn sine_samples(tone: Tone, sample_rate: u32) -> Vec<f32> {
    let count = (tone.duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
    let step = 2.0 * std::f64::consts::PI * f64::from(tone.frequency) / f64::from(sample_rate);
    (0..count)
        .map(|i| (tone.amplitude as f64 * (step * i as f64).sin()) as f32)
        .collect()
}

/// Plays cues. Playback problems are never reported to the caller.
pub trait CuePlayer: Send + Sync {
    /// Play `cue` to completion.
    fn play(&self, cue: Cue);
}

/// Cue player on the default output device.
#[derive(Debug, Default, Clone, Copy)]
pub struct TonePlayer;

impl TonePlayer {
    fn try_play(tone: Tone) -> Result<(), String> {
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| format!("Failed to open audio output: {e}"))?;
        stream.log_on_drop(false);
        let sink = Sink::connect_new(stream.mixer());
        sink.append(SamplesBuffer::new(1, CUE_SAMPLE_RATE, sine_samples(tone, CUE_SAMPLE_RATE)));
        sink.sleep_until_end();
        Ok(())
    }
}

impl CuePlayer for TonePlayer {
    fn play(&self, cue: Cue) {
        debug!("Cue: {cue:?}");
        if let Err(e) = Self::try_play(cue.tone()) {
            warn!("Could not play {cue:?} cue: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        assert_eq!(Cue::Ready.tone().frequency, 880.0);
        assert_eq!(Cue::Done.tone().duration, Duration::from_millis(150));
        assert_eq!(Cue::Error.tone().amplitude, 0.4);
    }

    #[test]
    fn sample_count_follows_duration() {
        assert_eq!(sine_samples(Cue::Ready.tone(), CUE_SAMPLE_RATE).len(), 4410);
        assert_eq!(sine_samples(Cue::Error.tone(), CUE_SAMPLE_RATE).len(), 13230);
    }

    #[test]
    fn amplitude_bounds_the_wave() {
        let samples = sine_samples(Cue::Done.tone(), CUE_SAMPLE_RATE);
        let peak = samples.iter().fold(0.0_f32, |p, s| p.max(s.abs()));
        assert!(peak <= 0.3 + f32::EPSILON);
        assert!(peak > 0.29);
        assert_eq!(samples[0], 0.0);
    }
}
