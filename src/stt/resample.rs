//! Sample-rate conversion with rubato.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample mono audio from `from_rate` to `to_rate`.
///
/// The output length is `len * to_rate / from_rate`. The resampler's fixed
/// delay is trimmed from the front and the tail is flushed with silence.
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
            .map_err(|e| Error::Stt(format!("Resampler init failed: {e}")))?;

    let expected = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let delay = resampler.output_delay();

    let mut input = samples.chunks(CHUNK_SIZE);
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    while output.len() < delay + expected {
        let mut block: Vec<f64> = input
            .next()
            .map(|chunk| chunk.iter().map(|&s| f64::from(s)).collect())
            .unwrap_or_default();
        block.resize(CHUNK_SIZE, 0.0);

        let frames = resampler
            .process(&[block], None)
            .map_err(|e| Error::Stt(format!("Resample failed: {e}")))?;
        output.extend(frames[0].iter().map(|&s| s as f32));
    }

    Ok(output[delay..delay + expected].to_vec())
}
