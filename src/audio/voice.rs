use std::path::Path;

use crate::hardware::ActuationError;

/// One playing asset: mono samples at the source rate, read out at the
/// output rate with linear interpolation.
#[derive(Debug, Clone)]
pub struct Voice {
    samples: Vec<f32>,
    position: f64,
    step: f64,
    gain: f32,
}

impl Voice {
    pub fn new(samples: Vec<f32>, source_rate: u32, output_rate: u32, gain: f32) -> Self {
        let step = if output_rate == 0 {
            1.0
        } else {
            source_rate as f64 / output_rate as f64
        };

        Self {
            samples,
            position: 0.0,
            step,
            gain,
        }
    }

    /// Cheap checks done before an asset is queued: WAV extension, file exists.
    pub fn check_playable(path: &Path) -> Result<(), ActuationError> {
        let is_wav = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if !is_wav {
            return Err(ActuationError::UnsupportedFormat(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(ActuationError::MissingAsset(path.to_path_buf()));
        }
        Ok(())
    }

    /// Decodes a WAV asset, down-mixing to mono.
    pub fn load(path: &Path, gain: f32, output_rate: u32) -> Result<Self, ActuationError> {
        Self::check_playable(path)?;

        let decode_err = |source| ActuationError::Decode {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = hound::WavReader::open(path).map_err(decode_err)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(decode_err)?
            }
        };

        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(Self::new(mono, spec.sample_rate, output_rate, gain))
    }

    pub fn next_sample(&mut self) -> Option<f32> {
        let index = self.position as usize;
        let current = *self.samples.get(index)?;
        let next = self.samples.get(index + 1).copied().unwrap_or(current);
        let frac = (self.position - index as f64) as f32;

        self.position += self.step;
        Some((current + (next - current) * frac) * self.gain)
    }

    pub fn is_finished(&self) -> bool {
        self.position as usize >= self.samples.len()
    }
}
