//! Streaming sample rate conversion using the `rubato` crate.
//!
//! One `AudioResampler` lives for the whole track so filter state carries
//! across block boundaries.

use {
    audioadapter_buffers::direct::InterleavedSlice,
    rubato::{
        Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters,
        SincInterpolationType, WindowFunction, calculate_cutoff,
    },
    thiserror::Error,
    tracing::debug,
};

use crate::audio::sample::PcmSample;

/// Sinc filter length, in taps.
const SINC_LEN: usize = 128;

/// Oversampling of the sinc table.
const OVERSAMPLING_FACTOR: usize = 256;

/// Largest ratio change the resampler is built for; the ratio is never changed.
const MAX_RATIO_RELATIVE: f64 = 1.1;

/// Error type for resampling operations.
#[derive(Error, Debug)]
pub enum ResamplingError {
    /// Rubato refused to build or run the resampler.
    #[error("Rubato error: {0}")]
    RubatoError(String),
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Stateful sinc resampler over interleaved blocks.
///
/// The filter delay is trimmed from the start of the output, and `flush`
/// drains it at the end, so a track keeps its length and alignment.
pub struct AudioResampler {
    resampler: Async<f32>,
    ratio: f64,
    channels: usize,
    chunk_frames: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    delay: usize,
    frames_to_trim: usize,
    frames_in: u64,
    frames_out: u64,
}

impl AudioResampler {
    /// Creates a resampler taking blocks of `chunk_frames` source frames.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if a rate, the channel count or the chunk size
    /// is zero, or if rubato rejects the parameters.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self, ResamplingError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Sample rates must be greater than 0".to_string(),
            ));
        }
        if channels == 0 || chunk_frames == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Channels and chunk size must be greater than 0".to_string(),
            ));
        }

        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len: SINC_LEN,
            f_cutoff: calculate_cutoff(SINC_LEN, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: OVERSAMPLING_FACTOR,
            window,
        };

        let ratio = f64::from(target_rate) / f64::from(source_rate);
        let resampler = Async::<f32>::new_sinc(
            ratio,
            MAX_RATIO_RELATIVE,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        let output = vec![0.0; resampler.output_frames_max() * channels];
        let delay = resampler.output_delay();
        debug!(source_rate, target_rate, channels, chunk_frames, delay, "Resampler created");

        Ok(Self {
            resampler,
            ratio,
            channels,
            chunk_frames,
            input: vec![0.0; chunk_frames * channels],
            output,
            delay,
            frames_to_trim: delay,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Resamples one interleaved block into `out`, replacing its contents.
    ///
    /// `block` holds at most `chunk_frames` frames; a shorter block is the
    /// final one and is processed as a partial chunk. Returns the number of
    /// frames written to `out`, which is 0 while the filter delay is being
    /// trimmed.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if the block is larger than a chunk or rubato
    /// fails.
    pub fn process<S: PcmSample>(
        &mut self,
        block: &[S],
        out: &mut Vec<S>,
    ) -> Result<usize, ResamplingError> {
        let frames = block.len() / self.channels;
        if frames > self.chunk_frames {
            return Err(ResamplingError::InvalidConfiguration(format!(
                "Block of {frames} frames exceeds chunk size {}",
                self.chunk_frames
            )));
        }

        for (slot, sample) in self.input.iter_mut().zip(block) {
            *slot = sample.to_f32();
        }
        self.input[frames * self.channels..].fill(0.0);

        let partial_len = (frames < self.chunk_frames).then_some(frames);
        let produced = self.run_chunk(partial_len)?;
        self.frames_in += frames as u64;

        out.clear();
        Ok(self.emit(produced, usize::MAX, out))
    }

    /// Drains the frames still held in the filter after the last block into
    /// `out`, replacing its contents.
    ///
    /// Afterwards the total output is the input length times the rate ratio,
    /// rounded up. Returns the number of frames written to `out`.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if rubato fails.
    pub fn flush<S: PcmSample>(&mut self, out: &mut Vec<S>) -> Result<usize, ResamplingError> {
        let expected = (self.ratio * self.frames_in as f64).ceil() as u64;
        let max_chunks = (self.delay as f64 / self.ratio / self.chunk_frames as f64).ceil() as usize + 2;

        out.clear();
        self.input.fill(0.0);
        for _ in 0..max_chunks {
            if self.frames_out >= expected {
                break;
            }
            let produced = self.run_chunk(Some(0))?;
            let missing = usize::try_from(expected - self.frames_out).unwrap_or(usize::MAX);
            self.emit(produced, missing, out);
        }
        Ok(out.len() / self.channels)
    }

    /// Runs one chunk of `self.input` through rubato and returns the number
    /// of frames left in `self.output`.
    fn run_chunk(&mut self, partial_len: Option<usize>) -> Result<usize, ResamplingError> {
        let input = InterleavedSlice::new(&self.input, self.channels, self.chunk_frames)
            .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;
        let capacity = self.output.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.output, self.channels, capacity)
            .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };

        let (_consumed, produced) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;
        Ok(produced)
    }

    /// Appends up to `limit` of the `produced` frames to `out`, skipping
    /// whatever is left of the leading delay.
    fn emit<S: PcmSample>(&mut self, produced: usize, limit: usize, out: &mut Vec<S>) -> usize {
        let skip = self.frames_to_trim.min(produced);
        self.frames_to_trim -= skip;
        let kept = (produced - skip).min(limit);

        out.extend(
            self.output[skip * self.channels..(skip + kept) * self.channels]
                .iter()
                .map(|&sample| S::from_f32(sample)),
        );
        self.frames_out += kept as u64;
        kept
    }
}

#[cfg(test)]
mod tests {
    use crate::audio::resampler::{AudioResampler, ResamplingError};

    #[test]
    fn test_invalid_resampler_creation() {
        assert!(matches!(
            AudioResampler::new(0, 48_000, 2, 512),
            Err(ResamplingError::InvalidConfiguration(_))
        ));
        assert!(AudioResampler::new(44_100, 48_000, 0, 512).is_err());
        assert!(AudioResampler::new(44_100, 48_000, 2, 0).is_err());
    }

    #[test]
    fn test_upsampling_produces_proportional_output() {
        let mut resampler = AudioResampler::new(44_100, 48_000, 2, 441).unwrap();
        let block = vec![0.25_f32; 441 * 2];
        let mut out = Vec::new();

        let mut total = 0;
        for _ in 0..20 {
            let frames = resampler.process(&block, &mut out).unwrap();
            assert_eq!(out.len(), frames * 2);
            total += frames;
        }

        // 20 blocks of 10 ms at 48 kHz.
        assert!(total > 9_000 && total <= 9_700, "produced {total} frames");
    }

    #[test]
    fn test_output_keeps_track_length_and_alignment() {
        let mut resampler = AudioResampler::new(16_000, 8_000, 1, 1_000).unwrap();
        let block = vec![0.5_f32; 1_000];
        let mut out = Vec::new();

        let mut total = 0;
        let mut first = None;
        for _ in 0..16 {
            total += resampler.process(&block, &mut out).unwrap();
            if first.is_none() {
                first = out.first().copied();
            }
        }
        total += resampler.flush(&mut out).unwrap();

        assert_eq!(total, 8_000);
        // The step at the start of the signal is not delayed by the filter.
        assert!(first.unwrap() > 0.1, "first sample {first:?}");
        assert_eq!(resampler.flush(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_short_final_block_and_integer_samples() {
        let mut resampler = AudioResampler::new(96_000, 48_000, 1, 1_000).unwrap();
        let mut out: Vec<i16> = Vec::new();

        resampler.process(&vec![1_000_i16; 1_000], &mut out).unwrap();
        let frames = resampler.process(&vec![1_000_i16; 300], &mut out).unwrap();
        assert_eq!(out.len(), frames);

        let oversized = vec![0_i16; 1_001];
        assert!(resampler.process(&oversized, &mut out).is_err());
    }
}
