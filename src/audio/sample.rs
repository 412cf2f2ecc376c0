//! Sample formats the engine can stream.

use std::fmt::{Display, Formatter, Result as FmtResult};

use {
    cpal::SizedSample,
    num_traits::Zero,
    serde::{Deserialize, Serialize},
    symphonia::core::conv::{ConvertibleSample, FromSample, IntoSample},
};

/// In-memory sample layout of the buffer and of the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer (carries 24-bit sources left-aligned).
    I32,
    /// 32-bit float.
    F32,
}

impl SampleFormat {
    /// Selects the format from the source's bit depth.
    ///
    /// 16-bit PCM maps to `I16`, 24-bit PCM to `I32`, everything else
    /// (float PCM, lossy codecs, unknown depth, 8 or 32-bit integers) to `F32`.
    #[must_use]
    pub fn for_source(bits_per_sample: Option<u32>, integer_pcm: bool) -> Self {
        match (integer_pcm, bits_per_sample) {
            (true, Some(16)) => Self::I16,
            (true, Some(24)) => Self::I32,
            _ => Self::F32,
        }
    }
}

impl Display for SampleFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::F32 => "float32",
        };
        f.write_str(name)
    }
}

/// A sample type that can be decoded into, resampled, and written to a device.
pub trait PcmSample:
    ConvertibleSample + IntoSample<f32> + SizedSample + Zero + Default + Send + Sync + 'static
{
    /// Format tag matching this type.
    const FORMAT: SampleFormat;

    /// Converts to a float in `[-1.0, 1.0]` for resampling and mixing.
    fn to_f32(self) -> f32 {
        self.into_sample()
    }

    /// Converts back from a float produced by the resampler.
    fn from_f32(value: f32) -> Self {
        <Self as FromSample<f32>>::from_sample(value)
    }
}

impl PcmSample for i16 {
    const FORMAT: SampleFormat = SampleFormat::I16;
}

impl PcmSample for i32 {
    const FORMAT: SampleFormat = SampleFormat::I32;
}

impl PcmSample for f32 {
    const FORMAT: SampleFormat = SampleFormat::F32;
}

#[cfg(test)]
mod tests {
    use crate::audio::sample::{PcmSample, SampleFormat};

    #[test]
    fn test_format_selection_is_exact() {
        assert_eq!(SampleFormat::for_source(Some(16), true), SampleFormat::I16);
        assert_eq!(SampleFormat::for_source(Some(24), true), SampleFormat::I32);
        assert_eq!(SampleFormat::for_source(Some(32), true), SampleFormat::F32);
        assert_eq!(SampleFormat::for_source(Some(8), true), SampleFormat::F32);
        assert_eq!(SampleFormat::for_source(Some(16), false), SampleFormat::F32);
        assert_eq!(SampleFormat::for_source(None, true), SampleFormat::F32);
    }

    #[test]
    fn test_float_conversions() {
        assert_eq!(i16::from_f32(0.0), 0);
        assert!(i16::from_f32(1.0) >= i16::MAX - 1);
        assert!((0.5_f32.to_f32() - 0.5).abs() < f32::EPSILON);
        assert!((i32::from_f32(-1.0).to_f32() + 1.0).abs() < 1e-6);
        assert_eq!(<f32 as PcmSample>::FORMAT, SampleFormat::F32);
    }
}
