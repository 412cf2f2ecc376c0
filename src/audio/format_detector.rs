//! Container, codec and bit-depth labels for display.
//!
//! symphonia reports codec parameters but not the container, so the container
//! label is derived from the codec and, for raw PCM, from the file extension.

use {
    serde::{Deserialize, Serialize},
    symphonia::core::codecs::{
        CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_OPUS,
        CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64BE, CODEC_TYPE_PCM_F64LE,
        CODEC_TYPE_PCM_S8, CODEC_TYPE_PCM_S16BE, CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24BE,
        CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32BE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
        CODEC_TYPE_VORBIS, CODEC_TYPE_WAVPACK, CodecType,
    },
};

/// Display labels for a decoded source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatLabels {
    /// Container label, e.g. "FLAC" or "WAV".
    pub format: String,
    /// Bit-depth / encoding label, e.g. "Signed 24 bit PCM".
    pub bit_depth: String,
    /// Whether samples are integer PCM (lossless integer codecs included).
    pub integer_pcm: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Integer,
    Float,
    Lossy,
}

fn classify(codec: CodecType) -> Option<(&'static str, Encoding)> {
    let class = match codec {
        CODEC_TYPE_FLAC => ("FLAC", Encoding::Integer),
        CODEC_TYPE_ALAC => ("ALAC", Encoding::Integer),
        CODEC_TYPE_WAVPACK => ("WAVPACK", Encoding::Integer),
        CODEC_TYPE_PCM_S8 | CODEC_TYPE_PCM_U8 | CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE
        | CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE | CODEC_TYPE_PCM_S32LE
        | CODEC_TYPE_PCM_S32BE => ("PCM", Encoding::Integer),
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE | CODEC_TYPE_PCM_F64LE
        | CODEC_TYPE_PCM_F64BE => ("PCM", Encoding::Float),
        CODEC_TYPE_MP3 => ("MP3", Encoding::Lossy),
        CODEC_TYPE_AAC => ("MP4", Encoding::Lossy),
        CODEC_TYPE_VORBIS => ("OGG", Encoding::Lossy),
        CODEC_TYPE_OPUS => ("OPUS", Encoding::Lossy),
        _ => return None,
    };
    Some(class)
}

/// Derives display labels from a codec and its bit depth.
///
/// `extension` names the container for raw PCM (`wav` becomes "WAV").
#[must_use]
pub fn describe_format(
    codec: CodecType,
    bits_per_sample: Option<u32>,
    extension: Option<&str>,
) -> FormatLabels {
    let Some((container, encoding)) = classify(codec) else {
        return FormatLabels {
            format: extension.map_or_else(|| "UNKNOWN".to_string(), str::to_uppercase),
            bit_depth: "Unknown".to_string(),
            integer_pcm: false,
        };
    };

    let format = match (container, extension) {
        ("PCM", Some(ext)) => ext.to_uppercase(),
        (container, _) => container.to_string(),
    };

    let bit_depth = match (encoding, bits_per_sample) {
        (Encoding::Integer, Some(8)) if codec == CODEC_TYPE_PCM_U8 => "Unsigned 8 bit PCM".to_string(),
        (Encoding::Integer, Some(bits)) => format!("Signed {bits} bit PCM"),
        (Encoding::Integer, None) => "PCM".to_string(),
        (Encoding::Float, Some(64)) => "64 bit float".to_string(),
        (Encoding::Float, _) => "32 bit float".to_string(),
        (Encoding::Lossy, _) => container.to_string(),
    };

    FormatLabels {
        format,
        bit_depth,
        integer_pcm: encoding == Encoding::Integer,
    }
}

#[cfg(test)]
mod tests {
    use symphonia::core::codecs::{
        CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_NULL, CODEC_TYPE_PCM_F32LE,
        CODEC_TYPE_PCM_S16LE,
    };

    use crate::audio::format_detector::describe_format;

    #[test]
    fn test_flac_labels() {
        let labels = describe_format(CODEC_TYPE_FLAC, Some(24), Some("flac"));
        assert_eq!(labels.format, "FLAC");
        assert_eq!(labels.bit_depth, "Signed 24 bit PCM");
        assert!(labels.integer_pcm);
    }

    #[test]
    fn test_raw_pcm_takes_container_from_extension() {
        let labels = describe_format(CODEC_TYPE_PCM_S16LE, Some(16), Some("wav"));
        assert_eq!(labels.format, "WAV");
        assert_eq!(labels.bit_depth, "Signed 16 bit PCM");

        let float = describe_format(CODEC_TYPE_PCM_F32LE, Some(32), Some("wav"));
        assert_eq!(float.bit_depth, "32 bit float");
        assert!(!float.integer_pcm);
    }

    #[test]
    fn test_lossy_and_unknown_codecs() {
        let mp3 = describe_format(CODEC_TYPE_MP3, None, Some("mp3"));
        assert_eq!(mp3.format, "MP3");
        assert!(!mp3.integer_pcm);

        let unknown = describe_format(CODEC_TYPE_NULL, None, None);
        assert_eq!(unknown.format, "UNKNOWN");
    }
}
