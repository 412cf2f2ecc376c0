//! Audio file decoding using the `symphonia` crate.
//!
//! A `SourceReader` yields interleaved blocks of a fixed sample type, already
//! mapped to the output channel count.

use std::{
    collections::VecDeque,
    fs::File,
    io::{Error as StdError, ErrorKind::UnexpectedEof},
    path::{Path, PathBuf},
};

use {
    serde::{Deserialize, Serialize},
    symphonia::{
        core::{
            audio::SampleBuffer,
            codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions},
            errors::Error as SymphoniaError,
            formats::{FormatOptions, FormatReader},
            io::{MediaSourceStream, MediaSourceStreamOptions},
            meta::MetadataOptions,
            probe::Hint,
        },
        default::{get_codecs, get_probe},
    },
    thiserror::Error,
    tracing::{debug, warn},
};

use crate::audio::{
    format_detector::describe_format,
    sample::{PcmSample, SampleFormat},
};

/// Error type for audio decoding operations.
#[derive(Error, Debug)]
pub enum DecoderError {
    /// Failed to open or read the audio file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Symphonia decoding error.
    #[error("Decoding error: {0}")]
    SymphoniaError(#[from] SymphoniaError),
    /// No audio track found in file.
    #[error("No audio track found")]
    NoAudioTrack,
    /// The track does not declare its sample rate or channel layout.
    #[error("Missing stream parameter: {0}")]
    MissingParameter(&'static str),
}

/// Stream properties of an opened source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// File the properties were read from.
    pub path: PathBuf,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count in the file.
    pub channels: usize,
    /// Total frames, when the container declares it.
    pub frames: Option<u64>,
    /// Bits per sample, when known.
    pub bits_per_sample: Option<u32>,
    /// Container label.
    pub format: String,
    /// Bit-depth label.
    pub bit_depth: String,
    /// Buffer and stream sample format for this source.
    pub sample_format: SampleFormat,
}

struct OpenedSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
}

fn open_source(path: &Path) -> Result<OpenedSource, DecoderError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let extension = path.extension().and_then(|ext| ext.to_str());
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecoderError::NoAudioTrack)?;
    let codec_params = &track.codec_params;

    let sample_rate = codec_params
        .sample_rate
        .ok_or(DecoderError::MissingParameter("sample rate"))?;
    let channels = codec_params
        .channels
        .map(|channels| channels.count())
        .ok_or(DecoderError::MissingParameter("channel layout"))?;
    let bits_per_sample = codec_params
        .bits_per_sample
        .or(codec_params.bits_per_coded_sample);

    let labels = describe_format(codec_params.codec, bits_per_sample, extension);
    let info = SourceInfo {
        path: path.to_path_buf(),
        sample_rate,
        channels,
        frames: codec_params.n_frames,
        bits_per_sample,
        sample_format: SampleFormat::for_source(bits_per_sample, labels.integer_pcm),
        format: labels.format,
        bit_depth: labels.bit_depth,
    };

    let decoder = get_codecs().make(codec_params, &DecoderOptions::default())?;
    let track_id = track.id;

    Ok(OpenedSource {
        format_reader,
        decoder,
        track_id,
        info,
    })
}

/// Reads stream properties without decoding any audio.
///
/// # Errors
///
/// Returns `DecoderError` if the file cannot be opened or has no decodable
/// audio track.
pub fn probe_source(path: &Path) -> Result<SourceInfo, DecoderError> {
    open_source(path).map(|source| source.info)
}

/// Sequential block reader over one audio file.
pub struct SourceReader<S: PcmSample> {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    output_channels: usize,
    sample_buf: Option<SampleBuffer<S>>,
    pending: VecDeque<S>,
    eof: bool,
}

impl<S: PcmSample> SourceReader<S> {
    /// Opens `path` and prepares to emit `output_channels`-wide frames.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if the file cannot be opened, probed, or has no
    /// decodable audio track.
    pub fn open(path: &Path, output_channels: usize) -> Result<Self, DecoderError> {
        let source = open_source(path)?;
        debug!(
            path = %path.display(),
            sample_rate = source.info.sample_rate,
            channels = source.info.channels,
            format = %source.info.format,
            "Opened source"
        );

        Ok(Self {
            format_reader: source.format_reader,
            decoder: source.decoder,
            track_id: source.track_id,
            output_channels: output_channels.max(1),
            sample_buf: None,
            pending: VecDeque::new(),
            eof: false,
        })
    }

    /// Reads up to `frames` frames into `out`, replacing its contents.
    ///
    /// Returns the number of frames read; fewer than requested only at the end
    /// of the stream, 0 once it is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` on read failures. Corrupt packets are skipped.
    pub fn read_block(&mut self, frames: usize, out: &mut Vec<S>) -> Result<usize, DecoderError> {
        let wanted = frames * self.output_channels;
        while self.pending.len() < wanted && !self.eof {
            self.decode_packet()?;
        }

        let take = wanted.min(self.pending.len());
        out.clear();
        out.extend(self.pending.drain(..take));
        Ok(take / self.output_channels)
    }

    fn decode_packet(&mut self) -> Result<(), DecoderError> {
        let packet = match self.format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == UnexpectedEof => {
                self.eof = true;
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                debug!("Stream reset requested, treating as end of stream");
                self.eof = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                warn!(reason, "Skipping corrupt packet");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let source_channels = decoded.spec().channels.count();
        let needs_new_buffer = self
            .sample_buf
            .as_ref()
            .is_none_or(|buf| buf.capacity() < decoded.capacity() * source_channels);
        if needs_new_buffer {
            self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
        }

        if let Some(buf) = self.sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            map_channels(
                buf.samples(),
                source_channels,
                self.output_channels,
                &mut self.pending,
            );
        }
        Ok(())
    }
}

/// Appends interleaved `src` to `out`, converted from `src_channels` to
/// `dst_channels`.
///
/// Mono is duplicated, stereo is averaged down to mono, anything else keeps the
/// leading channels and pads missing ones with silence.
pub fn map_channels<S: PcmSample>(
    src: &[S],
    src_channels: usize,
    dst_channels: usize,
    out: &mut VecDeque<S>,
) {
    if src_channels == 0 || dst_channels == 0 {
        return;
    }

    for frame in src.chunks_exact(src_channels) {
        match (src_channels, dst_channels) {
            (src, dst) if src == dst => out.extend(frame.iter().copied()),
            (1, _) => out.extend(std::iter::repeat_n(frame[0], dst_channels)),
            (2, 1) => {
                let mixed = (frame[0].to_f32() + frame[1].to_f32()) * 0.5;
                out.push_back(S::from_f32(mixed));
            }
            _ => {
                for channel in 0..dst_channels {
                    out.push_back(frame.get(channel).copied().unwrap_or_else(S::zero));
                }
            }
        }
    }
}
