//! Container decoding to mono PCM.

use std::io::Cursor;

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, Track},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// Mono samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode `bytes`, downmix to mono and resample to `target_rate`.
///
/// `extension` is only a probing hint.
pub fn ingest(bytes: &[u8], extension: Option<&str>, target_rate: u32) -> Result<Waveform> {
    let (samples, rate, channels) = decode_audio(bytes, extension)?;
    debug!(bytes = bytes.len(), samples = samples.len(), rate, channels, "decoded audio");

    let mono = to_mono(&samples, channels);
    let samples = resample(&mono, rate, target_rate)?;

    Ok(Waveform { samples, sample_rate: target_rate })
}

fn decode_audio(bytes: &[u8], extension: Option<&str>) -> Result<(Vec<f32>, u32, usize)> {
    let cursor = Cursor::new(bytes.to_vec());
    let media_source_stream = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut format = get_format(media_source_stream, extension)?;
    let track = format
        .default_track()
        .ok_or_else(|| Error::Decode("no audio track".into()))?;

    let mut decoder = get_decoder(track)?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("unknown sample rate".into()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| Error::Decode("unknown channel layout".into()))?;
    let track_id = track.id;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // end of stream surfaces as an io error
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(Error::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = e, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(Error::Decode(e.to_string())),
        };

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    Ok((samples, sample_rate, channels))
}

fn get_format(media_source_stream: MediaSourceStream, extension: Option<&str>) -> Result<Box<dyn FormatReader>> {
    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, media_source_stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Decode(format!("unsupported format: {e}")))?;

    Ok(probed.format)
}

fn get_decoder(track: &Track) -> Result<Box<dyn Decoder>> {
    symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(e.to_string()))
}

fn to_mono(input: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return input.to_vec();
    }
    input
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = output_rate as f64 / input_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| Error::Decode(format!("resampler setup failed: {e}")))?;

    let mut output = process(input, &mut resampler)?;

    // the zero-padded tail chunk overshoots the true length
    let expected = (input.len() as f64 * ratio).round() as usize;
    output.truncate(expected);
    Ok(output)
}

fn process(input: &[f32], resampler: &mut SincFixedIn<f32>) -> Result<Vec<f32>> {
    let mut output = Vec::new();
    let mut position = 0;

    while position + RESAMPLE_CHUNK <= input.len() {
        let chunk = [&input[position..position + RESAMPLE_CHUNK]];
        let result = resampler
            .process(&chunk, None)
            .map_err(|e| Error::Decode(format!("resampling failed: {e}")))?;

        output.extend_from_slice(&result[0]);
        position += RESAMPLE_CHUNK;
    }

    let remaining = input.len() - position;
    if remaining > 0 {
        let mut padded = vec![0.0; RESAMPLE_CHUNK];
        padded[..remaining].copy_from_slice(&input[position..]);

        let result = resampler
            .process(&[padded], None)
            .map_err(|e| Error::Decode(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output)
}
