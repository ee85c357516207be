//! Audio validation and decoding utilities.
//!
//! Staged files are decoded to 16 kHz mono PCM (`f32`) because that is the
//! input format expected by the speaker-embedding backend.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::error::AppError;

/// Sample rate delivered to the speaker model.
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

/// File extensions accepted by upload validation.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg", "webm"];

/// Validates and normalizes the file extension from an uploaded filename.
///
/// Returns the lowercased extension without the leading dot.
pub fn validate_extension(filename: &str) -> Result<String, AppError> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_ascii_lowercase())
        .ok_or_else(|| {
            AppError::unsupported_media(
                "file must include an extension; accepted extensions: .wav,.mp3,.m4a,.flac,.ogg,.webm",
            )
        })?;

    if !SUPPORTED_EXTENSIONS.iter().any(|ext| *ext == extension) {
        return Err(AppError::unsupported_media(format!(
            "unsupported file extension .{extension}; accepted extensions: .wav,.mp3,.m4a,.flac,.ogg,.webm"
        )));
    }

    Ok(extension)
}

/// Decodes a staged media file into normalized 16 kHz mono samples.
pub fn decode_to_mono_16k(path: &Path) -> Result<Vec<f32>, AppError> {
    let file = File::open(path)
        .map_err(|err| AppError::model(format!("failed to open staged audio {path:?}: {err}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|err| AppError::unsupported_media(format!("failed to open media file: {err}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| AppError::unsupported_media("no audio track found in uploaded file"))?;

    if track.codec_params.codec == CODEC_TYPE_NULL {
        return Err(AppError::unsupported_media(
            "unsupported codec: missing codec information",
        ));
    }

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|err| AppError::unsupported_media(format!("unsupported codec: {err}")))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(MODEL_SAMPLE_RATE);
    let track_id = track.id;
    let mut mono = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                return Err(AppError::unsupported_media(
                    "decoder reset required for this media stream",
                ));
            }
            Err(err) => {
                return Err(AppError::unsupported_media(format!(
                    "failed while reading media stream: {err}"
                )));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(err) => {
                return Err(AppError::unsupported_media(format!(
                    "failed to decode audio packet: {err}"
                )));
            }
        };

        sample_rate = decoded.spec().rate;
        let channels = decoded.spec().channels.count();

        let mut sample_buffer =
            SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        sample_buffer.copy_interleaved_ref(decoded);
        let samples = sample_buffer.samples();

        if channels <= 1 {
            mono.extend_from_slice(samples);
            continue;
        }

        for frame in samples.chunks(channels) {
            let sum: f32 = frame.iter().copied().sum();
            mono.push(sum / channels as f32);
        }
    }

    if mono.is_empty() {
        return Err(AppError::unsupported_media(
            "decoded audio is empty after processing",
        ));
    }

    let normalized = mono
        .into_iter()
        .map(|s| s.clamp(-1.0, 1.0))
        .collect::<Vec<_>>();

    Ok(if sample_rate == MODEL_SAMPLE_RATE {
        normalized
    } else {
        resample_linear(&normalized, sample_rate, MODEL_SAMPLE_RATE)
    })
}

/// Resamples a mono signal from `src_rate` to `dst_rate` via linear interpolation.
fn resample_linear(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || input.len() < 2 {
        return input.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = ((input.len() as f64) * (dst_rate as f64) / (src_rate as f64)).round() as usize;
    let out_len = out_len.max(1);

    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;

        let a = input[idx.min(input.len() - 1)];
        let b = input[(idx + 1).min(input.len() - 1)];
        out.push(a + (b - a) * frac);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_extension() {
        assert!(validate_extension("clip").is_err());
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(validate_extension("clip.pdf").is_err());
    }

    #[test]
    fn accepts_wav_case_insensitively() {
        assert!(matches!(
            validate_extension("clip.WAV").as_deref(),
            Ok("wav")
        ));
    }

    #[test]
    fn resample_halves_sample_count() {
        let input = vec![0.0f32; 32_000];
        let out = resample_linear(&input, 32_000, 16_000);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn resample_is_identity_at_target_rate() {
        let input = vec![0.25f32, -0.5, 0.75];
        assert_eq!(resample_linear(&input, 16_000, 16_000), input);
    }

    #[test]
    fn decodes_wav_fixture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("wav writer");
        for n in 0..1600 {
            let sample = ((n as f32 * 0.05).sin() * 8000.0) as i16;
            writer.write_sample(sample).expect("left");
            writer.write_sample(sample).expect("right");
        }
        writer.finalize().expect("finalize");

        let samples = decode_to_mono_16k(&path).expect("decode");
        assert_eq!(samples.len(), 1600);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }
}
