//! Microphone capture and speech-to-text.
//!
//! [`TranscriptionSource`] is the blocking interface the listener worker
//! drives; [`MicTranscriber`] is the production implementation: cpal capture
//! with energy-based endpointing, WAV encoding, and an OpenAI-compatible
//! transcription endpoint.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::AudioConfig;

/// Transcription failures, shaped for direct display in the status line.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranscriptionError {
    #[error("Could not understand audio. Try again.")]
    Unintelligible,

    #[error("Speech service error: {0}")]
    Service(String),

    #[error("Audio error: {0}")]
    Device(String),
}

/// A captured utterance, already encoded as mono 16-bit WAV.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub wav: Vec<u8>,
    pub duration_secs: f32,
}

/// Blocking capture-then-transcribe interface. Both calls run only on the
/// dedicated listener thread, never on the control thread.
pub trait TranscriptionSource {
    /// Block until a phrase has been captured (or the time limit hit).
    fn capture(&mut self) -> Result<AudioClip, TranscriptionError>;

    /// Block until the clip has been transcribed.
    fn transcribe(&mut self, clip: AudioClip) -> Result<String, TranscriptionError>;
}

/// Production source: default input device + Whisper-compatible HTTP API.
pub struct MicTranscriber {
    config: AudioConfig,
    http: reqwest::blocking::Client,
}

impl MicTranscriber {
    /// Build the transcriber. Must be called from the listener thread: the
    /// blocking HTTP client cannot live on an async runtime thread.
    pub fn new(config: AudioConfig) -> Self {
        let http = reqwest::blocking::Client::new();
        Self { config, http }
    }
}

impl TranscriptionSource for MicTranscriber {
    fn capture(&mut self) -> Result<AudioClip, TranscriptionError> {
        capture_phrase(&self.config)
    }

    fn transcribe(&mut self, clip: AudioClip) -> Result<String, TranscriptionError> {
        let form = reqwest::blocking::multipart::Form::new()
            .text("model", self.config.transcribe_model.clone())
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(clip.wav)
                    .file_name("phrase.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| TranscriptionError::Service(e.to_string()))?,
            );

        let response = self
            .http
            .post(&self.config.transcribe_url)
            .multipart(form)
            .send()
            .map_err(|e| TranscriptionError::Service(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscriptionError::Service(format!("status {status}")));
        }

        #[derive(serde::Deserialize)]
        struct TranscriptionResponse {
            text: String,
        }

        let decoded: TranscriptionResponse = response
            .json()
            .map_err(|e| TranscriptionError::Service(e.to_string()))?;

        let text = decoded.text.trim().to_string();
        if text.is_empty() {
            return Err(TranscriptionError::Unintelligible);
        }
        Ok(text)
    }
}

/// Record from the default input device until the speaker pauses for
/// `pause_threshold_secs` or the phrase time limit is reached.
fn capture_phrase(config: &AudioConfig) -> Result<AudioClip, TranscriptionError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| TranscriptionError::Device("no input device found".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| TranscriptionError::Device(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let stream_config: cpal::StreamConfig = supported.config();

    let samples: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&samples);
    let err_fn = |e| tracing::error!(error = %e, "Input stream error");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink.lock().unwrap().extend_from_slice(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| TranscriptionError::Device(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mut buf = sink.lock().unwrap();
                    buf.extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
                },
                err_fn,
                None,
            )
            .map_err(|e| TranscriptionError::Device(e.to_string()))?,
        SampleFormat::U16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let mut buf = sink.lock().unwrap();
                    buf.extend(
                        data.iter()
                            .map(|&s| (s as f32 - 32768.0) / 32768.0),
                    );
                },
                err_fn,
                None,
            )
            .map_err(|e| TranscriptionError::Device(e.to_string()))?,
        other => {
            return Err(TranscriptionError::Device(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };

    stream
        .play()
        .map_err(|e| TranscriptionError::Device(e.to_string()))?;

    let started = Instant::now();
    let poll = Duration::from_millis(100);
    let mut cursor = 0usize;
    let mut heard_speech = false;
    let mut silence = Duration::ZERO;

    loop {
        std::thread::sleep(poll);

        let chunk_rms = {
            let buf = samples.lock().unwrap();
            let chunk = &buf[cursor.min(buf.len())..];
            cursor = buf.len();
            rms(chunk)
        };

        if chunk_rms > config.silence_rms {
            heard_speech = true;
            silence = Duration::ZERO;
        } else if heard_speech {
            silence += poll;
            if silence.as_secs_f32() >= config.pause_threshold_secs {
                break;
            }
        }

        if started.elapsed().as_secs_f32() >= config.phrase_time_limit_secs {
            break;
        }
    }

    drop(stream);

    let recorded = Arc::try_unwrap(samples)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();

    if !heard_speech {
        return Err(TranscriptionError::Unintelligible);
    }

    let mono = downmix(&recorded, channels);
    let duration_secs = mono.len() as f32 / sample_rate as f32;
    let wav = encode_wav(&mono, sample_rate)
        .map_err(|e| TranscriptionError::Device(e.to_string()))?;

    Ok(AudioClip { wav, duration_secs })
}

/// Root mean square level of a sample chunk.
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Average interleaved channels down to mono.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Encode mono f32 samples as 16-bit PCM WAV in memory.
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(clamped)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let level = rms(&[0.5, -0.5, 0.5, -0.5]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_downmix_stereo_averages_frames() {
        let stereo = [1.0, 0.0, 0.0, 1.0, 0.5, 0.5];
        assert_eq!(downmix(&stereo, 2), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_downmix_mono_is_identity() {
        let mono = [0.1, 0.2, 0.3];
        assert_eq!(downmix(&mono, 1), mono.to_vec());
    }

    #[test]
    fn test_encode_wav_produces_riff_header() {
        let wav = encode_wav(&[0.0, 0.25, -0.25], 16_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 3 samples * 2 bytes + 44-byte header
        assert_eq!(wav.len(), 44 + 6);
    }

    #[test]
    fn test_error_messages_are_user_facing() {
        assert_eq!(
            TranscriptionError::Unintelligible.to_string(),
            "Could not understand audio. Try again."
        );
        assert_eq!(
            TranscriptionError::Service("timeout".to_string()).to_string(),
            "Speech service error: timeout"
        );
    }
}
