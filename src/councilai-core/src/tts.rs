//! Audio rendering of completed debates using kokoro-tiny.

use kokoro_tiny::TtsEngine;
use std::path::Path;

use crate::config::VoicesConfig;
use crate::error::CouncilError;
use crate::persona::Persona;
use crate::transcript::transcript_filename;
use crate::turn_graph::{CompletedDebate, TurnRecord};

/// Output sample rate of the kokoro engine.
pub const SAMPLE_RATE: u32 = 24_000;

/// Silence between two speakers, in seconds.
const TURN_GAP_SECONDS: f32 = 0.6;

/// TTS synthesizer with one configured voice per persona.
pub struct CouncilTts {
    engine: TtsEngine,
    voices: VoicesConfig,
    available_voices: Vec<String>,
}

impl CouncilTts {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new(voices: VoicesConfig) -> Result<Self, CouncilError> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| CouncilError::TtsError(format!("Failed to initialize TTS: {}", e)))?;

        let available_voices = engine.voices();

        Ok(Self {
            engine,
            voices,
            available_voices,
        })
    }

    /// Get list of available voice IDs.
    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<(), CouncilError> {
        if voice_id.is_empty() {
            return Err(CouncilError::TtsError(format!(
                "Voice ID cannot be empty. Available voices:\n{}",
                format_voice_list(&self.available_voices)
            )));
        }

        if !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(CouncilError::TtsError(format!(
                "Unknown voice '{}'. Available voices:\n{}",
                voice_id,
                format_voice_list(&self.available_voices)
            )));
        }

        Ok(())
    }

    /// Validate the voice configured for every persona.
    pub fn validate_all_voices(&self) -> Result<(), CouncilError> {
        for persona in Persona::ALL {
            self.validate_voice(self.voices.voice_for(persona))?;
        }
        Ok(())
    }

    /// Synthesize text in chunks; kokoro-tiny only accepts short inputs.
    pub fn synthesize(&mut self, text: &str, voice_id: &str) -> Result<Vec<f32>, CouncilError> {
        self.validate_voice(voice_id)?;

        let mut all_samples = Vec::new();

        for chunk in split_into_chunks(text, 200) {
            let samples = self
                .engine
                .synthesize(&chunk, Some(voice_id))
                .map_err(|e| CouncilError::TtsError(format!("Synthesis failed: {}", e)))?;

            all_samples.extend(samples);

            // 0.3s pause between chunks keeps the tail of each chunk audible.
            all_samples.extend(vec![0.0; 7200]);
        }

        all_samples.extend(vec![0.0; 12000]);

        Ok(all_samples)
    }

    /// Synthesize one turn in its speaker's voice.
    pub fn synthesize_record(&mut self, record: &TurnRecord) -> Result<Vec<f32>, CouncilError> {
        let voice_id = self.voices.voice_for(record.persona).to_string();
        self.synthesize(&record.text, &voice_id)
    }

    /// Render a whole debate, one segment per record in order, at the
    /// configured speech rate. Records without text are skipped.
    pub fn synthesize_debate(&mut self, debate: &CompletedDebate) -> Result<Vec<f32>, CouncilError> {
        let mut segments = Vec::with_capacity(debate.records.len());
        for record in debate.records.iter().filter(|r| !r.text.trim().is_empty()) {
            tracing::debug!(persona = %record.persona, "synthesizing turn");
            segments.push(self.synthesize_record(record)?);
        }

        let combined = combine_audio_segments(segments, TURN_GAP_SECONDS, SAMPLE_RATE);
        Ok(adjust_audio_speed(combined, self.voices.speech_rate))
    }
}

fn format_voice_list(voices: &[String]) -> String {
    let mut english_voices: Vec<&String> = voices
        .iter()
        .filter(|v| {
            v.starts_with("af_") || v.starts_with("am_") || v.starts_with("bf_") || v.starts_with("bm_")
        })
        .collect();
    english_voices.sort();

    english_voices
        .iter()
        .map(|v| format!("  - {}", v))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write mono 32-bit float samples to a WAV file.
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f32]) -> Result<(), CouncilError> {
    let wav_spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let wav_error = |e: hound::Error| CouncilError::TtsError(format!("Failed to save WAV: {}", e));

    let mut writer = hound::WavWriter::create(path.as_ref(), wav_spec).map_err(wav_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}

/// Split text into chunks that are safe for TTS synthesis.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current_chunk.len() + sentence.len() > max_chars {
            if !current_chunk.is_empty() {
                chunks.push(current_chunk.trim().to_string());
                current_chunk = String::new();
            }

            // A single overlong sentence is split on commas.
            if sentence.len() > max_chars {
                for part in sentence.split_inclusive(',') {
                    if current_chunk.len() + part.len() > max_chars && !current_chunk.is_empty() {
                        chunks.push(current_chunk.trim().to_string());
                        current_chunk = String::new();
                    }
                    current_chunk.push_str(part);
                    current_chunk.push(' ');
                }
            } else {
                current_chunk.push_str(sentence);
                current_chunk.push(' ');
            }
        } else {
            current_chunk.push_str(sentence);
            current_chunk.push(' ');
        }
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(current_chunk.trim().to_string());
    }

    chunks
}

/// Adjust audio playback speed using linear interpolation.
/// Rate < 1.0 = slower (e.g., 0.75 = 75% speed), Rate > 1.0 = faster.
pub fn adjust_audio_speed(samples: Vec<f32>, rate: f32) -> Vec<f32> {
    if (rate - 1.0).abs() < 0.001 || rate <= 0.0 {
        return samples;
    }

    let new_len = (samples.len() as f32 / rate) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f32 * rate;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f32;

        if src_idx + 1 < samples.len() {
            result.push(samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac);
        } else if src_idx < samples.len() {
            result.push(samples[src_idx]);
        }
    }

    result
}

/// Combine multiple audio segments with silence gaps.
pub fn combine_audio_segments(
    segments: Vec<Vec<f32>>,
    gap_seconds: f32,
    sample_rate: u32,
) -> Vec<f32> {
    let gap_samples = (gap_seconds * sample_rate as f32) as usize;
    let silence: Vec<f32> = vec![0.0; gap_samples];

    let mut combined = Vec::new();

    for (i, segment) in segments.into_iter().enumerate() {
        if i > 0 {
            combined.extend(&silence);
        }
        combined.extend(segment);
    }

    combined
}

/// Audio filename for a debate, sharing the stem of its transcript files.
pub fn generate_output_filename(debate: &CompletedDebate) -> String {
    format!("{}.wav", transcript_filename(&debate.timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debate_at(question: &str, timestamp: &str) -> CompletedDebate {
        CompletedDebate {
            question: question.to_string(),
            records: Vec::new(),
            timestamp: timestamp.parse().unwrap(),
        }
    }

    #[test]
    fn test_generate_output_filename_matches_transcript() {
        let debate = debate_at("Faut-il ralentir l'IA ?", "2026-03-14T09:26:53Z");
        assert_eq!(generate_output_filename(&debate), "council-20260314-092653.wav");
    }

    #[test]
    fn test_same_question_twice_gets_distinct_files() {
        let first = debate_at("Pourquoi ?", "2026-03-14T09:26:53Z");
        let second = debate_at("Pourquoi ?", "2026-03-14T09:31:02Z");
        assert_ne!(generate_output_filename(&first), generate_output_filename(&second));
    }

    #[test]
    fn test_combine_audio_segments() {
        let combined = combine_audio_segments(vec![vec![1.0, 1.0], vec![2.0, 2.0]], 0.1, 10);
        assert_eq!(combined.len(), 5);
        assert_eq!(combined[2], 0.0);
    }

    #[test]
    fn test_adjust_audio_speed() {
        let samples = vec![0.0, 1.0, 0.0, 1.0];
        assert_eq!(adjust_audio_speed(samples.clone(), 1.0), samples);
        assert_eq!(adjust_audio_speed(samples.clone(), 2.0).len(), 2);
        assert_eq!(adjust_audio_speed(samples, 0.5).len(), 8);
    }

    #[test]
    fn test_split_into_chunks() {
        let text = "Bonjour à tous. Ceci est un test. Une autre phrase ici.";
        let chunks = split_into_chunks(text, 30);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "Bonjour à tous.");
    }

    #[test]
    fn test_save_wav_writes_float_samples() {
        let path = std::env::temp_dir().join(format!("councilai-{}.wav", std::process::id()));
        save_wav(&path, &[0.0, 0.5, -0.5]).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 3);
        std::fs::remove_file(&path).unwrap();
    }
}
