//! Participant state owned by a Room task.

use std::time::Instant;

use babblefish_pipeline::{DecodeError, OpusStream, PIPELINE_SAMPLE_RATE};
use tracing::warn;

use crate::protocol::ParticipantInfo;
use crate::ws::send_queue::OutboundQueue;

/// Where a participant is in the utterance lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerState {
    Idle,
    Speaking,
    /// A pipeline job for this participant is in flight; at most one ever is.
    Processing,
}

/// Accumulates one utterance of decoded PCM between `audio` frames and
/// `utterance_end`.
///
/// Holds the participant's Opus decoder state, the consecutive-decode-error
/// run, and enforces the hard cap by discarding the oldest samples. Never
/// retains audio after the utterance is taken for the pipeline.
pub struct UtteranceAssembler {
    pcm: Vec<f32>,
    opus: OpusStream,
    consecutive_decode_errors: u32,
    hard_cap_samples: usize,
    truncation_warned: bool,
}

impl UtteranceAssembler {
    pub fn new(hard_cap_seconds: u64) -> Result<Self, DecodeError> {
        Ok(Self {
            pcm: Vec::new(),
            opus: OpusStream::new()?,
            consecutive_decode_errors: 0,
            hard_cap_samples: hard_cap_seconds as usize * PIPELINE_SAMPLE_RATE as usize,
            truncation_warned: false,
        })
    }

    /// Decodes one packet into the buffer. On failure the packet is dropped
    /// and the consecutive-error run grows; callers abort the utterance once
    /// the run crosses the configured threshold.
    pub fn append_packet(&mut self, payload_b64: &str) -> Result<(), DecodeError> {
        match self.opus.decode_base64(payload_b64) {
            Ok(samples) => {
                self.consecutive_decode_errors = 0;
                self.pcm.extend_from_slice(&samples);
                if self.pcm.len() > self.hard_cap_samples {
                    let excess = self.pcm.len() - self.hard_cap_samples;
                    self.pcm.drain(..excess);
                    if !self.truncation_warned {
                        warn!(
                            cap_samples = self.hard_cap_samples,
                            "utterance exceeded hard cap, discarding oldest audio"
                        );
                        self.truncation_warned = true;
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.consecutive_decode_errors += 1;
                Err(e)
            }
        }
    }

    pub fn consecutive_decode_errors(&self) -> u32 {
        self.consecutive_decode_errors
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.pcm.len() as f64 / PIPELINE_SAMPLE_RATE as f64
    }

    /// Hands the finalized utterance to the caller and resets for the next.
    /// Each utterance is an independent encoder run on the client, so the
    /// decoder's packet history is cleared too.
    pub fn take(&mut self) -> Vec<f32> {
        self.consecutive_decode_errors = 0;
        self.truncation_warned = false;
        if let Err(e) = self.opus.reset() {
            warn!(error = %e, "opus decoder reset failed");
        }
        std::mem::take(&mut self.pcm)
    }

    /// Discards the current utterance and the decoder's packet history.
    pub fn abort(&mut self) {
        self.pcm.clear();
        self.consecutive_decode_errors = 0;
        self.truncation_warned = false;
        if let Err(e) = self.opus.reset() {
            warn!(error = %e, "opus decoder reset failed");
        }
    }
}

/// A room member. Owned exclusively by the Room task that accepted the join.
pub struct Participant {
    pub id: String,
    pub name: String,
    pub language: String,
    pub queue: OutboundQueue,
    pub joined_at: Instant,
    pub state: SpeakerState,
    pub assembler: UtteranceAssembler,
}

impl Participant {
    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            language: self.language.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiopus::coder::Encoder;
    use audiopus::{Application, Channels, SampleRate};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    const FRAME_SAMPLES: usize = 320; // 20ms at 16kHz

    fn encoded_frame() -> String {
        let encoder = Encoder::new(SampleRate::Hz16000, Channels::Mono, Application::Voip)
            .expect("encoder");
        let mut out = vec![0u8; 4000];
        let written = encoder
            .encode(&[0i16; FRAME_SAMPLES], &mut out)
            .expect("encode");
        out.truncate(written);
        BASE64.encode(&out)
    }

    #[test]
    fn accumulates_decoded_audio() {
        let mut assembler = UtteranceAssembler::new(30).unwrap();
        let frame = encoded_frame();
        assembler.append_packet(&frame).unwrap();
        assembler.append_packet(&frame).unwrap();
        assert_eq!(assembler.take().len(), 2 * FRAME_SAMPLES);
        assert!(assembler.is_empty());
    }

    #[test]
    fn decode_failure_grows_run_and_success_resets_it() {
        let mut assembler = UtteranceAssembler::new(30).unwrap();
        assert!(assembler.append_packet("@@@").is_err());
        assert!(assembler.append_packet("@@@").is_err());
        assert_eq!(assembler.consecutive_decode_errors(), 2);

        assembler.append_packet(&encoded_frame()).unwrap();
        assert_eq!(assembler.consecutive_decode_errors(), 0);
    }

    #[test]
    fn hard_cap_discards_oldest() {
        // Cap of zero seconds: every appended frame is immediately truncated
        // down to the cap.
        let mut assembler = UtteranceAssembler::new(0).unwrap();
        assembler.append_packet(&encoded_frame()).unwrap();
        assert!(assembler.is_empty());
    }

    #[test]
    fn abort_clears_buffer_and_run() {
        let mut assembler = UtteranceAssembler::new(30).unwrap();
        assembler.append_packet(&encoded_frame()).unwrap();
        let _ = assembler.append_packet("@@@");
        assembler.abort();
        assert!(assembler.is_empty());
        assert_eq!(assembler.consecutive_decode_errors(), 0);
    }
}
