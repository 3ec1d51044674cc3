//! Opus packet decoding for inbound participant audio.
//!
//! Clients send speech-gated Opus packets encoded at the pipeline rate
//! (16 kHz mono), base64-wrapped inside JSON frames. Each participant owns
//! one `OpusStream`: the Opus decoder keeps inter-packet state for loss
//! concealment, so the stream must be reset whenever an utterance is aborted
//! or the connection restarts.

use audiopus::coder::{Decoder, GenericCtl};
use audiopus::{packet::Packet, Channels, MutSignals, SampleRate};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::trace;

use crate::error::DecodeError;
use crate::PIPELINE_SAMPLE_RATE;

/// Largest Opus frame: 120 ms at 16 kHz.
const MAX_FRAME_SAMPLES: usize = (PIPELINE_SAMPLE_RATE as usize / 1000) * 120;

/// Stateful per-participant Opus decoder producing f32 mono PCM at 16 kHz.
pub struct OpusStream {
    decoder: Decoder,
    decode_buffer: Vec<i16>,
}

impl OpusStream {
    pub fn new() -> Result<Self, DecodeError> {
        let decoder = Decoder::new(SampleRate::Hz16000, Channels::Mono)?;
        Ok(Self {
            decoder,
            decode_buffer: vec![0i16; MAX_FRAME_SAMPLES],
        })
    }

    /// Decodes one base64-encoded Opus packet into normalized f32 samples.
    ///
    /// A failure affects only this packet; the decoder state stays valid for
    /// the next one.
    pub fn decode_base64(&mut self, payload: &str) -> Result<Vec<f32>, DecodeError> {
        let bytes = BASE64.decode(payload)?;
        self.decode(&bytes)
    }

    /// Decodes one raw Opus packet.
    pub fn decode(&mut self, packet_bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
        if packet_bytes.is_empty() {
            return Err(DecodeError::EmptyPacket);
        }

        let packet = Packet::try_from(packet_bytes)?;
        let output = MutSignals::try_from(&mut self.decode_buffer[..])?;
        let samples = self.decoder.decode(Some(packet), output, false)?;

        trace!(bytes = packet_bytes.len(), samples, "decoded opus packet");

        Ok(self.decode_buffer[..samples]
            .iter()
            .map(|&s| s as f32 / 32768.0)
            .collect())
    }

    /// Clears the decoder's inter-packet state.
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        self.decoder.reset_state()?;
        Ok(())
    }
}
