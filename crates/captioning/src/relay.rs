use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Command code for a speak request.
const COMMAND_SPEAK: u16 = 0x0001;
/// Text encoding byte: UTF-8.
const ENCODING_UTF8: u8 = 0;

/// Voice parameters for the relay endpoint. `-1` selects the engine default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TtsVoice {
    pub speed: i16,
    pub tone: i16,
    pub volume: i16,
    pub voice_id: u16,
}

impl Default for TtsVoice {
    fn default() -> Self {
        Self {
            speed: -1,
            tone: -1,
            volume: -1,
            voice_id: 0,
        }
    }
}

/// Fire-and-forget relay of finalized caption text to a text-to-speech
/// endpoint over a lightweight socket.
///
/// One packet per connection; delivery failures are swallowed so the caption
/// pipeline never stalls on the side channel.
pub struct TtsRelay {
    endpoint: String,
    voice: TtsVoice,
}

impl TtsRelay {
    pub fn new(endpoint: impl Into<String>, voice: TtsVoice) -> Self {
        Self {
            endpoint: endpoint.into(),
            voice,
        }
    }

    /// Encodes one speak packet.
    ///
    /// Little-endian layout: u16 command, i16 speed, i16 tone, i16 volume,
    /// u16 voice id, u8 text encoding, u32 text byte length, UTF-8 bytes.
    pub fn encode_speak(voice: &TtsVoice, text: &str) -> Vec<u8> {
        let bytes = text.as_bytes();
        let mut packet = Vec::with_capacity(15 + bytes.len());
        packet.extend_from_slice(&COMMAND_SPEAK.to_le_bytes());
        packet.extend_from_slice(&voice.speed.to_le_bytes());
        packet.extend_from_slice(&voice.tone.to_le_bytes());
        packet.extend_from_slice(&voice.volume.to_le_bytes());
        packet.extend_from_slice(&voice.voice_id.to_le_bytes());
        packet.push(ENCODING_UTF8);
        packet.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        packet.extend_from_slice(bytes);
        packet
    }

    /// Sends one speak packet to the endpoint.
    pub async fn speak(&self, text: &str) -> std::io::Result<()> {
        let packet = Self::encode_speak(&self.voice, text);
        let mut stream = TcpStream::connect(&self.endpoint).await?;
        stream.write_all(&packet).await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Spawns `speak`, swallowing failures.
    pub fn speak_detached(self: &Arc<Self>, text: String) {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = relay.speak(&text).await {
                debug!(endpoint = %relay.endpoint, %e, "TTS relay send failed");
            }
        });
    }
}
