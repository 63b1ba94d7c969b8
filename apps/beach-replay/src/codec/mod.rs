//! Frame codecs chosen at negotiation time.
//!
//! A [`Codec`] pairs one compression with one encoding and is immutable once
//! built. Each direction of a connection gets its own.

pub mod binary;
pub mod compression;
pub mod json;

use tracing::trace;

use crate::error::CodecError;
use crate::metrics;
use crate::negotiation::{CodecChoice, NegotiatedProtocol};
use crate::protocol::{ClientMessage, CompressionType, EncodingType, ServerMessage};

pub use binary::{BinaryEncoding, WireError};
pub use compression::{Gzip, Passthrough};
pub use json::JsonEncoding;

pub trait Compressor: Send + Sync {
    fn kind(&self) -> CompressionType;
    fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError>;
    /// Fails with [`CodecError::FrameTooLarge`] when the output would exceed
    /// `limit` bytes.
    fn decompress(&self, bytes: &[u8], limit: usize) -> Result<Vec<u8>, CodecError>;
}

pub trait MessageEncoding: Send + Sync {
    fn kind(&self) -> EncodingType;
    fn encode_server(&self, messages: &[ServerMessage]) -> Result<Vec<u8>, CodecError>;
    fn decode_server(&self, bytes: &[u8]) -> Result<Vec<ServerMessage>, CodecError>;
    fn encode_client(&self, messages: &[ClientMessage]) -> Result<Vec<u8>, CodecError>;
    fn decode_client(&self, bytes: &[u8]) -> Result<Vec<ClientMessage>, CodecError>;
}

pub fn compressor_for(kind: CompressionType) -> Box<dyn Compressor> {
    match kind {
        CompressionType::None => Box::new(Passthrough),
        CompressionType::Gzip => Box::new(Gzip::default()),
    }
}

pub fn encoding_for(kind: EncodingType) -> Box<dyn MessageEncoding> {
    match kind {
        EncodingType::Json => Box::new(JsonEncoding),
        EncodingType::Binary => Box::new(BinaryEncoding),
    }
}

pub struct Codec {
    compressor: Box<dyn Compressor>,
    encoding: Box<dyn MessageEncoding>,
    max_frame_bytes: usize,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("compression", &self.compressor.kind())
            .field("encoding", &self.encoding.kind())
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}

impl Codec {
    pub fn new(choice: CodecChoice, max_frame_bytes: usize) -> Self {
        Self {
            compressor: compressor_for(choice.compression),
            encoding: encoding_for(choice.encoding),
            max_frame_bytes,
        }
    }

    pub fn choice(&self) -> CodecChoice {
        CodecChoice {
            compression: self.compressor.kind(),
            encoding: self.encoding.kind(),
        }
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn encode_server_frame(&self, messages: &[ServerMessage]) -> Result<Vec<u8>, CodecError> {
        let raw = self.encoding.encode_server(messages)?;
        self.compressor.compress(&raw)
    }

    pub fn decode_server_frame(&self, frame: &[u8]) -> Result<Vec<ServerMessage>, CodecError> {
        let raw = self.compressor.decompress(frame, self.max_frame_bytes)?;
        let messages = self.encoding.decode_server(&raw)?;
        metrics::FRAMES_DECODED
            .with_label_values(&[self.encoding.kind().label(), self.compressor.kind().label()])
            .inc();
        trace!(
            target = "replay::codec",
            wire_bytes = frame.len(),
            raw_bytes = raw.len(),
            messages = messages.len(),
            "decoded server frame"
        );
        Ok(messages)
    }

    pub fn encode_client_frame(&self, messages: &[ClientMessage]) -> Result<Vec<u8>, CodecError> {
        let raw = self.encoding.encode_client(messages)?;
        self.compressor.compress(&raw)
    }

    pub fn decode_client_frame(&self, frame: &[u8]) -> Result<Vec<ClientMessage>, CodecError> {
        let raw = self.compressor.decompress(frame, self.max_frame_bytes)?;
        self.encoding.decode_client(&raw)
    }
}

/// Both directions of a negotiated connection.
#[derive(Debug)]
pub struct ConnectionCodecs {
    pub to_client: Codec,
    pub to_server: Codec,
}

impl ConnectionCodecs {
    pub fn from_negotiated(negotiated: &NegotiatedProtocol, max_frame_bytes: usize) -> Self {
        Self {
            to_client: Codec::new(negotiated.to_client, max_frame_bytes),
            to_server: Codec::new(negotiated.to_server, max_frame_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ImageId, PaintTarget, Rect, ServerEvent};

    fn frame() -> Vec<ServerMessage> {
        vec![ServerMessage::DrawCommands {
            target: PaintTarget::Surface,
            events: vec![
                ServerEvent::FillRect {
                    rect: Rect::new(0, 0, 4, 4),
                };
                16
            ],
        }]
    }

    #[test_timeout::timeout]
    fn every_combination_reproduces_messages() {
        for compression in [CompressionType::None, CompressionType::Gzip] {
            for encoding in [EncodingType::Json, EncodingType::Binary] {
                let codec = Codec::new(
                    CodecChoice {
                        compression,
                        encoding,
                    },
                    1 << 20,
                );
                let bytes = codec.encode_server_frame(&frame()).expect("encode");
                assert_eq!(codec.decode_server_frame(&bytes).expect("decode"), frame());
            }
        }
    }

    #[test_timeout::timeout]
    fn mismatched_encoding_fails_loudly() {
        let json = Codec::new(
            CodecChoice {
                compression: CompressionType::None,
                encoding: EncodingType::Json,
            },
            1 << 20,
        );
        let binary = Codec::new(
            CodecChoice {
                compression: CompressionType::None,
                encoding: EncodingType::Binary,
            },
            1 << 20,
        );
        let bytes = json.encode_server_frame(&frame()).expect("encode");
        assert!(binary.decode_server_frame(&bytes).is_err());
    }

    #[test_timeout::timeout]
    fn oversized_frame_is_refused() {
        let codec = Codec::new(
            CodecChoice {
                compression: CompressionType::Gzip,
                encoding: EncodingType::Json,
            },
            32,
        );
        let bytes = codec.encode_server_frame(&frame()).expect("encode");
        assert!(matches!(
            codec.decode_server_frame(&bytes),
            Err(CodecError::FrameTooLarge { limit: 32, .. })
        ));
    }

    #[test_timeout::timeout]
    fn client_messages_travel_upstream() {
        let codec = Codec::new(
            CodecChoice {
                compression: CompressionType::Gzip,
                encoding: EncodingType::Binary,
            },
            1 << 20,
        );
        let messages = vec![ClientMessage::RequestImageData {
            image_id: ImageId::bitmap(1, 2),
        }];
        let bytes = codec.encode_client_frame(&messages).expect("encode");
        assert_eq!(codec.decode_client_frame(&bytes).expect("decode"), messages);
    }
}
