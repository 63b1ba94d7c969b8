use std::io;
use thiserror::Error;

use crate::codec::binary::WireError;
use crate::protocol::{CompressionType, EncodingType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("peer protocol fingerprint {peer} matches no known release (known: {known})")]
    UnknownFingerprint { peer: i32, known: String },
    #[error("no mutually supported compression among {advertised:?}")]
    NoCommonCompression { advertised: Vec<CompressionType> },
    #[error("no mutually supported encoding among {advertised:?}")]
    NoCommonEncoding { advertised: Vec<EncodingType> },
    #[error("peer selected compression {0:?} which this client never offered")]
    UnofferedCompression(CompressionType),
    #[error("peer selected encoding {0:?} which this client never offered")]
    UnofferedEncoding(EncodingType),
    #[error("peer rejected handshake: {0}")]
    Rejected(String),
}

impl NegotiationError {
    pub fn reason_label(&self) -> &'static str {
        match self {
            NegotiationError::UnknownFingerprint { .. } => "fingerprint",
            NegotiationError::NoCommonCompression { .. } => "compression",
            NegotiationError::NoCommonEncoding { .. } => "encoding",
            NegotiationError::UnofferedCompression(_) => "unoffered_compression",
            NegotiationError::UnofferedEncoding(_) => "unoffered_encoding",
            NegotiationError::Rejected(_) => "rejected",
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("binary decode failed: {0}")]
    Wire(#[from] WireError),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression failed: {0}")]
    Compression(#[source] io::Error),
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("image decoding requires a tokio runtime")]
    MissingRuntime,
}
