use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayDescription {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub scale_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    None,
    Gzip,
}

impl CompressionType {
    pub fn label(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingType {
    Json,
    Binary,
}

impl EncodingType {
    pub fn label(self) -> &'static str {
        match self {
            EncodingType::Json => "json",
            EncodingType::Binary => "binary",
        }
    }
}

/// First frame a client sends. Always JSON, never compressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToServerHandshake {
    pub protocol_fingerprint: i32,
    /// Position of the client's release in the protocol history.
    pub protocol_version_id: u32,
    pub protocol_release: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
    pub client_does_window_management: bool,
    pub displays: Vec<DisplayDescription>,
    /// Priority order, most preferred first.
    pub supported_to_client_compression: Vec<CompressionType>,
    pub supported_to_client_encodings: Vec<EncodingType>,
    pub supported_to_server_compression: Vec<CompressionType>,
    pub supported_to_server_encodings: Vec<EncodingType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToClientHandshake {
    pub protocol_fingerprint: i32,
    pub protocol_version_id: u32,
    pub protocol_release: String,
    pub to_client_compression: CompressionType,
    pub to_client_encoding: EncodingType,
    pub to_server_compression: CompressionType,
    pub to_server_encoding: EncodingType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HandshakeReply {
    Accepted(ToClientHandshake),
    Rejected { reason: String },
}
