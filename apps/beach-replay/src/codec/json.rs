use super::MessageEncoding;
use crate::error::CodecError;
use crate::protocol::{ClientMessage, EncodingType, ServerMessage};

/// Self-describing encoding: one JSON array of tagged messages per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding;

impl MessageEncoding for JsonEncoding {
    fn kind(&self) -> EncodingType {
        EncodingType::Json
    }

    fn encode_server(&self, messages: &[ServerMessage]) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(messages)?)
    }

    fn decode_server(&self, bytes: &[u8]) -> Result<Vec<ServerMessage>, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode_client(&self, messages: &[ClientMessage]) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(messages)?)
    }

    fn decode_client(&self, bytes: &[u8]) -> Result<Vec<ClientMessage>, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PaintTarget, Rect, ServerEvent};

    #[test_timeout::timeout]
    fn unknown_tag_is_a_decode_error() {
        let bytes = br#"[{"type":"teleport","x":1}]"#;
        let err = JsonEncoding.decode_server(bytes).expect_err("unknown tag");
        assert!(matches!(err, CodecError::Json(_)));
    }

    #[test_timeout::timeout]
    fn frame_is_a_json_array() {
        let messages = vec![ServerMessage::DrawCommands {
            target: PaintTarget::Surface,
            events: vec![ServerEvent::FillRect {
                rect: Rect::new(1, 2, 3, 4),
            }],
        }];
        let bytes = JsonEncoding.encode_server(&messages).expect("encode");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value[0]["type"], "draw_commands");
        assert_eq!(value[0]["events"][0]["type"], "fill_rect");
        assert_eq!(JsonEncoding.decode_server(&bytes).expect("decode"), messages);
    }
}
