use serde::{Deserialize, Serialize};

use super::schema::{Describe, Field, Primitive, Shape, Variant};

/// Reference to an image a paint event draws.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageId {
    /// Content-addressed bitmap, fetched once and cached.
    Bitmap { identity: u32, content_hash: u64 },
    /// Server-side virtual canvas addressed by handle. Never fetched.
    Offscreen { handle: u64 },
    /// The producer failed to identify the image.
    Unknown { description: String },
}

impl ImageId {
    pub fn bitmap(identity: u32, content_hash: u64) -> Self {
        ImageId::Bitmap {
            identity,
            content_hash,
        }
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageId::Bitmap {
                identity,
                content_hash,
            } => write!(f, "bitmap:{identity:08x}:{content_hash:016x}"),
            ImageId::Offscreen { handle } => write!(f, "offscreen:{handle}"),
            ImageId::Unknown { description } => write!(f, "unknown:{description}"),
        }
    }
}

/// Image payload sent in reply to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageData {
    /// Encoded raster (PNG).
    Encoded {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
    /// The producer has nothing to draw for this id.
    Empty,
}

impl ImageData {
    pub fn encoded_len(&self) -> usize {
        match self {
            ImageData::Encoded { bytes } => bytes.len(),
            ImageData::Empty => 0,
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

impl Describe for ImageId {
    fn shape() -> Shape {
        Shape::tagged(
            "ImageId",
            vec![
                Variant::new(
                    "bitmap",
                    Shape::record(
                        "Bitmap",
                        vec![
                            Field::of::<u32>("identity"),
                            Field::of::<u64>("content_hash"),
                        ],
                    ),
                ),
                Variant::new(
                    "offscreen",
                    Shape::record("Offscreen", vec![Field::of::<u64>("handle")]),
                ),
                Variant::new(
                    "unknown",
                    Shape::record("Unknown", vec![Field::of::<String>("description")]),
                ),
            ],
        )
    }
}

impl Describe for ImageData {
    fn shape() -> Shape {
        Shape::tagged(
            "ImageData",
            vec![
                Variant::new(
                    "encoded",
                    Shape::record(
                        "Encoded",
                        vec![Field {
                            name: "bytes",
                            nullable: false,
                            shape: Shape::Primitive(Primitive::Bytes),
                        }],
                    ),
                ),
                Variant::unit("empty"),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn encoded_payload_travels_as_base64() {
        let data = ImageData::Encoded {
            bytes: vec![0x89, b'P', b'N', b'G'],
        };
        let json = serde_json::to_value(&data).expect("serialize");
        assert_eq!(json["kind"], "encoded");
        assert_eq!(json["bytes"], "iVBORw==");
        let back: ImageData = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, data);
    }

    #[test_timeout::timeout]
    fn display_names_each_variant() {
        assert_eq!(
            ImageId::bitmap(0x10, 0xff).to_string(),
            "bitmap:00000010:00000000000000ff"
        );
        assert_eq!(ImageId::Offscreen { handle: 7 }.to_string(), "offscreen:7");
    }
}
