pub mod caret;
pub mod events;
pub mod handshake;
pub mod image;
pub mod input;
pub mod schema;

use serde::{Deserialize, Serialize};

pub use caret::{CaretGeometry, CaretInfoChange, CaretPosition};
pub use events::{
    Argb, CompositeRule, EventKind, FontSpec, PaintValue, Point, Rect, ServerEvent, Size,
    StateCategory, Transform,
};
pub use handshake::{
    CompressionType, DisplayDescription, EncodingType, HandshakeReply, ToClientHandshake,
    ToServerHandshake,
};
pub use image::{ImageData, ImageId};
pub use input::{KeyPress, Modifiers};

use schema::{Describe, Field, Shape, Variant};

/// Version bits carried in every binary message header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Server-side virtual canvas a batch of draw commands renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffscreenTarget {
    pub handle: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaintTarget {
    Surface,
    Offscreen(OffscreenTarget),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DrawCommands {
        target: PaintTarget,
        events: Vec<ServerEvent>,
    },
    ImageData {
        image_id: ImageId,
        data: ImageData,
    },
    CaretInfo {
        change: CaretInfoChange,
    },
    SurfaceBounds {
        width: u32,
        height: u32,
    },
}

impl ServerMessage {
    pub fn label(&self) -> &'static str {
        match self {
            ServerMessage::DrawCommands { .. } => "draw_commands",
            ServerMessage::ImageData { .. } => "image_data",
            ServerMessage::CaretInfo { .. } => "caret_info",
            ServerMessage::SurfaceBounds { .. } => "surface_bounds",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestImageData { image_id: ImageId },
    KeyPress { ch: char, modifiers: u8 },
    ResizeSurface { width: u32, height: u32 },
}

impl From<KeyPress> for ClientMessage {
    fn from(key: KeyPress) -> Self {
        ClientMessage::KeyPress {
            ch: key.ch,
            modifiers: key.modifiers.bits(),
        }
    }
}

impl Describe for OffscreenTarget {
    fn shape() -> Shape {
        Shape::record(
            "OffscreenTarget",
            vec![
                Field::of::<u64>("handle"),
                Field::of::<u32>("width"),
                Field::of::<u32>("height"),
            ],
        )
    }
}

impl Describe for PaintTarget {
    fn shape() -> Shape {
        Shape::tagged(
            "PaintTarget",
            vec![
                Variant::unit("surface"),
                Variant::new("offscreen", OffscreenTarget::shape()),
            ],
        )
    }
}

impl Describe for ServerMessage {
    fn shape() -> Shape {
        Shape::tagged(
            "ServerMessage",
            vec![
                Variant::new(
                    "draw_commands",
                    Shape::record(
                        "DrawCommands",
                        vec![
                            Field::of::<PaintTarget>("target"),
                            Field::of::<Vec<ServerEvent>>("events"),
                        ],
                    ),
                ),
                Variant::new(
                    "image_data",
                    Shape::record(
                        "ImageDataReply",
                        vec![
                            Field::of::<ImageId>("image_id"),
                            Field::of::<ImageData>("data"),
                        ],
                    ),
                ),
                Variant::new(
                    "caret_info",
                    Shape::record(
                        "CaretInfo",
                        vec![Field::of::<CaretInfoChange>("change")],
                    ),
                ),
                Variant::new(
                    "surface_bounds",
                    Shape::record(
                        "SurfaceBounds",
                        vec![Field::of::<u32>("width"), Field::of::<u32>("height")],
                    ),
                ),
            ],
        )
    }
}

impl Describe for ClientMessage {
    fn shape() -> Shape {
        Shape::tagged(
            "ClientMessage",
            vec![
                Variant::new(
                    "request_image_data",
                    Shape::record(
                        "RequestImageData",
                        vec![Field::of::<ImageId>("image_id")],
                    ),
                ),
                Variant::new(
                    "key_press",
                    Shape::record(
                        "KeyPress",
                        vec![Field::of::<char>("ch"), Field::of::<u8>("modifiers")],
                    ),
                ),
                Variant::new(
                    "resize_surface",
                    Shape::record(
                        "ResizeSurface",
                        vec![Field::of::<u32>("width"), Field::of::<u32>("height")],
                    ),
                ),
            ],
        )
    }
}

/// Root message families whose structure gates compatibility.
pub fn schema_roots() -> Vec<Shape> {
    vec![ServerMessage::shape(), ClientMessage::shape()]
}
