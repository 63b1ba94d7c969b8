//! Compact binary encoding.
//!
//! A frame is a varint message count followed by the messages. Every message
//! starts with a one byte header: the top three bits carry
//! [`PROTOCOL_VERSION`], the low five the message kind. Integers are LEB128
//! varints (signed ones zigzagged), floats are little-endian IEEE-754, strings
//! and byte blobs are length prefixed.

use super::MessageEncoding;
use crate::error::CodecError;
use crate::protocol::{
    Argb, CaretGeometry, CaretInfoChange, CaretPosition, ClientMessage, CompositeRule,
    EncodingType, FontSpec, ImageData, ImageId, OffscreenTarget, PROTOCOL_VERSION, PaintTarget,
    PaintValue, Point, Rect, ServerEvent, ServerMessage, Size, Transform,
};

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
const TYPE_MASK: u8 = 0b0001_1111;

const SERVER_KIND_DRAW_COMMANDS: u8 = 0;
const SERVER_KIND_IMAGE_DATA: u8 = 1;
const SERVER_KIND_CARET_INFO: u8 = 2;
const SERVER_KIND_SURFACE_BOUNDS: u8 = 3;

const CLIENT_KIND_REQUEST_IMAGE: u8 = 0;
const CLIENT_KIND_KEY_PRESS: u8 = 1;
const CLIENT_KIND_RESIZE: u8 = 2;

const EVENT_SET_PAINT: u8 = 0;
const EVENT_SET_FONT: u8 = 1;
const EVENT_SET_COMPOSITE: u8 = 2;
const EVENT_SET_CLIP: u8 = 3;
const EVENT_SET_STROKE: u8 = 4;
const EVENT_SET_TRANSFORM: u8 = 5;
const EVENT_DRAW_LINE: u8 = 6;
const EVENT_DRAW_RECT: u8 = 7;
const EVENT_FILL_RECT: u8 = 8;
const EVENT_CLEAR_RECT: u8 = 9;
const EVENT_DRAW_OVAL: u8 = 10;
const EVENT_FILL_OVAL: u8 = 11;
const EVENT_DRAW_POLYLINE: u8 = 12;
const EVENT_FILL_POLYGON: u8 = 13;
const EVENT_DRAW_STRING: u8 = 14;
const EVENT_DRAW_IMAGE: u8 = 15;
const EVENT_COPY_AREA: u8 = 16;
const EVENT_UNSUPPORTED: u8 = 17;

const PAINT_COLOR: u8 = 0;
const PAINT_GRADIENT: u8 = 1;

const IMAGE_ID_BITMAP: u8 = 0;
const IMAGE_ID_OFFSCREEN: u8 = 1;
const IMAGE_ID_UNKNOWN: u8 = 2;

const IMAGE_DATA_ENCODED: u8 = 0;
const IMAGE_DATA_EMPTY: u8 = 1;

const CARET_NONE: u8 = 0;
const CARET_PRESENT: u8 = 1;

const TARGET_SURFACE: u8 = 0;
const TARGET_OFFSCREEN: u8 = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
    #[error("unknown message kind: {0}")]
    UnknownMessageKind(u8),
    #[error("unknown event tag: {0}")]
    UnknownEventTag(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryEncoding;

impl MessageEncoding for BinaryEncoding {
    fn kind(&self) -> EncodingType {
        EncodingType::Binary
    }

    fn encode_server(&self, messages: &[ServerMessage]) -> Result<Vec<u8>, CodecError> {
        Ok(encode_server_frame(messages))
    }

    fn decode_server(&self, bytes: &[u8]) -> Result<Vec<ServerMessage>, CodecError> {
        Ok(decode_server_frame(bytes)?)
    }

    fn encode_client(&self, messages: &[ClientMessage]) -> Result<Vec<u8>, CodecError> {
        Ok(encode_client_frame(messages))
    }

    fn decode_client(&self, bytes: &[u8]) -> Result<Vec<ClientMessage>, CodecError> {
        Ok(decode_client_frame(bytes)?)
    }
}

pub fn encode_server_frame(messages: &[ServerMessage]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    write_var_u32(&mut buf, messages.len() as u32);
    for message in messages {
        encode_server_message(&mut buf, message);
    }
    buf
}

pub fn decode_server_frame(bytes: &[u8]) -> Result<Vec<ServerMessage>, WireError> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_var_u32()? as usize;
    let mut messages = Vec::with_capacity(count.min(cursor.remaining()));
    for _ in 0..count {
        messages.push(decode_server_message(&mut cursor)?);
    }
    cursor.finish()?;
    Ok(messages)
}

pub fn encode_client_frame(messages: &[ClientMessage]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    write_var_u32(&mut buf, messages.len() as u32);
    for message in messages {
        encode_client_message(&mut buf, message);
    }
    buf
}

pub fn decode_client_frame(bytes: &[u8]) -> Result<Vec<ClientMessage>, WireError> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_var_u32()? as usize;
    let mut messages = Vec::with_capacity(count.min(cursor.remaining()));
    for _ in 0..count {
        messages.push(decode_client_message(&mut cursor)?);
    }
    cursor.finish()?;
    Ok(messages)
}

fn encode_server_message(buf: &mut Vec<u8>, message: &ServerMessage) {
    match message {
        ServerMessage::DrawCommands { target, events } => {
            write_header(buf, SERVER_KIND_DRAW_COMMANDS);
            encode_target(buf, target);
            write_var_u32(buf, events.len() as u32);
            for event in events {
                encode_event(buf, event);
            }
        }
        ServerMessage::ImageData { image_id, data } => {
            write_header(buf, SERVER_KIND_IMAGE_DATA);
            encode_image_id(buf, image_id);
            match data {
                ImageData::Encoded { bytes } => {
                    buf.push(IMAGE_DATA_ENCODED);
                    write_bytes(buf, bytes);
                }
                ImageData::Empty => buf.push(IMAGE_DATA_EMPTY),
            }
        }
        ServerMessage::CaretInfo { change } => {
            write_header(buf, SERVER_KIND_CARET_INFO);
            encode_caret(buf, change);
        }
        ServerMessage::SurfaceBounds { width, height } => {
            write_header(buf, SERVER_KIND_SURFACE_BOUNDS);
            write_var_u32(buf, *width);
            write_var_u32(buf, *height);
        }
    }
}

fn decode_server_message(cursor: &mut Cursor<'_>) -> Result<ServerMessage, WireError> {
    let (kind, _) = read_header(cursor)?;
    match kind {
        SERVER_KIND_DRAW_COMMANDS => {
            let target = decode_target(cursor)?;
            let count = cursor.read_var_u32()? as usize;
            let mut events = Vec::with_capacity(count.min(cursor.remaining()));
            for _ in 0..count {
                events.push(decode_event(cursor)?);
            }
            Ok(ServerMessage::DrawCommands { target, events })
        }
        SERVER_KIND_IMAGE_DATA => {
            let image_id = decode_image_id(cursor)?;
            let data = match cursor.read_u8()? {
                IMAGE_DATA_ENCODED => ImageData::Encoded {
                    bytes: cursor.read_blob()?.to_vec(),
                },
                IMAGE_DATA_EMPTY => ImageData::Empty,
                _ => return Err(WireError::InvalidData("invalid image data tag")),
            };
            Ok(ServerMessage::ImageData { image_id, data })
        }
        SERVER_KIND_CARET_INFO => Ok(ServerMessage::CaretInfo {
            change: decode_caret(cursor)?,
        }),
        SERVER_KIND_SURFACE_BOUNDS => {
            let width = cursor.read_var_u32()?;
            let height = cursor.read_var_u32()?;
            Ok(ServerMessage::SurfaceBounds { width, height })
        }
        other => Err(WireError::UnknownMessageKind(other)),
    }
}

fn encode_client_message(buf: &mut Vec<u8>, message: &ClientMessage) {
    match message {
        ClientMessage::RequestImageData { image_id } => {
            write_header(buf, CLIENT_KIND_REQUEST_IMAGE);
            encode_image_id(buf, image_id);
        }
        ClientMessage::KeyPress { ch, modifiers } => {
            write_header(buf, CLIENT_KIND_KEY_PRESS);
            write_var_u32(buf, *ch as u32);
            buf.push(*modifiers);
        }
        ClientMessage::ResizeSurface { width, height } => {
            write_header(buf, CLIENT_KIND_RESIZE);
            write_var_u32(buf, *width);
            write_var_u32(buf, *height);
        }
    }
}

fn decode_client_message(cursor: &mut Cursor<'_>) -> Result<ClientMessage, WireError> {
    let (kind, _) = read_header(cursor)?;
    match kind {
        CLIENT_KIND_REQUEST_IMAGE => Ok(ClientMessage::RequestImageData {
            image_id: decode_image_id(cursor)?,
        }),
        CLIENT_KIND_KEY_PRESS => {
            let ch = char::from_u32(cursor.read_var_u32()?)
                .ok_or(WireError::InvalidData("invalid char"))?;
            let modifiers = cursor.read_u8()?;
            Ok(ClientMessage::KeyPress { ch, modifiers })
        }
        CLIENT_KIND_RESIZE => {
            let width = cursor.read_var_u32()?;
            let height = cursor.read_var_u32()?;
            Ok(ClientMessage::ResizeSurface { width, height })
        }
        other => Err(WireError::UnknownMessageKind(other)),
    }
}

fn encode_event(buf: &mut Vec<u8>, event: &ServerEvent) {
    match event {
        ServerEvent::SetPaint { paint } => {
            buf.push(EVENT_SET_PAINT);
            encode_paint(buf, paint);
        }
        ServerEvent::SetFont { font } => {
            buf.push(EVENT_SET_FONT);
            write_var_u32(buf, font.font_id as u32);
            write_var_u32(buf, font.size as u32);
        }
        ServerEvent::SetComposite { rule, alpha } => {
            buf.push(EVENT_SET_COMPOSITE);
            buf.push(rule.as_u8());
            write_f32(buf, *alpha);
        }
        ServerEvent::SetClip { clip } => {
            buf.push(EVENT_SET_CLIP);
            buf.push(clip.is_some() as u8);
            if let Some(rect) = clip {
                encode_rect(buf, rect);
            }
        }
        ServerEvent::SetStroke { width } => {
            buf.push(EVENT_SET_STROKE);
            write_f32(buf, *width);
        }
        ServerEvent::SetTransform { transform } => {
            buf.push(EVENT_SET_TRANSFORM);
            write_f64(buf, transform.scale_x);
            write_f64(buf, transform.scale_y);
            write_f64(buf, transform.translate_x);
            write_f64(buf, transform.translate_y);
        }
        ServerEvent::DrawLine { x1, y1, x2, y2 } => {
            buf.push(EVENT_DRAW_LINE);
            write_var_i32(buf, *x1);
            write_var_i32(buf, *y1);
            write_var_i32(buf, *x2);
            write_var_i32(buf, *y2);
        }
        ServerEvent::DrawRect { rect } => {
            buf.push(EVENT_DRAW_RECT);
            encode_rect(buf, rect);
        }
        ServerEvent::FillRect { rect } => {
            buf.push(EVENT_FILL_RECT);
            encode_rect(buf, rect);
        }
        ServerEvent::ClearRect { rect } => {
            buf.push(EVENT_CLEAR_RECT);
            encode_rect(buf, rect);
        }
        ServerEvent::DrawOval { rect } => {
            buf.push(EVENT_DRAW_OVAL);
            encode_rect(buf, rect);
        }
        ServerEvent::FillOval { rect } => {
            buf.push(EVENT_FILL_OVAL);
            encode_rect(buf, rect);
        }
        ServerEvent::DrawPolyline { points } => {
            buf.push(EVENT_DRAW_POLYLINE);
            encode_points(buf, points);
        }
        ServerEvent::FillPolygon { points } => {
            buf.push(EVENT_FILL_POLYGON);
            encode_points(buf, points);
        }
        ServerEvent::DrawString {
            text,
            x,
            y,
            desired_width,
        } => {
            buf.push(EVENT_DRAW_STRING);
            write_string(buf, text);
            write_var_i32(buf, *x);
            write_var_i32(buf, *y);
            write_f64(buf, *desired_width);
        }
        ServerEvent::DrawImage {
            image_id,
            x,
            y,
            scale_to,
        } => {
            buf.push(EVENT_DRAW_IMAGE);
            encode_image_id(buf, image_id);
            write_var_i32(buf, *x);
            write_var_i32(buf, *y);
            buf.push(scale_to.is_some() as u8);
            if let Some(size) = scale_to {
                write_var_u32(buf, size.width);
                write_var_u32(buf, size.height);
            }
        }
        ServerEvent::CopyArea { rect, dx, dy } => {
            buf.push(EVENT_COPY_AREA);
            encode_rect(buf, rect);
            write_var_i32(buf, *dx);
            write_var_i32(buf, *dy);
        }
        ServerEvent::Unsupported { name } => {
            buf.push(EVENT_UNSUPPORTED);
            write_string(buf, name);
        }
    }
}

fn decode_event(cursor: &mut Cursor<'_>) -> Result<ServerEvent, WireError> {
    let tag = cursor.read_u8()?;
    let event = match tag {
        EVENT_SET_PAINT => ServerEvent::SetPaint {
            paint: decode_paint(cursor)?,
        },
        EVENT_SET_FONT => ServerEvent::SetFont {
            font: decode_font(cursor)?,
        },
        EVENT_SET_COMPOSITE => {
            let rule = CompositeRule::from_u8(cursor.read_u8()?)
                .ok_or(WireError::InvalidData("invalid composite rule"))?;
            let alpha = cursor.read_f32()?;
            ServerEvent::SetComposite { rule, alpha }
        }
        EVENT_SET_CLIP => {
            let clip = if cursor.read_bool()? {
                Some(decode_rect(cursor)?)
            } else {
                None
            };
            ServerEvent::SetClip { clip }
        }
        EVENT_SET_STROKE => ServerEvent::SetStroke {
            width: cursor.read_f32()?,
        },
        EVENT_SET_TRANSFORM => {
            let scale_x = cursor.read_f64()?;
            let scale_y = cursor.read_f64()?;
            let translate_x = cursor.read_f64()?;
            let translate_y = cursor.read_f64()?;
            ServerEvent::SetTransform {
                transform: Transform {
                    scale_x,
                    scale_y,
                    translate_x,
                    translate_y,
                },
            }
        }
        EVENT_DRAW_LINE => {
            let x1 = cursor.read_var_i32()?;
            let y1 = cursor.read_var_i32()?;
            let x2 = cursor.read_var_i32()?;
            let y2 = cursor.read_var_i32()?;
            ServerEvent::DrawLine { x1, y1, x2, y2 }
        }
        EVENT_DRAW_RECT => ServerEvent::DrawRect {
            rect: decode_rect(cursor)?,
        },
        EVENT_FILL_RECT => ServerEvent::FillRect {
            rect: decode_rect(cursor)?,
        },
        EVENT_CLEAR_RECT => ServerEvent::ClearRect {
            rect: decode_rect(cursor)?,
        },
        EVENT_DRAW_OVAL => ServerEvent::DrawOval {
            rect: decode_rect(cursor)?,
        },
        EVENT_FILL_OVAL => ServerEvent::FillOval {
            rect: decode_rect(cursor)?,
        },
        EVENT_DRAW_POLYLINE => ServerEvent::DrawPolyline {
            points: decode_points(cursor)?,
        },
        EVENT_FILL_POLYGON => ServerEvent::FillPolygon {
            points: decode_points(cursor)?,
        },
        EVENT_DRAW_STRING => {
            let text = cursor.read_string()?;
            let x = cursor.read_var_i32()?;
            let y = cursor.read_var_i32()?;
            let desired_width = cursor.read_f64()?;
            ServerEvent::DrawString {
                text,
                x,
                y,
                desired_width,
            }
        }
        EVENT_DRAW_IMAGE => {
            let image_id = decode_image_id(cursor)?;
            let x = cursor.read_var_i32()?;
            let y = cursor.read_var_i32()?;
            let scale_to = if cursor.read_bool()? {
                let width = cursor.read_var_u32()?;
                let height = cursor.read_var_u32()?;
                Some(Size { width, height })
            } else {
                None
            };
            ServerEvent::DrawImage {
                image_id,
                x,
                y,
                scale_to,
            }
        }
        EVENT_COPY_AREA => {
            let rect = decode_rect(cursor)?;
            let dx = cursor.read_var_i32()?;
            let dy = cursor.read_var_i32()?;
            ServerEvent::CopyArea { rect, dx, dy }
        }
        EVENT_UNSUPPORTED => ServerEvent::Unsupported {
            name: cursor.read_string()?,
        },
        other => return Err(WireError::UnknownEventTag(other)),
    };
    Ok(event)
}

fn encode_target(buf: &mut Vec<u8>, target: &PaintTarget) {
    match target {
        PaintTarget::Surface => buf.push(TARGET_SURFACE),
        PaintTarget::Offscreen(offscreen) => {
            buf.push(TARGET_OFFSCREEN);
            write_var_u64(buf, offscreen.handle);
            write_var_u32(buf, offscreen.width);
            write_var_u32(buf, offscreen.height);
        }
    }
}

fn decode_target(cursor: &mut Cursor<'_>) -> Result<PaintTarget, WireError> {
    match cursor.read_u8()? {
        TARGET_SURFACE => Ok(PaintTarget::Surface),
        TARGET_OFFSCREEN => {
            let handle = cursor.read_var_u64()?;
            let width = cursor.read_var_u32()?;
            let height = cursor.read_var_u32()?;
            Ok(PaintTarget::Offscreen(OffscreenTarget {
                handle,
                width,
                height,
            }))
        }
        _ => Err(WireError::InvalidData("invalid paint target")),
    }
}

fn encode_paint(buf: &mut Vec<u8>, paint: &PaintValue) {
    match paint {
        PaintValue::Color { argb } => {
            buf.push(PAINT_COLOR);
            write_var_u32(buf, argb.0);
        }
        PaintValue::Gradient {
            start,
            end,
            start_color,
            end_color,
        } => {
            buf.push(PAINT_GRADIENT);
            encode_point(buf, start);
            encode_point(buf, end);
            write_var_u32(buf, start_color.0);
            write_var_u32(buf, end_color.0);
        }
    }
}

fn decode_paint(cursor: &mut Cursor<'_>) -> Result<PaintValue, WireError> {
    match cursor.read_u8()? {
        PAINT_COLOR => Ok(PaintValue::Color {
            argb: Argb(cursor.read_var_u32()?),
        }),
        PAINT_GRADIENT => {
            let start = decode_point(cursor)?;
            let end = decode_point(cursor)?;
            let start_color = Argb(cursor.read_var_u32()?);
            let end_color = Argb(cursor.read_var_u32()?);
            Ok(PaintValue::Gradient {
                start,
                end,
                start_color,
                end_color,
            })
        }
        _ => Err(WireError::InvalidData("invalid paint tag")),
    }
}

fn decode_font(cursor: &mut Cursor<'_>) -> Result<FontSpec, WireError> {
    let font_id = cursor.read_var_u16()?;
    let size = cursor.read_var_u16()?;
    Ok(FontSpec { font_id, size })
}

fn encode_image_id(buf: &mut Vec<u8>, id: &ImageId) {
    match id {
        ImageId::Bitmap {
            identity,
            content_hash,
        } => {
            buf.push(IMAGE_ID_BITMAP);
            write_var_u32(buf, *identity);
            write_var_u64(buf, *content_hash);
        }
        ImageId::Offscreen { handle } => {
            buf.push(IMAGE_ID_OFFSCREEN);
            write_var_u64(buf, *handle);
        }
        ImageId::Unknown { description } => {
            buf.push(IMAGE_ID_UNKNOWN);
            write_string(buf, description);
        }
    }
}

fn decode_image_id(cursor: &mut Cursor<'_>) -> Result<ImageId, WireError> {
    match cursor.read_u8()? {
        IMAGE_ID_BITMAP => {
            let identity = cursor.read_var_u32()?;
            let content_hash = cursor.read_var_u64()?;
            Ok(ImageId::Bitmap {
                identity,
                content_hash,
            })
        }
        IMAGE_ID_OFFSCREEN => Ok(ImageId::Offscreen {
            handle: cursor.read_var_u64()?,
        }),
        IMAGE_ID_UNKNOWN => Ok(ImageId::Unknown {
            description: cursor.read_string()?,
        }),
        _ => Err(WireError::InvalidData("invalid image id tag")),
    }
}

fn encode_caret(buf: &mut Vec<u8>, change: &CaretInfoChange) {
    match change {
        CaretInfoChange::NoCarets => buf.push(CARET_NONE),
        CaretInfoChange::Carets(geometry) => {
            buf.push(CARET_PRESENT);
            write_var_u32(buf, geometry.editor_window_id);
            write_var_u32(buf, geometry.carets.len() as u32);
            for caret in &geometry.carets {
                write_var_i32(buf, caret.x);
                write_var_i32(buf, caret.y);
            }
            write_var_u32(buf, geometry.font.font_id as u32);
            write_var_u32(buf, geometry.font.size as u32);
            write_var_i32(buf, geometry.line_height);
            write_var_i32(buf, geometry.line_ascent);
            encode_rect(buf, &geometry.editor_bounds);
            write_var_i32(buf, geometry.scrollbar_width);
            write_var_u32(buf, geometry.text_color.0);
            write_var_u32(buf, geometry.background_color.0);
        }
    }
}

fn decode_caret(cursor: &mut Cursor<'_>) -> Result<CaretInfoChange, WireError> {
    match cursor.read_u8()? {
        CARET_NONE => Ok(CaretInfoChange::NoCarets),
        CARET_PRESENT => {
            let editor_window_id = cursor.read_var_u32()?;
            let count = cursor.read_var_u32()? as usize;
            let mut carets = Vec::with_capacity(count.min(cursor.remaining()));
            for _ in 0..count {
                let x = cursor.read_var_i32()?;
                let y = cursor.read_var_i32()?;
                carets.push(CaretPosition { x, y });
            }
            let font = decode_font(cursor)?;
            let line_height = cursor.read_var_i32()?;
            let line_ascent = cursor.read_var_i32()?;
            let editor_bounds = decode_rect(cursor)?;
            let scrollbar_width = cursor.read_var_i32()?;
            let text_color = Argb(cursor.read_var_u32()?);
            let background_color = Argb(cursor.read_var_u32()?);
            Ok(CaretInfoChange::Carets(CaretGeometry {
                editor_window_id,
                carets,
                font,
                line_height,
                line_ascent,
                editor_bounds,
                scrollbar_width,
                text_color,
                background_color,
            }))
        }
        _ => Err(WireError::InvalidData("invalid caret tag")),
    }
}

fn encode_rect(buf: &mut Vec<u8>, rect: &Rect) {
    write_var_i32(buf, rect.x);
    write_var_i32(buf, rect.y);
    write_var_i32(buf, rect.width);
    write_var_i32(buf, rect.height);
}

fn decode_rect(cursor: &mut Cursor<'_>) -> Result<Rect, WireError> {
    let x = cursor.read_var_i32()?;
    let y = cursor.read_var_i32()?;
    let width = cursor.read_var_i32()?;
    let height = cursor.read_var_i32()?;
    Ok(Rect::new(x, y, width, height))
}

fn encode_point(buf: &mut Vec<u8>, point: &Point) {
    write_var_i32(buf, point.x);
    write_var_i32(buf, point.y);
}

fn decode_point(cursor: &mut Cursor<'_>) -> Result<Point, WireError> {
    let x = cursor.read_var_i32()?;
    let y = cursor.read_var_i32()?;
    Ok(Point::new(x, y))
}

fn encode_points(buf: &mut Vec<u8>, points: &[Point]) {
    write_var_u32(buf, points.len() as u32);
    for point in points {
        encode_point(buf, point);
    }
}

fn decode_points(cursor: &mut Cursor<'_>) -> Result<Vec<Point>, WireError> {
    let count = cursor.read_var_u32()? as usize;
    let mut points = Vec::with_capacity(count.min(cursor.remaining()));
    for _ in 0..count {
        points.push(decode_point(cursor)?);
    }
    Ok(points)
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & TYPE_MASK));
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<(u8, u8), WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    let kind = byte & TYPE_MASK;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::InvalidVersion(version));
    }
    Ok((kind, version))
}

fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    write_var_u64(buf, value as u64);
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn write_var_i32(buf: &mut Vec<u8>, value: i32) {
    let zigzag = ((value << 1) ^ (value >> 31)) as u32;
    write_var_u32(buf, zigzag);
}

fn write_f32(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_var_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_bytes(buf, value.as_bytes());
}

#[derive(Clone, Copy)]
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let value = self.bytes[self.pos];
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    fn read_var_u16(&mut self) -> Result<u16, WireError> {
        let value = self.read_var_u32()?;
        u16::try_from(value).map_err(|_| WireError::InvalidData("u16 overflow"))
    }

    fn read_var_i32(&mut self) -> Result<i32, WireError> {
        let zigzag = self.read_var_u32()?;
        Ok(((zigzag >> 1) as i32) ^ -((zigzag & 1) as i32))
    }

    fn read_f32(&mut self) -> Result<f32, WireError> {
        let bytes = self.read_bytes(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(f32::from_le_bytes(raw))
    }

    fn read_f64(&mut self) -> Result<f64, WireError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::InvalidData("invalid boolean")),
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(WireError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_var_u32()? as usize;
        self.read_bytes(len)
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let bytes = self.read_blob()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidData("invalid utf-8"))
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn finish(&self) -> Result<(), WireError> {
        if self.remaining() > 0 {
            return Err(WireError::InvalidData("trailing bytes after frame"));
        }
        Ok(())
    }
}
