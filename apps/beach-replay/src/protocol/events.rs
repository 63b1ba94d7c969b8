use serde::{Deserialize, Serialize};

use super::image::ImageId;
use super::schema::{Describe, Field, Shape, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Rect::new(x, y, (right - x).max(0), (bottom - y).max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Packed `0xAARRGGBB` color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Argb(pub u32);

impl Argb {
    pub const TRANSPARENT: Argb = Argb(0x0000_0000);
    pub const BLACK: Argb = Argb(0xFF00_0000);
    pub const WHITE: Argb = Argb(0xFFFF_FFFF);

    pub const fn alpha(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }

    pub const fn to_rgba(self) -> [u8; 4] {
        [self.red(), self.green(), self.blue(), self.alpha()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaintValue {
    Color {
        argb: Argb,
    },
    /// Linear gradient between two points, clamped outside the segment.
    Gradient {
        start: Point,
        end: Point,
        start_color: Argb,
        end_color: Argb,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeRule {
    Clear,
    Src,
    Dst,
    SrcOver,
    DstOver,
    SrcIn,
    DstIn,
    SrcOut,
    DstOut,
    SrcAtop,
    DstAtop,
    Xor,
}

impl CompositeRule {
    pub const ALL: [CompositeRule; 12] = [
        CompositeRule::Clear,
        CompositeRule::Src,
        CompositeRule::Dst,
        CompositeRule::SrcOver,
        CompositeRule::DstOver,
        CompositeRule::SrcIn,
        CompositeRule::DstIn,
        CompositeRule::SrcOut,
        CompositeRule::DstOut,
        CompositeRule::SrcAtop,
        CompositeRule::DstAtop,
        CompositeRule::Xor,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    fn tag(self) -> &'static str {
        match self {
            CompositeRule::Clear => "clear",
            CompositeRule::Src => "src",
            CompositeRule::Dst => "dst",
            CompositeRule::SrcOver => "src_over",
            CompositeRule::DstOver => "dst_over",
            CompositeRule::SrcIn => "src_in",
            CompositeRule::DstIn => "dst_in",
            CompositeRule::SrcOut => "src_out",
            CompositeRule::DstOut => "dst_out",
            CompositeRule::SrcAtop => "src_atop",
            CompositeRule::DstAtop => "dst_atop",
            CompositeRule::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale_x: 1.0,
        scale_y: 1.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.scale_x + self.translate_x,
            y * self.scale_y + self.translate_y,
        )
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FontSpec {
    pub font_id: u16,
    pub size: u16,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            font_id: 0,
            size: 12,
        }
    }
}

/// Drawing state a prerequisite event sets. Categories are independent of
/// each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateCategory {
    Paint,
    Font,
    Composite,
    Clip,
    Stroke,
    Transform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Prerequisite(StateCategory),
    Paint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SetPaint {
        paint: PaintValue,
    },
    SetFont {
        font: FontSpec,
    },
    SetComposite {
        rule: CompositeRule,
        alpha: f32,
    },
    SetClip {
        #[serde(default)]
        clip: Option<Rect>,
    },
    SetStroke {
        width: f32,
    },
    SetTransform {
        transform: Transform,
    },
    DrawLine {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
    },
    DrawRect {
        rect: Rect,
    },
    FillRect {
        rect: Rect,
    },
    ClearRect {
        rect: Rect,
    },
    DrawOval {
        rect: Rect,
    },
    FillOval {
        rect: Rect,
    },
    DrawPolyline {
        points: Vec<Point>,
    },
    FillPolygon {
        points: Vec<Point>,
    },
    DrawString {
        text: String,
        x: i32,
        y: i32,
        desired_width: f64,
    },
    DrawImage {
        image_id: ImageId,
        x: i32,
        y: i32,
        #[serde(default)]
        scale_to: Option<Size>,
    },
    CopyArea {
        rect: Rect,
        dx: i32,
        dy: i32,
    },
    /// Event the producer emitted for an operation this client cannot
    /// reproduce. Dropped at replay time.
    Unsupported {
        name: String,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::SetPaint { .. } => EventKind::Prerequisite(StateCategory::Paint),
            ServerEvent::SetFont { .. } => EventKind::Prerequisite(StateCategory::Font),
            ServerEvent::SetComposite { .. } => EventKind::Prerequisite(StateCategory::Composite),
            ServerEvent::SetClip { .. } => EventKind::Prerequisite(StateCategory::Clip),
            ServerEvent::SetStroke { .. } => EventKind::Prerequisite(StateCategory::Stroke),
            ServerEvent::SetTransform { .. } => EventKind::Prerequisite(StateCategory::Transform),
            ServerEvent::DrawLine { .. }
            | ServerEvent::DrawRect { .. }
            | ServerEvent::FillRect { .. }
            | ServerEvent::ClearRect { .. }
            | ServerEvent::DrawOval { .. }
            | ServerEvent::FillOval { .. }
            | ServerEvent::DrawPolyline { .. }
            | ServerEvent::FillPolygon { .. }
            | ServerEvent::DrawString { .. }
            | ServerEvent::DrawImage { .. }
            | ServerEvent::CopyArea { .. }
            | ServerEvent::Unsupported { .. } => EventKind::Paint,
        }
    }

    pub fn category(&self) -> Option<StateCategory> {
        match self.kind() {
            EventKind::Prerequisite(category) => Some(category),
            EventKind::Paint => None,
        }
    }

    pub fn is_paint(&self) -> bool {
        matches!(self.kind(), EventKind::Paint)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServerEvent::SetPaint { .. } => "set_paint",
            ServerEvent::SetFont { .. } => "set_font",
            ServerEvent::SetComposite { .. } => "set_composite",
            ServerEvent::SetClip { .. } => "set_clip",
            ServerEvent::SetStroke { .. } => "set_stroke",
            ServerEvent::SetTransform { .. } => "set_transform",
            ServerEvent::DrawLine { .. } => "draw_line",
            ServerEvent::DrawRect { .. } => "draw_rect",
            ServerEvent::FillRect { .. } => "fill_rect",
            ServerEvent::ClearRect { .. } => "clear_rect",
            ServerEvent::DrawOval { .. } => "draw_oval",
            ServerEvent::FillOval { .. } => "fill_oval",
            ServerEvent::DrawPolyline { .. } => "draw_polyline",
            ServerEvent::FillPolygon { .. } => "fill_polygon",
            ServerEvent::DrawString { .. } => "draw_string",
            ServerEvent::DrawImage { .. } => "draw_image",
            ServerEvent::CopyArea { .. } => "copy_area",
            ServerEvent::Unsupported { .. } => "unsupported",
        }
    }
}

impl Describe for Rect {
    fn shape() -> Shape {
        Shape::record(
            "Rect",
            vec![
                Field::of::<i32>("x"),
                Field::of::<i32>("y"),
                Field::of::<i32>("width"),
                Field::of::<i32>("height"),
            ],
        )
    }
}

impl Describe for Point {
    fn shape() -> Shape {
        Shape::record("Point", vec![Field::of::<i32>("x"), Field::of::<i32>("y")])
    }
}

impl Describe for Size {
    fn shape() -> Shape {
        Shape::record(
            "Size",
            vec![Field::of::<u32>("width"), Field::of::<u32>("height")],
        )
    }
}

impl Describe for Argb {
    fn shape() -> Shape {
        <u32 as Describe>::shape()
    }
}

impl Describe for PaintValue {
    fn shape() -> Shape {
        Shape::tagged(
            "PaintValue",
            vec![
                Variant::new(
                    "color",
                    Shape::record("Color", vec![Field::of::<Argb>("argb")]),
                ),
                Variant::new(
                    "gradient",
                    Shape::record(
                        "Gradient",
                        vec![
                            Field::of::<Point>("start"),
                            Field::of::<Point>("end"),
                            Field::of::<Argb>("start_color"),
                            Field::of::<Argb>("end_color"),
                        ],
                    ),
                ),
            ],
        )
    }
}

impl Describe for CompositeRule {
    fn shape() -> Shape {
        Shape::enumeration(
            "CompositeRule",
            CompositeRule::ALL.iter().map(|rule| rule.tag()).collect(),
        )
    }
}

impl Describe for Transform {
    fn shape() -> Shape {
        Shape::record(
            "Transform",
            vec![
                Field::of::<f64>("scale_x"),
                Field::of::<f64>("scale_y"),
                Field::of::<f64>("translate_x"),
                Field::of::<f64>("translate_y"),
            ],
        )
    }
}

impl Describe for FontSpec {
    fn shape() -> Shape {
        Shape::record(
            "FontSpec",
            vec![Field::of::<u16>("font_id"), Field::of::<u16>("size")],
        )
    }
}

impl Describe for ServerEvent {
    fn shape() -> Shape {
        let rect_only = |name| Shape::record(name, vec![Field::of::<Rect>("rect")]);
        let points_only = |name| Shape::record(name, vec![Field::of::<Vec<Point>>("points")]);
        Shape::tagged(
            "ServerEvent",
            vec![
                Variant::new(
                    "set_paint",
                    Shape::record("SetPaint", vec![Field::of::<PaintValue>("paint")]),
                ),
                Variant::new(
                    "set_font",
                    Shape::record("SetFont", vec![Field::of::<FontSpec>("font")]),
                ),
                Variant::new(
                    "set_composite",
                    Shape::record(
                        "SetComposite",
                        vec![
                            Field::of::<CompositeRule>("rule"),
                            Field::of::<f32>("alpha"),
                        ],
                    ),
                ),
                Variant::new(
                    "set_clip",
                    Shape::record("SetClip", vec![Field::nullable::<Rect>("clip")]),
                ),
                Variant::new(
                    "set_stroke",
                    Shape::record("SetStroke", vec![Field::of::<f32>("width")]),
                ),
                Variant::new(
                    "set_transform",
                    Shape::record("SetTransform", vec![Field::of::<Transform>("transform")]),
                ),
                Variant::new(
                    "draw_line",
                    Shape::record(
                        "DrawLine",
                        vec![
                            Field::of::<i32>("x1"),
                            Field::of::<i32>("y1"),
                            Field::of::<i32>("x2"),
                            Field::of::<i32>("y2"),
                        ],
                    ),
                ),
                Variant::new("draw_rect", rect_only("DrawRect")),
                Variant::new("fill_rect", rect_only("FillRect")),
                Variant::new("clear_rect", rect_only("ClearRect")),
                Variant::new("draw_oval", rect_only("DrawOval")),
                Variant::new("fill_oval", rect_only("FillOval")),
                Variant::new("draw_polyline", points_only("DrawPolyline")),
                Variant::new("fill_polygon", points_only("FillPolygon")),
                Variant::new(
                    "draw_string",
                    Shape::record(
                        "DrawString",
                        vec![
                            Field::of::<String>("text"),
                            Field::of::<i32>("x"),
                            Field::of::<i32>("y"),
                            Field::of::<f64>("desired_width"),
                        ],
                    ),
                ),
                Variant::new(
                    "draw_image",
                    Shape::record(
                        "DrawImage",
                        vec![
                            Field::of::<ImageId>("image_id"),
                            Field::of::<i32>("x"),
                            Field::of::<i32>("y"),
                            Field::nullable::<Size>("scale_to"),
                        ],
                    ),
                ),
                Variant::new(
                    "copy_area",
                    Shape::record(
                        "CopyArea",
                        vec![
                            Field::of::<Rect>("rect"),
                            Field::of::<i32>("dx"),
                            Field::of::<i32>("dy"),
                        ],
                    ),
                ),
                Variant::new(
                    "unsupported",
                    Shape::record("Unsupported", vec![Field::of::<String>("name")]),
                ),
            ],
        )
    }
}
