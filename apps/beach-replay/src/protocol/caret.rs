use serde::{Deserialize, Serialize};

use super::events::{Argb, FontSpec, Rect};
use super::schema::{Describe, Field, Shape, Variant};

/// Top-left corner of a caret's line box, in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaretPosition {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaretGeometry {
    pub editor_window_id: u32,
    pub carets: Vec<CaretPosition>,
    pub font: FontSpec,
    pub line_height: i32,
    pub line_ascent: i32,
    /// Visible editor area in surface pixels, scrollbar included.
    pub editor_bounds: Rect,
    pub scrollbar_width: i32,
    pub text_color: Argb,
    pub background_color: Argb,
}

/// Authoritative caret state. Each update replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaretInfoChange {
    NoCarets,
    Carets(CaretGeometry),
}

impl Describe for CaretPosition {
    fn shape() -> Shape {
        Shape::record(
            "CaretPosition",
            vec![Field::of::<i32>("x"), Field::of::<i32>("y")],
        )
    }
}

impl Describe for CaretGeometry {
    fn shape() -> Shape {
        Shape::record(
            "CaretGeometry",
            vec![
                Field::of::<u32>("editor_window_id"),
                Field::of::<Vec<CaretPosition>>("carets"),
                Field::of::<FontSpec>("font"),
                Field::of::<i32>("line_height"),
                Field::of::<i32>("line_ascent"),
                Field::of::<Rect>("editor_bounds"),
                Field::of::<i32>("scrollbar_width"),
                Field::of::<Argb>("text_color"),
                Field::of::<Argb>("background_color"),
            ],
        )
    }
}

impl Describe for CaretInfoChange {
    fn shape() -> Shape {
        Shape::tagged(
            "CaretInfoChange",
            vec![
                Variant::unit("no_carets"),
                Variant::new("carets", CaretGeometry::shape()),
            ],
        )
    }
}
