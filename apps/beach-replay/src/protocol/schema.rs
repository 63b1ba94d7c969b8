//! Structural description of the wire schema.
//!
//! Every message type exposes its [`Shape`] through [`Describe`]. The
//! compatibility fingerprint folds field names, nullability and variant tags
//! over those shapes, so two builds agree on the fingerprint exactly when they
//! agree on the structure of what they put on the wire. Outer type names are
//! kept for diagnostics and for locating records, but never hashed: renaming a
//! Rust type is not a protocol change.

const NULLABLE_HASH: i32 = 1231;
const NON_NULLABLE_HASH: i32 = 1237;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Bool,
    Int,
    Long,
    Float,
    Double,
    Char,
    String,
    Bytes,
}

impl Primitive {
    fn label(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Char => "char",
            Primitive::String => "string",
            Primitive::Bytes => "bytes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub nullable: bool,
    pub shape: Shape,
}

impl Field {
    pub fn of<T: Describe>(name: &'static str) -> Self {
        Self {
            name,
            nullable: false,
            shape: T::shape(),
        }
    }

    pub fn nullable<T: Describe>(name: &'static str) -> Self {
        Self {
            name,
            nullable: true,
            shape: T::shape(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub tag: &'static str,
    pub shape: Shape,
}

impl Variant {
    pub fn new(tag: &'static str, shape: Shape) -> Self {
        Self { tag, shape }
    }

    pub fn unit(tag: &'static str) -> Self {
        Self {
            tag,
            shape: Shape::Record {
                name: tag,
                fields: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Primitive(Primitive),
    Record {
        name: &'static str,
        fields: Vec<Field>,
    },
    /// Closed family of tagged variants; each variant is hashed recursively.
    Tagged {
        name: &'static str,
        variants: Vec<Variant>,
    },
    /// Plain enumeration; contributes its cases only, never recursed into.
    Enumeration {
        name: &'static str,
        cases: Vec<&'static str>,
    },
    List(Box<Shape>),
}

impl Shape {
    pub fn record(name: &'static str, fields: Vec<Field>) -> Self {
        Shape::Record { name, fields }
    }

    pub fn tagged(name: &'static str, variants: Vec<Variant>) -> Self {
        Shape::Tagged { name, variants }
    }

    pub fn enumeration(name: &'static str, cases: Vec<&'static str>) -> Self {
        Shape::Enumeration { name, cases }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Shape::Primitive(primitive) => primitive.label(),
            Shape::Record { name, .. }
            | Shape::Tagged { name, .. }
            | Shape::Enumeration { name, .. } => *name,
            Shape::List(_) => "list",
        }
    }

    /// Structural hash of this shape.
    pub fn structural_hash(&self) -> i32 {
        match self {
            Shape::Primitive(primitive) => string_hash(primitive.label()),
            Shape::Record { fields, .. } => fields.iter().fold(0, |hash, field| {
                let hash = mix(hash, string_hash(field.name));
                let hash = mix(hash, bool_hash(field.nullable));
                mix(hash, field.shape.structural_hash())
            }),
            Shape::Tagged { variants, .. } => {
                let hash = mix(0, variants.len() as i32);
                variants.iter().fold(hash, |hash, variant| {
                    let hash = mix(hash, string_hash(variant.tag));
                    mix(hash, variant.shape.structural_hash())
                })
            }
            Shape::Enumeration { cases, .. } => {
                let hash = mix(0, cases.len() as i32);
                cases
                    .iter()
                    .fold(hash, |hash, case| mix(hash, string_hash(case)))
            }
            Shape::List(inner) => mix(string_hash("list"), inner.structural_hash()),
        }
    }

    /// Copy of this shape with the named variant removed from every tagged
    /// family called `family`. Used to reconstruct schemas of older releases.
    pub fn without_variant(&self, family: &str, tag: &str) -> Shape {
        match self {
            Shape::Tagged { name, variants } => {
                let variants = variants
                    .iter()
                    .filter(|variant| !(*name == family && variant.tag == tag))
                    .map(|variant| Variant {
                        tag: variant.tag,
                        shape: variant.shape.without_variant(family, tag),
                    })
                    .collect();
                Shape::Tagged {
                    name: *name,
                    variants,
                }
            }
            Shape::Record { name, fields } => Shape::Record {
                name: *name,
                fields: fields
                    .iter()
                    .map(|field| Field {
                        name: field.name,
                        nullable: field.nullable,
                        shape: field.shape.without_variant(family, tag),
                    })
                    .collect(),
            },
            Shape::List(inner) => Shape::List(Box::new(inner.without_variant(family, tag))),
            other => other.clone(),
        }
    }
}

pub trait Describe {
    fn shape() -> Shape;
}

/// Folds the structural hashes of all root message families.
pub fn fingerprint(roots: &[Shape]) -> i32 {
    roots
        .iter()
        .fold(0, |hash, root| mix(hash, root.structural_hash()))
}

#[inline]
fn mix(hash: i32, value: i32) -> i32 {
    hash.wrapping_mul(31).wrapping_add(value)
}

fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0, |hash, unit| mix(hash, i32::from(unit)))
}

fn bool_hash(value: bool) -> i32 {
    if value {
        NULLABLE_HASH
    } else {
        NON_NULLABLE_HASH
    }
}

macro_rules! describe_primitive {
    ($($ty:ty => $primitive:ident),* $(,)?) => {
        $(
            impl Describe for $ty {
                fn shape() -> Shape {
                    Shape::Primitive(Primitive::$primitive)
                }
            }
        )*
    };
}

describe_primitive! {
    bool => Bool,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    i32 => Int,
    u64 => Long,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    char => Char,
    String => String,
}

impl<T: Describe> Describe for Vec<T> {
    fn shape() -> Shape {
        Shape::List(Box::new(T::shape()))
    }
}
