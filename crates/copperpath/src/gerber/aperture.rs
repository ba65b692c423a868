use crate::geometry::Point;
use std::collections::HashMap;
use std::f64::consts::{PI, TAU};

/// Largest vertex count a regular polygon primitive may declare.
pub const MAX_POLYGON_VERTICES: u32 = 12;

/// A stamp or stroke footprint.
#[derive(Debug, Clone, PartialEq)]
pub enum Aperture {
    Circular { diameter: i32 },
    Rectangular { width: i32, height: i32 },
    Oval { width: i32, height: i32 },
    /// Regular octagon with flat sides facing the axes; `diameter` is the
    /// circumscribed diameter.
    Octagonal { diameter: i32 },
    Macro(ApertureMacro),
}

impl Aperture {
    /// Width of the aperture's bounding box.
    pub fn width(&self) -> i32 {
        match self {
            Aperture::Circular { diameter } | Aperture::Octagonal { diameter } => *diameter,
            Aperture::Rectangular { width, .. } | Aperture::Oval { width, .. } => *width,
            Aperture::Macro(m) => 2 * m.circumradius(),
        }
    }

    /// Height of the aperture's bounding box.
    pub fn height(&self) -> i32 {
        match self {
            Aperture::Circular { diameter } | Aperture::Octagonal { diameter } => *diameter,
            Aperture::Rectangular { height, .. } | Aperture::Oval { height, .. } => *height,
            Aperture::Macro(m) => 2 * m.circumradius(),
        }
    }

    /// Radius of the smallest origin-centered circle containing the footprint.
    pub fn circumradius(&self) -> i32 {
        match self {
            Aperture::Circular { diameter } | Aperture::Octagonal { diameter } => diameter / 2,
            Aperture::Rectangular { width, height } => {
                ((*width as f64).hypot(*height as f64) / 2.0) as i32
            }
            Aperture::Oval { width, height } => (*width).max(*height) / 2,
            Aperture::Macro(m) => m.circumradius(),
        }
    }

    /// Stroke width used when the aperture draws a line or arc.
    pub fn stroke_width(&self) -> i32 {
        match self {
            Aperture::Circular { diameter } | Aperture::Octagonal { diameter } => *diameter,
            Aperture::Rectangular { width, height } | Aperture::Oval { width, height } => {
                (*width).min(*height)
            }
            Aperture::Macro(m) => 2 * m.circumradius(),
        }
    }

    pub fn is_circular(&self) -> bool {
        matches!(self, Aperture::Circular { .. })
    }
}

/// A named composite aperture.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApertureMacro {
    pub name: String,
    pub primitives: Vec<MacroPrimitive>,
}

impl ApertureMacro {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primitives: Vec::new(),
        }
    }

    pub fn circumradius(&self) -> i32 {
        self.primitives
            .iter()
            .map(MacroPrimitive::extent)
            .fold(0.0_f64, f64::max)
            .ceil() as i32
    }
}

/// One element of an aperture macro, in aperture-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum MacroPrimitive {
    Circle {
        diameter: i32,
        center: Point,
    },
    Outline {
        points: Vec<Point>,
        rotation: i32,
    },
    VectorLine {
        width: i32,
        start: Point,
        end: Point,
        rotation: i32,
    },
    CenterLine {
        width: i32,
        height: i32,
        center: Point,
        rotation: i32,
    },
    Polygon {
        vertices: u32,
        center: Point,
        diameter: i32,
        rotation: i32,
    },
}

impl MacroPrimitive {
    pub fn rotation(&self) -> i32 {
        match self {
            MacroPrimitive::Circle { .. } => 0,
            MacroPrimitive::Outline { rotation, .. }
            | MacroPrimitive::VectorLine { rotation, .. }
            | MacroPrimitive::CenterLine { rotation, .. }
            | MacroPrimitive::Polygon { rotation, .. } => *rotation,
        }
    }

    /// Rotate an integer point about the aperture origin by this primitive's
    /// rotation, truncating toward zero.
    pub fn translate(&self, point: Point) -> Point {
        let rotation = self.rotation();
        if rotation == 0 {
            return point;
        }
        let angle = (rotation as f64).to_radians();
        let (x, y) = (point.x as f64, point.y as f64);
        Point::new(
            (x * angle.cos() - y * angle.sin()) as i32,
            (x * angle.sin() + y * angle.cos()) as i32,
        )
    }

    fn rotate(&self, point: kurbo::Point) -> kurbo::Point {
        let angle = (self.rotation() as f64).to_radians();
        if angle == 0.0 {
            return point;
        }
        kurbo::Point::new(
            point.x * angle.cos() - point.y * angle.sin(),
            point.x * angle.sin() + point.y * angle.cos(),
        )
    }

    /// Filled outline in aperture-local coordinates, rotation applied.
    /// Circles have no polygon and return `None`.
    pub fn polygon(&self) -> Option<Vec<kurbo::Point>> {
        match self {
            MacroPrimitive::Circle { .. } => None,
            MacroPrimitive::Outline { points, .. } => Some(
                points
                    .iter()
                    .map(|p| self.translate(*p).to_kurbo())
                    .collect(),
            ),
            MacroPrimitive::VectorLine {
                width, start, end, ..
            } => {
                let start = self.translate(*start).to_kurbo();
                let end = self.translate(*end).to_kurbo();
                let direction = end - start;
                let length = direction.hypot();
                if length == 0.0 {
                    return Some(Vec::new());
                }
                let normal = kurbo::Vec2::new(-direction.y, direction.x) * (*width as f64 / 2.0 / length);
                Some(vec![start + normal, end + normal, end - normal, start - normal])
            }
            MacroPrimitive::CenterLine {
                width,
                height,
                center,
                ..
            } => {
                let (hw, hh) = (*width as f64 / 2.0, *height as f64 / 2.0);
                let (cx, cy) = (center.x as f64, center.y as f64);
                Some(
                    [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)]
                        .iter()
                        .map(|(dx, dy)| self.rotate(kurbo::Point::new(cx + dx, cy + dy)))
                        .collect(),
                )
            }
            MacroPrimitive::Polygon {
                vertices,
                center,
                diameter,
                ..
            } => {
                let r = *diameter as f64 / 2.0;
                let n = (*vertices).clamp(3, MAX_POLYGON_VERTICES);
                Some(
                    (0..n)
                        .map(|k| {
                            let theta = TAU * k as f64 / n as f64;
                            self.rotate(kurbo::Point::new(
                                center.x as f64 + r * theta.cos(),
                                center.y as f64 + r * theta.sin(),
                            ))
                        })
                        .collect(),
                )
            }
        }
    }

    /// Farthest distance of the footprint from the aperture origin.
    pub fn extent(&self) -> f64 {
        match self {
            MacroPrimitive::Circle { diameter, center } => {
                Point::new(0, 0).distance_to(*center) + *diameter as f64 / 2.0
            }
            other => other
                .polygon()
                .unwrap_or_default()
                .iter()
                .map(|p| p.to_vec2().hypot())
                .fold(0.0, f64::max),
        }
    }
}

/// Vertices of an octagonal aperture centered on the origin.
pub fn octagon_vertices(diameter: i32) -> Vec<kurbo::Point> {
    let r = diameter as f64 / 2.0;
    (0..8)
        .map(|k| {
            let theta = PI / 8.0 + k as f64 * PI / 4.0;
            kurbo::Point::new(r * theta.cos(), r * theta.sin())
        })
        .collect()
}

/// Stable handle to an aperture stored in an [`ApertureTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApertureId(usize);

/// Arena of aperture definitions, indexed by D code.
///
/// Redefining a D code adds a new slot; primitives referencing the old
/// definition keep it.
#[derive(Debug, Clone, Default)]
pub struct ApertureTable {
    apertures: Vec<Aperture>,
    by_code: HashMap<i32, ApertureId>,
}

impl ApertureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, code: i32, aperture: Aperture) -> ApertureId {
        let id = ApertureId(self.apertures.len());
        self.apertures.push(aperture);
        self.by_code.insert(code, id);
        id
    }

    pub fn lookup(&self, code: i32) -> Option<ApertureId> {
        self.by_code.get(&code).copied()
    }

    /// Resolve a handle. Handles are only created by this table, so the
    /// lookup never fails for ids that came from it.
    pub fn get(&self, id: ApertureId) -> &Aperture {
        &self.apertures[id.0]
    }

    pub fn by_code(&self, code: i32) -> Option<&Aperture> {
        self.lookup(code).map(|id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.apertures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apertures.is_empty()
    }
}
