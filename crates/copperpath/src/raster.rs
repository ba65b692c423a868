//! Rasterization of Gerber primitives into a binary window.
//!
//! Every footprint is decomposed into a union of [`Shape`]s (disks, convex
//! polygons and general polygons) that are filled row by row. A pixel is set
//! when its sample point lies in the closed shape, so zero-width geometry
//! still marks the pixels it passes through.

use crate::error::GenerationError;
use crate::geometry::{Bounds, Curve, Point};
use crate::gerber::{octagon_vertices, Aperture, ApertureTable, MacroPrimitive, Polarity, Primitive};
use kurbo::Vec2;

const EPSILON: f64 = 1e-9;
/// Flattening tolerance for arcs, in internal units.
const FLATTEN_TOLERANCE: f64 = 0.25;

/// A binary image, one byte per pixel, row 0 at the bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// Allocate a blank bitmap, reporting allocation failure instead of aborting.
    pub fn new(width: usize, height: usize) -> Result<Self, GenerationError> {
        let bytes = width
            .checked_mul(height)
            .ok_or(GenerationError::ResourceExhausted {
                what: "raster window",
                bytes: usize::MAX,
            })?;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes)
            .map_err(|_| GenerationError::ResourceExhausted {
                what: "raster window",
                bytes,
            })?;
        pixels.resize(bytes, 0);
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel value; anything outside the bitmap reads as empty.
    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.pixels[y as usize * self.width + x as usize] != 0
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = value as u8;
        }
    }

    /// Set or clear pixels `x0..=x1` of row `y`, clipped to the bitmap.
    pub fn fill_span(&mut self, y: i64, x0: i64, x1: i64, value: bool) {
        if y < 0 || y >= self.height as i64 {
            return;
        }
        let x0 = x0.max(0);
        let x1 = x1.min(self.width as i64 - 1);
        if x0 > x1 {
            return;
        }
        let row = y as usize * self.width;
        self.pixels[row + x0 as usize..=row + x1 as usize].fill(value as u8);
    }

    pub fn filled_count(&self) -> usize {
        self.pixels.iter().filter(|p| **p != 0).count()
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|p| *p == 0)
    }
}

/// Placement of a window on the board: pixel `(px, py)` samples the board
/// point `((origin.x + px) / scale, (origin.y + py) / scale)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelFrame {
    /// Window origin on the global pixel grid.
    pub origin: Point,
    pub width: usize,
    pub height: usize,
    /// Pixels per internal unit.
    pub scale: f64,
}

impl PixelFrame {
    pub fn to_board(&self, pixel: Point) -> Point {
        Point::new(
            ((self.origin.x + pixel.x) as f64 / self.scale).round() as i32,
            ((self.origin.y + pixel.y) as f64 / self.scale).round() as i32,
        )
    }

    /// Board point to window-local (fractional) pixel coordinates.
    pub fn to_pixel(&self, point: kurbo::Point) -> kurbo::Point {
        kurbo::Point::new(
            point.x * self.scale - self.origin.x as f64,
            point.y * self.scale - self.origin.y as f64,
        )
    }

    /// Board area sampled by the window.
    pub fn board_bounds(&self) -> Bounds {
        Bounds::new(
            Point::new(
                (self.origin.x as f64 / self.scale).floor() as i32,
                (self.origin.y as f64 / self.scale).floor() as i32,
            ),
            Point::new(
                ((self.origin.x + self.width as i32) as f64 / self.scale).ceil() as i32,
                ((self.origin.y + self.height as i32) as f64 / self.scale).ceil() as i32,
            ),
        )
    }
}

/// A rectangular render target over part of the board.
#[derive(Debug, Clone)]
pub struct RasterWindow {
    frame: PixelFrame,
    bitmap: Bitmap,
}

impl RasterWindow {
    pub fn new(origin: Point, width: usize, height: usize, scale: f64) -> Result<Self, GenerationError> {
        if width == 0 || height == 0 {
            return Err(GenerationError::InvalidWindow(format!(
                "empty window {width}x{height}"
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(GenerationError::InvalidWindow(format!("bad scale {scale}")));
        }
        Ok(Self {
            frame: PixelFrame {
                origin,
                width,
                height,
                scale,
            },
            bitmap: Bitmap::new(width, height)?,
        })
    }

    pub fn frame(&self) -> &PixelFrame {
        &self.frame
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn into_bitmap(self) -> Bitmap {
        self.bitmap
    }

    /// Paint primitives in order: dark ones grown by `inflation`, clear ones
    /// erased with their disks and strokes shrunk by it.
    pub fn render<'a, I>(&mut self, primitives: I, apertures: &ApertureTable, inflation: i32)
    where
        I: IntoIterator<Item = &'a Primitive>,
    {
        let visible = self.frame.board_bounds();
        for primitive in primitives {
            if !primitive
                .footprint_bounds(apertures, inflation)
                .intersects(&visible)
            {
                continue;
            }
            let (grow, value) = match primitive.polarity() {
                Polarity::Dark => (inflation as f64, true),
                Polarity::Clear => (-(inflation as f64), false),
            };
            for shape in footprint(primitive, apertures, grow) {
                let shape = shape.to_pixels(&self.frame);
                shape.fill(&mut self.bitmap, value);
            }
        }
    }
}

/// Elementary fillable shape, in board or pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Disk { center: kurbo::Point, radius: f64 },
    /// Convex polygon, any orientation; degenerate (collinear) input fills
    /// the segment it spans.
    Convex(Vec<kurbo::Point>),
    /// Simple or self-touching polygon filled with the nonzero rule.
    Polygon(Vec<kurbo::Point>),
}

impl Shape {
    fn to_pixels(&self, frame: &PixelFrame) -> Shape {
        match self {
            Shape::Disk { center, radius } => Shape::Disk {
                center: frame.to_pixel(*center),
                radius: radius * frame.scale,
            },
            Shape::Convex(points) => Shape::Convex(points.iter().map(|p| frame.to_pixel(*p)).collect()),
            Shape::Polygon(points) => {
                Shape::Polygon(points.iter().map(|p| frame.to_pixel(*p)).collect())
            }
        }
    }

    fn y_range(&self) -> Option<(f64, f64)> {
        match self {
            Shape::Disk { center, radius } => Some((center.y - radius, center.y + radius)),
            Shape::Convex(points) | Shape::Polygon(points) => {
                let min = points.iter().map(|p| p.y).reduce(f64::min)?;
                let max = points.iter().map(|p| p.y).reduce(f64::max)?;
                Some((min, max))
            }
        }
    }

    /// Closed x-intervals covered on the horizontal line `y`.
    fn spans(&self, y: f64, out: &mut Vec<(f64, f64)>) {
        match self {
            Shape::Disk { center, radius } => {
                let dy = y - center.y;
                let sq = radius * radius - dy * dy;
                if sq >= -EPSILON {
                    let half = sq.max(0.0).sqrt();
                    out.push((center.x - half, center.x + half));
                }
            }
            Shape::Convex(points) => {
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                for (a, b) in edges(points) {
                    if (a.y - y).abs() <= EPSILON && (b.y - y).abs() <= EPSILON {
                        lo = lo.min(a.x.min(b.x));
                        hi = hi.max(a.x.max(b.x));
                    } else if (a.y.min(b.y) - EPSILON..=a.y.max(b.y) + EPSILON).contains(&y) {
                        let t = ((y - a.y) / (b.y - a.y)).clamp(0.0, 1.0);
                        let x = a.x + t * (b.x - a.x);
                        lo = lo.min(x);
                        hi = hi.max(x);
                    }
                }
                if lo <= hi {
                    out.push((lo, hi));
                }
            }
            Shape::Polygon(points) => {
                let mut crossings: Vec<(f64, i32)> = Vec::new();
                for (a, b) in edges(points) {
                    if a.y <= y && y < b.y {
                        crossings.push((a.x + (y - a.y) / (b.y - a.y) * (b.x - a.x), 1));
                    } else if b.y <= y && y < a.y {
                        crossings.push((a.x + (y - a.y) / (b.y - a.y) * (b.x - a.x), -1));
                    }
                }
                crossings.sort_by(|a, b| a.0.total_cmp(&b.0));
                let mut winding = 0;
                let mut start = 0.0;
                for (x, dir) in crossings {
                    let before = winding;
                    winding += dir;
                    if before == 0 && winding != 0 {
                        start = x;
                    } else if before != 0 && winding == 0 {
                        out.push((start, x));
                    }
                }
            }
        }
    }

    /// Set (or clear) every pixel whose sample point lies in the shape.
    pub fn fill(&self, bitmap: &mut Bitmap, value: bool) {
        let Some((y_min, y_max)) = self.y_range() else {
            return;
        };
        let first = ((y_min - EPSILON).ceil() as i64).max(0);
        let last = ((y_max + EPSILON).floor() as i64).min(bitmap.height() as i64 - 1);
        let mut spans = Vec::new();
        for row in first..=last {
            spans.clear();
            self.spans(row as f64, &mut spans);
            for &(a, b) in &spans {
                let x0 = (a - EPSILON).ceil() as i64;
                let x1 = (b + EPSILON).floor() as i64;
                bitmap.fill_span(row, x0, x1, value);
            }
        }
    }
}

fn edges(points: &[kurbo::Point]) -> impl Iterator<Item = (kurbo::Point, kurbo::Point)> + '_ {
    let n = points.len();
    (0..n).map(move |i| (points[i], points[(i + 1) % n]))
}

/// Two disks joined by a quad: the set of points within `radius` of `a..b`.
fn capsule(a: kurbo::Point, b: kurbo::Point, radius: f64, out: &mut Vec<Shape>) {
    if radius < 0.0 {
        return;
    }
    out.push(Shape::Disk { center: a, radius });
    if a == b {
        return;
    }
    out.push(Shape::Disk { center: b, radius });
    let direction = b - a;
    let normal = Vec2::new(-direction.y, direction.x) * (radius / direction.hypot());
    out.push(Shape::Convex(vec![a + normal, b + normal, b - normal, a - normal]));
}

fn polyline_capsules(points: &[kurbo::Point], radius: f64, out: &mut Vec<Shape>) {
    for pair in points.windows(2) {
        capsule(pair[0], pair[1], radius, out);
    }
}

fn ring_capsules(points: &[kurbo::Point], radius: f64, out: &mut Vec<Shape>) {
    for (a, b) in edges(points) {
        capsule(a, b, radius, out);
    }
}

fn translated(points: &[kurbo::Point], offset: Vec2) -> Vec<kurbo::Point> {
    points.iter().map(|p| *p + offset).collect()
}

/// Andrew's monotone chain; returns the hull counterclockwise.
fn convex_hull(mut points: Vec<kurbo::Point>) -> Vec<kurbo::Point> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }
    let cross = |o: kurbo::Point, a: kurbo::Point, b: kurbo::Point| (a - o).cross(b - o);
    let mut lower: Vec<kurbo::Point> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<kurbo::Point> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Footprint of an aperture flashed at `at`, grown by `grow` (negative
/// values only shrink round parts).
fn flash_shapes(aperture: &Aperture, at: kurbo::Point, grow: f64, out: &mut Vec<Shape>) {
    let offset = at.to_vec2();
    match aperture {
        Aperture::Circular { diameter } => {
            let radius = *diameter as f64 / 2.0 + grow;
            if radius >= 0.0 {
                out.push(Shape::Disk { center: at, radius });
            }
        }
        Aperture::Rectangular { width, height } => {
            let (hw, hh) = (*width as f64 / 2.0, *height as f64 / 2.0);
            let rect = |ex: f64, ey: f64| {
                Shape::Convex(vec![
                    at + Vec2::new(-hw - ex, -hh - ey),
                    at + Vec2::new(hw + ex, -hh - ey),
                    at + Vec2::new(hw + ex, hh + ey),
                    at + Vec2::new(-hw - ex, hh + ey),
                ])
            };
            if grow > 0.0 {
                out.push(rect(grow, 0.0));
                out.push(rect(0.0, grow));
                for (dx, dy) in [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)] {
                    out.push(Shape::Disk {
                        center: at + Vec2::new(dx, dy),
                        radius: grow,
                    });
                }
            } else {
                out.push(rect(0.0, 0.0));
            }
        }
        Aperture::Oval { width, height } => {
            let (w, h) = (*width as f64, *height as f64);
            let radius = w.min(h) / 2.0;
            let reach = (w.max(h) - w.min(h)) / 2.0;
            let axis = if w >= h {
                Vec2::new(reach, 0.0)
            } else {
                Vec2::new(0.0, reach)
            };
            capsule(at - axis, at + axis, radius + grow, out);
        }
        Aperture::Octagonal { diameter } => {
            let outline = translated(&octagon_vertices(*diameter), offset);
            if grow > 0.0 {
                ring_capsules(&outline, grow, out);
            }
            out.push(Shape::Convex(outline));
        }
        Aperture::Macro(definition) => {
            for primitive in &definition.primitives {
                match primitive {
                    MacroPrimitive::Circle { diameter, center } => {
                        let radius = *diameter as f64 / 2.0 + grow;
                        if radius >= 0.0 {
                            out.push(Shape::Disk {
                                center: at + primitive.translate(*center).to_kurbo().to_vec2(),
                                radius,
                            });
                        }
                    }
                    MacroPrimitive::Outline { .. } => {
                        let outline = translated(&primitive.polygon().unwrap_or_default(), offset);
                        if grow > 0.0 {
                            ring_capsules(&outline, grow, out);
                        }
                        out.push(Shape::Polygon(outline));
                    }
                    _ => {
                        let outline = translated(&primitive.polygon().unwrap_or_default(), offset);
                        if outline.is_empty() {
                            continue;
                        }
                        if grow > 0.0 {
                            ring_capsules(&outline, grow, out);
                        }
                        out.push(Shape::Convex(outline));
                    }
                }
            }
        }
    }
}

/// Footprint of a stroke along `points` drawn with `aperture`.
fn stroke_shapes(aperture: &Aperture, points: &[kurbo::Point], grow: f64, out: &mut Vec<Shape>) {
    match aperture {
        Aperture::Rectangular { width, height } if points.len() == 2 => {
            // A rectangle swept along a straight segment.
            let (hw, hh) = (*width as f64 / 2.0, *height as f64 / 2.0);
            let corners = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)];
            let hull = convex_hull(
                points
                    .iter()
                    .flat_map(|p| corners.iter().map(move |(dx, dy)| *p + Vec2::new(*dx, *dy)))
                    .collect(),
            );
            if grow > 0.0 {
                ring_capsules(&hull, grow, out);
            }
            out.push(Shape::Convex(hull));
        }
        _ => polyline_capsules(points, aperture.stroke_width() as f64 / 2.0 + grow, out),
    }
}

/// Decompose a primitive into fillable shapes in board coordinates.
pub fn footprint(primitive: &Primitive, apertures: &ApertureTable, grow: f64) -> Vec<Shape> {
    let mut shapes = Vec::new();
    match primitive {
        Primitive::Flash {
            point, aperture, ..
        } => flash_shapes(apertures.get(*aperture), point.to_kurbo(), grow, &mut shapes),
        Primitive::Linear {
            from, to, aperture, ..
        } => stroke_shapes(
            apertures.get(*aperture),
            &[from.to_kurbo(), to.to_kurbo()],
            grow,
            &mut shapes,
        ),
        Primitive::Circular { arc, aperture, .. } => stroke_shapes(
            apertures.get(*aperture),
            &arc.flatten(FLATTEN_TOLERANCE),
            grow,
            &mut shapes,
        ),
        Primitive::Region { segments, .. } => {
            let mut outline = region_outline(segments);
            if outline.len() > 1 && outline.first() == outline.last() {
                outline.pop();
            }
            if grow >= 0.0 {
                ring_capsules(&outline, grow, &mut shapes);
            }
            shapes.push(Shape::Polygon(outline));
        }
    }
    shapes
}

/// Flattened boundary of a region in board coordinates.
fn region_outline(segments: &[Curve]) -> Vec<kurbo::Point> {
    let mut outline: Vec<kurbo::Point> = Vec::new();
    for segment in segments {
        for p in segment.flatten(FLATTEN_TOLERANCE) {
            if outline.last() != Some(&p) {
                outline.push(p);
            }
        }
    }
    outline
}
