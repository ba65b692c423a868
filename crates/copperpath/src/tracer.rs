//! Conversion of boundary loops into line and arc toolpaths.
//!
//! Points lying on a known circle (pad outline, rounded trace end, ...) become
//! a single arc on that exact circle. Everything else is fitted with straight
//! lines using a cone (sleeve) test: a line from the anchor is extended while
//! every visited point stays within the tolerance of it.

use crate::edge_detector::Contour;
use crate::geometry::curve::normalize_angle;
use crate::geometry::{Arc, Circle, Point};
use crate::raster::PixelFrame;
use crate::types::Toolpath;
use std::collections::HashMap;

/// Half-open rectangle of window pixels owned by one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedArea {
    pub min: Point,
    pub max: Point,
}

impl OwnedArea {
    /// Whether the step between two neighbouring pixels belongs to this area,
    /// judged by its midpoint.
    fn owns_step(&self, a: Point, b: Point) -> bool {
        let (mx, my) = (a.x + b.x, a.y + b.y);
        mx >= 2 * self.min.x && mx < 2 * self.max.x && my >= 2 * self.min.y && my < 2 * self.max.y
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TracerOptions {
    /// Maximum deviation of a fitted line from the boundary, in pixels.
    pub line_tolerance: f64,
    /// Maximum distance of a boundary pixel from a known circle, in pixels.
    pub arc_tolerance: f64,
    /// Fewest boundary pixels that make an arc.
    pub min_arc_points: usize,
    /// Lines shorter than this (internal units) are dropped.
    pub min_line_length: i32,
    /// Keep only toolpaths with both endpoints closer than the given distance
    /// to the given point.
    pub max_distance_from: Option<(Point, f64)>,
}

impl Default for TracerOptions {
    fn default() -> Self {
        Self {
            line_tolerance: 1.0,
            arc_tolerance: 1.5,
            min_arc_points: 8,
            min_line_length: 0,
            max_distance_from: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tracer<'a> {
    known_circles: &'a [Circle],
    tool_diameter: i32,
    options: TracerOptions,
}

impl<'a> Tracer<'a> {
    pub fn new(known_circles: &'a [Circle], tool_diameter: i32) -> Self {
        Self {
            known_circles,
            tool_diameter,
            options: TracerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TracerOptions) -> Self {
        self.options = options;
        self
    }

    /// Trace contours of a window into board-space toolpaths. With an owned
    /// area only the boundary steps inside it are traced.
    pub fn trace(&self, contours: &[Contour], frame: &PixelFrame, owned: Option<OwnedArea>) -> Vec<Toolpath> {
        let index = CircleIndex::build(self.known_circles, frame, self.options.arc_tolerance);
        let mut pieces: Vec<Piece> = Vec::new();
        for contour in contours {
            for (run, closed) in owned_runs(contour, owned) {
                if closed {
                    self.trace_closed(&run, &index, &mut pieces);
                } else {
                    self.trace_open(&run, &index, &mut pieces);
                }
            }
        }

        let mut toolpaths = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let toolpath = match piece {
                Piece::Line(from, to) => {
                    let toolpath = Toolpath::linear(frame.to_board(from), frame.to_board(to), self.tool_diameter);
                    if toolpath.length() < self.options.min_line_length as f64 {
                        continue;
                    }
                    toolpath
                }
                Piece::Arc {
                    from,
                    to,
                    circle,
                    clockwise,
                } => {
                    let center = self.known_circles[circle].center;
                    Toolpath::circular(
                        Arc::new(frame.to_board(from), frame.to_board(to), center, clockwise),
                        self.tool_diameter,
                    )
                }
            };
            if let Some((center, limit)) = self.options.max_distance_from {
                if toolpath.from().distance_to(center) >= limit || toolpath.to().distance_to(center) >= limit {
                    continue;
                }
            }
            toolpaths.push(toolpath);
        }
        toolpaths
    }

    fn trace_closed(&self, points: &[Point], index: &CircleIndex, out: &mut Vec<Piece>) {
        if points.len() < 2 {
            return;
        }
        // A loop that lies entirely on one circle is split into two halves.
        if points.len() >= self.options.min_arc_points {
            if let Some(circle) = index
                .candidates(points[0])
                .find(|c| points.iter().all(|p| index.is_near(*c, *p)))
            {
                let half = points.len() / 2;
                let clockwise = index.winding(circle, points.iter().chain(points.first())) < 0.0;
                out.push(Piece::Arc {
                    from: points[0],
                    to: points[half],
                    circle,
                    clockwise,
                });
                out.push(Piece::Arc {
                    from: points[half],
                    to: points[0],
                    circle,
                    clockwise,
                });
                return;
            }
        }
        // Start the walk somewhere off every circle, so no arc is cut in two.
        let start = (0..points.len())
            .find(|i| index.candidates(points[*i]).next().is_none())
            .unwrap_or(0);
        let mut open: Vec<Point> = points[start..].iter().chain(&points[..start]).copied().collect();
        open.push(points[start]);
        self.trace_open(&open, index, out);
    }

    fn trace_open(&self, points: &[Point], index: &CircleIndex, out: &mut Vec<Piece>) {
        if points.len() < 2 {
            return;
        }
        let mut line_start = 0;
        let mut i = 0;
        while i < points.len() {
            let best = index
                .candidates(points[i])
                .map(|circle| {
                    let mut end = i;
                    while end + 1 < points.len() && index.is_near(circle, points[end + 1]) {
                        end += 1;
                    }
                    (end, circle)
                })
                .max_by_key(|(end, circle)| (*end, std::cmp::Reverse(*circle)));
            match best {
                Some((end, circle))
                    if end + 1 - i >= self.options.min_arc_points && points[i] != points[end] =>
                {
                    fit_lines(&points[line_start..=i], self.options.line_tolerance, out);
                    let clockwise = index.winding(circle, points[i..=end].iter()) < 0.0;
                    out.push(Piece::Arc {
                        from: points[i],
                        to: points[end],
                        circle,
                        clockwise,
                    });
                    line_start = end;
                    i = end + 1;
                }
                _ => i += 1,
            }
        }
        fit_lines(&points[line_start..], self.options.line_tolerance, out);
    }
}

/// Window-pixel geometry produced by tracing, before mapping to the board.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Piece {
    Line(Point, Point),
    Arc {
        from: Point,
        to: Point,
        circle: usize,
        clockwise: bool,
    },
}

/// Split a contour into the runs whose steps lie in the owned area. A fully
/// owned contour comes back whole, flagged closed.
fn owned_runs(contour: &Contour, owned: Option<OwnedArea>) -> Vec<(Vec<Point>, bool)> {
    let n = contour.len();
    let Some(area) = owned else {
        return vec![(contour.clone(), true)];
    };
    if n < 2 {
        return if n == 1 && area.owns_step(contour[0], contour[0]) {
            vec![(contour.clone(), true)]
        } else {
            Vec::new()
        };
    }
    let owned_steps: Vec<bool> = (0..n)
        .map(|i| area.owns_step(contour[i], contour[(i + 1) % n]))
        .collect();
    if owned_steps.iter().all(|o| *o) {
        return vec![(contour.clone(), true)];
    }
    let Some(first) = (0..n).find(|i| owned_steps[*i] && !owned_steps[(i + n - 1) % n]) else {
        return Vec::new();
    };
    let mut runs = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    for k in 0..n {
        let i = (first + k) % n;
        if owned_steps[i] {
            if current.is_empty() {
                current.push(contour[i]);
            }
            current.push(contour[(i + 1) % n]);
        } else if !current.is_empty() {
            runs.push((std::mem::take(&mut current), false));
        }
    }
    if !current.is_empty() {
        runs.push((current, false));
    }
    runs
}

/// Greedy straight-line fitting over an open polyline. Each line runs from
/// the anchor to the farthest point reachable before the cone of admissible
/// directions empties or the walk turns back towards the anchor.
fn fit_lines(points: &[Point], tolerance: f64, out: &mut Vec<Piece>) {
    let mut anchor_index = 0;
    while anchor_index + 1 < points.len() {
        let anchor = points[anchor_index];
        let reference = direction(anchor, points[anchor_index + 1]);
        let mut cone: Option<(f64, f64)> = None;
        let mut farthest = 0.0;
        let mut end = anchor_index + 1;
        for (k, point) in points.iter().enumerate().skip(anchor_index + 1) {
            let distance = anchor.distance_to(*point);
            if distance < farthest {
                break;
            }
            let theta = normalize_angle(direction(anchor, *point) - reference);
            if let Some((lo, hi)) = cone {
                if theta < lo || theta > hi {
                    break;
                }
            }
            if distance > tolerance {
                let half = (tolerance / distance).asin();
                let (lo, hi) = cone.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
                cone = Some((lo.max(theta - half), hi.min(theta + half)));
            }
            farthest = distance;
            end = k;
        }
        out.push(Piece::Line(anchor, points[end]));
        anchor_index = end;
    }
}

fn direction(from: Point, to: Point) -> f64 {
    ((to.y - from.y) as f64).atan2((to.x - from.x) as f64)
}

/// Grid bucket index of the known circles that cross a window.
struct CircleIndex {
    cell: f64,
    tolerance: f64,
    /// Centre and radius in window pixels, indexed like the known circles.
    circles: Vec<(kurbo::Point, f64)>,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl CircleIndex {
    const CELL: f64 = 32.0;

    fn build(known: &[Circle], frame: &PixelFrame, tolerance: f64) -> Self {
        let mut index = CircleIndex {
            cell: Self::CELL,
            tolerance,
            circles: Vec::with_capacity(known.len()),
            buckets: HashMap::new(),
        };
        let (w, h) = (frame.width as f64, frame.height as f64);
        for (i, circle) in known.iter().enumerate() {
            let center = frame.to_pixel(circle.center.to_kurbo());
            let radius = circle.radius as f64 * frame.scale;
            index.circles.push((center, radius));
            let reach = radius + tolerance + 1.0;
            let x0 = (center.x - reach).max(-1.0);
            let x1 = (center.x + reach).min(w + 1.0);
            let y0 = (center.y - reach).max(-1.0);
            let y1 = (center.y + reach).min(h + 1.0);
            if x0 > x1 || y0 > y1 {
                continue;
            }
            for cy in index.cell_of(y0)..=index.cell_of(y1) {
                for cx in index.cell_of(x0)..=index.cell_of(x1) {
                    index.buckets.entry((cx, cy)).or_default().push(i);
                }
            }
        }
        index
    }

    fn cell_of(&self, value: f64) -> i64 {
        (value / self.cell).floor() as i64
    }

    fn is_near(&self, circle: usize, point: Point) -> bool {
        let (center, radius) = self.circles[circle];
        ((point.to_kurbo() - center).hypot() - radius).abs() <= self.tolerance
    }

    /// Circles that pass within tolerance of `point`, in known-circle order.
    fn candidates(&self, point: Point) -> impl Iterator<Item = usize> + '_ {
        let key = (self.cell_of(point.x as f64), self.cell_of(point.y as f64));
        self.buckets
            .get(&key)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |c| self.is_near(*c, point))
    }

    /// Twice the signed area swept around the circle centre; positive when
    /// the points run counterclockwise.
    fn winding<'p>(&self, circle: usize, points: impl Iterator<Item = &'p Point>) -> f64 {
        let center = self.circles[circle].0;
        let mut previous: Option<kurbo::Vec2> = None;
        let mut sum = 0.0;
        for point in points {
            let v = point.to_kurbo() - center;
            if let Some(p) = previous {
                sum += p.cross(v);
            }
            previous = Some(v);
        }
        sum
    }
}
