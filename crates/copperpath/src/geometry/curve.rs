use super::{Bounds, Point};
use kurbo::{PathEl, Shape as KurboShape, Vec2};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// A circular arc between two points around an integer center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arc {
    pub from: Point,
    pub to: Point,
    pub center: Point,
    pub clockwise: bool,
}

impl Arc {
    pub fn new(from: Point, to: Point, center: Point, clockwise: bool) -> Self {
        Self {
            from,
            to,
            center,
            clockwise,
        }
    }

    pub fn radius(&self) -> f64 {
        self.center.distance_to(self.from)
    }

    pub fn start_angle(&self) -> f64 {
        angle_of(self.center, self.from)
    }

    pub fn end_angle(&self) -> f64 {
        angle_of(self.center, self.to)
    }

    /// Swept angle in radians, measured in the direction of travel, in `(0, 2π]`.
    /// An arc whose endpoints coincide is a full circle.
    pub fn angle(&self) -> f64 {
        if self.from == self.to {
            return TAU;
        }
        let raw = if self.clockwise {
            self.start_angle() - self.end_angle()
        } else {
            self.end_angle() - self.start_angle()
        };
        let sweep = raw.rem_euclid(TAU);
        if sweep == 0.0 {
            TAU
        } else {
            sweep
        }
    }

    /// Signed sweep: positive counterclockwise.
    pub fn signed_angle(&self) -> f64 {
        if self.clockwise {
            -self.angle()
        } else {
            self.angle()
        }
    }

    pub fn length(&self) -> f64 {
        self.radius() * self.angle()
    }

    pub fn reversed(&self) -> Arc {
        Arc::new(self.to, self.from, self.center, !self.clockwise)
    }

    /// Whether the direction `theta` lies on the swept part of the circle.
    pub fn covers_angle(&self, theta: f64) -> bool {
        let offset = if self.clockwise {
            self.start_angle() - theta
        } else {
            theta - self.start_angle()
        };
        offset.rem_euclid(TAU) <= self.angle()
    }

    /// Exact bounds, including the axis extremes the arc sweeps through.
    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::from_point(self.from);
        bounds.include(self.to);
        let r = self.radius();
        let (cx, cy) = (self.center.x as f64, self.center.y as f64);
        for quadrant in 0..4 {
            let theta = quadrant as f64 * FRAC_PI_2;
            if !self.covers_angle(theta) {
                continue;
            }
            let x = round_outward(cx + r * theta.cos(), cx);
            let y = round_outward(cy + r * theta.sin(), cy);
            bounds.include(Point::new(x, y));
        }
        bounds
    }

    /// Polyline approximation within `tolerance` units; the first and last
    /// points are exactly the arc endpoints.
    pub fn flatten(&self, tolerance: f64) -> Vec<kurbo::Point> {
        let r = self.radius();
        let arc = kurbo::Arc {
            center: self.center.to_kurbo(),
            radii: Vec2::new(r, r),
            start_angle: self.start_angle(),
            sweep_angle: self.signed_angle(),
            x_rotation: 0.0,
        };
        let mut points = Vec::new();
        kurbo::flatten(arc.path_elements(tolerance), tolerance, |el| match el {
            PathEl::MoveTo(p) | PathEl::LineTo(p) => points.push(p),
            _ => {}
        });
        if points.len() < 2 {
            return vec![self.from.to_kurbo(), self.to.to_kurbo()];
        }
        let last = points.len() - 1;
        points[0] = self.from.to_kurbo();
        points[last] = self.to.to_kurbo();
        points
    }
}

// Away from the center, ignoring trigonometric noise around whole units.
fn round_outward(value: f64, center: f64) -> i32 {
    let nearest = value.round();
    if (value - nearest).abs() < 1e-6 {
        nearest as i32
    } else if value > center {
        value.ceil() as i32
    } else {
        value.floor() as i32
    }
}

fn angle_of(center: Point, point: Point) -> f64 {
    (point.y as f64 - center.y as f64).atan2(point.x as f64 - center.x as f64)
}

/// A single geometric element: a straight line or a circular arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Curve {
    Line { from: Point, to: Point },
    Arc(Arc),
}

impl Curve {
    pub fn line(from: Point, to: Point) -> Self {
        Curve::Line { from, to }
    }

    pub fn from(&self) -> Point {
        match self {
            Curve::Line { from, .. } => *from,
            Curve::Arc(arc) => arc.from,
        }
    }

    pub fn to(&self) -> Point {
        match self {
            Curve::Line { to, .. } => *to,
            Curve::Arc(arc) => arc.to,
        }
    }

    pub fn length(&self) -> f64 {
        match self {
            Curve::Line { from, to } => from.distance_to(*to),
            Curve::Arc(arc) => arc.length(),
        }
    }

    pub fn reversed(&self) -> Curve {
        match self {
            Curve::Line { from, to } => Curve::Line {
                from: *to,
                to: *from,
            },
            Curve::Arc(arc) => Curve::Arc(arc.reversed()),
        }
    }

    /// Replace the endpoints, keeping the kind, center and direction.
    pub fn with_endpoints(&self, from: Point, to: Point) -> Curve {
        match self {
            Curve::Line { .. } => Curve::Line { from, to },
            Curve::Arc(arc) => Curve::Arc(Arc::new(from, to, arc.center, arc.clockwise)),
        }
    }

    pub fn bounds(&self) -> Bounds {
        match self {
            Curve::Line { from, to } => {
                let mut bounds = Bounds::from_point(*from);
                bounds.include(*to);
                bounds
            }
            Curve::Arc(arc) => arc.bounds(),
        }
    }

    /// Polyline approximation; lines return their two endpoints.
    pub fn flatten(&self, tolerance: f64) -> Vec<kurbo::Point> {
        match self {
            Curve::Line { from, to } => vec![from.to_kurbo(), to.to_kurbo()],
            Curve::Arc(arc) => arc.flatten(tolerance),
        }
    }

    pub fn is_arc(&self) -> bool {
        matches!(self, Curve::Arc(_))
    }
}

/// Normalise an angle to `(-π, π]`.
pub(crate) fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a > PI {
        a - TAU
    } else {
        a
    }
}
