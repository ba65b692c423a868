use serde::{Deserialize, Serialize};
use std::ops::{Add, Neg, Sub};

pub mod curve;

pub use curve::{Arc, Curve};

/// Internal units per millimetre. Every coordinate after parsing is an integer
/// number of these units (1 unit = 1 µm).
pub const RESOLUTION: i32 = 1000;

/// An integer point in internal units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(self, other: Point) -> f64 {
        let dx = other.x as f64 - self.x as f64;
        let dy = other.y as f64 - self.y as f64;
        dx.hypot(dy)
    }

    pub fn to_kurbo(self) -> kurbo::Point {
        kurbo::Point::new(self.x as f64, self.y as f64)
    }

    /// Round a floating point position to the nearest integer point.
    pub fn from_kurbo(point: kurbo::Point) -> Self {
        Self::new(point.x.round() as i32, point.y.round() as i32)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

/// Inclusive integer bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    pub fn from_point(point: Point) -> Self {
        Self::new(point, point)
    }

    /// Box of `width` x `height` units anchored at `origin`.
    pub fn from_origin(origin: Point, width: i32, height: i32) -> Self {
        Self::new(origin, Point::new(origin.x + width, origin.y + height))
    }

    pub fn include(&mut self, point: Point) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
    }

    pub fn union(self, other: Bounds) -> Bounds {
        let mut result = self;
        result.include(other.min);
        result.include(other.max);
        result
    }

    /// Grow (or shrink, for negative amounts) the box on every side.
    pub fn inflate(self, amount: i32) -> Bounds {
        Bounds::new(
            Point::new(self.min.x - amount, self.min.y - amount),
            Point::new(self.max.x + amount, self.max.y + amount),
        )
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    pub fn width(&self) -> i32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y
    }

    /// Bounds of a sequence of boxes, `None` when the sequence is empty.
    pub fn enclosing<I: IntoIterator<Item = Bounds>>(boxes: I) -> Option<Bounds> {
        boxes.into_iter().reduce(Bounds::union)
    }
}

/// A circle whose curvature the tracer may snap arcs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point,
    pub radius: i32,
}

impl Circle {
    pub fn new(center: Point, radius: i32) -> Self {
        Self { center, radius }
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_point(self.center).inflate(self.radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Point::new(0, 0);
        let b = Point::new(3000, 4000);
        assert_eq!(a.distance_to(b), 5000.0);
    }

    #[test]
    fn test_bounds_union_and_intersection() {
        let a = Bounds::new(Point::new(0, 0), Point::new(10, 10));
        let b = Bounds::new(Point::new(5, -5), Point::new(20, 5));
        let union = a.union(b);
        assert_eq!(union.min, Point::new(0, -5));
        assert_eq!(union.max, Point::new(20, 10));
        assert!(a.intersects(&b));

        let far = Bounds::from_point(Point::new(100, 100));
        assert!(!a.intersects(&far));
        assert!(a.inflate(90).intersects(&far));
    }

    #[test]
    fn test_enclosing_empty() {
        assert!(Bounds::enclosing(Vec::new()).is_none());
    }
}
