//! Boundary extraction from a rendered window.
//!
//! The detector builds the crack graph between filled and empty pixels, with
//! every crack directed so the filled pixel is on its left, and walks it with
//! right-turn priority. Diagonally touching pixels therefore end up on one
//! loop. Each loop is reported as the sequence of filled pixels it borders.

use crate::error::GenerationError;
use crate::geometry::Point;
use crate::raster::Bitmap;

/// A closed boundary: filled pixels in walk order, last joins back to first.
pub type Contour = Vec<Point>;

const EAST: u8 = 1;
const NORTH: u8 = 2;
const WEST: u8 = 4;
const SOUTH: u8 = 8;

fn step(direction: u8) -> (i64, i64) {
    match direction {
        EAST => (1, 0),
        NORTH => (0, 1),
        WEST => (-1, 0),
        _ => (0, -1),
    }
}

fn turn_right(direction: u8) -> u8 {
    match direction {
        EAST => SOUTH,
        NORTH => EAST,
        WEST => NORTH,
        _ => WEST,
    }
}

fn turn_left(direction: u8) -> u8 {
    match direction {
        EAST => NORTH,
        NORTH => WEST,
        WEST => SOUTH,
        _ => EAST,
    }
}

/// Pixel on the left of a crack leaving vertex `(vx, vy)`.
fn left_pixel(vx: i64, vy: i64, direction: u8) -> Point {
    let (px, py) = match direction {
        EAST => (vx, vy),
        NORTH => (vx - 1, vy),
        WEST => (vx - 1, vy - 1),
        _ => (vx, vy - 1),
    };
    Point::new(px as i32, py as i32)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeDetector;

impl EdgeDetector {
    /// All boundary loops of `bitmap`, outer boundaries and holes alike, or
    /// `None` when nothing is filled.
    pub fn detect(bitmap: &Bitmap) -> Result<Option<Vec<Contour>>, GenerationError> {
        let (w, h) = (bitmap.width() as i64, bitmap.height() as i64);
        let stride = w + 1;
        let vertices = (stride * (h + 1)) as usize;
        let mut flags: Vec<u8> = Vec::new();
        flags
            .try_reserve_exact(vertices)
            .map_err(|_| GenerationError::ResourceExhausted {
                what: "edge map",
                bytes: vertices,
            })?;
        flags.resize(vertices, 0);

        let index = |vx: i64, vy: i64| (vy * stride + vx) as usize;
        let mut any = false;
        for py in 0..h {
            for px in 0..w {
                if !bitmap.get(px, py) {
                    continue;
                }
                any = true;
                if !bitmap.get(px, py - 1) {
                    flags[index(px, py)] |= EAST;
                }
                if !bitmap.get(px + 1, py) {
                    flags[index(px + 1, py)] |= NORTH;
                }
                if !bitmap.get(px, py + 1) {
                    flags[index(px + 1, py + 1)] |= WEST;
                }
                if !bitmap.get(px - 1, py) {
                    flags[index(px, py + 1)] |= SOUTH;
                }
            }
        }
        if !any {
            return Ok(None);
        }

        let mut contours = Vec::new();
        for vy in 0..=h {
            for vx in 0..=w {
                while flags[index(vx, vy)] != 0 {
                    contours.push(walk(&mut flags, stride, vx, vy));
                }
            }
        }
        Ok(Some(contours))
    }
}

fn walk(flags: &mut [u8], stride: i64, start_x: i64, start_y: i64) -> Contour {
    let index = |vx: i64, vy: i64| (vy * stride + vx) as usize;
    let (mut vx, mut vy) = (start_x, start_y);
    let bits = flags[index(vx, vy)];
    let mut direction = bits & bits.wrapping_neg();
    let mut contour: Contour = Vec::new();
    loop {
        flags[index(vx, vy)] &= !direction;
        let pixel = left_pixel(vx, vy, direction);
        if contour.last() != Some(&pixel) {
            contour.push(pixel);
        }
        let (dx, dy) = step(direction);
        vx += dx;
        vy += dy;
        let available = flags[index(vx, vy)];
        match [turn_right(direction), direction, turn_left(direction)]
            .into_iter()
            .find(|d| available & d != 0)
        {
            Some(next) => direction = next,
            None => break,
        }
    }
    if contour.len() > 1 && contour.first() == contour.last() {
        contour.pop();
    }
    contour
}
