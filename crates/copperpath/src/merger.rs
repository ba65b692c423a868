//! Clean-up of traced segments: tiles overlap, and adjacent tiles trace the
//! same boundary in pieces. The merger snaps nearby endpoints together,
//! removes duplicates and joins pieces that continue each other.

use crate::geometry::{Arc, Bounds, Curve, Point};
use crate::types::Toolpath;
use std::collections::HashMap;
use std::f64::consts::TAU;
use tracing::debug;

/// Grid cell used to find overlapping lines, in units.
const OVERLAP_CELL: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolpathMerger {
    tolerance: i32,
}

impl ToolpathMerger {
    pub fn new(tolerance: i32) -> Self {
        Self {
            tolerance: tolerance.max(0),
        }
    }

    pub fn tolerance(&self) -> i32 {
        self.tolerance
    }

    /// Merge `toolpaths`; survivors keep their input order.
    pub fn merge(&self, toolpaths: Vec<Toolpath>) -> Vec<Toolpath> {
        let input = toolpaths.len();
        let mut slots: Vec<Option<Toolpath>> = toolpaths.into_iter().map(Some).collect();
        drop_degenerate(&mut slots);
        self.snap_endpoints(&mut slots);
        drop_degenerate(&mut slots);
        self.remove_duplicates(&mut slots);
        self.collapse_overlaps(&mut slots);
        self.join_continuations(&mut slots);
        let merged: Vec<Toolpath> = slots.into_iter().flatten().collect();
        debug!(input, output = merged.len(), "merged toolpaths");
        merged
    }

    fn snap_endpoints(&self, slots: &mut [Option<Toolpath>]) {
        let mut nodes = NodeIndex::new(self.tolerance);
        for slot in slots.iter_mut() {
            if let Some(toolpath) = slot {
                let from = nodes.snap(toolpath.from());
                let to = nodes.snap(toolpath.to());
                *toolpath = toolpath.with_endpoints(from, to);
            }
        }
    }

    fn remove_duplicates(&self, slots: &mut [Option<Toolpath>]) {
        let mut seen: HashMap<(bool, Point, Point), Vec<Point>> = HashMap::new();
        for slot in slots.iter_mut() {
            let Some(toolpath) = slot else { continue };
            let (key, center) = match toolpath.curve {
                Curve::Line { from, to } => ((false, from.min(to), from.max(to)), Point::default()),
                Curve::Arc(arc) => {
                    let arc = if arc.clockwise { arc.reversed() } else { arc };
                    ((true, arc.from, arc.to), arc.center)
                }
            };
            let centers = seen.entry(key).or_default();
            if centers
                .iter()
                .any(|c| c.distance_to(center) <= self.tolerance as f64)
            {
                *slot = None;
            } else {
                centers.push(center);
            }
        }
    }

    fn collapse_overlaps(&self, slots: &mut [Option<Toolpath>]) {
        let mut grid: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (i, slot) in slots.iter().enumerate() {
            if let Some(toolpath) = slot.filter(|t| !t.curve.is_arc()) {
                for cell in cells(toolpath.curve.bounds().inflate(self.tolerance)) {
                    grid.entry(cell).or_default().push(i);
                }
            }
        }
        for i in 0..slots.len() {
            let Some(mut current) = slots[i].filter(|t| !t.curve.is_arc()) else {
                continue;
            };
            loop {
                let mut candidates: Vec<usize> = cells(current.curve.bounds().inflate(self.tolerance))
                    .filter_map(|cell| grid.get(&cell))
                    .flatten()
                    .copied()
                    .filter(|&j| j != i)
                    .collect();
                candidates.sort_unstable();
                candidates.dedup();
                let union = candidates.into_iter().find_map(|j| {
                    let other = slots[j].filter(|t| !t.curve.is_arc())?;
                    self.line_union(&current, &other).map(|union| (j, union))
                });
                let Some((j, union)) = union else { break };
                slots[j] = None;
                current = union;
                for cell in cells(current.curve.bounds().inflate(self.tolerance)) {
                    grid.entry(cell).or_default().push(i);
                }
            }
            slots[i] = Some(current);
        }
    }

    /// Union of two collinear lines whose extents overlap, oriented like `a`.
    fn line_union(&self, a: &Toolpath, b: &Toolpath) -> Option<Toolpath> {
        let (from, to) = (a.from(), a.to());
        let length = from.distance_to(to);
        if length == 0.0 {
            return None;
        }
        let tol = self.tolerance as f64;
        if distance_to_line(b.from(), from, to) > tol || distance_to_line(b.to(), from, to) > tol {
            return None;
        }
        let along = |p: Point| projection(p, from, to);
        let (t0, t1) = (along(b.from()), along(b.to()));
        if t0.min(t1) >= length || t0.max(t1) <= 0.0 {
            return None;
        }
        let mut start = (0.0, from);
        let mut end = (length, to);
        for (t, p) in [(t0, b.from()), (t1, b.to())] {
            if t < start.0 {
                start = (t, p);
            }
            if t > end.0 {
                end = (t, p);
            }
        }
        Some(a.with_endpoints(start.1, end.1))
    }

    fn join_continuations(&self, slots: &mut [Option<Toolpath>]) {
        let mut incident: HashMap<Point, Vec<usize>> = HashMap::new();
        let mut order: Vec<Point> = Vec::new();
        for (i, slot) in slots.iter().enumerate() {
            if let Some(toolpath) = slot {
                for p in [toolpath.from(), toolpath.to()] {
                    let list = incident.entry(p).or_default();
                    if list.is_empty() {
                        order.push(p);
                    }
                    list.push(i);
                }
            }
        }
        for node in order {
            let Some(list) = incident.get(&node) else { continue };
            let &[a, b] = list.as_slice() else { continue };
            if a == b {
                continue;
            }
            let (Some(first), Some(second)) = (slots[a], slots[b]) else {
                continue;
            };
            let Some(joined) = self.join(&first, &second, node) else {
                continue;
            };
            slots[a] = Some(joined);
            slots[b] = None;
            incident.remove(&node);
            let far = if second.from() == node { second.to() } else { second.from() };
            if let Some(list) = incident.get_mut(&far) {
                for entry in list.iter_mut().filter(|e| **e == b) {
                    *entry = a;
                }
            }
        }
    }

    /// `a` and `b` continued through `node`, oriented like `a`.
    fn join(&self, a: &Toolpath, b: &Toolpath, node: Point) -> Option<Toolpath> {
        if a.tool_diameter != b.tool_diameter {
            return None;
        }
        let a_reversed = a.to() != node;
        let first = if a_reversed { a.reversed() } else { *a };
        let second = if b.from() == node { *b } else { b.reversed() };
        let joined = match (first.curve, second.curve) {
            (Curve::Line { from, .. }, Curve::Line { to, .. }) => {
                let straight = distance_to_line(node, from, to) <= self.tolerance as f64;
                let forward = dot(node - from, to - node) > 0.0;
                if !(straight && forward && from != to) {
                    return None;
                }
                Toolpath::new(Curve::line(from, to), a.tool_diameter)
            }
            (Curve::Arc(x), Curve::Arc(y)) => {
                let tol = self.tolerance as f64;
                if x.clockwise != y.clockwise
                    || x.center.distance_to(y.center) > tol
                    || (x.radius() - y.radius()).abs() > tol
                    || x.angle() + y.angle() >= TAU - 1e-9
                {
                    return None;
                }
                Toolpath::circular(Arc::new(x.from, y.to, x.center, x.clockwise), a.tool_diameter)
            }
            _ => return None,
        };
        Some(if a_reversed { joined.reversed() } else { joined })
    }
}

fn drop_degenerate(slots: &mut [Option<Toolpath>]) {
    for slot in slots.iter_mut() {
        if matches!(slot, Some(t) if !t.curve.is_arc() && t.from() == t.to()) {
            *slot = None;
        }
    }
}

/// Snaps points to the first registered point within tolerance.
struct NodeIndex {
    tolerance: i32,
    cell: i32,
    cells: HashMap<(i32, i32), Vec<Point>>,
}

impl NodeIndex {
    fn new(tolerance: i32) -> Self {
        Self {
            tolerance,
            cell: tolerance.max(1),
            cells: HashMap::new(),
        }
    }

    fn cell_of(&self, p: Point) -> (i32, i32) {
        (p.x.div_euclid(self.cell), p.y.div_euclid(self.cell))
    }

    fn snap(&mut self, p: Point) -> Point {
        let (cx, cy) = self.cell_of(p);
        let mut best: Option<(f64, Point)> = None;
        for gx in cx - 1..=cx + 1 {
            for gy in cy - 1..=cy + 1 {
                for &node in self.cells.get(&(gx, gy)).into_iter().flatten() {
                    let d = node.distance_to(p);
                    if d <= self.tolerance as f64 && best.map_or(true, |(bd, _)| d < bd) {
                        best = Some((d, node));
                    }
                }
            }
        }
        match best {
            Some((_, node)) => node,
            None => {
                self.cells.entry((cx, cy)).or_default().push(p);
                p
            }
        }
    }
}

fn cells(bounds: Bounds) -> impl Iterator<Item = (i32, i32)> {
    let (x0, x1) = (bounds.min.x.div_euclid(OVERLAP_CELL), bounds.max.x.div_euclid(OVERLAP_CELL));
    let (y0, y1) = (bounds.min.y.div_euclid(OVERLAP_CELL), bounds.max.y.div_euclid(OVERLAP_CELL));
    (x0..=x1).flat_map(move |x| (y0..=y1).map(move |y| (x, y)))
}

fn dot(a: Point, b: Point) -> f64 {
    a.x as f64 * b.x as f64 + a.y as f64 * b.y as f64
}

/// Signed position of `p` along `from -> to`, in units.
fn projection(p: Point, from: Point, to: Point) -> f64 {
    dot(p - from, to - from) / from.distance_to(to)
}

fn distance_to_line(p: Point, from: Point, to: Point) -> f64 {
    let length = from.distance_to(to);
    if length == 0.0 {
        return p.distance_to(from);
    }
    let d = to - from;
    let v = p - from;
    (d.x as f64 * v.y as f64 - d.y as f64 * v.x as f64).abs() / length
}
