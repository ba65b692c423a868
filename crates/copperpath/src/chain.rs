//! Grouping of merged segments into continuous chains.

use crate::geometry::Point;
use crate::types::{Chain, Toolpath};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainDetector {
    tolerance: i32,
}

impl ChainDetector {
    pub fn new(tolerance: i32) -> Self {
        Self {
            tolerance: tolerance.max(0),
        }
    }

    /// Link `toolpaths` into chains. Each chain starts at the first unused
    /// segment, grows forward from its end and then backward from its start,
    /// always taking the first unused segment that touches the open end.
    pub fn detect(&self, toolpaths: Vec<Toolpath>) -> Vec<Chain> {
        let index = EndpointIndex::new(&toolpaths, self.tolerance);
        let mut used = vec![false; toolpaths.len()];
        let mut chains = Vec::new();

        for seed in 0..toolpaths.len() {
            if used[seed] {
                continue;
            }
            used[seed] = true;
            let mut segments = VecDeque::from([toolpaths[seed]]);

            while let Some(end) = segments.back().map(Toolpath::to) {
                let Some((next, reverse)) = index.first_unused(end, &used) else { break };
                used[next] = true;
                let segment = if reverse { toolpaths[next].reversed() } else { toolpaths[next] };
                segments.push_back(segment.with_endpoints(end, segment.to()));
            }
            while let Some(start) = segments.front().map(Toolpath::from) {
                let Some((previous, reverse)) = index.first_unused(start, &used) else { break };
                used[previous] = true;
                // A segment leaving `start` is travelled backwards to arrive there.
                let segment = if reverse { toolpaths[previous] } else { toolpaths[previous].reversed() };
                segments.push_front(segment.with_endpoints(segment.from(), start));
            }
            chains.extend(Chain::new(segments.into()));
        }
        debug!(segments = toolpaths.len(), chains = chains.len(), "detected chains");
        chains
    }
}

/// Segment endpoints bucketed on a grid of the matching tolerance.
struct EndpointIndex {
    tolerance: i32,
    cell: i32,
    /// Cell to `(segment, endpoint is the segment's end, endpoint)`.
    cells: HashMap<(i32, i32), Vec<(usize, bool, Point)>>,
}

impl EndpointIndex {
    fn new(toolpaths: &[Toolpath], tolerance: i32) -> Self {
        let mut index = Self {
            tolerance,
            cell: tolerance.max(1),
            cells: HashMap::new(),
        };
        for (i, toolpath) in toolpaths.iter().enumerate() {
            for (is_end, p) in [(false, toolpath.from()), (true, toolpath.to())] {
                let cell = index.cell_of(p);
                index.cells.entry(cell).or_default().push((i, is_end, p));
            }
        }
        index
    }

    fn cell_of(&self, p: Point) -> (i32, i32) {
        (p.x.div_euclid(self.cell), p.y.div_euclid(self.cell))
    }

    /// Lowest-numbered unused segment with an endpoint at `p`, and whether it
    /// touches `p` with its end rather than its start. Starts win ties.
    fn first_unused(&self, p: Point, used: &[bool]) -> Option<(usize, bool)> {
        let (cx, cy) = self.cell_of(p);
        let mut best: Option<(usize, bool)> = None;
        for gx in cx - 1..=cx + 1 {
            for gy in cy - 1..=cy + 1 {
                for &(i, is_end, q) in self.cells.get(&(gx, gy)).into_iter().flatten() {
                    if used[i] || q.distance_to(p) > self.tolerance as f64 {
                        continue;
                    }
                    if best.map_or(true, |b| (i, is_end) < b) {
                        best = Some((i, is_end));
                    }
                }
            }
        }
        best
    }
}
