//! Machining time model used to rank chain orderings and to report the
//! expected run time.

use crate::geometry::{Curve, Point, RESOLUTION};
use crate::types::{Chain, Toolpath};
use serde::{Deserialize, Serialize};

/// Machine motion model. Feeds are in mm/s, heights and tolerance in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionParameters {
    pub feed_xy: f64,
    pub feed_z: f64,
    pub feed_arcs: f64,
    /// Height the tool travels at between chains.
    pub clearance: f64,
    /// Height the tool is lifted by before a travel move.
    pub safety_height: f64,
    /// Gaps up to this length are crossed without lifting.
    pub tolerance: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimeEstimator;

impl TimeEstimator {
    /// Seconds needed to cut every chain in order, travel moves included.
    pub fn total_duration(chains: &[Chain], params: &MotionParameters) -> f64 {
        let cutting: f64 = chains.iter().map(|c| Self::chain_duration(c, params)).sum();
        let travel: f64 = chains
            .windows(2)
            .map(|pair| Self::hop_duration(pair[0].end(), pair[1].start(), params))
            .sum();
        cutting + travel
    }

    pub fn chain_duration(chain: &Chain, params: &MotionParameters) -> f64 {
        chain
            .segments()
            .iter()
            .map(|s| Self::segment_duration(s, params))
            .sum()
    }

    pub fn segment_duration(toolpath: &Toolpath, params: &MotionParameters) -> f64 {
        let length = to_mm(toolpath.length());
        match toolpath.curve {
            Curve::Line { .. } => length / params.feed_xy,
            Curve::Arc(_) => length / params.feed_arcs,
        }
    }

    /// Travel from the end of one chain to the start of the next.
    pub fn hop_duration(from: Point, to: Point, params: &MotionParameters) -> f64 {
        let gap = to_mm(from.distance_to(to));
        if gap <= params.tolerance {
            gap / params.feed_xy
        } else {
            params.safety_height / params.feed_z + gap / params.feed_xy + params.clearance / params.feed_z
        }
    }
}

fn to_mm(units: f64) -> f64 {
    units / RESOLUTION as f64
}
