use crate::geometry::{Curve, Point, RESOLUTION};
use crate::types::{Chain, GCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine setup for code emission. Feeds are in mm/min, heights in mm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineParameters {
    pub feed_xy: f64,
    pub feed_z: f64,
    pub feed_arcs: f64,
    pub clearance: f64,
    pub safety_height: f64,
    /// Cutting depth.
    pub working_height: f64,
    pub spindle_speed: u32,
    /// Dwell after starting the spindle, in seconds.
    pub spindle_pause: f64,
    /// Gaps between chains up to this length are crossed without lifting.
    pub tolerance: f64,
}

/// One machine command. Coordinates are absolute, in mm.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionInstruction {
    AbsoluteMode,
    MetricUnits,
    XyPlane,
    SpindleOn { speed: u32 },
    SpindleOff,
    Dwell { seconds: f64 },
    Rapid {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    },
    Linear {
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed: Option<f64>,
    },
    /// `i`/`j` are the center offset from the arc start.
    Arc {
        x: f64,
        y: f64,
        i: f64,
        j: f64,
        clockwise: bool,
        feed: Option<f64>,
    },
}

impl fmt::Display for MotionInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionInstruction::AbsoluteMode => write!(f, "G90"),
            MotionInstruction::MetricUnits => write!(f, "G21"),
            MotionInstruction::XyPlane => write!(f, "G17"),
            MotionInstruction::SpindleOn { speed } => write!(f, "M03 S{speed}"),
            MotionInstruction::SpindleOff => write!(f, "M05"),
            MotionInstruction::Dwell { seconds } => write!(f, "G04 P{}", number(*seconds)),
            MotionInstruction::Rapid { x, y, z } => {
                write!(f, "G00")?;
                words(f, &[('X', *x), ('Y', *y), ('Z', *z)])
            }
            MotionInstruction::Linear { x, y, z, feed } => {
                write!(f, "G01")?;
                words(f, &[('X', *x), ('Y', *y), ('Z', *z), ('F', *feed)])
            }
            MotionInstruction::Arc {
                x,
                y,
                i,
                j,
                clockwise,
                feed,
            } => {
                write!(f, "{}", if *clockwise { "G02" } else { "G03" })?;
                words(
                    f,
                    &[('X', Some(*x)), ('Y', Some(*y)), ('I', Some(*i)), ('J', Some(*j)), ('F', *feed)],
                )
            }
        }
    }
}

fn words(f: &mut fmt::Formatter<'_>, values: &[(char, Option<f64>)]) -> fmt::Result {
    for (letter, value) in values {
        if let Some(value) = value {
            write!(f, " {letter}{}", number(*value))?;
        }
    }
    Ok(())
}

/// Three decimals, without a negative zero.
fn number(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.3}")
}

fn mm(units: i32) -> f64 {
    units as f64 / RESOLUTION as f64
}

/// Tracks the active feed so it is only written when it changes.
struct FeedState(Option<f64>);

impl FeedState {
    fn change_to(&mut self, feed: f64) -> Option<f64> {
        if self.0 == Some(feed) {
            None
        } else {
            self.0 = Some(feed);
            Some(feed)
        }
    }
}

/// Machine instructions that cut `chains` in order.
pub fn emit(chains: &[Chain], params: &MachineParameters) -> Vec<MotionInstruction> {
    let mut out = vec![
        MotionInstruction::AbsoluteMode,
        MotionInstruction::MetricUnits,
        MotionInstruction::XyPlane,
        MotionInstruction::SpindleOn {
            speed: params.spindle_speed,
        },
        MotionInstruction::Dwell {
            seconds: params.spindle_pause,
        },
    ];
    let mut feed = FeedState(None);
    let mut position: Option<Point> = None;

    for chain in chains {
        let start = chain.start();
        match position {
            Some(end) if end.distance_to(start) / RESOLUTION as f64 <= params.tolerance => {
                if end != start {
                    out.push(MotionInstruction::Linear {
                        x: Some(mm(start.x)),
                        y: Some(mm(start.y)),
                        z: None,
                        feed: feed.change_to(params.feed_xy),
                    });
                }
            }
            _ => {
                out.push(MotionInstruction::Rapid {
                    x: None,
                    y: None,
                    z: Some(params.clearance),
                });
                out.push(MotionInstruction::Rapid {
                    x: Some(mm(start.x)),
                    y: Some(mm(start.y)),
                    z: None,
                });
                out.push(MotionInstruction::Rapid {
                    x: None,
                    y: None,
                    z: Some(params.safety_height),
                });
                out.push(MotionInstruction::Linear {
                    x: None,
                    y: None,
                    z: Some(params.working_height),
                    feed: feed.change_to(params.feed_z),
                });
            }
        }
        position = Some(chain.end());

        for segment in chain.segments() {
            match segment.curve {
                Curve::Line { to, .. } => out.push(MotionInstruction::Linear {
                    x: Some(mm(to.x)),
                    y: Some(mm(to.y)),
                    z: None,
                    feed: feed.change_to(params.feed_xy),
                }),
                Curve::Arc(arc) => out.push(MotionInstruction::Arc {
                    x: mm(arc.to.x),
                    y: mm(arc.to.y),
                    i: mm(arc.center.x - arc.from.x),
                    j: mm(arc.center.y - arc.from.y),
                    clockwise: arc.clockwise,
                    feed: feed.change_to(params.feed_arcs),
                }),
            }
        }
    }

    out.push(MotionInstruction::Rapid {
        x: None,
        y: None,
        z: Some(params.clearance),
    });
    out.push(MotionInstruction::SpindleOff);
    out
}

/// Render `chains` as G-code lines.
pub fn post_process(chains: &[Chain], params: &MachineParameters) -> GCode {
    GCode {
        lines: emit(chains, params).iter().map(ToString::to_string).collect(),
    }
}
