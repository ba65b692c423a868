use crate::geometry::{Arc, Curve, Point};
use serde::{Deserialize, Serialize};

/// One cutting movement of the tool centre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolpath {
    /// The geometry the tool centre follows.
    pub curve: Curve,
    /// Diameter of the cutter in internal units.
    pub tool_diameter: i32,
}

impl Toolpath {
    pub fn new(curve: Curve, tool_diameter: i32) -> Self {
        Self {
            curve,
            tool_diameter,
        }
    }

    pub fn linear(from: Point, to: Point, tool_diameter: i32) -> Self {
        Self::new(Curve::line(from, to), tool_diameter)
    }

    pub fn circular(arc: Arc, tool_diameter: i32) -> Self {
        Self::new(Curve::Arc(arc), tool_diameter)
    }

    pub fn from(&self) -> Point {
        self.curve.from()
    }

    pub fn to(&self) -> Point {
        self.curve.to()
    }

    pub fn length(&self) -> f64 {
        self.curve.length()
    }

    pub fn reversed(&self) -> Toolpath {
        Toolpath::new(self.curve.reversed(), self.tool_diameter)
    }

    pub fn with_endpoints(&self, from: Point, to: Point) -> Toolpath {
        Toolpath::new(self.curve.with_endpoints(from, to), self.tool_diameter)
    }
}

/// A non-branching sequence of toolpaths where each segment starts exactly
/// where the previous one ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    segments: Vec<Toolpath>,
}

impl Chain {
    /// Build a chain, rejecting empty input and any break in continuity.
    pub fn new(segments: Vec<Toolpath>) -> Option<Chain> {
        if segments.is_empty() {
            return None;
        }
        if segments.windows(2).any(|pair| pair[0].to() != pair[1].from()) {
            return None;
        }
        Some(Chain { segments })
    }

    pub fn single(segment: Toolpath) -> Chain {
        Chain {
            segments: vec![segment],
        }
    }

    pub fn segments(&self) -> &[Toolpath] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Toolpath> {
        self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false: chains hold at least one segment.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn start(&self) -> Point {
        self.segments[0].from()
    }

    pub fn end(&self) -> Point {
        self.segments[self.segments.len() - 1].to()
    }

    pub fn is_closed(&self) -> bool {
        self.start() == self.end()
    }

    /// Cut an ordered toolpath list back into chains, starting a new chain
    /// wherever a segment does not begin at the previous one's end.
    pub fn split_continuous(toolpaths: Vec<Toolpath>) -> Vec<Chain> {
        let mut chains: Vec<Chain> = Vec::new();
        for toolpath in toolpaths {
            match chains.last_mut() {
                Some(chain) if chain.end() == toolpath.from() => chain.segments.push(toolpath),
                _ => chains.push(Chain::single(toolpath)),
            }
        }
        chains
    }

    /// The same path travelled the other way.
    pub fn reversed(&self) -> Chain {
        Chain {
            segments: self.segments.iter().rev().map(Toolpath::reversed).collect(),
        }
    }
}

/// Represents the final, machine-specific G-code output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GCode {
    /// A list of G-code command strings.
    pub lines: Vec<String>,
}

impl GCode {
    pub fn to_program(&self) -> String {
        let mut program = self.lines.join("\n");
        program.push('\n');
        program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(ax: i32, ay: i32, bx: i32, by: i32) -> Toolpath {
        Toolpath::linear(Point::new(ax, ay), Point::new(bx, by), 300)
    }

    #[test]
    fn test_chain_rejects_gaps() {
        assert!(Chain::new(vec![]).is_none());
        assert!(Chain::new(vec![segment(0, 0, 10, 0), segment(11, 0, 20, 0)]).is_none());
        let chain = Chain::new(vec![segment(0, 0, 10, 0), segment(10, 0, 10, 10)]).unwrap();
        assert_eq!(chain.start(), Point::new(0, 0));
        assert_eq!(chain.end(), Point::new(10, 10));
        assert!(!chain.is_closed());
    }

    #[test]
    fn test_chain_reversal_keeps_continuity() {
        let arc = Arc::new(Point::new(10, 10), Point::new(20, 0), Point::new(10, 0), true);
        let chain = Chain::new(vec![
            segment(0, 0, 10, 10),
            Toolpath::circular(arc, 300),
        ])
        .unwrap();
        let reversed = chain.reversed();
        assert_eq!(reversed.start(), Point::new(20, 0));
        assert_eq!(reversed.end(), Point::new(0, 0));
        assert!(Chain::new(reversed.segments().to_vec()).is_some());
        match reversed.segments()[0].curve {
            Curve::Arc(arc) => assert!(!arc.clockwise, "reversed arc must flip direction"),
            other => panic!("expected arc, got {other:?}"),
        }
    }

    #[test]
    fn test_split_keeps_chains_meeting_at_a_junction_apart() {
        let branch = segment(1000, 0, 1000, 1000);
        let run = [segment(0, 0, 1000, 0), segment(1000, 0, 2000, 0)];
        let chains = Chain::split_continuous(vec![branch, run[0], run[1]]);

        assert_eq!(chains, vec![Chain::single(branch), Chain::new(run.to_vec()).unwrap()]);
        assert!(Chain::split_continuous(Vec::new()).is_empty());
    }

    #[test]
    fn test_gcode_program() {
        let gcode = GCode {
            lines: vec!["G90".to_string(), "G21".to_string()],
        };
        assert_eq!(gcode.to_program(), "G90\nG21\n");
    }
}
