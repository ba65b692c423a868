use super::aperture::{Aperture, ApertureId, ApertureTable};
use crate::geometry::{Arc, Bounds, Circle, Curve, Point};
use serde::{Deserialize, Serialize};

/// Whether a primitive adds copper or removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Polarity {
    #[default]
    Dark,
    Clear,
}

/// A parsed Gerber object. Immutable once produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// A straight stroke drawn with an aperture.
    Linear {
        from: Point,
        to: Point,
        aperture: ApertureId,
        polarity: Polarity,
    },
    /// A circular stroke drawn with an aperture.
    Circular {
        arc: Arc,
        aperture: ApertureId,
        polarity: Polarity,
    },
    /// A single stamp of an aperture.
    Flash {
        point: Point,
        aperture: ApertureId,
        polarity: Polarity,
    },
    /// A filled polygon bounded by the given segments.
    Region {
        segments: Vec<Curve>,
        polarity: Polarity,
    },
}

impl Primitive {
    pub fn polarity(&self) -> Polarity {
        match self {
            Primitive::Linear { polarity, .. }
            | Primitive::Circular { polarity, .. }
            | Primitive::Flash { polarity, .. }
            | Primitive::Region { polarity, .. } => *polarity,
        }
    }

    pub fn aperture(&self) -> Option<ApertureId> {
        match self {
            Primitive::Linear { aperture, .. }
            | Primitive::Circular { aperture, .. }
            | Primitive::Flash { aperture, .. } => Some(*aperture),
            Primitive::Region { .. } => None,
        }
    }

    pub fn is_flash(&self) -> bool {
        matches!(self, Primitive::Flash { .. })
    }

    /// Bounds of the path geometry alone, ignoring the aperture footprint.
    pub fn geometry_bounds(&self) -> Bounds {
        match self {
            Primitive::Linear { from, to, .. } => Curve::line(*from, *to).bounds(),
            Primitive::Circular { arc, .. } => arc.bounds(),
            Primitive::Flash { point, .. } => Bounds::from_point(*point),
            Primitive::Region { segments, .. } => {
                Bounds::enclosing(segments.iter().map(Curve::bounds))
                    .unwrap_or_else(|| Bounds::from_point(Point::default()))
            }
        }
    }

    /// Bounds of the footprint grown by `inflation`.
    pub fn footprint_bounds(&self, apertures: &ApertureTable, inflation: i32) -> Bounds {
        let reach = self
            .aperture()
            .map(|id| apertures.get(id).circumradius())
            .unwrap_or(0);
        self.geometry_bounds().inflate(reach + inflation.max(0) + 1)
    }

    /// Circles whose curvature shows up in the inflated outline of this
    /// primitive, used by the tracer to fit arcs.
    pub fn known_circles(&self, apertures: &ApertureTable, inflation: i32) -> Vec<Circle> {
        if self.polarity() == Polarity::Clear {
            return Vec::new();
        }
        let aperture = match self.aperture() {
            Some(id) => apertures.get(id),
            None => return Vec::new(),
        };
        let mut circles = Vec::new();
        match (self, aperture) {
            (Primitive::Flash { point, .. }, Aperture::Circular { diameter }) => {
                circles.push(Circle::new(*point, diameter / 2 + inflation));
            }
            (Primitive::Flash { point, .. }, Aperture::Oval { width, height }) => {
                let radius = (*width).min(*height) / 2;
                let offset = ((*width).max(*height) - (*width).min(*height)) / 2;
                let (a, b) = if width >= height {
                    (Point::new(point.x - offset, point.y), Point::new(point.x + offset, point.y))
                } else {
                    (Point::new(point.x, point.y - offset), Point::new(point.x, point.y + offset))
                };
                circles.push(Circle::new(a, radius + inflation));
                circles.push(Circle::new(b, radius + inflation));
            }
            (Primitive::Flash { point, .. }, Aperture::Rectangular { width, height })
                if inflation > 0 =>
            {
                let (hw, hh) = (width / 2, height / 2);
                for (dx, dy) in [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)] {
                    circles.push(Circle::new(Point::new(point.x + dx, point.y + dy), inflation));
                }
            }
            (Primitive::Linear { from, to, .. }, Aperture::Circular { diameter }) => {
                circles.push(Circle::new(*from, diameter / 2 + inflation));
                circles.push(Circle::new(*to, diameter / 2 + inflation));
            }
            (Primitive::Circular { arc, .. }, Aperture::Circular { diameter }) => {
                circles.push(Circle::new(arc.from, diameter / 2 + inflation));
                circles.push(Circle::new(arc.to, diameter / 2 + inflation));
            }
            _ => {}
        }
        circles.retain(|c| c.radius > 0);
        circles
    }
}

/// Known circles of a whole primitive set, sorted and without duplicates.
pub fn known_circles<'a, I>(primitives: I, apertures: &ApertureTable, inflation: i32) -> Vec<Circle>
where
    I: IntoIterator<Item = &'a Primitive>,
{
    let mut circles: Vec<Circle> = primitives
        .into_iter()
        .flat_map(|p| p.known_circles(apertures, inflation))
        .collect();
    circles.sort();
    circles.dedup();
    circles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (ApertureTable, ApertureId, ApertureId) {
        let mut table = ApertureTable::new();
        let round = table.define(10, Aperture::Circular { diameter: 1000 });
        let rect = table.define(
            11,
            Aperture::Rectangular {
                width: 2000,
                height: 1000,
            },
        );
        (table, round, rect)
    }

    #[test]
    fn test_flash_known_circle() {
        let (table, round, _) = table();
        let flash = Primitive::Flash {
            point: Point::new(5000, 5000),
            aperture: round,
            polarity: Polarity::Dark,
        };
        assert_eq!(
            flash.known_circles(&table, 100),
            vec![Circle::new(Point::new(5000, 5000), 600)]
        );
    }

    #[test]
    fn test_rectangle_corners_only_when_inflated() {
        let (table, _, rect) = table();
        let flash = Primitive::Flash {
            point: Point::new(0, 0),
            aperture: rect,
            polarity: Polarity::Dark,
        };
        assert!(flash.known_circles(&table, 0).is_empty());
        let circles = flash.known_circles(&table, 50);
        assert_eq!(circles.len(), 4);
        assert!(circles.contains(&Circle::new(Point::new(1000, 500), 50)));
    }

    #[test]
    fn test_footprint_bounds() {
        let (table, round, _) = table();
        let line = Primitive::Linear {
            from: Point::new(0, 0),
            to: Point::new(10_000, 0),
            aperture: round,
            polarity: Polarity::Dark,
        };
        let bounds = line.footprint_bounds(&table, 100);
        assert!(bounds.contains(Point::new(-600, 600)));
        assert!(bounds.contains(Point::new(10_600, -600)));
    }

    #[test]
    fn test_clear_primitives_have_no_circles() {
        let (table, round, _) = table();
        let flash = Primitive::Flash {
            point: Point::new(0, 0),
            aperture: round,
            polarity: Polarity::Clear,
        };
        assert!(flash.known_circles(&table, 100).is_empty());
    }
}
