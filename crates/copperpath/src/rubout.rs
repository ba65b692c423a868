//! Rub-out: clear all copper that is not part of the design by sweeping the
//! tool along horizontal rows over the uncovered area.

use crate::error::GenerationError;
use crate::geometry::{Bounds, Point};
use crate::gerber::GerberLayer;
use crate::progress::{CancellationToken, Progress};
use crate::raster::RasterWindow;
use crate::tiling::{layout_tiles, run_jobs, Tile, TilingConfig};
use crate::types::Toolpath;
use tracing::{debug, info};

/// Horizontal window margin, in pixels.
pub const RUB_OUT_HORIZONTAL_OVERLAP: i32 = 5;
/// Vertical window margin, in pixels.
pub const RUB_OUT_VERTICAL_OVERLAP: i32 = 500;

#[derive(Debug)]
pub struct RubOutToolpathGenerator<'a> {
    layer: &'a GerberLayer,
    area: Bounds,
    /// Distance kept from the copper in addition to the tool radius.
    offset: i32,
    tool_diameter: i32,
    /// Row overlap in percent of the tool diameter.
    overlap: i32,
    config: TilingConfig,
}

impl<'a> RubOutToolpathGenerator<'a> {
    pub fn new(
        layer: &'a GerberLayer,
        area: Bounds,
        offset: i32,
        tool_diameter: i32,
        overlap: i32,
        config: TilingConfig,
    ) -> Self {
        Self {
            layer,
            area,
            offset,
            tool_diameter,
            overlap,
            config,
        }
    }

    /// Distance between rows, in board units.
    pub fn stepover(&self) -> i32 {
        (self.tool_diameter * (100 - self.overlap) / 100).max(1)
    }

    pub fn tiles(&self) -> Vec<Tile> {
        layout_tiles(
            self.area,
            self.config.scale,
            self.config.window_size,
            RUB_OUT_HORIZONTAL_OVERLAP,
            RUB_OUT_VERTICAL_OVERLAP,
        )
    }

    pub fn generate(&self, cancel: &CancellationToken, progress: &Progress) -> Result<Vec<Toolpath>, GenerationError> {
        let tiles = self.tiles();
        info!(tiles = tiles.len(), stepover = self.stepover(), "generating rub-out");
        run_jobs(
            &tiles,
            self.config.threads,
            self.config.retry_delay,
            cancel,
            progress,
            |tile| self.generate_tile(tile),
        )
    }

    /// Rows crossing one tile core, cut where they meet copper.
    pub fn generate_tile(&self, tile: &Tile) -> Result<Vec<Toolpath>, GenerationError> {
        let scale = self.config.scale;
        let mut window = RasterWindow::new(tile.origin, tile.width, tile.height, scale)?;
        window.render(
            &self.layer.primitives,
            &self.layer.apertures,
            self.offset + self.tool_diameter / 2,
        );
        let frame = *window.frame();
        let bitmap = window.into_bitmap();

        let step = ((self.stepover() as f64 * scale).round() as i32).max(1);
        // Rows sit on a grid anchored at the bottom of the area, so every
        // tile picks the same rows.
        let first_row = tiles_first_row(self.area, scale);
        let skip = (tile.core.min.y - first_row).rem_euclid(step);
        let start = if skip == 0 { tile.core.min.y } else { tile.core.min.y + step - skip };

        let mut toolpaths = Vec::new();
        let mut y = start;
        while y < tile.core.max.y {
            let row = (y - tile.origin.y) as i64;
            let mut x = 0i64;
            let width = tile.width as i64;
            while x < width {
                if bitmap.get(x, row) {
                    x += 1;
                    continue;
                }
                let run_start = x;
                while x < width && !bitmap.get(x, row) {
                    x += 1;
                }
                let run_end = x - 1;
                // A run owns the pixel steps that start inside the core; the
                // last owned step ends on the next tile's first pixel.
                let from = (tile.origin.x as i64 + run_start).max(tile.core.min.x as i64) as i32;
                let to = (tile.origin.x as i64 + run_end).min(tile.core.max.x as i64) as i32;
                if from < to {
                    let local = |gx: i32| Point::new(gx - frame.origin.x, y - frame.origin.y);
                    toolpaths.push(Toolpath::linear(
                        frame.to_board(local(from)),
                        frame.to_board(local(to)),
                        self.tool_diameter,
                    ));
                }
            }
            y += step;
        }
        debug!(origin = ?tile.origin, rows = toolpaths.len(), "rub-out tile done");
        Ok(toolpaths)
    }
}

fn tiles_first_row(area: Bounds, scale: f64) -> i32 {
    (area.min.y as f64 * scale).floor() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gerber::{Aperture, ApertureTable, Polarity, Primitive};

    fn layer_with_pad() -> GerberLayer {
        let mut apertures = ApertureTable::new();
        let square = apertures.define(
            10,
            Aperture::Rectangular {
                width: 200,
                height: 200,
            },
        );
        GerberLayer {
            primitives: vec![Primitive::Flash {
                point: Point::new(500, 500),
                aperture: square,
                polarity: Polarity::Dark,
            }],
            apertures,
            ..GerberLayer::default()
        }
    }

    #[test]
    fn test_rows_avoid_copper() {
        let layer = layer_with_pad();
        let area = Bounds::new(Point::new(0, 0), Point::new(1000, 1000));
        let generator = RubOutToolpathGenerator::new(&layer, area, 0, 100, 0, TilingConfig::default());
        let toolpaths = generator
            .generate(&CancellationToken::new(), &Progress::new())
            .unwrap();
        assert!(!toolpaths.is_empty());
        for toolpath in &toolpaths {
            assert_eq!(toolpath.from().y, toolpath.to().y, "rows are horizontal");
            assert_eq!(toolpath.from().y % 100, 0, "rows sit on the stepover grid");
            let y = toolpath.from().y;
            // The pad grown by the tool radius spans 350..=650.
            if (350..=650).contains(&y) {
                let (a, b) = (toolpath.from().x, toolpath.to().x);
                assert!(b < 350 || a > 650, "row {y} crosses the pad: {a}..{b}");
            }
        }
    }

    #[test]
    fn test_rows_stitch_across_tiles() {
        let layer = GerberLayer::default();
        let area = Bounds::new(Point::new(0, 0), Point::new(999, 300));
        let config = TilingConfig {
            window_size: 250,
            ..TilingConfig::default()
        };
        let generator = RubOutToolpathGenerator::new(&layer, area, 0, 100, 0, config);
        let toolpaths = generator
            .generate(&CancellationToken::new(), &Progress::new())
            .unwrap();
        let mut bottom: Vec<(i32, i32)> = toolpaths
            .iter()
            .filter(|t| t.from().y == 0)
            .map(|t| (t.from().x, t.to().x))
            .collect();
        bottom.sort();
        assert_eq!(bottom, vec![(0, 250), (250, 500), (500, 750), (750, 1000)]);
    }

    #[test]
    fn test_stepover() {
        let layer = GerberLayer::default();
        let area = Bounds::from_point(Point::new(0, 0));
        let generator = RubOutToolpathGenerator::new(&layer, area, 0, 300, 20, TilingConfig::default());
        assert_eq!(generator.stepover(), 240);
    }
}
