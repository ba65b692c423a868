//! Tiled, parallel toolpath generation.
//!
//! The work area is cut into square tiles. Each tile renders a window a few
//! pixels larger than the tile itself, extracts and traces its boundaries,
//! and keeps only the boundary steps inside its own tile, so neighbouring
//! tiles meet at exactly the same pixels.

use crate::edge_detector::EdgeDetector;
use crate::error::GenerationError;
use crate::geometry::{Bounds, Circle, Point};
use crate::gerber::{known_circles, GerberLayer, Primitive};
use crate::progress::{CancellationToken, Progress};
use crate::raster::RasterWindow;
use crate::tracer::{OwnedArea, Tracer, TracerOptions};
use crate::types::Toolpath;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default tile edge, in pixels.
pub const WINDOW_SIZE: usize = 5000;
/// Default margin rendered around each tile, in pixels.
pub const WINDOW_OVERLAP: i32 = 5;
/// Base delay before retrying a tile that ran out of memory.
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Segments shorter than this are dropped from pad-local passes.
pub const ADDITIONAL_PASS_MIN_LENGTH: i32 = 250;

/// How the work is cut up and scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingConfig {
    pub window_size: usize,
    pub overlap: i32,
    pub threads: usize,
    /// Pixels per internal unit.
    pub scale: f64,
    pub retry_delay: Duration,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            overlap: WINDOW_OVERLAP,
            threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            scale: 1.0,
            retry_delay: RETRY_DELAY,
        }
    }
}

/// One unit of windowed work, in global pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Pixels this tile is responsible for (half-open).
    pub core: OwnedArea,
    /// Lower-left pixel of the rendered window.
    pub origin: Point,
    pub width: usize,
    pub height: usize,
}

impl Tile {
    /// The core in window-local pixels.
    pub fn local_core(&self) -> OwnedArea {
        OwnedArea {
            min: self.core.min - self.origin,
            max: self.core.max - self.origin,
        }
    }
}

/// Cut `area` (board units) into tiles of `window_size` pixels with
/// `overlap_x` / `overlap_y` margins. Tiles are ordered column by column.
pub fn layout_tiles(area: Bounds, scale: f64, window_size: usize, overlap_x: i32, overlap_y: i32) -> Vec<Tile> {
    let x0 = (area.min.x as f64 * scale).floor() as i32;
    let y0 = (area.min.y as f64 * scale).floor() as i32;
    let x1 = (area.max.x as f64 * scale).ceil() as i32 + 1;
    let y1 = (area.max.y as f64 * scale).ceil() as i32 + 1;
    let step = window_size.max(1) as i32;
    let mut tiles = Vec::new();
    let mut x = x0;
    while x < x1 {
        let mut y = y0;
        while y < y1 {
            let core = OwnedArea {
                min: Point::new(x, y),
                max: Point::new((x + step).min(x1), (y + step).min(y1)),
            };
            tiles.push(Tile {
                core,
                origin: Point::new(x - overlap_x, y - overlap_y),
                width: (core.max.x - core.min.x + 2 * overlap_x) as usize,
                height: (core.max.y - core.min.y + 2 * overlap_y) as usize,
            });
            y += step;
        }
        x += step;
    }
    tiles
}

/// Run `job` for every entry on a bounded pool and concatenate the results in
/// job order.
///
/// A job that runs out of memory is retried after a randomized delay until it
/// succeeds or the run is cancelled. Any other failure, panics included, is
/// logged and the job contributes nothing.
pub(crate) fn run_jobs<J, F>(
    jobs: &[J],
    threads: usize,
    retry_delay: Duration,
    cancel: &CancellationToken,
    progress: &Progress,
    job: F,
) -> Result<Vec<Toolpath>, GenerationError>
where
    J: Sync,
    F: Fn(&J) -> Result<Vec<Toolpath>, GenerationError> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| GenerationError::WorkerPool(e.to_string()))?;
    let sink: Mutex<Vec<(usize, Vec<Toolpath>)>> = Mutex::new(Vec::with_capacity(jobs.len()));
    let done = AtomicUsize::new(0);
    let total = jobs.len().max(1);

    pool.install(|| {
        jobs.par_iter().enumerate().for_each(|(index, entry)| {
            if cancel.is_cancelled() {
                return;
            }
            match run_with_retry(index, entry, &job, retry_delay, cancel) {
                Ok(toolpaths) => sink.lock().push((index, toolpaths)),
                Err(GenerationError::Cancelled) => {}
                Err(err) => error!(job = index, "error while generating tool paths: {err}"),
            }
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            progress.advance(finished as f64 / total as f64);
        })
    });

    if cancel.is_cancelled() {
        return Err(GenerationError::Cancelled);
    }
    let mut results = sink.into_inner();
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().flat_map(|(_, toolpaths)| toolpaths).collect())
}

fn run_with_retry<J, F>(
    index: usize,
    entry: &J,
    job: &F,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<Toolpath>, GenerationError>
where
    F: Fn(&J) -> Result<Vec<Toolpath>, GenerationError>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(entry))).map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            GenerationError::Tile { index, message }
        })?;
        match outcome {
            Err(err @ GenerationError::ResourceExhausted { .. }) => {
                warn!(job = index, "{err}, retrying");
                let delay = retry_delay.mul_f64(1.0 + rand::random::<f64>());
                sleep_unless_cancelled(delay, cancel);
            }
            other => return other,
        }
    }
}

fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) {
    let slice = Duration::from_millis(20);
    let mut remaining = delay;
    while !remaining.is_zero() && !cancel.is_cancelled() {
        let nap = remaining.min(slice);
        thread::sleep(nap);
        remaining -= nap;
    }
}

/// Trace a rendered window; `owned` restricts the output to one tile.
fn trace_window(
    window: RasterWindow,
    tracer: &Tracer<'_>,
    owned: Option<OwnedArea>,
) -> Result<Vec<Toolpath>, GenerationError> {
    let frame = *window.frame();
    let bitmap = window.into_bitmap();
    match EdgeDetector::detect(&bitmap)? {
        Some(contours) => {
            drop(bitmap);
            Ok(tracer.trace(&contours, &frame, owned))
        }
        None => Ok(Vec::new()),
    }
}

/// Isolation toolpaths for a whole layer at one inflation.
#[derive(Debug)]
pub struct ToolpathGenerator<'a> {
    layer: &'a GerberLayer,
    area: Bounds,
    inflation: i32,
    tool_diameter: i32,
    known_circles: Vec<Circle>,
    config: TilingConfig,
}

impl<'a> ToolpathGenerator<'a> {
    pub fn new(layer: &'a GerberLayer, area: Bounds, inflation: i32, tool_diameter: i32, config: TilingConfig) -> Self {
        Self {
            layer,
            area,
            inflation,
            tool_diameter,
            known_circles: known_circles(&layer.primitives, &layer.apertures, inflation),
            config,
        }
    }

    pub fn tiles(&self) -> Vec<Tile> {
        layout_tiles(
            self.area,
            self.config.scale,
            self.config.window_size,
            self.config.overlap,
            self.config.overlap,
        )
    }

    pub fn generate(&self, cancel: &CancellationToken, progress: &Progress) -> Result<Vec<Toolpath>, GenerationError> {
        let tiles = self.tiles();
        info!(
            tiles = tiles.len(),
            inflation = self.inflation,
            threads = self.config.threads,
            "generating tool paths"
        );
        run_jobs(
            &tiles,
            self.config.threads,
            self.config.retry_delay,
            cancel,
            progress,
            |tile| self.generate_tile(tile),
        )
    }

    /// Render, detect and trace a single tile.
    pub fn generate_tile(&self, tile: &Tile) -> Result<Vec<Toolpath>, GenerationError> {
        let mut window = RasterWindow::new(tile.origin, tile.width, tile.height, self.config.scale)?;
        window.render(&self.layer.primitives, &self.layer.apertures, self.inflation);
        let tracer = Tracer::new(&self.known_circles, self.tool_diameter);
        let toolpaths = trace_window(window, &tracer, Some(tile.local_core()))?;
        debug!(origin = ?tile.origin, toolpaths = toolpaths.len(), "tile traced");
        Ok(toolpaths)
    }
}

/// Extra isolation passes around flashed pads only. Each pad gets its own
/// window, with its neighbours rendered at the first-pass inflation.
#[derive(Debug)]
pub struct AdditionalToolpathGenerator<'a> {
    layer: &'a GerberLayer,
    area: Bounds,
    passes: u32,
    overlap: i32,
    tool_diameter: i32,
    config: TilingConfig,
}

impl<'a> AdditionalToolpathGenerator<'a> {
    pub fn new(
        layer: &'a GerberLayer,
        area: Bounds,
        passes: u32,
        overlap: i32,
        tool_diameter: i32,
        config: TilingConfig,
    ) -> Self {
        Self {
            layer,
            area,
            passes,
            overlap,
            tool_diameter,
            config,
        }
    }

    /// Inflation of the pad itself on pass `pass` (zero based).
    pub fn pass_inflation(&self, pass: u32) -> i32 {
        let d = self.tool_diameter;
        d / 2 + d * (100 - self.overlap) / 100 * (1 + pass as i32)
    }

    pub fn generate(&self, cancel: &CancellationToken, progress: &Progress) -> Result<Vec<Toolpath>, GenerationError> {
        let circles: Vec<Vec<Circle>> = (0..self.passes)
            .map(|pass| known_circles(&self.layer.primitives, &self.layer.apertures, self.pass_inflation(pass)))
            .collect();
        let jobs: Vec<usize> = (0..self.layer.primitives.len()).collect();
        info!(
            pads = self.layer.primitives.iter().filter(|p| p.is_flash()).count(),
            passes = self.passes,
            "generating additional passes around pads"
        );
        run_jobs(
            &jobs,
            self.config.threads,
            self.config.retry_delay,
            cancel,
            progress,
            |index| self.generate_pad(*index, &circles),
        )
    }

    fn generate_pad(&self, index: usize, circles: &[Vec<Circle>]) -> Result<Vec<Toolpath>, GenerationError> {
        let pad = &self.layer.primitives[index];
        let (point, aperture) = match pad {
            Primitive::Flash { point, aperture, .. } => (*point, self.layer.apertures.get(*aperture)),
            _ => return Ok(Vec::new()),
        };
        let base = self.tool_diameter / 2;
        let circumradius = aperture.circumradius();
        let reach = (circumradius + base * (self.passes as i32 + 1) * self.overlap / 100) * 2;
        let x = (point.x - reach).max(self.area.min.x);
        let y = (point.y - reach).max(self.area.min.y);
        let width = (reach * 2).min(self.area.max.x + 1 - x);
        let height = (reach * 2).min(self.area.max.y + 1 - y);
        if width <= 0 || height <= 0 {
            return Ok(Vec::new());
        }
        let scale = self.config.scale;
        let origin = Point::new((x as f64 * scale).floor() as i32, (y as f64 * scale).floor() as i32);
        let (width, height) = (
            (width as f64 * scale).ceil() as usize,
            (height as f64 * scale).ceil() as usize,
        );
        let others = || {
            self.layer
                .primitives
                .iter()
                .enumerate()
                .filter(move |(i, _)| *i != index)
                .map(|(_, p)| p)
        };

        let mut toolpaths = Vec::new();
        for (pass, pass_circles) in circles.iter().enumerate() {
            let inflation = self.pass_inflation(pass as u32);
            let mut window = RasterWindow::new(origin, width, height, scale)?;
            window.render(others(), &self.layer.apertures, base);
            window.render([pad], &self.layer.apertures, inflation);
            let threshold =
                circumradius as f64 + (2.0 * inflation as f64 * inflation as f64).sqrt().trunc() + 10.0;
            let tracer = Tracer::new(pass_circles, self.tool_diameter).with_options(TracerOptions {
                min_line_length: ADDITIONAL_PASS_MIN_LENGTH,
                max_distance_from: Some((point, threshold)),
                ..TracerOptions::default()
            });
            toolpaths.extend(trace_window(window, &tracer, None)?);
        }
        Ok(toolpaths)
    }
}
