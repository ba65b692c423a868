//! RS-274X (extended Gerber) parser.
//!
//! The parser is a loop over `*`-terminated statements. Modal state lives in a
//! [`ParserContext`] that every statement handler receives explicitly.

pub mod aperture;
pub mod primitive;

pub use aperture::{
    octagon_vertices, Aperture, ApertureId, ApertureMacro, ApertureTable, MacroPrimitive,
    MAX_POLYGON_VERTICES,
};
pub use primitive::{known_circles, Polarity, Primitive};

use crate::error::GerberError;
use crate::geometry::{Arc, Bounds, Curve, Point, RESOLUTION};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Conversion ratio for metric files.
pub const MM_RATIO: i32 = RESOLUTION;
/// Conversion ratio for imperial files: 25.4 mm per inch, truncated to units.
pub const INCHES_RATIO: i32 = 25_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    Linear,
    ClockwiseCircular,
    CounterclockwiseCircular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadrantMode {
    Single,
    Multi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureMode {
    On,
    Off,
    Flash,
}

/// Fixed-point layout of coordinate numbers (`%FS...*%`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateFormat {
    pub omit_leading_zeros: bool,
    pub integer_places: usize,
    pub decimal_places: usize,
}

impl Default for CoordinateFormat {
    fn default() -> Self {
        Self {
            omit_leading_zeros: true,
            integer_places: 2,
            decimal_places: 4,
        }
    }
}

impl CoordinateFormat {
    /// Convert a raw coordinate word into internal units.
    pub fn convert(&self, raw: &str, ratio: i32) -> Result<i32, GerberError> {
        let (negative, digits) = match raw.as_bytes().first() {
            Some(b'-') => (true, &raw[1..]),
            Some(b'+') => (false, &raw[1..]),
            _ => (false, raw),
        };
        let total = self.integer_places + self.decimal_places;
        let mut padded = String::with_capacity(total + 1);
        if digits.len() < total && self.omit_leading_zeros {
            padded.extend(std::iter::repeat('0').take(total - digits.len()));
        }
        padded.push_str(digits);
        while padded.len() < total {
            padded.push('0');
        }
        let split = padded.len() - self.decimal_places;
        padded.insert(split, '.');
        let value: f64 = padded
            .parse()
            .map_err(|_| GerberError::InvalidNumber(raw.to_string()))?;
        let magnitude = (value * ratio as f64) as i32;
        Ok(if negative { -magnitude } else { magnitude })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenRegion {
    pub polarity: Polarity,
    pub segments: Vec<Curve>,
}

/// Modal parser state threaded through every statement handler.
#[derive(Debug, Clone)]
pub struct ParserContext {
    pub format: CoordinateFormat,
    pub unit_ratio: i32,
    pub interpolation: InterpolationMode,
    pub quadrant_mode: Option<QuadrantMode>,
    pub polarity: Polarity,
    pub exposure: ExposureMode,
    pub current: Point,
    pub aperture: Option<ApertureId>,
    pub region: Option<OpenRegion>,
    /// Macro being defined and the parameter block it belongs to.
    pub open_macro: Option<(String, usize)>,
    pub macros: HashMap<String, ApertureMacro>,
}

impl Default for ParserContext {
    fn default() -> Self {
        Self {
            format: CoordinateFormat::default(),
            unit_ratio: MM_RATIO,
            interpolation: InterpolationMode::Linear,
            quadrant_mode: None,
            polarity: Polarity::Dark,
            exposure: ExposureMode::Off,
            current: Point::default(),
            aperture: None,
            region: None,
            open_macro: None,
            macros: HashMap::new(),
        }
    }
}

/// Everything a parse produces.
#[derive(Debug, Clone, Default)]
pub struct GerberLayer {
    pub primitives: Vec<Primitive>,
    pub apertures: ApertureTable,
    /// Skipped statements and warnings, in file order.
    pub diagnostics: Vec<String>,
    /// Modification time of the source file in epoch milliseconds, when the
    /// layer was read from disk.
    pub source_modified: Option<u64>,
}

impl GerberLayer {
    /// Footprint bounds of every primitive, grown by `inflation`.
    pub fn bounds(&self, inflation: i32) -> Option<Bounds> {
        Bounds::enclosing(
            self.primitives
                .iter()
                .map(|p| p.footprint_bounds(&self.apertures, inflation)),
        )
    }

    pub fn aperture_of(&self, primitive: &Primitive) -> Option<&Aperture> {
        primitive.aperture().map(|id| self.apertures.get(id))
    }
}

/// A raw statement and the parameter-block state it was read in.
#[derive(Debug, Clone, PartialEq)]
struct Statement {
    text: String,
    parameter: bool,
    block: usize,
}

/// Splits the character stream into statements. `%` toggles parameter mode
/// (counting blocks so macro definitions end with their block), whitespace is
/// dropped and `G04` comments keep `%` uninterpreted.
struct StatementReader<I: Iterator<Item = char>> {
    chars: I,
    parameter_mode: bool,
    block: usize,
}

impl<I: Iterator<Item = char>> Iterator for StatementReader<I> {
    type Item = Statement;

    fn next(&mut self) -> Option<Statement> {
        let mut text = String::new();
        let mut in_comment = false;
        for c in self.chars.by_ref() {
            if c == '%' && !in_comment {
                self.parameter_mode = !self.parameter_mode;
                self.block += 1;
            } else if c == '*' {
                if !text.is_empty() {
                    break;
                }
            } else if !c.is_whitespace() {
                text.push(c);
            }
            if text == "G04" {
                in_comment = true;
            }
        }
        if text.is_empty() {
            return None;
        }
        Some(Statement {
            text,
            parameter: self.parameter_mode,
            block: self.block,
        })
    }
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).expect("invalid regex pattern"))
        }
    };
}

pattern!(data_word, r"([GMDXYIJ])([+-]?\d+)");
pattern!(aperture_code, r"^(\d+)(.*)$");
pattern!(aperture_shape, r"^(\d+)([CORP8]+)");
pattern!(single_dimension, r".*,(\d*.\d*)");
pattern!(two_dimensions, r".*,(\d*.\d*)X(\d*.\d*)");
pattern!(
    macro_circle,
    r"1,(1|0),(?P<diameter>\d*.\d*),(?P<x>-?\d*.\d*),(?P<y>-?\d*.?\d*)"
);
pattern!(
    macro_outline,
    r"4,(1|0),(?P<count>\d*),(?P<vertices>.*,)(?P<angle>-?\d*.?\d*)"
);
pattern!(macro_outline_pair, r"(?P<x>-?\d*.?\d*),(?P<y>-?\d*.?\d*),");
pattern!(
    macro_vector_line,
    r"20,(1|0),(?P<width>\d*.\d*),(?P<fromX>-?\d*.\d*),(?P<fromY>-?\d*.?\d*),(?P<toX>-?\d*.?\d*),(?P<toY>-?\d*.?\d*),(?P<angle>-?\d*.?\d*)"
);
pattern!(
    macro_center_line,
    r"21,(1|0),(\d*.\d*),(\d*.\d*),(-?\d*.?\d*),(-?\d*.?\d*),(-?\d*.?\d*)"
);
pattern!(
    macro_polygon,
    r"5,(1|0),(?P<vertices>\d+),(?P<x>-?\d*.?\d*),(?P<y>-?\d*.?\d*),(?P<diameter>\d*.?\d*),(?P<angle>-?\d*.?\d*)"
);

fn number(text: &str) -> Result<f64, GerberError> {
    text.parse()
        .map_err(|_| GerberError::InvalidNumber(text.to_string()))
}

fn scaled(text: &str, ratio: i32) -> Result<i32, GerberError> {
    Ok((number(text)? * ratio as f64) as i32)
}

fn degrees(text: &str) -> Result<i32, GerberError> {
    Ok(number(text)? as i32)
}

/// Words of one data statement. Coordinates are already in internal units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBlock {
    pub g: Option<i32>,
    pub m: Option<i32>,
    pub d: Option<i32>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub i: Option<i32>,
    pub j: Option<i32>,
}

impl DataBlock {
    pub fn parse(text: &str, ctx: &ParserContext) -> Result<Self, GerberError> {
        let mut block = DataBlock::default();
        for caps in data_word().captures_iter(text) {
            let value = &caps[2];
            let code = || {
                value
                    .parse::<i32>()
                    .map_err(|_| GerberError::InvalidNumber(value.to_string()))
            };
            let coordinate = || ctx.format.convert(value, ctx.unit_ratio);
            match &caps[1] {
                "G" => block.g = Some(code()?),
                "M" => block.m = Some(code()?),
                "D" => block.d = Some(code()?),
                "X" => block.x = Some(coordinate()?),
                "Y" => block.y = Some(coordinate()?),
                "I" => block.i = Some(coordinate()?),
                "J" => block.j = Some(coordinate()?),
                _ => {}
            }
        }
        Ok(block)
    }
}

/// Streaming Gerber parser.
#[derive(Debug, Default)]
pub struct GerberParser {
    ctx: ParserContext,
    layer: GerberLayer,
}

impl GerberParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whole file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<GerberLayer, GerberError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut layer = Self::new().parse_str(&text)?;
        layer.source_modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);
        info!(
            path = %path.display(),
            primitives = layer.primitives.len(),
            diagnostics = layer.diagnostics.len(),
            "parsed gerber layer"
        );
        Ok(layer)
    }

    pub fn parse_reader<R: Read>(self, mut reader: R) -> Result<GerberLayer, GerberError> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        self.parse_str(&text)
    }

    pub fn parse_str(mut self, input: &str) -> Result<GerberLayer, GerberError> {
        let reader = StatementReader {
            chars: input.chars(),
            parameter_mode: false,
            block: 0,
        };
        for statement in reader {
            let result = if statement.parameter {
                process_parameter(&mut self.ctx, &mut self.layer, &statement.text, statement.block)
            } else {
                process_data(&mut self.ctx, &mut self.layer, &statement.text)
            };
            match result {
                Ok(()) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    debug!(statement = %statement.text, "unparsable gerber element: {err}");
                    self.layer
                        .diagnostics
                        .push(format!("{}: {}", statement.text, err));
                }
            }
        }
        Ok(self.layer)
    }
}

fn warn_diagnostic(layer: &mut GerberLayer, message: String) {
    warn!("{message}");
    layer.diagnostics.push(message);
}

/// Handle one statement of a `%` parameter block.
pub fn process_parameter(
    ctx: &mut ParserContext,
    layer: &mut GerberLayer,
    text: &str,
    block: usize,
) -> Result<(), GerberError> {
    if let Some((name, macro_block)) = ctx.open_macro.clone() {
        if macro_block == block {
            return parse_macro_primitive(ctx, layer, &name, text);
        }
        ctx.open_macro = None;
    }

    if let Some(rest) = text.strip_prefix("AD") {
        parse_aperture_definition(ctx, layer, rest)
    } else if text.starts_with("OF") || text.starts_with("IP") {
        Ok(())
    } else if text.starts_with("FS") {
        let bytes = text.as_bytes();
        let mut format = CoordinateFormat {
            omit_leading_zeros: bytes.get(2) == Some(&b'L'),
            ..ctx.format
        };
        if let Some(x) = text.find('X') {
            let digit = |k: usize| {
                bytes
                    .get(x + k)
                    .filter(|b| b.is_ascii_digit())
                    .map(|b| (b - b'0') as usize)
                    .ok_or_else(|| GerberError::InvalidNumber(text.to_string()))
            };
            format.integer_places = digit(1)?;
            format.decimal_places = digit(2)?;
        }
        ctx.format = format;
        Ok(())
    } else if let Some(units) = text.strip_prefix("MO") {
        match units {
            "IN" => ctx.unit_ratio = INCHES_RATIO,
            "MM" => ctx.unit_ratio = MM_RATIO,
            other => return Err(GerberError::UnknownParameter(format!("MO{other}"))),
        }
        Ok(())
    } else if let Some(name) = text.strip_prefix("AM") {
        ctx.macros.insert(name.to_string(), ApertureMacro::new(name));
        ctx.open_macro = Some((name.to_string(), block));
        Ok(())
    } else if let Some(polarity) = text.strip_prefix("LP") {
        ctx.polarity = match polarity.chars().next() {
            Some('C') => Polarity::Clear,
            Some('D') => Polarity::Dark,
            _ => return Err(GerberError::InvalidPolarity(polarity.to_string())),
        };
        Ok(())
    } else {
        Err(GerberError::UnknownParameter(text.to_string()))
    }
}

fn parse_aperture_definition(
    ctx: &mut ParserContext,
    layer: &mut GerberLayer,
    definition: &str,
) -> Result<(), GerberError> {
    let invalid = || GerberError::InvalidAperture(definition.to_string());
    let body = definition.strip_prefix('D').ok_or_else(invalid)?;

    let caps = aperture_code().captures(body).ok_or_else(invalid)?;
    let code: i32 = caps[1].parse().map_err(|_| invalid())?;
    if let Some(macro_def) = ctx.macros.get(&caps[2]) {
        layer.apertures.define(code, Aperture::Macro(macro_def.clone()));
        return Ok(());
    }

    let shape = aperture_shape().captures(body).ok_or_else(invalid)?;
    let ratio = ctx.unit_ratio;
    let one = |re: &Regex| -> Result<i32, GerberError> {
        let caps = re.captures(body).ok_or_else(invalid)?;
        scaled(&caps[1], ratio)
    };
    let two = |re: &Regex| -> Result<(i32, i32), GerberError> {
        let caps = re.captures(body).ok_or_else(invalid)?;
        Ok((scaled(&caps[1], ratio)?, scaled(&caps[2], ratio)?))
    };
    let aperture = match &shape[2] {
        "C" => Aperture::Circular {
            diameter: one(single_dimension())?,
        },
        "R" => {
            let (width, height) = two(two_dimensions())?;
            Aperture::Rectangular { width, height }
        }
        "O" => {
            let (width, height) = two(two_dimensions())?;
            Aperture::Oval { width, height }
        }
        "OC8" => Aperture::Octagonal {
            diameter: one(single_dimension())?,
        },
        other => return Err(GerberError::UnsupportedAperture(other.to_string())),
    };
    layer.apertures.define(code, aperture);
    Ok(())
}

fn parse_macro_primitive(
    ctx: &mut ParserContext,
    layer: &mut GerberLayer,
    name: &str,
    text: &str,
) -> Result<(), GerberError> {
    let ratio = ctx.unit_ratio;
    let primitive = if let Some(c) = macro_center_line().captures(text) {
        Some(MacroPrimitive::CenterLine {
            width: scaled(&c[2], ratio)?,
            height: scaled(&c[3], ratio)?,
            center: Point::new(scaled(&c[4], ratio)?, scaled(&c[5], ratio)?),
            rotation: degrees(&c[6])?,
        })
    } else if let Some(c) = macro_circle().captures(text) {
        Some(MacroPrimitive::Circle {
            diameter: scaled(&c["diameter"], ratio)?,
            center: Point::new(scaled(&c["x"], ratio)?, scaled(&c["y"], ratio)?),
        })
    } else if let Some(c) = macro_vector_line().captures(text) {
        Some(MacroPrimitive::VectorLine {
            width: scaled(&c["width"], ratio)?,
            start: Point::new(scaled(&c["fromX"], ratio)?, scaled(&c["fromY"], ratio)?),
            end: Point::new(scaled(&c["toX"], ratio)?, scaled(&c["toY"], ratio)?),
            rotation: degrees(&c["angle"])?,
        })
    } else if let Some(c) = macro_polygon().captures(text) {
        let declared: u32 = c["vertices"]
            .parse()
            .map_err(|_| GerberError::InvalidNumber(c["vertices"].to_string()))?;
        if declared > MAX_POLYGON_VERTICES {
            warn_diagnostic(
                layer,
                format!("macro {name}: polygon with {declared} vertices clamped to {MAX_POLYGON_VERTICES}"),
            );
        }
        Some(MacroPrimitive::Polygon {
            vertices: declared.min(MAX_POLYGON_VERTICES),
            center: Point::new(scaled(&c["x"], ratio)?, scaled(&c["y"], ratio)?),
            diameter: scaled(&c["diameter"], ratio)?,
            rotation: degrees(&c["angle"])?,
        })
    } else if let Some(c) = macro_outline().captures(text) {
        parse_outline(layer, name, &c, ratio)?
    } else {
        None
    };

    if let (Some(primitive), Some(definition)) = (primitive, ctx.macros.get_mut(name)) {
        definition.primitives.push(primitive);
    }
    Ok(())
}

fn parse_outline(
    layer: &mut GerberLayer,
    name: &str,
    caps: &regex::Captures<'_>,
    ratio: i32,
) -> Result<Option<MacroPrimitive>, GerberError> {
    let declared: usize = caps["count"].parse().unwrap_or(0);
    let mut points = Vec::new();
    for pair in macro_outline_pair().captures_iter(&caps["vertices"]) {
        points.push(Point::new(scaled(&pair["x"], ratio)?, scaled(&pair["y"], ratio)?));
    }
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            warn_diagnostic(layer, format!("macro {name}: outline without vertices ignored"));
            return Ok(None);
        }
    };
    if declared != points.len() - 1 {
        warn_diagnostic(
            layer,
            format!(
                "macro {name}: outline declares {declared} vertices, found {}",
                points.len() - 1
            ),
        );
    }
    if first != last {
        warn_diagnostic(
            layer,
            format!("macro {name}: outline is not closed ({first:?} vs {last:?})"),
        );
    }
    points.pop();
    Ok(Some(MacroPrimitive::Outline {
        points,
        rotation: degrees(&caps["angle"])?,
    }))
}

/// Handle one data statement (modes, aperture selection, draws and flashes).
pub fn process_data(
    ctx: &mut ParserContext,
    layer: &mut GerberLayer,
    text: &str,
) -> Result<(), GerberError> {
    if !text.starts_with(['G', 'M', 'D', 'X', 'Y', 'I', 'J']) {
        return Err(GerberError::UnknownCommandClass(text.to_string()));
    }
    let block = DataBlock::parse(text, ctx)?;

    if let Some(g) = block.g {
        match g {
            1 => ctx.interpolation = InterpolationMode::Linear,
            2 => ctx.interpolation = InterpolationMode::ClockwiseCircular,
            3 => ctx.interpolation = InterpolationMode::CounterclockwiseCircular,
            4 => return Ok(()),
            36 => {
                ctx.region = Some(OpenRegion {
                    polarity: ctx.polarity,
                    segments: Vec::new(),
                })
            }
            37 => {
                if let Some(region) = ctx.region.take() {
                    if !region.segments.is_empty() {
                        layer.primitives.push(Primitive::Region {
                            segments: region.segments,
                            polarity: region.polarity,
                        });
                    }
                }
            }
            54 => {}
            70 => ctx.unit_ratio = INCHES_RATIO,
            71 => ctx.unit_ratio = MM_RATIO,
            74 => ctx.quadrant_mode = Some(QuadrantMode::Single),
            75 => ctx.quadrant_mode = Some(QuadrantMode::Multi),
            other => return Err(GerberError::UnknownGCode(other)),
        }
    }

    if let Some(m) = block.m {
        return match m {
            2 => Ok(()),
            other => Err(GerberError::UnknownMCode(other)),
        };
    }

    if let Some(d) = block.d {
        match d {
            1 => ctx.exposure = ExposureMode::On,
            2 => ctx.exposure = ExposureMode::Off,
            3 => ctx.exposure = ExposureMode::Flash,
            code => {
                ctx.aperture = Some(
                    layer
                        .apertures
                        .lookup(code)
                        .ok_or(GerberError::UndefinedAperture(code))?,
                );
                return Ok(());
            }
        }
    }

    if block.x.is_none() && block.y.is_none() && block.d.is_none() {
        return Ok(());
    }
    let from = ctx.current;
    let to = Point::new(block.x.unwrap_or(from.x), block.y.unwrap_or(from.y));

    let curve = match ctx.exposure {
        ExposureMode::On => Some(match ctx.interpolation {
            InterpolationMode::Linear => Curve::line(from, to),
            mode => {
                let clockwise = mode == InterpolationMode::ClockwiseCircular;
                let offset = Point::new(block.i.unwrap_or(0), block.j.unwrap_or(0));
                let center = match ctx.quadrant_mode {
                    Some(QuadrantMode::Single) => single_quadrant_center(from, to, offset, clockwise),
                    _ => from + offset,
                };
                Curve::Arc(Arc::new(from, to, center, clockwise))
            }
        }),
        _ => None,
    };

    if let Some(region) = ctx.region.as_mut() {
        if let Some(curve) = curve.filter(|_| from != to) {
            region.segments.push(curve);
        }
    } else if let Some(aperture) = ctx.aperture {
        let polarity = ctx.polarity;
        match (ctx.exposure, curve) {
            (ExposureMode::Flash, _) => layer.primitives.push(Primitive::Flash {
                point: to,
                aperture,
                polarity,
            }),
            (ExposureMode::On, Some(Curve::Line { from, to })) => {
                layer.primitives.push(Primitive::Linear {
                    from,
                    to,
                    aperture,
                    polarity,
                })
            }
            (ExposureMode::On, Some(Curve::Arc(arc))) => layer.primitives.push(Primitive::Circular {
                arc,
                aperture,
                polarity,
            }),
            _ => {}
        }
    }

    ctx.current = to;
    Ok(())
}

/// Pick the real center of a single-quadrant arc. `offset` holds the unsigned
/// I/J distances. The first candidate whose two radii agree within 10% and
/// whose sweep is at most 180° wins; otherwise the unsigned candidate is kept.
pub fn single_quadrant_center(from: Point, to: Point, offset: Point, clockwise: bool) -> Point {
    let (i, j) = (offset.x, offset.y);
    let candidates = [
        Point::new(from.x + i, from.y + j),
        Point::new(from.x + i, from.y - j),
        Point::new(from.x - i, from.y + j),
        Point::new(from.x - i, from.y - j),
    ];
    for candidate in candidates {
        if (1.0 - candidate.distance_to(from) / candidate.distance_to(to)).abs() > 0.1 {
            continue;
        }
        if Arc::new(from, to, candidate, clockwise).angle() <= std::f64::consts::PI {
            return candidate;
        }
    }
    debug!(?from, ?to, ?offset, "no single-quadrant center fits, keeping I/J as given");
    candidates[0]
}
