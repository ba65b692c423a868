//! Error types for the toolpath pipeline.
//!
//! Library layers return these typed errors; the generation service and the
//! binary wrap them in `anyhow` with context.

use thiserror::Error;

/// Gerber parsing error.
///
/// Most variants describe a single bad statement: the parser records them as
/// diagnostics and keeps going. Only [`GerberError::is_fatal`] errors abort a parse.
#[derive(Error, Debug)]
pub enum GerberError {
    /// The input could not be read
    #[error("failed to read gerber input: {0}")]
    Io(#[from] std::io::Error),

    /// A data statement that does not start with a known command letter
    #[error("unknown command class in statement '{0}'")]
    UnknownCommandClass(String),

    /// Parameter block with an unsupported code
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// G code outside the supported set
    #[error("unknown G code: G{0}")]
    UnknownGCode(i32),

    /// M code outside the supported set
    #[error("unknown M code: M{0}")]
    UnknownMCode(i32),

    /// D code selecting an aperture that was never defined
    #[error("undefined aperture used: D{0}")]
    UndefinedAperture(i32),

    /// Aperture definition that could not be understood
    #[error("invalid aperture definition: {0}")]
    InvalidAperture(String),

    /// Aperture shape this parser does not render
    #[error("unsupported aperture: {0}")]
    UnsupportedAperture(String),

    /// Layer polarity other than dark or clear
    #[error("invalid level polarity: {0}")]
    InvalidPolarity(String),

    /// A number that does not parse
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
}

impl GerberError {
    /// Whether the error stops the whole parse rather than one statement.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GerberError::Io(_) | GerberError::UnknownCommandClass(_))
    }
}

/// Errors raised while turning primitives into toolpaths.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    /// Memory for a raster window or its edge map could not be reserved
    #[error("resource exhausted: {what} ({bytes} bytes)")]
    ResourceExhausted {
        /// What was being allocated.
        what: &'static str,
        /// Requested size in bytes.
        bytes: usize,
    },

    /// The run was cancelled
    #[error("generation cancelled")]
    Cancelled,

    /// A window was requested with an unusable geometry
    #[error("invalid window: {0}")]
    InvalidWindow(String),

    /// Worker pool could not be started
    #[error("worker pool: {0}")]
    WorkerPool(String),

    /// A tile job panicked
    #[error("tile {index} failed: {message}")]
    Tile {
        /// Position of the tile in the job list.
        index: usize,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Invalid milling settings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// A value that must be strictly positive was not
    #[error("{name} must be positive, got {value}")]
    NotPositive {
        /// Setting name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A percentage outside its allowed range
    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        /// Setting name.
        name: &'static str,
        /// Offending value.
        value: i64,
        /// Smallest accepted value.
        min: i64,
        /// Largest accepted value.
        max: i64,
    },
}
