mod cache;
mod chain;
mod edge_detector;
mod error;
mod geometry;
mod gerber;
mod merger;
mod optimizer;
mod postprocessor;
mod progress;
mod raster;
mod rubout;
mod settings;
mod tiling;
mod time_estimator;
mod toolpath_generation;
mod tracer;
mod types;

pub use cache::*;
pub use chain::ChainDetector;
pub use edge_detector::{Contour, EdgeDetector};
pub use error::*;
pub use geometry::*;
pub use gerber::*;
pub use merger::ToolpathMerger;
pub use optimizer::*;
pub use postprocessor::*;
pub use progress::*;
pub use raster::*;
pub use rubout::*;
pub use settings::*;
pub use tiling::*;
pub use time_estimator::*;
pub use toolpath_generation::*;
pub use tracer::*;
pub use types::*;
