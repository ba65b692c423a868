use crate::cache::{ToolpathsCache, ToolpathsCacheKey};
use crate::chain::ChainDetector;
use crate::error::GenerationError;
use crate::geometry::Bounds;
use crate::gerber::GerberLayer;
use crate::merger::ToolpathMerger;
use crate::optimizer::Optimizer;
use crate::progress::{CancellationToken, Progress};
use crate::rubout::RubOutToolpathGenerator;
use crate::settings::MillingSettings;
use crate::tiling::{AdditionalToolpathGenerator, ToolpathGenerator};
use crate::time_estimator::TimeEstimator;
use crate::types::{Chain, Toolpath};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Fixed optimizer seed: the same inputs always produce the same program.
pub const OPTIMIZER_SEED: u64 = 0x00C0_FFEE;

/// What a running generation is busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStage {
    #[default]
    Idle,
    Tracing,
    AdditionalPasses,
    RubOut,
    Optimizing,
    Done,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GenerationStage::Idle => "Idle",
            GenerationStage::Tracing => "Generating tool paths...",
            GenerationStage::AdditionalPasses => "Generating additional passes...",
            GenerationStage::RubOut => "Generating rub-out...",
            GenerationStage::Optimizing => "Optimizing milling time...",
            GenerationStage::Done => "Done",
        };
        f.write_str(text)
    }
}

/// Handles shared with whoever watches or stops a generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerationControl {
    pub progress: Progress,
    pub cancel: CancellationToken,
    stage: Arc<Mutex<GenerationStage>>,
}

impl GenerationControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> GenerationStage {
        *self.stage.lock()
    }

    fn enter(&self, stage: GenerationStage) {
        info!("{stage}");
        *self.stage.lock() = stage;
        self.progress.reset();
    }

    fn check_cancelled(&self) -> Result<(), GenerationError> {
        if self.cancel.is_cancelled() {
            Err(GenerationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceMillingRequest {
    /// Distinguishes layers of one board in the shared cache file.
    pub layer_id: i32,
    pub settings: MillingSettings,
    /// Cache file to consult and update, usually `cache_path_for(layer file)`.
    pub cache_path: Option<PathBuf>,
    /// Board area to work in; defaults to the area the layer needs.
    pub area: Option<Bounds>,
}

impl TraceMillingRequest {
    pub fn new(layer_id: i32, settings: MillingSettings) -> Self {
        Self {
            layer_id,
            settings,
            cache_path: None,
            area: None,
        }
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_area(mut self, area: Bounds) -> Self {
        self.area = Some(area);
        self
    }

    /// Cache key of an isolation run: rub-out fields do not apply.
    pub fn trace_key(&self) -> ToolpathsCacheKey {
        let s = &self.settings;
        ToolpathsCacheKey {
            layer_id: self.layer_id,
            tool_diameter: s.tool_diameter,
            additional_passes: s.additional_passes,
            additional_passes_overlap: s.additional_passes_overlap,
            additional_passes_pads_only: s.additional_passes_pads_only,
            rub_out_initial_offset: 0,
            rub_out_overlap: 0,
        }
    }

    /// Cache key of a rub-out run: additional pass fields do not apply.
    pub fn rub_out_key(&self) -> ToolpathsCacheKey {
        let s = &self.settings;
        ToolpathsCacheKey {
            layer_id: self.layer_id,
            tool_diameter: s.tool_diameter,
            additional_passes: 0,
            additional_passes_overlap: 0,
            additional_passes_pads_only: false,
            rub_out_initial_offset: s.rub_out_initial_offset,
            rub_out_overlap: s.rub_out_overlap,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceMillingResult {
    /// Segments in cutting order.
    pub toolpaths: Vec<Toolpath>,
    pub chains: Vec<Chain>,
    /// Seconds.
    pub estimated_duration: f64,
    pub from_cache: bool,
}

impl TraceMillingResult {
    pub fn is_empty(&self) -> bool {
        self.toolpaths.is_empty()
    }
}

/// Isolation milling toolpaths for a copper layer.
pub fn generate_trace_toolpaths(
    layer: &GerberLayer,
    request: &TraceMillingRequest,
    control: &GenerationControl,
) -> Result<TraceMillingResult> {
    let settings = &request.settings;
    settings.validate().context("invalid milling settings")?;
    let key = request.trace_key();
    let mut cache = load_cache(layer, request);
    if let Some(toolpaths) = cache.get(&key) {
        info!(toolpaths = toolpaths.len(), "using cached toolpaths");
        return Ok(cached_result(toolpaths.to_vec(), settings));
    }

    let d = settings.tool_diameter;
    let offset = d * (100 - settings.additional_passes_overlap) / 100;
    let widest = d / 2 + offset * settings.additional_passes.max(0);
    let Some(area) = request.area.or_else(|| layer.bounds(widest)) else {
        info!("layer has no primitives, nothing to mill");
        return Ok(TraceMillingResult::default());
    };
    let config = settings.tiling_config();
    let merger = ToolpathMerger::new(settings.merge_tolerance());

    control.enter(GenerationStage::Tracing);
    let toolpaths = ToolpathGenerator::new(layer, area, d / 2, d, config.clone())
        .generate(&control.cancel, &control.progress)
        .context("generate isolation toolpaths")?;
    if toolpaths.is_empty() {
        info!("no toolpaths generated");
        return Ok(TraceMillingResult::default());
    }
    let mut toolpaths = merger.merge(toolpaths);

    if settings.additional_passes > 0 {
        control.enter(GenerationStage::AdditionalPasses);
        if settings.additional_passes_pads_only {
            let extra = AdditionalToolpathGenerator::new(
                layer,
                area,
                settings.additional_passes as u32,
                settings.additional_passes_overlap,
                d,
                config,
            )
            .generate(&control.cancel, &control.progress)
            .context("generate additional passes around pads")?;
            toolpaths.extend(merger.merge(extra));
        } else {
            for pass in 0..settings.additional_passes {
                let inflation = d / 2 + offset * (pass + 1);
                let extra = ToolpathGenerator::new(layer, area, inflation, d, config.clone())
                    .generate(&control.cancel, &control.progress)
                    .with_context(|| format!("generate additional pass {}", pass + 1))?;
                if !extra.is_empty() {
                    toolpaths.extend(merger.merge(extra));
                }
            }
        }
    }

    finish(layer, request, key, &mut cache, toolpaths, control)
}

/// Rub-out toolpaths clearing the copper around a layer.
pub fn generate_rub_out_toolpaths(
    layer: &GerberLayer,
    request: &TraceMillingRequest,
    control: &GenerationControl,
) -> Result<TraceMillingResult> {
    let settings = &request.settings;
    settings.validate().context("invalid milling settings")?;
    let key = request.rub_out_key();
    let mut cache = load_cache(layer, request);
    if let Some(toolpaths) = cache.get(&key) {
        info!(toolpaths = toolpaths.len(), "using cached rub-out toolpaths");
        return Ok(cached_result(toolpaths.to_vec(), settings));
    }

    let Some(area) = request.area.or_else(|| layer.bounds(0)) else {
        info!("layer has no primitives, nothing to rub out");
        return Ok(TraceMillingResult::default());
    };

    control.enter(GenerationStage::RubOut);
    let toolpaths = RubOutToolpathGenerator::new(
        layer,
        area,
        settings.rub_out_initial_offset,
        settings.tool_diameter,
        settings.rub_out_overlap,
        settings.tiling_config(),
    )
    .generate(&control.cancel, &control.progress)
    .context("generate rub-out toolpaths")?;
    if toolpaths.is_empty() {
        info!("no rub-out toolpaths generated");
        return Ok(TraceMillingResult::default());
    }
    let toolpaths = ToolpathMerger::new(settings.merge_tolerance()).merge(toolpaths);

    finish(layer, request, key, &mut cache, toolpaths, control)
}

fn load_cache(layer: &GerberLayer, request: &TraceMillingRequest) -> ToolpathsCache {
    match &request.cache_path {
        Some(path) => ToolpathsCache::load_for_source(path, layer.source_modified),
        None => ToolpathsCache::new(),
    }
}

fn cached_result(toolpaths: Vec<Toolpath>, settings: &MillingSettings) -> TraceMillingResult {
    let chains = Chain::split_continuous(toolpaths.clone());
    TraceMillingResult {
        estimated_duration: TimeEstimator::total_duration(&chains, &settings.to_motion_parameters()),
        toolpaths,
        chains,
        from_cache: true,
    }
}

/// Chain, order and store merged toolpaths.
fn finish(
    layer: &GerberLayer,
    request: &TraceMillingRequest,
    key: ToolpathsCacheKey,
    cache: &mut ToolpathsCache,
    toolpaths: Vec<Toolpath>,
    control: &GenerationControl,
) -> Result<TraceMillingResult> {
    let settings = &request.settings;
    let motion = settings.to_motion_parameters();
    let chains = ChainDetector::new(settings.merge_tolerance()).detect(toolpaths);

    control.enter(GenerationStage::Optimizing);
    let optimizer = Optimizer::new(chains, motion)
        .with_seed(OPTIMIZER_SEED)
        .with_max_iterations(settings.optimizer_iterations)
        .with_progress(control.progress.clone())
        .with_cancellation(control.cancel.clone());
    let chains = optimizer.optimize();
    control.check_cancelled()?;

    let toolpaths: Vec<Toolpath> = chains
        .iter()
        .flat_map(|chain| chain.segments().iter().copied())
        .collect();
    let estimated_duration = TimeEstimator::total_duration(&chains, &motion);
    info!(
        toolpaths = toolpaths.len(),
        chains = chains.len(),
        estimated = %format_duration(estimated_duration),
        "toolpaths ready"
    );

    if let Some(path) = &request.cache_path {
        cache.insert(key, toolpaths.clone());
        cache.set_last_modified(layer.source_modified.unwrap_or_default());
        if let Err(err) = cache.save_to_path(path) {
            warn!("could not save toolpath cache: {err:#}");
        }
    }
    control.enter(GenerationStage::Done);
    control.progress.advance(1.0);

    Ok(TraceMillingResult {
        toolpaths,
        chains,
        estimated_duration,
        from_cache: false,
    })
}

/// Render seconds as `HH:MM:SS`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(59.9), "00:00:59");
        assert_eq!(format_duration(3723.0), "01:02:03");
        assert_eq!(format_duration(-5.0), "00:00:00");
    }

    #[test]
    fn test_keys_separate_trace_and_rub_out() {
        let request = TraceMillingRequest::new(1, MillingSettings::default());
        assert_ne!(request.trace_key(), request.rub_out_key());
        assert_eq!(request.trace_key().rub_out_overlap, 0);
        assert_eq!(request.rub_out_key().additional_passes_overlap, 0);
    }

    #[test]
    fn test_empty_layer_generates_nothing() {
        let result = generate_trace_toolpaths(
            &GerberLayer::default(),
            &TraceMillingRequest::new(1, MillingSettings::default()),
            &GenerationControl::new(),
        )
        .unwrap();
        assert!(result.is_empty());
        assert!(!result.from_cache);
    }

    #[test]
    fn test_invalid_settings_are_fatal() {
        let settings = MillingSettings {
            tool_diameter: 0,
            ..MillingSettings::default()
        };
        let err = generate_trace_toolpaths(
            &GerberLayer::default(),
            &TraceMillingRequest::new(1, settings),
            &GenerationControl::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("tool_diameter"));
    }

    #[test]
    fn test_cancelled_run_fails() {
        let layer = crate::gerber::GerberParser::new()
            .parse_str("%MOMM*%%FSLAX24Y24*%%ADD10C,0.2*%D10*X0Y0D02*X50000Y0D01*M02*")
            .unwrap();
        let control = GenerationControl::new();
        control.cancel.cancel();
        let err = generate_trace_toolpaths(&layer, &TraceMillingRequest::new(1, MillingSettings::default()), &control)
            .unwrap_err();
        assert!(
            matches!(err.downcast_ref::<GenerationError>(), Some(GenerationError::Cancelled)),
            "{err:#}"
        );
    }
}
