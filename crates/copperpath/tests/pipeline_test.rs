use copperpath::*;
use std::fs;

const PAD_LAYER: &str = "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,1.0*%\nD10*\nX20000Y20000D03*\nM02*";

const BOARD_LAYER: &str = "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,1.0*%\n%ADD11C,0.3*%\n%ADD12R,1.0X0.6*%\n\
    D10*\nX20000Y20000D03*\nX60000Y20000D03*\n\
    D11*\nX20000Y20000D02*\nX60000Y20000D01*\nX60000Y45000D01*\n\
    D12*\nX40000Y45000D03*\nM02*";

fn parse(input: &str) -> GerberLayer {
    GerberParser::new().parse_str(input).unwrap()
}

fn settings() -> MillingSettings {
    MillingSettings {
        tool_diameter: 200,
        threads: 2,
        window_size: 1000,
        optimizer_iterations: 2_000,
        ..MillingSettings::default()
    }
}

#[test]
fn test_single_line_survives_merging() {
    let line = Toolpath::linear(Point::new(0, 0), Point::new(0, 1000), 200);
    let merged = ToolpathMerger::new(50).merge(vec![line]);
    assert_eq!(merged, vec![line], "A lone line should pass through untouched");

    let chains = ChainDetector::new(50).detect(merged);
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].start(), Point::new(0, 0));
    assert_eq!(chains[0].end(), Point::new(0, 1000));
}

#[test]
fn test_circle_across_tile_seam_is_one_chain() {
    let layer = parse(PAD_LAYER);
    let settings = settings();
    let area = layer.bounds(settings.tool_diameter / 2).unwrap();
    let generator = ToolpathGenerator::new(&layer, area, 100, 200, settings.tiling_config());
    assert!(
        generator.tiles().len() > 1,
        "The pad should straddle a tile boundary"
    );

    let result = generate_trace_toolpaths(
        &layer,
        &TraceMillingRequest::new(0, settings.clone()),
        &GenerationControl::new(),
    )
    .unwrap();

    assert_eq!(
        result.chains.len(),
        1,
        "Pieces from neighbouring tiles should join into one chain: {:?}",
        result.chains
    );
    let chain = &result.chains[0];
    assert!(
        chain.start().distance_to(chain.end()) <= settings.merge_tolerance() as f64,
        "The isolation ring should close on itself"
    );
    for toolpath in &result.toolpaths {
        let r = toolpath.from().distance_to(Point::new(2000, 2000));
        assert!((r - 600.0).abs() <= 2.0, "endpoint off the ring ({r})");
    }
}

#[test]
fn test_generation_is_deterministic() {
    let layer = parse(BOARD_LAYER);
    let request = TraceMillingRequest::new(0, settings());

    let first = generate_trace_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();
    let second = generate_trace_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();

    assert!(!first.is_empty(), "The board should produce toolpaths");
    assert_eq!(first.toolpaths, second.toolpaths, "Runs on the same input must match exactly");
    assert_eq!(first.estimated_duration, second.estimated_duration);
}

#[test]
fn test_chains_are_continuous_and_cover_toolpaths() {
    let layer = parse(BOARD_LAYER);
    let result = generate_trace_toolpaths(
        &layer,
        &TraceMillingRequest::new(0, settings()),
        &GenerationControl::new(),
    )
    .unwrap();

    let flattened: Vec<Toolpath> = result
        .chains
        .iter()
        .flat_map(|c| c.segments().iter().copied())
        .collect();
    assert_eq!(flattened, result.toolpaths, "Toolpaths are the chains in cutting order");
    for chain in &result.chains {
        assert!(Chain::new(chain.segments().to_vec()).is_some(), "Chain has a gap");
    }
    let expected = TimeEstimator::total_duration(&result.chains, &settings().to_motion_parameters());
    assert!((result.estimated_duration - expected).abs() < 1e-9);
}

#[test]
fn test_additional_passes_add_toolpaths() {
    let layer = parse(PAD_LAYER);
    let single = generate_trace_toolpaths(
        &layer,
        &TraceMillingRequest::new(0, settings()),
        &GenerationControl::new(),
    )
    .unwrap();

    for pads_only in [false, true] {
        let request = TraceMillingRequest::new(
            0,
            MillingSettings {
                additional_passes: 1,
                additional_passes_pads_only: pads_only,
                ..settings()
            },
        );
        let extra = generate_trace_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();
        let farthest = extra
            .toolpaths
            .iter()
            .map(|t| t.from().distance_to(Point::new(2000, 2000)))
            .fold(0.0, f64::max);
        assert!(
            extra.toolpaths.len() > single.toolpaths.len(),
            "An extra pass (pads only: {pads_only}) should add toolpaths"
        );
        assert!(
            farthest > 700.0,
            "The extra ring (pads only: {pads_only}) should lie outside the first one, got {farthest}"
        );
    }
}

#[test]
fn test_rub_out_rows_are_horizontal() {
    let layer = parse(PAD_LAYER);
    let area = Bounds::new(Point::new(1000, 1000), Point::new(3000, 3000));
    let request = TraceMillingRequest::new(0, settings()).with_area(area);
    let result = generate_rub_out_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();

    assert!(!result.is_empty(), "The copper around the pad should be cleared");
    for toolpath in &result.toolpaths {
        assert_eq!(toolpath.from().y, toolpath.to().y, "Rub-out rows run along X");
        let y = toolpath.from().y;
        let (a, b) = (
            toolpath.from().x.min(toolpath.to().x),
            toolpath.from().x.max(toolpath.to().x),
        );
        let nearest = Point::new(2000_i32.clamp(a, b), y);
        let clearance = nearest.distance_to(Point::new(2000, 2000));
        assert!(
            clearance >= 590.0,
            "Row at y={y} ({a}..{b}) comes within {clearance} of the pad center"
        );
    }
}

#[test]
fn test_cache_is_reused_until_settings_change() {
    let dir = tempfile::tempdir().unwrap();
    let layer_path = dir.path().join("top.gtl");
    fs::write(&layer_path, BOARD_LAYER).unwrap();
    let layer = GerberParser::parse_file(&layer_path).unwrap();
    let cache_path = cache_path_for(&layer_path);

    let request = TraceMillingRequest::new(0, settings()).with_cache_path(&cache_path);
    let fresh = generate_trace_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();
    assert!(!fresh.from_cache);
    assert!(cache_path.exists(), "The cache file should be written next to the layer");

    let cached = generate_trace_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();
    assert!(cached.from_cache, "An unchanged layer should hit the cache");
    assert_eq!(cached.toolpaths, fresh.toolpaths);
    assert_eq!(cached.chains, fresh.chains, "A cache hit must cut in the same order");
    assert_eq!(cached.estimated_duration, fresh.estimated_duration);

    let changed = TraceMillingRequest::new(
        0,
        MillingSettings {
            tool_diameter: 250,
            ..settings()
        },
    )
    .with_cache_path(&cache_path);
    let regenerated = generate_trace_toolpaths(&layer, &changed, &GenerationControl::new()).unwrap();
    assert!(!regenerated.from_cache, "A different tool must not reuse cached paths");
}

#[test]
fn test_cached_chains_match_junction_order() {
    let dir = tempfile::tempdir().unwrap();
    let layer_path = dir.path().join("top.gtl");
    fs::write(&layer_path, PAD_LAYER).unwrap();
    let layer = GerberParser::parse_file(&layer_path).unwrap();
    let cache_path = cache_path_for(&layer_path);
    let settings = settings();
    let request = TraceMillingRequest::new(0, settings.clone()).with_cache_path(&cache_path);

    // Three segments meet at (1000, 0); the branch was cut first.
    let branch = Toolpath::linear(Point::new(1000, 0), Point::new(1000, 1000), 200);
    let run = vec![
        Toolpath::linear(Point::new(0, 0), Point::new(1000, 0), 200),
        Toolpath::linear(Point::new(1000, 0), Point::new(2000, 0), 200),
    ];
    let ordered = vec![Chain::single(branch), Chain::new(run.clone()).unwrap()];
    let mut cache = ToolpathsCache::new();
    cache.set_last_modified(layer.source_modified.unwrap());
    cache.insert(request.trace_key(), vec![branch, run[0], run[1]]);
    cache.save_to_path(&cache_path).unwrap();

    let result = generate_trace_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();
    assert!(result.from_cache);
    assert_eq!(result.chains, ordered, "Chains come back exactly as they were stored");
    assert_eq!(
        result.estimated_duration,
        TimeEstimator::total_duration(&ordered, &settings.to_motion_parameters())
    );
    let machine = settings.to_machine_parameters();
    assert_eq!(post_process(&result.chains, &machine), post_process(&ordered, &machine));
}

#[test]
fn test_corrupt_cache_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let layer_path = dir.path().join("top.gtl");
    fs::write(&layer_path, PAD_LAYER).unwrap();
    let cache_path = cache_path_for(&layer_path);
    fs::write(&cache_path, "{ not json").unwrap();

    let layer = GerberParser::parse_file(&layer_path).unwrap();
    let request = TraceMillingRequest::new(0, settings()).with_cache_path(&cache_path);
    let result = generate_trace_toolpaths(&layer, &request, &GenerationControl::new()).unwrap();
    assert!(!result.from_cache);
    assert!(!result.is_empty());

    let rewritten = ToolpathsCache::load_from_path(&cache_path).unwrap();
    assert_eq!(rewritten.len(), 1, "The corrupt file should be replaced");
}

#[test]
fn test_progress_and_stage_after_run() {
    let layer = parse(PAD_LAYER);
    let control = GenerationControl::new();
    generate_trace_toolpaths(&layer, &TraceMillingRequest::new(0, settings()), &control).unwrap();
    assert_eq!(control.stage(), GenerationStage::Done);
    assert_eq!(control.progress.get(), 1.0);
}

#[test]
fn test_program_for_generated_chains() {
    let layer = parse(PAD_LAYER);
    let settings = settings();
    let result =
        generate_trace_toolpaths(&layer, &TraceMillingRequest::new(0, settings.clone()), &GenerationControl::new())
            .unwrap();
    let program = post_process(&result.chains, &settings.to_machine_parameters()).to_program();

    assert!(program.starts_with("G90\nG21\nG17\nM03 S12000\n"));
    assert!(program.ends_with("M05\n"));
    assert_eq!(
        program.matches("G01 Z-0.045").count(),
        result.chains.len(),
        "One plunge per chain"
    );
}
