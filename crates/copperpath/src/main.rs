use anyhow::{Context, Result};
use copperpath::*;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let rub_out = args.iter().any(|a| a == "--rub-out");
    let paths: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| !a.starts_with("--"))
        .collect();

    match paths.as_slice() {
        [layer] => exit_on_error(run(Path::new(layer), None, rub_out)),
        [layer, settings] => exit_on_error(run(Path::new(layer), Some(Path::new(settings)), rub_out)),
        _ => {
            println!("Usage: copperpath [--rub-out] <layer.gbr> [settings.json]");
            println!("  layer.gbr      - Gerber copper layer to isolate");
            println!("  settings.json  - Milling settings (default ~/.copperpath/settings.json)");
            println!("  --rub-out      - Clear the copper around the traces instead");
        }
    }
}

fn exit_on_error(result: Result<()>) {
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(layer_path: &Path, settings_path: Option<&Path>, rub_out: bool) -> Result<()> {
    let settings_path = match settings_path {
        Some(path) => path.to_path_buf(),
        None => MillingSettings::default_settings_path()?,
    };
    let settings = MillingSettings::load_from_path(&settings_path)?;
    let layer = GerberParser::parse_file(layer_path)
        .with_context(|| format!("parse gerber layer {}", layer_path.display()))?;

    let request = TraceMillingRequest::new(0, settings.clone()).with_cache_path(cache_path_for(layer_path));
    let control = GenerationControl::new();
    let result = if rub_out {
        generate_rub_out_toolpaths(&layer, &request, &control)?
    } else {
        generate_trace_toolpaths(&layer, &request, &control)?
    };

    let gcode = post_process(&result.chains, &settings.to_machine_parameters());
    print!("{}", gcode.to_program());
    eprintln!(
        "Estimated machining time: {}",
        format_duration(result.estimated_duration)
    );
    Ok(())
}
