use copperpath::*;
use std::fs;

#[test]
fn test_bad_statements_become_diagnostics() {
    let layer = GerberParser::new()
        .parse_str(
            "%FSLAX24Y24*%\n%MOMM*%\n%ADD10C,0.2*%\n%ADD11P,1.0X6*%\n%XYZ*%\n\
             D10*\nG99*\nX0Y0D02*\nX10000Y0D01*\nD42*\nX20000Y0D01*\nM02*",
        )
        .expect("statement errors should not abort the parse");

    assert_eq!(layer.primitives.len(), 2, "Good statements are still used");
    assert_eq!(
        layer.diagnostics.len(),
        4,
        "Unsupported aperture, unknown parameter, unknown G code and undefined aperture: {:?}",
        layer.diagnostics
    );
    assert!(layer.diagnostics.iter().any(|d| d.contains("undefined aperture used: D42")));
}

#[test]
fn test_missing_layer_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = GerberParser::parse_file(dir.path().join("missing.gbr")).unwrap_err();
    assert!(matches!(err, GerberError::Io(_)), "Got {err:?}");
    assert!(err.is_fatal());
}

#[test]
fn test_invalid_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    fs::write(&path, r#"{"tool_diameter": -5}"#).unwrap();
    let err = MillingSettings::load_from_path(&path).unwrap_err();
    assert!(
        format!("{err:#}").contains("tool_diameter must be positive"),
        "Error should name the setting: {err:#}"
    );

    fs::write(&path, r#"{"feed_xy": "fast"}"#).unwrap();
    let err = MillingSettings::load_from_path(&path).unwrap_err();
    assert!(
        format!("{err:#}").contains("deserialize milling settings"),
        "Unparsable values are fatal: {err:#}"
    );
}

#[test]
fn test_settings_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");
    let settings = MillingSettings {
        tool_diameter: 250,
        additional_passes: 2,
        ..MillingSettings::default()
    };

    settings.save_to_path(&path).unwrap();
    assert_eq!(MillingSettings::load_from_path(&path).unwrap(), settings);
    assert_eq!(
        MillingSettings::load_from_path(dir.path().join("absent.json")).unwrap(),
        MillingSettings::default(),
        "A missing settings file means defaults"
    );
}

#[test]
fn test_generation_error_messages() {
    assert_eq!(GenerationError::Cancelled.to_string(), "generation cancelled");
    assert_eq!(
        GenerationError::Tile {
            index: 3,
            message: "boom".into()
        }
        .to_string(),
        "tile 3 failed: boom"
    );
}
