//! # Pipeline
//!
//! Drives a boundary layer from a GeoJSON FeatureCollection to the renderer's
//! flattened MultiPolygon text.
//!
//! **How it Works**:
//! 1. Parse the collection; anything other than Polygon/MultiPolygon aborts.
//! 2. If there is more than one feature (or `always_merge` is set), union every
//!    polygon of every feature into one feature with empty properties.
//! 3. Simplify each feature under the configured tolerance. Features without
//!    an id are labelled `"UNKNOWN"`; this is the intermediate collection.
//! 4. Flatten each feature's rings and pretty-print one object per feature.
//!
//! Every output string is built in memory first and written atomically, so a
//! failing run leaves no partial file behind. A directory input runs the same
//! steps for each `.geojson` file in parallel.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use geo_types::Polygon;
use geojson::feature::Id;
use geojson::FeatureCollection;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config;
use crate::error::{Error, Result};
use crate::feature::{parse_feature_collection, to_feature_collection, Feature};
use crate::flatten::{flatten, render, FlatFeature};
use crate::geom::{ring_count, vertex_count};
use crate::merge::merge_with_snap;
use crate::settings::Settings;
use crate::simplify::simplify_with;

#[cfg(test)]
mod tests {

    use super::*;
    use geo::Area;
    use serde_json::{json, Value};

    const OVERLAPPING: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "id": 1, "properties": {"name": "west"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type": "Feature", "id": 2, "properties": {"name": "east"},
         "geometry": {"type": "Polygon", "coordinates": [[[0.5,0],[1.5,0],[1.5,1],[0.5,1],[0.5,0]]]}}
    ]}"#;

    const SINGLE: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "id": "tokyo", "properties": {"name": "Tokyo"},
         "geometry": {"type": "Polygon", "coordinates": [
            [[0,0],[2,0],[4,0],[4,4],[0,4],[0,0]],
            [[1,1],[1,2],[2,2],[2,1],[1,1]]
         ]}}
    ]}"#;

    fn features(text: &str) -> Vec<Feature> {
        parse_feature_collection(text).unwrap()
    }

    #[test]
    fn several_features_are_merged_into_one() {
        let processed = process_collection(features(OVERLAPPING), &Settings::default()).unwrap();
        assert_eq!(processed.features.len(), 1);

        let merged = &processed.features[0];
        assert_eq!(merged.id, Some(Id::String(config::UNKNOWN_FEATURE_ID.into())));
        assert!(merged.properties.is_empty());
        assert_eq!(merged.geometry.0.len(), 1);
        assert!((merged.geometry.unsigned_area() - 1.5).abs() < 1e-9);

        assert!(processed.stats.merged);
        assert_eq!(processed.stats.input_features, 2);
        assert_eq!(processed.stats.output_rings, 1);
    }

    #[test]
    fn single_feature_keeps_its_payload() {
        let processed = process_collection(features(SINGLE), &Settings::default()).unwrap();
        assert!(!processed.stats.merged);

        let feature = &processed.features[0];
        assert_eq!(feature.id, Some(Id::String("tokyo".into())));
        assert_eq!(feature.properties["name"], json!("Tokyo"));
        // the colinear (2,0) is gone, the hole stays
        assert_eq!(feature.geometry.0[0].exterior().0.len(), 5);
        assert_eq!(feature.geometry.0[0].interiors().len(), 1);
    }

    #[test]
    fn always_merge_unions_a_single_feature() {
        let settings = Settings {
            always_merge: true,
            ..Settings::default()
        };
        let processed = process_collection(features(SINGLE), &settings).unwrap();
        assert!(processed.stats.merged);
        assert!(processed.features[0].properties.is_empty());
        assert!((processed.features[0].geometry.unsigned_area() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn missing_ids_become_unknown() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}}
        ]}"#;
        let processed = process_collection(features(text), &Settings::default()).unwrap();
        assert_eq!(processed.features[0].id, Some(Id::String("UNKNOWN".into())));
    }

    #[test]
    fn empty_collection_produces_empty_output() {
        let text = r#"{"type": "FeatureCollection", "features": []}"#;
        let output = process_text(text, &Settings::default()).unwrap();
        assert!(output.text.is_empty());
        assert!(output.processed.features.is_empty());
    }

    #[test]
    fn transformed_text_drops_payload() {
        let output = process_text(SINGLE, &Settings::default()).unwrap();
        let value: Value = serde_json::from_str(&output.text).unwrap();
        assert_eq!(value["properties"], json!({}));
        assert!(value.get("id").is_none());
        assert_eq!(value["geometry"]["coordinates"][0].as_array().unwrap().len(), 2);
    }

    #[test]
    fn intermediate_collection_is_standard_geojson() {
        let output = process_text(SINGLE, &Settings::default()).unwrap();
        let value = serde_json::to_value(intermediate_collection(&output.processed.features)).unwrap();
        assert_eq!(value["type"], json!("FeatureCollection"));
        assert_eq!(value["features"][0]["id"], json!("tokyo"));
        // polygon -> rings -> positions
        assert_eq!(value["features"][0]["geometry"]["coordinates"][0].as_array().unwrap().len(), 2);
    }

    #[test]
    fn atomic_write_replaces_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.geojson");
        std::fs::write(&path, "old").unwrap();
        write_atomic(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("line.geojson");
        let output = dir.path().join("out.geojson");
        std::fs::write(
            &input,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}}
            ]}"#,
        )
        .unwrap();

        let result = run_file(&input, Some(output.as_path()), None, &Settings::default());
        assert!(matches!(result, Err(Error::UnsupportedGeometry(_))));
        assert!(!output.exists());
    }

    #[test]
    fn failed_output_write_leaves_no_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.geojson");
        let output = dir.path().join("taken");
        let intermediate = dir.path().join("intermediate.geojson");
        std::fs::write(&input, SINGLE).unwrap();
        // a directory cannot be replaced by the output file
        std::fs::create_dir(&output).unwrap();

        let result = run_file(
            &input,
            Some(output.as_path()),
            Some(intermediate.as_path()),
            &Settings::default(),
        );
        assert!(matches!(result, Err(Error::Io { .. })));
        assert!(!intermediate.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn failed_intermediate_write_removes_the_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.geojson");
        let output = dir.path().join("out.geojson");
        let intermediate = dir.path().join("taken");
        std::fs::write(&input, SINGLE).unwrap();
        std::fs::create_dir(&intermediate).unwrap();

        let result = run_file(
            &input,
            Some(output.as_path()),
            Some(intermediate.as_path()),
            &Settings::default(),
        );
        assert!(matches!(result, Err(Error::Io { .. })));
        assert!(!output.exists());
        assert!(intermediate.is_dir());
    }

    #[test]
    fn batch_processes_every_geojson_file() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("a.geojson"), OVERLAPPING).unwrap();
        std::fs::write(input.path().join("b.geojson"), SINGLE).unwrap();
        std::fs::write(input.path().join("notes.txt"), "skip me").unwrap();

        let stats = run_batch(input.path(), output.path(), None, &Settings::default()).unwrap();
        assert_eq!(stats.len(), 2);
        assert!(output.path().join("a.geojson").exists());
        assert!(output.path().join("b.geojson").exists());
        assert!(!output.path().join("notes.txt").exists());
    }
}

/// Counts gathered over one run, logged when it completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub input_features: usize,
    pub input_polygons: usize,
    pub input_rings: usize,
    pub input_vertices: usize,
    pub output_features: usize,
    pub output_rings: usize,
    pub output_vertices: usize,
    pub merged: bool,
}

impl PipelineStats {
    fn record_input(&mut self, features: &[Feature]) {
        self.input_features = features.len();
        for feature in features {
            self.input_polygons += feature.geometry.0.len();
            self.input_rings += ring_count(&feature.geometry);
            self.input_vertices += vertex_count(&feature.geometry);
        }
    }

    fn record_output(&mut self, features: &[Feature]) {
        self.output_features = features.len();
        self.output_rings = features.iter().map(|f| ring_count(&f.geometry)).sum();
        self.output_vertices = features.iter().map(|f| vertex_count(&f.geometry)).sum();
    }
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} features ({} polygons, {} rings, {} vertices) -> {} features ({} rings, {} vertices){}",
            self.input_features,
            self.input_polygons,
            self.input_rings,
            self.input_vertices,
            self.output_features,
            self.output_rings,
            self.output_vertices,
            if self.merged { ", merged" } else { "" }
        )
    }
}

/// The merged and simplified features, before flattening.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedCollection {
    pub features: Vec<Feature>,
    pub stats: PipelineStats,
}

/// Everything a run produces, held in memory until it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub text: String,
    pub processed: ProcessedCollection,
}

/// Merges (when needed) and simplifies parsed features.
pub fn process_collection(features: Vec<Feature>, settings: &Settings) -> Result<ProcessedCollection> {
    let mut stats = PipelineStats::default();
    stats.record_input(&features);

    let merged = features.len() > 1 || (settings.always_merge && !features.is_empty());
    let staged = if merged {
        let polygons: Vec<Polygon<f64>> = features
            .into_iter()
            .flat_map(|feature| feature.geometry.0)
            .collect();
        let start = Instant::now();
        let union = merge_with_snap(&polygons, settings.snap_distance)?;
        info!(
            inputs = polygons.len(),
            outputs = union.0.len(),
            elapsed = ?start.elapsed(),
            "merged polygons"
        );
        vec![Feature::new(union)]
    } else {
        features
    };
    stats.merged = merged;

    let start = Instant::now();
    let simplified = staged
        .into_iter()
        .map(|feature| {
            let geometry = simplify_with(&feature.geometry, settings.tolerance, settings.backoff())?;
            Ok(Feature {
                id: Some(
                    feature
                        .id
                        .unwrap_or_else(|| Id::String(config::UNKNOWN_FEATURE_ID.to_string())),
                ),
                properties: feature.properties,
                geometry,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    stats.record_output(&simplified);
    info!(
        tolerance = settings.tolerance,
        vertices_before = stats.input_vertices,
        vertices_after = stats.output_vertices,
        elapsed = ?start.elapsed(),
        "simplified features"
    );

    Ok(ProcessedCollection {
        features: simplified,
        stats,
    })
}

/// Flattens each feature and renders the newline-joined output text.
/// Ids and properties are not written.
pub fn transform_features(features: &[Feature]) -> Result<String> {
    let flat: Vec<FlatFeature> = features
        .iter()
        .map(|feature| FlatFeature::new(flatten(&feature.geometry)))
        .collect();
    render(&flat)
}

/// The intermediate collection as standard GeoJSON.
pub fn intermediate_collection(features: &[Feature]) -> FeatureCollection {
    to_feature_collection(features)
}

/// Runs the whole pipeline on GeoJSON text.
pub fn process_text(text: &str, settings: &Settings) -> Result<PipelineOutput> {
    let features = parse_feature_collection(text)?;
    debug!(features = features.len(), "parsed collection");
    let processed = process_collection(features, settings)?;
    let text = transform_features(&processed.features)?;
    Ok(PipelineOutput { text, processed })
}

/// Writes `contents` to a temporary file next to `path`. Dropping the file
/// without committing it removes it.
fn stage(path: &Path, contents: &str) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir).map_err(|e| Error::io(path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| Error::io(path, e))?;
    Ok(file)
}

/// Moves a staged file into place.
fn commit(file: NamedTempFile, path: &Path) -> Result<()> {
    file.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Writes `contents` to a temporary file next to `path` and moves it into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    commit(stage(path, contents)?, path)
}

/// Processes one file. Without an output path the text goes to standard output.
pub fn run_file(
    input: &Path,
    output: Option<&Path>,
    intermediate: Option<&Path>,
    settings: &Settings,
) -> Result<PipelineStats> {
    let text = std::fs::read_to_string(input).map_err(|e| Error::io(input, e))?;
    let result = process_text(&text, settings)?;

    // Both files are staged before either is moved into place
    let staged_intermediate = match intermediate {
        Some(path) => {
            let contents =
                serde_json::to_string_pretty(&intermediate_collection(&result.processed.features))?;
            Some((path, stage(path, &contents)?))
        }
        None => None,
    };
    let staged_output = match output {
        Some(path) => Some((path, stage(path, &result.text)?)),
        None => None,
    };

    match staged_output {
        Some((path, file)) => {
            commit(file, path)?;
            if let Some((side, file)) = staged_intermediate {
                if let Err(e) = commit(file, side) {
                    // the output is only kept together with its intermediate
                    let _ = std::fs::remove_file(path);
                    return Err(e);
                }
                info!(path = %side.display(), "wrote intermediate collection");
            }
            info!(path = %path.display(), "wrote output");
        }
        None => {
            if let Some((side, file)) = staged_intermediate {
                commit(file, side)?;
                info!(path = %side.display(), "wrote intermediate collection");
            }
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", result.text).map_err(|e| Error::io("<stdout>", e))?;
        }
    }

    info!(input = %input.display(), "{}", result.processed.stats);
    Ok(result.processed.stats)
}

/// `.geojson` files directly inside `dir`, sorted by name.
fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        let is_geojson = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(config::GEOJSON_EXTENSION));
        if path.is_file() && is_geojson {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// Processes every `.geojson` file of `input_dir` in parallel into
/// `output_dir`, keeping file names. Stops at the first failing file; files
/// already written for other inputs stay.
pub fn run_batch(
    input_dir: &Path,
    output_dir: &Path,
    intermediate_dir: Option<&Path>,
    settings: &Settings,
) -> Result<Vec<PipelineStats>> {
    let inputs = collect_inputs(input_dir)?;
    std::fs::create_dir_all(output_dir).map_err(|e| Error::io(output_dir, e))?;
    if let Some(dir) = intermediate_dir {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    info!(files = inputs.len(), dir = %input_dir.display(), "processing directory");

    let start = Instant::now();
    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg} ETA: {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▇▆▅▄▃▂▁"),
    );
    pb.set_message("files".to_string());

    let stats = inputs
        .par_iter()
        .map(|input| {
            let name = input.file_name().unwrap_or_default();
            let intermediate = intermediate_dir.map(|dir| dir.join(name));
            let stats = run_file(
                input,
                Some(output_dir.join(name).as_path()),
                intermediate.as_deref(),
                settings,
            );
            pb.inc(1);
            stats
        })
        .collect::<Result<Vec<_>>>();
    pb.finish_and_clear();

    let stats = stats?;
    info!(files = stats.len(), elapsed = ?start.elapsed(), "directory done");
    Ok(stats)
}

/// Dispatches on the configured input: a directory runs in batch mode.
pub fn run(settings: &Settings) -> Result<()> {
    let input = settings
        .input
        .as_deref()
        .ok_or_else(|| Error::Settings("no input path".to_string()))?;

    if input.is_dir() {
        let output = settings.output.as_deref().ok_or_else(|| {
            Error::Settings("a directory input needs an output directory".to_string())
        })?;
        if output.is_file() {
            return Err(Error::Settings(format!(
                "{} is a file, expected a directory",
                output.display()
            )));
        }
        run_batch(input, output, settings.intermediate.as_deref(), settings)?;
    } else {
        run_file(
            input,
            settings.output.as_deref(),
            settings.intermediate.as_deref(),
            settings,
        )?;
    }
    Ok(())
}
