use anyhow::{ensure, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config as defaults;
use crate::simplify::Backoff;


/// Runtime configuration for a run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    /// Input FeatureCollection, or a directory of them.
    #[serde(default)]
    pub input: Option<PathBuf>,
    /// Output file (or directory in batch mode). Standard output when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Where to write the merged and simplified collection as plain GeoJSON.
    #[serde(default)]
    pub intermediate: Option<PathBuf>,
    pub tolerance: f64,
    pub snap_distance: f64,
    pub min_tolerance: f64,
    pub max_halvings: u32,
    /// Run the union even for a single feature.
    pub always_merge: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            intermediate: None,
            tolerance: defaults::DEFAULT_TOLERANCE,
            snap_distance: defaults::VERTEX_SNAP_DISTANCE,
            min_tolerance: defaults::MIN_TOLERANCE,
            max_halvings: defaults::MAX_TOLERANCE_HALVINGS,
            always_merge: false,
        }
    }
}

impl Settings {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            min_tolerance: self.min_tolerance,
            max_halvings: self.max_halvings,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.input.is_some(), "no input given, use --input <path>");
        ensure!(
            self.tolerance.is_finite() && self.tolerance >= 0.0,
            "tolerance must be a non-negative number, got {}",
            self.tolerance
        );
        ensure!(
            self.snap_distance.is_finite() && self.snap_distance >= 0.0,
            "snap distance must be a non-negative number, got {}",
            self.snap_distance
        );
        ensure!(
            self.min_tolerance.is_finite() && self.min_tolerance > 0.0,
            "minimum tolerance must be positive, got {}",
            self.min_tolerance
        );
        Ok(())
    }
}

/// Loads settings for the binary: parses the command line and layers it over
/// the configuration files and `RINGFOLD_*` environment variables.
pub fn load_config() -> Result<Settings> {
    let args = CliArgs::parse();
    let settings = load_settings_from(&retrieve_project_root(), &args)?;
    settings.validate()?;
    Ok(settings)
}

/// Builds settings from `root/config/*.toml` (or `args.config`), the
/// environment and `args`, in increasing order of precedence.
pub fn load_settings_from(root: &Path, args: &CliArgs) -> Result<Settings> {
    let base = Settings::default();
    let mut builder = Config::builder()
        .set_default("tolerance", base.tolerance)?
        .set_default("snap_distance", base.snap_distance)?
        .set_default("min_tolerance", base.min_tolerance)?
        .set_default("max_halvings", i64::from(base.max_halvings))?
        .set_default("always_merge", base.always_merge)?;

    builder = match &args.config {
        Some(path) => builder.add_source(File::from(path.as_path()).required(true)),
        None => {
            let local_config = root.join("config/local.toml");
            let config_file = if local_config.exists() {
                local_config
            } else {
                root.join("config/default.toml")
            };
            tracing::debug!(path = %config_file.display(), "configuration file");
            builder.add_source(File::from(config_file).required(false))
        }
    };

    let mut settings: Settings = builder
        .add_source(Environment::with_prefix("RINGFOLD").try_parsing(true))
        .build()
        .context("loading configuration")?
        .try_deserialize()
        .context("deserializing configuration")?;

    // Command-line arguments override everything else
    if let Some(input) = &args.input {
        settings.input = Some(input.clone());
    }
    if let Some(output) = &args.output {
        settings.output = Some(output.clone());
    }
    if let Some(intermediate) = &args.intermediate {
        settings.intermediate = Some(intermediate.clone());
    }
    if let Some(tolerance) = args.tolerance {
        settings.tolerance = tolerance;
    }
    if let Some(snap) = args.snap {
        settings.snap_distance = snap;
    }
    if let Some(min_tolerance) = args.min_tolerance {
        settings.min_tolerance = min_tolerance;
    }
    if let Some(max_halvings) = args.max_halvings {
        settings.max_halvings = max_halvings;
    }
    if args.always_merge {
        settings.always_merge = true;
    }

    Ok(settings)
}

/// The directory holding `config/`: `RINGFOLD_ROOT_DIR` if set, otherwise
/// the working directory.
fn retrieve_project_root() -> PathBuf {
    match env::var("RINGFOLD_ROOT_DIR") {
        Ok(path) => PathBuf::from(path),
        Err(_) => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "ringfold - merge, simplify and flatten GeoJSON polygon layers"
)]
pub struct CliArgs {
    /// Input GeoJSON FeatureCollection. A directory processes every .geojson file in it.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output path. Must be a directory when the input is one.
    /// Without it the result is written to standard output.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Simplification tolerance, in the input's linear units.
    #[arg(short, long)]
    pub tolerance: Option<f64>,

    /// Distance under which two vertices are treated as one during the union.
    #[arg(long)]
    pub snap: Option<f64>,

    /// Smallest tolerance tried when a simplified ring breaks topology.
    #[arg(long)]
    pub min_tolerance: Option<f64>,

    /// Maximum number of tolerance halvings per ring.
    #[arg(long)]
    pub max_halvings: Option<u32>,

    /// Union the polygons even if the input holds a single feature.
    #[arg(long)]
    pub always_merge: bool,

    /// Also write the merged and simplified collection as standard GeoJSON.
    #[arg(long)]
    pub intermediate: Option<PathBuf>,

    /// Configuration file, replacing config/default.toml and config/local.toml.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |path: &Option<PathBuf>| {
            path.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        write!(
            f,
            "Settings:
  - Input: {}
  - Output: {}
  - Intermediate: {}
  - Tolerance: {:e}
  - Snap Distance: {:e}
  - Min Tolerance: {:e}
  - Max Halvings: {}
  - Always Merge: {}
  ",
            show(&self.input),
            show(&self.output),
            show(&self.intermediate),
            self.tolerance,
            self.snap_distance,
            self.min_tolerance,
            self.max_halvings,
            self.always_merge,
        )
    }
}
