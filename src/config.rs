//! Run configuration: config file merged with command-line overrides.
//!
//! The file is YAML:
//!
//! ```yaml
//! camera_params: camera_params.txt
//! source_folder: /data/kitti/sequences/07
//! imglist: /data/kitti/lists/kitti_07_lst.xml
//! refinement_enabled: true
//! window_size: 4
//! tracker_variant: bfm
//! ```
//!
//! or the flat `key = value` form with `#` comments, using the same keys:
//!
//! ```text
//! # kitti 07
//! source_folder = /data/kitti/sequences/07
//! imglist = /data/kitti/lists/kitti_07_lst.xml
//! ```
//!
//! A value given on the command line wins over the file.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::de::Error as _;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{Result, VoError};
use crate::io::{output_paths, run_id_from_list, TrajectoryFormat};
use crate::pipeline::PipelineOptions;

pub const DEFAULT_CONFIG: &str = "config.txt";
pub const DEFAULT_CAMERA_PARAMS: &str = "camera_params.txt";
pub const DEFAULT_OUTPUT_FOLDER: &str = "out_vo";

/// Feature tracker behind the egomotion estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrackerVariant {
    /// Brute-force descriptor matching.
    #[default]
    Bfm,
    /// libviso2 matcher (not linked into this build).
    Libviso,
    /// Brute-force matching with sub-pixel refinement.
    Refiner,
}

/// Command line.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "stereo-vo", version, about = "Stereo visual odometry with sliding-window refinement")]
pub struct CliArgs {
    /// Configuration file (YAML or `key = value`); it must exist.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Camera parameter file (f, reserved, cu, cv, baseline).
    #[arg(short = 'p', long = "camera_params")]
    pub camera_params: Option<PathBuf>,

    /// Folder the image list entries are relative to.
    #[arg(short = 's', long = "source_folder")]
    pub source_folder: Option<PathBuf>,

    /// Alternating left/right image list.
    #[arg(short = 'l', long = "imglist")]
    pub imglist: Option<PathBuf>,

    #[arg(short = 'o', long = "output_folder")]
    pub output_folder: Option<PathBuf>,

    /// Enable sliding-window refinement.
    #[arg(long = "refinement", num_args = 0..=1, default_missing_value = "true")]
    pub refinement_enabled: Option<bool>,

    #[arg(long = "window_size")]
    pub window_size: Option<usize>,

    #[arg(long = "tracker", value_enum)]
    pub tracker_variant: Option<TrackerVariant>,

    /// Ground-truth poses (KITTI format) for per-frame evaluation.
    #[arg(long = "ground_truth")]
    pub ground_truth: Option<PathBuf>,

    #[arg(long = "trajectory_format", value_enum)]
    pub trajectory_format: Option<TrajectoryFormat>,

    #[arg(long = "max_failures")]
    pub max_consecutive_failures: Option<usize>,

    /// Pairs loaded ahead on a worker thread, 0 disables.
    #[arg(long)]
    pub prefetch: Option<usize>,

    #[arg(long = "start_frame")]
    pub start_frame: Option<usize>,

    #[arg(long = "end_frame")]
    pub end_frame: Option<usize>,
}

/// Contents of the config file; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub camera_params: Option<PathBuf>,
    pub source_folder: Option<PathBuf>,
    pub imglist: Option<PathBuf>,
    pub output_folder: Option<PathBuf>,
    pub refinement_enabled: Option<bool>,
    pub window_size: Option<usize>,
    pub tracker_variant: Option<TrackerVariant>,
    pub ground_truth: Option<PathBuf>,
    pub trajectory_format: Option<TrajectoryFormat>,
    pub max_consecutive_failures: Option<usize>,
    pub prefetch: Option<usize>,
    pub start_frame: Option<usize>,
    pub end_frame: Option<usize>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| VoError::Config(format!("cannot open config {}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| VoError::Config(format!("{}: {e}", path.display())))
    }

    fn parse(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if content_lines(text).next().is_none() {
            return Ok(Self::default());
        }
        match serde_yaml::from_str(text) {
            Ok(file) => Ok(file),
            Err(_) if content_lines(text).any(|(_, line)| line.contains('=')) => Self::parse_key_value(text),
            Err(e) => Err(e),
        }
    }

    /// `key = value` lines, mapped onto the same fields as the YAML form.
    fn parse_key_value(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let mut map = Mapping::new();
        for (number, line) in content_lines(text) {
            let Some((key, value)) = line.split_once('=') else {
                return Err(serde_yaml::Error::custom(format!(
                    "line {number}: expected `key = value`, got `{line}`"
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(serde_yaml::Error::custom(format!("line {number}: missing key")));
            }
            map.insert(Value::String(key.to_string()), scalar(value.trim()));
        }
        serde_yaml::from_value(Value::Mapping(map))
    }
}

/// Non-empty lines with `#` comments stripped, numbered from 1.
fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let line = line.split('#').next().unwrap_or_default().trim();
        (!line.is_empty()).then_some((i + 1, line))
    })
}

/// Typed scalar for a `key = value` entry (`true`, `4`, `bfm`, a path).
fn scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => v,
        _ => Value::String(raw.to_string()),
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub camera_params: PathBuf,
    pub source_folder: PathBuf,
    pub imglist: PathBuf,
    pub output_folder: PathBuf,
    pub refinement_enabled: bool,
    pub window_size: usize,
    pub tracker_variant: TrackerVariant,
    pub ground_truth: Option<PathBuf>,
    pub trajectory_format: TrajectoryFormat,
    pub max_consecutive_failures: usize,
    pub prefetch: usize,
    pub start_frame: usize,
    pub end_frame: Option<usize>,
}

impl RunConfig {
    /// Load the config file named by `args` (default [`DEFAULT_CONFIG`]) and
    /// apply the command-line overrides. A missing file is an error.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
        debug!("reading configuration from {}", path.display());
        let file = ConfigFile::load(&path)?;
        Self::merge(file, args)
    }

    pub fn merge(file: ConfigFile, args: &CliArgs) -> Result<Self> {
        let required = |cli: &Option<PathBuf>, file: Option<PathBuf>, key: &str| {
            cli.clone()
                .or(file)
                .ok_or_else(|| VoError::Config(format!("missing required option `{key}`")))
        };

        let config = Self {
            source_folder: required(&args.source_folder, file.source_folder, "source_folder")?,
            imglist: required(&args.imglist, file.imglist, "imglist")?,
            camera_params: args
                .camera_params
                .clone()
                .or(file.camera_params)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAMERA_PARAMS)),
            output_folder: args
                .output_folder
                .clone()
                .or(file.output_folder)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FOLDER)),
            refinement_enabled: args.refinement_enabled.or(file.refinement_enabled).unwrap_or(false),
            window_size: args.window_size.or(file.window_size).unwrap_or(4),
            tracker_variant: args.tracker_variant.or(file.tracker_variant).unwrap_or_default(),
            ground_truth: args.ground_truth.clone().or(file.ground_truth),
            trajectory_format: args.trajectory_format.or(file.trajectory_format).unwrap_or_default(),
            max_consecutive_failures: args
                .max_consecutive_failures
                .or(file.max_consecutive_failures)
                .unwrap_or(5),
            prefetch: args.prefetch.or(file.prefetch).unwrap_or(2),
            start_frame: args.start_frame.or(file.start_frame).unwrap_or(0),
            end_frame: args.end_frame.or(file.end_frame),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(VoError::Config(format!(
                "window_size must be at least 2, got {}",
                self.window_size
            )));
        }
        if let Some(end) = self.end_frame {
            if end <= self.start_frame {
                return Err(VoError::Config(format!(
                    "end_frame ({end}) must be after start_frame ({})",
                    self.start_frame
                )));
            }
        }
        Ok(())
    }

    /// Identifier used to name the output files.
    pub fn run_id(&self) -> String {
        run_id_from_list(&self.imglist)
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let (direct, refined) = output_paths(&self.output_folder, &self.run_id());
        PipelineOptions {
            refinement_enabled: self.refinement_enabled,
            window_size: self.window_size,
            max_consecutive_failures: self.max_consecutive_failures,
            trajectory_format: self.trajectory_format,
            direct_output: Some(direct),
            refined_output: self.refinement_enabled.then_some(refined),
            image_list: self.imglist.clone(),
        }
    }
}
