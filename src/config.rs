use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::errors::{MedSegError, Result};

pub const DEFAULT_LABELS: [&str; 3] = ["background", "normal_tissue", "lesion"];
const DEFAULT_CORS_ORIGINS: [&str; 2] = ["http://localhost:5173", "http://127.0.0.1:5173"];

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(long, env = "MEDICAL_IMAGE_API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "MEDICAL_IMAGE_API_PORT", default_value_t = 8000)]
    pub port: u16,

    /// ONNX export of the segmentation network. Without it the threshold heuristic is used.
    #[arg(short, long, env = "SEGMENTATION_WEIGHTS_PATH")]
    pub weights_path: Option<PathBuf>,

    #[arg(short, long, env = "MEDICAL_IMAGE_DEVICE", default_value = "cpu")]
    pub device: Device,

    /// Model input resolution, `HxW` or a single edge length.
    #[arg(long, env = "SEGMENTATION_INPUT_SIZE", default_value = "256x256")]
    pub input_size: InputSize,

    #[arg(
        long,
        env = "SEGMENTATION_LABELS",
        value_delimiter = ',',
        default_values_t = DEFAULT_LABELS.map(String::from)
    )]
    pub labels: Vec<String>,

    #[arg(
        long,
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_values_t = DEFAULT_CORS_ORIGINS.map(String::from)
    )]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "MAX_IMAGE_BYTES", default_value_t = 50_000_000)]
    pub max_image_bytes: usize,

    /// Accepted for deployment parity; not enforced by the pipeline.
    #[arg(long, env = "MAX_IMAGE_DIM", default_value_t = 2048)]
    pub max_image_dim: u32,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "IMAGE_FETCH_TIMEOUT_SECS", default_value_t = 30)]
    pub fetch_timeout_secs: u64,

    #[arg(long, env = "HEURISTIC_TISSUE_PERCENTILE", default_value_t = 50.0)]
    pub tissue_percentile: f32,

    #[arg(long, env = "HEURISTIC_LESION_PERCENTILE", default_value_t = 95.0)]
    pub lesion_percentile: f32,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Start the HTTP API (default)
    Serve,
    /// Analyze a single image file and print the JSON result
    Analyze {
        input: PathBuf,

        /// Also write the color-coded mask PNG here
        #[arg(long)]
        mask_out: Option<PathBuf>,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            weights_path: None,
            device: Device::Cpu,
            input_size: InputSize::square(256),
            labels: DEFAULT_LABELS.map(String::from).to_vec(),
            cors_origins: DEFAULT_CORS_ORIGINS.map(String::from).to_vec(),
            max_image_bytes: 50_000_000,
            max_image_dim: 2048,
            log_level: "info".to_string(),
            fetch_timeout_secs: 30,
            tissue_percentile: 50.0,
            lesion_percentile: 95.0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size.height == 0 || self.input_size.width == 0 {
            return Err(config_error("input size must be non-zero"));
        }
        if self.labels.is_empty() || self.labels.iter().any(|l| l.trim().is_empty()) {
            return Err(config_error("label set must contain non-empty names"));
        }
        let in_range = |p: f32| (0.0..=100.0).contains(&p);
        if !in_range(self.tissue_percentile) || !in_range(self.lesion_percentile) {
            return Err(config_error("heuristic percentiles must lie in [0, 100]"));
        }
        if self.tissue_percentile >= self.lesion_percentile {
            return Err(config_error(
                "tissue percentile must be below the lesion percentile",
            ));
        }
        Ok(())
    }

    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn config_error(message: &str) -> MedSegError {
    MedSegError::Configuration {
        message: message.to_string(),
    }
}

/// Compute device for the ONNX session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(i32),
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(Self::Cuda)
                .ok_or(format!(
                    "{} is not a supported device. Use `cpu`, `cuda` or `cuda:N`",
                    s
                )),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

/// Fixed (height, width) the segmenter runs at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSize {
    pub height: u32,
    pub width: u32,
}

impl InputSize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub const fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

impl FromStr for InputSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| format!("{} is not a valid input size. Use `HxW` or `N`", s))
        };
        match s.split_once(['x', 'X', ',']) {
            Some((h, w)) => Ok(Self::new(parse(h)?, parse(w)?)),
            None => parse(s).map(Self::square),
        }
    }
}

impl fmt::Display for InputSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}
