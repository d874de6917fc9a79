use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::{report::ReportFormat, runtime::conf_serde::level};

/// Derive latency statistics from an offline packet capture.
///
/// Conf-backed fields are optional here so that only flags the user actually
/// passed participate in the configuration merge.
#[derive(Parser, Debug, Serialize, Deserialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the capture file to analyze.
    #[serde(skip)]
    pub capture: PathBuf,

    /// Set the path to the service registry table (IANA service-names CSV).
    #[arg(short, long, value_name = "FILE", env = "LAGSIFT_REGISTRY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<PathBuf>,

    /// Set the path to the configuration file (e.g., "lagsift.yaml").
    #[arg(short, long, value_name = "FILE", env = "LAGSIFT_CONFIG_PATH")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Set the application's log level (e.g., "debug", "warn").
    #[arg(short, long, value_name = "LEVEL", env = "LAGSIFT_LOG_LEVEL")]
    #[serde(default, with = "level::option", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<Level>,

    /// Number of conversation workers (1 = sequential pass).
    #[arg(short, long, env = "LAGSIFT_WORKERS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Report format for stdout rendering.
    #[arg(short, long, value_enum, env = "LAGSIFT_FORMAT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ReportFormat>,
}
