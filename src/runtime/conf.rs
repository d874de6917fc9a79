use std::{path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::{
    report::ReportFormat,
    runtime::{
        cli::Cli,
        conf_serde::{duration, level},
    },
};

/// Application configuration.
///
/// Merged from defaults, an optional YAML file, `LAGSIFT_*` environment
/// variables, and CLI flags, in that priority order, lowest first.
#[derive(Debug, Deserialize, Serialize)]
pub struct Conf {
    /// Path to the service registry table (an IANA service-names CSV export).
    pub registry: PathBuf,

    /// Path of the loaded configuration file, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// The application's log level.
    #[serde(with = "level")]
    pub log_level: Level,

    /// Conversation workers; 1 runs the single sequential pass.
    pub workers: usize,

    /// Bounded capacity of the packet channels feeding the worker pool.
    pub channel_capacity: usize,

    /// Bucket width of the diagnostic latency histograms.
    #[serde(with = "duration")]
    pub histogram_bucket_width: Duration,

    /// Report format for stdout rendering.
    pub format: ReportFormat,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            registry: defaults::registry(),
            config_path: None,
            log_level: Level::INFO,
            workers: defaults::workers(),
            channel_capacity: defaults::channel_capacity(),
            histogram_bucket_width: defaults::histogram_bucket_width(),
            format: ReportFormat::default(),
        }
    }
}

mod defaults {
    use std::{path::PathBuf, time::Duration};

    pub fn registry() -> PathBuf {
        PathBuf::from("service-names-port-numbers.csv")
    }

    pub fn workers() -> usize {
        1
    }

    pub fn channel_capacity() -> usize {
        1024
    }

    pub fn histogram_bucket_width() -> Duration {
        Duration::from_millis(1)
    }
}

impl Conf {
    /// Merge the configuration for this invocation.
    ///
    /// CLI flags the user did not pass are skipped during serialization, so
    /// they never shadow file or environment values with clap defaults.
    pub fn new(cli: Cli) -> Result<(Self, Cli), ConfError> {
        let mut figment = Figment::from(Serialized::defaults(Conf::default()));
        if let Some(path) = &cli.config {
            figment = figment.merge(Yaml::file_exact(path));
        }
        let figment = figment
            .merge(Env::prefixed("LAGSIFT_"))
            .merge(Serialized::defaults(&cli));

        let mut conf: Conf = figment.extract()?;
        conf.config_path = cli.config.clone();
        Ok((conf, cli))
    }
}

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("failed to load configuration: {0}")]
    Extract(#[from] figment::Error),
}
