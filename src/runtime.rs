//! Process runtime: CLI parsing and configuration layering.

pub mod cli;
pub mod conf;
pub mod conf_serde;

use clap::Parser;

use crate::runtime::{
    cli::Cli,
    conf::{Conf, ConfError},
};

/// Parsed CLI arguments plus the merged configuration.
pub struct Runtime {
    pub cli: Cli,
    pub conf: Conf,
}

impl Runtime {
    pub fn new() -> Result<Self, ConfError> {
        let cli = Cli::parse();
        let (conf, cli) = Conf::new(cli)?;

        Ok(Runtime { cli, conf })
    }
}
