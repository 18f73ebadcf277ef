//! Command-line argument parsing for the topics console
//!
//! Uses clap for argument parsing with derive macros.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

/// topics - remote debugging console for a running JVM
#[derive(Parser, Debug)]
#[command(name = "topics", author, version, about, long_about = None)]
pub struct Args {
    /// Interface the agent listener binds to
    #[arg(long, env = "TOPICS_BIND")]
    pub bind: Option<String>,

    /// Port the agent connects to
    #[arg(long, short = 'p', env = "TOPICS_PORT")]
    pub port: Option<u16>,

    /// Configuration file (defaults to the XDG config location)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Source roots, repeatable or separated by ';'
    #[arg(long = "sourcepath", visible_alias = "sp", value_delimiter = ';')]
    pub source_paths: Vec<PathBuf>,

    /// Tell the attached process to exit when the console quits
    #[arg(long, short = 'c', default_value_t = false)]
    pub close_on_detach: bool,

    /// Log filter, e.g. "debug" or "topics_console=trace"
    #[arg(long)]
    pub log_level: Option<String>,

    /// Print the message ID table and exit
    #[arg(long, default_value_t = false)]
    pub print_signals: bool,

    /// Write the default configuration file if none exists, then exit
    #[arg(long, default_value_t = false)]
    pub init_config: bool,

    /// Run a launch script and wait for it before listening
    #[arg(long, visible_alias = "sj", value_name = "SCRIPT")]
    pub spawnjoin: Option<PathBuf>,

    /// Start a launch script in the background once listening
    #[arg(long, short = 's', value_name = "SCRIPT")]
    pub spawn: Option<PathBuf>,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply flags on top of the loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.close_on_detach {
            config.server.close_on_detach = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.filter = level.clone();
        }
        config
            .session
            .source_paths
            .extend(self.source_paths.iter().cloned());
    }
}
