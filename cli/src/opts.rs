//! Command line arguments.

use {
    clap::{ArgAction, Parser},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
};

// Command-line arguments for the filter-bridge CLI.
//
// This struct is used to derive a command-line argument parser. See the
// [clap](https://docs.rs/clap/latest/clap) documentation for more information.
//
// Note that the doc comment below is used as descriptive text in the `--help` output.
/// filter-bridge plays the proxy core against filter plugins, driving scenario requests
/// through the bridge from one thread per worker.
#[derive(Debug, Parser)]
#[command(name = "filter-bridge", author, version)]
pub struct Opts {
    /// The path to the scenario TOML file.
    #[arg(value_parser = check_scenario)]
    scenario: PathBuf,
    /// The path to a TOML file containing `[bridge]` and `[plugins]` configuration. Defaults
    /// to the sections of the scenario file itself.
    #[arg(short = 'C', long = "config")]
    config_path: Option<PathBuf>,
    /// The number of worker threads to run, overriding the configured concurrency.
    #[arg(long = "workers", value_parser = clap::value_parser!(u32).range(1..))]
    workers: Option<u32>,
    /// How long simulated asynchronous operations take, in milliseconds, unless a plugin
    /// configures its own delay.
    #[arg(long = "resume-delay-ms", default_value_t = 10)]
    resume_delay_ms: u64,
    /// How long to wait for a parked request to be continued, in milliseconds.
    #[arg(long = "continue-timeout-ms", default_value_t = 5000)]
    continue_timeout_ms: u64,
    /// Verbosity of logs for filter-bridge. `-v` sets the log level to DEBUG and
    /// `-vv` to TRACE. This option will not take effect if you set RUST_LOG
    /// to a value before starting filter-bridge.
    #[arg(short = 'v', action = ArgAction::Count)]
    verbosity: u8,
}

impl Opts {
    /// The path to the scenario file.
    pub fn scenario(&self) -> &Path {
        self.scenario.as_ref()
    }

    /// The path to a separate bridge configuration file.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// The worker concurrency override, if any.
    pub fn workers(&self) -> Option<u32> {
        self.workers
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn continue_timeout(&self) -> Duration {
        Duration::from_millis(self.continue_timeout_ms)
    }

    /// Verbosity of logs for filter-bridge. `-v` sets the log level to DEBUG and
    /// `-vv` to TRACE. This option will not take effect if you set RUST_LOG
    /// to a value before starting filter-bridge.
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }
}

/// A parsing function used by [`Opts`] to check that the scenario is an existing file.
fn check_scenario(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("no scenario file at '{}'", s))
    }
}
