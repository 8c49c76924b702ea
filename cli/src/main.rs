//! A local testing harness for filter-bridge plugins.

// When building the project in release mode:
//   (1): Promote warnings into errors.
//   (2): Deny broken documentation links.
//   (3): Deny invalid codeblock attributes in documentation.
//   (4): Promote warnings in examples into errors, except for unused variables.
#![cfg_attr(not(debug_assertions), deny(warnings))]
#![cfg_attr(not(debug_assertions), deny(clippy::all))]
#![cfg_attr(not(debug_assertions), deny(rustdoc::broken_intra_doc_links))]
#![cfg_attr(not(debug_assertions), deny(rustdoc::invalid_codeblock_attributes))]
#![cfg_attr(not(debug_assertions), doc(test(attr(deny(warnings)))))]
#![cfg_attr(not(debug_assertions), doc(test(attr(allow(dead_code)))))]
#![cfg_attr(not(debug_assertions), doc(test(attr(allow(unused_variables)))))]

mod filters;
mod host;
mod opts;
mod scenario;
mod simulate;

use {
    crate::{
        filters::FilterEnv,
        host::RecordingHost,
        opts::Opts,
        scenario::Scenario,
        simulate::{Report, Simulation},
    },
    clap::Parser,
    filter_bridge_lib::{Bridge, FilterFactories},
    itertools::Itertools,
    std::{
        env,
        io::{self, Stderr, Stdout},
        process::ExitCode,
        sync::Arc,
    },
    tokio::runtime::Handle,
    tracing::{event, Level, Metadata},
    tracing_subscriber::{filter::EnvFilter, fmt::writer::MakeWriter, FmtSubscriber},
};

#[tokio::main]
pub async fn main() -> ExitCode {
    // Parse the command-line options, exiting if there are any errors
    let opts = Opts::parse();

    install_tracing_subscriber(opts.verbosity());
    match run(opts).await {
        Ok(report) => {
            print_report(&report);
            if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            event!(Level::ERROR, "{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load a scenario and play it through a fresh bridge.
pub async fn run(opts: Opts) -> Result<Report, anyhow::Error> {
    let scenario = Scenario::load(opts.scenario(), opts.config_path(), opts.workers())?;
    let config = &scenario.config;

    if config.plugins().is_empty() {
        event!(
            Level::WARN,
            "no plugin definitions found, every request will pass through"
        );
    } else {
        event!(
            Level::INFO,
            "plugins: {}",
            config
                .plugins()
                .values()
                .sorted_by_key(|plugin| plugin.config_id())
                .map(|plugin| format!("{} ({})", plugin.name(), plugin.filter()))
                .join(", ")
        );
    }

    let host = Arc::new(RecordingHost::new());
    let runtime = Handle::current();
    let resume_delay = opts.resume_delay();
    let bridge = Arc::new_cyclic(|bridge| {
        let factories = FilterFactories::new();
        filters::register_all(
            &factories,
            FilterEnv {
                runtime,
                bridge: bridge.clone(),
                resume_delay,
            },
        );
        factories.load(config);
        Bridge::new(host.clone(), factories)
    });
    bridge.initialize(config.concurrency());

    let simulation = Simulation::new(bridge, host, opts.continue_timeout());
    tokio::task::spawn_blocking(move || simulation.run(&scenario)).await?
}

fn print_report(report: &Report) {
    for outcome in &report.outcomes {
        println!(
            "request {} ({}): {}{}",
            outcome.key,
            outcome.plugin,
            outcome.ending,
            if outcome.destroyed { "" } else { ", never destroyed" }
        );
    }
    for (worker, msg) in &report.failed_workers {
        println!("worker {} failed: {}", worker, msg);
    }
    println!("\n{}", report.summary());
}

fn install_tracing_subscriber(verbosity: u8) {
    // Default to whatever a user provides, but if not set logging to work for
    // filter-bridge and filter-bridge-lib so that they can have output in the terminal
    if env::var("RUST_LOG").ok().is_none() {
        match verbosity {
            0 => env::set_var("RUST_LOG", "filter_bridge=info,filter_bridge_lib=info"),
            1 => env::set_var("RUST_LOG", "filter_bridge=debug,filter_bridge_lib=debug"),
            _ => env::set_var("RUST_LOG", "filter_bridge=trace,filter_bridge_lib=trace"),
        }
    }
    // Build a subscriber, using the default `RUST_LOG` environment variable for our filter.
    let builder = FmtSubscriber::builder()
        .with_writer(StdWriter::new())
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false);

    match env::var("RUST_LOG_PRETTY") {
        // If the `RUST_LOG_PRETTY` environment variable is set to "true", we should emit logs in a
        // pretty, human-readable output format.
        Ok(s) if s == "true" => builder
            .pretty()
            // Show levels, because ANSI escape sequences are normally used to indicate this.
            .with_level(true)
            .init(),
        // Otherwise, we should install the subscriber without any further additions.
        _ => builder.with_ansi(false).init(),
    }
    event!(
        Level::DEBUG,
        "RUST_LOG set to '{}'",
        env::var("RUST_LOG").unwrap_or_else(|_| String::from("<Could not get env>"))
    );
}

pub enum Stdio {
    Stdout(Stdout),
    Stderr(Stderr),
}

impl io::Write for Stdio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::Stderr(err) => err.write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.write_all(buf),
            Self::Stderr(err) => err.write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::Stderr(err) => err.flush(),
        }
    }
}

pub struct StdWriter;

impl StdWriter {
    fn new() -> Self {
        Self {}
    }
}

impl<'a> MakeWriter<'a> for StdWriter {
    type Writer = Stdio;

    fn make_writer(&self) -> Self::Writer {
        Stdio::Stdout(io::stdout())
    }

    // Errors go to stderr as if we used eprintln, everything else to stdout.
    fn make_writer_for(&self, meta: &Metadata<'_>) -> Self::Writer {
        if meta.level() == &Level::ERROR {
            Stdio::Stderr(io::stderr())
        } else {
            Stdio::Stdout(io::stdout())
        }
    }
}
