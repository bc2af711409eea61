pub mod config;
pub mod exporter;
pub mod logging_system;
pub mod pipeline;
pub mod producer;
pub mod scheduler;
pub mod shutdown;
pub mod standard_metrics;
pub mod statsbeat;

pub use config::{ConfigError, LogLevel, Options};
pub use exporter::{CycleReport, ExporterKind, ExporterState, MetricsExporter};
pub use logging_system::{LoggingSystem, setup_logging};
pub use pipeline::Pipeline;
pub use producer::{MetricProducer, SnapshotProducer};
pub use scheduler::ExporterHandle;
pub use shutdown::wait_for_shutdown_signal;
pub use standard_metrics::StandardMetricsProducer;
pub use statsbeat::{StatsbeatFactory, StatsbeatProducer};

use std::process;
use tracing::{error, info};

pub struct App {
    options: Options,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let options = Options::from_args(args)?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Runs until a shutdown signal arrives, then flushes and stops.
    pub async fn run(self) -> anyhow::Result<()> {
        if let Err(e) = setup_logging(
            self.options.log_level,
            self.options.log_json,
            &self.options.log_directives,
        ) {
            eprintln!("Warning: {e}");
        }

        info!("Starting rask-metrics-exporter v{}", get_version());
        info!(
            "Configuration: endpoint={}, export_interval={}s, batch_size={}",
            self.options.endpoint, self.options.export_interval_secs, self.options.max_batch_size
        );

        let pipeline = Pipeline::start(&self.options, Vec::new()).await?;
        info!("rask-metrics-exporter is running. Press Ctrl+C to stop.");

        wait_for_shutdown_signal().await;
        pipeline.shutdown().await;

        info!("rask-metrics-exporter stopped.");
        Ok(())
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("rask-metrics-exporter {}", get_version());
        return Ok(());
    }

    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        // Prints usage and exits.
        let _ = <Options as clap::Parser>::parse_from(["rask-metrics-exporter", "--help"]);
        return Ok(());
    }

    let app = match App::from_args(args) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("Application error: {e:#}");
        process::exit(1);
    }
    Ok(())
}
