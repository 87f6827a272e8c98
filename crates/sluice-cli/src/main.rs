//! sluice - reads captured change data that still needs routing
//!
//! Records are written to stdout as JSON lines; logs go to stderr.
//!
//! ```bash
//! # Read one pass for the configured channel
//! sluice -c sluice.yaml
//!
//! # Validate configuration
//! sluice -c sluice.yaml validate
//!
//! # Show the selects the reader would run
//! sluice -c sluice.yaml sql
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sluice_cli::SluiceConfig;
use sluice_rdbc::connection::FactoryDataSource;
use sluice_rdbc::postgres::PgConnectionFactory;
use sluice_route::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(version, about = "Reads captured change data that still needs routing")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sluice.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one pass and print the records (default)
    Run,
    /// Validate configuration file
    Validate,
    /// Print the primary and fallback selects for the channel
    Sql,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = SluiceConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Validate => {
            println!("Configuration is valid");
            Ok(())
        }
        Commands::Sql => print_sql(&config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_sql(config: &SluiceConfig) -> Result<()> {
    let templates = config.sql_templates();
    for name in [SELECT_DATA_TO_ROUTE, SELECT_DATA_TO_ROUTE_FALLBACK] {
        let sql = adapt_sql(&templates.template(name)?, &config.channel);
        println!("-- {}\n{};\n", name, sql);
    }
    Ok(())
}

async fn run(config: SluiceConfig) -> Result<()> {
    info!(channel = %config.channel.channel_id, "Starting sluice");

    let data_source = Arc::new(FactoryDataSource::new(
        Arc::new(PgConnectionFactory),
        config.database.connection_config(),
    ));
    let strategy = Arc::new(TemplateQueryStrategy::new(Arc::new(config.sql_templates())));
    let reader = DataToRouteReader::new(
        data_source,
        config.reader.clone(),
        strategy,
        RunContext::new(config.channel.clone()),
        Arc::new(ColumnRowMapper),
    )?;

    let handle = reader.handle();
    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, stopping reader");
            signal_handle.set_reading(false);
        }
    });

    let consumer_handle = handle.clone();
    let consumer = tokio::task::spawn_blocking(move || {
        let printed = print_records(&consumer_handle);
        if printed.is_err() {
            // nobody takes records anymore
            consumer_handle.set_reading(false);
        }
        printed
    });
    let summary = reader.run().await;

    match consumer.await {
        Ok(Ok(printed)) => info!(printed, "Consumer finished"),
        Ok(Err(e)) => error!("Failed to write records: {}", e),
        Err(e) => error!("Consumer task panicked: {}", e),
    }

    let stats = summary.stats();
    info!(
        data = summary.data_count,
        rereads = stats.rows_reread,
        fallback = summary.used_fallback,
        completed = summary.completed,
        transactions = summary.context.last_data_ids().len(),
        "Reader finished"
    );
    if !summary.completed {
        warn!("Reader did not complete its pass; see errors above");
    }
    Ok(())
}

/// Write records as JSON lines until the end marker or a take timeout
fn print_records(handle: &ReaderHandle) -> Result<u64> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0;
    loop {
        match handle.poll_next() {
            Take::Data(data) => {
                serde_json::to_writer(&mut out, &data)?;
                out.write_all(b"\n")?;
                printed += 1;
            }
            Take::EndOfStream => break,
            Take::TimedOut => {
                warn!(
                    "No record arrived within {:?}, giving up",
                    handle.take_timeout()
                );
                handle.set_reading(false);
                break;
            }
        }
    }
    out.flush()?;
    Ok(printed)
}
