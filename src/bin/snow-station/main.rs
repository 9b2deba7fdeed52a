mod args;
mod capabilities;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context as _, Result};
use args::Args;
use clap::Parser as _;
use snow_station::{
    config,
    measurement::MeasurementEngine,
    station::{Station, SystemClock},
    storage::{BackupReachability, StorageWriter, format_row, probe_backup, spawn_reachability_poller},
    telemetry::TelemetryTransmitter,
};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::capabilities::Capabilities;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_filter).context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load(&args.config)
        .with_context(|| format!("failed to load configuration: {}", args.config.display()))?;
    let config = Arc::new(config);

    info!(
        station_id = %config.station_id,
        latitude = config.latitude,
        longitude = config.longitude,
        elevation_m = config.elevation_m,
        ground_height_mm = config.ground_height_mm,
        simulate = args.simulate,
        "configuration loaded"
    );

    let capabilities = if args.simulate {
        Capabilities::simulated(&config)
    } else {
        Capabilities::real(&config)?
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let storage_config = &config.storage;
    let reachability = BackupReachability::new(
        storage_config
            .backup_path
            .as_deref()
            .is_some_and(|path| probe_backup(path, storage_config.backup_require_mount)),
    );
    let poller = storage_config.backup_path.clone().map(|path| {
        spawn_reachability_poller(
            path,
            storage_config.backup_require_mount,
            storage_config.backup_poll_interval,
            reachability.clone(),
            shutdown_rx.clone(),
        )
    });

    let engine = MeasurementEngine::new(config.clone(), capabilities.sensor, capabilities.probe);
    let storage = StorageWriter::new(storage_config, &config.station_id, reachability);
    let transmitter = TelemetryTransmitter::new(&config.radio, capabilities.radio);
    let mut station = Station::new(
        config.clone(),
        engine,
        storage,
        transmitter,
        Box::new(SystemClock),
    );

    match (station.storage().primary().stats(), station.storage().primary().unsent()) {
        (Ok(stats), Ok(unsent)) => info!(
            files = stats.files,
            rows = stats.rows,
            unsent = unsent.len(),
            bytes = stats.bytes,
            first_day = ?stats.first_day,
            last_day = ?stats.last_day,
            "primary log opened"
        ),
        (Err(e), _) | (_, Err(e)) => warn!(error = %e, "failed to summarize primary log"),
    }

    if args.once {
        // A failed cycle has already been logged with its stage.
        if let Ok(report) = station.run_once().await {
            println!("{}", format_row(&report.reading));
        }
        let _ = shutdown_tx.send(true);
    } else {
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::spawn(async move {
            let name = tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            info!(signal = name, "shutdown requested, finishing current cycle");
            let _ = shutdown_tx.send(true);
        });

        station.run(shutdown_rx).await;
    }

    if let Some(poller) = poller {
        poller.await.context("backup poller panicked")?;
    }

    Ok(())
}
