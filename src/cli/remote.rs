use super::run::{require_config_path, Services};
use crate::config::parse::load_config;
use crate::config::types::Config;
use crate::upload::{CoordinatesQuery, CycleOutcome, HttpSink, Sink};
use std::path::PathBuf;

fn load(config_path: Option<PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = require_config_path(config_path);
    Ok(load_config(&path)?)
}

/// Run one upload cycle over everything buffered and print the outcome.
pub async fn upload(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path)?;
    let services = Services::open(&config).await?;

    match services.coordinator.run_upload_cycle().await? {
        CycleOutcome::NothingToUpload => println!("Nothing to upload"),
        CycleOutcome::AlreadyRunning => println!("An upload cycle is already running"),
        CycleOutcome::Finished(report) => {
            println!(
                "Uploaded {} of {} buckets ({} points)",
                report.uploaded, report.visited, report.points_uploaded
            );
            if let Some(error) = report.last_error {
                eprintln!("{} bucket(s) failed, last error: {}", report.failed, error);
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

/// Check the sink's status endpoint and send one heartbeat.
pub async fn ping(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path)?;
    let sink = HttpSink::new(&config.sink)?;

    let status = sink.status().await?;
    println!("{}: status {}", sink.base_url(), status.status);
    sink.heartbeat().await?;
    println!("Heartbeat accepted");

    if !status.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the sink's recent coordinate history.
pub async fn history(
    config_path: Option<PathBuf>,
    query: CoordinatesQuery,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path)?;
    let sink = HttpSink::new(&config.sink)?;

    let response = sink.coordinates(&query).await?;
    println!(
        "{} coordinates in the last {}h",
        response.count, response.lookback_hours
    );
    for row in &response.coordinates {
        println!(
            "{}  {:>10.5} {:>11.5}  ±{:.0}m",
            row.timestamp(),
            row.latitude(),
            row.longitude(),
            row.accuracy()
        );
    }
    Ok(())
}
