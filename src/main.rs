// src/main.rs
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use refa_impedance::{DriverConfig, DriverError, ImpedanceFrame, Montage, RefaDriver};

const POWER_HINT: &str = "check whether the Refa amplifier (blue box) is switched on";

/// Polls electrode impedances from a TMSi Refa amplifier.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON driver configuration (defaults to $RTDEVICE_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to TMSiSDK.dll
    #[arg(long)]
    sdk: Option<PathBuf>,
    /// Electrode montage (JSON) used to label channels
    #[arg(long)]
    montage: Option<PathBuf>,
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
    /// Number of polls; runs until interrupted when omitted
    #[arg(long)]
    count: Option<u64>,
}

fn load_config(args: &Args) -> Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_json_file(path)?,
        None => DriverConfig::from_env()?,
    };
    if let Some(sdk) = &args.sdk {
        config.library_path = sdk.clone();
    }
    Ok(config)
}

fn print_frame(frame: &ImpedanceFrame, montage: Option<&Montage>) {
    match montage {
        Some(montage) => {
            for e in montage.resolve(frame) {
                let value = e
                    .reading
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6} {:>10} ch{:<3} {:>4} kOhm",
                    e.electrode, e.label, e.hardware_channel, value
                );
            }
        }
        None => {
            for (i, reading) in frame.readings().enumerate() {
                println!("ch{:<3} {:>4} kOhm", i + 1, reading);
            }
        }
    }
    println!();
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;
    let montage = args.montage.as_ref().map(Montage::load).transpose()?;

    info!("loading {}", config.library_path.display());
    let mut driver = RefaDriver::open(config).context(POWER_HINT)?;
    driver.initiate_impedance_data_mode().context(POWER_HINT)?;
    if let Some(channels) = driver.channel_count() {
        info!("measuring impedance on {channels} channels");
    }

    let interval = Duration::from_millis(args.interval_ms);
    let mut polls = 0u64;
    while args.count.map_or(true, |count| polls < count) {
        polls += 1;
        match driver.impedance_frame() {
            Ok(frame) => print_frame(&frame, montage.as_ref()),
            Err(err @ DriverError::NoData { .. }) => warn!("{err}"),
            Err(err) => return Err(err).context("impedance read failed"),
        }
        thread::sleep(interval);
    }
    driver.stop()?;
    Ok(())
}
