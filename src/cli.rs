use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{debug, info};

use flowguard::clock::{Clock, ClockMode};
use flowguard::config::DetectorConfig;
use flowguard::error::FlowguardError;
use flowguard::prefix;
use flowguard::record::FlowRecord;
use flowguard::{DdosDetector, Ingress};

#[derive(Parser)]
#[command(name = "flowguard")]
#[command(author, version, about = "Streaming DDoS detection over flow records")]
pub struct Cli {
    /// Time base: online (wall clock) or offline (flow timestamps)
    #[arg(short = 'm', long, value_parser = parse_mode)]
    pub mode: ClockMode,

    /// File with subnets to protect, one `ip[/prefix] [sensitivity]` per line
    #[arg(short = 'f', long = "subnet-file")]
    pub subnet_file: PathBuf,

    /// Optional whitelist file; protected subnets are always whitelisted
    #[arg(short = 'w', long)]
    pub whitelist: Option<PathBuf>,

    /// Learning duration, e.g. 30s, 10m, 2h, 1d. Required when no
    /// thresholds file exists yet
    #[arg(short = 'l', long, value_parser = parse_duration_secs)]
    pub learning: Option<u64>,

    /// Quantile used to backfill thresholds for silent columns
    #[arg(short = 'q', long, default_value_t = 0.75)]
    pub quantile: f64,

    /// EWMA span for the CUSUM trackers
    #[arg(short = 's', long, default_value_t = 60)]
    pub span: u32,

    /// Width of the destination sketch
    #[arg(short = 'd', long = "dst-sketch-width", default_value_t = 1024)]
    pub dst_sketch_width: usize,

    /// Width of the source sketch
    #[arg(short = 'k', long = "src-sketch-width", default_value_t = 32768)]
    pub src_sketch_width: usize,

    /// How many source addresses an alert reports
    #[arg(short = 'n', long = "top-n", default_value_t = 5)]
    pub top_n: usize,

    /// Quiet period between alerts from the same column, e.g. 300s
    #[arg(short = 't', long = "alert-interval", default_value = "300s", value_parser = parse_duration_secs)]
    pub alert_interval: u64,

    /// Flow input file, `-` for stdin
    #[arg(short = 'i', long, default_value = "-")]
    pub input: String,

    /// Where thresholds are persisted and reloaded from
    #[arg(long, default_value = "thresholds.csv")]
    pub thresholds: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

fn parse_mode(value: &str) -> Result<ClockMode, String> {
    match value {
        "online" => Ok(ClockMode::Online),
        "offline" => Ok(ClockMode::Offline),
        other => Err(format!("invalid mode '{other}': expected online or offline")),
    }
}

/// `<number>{s|m|h|d}`, rounded up to whole seconds.
fn parse_duration_secs(value: &str) -> Result<u64, FlowguardError> {
    let err = || FlowguardError::InvalidDuration(value.to_string());
    if value.len() < 2 {
        return Err(err());
    }
    let (number, unit) = value.split_at(value.len() - 1);
    let number: f64 = number.parse().map_err(|_| err())?;
    if number < 0.0 {
        return Err(err());
    }
    let seconds = match unit {
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        "d" => number * 86400.0,
        _ => return Err(err()),
    };
    Ok(seconds.ceil() as u64)
}

pub fn run(cli: Cli) -> Result<()> {
    let learning_secs = cli.learning.unwrap_or(0);
    if learning_secs == 0 && !cli.thresholds.exists() {
        bail!(
            "no thresholds file at {} and no learning interval given; \
             pass -l for the first run",
            cli.thresholds.display()
        );
    }

    let protected = prefix::load_protected(&cli.subnet_file)
        .with_context(|| format!("loading subnet file {}", cli.subnet_file.display()))?;
    let whitelist = match &cli.whitelist {
        Some(path) => prefix::load_whitelist(path)
            .with_context(|| format!("loading whitelist {}", path.display()))?,
        None => prefix::PrefixTable::new(),
    };

    let config = DetectorConfig {
        learning_secs,
        quantile: cli.quantile,
        span: cli.span,
        dst_width: cli.dst_sketch_width,
        src_width: cli.src_sketch_width,
        top_n: cli.top_n,
        quiet_secs: cli.alert_interval,
        thresholds_path: cli.thresholds.clone(),
        ..Default::default()
    };

    let clock = Clock::new(cli.mode);
    let detector = DdosDetector::new(&config, protected, whitelist, clock.clone());
    let mut ingress = Ingress::new(detector, clock, config.window_secs);

    let reader: Box<dyn BufRead> = if cli.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(&cli.input).with_context(|| {
            format!("opening flow input {}", cli.input)
        })?))
    };

    let stdout = io::stdout();
    for line in reader.lines() {
        let line = line.context("reading flow input")?;
        if line.is_empty() {
            continue;
        }
        match FlowRecord::parse_line(&line) {
            Some(rec) => ingress.feed(rec),
            None => debug!(%line, "skipping unparseable flow record"),
        }
        while let Some(alert) = ingress.try_alert() {
            serde_json::to_writer(stdout.lock(), &alert.to_wire())?;
            println!();
        }
    }

    info!("flow input exhausted, shutting down");
    let detector = ingress.finish();
    while let Some(alert) = detector.try_alert() {
        serde_json::to_writer(stdout.lock(), &alert.to_wire())?;
        println!();
    }
    detector.shutdown()?;
    Ok(())
}
