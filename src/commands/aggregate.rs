use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::Result;
use crate::models::{Bar, SessionClock, Timeframe};
use crate::services::adjust::{adjust_bars, read_corporate_actions};
use crate::services::aggregate::{group_bars, read_bars};

pub fn run(
    config_path: PathBuf,
    input: PathBuf,
    timeframe: String,
    code: u32,
    actions: Option<PathBuf>,
    output: Option<PathBuf>,
) {
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error loading config {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };
    let clock = match SessionClock::from_config(&config.session) {
        Ok(clock) => clock,
        Err(e) => {
            eprintln!("❌ Invalid session config: {}", e);
            std::process::exit(1);
        }
    };
    let timeframe = match Timeframe::parse(&timeframe) {
        Ok(tf) => tf,
        Err(e) => {
            eprintln!("❌ {}", e);
            eprintln!("   Valid timeframes: 1m, 5m, 15m, 30m, 60m, am-pm, daily");
            std::process::exit(1);
        }
    };

    let bars = match read_bars(&input, code) {
        Ok(bars) => bars,
        Err(e) => {
            eprintln!("❌ Error reading {}: {}", input.display(), e);
            std::process::exit(1);
        }
    };
    println!("📊 {} bars for instrument {}", bars.len(), code);

    let grouped = group_bars(&bars, timeframe, &clock);
    println!("📦 {} {} buckets", grouped.len(), timeframe);

    let finished = match actions {
        Some(path) => match read_corporate_actions(&path, code) {
            Ok(actions) => {
                println!("🏦 Applying {} corporate actions", actions.len());
                adjust_bars(&grouped, actions)
            }
            Err(e) => {
                eprintln!("❌ Error reading {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => grouped,
    };

    if let Err(e) = write_bars(&finished, code, output.as_deref()) {
        eprintln!("❌ Error writing output: {}", e);
        std::process::exit(1);
    }
}

fn write_bars(bars: &[Bar], code: u32, output: Option<&std::path::Path>) -> Result<()> {
    let mut writer: csv::Writer<Box<dyn std::io::Write>> = match output {
        Some(path) => csv::Writer::from_writer(Box::new(std::fs::File::create(path)?)),
        None => csv::Writer::from_writer(Box::new(std::io::stdout())),
    };
    writer.write_record(["code", "timestamp", "open", "high", "low", "close", "volume"])?;
    for bar in bars {
        writer.write_record([
            code.to_string(),
            format!("{:.6}", bar.timestamp),
            format!("{:.6}", bar.open),
            format!("{:.6}", bar.high),
            format!("{:.6}", bar.low),
            format!("{:.6}", bar.last),
            format!("{:.6}", bar.volume),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
