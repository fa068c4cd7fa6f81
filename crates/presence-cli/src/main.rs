use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use presence_core::attendance::TIMESTAMP_FORMAT;
use presence_core::gallery::{self, LabeledImage};
use presence_core::{AttendanceRecord, AttendanceStore, Clock, SystemClock};
use presence_hw::Camera;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show who has been seen today
    Today {
        /// Attendance CSV file
        #[arg(short, long, default_value = "attendance.csv")]
        file: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show stored attendance rows in file order
    History {
        /// Attendance CSV file
        #[arg(short, long, default_value = "attendance.csv")]
        file: PathBuf,
        /// Only rows for this date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List reference images and the labels derived from them
    Gallery {
        /// Gallery directory
        #[arg(short, long, default_value = "known_faces")]
        dir: PathBuf,
    },
    /// Create the attendance file with its header
    Init {
        /// Attendance CSV file
        #[arg(short, long, default_value = "attendance.csv")]
        file: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Serialize)]
struct TodayRow<'a> {
    name: &'a str,
    first_seen: String,
    last_seen: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Today { file, json } => {
            let store = AttendanceStore::new(&file);
            let today = SystemClock.today();
            let snapshot = store
                .load_today(today)
                .with_context(|| format!("reading {}", file.display()))?;

            if json {
                let rows: Vec<TodayRow> = snapshot
                    .iter()
                    .map(|(name, p)| TodayRow {
                        name,
                        first_seen: p.first_seen.format(TIMESTAMP_FORMAT).to_string(),
                        last_seen: p.last_seen.format(TIMESTAMP_FORMAT).to_string(),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if snapshot.is_empty() {
                println!("Nobody seen on {today}");
            } else {
                println!("Seen on {today}:");
                println!("  {:<24} {:<10} {:<10}", "NAME", "FIRST", "LAST");
                for (name, p) in snapshot.iter() {
                    println!(
                        "  {:<24} {:<10} {:<10}",
                        name,
                        p.first_seen.format("%H:%M:%S").to_string(),
                        p.last_seen.format("%H:%M:%S").to_string()
                    );
                }
                for name in snapshot.unreadable_names() {
                    println!("  {:<24} {:<10} {:<10}", name, "?", "?");
                }
            }
        }
        Commands::History { file, date, json } => {
            let records = history(&file, date.as_deref())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No attendance rows in {}", file.display());
            } else {
                println!("  {:<10} {:<24} {:<19} {:<19}", "DATE", "NAME", "FIRST", "LAST");
                for r in &records {
                    println!(
                        "  {:<10} {:<24} {:<19} {:<19}",
                        r.date, r.name, r.first_seen, r.last_seen
                    );
                }
            }
        }
        Commands::Gallery { dir } => {
            let Some(images) = list_gallery(&dir)? else {
                println!("Gallery directory {} does not exist", dir.display());
                return Ok(());
            };
            if images.is_empty() {
                println!("No reference images in {}", dir.display());
            }
            for image in &images {
                println!("  {:<24} {}", image.label, image.path.display());
            }
        }
        Commands::Init { file } => {
            AttendanceStore::new(&file)
                .ensure_header()
                .with_context(|| format!("initializing {}", file.display()))?;
            println!("Attendance file ready: {}", file.display());
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

/// All rows of `file`, optionally only those dated `date`.
fn history(file: &Path, date: Option<&str>) -> Result<Vec<AttendanceRecord>> {
    let records = AttendanceStore::new(file)
        .read_records()
        .with_context(|| format!("reading {}", file.display()))?;
    Ok(records
        .into_iter()
        .filter(|r| date.map_or(true, |d| r.date == d))
        .collect())
}

/// Reference images under `dir`, `None` if it does not exist. Never creates `dir`.
fn list_gallery(dir: &Path) -> Result<Option<Vec<LabeledImage>>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    Ok(Some(gallery::scan(dir)?))
}
