//! daqunpack CLI application.
//!
//! Unpacks NSCLDAQ run files into per-channel hits.

use anyhow::{Context, Result};
use clap::Parser;
use daqunpack_core::output::{BinaryWriter, HitCsvWriter, TableCsvWriter};
use daqunpack_core::types::hits;
use daqunpack_core::{OutputFormat, RingItemType, RingReader, UnpackConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Unpacker for NSCLDAQ VME module data.
///
/// Scans every physics event of the given run files for conversion-type
/// (ADC/TDC) and timing-type (MTDC) module blocks and writes the decoded
/// channels to CSV or binary.
#[derive(Parser, Debug)]
#[command(name = "daqunpack")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Deployment configuration (TOML): family layouts and module selectors
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Output file path (.csv, .bin)
    ///
    /// The output format is determined by the file extension:
    /// - .csv: one row per hit (event, family, selector, channel, value, valid)
    /// - .bin: packed binary hit records
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Run files to unpack, in order
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,

    /// File listing run files, one per line ('#' starts a comment)
    #[arg(short, long, value_name = "PATH")]
    list: Option<PathBuf>,

    /// Also write a per-event table with one column per module channel
    #[arg(short, long, value_name = "PATH")]
    table: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Totals accumulated over a whole run.
#[derive(Debug, Default)]
struct RunStats {
    files: usize,
    physics_events: u64,
    blocks: u64,
    invalid_blocks: u64,
    hits: u64,
}

enum HitSink {
    Csv(HitCsvWriter<File>),
    Binary(BinaryWriter<File>),
}

impl HitSink {
    fn create(path: &Path) -> Result<Self> {
        let format = OutputFormat::from_path(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {:?}", path))?;
        Ok(match format {
            OutputFormat::Csv => {
                let mut writer = HitCsvWriter::new(file);
                writer.write_header()?;
                Self::Csv(writer)
            }
            OutputFormat::Binary => {
                let mut writer = BinaryWriter::new(file);
                writer.write_header()?;
                Self::Binary(writer)
            }
        })
    }

    fn finish(self) -> Result<()> {
        match self {
            Self::Csv(mut writer) => writer.flush()?,
            Self::Binary(writer) => {
                writer.finish()?;
            }
        }
        Ok(())
    }
}

/// Reads a run list: one path per line, blank lines and `#` comments ignored.
fn read_run_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read run list {:?}", path))?;
    Ok(text
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = UnpackConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load configuration {:?}", args.config))?;
    let assembler = config
        .build_assembler()
        .context("Invalid unpack configuration")?;
    info!(
        modules = config.modules.len(),
        families = ?assembler.families(),
        "configuration loaded"
    );

    let mut inputs = args.inputs.clone();
    if let Some(list) = &args.list {
        inputs.extend(read_run_list(list)?);
    }
    if inputs.is_empty() {
        anyhow::bail!("No run files given. Pass INPUT paths or --list");
    }

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(inputs.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30}] {pos}/{len} {msg}")
                .context("Invalid progress template")?,
        );
        pb
    };

    let mut sink = HitSink::create(&args.output)?;
    let mut table = match &args.table {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create table file {:?}", path))?;
            let mut writer = TableCsvWriter::new(file, &config.modules);
            writer.write_header()?;
            Some(writer)
        }
        None => None,
    };

    let start_time = Instant::now();
    let mut stats = RunStats::default();
    let mut blocks = Vec::new();
    let mut event_hits = Vec::new();

    for input in &inputs {
        progress.set_message(format!("{:?}", input.file_name().unwrap_or_default()));
        let reader = RingReader::open(input)
            .with_context(|| format!("Unable to open run file {:?}", input))?;

        for item in reader {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    // A damaged tail should not discard the rest of the run.
                    warn!(file = ?input, error = %e, "stopping at unreadable ring item");
                    break;
                }
            };

            match item.item_type {
                RingItemType::PhysicsEvent => {
                    let Some(words) = item.physics_words() else {
                        continue;
                    };
                    blocks.clear();
                    assembler.scan_into(&words, &mut blocks);

                    event_hits.clear();
                    event_hits.extend(hits(stats.physics_events, &blocks));
                    match &mut sink {
                        HitSink::Csv(writer) => writer.write_hits(&event_hits)?,
                        HitSink::Binary(writer) => writer.write_hits(&event_hits)?,
                    }
                    if let Some(table) = table.as_mut() {
                        table.write_event(stats.physics_events, &blocks)?;
                    }

                    stats.physics_events += 1;
                    stats.blocks += blocks.len() as u64;
                    stats.invalid_blocks += blocks.iter().filter(|b| !b.is_valid()).count() as u64;
                    stats.hits += event_hits.len() as u64;
                }
                RingItemType::BeginRun => {
                    if let Some(run) = item.run_number() {
                        info!(run, file = ?input, "begin run");
                    }
                }
                RingItemType::EndRun => {
                    info!(file = ?input, "end run");
                }
                _ => {}
            }
        }

        stats.files += 1;
        progress.inc(1);
    }

    sink.finish().context("Failed to finish output")?;
    if let Some(mut table) = table {
        table.flush().context("Failed to write table output")?;
    }

    let total_duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Unpacked {} physics events in {:.2}s",
        stats.physics_events,
        total_duration.as_secs_f64()
    ));

    if !args.quiet {
        let events_per_sec = stats.physics_events as f64 / total_duration.as_secs_f64();
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Run files:      {}", stats.files);
        eprintln!("  Output:         {:?}", args.output);
        eprintln!("  Physics events: {}", stats.physics_events);
        eprintln!("  Module blocks:  {}", stats.blocks);
        eprintln!("  Invalid blocks: {}", stats.invalid_blocks);
        eprintln!("  Hits:           {}", stats.hits);
        eprintln!("  Duration:       {:.3}s", total_duration.as_secs_f64());
        eprintln!("  Throughput:     {:.0} events/s", events_per_sec);
    }

    Ok(())
}
