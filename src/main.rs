//! rgscan - ReplayGain loudness scanner
//!
//! Command-line interface: analyze files, print or store their gains.

use anyhow::Result;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use rgscan::decode::{analyze_album_with_progress, analyze_file, TrackGain};
use rgscan::tags::{format_gain, format_peak, read_gain_tags, write_gain_tags, GainTags};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the log filter
const LOG_ENV: &str = "RGSCAN_LOG";

// =============================================================================
// Options
// =============================================================================

#[derive(Default)]
struct Options {
    // Mode options
    album: bool,     // -a
    read_tags: bool, // -r (print stored tags, no analysis)

    // Output options
    write_tags: bool, // -t
    json: bool,       // -o
    quiet: bool,      // -q

    // Files
    files: Vec<PathBuf>,
}

// =============================================================================
// Report
// =============================================================================

#[derive(Serialize)]
struct FileReport {
    file: String,
    #[serde(flatten)]
    gain: TrackGain,
    /// Set when `-t` was given: whether this file's tags were stored
    #[serde(skip_serializing_if = "Option::is_none")]
    tags_written: Option<bool>,
}

#[derive(Serialize)]
struct AlbumReport {
    gain_db: f64,
    peak: f64,
}

#[derive(Serialize, Default)]
struct Report {
    files: Vec<FileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<AlbumReport>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let opts = parse_args(&args[1..])?;
    run(opts)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();

    for arg in args {
        if arg.starts_with('-') && arg.len() > 1 {
            let flag = &arg[1..];

            match flag {
                "a" => opts.album = true,
                "r" => opts.read_tags = true,
                "t" => opts.write_tags = true,
                "o" => opts.json = true,
                "q" => opts.quiet = true,
                "v" | "-version" => {
                    print_version();
                    std::process::exit(0);
                }
                "h" | "-help" => {
                    print_usage();
                    std::process::exit(0);
                }
                // Handle combined short flags like -aq
                _ if flag.chars().all(|c| "artoq".contains(c)) => {
                    for c in flag.chars() {
                        match c {
                            'a' => opts.album = true,
                            'r' => opts.read_tags = true,
                            't' => opts.write_tags = true,
                            'o' => opts.json = true,
                            'q' => opts.quiet = true,
                            _ => {}
                        }
                    }
                }
                _ => {
                    eprintln!("{}: unknown option: -{}", "warning".yellow().bold(), flag);
                }
            }
        } else {
            // It's a file
            opts.files.push(PathBuf::from(arg));
        }
    }

    Ok(opts)
}

fn run(opts: Options) -> Result<()> {
    // Validate options
    if opts.files.is_empty() {
        eprintln!("{}: no files specified", "error".red().bold());
        std::process::exit(1);
    }

    if opts.read_tags && (opts.album || opts.write_tags) {
        eprintln!(
            "{}: -r cannot be combined with -a or -t",
            "error".red().bold()
        );
        std::process::exit(1);
    }

    let ok = if opts.read_tags {
        cmd_read(&opts)
    } else if opts.album {
        cmd_album(&opts)?
    } else {
        cmd_tracks(&opts)
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

/// Analyze each file on its own; failures are reported and skipped
fn cmd_tracks(opts: &Options) -> bool {
    let progress = progress_bar(opts);
    let mut report = Report::default();
    let mut ok = true;

    for file in &opts.files {
        progress.set_message(display_name(file).to_string());

        match analyze_file(file) {
            Ok(gain) => {
                let tags_written = opts.write_tags.then(|| {
                    let tags = GainTags {
                        track_gain: Some(gain.gain_db),
                        track_peak: Some(gain.peak),
                        ..Default::default()
                    };
                    store_tags(file, &tags, &progress)
                });
                ok &= tags_written.unwrap_or(true);
                report.files.push(FileReport {
                    file: file.display().to_string(),
                    gain,
                    tags_written,
                });
            }
            Err(e) => {
                progress.suspend(|| eprintln!("{} - {:#}", display_name(file).red(), e));
                ok = false;
            }
        }

        progress.inc(1);
    }

    progress.finish_and_clear();
    print_report(&report, opts);
    ok
}

/// Analyze all files as one album; any failure aborts
fn cmd_album(opts: &Options) -> Result<bool> {
    let progress = progress_bar(opts);
    let files: Vec<&Path> = opts.files.iter().map(PathBuf::as_path).collect();

    let album = analyze_album_with_progress(&files, |file, _| {
        progress.set_message(display_name(file).to_string());
        progress.inc(1);
    });
    progress.finish_and_clear();
    let album = album?;

    let entries: Vec<FileReport> = files
        .iter()
        .zip(&album.tracks)
        .map(|(file, &gain)| {
            let tags_written = opts.write_tags.then(|| {
                let tags = GainTags {
                    track_gain: Some(gain.gain_db),
                    track_peak: Some(gain.peak),
                    album_gain: Some(album.gain_db),
                    album_peak: Some(album.peak),
                    ..Default::default()
                };
                store_tags(file, &tags, &progress)
            });
            FileReport {
                file: file.display().to_string(),
                gain,
                tags_written,
            }
        })
        .collect();
    let ok = entries.iter().all(|e| e.tags_written != Some(false));

    let report = Report {
        files: entries,
        album: Some(AlbumReport {
            gain_db: album.gain_db,
            peak: album.peak,
        }),
    };

    print_report(&report, opts);
    Ok(ok)
}

/// Print the gain tags already stored in each file
fn cmd_read(opts: &Options) -> bool {
    let mut ok = true;

    for file in &opts.files {
        match read_gain_tags(file) {
            Ok(tags) => print_tags(file, &tags, opts),
            Err(e) => {
                eprintln!("{} - {:#}", display_name(file).red(), e);
                ok = false;
            }
        }
    }

    ok
}

// =============================================================================
// Helpers
// =============================================================================

fn display_name(file: &Path) -> &str {
    file.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
}

fn progress_bar(opts: &Options) -> ProgressBar {
    if opts.quiet || opts.json || opts.files.len() < 2 {
        return ProgressBar::hidden();
    }

    let style = ProgressStyle::with_template("{bar:30.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(opts.files.len() as u64).with_style(style)
}

fn store_tags(file: &Path, tags: &GainTags, progress: &ProgressBar) -> bool {
    match write_gain_tags(file, tags) {
        Ok(()) => true,
        Err(e) => {
            progress.suspend(|| {
                eprintln!(
                    "  {} {} - failed to write tags: {:#}",
                    "✗".red(),
                    display_name(file),
                    e
                )
            });
            false
        }
    }
}

fn print_report(report: &Report, opts: &Options) {
    if opts.json {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}: {}", "error".red().bold(), e),
        }
        return;
    }

    for entry in &report.files {
        let name = display_name(Path::new(&entry.file));
        if opts.quiet {
            // Quiet mode: tab-separated output
            println!(
                "{}\t{:.2}\t{:.6}\t{}",
                entry.file, entry.gain.gain_db, entry.gain.peak, entry.gain.sample_rate
            );
        } else {
            println!("{}", name.cyan().bold());
            println!("  Track gain:  {}", format_gain(entry.gain.gain_db).green());
            println!("  Track peak:  {}", format_peak(entry.gain.peak));
            println!("  Sample rate: {} Hz", entry.gain.sample_rate);
            if let Some(status) = tag_status(entry.tags_written) {
                println!("  {}", status);
            }
            println!();
        }
    }

    if let Some(album) = &report.album {
        if opts.quiet {
            println!("Album\t{:.2}\t{:.6}", album.gain_db, album.peak);
        } else {
            println!("{}", "Album".cyan().bold());
            println!("  Album gain:  {}", format_gain(album.gain_db).green());
            println!("  Album peak:  {}", format_peak(album.peak));
        }
    }
}

fn tag_status(written: Option<bool>) -> Option<String> {
    match written? {
        true => Some(format!("{} tags written", "✓".green())),
        false => Some(format!("{} tags not written", "✗".red())),
    }
}

fn print_tags(file: &Path, tags: &GainTags, opts: &Options) {
    if opts.json {
        let entry = serde_json::json!({
            "file": file.display().to_string(),
            "tags": tags,
        });
        println!("{}", entry);
        return;
    }

    let gain = |value: Option<f64>| value.map(format_gain).unwrap_or_else(|| "-".into());
    let peak = |value: Option<f64>| value.map(format_peak).unwrap_or_else(|| "-".into());

    if opts.quiet {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            file.display(),
            gain(tags.track_gain),
            peak(tags.track_peak),
            gain(tags.album_gain),
            peak(tags.album_peak)
        );
        return;
    }

    println!("{}", display_name(file).cyan().bold());
    if tags.is_empty() {
        println!("  {}", "no gain tags".yellow());
    } else {
        println!("  Track gain:  {}", gain(tags.track_gain));
        println!("  Track peak:  {}", peak(tags.track_peak));
        println!("  Album gain:  {}", gain(tags.album_gain));
        println!("  Album peak:  {}", peak(tags.album_peak));
        if let Some((min, max)) = tags.min_max {
            println!("  Min/max:     {} - {}", min, max);
        }
        if let Some((min, max)) = tags.album_min_max {
            println!("  Album min/max: {} - {}", min, max);
        }
    }
    println!();
}

// =============================================================================
// Help / Version
// =============================================================================

fn print_version() {
    println!("rgscan version {}", VERSION);
    println!("ReplayGain loudness scanner written in Rust");
    println!();
    println!(
        "File decoding: {}",
        if rgscan::decode::is_available() {
            "enabled"
        } else {
            "disabled"
        }
    );
}

fn print_usage() {
    println!("{} version {}", "rgscan".green().bold(), VERSION);
    println!("ReplayGain loudness scanner");
    println!();
    println!("{}", "USAGE:".cyan().bold());
    println!("    rgscan [OPTIONS] <FILES>...");
    println!();
    println!("{}", "OPTIONS:".cyan().bold());
    println!("    -a        Album mode: also compute album gain over all files");
    println!("    -r        Read and print stored gain tags (no analysis)");
    println!("    -t        Write gains into APEv2 tags");
    println!("    -o        JSON output");
    println!("    -q        Quiet mode (tab-separated output, no progress)");
    println!("    -v        Show version");
    println!("    -h        Show this help");
    println!();
    println!("{}", "EXAMPLES:".cyan().bold());
    println!("    rgscan song.flac               Show track gain and peak");
    println!("    rgscan -a *.mp3                Track and album gain");
    println!("    rgscan -at *.mp3               Compute and store album gain");
    println!("    rgscan -r song.mp3             Show stored gain tags");
    println!("    rgscan -o *.wav > gains.json   Machine-readable output");
    println!();
    println!("{}", "ENVIRONMENT:".cyan().bold());
    println!(
        "    {}=<filter>  Log filter, e.g. debug or rgscan=trace (default: warn)",
        LOG_ENV
    );
}
