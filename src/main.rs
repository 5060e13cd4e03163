use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use mk5ctl::device::directory::volume_label;
use mk5ctl::error::{retry, ExponentialBackoff};
use mk5ctl::ui::progress::{format_rate, format_size, run_summary, ConditionProgress};
use mk5ctl::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mk5ctl")]
#[command(about = "Inspect, erase and condition disk packs on a Mark5 / jive5ab recorder")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Device host name or address
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Device control port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Longest wait for a connection or a reply (e.g. 5s, 1m)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Show sizes in GB (10^9 bytes)
    #[arg(short = 'g', long, global = true)]
    gigabyte: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the mounted packs and which bank is active
    Banks,

    /// List the scans recorded on a pack
    Dir {
        /// Bank to list (A or B); the active bank is used if omitted
        #[arg(short, long)]
        bank: Option<BankId>,
    },

    /// Erase a pack, optionally conditioning it first
    Erase {
        /// Bank to erase (A or B); the active bank is used if omitted
        #[arg(short, long)]
        bank: Option<BankId>,

        /// Condition the pack: a full read and write pass over every disk
        #[arg(long)]
        condition: bool,

        /// Condition with the read/write benchmark; keeps the volume label
        #[arg(long)]
        rw_benchmark: bool,

        /// Time between progress samples while conditioning (e.g. 30s)
        #[arg(long, value_parser = humantime::parse_duration)]
        sample_interval: Option<Duration>,

        /// Simulate the run without touching the device
        #[arg(long)]
        dry_run: bool,

        /// Confirm that all data on the pack is to be destroyed
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(address) = &cli.address {
        settings.address = address.clone();
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(timeout) = cli.timeout {
        settings.timeout = timeout;
    }
    if cli.gigabyte {
        settings.gigabyte_units = true;
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    let deferring = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(Arc::clone(&interrupt), Arc::clone(&deferring))?;

    let mut client = connect(&settings)?;
    let capabilities = probe(&mut client).context("Failed to identify the device")?;
    tracing::info!(
        family = %capabilities.family,
        firmware = ?capabilities.firmware.map(|v| v.to_string()),
        bank_mode = capabilities.bank_mode,
        "Connected"
    );

    let result = match cli.command {
        Commands::Banks => show_banks(&mut client, &capabilities, cli.json),
        Commands::Dir { bank } => {
            show_directory(&mut client, &capabilities, &settings, bank, cli.json)
        }
        Commands::Erase {
            bank,
            condition,
            rw_benchmark,
            sample_interval,
            dry_run,
            yes,
        } => {
            settings.condition |= condition;
            settings.rw_benchmark |= rw_benchmark;
            if let Some(interval) = sample_interval {
                settings.sample_interval = interval;
                settings = settings.normalized();
            }
            if !yes && !dry_run {
                bail!("Erasing destroys every scan on the pack; pass --yes to confirm");
            }
            run_erase(
                &mut client,
                &capabilities,
                &settings,
                bank,
                dry_run,
                interrupt,
                deferring,
                cli.json,
            )
        }
    };

    if let Err(e) = client.close() {
        tracing::debug!("Closing the session failed: {}", e);
    }
    result
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Exit status after SIGINT, 128 + signal number
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Record an interrupt. Returns `true` when the process should exit now:
/// nothing is deferring the interrupt, or this is the second one.
fn interrupt_exits(interrupt: &AtomicBool, deferring: &AtomicBool) -> bool {
    let repeated = interrupt.swap(true, Ordering::SeqCst);
    repeated || !deferring.load(Ordering::SeqCst)
}

/// SIGINT ends the process, except while a conditioning run is sampling:
/// there the flag stops the run after the current sample so the transfer
/// can be aborted cleanly.
fn setup_signal_handlers(interrupt: Arc<AtomicBool>, deferring: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::{consts::SIGINT, iterator::Signals};

    let mut signals = Signals::new([SIGINT])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGINT if interrupt_exits(&interrupt, &deferring) => {
                    eprintln!("\nInterrupted");
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
                SIGINT => {
                    eprintln!("\nInterrupt received, stopping after the current sample...");
                }
                _ => {}
            }
        }
    });

    Ok(())
}

fn connect(settings: &Settings) -> Result<Client> {
    let backoff = ExponentialBackoff::connect(settings.connect_retries);
    retry(&backoff, std::thread::sleep, || {
        Client::connect(&settings.address, settings.port, settings.timeout)
    })
    .with_context(|| format!("Failed to connect to {}:{}", settings.address, settings.port))
}

fn show_banks(client: &mut Client, capabilities: &DeviceCapabilities, json: bool) -> Result<()> {
    let status = BankManager::new(capabilities)
        .bank_status(client)
        .context("Failed to read the bank inventory")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if status.active.is_none() && status.inactive.is_none() {
        println!("No packs mounted");
    }
    for (role, bank) in [("active", &status.active), ("inactive", &status.inactive)] {
        if let Some(bank) = bank {
            println!(
                "{:<9} bank {}  {}",
                role,
                bank.id,
                bank.vsn.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Listing {
    vsn: String,
    directory: ScanDirectory,
    scans: Vec<ScanEntry>,
}

fn read_listing<T: Transport>(
    client: &mut Client<T>,
    capabilities: &DeviceCapabilities,
) -> DeviceResult<Listing> {
    let directory = dir_info(client, capabilities)?;
    let scans = list_scans(client, directory.scan_count)?;
    let vsn = volume_label(client)?;
    Ok(Listing {
        vsn,
        directory,
        scans,
    })
}

fn show_directory(
    client: &mut Client,
    capabilities: &DeviceCapabilities,
    settings: &Settings,
    bank: Option<BankId>,
    json: bool,
) -> Result<()> {
    let mut manager = BankManager::new(capabilities).with_policy(settings.switch_policy());
    let listing = match bank {
        Some(target) => manager.with_bank(client, target, |client| {
            read_listing(client, capabilities)
        }),
        None => read_listing(client, capabilities),
    }
    .context("Failed to read the scan directory")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let gigabyte = settings.gigabyte_units;
    println!(
        "nscans {}, recpnt {}, VSN <{}>",
        listing.directory.scan_count,
        format_size(listing.directory.record_pointer, gigabyte),
        listing.vsn
    );
    println!(
        "capacity {}, free {}",
        format_size(listing.directory.capacity, gigabyte),
        format_size(listing.directory.free(), gigabyte)
    );
    if listing.scans.is_empty() {
        return Ok(());
    }
    if gigabyte {
        println!("{:>5} {:<40} {:>14} {:>14}", "n'", "scan name", "start (GB)", "length (GB)");
    } else {
        println!("{:>5} {:<40} {:>14} {:>14}", "n'", "scan name", "start byte", "end byte");
    }
    for scan in &listing.scans {
        if gigabyte {
            println!(
                "{:>5} {:<40} {:>14.7} {:>14.7}",
                scan.index,
                scan.name,
                scan.start as f64 / 1.0e9,
                scan.length() as f64 / 1.0e9
            );
        } else {
            println!(
                "{:>5} {:<40} {:>14} {:>14}",
                scan.index, scan.name, scan.start, scan.end
            );
        }
    }
    Ok(())
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Serialize)]
struct EraseReport {
    bank: String,
    capacity: u64,
    started_at: DateTime<Local>,
    finished_at: DateTime<Local>,
    #[serde(flatten)]
    result: EraseResult,
}

fn run_erase(
    client: &mut Client,
    capabilities: &DeviceCapabilities,
    settings: &Settings,
    bank: Option<BankId>,
    dry_run: bool,
    interrupt: Arc<AtomicBool>,
    deferring: Arc<AtomicBool>,
    json: bool,
) -> Result<()> {
    let options = EraseOptions {
        bank,
        mode: settings.erase_mode(),
        sample_interval: settings.sample_interval,
    };

    // the progress bar needs the pack size, which is only known once the
    // target bank is active
    let capacity = if dry_run {
        0
    } else {
        if let Some(target) = bank {
            BankManager::new(capabilities)
                .with_policy(settings.switch_policy())
                .select_bank(client, target)
                .with_context(|| format!("Failed to activate bank {}", target))?;
        }
        dir_info(client, capabilities)
            .context("Failed to read the pack size")?
            .capacity
    };

    let label = match bank {
        Some(bank) => format!("bank {}", bank),
        None => "active bank".to_string(),
    };
    let progress = if json || !options.mode.conditions() {
        ConditionProgress::hidden(capacity, settings.gigabyte_units)
    } else {
        ConditionProgress::new(&label, capacity, settings.gigabyte_units)
    };

    let mut strategy: Box<dyn EraseStrategy<TcpTransport>> = if dry_run {
        Box::new(SimulatedEraser::default())
    } else {
        Box::new(
            DeviceEraser::new()
                .with_switch_policy(settings.switch_policy())
                .with_interrupt(interrupt),
        )
    };

    tracing::info!(target_bank = %label, mode = ?options.mode, dry_run, "Starting erase");
    let started_at = Local::now();
    // only the conditioning loop watches the flag
    deferring.store(options.mode.conditions() && !dry_run, Ordering::SeqCst);
    let result = strategy.erase(client, capabilities, &options, &mut |sample| {
        progress.update(sample)
    });
    deferring.store(false, Ordering::SeqCst);
    let result = result.with_context(|| format!("Erasing the pack in {} failed", label))?;
    progress.finish();
    let finished_at = Local::now();

    if json {
        let report = EraseReport {
            bank: label,
            capacity,
            started_at,
            finished_at,
            result,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for stats in &result.drive_stats {
        let bins: Vec<String> = stats.bins.iter().map(u64::to_string).collect();
        let replaced = stats
            .replaced_blocks
            .map(|blocks| format!(", {} replaced blocks", blocks))
            .unwrap_or_default();
        println!("{}, {}: {}{}", stats.drive, stats.serial, bins.join(" : "), replaced);
    }

    let verb = if options.mode.conditions() {
        "Conditioning"
    } else {
        "Erasing"
    };
    println!("{}", run_summary(verb, capacity, &label, result.duration));
    println!(
        "Started {}, finished {}",
        started_at.format(TIMESTAMP_FORMAT),
        finished_at.format(TIMESTAMP_FORMAT)
    );
    if let (Some(min), Some(max)) = (result.min_data_rate, result.max_data_rate) {
        println!(
            "Data rate min {}, max {}",
            format_rate(min),
            format_rate(max)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_exits_when_nothing_defers_it() {
        let interrupt = AtomicBool::new(false);
        let deferring = AtomicBool::new(false);

        assert!(interrupt_exits(&interrupt, &deferring));
        assert!(interrupt.load(Ordering::SeqCst));
    }

    #[test]
    fn test_conditioning_defers_the_first_interrupt_only() {
        let interrupt = AtomicBool::new(false);
        let deferring = AtomicBool::new(true);

        assert!(!interrupt_exits(&interrupt, &deferring));
        assert!(interrupt.load(Ordering::SeqCst));
        assert!(interrupt_exits(&interrupt, &deferring));
    }
}
