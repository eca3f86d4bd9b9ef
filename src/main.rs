use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};

use fdm_recovery::config::PrinterConfig;
use fdm_recovery::configfile::Configfile;
use fdm_recovery::core_traits::PrintKObject;
use fdm_recovery::eeprom::{self, FileEeprom, SharedEeprom};
use fdm_recovery::failstats::{FailStats, CRASH_MASK_X};
use fdm_recovery::power_panic::{self, PowerLossCheckpoint, UvloOutcome};
use fdm_recovery::prompt::ConsolePrompt;
use fdm_recovery::sdcard::SdCard;
use fdm_recovery::{Printer, RecoveryOrchestrator, RecoveryState};

/// Print-job checkpoint and power panic recovery simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Printer config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// EEPROM image, kept between runs
    #[arg(short, long, default_value = "eeprom.bin")]
    eeprom: PathBuf,

    /// write log to file instead of stderr
    #[arg(short, long)]
    logfile: Option<String>,

    /// enable debug messages
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a G-code file from the simulated card
    Print {
        gcode: PathBuf,

        /// Cut the power after this many main loop passes
        #[arg(long)]
        power_loss_after: Option<usize>,

        /// Report an X stall after this many main loop passes
        #[arg(long)]
        crash_after: Option<usize>,

        /// Answer every question with yes
        #[arg(short = 'y', long)]
        assume_yes: bool,
    },
    /// Power up and continue an interrupted print if there is one
    Boot {
        /// Answer every question with yes
        #[arg(short = 'y', long)]
        assume_yes: bool,

        /// Bed temperature found at power-up, C
        #[arg(long)]
        bed_temp: Option<f64>,
    },
    /// Show what the EEPROM image holds
    Status,
}

const MAX_PASSES: usize = 10_000_000;

fn load_config(path: Option<&Path>) -> anyhow::Result<PrinterConfig> {
    let Some(path) = path else {
        return Ok(PrinterConfig::default());
    };
    let cf = Configfile::load(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(PrinterConfig::from_configfile(&cf)?)
}

fn open_storage(path: &Path) -> anyhow::Result<SharedEeprom> {
    let image = FileEeprom::open(path).with_context(|| format!("opening EEPROM image {}", path.display()))?;
    Ok(SharedEeprom::new(image))
}

fn print(
    mut printer: Printer,
    gcode: &Path,
    power_loss_after: Option<usize>,
    crash_after: Option<usize>,
) -> anyhow::Result<()> {
    let name = printer
        .card
        .mount_host_file(gcode)
        .with_context(|| format!("reading {}", gcode.display()))?;
    printer.start_sd_print(&name)?;

    let mut passes = 0;
    while !printer.is_halted() && (printer.is_sd_printing() || !printer.cmdqueue.is_empty()) {
        if crash_after == Some(passes) {
            printer.report_stall(CRASH_MASK_X);
        }
        if power_loss_after == Some(passes) {
            match printer.uvlo_interrupt() {
                UvloOutcome::Checkpointed => info!("power lost, checkpoint stored"),
                UvloOutcome::CheckpointLost(e) => warn!("power lost, checkpoint incomplete: {}", e),
                other => info!("power lost: {:?}", other),
            }
            break;
        }
        printer.loop_once();
        passes += 1;
        if passes >= MAX_PASSES {
            bail!("print did not finish within {} passes", MAX_PASSES);
        }
    }
    if !printer.is_halted() {
        printer.synchronize();
    }
    println!("{}", serde_json::to_string_pretty(&printer.get_status())?);
    Ok(())
}

fn boot(mut printer: Printer, bed_temp: Option<f64>) -> anyhow::Result<()> {
    if let Some(temp) = bed_temp {
        printer.heaters.bed.current_temp = temp;
    }
    // The card model is empty after power-up; bring back the recorded file.
    if let Some(path) = printer.with_storage(|ee| eeprom::load_file_path(ee))? {
        if let Err(e) = printer.card.mount_host_file(&path) {
            warn!("recorded print file {} unavailable: {}", path, e);
        }
    }

    let mut orchestrator = RecoveryOrchestrator::new();
    let state = match orchestrator.on_boot(&mut printer) {
        Ok(state) => state,
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.get_status())?);
            return Err(e).context("recovery stopped");
        }
    };
    if state == RecoveryState::Running && orchestrator.record().is_some() {
        printer.run(MAX_PASSES);
    }
    println!("{}", serde_json::to_string_pretty(&orchestrator.get_status())?);
    println!("{}", serde_json::to_string_pretty(&printer.get_status())?);
    Ok(())
}

fn status(storage: &SharedEeprom) -> anyhow::Result<()> {
    let mut ee = storage.lock();
    let ee = &mut **ee;
    let pending = power_panic::is_pending(ee)?;
    let status = serde_json::json!({
        "pending": pending,
        "file": eeprom::load_file_path(ee)?,
        "checkpoint": PowerLossCheckpoint::load(ee)?.get_status(),
        "fail_stats": FailStats::load(ee)?.get_status(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.verbose {
        builder.filter(None, log::LevelFilter::Debug);
    } else {
        builder.filter(None, log::LevelFilter::Info);
    }
    if let Some(ref logfile) = args.logfile {
        let target = Box::new(std::fs::File::create(logfile).with_context(|| format!("creating {}", logfile))?);
        builder.target(env_logger::Target::Pipe(target));
    }
    builder.init();

    let config = load_config(args.config.as_deref())?;
    let storage = open_storage(&args.eeprom)?;

    match args.command {
        Command::Status => status(&storage),
        Command::Print {
            gcode,
            power_loss_after,
            crash_after,
            assume_yes,
        } => {
            let mut printer = Printer::new(config, storage, SdCard::new(), Box::new(ConsolePrompt { assume_yes }));
            printer.boot()?;
            print(printer, &gcode, power_loss_after, crash_after)
        }
        Command::Boot { assume_yes, bed_temp } => {
            let mut printer = Printer::new(config, storage, SdCard::new(), Box::new(ConsolePrompt { assume_yes }));
            printer.boot()?;
            info!("printer powered up");
            boot(printer, bed_temp)
        }
    }
}
