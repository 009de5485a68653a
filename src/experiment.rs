// DIRTYBENCH EXPERIMENT MODES
//
//   LIVE: LOADS RUN ON THIS HOST, AN EXTERNAL COMMAND IS THE PRIMARY TASK.
//         MUST RUN AS ROOT (TRACEFS).
//   UML:  THE HOST STAGES AND BOOTS A USER-MODE KERNEL; THE GUEST (THIS BINARY
//         AS init) RUNS THE LOADS AGAINST A FRESH THROTTLED DEVICE. THE LAST
//         LOAD IS THE PRIMARY TASK. MUST NOT RUN AS ROOT ON THE HOST.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::clock;
use crate::config::{RunConfig, CONFIG_FILE};
use crate::controller::{drive, Controller, Primary, RunPlan, Staging};
use crate::error::RunError;
use crate::record::{RunKind, RunMetadata, METADATA_FILE};
use crate::task::{Launcher, ProcessLauncher};
use crate::tracefs::Tracefs;
use crate::uml;

pub const FAILURE_FILE: &str = "failure.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Uml,
    Live,
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn check_privilege(mode: Mode, root: bool) -> Result<(), RunError> {
    match (mode, root) {
        (Mode::Live, false) => Err(RunError::Privilege("Needs to be run as root.")),
        (Mode::Uml, true) => Err(RunError::Privilege("Do NOT run as root.")),
        _ => Ok(()),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir().context("reading working directory")?.join(path))
}

fn completed(path: &Path) {
    println!("\x1b[1m\x1b[32m-- COMPLETED SUCCESSFULLY --\nRESULTS AT: {}\x1b[m", path.display());
}

// ---------------------------------------------------------------------------
// LIVE
// ---------------------------------------------------------------------------

pub fn run_live<L: Launcher>(cfg: &RunConfig, launcher: L) -> Result<PathBuf> {
    let staging = Staging::create(&absolute(&cfg.output_dir())?, &clock::run_name())?;
    println!("PREPARING EXPERIMENT AT: {}", staging.dir().display());

    println!("-- PREPARING --");
    cfg.save(&staging.dir().join(CONFIG_FILE))?;
    let scratch = staging.dir().join(&cfg.live.scratch);
    fs::create_dir_all(&scratch).with_context(|| format!("creating {}", scratch.display()))?;

    let loads = cfg.live_loads();
    let tracefs = Tracefs::new(&cfg.collector.tracefs);
    let mut controller = Controller::new(staging, launcher, tracefs, cfg.live_timing());

    println!("-- STARTING EXPERIMENT --");
    drive(&mut controller, &RunPlan {
        metadata: RunMetadata::now(RunKind::Live),
        collector: &cfg.collector.command,
        loads: &loads,
        primary: Primary::Command(cfg.live.command.clone()),
    })?;

    fs::remove_dir_all(&scratch).with_context(|| format!("removing {}", scratch.display()))?;
    let done = controller.finalize()?;
    completed(&done);
    Ok(done)
}

// ---------------------------------------------------------------------------
// UML HOST
// ---------------------------------------------------------------------------

pub fn run_uml_host(cfg: &RunConfig, init: &Path) -> Result<PathBuf> {
    let staging = Staging::create(&absolute(&cfg.output_dir())?, &clock::run_name())?;
    println!("PREPARING EXPERIMENT AT: {}", staging.dir().display());
    cfg.save(&staging.dir().join(CONFIG_FILE))?;

    println!("-- CREATING BLOCK DEVICE --");
    let device = uml::create_device(&cfg.uml.scratch, cfg.uml.dev_size)?;

    println!("-- FORMATTING --");
    uml::format(device.path())?;

    println!("\x1b[1m-- LAUNCHING KERNEL --\x1b[m");
    uml::boot(&cfg.uml, device.path(), init, staging.dir())?;
    drop(device);

    check_guest(staging.dir())?;
    let done = staging.finalize()?;
    completed(&done);
    Ok(done)
}

// THE KERNEL EXITS CLEANLY EVEN WHEN THE GUEST RUN FAILED
pub fn check_guest(dir: &Path) -> Result<()> {
    let failure = dir.join(FAILURE_FILE);
    if failure.exists() {
        let reason = fs::read_to_string(&failure).unwrap_or_default();
        return Err(RunError::GuestFailed(reason.trim().to_string()).into());
    }
    if !dir.join(METADATA_FILE).exists() {
        return Err(RunError::GuestFailed(format!("no {} written", METADATA_FILE)).into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// UML GUEST
// ---------------------------------------------------------------------------

pub fn run_uml_guest(dir: &Path) -> Result<()> {
    println!("\x1b[1m-- INSIDE KERNEL --\x1b[m");
    let cfg = RunConfig::load(&dir.join(CONFIG_FILE))?;

    println!("-- MOUNTING THINGS --");
    uml::mount_pseudo_filesystems(&cfg.collector.tracefs)?;
    let dev = uml::device_number(&cfg.uml.device)?;

    println!("-- THROTTLING BANDWIDTH --");
    uml::throttle(&dev, cfg.uml.write_bps)?;

    println!("-- MOUNTING FS --");
    uml::mount_device(&cfg.uml.device, &cfg.uml.mount)?;

    println!("-- PREPARING --");
    let loads = cfg.uml_loads();
    let tracefs = Tracefs::new(&cfg.collector.tracefs);
    let mut controller = Controller::new(Staging::adopt(dir), ProcessLauncher::current()?, tracefs, cfg.timing.clone());

    println!("-- STARTING EXPERIMENT --");
    drive(&mut controller, &RunPlan {
        metadata: RunMetadata::now(RunKind::Uml {
            memory: cfg.uml.memory.clone(),
            dev_size: cfg.uml.dev_size,
            write_bps: cfg.uml.write_bps,
        }),
        collector: &cfg.collector.command,
        loads: &loads,
        primary: Primary::LastLoad,
    })?;
    controller.finalize()?;
    Ok(())
}

// ENTRY POINT WHEN RUNNING AS PID 1. NEVER RETURNS.
pub fn guest_init(dir: Option<PathBuf>) -> ! {
    let result = match &dir {
        Some(dir) => run_uml_guest(dir),
        None => Err(anyhow::anyhow!("init started without a staging directory")),
    };
    if let Err(err) = result {
        eprintln!("GUEST RUN FAILED: {:#}", err);
        if let Some(dir) = &dir {
            let _ = fs::write(dir.join(FAILURE_FILE), format!("{:#}\n", err));
        }
    }
    println!("-- POWERING OFF --");
    uml::power_off()
}
