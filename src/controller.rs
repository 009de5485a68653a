// DIRTYBENCH RUN CONTROLLER
// ONE RUN, ONE ATTEMPT. EXPLICIT STATE MACHINE:
//
//   STAGING -> RECORDING -> RUNNING -> VALIDATING -> QUIESCING -> FINALIZED
//        \__________\___________\___________\____________\______> FAILED
//
// EVERY TRANSITION CHECKS ITS SOURCE PHASE. ANY ERROR LANDS IN FAILED,
// WHICH IS TERMINAL. A FAILED RUN KEEPS ITS STAGING DIRECTORY AS THE ONLY
// ARTIFACT; ONLY A FINALIZED RUN IS RENAMED INTO THE PERMANENT NAMESPACE.
//
// TRACE LOSS IS CHECKED BEFORE ANY INTERRUPT IS SENT, SO A LOSSY CAPTURE
// IS DETECTED WHILE THE COLLECTOR STILL HOLDS ITS BUFFERS.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock;
use crate::error::RunError;
use crate::record::{self, PrimaryOutcome, RunMetadata};
use crate::task::{Launcher, LoadSpec, TaskHandle};
use crate::tracefs::{self, Tracefs};

pub const STAGING_PREFIX: &str = "_";

const READY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Staging,
    Recording,
    Running,
    Validating,
    Quiescing,
    Finalized,
    Failed,
}

// ---------------------------------------------------------------------------
// STAGING DIRECTORY
// ---------------------------------------------------------------------------

pub struct Staging {
    dir: PathBuf,
    permanent: Option<PathBuf>,
}

impl Staging {
    // <root>/_<name>, RENAMED TO <root>/<name> ON SUCCESS
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        let dir = root.join(format!("{}{}", STAGING_PREFIX, name));
        fs::create_dir_all(root).with_context(|| format!("creating {}", root.display()))?;
        fs::create_dir(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self {
            dir,
            permanent: Some(root.join(name)),
        })
    }

    // A DIRECTORY STAGED BY SOMEONE ELSE (THE UML HOST). NEVER RENAMED HERE.
    pub fn adopt(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            permanent: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn finalize(self) -> Result<PathBuf> {
        match self.permanent {
            Some(permanent) => {
                fs::rename(&self.dir, &permanent).with_context(|| {
                    format!("renaming {} to {}", self.dir.display(), permanent.display())
                })?;
                Ok(permanent)
            }
            None => Ok(self.dir),
        }
    }
}

// ---------------------------------------------------------------------------
// TIMING
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    // FIXED MINIMUM WAIT AFTER STARTING THE COLLECTOR
    pub warmup: f64,
    // EXTRA WAIT FOR tracing_on AFTER THE WARM-UP, WHEN THE PROBE EXISTS
    pub ready_timeout: f64,
    // BOUND ON THE JOIN AFTER THE INTERRUPT
    pub grace: f64,
    // PAUSE BETWEEN LAUNCHING LOADS AND STARTING A PRIMARY COMMAND
    pub settle: f64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            warmup: 3.0,
            ready_timeout: 10.0,
            grace: 4.0,
            settle: 0.0,
        }
    }
}

fn secs(v: f64) -> Duration {
    Duration::from_secs_f64(v.max(0.0))
}

// ---------------------------------------------------------------------------
// PRIMARY TASK
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Primary {
    // THE LAST-LAUNCHED LOAD ENDS THE MEASUREMENT WINDOW
    LastLoad,
    // AN EXTERNAL SHELL COMMAND; ITS OUTCOME IS PERSISTED AS main.json
    Command(String),
    // NO PRIMARY: WAIT FOR EVERY LOAD TO FINISH ON ITS OWN
    None,
}

// ---------------------------------------------------------------------------
// CONTROLLER
// ---------------------------------------------------------------------------

pub struct Controller<L: Launcher> {
    phase: Phase,
    staging: Staging,
    launcher: L,
    tracefs: Tracefs,
    timing: Timing,
    // COLLECTOR FIRST, THEN LOADS IN LAUNCH ORDER
    tasks: Vec<Box<dyn TaskHandle>>,
}

impl<L: Launcher> Controller<L> {
    pub fn new(staging: Staging, launcher: L, tracefs: Tracefs, timing: Timing) -> Self {
        Self {
            phase: Phase::Staging,
            staging,
            launcher,
            tracefs,
            timing,
            tasks: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn dir(&self) -> &Path {
        self.staging.dir()
    }

    pub fn live_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn expect_phase(&self, from: Phase, to: Phase) -> Result<()> {
        if self.phase != from {
            return Err(RunError::Phase { from: self.phase, to }.into());
        }
        Ok(())
    }

    // RUN ONE TRANSITION. SUCCESS MOVES TO `to`, ANY ERROR MOVES TO FAILED.
    fn transition<T>(&mut self, from: Phase, to: Phase, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.expect_phase(from, to)?;
        match f(self) {
            Ok(value) => {
                if from != to {
                    debug!(?from, ?to, "phase");
                }
                self.phase = to;
                Ok(value)
            }
            Err(err) => {
                info!(?from, ?to, error = %err, "run failed");
                self.phase = Phase::Failed;
                Err(err)
            }
        }
    }

    pub fn write_metadata(&mut self, meta: &RunMetadata) -> Result<()> {
        self.transition(Phase::Staging, Phase::Staging, |c| {
            record::write_json(&c.dir().join(record::METADATA_FILE), meta)
        })
    }

    pub fn start_collector(&mut self, command: &str) -> Result<()> {
        self.transition(Phase::Staging, Phase::Recording, |c| {
            let dir = c.staging.dir().to_path_buf();
            let mut collector = c.launcher.command("collector", command, &dir)?;
            info!(pid = collector.pid(), command, "trace collector started");

            let warmup = secs(c.timing.warmup);
            if let Some(status) = collector.wait_timeout(warmup)? {
                return Err(RunError::CollectorExited { status }.into());
            }
            let events = tracefs::collector_events(command);
            let waited = wait_ready(&c.tracefs, &events, collector.as_mut(), secs(c.timing.ready_timeout))?;
            debug!(?waited, "collector ready");
            c.tasks.push(collector);
            Ok(())
        })
    }

    pub fn launch(&mut self, loads: &[LoadSpec]) -> Result<()> {
        self.transition(Phase::Recording, Phase::Running, |c| {
            let dir = c.staging.dir().to_path_buf();
            for spec in loads {
                let task = c.launcher.load(spec, &dir)?;
                info!(name = %spec.name, kind = %spec.kind, pid = task.pid(), "load launched");
                c.tasks.push(task);
            }
            Ok(())
        })
    }

    // BLOCK UNTIL THE PRIMARY TASK ENDS. A NONZERO EXIT FAILS THE RUN.
    pub fn wait_primary(&mut self, primary: &Primary) -> Result<Option<PrimaryOutcome>> {
        self.transition(Phase::Running, Phase::Running, |c| match primary {
            Primary::LastLoad => {
                // NEVER THE COLLECTOR
                if c.tasks.len() < 2 {
                    anyhow::bail!("no load task to wait for");
                }
                let mut task = c.tasks.pop().context("no load task to wait for")?;
                info!(task = task.label(), "waiting for primary load");
                let status = task.wait()?;
                if !status.success() {
                    return Err(RunError::TaskFailed { task: task.label().to_string(), status }.into());
                }
                Ok(None)
            }
            Primary::Command(command) => {
                let settle = secs(c.timing.settle);
                if !settle.is_zero() {
                    std::thread::sleep(settle);
                }
                let dir = c.staging.dir().to_path_buf();
                let start = clock::monotonic_secs();
                let mut task = c.launcher.command("main", command, &dir)?;
                info!(pid = task.pid(), command = command.as_str(), "primary command started");
                let status = task.wait()?;
                let outcome = PrimaryOutcome {
                    start,
                    command: command.clone(),
                    pid: task.pid(),
                    exit_code: status.code(),
                };
                record::write_json(&c.staging.dir().join(record::PRIMARY_FILE), &outcome)?;
                if !status.success() {
                    return Err(RunError::TaskFailed { task: command.clone(), status }.into());
                }
                Ok(Some(outcome))
            }
            Primary::None => {
                // EVERY LOAD MUST END BY ITSELF; ONLY THE COLLECTOR REMAINS
                let loads = c.tasks.split_off(1.min(c.tasks.len()));
                for mut task in loads {
                    let status = task.wait()?;
                    if !status.success() {
                        return Err(RunError::TaskFailed { task: task.label().to_string(), status }.into());
                    }
                }
                Ok(None)
            }
        })
    }

    pub fn validate(&mut self) -> Result<()> {
        self.transition(Phase::Running, Phase::Validating, |c| c.tracefs.check_lost_events())
    }

    // SIGINT EVERYTHING STILL ALIVE, THEN JOIN AGAINST ONE SHARED DEADLINE
    pub fn quiesce(&mut self) -> Result<()> {
        self.transition(Phase::Validating, Phase::Quiescing, |c| {
            for task in c.tasks.iter_mut() {
                if task.try_wait()?.is_none() {
                    debug!(task = task.label(), pid = task.pid(), "interrupt");
                    task.interrupt()
                        .with_context(|| format!("interrupting {}", task.label()))?;
                }
            }
            let grace = secs(c.timing.grace);
            let deadline = Instant::now() + grace;
            for mut task in c.tasks.drain(..) {
                match task.wait_until(deadline)? {
                    None => {
                        return Err(RunError::Timeout { task: task.label().to_string(), grace }.into());
                    }
                    Some(status) if !status.success() => {
                        return Err(RunError::TaskFailed { task: task.label().to_string(), status }.into());
                    }
                    Some(_) => debug!(task = task.label(), "exited cleanly"),
                }
            }
            Ok(())
        })
    }

    pub fn finalize(mut self) -> Result<PathBuf> {
        self.expect_phase(Phase::Quiescing, Phase::Finalized)?;
        self.phase = Phase::Finalized;
        let Controller { staging, .. } = self;
        staging.finalize()
    }
}

// FIXED WARM-UP ALREADY ELAPSED. POLL THE PROBE IF THERE IS ONE.
fn wait_ready(
    tracefs: &Tracefs,
    events: &[String],
    collector: &mut dyn TaskHandle,
    timeout: Duration,
) -> Result<Duration> {
    let start = Instant::now();
    loop {
        match tracefs.is_recording(events) {
            None | Some(true) => return Ok(start.elapsed()),
            Some(false) => {}
        }
        if let Some(status) = collector.try_wait()? {
            return Err(RunError::CollectorExited { status }.into());
        }
        if start.elapsed() >= timeout {
            return Err(RunError::CollectorNotReady { waited: start.elapsed() }.into());
        }
        std::thread::sleep(READY_POLL);
    }
}

// ---------------------------------------------------------------------------
// FULL SEQUENCE
// ---------------------------------------------------------------------------

pub struct RunPlan<'a> {
    pub metadata: RunMetadata,
    pub collector: &'a str,
    pub loads: &'a [LoadSpec],
    pub primary: Primary,
}

// PHASES UP TO QUIESCING. THE CALLER DECIDES WHAT HAPPENS BEFORE FINALIZE.
pub fn drive<L: Launcher>(controller: &mut Controller<L>, plan: &RunPlan<'_>) -> Result<Option<PrimaryOutcome>> {
    controller.write_metadata(&plan.metadata)?;
    controller.start_collector(plan.collector)?;
    controller.launch(plan.loads)?;
    let outcome = controller.wait_primary(&plan.primary)?;
    controller.validate()?;
    controller.quiesce()?;
    Ok(outcome)
}
