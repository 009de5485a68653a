// DIRTYBENCH TASK HANDLES
// EVERY PROCESS THE CONTROLLER STARTS IS A BLACK BOX BEHIND TaskHandle:
// INTERRUPT IT, POLL IT, WAIT FOR IT. Launcher IS THE ONLY WAY TO START ONE.
// EACH CHILD GETS ITS OWN PROCESS GROUP SO SIGINT REACHES SHELL WRAPPERS
// AND THEIR CHILDREN ALIKE, AND A TERMINAL CTRL+C DOES NOT.

use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait TaskHandle {
    fn label(&self) -> &str;

    fn pid(&self) -> u32;

    // GRACEFUL STOP REQUEST. NEVER A KILL.
    fn interrupt(&mut self) -> io::Result<()>;

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    fn wait(&mut self) -> io::Result<ExitStatus>;

    // NONE IF THE TASK IS STILL RUNNING AT THE DEADLINE
    fn wait_until(&mut self, deadline: Instant) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        self.wait_until(Instant::now() + timeout)
    }
}

// ONE LOAD TASK AS DECLARED IN THE RUN PLAN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl LoadSpec {
    pub fn new<I, S>(name: &str, kind: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            params: params.into_iter().map(|p| p.to_string()).collect(),
        }
    }
}

pub trait Launcher {
    // SHELL COMMAND LINE, RUN IN `dir`
    fn command(&mut self, label: &str, command: &str, dir: &Path) -> Result<Box<dyn TaskHandle>>;

    fn load(&mut self, spec: &LoadSpec, dir: &Path) -> Result<Box<dyn TaskHandle>>;
}

pub struct ChildTask {
    label: String,
    child: Child,
    pgid: i32,
    status: Option<ExitStatus>,
}

impl ChildTask {
    pub fn spawn(label: &str, mut cmd: Command) -> Result<Self> {
        let child = cmd
            .process_group(0)
            .spawn()
            .with_context(|| format!("starting {}", label))?;
        let pgid = child.id() as i32;
        debug!(task = label, pid = pgid, "spawned");
        Ok(Self {
            label: label.to_string(),
            child,
            pgid,
            status: None,
        })
    }
}

impl TaskHandle for ChildTask {
    fn label(&self) -> &str {
        &self.label
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn interrupt(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        if unsafe { libc::killpg(self.pgid, libc::SIGINT) } != 0 {
            let err = io::Error::last_os_error();
            // GROUP ALREADY GONE: NOTHING LEFT TO STOP
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ChildTask {
    fn drop(&mut self) {
        if let Ok(None) = self.try_wait() {
            warn!(task = %self.label, pid = self.pgid, "still running at teardown, interrupting");
            let _ = self.interrupt();
        }
    }
}

// SPAWNS REAL PROCESSES. LOADS RE-EXECUTE THIS BINARY AS `<exe> load ...`.
pub struct ProcessLauncher {
    exe: PathBuf,
}

impl ProcessLauncher {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    pub fn current() -> Result<Self> {
        Ok(Self::new(std::env::current_exe().context("locating own executable")?))
    }
}

impl Launcher for ProcessLauncher {
    fn command(&mut self, label: &str, command: &str, dir: &Path) -> Result<Box<dyn TaskHandle>> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(dir);
        Ok(Box::new(ChildTask::spawn(label, cmd)?))
    }

    fn load(&mut self, spec: &LoadSpec, dir: &Path) -> Result<Box<dyn TaskHandle>> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("load")
            .arg(&spec.name)
            .arg(&spec.kind)
            .args(&spec.params)
            .current_dir(dir);
        Ok(Box::new(ChildTask::spawn(&spec.name, cmd)?))
    }
}
