// DIRTYBENCH RUN CONFIGURATION
// EVERY FIELD HAS A DEFAULT THAT REPRODUCES THE REFERENCE EXPERIMENT.
// A TOML FILE OVERRIDES ANY SUBSET. THE EFFECTIVE CONFIG IS COPIED INTO THE
// STAGING DIRECTORY, WHICH IS ALSO HOW THE UML GUEST RECEIVES IT.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::controller::Timing;
use crate::task::LoadSpec;
use crate::tracefs::TRACEFS;

pub const CONFIG_FILE: &str = "config.toml";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub command: String,
    pub tracefs: PathBuf,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            command: "trace-cmd record -e balance_dirty_pages -e global_dirty_state".to_string(),
            tracefs: PathBuf::from(TRACEFS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UmlConfig {
    pub kernel: PathBuf,
    pub memory: String,
    pub dev_size: u64,
    pub write_bps: u64,
    // BLOCK DEVICE AS SEEN FROM INSIDE THE GUEST
    pub device: PathBuf,
    pub mount: PathBuf,
    // WHERE THE HOST KEEPS THE BACKING FILE (TMPFS IS FASTEST)
    pub scratch: PathBuf,
}

impl Default for UmlConfig {
    fn default() -> Self {
        let uid = unsafe { libc::getuid() };
        Self {
            kernel: PathBuf::from("linux/linux"),
            memory: "150M".to_string(),
            dev_size: 130 * MIB,
            write_bps: MIB,
            device: PathBuf::from("/dev/ubdb"),
            mount: PathBuf::from("/mnt"),
            scratch: PathBuf::from(format!("/run/user/{}", uid)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub command: String,
    // RELATIVE TO THE STAGING DIRECTORY, REMOVED AFTER A SUCCESSFUL RUN
    pub scratch: PathBuf,
    // SECONDS BETWEEN LAUNCHING THE LOADS AND STARTING THE COMMAND
    pub settle: f64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            command: "pacman -Syu".to_string(),
            scratch: PathBuf::from("loads"),
            settle: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub output: PathBuf,
    pub collector: CollectorConfig,
    pub timing: Timing,
    pub uml: UmlConfig,
    pub live: LiveConfig,
    // EMPTY: USE THE MODE'S BUILT-IN PLAN
    pub loads: Vec<LoadSpec>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("serializing config")?;
        fs::write(path, text).with_context(|| format!("writing config {}", path.display()))
    }

    pub fn output_dir(&self) -> PathBuf {
        if self.output.as_os_str().is_empty() {
            PathBuf::from("exp")
        } else {
            self.output.clone()
        }
    }

    // THE LAST LOAD IS THE PRIMARY TASK IN UML MODE
    pub fn uml_loads(&self) -> Vec<LoadSpec> {
        if !self.loads.is_empty() {
            return self.loads.clone();
        }
        let mnt = |f: &str| self.uml.mount.join(f).to_string_lossy().into_owned();
        let dev = self.uml.dev_size as f64;
        vec![
            LoadSpec::new("c1", "control", ["0.05".to_string()]),
            LoadSpec::new("w1", "write", [mnt("write1"), "0.05".to_string()]),
            LoadSpec::new("mw1", "multiwrite", [mnt("multiwrite1"), "0.1".to_string()]),
            LoadSpec::new("l2", "load", [
                mnt("load2"),
                "43".to_string(),
                ((dev * 0.2) as u64).to_string(),
                "512".to_string(),
            ]),
            LoadSpec::new("l1", "load", [
                mnt("load1"),
                "5".to_string(),
                ((dev * 0.5) as u64).to_string(),
                "1024".to_string(),
            ]),
        ]
    }

    pub fn live_loads(&self) -> Vec<LoadSpec> {
        if !self.loads.is_empty() {
            return self.loads.clone();
        }
        let scratch = |f: &str| self.live.scratch.join(f).to_string_lossy().into_owned();
        vec![
            LoadSpec::new("c1", "control", ["0.05".to_string()]),
            LoadSpec::new("w1", "write", [scratch("write1"), "0.05".to_string()]),
            LoadSpec::new("mw1", "multiwrite", [scratch("multiwrite1"), "0.1".to_string()]),
        ]
    }

    pub fn live_timing(&self) -> Timing {
        Timing {
            settle: self.live.settle,
            ..self.timing.clone()
        }
    }
}
