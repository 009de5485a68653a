// DIRTYBENCH RESULT DOCUMENTS
// EVERYTHING ANALYSIS READS FROM A RUN DIRECTORY. EACH FILE IS WRITTEN ONCE.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::load::ParamValue;

pub const METADATA_FILE: &str = "experiment.json";
pub const PRIMARY_FILE: &str = "main.json";

// RUN METADATA -- WRITTEN BEFORE ANY LOAD STARTS

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunKind {
    Uml {
        memory: String,
        dev_size: u64,
        write_bps: u64,
    },
    Live,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(flatten)]
    pub kind: RunKind,
    pub start: String,
    pub kernel: String,
}

impl RunMetadata {
    pub fn now(kind: RunKind) -> Self {
        Self {
            kind,
            start: clock::iso_now(),
            kernel: clock::kernel_release(),
        }
    }
}

// CYCLE TRACE -- ONE PER LOAD TASK, WRITTEN AT RUNNER EXIT

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleTrace {
    pub name: String,
    pub pid: u32,
    pub kind: String,
    pub params: BTreeMap<String, ParamValue>,
    pub start: f64,
    pub times: Vec<f64>,
}

pub fn trace_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("load.{}.json", name))
}

// PRIMARY TASK OUTCOME -- LIVE MODE ONLY

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryOutcome {
    pub start: f64,
    pub command: String,
    pub pid: u32,
    pub exit_code: Option<i32>,
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}
