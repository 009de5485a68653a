// DIRTYBENCH LOAD RUNNER
// DRIVES ONE LOAD UNIT UNTIL IT FINISHES OR THE STOP SIGNAL FIRES,
// TIMESTAMPING EVERY COMPLETED CYCLE. THE TRACE IS WRITTEN ONLY ON A CLEAN EXIT:
// A STARTUP OR I/O FAILURE LEAVES NO RECORD BEHIND.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::LoadError;
use crate::load::{Cycle, LoadKind, LoadUnit, ParamValue};
use crate::record::{self, CycleTrace};
use crate::stop::StopSignal;
use crate::timeline::CycleLog;

pub struct LoadRunner {
    name: String,
    kind: LoadKind,
    params: Vec<(&'static str, ParamValue)>,
}

impl LoadRunner {
    // <name> <kind> [<parameter>...]
    pub fn from_args(args: &[String]) -> Result<Self, LoadError> {
        match args {
            [name, kind, params @ ..] => Self::new(name, kind, params),
            _ => Err(LoadError::Usage),
        }
    }

    pub fn new(name: &str, kind: &str, raw: &[String]) -> Result<Self, LoadError> {
        let kind: LoadKind = kind.parse()?;
        let params = kind.parse_params(raw)?;
        Ok(Self {
            name: name.to_string(),
            kind,
            params,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> LoadKind {
        self.kind
    }

    pub fn run(&self, stop: &StopSignal) -> Result<CycleLog> {
        let values: Vec<ParamValue> = self.params.iter().map(|(_, v)| v.clone()).collect();
        let mut unit = LoadUnit::open(self.kind, &values)
            .with_context(|| format!("opening {} load {}", self.kind, self.name))?;
        debug!(name = %self.name, kind = %self.kind, "load started");

        let mut log = CycleLog::new();
        while !stop.is_set() {
            let cycle = unit.cycle(stop)
                .with_context(|| format!("{} load {} cycle {}", self.kind, self.name, log.len()))?;
            match cycle {
                Cycle::Done => break,
                // A CYCLE CUT SHORT BY STOP DOES NOT COUNT
                Cycle::Interrupted => break,
                // COMPLETED, EVEN IF THE STOP ARRIVED WHILE IT RAN
                Cycle::Continue => log.record(),
            }
        }
        debug!(name = %self.name, cycles = log.len(), stopped = stop.is_set(), "load finished");
        Ok(log)
    }

    pub fn trace(&self, log: CycleLog) -> CycleTrace {
        CycleTrace {
            name: self.name.clone(),
            pid: std::process::id(),
            kind: self.kind.name().to_string(),
            params: self.params.iter()
                .map(|(n, v)| (n.to_string(), v.clone()))
                .collect(),
            start: log.start(),
            times: log.into_times(),
        }
    }

    // RUN TO COMPLETION AND PERSIST load.<name>.json IN `dir`
    pub fn execute(&self, dir: &Path, stop: &StopSignal) -> Result<CycleTrace> {
        let log = self.run(stop)?;
        eprintln!("{} ({}): {}", self.name, self.kind, log.summary());
        let trace = self.trace(log);
        record::write_json(&record::trace_path(dir, &self.name), &trace)?;
        Ok(trace)
    }
}
