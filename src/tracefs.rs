// DIRTYBENCH TRACEFS ACCESS
// TRACE-LOSS VALIDATION OVER per_cpu/<cpu>/stats AND A READINESS PROBE
// FOR THE COLLECTOR. THE ROOT IS CONFIGURABLE SO TESTS CAN USE A FAKE TREE.
//
// per_cpu/cpu0/stats LOOKS LIKE:
//   entries: 0
//   overrun: 0
//   commit overrun: 0
//   ...
//   dropped events: 0

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::error::RunError;

pub const TRACEFS: &str = "/sys/kernel/tracing";

const OVERRUN: &str = "overrun";
const DROPPED: &str = "dropped events";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStats {
    pub unit: String,
    pub overrun: u64,
    pub dropped: u64,
}

impl UnitStats {
    pub fn lost(&self) -> u64 {
        self.overrun.saturating_add(self.dropped)
    }
}

fn stat_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?): (.*)$").expect("static regex"))
}

pub fn parse_stats(unit: &str, text: &str) -> Result<UnitStats> {
    let stats: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| stat_line().captures(line.trim_end()))
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .collect();

    let counter = |name: &str| -> Result<u64> {
        let raw = stats.get(name).ok_or_else(|| RunError::MissingCounter {
            unit: unit.to_string(),
            counter: name.to_string(),
        })?;
        raw.trim()
            .parse()
            .with_context(|| format!("{} {}: {:?}", unit, name, raw))
    };

    Ok(UnitStats {
        unit: unit.to_string(),
        overrun: counter(OVERRUN)?,
        dropped: counter(DROPPED)?,
    })
}

#[derive(Debug, Clone)]
pub struct Tracefs {
    root: PathBuf,
}

impl Default for Tracefs {
    fn default() -> Self {
        Self::new(TRACEFS)
    }
}

impl Tracefs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // STATS FOR EVERY PROCESSING UNIT, SORTED BY NAME
    pub fn unit_stats(&self) -> Result<Vec<UnitStats>> {
        let base = self.root.join("per_cpu");
        let mut units = Vec::new();
        for entry in fs::read_dir(&base).with_context(|| format!("listing {}", base.display()))? {
            let entry = entry?;
            let unit = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path().join("stats");
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            units.push(parse_stats(&unit, &text)?);
        }
        units.sort_by(|a, b| a.unit.cmp(&b.unit));
        Ok(units)
    }

    // FAILS ON THE FIRST UNIT WITH ANY OVERRUN OR DROPPED EVENT
    pub fn check_lost_events(&self) -> Result<()> {
        for stats in self.unit_stats()? {
            let lost = stats.lost();
            if lost > 0 {
                return Err(RunError::LostEvents { unit: stats.unit, lost }.into());
            }
        }
        Ok(())
    }

    // events/<system>/<event>/enable. A BARE NAME IS LOOKED UP IN EVERY SYSTEM.
    fn event_enable(&self, event: &str) -> Option<PathBuf> {
        let events = self.root.join("events");
        if let Some((system, name)) = event.split_once(':') {
            let path = events.join(system).join(name).join("enable");
            return path.is_file().then_some(path);
        }
        fs::read_dir(&events).ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path().join(event).join("enable"))
            .find(|p| p.is_file())
    }

    // NONE WHEN THERE IS NOTHING TO PROBE. tracing_on IS 1 ON A FRESH TRACEFS,
    // SO THE COLLECTOR'S OWN EVENTS ARE THE SIGNAL WHEN THEY CAN BE FOUND.
    pub fn is_recording(&self, events: &[String]) -> Option<bool> {
        let tracing_on = fs::read_to_string(self.root.join("tracing_on"))
            .ok()
            .map(|s| s.trim() == "1");
        let enables: Vec<PathBuf> = events.iter()
            .filter_map(|e| self.event_enable(e))
            .collect();
        if enables.is_empty() {
            return tracing_on;
        }
        let enabled = enables.iter()
            .all(|p| fs::read_to_string(p).map(|s| s.trim() == "1").unwrap_or(false));
        Some(enabled && tracing_on != Some(false))
    }
}

fn event_flag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)-e\s+(\S+)").expect("static regex"))
}

// EVENTS SELECTED WITH `-e <event>` ON A trace-cmd STYLE COMMAND LINE
pub fn collector_events(command: &str) -> Vec<String> {
    event_flag()
        .captures_iter(command)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}
