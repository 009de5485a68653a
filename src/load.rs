// DIRTYBENCH LOAD UNITS
// ONE CLOSED SET OF SYNTHETIC WORKLOADS. EACH ADVANCES ONE CYCLE AT A TIME
// AND ENCODES ITS OWN PACING. ALL STATE IS PER-INSTANCE.
//
//   control     <idle>                      SLEEP ONLY
//   write       <file> <idle>               REWRITE A COUNTER AT OFFSET 0, SLEEP
//   load        <file> <wait> <size> <block> WAIT ONCE, THEN APPEND ZERO BLOCKS UNTIL <size>
//   multiwrite  <file> <idle>               CREATE <file>.<n> WITH 4 BYTES, SLEEP

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::stop::StopSignal;

const MULTIWRITE_CONTENT: &[u8; 4] = b"test";

// LARGEST ACCEPTED <block>. THE BUFFER IS ALLOCATED UP FRONT.
pub const MAX_BLOCK: u64 = 64 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    Float,
    Int,
    Str,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamType::Float => "float",
            ParamType::Int => "int",
            ParamType::Str => "string",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(u64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    fn as_secs(&self) -> io::Result<Duration> {
        match self {
            ParamValue::Float(v) => Ok(Duration::from_secs_f64(*v)),
            other => Err(mismatch("float", other)),
        }
    }

    fn as_int(&self) -> io::Result<u64> {
        match self {
            ParamValue::Int(v) => Ok(*v),
            other => Err(mismatch("int", other)),
        }
    }

    fn as_str(&self) -> io::Result<&str> {
        match self {
            ParamValue::Str(v) => Ok(v),
            other => Err(mismatch("string", other)),
        }
    }
}

fn mismatch(wanted: &str, got: &ParamValue) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("expected {} parameter, got {:?}", wanted, got))
}

pub struct ParamDef {
    pub name: &'static str,
    pub ty: ParamType,
    // ZERO WOULD NEVER MAKE PROGRESS (BLOCK SIZE)
    pub nonzero: bool,
    pub max: Option<u64>,
}

const fn param(name: &'static str, ty: ParamType) -> ParamDef {
    ParamDef { name, ty, nonzero: false, max: None }
}

const CONTROL_PARAMS: [ParamDef; 1] = [param("idle", ParamType::Float)];
const WRITE_PARAMS: [ParamDef; 2] = [
    param("file", ParamType::Str),
    param("idle", ParamType::Float),
];
const LOAD_PARAMS: [ParamDef; 4] = [
    param("file", ParamType::Str),
    param("wait", ParamType::Float),
    param("size", ParamType::Int),
    ParamDef { name: "block", ty: ParamType::Int, nonzero: true, max: Some(MAX_BLOCK) },
];
const MULTIWRITE_PARAMS: [ParamDef; 2] = [
    param("file", ParamType::Str),
    param("idle", ParamType::Float),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadKind {
    Control,
    Write,
    BulkLoad,
    MultiWrite,
}

pub const KINDS: [LoadKind; 4] = [
    LoadKind::Control,
    LoadKind::BulkLoad,
    LoadKind::Write,
    LoadKind::MultiWrite,
];

impl LoadKind {
    pub fn name(self) -> &'static str {
        match self {
            LoadKind::Control => "control",
            LoadKind::Write => "write",
            LoadKind::BulkLoad => "load",
            LoadKind::MultiWrite => "multiwrite",
        }
    }

    pub fn params(self) -> &'static [ParamDef] {
        match self {
            LoadKind::Control => &CONTROL_PARAMS,
            LoadKind::Write => &WRITE_PARAMS,
            LoadKind::BulkLoad => &LOAD_PARAMS,
            LoadKind::MultiWrite => &MULTIWRITE_PARAMS,
        }
    }

    // CHECK ARITY, THEN CONVERT EACH RAW STRING WITH ITS DECLARED TYPE
    pub fn parse_params(self, raw: &[String]) -> Result<Vec<(&'static str, ParamValue)>, LoadError> {
        let defs = self.params();
        if raw.len() != defs.len() {
            return Err(LoadError::Arity {
                kind: self.name(),
                expected: defs.len(),
                found: raw.len(),
            });
        }
        defs.iter()
            .zip(raw)
            .map(|(def, value)| parse_value(def, value).map(|v| (def.name, v)))
            .collect()
    }

    pub fn usage(self) -> String {
        let mut tokens = vec![self.name().to_string()];
        tokens.extend(self.params().iter().map(|p| format!("<{}>", p.name)));
        tokens.join(" ")
    }
}

impl FromStr for LoadKind {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KINDS.iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| LoadError::UnknownKind(s.to_string()))
    }
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_value(def: &ParamDef, value: &str) -> Result<ParamValue, LoadError> {
    let invalid = || LoadError::InvalidParam {
        name: def.name,
        value: value.to_string(),
        expected: def.ty,
    };
    match def.ty {
        ParamType::Float => {
            // NEGATIVE OR NON-FINITE SLEEPS HAVE NO DURATION
            let v: f64 = value.trim().parse().map_err(|_| invalid())?;
            if !v.is_finite() || v < 0.0 {
                return Err(invalid());
            }
            Ok(ParamValue::Float(v))
        }
        ParamType::Int => {
            let v: u64 = value.trim().parse().map_err(|_| invalid())?;
            if def.nonzero && v == 0 {
                return Err(invalid());
            }
            if def.max.is_some_and(|max| v > max) {
                return Err(invalid());
            }
            Ok(ParamValue::Int(v))
        }
        ParamType::Str => Ok(ParamValue::Str(value.to_string())),
    }
}

// FULL LISTING FOR THE LOAD RUNNER USAGE MESSAGE
pub fn usage() -> String {
    let mut out = String::from("Usage: dirtybench load <name> <kind> [<parameter>...]\nAvailable loads:\n");
    for kind in KINDS {
        out.push_str(&format!(" {}\n", kind.usage()));
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cycle {
    Continue,
    // PACING SLEEP CUT SHORT: THE CYCLE DID NOT COMPLETE
    Interrupted,
    Done,
}

pub enum LoadUnit {
    Control {
        idle: Duration,
    },
    Write {
        file: File,
        idle: Duration,
        counter: u64,
    },
    BulkLoad {
        file: File,
        wait: Duration,
        waited: bool,
        remaining: u64,
        block: Vec<u8>,
    },
    MultiWrite {
        prefix: String,
        idle: Duration,
        index: u64,
    },
}

impl LoadUnit {
    // PARAMS MUST COME FROM kind.parse_params()
    pub fn open(kind: LoadKind, params: &[ParamValue]) -> io::Result<Self> {
        let at = |i: usize| {
            params.get(i).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("{} is missing parameter {}", kind, i))
            })
        };
        let unit = match kind {
            LoadKind::Control => LoadUnit::Control {
                idle: at(0)?.as_secs()?,
            },
            LoadKind::Write => LoadUnit::Write {
                file: create(at(0)?.as_str()?)?,
                idle: at(1)?.as_secs()?,
                counter: 0,
            },
            LoadKind::BulkLoad => {
                let size = at(2)?.as_int()?;
                let block = at(3)?.as_int()?.min(size).min(MAX_BLOCK);
                LoadUnit::BulkLoad {
                    file: create(at(0)?.as_str()?)?,
                    wait: at(1)?.as_secs()?,
                    waited: false,
                    remaining: size,
                    block: vec![0u8; block as usize],
                }
            }
            LoadKind::MultiWrite => LoadUnit::MultiWrite {
                prefix: at(0)?.as_str()?.to_string(),
                idle: at(1)?.as_secs()?,
                index: 0,
            },
        };
        Ok(unit)
    }

    pub fn kind(&self) -> LoadKind {
        match self {
            LoadUnit::Control { .. } => LoadKind::Control,
            LoadUnit::Write { .. } => LoadKind::Write,
            LoadUnit::BulkLoad { .. } => LoadKind::BulkLoad,
            LoadUnit::MultiWrite { .. } => LoadKind::MultiWrite,
        }
    }

    // ADVANCE ONE CYCLE. ANY I/O ERROR IS FATAL TO THE RUNNER.
    // Interrupted ONLY WHEN THE PACING SLEEP WAS CUT SHORT BY STOP.
    pub fn cycle(&mut self, stop: &StopSignal) -> io::Result<Cycle> {
        let slept = match self {
            LoadUnit::Control { idle } => stop.sleep(*idle),
            LoadUnit::Write { file, idle, counter } => {
                file.write_all_at(counter.to_string().as_bytes(), 0)?;
                *counter += 1;
                stop.sleep(*idle)
            }
            LoadUnit::BulkLoad { file, wait, waited, remaining, block } => {
                if !*waited {
                    *waited = true;
                    stop.sleep(*wait)
                } else if *remaining == 0 {
                    return Ok(Cycle::Done);
                } else {
                    // LAST BLOCK IS TRUNCATED SO THE FILE ENDS AT EXACTLY <size>
                    let n = (*remaining).min(block.len() as u64) as usize;
                    file.write_all(&block[..n])?;
                    *remaining -= n as u64;
                    true
                }
            }
            LoadUnit::MultiWrite { prefix, idle, index } => {
                let mut f = create(&format!("{}.{}", prefix, index))?;
                f.write_all(MULTIWRITE_CONTENT)?;
                *index += 1;
                stop.sleep(*idle)
            }
        };
        Ok(if slept { Cycle::Continue } else { Cycle::Interrupted })
    }
}

fn create(path: &str) -> io::Result<File> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn kind_names_roundtrip() {
        for kind in KINDS {
            assert_eq!(kind.name().parse::<LoadKind>().unwrap(), kind);
        }
        assert_eq!(
            "bogus".parse::<LoadKind>(),
            Err(LoadError::UnknownKind("bogus".to_string()))
        );
    }

    #[test]
    fn bulk_kind_is_named_load() {
        assert_eq!("load".parse::<LoadKind>().unwrap(), LoadKind::BulkLoad);
    }

    #[test]
    fn parse_control() {
        let params = LoadKind::Control.parse_params(&raw(&["0.05"])).unwrap();
        assert_eq!(params, vec![("idle", ParamValue::Float(0.05))]);
    }

    #[test]
    fn parse_load_types_in_order() {
        let params = LoadKind::BulkLoad
            .parse_params(&raw(&["/mnt/load1", "5", "4096", "1024"]))
            .unwrap();
        assert_eq!(params[0], ("file", ParamValue::Str("/mnt/load1".to_string())));
        assert_eq!(params[1], ("wait", ParamValue::Float(5.0)));
        assert_eq!(params[2], ("size", ParamValue::Int(4096)));
        assert_eq!(params[3], ("block", ParamValue::Int(1024)));
    }

    #[test]
    fn arity_mismatch() {
        let err = LoadKind::Write.parse_params(&raw(&["/tmp/x"])).unwrap_err();
        assert_eq!(err, LoadError::Arity { kind: "write", expected: 2, found: 1 });
        let err = LoadKind::Control.parse_params(&raw(&["1", "2"])).unwrap_err();
        assert_eq!(err, LoadError::Arity { kind: "control", expected: 1, found: 2 });
    }

    #[test]
    fn invalid_values_rejected() {
        // INT PARAM GIVEN A FLOAT
        let err = LoadKind::BulkLoad
            .parse_params(&raw(&["f", "0", "1.5", "512"]))
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidParam { name: "size", .. }));

        // ZERO BLOCK NEVER FINISHES
        let err = LoadKind::BulkLoad
            .parse_params(&raw(&["f", "0", "4096", "0"]))
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidParam { name: "block", .. }));

        for bad in ["abc", "-1", "nan", "inf"] {
            let err = LoadKind::Control.parse_params(&raw(&[bad])).unwrap_err();
            assert!(matches!(err, LoadError::InvalidParam { name: "idle", .. }), "{}", bad);
        }
    }

    #[test]
    fn usage_lists_every_kind() {
        let text = usage();
        assert!(text.contains("control <idle>"));
        assert!(text.contains("write <file> <idle>"));
        assert!(text.contains("load <file> <wait> <size> <block>"));
        assert!(text.contains("multiwrite <file> <idle>"));
    }

    #[test]
    fn control_never_finishes() {
        let stop = StopSignal::new();
        let mut unit = LoadUnit::open(LoadKind::Control, &[ParamValue::Float(0.0)]).unwrap();
        for _ in 0..100 {
            assert_eq!(unit.cycle(&stop).unwrap(), Cycle::Continue);
        }
    }

    #[test]
    fn oversized_block_rejected() {
        let huge = (1u64 << 62).to_string();
        let err = LoadKind::BulkLoad
            .parse_params(&raw(&["f", "0", &huge, &huge]))
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidParam { name: "block", .. }));
        let max = MAX_BLOCK.to_string();
        assert!(LoadKind::BulkLoad.parse_params(&raw(&["f", "0", &huge, &max])).is_ok());
    }

    #[test]
    fn block_buffer_never_exceeds_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("small").to_string_lossy().into_owned();
        let params = [
            ParamValue::Str(file),
            ParamValue::Float(0.0),
            ParamValue::Int(10),
            ParamValue::Int(MAX_BLOCK),
        ];
        match LoadUnit::open(LoadKind::BulkLoad, &params).unwrap() {
            LoadUnit::BulkLoad { block, .. } => assert_eq!(block.len(), 10),
            _ => panic!("wrong unit"),
        }
    }

    #[test]
    fn cut_short_sleep_is_interrupted() {
        let stop = StopSignal::new();
        stop.trigger();
        let mut unit = LoadUnit::open(LoadKind::Control, &[ParamValue::Float(10.0)]).unwrap();
        assert_eq!(unit.cycle(&stop).unwrap(), Cycle::Interrupted);
    }

    #[test]
    fn block_write_completes_after_stop() {
        // A WRITE HAS NO SLEEP TO CUT SHORT: IT ALWAYS COUNTS
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blk").to_string_lossy().into_owned();
        let params = [
            ParamValue::Str(file),
            ParamValue::Float(0.0),
            ParamValue::Int(8),
            ParamValue::Int(8),
        ];
        let stop = StopSignal::new();
        let mut unit = LoadUnit::open(LoadKind::BulkLoad, &params).unwrap();
        assert_eq!(unit.cycle(&stop).unwrap(), Cycle::Continue);
        stop.trigger();
        assert_eq!(unit.cycle(&stop).unwrap(), Cycle::Continue);
        assert_eq!(unit.cycle(&stop).unwrap(), Cycle::Done);
    }

    #[test]
    fn open_rejects_mistyped_params() {
        let err = LoadUnit::open(LoadKind::Control, &[ParamValue::Int(1)]).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(LoadUnit::open(LoadKind::Control, &[]).is_err());
    }
}
