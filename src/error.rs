// DIRTYBENCH FAILURE TAXONOMY
// EVERY RUN FAILURE IS FATAL. NOTHING HERE IS RETRIED.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::controller::Phase;
use crate::load::ParamType;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("task {task} terminated with {status}")]
    TaskFailed { task: String, status: ExitStatus },

    #[error("task {task} did not exit within {grace:?} of the interrupt")]
    Timeout { task: String, grace: Duration },

    #[error("{lost} lost events on {unit}")]
    LostEvents { unit: String, lost: u64 },

    #[error("{unit} stats have no '{counter}' counter")]
    MissingCounter { unit: String, counter: String },

    #[error("trace collector exited during warm-up ({status})")]
    CollectorExited { status: ExitStatus },

    #[error("trace collector not recording after {waited:?}")]
    CollectorNotReady { waited: Duration },

    #[error("cannot enter {to:?} from {from:?}")]
    Phase { from: Phase, to: Phase },

    #[error("{0}")]
    Privilege(&'static str),

    #[error("guest run failed: {0}")]
    GuestFailed(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum LoadError {
    #[error("expected <name> <kind> [<parameter>...]")]
    Usage,

    #[error("invalid load {0:?}")]
    UnknownKind(String),

    #[error("{kind} expects {expected} params, found {found}")]
    Arity { kind: &'static str, expected: usize, found: usize },

    #[error("parameter {name}: {value:?} is not a valid {expected}")]
    InvalidParam { name: &'static str, value: String, expected: ParamType },
}
