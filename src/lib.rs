// DIRTYBENCH -- STORAGE WRITEBACK EXPERIMENT HARNESS
// LIBRARY CRATE: EVERYTHING TESTABLE WITHOUT ROOT OR A UML KERNEL.
// THE BINARY ONLY PARSES ARGUMENTS AND DISPATCHES.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod experiment;
pub mod load;
pub mod record;
pub mod runner;
pub mod stop;
pub mod task;
pub mod timeline;
pub mod tracefs;
pub mod uml;
