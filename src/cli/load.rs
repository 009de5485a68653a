// LOAD RUNNER PROCESS ENTRY
// `dirtybench load <name> <kind> <param>...`
// SIGINT (OR SIGTERM) IS A CLEAN STOP: FINISH THE TRACE, EXIT 0.

use std::sync::Arc;

use anyhow::Result;

use dirtybench::error::LoadError;
use dirtybench::load;
use dirtybench::runner::LoadRunner;
use dirtybench::stop::StopSignal;

pub fn run_load(args: &[String]) -> Result<()> {
    // BEFORE ANYTHING ELSE: AN EARLY QUIESCE MUST STILL BE A CLEAN STOP
    let stop = Arc::new(StopSignal::new());
    let handler = stop.clone();
    ctrlc::set_handler(move || handler.trigger())?;

    let runner = match LoadRunner::from_args(args) {
        Ok(r) => r,
        Err(LoadError::Usage) => {
            eprint!("{}", load::usage());
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            eprint!("{}", load::usage());
            std::process::exit(1);
        }
    };

    let dir = std::env::current_dir()?;
    runner.execute(&dir, &stop)?;
    Ok(())
}
