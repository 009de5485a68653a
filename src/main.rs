// DIRTYBENCH -- STORAGE WRITEBACK EXPERIMENT HARNESS
// RUNS SYNTHETIC WRITE LOADS AGAINST A THROTTLED DEVICE WHILE trace-cmd
// RECORDS DIRTY-PAGE THROTTLING EVENTS, THEN VALIDATES THAT NO EVENT WAS LOST.
//
// THE SAME BINARY IS THE CONTROLLER, EVERY LOAD PROCESS, AND THE UML GUEST init.

mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dirtybench::config::RunConfig;
use dirtybench::experiment::{self, Mode};
use dirtybench::task::ProcessLauncher;

#[derive(Parser)]
#[command(name = "dirtybench")]
#[command(about = "DIRTYBENCH -- WRITEBACK EXPERIMENT HARNESS")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    // ISOLATED RUN INSIDE A USER-MODE LINUX KERNEL (DO NOT RUN AS ROOT)
    Uml {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,

        // UML KERNEL BINARY
        #[arg(long)]
        kernel: Option<PathBuf>,
    },

    // RUN ON THIS HOST WITH AN EXTERNAL PRIMARY COMMAND (ROOT)
    Live {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        output: Option<PathBuf>,

        // SHELL COMMAND WHOSE EXIT ENDS THE MEASUREMENT
        #[arg(long)]
        command: Option<String>,
    },

    // ONE LOAD PROCESS: <name> <kind> [<parameter>...]
    Load {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    // VERIFY HOST TOOLS AND KERNEL CONFIG
    Check,
}

fn load_config(path: Option<PathBuf>, output: Option<PathBuf>) -> Result<RunConfig> {
    let mut cfg = match path {
        Some(path) => RunConfig::load(&path)?,
        None => RunConfig::default(),
    };
    if let Some(output) = output {
        cfg.output = output;
    }
    Ok(cfg)
}

// STDERR, RUST_LOG OR info. THE UML GUEST CONSOLE IS ITS STDERR.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    // UML GUEST: WE ARE init. argv[1] IS THE STAGING DIRECTORY.
    if std::process::id() == 1 {
        experiment::guest_init(std::env::args_os().nth(1).map(PathBuf::from));
    }

    let cli = Cli::parse();

    match cli.command {
        Cmd::Uml { config, output, kernel } => {
            experiment::check_privilege(Mode::Uml, experiment::is_root())?;
            let mut cfg = load_config(config, output)?;
            if let Some(kernel) = kernel {
                cfg.uml.kernel = kernel;
            }
            let init = std::env::current_exe()?;
            experiment::run_uml_host(&cfg, &init)?;
        }
        Cmd::Live { config, output, command } => {
            experiment::check_privilege(Mode::Live, experiment::is_root())?;
            let mut cfg = load_config(config, output)?;
            if let Some(command) = command {
                cfg.live.command = command;
            }
            experiment::run_live(&cfg, ProcessLauncher::current()?)?;
        }
        Cmd::Load { args } => cli::load::run_load(&args)?,
        Cmd::Check => cli::check::run_check()?,
    }

    Ok(())
}
