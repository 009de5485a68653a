use std::io::Read;
use std::path::Path;
use std::process::Command;

use anyhow::Result;

use dirtybench::config::RunConfig;
use dirtybench::tracefs::TRACEFS;

const KERNEL_OPTIONS: [&str; 2] = ["CONFIG_BLK_DEV_THROTTLING=y", "CONFIG_FTRACE=y"];

fn check_tool(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let mut ok = true;
    for option in KERNEL_OPTIONS {
        let name = option.trim_end_matches("=y");
        if config.lines().any(|l| l == option) {
            println!("  {:<28}OK", name);
        } else {
            println!("  {:<28}NOT FOUND", name);
            ok = false;
        }
    }
    ok
}

// THE TRACE-LOSS CHECK READS per_cpu/*/stats
fn check_tracefs(root: &Path) -> bool {
    if root.join("per_cpu").is_dir() {
        println!("  tracefs               MOUNTED ({})", root.display());
        true
    } else {
        println!("  tracefs               NOT MOUNTED at {}", root.display());
        false
    }
}

pub fn run_check() -> Result<()> {
    println!("DIRTYBENCH DEPENDENCY CHECK");
    println!();

    let mut ok = true;
    let tools = ["trace-cmd", "mkfs.ext2", "mount"];
    for tool in &tools {
        if check_tool(tool) {
            println!("  {:<24}OK", tool);
        } else {
            println!("  {:<24}MISSING", tool);
            ok = false;
        }
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    if !check_tracefs(Path::new(TRACEFS)) {
        ok = false;
    }
    // UML MODE CAN STILL BE POINTED AT A KERNEL WITH --kernel
    let kernel = RunConfig::default().uml.kernel;
    if kernel.is_file() {
        println!("  uml kernel            {}", kernel.display());
    } else {
        println!("  uml kernel            NOT FOUND at {} (uml mode needs --kernel)", kernel.display());
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !check_tool("trace-cmd") {
            println!("  Install trace-cmd: pacman -S trace-cmd");
        }
        std::process::exit(1);
    }

    Ok(())
}
