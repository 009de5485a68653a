// DIRTYBENCH CLOCKS
// MONOTONIC SECONDS SHARED BY EVERY PROCESS IN A RUN, PLUS WALL-CLOCK NAMING.
// ALL PROCESSES READ THE SAME CLOCK_MONOTONIC, SO LOAD TIMESTAMPS AND THE
// PRIMARY TASK START CAN BE COMPARED DIRECTLY DURING ANALYSIS.

use chrono::Local;

pub fn monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

pub fn monotonic_secs() -> f64 {
    monotonic_ns() as f64 / 1_000_000_000.0
}

// PERMANENT RUN NAME. MINUTE GRANULARITY: TWO RUNS IN THE SAME MINUTE COLLIDE.
pub fn run_name() -> String {
    Local::now().format("%m-%d_%H-%M").to_string()
}

pub fn iso_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

// EQUIVALENT OF `uname -r`
pub fn kernel_release() -> String {
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return "unknown".to_string();
    }
    let bytes: Vec<u8> = uts.release.iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
