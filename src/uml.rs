// DIRTYBENCH USER-MODE LINUX ENVIRONMENT
// HOST SIDE:  BACKING FILE -> mkfs.ext2 -> BOOT THE KERNEL WITH THIS BINARY AS init
// GUEST SIDE: MOUNT PSEUDO FILESYSTEMS -> THROTTLE THE DEVICE -> MOUNT IT -> ... -> POWER OFF
//
// THE HOST ROOT IS THE GUEST ROOT (hostfs), SO THE STAGING DIRECTORY HAS
// THE SAME PATH ON BOTH SIDES.

use std::fs;
use std::io::Write;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::UmlConfig;

const FILL_BLOCK: usize = 4096;
const BLKIO: &str = "/sys/fs/cgroup/blkio";

fn run(cmd: &mut Command) -> Result<()> {
    debug!(?cmd, "run");
    let status = cmd.status().with_context(|| format!("starting {:?}", cmd))?;
    if !status.success() {
        bail!("{:?} failed with {}", cmd, status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// HOST
// ---------------------------------------------------------------------------

// BACKING FILE OF `size` BYTES FILLED WITH 0xFF. DELETED WHEN DROPPED.
pub fn create_device(scratch: &Path, size: u64) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new_in(scratch)
        .with_context(|| format!("creating device file in {}", scratch.display()))?;
    let block = [0xFFu8; FILL_BLOCK];
    let mut missing = size;
    while missing > 0 {
        let n = missing.min(FILL_BLOCK as u64) as usize;
        file.write_all(&block[..n])?;
        missing -= n as u64;
    }
    file.as_file().sync_all()?;
    info!(path = %file.path().display(), size, "device file created");
    Ok(file)
}

pub fn format(device: &Path) -> Result<()> {
    run(Command::new("mkfs.ext2").arg("-F").arg(device))
}

// BLOCKS UNTIL THE GUEST POWERS OFF
pub fn boot(cfg: &UmlConfig, device: &Path, init: &Path, staging: &Path) -> Result<()> {
    let mut cmd = Command::new(&cfg.kernel);
    cmd.arg(format!("mem={}", cfg.memory))
        .args(["root=/dev/root", "rootfstype=hostfs", "rw"])
        .arg(format!("ubdb={}", device.display()))
        .arg(format!("init={}", init.display()))
        .arg("--")
        .arg(staging);
    run(&mut cmd)
}

// ---------------------------------------------------------------------------
// GUEST
// ---------------------------------------------------------------------------

fn mount(fstype: &str, options: Option<&str>, source: &str, target: &Path) -> Result<()> {
    let mut cmd = Command::new("mount");
    cmd.arg("-t").arg(fstype);
    if let Some(options) = options {
        cmd.arg("-o").arg(options);
    }
    run(cmd.arg(source).arg(target))
}

pub fn mount_pseudo_filesystems(tracefs: &Path) -> Result<()> {
    mount("proc", None, "none", Path::new("/proc"))?;
    mount("sysfs", None, "none", Path::new("/sys"))?;
    mount("tmpfs", None, "none", Path::new("/sys/fs/cgroup"))?;
    fs::create_dir(BLKIO).with_context(|| format!("creating {}", BLKIO))?;
    mount("cgroup", Some("blkio"), "none", Path::new(BLKIO))?;
    mount("tracefs", None, "none", tracefs)
}

// "<major>:<minor>" OF A BLOCK DEVICE NODE
pub fn device_number(device: &Path) -> Result<String> {
    let rdev = fs::metadata(device)
        .with_context(|| format!("stat {}", device.display()))?
        .rdev();
    Ok(format!("{}:{}", libc::major(rdev), libc::minor(rdev)))
}

pub fn throttle_line(dev_number: &str, write_bps: u64) -> String {
    format!("{} {}", dev_number, write_bps)
}

pub fn throttle(dev_number: &str, write_bps: u64) -> Result<()> {
    let path = Path::new(BLKIO).join("blkio.throttle.write_bps_device");
    fs::write(&path, throttle_line(dev_number, write_bps))
        .with_context(|| format!("writing {}", path.display()))?;
    info!(device = dev_number, write_bps, "write bandwidth throttled");
    Ok(())
}

pub fn mount_device(device: &Path, target: &Path) -> Result<()> {
    run(Command::new("mount").arg(device).arg(target))
}

// hostfs ONLY FLUSHES ON SYNC; POWER-OFF UNMOUNTS FORCEFULLY
pub fn power_off() -> ! {
    unsafe {
        let root = libc::open(c"/".as_ptr(), libc::O_RDONLY);
        if root >= 0 {
            libc::syncfs(root);
        }
        libc::reboot(libc::LINUX_REBOOT_CMD_POWER_OFF);
    }
    // REBOOT ONLY RETURNS ON ERROR. INIT MUST NEVER EXIT.
    loop {
        std::thread::park();
    }
}
