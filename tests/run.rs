// DIRTYBENCH END-TO-END TESTS
// REAL CHILD PROCESSES: THE BUILT BINARY IS EVERY LOAD AND ALSO STANDS IN
// FOR THE TRACE COLLECTOR (A control LOAD EXITS 0 ON SIGINT, LIKE trace-cmd).
// TRACEFS IS A FAKE per_cpu TREE IN A TEMP DIRECTORY. NO ROOT NEEDED EXCEPT
// FOR THE IGNORED TESTS.
//
// cargo test --test run -- --ignored    (ROOT, REAL TRACEFS, trace-cmd)

use std::ffi::CString;
use std::fs;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use dirtybench::config::RunConfig;
use dirtybench::controller::{drive, Controller, Phase, Primary, RunPlan, Staging, Timing};
use dirtybench::error::RunError;
use dirtybench::experiment;
use dirtybench::record::{self, CycleTrace, PrimaryOutcome, RunKind, RunMetadata};
use dirtybench::task::{LoadSpec, ProcessLauncher};
use dirtybench::tracefs::Tracefs;

const BIN: &str = env!("CARGO_BIN_EXE_dirtybench");

const CLEAN: &str = "entries: 12\noverrun: 0\ncommit overrun: 0\nbytes: 2048\ndropped events: 0\nread events: 12\n";

fn fake_tracefs(per_cpu: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (i, stats) in per_cpu.iter().enumerate() {
        let d = dir.path().join("per_cpu").join(format!("cpu{}", i));
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join("stats"), stats).unwrap();
    }
    dir
}

fn collector_command() -> String {
    format!("exec '{}' load collector control 0.05", BIN)
}

fn fast_timing() -> Timing {
    Timing { warmup: 0.2, ready_timeout: 1.0, grace: 4.0, settle: 0.0 }
}

fn load_cmd(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(BIN);
    cmd.arg("load").args(args).current_dir(dir).stderr(Stdio::piped());
    cmd
}

fn sigint(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGINT);
    }
}

fn entries(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root).unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn live_config(root: &Path, tracefs: &Path, command: &str) -> RunConfig {
    let mut cfg = RunConfig::default();
    cfg.output = root.to_path_buf();
    cfg.collector.command = collector_command();
    cfg.collector.tracefs = tracefs.to_path_buf();
    cfg.timing = fast_timing();
    cfg.live.command = command.to_string();
    cfg.live.settle = 0.0;
    cfg.loads = vec![
        LoadSpec::new("c1", "control", ["0.05"]),
        LoadSpec::new("w1", "write", ["loads/write1", "0.05"]),
    ];
    cfg
}

fn run_error(err: &anyhow::Error) -> &RunError {
    err.downcast_ref::<RunError>().expect("not a RunError")
}

// === LOAD PROCESS ===

#[test]
fn load_process_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let out = load_cmd(dir.path(), &["l1", "load", "load1", "0", "4096", "1024"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let trace: CycleTrace = record::read_json(&record::trace_path(dir.path(), "l1")).unwrap();
    assert_eq!(trace.name, "l1");
    assert_eq!(trace.kind, "load");
    assert_eq!(trace.times.len(), 5);
    assert!(trace.times[0] >= trace.start);
    assert_eq!(fs::metadata(dir.path().join("load1")).unwrap().len(), 4096);
}

#[test]
fn load_process_sigint_is_clean_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = load_cmd(dir.path(), &["c1", "control", "0.05"]).spawn().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    sigint(child.id());
    let status = child.wait().unwrap();
    assert!(status.success(), "{:?}", status);

    let trace: CycleTrace = record::read_json(&record::trace_path(dir.path(), "c1")).unwrap();
    assert_eq!(trace.pid, child.id());
    assert_eq!(trace.params["idle"], dirtybench::load::ParamValue::Float(0.05));
    // STARTUP EATS PART OF THE 300ms
    assert!((2..=7).contains(&trace.times.len()), "cycles: {}", trace.times.len());
    assert!(trace.times.windows(2).all(|w| w[1] > w[0]));
}

#[test]
fn load_process_sigint_during_long_wait() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = load_cmd(dir.path(), &["l2", "load", "load2", "43", "4096", "512"]).spawn().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    let t0 = Instant::now();
    sigint(child.id());
    assert!(child.wait().unwrap().success());
    assert!(t0.elapsed() < Duration::from_secs(2));

    let trace: CycleTrace = record::read_json(&record::trace_path(dir.path(), "l2")).unwrap();
    assert!(trace.times.is_empty());
}

#[test]
fn sigint_during_startup_is_clean_stop() {
    // OPENING A FIFO FOR WRITING BLOCKS UNTIL A READER APPEARS, WHICH
    // HOLDS THE RUNNER IN STARTUP WHILE THE INTERRUPT ARRIVES
    let dir = tempfile::tempdir().unwrap();
    let fifo = dir.path().join("fifo");
    let c_path = CString::new(fifo.as_os_str().as_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) }, 0);

    let mut child = load_cmd(dir.path(), &["l1", "load", "fifo", "0", "4096", "1024"]).spawn().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    sigint(child.id());

    let mut reader = fs::File::open(&fifo).unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).unwrap();
    let status = child.wait().unwrap();
    assert!(status.success(), "{:?}", status);

    let trace: CycleTrace = record::read_json(&record::trace_path(dir.path(), "l1")).unwrap();
    assert!(trace.times.is_empty());
    assert!(buf.is_empty());
}

#[test]
fn startup_errors_exit_1_without_trace() {
    let dir = tempfile::tempdir().unwrap();
    let cases: &[&[&str]] = &[
        &[],
        &["c1"],
        &["c1", "control"],
        &["c1", "control", "0.05", "extra"],
        &["x1", "bogus", "1"],
        &["l1", "load", "f", "soon", "4096", "1024"],
        &["l1", "load", "f", "0", "4096", "0"],
        &["l1", "load", "f", "0", "4611686018427387904", "4611686018427387904"],
    ];
    for args in cases {
        let out = load_cmd(dir.path(), args).output().unwrap();
        assert_eq!(out.status.code(), Some(1), "{:?}", args);
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(stderr.contains("control"), "usage missing for {:?}: {}", args, stderr);
    }
    assert!(entries(dir.path()).is_empty(), "{:?}", entries(dir.path()));
}

#[test]
fn load_process_logs_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let out = load_cmd(dir.path(), &["c0", "control", "0.05"])
        .env("RUST_LOG", "debug")
        .spawn()
        .and_then(|child| {
            std::thread::sleep(Duration::from_millis(200));
            sigint(child.id());
            child.wait_with_output()
        })
        .unwrap();
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("load started"), "{}", stderr);
    assert!(stderr.contains("load finished"), "{}", stderr);
}

#[test]
fn io_failure_is_nonzero_without_trace() {
    let dir = tempfile::tempdir().unwrap();
    let out = load_cmd(dir.path(), &["w1", "write", "missing/write1", "0.01"]).output().unwrap();
    assert!(!out.status.success());
    assert!(!record::trace_path(dir.path(), "w1").exists());
}

// === LIVE RUN ===

#[test]
fn live_run_is_finalized() {
    let root = tempfile::tempdir().unwrap();
    let tracefs = fake_tracefs(&[CLEAN, CLEAN]);
    let cfg = live_config(root.path(), tracefs.path(), "sleep 0.3");

    let done = experiment::run_live(&cfg, ProcessLauncher::new(BIN)).unwrap();
    assert!(done.is_dir());
    assert!(!done.file_name().unwrap().to_string_lossy().starts_with('_'));
    assert_eq!(entries(root.path()).len(), 1);

    let meta: RunMetadata = record::read_json(&done.join(record::METADATA_FILE)).unwrap();
    assert_eq!(meta.kind, RunKind::Live);
    let main: PrimaryOutcome = record::read_json(&done.join(record::PRIMARY_FILE)).unwrap();
    assert_eq!(main.command, "sleep 0.3");
    assert_eq!(main.exit_code, Some(0));

    for name in ["c1", "w1", "collector"] {
        let trace: CycleTrace = record::read_json(&record::trace_path(&done, name)).unwrap();
        assert!(!trace.times.is_empty(), "{} recorded nothing", name);
    }
    // LOADS KEEP CYCLING UNTIL THE PRIMARY HAS ENDED
    let c1: CycleTrace = record::read_json(&record::trace_path(&done, "c1")).unwrap();
    assert!(*c1.times.last().unwrap() >= main.start + 0.2);

    assert!(done.join("config.toml").exists());
    assert!(!done.join("loads").exists());
}

#[test]
fn live_run_nonzero_primary_stays_staged() {
    let root = tempfile::tempdir().unwrap();
    let tracefs = fake_tracefs(&[CLEAN]);
    let cfg = live_config(root.path(), tracefs.path(), "exit 3");

    let err = experiment::run_live(&cfg, ProcessLauncher::new(BIN)).unwrap_err();
    assert!(matches!(run_error(&err), RunError::TaskFailed { status, .. } if status.code() == Some(3)));

    let names = entries(root.path());
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with('_'), "{:?}", names);
    let staged = root.path().join(&names[0]);
    let main: PrimaryOutcome = record::read_json(&staged.join(record::PRIMARY_FILE)).unwrap();
    assert_eq!(main.exit_code, Some(3));
}

#[test]
fn live_run_lost_events_stays_staged() {
    let root = tempfile::tempdir().unwrap();
    let lossy = "entries: 12\noverrun: 0\ndropped events: 7\n";
    let tracefs = fake_tracefs(&[CLEAN, lossy]);
    let cfg = live_config(root.path(), tracefs.path(), "true");

    let err = experiment::run_live(&cfg, ProcessLauncher::new(BIN)).unwrap_err();
    match run_error(&err) {
        RunError::LostEvents { unit, lost } => {
            assert_eq!(unit, "cpu1");
            assert_eq!(*lost, 7);
        }
        other => panic!("unexpected {:?}", other),
    }
    let names = entries(root.path());
    assert!(names.iter().all(|n| n.starts_with('_')), "{:?}", names);
}

#[test]
fn live_run_collector_exit_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let tracefs = fake_tracefs(&[CLEAN]);
    let mut cfg = live_config(root.path(), tracefs.path(), "true");
    cfg.collector.command = "exit 2".to_string();

    let err = experiment::run_live(&cfg, ProcessLauncher::new(BIN)).unwrap_err();
    assert!(matches!(run_error(&err), RunError::CollectorExited { .. }));
}

#[test]
fn bad_secondary_load_fails_run() {
    let root = tempfile::tempdir().unwrap();
    let tracefs = fake_tracefs(&[CLEAN]);
    let mut cfg = live_config(root.path(), tracefs.path(), "sleep 0.2");
    cfg.loads.push(LoadSpec::new("bad", "control", ["-1"]));

    let err = experiment::run_live(&cfg, ProcessLauncher::new(BIN)).unwrap_err();
    assert!(matches!(run_error(&err), RunError::TaskFailed { task, .. } if task == "bad"));
}

// === LAST LOAD AS PRIMARY (THE UML GUEST SEQUENCE, WITHOUT THE KERNEL) ===

#[test]
fn last_load_primary_sequence() {
    let root = tempfile::tempdir().unwrap();
    let tracefs = fake_tracefs(&[CLEAN, CLEAN]);
    let staging = Staging::create(root.path(), "seq").unwrap();
    let mut c = Controller::new(staging, ProcessLauncher::new(BIN), Tracefs::new(tracefs.path()), fast_timing());

    let loads = vec![
        LoadSpec::new("c1", "control", ["0.05"]),
        LoadSpec::new("mw1", "multiwrite", ["multiwrite1", "0.1"]),
        LoadSpec::new("l1", "load", ["load1", "0.3", "8192", "1024"]),
    ];
    let collector = collector_command();
    drive(&mut c, &RunPlan {
        metadata: RunMetadata::now(RunKind::Live),
        collector: &collector,
        loads: &loads,
        primary: Primary::LastLoad,
    })
    .unwrap();
    assert_eq!(c.phase(), Phase::Quiescing);
    let done = c.finalize().unwrap();
    assert_eq!(done, root.path().join("seq"));

    let l1: CycleTrace = record::read_json(&record::trace_path(&done, "l1")).unwrap();
    assert_eq!(l1.times.len(), 8 + 1);
    let mw1: CycleTrace = record::read_json(&record::trace_path(&done, "mw1")).unwrap();
    assert!(!mw1.times.is_empty());
    for i in 0..mw1.times.len() {
        assert_eq!(fs::read(done.join(format!("multiwrite1.{}", i))).unwrap(), b"test");
    }
    // NO PRIMARY COMMAND IN THIS MODE
    assert!(!done.join(record::PRIMARY_FILE).exists());
}

// === ROOT ONLY ===

#[test]
#[ignore]
fn live_run_with_real_tracefs() {
    if !experiment::is_root() {
        eprintln!("SKIPPED: needs root");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let mut cfg = RunConfig::default();
    cfg.output = root.path().to_path_buf();
    cfg.live.command = "sleep 2".to_string();
    cfg.live.settle = 1.0;

    let done: PathBuf = experiment::run_live(&cfg, ProcessLauncher::new(BIN)).unwrap();
    assert!(done.join(record::PRIMARY_FILE).exists());
    assert!(done.join("trace.dat").exists());
}
