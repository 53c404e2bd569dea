//! Sampling a real child process
//!
//! These need ptrace permission over the child (Yama scope <= 1, no seccomp
//! filter blocking ptrace), so they are ignored by default:
//! `cargo test -- --ignored`

use nix::unistd::Pid;
use stacksampler::cli::OutputFormat;
use stacksampler::process::Ptrace;
use stacksampler::session::{ProfilerSession, SamplerConfig};
use stacksampler::stack_unwind::MAX_STACK_DEPTH;
use std::process::{Child, Command};
use std::time::Duration;

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_sleeper() -> KillOnDrop {
    let child = Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("Failed to spawn sleep");
    // Let the exec finish before the first attach
    std::thread::sleep(Duration::from_millis(100));
    KillOnDrop(child)
}

fn config(pid: Pid, rounds: u64, format: OutputFormat) -> SamplerConfig {
    SamplerConfig {
        pid,
        rounds,
        interval: Duration::from_millis(5),
        max_depth: MAX_STACK_DEPTH,
        format,
    }
}

#[test]
#[ignore]
fn test_sample_sleeping_child() {
    let child = spawn_sleeper();
    let pid = Pid::from_raw(child.0.id() as i32);

    let mut session = ProfilerSession::new(Ptrace::new(), config(pid, 5, OutputFormat::Text));
    session.run().unwrap();

    assert_eq!(session.rounds_completed(), 5);
    let samples = session.aggregator().thread(pid.as_raw()).unwrap();
    assert_eq!(samples.stacks_seen(), 5);

    session.load_symbols().unwrap();
    assert!(session.resolver().is_some());
    let mut out = Vec::new();
    session.report(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with(&format!("thread {}:\n", pid)));
}

#[test]
#[ignore]
fn test_child_keeps_running_after_sampling() {
    let mut child = spawn_sleeper();
    let pid = Pid::from_raw(child.0.id() as i32);

    let mut session = ProfilerSession::new(Ptrace::new(), config(pid, 3, OutputFormat::Json));
    session.run().unwrap();

    // Detached and not stopped: still alive and not reaped
    assert!(child.0.try_wait().unwrap().is_none());
}
